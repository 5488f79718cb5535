//! JSON-lines event stream over a Unix domain socket

#![cfg(target_family = "unix")]

use super::{CameraEvent, EventSink};
use crate::error::{Error, Result};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const CHANNEL_CAPACITY: usize = 128;

/// Fans camera events out to every connected socket client, one JSON object per line.
///
/// Slow clients that fall more than the channel capacity behind skip ahead
/// rather than stalling detector workers.
pub struct UnixBroadcast {
    sender: broadcast::Sender<Arc<str>>,
    accept_task: JoinHandle<()>,
    socket_path: PathBuf,
}

impl UnixBroadcast {
    /// Bind the socket (replacing a stale one) and start accepting clients
    pub async fn bind(path: &Path) -> Result<Arc<Self>> {
        prepare_socket_path(path).await?;

        let listener = UnixListener::bind(path)
            .map_err(|e| io_context(e, format!("Failed to bind Unix socket {}", path.display())))?;

        let (sender, _) = broadcast::channel::<Arc<str>>(CHANNEL_CAPACITY);
        let accept_sender = sender.clone();

        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _addr)) => {
                        tracing::debug!("Event socket client connected");
                        tokio::spawn(stream_events(stream, accept_sender.subscribe()));
                    }
                    Err(err) => tracing::warn!("Unix socket accept error: {err}"),
                }
            }
        });

        tracing::info!(path = %path.display(), "Broadcasting camera events");

        Ok(Arc::new(Self {
            sender,
            accept_task,
            socket_path: path.to_path_buf(),
        }))
    }

    /// Path the socket is bound to
    pub fn path(&self) -> &Path {
        &self.socket_path
    }

    /// Number of connected clients
    pub fn client_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Serialize and broadcast one event.
    ///
    /// Returns the number of clients the event was queued for.
    pub fn send_event(&self, event: &CameraEvent) -> Result<usize> {
        let line: Arc<str> = serde_json::to_string(event)?.into();
        // With no clients connected the send fails; that is not an error here.
        Ok(self.sender.send(line).unwrap_or(0))
    }
}

impl EventSink for UnixBroadcast {
    fn emit(&self, event: CameraEvent) {
        if let Err(err) = self.send_event(&event) {
            tracing::warn!("Failed to broadcast event: {err}");
        }
    }
}

impl Drop for UnixBroadcast {
    fn drop(&mut self) {
        self.accept_task.abort();
        if let Err(err) = std::fs::remove_file(&self.socket_path) {
            tracing::debug!(
                "Failed to cleanup Unix socket {}: {}",
                self.socket_path.display(),
                err
            );
        }
    }
}

async fn prepare_socket_path(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_context(e, format!("Failed to create directory {}", parent.display())))?;
    }

    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| io_context(e, format!("Failed to remove existing socket {}", path.display())))?;
    }

    Ok(())
}

fn io_context(err: io::Error, context: String) -> Error {
    Error::Io(io::Error::new(err.kind(), format!("{context}: {err}")))
}

async fn stream_events(mut stream: UnixStream, mut rx: broadcast::Receiver<Arc<str>>) {
    loop {
        let line = match rx.recv().await {
            Ok(line) => line,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Event socket client lagging; skipping events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let mut payload = Vec::with_capacity(line.len() + 1);
        payload.extend_from_slice(line.as_bytes());
        payload.push(b'\n');

        if let Err(err) = stream.write_all(&payload).await {
            tracing::debug!("Event socket client write error: {err}");
            break;
        }
    }
}
