//! Pending picture and video requests
//!
//! A capture request lives from submission until the hardware callback
//! resolves it. Any number of pictures may be pending at once; only one video
//! recording may be active.

use crate::error::{Error, Result};
use crate::events::{CameraEvent, EventSink};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Identifies one capture request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaptureHandle(Uuid);

impl CaptureHandle {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for CaptureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Options for a still capture
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PictureOptions {
    /// Output file; generated in the capture directory when absent
    pub path: Option<PathBuf>,
    /// JPEG quality in `0.0..=1.0`
    pub quality: Option<f32>,
    /// Mirror the image horizontally
    pub mirror: bool,
    /// Skip post-processing (rotation, mirroring)
    pub skip_processing: bool,
}

/// Encoder profile for recordings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoQuality {
    /// 2160p
    Uhd,
    /// 1080p
    #[default]
    High,
    /// 720p
    Hd,
    /// 480p
    Sd,
    /// Lowest profile the camera supports
    Low,
}

/// Options for a video recording
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordOptions {
    /// Output file; generated in the capture directory when absent
    pub path: Option<PathBuf>,
    /// Stop after this many seconds
    pub max_duration_secs: Option<u64>,
    /// Stop once the file reaches this many bytes
    pub max_file_size: Option<u64>,
    /// Encoder profile
    pub quality: VideoQuality,
    /// Override the profile's video bitrate
    pub video_bitrate: Option<u32>,
    /// Record without audio
    pub mute: bool,
    /// Fixed orientation in degrees; follows the device when absent
    pub orientation: Option<u32>,
}

impl RecordOptions {
    /// Recording time limit, if any
    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_secs.map(Duration::from_secs)
    }

    /// Whether audio is captured
    pub fn records_audio(&self) -> bool {
        !self.mute
    }
}

/// Successful still capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PictureOutcome {
    /// Where the picture was written
    pub path: PathBuf,
    /// Picture width
    pub width: u32,
    /// Picture height
    pub height: u32,
}

/// Successful recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoOutcome {
    /// Where the video was written
    pub path: PathBuf,
    /// Whether the host paused while recording
    pub interrupted: bool,
}

/// Generate a unique file path with the given extension inside `directory`
pub fn output_file_path(directory: &Path, extension: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(directory).map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to create capture directory {}: {e}", directory.display()),
        ))
    })?;

    let extension = extension.trim_start_matches('.');
    Ok(directory.join(format!("{}.{extension}", Uuid::new_v4())))
}

/// Receives the result of one capture request
#[derive(Debug)]
pub struct CaptureTicket<T> {
    /// Handle identifying the request
    pub handle: CaptureHandle,
    /// Where the capture will be written
    pub output_path: PathBuf,
    receiver: oneshot::Receiver<Result<T>>,
}

impl<T> CaptureTicket<T> {
    /// Wait for the request to resolve
    pub async fn wait(self) -> Result<T> {
        self.receiver
            .await
            .map_err(|_| Error::CaptureFailed(format!("capture {} was abandoned", self.handle)))?
    }
}

struct PendingPicture {
    options: PictureOptions,
    output_path: PathBuf,
    submitted_at: Instant,
    responder: oneshot::Sender<Result<PictureOutcome>>,
}

struct ActiveRecording {
    handle: CaptureHandle,
    options: RecordOptions,
    output_path: PathBuf,
    interrupted: bool,
    responder: oneshot::Sender<Result<VideoOutcome>>,
}

/// Thread-safe registry of pending capture requests
pub struct CaptureRegistry {
    directory: PathBuf,
    pictures: Mutex<HashMap<CaptureHandle, PendingPicture>>,
    recording: Mutex<Option<ActiveRecording>>,
    sink: Arc<dyn EventSink>,
    shutter_sound: bool,
}

impl CaptureRegistry {
    /// Create a registry writing generated paths under `directory`
    pub fn new(directory: impl Into<PathBuf>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            directory: directory.into(),
            pictures: Mutex::new(HashMap::new()),
            recording: Mutex::new(None),
            sink,
            shutter_sound: false,
        }
    }

    /// Ask the host to play a shutter sound for every picture request
    pub fn with_shutter_sound(mut self, enabled: bool) -> Self {
        self.shutter_sound = enabled;
        self
    }

    /// Whether picture requests trigger a shutter sound
    pub fn shutter_sound(&self) -> bool {
        self.shutter_sound
    }

    /// Directory generated paths are placed in
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Register a picture request. Never waits on earlier requests.
    pub fn take_picture(&self, options: PictureOptions) -> Result<CaptureTicket<PictureOutcome>> {
        let output_path = match &options.path {
            Some(path) => path.clone(),
            None => output_file_path(&self.directory, "jpg")?,
        };

        let handle = CaptureHandle::generate();
        let (responder, receiver) = oneshot::channel();
        lock(&self.pictures).insert(
            handle,
            PendingPicture {
                options,
                output_path: output_path.clone(),
                submitted_at: Instant::now(),
                responder,
            },
        );
        tracing::debug!(%handle, path = %output_path.display(), "Picture requested");
        if self.shutter_sound {
            self.sink.emit(CameraEvent::Shutter { handle });
        }

        Ok(CaptureTicket {
            handle,
            output_path,
            receiver,
        })
    }

    /// Options and output path of a pending picture
    pub fn pending_picture(&self, handle: CaptureHandle) -> Option<(PictureOptions, PathBuf)> {
        lock(&self.pictures)
            .get(&handle)
            .map(|p| (p.options.clone(), p.output_path.clone()))
    }

    /// Number of unresolved picture requests
    pub fn pending_pictures(&self) -> usize {
        lock(&self.pictures).len()
    }

    /// Resolve a picture request exactly once and forget it
    pub fn resolve_picture(&self, handle: CaptureHandle, result: Result<PictureOutcome>) -> Result<()> {
        let pending = lock(&self.pictures)
            .remove(&handle)
            .ok_or(Error::UnknownCapture(handle))?;

        let event = match &result {
            Ok(outcome) => {
                tracing::info!(
                    %handle,
                    path = %outcome.path.display(),
                    elapsed_ms = pending.submitted_at.elapsed().as_millis() as u64,
                    "Picture saved"
                );
                CameraEvent::PictureSaved {
                    handle,
                    path: outcome.path.clone(),
                    width: outcome.width,
                    height: outcome.height,
                }
            }
            Err(err) => {
                tracing::warn!(%handle, "Picture capture failed: {err}");
                CameraEvent::CaptureFailed {
                    handle,
                    message: err.to_string(),
                }
            }
        };

        self.sink.emit(event);
        // The caller may have stopped waiting; the request is resolved either way.
        let _ = pending.responder.send(result);
        Ok(())
    }

    /// Start tracking a recording, failing fast if one is already active
    pub fn record(&self, options: RecordOptions) -> Result<CaptureTicket<VideoOutcome>> {
        let mut slot = lock(&self.recording);
        if slot.is_some() {
            return Err(Error::RecordingInProgress);
        }

        let output_path = match &options.path {
            Some(path) => path.clone(),
            None => output_file_path(&self.directory, "mp4")?,
        };

        let handle = CaptureHandle::generate();
        let (responder, receiver) = oneshot::channel();
        tracing::info!(
            %handle,
            path = %output_path.display(),
            max_duration_secs = options.max_duration_secs,
            audio = options.records_audio(),
            "Recording started"
        );
        *slot = Some(ActiveRecording {
            handle,
            options,
            output_path: output_path.clone(),
            interrupted: false,
            responder,
        });

        Ok(CaptureTicket {
            handle,
            output_path,
            receiver,
        })
    }

    /// Whether a recording is active
    pub fn is_recording(&self) -> bool {
        lock(&self.recording).is_some()
    }

    /// Options of the active recording
    pub fn active_recording(&self) -> Option<(CaptureHandle, RecordOptions)> {
        lock(&self.recording)
            .as_ref()
            .map(|r| (r.handle, r.options.clone()))
    }

    /// Flag the active recording as interrupted. Returns whether one was active.
    pub fn mark_interrupted(&self) -> bool {
        match lock(&self.recording).as_mut() {
            Some(active) => {
                active.interrupted = true;
                true
            }
            None => false,
        }
    }

    /// Resolve the active recording and free the slot.
    ///
    /// On success the outcome is reported as interrupted if the host paused
    /// at any point during the recording.
    pub fn resolve_video(&self, result: Result<VideoOutcome>) -> Result<CaptureHandle> {
        let active = lock(&self.recording)
            .take()
            .ok_or_else(|| Error::CaptureFailed("no recording in progress".to_string()))?;
        let handle = active.handle;

        let result = result.map(|mut outcome| {
            outcome.interrupted |= active.interrupted;
            outcome
        });

        let event = match &result {
            Ok(outcome) => CameraEvent::VideoRecorded {
                handle,
                path: outcome.path.clone(),
                interrupted: outcome.interrupted,
            },
            Err(err) => {
                tracing::warn!(%handle, path = %active.output_path.display(), "Recording failed: {err}");
                CameraEvent::CaptureFailed {
                    handle,
                    message: err.to_string(),
                }
            }
        };

        self.sink.emit(event);
        let _ = active.responder.send(result);
        Ok(handle)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChannelSink;

    fn registry() -> (CaptureRegistry, tokio::sync::mpsc::UnboundedReceiver<CameraEvent>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let (sink, rx) = ChannelSink::new();
        (CaptureRegistry::new(dir.path(), Arc::new(sink)), rx, dir)
    }

    #[test]
    fn generated_paths_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let a = output_file_path(&dir.path().join("cache"), ".jpg").unwrap();
        let b = output_file_path(&dir.path().join("cache"), "jpg").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.extension().unwrap(), "jpg");
        assert!(dir.path().join("cache").is_dir());
    }

    #[test]
    fn explicit_paths_are_kept() {
        let (registry, _rx, _dir) = registry();
        let ticket = registry
            .take_picture(PictureOptions {
                path: Some(PathBuf::from("/tmp/shot.jpg")),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(ticket.output_path, PathBuf::from("/tmp/shot.jpg"));
    }

    #[tokio::test]
    async fn shutter_event_follows_sound_setting() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, mut rx) = ChannelSink::new();
        let sink: Arc<dyn EventSink> = Arc::new(sink);

        let silent = CaptureRegistry::new(dir.path(), sink.clone());
        assert!(!silent.shutter_sound());
        silent.take_picture(PictureOptions::default()).unwrap();
        assert!(rx.try_recv().is_err());

        let loud = CaptureRegistry::new(dir.path(), sink).with_shutter_sound(true);
        let ticket = loud.take_picture(PictureOptions::default()).unwrap();
        assert_eq!(rx.recv().await, Some(CameraEvent::Shutter { handle: ticket.handle }));
    }

    #[tokio::test]
    async fn pictures_resolve_independently() {
        let (registry, mut rx, _dir) = registry();
        let first = registry.take_picture(PictureOptions::default()).unwrap();
        let second = registry.take_picture(PictureOptions::default()).unwrap();
        assert_eq!(registry.pending_pictures(), 2);

        registry
            .resolve_picture(second.handle, Err(Error::CaptureFailed("shutter jammed".into())))
            .unwrap();
        assert_eq!(registry.pending_pictures(), 1);
        assert!(registry.pending_picture(first.handle).is_some());

        let path = first.output_path.clone();
        registry
            .resolve_picture(
                first.handle,
                Ok(PictureOutcome {
                    path: path.clone(),
                    width: 640,
                    height: 480,
                }),
            )
            .unwrap();

        assert!(matches!(second.wait().await, Err(Error::CaptureFailed(_))));
        assert_eq!(first.wait().await.unwrap().path, path);
        assert_eq!(registry.pending_pictures(), 0);

        assert!(matches!(rx.recv().await, Some(CameraEvent::CaptureFailed { .. })));
        assert!(matches!(rx.recv().await, Some(CameraEvent::PictureSaved { width: 640, .. })));
    }

    #[test]
    fn resolving_twice_fails() {
        let (registry, _rx, _dir) = registry();
        let ticket = registry.take_picture(PictureOptions::default()).unwrap();
        let outcome = PictureOutcome {
            path: ticket.output_path.clone(),
            width: 1,
            height: 1,
        };
        registry.resolve_picture(ticket.handle, Ok(outcome.clone())).unwrap();
        assert!(matches!(
            registry.resolve_picture(ticket.handle, Ok(outcome)),
            Err(Error::UnknownCapture(_))
        ));
    }

    #[tokio::test]
    async fn interrupted_recordings_are_flagged() {
        let (registry, _rx, _dir) = registry();
        let ticket = registry.record(RecordOptions::default()).unwrap();
        assert_eq!(ticket.output_path.extension().unwrap(), "mp4");
        assert!(registry.mark_interrupted());

        let handle = registry
            .resolve_video(Ok(VideoOutcome {
                path: ticket.output_path.clone(),
                interrupted: false,
            }))
            .unwrap();
        assert_eq!(handle, ticket.handle);
        assert!(ticket.wait().await.unwrap().interrupted);
        assert!(!registry.is_recording());
        assert!(!registry.mark_interrupted());
    }

    #[test]
    fn record_options_defaults() {
        let options = RecordOptions::default();
        assert!(options.records_audio());
        assert_eq!(options.max_duration(), None);
        assert_eq!(options.quality, VideoQuality::High);

        let options: RecordOptions = serde_json::from_str(r#"{"mute": true, "max_duration_secs": 30}"#).unwrap();
        assert!(!options.records_audio());
        assert_eq!(options.max_duration(), Some(Duration::from_secs(30)));
    }
}
