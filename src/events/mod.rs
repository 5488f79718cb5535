//! Notifications delivered to the host layer
//!
//! The host UI is an opaque consumer: it receives detection batches, detector
//! errors, mount errors and capture completions, and holds no logic of its own.

#[cfg(target_family = "unix")]
pub mod unix;

use crate::capture::CaptureHandle;
use crate::detect::{Detection, DetectorKind};
use crate::geometry::Resolution;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Everything a camera session reports outward
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CameraEvent {
    /// The camera could not be mounted (e.g. permission denied)
    MountError {
        /// Human-readable reason
        message: String,
    },
    /// The camera was configured and started
    CameraReady {
        /// Preview size requested from the camera
        requested: Resolution,
        /// Preview size the camera actually reports
        preview_size: Resolution,
        /// Achieved size in the screen's orientation
        screen_preview_size: Resolution,
    },
    /// A detector task finished; `detections` may be empty
    Detections {
        /// Kind that produced the batch
        kind: DetectorKind,
        /// Frame the batch was computed from
        frame: u64,
        /// Results
        detections: Vec<Detection>,
    },
    /// A detector task failed
    DetectionError {
        /// Kind that failed
        kind: DetectorKind,
        /// Frame being analysed
        frame: u64,
        /// Adapter-provided reason
        message: String,
    },
    /// A picture was requested and the host should play the shutter sound
    Shutter {
        /// Handle returned for the picture request
        handle: CaptureHandle,
    },
    /// A picture request resolved successfully
    PictureSaved {
        /// Handle returned when the picture was requested
        handle: CaptureHandle,
        /// Where the picture was written
        path: PathBuf,
        /// Picture width
        width: u32,
        /// Picture height
        height: u32,
    },
    /// A video request resolved successfully
    VideoRecorded {
        /// Handle returned when recording started
        handle: CaptureHandle,
        /// Where the video was written
        path: PathBuf,
        /// Whether the host paused while recording
        interrupted: bool,
    },
    /// A picture or video request failed
    CaptureFailed {
        /// Handle returned when the capture was requested
        handle: CaptureHandle,
        /// Failure reason
        message: String,
    },
}

impl CameraEvent {
    /// Detector kind the event belongs to, if any
    pub fn kind(&self) -> Option<DetectorKind> {
        match self {
            CameraEvent::Detections { kind, .. } | CameraEvent::DetectionError { kind, .. } => {
                Some(*kind)
            }
            _ => None,
        }
    }
}

/// Consumer of [`CameraEvent`]s.
///
/// `emit` is called from detector worker threads as well as the session's own
/// thread, so implementations must not block for long.
pub trait EventSink: Send + Sync {
    /// Deliver one event
    fn emit(&self, event: CameraEvent);
}

impl<F> EventSink for F
where
    F: Fn(CameraEvent) + Send + Sync,
{
    fn emit(&self, event: CameraEvent) {
        self(event)
    }
}

/// Forwards events into an unbounded Tokio channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<CameraEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver that drains it
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CameraEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: CameraEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("Event receiver dropped; discarding event");
        }
    }
}

/// Human-readable lines describing an event, for terminal output
pub fn render_event(event: &CameraEvent) -> Vec<String> {
    match event {
        CameraEvent::MountError { message } => vec![format!("Camera mount error: {message}")],
        CameraEvent::CameraReady {
            requested,
            preview_size,
            screen_preview_size,
        } => {
            let mut lines = vec![
                "Camera ready".to_string(),
                format!("  Preview size: {preview_size}"),
                format!("  On screen: {screen_preview_size}"),
            ];
            if requested != preview_size {
                lines.push(format!("  Requested {requested}, camera chose {preview_size}"));
            }
            lines
        }
        CameraEvent::Detections {
            kind,
            frame,
            detections,
        } => {
            let mut lines = vec![format!(
                "{kind}: {} result(s) in frame {frame}",
                detections.len()
            )];
            lines.extend(detections.iter().map(|d| format!("  {}", describe_detection(d))));
            lines
        }
        CameraEvent::DetectionError {
            kind,
            frame,
            message,
        } => vec![format!("{kind}: detection failed on frame {frame}: {message}")],
        CameraEvent::Shutter { handle } => vec![format!("Picture {handle}: shutter")],
        CameraEvent::PictureSaved {
            handle,
            path,
            width,
            height,
        } => vec![format!(
            "Picture {handle} saved to {} ({width}x{height})",
            path.display()
        )],
        CameraEvent::VideoRecorded {
            handle,
            path,
            interrupted,
        } => {
            let suffix = if *interrupted { " (interrupted)" } else { "" };
            vec![format!("Video {handle} saved to {}{suffix}", path.display())]
        }
        CameraEvent::CaptureFailed { handle, message } => {
            vec![format!("Capture {handle} failed: {message}")]
        }
    }
}

fn describe_detection(detection: &Detection) -> String {
    match detection {
        Detection::Barcode { format, data, .. } => match data {
            Some(text) => format!("{format}: {text}"),
            None => format!("{format} (located)"),
        },
        Detection::Face {
            bounds, face_id, ..
        } => match face_id {
            Some(id) => format!(
                "face #{id} at {:.0},{:.0} {:.0}x{:.0}",
                bounds.x, bounds.y, bounds.width, bounds.height
            ),
            None => format!(
                "face at {:.0},{:.0} {:.0}x{:.0}",
                bounds.x, bounds.y, bounds.width, bounds.height
            ),
        },
        Detection::Text { value, .. } => format!("text: {value}"),
    }
}
