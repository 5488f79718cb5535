//! Error types for scanview operations

use crate::capture::CaptureHandle;
use thiserror::Error;

/// Result type alias using scanview's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for scanview operations
#[derive(Error, Debug)]
pub enum Error {
    /// Camera-related errors
    #[error("Camera error: {0}")]
    Camera(String),

    /// Camera device not found
    #[error("Camera device not found: {0}")]
    CameraNotFound(String),

    /// Failed to capture frame from camera
    #[error("Frame capture failed: {0}")]
    FrameCapture(String),

    /// Neither a supported-size list nor a current preview size could be read
    #[error("Camera parameters contained no preview size")]
    NoPreviewSizeAvailable,

    /// Camera parameters could not be read at all
    #[error("Camera parameters unavailable: {0}")]
    ParametersUnavailable(String),

    /// A video recording is already active
    #[error("Video recording already in progress")]
    RecordingInProgress,

    /// A picture or video capture failed
    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    /// No pending capture matches the handle
    #[error("No pending capture for handle {0}")]
    UnknownCapture(CaptureHandle),

    /// Camera permission was not granted
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image processing error
    #[error("Image processing error: {0}")]
    Image(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<image::ImageError> for Error {
    fn from(e: image::ImageError) -> Self {
        Error::Image(e.to_string())
    }
}

// V4L errors are converted manually in camera module

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Other(format!("JSON error: {}", e))
    }
}
