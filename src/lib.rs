//! Scanview - camera preview sizing and gated frame analysis
//!
//! This library picks a camera preview size that suits the screen it is shown
//! on, applies it to the camera, and fans preview frames out to independent
//! detector pipelines (barcode decoding, generic barcodes, faces, text) that
//! each process at most one frame at a time.
//!
//! # Features
//!
//! - **Preview Geometry**: Aspect-ratio aware preview size selection
//! - **Detector Gates**: Per-kind single-flight scheduling with frame dropping
//! - **Capture Requests**: Picture and video request tracking with one-shot results
//! - **Camera Integration**: Direct V4L2 access on Linux (`camera` feature)
//!
//! # Example
//!
//! ```no_run
//! use scanview::detect::{BarcodeDecoder, DetectionScheduler, DetectorKind};
//! use scanview::events::{CameraEvent, ChannelSink};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (sink, mut events) = ChannelSink::new();
//!     let scheduler = DetectionScheduler::new(Arc::new(sink))?;
//!     scheduler.register(DetectorKind::BarcodeDecode, BarcodeDecoder::default());
//!     scheduler.set_enabled(DetectorKind::BarcodeDecode, true)?;
//!
//!     let frame = scanview::detect::Frame::from_image(1, &image::open("qr.png")?);
//!     scheduler.submit(Arc::new(frame));
//!
//!     if let Some(CameraEvent::Detections { detections, .. }) = events.recv().await {
//!         println!("Found {} codes", detections.len());
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs, rust_2024_compatibility)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod camera;
pub mod capture;
pub mod config;
pub mod detect;
pub mod error;
pub mod events;
pub mod geometry;
pub mod logging;
pub mod metrics;
pub mod session;

// Re-exports for convenience
pub use error::{Error, Result};

#[cfg(feature = "camera")]
pub use camera::{CameraDevice, V4l2Camera};

pub use camera::{AppliedConfig, CameraConfig, CameraControl, ConfigurationCoordinator, FocusMode};
pub use capture::{CaptureHandle, CaptureRegistry, PictureOptions, RecordOptions};
pub use config::{CameraOptions, CaptureOptions, EventOptions, LogRotation, LoggingOptions, ScanviewConfig};
pub use detect::{Detection, DetectionScheduler, Detector, DetectorFactories, DetectorKind, DetectorSettings, Frame};
pub use events::{CameraEvent, ChannelSink, EventSink};
pub use geometry::{Resolution, ScreenProfile, SelectedPreviewConfig, find_best_preview_size};
pub use session::{CameraSession, PermissionCheck};
