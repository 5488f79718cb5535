//! Camera capability surface and preview configuration
//!
//! [`CameraControl`] is the small set of operations the configuration logic
//! needs from a camera. The V4L2 backend implements it for Linux webcams;
//! tests and other hosts provide their own.

mod config;
mod configure;
#[cfg(feature = "camera")]
#[cfg_attr(docsrs, doc(cfg(feature = "camera")))]
pub mod v4l2;

pub use config::{CameraConfig, PixelFormat};
pub use configure::{AppliedConfig, ConfigurationCoordinator, DISPLAY_ROTATION_DEGREES, RequestedConfig};

#[cfg(feature = "camera")]
pub use v4l2::{CameraDevice, V4l2Camera, device_accessible, find_device_by_name, list_devices};

use crate::error::Result;
use crate::geometry::{CameraCapabilitySnapshot, Resolution};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Focus behaviour a camera may support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FocusMode {
    /// Single-shot auto-focus
    Auto,
    /// Close-up auto-focus
    Macro,
    /// Extended depth of field
    ExtendedDepthOfField,
    /// Continuous auto-focus tuned for video
    ContinuousVideo,
    /// Fixed focus
    Fixed,
    /// Focus at infinity
    Infinity,
}

impl fmt::Display for FocusMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FocusMode::Auto => "auto",
            FocusMode::Macro => "macro",
            FocusMode::ExtendedDepthOfField => "edof",
            FocusMode::ContinuousVideo => "continuous-video",
            FocusMode::Fixed => "fixed",
            FocusMode::Infinity => "infinity",
        };
        f.write_str(name)
    }
}

/// Operations the preview configuration needs from a camera.
///
/// Read failures mean the camera parameters are unavailable; the
/// coordinator treats them as non-fatal when applying settings.
pub trait CameraControl: Send {
    /// Preview sizes the camera reports, in its native orientation.
    ///
    /// An empty list means the camera does not report sizes.
    fn supported_preview_sizes(&self) -> Result<Vec<Resolution>>;

    /// Current (or default) preview size
    fn current_preview_size(&self) -> Result<Option<Resolution>>;

    /// Request a preview size; the camera may silently pick another
    fn set_preview_size(&mut self, size: Resolution) -> Result<()>;

    /// Rotate the displayed preview clockwise by `degrees`
    fn set_display_rotation(&mut self, degrees: u32) -> Result<()>;

    /// Focus modes the camera accepts
    fn supported_focus_modes(&self) -> Result<Vec<FocusMode>>;

    /// Switch focus mode
    fn set_focus_mode(&mut self, mode: FocusMode) -> Result<()>;

    /// Start streaming preview frames
    fn start(&mut self) -> Result<()>;

    /// Stop streaming preview frames
    fn stop(&mut self) -> Result<()>;

    /// Read supported and current preview sizes together.
    ///
    /// An unreadable size list is reported as empty so selection falls back
    /// to the current size.
    fn capability_snapshot(&self) -> Result<CameraCapabilitySnapshot> {
        let supported = match self.supported_preview_sizes() {
            Ok(sizes) => sizes,
            Err(err) => {
                warn!("Supported preview sizes unavailable ({err}); using the current size");
                Vec::new()
            }
        };
        Ok(CameraCapabilitySnapshot {
            supported,
            current: self.current_preview_size()?,
        })
    }
}

impl<C: CameraControl + ?Sized> CameraControl for Box<C> {
    fn supported_preview_sizes(&self) -> Result<Vec<Resolution>> {
        (**self).supported_preview_sizes()
    }

    fn current_preview_size(&self) -> Result<Option<Resolution>> {
        (**self).current_preview_size()
    }

    fn set_preview_size(&mut self, size: Resolution) -> Result<()> {
        (**self).set_preview_size(size)
    }

    fn set_display_rotation(&mut self, degrees: u32) -> Result<()> {
        (**self).set_display_rotation(degrees)
    }

    fn supported_focus_modes(&self) -> Result<Vec<FocusMode>> {
        (**self).supported_focus_modes()
    }

    fn set_focus_mode(&mut self, mode: FocusMode) -> Result<()> {
        (**self).set_focus_mode(mode)
    }

    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }

    fn capability_snapshot(&self) -> Result<CameraCapabilitySnapshot> {
        (**self).capability_snapshot()
    }
}
