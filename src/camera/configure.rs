//! Applies the selected preview geometry to a camera

use super::{CameraControl, FocusMode};
use crate::error::{Error, Result};
use crate::geometry::{
    self, Resolution, ScreenProfile, SelectedPreviewConfig, SelectionTuning,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Preview rotation requested on every configured camera
pub const DISPLAY_ROTATION_DEGREES: u32 = 90;

const PREFERRED_FOCUS: &[FocusMode] = &[FocusMode::Auto];
const FALLBACK_FOCUS: &[FocusMode] = &[FocusMode::Macro, FocusMode::ExtendedDepthOfField];

/// What was decided before touching the camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedConfig {
    /// Screen the selection was made for
    pub screen: ScreenProfile,
    /// Selected sizes
    pub selection: SelectedPreviewConfig,
}

/// What the camera reports after configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedConfig {
    /// Preview size that was requested
    pub requested: Resolution,
    /// Preview size the camera reports after the request
    pub preview_size: Resolution,
    /// `preview_size` re-ordered to the screen's orientation
    pub screen_preview_size: Resolution,
    /// Focus mode that was set, if any was supported
    pub focus_mode: Option<FocusMode>,
    /// Display rotation that was requested
    pub display_rotation: u32,
    /// Whether settings were applied in safe mode
    pub safe_mode: bool,
}

impl AppliedConfig {
    /// Whether the camera honoured the requested preview size
    pub fn matches_request(&self) -> bool {
        self.requested == self.preview_size
    }
}

/// Owns the preview selection for one camera and applies it.
#[derive(Debug, Clone, Default)]
pub struct ConfigurationCoordinator {
    tuning: SelectionTuning,
    requested: Option<RequestedConfig>,
    applied: Option<AppliedConfig>,
}

impl ConfigurationCoordinator {
    /// Create a coordinator using the given selection thresholds
    pub fn new(tuning: SelectionTuning) -> Self {
        Self {
            tuning,
            requested: None,
            applied: None,
        }
    }

    /// Read the camera's capabilities once and select preview sizes for `screen`.
    ///
    /// Fails with [`Error::NoPreviewSizeAvailable`] when the camera reports
    /// neither supported sizes nor a current size.
    pub fn init_from_camera<C>(&mut self, camera: &C, screen: ScreenProfile) -> Result<RequestedConfig>
    where
        C: CameraControl + ?Sized,
    {
        info!(screen = %screen.resolution, "Screen resolution in current orientation");

        let snapshot = camera.capability_snapshot()?;
        let selection = geometry::select_preview(&snapshot, &screen, &self.tuning)?;
        info!(
            camera = %selection.camera_resolution,
            on_screen = %selection.screen_preview_size,
            "Selected preview size"
        );

        let requested = RequestedConfig { screen, selection };
        self.requested = Some(requested);
        self.applied = None;
        Ok(requested)
    }

    /// Apply the selection to the camera and read back what it chose.
    ///
    /// Returns `Ok(None)` without touching the camera when its parameters
    /// cannot be read. In safe mode only auto-focus is considered and the
    /// remaining settings are advisory.
    pub fn apply<C>(&mut self, camera: &mut C, safe_mode: bool) -> Result<Option<AppliedConfig>>
    where
        C: CameraControl + ?Sized,
    {
        let requested = self.requested.ok_or_else(|| {
            Error::Camera("preview configuration applied before reading camera parameters".to_string())
        })?;

        let focus_modes = match camera.supported_focus_modes() {
            Ok(modes) => modes,
            Err(err) => {
                warn!("Device error: no camera parameters are available ({err}). Proceeding without configuration.");
                return Ok(None);
            }
        };

        if safe_mode {
            warn!("In camera config safe mode -- most settings will not be honored");
        }

        let mut focus_mode = find_settable(&focus_modes, PREFERRED_FOCUS);
        if focus_mode.is_none() && !safe_mode {
            focus_mode = find_settable(&focus_modes, FALLBACK_FOCUS);
        }
        if let Some(mode) = focus_mode {
            camera.set_focus_mode(mode)?;
        }

        let target = requested.selection.camera_resolution;
        camera.set_preview_size(target)?;
        camera.set_display_rotation(DISPLAY_ROTATION_DEGREES)?;

        let preview_size = match camera.current_preview_size() {
            Ok(Some(achieved)) if achieved != target => {
                warn!(
                    "Camera said it supported preview size {target}, but after setting it, preview size is {achieved}"
                );
                achieved
            }
            Ok(_) => target,
            Err(err) => {
                warn!("Could not read back preview size ({err}); assuming {target}");
                target
            }
        };

        let applied = AppliedConfig {
            requested: target,
            preview_size,
            screen_preview_size: geometry::derive_screen_oriented_size(
                preview_size,
                requested.screen.resolution,
            ),
            focus_mode,
            display_rotation: DISPLAY_ROTATION_DEGREES,
            safe_mode,
        };
        self.applied = Some(applied);
        Ok(Some(applied))
    }

    /// Thresholds used for selection
    pub fn tuning(&self) -> &SelectionTuning {
        &self.tuning
    }

    /// Selection made by the last `init_from_camera`
    pub fn requested(&self) -> Option<&RequestedConfig> {
        self.requested.as_ref()
    }

    /// Result of the last successful `apply`
    pub fn applied(&self) -> Option<&AppliedConfig> {
        self.applied.as_ref()
    }

    /// Size requested from the camera
    pub fn camera_resolution(&self) -> Option<Resolution> {
        self.requested.map(|r| r.selection.camera_resolution)
    }

    /// Screen the selection was made for
    pub fn screen_resolution(&self) -> Option<Resolution> {
        self.requested.map(|r| r.screen.resolution)
    }

    /// Preview size downstream consumers should use: what the camera
    /// reported after configuration, else what was requested.
    pub fn effective_preview_size(&self) -> Option<Resolution> {
        self.applied
            .map(|a| a.preview_size)
            .or_else(|| self.camera_resolution())
    }
}

fn find_settable(supported: &[FocusMode], desired: &[FocusMode]) -> Option<FocusMode> {
    let found = desired.iter().copied().find(|mode| supported.contains(mode));
    if found.is_none() {
        info!(?desired, "No supported values match");
    }
    found
}
