//! Preview geometry selection
//!
//! Cameras report preview sizes in their native, unrotated frame no matter how
//! the device is held. Selection therefore produces two numbers from one
//! decision: the size to request from the camera, and the same size re-ordered
//! to the screen's current orientation for layout.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Smallest preview area considered usable (roughly 480x320).
pub const MIN_PREVIEW_AREA: u64 = 153_600;

/// Largest accepted difference between candidate and screen aspect ratios.
pub const MAX_ASPECT_DISTORTION: f64 = 0.15;

/// A pixel resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Resolution {
    /// Create a new resolution
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Pixel area
    pub fn area(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Width divided by height
    pub fn aspect_ratio(self) -> f64 {
        f64::from(self.width) / f64::from(self.height)
    }

    /// Portrait when strictly taller than wide
    pub fn orientation(self) -> Orientation {
        if self.width < self.height {
            Orientation::Portrait
        } else {
            Orientation::Landscape
        }
    }

    /// The same size with width and height swapped
    pub fn transposed(self) -> Self {
        Self::new(self.height, self.width)
    }

    /// Re-order the dimensions so the result has the requested orientation.
    ///
    /// Square sizes are returned unchanged.
    pub fn oriented(self, orientation: Orientation) -> Self {
        if self.orientation() == orientation || self.width == self.height {
            self
        } else {
            self.transposed()
        }
    }

    /// Parse a `WIDTHxHEIGHT` string such as `1920x1080`
    pub fn parse(value: &str) -> Option<Self> {
        let (w, h) = value.trim().split_once(['x', 'X'])?;
        let width = w.trim().parse::<u32>().ok()?;
        let height = h.trim().parse::<u32>().ok()?;
        (width > 0 && height > 0).then_some(Self::new(width, height))
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Portrait/landscape classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    /// Taller than wide
    Portrait,
    /// As wide as or wider than tall
    Landscape,
}

/// The display the preview is laid out on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenProfile {
    /// Screen size in its current orientation
    pub resolution: Resolution,
}

impl ScreenProfile {
    /// Create a profile for a screen of the given size
    pub const fn new(width: u32, height: u32) -> Self {
        Self {
            resolution: Resolution::new(width, height),
        }
    }

    /// Orientation derived from the screen dimensions
    pub fn orientation(&self) -> Orientation {
        self.resolution.orientation()
    }
}

impl From<Resolution> for ScreenProfile {
    fn from(resolution: Resolution) -> Self {
        Self { resolution }
    }
}

/// What a camera reports about its preview sizes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraCapabilitySnapshot {
    /// Supported preview sizes in the order the camera reports them
    pub supported: Vec<Resolution>,
    /// The camera's current or default preview size
    pub current: Option<Resolution>,
}

/// Thresholds applied while filtering candidates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionTuning {
    /// Candidates below this pixel area are never selected
    pub min_preview_area: u64,
    /// Candidates whose aspect ratio differs from the screen's by more than this are rejected
    pub max_aspect_distortion: f64,
}

impl Default for SelectionTuning {
    fn default() -> Self {
        Self {
            min_preview_area: MIN_PREVIEW_AREA,
            max_aspect_distortion: MAX_ASPECT_DISTORTION,
        }
    }
}

/// Output of preview selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedPreviewConfig {
    /// Size to request from the camera, in the camera's native frame
    pub camera_resolution: Resolution,
    /// The same size re-ordered to the screen's orientation, for layout
    pub screen_preview_size: Resolution,
}

/// Pick the candidate preview size that best fits the screen.
///
/// Candidates are visited in slice order, so ties on area go to the earlier
/// entry. `current` is the fallback when nothing qualifies.
pub fn find_best_preview_size(
    candidates: &[Resolution],
    current: Option<Resolution>,
    screen: Resolution,
    tuning: &SelectionTuning,
) -> Result<Resolution> {
    if candidates.is_empty() {
        tracing::warn!("Device returned no supported preview sizes; using default");
        return current.ok_or(Error::NoPreviewSizeAvailable);
    }

    let screen_orientation = screen.orientation();
    let screen_aspect = screen.aspect_ratio();
    let mut best: Option<Resolution> = None;

    for &candidate in candidates {
        if candidate.width == 0 || candidate.height == 0 {
            continue;
        }
        if candidate.area() < tuning.min_preview_area {
            continue;
        }

        let normalized = candidate.oriented(screen_orientation);
        let distortion = (normalized.aspect_ratio() - screen_aspect).abs();
        if distortion > tuning.max_aspect_distortion {
            continue;
        }

        if normalized == screen {
            tracing::info!(size = %candidate, "Found preview size exactly matching screen size");
            return Ok(candidate);
        }

        if best.is_none_or(|b| candidate.area() > b.area()) {
            best = Some(candidate);
        }
    }

    match best {
        Some(size) => {
            tracing::info!(size = %size, "Using largest suitable preview size");
            Ok(size)
        }
        None => {
            let fallback = current.ok_or(Error::NoPreviewSizeAvailable)?;
            tracing::info!(size = %fallback, "No suitable preview sizes, using default");
            Ok(fallback)
        }
    }
}

/// Re-pair a selected camera size with the screen's orientation.
pub fn derive_screen_oriented_size(best: Resolution, screen: Resolution) -> Resolution {
    if best.orientation() == screen.orientation() {
        best
    } else {
        best.transposed()
    }
}

/// Run the full selection against a capability snapshot.
pub fn select_preview(
    snapshot: &CameraCapabilitySnapshot,
    screen: &ScreenProfile,
    tuning: &SelectionTuning,
) -> Result<SelectedPreviewConfig> {
    let camera_resolution = find_best_preview_size(
        &snapshot.supported,
        snapshot.current,
        screen.resolution,
        tuning,
    )?;
    let screen_preview_size = derive_screen_oriented_size(camera_resolution, screen.resolution);

    Ok(SelectedPreviewConfig {
        camera_resolution,
        screen_preview_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(width: u32, height: u32) -> Resolution {
        Resolution::new(width, height)
    }

    fn pick(candidates: &[Resolution], current: Option<Resolution>, screen: Resolution) -> Result<Resolution> {
        find_best_preview_size(candidates, current, screen, &SelectionTuning::default())
    }

    #[test]
    fn exact_match_wins_over_larger_candidates() {
        let screen = r(1080, 1920);
        let best = pick(&[r(1920, 1080), r(1280, 720)], None, screen).unwrap();
        assert_eq!(best, r(1920, 1080));

        // A larger in-bound candidate listed after the exact match is never reached.
        let best = pick(&[r(1920, 1080), r(2560, 1440)], None, screen).unwrap();
        assert_eq!(best, r(1920, 1080));
    }

    #[test]
    fn exact_match_returns_original_orientation() {
        let screen = r(1920, 1080);
        let best = pick(&[r(1080, 1920)], None, screen).unwrap();
        assert_eq!(best, r(1080, 1920));
    }

    #[test]
    fn picks_largest_within_distortion_bound() {
        let screen = r(1080, 1920);
        let candidates = [r(640, 480), r(1280, 960), r(1920, 1088)];
        assert_eq!(pick(&candidates, None, screen).unwrap(), r(1920, 1088));

        let screen = r(1920, 1080);
        let candidates = [r(1280, 720), r(800, 600), r(2560, 1440), r(1600, 900)];
        assert_eq!(pick(&candidates, None, screen).unwrap(), r(2560, 1440));
    }

    #[test]
    fn equal_area_ties_keep_first_candidate() {
        let screen = r(1920, 1080);
        let candidates = [r(1280, 720), r(720, 1280)];
        assert_eq!(pick(&candidates, None, screen).unwrap(), r(1280, 720));

        let candidates = [r(720, 1280), r(1280, 720)];
        assert_eq!(pick(&candidates, None, screen).unwrap(), r(720, 1280));
    }

    #[test]
    fn small_candidates_are_never_selected() {
        let screen = r(320, 240);
        let current = Some(r(640, 480));
        // 320x240 matches the screen exactly but is below the area floor.
        assert_eq!(pick(&[r(320, 240)], current, screen).unwrap(), r(640, 480));
        assert!(matches!(
            pick(&[r(320, 240)], None, screen),
            Err(Error::NoPreviewSizeAvailable)
        ));
    }

    #[test]
    fn area_floor_is_inclusive() {
        let screen = r(480, 320);
        assert_eq!(pick(&[r(480, 320)], None, screen).unwrap(), r(480, 320));
    }

    #[test]
    fn empty_candidates_fall_back_to_current() {
        assert_eq!(pick(&[], Some(r(640, 480)), r(1080, 1920)).unwrap(), r(640, 480));
        assert!(matches!(
            pick(&[], None, r(1080, 1920)),
            Err(Error::NoPreviewSizeAvailable)
        ));
    }

    #[test]
    fn no_candidate_within_bound_falls_back_to_current() {
        let screen = r(1920, 1080);
        let candidates = [r(640, 480), r(1280, 960)];
        assert_eq!(pick(&candidates, Some(r(640, 480)), screen).unwrap(), r(640, 480));
    }

    #[test]
    fn tuning_overrides_thresholds() {
        let screen = r(1920, 1080);
        let tuning = SelectionTuning {
            min_preview_area: 0,
            max_aspect_distortion: 0.5,
        };
        let best = find_best_preview_size(&[r(320, 240), r(1280, 960)], None, screen, &tuning).unwrap();
        assert_eq!(best, r(1280, 960));
    }

    #[test]
    fn screen_oriented_size_swaps_only_on_mismatch() {
        let best = r(1920, 1080);
        assert_eq!(derive_screen_oriented_size(best, r(1920, 1080)), r(1920, 1080));
        assert_eq!(derive_screen_oriented_size(best, r(1080, 1920)), r(1080, 1920));

        let portrait = r(1080, 1920);
        assert_eq!(derive_screen_oriented_size(portrait, r(1080, 1920)), r(1080, 1920));
        assert_eq!(derive_screen_oriented_size(portrait, r(1920, 1080)), r(1920, 1080));
    }

    #[test]
    fn select_preview_pairs_camera_and_screen_sizes() {
        let snapshot = CameraCapabilitySnapshot {
            supported: vec![r(1280, 720), r(1920, 1080)],
            current: Some(r(640, 480)),
        };
        let selected = select_preview(&snapshot, &ScreenProfile::new(1080, 1920), &SelectionTuning::default()).unwrap();
        assert_eq!(selected.camera_resolution, r(1920, 1080));
        assert_eq!(selected.screen_preview_size, r(1080, 1920));
        assert_eq!(selected.screen_preview_size.transposed(), selected.camera_resolution);
    }

    #[test]
    fn parse_resolution_strings() {
        assert_eq!(Resolution::parse("1920x1080"), Some(r(1920, 1080)));
        assert_eq!(Resolution::parse(" 640 X 480 "), Some(r(640, 480)));
        assert_eq!(Resolution::parse("0x480"), None);
        assert_eq!(Resolution::parse("wide"), None);
    }
}
