//! Scanview runtime configuration handling

use crate::camera::{CameraConfig, PixelFormat};
use crate::detect::{DetectorKind, DetectorSettings};
use crate::error::{Error, Result};
use crate::geometry::Resolution;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Top-level configuration structure persisted to disk or environment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanviewConfig {
    /// Camera and preview selection overrides
    pub camera: CameraOptions,
    /// Detector toggles and adapter options
    pub detectors: DetectorSettings,
    /// Picture and video output
    pub capture: CaptureOptions,
    /// Logging configuration
    pub logging: LoggingOptions,
    /// Event streaming outputs
    pub events: EventOptions,
}

impl ScanviewConfig {
    /// Load configuration from an explicit path or fall back to discovered defaults.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = explicit_path {
            Self::from_file(path)?
        } else if let Some(path) = Self::discover_file()? {
            tracing::info!("Using configuration file: {}", path.display());
            Self::from_file(&path)?
        } else {
            tracing::debug!("No scanview.toml / scanview.yaml found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Attempt to locate a configuration file in common locations.
    fn discover_file() -> Result<Option<PathBuf>> {
        let cwd =
            env::current_dir().map_err(|e| Error::Config(format!("Failed to read cwd: {e}")))?;
        for candidate in ["scanview.toml", "scanview.yaml", "scanview.yml"] {
            let path = cwd.join(candidate);
            if path.exists() {
                return Ok(Some(path));
            }
        }

        if let Some(xdg_config) = env::var_os("XDG_CONFIG_HOME") {
            let base = PathBuf::from(xdg_config).join("scanview");
            for candidate in ["config.toml", "config.yaml"] {
                let path = base.join(candidate);
                if path.exists() {
                    return Ok(Some(path));
                }
            }
        }

        Ok(None)
    }

    /// Read configuration from a concrete file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {e}", path.display())))?;

        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("")
            .to_ascii_lowercase()
            .as_str()
        {
            "toml" => toml::from_str(&contents).map_err(|e| {
                Error::Config(format!("Failed to parse TOML {}: {e}", path.display()))
            }),
            "yaml" | "yml" => serde_yaml::from_str(&contents).map_err(|e| {
                Error::Config(format!("Failed to parse YAML {}: {e}", path.display()))
            }),
            other => Err(Error::Config(format!(
                "Unsupported config format '{}', expected toml/yaml",
                other
            ))),
        }
    }

    /// Apply environment variable overrides after file/default loading.
    fn apply_env_overrides(&mut self) {
        self.camera.apply_env_overrides();
        apply_detector_env_overrides(&mut self.detectors);
        self.capture.apply_env_overrides();
        self.logging.apply_env_overrides();
        self.events.apply_env_overrides();
    }

    /// Produce a fully resolved camera configuration ready to open the device.
    pub fn camera_config(&self) -> Result<CameraConfig> {
        self.camera.to_camera_config()
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name).ok().and_then(|v| parse_flag(&v))
}

/// User-friendly camera overrides that are merged on top of `CameraConfig::default()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraOptions {
    /// Override for the numeric camera index (e.g. `/dev/video2`).
    pub device_index: Option<usize>,
    /// Override for the camera name substring match.
    pub device_name: Option<String>,
    /// Screen width the preview is laid out on.
    pub screen_width: Option<u32>,
    /// Screen height the preview is laid out on.
    pub screen_height: Option<u32>,
    /// Treat camera settings as advisory.
    pub safe_mode: Option<bool>,
    /// Smallest acceptable preview area in pixels.
    pub min_preview_area: Option<u64>,
    /// Largest acceptable aspect-ratio distortion.
    pub max_aspect_distortion: Option<f64>,
    /// Override for pixel format string (mjpeg/yuyv/rgb24).
    pub format: Option<String>,
    /// Override for number of V4L2 buffers to allocate.
    pub buffer_count: Option<u32>,
}

impl CameraOptions {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(name) = env::var("SCANVIEW_CAMERA_DEVICE") {
            self.device_name = Some(name);
            self.device_index = None;
        }
        if let Ok(index) = env::var("SCANVIEW_CAMERA_INDEX") {
            if let Ok(parsed) = index.parse::<usize>() {
                self.device_index = Some(parsed);
                self.device_name = None;
            }
        }
        if let Ok(screen) = env::var("SCANVIEW_SCREEN") {
            if let Some(res) = Resolution::parse(&screen) {
                self.screen_width = Some(res.width);
                self.screen_height = Some(res.height);
            }
        }
        if let Some(safe) = env_flag("SCANVIEW_SAFE_MODE") {
            self.safe_mode = Some(safe);
        }
        if let Ok(format) = env::var("SCANVIEW_CAMERA_FORMAT") {
            self.format = Some(format);
        }
        if let Ok(buffers) = env::var("SCANVIEW_CAMERA_BUFFERS") {
            self.buffer_count = buffers.parse::<u32>().ok();
        }
    }

    /// Merge overrides onto the default camera configuration.
    pub fn to_camera_config(&self) -> Result<CameraConfig> {
        let mut config = CameraConfig::default();

        if let Some(name) = &self.device_name {
            config.device_name = Some(name.clone());
            config.device_index = None;
        }

        if let Some(index) = self.device_index {
            config.device_index = Some(index);
            if self.device_name.is_none() {
                config.device_name = None;
            }
        }

        if let Some(width) = self.screen_width {
            config.screen.width = width;
        }
        if let Some(height) = self.screen_height {
            config.screen.height = height;
        }
        if config.screen.width == 0 || config.screen.height == 0 {
            return Err(Error::Config(format!(
                "Screen size {} must be non-zero",
                config.screen
            )));
        }

        if let Some(safe) = self.safe_mode {
            config.safe_mode = safe;
        }

        if let Some(area) = self.min_preview_area {
            config.tuning.min_preview_area = area;
        }
        if let Some(distortion) = self.max_aspect_distortion {
            if !(distortion.is_finite() && distortion >= 0.0) {
                return Err(Error::Config(format!(
                    "Aspect distortion bound must be a non-negative number, got {distortion}"
                )));
            }
            config.tuning.max_aspect_distortion = distortion;
        }

        if let Some(format) = &self.format {
            config.format = PixelFormat::parse(format).ok_or_else(|| {
                Error::Config(format!(
                    "Unknown pixel format '{}'. Use mjpeg, yuyv, or rgb24",
                    format
                ))
            })?;
        }

        if let Some(buffers) = self.buffer_count {
            config.buffer_count = buffers.max(2);
        }

        Ok(config)
    }
}

fn apply_detector_env_overrides(settings: &mut DetectorSettings) {
    if let Ok(kinds) = env::var("SCANVIEW_DETECTORS") {
        let requested: Vec<DetectorKind> = kinds
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .filter_map(|s| match s.parse::<DetectorKind>() {
                Ok(kind) => Some(kind),
                Err(e) => {
                    tracing::warn!("Ignoring SCANVIEW_DETECTORS entry: {e}");
                    None
                }
            })
            .collect();
        for kind in DetectorKind::ALL {
            settings.set_enabled(kind, requested.contains(&kind));
        }
    }
    if let Ok(types) = env::var("SCANVIEW_BARCODE_TYPES") {
        settings.barcode_types = types
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
}

/// Picture and video output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureOptions {
    /// Directory generated capture paths are placed in
    pub directory: PathBuf,
    /// Play the shutter sound when taking pictures
    pub play_sound: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            directory: env::temp_dir().join("scanview"),
            play_sound: true,
        }
    }
}

impl CaptureOptions {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(dir) = env::var("SCANVIEW_CAPTURE_DIR") {
            if !dir.trim().is_empty() {
                self.directory = PathBuf::from(dir);
            }
        }
        if let Some(sound) = env_flag("SCANVIEW_PLAY_SOUND") {
            self.play_sound = sound;
        }
    }
}

/// Structured logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingOptions {
    /// Default log level (overridable via `SCANVIEW_LOG_LEVEL`)
    pub level: String,
    /// Optional log file path for teeing structured logs
    pub file: Option<PathBuf>,
    /// Force ANSI colors in stdout logging
    pub color: bool,
    /// Enable periodic detector metrics summaries over tracing
    pub metrics: bool,
    /// Interval in seconds for emitting aggregated metrics when enabled
    pub metrics_interval_secs: u64,
    /// Optional log rotation strategy applied to `file`
    pub rotation: Option<LogRotation>,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            color: true,
            metrics: false,
            metrics_interval_secs: 60,
            rotation: None,
        }
    }
}

impl LoggingOptions {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(level) = env::var("SCANVIEW_LOG_LEVEL") {
            self.level = level;
        }
        if let Ok(file) = env::var("SCANVIEW_LOG_FILE") {
            self.file = Some(PathBuf::from(file));
        }
        if let Some(color) = env_flag("SCANVIEW_LOG_COLOR") {
            self.color = color;
        }
        if let Some(metrics) = env_flag("SCANVIEW_LOG_METRICS") {
            self.metrics = metrics;
        }
        if let Ok(interval) = env::var("SCANVIEW_LOG_METRICS_INTERVAL") {
            if let Ok(value) = interval.parse::<u64>() {
                self.metrics_interval_secs = value.max(crate::metrics::MIN_REPORT_INTERVAL_SECS);
            }
        }
        if let Ok(rotation) = env::var("SCANVIEW_LOG_ROTATION") {
            if let Ok(parsed) = rotation.parse::<LogRotation>() {
                self.rotation = Some(parsed);
            }
        }
    }
}

/// Supported log rotation policies for file sinks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    /// Rotate log files once per hour
    Hourly,
    /// Rotate log files once per day
    Daily,
}

impl FromStr for LogRotation {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            other => Err(format!(
                "Unsupported log rotation '{other}', expected 'hourly' or 'daily'"
            )),
        }
    }
}

/// Event streaming configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EventOptions {
    /// Optional Unix domain socket path for streaming events as JSON lines
    pub unix_socket: Option<PathBuf>,
}

impl EventOptions {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(socket) = env::var("SCANVIEW_UNIX_SOCKET") {
            if socket.trim().is_empty() {
                self.unix_socket = None;
            } else {
                self.unix_socket = Some(PathBuf::from(socket));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_resolve_to_camera_defaults() {
        let config = ScanviewConfig::default();
        let camera = config.camera_config().unwrap();
        assert_eq!(camera.screen, Resolution::new(1920, 1080));
        assert_eq!(camera.tuning, crate::geometry::SelectionTuning::default());
        assert!(config.detectors.enabled_kinds().is_empty());
    }

    #[test]
    fn parses_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[camera]
device_index = 2
screen_width = 1080
screen_height = 1920
min_preview_area = 300000
format = "yuyv"

[detectors]
scan_barcodes = true
detect_faces = true

[logging]
level = "debug"
rotation = "daily"

[events]
unix_socket = "/tmp/scanview.sock"
"#
        )
        .unwrap();

        let config = ScanviewConfig::from_file(file.path()).unwrap();
        let camera = config.camera_config().unwrap();
        assert_eq!(camera.device_index, Some(2));
        assert_eq!(camera.screen, Resolution::new(1080, 1920));
        assert_eq!(camera.tuning.min_preview_area, 300_000);
        assert_eq!(camera.format, PixelFormat::Yuyv);
        assert!(config.detectors.detect_faces);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.rotation, Some(LogRotation::Daily));
        assert_eq!(
            config.events.unix_socket.as_deref(),
            Some(Path::new("/tmp/scanview.sock"))
        );
    }

    #[test]
    fn parses_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            file,
            "capture:\n  directory: /var/tmp/shots\n  play_sound: false\ncamera:\n  safe_mode: true\n"
        )
        .unwrap();

        let config = ScanviewConfig::from_file(file.path()).unwrap();
        assert_eq!(config.capture.directory, PathBuf::from("/var/tmp/shots"));
        assert!(!config.capture.play_sound);
        assert!(config.camera_config().unwrap().safe_mode);
    }

    #[test]
    fn rejects_unknown_extension() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(matches!(
            ScanviewConfig::from_file(file.path()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn rejects_bad_pixel_format() {
        let options = CameraOptions {
            format: Some("h264".to_string()),
            ..Default::default()
        };
        assert!(options.to_camera_config().is_err());
    }

    #[test]
    fn rejects_negative_distortion() {
        let options = CameraOptions {
            max_aspect_distortion: Some(-0.1),
            ..Default::default()
        };
        assert!(options.to_camera_config().is_err());
    }

    #[test]
    fn flag_parsing() {
        assert_eq!(parse_flag("ON"), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
