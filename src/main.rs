//! Scanview daemon entrypoint

#[cfg(not(feature = "camera"))]
compile_error!("scanviewd requires the `camera` feature");

use anyhow::Context;
use clap::Parser;
use scanview::camera::{self, V4l2Camera};
use scanview::detect::{DetectionScheduler, DetectorFactories, DetectorKind};
#[cfg(target_family = "unix")]
use scanview::events::unix::UnixBroadcast;
use scanview::events::{CameraEvent, EventSink, render_event};
use scanview::geometry::Resolution;
use scanview::session::{CameraSession, report_mount_failure};
use scanview::{CaptureRegistry, ScanviewConfig, logging, metrics};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "scanviewd",
    version,
    about = "Camera preview sizing and live barcode detection daemon"
)]
struct Cli {
    /// Optional configuration file (toml/yaml). Defaults to scanview.{toml,yaml} in cwd/XDG config.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override camera by name (takes precedence over config file)
    #[arg(long, value_name = "NAME")]
    device: Option<String>,

    /// Override camera by index (/dev/videoN)
    #[arg(long, value_name = "INDEX")]
    device_index: Option<usize>,

    /// Screen the preview is laid out on, in its current orientation (e.g. 1080x1920)
    #[arg(long, value_name = "WxH", value_parser = parse_screen)]
    screen: Option<Resolution>,

    /// Treat camera settings as advisory
    #[arg(long)]
    safe_mode: bool,

    /// Detector kinds to enable (comma-separated: barcode-decode, generic-barcode)
    #[arg(long, value_name = "KINDS", value_delimiter = ',')]
    enable: Vec<DetectorKind>,

    /// Stop after this many frames
    #[arg(long, value_name = "N")]
    frames: Option<u64>,

    /// Output events as JSON lines instead of human-readable text
    #[arg(long)]
    json: bool,

    /// Enable metrics output regardless of configuration file settings
    #[arg(long)]
    metrics: bool,

    /// Publish events over the specified Unix domain socket path
    #[arg(long, value_name = "PATH")]
    unix_socket: Option<PathBuf>,

    /// List detected cameras and exit
    #[arg(long)]
    list_cameras: bool,
}

fn parse_screen(value: &str) -> Result<Resolution, String> {
    Resolution::parse(value).ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{value}'"))
}

struct OutputSink {
    json: bool,
    #[cfg(target_family = "unix")]
    unix: Option<Arc<UnixBroadcast>>,
}

impl EventSink for OutputSink {
    fn emit(&self, event: CameraEvent) {
        if self.json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(err) => warn!("Failed to serialise event: {err}"),
            }
        } else {
            for line in render_event(&event) {
                println!("{line}");
            }
        }

        #[cfg(target_family = "unix")]
        if let Some(unix) = &self.unix {
            if let Err(err) = unix.send_event(&event) {
                warn!("Failed to publish event over Unix socket: {err}");
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.list_cameras {
        return list_cameras();
    }

    let mut config = ScanviewConfig::load(cli.config.as_deref())?;

    if let Some(ref name) = cli.device {
        config.camera.device_name = Some(name.clone());
        config.camera.device_index = None;
    }

    if let Some(index) = cli.device_index {
        config.camera.device_index = Some(index);
        config.camera.device_name = None;
    }

    if let Some(screen) = cli.screen {
        config.camera.screen_width = Some(screen.width);
        config.camera.screen_height = Some(screen.height);
    }

    if cli.safe_mode {
        config.camera.safe_mode = Some(true);
    }

    for kind in &cli.enable {
        config.detectors.set_enabled(*kind, true);
    }

    if cli.metrics {
        config.logging.metrics = true;
    }

    logging::init(&config.logging)?;

    #[cfg(target_family = "unix")]
    let unix = match cli.unix_socket.clone().or_else(|| config.events.unix_socket.clone()) {
        Some(path) => Some(UnixBroadcast::bind(&path).await?),
        None => None,
    };

    let sink: Arc<dyn EventSink> = Arc::new(OutputSink {
        json: cli.json,
        #[cfg(target_family = "unix")]
        unix,
    });

    let scheduler = DetectionScheduler::new(sink.clone())?;
    let registered = scheduler.register_from(&DetectorFactories::new(), &config.detectors);
    info!(?registered, "Detector adapters installed");
    scheduler
        .apply_settings(&config.detectors)
        .context("Failed to enable detectors")?;

    if config.logging.metrics {
        metrics::spawn_reporter(scheduler.clone(), config.logging.metrics_interval_secs);
    }

    let camera_config = config.camera_config()?;
    info!(?camera_config, "Starting scanview");

    let screen = camera_config.screen_profile();
    let safe_mode = camera_config.safe_mode;
    let tuning = camera_config.tuning;
    let camera = match V4l2Camera::open(camera_config) {
        Ok(camera) => camera,
        Err(err) => {
            report_mount_failure(sink.as_ref(), &err);
            return Err(err).context("Failed to open camera");
        }
    };
    let device_path = camera.info().path.clone();

    let captures = Arc::new(
        CaptureRegistry::new(&config.capture.directory, sink.clone())
            .with_shutter_sound(config.capture.play_sound),
    );
    let mut session = CameraSession::new(camera, scheduler, captures, sink, screen)
        .with_safe_mode(safe_mode)
        .with_tuning(tuning)
        .with_permissions(move || camera::device_accessible(&device_path));

    if !session.on_host_resume()? {
        anyhow::bail!("Camera could not be started");
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let stop = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            stop.store(true, Ordering::Release);
        }
    });

    let frame_limit = cli.frames;
    tokio::task::spawn_blocking(move || run_capture_loop(session, &shutdown, frame_limit))
        .await
        .context("Capture loop panicked")??;

    Ok(())
}

fn run_capture_loop(
    mut session: CameraSession<V4l2Camera>,
    shutdown: &AtomicBool,
    frame_limit: Option<u64>,
) -> anyhow::Result<()> {
    let mut captured: u64 = 0;
    let mut consecutive_failures: u32 = 0;

    while !shutdown.load(Ordering::Acquire) {
        if frame_limit.is_some_and(|limit| captured >= limit) {
            break;
        }

        match session.camera_mut().capture_frame() {
            Ok(frame) => {
                consecutive_failures = 0;
                captured += 1;
                let report = session.process_frame(Arc::new(frame));
                for kind in report.dropped() {
                    tracing::trace!(%kind, frame = captured, "Detector busy, frame dropped");
                }
            }
            Err(err) => {
                consecutive_failures += 1;
                warn!("Frame capture failed: {err}");
                if consecutive_failures >= 10 {
                    session.on_host_destroy()?;
                    return Err(err).context("Camera stopped delivering frames");
                }
                std::thread::sleep(Duration::from_millis(90));
            }
        }
    }

    session.on_host_destroy()?;
    info!(frames = captured, "Capture loop finished");
    Ok(())
}

fn list_cameras() -> anyhow::Result<()> {
    let devices = camera::list_devices()?;
    println!("Discovered cameras:");
    for dev in devices {
        println!("  [{}] {} ({}, {})", dev.index, dev.name, dev.path, dev.driver);
    }
    Ok(())
}
