//! Camera session lifecycle
//!
//! A [`CameraSession`] follows the host's lifecycle: it configures and starts
//! the camera on the first resume (or a resume after a pause), stops it on
//! pause and releases detectors on destroy. Frames handed to
//! [`CameraSession::process_frame`] are offered to every enabled detector.

use crate::camera::{AppliedConfig, CameraControl, ConfigurationCoordinator};
use crate::capture::{CaptureRegistry, CaptureTicket, PictureOptions, PictureOutcome, RecordOptions, VideoOutcome};
use crate::detect::{DetectionScheduler, DetectorSettings, Frame, SubmitReport};
use crate::error::{Error, Result};
use crate::events::{CameraEvent, EventSink};
use crate::geometry::{ScreenProfile, SelectionTuning};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Message emitted when the camera may not be used
pub const PERMISSION_DENIED_MESSAGE: &str =
    "Camera permissions not granted - component could not be rendered.";

/// Notify the host that the camera could not be mounted.
///
/// Used for failures that happen before a session exists, such as the device
/// node refusing to open. A permission error carries the same message as a
/// failed permission check.
pub fn report_mount_failure(sink: &dyn EventSink, err: &Error) {
    let message = match err {
        Error::PermissionDenied(detail) => {
            warn!("{PERMISSION_DENIED_MESSAGE} ({detail})");
            PERMISSION_DENIED_MESSAGE.to_string()
        }
        other => other.to_string(),
    };
    sink.emit(CameraEvent::MountError { message });
}

/// Answers whether the camera may be opened
pub trait PermissionCheck: Send + Sync {
    /// `true` when camera access is granted
    fn camera_permitted(&self) -> bool;
}

impl<F> PermissionCheck for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn camera_permitted(&self) -> bool {
        self()
    }
}

/// Grants camera access unconditionally
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysGranted;

impl PermissionCheck for AlwaysGranted {
    fn camera_permitted(&self) -> bool {
        true
    }
}

/// Where the session is in the host lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, never resumed
    New,
    /// Camera configured and streaming
    Running,
    /// Host paused; camera stopped
    Paused,
    /// Torn down; no further resumes
    Destroyed,
}

/// One camera bound to its detectors, captures and event sink
pub struct CameraSession<C: CameraControl> {
    camera: C,
    coordinator: ConfigurationCoordinator,
    scheduler: DetectionScheduler,
    captures: Arc<CaptureRegistry>,
    sink: Arc<dyn EventSink>,
    permissions: Box<dyn PermissionCheck>,
    screen: ScreenProfile,
    safe_mode: bool,
    state: SessionState,
}

impl<C: CameraControl> CameraSession<C> {
    /// Create a session; nothing touches the camera until the first resume
    pub fn new(
        camera: C,
        scheduler: DetectionScheduler,
        captures: Arc<CaptureRegistry>,
        sink: Arc<dyn EventSink>,
        screen: ScreenProfile,
    ) -> Self {
        Self {
            camera,
            coordinator: ConfigurationCoordinator::default(),
            scheduler,
            captures,
            sink,
            permissions: Box::new(AlwaysGranted),
            screen,
            safe_mode: false,
            state: SessionState::New,
        }
    }

    /// Use a custom permission check
    pub fn with_permissions(mut self, permissions: impl PermissionCheck + 'static) -> Self {
        self.permissions = Box::new(permissions);
        self
    }

    /// Treat camera settings as advisory
    pub fn with_safe_mode(mut self, safe_mode: bool) -> Self {
        self.safe_mode = safe_mode;
        self
    }

    /// Use custom preview selection thresholds
    pub fn with_tuning(mut self, tuning: SelectionTuning) -> Self {
        self.coordinator = ConfigurationCoordinator::new(tuning);
        self
    }

    /// Host became visible.
    ///
    /// Returns `Ok(true)` when the camera was (re)started, `Ok(false)` when
    /// nothing happened or permission was denied.
    pub fn on_host_resume(&mut self) -> Result<bool> {
        if !self.permissions.camera_permitted() {
            warn!("{PERMISSION_DENIED_MESSAGE}");
            self.sink.emit(CameraEvent::MountError {
                message: PERMISSION_DENIED_MESSAGE.to_string(),
            });
            return Ok(false);
        }

        match self.state {
            SessionState::New | SessionState::Paused => {}
            SessionState::Running => return Ok(false),
            SessionState::Destroyed => {
                return Err(Error::Camera("session was destroyed".to_string()));
            }
        }

        if let Err(err) = self.configure_and_start() {
            report_mount_failure(self.sink.as_ref(), &err);
            return Err(err);
        }

        self.state = SessionState::Running;
        Ok(true)
    }

    /// Host went to the background
    pub fn on_host_pause(&mut self) -> Result<()> {
        if self.captures.mark_interrupted() {
            info!("Recording interrupted by host pause");
        }

        if self.state == SessionState::Running {
            self.state = SessionState::Paused;
            self.camera.stop()?;
        }
        Ok(())
    }

    /// Host is going away; disables every detector and stops the camera
    pub fn on_host_destroy(&mut self) -> Result<()> {
        if self.state == SessionState::Destroyed {
            return Ok(());
        }

        self.scheduler.release_all();
        let was_running = self.state == SessionState::Running;
        self.state = SessionState::Destroyed;
        if was_running {
            self.camera.stop()?;
        }
        debug!("Camera session destroyed");
        Ok(())
    }

    fn configure_and_start(&mut self) -> Result<()> {
        let requested = self.coordinator.init_from_camera(&self.camera, self.screen)?;
        let applied = self.coordinator.apply(&mut self.camera, self.safe_mode)?;
        self.camera.start()?;

        let event = match applied {
            Some(applied) => ready_event(&applied),
            None => CameraEvent::CameraReady {
                requested: requested.selection.camera_resolution,
                preview_size: requested.selection.camera_resolution,
                screen_preview_size: requested.selection.screen_preview_size,
            },
        };
        self.sink.emit(event);
        Ok(())
    }

    /// Screen changed (e.g. rotation); takes effect on the next configuration.
    ///
    /// A running camera is stopped and reconfigured immediately.
    pub fn set_screen(&mut self, screen: ScreenProfile) -> Result<()> {
        self.screen = screen;
        if self.state == SessionState::Running {
            self.camera.stop()?;
            self.state = SessionState::Paused;
            self.on_host_resume()?;
        }
        Ok(())
    }

    /// Switch detector kinds on or off
    pub fn apply_detector_settings(&self, settings: &DetectorSettings) -> Result<()> {
        self.scheduler.apply_settings(settings)
    }

    /// Offer a frame to every enabled detector
    pub fn process_frame(&self, frame: Arc<Frame>) -> SubmitReport {
        self.scheduler.submit(frame)
    }

    /// Request a picture
    pub fn take_picture(&self, options: PictureOptions) -> Result<CaptureTicket<PictureOutcome>> {
        self.require_running()?;
        self.captures.take_picture(options)
    }

    /// Start a recording
    pub fn record(&self, options: RecordOptions) -> Result<CaptureTicket<VideoOutcome>> {
        self.require_running()?;
        self.captures.record(options)
    }

    fn require_running(&self) -> Result<()> {
        if self.state == SessionState::Running {
            Ok(())
        } else {
            Err(Error::CaptureFailed("camera is not running".to_string()))
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Screen the preview is laid out on
    pub fn screen(&self) -> ScreenProfile {
        self.screen
    }

    /// Preview configuration state
    pub fn coordinator(&self) -> &ConfigurationCoordinator {
        &self.coordinator
    }

    /// Detector scheduler
    pub fn scheduler(&self) -> &DetectionScheduler {
        &self.scheduler
    }

    /// Pending picture and video requests
    pub fn captures(&self) -> &Arc<CaptureRegistry> {
        &self.captures
    }

    /// The camera
    pub fn camera(&self) -> &C {
        &self.camera
    }

    /// Mutable access to the camera, e.g. to pull frames
    pub fn camera_mut(&mut self) -> &mut C {
        &mut self.camera
    }
}

fn ready_event(applied: &AppliedConfig) -> CameraEvent {
    CameraEvent::CameraReady {
        requested: applied.requested,
        preview_size: applied.preview_size,
        screen_preview_size: applied.screen_preview_size,
    }
}

impl<C: CameraControl> std::fmt::Debug for CameraSession<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraSession")
            .field("state", &self.state)
            .field("screen", &self.screen)
            .field("safe_mode", &self.safe_mode)
            .field("applied", &self.coordinator.applied())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::FocusMode;
    use crate::events::ChannelSink;
    use crate::geometry::Resolution;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct FakeCamera {
        preview: Option<Resolution>,
        streaming: bool,
        starts: usize,
        stops: usize,
    }

    impl CameraControl for FakeCamera {
        fn supported_preview_sizes(&self) -> Result<Vec<Resolution>> {
            Ok(vec![Resolution::new(1920, 1080), Resolution::new(640, 480)])
        }

        fn current_preview_size(&self) -> Result<Option<Resolution>> {
            Ok(self.preview)
        }

        fn set_preview_size(&mut self, size: Resolution) -> Result<()> {
            self.preview = Some(size);
            Ok(())
        }

        fn set_display_rotation(&mut self, _degrees: u32) -> Result<()> {
            Ok(())
        }

        fn supported_focus_modes(&self) -> Result<Vec<FocusMode>> {
            Ok(vec![FocusMode::Auto])
        }

        fn set_focus_mode(&mut self, _mode: FocusMode) -> Result<()> {
            Ok(())
        }

        fn start(&mut self) -> Result<()> {
            self.streaming = true;
            self.starts += 1;
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            self.streaming = false;
            self.stops += 1;
            Ok(())
        }
    }

    fn session(
        sink: ChannelSink,
        dir: &std::path::Path,
    ) -> CameraSession<FakeCamera> {
        let sink: Arc<dyn EventSink> = Arc::new(sink);
        let scheduler = DetectionScheduler::new(sink.clone()).unwrap();
        let captures = Arc::new(CaptureRegistry::new(dir, sink.clone()));
        CameraSession::new(
            FakeCamera::default(),
            scheduler,
            captures,
            sink,
            ScreenProfile::new(1920, 1080),
        )
    }

    #[tokio::test]
    async fn denied_permission_emits_mount_error() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, mut events) = ChannelSink::new();
        let mut session = session(sink, dir.path()).with_permissions(|| false);

        assert!(!session.on_host_resume().unwrap());
        assert_eq!(session.state(), SessionState::New);
        assert_eq!(session.camera().starts, 0);
        assert_eq!(
            events.recv().await,
            Some(CameraEvent::MountError {
                message: PERMISSION_DENIED_MESSAGE.to_string()
            })
        );
    }

    #[tokio::test]
    async fn unopenable_device_reports_permission_mount_error() {
        let (sink, mut events) = ChannelSink::new();
        let err = Error::PermissionDenied("Cannot open /dev/video0: EACCES".to_string());
        report_mount_failure(&sink, &err);
        assert_eq!(
            events.recv().await,
            Some(CameraEvent::MountError {
                message: PERMISSION_DENIED_MESSAGE.to_string()
            })
        );

        report_mount_failure(&sink, &Error::CameraNotFound("front".to_string()));
        match events.recv().await {
            Some(CameraEvent::MountError { message }) => assert!(message.contains("front")),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn resume_configures_and_starts_once() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, mut events) = ChannelSink::new();
        let mut session = session(sink, dir.path());

        assert!(session.on_host_resume().unwrap());
        assert!(!session.on_host_resume().unwrap());
        assert_eq!(session.camera().starts, 1);
        assert_eq!(session.coordinator().effective_preview_size(), Some(Resolution::new(1920, 1080)));

        match events.recv().await {
            Some(CameraEvent::CameraReady { requested, preview_size, .. }) => {
                assert_eq!(requested, Resolution::new(1920, 1080));
                assert_eq!(preview_size, requested);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn pause_then_resume_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, _events) = ChannelSink::new();
        let mut session = session(sink, dir.path());

        session.on_host_resume().unwrap();
        session.on_host_pause().unwrap();
        session.on_host_pause().unwrap();
        assert_eq!(session.camera().stops, 1);
        assert_eq!(session.state(), SessionState::Paused);

        assert!(session.on_host_resume().unwrap());
        assert_eq!(session.camera().starts, 2);
        assert!(session.camera().streaming);
    }

    #[tokio::test]
    async fn pause_interrupts_recording() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, _events) = ChannelSink::new();
        let mut session = session(sink, dir.path());
        session.on_host_resume().unwrap();

        let ticket = session.record(RecordOptions::default()).unwrap();
        session.on_host_pause().unwrap();

        let path = ticket.output_path.clone();
        session
            .captures()
            .resolve_video(Ok(VideoOutcome { path, interrupted: false }))
            .unwrap();
        assert!(ticket.wait().await.unwrap().interrupted);
    }

    #[tokio::test]
    async fn destroy_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, _events) = ChannelSink::new();
        let mut session = session(sink, dir.path());
        session.on_host_resume().unwrap();
        session.on_host_destroy().unwrap();
        session.on_host_destroy().unwrap();

        assert_eq!(session.camera().stops, 1);
        assert!(session.on_host_resume().is_err());
        assert!(session.take_picture(PictureOptions::default()).is_err());
    }

    #[tokio::test]
    async fn closure_permission_is_consulted_each_resume() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, _events) = ChannelSink::new();
        let granted = Arc::new(AtomicBool::new(false));
        let flag = granted.clone();
        let mut session =
            session(sink, dir.path()).with_permissions(move || flag.load(Ordering::SeqCst));

        assert!(!session.on_host_resume().unwrap());
        granted.store(true, Ordering::SeqCst);
        assert!(session.on_host_resume().unwrap());
    }
}
