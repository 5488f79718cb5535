//! Gated dispatch of frames to detector adapters

use super::{
    Detection, Detector, DetectorError, DetectorFactories, DetectorGate, DetectorKind, DetectorSettings, Frame,
    GateGuard,
};
use crate::error::{Error, Result};
use crate::events::{CameraEvent, EventSink};
use crate::metrics::{KindCounters, SchedulerStats};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;

type SharedDetector = Arc<Mutex<Box<dyn Detector>>>;

/// What happened to a frame offered to one kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The gate was free; a task is now running
    Dispatched,
    /// A task of this kind is still running; the frame was discarded
    Dropped,
    /// The kind is disabled or has no adapter
    Disabled,
}

/// Per-kind outcomes of offering one frame to every enabled kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitReport {
    /// Outcome for each enabled kind, in gate-table order
    pub outcomes: Vec<(DetectorKind, SubmitOutcome)>,
}

impl SubmitReport {
    /// Kinds that started a task for this frame
    pub fn dispatched(&self) -> impl Iterator<Item = DetectorKind> + '_ {
        self.kinds_with(SubmitOutcome::Dispatched)
    }

    /// Kinds that dropped this frame because they were busy
    pub fn dropped(&self) -> impl Iterator<Item = DetectorKind> + '_ {
        self.kinds_with(SubmitOutcome::Dropped)
    }

    fn kinds_with(&self, wanted: SubmitOutcome) -> impl Iterator<Item = DetectorKind> + '_ {
        self.outcomes
            .iter()
            .filter(move |(_, outcome)| *outcome == wanted)
            .map(|(kind, _)| *kind)
    }
}

/// Result of one finished detector task
#[derive(Debug, Clone)]
pub struct Completion {
    /// Kind that ran
    pub kind: DetectorKind,
    /// Sequence number of the analysed frame
    pub frame_sequence: u64,
    /// Time spent inside the adapter
    pub elapsed: Duration,
    /// Detections, or the adapter's error
    pub outcome: std::result::Result<Vec<Detection>, DetectorError>,
}

impl Completion {
    fn into_event(self) -> CameraEvent {
        match self.outcome {
            Ok(detections) => CameraEvent::Detections {
                kind: self.kind,
                frame: self.frame_sequence,
                detections,
            },
            Err(err) => CameraEvent::DetectionError {
                kind: self.kind,
                frame: self.frame_sequence,
                message: err.to_string(),
            },
        }
    }
}

struct KindSlot {
    kind: DetectorKind,
    gate: Arc<DetectorGate>,
    enabled: AtomicBool,
    detector: Mutex<Option<SharedDetector>>,
    counters: KindCounters,
}

impl KindSlot {
    fn new(kind: DetectorKind) -> Self {
        Self {
            kind,
            gate: Arc::new(DetectorGate::new()),
            enabled: AtomicBool::new(false),
            detector: Mutex::new(None),
            counters: KindCounters::default(),
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

struct SchedulerInner {
    slots: [KindSlot; 4],
    sink: Arc<dyn EventSink>,
    runtime: Handle,
}

impl SchedulerInner {
    fn slot(&self, kind: DetectorKind) -> &KindSlot {
        &self.slots[kind.index()]
    }

    /// Single completion path for every kind: reset, report, then release.
    fn complete(&self, completion: Completion, detector: &SharedDetector, guard: GateGuard) {
        let slot = self.slot(completion.kind);

        if completion.kind.resets_on_completion() {
            lock(detector).reset();
        }

        match &completion.outcome {
            Ok(detections) => {
                slot.counters.record_completed(completion.elapsed);
                tracing::trace!(
                    kind = %completion.kind,
                    frame = completion.frame_sequence,
                    count = detections.len(),
                    elapsed_ms = completion.elapsed.as_millis() as u64,
                    "Detector task completed"
                );
            }
            Err(err) => {
                slot.counters.record_failed(completion.elapsed);
                tracing::debug!(
                    kind = %completion.kind,
                    frame = completion.frame_sequence,
                    error = %err,
                    "Detector task failed"
                );
            }
        }

        if slot.is_enabled() {
            self.sink.emit(completion.into_event());
        } else {
            slot.counters.record_suppressed();
            tracing::debug!(
                kind = %completion.kind,
                frame = completion.frame_sequence,
                "Kind disabled while task was in flight; discarding result"
            );
        }

        drop(guard);
    }
}

/// Offers camera frames to the enabled detector kinds.
///
/// Every kind owns a [`DetectorGate`]. A frame starts a task for a kind only
/// when that kind's gate is free; otherwise the frame is dropped for that kind.
/// Tasks run on Tokio's blocking pool so the frame producer never waits on a
/// detector. Gates belong to the scheduler instance, so two camera sessions
/// never see each other's state.
#[derive(Clone)]
pub struct DetectionScheduler {
    inner: Arc<SchedulerInner>,
}

impl DetectionScheduler {
    /// Create a scheduler on the current Tokio runtime
    pub fn new(sink: Arc<dyn EventSink>) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Other(format!("Detection scheduler needs a Tokio runtime: {e}")))?;
        Ok(Self::with_runtime(runtime, sink))
    }

    /// Create a scheduler that spawns detector tasks on `runtime`
    pub fn with_runtime(runtime: Handle, sink: Arc<dyn EventSink>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                slots: DetectorKind::ALL.map(KindSlot::new),
                sink,
                runtime,
            }),
        }
    }

    /// Install the adapter for a kind, replacing any previous one.
    ///
    /// A task already running keeps using the adapter it started with.
    pub fn register<D>(&self, kind: DetectorKind, detector: D)
    where
        D: Detector + 'static,
    {
        self.register_boxed(kind, Box::new(detector));
    }

    /// Install an already boxed adapter for a kind
    pub fn register_boxed(&self, kind: DetectorKind, detector: Box<dyn Detector>) {
        let shared: SharedDetector = Arc::new(Mutex::new(detector));
        *lock(&self.inner.slot(kind).detector) = Some(shared);
        tracing::debug!(kind = %kind, "Registered detector");
    }

    /// Build and install an adapter for every kind `factories` supports.
    ///
    /// Returns the kinds that received an adapter.
    pub fn register_from(&self, factories: &DetectorFactories, settings: &DetectorSettings) -> Vec<DetectorKind> {
        DetectorKind::ALL
            .into_iter()
            .filter_map(|kind| {
                let detector = factories.build(kind, settings)?;
                self.register_boxed(kind, detector);
                Some(kind)
            })
            .collect()
    }

    /// Whether an adapter is installed for the kind
    pub fn has_detector(&self, kind: DetectorKind) -> bool {
        lock(&self.inner.slot(kind).detector).is_some()
    }

    /// Enable or disable one kind without touching the others.
    ///
    /// Disabling never interrupts a running task; its result is discarded
    /// when it completes.
    pub fn set_enabled(&self, kind: DetectorKind, enabled: bool) -> Result<()> {
        if enabled && !self.has_detector(kind) {
            return Err(Error::Config(format!(
                "Cannot enable {kind}: no detector registered"
            )));
        }

        let slot = self.inner.slot(kind);
        let previous = slot.enabled.swap(enabled, Ordering::AcqRel);
        if previous != enabled {
            tracing::info!(kind = %kind, enabled, "Detector toggled");
        }
        Ok(())
    }

    /// Apply the enabled flags from settings.
    ///
    /// Nothing changes if any enabled kind lacks an adapter.
    pub fn apply_settings(&self, settings: &DetectorSettings) -> Result<()> {
        if let Some(missing) = settings
            .enabled_kinds()
            .into_iter()
            .find(|kind| !self.has_detector(*kind))
        {
            return Err(Error::Config(format!(
                "Cannot enable {missing}: no detector registered"
            )));
        }

        for kind in DetectorKind::ALL {
            self.set_enabled(kind, settings.is_enabled(kind))?;
        }
        Ok(())
    }

    /// Whether the kind is enabled
    pub fn is_enabled(&self, kind: DetectorKind) -> bool {
        self.inner.slot(kind).is_enabled()
    }

    /// Whether a task of this kind is in flight
    pub fn is_busy(&self, kind: DetectorKind) -> bool {
        self.inner.slot(kind).gate.is_held()
    }

    /// Wait until no task of this kind is in flight
    pub async fn wait_until_free(&self, kind: DetectorKind) {
        self.inner.slot(kind).gate.wait_free().await;
    }

    /// Offer a frame to every enabled kind
    pub fn submit(&self, frame: Arc<Frame>) -> SubmitReport {
        let outcomes = DetectorKind::ALL
            .into_iter()
            .filter(|kind| self.is_enabled(*kind))
            .map(|kind| (kind, self.submit_kind(kind, &frame)))
            .collect();

        SubmitReport { outcomes }
    }

    /// Offer a frame to a single kind
    pub fn submit_kind(&self, kind: DetectorKind, frame: &Arc<Frame>) -> SubmitOutcome {
        let slot = self.inner.slot(kind);
        if !slot.is_enabled() {
            return SubmitOutcome::Disabled;
        }

        let Some(guard) = slot.gate.try_acquire() else {
            slot.counters.record_dropped();
            tracing::trace!(kind = %kind, frame = frame.sequence, "Detector busy; dropping frame");
            return SubmitOutcome::Dropped;
        };

        let Some(detector) = lock(&slot.detector).clone() else {
            return SubmitOutcome::Disabled;
        };

        slot.counters.record_dispatched();

        let inner = Arc::clone(&self.inner);
        let frame = Arc::clone(frame);
        self.inner.runtime.spawn_blocking(move || {
            let started = Instant::now();
            let outcome = catch_unwind(AssertUnwindSafe(|| lock(&detector).process(&frame)))
                .unwrap_or_else(|_| Err(DetectorError::Failed("detector panicked".to_string())));

            let completion = Completion {
                kind,
                frame_sequence: frame.sequence,
                elapsed: started.elapsed(),
                outcome,
            };
            inner.complete(completion, &detector, guard);
        });

        SubmitOutcome::Dispatched
    }

    /// Disable every kind and release the adapters
    pub fn release_all(&self) {
        for slot in &self.inner.slots {
            slot.enabled.store(false, Ordering::Release);
            let detector = lock(&slot.detector).take();
            if let Some(detector) = detector {
                lock(&detector).release();
                tracing::debug!(kind = %slot.kind, "Released detector");
            }
        }
    }

    /// Counters for every kind
    pub fn stats(&self) -> SchedulerStats {
        let kinds = self
            .inner
            .slots
            .iter()
            .map(|slot| {
                slot.counters
                    .snapshot(slot.kind, slot.is_enabled(), slot.gate.is_held())
            })
            .collect();
        SchedulerStats { kinds }
    }
}

impl std::fmt::Debug for DetectionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut list = f.debug_map();
        for slot in &self.inner.slots {
            list.entry(
                &slot.kind,
                &(if slot.is_enabled() { "enabled" } else { "disabled" }, slot.gate.is_held()),
            );
        }
        list.finish()
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::FrameFormat;
    use crate::events::ChannelSink;
    use std::sync::atomic::AtomicUsize;

    struct Counting {
        calls: Arc<AtomicUsize>,
        resets: Arc<AtomicUsize>,
    }

    impl Detector for Counting {
        fn process(&mut self, _frame: &Frame) -> std::result::Result<Vec<Detection>, DetectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        fn reset(&mut self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicking;

    impl Detector for Panicking {
        fn process(&mut self, _frame: &Frame) -> std::result::Result<Vec<Detection>, DetectorError> {
            panic!("boom");
        }
    }

    fn frame(sequence: u64) -> Arc<Frame> {
        Arc::new(Frame::new(sequence, 2, 2, FrameFormat::Luma8, vec![0u8; 4]).unwrap())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn enabling_without_adapter_fails() {
        let (sink, _rx) = ChannelSink::new();
        let scheduler = DetectionScheduler::new(Arc::new(sink)).unwrap();
        assert!(matches!(
            scheduler.set_enabled(DetectorKind::Face, true),
            Err(Error::Config(_))
        ));
        assert!(!scheduler.is_enabled(DetectorKind::Face));
        assert_eq!(
            scheduler.submit_kind(DetectorKind::Face, &frame(0)),
            SubmitOutcome::Disabled
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn factories_install_configured_adapters() {
        let (sink, mut rx) = ChannelSink::new();
        let scheduler = DetectionScheduler::new(Arc::new(sink)).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let resets = Arc::new(AtomicUsize::new(0));
        let (face_calls, face_resets) = (Arc::clone(&calls), Arc::clone(&resets));
        let factories = DetectorFactories::new().with_face(move |_options: &crate::detect::FaceDetectorOptions| {
            Counting {
                calls: Arc::clone(&face_calls),
                resets: Arc::clone(&face_resets),
            }
        });

        let mut settings = DetectorSettings::default();
        settings.set_enabled(DetectorKind::Face, true);
        let registered = scheduler.register_from(&factories, &settings);
        assert_eq!(
            registered,
            vec![DetectorKind::BarcodeDecode, DetectorKind::GenericBarcode, DetectorKind::Face]
        );
        assert!(!scheduler.has_detector(DetectorKind::Text));

        scheduler.apply_settings(&settings).unwrap();
        scheduler.submit(frame(1));
        match rx.recv().await.expect("event") {
            CameraEvent::Detections { kind, .. } => assert_eq!(kind, DetectorKind::Face),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn barcode_decode_resets_after_each_task() {
        let (sink, mut rx) = ChannelSink::new();
        let scheduler = DetectionScheduler::new(Arc::new(sink)).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let resets = Arc::new(AtomicUsize::new(0));

        scheduler.register(
            DetectorKind::BarcodeDecode,
            Counting {
                calls: Arc::clone(&calls),
                resets: Arc::clone(&resets),
            },
        );
        scheduler.set_enabled(DetectorKind::BarcodeDecode, true).unwrap();

        for sequence in 0..3 {
            assert_eq!(
                scheduler.submit_kind(DetectorKind::BarcodeDecode, &frame(sequence)),
                SubmitOutcome::Dispatched
            );
            rx.recv().await.expect("completion event");
            scheduler.wait_until_free(DetectorKind::BarcodeDecode).await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(resets.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_detector_reports_error_and_releases() {
        let (sink, mut rx) = ChannelSink::new();
        let scheduler = DetectionScheduler::new(Arc::new(sink)).unwrap();
        scheduler.register(DetectorKind::Text, Panicking);
        scheduler.set_enabled(DetectorKind::Text, true).unwrap();

        scheduler.submit_kind(DetectorKind::Text, &frame(7));
        match rx.recv().await.expect("event") {
            CameraEvent::DetectionError { kind, frame, .. } => {
                assert_eq!(kind, DetectorKind::Text);
                assert_eq!(frame, 7);
            }
            other => panic!("unexpected event {other:?}"),
        }
        scheduler.wait_until_free(DetectorKind::Text).await;
        assert!(!scheduler.is_busy(DetectorKind::Text));
        assert_eq!(scheduler.stats().get(DetectorKind::Text).failed, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn release_all_disables_everything() {
        let (sink, _rx) = ChannelSink::new();
        let scheduler = DetectionScheduler::new(Arc::new(sink)).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        scheduler.register(
            DetectorKind::Face,
            Counting {
                calls,
                resets: Arc::new(AtomicUsize::new(0)),
            },
        );
        scheduler.set_enabled(DetectorKind::Face, true).unwrap();

        scheduler.release_all();
        assert!(!scheduler.is_enabled(DetectorKind::Face));
        assert!(!scheduler.has_detector(DetectorKind::Face));
        assert!(scheduler.submit(frame(1)).outcomes.is_empty());
    }

    #[test]
    fn new_outside_runtime_fails() {
        let (sink, _rx) = ChannelSink::new();
        assert!(DetectionScheduler::new(Arc::new(sink)).is_err());
    }
}
