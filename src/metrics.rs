//! Per-kind detection counters and periodic summaries

use crate::detect::{DetectionScheduler, DetectorKind};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::info;

/// Shortest reporting interval accepted by [`spawn_reporter`]
pub const MIN_REPORT_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Default)]
pub(crate) struct KindCounters {
    dispatched: AtomicU64,
    dropped: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    suppressed: AtomicU64,
    busy_micros: AtomicU64,
}

impl KindCounters {
    pub(crate) fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self, elapsed: Duration) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.add_busy(elapsed);
    }

    pub(crate) fn record_failed(&self, elapsed: Duration) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.add_busy(elapsed);
    }

    pub(crate) fn record_suppressed(&self) {
        self.suppressed.fetch_add(1, Ordering::Relaxed);
    }

    fn add_busy(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.busy_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, kind: DetectorKind, enabled: bool, busy: bool) -> KindStats {
        KindStats {
            kind,
            enabled,
            busy,
            dispatched: self.dispatched.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            busy_micros: self.busy_micros.load(Ordering::Relaxed),
        }
    }
}

/// Counters for one detector kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KindStats {
    /// Kind these counters belong to
    pub kind: DetectorKind,
    /// Whether the kind was enabled when sampled
    pub enabled: bool,
    /// Whether a task was in flight when sampled
    pub busy: bool,
    /// Tasks started
    pub dispatched: u64,
    /// Frames discarded because a task was in flight
    pub dropped: u64,
    /// Tasks that returned detections
    pub completed: u64,
    /// Tasks that returned an error
    pub failed: u64,
    /// Finished tasks whose result was discarded because the kind was disabled
    pub suppressed: u64,
    /// Total time spent inside the adapter, in microseconds
    pub busy_micros: u64,
}

impl KindStats {
    /// Mean adapter latency across finished tasks
    pub fn avg_latency_ms(&self) -> f64 {
        let finished = self.completed + self.failed;
        if finished == 0 {
            0.0
        } else {
            self.busy_micros as f64 / 1_000.0 / finished as f64
        }
    }

    fn delta_since(&self, earlier: &KindStats) -> KindStats {
        KindStats {
            dispatched: self.dispatched.saturating_sub(earlier.dispatched),
            dropped: self.dropped.saturating_sub(earlier.dropped),
            completed: self.completed.saturating_sub(earlier.completed),
            failed: self.failed.saturating_sub(earlier.failed),
            suppressed: self.suppressed.saturating_sub(earlier.suppressed),
            busy_micros: self.busy_micros.saturating_sub(earlier.busy_micros),
            ..*self
        }
    }
}

/// Counters for every kind of one scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// One entry per kind, in gate-table order
    pub kinds: Vec<KindStats>,
}

impl SchedulerStats {
    /// Counters for a single kind
    pub fn get(&self, kind: DetectorKind) -> KindStats {
        self.kinds
            .iter()
            .copied()
            .find(|stats| stats.kind == kind)
            .unwrap_or(KindStats {
                kind,
                enabled: false,
                busy: false,
                dispatched: 0,
                dropped: 0,
                completed: 0,
                failed: 0,
                suppressed: 0,
                busy_micros: 0,
            })
    }

    /// Change in counters since an earlier sample of the same scheduler
    pub fn delta_since(&self, earlier: &SchedulerStats) -> SchedulerStats {
        let kinds = self
            .kinds
            .iter()
            .map(|current| current.delta_since(&earlier.get(current.kind)))
            .collect();
        SchedulerStats { kinds }
    }

    /// Frames discarded across all kinds
    pub fn total_dropped(&self) -> u64 {
        self.kinds.iter().map(|k| k.dropped).sum()
    }

    /// Tasks started across all kinds
    pub fn total_dispatched(&self) -> u64 {
        self.kinds.iter().map(|k| k.dispatched).sum()
    }
}

/// Log a summary of the scheduler's counters every `interval_secs` seconds.
///
/// Intervals shorter than [`MIN_REPORT_INTERVAL_SECS`] are raised to it.
pub fn spawn_reporter(scheduler: DetectionScheduler, interval_secs: u64) -> JoinHandle<()> {
    let period = Duration::from_secs(interval_secs.max(MIN_REPORT_INTERVAL_SECS));

    tokio::spawn(async move {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately; report after a full window instead.
        ticker.tick().await;

        let mut previous = scheduler.stats();
        loop {
            ticker.tick().await;
            let current = scheduler.stats();
            log_window(&current.delta_since(&previous), period);
            previous = current;
        }
    })
}

fn log_window(window: &SchedulerStats, period: Duration) {
    info!(
        target: "scanview::metrics",
        interval_secs = period.as_secs(),
        dispatched = window.total_dispatched(),
        dropped = window.total_dropped(),
        "Detection metrics window"
    );

    let active: Vec<_> = window
        .kinds
        .iter()
        .filter(|k| k.enabled || k.dispatched > 0 || k.suppressed > 0)
        .collect();
    if !active.is_empty() {
        info!(
            target: "scanview::metrics",
            breakdown = format_breakdown(&active),
            "Per-kind metrics"
        );
    }
}

fn format_breakdown(entries: &[&KindStats]) -> String {
    entries
        .iter()
        .map(|entry| {
            let mut line = format!(
                "{}: {} ok / {} err / {} dropped (avg {:.1} ms)",
                entry.kind,
                entry.completed,
                entry.failed,
                entry.dropped,
                entry.avg_latency_ms()
            );
            if entry.suppressed > 0 {
                line.push_str(&format!(", {} suppressed", entry.suppressed));
            }
            line
        })
        .collect::<Vec<_>>()
        .join(", ")
}
