//! Single-slot gate guarding one detector kind

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Held/free flag admitting at most one in-flight task.
///
/// The gate is acquired on the frame-producing thread and released on the
/// worker that ran the task, so the flag is atomic rather than a plain bool.
#[derive(Debug, Default)]
pub struct DetectorGate {
    held: AtomicBool,
    released: Notify,
}

impl DetectorGate {
    /// Create a free gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the gate if it is free. The returned guard releases it on drop.
    pub fn try_acquire(self: &Arc<Self>) -> Option<GateGuard> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GateGuard {
                gate: Arc::clone(self),
            })
    }

    /// Whether a task currently holds the gate
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// Wait until the gate is free
    pub async fn wait_free(&self) {
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_held() {
                return;
            }
            notified.await;
        }
    }

    fn release(&self) {
        self.held.store(false, Ordering::Release);
        self.released.notify_waiters();
    }
}

/// Proof of holding a [`DetectorGate`]
#[derive(Debug)]
pub struct GateGuard {
    gate: Arc<DetectorGate>,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.gate.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn second_acquire_fails_until_release() {
        let gate = Arc::new(DetectorGate::new());
        let guard = gate.try_acquire().expect("free gate");
        assert!(gate.is_held());
        assert!(gate.try_acquire().is_none());

        drop(guard);
        assert!(!gate.is_held());
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn release_is_visible_across_threads() {
        let gate = Arc::new(DetectorGate::new());
        let guard = gate.try_acquire().unwrap();

        std::thread::spawn(move || drop(guard)).join().unwrap();
        assert!(!gate.is_held());
    }

    #[test]
    fn panicking_holder_still_releases() {
        let gate = Arc::new(DetectorGate::new());
        let worker_gate = Arc::clone(&gate);

        let result = std::thread::spawn(move || {
            let _guard = worker_gate.try_acquire().unwrap();
            panic!("detector blew up");
        })
        .join();

        assert!(result.is_err());
        assert!(!gate.is_held());
    }

    #[tokio::test]
    async fn wait_free_returns_after_release() {
        let gate = Arc::new(DetectorGate::new());
        let guard = gate.try_acquire().unwrap();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(guard);
        });

        tokio::time::timeout(Duration::from_secs(2), gate.wait_free())
            .await
            .expect("gate released");
        assert!(!gate.is_held());
    }
}
