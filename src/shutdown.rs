//! Shutdown Coordinator (C9): tracks in-flight work and gates new work
//! during drain.
//!
//! In-flight tracking is an RAII guard rather than a scope function: a
//! `Drop` impl runs on every exit path, including a panic unwinding through
//! it, which a plain "enter/exit" pair of method calls cannot guarantee.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

struct Inner {
    draining: AtomicBool,
    in_flight: Mutex<HashSet<String>>,
    drained: Notify,
}

#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                draining: AtomicBool::new(false),
                in_flight: Mutex::new(HashSet::new()),
                drained: Notify::new(),
            }),
        }
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::SeqCst)
    }

    /// Marks the system as draining; subsequent admission checks must
    /// consult `is_draining` and refuse new work.
    pub fn initiate(&self) {
        self.inner.draining.store(true, Ordering::SeqCst);
        if self.inner.in_flight.lock().is_empty() {
            self.inner.drained.notify_waiters();
        }
    }

    /// Adds `fingerprint` to the in-flight set for the lifetime of the
    /// returned guard. Released on every exit path, including panics.
    pub fn track(&self, fingerprint: impl Into<String>) -> InFlightGuard {
        let fingerprint = fingerprint.into();
        self.inner.in_flight.lock().insert(fingerprint.clone());
        InFlightGuard {
            inner: self.inner.clone(),
            fingerprint,
        }
    }

    /// Waits for either drain completion or `grace_seconds` to elapse.
    /// Returns true iff all in-flight work finished within grace.
    pub async fn await_completion(&self, grace_seconds: u64) -> bool {
        if self.inner.in_flight.lock().is_empty() {
            return true;
        }
        let notified = self.inner.drained.notified();
        tokio::select! {
            _ = notified => true,
            _ = tokio::time::sleep(Duration::from_secs(grace_seconds)) => {
                self.inner.in_flight.lock().is_empty()
            }
        }
    }

    pub fn in_flight_ids(&self) -> Vec<String> {
        self.inner.in_flight.lock().iter().cloned().collect()
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.lock().len()
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

pub struct InFlightGuard {
    inner: Arc<Inner>,
    fingerprint: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = self.inner.in_flight.lock();
        in_flight.remove(&self.fingerprint);
        if in_flight.is_empty() && self.inner.draining.load(Ordering::SeqCst) {
            self.inner.drained.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn draining_gates_new_admission() {
        let coordinator = ShutdownCoordinator::new();
        assert!(!coordinator.is_draining());
        coordinator.initiate();
        assert!(coordinator.is_draining());
    }

    #[tokio::test]
    async fn guard_removes_on_drop() {
        let coordinator = ShutdownCoordinator::new();
        {
            let _guard = coordinator.track("fp1");
            assert_eq!(coordinator.in_flight_count(), 1);
        }
        assert_eq!(coordinator.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn await_completion_true_when_work_finishes_in_time() {
        let coordinator = ShutdownCoordinator::new();
        let guard = coordinator.track("fp1");
        coordinator.initiate();

        let coordinator2 = coordinator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
            let _ = &coordinator2;
        });

        assert!(coordinator.await_completion(5).await);
    }

    #[tokio::test]
    async fn await_completion_false_when_grace_expires() {
        let coordinator = ShutdownCoordinator::new();
        let _guard = coordinator.track("fp1");
        coordinator.initiate();
        assert!(!coordinator.await_completion(0).await);
    }

    #[tokio::test]
    async fn guard_releases_even_if_holder_panics() {
        let coordinator = ShutdownCoordinator::new();
        let coordinator2 = coordinator.clone();

        let handle = tokio::spawn(async move {
            let _guard = coordinator2.track("fp1");
            panic!("boom");
        });
        let _ = handle.await;

        assert_eq!(coordinator.in_flight_count(), 0);
    }
}
