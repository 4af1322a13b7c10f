//! Drain coordination.
//!
//! Once a handoff or shutdown begins, the accept loop must stop while
//! already-accepted work runs to completion. `DrainCoordinator` owns the
//! stop token and the in-flight count; `ConnectionGuard` is the RAII handle
//! each unit of in-flight work holds. The drain wait is bounded by a
//! deadline so a stuck peer cannot prevent termination.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Result of a bounded drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every in-flight unit of work completed.
    Completed,
    /// The deadline elapsed first; `remaining` units were still open.
    DeadlineExpired { remaining: usize },
}

impl DrainOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, DrainOutcome::Completed)
    }
}

/// Coordinates the stop-accepting and drain phases.
///
/// Cheaply cloneable; clones share the same token and counters, so a clone
/// handed to request middleware observes the same drain state as the
/// orchestrator.
#[derive(Clone)]
pub struct DrainCoordinator {
    stop_accepting: CancellationToken,
    in_flight: Arc<AtomicUsize>,
    drained: Arc<tokio::sync::Notify>,
    deadline: Duration,
}

impl DrainCoordinator {
    pub fn new(deadline: Duration) -> Self {
        Self {
            stop_accepting: CancellationToken::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            drained: Arc::new(tokio::sync::Notify::new()),
            deadline,
        }
    }

    /// Token cancelled when the accept loop should stop taking connections.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop_accepting.clone()
    }

    /// Begin refusing new work. Idempotent.
    pub fn stop_accepting(&self) {
        self.stop_accepting.cancel();
    }

    /// Register a unit of in-flight work. The count drops when the guard does.
    pub fn guard(&self) -> ConnectionGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            _release: Arc::new(GuardRelease {
                in_flight: Arc::clone(&self.in_flight),
                drained: Arc::clone(&self.drained),
            }),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait for in-flight work to finish, bounded by the deadline.
    pub async fn drain(&self) -> DrainOutcome {
        let open = self.in_flight();
        if open == 0 {
            info!("nothing in flight, drain complete");
            return DrainOutcome::Completed;
        }

        info!(
            in_flight = open,
            deadline_secs = self.deadline.as_secs(),
            "draining in-flight work"
        );

        tokio::select! {
            _ = self.wait_until_empty() => {
                info!("drain complete");
                DrainOutcome::Completed
            }
            _ = tokio::time::sleep(self.deadline) => {
                let remaining = self.in_flight();
                warn!(remaining, "drain deadline expired, terminating anyway");
                DrainOutcome::DeadlineExpired { remaining }
            }
        }
    }

    async fn wait_until_empty(&self) {
        loop {
            // Register the waiter before re-checking the count, otherwise a
            // guard dropping between the check and the await is lost.
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// RAII handle for one unit of in-flight work.
#[derive(Clone)]
pub struct ConnectionGuard {
    _release: Arc<GuardRelease>,
}

struct GuardRelease {
    in_flight: Arc<AtomicUsize>,
    drained: Arc<tokio::sync::Notify>,
}

impl Drop for GuardRelease {
    fn drop(&mut self) {
        let prev = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 {
            self.drained.notify_waiters();
        }
    }
}
