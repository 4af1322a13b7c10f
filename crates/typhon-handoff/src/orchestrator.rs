//! Restart orchestration.
//!
//! Owns the process lifecycle state machine:
//!
//! ```text
//! Starting -> Serving -> Draining -> Terminated
//! ```
//!
//! `Serving -> Draining` happens only after a successor process has been
//! started successfully. A failed spawn abandons the handoff and the
//! process stays in `Serving`; a failed handoff must never take down the
//! only live instance. `Terminated` is absorbing.
//!
//! Signals are observed by a dedicated watcher task and forwarded through
//! one-shot notifications; the serving loop is never polled for flags.

use std::sync::atomic::{AtomicU8, Ordering};

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tracing::{error, info};

use crate::drain::{DrainCoordinator, DrainOutcome};
use crate::spawn::SpawnSuccessor;

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Lifecycle {
    Starting = 0,
    Serving = 1,
    Draining = 2,
    Terminated = 3,
}

impl Lifecycle {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Lifecycle::Starting,
            1 => Lifecycle::Serving,
            2 => Lifecycle::Draining,
            _ => Lifecycle::Terminated,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Starting => "starting",
            Lifecycle::Serving => "serving",
            Lifecycle::Draining => "draining",
            Lifecycle::Terminated => "terminated",
        }
    }
}

/// Why the orchestrator returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// A successor was spawned and this process drained behind it.
    HandedOff(DrainOutcome),
    /// Plain shutdown: drained without spawning a successor.
    ShutDown(DrainOutcome),
}

impl ExitReason {
    pub fn outcome(&self) -> DrainOutcome {
        match self {
            ExitReason::HandedOff(o) | ExitReason::ShutDown(o) => *o,
        }
    }
}

enum Trigger {
    Restart,
    Terminate,
}

/// Drives the restart/shutdown lifecycle of the serving process.
pub struct Orchestrator<S> {
    drain: DrainCoordinator,
    spawner: S,
    restart: Notify,
    terminate: Notify,
    state: AtomicU8,
}

impl<S: SpawnSuccessor> Orchestrator<S> {
    pub fn new(drain: DrainCoordinator, spawner: S) -> Self {
        Self {
            drain,
            spawner,
            restart: Notify::new(),
            terminate: Notify::new(),
            state: AtomicU8::new(Lifecycle::Starting as u8),
        }
    }

    pub fn state(&self) -> Lifecycle {
        Lifecycle::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: Lifecycle) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// The drain coordinator shared with the accept loop and middleware.
    pub fn drain(&self) -> &DrainCoordinator {
        &self.drain
    }

    /// Request a graceful restart (what the SIGHUP watcher calls).
    pub fn notify_restart(&self) {
        self.restart.notify_one();
    }

    /// Request a graceful shutdown (what the SIGTERM/SIGINT watcher calls).
    pub fn notify_terminate(&self) {
        self.terminate.notify_one();
    }

    /// Translate process signals into lifecycle notifications.
    ///
    /// Runs forever; spawn it as its own task. Signals received while a
    /// handoff is already draining are ignored by `run`, which is no longer
    /// listening.
    pub async fn watch_signals(&self) {
        let mut sighup = signal(SignalKind::hangup()).expect("failed to register SIGHUP handler");
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
        let mut sigint =
            signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");

        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    info!("received SIGHUP, requesting graceful restart");
                    self.notify_restart();
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, requesting graceful shutdown");
                    self.notify_terminate();
                }
                _ = sigint.recv() => {
                    info!("received SIGINT, requesting graceful shutdown");
                    self.notify_terminate();
                }
            }
        }
    }

    /// Run the lifecycle to completion.
    ///
    /// Call once the accept loop is live; marks the process `Serving`, then
    /// blocks until a trigger retires it. On a restart trigger the successor
    /// is spawned *before* this process stops accepting, so the port is
    /// never unbound. Spawn failure re-arms the wait: a later restart
    /// trigger retries the handoff.
    pub async fn run(&self) -> ExitReason {
        self.set_state(Lifecycle::Serving);

        loop {
            let trigger = tokio::select! {
                _ = self.restart.notified() => Trigger::Restart,
                _ = self.terminate.notified() => Trigger::Terminate,
            };

            match trigger {
                Trigger::Restart => {
                    info!("restart requested, spawning successor before retiring");
                    match self.spawner.spawn_successor() {
                        Err(error) => {
                            error!(%error, "successor spawn failed, handoff abandoned, still serving");
                        }
                        Ok(pid) => {
                            info!(successor_pid = pid, "successor live, retiring this process");
                            return ExitReason::HandedOff(self.retire().await);
                        }
                    }
                }
                Trigger::Terminate => {
                    info!("shutdown requested, retiring this process");
                    return ExitReason::ShutDown(self.retire().await);
                }
            }
        }
    }

    async fn retire(&self) -> DrainOutcome {
        self.set_state(Lifecycle::Draining);
        self.drain.stop_accepting();
        let outcome = self.drain.drain().await;
        self.set_state(Lifecycle::Terminated);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    /// Fails the first `failures` spawn attempts, then succeeds.
    struct ScriptedSpawner {
        calls: AtomicUsize,
        failures: usize,
    }

    impl ScriptedSpawner {
        fn failing(failures: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failures,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl SpawnSuccessor for ScriptedSpawner {
        fn spawn_successor(&self) -> std::io::Result<u32> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(std::io::Error::other("scripted spawn failure"))
            } else {
                Ok(4242)
            }
        }
    }

    fn orchestrator(failures: usize) -> Arc<Orchestrator<ScriptedSpawner>> {
        Arc::new(Orchestrator::new(
            DrainCoordinator::new(Duration::from_secs(5)),
            ScriptedSpawner::failing(failures),
        ))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn spawn_failure_leaves_process_serving() {
        let orch = orchestrator(usize::MAX);
        let stop = orch.drain().stop_token();

        let run = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.run().await })
        };
        settle().await;
        assert_eq!(orch.state(), Lifecycle::Serving);

        orch.notify_restart();
        settle().await;

        // Handoff abandoned: still serving, still accepting.
        assert_eq!(orch.state(), Lifecycle::Serving);
        assert!(!stop.is_cancelled());
        assert_eq!(orch.spawner.call_count(), 1);
        assert!(!run.is_finished());

        orch.notify_terminate();
        let reason = run.await.unwrap();
        assert_eq!(reason, ExitReason::ShutDown(DrainOutcome::Completed));
        assert_eq!(orch.state(), Lifecycle::Terminated);
    }

    #[tokio::test]
    async fn restart_spawns_then_drains_then_terminates() {
        let orch = orchestrator(0);
        let stop = orch.drain().stop_token();
        let in_flight = orch.drain().guard();

        let run = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.run().await })
        };
        settle().await;

        orch.notify_restart();
        settle().await;

        // Successor spawned, accepting stopped, but termination waits on the
        // in-flight request.
        assert_eq!(orch.spawner.call_count(), 1);
        assert_eq!(orch.state(), Lifecycle::Draining);
        assert!(stop.is_cancelled());
        assert!(!run.is_finished());

        drop(in_flight);
        let reason = run.await.unwrap();
        assert_eq!(reason, ExitReason::HandedOff(DrainOutcome::Completed));
        assert_eq!(orch.state(), Lifecycle::Terminated);
    }

    #[tokio::test]
    async fn second_restart_signal_during_drain_is_ignored() {
        let orch = orchestrator(0);
        let in_flight = orch.drain().guard();

        let run = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.run().await })
        };
        settle().await;

        orch.notify_restart();
        settle().await;
        assert_eq!(orch.state(), Lifecycle::Draining);

        // Handoff already in progress; no second successor.
        orch.notify_restart();
        settle().await;
        assert_eq!(orch.spawner.call_count(), 1);

        drop(in_flight);
        run.await.unwrap();
        assert_eq!(orch.spawner.call_count(), 1);
    }

    #[tokio::test]
    async fn restart_can_be_retried_after_spawn_failure() {
        let orch = orchestrator(1);

        let run = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.run().await })
        };
        settle().await;

        orch.notify_restart();
        settle().await;
        assert_eq!(orch.state(), Lifecycle::Serving);

        orch.notify_restart();
        let reason = run.await.unwrap();
        assert_eq!(reason, ExitReason::HandedOff(DrainOutcome::Completed));
        assert_eq!(orch.spawner.call_count(), 2);
    }

    #[tokio::test]
    async fn drain_deadline_bounds_the_handoff() {
        let orch = Arc::new(Orchestrator::new(
            DrainCoordinator::new(Duration::from_millis(50)),
            ScriptedSpawner::failing(0),
        ));
        let _stuck = orch.drain().guard();

        let run = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.run().await })
        };
        settle().await;

        orch.notify_restart();
        let reason = run.await.unwrap();
        assert_eq!(
            reason,
            ExitReason::HandedOff(DrainOutcome::DeadlineExpired { remaining: 1 })
        );
        assert_eq!(orch.state(), Lifecycle::Terminated);
    }
}
