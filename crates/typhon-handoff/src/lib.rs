//! # typhon-handoff
//!
//! Zero-downtime process handoff for Typhon.
//!
//! ## Overview
//!
//! A restart replaces the running server process without dropping a single
//! accepted connection:
//! 1. Every process binds its listener with `SO_REUSEPORT`, so two processes
//!    can hold the same port at once
//! 2. On the restart signal, the running process spawns a successor from its
//!    own executable; the successor binds the shared port independently
//! 3. Only after the successor has started does the old process stop
//!    accepting and drain in-flight work
//! 4. After drain (or the drain deadline), the old process exits
//!
//! There is no instant at which the port is unbound by every process: the
//! successor is live before the predecessor retires. A failed spawn aborts
//! the handoff and the current process keeps serving.
//!
//! ## Signal Conventions
//!
//! - `SIGHUP`: graceful restart (spawn successor, then drain and exit)
//! - `SIGTERM` / `SIGINT`: graceful shutdown (drain and exit, no successor)
//!
//! ## Platform
//!
//! This crate requires Unix (Linux / macOS). It will not compile on other
//! platforms.

#[cfg(not(unix))]
compile_error!("typhon-handoff requires a Unix platform (Linux or macOS)");

mod drain;
mod listener;
mod orchestrator;
mod spawn;

pub use drain::{ConnectionGuard, DrainCoordinator, DrainOutcome};
pub use listener::{bind_shared, BindError};
pub use orchestrator::{ExitReason, Lifecycle, Orchestrator};
pub use spawn::{SelfSpawner, SpawnSuccessor};
