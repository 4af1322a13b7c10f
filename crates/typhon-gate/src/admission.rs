//! Fixed-window request admission.
//!
//! One counter and window-start timestamp per key (normally the client
//! address). The window resets lazily when an access crosses the boundary;
//! a request past the max is rejected and does not count toward any future
//! window. State is process-local: a restart starts every client fresh.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

/// Default window max count.
const DEFAULT_MAX_REQUESTS: u32 = 20;

/// Default window length.
const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Throttled,
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

/// Limiter tuning.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionConfig {
    /// Requests admitted per key per window.
    pub max_requests: u32,
    /// Fixed window length.
    pub window: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window: DEFAULT_WINDOW,
        }
    }
}

struct RateWindow {
    started_at: Instant,
    count: u32,
}

/// Keyed fixed-window rate limiter.
///
/// Pass a handle to whatever layer performs admission checks; there is no
/// global state.
pub struct AdmissionController {
    config: AdmissionConfig,
    windows: DashMap<String, RateWindow>,
}

impl AdmissionController {
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    /// Check and record one request for `key`.
    pub fn admit(&self, key: &str) -> Admission {
        self.admit_at(key, Instant::now())
    }

    fn admit_at(&self, key: &str, now: Instant) -> Admission {
        let mut window = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| RateWindow {
                started_at: now,
                count: 0,
            });

        if now.duration_since(window.started_at) >= self.config.window {
            window.started_at = now;
            window.count = 0;
        }

        if window.count >= self.config.max_requests {
            debug!(key, count = window.count, "request throttled");
            return Admission::Throttled;
        }

        window.count += 1;
        Admission::Allowed
    }

    /// Drop windows whose boundary has already passed.
    ///
    /// Purely a memory bound: an evicted key that reappears starts a fresh
    /// window, which is exactly what the lazy reset would have given it.
    pub fn evict_stale(&self) {
        self.evict_stale_at(Instant::now());
    }

    fn evict_stale_at(&self, now: Instant) {
        let window = self.config.window;
        self.windows
            .retain(|_, w| now.duration_since(w.started_at) < window);
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    pub fn config(&self) -> AdmissionConfig {
        self.config
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new(AdmissionConfig::default())
    }
}
