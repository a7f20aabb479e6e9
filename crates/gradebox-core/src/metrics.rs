//! Global atomic counters for grading throughput.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. when a run finishes).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    runs_graded: AtomicU64,
    outcomes_recorded: AtomicU64,
    sandboxes_spawned: AtomicU64,
    watchdog_kills: AtomicU64,
    units_instrumented: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            runs_graded: AtomicU64::new(0),
            outcomes_recorded: AtomicU64::new(0),
            sandboxes_spawned: AtomicU64::new(0),
            watchdog_kills: AtomicU64::new(0),
            units_instrumented: AtomicU64::new(0),
        }
    }

    pub fn inc_runs_graded(&self) {
        self.runs_graded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_graded", "counter incremented");
    }

    pub fn inc_outcomes_recorded(&self) {
        self.outcomes_recorded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "outcomes_recorded", "counter incremented");
    }

    pub fn inc_sandboxes_spawned(&self) {
        self.sandboxes_spawned.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "sandboxes_spawned", "counter incremented");
    }

    /// A sandbox outlived timeout + grace and was killed by the parent.
    pub fn inc_watchdog_kills(&self) {
        self.watchdog_kills.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "watchdog_kills", "counter incremented");
    }

    /// Cache misses in the instrumentation layer; hits are not counted.
    pub fn inc_units_instrumented(&self) {
        self.units_instrumented.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "units_instrumented", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            runs_graded = self.runs_graded(),
            outcomes_recorded = self.outcomes_recorded(),
            sandboxes_spawned = self.sandboxes_spawned(),
            watchdog_kills = self.watchdog_kills(),
            units_instrumented = self.units_instrumented(),
        );
    }

    pub fn runs_graded(&self) -> u64 {
        self.runs_graded.load(Ordering::Relaxed)
    }

    pub fn outcomes_recorded(&self) -> u64 {
        self.outcomes_recorded.load(Ordering::Relaxed)
    }

    pub fn sandboxes_spawned(&self) -> u64 {
        self.sandboxes_spawned.load(Ordering::Relaxed)
    }

    pub fn watchdog_kills(&self) -> u64 {
        self.watchdog_kills.load(Ordering::Relaxed)
    }

    pub fn units_instrumented(&self) -> u64 {
        self.units_instrumented.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.runs_graded.store(0, Ordering::Relaxed);
        self.outcomes_recorded.store(0, Ordering::Relaxed);
        self.sandboxes_spawned.store(0, Ordering::Relaxed);
        self.watchdog_kills.store(0, Ordering::Relaxed);
        self.units_instrumented.store(0, Ordering::Relaxed);
    }
}
