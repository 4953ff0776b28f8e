//! Global atomic counters for exploration observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (the engine does so when a batch finishes).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    samples_captured: AtomicU64,
    batches_finished: AtomicU64,
    remote_failures: AtomicU64,
    saves_failed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            samples_captured: AtomicU64::new(0),
            batches_finished: AtomicU64::new(0),
            remote_failures: AtomicU64::new(0),
            saves_failed: AtomicU64::new(0),
        }
    }

    pub fn inc_samples_captured(&self) {
        self.samples_captured.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "samples_captured", "counter incremented");
    }

    pub fn inc_batches_finished(&self) {
        self.batches_finished.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "batches_finished", "counter incremented");
    }

    pub fn inc_remote_failures(&self) {
        self.remote_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "remote_failures", "counter incremented");
    }

    pub fn inc_saves_failed(&self) {
        self.saves_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "saves_failed", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            samples_captured = self.samples_captured(),
            batches_finished = self.batches_finished(),
            remote_failures = self.remote_failures(),
            saves_failed = self.saves_failed(),
        );
    }

    pub fn samples_captured(&self) -> u64 {
        self.samples_captured.load(Ordering::Relaxed)
    }

    pub fn batches_finished(&self) -> u64 {
        self.batches_finished.load(Ordering::Relaxed)
    }

    pub fn remote_failures(&self) -> u64 {
        self.remote_failures.load(Ordering::Relaxed)
    }

    pub fn saves_failed(&self) -> u64 {
        self.saves_failed.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.samples_captured.store(0, Ordering::Relaxed);
        self.batches_finished.store(0, Ordering::Relaxed);
        self.remote_failures.store(0, Ordering::Relaxed);
        self.saves_failed.store(0, Ordering::Relaxed);
    }
}
