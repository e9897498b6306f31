//! Process-wide counters for the coordination core.
//!
//! Incremented at the call site; [`Metrics::flush`] emits them as one
//! `info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Relaxed atomic counters.
pub struct Metrics {
    appends: AtomicU64,
    retrievals: AtomicU64,
    permission_denials: AtomicU64,
    source_failures: AtomicU64,
    flushes: AtomicU64,
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub appends: u64,
    pub retrievals: u64,
    pub permission_denials: u64,
    pub source_failures: u64,
    pub flushes: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            appends: AtomicU64::new(0),
            retrievals: AtomicU64::new(0),
            permission_denials: AtomicU64::new(0),
            source_failures: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
        }
    }

    pub fn inc_appends(&self) {
        self.appends.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "appends", "counter incremented");
    }

    pub fn inc_retrievals(&self) {
        self.retrievals.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "retrievals", "counter incremented");
    }

    pub fn inc_permission_denials(&self) {
        self.permission_denials.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "permission_denials", "counter incremented");
    }

    pub fn inc_source_failures(&self) {
        self.source_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "source_failures", "counter incremented");
    }

    pub fn inc_flushes(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "flushes", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            appends = s.appends,
            retrievals = s.retrievals,
            permission_denials = s.permission_denials,
            source_failures = s.source_failures,
            flushes = s.flushes,
        );
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            appends: self.appends.load(Ordering::Relaxed),
            retrievals: self.retrievals.load(Ordering::Relaxed),
            permission_denials: self.permission_denials.load(Ordering::Relaxed),
            source_failures: self.source_failures.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.appends.store(0, Ordering::Relaxed);
        self.retrievals.store(0, Ordering::Relaxed);
        self.permission_denials.store(0, Ordering::Relaxed);
        self.source_failures.store(0, Ordering::Relaxed);
        self.flushes.store(0, Ordering::Relaxed);
    }
}
