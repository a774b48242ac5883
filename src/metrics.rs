//! Opaque metric sinks injected into segments and collectors.
//!
//! The core never aggregates or exports; it only pushes the latest value
//! into whatever sink the embedding process wired up.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// An additive gauge sink. Implementations must be safe to update from any
/// thread.
pub trait Gauge: Send + Sync {
    /// Record the latest value.
    fn set(&self, value: i64);
}

/// A gauge backed by an atomic, readable from tests and exporters.
#[derive(Debug, Default)]
pub struct AtomicGauge(AtomicI64);

impl AtomicGauge {
    #[must_use]
    pub fn new() -> Self {
        Self(AtomicI64::new(0))
    }

    /// The most recently recorded value.
    #[must_use]
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Gauge for AtomicGauge {
    fn set(&self, value: i64) {
        self.0.store(value, Ordering::Relaxed);
    }
}

/// A gauge that discards every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopGauge;

impl Gauge for NoopGauge {
    fn set(&self, _value: i64) {}
}

/// The sinks a segment reports into.
#[derive(Clone)]
pub struct SegmentMetrics {
    /// Cumulative count of live memory blocks behind this handle.
    pub memory_block_count: Arc<dyn Gauge>,
    /// Total bytes held by those blocks.
    pub segment_length: Arc<dyn Gauge>,
}

impl SegmentMetrics {
    /// Sinks that drop every update; useful for tests and benchmarks.
    #[must_use]
    pub fn noop() -> Self {
        Self {
            memory_block_count: Arc::new(NoopGauge),
            segment_length: Arc::new(NoopGauge),
        }
    }
}

impl std::fmt::Debug for SegmentMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_gauge_stores_latest() {
        let g = AtomicGauge::new();
        g.set(42);
        g.set(7);
        assert_eq!(g.get(), 7);
    }
}
