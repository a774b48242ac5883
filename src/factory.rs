//! Encoder construction with injected configuration and metric sinks.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::block::BlockAllocator;
use crate::collector::SegmentCollector;
use crate::constants::DEFAULT_BLOCK_SIZE_BYTES;
use crate::encoder::GorillaEncoder;
use crate::metrics::SegmentMetrics;
use crate::segment::Segment;

/// Configuration for encoders produced by a factory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Truncate the 13 least significant mantissa bits before encoding.
    pub lossy: bool,
    /// Size of each chain block; a power of two, a multiple of 8, at most
    /// 8192 bytes.
    pub block_size_bytes: usize,
    /// Capacity of each encoder's retired-segment queue.
    pub collection_queue_size: usize,
    /// Minutes a retired segment waits in the queue before it is freed.
    pub collection_delay_minutes: u64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            lossy: false,
            block_size_bytes: DEFAULT_BLOCK_SIZE_BYTES,
            collection_queue_size: 1024,
            collection_delay_minutes: 5,
        }
    }
}

/// Builds encoders sharing one block allocator and one set of gauge sinks.
///
/// Mirrors the shape of the write path: one factory per shard pool, one
/// encoder per worker thread.
#[derive(Debug)]
pub struct GorillaEncoderFactory {
    config: EncoderConfig,
    allocator: Arc<BlockAllocator>,
    metrics: SegmentMetrics,
}

impl GorillaEncoderFactory {
    /// Create a factory for the given configuration.
    ///
    /// # Panics
    /// Panics if the configured block size or queue capacity is invalid.
    #[must_use]
    pub fn new(config: EncoderConfig, metrics: SegmentMetrics) -> Self {
        let allocator = Arc::new(BlockAllocator::new(config.block_size_bytes));
        assert!(
            config.collection_queue_size > 0,
            "collection queue capacity must be non-zero"
        );
        Self {
            config,
            allocator,
            metrics,
        }
    }

    /// The shared allocator; exposed for accounting in tests and exporters.
    #[must_use]
    pub fn allocator(&self) -> &Arc<BlockAllocator> {
        &self.allocator
    }

    /// The factory's configuration.
    #[must_use]
    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Build an encoder with a fresh segment handle and its own collector.
    #[must_use]
    pub fn create(&self) -> GorillaEncoder {
        let segment = Segment::new(Arc::clone(&self.allocator), self.metrics.clone());
        // The collector walks chains with its own handle; its block
        // accounting is not meaningful, so it reports nowhere.
        let collector_handle = Segment::new(Arc::clone(&self.allocator), SegmentMetrics::noop());
        let collector = SegmentCollector::new(
            self.config.collection_queue_size,
            Duration::from_secs(self.config.collection_delay_minutes * 60),
            collector_handle,
        );
        GorillaEncoder::new(self.config.lossy, segment, collector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EncoderConfig::default();
        assert!(!config.lossy);
        assert_eq!(config.block_size_bytes, DEFAULT_BLOCK_SIZE_BYTES);
        let factory = GorillaEncoderFactory::new(config, SegmentMetrics::noop());
        let encoder = factory.create();
        assert!(!encoder.is_lossy());
    }

    #[test]
    fn lossy_flag_propagates() {
        let config = EncoderConfig {
            lossy: true,
            ..EncoderConfig::default()
        };
        let factory = GorillaEncoderFactory::new(config, SegmentMetrics::noop());
        assert!(factory.create().is_lossy());
    }
}
