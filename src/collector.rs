//! Deferred freeing of retired segments.
//!
//! Writers retire a segment by queueing its address instead of freeing it
//! inline, giving in-flight readers a grace period. A single maintenance
//! thread drains the queue. The queue is bounded: on overflow the oldest
//! entry is freed synchronously so pending garbage cannot grow without
//! limit.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::segment::Segment;

struct Pending {
    address: u64,
    enqueued_at: Instant,
}

/// Bounded FIFO of segment addresses awaiting release.
///
/// Owns its own segment handle for walking chains; it must not run
/// concurrently with a live reader or writer of a queued segment.
pub struct SegmentCollector {
    queue: VecDeque<Pending>,
    capacity: usize,
    delay: Duration,
    segment: Segment,
}

impl SegmentCollector {
    /// Create a collector holding at most `capacity` pending addresses and
    /// freeing entries `delay` after they were queued.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize, delay: Duration, segment: Segment) -> Self {
        assert!(capacity > 0, "collector queue capacity must be non-zero");
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            delay,
            segment,
        }
    }

    /// Number of addresses currently queued.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Queue `address` for deferred freeing. When the queue is full the
    /// oldest entry is freed immediately to make room.
    pub fn collect(&mut self, address: u64) {
        if self.queue.len() >= self.capacity {
            if let Some(oldest) = self.queue.pop_front() {
                debug!(
                    address = oldest.address,
                    "collector queue full; freeing oldest synchronously"
                );
                self.free_address(oldest.address);
            }
        }
        self.queue.push_back(Pending {
            address,
            enqueued_at: Instant::now(),
        });
    }

    /// Free every queued segment older than the collection delay, returning
    /// how many were released.
    pub fn free_expired(&mut self) -> usize {
        let mut freed = 0;
        while let Some(front) = self.queue.front() {
            if front.enqueued_at.elapsed() < self.delay {
                break;
            }
            let entry = self.queue.pop_front().expect("front exists");
            self.free_address(entry.address);
            freed += 1;
        }
        freed
    }

    fn free_address(&mut self, address: u64) {
        self.segment.open(address);
        self.segment.free();
        debug!(address, "collected segment freed");
    }
}

impl std::fmt::Debug for SegmentCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentCollector")
            .field("pending", &self.queue.len())
            .field("capacity", &self.capacity)
            .field("delay", &self.delay)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockAllocator;
    use crate::metrics::SegmentMetrics;
    use std::sync::Arc;

    fn segment(allocator: &Arc<BlockAllocator>) -> Segment {
        Segment::new(Arc::clone(allocator), SegmentMetrics::noop())
    }

    #[test]
    fn expired_entries_are_freed() {
        let allocator = Arc::new(BlockAllocator::new(64));
        let mut writer = segment(&allocator);
        let addr = writer.create(1_600_000_000).unwrap();

        let mut collector =
            SegmentCollector::new(4, Duration::ZERO, segment(&allocator));
        collector.collect(addr);
        assert_eq!(collector.pending(), 1);

        assert_eq!(collector.free_expired(), 1);
        assert_eq!(collector.pending(), 0);
        assert_eq!(allocator.outstanding_blocks(), 0);
    }

    #[test]
    fn unexpired_entries_stay_queued() {
        let allocator = Arc::new(BlockAllocator::new(64));
        let mut writer = segment(&allocator);
        let addr = writer.create(1_600_000_000).unwrap();

        let mut collector =
            SegmentCollector::new(4, Duration::from_secs(3600), segment(&allocator));
        collector.collect(addr);
        assert_eq!(collector.free_expired(), 0);
        assert_eq!(collector.pending(), 1);
        assert_eq!(allocator.outstanding_blocks(), 1);
    }

    #[test]
    fn overflow_frees_oldest_synchronously() {
        let allocator = Arc::new(BlockAllocator::new(64));
        let mut writer = segment(&allocator);
        let first = writer.create(1_600_000_000).unwrap();
        let second = writer.create(1_600_007_200).unwrap();
        let third = writer.create(1_600_014_400).unwrap();

        let mut collector =
            SegmentCollector::new(2, Duration::from_secs(3600), segment(&allocator));
        collector.collect(first);
        collector.collect(second);
        assert_eq!(allocator.outstanding_blocks(), 3);

        // Third enqueue evicts and frees the first segment.
        collector.collect(third);
        assert_eq!(collector.pending(), 2);
        assert_eq!(allocator.outstanding_blocks(), 2);
    }
}
