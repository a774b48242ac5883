//! `blockrun` - Off-heap time-series segment store with Gorilla compression
//!
//! A bit-packed segment codec for in-memory time-series storage. Samples for
//! one series and one time window (typically two hours) are appended into a
//! chain of fixed-size raw memory blocks, compressed with delta-of-delta
//! timestamps and XOR-encoded values, and later read back in place or
//! serialized for flushing to colder storage.
//!
//! # Features
//! - **High compression**: regular series cost ~1-2 bits per timestamp and a
//!   handful of bits per value
//! - **O(1) append**: new samples extend the bit stream without re-encoding
//! - **In-place read-back**: decode straight out of the block chain,
//!   including last-writer-wins deduplication into a per-second buffer
//! - **Reopenable**: every piece of carried state lives in the segment
//!   header, so a write session can resume from a bare address
//!
//! # Example
//! ```
//! use blockrun::{EncoderConfig, GorillaEncoderFactory, SegmentMetrics};
//!
//! let factory = GorillaEncoderFactory::new(EncoderConfig::default(), SegmentMetrics::noop());
//! let mut encoder = factory.create();
//!
//! let segment_time = 1_600_000_000;
//! let address = encoder.create_segment(segment_time).unwrap();
//!
//! encoder.add_data_point(segment_time, 42.0).unwrap();
//! encoder.add_data_point(segment_time + 60, 42.5).unwrap();
//! encoder.update_header();
//!
//! let mut points = Vec::new();
//! encoder.read(|ts, value| points.push((ts, value))).unwrap();
//! assert_eq!(points, vec![(segment_time, 42.0), (segment_time + 60, 42.5)]);
//!
//! // Serialize for flushing, then retire the segment.
//! let mut buf = vec![0u8; encoder.serialization_length()];
//! let len = buf.len();
//! encoder.serialize(&mut buf, 0, len);
//! encoder.free_segment();
//! # let _ = address;
//! ```
//!
//! # Memory layout
//!
//! Each block holds the address of its successor in its first 8 bytes (zero
//! terminates the chain). Block 0 additionally carries a 40-byte header:
//! segment time, tail block address, last timestamp/delta/value, data point
//! count, bit cursor, and the XOR window's leading/trailing zero counts with
//! the dirty and out-of-order flags in their high bits. The payload bit
//! stream starts at bit 320 of block 0 and bit 64 of every later block.
//!
//! Segment addresses are opaque `u64` handles, stable for the life of the
//! segment within one process and never valid across restarts.
//!
//! # Concurrency
//!
//! Encoders and segments are single-writer, single-reader, and not
//! internally synchronized; ownership hand-off needs a happens-before
//! barrier. The block allocator and the gauge sinks are thread-safe.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

pub mod block;
pub mod collector;
pub mod constants;
pub mod encoder;
pub mod error;
pub mod factory;
pub mod metrics;
pub mod segment;

pub use block::BlockAllocator;
pub use collector::SegmentCollector;
pub use encoder::GorillaEncoder;
pub use error::{Result, SegmentError};
pub use factory::{EncoderConfig, GorillaEncoderFactory};
pub use metrics::{AtomicGauge, Gauge, NoopGauge, SegmentMetrics};
pub use segment::Segment;

#[cfg(test)]
mod tests;
