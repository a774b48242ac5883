//! Gorilla compression over a segment's bit stream.
//!
//! Timestamps are stored as delta-of-delta with variable-length control
//! prefixes; values as XOR against the previous value with a reusable
//! leading/trailing-zero window. All carried state lives in the segment
//! header, so a reopened segment resumes exactly where the last session
//! left off.

use crate::collector::SegmentCollector;
use crate::constants::{FIRST_DELTA_BITS, LOSSY_MANTISSA_MASK};
use crate::error::{Result, SegmentError};
use crate::segment::Segment;

/// Sentinel leading-zero count meaning "no XOR window established yet".
const NO_WINDOW: u8 = 64;

/// Leading zeros are stored in 5 bits, so counts above 31 widen the window
/// instead.
const MAX_STORED_LEADING: u8 = 31;

/// Encoder/decoder for one segment at a time.
///
/// Like the segment handle it wraps, the encoder is a flyweight that is
/// rebound with [`create_segment`](Self::create_segment) and
/// [`open_segment`](Self::open_segment). It is single-writer single-reader
/// and not internally synchronized.
pub struct GorillaEncoder {
    segment: Segment,
    collector: SegmentCollector,
    lossy: bool,
}

impl GorillaEncoder {
    /// Wrap a segment handle. `lossy` enables mantissa truncation at encode
    /// time and is advertised in the serialized type byte.
    #[must_use]
    pub fn new(lossy: bool, segment: Segment, collector: SegmentCollector) -> Self {
        Self {
            segment,
            collector,
            lossy,
        }
    }

    /// Whether this encoder truncates mantissas before encoding.
    #[inline]
    #[must_use]
    pub fn is_lossy(&self) -> bool {
        self.lossy
    }

    /// Address of the currently bound segment.
    #[inline]
    #[must_use]
    pub fn segment_address(&self) -> u64 {
        self.segment.address()
    }

    /// Create a fresh segment for the window starting at `segment_time` and
    /// bind the encoder to it.
    ///
    /// # Errors
    /// [`SegmentError::AllocationFailed`] when block 0 cannot be allocated.
    pub fn create_segment(&mut self, segment_time: i32) -> Result<u64> {
        self.segment.create(segment_time)
    }

    /// Bind the encoder to an existing segment for a new write session.
    pub fn open_segment(&mut self, address: u64) {
        self.segment.open(address);
    }

    /// Append one `(timestamp, value)` sample.
    ///
    /// # Errors
    /// [`SegmentError::AllocationFailed`] when the chain cannot grow; the
    /// cursor and point count are left unchanged so the identical sample may
    /// be retried. [`SegmentError::NotInWriteMode`] after `read` until the
    /// segment is reopened.
    pub fn add_data_point(&mut self, timestamp: i32, value: f64) -> Result<()> {
        let mut raw = value.to_bits();
        if self.lossy {
            raw &= LOSSY_MANTISSA_MASK;
        }

        let points = self.segment.num_data_points();
        let checkpoint = self.segment.bit_index();

        if points == 0 {
            let delta = timestamp.wrapping_sub(self.segment.segment_time());
            if let Err(e) = self.write_first(delta, raw) {
                self.segment.restore_bit_index(checkpoint);
                return Err(e);
            }
            self.segment.set_last_timestamp(timestamp);
            self.segment.set_last_timestamp_delta(delta as i16);
            self.segment.set_last_value(raw);
            self.segment.set_last_value_leading_zeros(NO_WINDOW);
            self.segment.set_last_value_trailing_zeros(0);
            self.segment.set_num_data_points(1);
            return Ok(());
        }

        let delta = timestamp.wrapping_sub(self.segment.last_timestamp());
        let prev_value = self.segment.last_value();
        if let Err(e) = self.write_sample(delta, raw, prev_value) {
            self.segment.restore_bit_index(checkpoint);
            return Err(e);
        }

        // Header state is only touched once the bits are down, so an aborted
        // sample leaves the carried state consistent for a retry. The
        // timestamp setter trips the out-of-order flag against the previous
        // last timestamp.
        self.segment.set_last_timestamp(timestamp);
        self.segment.set_last_timestamp_delta(delta as i16);
        self.segment.set_last_value(raw);
        self.segment.set_num_data_points(points + 1);
        Ok(())
    }

    fn write_first(&mut self, delta: i32, raw: u64) -> Result<()> {
        self.segment
            .write_data(u64::from(delta as u32) & 0x3FFF, FIRST_DELTA_BITS)?;
        self.segment.write_data(raw, 64)
    }

    fn write_sample(&mut self, delta: i32, raw: u64, prev_value: u64) -> Result<()> {
        let dod = i64::from(delta) - i64::from(self.segment.last_timestamp_delta());
        self.write_delta_of_delta(dod)?;

        let xor = raw ^ prev_value;
        if xor == 0 {
            return self.segment.write_data(0, 1);
        }
        self.segment.write_data(1, 1)?;

        let prev_leading = self.segment.last_value_leading_zeros();
        let prev_trailing = self.segment.last_value_trailing_zeros();
        let leading = xor.leading_zeros() as u8;
        let trailing = xor.trailing_zeros() as u8;

        if prev_leading != NO_WINDOW && leading >= prev_leading && trailing >= prev_trailing {
            // The meaningful bits fit the previous window; reuse it.
            self.segment.write_data(0, 1)?;
            let meaningful = 64 - u32::from(prev_leading) - u32::from(prev_trailing);
            self.segment.write_data(xor >> prev_trailing, meaningful)
        } else {
            let stored_leading = leading.min(MAX_STORED_LEADING);
            let meaningful = 64 - u32::from(stored_leading) - u32::from(trailing);
            self.segment.write_data(1, 1)?;
            self.segment.write_data(u64::from(stored_leading), 5)?;
            // A full 64-bit window is stored as 0 in the 6-bit length field.
            self.segment.write_data(u64::from(meaningful as u8) & 0x3F, 6)?;
            self.segment.write_data(xor >> trailing, meaningful)?;
            self.segment.set_last_value_leading_zeros(stored_leading);
            self.segment.set_last_value_trailing_zeros(trailing);
            Ok(())
        }
    }

    /// Control prefixes from the Gorilla paper. Payloads are two's
    /// complement truncated to the bucket width; each bucket's range is
    /// asymmetric, giving the all-high payload to the positive bound.
    fn write_delta_of_delta(&mut self, dod: i64) -> Result<()> {
        if dod == 0 {
            self.segment.write_data(0, 1)
        } else if (-63..=64).contains(&dod) {
            self.segment
                .write_data((0b10 << 7) | (dod as u64 & 0x7F), 9)
        } else if (-255..=256).contains(&dod) {
            self.segment
                .write_data((0b110 << 9) | (dod as u64 & 0x1FF), 12)
        } else if (-2047..=2048).contains(&dod) {
            self.segment
                .write_data((0b1110 << 12) | (dod as u64 & 0xFFF), 16)
        } else {
            self.segment
                .write_data((0b1111 << 32) | (dod as u64 & 0xFFFF_FFFF), 36)
        }
    }

    fn read_delta_of_delta(&mut self) -> Result<i32> {
        if self.segment.read_data(1)? == 0 {
            return Ok(0);
        }
        if self.segment.read_data(1)? == 0 {
            return Ok(decode_bucket(self.segment.read_data(7)?, 7));
        }
        if self.segment.read_data(1)? == 0 {
            return Ok(decode_bucket(self.segment.read_data(9)?, 9));
        }
        if self.segment.read_data(1)? == 0 {
            return Ok(decode_bucket(self.segment.read_data(12)?, 12));
        }
        Ok(self.segment.read_data(32)? as u32 as i32)
    }

    /// Replay every decoded sample through `each`, in emission order.
    fn decode_each<F>(&mut self, mut each: F) -> Result<()>
    where
        F: FnMut(i32, f64) -> Result<()>,
    {
        let points = self.segment.num_data_points();
        if points == 0 {
            return Ok(());
        }
        self.segment.reset_cursor();

        let first_delta = self.segment.read_data(FIRST_DELTA_BITS)? as i32;
        let mut timestamp = self.segment.segment_time().wrapping_add(first_delta);
        let mut raw = self.segment.read_data(64)?;
        each(timestamp, f64::from_bits(raw))?;

        let mut delta = first_delta;
        let mut leading: u32 = u32::from(NO_WINDOW);
        let mut trailing: u32 = 0;

        for _ in 1..points {
            let dod = self.read_delta_of_delta()?;
            delta = delta.wrapping_add(dod);
            timestamp = timestamp.wrapping_add(delta);

            if self.segment.read_data(1)? == 1 {
                if self.segment.read_data(1)? == 1 {
                    leading = self.segment.read_data(5)? as u32;
                    let mut meaningful = self.segment.read_data(6)? as u32;
                    if meaningful == 0 {
                        meaningful = 64;
                    }
                    if leading + meaningful > 64 {
                        return Err(SegmentError::UnexpectedEndOfStream);
                    }
                    trailing = 64 - leading - meaningful;
                }
                let meaningful = 64 - leading - trailing;
                let bits = self.segment.read_data(meaningful)?;
                raw ^= bits << trailing;
            }
            each(timestamp, f64::from_bits(raw))?;
        }
        Ok(())
    }

    /// Decode the segment, yielding `(timestamp, value)` pairs to `consumer`
    /// in the order they were written. Enters read mode; the segment must be
    /// reopened before further writes.
    ///
    /// # Errors
    /// [`SegmentError::UnexpectedEndOfStream`] when the chain is corrupt.
    pub fn read<F>(&mut self, mut consumer: F) -> Result<()>
    where
        F: FnMut(i32, f64),
    {
        self.decode_each(|timestamp, value| {
            consumer(timestamp, value);
            Ok(())
        })
    }

    /// Decode the segment into `values`, indexed by offset from the segment
    /// time, overwriting earlier samples at the same second (last writer
    /// wins). `values` must span the whole segment window, e.g. 7200 slots
    /// for a two-hour segment. Returns the count of distinct slots written.
    ///
    /// # Errors
    /// [`SegmentError::BufferTooSmall`] when a decoded timestamp falls past
    /// the end of `values`; [`SegmentError::UnexpectedEndOfStream`] when the
    /// stream is corrupt (including timestamps before the segment time).
    pub fn read_and_dedupe(&mut self, values: &mut [f64]) -> Result<usize> {
        let segment_time = self.segment.segment_time();
        let available = values.len();
        let mut seen = vec![0u64; available.div_ceil(64)];
        let mut distinct = 0usize;

        self.decode_each(|timestamp, value| {
            let offset = timestamp.wrapping_sub(segment_time);
            if offset < 0 {
                return Err(SegmentError::UnexpectedEndOfStream);
            }
            let slot = offset as usize;
            if slot >= available {
                return Err(SegmentError::BufferTooSmall {
                    needed: slot + 1,
                    available,
                });
            }
            values[slot] = value;
            let (word, bit) = (slot / 64, slot % 64);
            if seen[word] & (1 << bit) == 0 {
                seen[word] |= 1 << bit;
                distinct += 1;
            }
            Ok(())
        })?;
        Ok(distinct)
    }

    /// Segment base timestamp in seconds.
    #[inline]
    #[must_use]
    pub fn segment_time(&self) -> i32 {
        self.segment.segment_time()
    }

    /// Number of samples written to the bound segment.
    #[inline]
    #[must_use]
    pub fn num_data_points(&self) -> usize {
        usize::from(self.segment.num_data_points())
    }

    #[inline]
    #[must_use]
    pub fn segment_is_dirty(&self) -> bool {
        self.segment.is_dirty()
    }

    #[inline]
    #[must_use]
    pub fn segment_has_out_of_order_or_duplicates(&self) -> bool {
        self.segment.has_dupes_or_out_of_order_data()
    }

    /// Clear the dirty flag after the segment's contents reached colder
    /// storage.
    pub fn mark_segment_flushed(&mut self) {
        self.segment.mark_flushed();
    }

    /// Persist the bit cursor so a later `open_segment` resumes correctly.
    pub fn update_header(&mut self) {
        self.segment.update_header();
    }

    /// Release every block of the bound segment immediately.
    pub fn free_segment(&mut self) {
        self.segment.free();
    }

    /// Queue a retired segment for deferred freeing.
    pub fn collect_segment(&mut self, address: u64) {
        self.collector.collect(address);
    }

    /// Free every queued segment older than the collection delay.
    pub fn free_collected_segments(&mut self) {
        self.collector.free_expired();
    }

    /// Exact serialized size of the bound segment in bytes.
    #[must_use]
    pub fn serialization_length(&self) -> usize {
        self.segment.serialization_length()
    }

    /// Serialize the bound segment; see [`Segment::serialize`]. The type
    /// byte reflects this encoder's lossy mode.
    pub fn serialize(&self, buffer: &mut [u8], offset: usize, length: usize) {
        self.segment.serialize(buffer, offset, length, self.lossy);
    }

    /// Push segment block accounting into the injected gauges.
    pub fn collect_metrics(&self) {
        self.segment.collect_metrics();
    }
}

/// Decode a `width`-bit two's complement payload whose bucket covers
/// `[-(2^(width-1) - 1), 2^(width-1)]`.
fn decode_bucket(payload: u64, width: u32) -> i32 {
    let top = 1i64 << (width - 1);
    let value = payload as i64;
    if value > top {
        (value - (1i64 << width)) as i32
    } else {
        value as i32
    }
}

#[cfg(test)]
mod tests {
    use super::decode_bucket;

    #[test]
    fn bucket_decoding_is_asymmetric() {
        // 7-bit bucket covers [-63, 64]: the all-high payload is +64.
        assert_eq!(decode_bucket(0, 7), 0);
        assert_eq!(decode_bucket(64, 7), 64);
        assert_eq!(decode_bucket(65, 7), -63);
        assert_eq!(decode_bucket(127, 7), -1);
        assert_eq!(decode_bucket(256, 9), 256);
        assert_eq!(decode_bucket(257, 9), -255);
        assert_eq!(decode_bucket(2048, 12), 2048);
        assert_eq!(decode_bucket(2049, 12), -2047);
    }
}
