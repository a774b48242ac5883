//! The segment: a chain of fixed-size blocks holding one series' bit stream.
//!
//! Block 0 carries a 40-byte header overlaid on the chain's next pointer; the
//! payload bit stream starts at bit 320 of block 0 and at bit 64 of every
//! later block. The header persists everything a write session needs to
//! resume: the tail block address, the bit cursor, the last sample's
//! timestamp, delta and raw value, and the XOR window's leading/trailing zero
//! counts. The dirty and out-of-order flags ride the high bits of the two
//! zero-count bytes.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::block::{BlockAllocator, ByteView, WordView};
use crate::constants::{
    BIT_INDEX_OFFSET, CURRENT_BLOCK_OFFSET, DIRTY_FLAG, GORILLA_LOSSLESS_SECONDS,
    GORILLA_LOSSY_SECONDS, HEADER_BITS, HEADER_BYTES, LAST_LEADING_ZEROS_OFFSET,
    LAST_TIMESTAMP_DELTA_OFFSET, LAST_TIMESTAMP_OFFSET, LAST_TRAILING_ZEROS_OFFSET,
    LAST_VALUE_OFFSET, NEXT_BLOCK_OFFSET,
    NEXT_POINTER_BITS, NEXT_POINTER_BYTES, NUM_DATA_POINTS_OFFSET, OOO_FLAG, SEGMENT_TIME_OFFSET,
    TWO_BYTE_FLAG, ZEROS_MASK,
};
use crate::error::{Result, SegmentError};
use crate::metrics::SegmentMetrics;

/// A handle over one segment's block chain.
///
/// The handle is a flyweight: `create` and `open` rebind it to a segment
/// address, and a single handle is reused across many segments over its
/// lifetime. A segment is owned by exactly one writer or one reader at a
/// time; the handle is not internally synchronized.
///
/// After [`free`](Self::free) the handle is unbound and must be given a new
/// segment via [`create`](Self::create) or [`open`](Self::open) before any
/// other call.
pub struct Segment {
    header: ByteView,
    data: WordView,
    allocator: Arc<BlockAllocator>,
    block_size_bytes: usize,
    block_size_words: usize,
    block_size_bits: usize,
    bit_index: usize,
    dirty: bool,
    ooo: bool,
    read_mode: bool,
    /// Live blocks allocated through this handle, for gauge reporting.
    block_count: i64,
    metrics: SegmentMetrics,
}

impl Segment {
    /// Create an unbound handle drawing blocks from `allocator`.
    #[must_use]
    pub fn new(allocator: Arc<BlockAllocator>, metrics: SegmentMetrics) -> Self {
        let block_size_bytes = allocator.block_size();
        Self {
            header: ByteView::unbound(),
            data: WordView::unbound(),
            block_size_bytes,
            block_size_words: block_size_bytes / 8,
            block_size_bits: block_size_bytes * 8,
            allocator,
            bit_index: 0,
            dirty: false,
            ooo: false,
            read_mode: false,
            block_count: 0,
            metrics,
        }
    }

    /// Address of the currently bound segment.
    #[inline]
    #[must_use]
    pub fn address(&self) -> u64 {
        self.header.address()
    }

    /// Allocate block 0, write the initial header, and bind the handle to
    /// the new segment. Returns the segment's address.
    ///
    /// # Errors
    /// [`SegmentError::AllocationFailed`] when no block can be allocated.
    pub fn create(&mut self, segment_time: i32) -> Result<u64> {
        let address = self.allocator.malloc()?;

        // Block 0 serves as header and first data block; the byte and word
        // views are bound to the same region.
        self.header.bind(address, self.block_size_bytes);
        self.data.bind(address, self.block_size_words);

        self.header.set_i32(SEGMENT_TIME_OFFSET, segment_time);
        self.header.set_i32(LAST_TIMESTAMP_OFFSET, segment_time);
        self.header.set_u64(CURRENT_BLOCK_OFFSET, address);
        self.bit_index = HEADER_BITS;
        self.header.set_u16(BIT_INDEX_OFFSET, HEADER_BITS as u16);

        self.block_count += 1;
        self.dirty = false;
        self.ooo = false;
        self.read_mode = false;
        debug!(address, segment_time, "created segment");
        Ok(address)
    }

    /// Bind the handle to an existing segment, restoring the cursor and the
    /// dirty/out-of-order flags from the persisted header.
    pub fn open(&mut self, address: u64) {
        self.header.bind(address, self.block_size_bytes);

        self.dirty = self.header.get_u8(LAST_LEADING_ZEROS_OFFSET) & DIRTY_FLAG != 0;
        self.ooo = self.header.get_u8(LAST_TRAILING_ZEROS_OFFSET) & OOO_FLAG != 0;

        let current = self.header.get_u64(CURRENT_BLOCK_OFFSET);
        self.data.bind(current, self.block_size_words);
        self.bit_index = usize::from(self.header.get_u16(BIT_INDEX_OFFSET));
        self.read_mode = false;
    }

    /// Append the low `bits` bits of `value`, MSB first, at the cursor,
    /// growing the chain when the current block fills up.
    ///
    /// # Errors
    /// [`SegmentError::NotInWriteMode`] after `reset_cursor`,
    /// [`SegmentError::InvalidBitWidth`] outside `1..=64`, and
    /// [`SegmentError::AllocationFailed`] when a new block is needed but
    /// cannot be allocated (the cursor is left unchanged in that case).
    pub fn write_data(&mut self, value: u64, bits: u32) -> Result<()> {
        if self.read_mode {
            return Err(SegmentError::NotInWriteMode);
        }
        if !(1..=64).contains(&bits) {
            return Err(SegmentError::InvalidBitWidth {
                width: bits,
                min: 1,
                max: 64,
            });
        }

        if !self.dirty {
            let lead = self.header.get_u8(LAST_LEADING_ZEROS_OFFSET) | DIRTY_FLAG;
            self.header.set_u8(LAST_LEADING_ZEROS_OFFSET, lead);
            self.dirty = true;
        }

        let mut word_index = self.bit_index / 64;
        let shift = (self.bit_index % 64) as u32;

        let aligned = (value << (64 - bits)) >> shift;
        let current = self.data.get(word_index);
        self.data.set(word_index, current | aligned);

        let mut spill = shift + bits;
        if spill >= 64 {
            let mut block_added = false;
            if self.bit_index + bits as usize >= self.block_size_bits {
                let next = self.allocator.malloc()?;
                // Thread the new block into the chain before moving to it.
                self.data.set(NEXT_BLOCK_OFFSET, next);
                self.data.bind(next, self.block_size_words);
                self.header.set_u64(CURRENT_BLOCK_OFFSET, next);
                self.block_count += 1;
                self.bit_index = NEXT_POINTER_BITS;
                word_index = 0;
                block_added = true;
                trace!(next, "segment chain grew");
            }
            spill -= 64;
            word_index += 1;
            if spill != 0 {
                let carry = value << (64 - spill);
                let current = self.data.get(word_index);
                self.data.set(word_index, current | carry);
            }
            self.bit_index += spill as usize;
            if !block_added {
                self.bit_index += (bits - spill) as usize;
            }
        } else {
            self.bit_index += bits as usize;
        }
        Ok(())
    }

    /// Consume `bits` bits from the cursor, MSB first, zero-extended,
    /// following the chain's next pointers across block boundaries.
    ///
    /// # Errors
    /// [`SegmentError::NotInReadMode`] unless `reset_cursor` was called
    /// since the last write, [`SegmentError::InvalidBitWidth`] above 64, and
    /// [`SegmentError::UnexpectedEndOfStream`] on a zero next pointer.
    pub fn read_data(&mut self, bits: u32) -> Result<u64> {
        if !self.read_mode {
            return Err(SegmentError::NotInReadMode);
        }
        if bits > 64 {
            return Err(SegmentError::InvalidBitWidth {
                width: bits,
                min: 0,
                max: 64,
            });
        }
        if bits == 0 {
            return Ok(0);
        }

        let mut word_index = self.bit_index / 64;
        let shift = (self.bit_index % 64) as u32;

        if 64 - shift > bits {
            let result = (self.data.get(word_index) << shift) >> (64 - bits);
            self.bit_index += bits as usize;
            return Ok(result);
        }

        // The value straddles a word boundary, and possibly a block boundary.
        let mut result = (self.data.get(word_index) << shift) >> shift;
        let mut spill = shift + bits;
        let mut moved_block = false;
        if self.bit_index + bits as usize >= self.block_size_bits {
            let next = self.data.get(NEXT_BLOCK_OFFSET);
            if next == 0 {
                return Err(SegmentError::UnexpectedEndOfStream);
            }
            self.data.bind(next, self.block_size_words);
            self.bit_index = NEXT_POINTER_BITS;
            word_index = 0;
            moved_block = true;
        }
        spill -= 64;
        word_index += 1;
        if spill != 0 {
            result = (result << spill) | (self.data.get(word_index) >> (64 - spill));
        }
        self.bit_index += spill as usize;
        if !moved_block {
            self.bit_index += (bits - spill) as usize;
        }
        Ok(result)
    }

    /// Rebind the data view to block 0 and enter read mode.
    pub fn reset_cursor(&mut self) {
        self.data.bind(self.header.address(), self.block_size_words);
        self.bit_index = HEADER_BITS;
        self.read_mode = true;
    }

    /// `reset_cursor` plus rewinding the tail pointer to block 0; used
    /// before re-reading during serialization of a reopened segment.
    pub fn reset(&mut self) {
        self.reset_cursor();
        let first = self.header.address();
        self.header.set_u64(CURRENT_BLOCK_OFFSET, first);
    }

    /// Persist the in-memory bit cursor into the header.
    pub fn update_header(&mut self) {
        self.header.set_u16(BIT_INDEX_OFFSET, self.bit_index as u16);
    }

    /// Walk the chain from block 0 returning every block to the allocator.
    pub fn free(&mut self) {
        self.reset_cursor();
        let head = self.header.address();
        let mut next = self.data.get(NEXT_BLOCK_OFFSET);
        while next != 0 {
            self.data.bind(next, self.block_size_words);
            let after = self.data.get(NEXT_BLOCK_OFFSET);
            self.allocator.free(next);
            self.block_count -= 1;
            next = after;
        }
        self.allocator.free(head);
        self.block_count -= 1;
        debug!(address = head, "freed segment");
    }

    /// Whether bits have been written since the last `mark_flushed`.
    #[inline]
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether any sample arrived at or before the previous last timestamp.
    #[inline]
    #[must_use]
    pub fn has_dupes_or_out_of_order_data(&self) -> bool {
        self.ooo
    }

    /// Clear the dirty state, including its persisted header bit.
    pub fn mark_flushed(&mut self) {
        self.dirty = false;
        let lead = self.last_value_leading_zeros();
        self.header.set_u8(LAST_LEADING_ZEROS_OFFSET, lead);
    }

    #[inline]
    #[must_use]
    pub fn segment_time(&self) -> i32 {
        self.header.get_i32(SEGMENT_TIME_OFFSET)
    }

    #[inline]
    #[must_use]
    pub fn num_data_points(&self) -> u16 {
        self.header.get_u16(NUM_DATA_POINTS_OFFSET)
    }

    pub fn set_num_data_points(&mut self, count: u16) {
        self.header.set_u16(NUM_DATA_POINTS_OFFSET, count);
    }

    #[inline]
    #[must_use]
    pub fn last_timestamp(&self) -> i32 {
        self.header.get_i32(LAST_TIMESTAMP_OFFSET)
    }

    /// Update the last-seen timestamp. A timestamp at or before the current
    /// one trips the out-of-order flag, which is persisted immediately so it
    /// survives a reopen.
    pub fn set_last_timestamp(&mut self, timestamp: i32) {
        if !self.ooo && self.num_data_points() >= 1 && timestamp <= self.last_timestamp() {
            self.ooo = true;
            let trail = self.header.get_u8(LAST_TRAILING_ZEROS_OFFSET) | OOO_FLAG;
            self.header.set_u8(LAST_TRAILING_ZEROS_OFFSET, trail);
        }
        self.header.set_i32(LAST_TIMESTAMP_OFFSET, timestamp);
    }

    #[inline]
    #[must_use]
    pub fn last_value(&self) -> u64 {
        self.header.get_u64(LAST_VALUE_OFFSET)
    }

    pub fn set_last_value(&mut self, raw: u64) {
        self.header.set_u64(LAST_VALUE_OFFSET, raw);
    }

    #[inline]
    #[must_use]
    pub fn last_timestamp_delta(&self) -> i16 {
        self.header.get_u16(LAST_TIMESTAMP_DELTA_OFFSET) as i16
    }

    pub fn set_last_timestamp_delta(&mut self, delta: i16) {
        self.header.set_u16(LAST_TIMESTAMP_DELTA_OFFSET, delta as u16);
    }

    #[inline]
    #[must_use]
    pub fn last_value_leading_zeros(&self) -> u8 {
        self.header.get_u8(LAST_LEADING_ZEROS_OFFSET) & ZEROS_MASK
    }

    /// Store the XOR window's leading-zero count. The dirty flag bit rides
    /// along: this is only called mid write session.
    pub fn set_last_value_leading_zeros(&mut self, leading: u8) {
        self.header
            .set_u8(LAST_LEADING_ZEROS_OFFSET, leading | DIRTY_FLAG);
    }

    #[inline]
    #[must_use]
    pub fn last_value_trailing_zeros(&self) -> u8 {
        self.header.get_u8(LAST_TRAILING_ZEROS_OFFSET) & ZEROS_MASK
    }

    /// Store the XOR window's trailing-zero count, carrying the out-of-order
    /// flag in the high bit.
    pub fn set_last_value_trailing_zeros(&mut self, trailing: u8) {
        let mut encoded = trailing;
        if self.ooo {
            encoded |= OOO_FLAG;
        }
        self.header.set_u8(LAST_TRAILING_ZEROS_OFFSET, encoded);
    }

    /// Current bit cursor; used by the encoder to roll back an aborted
    /// sample.
    #[inline]
    #[must_use]
    pub(crate) fn bit_index(&self) -> usize {
        self.bit_index
    }

    pub(crate) fn restore_bit_index(&mut self, bit_index: usize) {
        self.bit_index = bit_index;
    }

    /// Push the current block accounting into the injected gauges.
    pub fn collect_metrics(&self) {
        self.metrics.memory_block_count.set(self.block_count);
        self.metrics
            .segment_length
            .set(self.block_count * self.block_size_bytes as i64);
    }

    /// Exact number of bytes [`serialize`](Self::serialize) writes when
    /// given a large enough buffer. Walks the chain with a local view; the
    /// segment's own cursor and header are untouched.
    #[must_use]
    pub fn serialization_length(&self) -> usize {
        let points = self.num_data_points();
        let mut bytes = 1 + if points <= 127 { 1 } else { 2 };

        let head = self.header.address();
        let tail_payload_end = self.bit_index.div_ceil(8);

        let mut walker = WordView::unbound();
        let mut address = head;
        while address != 0 {
            walker.bind(address, self.block_size_words);
            let next = walker.get(NEXT_BLOCK_OFFSET);
            let start = if address == head {
                HEADER_BYTES
            } else {
                NEXT_POINTER_BYTES
            };
            let end = if next == 0 {
                tail_payload_end
            } else {
                self.block_size_bytes
            };
            bytes += end.saturating_sub(start);
            address = next;
        }
        bytes
    }

    /// Serialize the segment into `buffer` starting at `offset`, writing at
    /// most `length` bytes: the type byte, the variable-width data point
    /// count, then the bit stream with next pointers removed. A buffer too
    /// small for the full form receives a truncated prefix.
    pub fn serialize(&self, buffer: &mut [u8], offset: usize, length: usize, lossy: bool) {
        let limit = buffer.len().min(offset + length);
        let mut index = offset;

        let push = |buffer: &mut [u8], index: &mut usize, byte: u8| {
            if *index < limit {
                buffer[*index] = byte;
                *index += 1;
            }
        };

        let encoding = if lossy {
            GORILLA_LOSSY_SECONDS
        } else {
            GORILLA_LOSSLESS_SECONDS
        };
        push(buffer, &mut index, encoding);

        let points = self.num_data_points();
        if points <= 127 {
            push(buffer, &mut index, points as u8);
        } else {
            push(buffer, &mut index, (points >> 8) as u8 | TWO_BYTE_FLAG);
            push(buffer, &mut index, points as u8);
        }

        let head = self.header.address();
        let tail_payload_end = self.bit_index.div_ceil(8);

        let mut walker = ByteView::unbound();
        let mut address = head;
        while address != 0 && index < limit {
            walker.bind(address, self.block_size_bytes);
            let next = walker.get_u64(NEXT_BLOCK_OFFSET);
            let start = if address == head {
                HEADER_BYTES
            } else {
                NEXT_POINTER_BYTES
            };
            let end = if next == 0 {
                tail_payload_end
            } else {
                self.block_size_bytes
            };
            let take = end.saturating_sub(start).min(limit - index);
            walker.read_bytes(start, &mut buffer[index..index + take]);
            index += take;
            address = next;
        }
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("address", &self.header.address())
            .field("bit_index", &self.bit_index)
            .field("dirty", &self.dirty)
            .field("ooo", &self.ooo)
            .field("read_mode", &self.read_mode)
            .field("block_count", &self.block_count)
            .finish()
    }
}
