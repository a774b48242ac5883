//! Off-heap block allocation and typed views.
//!
//! Segments are chains of equally sized raw memory blocks. Blocks are
//! allocated zero-initialized and addressed by their pointer value, an opaque
//! `u64` handle that is stable for the life of the block within a process.
//! Two cheap rebindable views expose the same region as a byte array and as
//! an array of 64-bit words; rebinding a view never allocates.
//!
//! All multi-byte accesses are big-endian so that the bit stream, which fills
//! words from the most significant bit down, serializes to bytes by plain
//! copy.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::sync::atomic::{AtomicI64, Ordering};

use tracing::trace;

use crate::error::{Result, SegmentError};

/// Fixed-size block allocator over the global allocator.
///
/// Thread-safe: any number of segments may allocate and free concurrently.
/// Each block is owned by exactly one segment chain; the allocator only
/// tracks the outstanding count for accounting.
#[derive(Debug)]
pub struct BlockAllocator {
    block_size: usize,
    outstanding: AtomicI64,
}

impl BlockAllocator {
    /// Create an allocator handing out blocks of `block_size` bytes.
    ///
    /// # Panics
    /// Panics if `block_size` is not a power of two, not a multiple of 8, or
    /// larger than [`crate::constants::MAX_BLOCK_SIZE_BYTES`].
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        assert!(
            block_size.is_power_of_two() && block_size % 8 == 0,
            "block size {block_size} must be a power of two and a multiple of 8"
        );
        assert!(
            (64..=crate::constants::MAX_BLOCK_SIZE_BYTES).contains(&block_size),
            "block size {block_size} out of supported range"
        );
        Self {
            block_size,
            outstanding: AtomicI64::new(0),
        }
    }

    /// Size of every block in bytes.
    #[inline]
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Size of every block in 64-bit words.
    #[inline]
    #[must_use]
    pub fn block_words(&self) -> usize {
        self.block_size / 8
    }

    /// Number of blocks currently allocated and not yet freed.
    #[must_use]
    pub fn outstanding_blocks(&self) -> i64 {
        self.outstanding.load(Ordering::Relaxed)
    }

    /// Allocate a zero-initialized block, returning its address.
    ///
    /// # Errors
    /// [`SegmentError::AllocationFailed`] when the underlying allocator
    /// returns null.
    pub fn malloc(&self) -> Result<u64> {
        // Word alignment is all the views need; accesses are unaligned-safe.
        let layout = self.layout();
        // SAFETY: layout has non-zero size (block_size >= 64).
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(SegmentError::AllocationFailed);
        }
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        let address = ptr as u64;
        trace!(address, size = self.block_size, "allocated block");
        Ok(address)
    }

    /// Return a block to the allocator.
    ///
    /// # Safety contract
    /// `address` must have come from [`malloc`](Self::malloc) on this
    /// allocator and must not be used afterwards.
    pub fn free(&self, address: u64) {
        debug_assert!(address != 0, "freeing the null address");
        // SAFETY: by contract the address was returned by malloc with the
        // same layout and has not been freed yet.
        unsafe { dealloc(address as *mut u8, self.layout()) };
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        trace!(address, "freed block");
    }

    #[inline]
    fn layout(&self) -> Layout {
        // block_size is a power of two >= 64, so this cannot fail.
        Layout::from_size_align(self.block_size, 8).expect("valid block layout")
    }
}

/// Byte-granular view over a block.
///
/// A view is a handle, not an owner: it can be rebound to another block at
/// any time and dropping it leaves the block alive. All offsets are bounds
/// checked in debug builds.
#[derive(Debug)]
pub struct ByteView {
    ptr: *mut u8,
    len: usize,
}

impl ByteView {
    /// A view bound to nothing; any access before `bind` is a programmer
    /// error caught by debug assertions.
    #[must_use]
    pub fn unbound() -> Self {
        Self {
            ptr: std::ptr::null_mut(),
            len: 0,
        }
    }

    /// Rebind the view to the block at `address`.
    pub fn bind(&mut self, address: u64, len: usize) {
        debug_assert!(address != 0, "binding to the null address");
        self.ptr = address as *mut u8;
        self.len = len;
    }

    /// Address of the bound block.
    #[inline]
    #[must_use]
    pub fn address(&self) -> u64 {
        self.ptr as u64
    }

    #[inline]
    fn check(&self, offset: usize, width: usize) {
        debug_assert!(!self.ptr.is_null(), "view is unbound");
        debug_assert!(
            offset + width <= self.len,
            "offset {offset}+{width} out of range for block of {} bytes",
            self.len
        );
    }

    #[inline]
    #[must_use]
    pub fn get_u8(&self, offset: usize) -> u8 {
        self.check(offset, 1);
        // SAFETY: the view is bound to a live block of at least `len` bytes.
        unsafe { self.ptr.add(offset).read() }
    }

    #[inline]
    pub fn set_u8(&mut self, offset: usize, value: u8) {
        self.check(offset, 1);
        // SAFETY: as get_u8, and the segment owns the block exclusively.
        unsafe { self.ptr.add(offset).write(value) };
    }

    #[inline]
    #[must_use]
    pub fn get_u16(&self, offset: usize) -> u16 {
        self.check(offset, 2);
        let mut raw = [0u8; 2];
        // SAFETY: bounds checked above; regions cannot overlap.
        unsafe { std::ptr::copy_nonoverlapping(self.ptr.add(offset), raw.as_mut_ptr(), 2) };
        u16::from_be_bytes(raw)
    }

    #[inline]
    pub fn set_u16(&mut self, offset: usize, value: u16) {
        self.check(offset, 2);
        let raw = value.to_be_bytes();
        // SAFETY: bounds checked above; regions cannot overlap.
        unsafe { std::ptr::copy_nonoverlapping(raw.as_ptr(), self.ptr.add(offset), 2) };
    }

    #[inline]
    #[must_use]
    pub fn get_i32(&self, offset: usize) -> i32 {
        self.check(offset, 4);
        let mut raw = [0u8; 4];
        // SAFETY: bounds checked above; regions cannot overlap.
        unsafe { std::ptr::copy_nonoverlapping(self.ptr.add(offset), raw.as_mut_ptr(), 4) };
        i32::from_be_bytes(raw)
    }

    #[inline]
    pub fn set_i32(&mut self, offset: usize, value: i32) {
        self.check(offset, 4);
        let raw = value.to_be_bytes();
        // SAFETY: bounds checked above; regions cannot overlap.
        unsafe { std::ptr::copy_nonoverlapping(raw.as_ptr(), self.ptr.add(offset), 4) };
    }

    #[inline]
    #[must_use]
    pub fn get_u64(&self, offset: usize) -> u64 {
        self.check(offset, 8);
        let mut raw = [0u8; 8];
        // SAFETY: bounds checked above; regions cannot overlap.
        unsafe { std::ptr::copy_nonoverlapping(self.ptr.add(offset), raw.as_mut_ptr(), 8) };
        u64::from_be_bytes(raw)
    }

    #[inline]
    pub fn set_u64(&mut self, offset: usize, value: u64) {
        self.check(offset, 8);
        let raw = value.to_be_bytes();
        // SAFETY: bounds checked above; regions cannot overlap.
        unsafe { std::ptr::copy_nonoverlapping(raw.as_ptr(), self.ptr.add(offset), 8) };
    }

    /// Bulk-copy `dst.len()` bytes starting at `offset` into `dst`.
    pub fn read_bytes(&self, offset: usize, dst: &mut [u8]) {
        self.check(offset, dst.len());
        // SAFETY: bounds checked above; dst is a distinct allocation.
        unsafe { std::ptr::copy_nonoverlapping(self.ptr.add(offset), dst.as_mut_ptr(), dst.len()) };
    }
}

/// 64-bit-word view over a block, indexed by word.
#[derive(Debug)]
pub struct WordView {
    ptr: *mut u8,
    words: usize,
}

impl WordView {
    /// A view bound to nothing.
    #[must_use]
    pub fn unbound() -> Self {
        Self {
            ptr: std::ptr::null_mut(),
            words: 0,
        }
    }

    /// Rebind the view to the block at `address`.
    pub fn bind(&mut self, address: u64, words: usize) {
        debug_assert!(address != 0, "binding to the null address");
        self.ptr = address as *mut u8;
        self.words = words;
    }

    /// Address of the bound block.
    #[inline]
    #[must_use]
    pub fn address(&self) -> u64 {
        self.ptr as u64
    }

    #[inline]
    fn check(&self, index: usize) {
        debug_assert!(!self.ptr.is_null(), "view is unbound");
        debug_assert!(
            index < self.words,
            "word index {index} out of range for block of {} words",
            self.words
        );
    }

    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> u64 {
        self.check(index);
        let mut raw = [0u8; 8];
        // SAFETY: bounds checked above; regions cannot overlap.
        unsafe { std::ptr::copy_nonoverlapping(self.ptr.add(index * 8), raw.as_mut_ptr(), 8) };
        u64::from_be_bytes(raw)
    }

    #[inline]
    pub fn set(&mut self, index: usize, value: u64) {
        self.check(index);
        let raw = value.to_be_bytes();
        // SAFETY: bounds checked above; regions cannot overlap.
        unsafe { std::ptr::copy_nonoverlapping(raw.as_ptr(), self.ptr.add(index * 8), 8) };
    }
}

// SAFETY: views are plain (pointer, length) handles. Cross-thread use is
// governed by the segment ownership rules: one writer or one reader at a
// time, handed off with a happens-before barrier.
unsafe impl Send for ByteView {}
unsafe impl Send for WordView {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malloc_zeroes_and_free_restores_count() {
        let alloc = BlockAllocator::new(64);
        let before = alloc.outstanding_blocks();
        let addr = alloc.malloc().unwrap();
        assert_eq!(alloc.outstanding_blocks(), before + 1);

        let view = {
            let mut v = ByteView::unbound();
            v.bind(addr, 64);
            v
        };
        for offset in 0..64 {
            assert_eq!(view.get_u8(offset), 0);
        }

        alloc.free(addr);
        assert_eq!(alloc.outstanding_blocks(), before);
    }

    #[test]
    fn typed_accessors_round_trip() {
        let alloc = BlockAllocator::new(64);
        let addr = alloc.malloc().unwrap();

        let mut bytes = ByteView::unbound();
        bytes.bind(addr, 64);
        bytes.set_u8(39, 0xAB);
        bytes.set_u16(34, 0x1234);
        bytes.set_i32(8, -1_600_000_000);
        bytes.set_u64(24, 0xDEAD_BEEF_CAFE_BABE);
        assert_eq!(bytes.get_u8(39), 0xAB);
        assert_eq!(bytes.get_u16(34), 0x1234);
        assert_eq!(bytes.get_i32(8), -1_600_000_000);
        assert_eq!(bytes.get_u64(24), 0xDEAD_BEEF_CAFE_BABE);

        // Unaligned long within the header region.
        bytes.set_u64(12, 0x0102_0304_0506_0708);
        assert_eq!(bytes.get_u64(12), 0x0102_0304_0506_0708);

        alloc.free(addr);
    }

    #[test]
    fn word_view_matches_byte_view_big_endian() {
        let alloc = BlockAllocator::new(64);
        let addr = alloc.malloc().unwrap();

        let mut words = WordView::unbound();
        words.bind(addr, 8);
        words.set(2, 0x1122_3344_5566_7788);

        let mut bytes = ByteView::unbound();
        bytes.bind(addr, 64);
        assert_eq!(bytes.get_u8(16), 0x11);
        assert_eq!(bytes.get_u8(23), 0x88);
        assert_eq!(words.get(2), 0x1122_3344_5566_7788);

        alloc.free(addr);
    }
}
