//! Error types for segment and encoder operations.

use thiserror::Error;

/// Errors surfaced by segment, encoder, and collector operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SegmentError {
    /// The block allocator could not provide a new block. Recoverable: the
    /// current sample is aborted and the cursor left unchanged, so the caller
    /// may retry the same sample or discard the segment.
    #[error("block allocation failed")]
    AllocationFailed,

    /// A read crossed into a block whose next pointer was zero. The segment
    /// is corrupt and must be discarded.
    #[error("unexpected end of stream: next block address is zero")]
    UnexpectedEndOfStream,

    /// Bit width outside `1..=64` for writes or `0..=64` for reads.
    #[error("invalid bit width {width}: expected {min}..={max}")]
    InvalidBitWidth {
        width: u32,
        min: u32,
        max: u32,
    },

    /// A read was attempted without entering read mode via `reset_cursor`.
    #[error("segment is not in read mode; call reset_cursor() first")]
    NotInReadMode,

    /// A write was attempted while the segment was in read mode. Re-open the
    /// segment to resume writing.
    #[error("segment is not in write mode; re-open the segment")]
    NotInWriteMode,

    /// A destination buffer was too small for the decoded data.
    #[error("buffer too small: need {needed} slots, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

/// Convenience alias for results carrying a [`SegmentError`].
pub type Result<T> = std::result::Result<T, SegmentError>;
