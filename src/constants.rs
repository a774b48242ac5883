//! Internal constants shared by the segment and encoder.

/// Serialization type byte for the lossless seconds-resolution encoding.
/// Part of the cross-process flush contract; must never change.
pub const GORILLA_LOSSLESS_SECONDS: u8 = 0x01;

/// Serialization type byte for the lossy seconds-resolution encoding.
pub const GORILLA_LOSSY_SECONDS: u8 = 0x02;

/// Default size of a data block in bytes.
pub const DEFAULT_BLOCK_SIZE_BYTES: usize = 256;

/// Largest block size whose bit cursor still fits the 2-byte header field.
pub const MAX_BLOCK_SIZE_BYTES: usize = 8192;

// Header field byte offsets within block 0. The first 8 bytes double as the
// chain's next pointer, so the header proper starts at the segment time.
pub const NEXT_BLOCK_OFFSET: usize = 0;
pub const SEGMENT_TIME_OFFSET: usize = 8;
pub const CURRENT_BLOCK_OFFSET: usize = 12;
pub const LAST_TIMESTAMP_OFFSET: usize = 20;
pub const LAST_VALUE_OFFSET: usize = 24;
pub const NUM_DATA_POINTS_OFFSET: usize = 32;
pub const BIT_INDEX_OFFSET: usize = 34;
pub const LAST_TIMESTAMP_DELTA_OFFSET: usize = 36;
pub const LAST_LEADING_ZEROS_OFFSET: usize = 38;
pub const LAST_TRAILING_ZEROS_OFFSET: usize = 39;

/// Header length in 64-bit words; payload of block 0 starts after it.
pub const HEADER_WORDS: usize = 5;

/// Header length in bytes.
pub const HEADER_BYTES: usize = HEADER_WORDS * 8;

/// Bit offset of the payload within block 0.
pub const HEADER_BITS: usize = HEADER_WORDS * 64;

/// Bytes reserved for the next pointer at the head of every block.
pub const NEXT_POINTER_BYTES: usize = 8;

/// Bit offset of the payload within every block after the first.
pub const NEXT_POINTER_BITS: usize = NEXT_POINTER_BYTES * 8;

/// High bit of the leading-zeros byte: set while the segment has unflushed
/// writes. The count itself fits in the low 6 bits.
pub const DIRTY_FLAG: u8 = 0x80;

/// High bit of the trailing-zeros byte: set once an out-of-order or
/// duplicate timestamp has been written.
pub const OOO_FLAG: u8 = 0x80;

/// Mask recovering a zero count from its flag-carrying header byte.
pub const ZEROS_MASK: u8 = 0x7F;

/// High bit of the first count byte in the serialized form: set when the
/// data-point count occupies two bytes.
pub const TWO_BYTE_FLAG: u8 = 0x80;

/// Bits used for the first sample's timestamp offset from the segment base.
/// 14 bits cover a two-hour segment at one-second granularity.
pub const FIRST_DELTA_BITS: u32 = 14;

/// Clears the 13 least significant mantissa bits of an f64 bit pattern.
pub const LOSSY_MANTISSA_MASK: u64 = !0x1FFF;
