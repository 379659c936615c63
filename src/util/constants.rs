//! Word, page and bitmap geometry shared by every part of the collector.

use cfg_if::cfg_if;

/// log2 of the number of bits in a byte
pub const LOG_BITS_IN_BYTE: u8 = 3;
/// The number of bits in a byte
pub const BITS_IN_BYTE: usize = 1 << LOG_BITS_IN_BYTE;

/// log2 of the number of bytes in a kilobyte
pub const LOG_BYTES_IN_KBYTE: u8 = 10;
/// The number of bytes in a kilobyte
pub const BYTES_IN_KBYTE: usize = 1 << LOG_BYTES_IN_KBYTE;

/// log2 of the number of bytes in a megabyte
pub const LOG_BYTES_IN_MBYTE: u8 = 20;
/// The number of bytes in a megabyte
pub const BYTES_IN_MBYTE: usize = 1 << LOG_BYTES_IN_MBYTE;

cfg_if! {
    if #[cfg(target_pointer_width = "64")] {
        /// log2 of the number of bytes in an address
        pub const LOG_BYTES_IN_ADDRESS: u8 = 3;
    } else {
        /// log2 of the number of bytes in an address
        pub const LOG_BYTES_IN_ADDRESS: u8 = 2;
    }
}
/// The number of bytes in an address
pub const BYTES_IN_ADDRESS: usize = 1 << LOG_BYTES_IN_ADDRESS;

/// log2 of the number of bytes in a word
pub const LOG_BYTES_IN_WORD: u8 = LOG_BYTES_IN_ADDRESS;
/// The number of bytes in a word
pub const BYTES_IN_WORD: usize = 1 << LOG_BYTES_IN_WORD;
/// log2 of the number of bits in a word
pub const LOG_BITS_IN_WORD: usize = LOG_BITS_IN_BYTE as usize + LOG_BYTES_IN_WORD as usize;
/// The number of bits in a word
pub const BITS_IN_WORD: usize = 1 << LOG_BITS_IN_WORD;

/// log2 of the number of bytes in a heap page
pub const LOG_BYTES_IN_PAGE: u8 = 20;
/// The number of bytes in a heap page
pub const BYTES_IN_PAGE: usize = 1 << LOG_BYTES_IN_PAGE;
/// Mask selecting the offset of an address within its page
pub const PAGE_OFFSET_MASK: usize = BYTES_IN_PAGE - 1;

/// log2 of the number of mark bits in a bitmap cell
pub const LOG_BITS_IN_CELL: usize = 5;
/// The number of mark bits in a bitmap cell (one `u32`)
pub const BITS_IN_CELL: usize = 1 << LOG_BITS_IN_CELL;
/// Mask selecting the bit offset of a mark-bit index within its cell
pub const CELL_OFFSET_MASK: u32 = (BITS_IN_CELL - 1) as u32;

/// The number of bytes of object area covered by one bitmap cell.
pub const BYTES_PER_CELL: usize = BITS_IN_CELL << LOG_BYTES_IN_WORD;

/// log2 of the minimal object size in bytes. Objects are at least two words,
/// which is what guarantees that no two adjacent mark bits are ever both set.
pub const LOG_MIN_OBJECT_SIZE: u8 = LOG_BYTES_IN_WORD + 1;
/// The minimal object size in bytes
pub const MIN_OBJECT_SIZE: usize = 1 << LOG_MIN_OBJECT_SIZE;

/// Objects larger than this are allocated in the large-object space.
pub const MAX_OBJECT_SIZE_IN_PAGED_SPACE: usize = 64 * BYTES_IN_KBYTE;

/// Percentage of recoverable old-generation bytes above which the next
/// collection is a compacting one.
pub const FRAGMENTATION_LIMIT_PERCENT: usize = 15;
/// Absolute lower bound of recoverable bytes before compaction is armed.
pub const FRAGMENTATION_ALLOWED: usize = BYTES_IN_MBYTE;

/// How many collections newly compiled code survives before being flushed.
pub const CODE_AGE_THRESHOLD: usize = 5;

/// Slot ranges at least this long are visited recursively while marking, as
/// long as the recursion depth budget has not run out.
pub const MIN_RANGE_FOR_MARKING_RECURSION: usize = 64;

/// Depth bound standing in for the OS stack limit check of the recursive
/// marking fast path. Past this depth the slot visitor degrades to the purely
/// iterative scheme.
pub const MARKING_RECURSION_DEPTH_LIMIT: usize = 512;
