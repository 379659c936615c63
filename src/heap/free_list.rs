//! Free lists for the paged old spaces.
//!
//! The sweeper feeds whole free regions in; the allocator takes blocks back
//! out, splitting when a block is larger than the request. Every freed
//! region is also overwritten in place with a free encoding (a one-word
//! marker for single-word holes, or a marker plus a length word) so that a
//! linear object walk over a swept page can skip dead regions without
//! consulting anything but the heap itself. A region is either wholly freed
//! or wholly skipped; blocks are never split across the sweep decision.

use crate::util::constants::*;
use crate::util::Address;

/// Header word of a one-word free region.
pub const SINGLE_FREE_ENCODING: usize = 0b10;
/// Header word of a multi-word free region; the byte length follows in the
/// next word.
pub const MULTI_FREE_ENCODING: usize = 0b110;

// Both encodings are even (so never a tagged pointer) and far below any
// mapped address (so never a descriptor address in an object header).
static_assertions::const_assert!(SINGLE_FREE_ENCODING & 1 == 0);
static_assertions::const_assert!(MULTI_FREE_ENCODING & 1 == 0);

/// Stamp the free encoding over a freed region.
pub fn write_free_encoding(addr: Address, size: usize) {
    debug_assert!(size >= BYTES_IN_WORD && size % BYTES_IN_WORD == 0);
    unsafe {
        if size == BYTES_IN_WORD {
            addr.store::<usize>(SINGLE_FREE_ENCODING);
        } else {
            addr.store::<usize>(MULTI_FREE_ENCODING);
            (addr + BYTES_IN_WORD).store::<usize>(size);
        }
    }
}

/// If `addr` holds a free encoding, the byte size of the free region.
pub fn decode_free_size(addr: Address) -> Option<usize> {
    match unsafe { addr.load::<usize>() } {
        SINGLE_FREE_ENCODING => Some(BYTES_IN_WORD),
        MULTI_FREE_ENCODING => Some(unsafe { (addr + BYTES_IN_WORD).load::<usize>() }),
        _ => None,
    }
}

/// Word counts up to this size get an exact-fit bucket; larger blocks go on
/// the huge list.
const SMALL_BUCKET_WORDS: usize = 256;

pub struct FreeList {
    buckets: Vec<Vec<Address>>,
    huge: Vec<(Address, usize)>,
    available: usize,
}

impl FreeList {
    pub fn new() -> FreeList {
        FreeList {
            buckets: vec![Vec::new(); SMALL_BUCKET_WORDS],
            huge: Vec::new(),
            available: 0,
        }
    }

    /// Total bytes currently on the list.
    pub fn available(&self) -> usize {
        self.available
    }

    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.huge.clear();
        self.available = 0;
    }

    /// Add `[addr, addr + size)` to the list and stamp its encoding.
    pub fn free(&mut self, addr: Address, size: usize) {
        if size == 0 {
            return;
        }
        write_free_encoding(addr, size);
        let words = size >> LOG_BYTES_IN_WORD as usize;
        if words < SMALL_BUCKET_WORDS {
            self.buckets[words].push(addr);
        } else {
            self.huge.push((addr, size));
        }
        self.available += size;
    }

    /// Take a block of at least `size` bytes off the list. The remainder of
    /// an oversized block is re-freed, so the caller always gets exactly
    /// `size` usable bytes.
    pub fn allocate(&mut self, size: usize) -> Option<Address> {
        debug_assert!(size % BYTES_IN_WORD == 0);
        let words = size >> LOG_BYTES_IN_WORD as usize;

        // Exact fit first, then the smallest larger bucket. A split must
        // leave a remainder of at least one word, which every bucket > words
        // satisfies.
        let mut found: Option<(Address, usize)> = None;
        if words < SMALL_BUCKET_WORDS {
            for candidate_words in words..SMALL_BUCKET_WORDS {
                if let Some(addr) = self.buckets[candidate_words].pop() {
                    found = Some((addr, candidate_words << LOG_BYTES_IN_WORD as usize));
                    break;
                }
            }
        }
        if found.is_none() {
            if let Some(pos) = self.huge.iter().position(|&(_, bsize)| bsize >= size) {
                found = Some(self.huge.swap_remove(pos));
            }
        }

        let (addr, block_size) = found?;
        self.available -= block_size;
        if block_size > size {
            self.free(addr + size, block_size - size);
        }
        Some(addr)
    }
}

impl Default for FreeList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(words: usize) -> (Vec<usize>, Address) {
        let buf = vec![0usize; words];
        let addr = Address::from_ptr(buf.as_ptr());
        (buf, addr)
    }

    #[test]
    fn encodings_roundtrip() {
        let (_buf, addr) = region(8);
        write_free_encoding(addr, BYTES_IN_WORD);
        assert_eq!(decode_free_size(addr), Some(BYTES_IN_WORD));
        write_free_encoding(addr, 8 * BYTES_IN_WORD);
        assert_eq!(decode_free_size(addr), Some(8 * BYTES_IN_WORD));
    }

    #[test]
    fn live_header_is_not_a_free_encoding() {
        let (_buf, addr) = region(2);
        unsafe { addr.store::<usize>(0x10001) };
        assert_eq!(decode_free_size(addr), None);
    }

    #[test]
    fn exact_fit_allocation() {
        let (_buf, addr) = region(16);
        let mut list = FreeList::new();
        list.free(addr, 16 * BYTES_IN_WORD);
        assert_eq!(list.available(), 16 * BYTES_IN_WORD);
        let got = list.allocate(16 * BYTES_IN_WORD).unwrap();
        assert_eq!(got, addr);
        assert_eq!(list.available(), 0);
        assert_eq!(list.allocate(BYTES_IN_WORD), None);
    }

    #[test]
    fn oversized_blocks_split_and_refree() {
        let (_buf, addr) = region(32);
        let mut list = FreeList::new();
        list.free(addr, 32 * BYTES_IN_WORD);
        let got = list.allocate(8 * BYTES_IN_WORD).unwrap();
        assert_eq!(got, addr);
        assert_eq!(list.available(), 24 * BYTES_IN_WORD);
        // The remainder was stamped as a fresh free region.
        assert_eq!(
            decode_free_size(addr + 8 * BYTES_IN_WORD),
            Some(24 * BYTES_IN_WORD)
        );
        let rest = list.allocate(24 * BYTES_IN_WORD).unwrap();
        assert_eq!(rest, addr + 8 * BYTES_IN_WORD);
    }

    #[test]
    fn huge_blocks_use_first_fit() {
        let (_buf, addr) = region(1024);
        let mut list = FreeList::new();
        list.free(addr, 1024 * BYTES_IN_WORD);
        let got = list.allocate(300 * BYTES_IN_WORD).unwrap();
        assert_eq!(got, addr);
        assert_eq!(list.available(), 724 * BYTES_IN_WORD);
    }
}
