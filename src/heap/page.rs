//! Fixed-size heap pages.
//!
//! A page is a 1 MiB region aligned to its own size, so the page of any
//! interior address is one mask away. The page header (flags, space id,
//! area bounds) and the marking bitmap live at the front of the region; the
//! object area starts at the next 32-word-block boundary, which is what the
//! cell-granular sweep algorithms rely on.

use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::ptr::NonNull;
use std::sync::atomic::AtomicU32;

use crate::util::constants::*;
use crate::util::markbits::{Bitmap, MarkBit};
use crate::util::Address;

/// Page flag bits.
pub mod flags {
    /// Raised by the conservative sweeper: small holes on this page were
    /// left unreclaimed, so iterators must trust the object-start bitmap
    /// rather than assume contiguous live objects.
    pub const WAS_SWEPT_CONSERVATIVELY: usize = 1 << 0;
}

/// Number of bitmap cells covering a whole page, one bit per word.
pub const MARKBIT_CELLS_PER_PAGE: usize =
    BYTES_IN_PAGE >> (LOG_BYTES_IN_WORD as usize + LOG_BITS_IN_CELL);

const FLAGS_OFFSET: usize = 0;
const SPACE_ID_OFFSET: usize = BYTES_IN_WORD;
const BITMAP_OFFSET: usize = 8 * BYTES_IN_WORD;

/// Byte offset of the object area within a page, aligned so the area starts
/// exactly on a bitmap-cell block boundary.
pub const OBJECT_AREA_OFFSET: usize = {
    let raw = BITMAP_OFFSET + MARKBIT_CELLS_PER_PAGE * 4;
    (raw + BYTES_PER_CELL - 1) & !(BYTES_PER_CELL - 1)
};

/// Index of the first bitmap cell that covers the object area.
pub const FIRST_USED_CELL: usize =
    OBJECT_AREA_OFFSET >> (LOG_BYTES_IN_WORD as usize + LOG_BITS_IN_CELL);

static_assertions::const_assert!(OBJECT_AREA_OFFSET % BYTES_PER_CELL == 0);
static_assertions::const_assert!(OBJECT_AREA_OFFSET < BYTES_IN_PAGE / 16);

/// A view of one page, identified by its base address.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Page(Address);

impl Page {
    pub fn from_base(base: Address) -> Page {
        debug_assert!(base.is_aligned_to(BYTES_IN_PAGE));
        Page(base)
    }

    /// The page containing `addr`.
    pub fn from_address(addr: Address) -> Page {
        Page(unsafe { Address::from_usize(addr.as_usize() & !PAGE_OFFSET_MASK) })
    }

    pub fn base(self) -> Address {
        self.0
    }

    pub(crate) fn initialize(self, space_id: usize) {
        unsafe {
            (self.0 + FLAGS_OFFSET).store::<usize>(0);
            (self.0 + SPACE_ID_OFFSET).store::<usize>(space_id);
        }
    }

    pub fn flags(self) -> usize {
        unsafe { (self.0 + FLAGS_OFFSET).load::<usize>() }
    }

    pub fn set_flag(self, flag: usize) {
        unsafe { (self.0 + FLAGS_OFFSET).store::<usize>(self.flags() | flag) }
    }

    pub fn clear_flag(self, flag: usize) {
        unsafe { (self.0 + FLAGS_OFFSET).store::<usize>(self.flags() & !flag) }
    }

    pub fn is_flag_set(self, flag: usize) -> bool {
        self.flags() & flag != 0
    }

    pub fn space_id(self) -> usize {
        unsafe { (self.0 + SPACE_ID_OFFSET).load::<usize>() }
    }

    pub fn object_area_start(self) -> Address {
        self.0 + OBJECT_AREA_OFFSET
    }

    pub fn object_area_end(self) -> Address {
        self.0 + BYTES_IN_PAGE
    }

    pub fn markbits(self) -> Bitmap {
        unsafe {
            Bitmap::from_raw(
                (self.0 + BITMAP_OFFSET).to_ptr::<AtomicU32>(),
                MARKBIT_CELLS_PER_PAGE,
            )
        }
    }

    /// Word index of `addr` in this page's bitmap.
    pub fn address_to_markbit_index(self, addr: Address) -> usize {
        debug_assert_eq!(Page::from_address(addr), self);
        (addr - self.0) >> LOG_BYTES_IN_WORD as usize
    }

    pub fn markbit_index_to_address(self, index: usize) -> Address {
        self.0 + (index << LOG_BYTES_IN_WORD as usize)
    }

    pub fn mark_bit_for(self, addr: Address) -> MarkBit {
        self.markbits().mark_bit_at(self.address_to_markbit_index(addr))
    }
}

/// Owning allocation behind a [`Page`]: a zeroed, size-aligned region.
pub struct PageAllocation {
    base: NonNull<u8>,
}

impl PageAllocation {
    pub fn new(space_id: usize) -> PageAllocation {
        let layout = Layout::from_size_align(BYTES_IN_PAGE, BYTES_IN_PAGE).unwrap();
        let raw = unsafe { alloc_zeroed(layout) };
        let Some(base) = NonNull::new(raw) else {
            handle_alloc_error(layout);
        };
        let allocation = PageAllocation { base };
        allocation.page().initialize(space_id);
        allocation
    }

    pub fn page(&self) -> Page {
        Page::from_base(Address::from_ptr(self.base.as_ptr()))
    }
}

impl Drop for PageAllocation {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(BYTES_IN_PAGE, BYTES_IN_PAGE).unwrap();
        unsafe { dealloc(self.base.as_ptr(), layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interior_addresses_map_back_to_the_page() {
        let allocation = PageAllocation::new(3);
        let page = allocation.page();
        assert_eq!(page.space_id(), 3);
        let interior = page.object_area_start() + 4096;
        assert_eq!(Page::from_address(interior), page);
        assert_eq!(Page::from_address(page.object_area_end() - 1), page);
    }

    #[test]
    fn object_area_is_block_aligned_and_bitmapped() {
        let allocation = PageAllocation::new(0);
        let page = allocation.page();
        assert!(page.object_area_start().is_aligned_to(BYTES_PER_CELL));
        let addr = page.object_area_start();
        let index = page.address_to_markbit_index(addr);
        assert_eq!(index % BITS_IN_CELL, 0);
        assert_eq!(index / BITS_IN_CELL, FIRST_USED_CELL);
        let bit = page.mark_bit_for(addr);
        assert!(!bit.get());
        bit.set();
        assert!(page.mark_bit_for(addr).get());
        assert!(!page.mark_bit_for(addr + BYTES_IN_WORD).get());
        bit.clear();
        assert!(page.markbits().is_clean());
    }

    #[test]
    fn flags_are_independent() {
        let allocation = PageAllocation::new(0);
        let page = allocation.page();
        assert!(!page.is_flag_set(flags::WAS_SWEPT_CONSERVATIVELY));
        page.set_flag(flags::WAS_SWEPT_CONSERVATIVELY);
        assert!(page.is_flag_set(flags::WAS_SWEPT_CONSERVATIVELY));
        page.clear_flag(flags::WAS_SWEPT_CONSERVATIVELY);
        assert!(!page.is_flag_set(flags::WAS_SWEPT_CONSERVATIVELY));
    }
}
