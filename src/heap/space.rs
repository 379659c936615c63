//! The spaces of the heap and their allocation policies.
//!
//! Paged spaces allocate from their free list first and bump a linear
//! window on the newest page otherwise. The nursery is a pair of equally
//! sized semispaces with one shared bitmap. The large-object space gives
//! every object its own chunk.

use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::ptr::NonNull;

use enum_map::Enum;
use strum_macros::EnumIter;

use crate::heap::free_list::{decode_free_size, FreeList};
use crate::heap::page::{Page, PageAllocation};
use crate::object::HeapObject;
use crate::util::constants::*;
use crate::util::markbits::{BitmapStorage, MarkBit};
use crate::util::Address;

/// Allocation failed: the space is not allowed to grow any further.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AllocError;

impl std::fmt::Display for AllocError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "space exhausted")
    }
}

impl std::error::Error for AllocError {}

/// The spaces, in the fixed order heap walks traverse them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Enum, EnumIter)]
pub enum SpaceId {
    New,
    OldPointer,
    OldData,
    Code,
    Map,
    Cell,
    Large,
}

impl SpaceId {
    pub fn is_movable(self) -> bool {
        matches!(self, SpaceId::OldPointer | SpaceId::OldData)
    }
}

/// A mark-swept old space backed by fixed-size pages.
pub struct PagedSpace {
    id: SpaceId,
    allocations: Vec<PageAllocation>,
    free_list: FreeList,
    top: Address,
    limit: Address,
    max_pages: usize,
    freed_this_cycle: Vec<(Address, usize)>,
}

impl PagedSpace {
    pub fn new(id: SpaceId, max_pages: usize) -> PagedSpace {
        PagedSpace {
            id,
            allocations: Vec::new(),
            free_list: FreeList::new(),
            top: Address::ZERO,
            limit: Address::ZERO,
            max_pages,
            freed_this_cycle: Vec::new(),
        }
    }

    pub fn id(&self) -> SpaceId {
        self.id
    }

    pub fn page_count(&self) -> usize {
        self.allocations.len()
    }

    pub fn pages(&self) -> impl Iterator<Item = Page> + '_ {
        self.allocations.iter().map(|a| a.page())
    }

    pub fn contains(&self, addr: Address) -> bool {
        let page = Page::from_address(addr);
        self.allocations.iter().any(|a| a.page() == page)
    }

    /// Committed object-area bytes.
    pub fn area_bytes(&self) -> usize {
        self.allocations.len() * (BYTES_IN_PAGE - crate::heap::page::OBJECT_AREA_OFFSET)
    }

    /// Bytes currently on the free list.
    pub fn available(&self) -> usize {
        self.free_list.available()
    }

    pub fn allocate_raw(&mut self, size: usize) -> Result<Address, AllocError> {
        debug_assert!(size % BYTES_IN_WORD == 0 && size >= MIN_OBJECT_SIZE);
        if let Some(addr) = self.free_list.allocate(size) {
            return Ok(addr);
        }
        if self.top + size <= self.limit && !self.top.is_zero() {
            let result = self.top;
            self.top += size;
            return Ok(result);
        }
        self.expand()?;
        if self.top + size > self.limit {
            return Err(AllocError);
        }
        let result = self.top;
        self.top += size;
        Ok(result)
    }

    fn expand(&mut self) -> Result<(), AllocError> {
        if self.allocations.len() >= self.max_pages {
            return Err(AllocError);
        }
        let allocation = PageAllocation::new(self.id as usize);
        let page = allocation.page();
        self.top = page.object_area_start();
        self.limit = page.object_area_end();
        self.allocations.push(allocation);
        debug!("{:?} space expanded to {} pages", self.id, self.allocations.len());
        Ok(())
    }

    /// Put a region back on the free list (and record it for this cycle's
    /// store-buffer filtering).
    pub fn free(&mut self, addr: Address, size: usize) {
        if size == 0 {
            return;
        }
        self.freed_this_cycle.push((addr, size));
        self.free_list.free(addr, size);
    }

    /// Regions freed since the last `prepare_for_mark_compact`.
    pub fn freed_this_cycle(&self) -> &[(Address, usize)] {
        &self.freed_this_cycle
    }

    /// Entering a collection: the free list is rebuilt by the sweeper, and
    /// the linear window is given up until allocation resumes.
    pub fn prepare_for_mark_compact(&mut self) {
        self.free_list.clear();
        self.freed_this_cycle.clear();
    }

    /// Drop the linear allocation window. Done at the start of a sweep; the
    /// unconsumed tail is returned through the free list instead.
    pub fn drop_allocation_window(&mut self) {
        self.top = Address::ZERO;
        self.limit = Address::ZERO;
    }

    /// Reset the linear window to the given range (after compaction).
    pub fn set_top(&mut self, top: Address, limit: Address) {
        self.top = top;
        self.limit = limit;
    }

    pub fn clear_markbits(&self) {
        for page in self.pages() {
            page.markbits().clear_all();
        }
    }

    /// Walk the objects of this space in address order, skipping free
    /// regions. Only meaningful while the space is linearly iterable:
    /// precisely swept, or never conservatively swept since the last full
    /// tiling. An all-zero word ends a page (virgin tail).
    pub fn iterate_objects(&self, mut f: impl FnMut(HeapObject)) {
        for page in self.pages() {
            let mut current = page.object_area_start();
            let end = page.object_area_end();
            while current.as_usize() < end.as_usize() {
                if let Some(free_size) = decode_free_size(current) {
                    current += free_size;
                    continue;
                }
                let word = unsafe { current.load::<usize>() };
                if word == 0 {
                    break;
                }
                let object = HeapObject::from_address(current);
                let size = object.size();
                f(object);
                current += size;
            }
        }
    }
}

/// RAII backing for a zeroed, aligned, word-granular region.
struct Reservation {
    base: NonNull<u8>,
    layout: Layout,
}

impl Reservation {
    fn new(size: usize, align: usize) -> Reservation {
        let layout = Layout::from_size_align(size, align).unwrap();
        let raw = unsafe { alloc_zeroed(layout) };
        let Some(base) = NonNull::new(raw) else {
            handle_alloc_error(layout);
        };
        Reservation { base, layout }
    }

    fn start(&self) -> Address {
        Address::from_ptr(self.base.as_ptr())
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        unsafe { dealloc(self.base.as_ptr(), self.layout) };
    }
}

/// The nursery: two equally sized semispaces plus one bitmap covering both.
/// While the old generation is being marked, the idle `from` half doubles as
/// storage for the marking stack.
pub struct NewSpace {
    reservation: Reservation,
    semispace_size: usize,
    to_start: Address,
    from_start: Address,
    top: Address,
    age_mark: Address,
    markbits: BitmapStorage,
    young_survivors: usize,
}

impl NewSpace {
    pub fn new(semispace_size: usize) -> NewSpace {
        debug_assert!(semispace_size.is_power_of_two());
        let reservation = Reservation::new(2 * semispace_size, 2 * semispace_size);
        let start = reservation.start();
        let markbits =
            BitmapStorage::for_length((2 * semispace_size) >> LOG_BYTES_IN_WORD as usize);
        NewSpace {
            reservation,
            semispace_size,
            to_start: start,
            from_start: start + semispace_size,
            top: start,
            age_mark: start,
            markbits,
            young_survivors: 0,
        }
    }

    pub fn start(&self) -> Address {
        self.reservation.start()
    }

    pub fn semispace_size(&self) -> usize {
        self.semispace_size
    }

    pub fn contains(&self, addr: Address) -> bool {
        let start = self.start().as_usize();
        let a = addr.as_usize();
        start <= a && a < start + 2 * self.semispace_size
    }

    pub fn to_contains(&self, addr: Address) -> bool {
        let a = addr.as_usize();
        self.to_start.as_usize() <= a && a < self.to_start.as_usize() + self.semispace_size
    }

    pub fn from_contains(&self, addr: Address) -> bool {
        let a = addr.as_usize();
        self.from_start.as_usize() <= a && a < self.from_start.as_usize() + self.semispace_size
    }

    /// Start of the live (to) semispace.
    pub fn bottom(&self) -> Address {
        self.to_start
    }

    pub fn top(&self) -> Address {
        self.top
    }

    pub fn age_mark(&self) -> Address {
        self.age_mark
    }

    pub fn set_age_mark(&mut self, mark: Address) {
        self.age_mark = mark;
    }

    pub fn from_space_low(&self) -> Address {
        self.from_start
    }

    pub fn from_space_high(&self) -> Address {
        self.from_start + self.semispace_size
    }

    /// Swap the semispaces. Afterwards `to` is empty and `from` holds this
    /// cycle's objects; the caller resets the allocation top.
    pub fn flip(&mut self) {
        std::mem::swap(&mut self.to_start, &mut self.from_start);
    }

    pub fn reset_allocation_info(&mut self) {
        self.top = self.to_start;
        self.age_mark = self.to_start;
    }

    pub fn allocate_raw(&mut self, size: usize) -> Result<Address, AllocError> {
        debug_assert!(size % BYTES_IN_WORD == 0 && size >= MIN_OBJECT_SIZE);
        if self.top + size > self.to_start + self.semispace_size {
            return Err(AllocError);
        }
        let result = self.top;
        self.top += size;
        Ok(result)
    }

    pub fn mark_bit_for(&self, addr: Address) -> MarkBit {
        debug_assert!(self.contains(addr));
        let index = (addr - self.start()) >> LOG_BYTES_IN_WORD as usize;
        self.markbits.bitmap().mark_bit_at(index)
    }

    /// Clear the mark bits covering `[bottom, bottom + length)`, rounded up
    /// to whole bitmap cells.
    pub fn clear_mark_range(&self, bottom: Address, length: usize) {
        let index = (bottom - self.start()) >> LOG_BYTES_IN_WORD as usize;
        self.markbits
            .bitmap()
            .clear_range(index, length >> LOG_BYTES_IN_WORD as usize);
    }

    pub fn markbits_are_clean(&self) -> bool {
        self.markbits.bitmap().is_clean()
    }

    pub fn increment_young_survivors(&mut self, bytes: usize) {
        self.young_survivors += bytes;
    }

    pub fn young_survivors(&self) -> usize {
        self.young_survivors
    }
}

/// One chunk of the large-object space: a single object with its own
/// two-bit bitmap (mark bit plus colour bit).
pub struct LargeChunk {
    storage: Reservation,
    size: usize,
    markbits: BitmapStorage,
}

impl LargeChunk {
    fn new(size: usize) -> LargeChunk {
        LargeChunk {
            storage: Reservation::new(size, BYTES_PER_CELL),
            size,
            markbits: BitmapStorage::for_length(2),
        }
    }

    pub fn start(&self) -> Address {
        self.storage.start()
    }

    pub fn object(&self) -> HeapObject {
        HeapObject::from_address(self.start())
    }

    pub fn contains(&self, addr: Address) -> bool {
        let a = addr.as_usize();
        let start = self.start().as_usize();
        start <= a && a < start + self.size
    }

    pub fn mark_bit(&self) -> MarkBit {
        self.markbits.bitmap().mark_bit_at(0)
    }
}

/// One object per chunk; swept by dropping unmarked chunks outright.
pub struct LargeObjectSpace {
    chunks: Vec<LargeChunk>,
}

impl LargeObjectSpace {
    pub fn new() -> LargeObjectSpace {
        LargeObjectSpace { chunks: Vec::new() }
    }

    pub fn allocate_raw(&mut self, size: usize) -> Result<Address, AllocError> {
        debug_assert!(size % BYTES_IN_WORD == 0);
        let chunk = LargeChunk::new(size);
        let addr = chunk.start();
        self.chunks.push(chunk);
        Ok(addr)
    }

    pub fn contains(&self, addr: Address) -> bool {
        self.chunk_for(addr).is_some()
    }

    pub fn chunk_for(&self, addr: Address) -> Option<&LargeChunk> {
        self.chunks.iter().find(|c| c.contains(addr))
    }

    pub fn iterate_objects(&self, mut f: impl FnMut(HeapObject)) {
        for chunk in &self.chunks {
            f(chunk.object());
        }
    }

    pub fn object_count(&self) -> usize {
        self.chunks.len()
    }

    /// Drop every unmarked chunk and clear the marks of the survivors.
    /// Returns the number of bytes released.
    pub fn free_unmarked_objects(&mut self) -> usize {
        let mut freed = 0;
        self.chunks.retain(|chunk| {
            let bit = chunk.mark_bit();
            if bit.get() {
                bit.clear();
                bit.next().clear();
                true
            } else {
                freed += chunk.size;
                false
            }
        });
        freed
    }

    pub fn clear_markbits(&self) {
        for chunk in &self.chunks {
            chunk.mark_bit().clear();
            chunk.mark_bit().next().clear();
        }
    }
}

impl Default for LargeObjectSpace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paged_space_bump_then_free_list() {
        let mut space = PagedSpace::new(SpaceId::OldPointer, 2);
        let a = space.allocate_raw(4 * BYTES_IN_WORD).unwrap();
        let b = space.allocate_raw(4 * BYTES_IN_WORD).unwrap();
        assert_eq!(b, a + 4 * BYTES_IN_WORD);
        assert!(space.contains(a));
        space.free(a, 4 * BYTES_IN_WORD);
        let c = space.allocate_raw(4 * BYTES_IN_WORD).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn paged_space_respects_page_budget() {
        let mut space = PagedSpace::new(SpaceId::OldData, 1);
        space.allocate_raw(64).unwrap();
        assert_eq!(space.page_count(), 1);
        // A second page would be needed for this, and the budget says no.
        let huge = BYTES_IN_PAGE - crate::heap::page::OBJECT_AREA_OFFSET;
        assert_eq!(space.allocate_raw(huge), Err(AllocError));
    }

    #[test]
    fn new_space_flip_swaps_semispaces() {
        let mut space = NewSpace::new(4 * BYTES_IN_KBYTE);
        let a = space.allocate_raw(8 * BYTES_IN_WORD).unwrap();
        assert!(space.to_contains(a));
        assert!(!space.from_contains(a));
        space.flip();
        assert!(space.from_contains(a));
        space.reset_allocation_info();
        let b = space.allocate_raw(8 * BYTES_IN_WORD).unwrap();
        assert!(space.to_contains(b));
        assert_ne!(a, b);
    }

    #[test]
    fn new_space_allocation_fails_when_full() {
        let mut space = NewSpace::new(4 * BYTES_IN_KBYTE);
        assert!(space.allocate_raw(4 * BYTES_IN_KBYTE).is_ok());
        assert_eq!(space.allocate_raw(BYTES_IN_WORD * 2), Err(AllocError));
    }

    #[test]
    fn large_object_space_sweeps_unmarked() {
        let mut space = LargeObjectSpace::new();
        let a = space.allocate_raw(128 * BYTES_IN_WORD).unwrap();
        let _b = space.allocate_raw(128 * BYTES_IN_WORD).unwrap();
        assert_eq!(space.object_count(), 2);
        space.chunk_for(a).unwrap().mark_bit().set();
        let freed = space.free_unmarked_objects();
        assert_eq!(space.object_count(), 1);
        assert_eq!(freed, 128 * BYTES_IN_WORD);
        assert!(space.contains(a));
        // The survivor's mark was cleared for the next cycle.
        assert!(!space.chunk_for(a).unwrap().mark_bit().get());
    }
}
