//! Sweeping the paged old spaces.
//!
//! Two strategies exist per page. The precise sweep walks every bitmap
//! cell, frees every gap between live objects, and clears the cells as it
//! consumes them, leaving the page linearly iterable, as required for code,
//! cell and map space (map space last: the other sweeps read object sizes
//! through possibly dead descriptors, so those must not be overwritten
//! until everything else is done). The conservative sweep is an
//! approximation that frees only holes bigger than a bitmap cell's worth
//! of words and leaves small holes untouched; it carries the current
//! hole's start in undigested form (block address plus the cell bits that
//! locate the preceding live object) and only digests it into a real
//! address when the hole looks worth freeing.

use std::sync::atomic::Ordering;

use crate::collector::{CollectorState, MarkCompactCollector};
use crate::heap::page::{flags, Page, FIRST_USED_CELL};
use crate::heap::space::{PagedSpace, SpaceId};
use crate::object::HeapObject;
use crate::util::constants::*;
use crate::util::markbits::mark_word_to_object_starts;
use crate::util::tracer::ScopeKind;
use crate::util::Address;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum SweeperType {
    Conservative,
    Precise,
}

impl<'h> MarkCompactCollector<'h> {
    pub(crate) fn sweep_spaces(&mut self) {
        self.in_scope(ScopeKind::McSweep, |c| {
            debug_assert_eq!(c.heap.gc.state, CollectorState::MarkLiveObjects);
            c.heap.gc.state = CollectorState::SweepSpaces;

            let how_to_sweep = if c.sweep_precisely {
                SweeperType::Precise
            } else {
                SweeperType::Conservative
            };

            // Noncompacting collections simply sweep the spaces to clear
            // the mark bits and free the nonlive blocks. The map space is
            // swept last: the other spaces use possibly non-live
            // descriptors to size their dead objects, so those descriptors
            // must survive until every other space is done.
            c.sweep_space(SpaceId::OldPointer, how_to_sweep);
            c.sweep_space(SpaceId::OldData, how_to_sweep);
            c.sweep_space(SpaceId::Code, SweeperType::Precise);
            c.sweep_space(SpaceId::Cell, SweeperType::Precise);
            c.in_scope(ScopeKind::McSweepNewspace, |c| c.sweep_new_space());
            c.sweep_space(SpaceId::Map, SweeperType::Precise);

            let freed = c.heap.lo_space.free_unmarked_objects();
            if freed > 0 {
                debug!("large object space released {} bytes", freed);
            }
        });
    }

    fn sweep_space(&mut self, id: SpaceId, sweeper: SweeperType) {
        let space = self.heap.paged_space_mut(id);
        // No linear allocation area while sweeping; it is restored from
        // the free list on the first allocation afterwards.
        space.drop_allocation_window();
        let pages: Vec<Page> = space.pages().collect();
        for page in pages {
            match sweeper {
                SweeperType::Conservative => sweep_conservatively(space, page),
                SweeperType::Precise => sweep_precisely(space, page),
            }
        }
        trace!(
            "{:?} space swept {:?}, {} bytes on free list",
            id,
            sweeper,
            space.available()
        );
    }
}

/// Sweep a page precisely: every gap between live objects goes on the free
/// list, and the bitmap cells are cleared as they are consumed. Afterwards
/// the page can be iterated linearly, hitting only live objects and free
/// encodings.
pub(crate) fn sweep_precisely(space: &mut PagedSpace, page: Page) {
    page.clear_flag(flags::WAS_SWEPT_CONSERVATIVELY);

    let bitmap = page.markbits();
    let mut free_start = page.object_area_start();
    let mut object_address = page.object_area_start();
    let mut offsets = [0u32; 16];

    for cell_index in FIRST_USED_CELL..bitmap.cell_count() {
        let cell = bitmap.cell(cell_index).load(Ordering::Relaxed);
        let live_objects = mark_word_to_object_starts(cell, &mut offsets);
        for &offset in &offsets[..live_objects] {
            let free_end = object_address + (offset as usize) * BYTES_IN_WORD;
            if free_end != free_start {
                space.free(free_start, free_end - free_start);
            }
            let live_object = HeapObject::from_address(free_end);
            free_start = free_end + live_object.size();
        }
        bitmap.cell(cell_index).store(0, Ordering::Relaxed);
        object_address += BYTES_PER_CELL;
    }
    if free_start != page.object_area_end() {
        space.free(free_start, page.object_area_end() - free_start);
    }
}

/// Sweep a page conservatively: the larger free spaces go on the free list
/// and the smaller ones are ignored and left untouched. A free space is
/// always either wholly ignored or wholly freed, never split, so a free
/// encoding found later really describes skippable memory.
pub(crate) fn sweep_conservatively(space: &mut PagedSpace, page: Page) {
    let bitmap = page.markbits();

    page.set_flag(flags::WAS_SWEPT_CONSERVATIVELY);

    let last_cell_index = bitmap.cell_count();
    let mut cell_index = FIRST_USED_CELL;
    // The start of the 32-word block we are currently looking at.
    let mut block_address = page.object_area_start();

    // Skip over all the dead objects at the start of the page and mark
    // them free.
    while cell_index < last_cell_index && bitmap.cell(cell_index).load(Ordering::Relaxed) == 0 {
        cell_index += 1;
        block_address += BYTES_PER_CELL;
    }
    if cell_index == last_cell_index {
        space.free(
            page.object_area_start(),
            block_address - page.object_area_start(),
        );
        return;
    }
    // Grow the start-of-page free space up to the first live object.
    let free_end = start_of_live_object(
        block_address,
        bitmap.cell(cell_index).load(Ordering::Relaxed),
    );
    space.free(page.object_area_start(), free_end - page.object_area_start());

    // The start of the current free area is represented in undigested form
    // by the address of the last 32-word section that contained a live
    // object and the bitmap cell of that section, which says where the
    // object started. Unless a large free space turns up we never digest
    // this pair into a real address.
    let mut free_start = block_address;
    let mut free_start_cell = bitmap.cell(cell_index).load(Ordering::Relaxed);

    while cell_index < last_cell_index {
        let cell = bitmap.cell(cell_index).load(Ordering::Relaxed);
        if cell != 0 {
            // A live object: check approximately whether the hole behind
            // us is more than a block's worth of words.
            if block_address - free_start > BYTES_PER_CELL {
                let digested_free_start = digest_free_start(free_start, free_start_cell);
                if block_address - digested_free_start > BYTES_PER_CELL {
                    // The exact hole is still large enough to bother with,
                    // so find the start of the live object that ends it.
                    let free_end = start_of_live_object(block_address, cell);
                    space.free(digested_free_start, free_end - digested_free_start);
                }
            }
            // Update the undigested record of where the current free area
            // started.
            free_start = block_address;
            free_start_cell = cell;
        }
        cell_index += 1;
        block_address += BYTES_PER_CELL;
    }

    // Handle the free space at the end of the page.
    if block_address - free_start > BYTES_PER_CELL {
        let digested_free_start = digest_free_start(free_start, free_start_cell);
        space.free(digested_free_start, block_address - digested_free_start);
    }
}

/// Turn an undigested hole start (block address + that block's cell bits)
/// into the exact address where the hole begins: right after the last live
/// object in the block.
fn digest_free_start(approximate_free_start: Address, free_start_cell: u32) -> Address {
    debug_assert!(free_start_cell != 0);

    let offset_of_last_live;
    if free_start_cell & 0x8000_0000 != 0 {
        // This case would overflow below.
        offset_of_last_live = 31;
    } else {
        // Remove all but the most significant bit.
        let mut cell = free_start_cell;
        loop {
            let next = cell & (cell - 1);
            if next == 0 {
                break;
            }
            cell = next;
        }
        let mut offsets = [0u32; 16];
        let live_objects = mark_word_to_object_starts(cell, &mut offsets);
        debug_assert_eq!(live_objects, 1);
        offset_of_last_live = offsets[0] as usize;
    }
    let last_live_start = approximate_free_start + offset_of_last_live * BYTES_IN_WORD;
    let last_live = HeapObject::from_address(last_live_start);
    last_live_start + last_live.size()
}

/// The address of the first live object in the block at `block_address`,
/// per its bitmap cell.
fn start_of_live_object(block_address: Address, cell: u32) -> Address {
    debug_assert!(cell != 0);
    if cell == 0x8000_0000 {
        // Avoid overflow below.
        return block_address + 31 * BYTES_IN_WORD;
    }
    let first_set_bit = ((cell ^ (cell - 1)) + 1) >> 1;
    debug_assert_eq!(first_set_bit & cell, first_set_bit);
    let mut offsets = [0u32; 16];
    let live_objects = mark_word_to_object_starts(first_set_bit, &mut offsets);
    debug_assert_eq!(live_objects, 1);
    block_address + offsets[0] as usize * BYTES_IN_WORD
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::free_list::decode_free_size;
    use crate::heap::Heap;
    use crate::util::options::Options;

    fn test_heap() -> Heap {
        let mut options = Options::default();
        options.set_bulk_from_str("semispace_size=16384");
        Heap::new(options)
    }

    #[test]
    fn precise_sweep_frees_gaps_and_clears_bits() {
        let mut heap = test_heap();
        let a = heap.alloc_byte_array(64, true).unwrap();
        let b = heap.alloc_byte_array(64, true).unwrap();
        let c = heap.alloc_byte_array(64, true).unwrap();
        let size = a.size();

        let page = Page::from_address(a.object().address());
        page.mark_bit_for(a.object().address()).set();
        page.mark_bit_for(c.object().address()).set();

        let space = &mut heap.old_data_space;
        space.prepare_for_mark_compact();
        space.drop_allocation_window();
        sweep_precisely(space, page);

        // The hole where b was is exactly one free block.
        assert_eq!(decode_free_size(b.object().address()), Some(size));
        assert!(page.markbits().is_clean());
        assert!(!page.is_flag_set(flags::WAS_SWEPT_CONSERVATIVELY));
        // a and c survive in place; everything after c is one free tail.
        assert_eq!(
            decode_free_size(c.object().address() + size),
            Some(page.object_area_end() - (c.object().address() + size))
        );
    }

    #[test]
    fn empty_page_becomes_one_free_block() {
        let mut heap = test_heap();
        let a = heap.alloc_byte_array(64, true).unwrap();
        let page = Page::from_address(a.object().address());

        let space = &mut heap.old_data_space;
        space.prepare_for_mark_compact();
        space.drop_allocation_window();
        sweep_conservatively(space, page);

        assert_eq!(
            decode_free_size(page.object_area_start()),
            Some(page.object_area_end() - page.object_area_start())
        );
        assert_eq!(
            space.available(),
            page.object_area_end() - page.object_area_start()
        );
        assert!(page.is_flag_set(flags::WAS_SWEPT_CONSERVATIVELY));
    }

    #[test]
    fn conservative_sweep_ignores_small_holes() {
        let mut heap = test_heap();
        // Three adjacent small arrays; the middle one dies. The hole is
        // smaller than a block, so the conservative sweep must leave it
        // alone.
        let a = heap.alloc_byte_array(8, true).unwrap();
        let b = heap.alloc_byte_array(8, true).unwrap();
        let c = heap.alloc_byte_array(8, true).unwrap();

        let page = Page::from_address(a.object().address());
        page.mark_bit_for(a.object().address()).set();
        page.mark_bit_for(c.object().address()).set();

        let space = &mut heap.old_data_space;
        space.prepare_for_mark_compact();
        space.drop_allocation_window();
        sweep_conservatively(space, page);

        // b's corpse is untouched: no free encoding was written over it.
        assert_eq!(decode_free_size(b.object().address()), None);
        // The bits survive so iterators can trust them.
        assert!(page.mark_bit_for(a.object().address()).get());
        assert!(page.mark_bit_for(c.object().address()).get());
    }
}
