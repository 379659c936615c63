//! Scavenging the nursery, interleaved with the old-space sweep.
//!
//! Two passes. The first migrates every live object out of the flipped
//! `from` semispace, preferably by promotion into the old generation and
//! otherwise by a copy into `to` space (which cannot fail because the
//! semispaces are the same size), and writes the forwarding address (or
//! null, for the dead) into the first word of the original. The second
//! pass rewrites every pointer into the nursery: the bodies of the `to`
//! space survivors, every root slot, the replayed store buffer (rebuilt
//! with the entries that still point young), and the value slot of every
//! property cell.

use std::collections::HashSet;

use crate::collector::MarkCompactCollector;
use crate::heap::space::SpaceId;
use crate::heap::store_buffer::StoreBuffer;
use crate::object::visiting::{iterate_body, SlotVisitor};
use crate::object::{HeapObject, PropertyCell, Value, VisitorId};
use crate::util::address::copy_block;
use crate::util::constants::MAX_OBJECT_SIZE_IN_PAGED_SPACE;
use crate::util::Address;

/// Rewrites slots that point into the old `from` semispace through the
/// forwarding word at the referent's first word. Dead referents (null
/// forwarding) are zapped so an over-approximate store-buffer scan cannot
/// follow them later.
pub(crate) struct SemispaceUpdatingVisitor {
    from_low: usize,
    from_high: usize,
}

impl SemispaceUpdatingVisitor {
    fn new(from_low: Address, from_high: Address) -> SemispaceUpdatingVisitor {
        SemispaceUpdatingVisitor {
            from_low: from_low.as_usize(),
            from_high: from_high.as_usize(),
        }
    }
}

impl SlotVisitor for SemispaceUpdatingVisitor {
    fn visit_slot(&mut self, slot: Address) {
        let value = unsafe { slot.load::<Value>() };
        if !value.is_heap_object() {
            return;
        }
        let old_addr = value.to_object().address().as_usize();
        if old_addr < self.from_low || old_addr >= self.from_high {
            return;
        }
        let forwarded = unsafe { Address::from_usize(old_addr).load::<usize>() };
        let new_value = if forwarded == 0 {
            Value::NULL_OBJECT
        } else {
            Value::from_object(HeapObject::from_address(unsafe {
                Address::from_usize(forwarded)
            }))
        };
        unsafe { slot.store::<Value>(new_value) };
    }
}

/// Records every slot holding a nursery pointer into the store buffer.
/// Used when an object is copied into the old generation, and when the
/// buffer is rebuilt wholesale after compaction.
pub(crate) struct StoreBufferRebuildVisitor<'a> {
    new_space_low: usize,
    new_space_high: usize,
    buffer: &'a mut StoreBuffer,
}

impl<'a> StoreBufferRebuildVisitor<'a> {
    pub(crate) fn new(
        new_space_low: Address,
        new_space_high: Address,
        buffer: &'a mut StoreBuffer,
    ) -> StoreBufferRebuildVisitor<'a> {
        StoreBufferRebuildVisitor {
            new_space_low: new_space_low.as_usize(),
            new_space_high: new_space_high.as_usize(),
            buffer,
        }
    }
}

impl SlotVisitor for StoreBufferRebuildVisitor<'_> {
    fn visit_slot(&mut self, slot: Address) {
        let value = unsafe { slot.load::<Value>() };
        if !value.is_heap_object() {
            return;
        }
        let addr = value.to_object().address().as_usize();
        if addr >= self.new_space_low && addr < self.new_space_high {
            self.buffer.enter_directly(slot);
        }
    }
}

impl<'h> MarkCompactCollector<'h> {
    pub(crate) fn sweep_new_space(&mut self) {
        let from_bottom = self.heap.new_space.bottom();
        let from_top = self.heap.new_space.top();

        // Flip the semispaces. After flipping, to space is empty and from
        // space holds this cycle's objects, live and dead.
        self.heap.new_space.flip();
        self.heap.new_space.reset_allocation_info();

        // Slots recorded inside old-pointer regions that this cycle's
        // sweep already freed belong to dead holders; replaying them would
        // scribble on free-list memory.
        let freed = self.heap.old_pointer_space.freed_this_cycle().to_vec();
        self.heap.store_buffer.filter_freed_regions(&freed);

        let mut survivors_size = 0;

        // First pass: remove marks, migrate live objects, and write
        // forwarding addresses into the first word of the originals.
        let mut current = from_bottom;
        while current.as_usize() < from_top.as_usize() {
            let object = HeapObject::from_address(current);
            let mark_bit = self.heap.new_space.mark_bit_for(current);
            let size;
            if mark_bit.get() {
                mark_bit.clear();
                self.tracer.decrement_marked_count();

                size = object.size();
                survivors_size += size;

                // Aggressively promote young survivors to the old space,
                // falling back to the other semispace when the old
                // generation will not take them.
                if !self.try_promote_object(object, size) {
                    let target = self
                        .heap
                        .new_space
                        .allocate_raw(size)
                        .expect("semispaces are equally sized");
                    self.migrate_object(target, current, size, false);
                }
            } else {
                size = object.size();
                // Mark dead objects with a null forwarding word.
                unsafe { current.store::<usize>(0) };
            }
            current += size;
        }

        // Second pass: find pointers into the nursery and update them.
        let from_low = self.heap.new_space.from_space_low();
        let from_high = self.heap.new_space.from_space_high();
        let mut updating_visitor = SemispaceUpdatingVisitor::new(from_low, from_high);

        // Pointers inside the survivors that stayed in to space.
        let mut current = self.heap.new_space.bottom();
        while current.as_usize() < self.heap.new_space.top().as_usize() {
            let object = HeapObject::from_address(current);
            current += iterate_body(object, &mut updating_visitor);
        }

        // Every root slot, strong and weak.
        let mut root_slots = Vec::new();
        self.heap.iterate_all_root_slots(|slot| root_slots.push(slot));
        for slot in root_slots {
            updating_visitor.visit_slot(slot);
        }

        // Replay the store buffer, rebuilding it with the slots that still
        // hold nursery pointers.
        let recorded = self.heap.store_buffer.take_slots();
        let mut seen: HashSet<usize> = HashSet::new();
        for slot in recorded {
            if !seen.insert(slot.as_usize()) {
                continue;
            }
            let value = unsafe { slot.load::<Value>() };
            if value.is_heap_object()
                && self.heap.new_space.from_contains(value.to_object().address())
            {
                self.update_pointer_to_new_gen(slot);
            }
        }

        // Update pointers held in cell space.
        let mut cells = Vec::new();
        self.heap.cell_space.iterate_objects(|object| cells.push(object));
        for cell in cells {
            updating_visitor.visit_slot(PropertyCell::from_object(cell).value_slot());
        }

        // All pointers were updated. Update the auxiliary allocation info.
        self.heap.new_space.increment_young_survivors(survivors_size);
        let new_top = self.heap.new_space.top();
        self.heap.new_space.set_age_mark(new_top);
        debug!(
            "scavenge kept {} bytes of nursery survivors ({} promoted objects)",
            survivors_size,
            self.tracer.promoted_objects_count()
        );
    }

    /// Replay one recorded old→new slot: either forward it (re-entering it
    /// into the rebuilt buffer if it still points young) or zap it because
    /// the referent died.
    fn update_pointer_to_new_gen(&mut self, slot: Address) {
        let value = unsafe { slot.load::<Value>() };
        debug_assert!(value.is_heap_object());
        let old_addr = value.to_object().address();
        debug_assert!(self.heap.new_space.from_contains(old_addr));

        let new_addr = unsafe { old_addr.load::<usize>() };
        if new_addr != 0 {
            let target = unsafe { Address::from_usize(new_addr) };
            unsafe { slot.store::<Value>(Value::from_object(HeapObject::from_address(target))) };
            if self.heap.new_space.contains(target) {
                self.heap.store_buffer.enter_directly(slot);
            }
        } else {
            // Zap the slot: the store buffer may overflow into a full
            // old-space scan later, and that scan must not find spurious
            // nursery pointers.
            unsafe { slot.store::<Value>(Value::NULL_OBJECT) };
        }
    }

    fn try_promote_object(&mut self, object: HeapObject, object_size: usize) -> bool {
        let src = object.address();
        if object_size > MAX_OBJECT_SIZE_IN_PAGED_SPACE {
            let has_pointers = object.map().visitor_id() != VisitorId::DataObject;
            if let Ok(target) = self.heap.lo_space.allocate_raw(object_size) {
                self.migrate_object(target, src, object_size, has_pointers);
                // The large-object sweep still lies ahead this cycle; mark
                // the chunk so it survives it.
                if let Some(chunk) = self.heap.lo_space.chunk_for(target) {
                    chunk.mark_bit().set();
                }
                self.tracer.increment_promoted_objects_size(object_size);
                return true;
            }
            return false;
        }

        let target_space = crate::heap::Heap::target_space_id(object);
        debug_assert!(matches!(
            target_space,
            SpaceId::OldPointer | SpaceId::OldData
        ));
        if let Ok(target) = self.heap.paged_space_mut(target_space).allocate_raw(object_size) {
            self.migrate_object(target, src, object_size, target_space == SpaceId::OldPointer);
            self.tracer.increment_promoted_objects_size(object_size);
            return true;
        }
        false
    }

    /// Copy the object and install the forwarding address in the source's
    /// first word. Copies into the pointer-bearing old spaces feed the
    /// write barrier for every nursery pointer they carry along.
    fn migrate_object(
        &mut self,
        dst: Address,
        src: Address,
        size: usize,
        update_write_barrier: bool,
    ) {
        unsafe { copy_block(dst, src, size) };
        if update_write_barrier {
            let new_space_low = self.heap.new_space.start();
            let new_space_high =
                new_space_low + 2 * self.heap.new_space.semispace_size();
            let mut barrier = StoreBufferRebuildVisitor::new(
                new_space_low,
                new_space_high,
                &mut self.heap.store_buffer,
            );
            iterate_body(HeapObject::from_address(dst), &mut barrier);
        }
        unsafe { src.store::<usize>(dst.as_usize()) };
    }
}
