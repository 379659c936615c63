//! Incremental marking and its handoff to the stop-the-world collector.
//!
//! Between collections the mutator may run marking in small steps: roots
//! are painted grey up front, and each step blackens a bounded number of
//! grey objects, greying their white children. When a full collection
//! starts while a cycle is in flight, the collector finalizes the
//! remaining grey objects first and then proceeds on the already-painted
//! bitmap. The colours live in the bitmap's bit pairs: white `00`,
//! grey `11`, black `10`.

use crate::heap::Heap;
use crate::object::visiting::{iterate_body, SlotVisitor};
use crate::object::{FixedArray, HeapObject, Value, VisitorId};
use crate::util::constants::BYTES_IN_WORD;
use crate::util::markbits::MarkBit;
use crate::util::Address;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum State {
    #[default]
    Stopped,
    Marking,
    Complete,
}

#[derive(Default)]
pub struct IncrementalMarking {
    state: State,
    worklist: Vec<HeapObject>,
}

impl IncrementalMarking {
    pub fn new() -> IncrementalMarking {
        IncrementalMarking::default()
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_stopped(&self) -> bool {
        self.state == State::Stopped
    }

    pub fn is_black(mark_bit: MarkBit) -> bool {
        mark_bit.get() && !mark_bit.next().get()
    }

    pub fn is_grey(mark_bit: MarkBit) -> bool {
        mark_bit.get() && mark_bit.next().get()
    }

    pub fn is_white(mark_bit: MarkBit) -> bool {
        !mark_bit.get()
    }

    pub fn mark_black(mark_bit: MarkBit) {
        mark_bit.set();
        mark_bit.next().clear();
    }

    pub fn white_to_grey_and_push(&mut self, object: HeapObject, mark_bit: MarkBit) {
        debug_assert!(Self::is_white(mark_bit));
        mark_bit.set();
        mark_bit.next().set();
        self.worklist.push(object);
    }

    /// Something was re-greyed after the worklist drained; make sure the
    /// next step keeps marking.
    pub fn restart_if_not_marking(&mut self) {
        if self.state == State::Complete {
            self.state = State::Marking;
        }
    }

    /// Begin a cycle: clear every bitmap, then grey the strong roots.
    pub fn start(&mut self, heap: &mut Heap) {
        if self.state != State::Stopped {
            return;
        }
        let bottom = heap.new_space.bottom();
        let used = heap.new_space.top() - bottom;
        heap.new_space.clear_mark_range(bottom, used);
        for id in [
            crate::heap::space::SpaceId::OldPointer,
            crate::heap::space::SpaceId::OldData,
            crate::heap::space::SpaceId::Code,
            crate::heap::space::SpaceId::Map,
            crate::heap::space::SpaceId::Cell,
        ] {
            heap.paged_space(id).clear_markbits();
        }
        heap.lo_space.clear_markbits();

        let mut roots = Vec::new();
        heap.iterate_strong_roots(|slot| roots.push(slot));
        for slot in roots {
            let value = unsafe { slot.load::<Value>() };
            if value.is_heap_object() {
                let object = value.to_object();
                let mark_bit = heap.mark_bit_from(object.address());
                if Self::is_white(mark_bit) {
                    self.white_to_grey_and_push(object, mark_bit);
                }
            }
        }
        self.state = State::Marking;
        debug!("incremental marking started with {} grey roots", self.worklist.len());
    }

    /// Blacken up to `budget` grey objects.
    pub fn step(&mut self, heap: &Heap, budget: usize) {
        if self.state != State::Marking {
            return;
        }
        for _ in 0..budget {
            let Some(object) = self.worklist.pop() else {
                break;
            };
            self.scan_object(heap, object);
        }
        if self.worklist.is_empty() {
            self.state = State::Complete;
        }
    }

    /// Finish the cycle: drain every remaining grey object and stop. The
    /// bitmap is left fully painted for the stop-the-world marker.
    pub fn finalize(&mut self, heap: &Heap) {
        while let Some(object) = self.worklist.pop() {
            self.scan_object(heap, object);
        }
        self.state = State::Stopped;
        debug!("incremental marking finalized");
    }

    fn scan_object(&mut self, heap: &Heap, object: HeapObject) {
        let mark_bit = heap.mark_bit_from(object.address());
        Self::mark_black(mark_bit);

        let map = object.map();
        let map_bit = heap.mark_bit_from(map.object().address());
        if Self::is_white(map_bit) {
            self.white_to_grey_and_push(map.object(), map_bit);
        }

        let mut visitor = GreyingVisitor {
            heap,
            marking: self,
        };
        if map.visitor_id() == VisitorId::Context {
            // The trailing slot is the weak context link; greying through
            // it would resurrect dead contexts.
            let array = FixedArray::from_object(object);
            visitor.visit_slots(
                object.raw_field(FixedArray::HEADER_SIZE),
                object.raw_field(FixedArray::HEADER_SIZE + (array.length() - 1) * BYTES_IN_WORD),
            );
        } else {
            iterate_body(object, &mut visitor);
        }
    }

    /// An object is about to move while marking is active (or stopped):
    /// carry its colour to the new location.
    pub fn transfer_mark(&mut self, heap: &Heap, old_start: Address, new_start: Address) {
        if old_start == new_start {
            return;
        }
        let new_mark_bit = heap.mark_bit_from(new_start);
        if !self.is_stopped() {
            let old_mark_bit = heap.mark_bit_from(old_start);
            if Self::is_black(old_mark_bit) {
                Self::mark_black(new_mark_bit);
                old_mark_bit.clear();
            } else if Self::is_grey(old_mark_bit) {
                old_mark_bit.next().clear();
                self.white_to_grey_and_push(HeapObject::from_address(new_start), new_mark_bit);
                self.restart_if_not_marking();
            }
        } else {
            if heap.new_space.contains(old_start) {
                return;
            }
            if !heap.mark_bit_from(old_start).get() {
                return;
            }
            new_mark_bit.set();
        }
    }
}

struct GreyingVisitor<'a, 'b> {
    heap: &'a Heap,
    marking: &'b mut IncrementalMarking,
}

impl SlotVisitor for GreyingVisitor<'_, '_> {
    fn visit_slot(&mut self, slot: Address) {
        let value = unsafe { slot.load::<Value>() };
        if !value.is_heap_object() {
            return;
        }
        let object = value.to_object();
        if object.address().is_zero() {
            return;
        }
        let mark_bit = self.heap.mark_bit_from(object.address());
        if IncrementalMarking::is_white(mark_bit) {
            self.marking.white_to_grey_and_push(object, mark_bit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::markbits::BitmapStorage;

    #[test]
    fn colour_encoding() {
        let storage = BitmapStorage::for_length(8);
        let bit = storage.bitmap().mark_bit_at(0);
        assert!(IncrementalMarking::is_white(bit));
        bit.set();
        bit.next().set();
        assert!(IncrementalMarking::is_grey(bit));
        assert!(!IncrementalMarking::is_black(bit));
        IncrementalMarking::mark_black(bit);
        assert!(IncrementalMarking::is_black(bit));
        assert!(!IncrementalMarking::is_grey(bit));
    }

    #[test]
    fn restart_only_from_complete() {
        let mut marking = IncrementalMarking::new();
        marking.restart_if_not_marking();
        assert_eq!(marking.state(), State::Stopped);
        marking.state = State::Complete;
        marking.restart_if_not_marking();
        assert_eq!(marking.state(), State::Marking);
    }

    #[test]
    fn transfer_mark_carries_colours() {
        let mut options = crate::util::options::Options::default();
        options.set_bulk_from_str("semispace_size=16384, incremental_marking=true");
        let mut heap = crate::heap::Heap::new(options);

        let moving = heap.alloc_fixed_array(4, true).unwrap();
        let black_target = heap.alloc_fixed_array(4, true).unwrap();
        let grey_target = heap.alloc_fixed_array(4, true).unwrap();
        let _root = heap.create_local_handle(moving.value());

        let mut marking = IncrementalMarking::new();
        marking.start(&mut heap);
        assert_eq!(marking.state(), State::Marking);

        // The rooted object was painted grey by the start; moving it while
        // grey re-enqueues the destination grey.
        let old_bit = heap.mark_bit_from(moving.object().address());
        assert!(IncrementalMarking::is_grey(old_bit));
        marking.transfer_mark(
            &heap,
            moving.object().address(),
            grey_target.object().address(),
        );
        let new_bit = heap.mark_bit_from(grey_target.object().address());
        assert!(IncrementalMarking::is_grey(new_bit));

        // A black source paints the destination black and clears itself.
        let src_bit = heap.mark_bit_from(grey_target.object().address());
        IncrementalMarking::mark_black(src_bit);
        marking.transfer_mark(
            &heap,
            grey_target.object().address(),
            black_target.object().address(),
        );
        assert!(IncrementalMarking::is_black(
            heap.mark_bit_from(black_target.object().address())
        ));
        assert!(!src_bit.get());

        marking.finalize(&heap);
        assert!(marking.is_stopped());
    }
}
