//! Relocation of the movable old spaces.
//!
//! Runs as the final phase of a compacting cycle, after the precise sweep
//! has left the movable spaces linearly iterable. Three steps: compute a
//! forwarding address for every live object by sliding it down to the
//! lowest free position, rewrite every pointer in every space and root
//! through the forwarding table, then copy the objects into place. The
//! store buffer is rebuilt from scratch afterwards: every surviving
//! old-space object is rescanned for nursery pointers, which is cheaper
//! and safer than patching recorded slot addresses whose holders moved.

use std::collections::HashMap;

use crate::collector::scavenger::StoreBufferRebuildVisitor;
use crate::collector::{CollectorState, MarkCompactCollector};
use crate::heap::page::Page;
use crate::heap::space::SpaceId;
use crate::object::visiting::{iterate_body, SlotVisitor};
use crate::object::{HeapObject, Value};
use crate::util::address::copy_block;
use crate::util::tracer::ScopeKind;
use crate::util::Address;

/// One object's relocation: where it is, where it goes, how big it is.
struct Move {
    from: Address,
    to: Address,
    size: usize,
}

/// The relocation plan for one movable space.
struct SpacePlan {
    id: SpaceId,
    moves: Vec<Move>,
    /// Page index and allocation top after the last relocated object.
    end_page: usize,
    end_top: Address,
}

/// Rewrites heap pointers through the forwarding table; slots whose
/// referents do not move are left alone.
struct ForwardingVisitor<'a> {
    forwarding: &'a HashMap<usize, Address>,
}

impl SlotVisitor for ForwardingVisitor<'_> {
    fn visit_slot(&mut self, slot: Address) {
        let value = unsafe { slot.load::<Value>() };
        if !value.is_heap_object() {
            return;
        }
        let addr = value.to_object().address();
        if let Some(&target) = self.forwarding.get(&addr.as_usize()) {
            unsafe {
                slot.store::<Value>(Value::from_object(HeapObject::from_address(target)))
            };
        }
    }
}

impl<'h> MarkCompactCollector<'h> {
    pub(crate) fn compact_spaces(&mut self) {
        self.in_scope(ScopeKind::McCompact, |c| {
            debug_assert_eq!(c.heap.gc.state, CollectorState::SweepSpaces);
            c.heap.gc.state = CollectorState::RelocateObjects;

            // Step 1: forwarding addresses, sliding each movable space's
            // survivors into a contiguous prefix of its pages.
            let mut forwarding: HashMap<usize, Address> = HashMap::new();
            let mut plans: Vec<SpacePlan> = Vec::new();
            for id in [SpaceId::OldPointer, SpaceId::OldData] {
                let space = c.heap.paged_space(id);
                let pages: Vec<Page> = space.pages().collect();
                if pages.is_empty() {
                    continue;
                }
                let mut objects: Vec<(Address, usize)> = Vec::new();
                space.iterate_objects(|object| {
                    objects.push((object.address(), object.size()));
                });

                let mut page_index = 0;
                let mut to_addr = pages[0].object_area_start();
                let mut moves = Vec::with_capacity(objects.len());
                for (from, size) in objects {
                    while to_addr + size > pages[page_index].object_area_end() {
                        page_index += 1;
                        to_addr = pages[page_index].object_area_start();
                    }
                    forwarding.insert(from.as_usize(), to_addr);
                    moves.push(Move {
                        from,
                        to: to_addr,
                        size,
                    });
                    to_addr += size;
                }
                plans.push(SpacePlan {
                    id,
                    moves,
                    end_page: page_index,
                    end_top: to_addr,
                });
            }

            // Step 2: rewrite every pointer while the objects still sit at
            // their old addresses.
            let mut visitor = ForwardingVisitor {
                forwarding: &forwarding,
            };

            for plan in &plans {
                for m in &plan.moves {
                    iterate_body(HeapObject::from_address(m.from), &mut visitor);
                }
            }
            for id in [SpaceId::Code, SpaceId::Map, SpaceId::Cell] {
                let mut objects = Vec::new();
                c.heap
                    .paged_space(id)
                    .iterate_objects(|object| objects.push(object));
                for object in objects {
                    iterate_body(object, &mut visitor);
                }
            }
            let mut current = c.heap.new_space.bottom();
            while current.as_usize() < c.heap.new_space.top().as_usize() {
                let object = HeapObject::from_address(current);
                current += iterate_body(object, &mut visitor);
            }
            let mut large = Vec::new();
            c.heap.lo_space.iterate_objects(|object| large.push(object));
            for object in &large {
                iterate_body(*object, &mut visitor);
            }
            let mut root_slots = Vec::new();
            c.heap.iterate_all_root_slots(|slot| root_slots.push(slot));
            for slot in root_slots {
                visitor.visit_slot(slot);
            }
            // Recorded slot addresses sit inside objects that are about to
            // move; drop them all and rescan below.
            c.heap.store_buffer.take_slots();

            // Step 3: slide the objects down. Relocation targets never lie
            // above their sources, so ascending order is safe.
            for plan in &plans {
                for m in &plan.moves {
                    if m.from != m.to {
                        unsafe { copy_block(m.to, m.from, m.size) };
                    }
                }
            }

            // Step 4: rebuild the space metadata. Everything past the new
            // allocation top is free; trailing pages are entirely free.
            for plan in &plans {
                let space = c.heap.paged_space_mut(plan.id);
                let pages: Vec<Page> = space.pages().collect();
                space.prepare_for_mark_compact();
                space.drop_allocation_window();
                let mut relocated = 0;
                for m in &plan.moves {
                    relocated += m.size;
                }
                if !pages.is_empty() {
                    space.free(
                        plan.end_top,
                        pages[plan.end_page].object_area_end() - plan.end_top,
                    );
                    for page in &pages[plan.end_page + 1..] {
                        space.free(
                            page.object_area_start(),
                            page.object_area_end() - page.object_area_start(),
                        );
                    }
                }
                debug!(
                    "{:?} space compacted: {} bytes in a contiguous prefix",
                    plan.id, relocated
                );
            }

            // Step 5: the store buffer, from scratch. Every surviving
            // pointer-bearing old object is rescanned for nursery
            // references.
            let new_space_low = c.heap.new_space.start();
            let new_space_high = new_space_low + 2 * c.heap.new_space.semispace_size();
            let mut rescan: Vec<HeapObject> = Vec::new();
            for plan in &plans {
                if plan.id == SpaceId::OldPointer {
                    rescan.extend(
                        plan.moves.iter().map(|m| HeapObject::from_address(m.to)),
                    );
                }
            }
            rescan.extend(large.iter().copied());
            let mut barrier = StoreBufferRebuildVisitor::new(
                new_space_low,
                new_space_high,
                &mut c.heap.store_buffer,
            );
            for object in rescan {
                iterate_body(object, &mut barrier);
            }
        });
    }
}
