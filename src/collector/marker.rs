//! Marking: root scan, transitive closure, object groups, weak handles,
//! overflow recovery, and the after-marking cleanup.
//!
//! The traversal is mostly depth-first through an explicit stack of grey
//! objects laid over the nursery's idle semispace. Long slot ranges take a
//! recursive fast path while a depth budget lasts. When the stack fills,
//! reachable objects are still marked but carry an overflow header bit
//! instead of a stack slot; the recovery loop later sweeps the heap for
//! overflowed objects and pushes them back.

use enum_map::EnumMap;

use crate::collector::MarkCompactCollector;
use crate::heap::space::SpaceId;
use crate::heap::Heap;
use crate::object::*;
use crate::util::constants::*;
use crate::util::markbits::{mark_word_to_object_starts, Bitmap, MarkBit};
use crate::util::tracer::ScopeKind;
use crate::util::Address;

pub(crate) type VisitFn = for<'a, 'h> fn(&'a mut MarkCompactCollector<'h>, Map, HeapObject);

/// The marking dispatch table, keyed by visitor id. Two registrations
/// exist for functions and shared function infos: with code flushing the
/// visitors collect candidates and withhold the code edge, without it they
/// mark code like any other field.
pub(crate) struct VisitorTable {
    table: EnumMap<VisitorId, VisitFn>,
}

impl VisitorTable {
    pub(crate) fn new() -> VisitorTable {
        let mut table = VisitorTable {
            table: EnumMap::from_fn(|id| match id {
                VisitorId::DataObject => visit_data_object as VisitFn,
                VisitorId::FixedArray => visit_fixed_array,
                VisitorId::ShortcutCandidate => visit_cons_string,
                VisitorId::Oddball => visit_oddball,
                VisitorId::Map => visit_map_body,
                VisitorId::Code => visit_code,
                VisitorId::SharedFunctionInfo => visit_shared_function_info_and_flush_code,
                VisitorId::JsFunction => visit_js_function_and_flush_code,
                VisitorId::PropertyCell => visit_property_cell,
                VisitorId::Context => visit_context,
                VisitorId::JsObject => visit_js_object,
            }),
        };
        table.enable_code_flushing(false);
        table
    }

    pub(crate) fn enable_code_flushing(&mut self, enabled: bool) {
        if enabled {
            self.table[VisitorId::JsFunction] = visit_js_function_and_flush_code;
            self.table[VisitorId::SharedFunctionInfo] = visit_shared_function_info_and_flush_code;
        } else {
            self.table[VisitorId::JsFunction] = visit_js_function;
            self.table[VisitorId::SharedFunctionInfo] = visit_shared_function_info_generic;
        }
    }

    pub(crate) fn get(&self, id: VisitorId) -> VisitFn {
        self.table[id]
    }
}

// ---------------------------------------------------------------------------
// Body visitors.

fn visit_data_object(_c: &mut MarkCompactCollector, _map: Map, _object: HeapObject) {}

fn visit_fixed_array(c: &mut MarkCompactCollector, _map: Map, object: HeapObject) {
    let size = object.size();
    c.visit_pointers(
        object.raw_field(FixedArray::HEADER_SIZE),
        object.raw_field(size),
    );
}

fn visit_cons_string(c: &mut MarkCompactCollector, _map: Map, object: HeapObject) {
    c.visit_pointers(
        object.raw_field(ConsString::FIRST_OFFSET),
        object.raw_field(ConsString::SIZE),
    );
}

fn visit_oddball(c: &mut MarkCompactCollector, _map: Map, object: HeapObject) {
    c.visit_pointers(
        object.raw_field(Oddball::TO_STRING_OFFSET),
        object.raw_field(Oddball::KIND_OFFSET),
    );
}

fn visit_map_body(c: &mut MarkCompactCollector, _map: Map, object: HeapObject) {
    c.visit_pointers(
        object.raw_field(Map::POINTER_FIELDS_BEGIN_OFFSET),
        object.raw_field(Map::POINTER_FIELDS_END_OFFSET),
    );
}

fn visit_context(c: &mut MarkCompactCollector, _map: Map, object: HeapObject) {
    // Everything except the trailing weak link to the next context.
    let size = object.size();
    c.visit_pointers(
        object.raw_field(FixedArray::HEADER_SIZE),
        object.raw_field(size - BYTES_IN_WORD),
    );
}

fn visit_property_cell(c: &mut MarkCompactCollector, _map: Map, object: HeapObject) {
    c.visit_pointers(
        object.raw_field(PropertyCell::VALUE_OFFSET),
        object.raw_field(PropertyCell::SIZE),
    );
}

fn visit_js_object(c: &mut MarkCompactCollector, _map: Map, object: HeapObject) {
    let size = object.size();
    c.visit_pointers(
        object.raw_field(JsObject::PROPERTIES_OFFSET),
        object.raw_field(size),
    );
}

fn visit_code(c: &mut MarkCompactCollector, _map: Map, object: HeapObject) {
    let code = Code::from_object(object);
    for i in 0..code.reloc_count() {
        let slot = code.reloc_target_slot(i);
        match code.reloc_mode(i) {
            RelocMode::CodeTarget | RelocMode::DebugTarget => {
                let target = unsafe { slot.load::<Value>() };
                if target.is_heap_object() {
                    c.mark_object(target.to_object());
                }
            }
            RelocMode::EmbeddedObject | RelocMode::Cell => {
                c.visit_pointer(slot);
            }
        }
    }
}

fn visit_shared_function_info_generic(c: &mut MarkCompactCollector, _map: Map, object: HeapObject) {
    let shared = SharedFunctionInfo::from_object(object);
    if shared.is_inobject_slack_tracking_in_progress() {
        c.detach_initial_map(shared);
    }
    c.visit_pointers(
        object.raw_field(SharedFunctionInfo::NAME_OFFSET),
        object.raw_field(SharedFunctionInfo::SIZE),
    );
}

fn visit_shared_function_info_and_flush_code(
    c: &mut MarkCompactCollector,
    _map: Map,
    object: HeapObject,
) {
    let shared = SharedFunctionInfo::from_object(object);
    if shared.is_inobject_slack_tracking_in_progress() {
        c.detach_initial_map(shared);
    }
    let known_flush_code_candidate = c.is_flushable_shared(shared);
    if known_flush_code_candidate {
        c.flusher.add_shared_candidate(shared);
    }
    c.visit_shared_function_info_fields(object, known_flush_code_candidate);
}

fn visit_js_function(c: &mut MarkCompactCollector, _map: Map, object: HeapObject) {
    c.visit_js_function_fields(object, false);
}

fn visit_js_function_and_flush_code(c: &mut MarkCompactCollector, _map: Map, object: HeapObject) {
    let function = JsFunction::from_object(object);
    let mut flush_code_candidate = false;
    if c.is_valid_not_builtins_context(function.context()) {
        flush_code_candidate = c.flush_code_for_function(function);

        // Visit the shared info here with the decision just taken, so its
        // flushability (and the age counter) is evaluated once per cycle.
        let shared = function.shared();
        let shared_object = shared.object();
        let shared_mark = c.heap.mark_bit_from(shared_object.address());
        if !shared_mark.get() {
            let shared_map = shared_object.map();
            c.set_mark(shared_object, shared_mark);
            c.mark_object(shared_map.object());
            if shared.is_inobject_slack_tracking_in_progress() {
                c.detach_initial_map(shared);
            }
            c.visit_shared_function_info_fields(shared_object, flush_code_candidate);
        }
    }

    if !flush_code_candidate {
        let shared = function.shared();
        c.mark_object(shared.code().object());

        if function.code().kind() == CodeKind::Optimized {
            // Keep the non-optimized code of every inlined function alive
            // as well; bailing out of the optimized code needs it.
            let literals = FixedArray::from_object(
                function.object().field(JsFunction::LITERALS_OFFSET).to_object(),
            );
            for i in 0..literals.length() {
                let value = literals.get(i);
                if value.is_heap_object()
                    && value.to_object().map().instance_type() == InstanceType::JsFunction
                {
                    let inlined = JsFunction::from_object(value.to_object());
                    c.mark_object(inlined.shared().code().object());
                }
            }
        }
    }

    c.visit_js_function_fields(object, flush_code_candidate);
}

// ---------------------------------------------------------------------------
// The marker.

impl<'h> MarkCompactCollector<'h> {
    /// Mark every live object, process the weak surfaces, and run the
    /// after-marking cleanup. Runs under a stopped mutator with the nursery
    /// `from` semispace free to serve as marking-stack storage.
    pub(crate) fn mark_live_objects(&mut self) {
        self.in_scope(ScopeKind::McMark, |c| {
            debug_assert_eq!(c.heap.gc.state, super::CollectorState::PrepareGc);
            c.heap.gc.state = super::CollectorState::MarkLiveObjects;

            let low = c.heap.new_space.from_space_low();
            let mut high = c.heap.new_space.from_space_high();
            let capacity = *c.heap.options.marking_stack_size;
            if capacity > 0 {
                let clamped = low + capacity * BYTES_IN_WORD;
                if clamped.as_usize() < high.as_usize() {
                    high = clamped;
                }
            }
            c.marking_stack.initialize(low, high);
            debug_assert!(!c.marking_stack.overflowed());

            c.prepare_for_code_flushing();

            c.mark_roots();

            // Objects reachable from object groups containing at least one
            // marked member, to a fixpoint.
            c.process_object_groups();

            // Identify weak handles whose referents the strong closure did
            // not reach, then mark through the surviving weak roots.
            let mut global_handles = std::mem::take(&mut c.heap.global_handles);
            global_handles.identify_weak_handles(|value| {
                let object = value.to_object();
                object.address().is_zero() || !c.heap.is_marked(object)
            });
            let mut weak_slots = Vec::new();
            global_handles.iterate_weak_roots(|slot| weak_slots.push(slot));
            c.heap.global_handles = global_handles;
            for slot in weak_slots {
                c.mark_root_slot(slot);
            }
            while c.marking_stack.overflowed() {
                c.refill_marking_stack();
                c.empty_marking_stack();
            }

            // Groups again: the weak roots may have marked into unretired
            // groups.
            c.process_object_groups();

            c.after_marking();
        });
    }

    pub(crate) fn set_mark(&mut self, object: HeapObject, mark_bit: MarkBit) {
        debug_assert!(!mark_bit.get());
        mark_bit.set();
        self.tracer.increment_marked_count();
        let space = self.heap.space_of(object.address());
        self.live_bytes[space] += object.size();
    }

    /// Mark `object` and queue it grey. Newly marked descriptors get their
    /// transition-aware treatment instead of a plain push.
    pub(crate) fn mark_object(&mut self, object: HeapObject) {
        let mark_bit = self.heap.mark_bit_from(object.address());
        if !mark_bit.get() {
            self.set_mark(object, mark_bit);
            self.process_newly_marked_object(object);
        }
    }

    fn process_newly_marked_object(&mut self, object: HeapObject) {
        if object.map().instance_type() == InstanceType::Map {
            let map = Map::from_object(object);
            if *self.heap.options.cleanup_caches_in_maps_at_gc {
                map.clear_code_cache(self.heap.empty_fixed_array());
            }
            if self.collect_maps && map.is_js_object_family() {
                self.mark_map_contents(map);
            } else {
                self.push_grey(object);
            }
        } else {
            self.push_grey(object);
        }
    }

    fn push_grey(&mut self, object: HeapObject) {
        if self.marking_stack.is_full() {
            object.set_overflow();
            self.marking_stack.set_overflowed();
        } else {
            self.marking_stack.push(object);
        }
    }

    /// Mark a map's descriptor array without strongly marking transition
    /// targets, then its ordinary pointer fields.
    fn mark_map_contents(&mut self, map: Map) {
        self.mark_descriptor_array(map.instance_descriptors());
        self.visit_pointers(
            map.object().raw_field(Map::POINTER_FIELDS_BEGIN_OFFSET),
            map.object().raw_field(Map::POINTER_FIELDS_END_OFFSET),
        );
    }

    fn mark_descriptor_array(&mut self, descriptors: DescriptorArray) {
        let descriptors_object = descriptors.object();
        let descriptors_mark = self.heap.mark_bit_from(descriptors_object.address());
        if descriptors_mark.get() {
            return;
        }
        // The canonical empty descriptor array is marked as a root before
        // any map is marked.
        debug_assert!(
            descriptors.value() != self.heap.empty_descriptor_array(),
            "empty descriptor array must be pre-marked"
        );
        self.set_mark(descriptors_object, descriptors_mark);

        let contents = descriptors.contents();
        let contents_object = contents.object();
        debug_assert!(contents_object.map().instance_type() == InstanceType::FixedArray);
        debug_assert!(contents.length() % 2 == 0);
        let contents_mark = self.heap.mark_bit_from(contents_object.address());
        debug_assert!(!contents_mark.get());
        self.set_mark(contents_object, contents_mark);

        // The contents array holds (value, details) pairs. Transition and
        // null descriptors do not keep their value alive.
        for i in 0..descriptors.number_of_descriptors() {
            if (descriptors.details(i)) < PropertyType::FIRST_PHANTOM {
                let value = descriptors.value_at(i);
                if value.is_heap_object() && !value.to_object().address().is_zero() {
                    let target = value.to_object();
                    let target_mark = self.heap.mark_bit_from(target.address());
                    if !target_mark.get() {
                        self.set_mark(target, target_mark);
                        self.push_grey(target);
                    }
                }
            }
        }
        // The descriptor array itself still needs its body walked for the
        // contents pointer, which is already marked.
        self.push_grey(descriptors_object);
    }

    // -----------------------------------------------------------------
    // Slot visiting.

    pub(crate) fn visit_body(&mut self, map: Map, object: HeapObject) {
        let visit = self.visitor_table.get(map.visitor_id());
        visit(self, map, object);
    }

    /// Mark the object a slot points at, short-cutting through flattened
    /// cons strings.
    pub(crate) fn visit_pointer(&mut self, slot: Address) {
        let value = unsafe { slot.load::<Value>() };
        if !value.is_heap_object() || value.to_object().address().is_zero() {
            return;
        }
        let object = self.short_circuit_cons_string(slot);
        self.mark_object(object);
    }

    /// Mark all objects pointed to in `[start, end)`. Long ranges are
    /// traversed depth-first while the recursion budget lasts.
    pub(crate) fn visit_pointers(&mut self, start: Address, end: Address) {
        if (end - start) >> LOG_BYTES_IN_WORD as usize >= MIN_RANGE_FOR_MARKING_RECURSION {
            if self.visit_unmarked_objects(start, end) {
                return;
            }
            // We are too deep for recursion, so just mark the objects.
        }
        let mut slot = start;
        while slot.as_usize() < end.as_usize() {
            self.visit_pointer(slot);
            slot += BYTES_IN_WORD;
        }
    }

    /// Depth-first visit of all unmarked objects pointed to by
    /// `[start, end)`. Returns false if the depth budget is exhausted.
    fn visit_unmarked_objects(&mut self, start: Address, end: Address) -> bool {
        if self.recursion_depth >= MARKING_RECURSION_DEPTH_LIMIT {
            return false;
        }
        self.recursion_depth += 1;
        let mut slot = start;
        while slot.as_usize() < end.as_usize() {
            let value = unsafe { slot.load::<Value>() };
            if value.is_heap_object() && !value.to_object().address().is_zero() {
                let object = value.to_object();
                let mark_bit = self.heap.mark_bit_from(object.address());
                if !mark_bit.get() {
                    self.visit_unmarked_object(object, mark_bit);
                }
            }
            slot += BYTES_IN_WORD;
        }
        self.recursion_depth -= 1;
        true
    }

    fn visit_unmarked_object(&mut self, object: HeapObject, mark_bit: MarkBit) {
        debug_assert!(!mark_bit.get());
        let map = object.map();
        self.set_mark(object, mark_bit);
        self.mark_object(map.object());
        self.visit_body(map, object);
    }

    /// If the slot holds a cons string whose right part is the canonical
    /// empty string, rewrite it in place to the left part, unless that
    /// would create an untracked old→new edge.
    fn short_circuit_cons_string(&mut self, slot: Address) -> HeapObject {
        let object = unsafe { slot.load::<Value>() }.to_object();
        if object.map().instance_type() != InstanceType::ConsString {
            return object;
        }
        let cons = ConsString::from_object(object);
        if cons.second() != self.heap.empty_string() {
            return object;
        }
        // Without the object's start we cannot update dirty-page state, so
        // only replace when doing so cannot change it.
        let first = cons.first();
        if !self.heap.new_space.contains(object.address()) && self.heap.in_new_space(first) {
            return object;
        }
        unsafe { slot.store::<Value>(first) };
        first.to_object()
    }

    // -----------------------------------------------------------------
    // Roots.

    fn mark_roots(&mut self) {
        let mut slots = Vec::new();
        self.heap.iterate_strong_roots(|slot| slots.push(slot));
        for slot in slots {
            self.mark_root_slot(slot);
        }

        self.mark_symbol_table();

        // There may be overflowed objects in the heap. Visit them now.
        while self.marking_stack.overflowed() {
            self.refill_marking_stack();
            self.empty_marking_stack();
        }
    }

    /// Mark a root slot's referent black, its descriptor, its body, and
    /// then drain everything reachable from it.
    fn mark_root_slot(&mut self, slot: Address) {
        let value = unsafe { slot.load::<Value>() };
        if !value.is_heap_object() || value.to_object().address().is_zero() {
            return;
        }
        let object = self.short_circuit_cons_string(slot);
        let mark_bit = self.heap.mark_bit_from(object.address());
        if mark_bit.get() {
            return;
        }
        let map = object.map();
        self.set_mark(object, mark_bit);
        self.mark_object(map.object());
        self.visit_body(map, object);
        // Mark all the objects reachable from the map and body. May leave
        // overflowed objects in the heap.
        self.empty_marking_stack();
    }

    /// The symbol table is marked as a weak leaf: the table and its prefix
    /// are live, its entries are not roots.
    fn mark_symbol_table(&mut self) {
        let table = self.heap.symbol_table.to_object();
        let mark_bit = self.heap.mark_bit_from(table.address());
        if !mark_bit.get() {
            self.set_mark(table, mark_bit);
        }
        self.visit_pointers(
            table.raw_field(FixedArray::HEADER_SIZE),
            table.raw_field(FixedArray::HEADER_SIZE + BYTES_IN_WORD),
        );
        self.process_marking_stack();
    }

    // -----------------------------------------------------------------
    // Code-flushing preparation.

    fn prepare_for_code_flushing(&mut self) {
        if !self.flush_code_enabled {
            self.visitor_table.enable_code_flushing(false);
            return;
        }
        self.visitor_table.enable_code_flushing(true);

        // Descriptor marking relies on the empty descriptor array being
        // marked before any other descriptor array.
        let empty_descriptors = self.heap.empty_descriptor_array().to_object();
        self.mark_object(empty_descriptors);

        // Make sure we are not flushing code that is referenced from any
        // stack frame, running or archived.
        let mut frame_code: Vec<Value> = self.heap.execution_stack.clone();
        for thread in &self.heap.archived_threads {
            frame_code.extend_from_slice(thread);
        }
        for value in frame_code {
            if value.is_heap_object() {
                self.mark_object(value.to_object());
            }
        }

        // Shared function infos reachable from the compilation cache or
        // from handles keep their code.
        let mut shared_values: Vec<Value> = self.heap.compilation_cache.clone();
        shared_values.extend_from_slice(&self.heap.handles);
        for value in shared_values {
            if value.is_heap_object()
                && value.to_object().map().instance_type() == InstanceType::SharedFunctionInfo
            {
                let shared = SharedFunctionInfo::from_object(value.to_object());
                self.mark_object(shared.code().object());
                self.mark_object(shared.object());
            }
        }

        self.process_marking_stack();
    }

    // -----------------------------------------------------------------
    // Object groups.

    /// One round: groups with any marked member get every member marked
    /// grey and are retired.
    fn mark_object_groups(&mut self) {
        let mut groups = std::mem::take(self.heap.global_handles.groups_mut());
        for entry in groups.iter_mut() {
            let Some(group) = entry else {
                continue;
            };

            let mut group_marked = false;
            for &handle in group.members() {
                let value = self.heap.global_handles.get(handle);
                if value.is_heap_object()
                    && !value.to_object().address().is_zero()
                    && self.heap.is_marked(value.to_object())
                {
                    group_marked = true;
                    break;
                }
            }
            if !group_marked {
                continue;
            }

            // An object in the group is marked, so mark all white members
            // grey and retire the group.
            for &handle in group.members() {
                let value = self.heap.global_handles.get(handle);
                if value.is_heap_object() && !value.to_object().address().is_zero() {
                    self.mark_object(value.to_object());
                }
            }
            *entry = None;
        }
        *self.heap.global_handles.groups_mut() = groups;
    }

    fn process_object_groups(&mut self) {
        debug_assert!(self.marking_stack.is_empty());
        let mut work_to_do = true;
        while work_to_do {
            self.mark_object_groups();
            work_to_do = !self.marking_stack.is_empty();
            self.process_marking_stack();
        }
    }

    // -----------------------------------------------------------------
    // Stack processing and overflow recovery.

    /// Pop and scan until the stack drains. May leave overflowed objects
    /// in the heap.
    pub(crate) fn empty_marking_stack(&mut self) {
        while !self.marking_stack.is_empty() {
            let object = self.marking_stack.pop();
            debug_assert!(self.heap.is_marked(object));
            debug_assert!(!object.is_overflowed());
            let map = object.map();
            self.mark_object(map.object());
            self.visit_body(map, object);
        }
    }

    /// Sweep the heap for overflowed objects, clear their overflow bits,
    /// and push them. Stops early if the stack fills again, leaving the
    /// overflow flag raised; clears the flag only after a complete sweep.
    pub(crate) fn refill_marking_stack(&mut self) {
        debug_assert!(self.marking_stack.overflowed());

        // The nursery, linearly.
        let mut current = self.heap.new_space.bottom();
        let top = self.heap.new_space.top();
        while current.as_usize() < top.as_usize() {
            let object = HeapObject::from_address(current);
            let size = object.size();
            if object.is_overflowed() {
                object.clear_overflow();
                debug_assert!(self.heap.is_marked(object));
                self.marking_stack.push(object);
                if self.marking_stack.is_full() {
                    return;
                }
            }
            current += size;
        }

        // The paged spaces, through their object-start bitmaps: marked
        // objects are exactly the set bits, whatever state the page's dead
        // regions are in.
        for id in [
            SpaceId::OldPointer,
            SpaceId::OldData,
            SpaceId::Code,
            SpaceId::Map,
            SpaceId::Cell,
        ] {
            let pages: Vec<_> = self.heap.paged_space(id).pages().collect();
            for page in pages {
                if !self.scan_overflowed_on_page(page) {
                    return;
                }
            }
        }

        // Large objects.
        let mut large = Vec::new();
        self.heap.lo_space.iterate_objects(|object| large.push(object));
        for object in large {
            if object.is_overflowed() {
                object.clear_overflow();
                debug_assert!(self.heap.is_marked(object));
                self.marking_stack.push(object);
                if self.marking_stack.is_full() {
                    return;
                }
            }
        }

        self.marking_stack.clear_overflowed();
    }

    /// Returns false if the stack filled up mid-page.
    fn scan_overflowed_on_page(&mut self, page: crate::heap::page::Page) -> bool {
        let bitmap = page.markbits();
        let mut starts = [0u32; 16];
        for cell_index in crate::heap::page::FIRST_USED_CELL..bitmap.cell_count() {
            let cell = bitmap.cell(cell_index).load(std::sync::atomic::Ordering::Relaxed);
            if cell == 0 {
                continue;
            }
            let count = mark_word_to_object_starts(cell, &mut starts);
            for &offset in &starts[..count] {
                let index = Bitmap::cell_to_index(cell_index) + offset as usize;
                let object = HeapObject::from_address(page.markbit_index_to_address(index));
                if object.is_overflowed() {
                    object.clear_overflow();
                    self.marking_stack.push(object);
                    if self.marking_stack.is_full() {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Drain the stack to a true fixpoint: no grey objects on the stack,
    /// no overflowed objects in the heap.
    pub(crate) fn process_marking_stack(&mut self) {
        self.empty_marking_stack();
        while self.marking_stack.overflowed() {
            self.refill_marking_stack();
            self.empty_marking_stack();
        }
    }

    /// Call `f` for every marked object, in the fixed space order.
    pub(crate) fn for_each_marked_object(&mut self, mut f: impl FnMut(HeapObject)) {
        let mut current = self.heap.new_space.bottom();
        let top = self.heap.new_space.top();
        while current.as_usize() < top.as_usize() {
            let object = HeapObject::from_address(current);
            let size = object.size();
            if self.heap.is_marked(object) {
                f(object);
            }
            current += size;
        }

        let mut starts = [0u32; 16];
        for id in [
            SpaceId::OldPointer,
            SpaceId::OldData,
            SpaceId::Code,
            SpaceId::Map,
            SpaceId::Cell,
        ] {
            let pages: Vec<_> = self.heap.paged_space(id).pages().collect();
            for page in pages {
                let bitmap = page.markbits();
                for cell_index in crate::heap::page::FIRST_USED_CELL..bitmap.cell_count() {
                    let cell =
                        bitmap.cell(cell_index).load(std::sync::atomic::Ordering::Relaxed);
                    if cell == 0 {
                        continue;
                    }
                    let count = mark_word_to_object_starts(cell, &mut starts);
                    for &offset in &starts[..count] {
                        let index = Bitmap::cell_to_index(cell_index) + offset as usize;
                        f(HeapObject::from_address(page.markbit_index_to_address(index)));
                    }
                }
            }
        }

        let mut large = Vec::new();
        self.heap.lo_space.iterate_objects(|object| large.push(object));
        for object in large {
            if self.heap.is_marked(object) {
                f(object);
            }
        }
    }

    // -----------------------------------------------------------------
    // After-marking cleanup.

    fn after_marking(&mut self) {
        // Prune the symbol table: entries only the table kept alive are
        // replaced with the deleted sentinel, external payloads are
        // released first.
        let table = self.heap.symbol_table();
        let null = self.heap.null_value();
        let mut removed = 0isize;
        for i in 1..table.length() {
            let entry = table.get(i);
            if entry.is_heap_object()
                && !entry.to_object().address().is_zero()
                && entry != null
                && !self.heap.is_marked(entry.to_object())
            {
                let object = entry.to_object();
                if object.map().instance_type() == InstanceType::ExternalString {
                    ExternalString::from_object(object).finalize();
                }
                table.set(i, null);
                removed += 1;
            }
        }
        table.set(0, Value::from_smi(table.get(0).to_smi() - removed));

        // The external string table: finalize dead strings and zap their
        // entries; the survivors stay.
        let mut slots = Vec::new();
        self.heap.external_string_table.iterate_slots(|slot| slots.push(slot));
        for slot in slots {
            let value = unsafe { slot.load::<Value>() };
            if value.is_heap_object()
                && !value.to_object().address().is_zero()
                && !self.heap.is_marked(value.to_object())
            {
                let object = value.to_object();
                if object.map().instance_type() == InstanceType::ExternalString {
                    ExternalString::from_object(object).finalize();
                }
                unsafe { slot.store::<Value>(null) };
            }
        }
        self.heap.external_string_table.clean_up(null);

        // Process the weak references.
        self.process_weak_references();

        // Remove object groups after the marking phase.
        self.heap.global_handles.remove_object_groups();

        // Flush code from collected candidates.
        if self.flush_code_enabled {
            let heap: &Heap = self.heap;
            self.flusher.process_candidates(heap);
        }

        // Clean up dead objects from the runtime profiler.
        let samples = std::mem::take(&mut self.heap.profiler_samples);
        let retained: Vec<Value> = samples
            .into_iter()
            .filter(|value| {
                value.is_heap_object()
                    && !value.to_object().address().is_zero()
                    && self.heap.is_marked(value.to_object())
            })
            .collect();
        self.heap.profiler_samples = retained;
    }

    /// Relink the weakly held global-contexts list, keeping only marked
    /// contexts.
    fn process_weak_references(&mut self) {
        let undefined = self.heap.undefined_value();
        let mut retained_head = undefined;
        let mut tail: Option<Context> = None;

        let mut current = self.heap.global_contexts_list;
        while current.is_heap_object() && current != undefined {
            let context = Context::from_object(current.to_object());
            let next = context.next_context_link();
            if self.heap.is_marked(context.object()) {
                match tail {
                    None => retained_head = current,
                    Some(previous) => previous.set_next_context_link(current),
                }
                tail = Some(context);
            }
            current = next;
        }
        if let Some(previous) = tail {
            previous.set_next_context_link(undefined);
        }
        self.heap.global_contexts_list = retained_head;
    }

    // -----------------------------------------------------------------
    // Code-flushing predicates.

    fn is_valid_not_builtins_context(&self, value: Value) -> bool {
        value.is_heap_object()
            && !value.to_object().address().is_zero()
            && value.to_object().map().instance_type() == InstanceType::Context
    }

    fn has_source_code(&self, shared: SharedFunctionInfo) -> bool {
        let undefined = self.heap.undefined_value();
        let script = shared.script();
        if script == undefined || !script.is_heap_object() {
            return false;
        }
        let script = FixedArray::from_object(script.to_object());
        script.length() > 0 && script.get(0) != undefined
    }

    fn is_compiled(&self, shared: SharedFunctionInfo) -> bool {
        shared.code().value() != self.heap.lazy_compile_stub()
    }

    pub(crate) fn is_flushable_shared(&mut self, shared: SharedFunctionInfo) -> bool {
        // Code referenced from a stack, the compilation cache, or an
        // optimized inliner was marked before we got here; seeing it marked
        // restarts the aging clock.
        let code = shared.code();
        if self.heap.is_marked(code.object()) {
            shared.set_code_age(0);
            return false;
        }

        // The function must be compiled with its source around, so it can
        // be recompiled when called again.
        if !(self.is_compiled(shared) && self.has_source_code(shared)) {
            return false;
        }

        // We never flush code for api functions.
        if shared.function_data() != self.heap.undefined_value() {
            return false;
        }

        // Only flush plain function code.
        if code.kind() != CodeKind::Function {
            return false;
        }

        if !shared.allows_lazy_compilation() {
            return false;
        }

        // A full script wrapped in a function is not flushed.
        if shared.is_toplevel() {
            return false;
        }

        // Age this shared function info.
        if shared.code_age() + 1 < CODE_AGE_THRESHOLD {
            shared.set_code_age(shared.code_age() + 1);
            return false;
        }

        true
    }

    fn is_flushable_function(&mut self, function: JsFunction) -> bool {
        let shared = function.shared();

        let code_mark = self.heap.mark_bit_from(function.code().object().address());
        if code_mark.get() {
            shared.set_code_age(0);
            return false;
        }

        // We do not flush code for optimized functions.
        if function.code().object() != shared.code().object() {
            return false;
        }

        self.is_flushable_shared(shared)
    }

    fn flush_code_for_function(&mut self, function: JsFunction) -> bool {
        if !self.is_flushable_function(function) {
            return false;
        }
        // This function's code looks flushable, but the final decision
        // waits until the end of marking, when every other reference to
        // the same code has had its say.
        self.flusher.add_function_candidate(function);
        true
    }

    fn detach_initial_map(&mut self, shared: SharedFunctionInfo) {
        let initial_map = shared.initial_map();
        if initial_map.is_heap_object()
            && initial_map.to_object().map().instance_type() == InstanceType::Map
        {
            shared.set_initial_map(self.heap.undefined_value());
            Map::from_object(initial_map.to_object()).set_attached_to_shared_function_info(true);
        }
    }

    pub(crate) fn visit_shared_function_info_fields(
        &mut self,
        object: HeapObject,
        flush_code_candidate: bool,
    ) {
        self.visit_pointer(object.raw_field(SharedFunctionInfo::NAME_OFFSET));
        if !flush_code_candidate {
            self.visit_pointer(object.raw_field(SharedFunctionInfo::CODE_OFFSET));
        }
        self.visit_pointers(
            object.raw_field(SharedFunctionInfo::SCOPE_INFO_OFFSET),
            object.raw_field(SharedFunctionInfo::SIZE),
        );
    }

    pub(crate) fn visit_js_function_fields(
        &mut self,
        object: HeapObject,
        flush_code_candidate: bool,
    ) {
        self.visit_pointers(
            object.raw_field(JsFunction::PROPERTIES_OFFSET),
            object.raw_field(JsFunction::CODE_ENTRY_OFFSET),
        );
        if !flush_code_candidate {
            let entry = unsafe { object.raw_field(JsFunction::CODE_ENTRY_OFFSET).load::<usize>() };
            let code = Code::from_entry_address(unsafe { Address::from_usize(entry) });
            self.mark_object(code.object());
        }
        // Don't visit the next-function link; it is weak.
        self.visit_pointers(
            object.raw_field(JsFunction::CONTEXT_OFFSET),
            object.raw_field(JsFunction::NON_WEAK_FIELDS_END_OFFSET),
        );
    }
}
