//! The heap: spaces, canonical objects, root-set providers, and the
//! write barrier. One [`Heap`] value owns everything, including the
//! collector state, so independent heaps can coexist in one process.

pub mod factory;
pub mod free_list;
pub mod page;
pub mod roots;
pub mod space;
pub mod store_buffer;

use crate::collector::{GcState, MarkCompactCollector};
use crate::heap::page::Page;
use crate::heap::roots::{ExternalStringTable, GlobalHandles};
use crate::heap::space::{LargeObjectSpace, NewSpace, PagedSpace, SpaceId};
use crate::heap::store_buffer::StoreBuffer;
use crate::object::{ExternalString, FixedArray, HeapObject, InstanceType, Value, VisitorId};
use crate::util::markbits::MarkBit;
use crate::util::options::Options;
use crate::util::tracer::GcTracer;
use crate::util::Address;

/// The objects every cycle relies on by identity: the canonical maps, the
/// singleton oddballs, the empty containers and the lazy-compile stub. Each
/// field is a strong root slot.
pub struct CanonicalRoots {
    pub meta_map: Value,
    pub fixed_array_map: Value,
    pub byte_array_map: Value,
    pub seq_string_map: Value,
    pub symbol_map: Value,
    pub external_string_map: Value,
    pub cons_string_map: Value,
    pub oddball_map: Value,
    pub code_map: Value,
    pub shared_function_info_map: Value,
    pub js_function_map: Value,
    pub property_cell_map: Value,
    pub context_map: Value,
    pub descriptor_array_map: Value,
    pub empty_fixed_array: Value,
    pub empty_descriptor_array: Value,
    pub empty_string: Value,
    pub undefined_value: Value,
    pub null_value: Value,
    pub lazy_compile_stub: Value,
}

impl CanonicalRoots {
    pub(crate) fn iterate_slots(&mut self, mut f: impl FnMut(Address)) {
        // The maps live in map space and cannot move, but they still have
        // to be marked; the rest are ordinary old-space objects.
        for slot in [
            &mut self.meta_map,
            &mut self.fixed_array_map,
            &mut self.byte_array_map,
            &mut self.seq_string_map,
            &mut self.symbol_map,
            &mut self.external_string_map,
            &mut self.cons_string_map,
            &mut self.oddball_map,
            &mut self.code_map,
            &mut self.shared_function_info_map,
            &mut self.js_function_map,
            &mut self.property_cell_map,
            &mut self.context_map,
            &mut self.descriptor_array_map,
            &mut self.empty_fixed_array,
            &mut self.empty_descriptor_array,
            &mut self.empty_string,
            &mut self.undefined_value,
            &mut self.null_value,
            &mut self.lazy_compile_stub,
        ] {
            f(Address::from_mut_ptr(slot));
        }
    }
}

pub struct Heap {
    pub(crate) options: Options,
    pub(crate) new_space: NewSpace,
    pub(crate) old_pointer_space: PagedSpace,
    pub(crate) old_data_space: PagedSpace,
    pub(crate) code_space: PagedSpace,
    pub(crate) map_space: PagedSpace,
    pub(crate) cell_space: PagedSpace,
    pub(crate) lo_space: LargeObjectSpace,
    pub(crate) store_buffer: StoreBuffer,
    pub(crate) global_handles: GlobalHandles,
    pub(crate) external_string_table: ExternalStringTable,
    /// Local handle scopes: plain strong root slots.
    pub(crate) handles: Vec<Value>,
    /// Code objects referenced from the running thread's stack frames.
    pub(crate) execution_stack: Vec<Value>,
    /// Stacks of threads parked by the thread manager.
    pub(crate) archived_threads: Vec<Vec<Value>>,
    /// Recently compiled shared function infos. Dropped wholesale when a
    /// cycle finishes, like the other identity-dependent caches.
    pub(crate) compilation_cache: Vec<Value>,
    /// Functions sampled by the runtime profiler; weak, pruned after
    /// marking.
    pub(crate) profiler_samples: Vec<Value>,
    /// Head of the weakly linked list of global contexts.
    pub(crate) global_contexts_list: Value,
    pub(crate) symbol_table: Value,
    pub(crate) roots: CanonicalRoots,
    pub(crate) debugger_attached: bool,
    pub(crate) debug_jit_active: bool,
    pub(crate) gc: GcState,
}

impl Heap {
    pub fn new(options: Options) -> Heap {
        crate::util::logger::try_init(&options);
        let max_pages = *options.max_old_space_pages;
        let mut heap = Heap {
            new_space: NewSpace::new(*options.semispace_size),
            old_pointer_space: PagedSpace::new(SpaceId::OldPointer, max_pages),
            old_data_space: PagedSpace::new(SpaceId::OldData, max_pages),
            code_space: PagedSpace::new(SpaceId::Code, max_pages),
            map_space: PagedSpace::new(SpaceId::Map, max_pages),
            cell_space: PagedSpace::new(SpaceId::Cell, max_pages),
            lo_space: LargeObjectSpace::new(),
            store_buffer: StoreBuffer::new(),
            global_handles: GlobalHandles::new(),
            external_string_table: ExternalStringTable::new(),
            handles: Vec::new(),
            execution_stack: Vec::new(),
            archived_threads: Vec::new(),
            compilation_cache: Vec::new(),
            profiler_samples: Vec::new(),
            global_contexts_list: Value::from_smi(0),
            symbol_table: Value::from_smi(0),
            roots: factory::bootstrap_roots_placeholder(),
            debugger_attached: false,
            debug_jit_active: false,
            gc: GcState::new(),
            options,
        };
        heap.bootstrap();
        info!(
            "heap initialized: {} byte semispaces, {} page budget per old space",
            heap.new_space.semispace_size(),
            max_pages
        );
        heap
    }

    pub fn with_defaults() -> Heap {
        let mut options = Options::default();
        options.read_env_var_settings();
        Heap::new(options)
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut Options {
        &mut self.options
    }

    // ---------------------------------------------------------------------
    // Collection entry points.

    /// Run one full stop-the-world collection.
    pub fn collect_garbage(&mut self) {
        let mut collector = MarkCompactCollector::new(self);
        collector.prepare();
        collector.collect();
    }

    /// Statistics of the most recent collection.
    pub fn last_gc_tracer(&self) -> Option<&GcTracer> {
        self.gc.last_tracer.as_ref()
    }

    pub fn compact_on_next_gc(&self) -> bool {
        self.gc.compact_on_next_gc
    }

    pub fn last_collection_was_compacting(&self) -> bool {
        self.gc.last_was_compacting
    }

    /// Begin an incremental marking cycle, if none is in progress.
    pub fn start_incremental_marking(&mut self) {
        if !*self.options.incremental_marking {
            return;
        }
        let mut incremental = std::mem::take(&mut self.gc.incremental);
        incremental.start(self);
        self.gc.incremental = incremental;
    }

    /// Advance incremental marking by up to `budget` objects.
    pub fn incremental_marking_step(&mut self, budget: usize) {
        let mut incremental = std::mem::take(&mut self.gc.incremental);
        incremental.step(self, budget);
        self.gc.incremental = incremental;
    }

    // ---------------------------------------------------------------------
    // Space queries.

    pub fn in_new_space(&self, value: Value) -> bool {
        value.is_heap_object() && self.new_space.contains(value.to_object().address())
    }

    pub fn space_of(&self, addr: Address) -> SpaceId {
        if self.new_space.contains(addr) {
            SpaceId::New
        } else if self.lo_space.contains(addr) {
            SpaceId::Large
        } else {
            match Page::from_address(addr).space_id() {
                x if x == SpaceId::OldPointer as usize => SpaceId::OldPointer,
                x if x == SpaceId::OldData as usize => SpaceId::OldData,
                x if x == SpaceId::Code as usize => SpaceId::Code,
                x if x == SpaceId::Map as usize => SpaceId::Map,
                x if x == SpaceId::Cell as usize => SpaceId::Cell,
                _ => unreachable!("address outside every space"),
            }
        }
    }

    pub fn paged_space(&self, id: SpaceId) -> &PagedSpace {
        match id {
            SpaceId::OldPointer => &self.old_pointer_space,
            SpaceId::OldData => &self.old_data_space,
            SpaceId::Code => &self.code_space,
            SpaceId::Map => &self.map_space,
            SpaceId::Cell => &self.cell_space,
            _ => panic!("{:?} is not a paged space", id),
        }
    }

    pub(crate) fn paged_space_mut(&mut self, id: SpaceId) -> &mut PagedSpace {
        match id {
            SpaceId::OldPointer => &mut self.old_pointer_space,
            SpaceId::OldData => &mut self.old_data_space,
            SpaceId::Code => &mut self.code_space,
            SpaceId::Map => &mut self.map_space,
            SpaceId::Cell => &mut self.cell_space,
            _ => panic!("{:?} is not a paged space", id),
        }
    }

    pub fn new_space(&self) -> &NewSpace {
        &self.new_space
    }

    /// Which old space an object of this class promotes into.
    pub(crate) fn target_space_id(object: HeapObject) -> SpaceId {
        match object.map().visitor_id() {
            VisitorId::DataObject => SpaceId::OldData,
            _ => SpaceId::OldPointer,
        }
    }

    /// The mark bit of the word at `addr`, whichever space it is in.
    pub(crate) fn mark_bit_from(&self, addr: Address) -> MarkBit {
        if self.new_space.contains(addr) {
            self.new_space.mark_bit_for(addr)
        } else if let Some(chunk) = self.lo_space.chunk_for(addr) {
            chunk.mark_bit()
        } else {
            Page::from_address(addr).mark_bit_for(addr)
        }
    }

    pub(crate) fn is_marked(&self, object: HeapObject) -> bool {
        self.mark_bit_from(object.address()).get()
    }

    // ---------------------------------------------------------------------
    // Roots and mutator surfaces.

    /// Open a local strong handle. The returned index stays valid across
    /// collections; the slot is updated when its referent moves.
    pub fn create_local_handle(&mut self, value: Value) -> usize {
        self.handles.push(value);
        self.handles.len() - 1
    }

    pub fn local_handle(&self, index: usize) -> Value {
        self.handles[index]
    }

    pub fn set_local_handle(&mut self, index: usize, value: Value) {
        self.handles[index] = value;
    }

    pub fn global_handles(&self) -> &GlobalHandles {
        &self.global_handles
    }

    pub fn global_handles_mut(&mut self) -> &mut GlobalHandles {
        &mut self.global_handles
    }

    pub fn external_string_table(&self) -> &ExternalStringTable {
        &self.external_string_table
    }

    pub fn store_buffer(&self) -> &StoreBuffer {
        &self.store_buffer
    }

    pub fn symbol_table(&self) -> FixedArray {
        FixedArray::from_object(self.symbol_table.to_object())
    }

    pub fn global_contexts_list(&self) -> Value {
        self.global_contexts_list
    }

    pub fn set_debugger_attached(&mut self, attached: bool) {
        self.debugger_attached = attached;
    }

    pub fn set_debug_jit_active(&mut self, active: bool) {
        self.debug_jit_active = active;
    }

    /// Model the running thread referencing a code object from a frame.
    pub fn push_stack_frame_code(&mut self, code: Value) {
        self.execution_stack.push(code);
    }

    pub fn pop_stack_frame_code(&mut self) -> Option<Value> {
        self.execution_stack.pop()
    }

    pub fn archive_thread(&mut self, frame_code: Vec<Value>) {
        self.archived_threads.push(frame_code);
    }

    pub fn add_compilation_cache_entry(&mut self, shared: Value) {
        self.compilation_cache.push(shared);
    }

    pub fn add_profiler_sample(&mut self, function: Value) {
        self.profiler_samples.push(function);
    }

    pub fn profiler_samples(&self) -> &[Value] {
        &self.profiler_samples
    }

    /// Store into an object field through the write barrier: an old→new
    /// pointer store records the slot in the store buffer.
    pub fn write_field(&mut self, object: HeapObject, offset: usize, value: Value) {
        object.set_field(offset, value);
        if self.in_new_space(value) && !self.new_space.contains(object.address()) {
            self.store_buffer.enter_directly(object.raw_field(offset));
        }
    }

    /// Iterate the strong roots: canonical objects, local handles, strong
    /// global handles, and the code referenced from mutator stacks.
    pub(crate) fn iterate_strong_roots(&mut self, mut f: impl FnMut(Address)) {
        self.roots.iterate_slots(&mut f);
        for slot in &mut self.handles {
            f(Address::from_mut_ptr(slot));
        }
        self.global_handles.iterate_strong_roots(&mut f);
        for slot in &mut self.execution_stack {
            f(Address::from_mut_ptr(slot));
        }
        for thread in &mut self.archived_threads {
            for slot in thread {
                f(Address::from_mut_ptr(slot));
            }
        }
    }

    /// Iterate every root slot there is, for the pointer-updating passes:
    /// the strong roots plus all weak surfaces whose slots must track moved
    /// objects.
    pub(crate) fn iterate_all_root_slots(&mut self, mut f: impl FnMut(Address)) {
        self.roots.iterate_slots(&mut f);
        for slot in &mut self.handles {
            f(Address::from_mut_ptr(slot));
        }
        self.global_handles.iterate_all_slots(&mut f);
        for slot in &mut self.execution_stack {
            f(Address::from_mut_ptr(slot));
        }
        for thread in &mut self.archived_threads {
            for slot in thread {
                f(Address::from_mut_ptr(slot));
            }
        }
        for slot in &mut self.profiler_samples {
            f(Address::from_mut_ptr(slot));
        }
        for slot in &mut self.compilation_cache {
            f(Address::from_mut_ptr(slot));
        }
        self.external_string_table.iterate_slots(&mut f);
        f(Address::from_mut_ptr(&mut self.symbol_table));
        f(Address::from_mut_ptr(&mut self.global_contexts_list));
    }

    // Convenient canonical accessors.

    pub fn undefined_value(&self) -> Value {
        self.roots.undefined_value
    }

    pub fn null_value(&self) -> Value {
        self.roots.null_value
    }

    pub fn empty_string(&self) -> Value {
        self.roots.empty_string
    }

    pub fn empty_fixed_array(&self) -> Value {
        self.roots.empty_fixed_array
    }

    pub fn empty_descriptor_array(&self) -> Value {
        self.roots.empty_descriptor_array
    }

    pub fn lazy_compile_stub(&self) -> Value {
        self.roots.lazy_compile_stub
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        // External payloads are owned through the heap; release whatever is
        // still registered when the heap goes away.
        let mut slots = Vec::new();
        self.external_string_table.iterate_slots(|slot| slots.push(slot));
        for slot in slots {
            let value = unsafe { slot.load::<Value>() };
            if value.is_heap_object() && !value.to_object().address().is_zero() {
                let object = value.to_object();
                if object.map().instance_type() == InstanceType::ExternalString {
                    ExternalString::from_object(object).finalize();
                }
            }
        }
    }
}
