//! The stop-the-world mark-compact collector.
//!
//! A [`MarkCompactCollector`] is built per cycle; it borrows the heap and
//! owns the cycle-local machinery: the marking stack laid over the idle
//! semispace, the code-flusher candidate lists, the visitor dispatch table
//! and the per-space live accounting. State that survives between cycles
//! (the compaction arming bit, incremental marking, the last cycle's
//! statistics) lives in [`GcState`] on the heap.
//!
//! Cycle order: prepare → mark (with incremental finalization first if a
//! cycle was in flight) → clear dead map transitions → sweep the old
//! spaces, scavenging the nursery in the middle and the map space last →
//! optionally relocate the movable old spaces → finish.

pub mod code_flusher;
pub mod compactor;
pub mod incremental;
pub mod map_transitions;
pub mod marker;
pub mod scavenger;
pub mod sweeper;

use enum_map::EnumMap;

use crate::collector::code_flusher::CodeFlusher;
use crate::collector::incremental::IncrementalMarking;
use crate::collector::marker::VisitorTable;
use crate::heap::space::SpaceId;
use crate::heap::Heap;
use crate::util::constants::*;
use crate::util::marking_stack::MarkingStack;
use crate::util::tracer::{GcTracer, ScopeKind};

/// The collector's phase, tracked for assertions and introspection.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CollectorState {
    Idle,
    PrepareGc,
    MarkLiveObjects,
    SweepSpaces,
    RelocateObjects,
}

/// Collector state that outlives a single cycle.
pub struct GcState {
    pub(crate) state: CollectorState,
    pub(crate) compact_on_next_gc: bool,
    pub(crate) last_was_compacting: bool,
    pub(crate) incremental: IncrementalMarking,
    pub(crate) last_tracer: Option<GcTracer>,
}

impl GcState {
    pub fn new() -> GcState {
        GcState {
            state: CollectorState::Idle,
            compact_on_next_gc: false,
            last_was_compacting: false,
            incremental: IncrementalMarking::new(),
            last_tracer: None,
        }
    }
}

impl Default for GcState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MarkCompactCollector<'h> {
    pub(crate) heap: &'h mut Heap,
    pub(crate) tracer: GcTracer,
    pub(crate) marking_stack: MarkingStack,
    pub(crate) flusher: CodeFlusher,
    pub(crate) visitor_table: VisitorTable,
    pub(crate) live_bytes: EnumMap<SpaceId, usize>,
    pub(crate) compacting_collection: bool,
    pub(crate) collect_maps: bool,
    pub(crate) flush_code_enabled: bool,
    pub(crate) sweep_precisely: bool,
    pub(crate) recursion_depth: usize,
}

impl<'h> MarkCompactCollector<'h> {
    pub(crate) fn new(heap: &'h mut Heap) -> MarkCompactCollector<'h> {
        MarkCompactCollector {
            heap,
            tracer: GcTracer::new(),
            marking_stack: MarkingStack::new(),
            flusher: CodeFlusher::new(),
            visitor_table: VisitorTable::new(),
            live_bytes: EnumMap::default(),
            compacting_collection: false,
            collect_maps: false,
            flush_code_enabled: false,
            sweep_precisely: false,
            recursion_depth: 0,
        }
    }

    /// Run `f` under the named tracer scope.
    pub(crate) fn in_scope<R>(
        &mut self,
        kind: ScopeKind,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        let start = std::time::Instant::now();
        let result = f(self);
        self.tracer.record_scope_time(kind, start.elapsed());
        result
    }

    /// Decide the shape of the cycle and put the heap into a collectable
    /// state: resolve the flags, install back pointers for a map-collecting
    /// cycle, and clear the bitmaps (unless an incremental cycle already
    /// painted them).
    pub(crate) fn prepare(&mut self) {
        let options = &self.heap.options;
        self.flush_code_enabled = *options.flush_code && !self.heap.debugger_attached;
        let incremental_stopped = self.heap.gc.incremental.is_stopped();
        // The map-collection walk cannot tell incremental grey from black,
        // so it sits a cycle out when one is being finalized.
        self.collect_maps = *options.collect_maps && incremental_stopped;

        debug_assert_eq!(self.heap.gc.state, CollectorState::Idle);
        self.heap.gc.state = CollectorState::PrepareGc;

        self.compacting_collection =
            *options.always_compact || self.heap.gc.compact_on_next_gc;
        self.heap.gc.compact_on_next_gc = false;
        if *options.never_compact {
            self.compacting_collection = false;
        }
        if self.heap.debug_jit_active {
            // Relocating code consumers under an attached JIT debug
            // interface would invalidate its address registry.
            self.compacting_collection = false;
        }
        if !incremental_stopped {
            self.compacting_collection = false;
        }
        // A compacting cycle iterates the movable spaces linearly
        // afterwards, which only a precise sweep guarantees.
        self.sweep_precisely = *options.sweep_precisely || self.compacting_collection;

        if self.collect_maps {
            self.create_back_pointers();
        }

        for id in [
            SpaceId::OldPointer,
            SpaceId::OldData,
            SpaceId::Code,
            SpaceId::Map,
            SpaceId::Cell,
        ] {
            self.heap.paged_space_mut(id).prepare_for_mark_compact();
        }

        if incremental_stopped {
            let bottom = self.heap.new_space.bottom();
            let used = self.heap.new_space.top() - bottom;
            let rounded = (used + BYTES_PER_CELL - 1) & !(BYTES_PER_CELL - 1);
            self.heap.new_space.clear_mark_range(bottom, rounded);

            for id in [
                SpaceId::Code,
                SpaceId::Map,
                SpaceId::OldPointer,
                SpaceId::OldData,
                SpaceId::Cell,
            ] {
                self.heap.paged_space(id).clear_markbits();
            }
            self.heap.lo_space.clear_markbits();

            #[cfg(debug_assertions)]
            self.verify_markbits_are_clean();
        }

        self.live_bytes = EnumMap::default();
    }

    /// The collection proper. `prepare` must have run.
    pub(crate) fn collect(&mut self) {
        debug_assert_eq!(self.heap.gc.state, CollectorState::PrepareGc);

        if self.compacting_collection {
            self.tracer.set_is_compacting();
        }

        if !self.heap.gc.incremental.is_stopped() {
            self.in_scope(ScopeKind::McMark, |c| {
                let mut incremental = std::mem::take(&mut c.heap.gc.incremental);
                incremental.finalize(c.heap);
                c.heap.gc.incremental = incremental;
            });
            debug_assert!(self.heap.gc.incremental.is_stopped());
        }

        self.mark_live_objects();

        if self.collect_maps {
            self.clear_nonlive_transitions();
        }

        #[cfg(debug_assertions)]
        self.verify_marking();

        self.sweep_spaces();

        if self.compacting_collection {
            self.compact_spaces();
        }

        self.finish();
    }

    fn finish(&mut self) {
        debug_assert!(matches!(
            self.heap.gc.state,
            CollectorState::SweepSpaces | CollectorState::RelocateObjects
        ));
        self.heap.gc.state = CollectorState::Idle;

        // Identity-dependent caches are rebuilt lazily after a collection.
        self.heap.compilation_cache.clear();
        let null = self.heap.null_value();
        self.heap.external_string_table.clean_up(null);
        self.heap.global_handles.clear_pending();

        self.heap.gc.last_was_compacting = self.compacting_collection;
        self.tracer.report();

        if self.compacting_collection {
            // Old space was just defragmented; nothing to measure.
            self.heap.gc.last_tracer = Some(std::mem::take(&mut self.tracer));
            return;
        }

        // Arm a compacting collection if enough of the old generation could
        // be recovered by squeezing out the waste and free blocks.
        let mut old_gen_recoverable = 0usize;
        let mut old_gen_used = 0usize;
        for id in [SpaceId::OldPointer, SpaceId::OldData] {
            let space = self.heap.paged_space(id);
            old_gen_used += space.area_bytes();
            old_gen_recoverable += space.area_bytes().saturating_sub(self.live_bytes[id]);
        }
        if old_gen_used > 0 {
            let old_gen_fragmentation = old_gen_recoverable * 100 / old_gen_used;
            if old_gen_fragmentation > FRAGMENTATION_LIMIT_PERCENT
                && old_gen_recoverable > FRAGMENTATION_ALLOWED
            {
                debug!(
                    "compaction armed: {} of {} old-generation bytes recoverable",
                    old_gen_recoverable, old_gen_used
                );
                self.heap.gc.compact_on_next_gc = true;
            }
        }

        self.heap.gc.last_tracer = Some(std::mem::take(&mut self.tracer));
    }

    #[cfg(debug_assertions)]
    fn verify_markbits_are_clean(&self) {
        for id in [
            SpaceId::OldPointer,
            SpaceId::OldData,
            SpaceId::Code,
            SpaceId::Map,
            SpaceId::Cell,
        ] {
            for page in self.heap.paged_space(id).pages() {
                debug_assert!(page.markbits().is_clean());
            }
        }
    }

    /// After marking (and transition clearing): every slot of every live
    /// object must reference either a non-heap value or a marked object.
    #[cfg(debug_assertions)]
    fn verify_marking(&mut self) {
        use crate::object::visiting::{iterate_body, SlotVisitor};
        use crate::util::Address;

        struct Verifier<'a> {
            heap: &'a Heap,
        }
        impl SlotVisitor for Verifier<'_> {
            fn visit_slot(&mut self, slot: Address) {
                let value = unsafe { slot.load::<crate::object::Value>() };
                if value.is_heap_object() && !value.to_object().address().is_zero() {
                    debug_assert!(
                        self.heap.is_marked(value.to_object()),
                        "live object references unmarked {:?}",
                        value
                    );
                }
            }
        }

        let mut roots = Vec::new();
        self.heap.iterate_strong_roots(|slot| roots.push(slot));
        for slot in roots {
            let value = unsafe { slot.load::<crate::object::Value>() };
            if value.is_heap_object() {
                debug_assert!(self.heap.is_marked(value.to_object()));
            }
        }

        let mut live = Vec::new();
        self.for_each_marked_object(|object| live.push(object));
        let mut verifier = Verifier { heap: &*self.heap };
        for object in live {
            iterate_body::<Verifier>(object, &mut verifier);
        }
    }
}
