//! End-to-end collection scenarios: promotion out of the nursery, marking
//! stack overflow recovery, code flushing, compaction arming, dead
//! transition pruning, and store-buffer replay.

use ember_gc::heap::page::Page;
use ember_gc::object::{
    CodeKind, ConsString, Context, FixedArray, InstanceType, JsObject, PropertyType, SeqString,
    Value,
};
use ember_gc::util::constants::{BYTES_IN_WORD, CODE_AGE_THRESHOLD};
use ember_gc::{Heap, Options, SpaceId};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn heap_with(options_str: &str) -> Heap {
    let mut options = Options::default();
    assert!(options.set_bulk_from_str(options_str));
    Heap::new(options)
}

fn small_heap() -> Heap {
    heap_with("semispace_size=16384")
}

fn element_offset(index: usize) -> usize {
    FixedArray::HEADER_SIZE + index * BYTES_IN_WORD
}

#[test]
fn empty_heap_collects() {
    let mut heap = small_heap();
    heap.collect_garbage();
    assert!(heap.last_gc_tracer().is_some());
    // Nothing was promoted; the canonical objects survive in place.
    assert_eq!(heap.last_gc_tracer().unwrap().promoted_objects_count(), 0);
    heap.collect_garbage();
    assert!(heap.undefined_value().is_heap_object());
}

#[test]
fn nursery_chain_is_promoted_with_links_preserved() {
    let mut heap = small_heap();

    // o0 -> o1 -> ... -> o9, all in the nursery; only o0 is rooted.
    let mut next = heap.undefined_value();
    for i in (0..10).rev() {
        let node = heap.alloc_fixed_array(2, false).unwrap();
        node.set(1, Value::from_smi(i));
        heap.write_field(node.object(), element_offset(0), next);
        next = node.value();
    }
    let root = heap.create_local_handle(next);

    heap.collect_garbage();

    let tracer = heap.last_gc_tracer().unwrap();
    assert_eq!(tracer.promoted_objects_count(), 10);

    // The nursery is empty again.
    assert_eq!(heap.new_space().bottom(), heap.new_space().top());

    // Every node moved to old-pointer space and the links still line up.
    let mut current = heap.local_handle(root);
    for i in 0..10 {
        assert!(current.is_heap_object());
        let object = current.to_object();
        assert_eq!(heap.space_of(object.address()), SpaceId::OldPointer);
        let node = FixedArray::from_object(object);
        assert_eq!(node.get(1), Value::from_smi(i));
        current = node.get(0);
    }
    assert_eq!(current, heap.undefined_value());
}

#[test]
fn marking_stack_overflow_recovers() {
    // A marking stack of four entries against a 31-node binary tree.
    let mut heap = heap_with("semispace_size=16384, marking_stack_size=4");

    fn build_tree(heap: &mut Heap, depth: usize) -> Value {
        let node = heap.alloc_fixed_array(2, false).unwrap();
        if depth > 1 {
            let left = build_tree(heap, depth - 1);
            let right = build_tree(heap, depth - 1);
            heap.write_field(node.object(), element_offset(0), left);
            heap.write_field(node.object(), element_offset(1), right);
        }
        node.value()
    }

    let root_value = build_tree(&mut heap, 5);
    let root = heap.create_local_handle(root_value);

    heap.collect_garbage();

    // All 31 nodes were found live and promoted.
    assert_eq!(heap.last_gc_tracer().unwrap().promoted_objects_count(), 31);

    // The tree is still well formed.
    fn count_nodes(heap: &Heap, value: Value) -> usize {
        if value == heap.undefined_value() {
            return 0;
        }
        let node = FixedArray::from_object(value.to_object());
        1 + count_nodes(heap, node.get(0)) + count_nodes(heap, node.get(1))
    }
    assert_eq!(count_nodes(&heap, heap.local_handle(root)), 31);
}

#[test]
fn marking_stack_capacity_one_still_completes() {
    let mut heap = heap_with("semispace_size=16384, marking_stack_size=1");
    let mut next = heap.undefined_value();
    for _ in 0..50 {
        let node = heap.alloc_fixed_array(1, false).unwrap();
        heap.write_field(node.object(), element_offset(0), next);
        next = node.value();
    }
    let root = heap.create_local_handle(next);

    heap.collect_garbage();

    let mut length = 0;
    let mut current = heap.local_handle(root);
    while current != heap.undefined_value() {
        length += 1;
        current = FixedArray::from_object(current.to_object()).get(0);
    }
    assert_eq!(length, 50);
}

#[test]
fn code_flushing_waits_for_the_age_threshold() {
    let mut heap = small_heap();

    let code = heap.alloc_code(CodeKind::Function, 8, &[]).unwrap();
    let name = heap.alloc_string("f", true).unwrap();
    let shared = heap.alloc_shared_function_info(name.value(), code).unwrap();
    heap.attach_script(shared).unwrap();
    let context = heap.alloc_context(2, true).unwrap();
    let function = heap
        .alloc_function(shared, context.value(), false)
        .unwrap();
    let function_handle = heap.create_local_handle(function.value());

    let lazy_compile = heap.lazy_compile_stub();

    // Never called: after threshold - 1 collections the code is still
    // attached.
    for _ in 0..CODE_AGE_THRESHOLD - 1 {
        heap.collect_garbage();
        let function = resolve_function(&heap, function_handle);
        assert_ne!(function.code().value(), lazy_compile);
        assert_ne!(function.shared().code().value(), lazy_compile);
    }

    // One more collection flushes the body.
    heap.collect_garbage();
    let function = resolve_function(&heap, function_handle);
    assert_eq!(function.code().value(), lazy_compile);
    assert_eq!(function.shared().code().value(), lazy_compile);
}

#[test]
fn code_on_the_execution_stack_is_never_flushed() {
    let mut heap = small_heap();

    let code = heap.alloc_code(CodeKind::Function, 8, &[]).unwrap();
    let name = heap.alloc_string("g", true).unwrap();
    let shared = heap.alloc_shared_function_info(name.value(), code).unwrap();
    heap.attach_script(shared).unwrap();
    let context = heap.alloc_context(2, true).unwrap();
    let function = heap
        .alloc_function(shared, context.value(), false)
        .unwrap();
    let function_handle = heap.create_local_handle(function.value());
    heap.push_stack_frame_code(code.value());

    for _ in 0..CODE_AGE_THRESHOLD + 2 {
        heap.collect_garbage();
    }
    let function = resolve_function(&heap, function_handle);
    assert_ne!(function.code().value(), heap.lazy_compile_stub());
}

#[test]
fn debugger_disables_code_flushing() {
    let mut heap = small_heap();
    heap.set_debugger_attached(true);

    let code = heap.alloc_code(CodeKind::Function, 8, &[]).unwrap();
    let name = heap.alloc_string("h", true).unwrap();
    let shared = heap.alloc_shared_function_info(name.value(), code).unwrap();
    heap.attach_script(shared).unwrap();
    let context = heap.alloc_context(2, true).unwrap();
    let function = heap
        .alloc_function(shared, context.value(), false)
        .unwrap();
    let function_handle = heap.create_local_handle(function.value());

    for _ in 0..CODE_AGE_THRESHOLD + 2 {
        heap.collect_garbage();
    }
    let function = resolve_function(&heap, function_handle);
    assert_ne!(function.code().value(), heap.lazy_compile_stub());
}

fn resolve_function(heap: &Heap, handle: usize) -> ember_gc::object::JsFunction {
    ember_gc::object::JsFunction::from_object(heap.local_handle(handle).to_object())
}

#[test]
fn fragmentation_arms_compaction_and_survivors_slide_down() {
    let mut heap = small_heap();

    // Fill old-pointer space with a thousand arrays and let nine out of
    // ten die.
    let mut handles = Vec::new();
    for i in 0..1000 {
        let array = heap.alloc_fixed_array(300, true).unwrap();
        array.set(0, Value::from_smi(i));
        if i % 10 == 0 {
            handles.push((i, heap.create_local_handle(array.value())));
        }
    }

    heap.collect_garbage();
    assert!(!heap.last_collection_was_compacting());
    assert!(heap.compact_on_next_gc());

    heap.collect_garbage();
    assert!(heap.last_collection_was_compacting());
    assert!(!heap.compact_on_next_gc());

    // The hundred survivors kept their payloads and now sit in a
    // contiguous prefix: everything fits in the first page.
    let first_page = Page::from_address(
        heap.local_handle(handles[0].1).to_object().address(),
    );
    for &(i, handle) in &handles {
        let value = heap.local_handle(handle);
        let object = value.to_object();
        assert_eq!(heap.space_of(object.address()), SpaceId::OldPointer);
        assert_eq!(Page::from_address(object.address()), first_page);
        assert_eq!(
            FixedArray::from_object(object).get(0),
            Value::from_smi(i)
        );
    }
}

#[test]
fn back_to_back_compactions_are_idempotent() {
    let mut heap = heap_with("semispace_size=16384, always_compact=true");
    let mut handles = Vec::new();
    for i in 0..100 {
        let array = heap.alloc_fixed_array(32, true).unwrap();
        array.set(0, Value::from_smi(i));
        handles.push(heap.create_local_handle(array.value()));
    }

    heap.collect_garbage();
    let available_first = heap.paged_space(SpaceId::OldPointer).available();
    let addresses_first: Vec<usize> = handles
        .iter()
        .map(|&h| heap.local_handle(h).to_object().address().as_usize())
        .collect();

    heap.collect_garbage();
    let available_second = heap.paged_space(SpaceId::OldPointer).available();
    let addresses_second: Vec<usize> = handles
        .iter()
        .map(|&h| heap.local_handle(h).to_object().address().as_usize())
        .collect();

    assert_eq!(available_first, available_second);
    assert_eq!(addresses_first, addresses_second);
    for (i, &h) in handles.iter().enumerate() {
        let array = FixedArray::from_object(heap.local_handle(h).to_object());
        assert_eq!(array.get(0), Value::from_smi(i as isize));
    }
}

#[test]
fn dead_map_transitions_are_pruned() {
    let mut heap = small_heap();

    // A prototype object P and two descriptors: m1 stays reachable through
    // an instance, m2 only through m1's transition.
    let proto_map = heap
        .alloc_map(InstanceType::JsObject, JsObject::HEADER_SIZE)
        .unwrap();
    let prototype = heap.alloc_js_object(proto_map, true).unwrap();
    let prototype_handle = heap.create_local_handle(prototype.value());

    let m1 = heap
        .alloc_map(InstanceType::JsObject, JsObject::HEADER_SIZE)
        .unwrap();
    m1.set_prototype(prototype.value());
    let m2 = heap
        .alloc_map(InstanceType::JsObject, JsObject::HEADER_SIZE)
        .unwrap();
    m2.set_prototype(prototype.value());
    heap.set_map_transition(m1, 0, m2).unwrap();

    let instance = heap.alloc_js_object(m1, true).unwrap();
    let instance_handle = heap.create_local_handle(instance.value());

    heap.collect_garbage();

    // Descriptors do not move; re-read through the surviving instance.
    let instance = JsObject::from_object(heap.local_handle(instance_handle).to_object());
    let m1 = instance.object().map();
    assert_eq!(m1.prototype(), heap.local_handle(prototype_handle));
    let descriptors = m1.instance_descriptors();
    assert_eq!(descriptors.transition_index_to(m2.object()), None);
    assert_eq!(descriptors.details_type(0), PropertyType::NullDescriptor);
    assert_eq!(descriptors.value_at(0), heap.null_value());
}

#[test]
fn live_map_transitions_survive() {
    let mut heap = small_heap();

    let m1 = heap
        .alloc_map(InstanceType::JsObject, JsObject::HEADER_SIZE)
        .unwrap();
    let m2 = heap
        .alloc_map(InstanceType::JsObject, JsObject::HEADER_SIZE)
        .unwrap();
    heap.set_map_transition(m1, 0, m2).unwrap();

    let a = heap.alloc_js_object(m1, true).unwrap();
    let b = heap.alloc_js_object(m2, true).unwrap();
    let _ha = heap.create_local_handle(a.value());
    let _hb = heap.create_local_handle(b.value());

    heap.collect_garbage();

    let descriptors = m1.instance_descriptors();
    assert_eq!(descriptors.transition_index_to(m2.object()), Some(0));
}

#[test]
fn store_buffer_replay_after_promotion() {
    let mut heap = small_heap();

    let holder = heap.alloc_fixed_array(4, true).unwrap();
    let _holder_handle = heap.create_local_handle(holder.value());
    let young = heap.alloc_fixed_array(1, false).unwrap();
    heap.write_field(holder.object(), element_offset(0), young.value());
    assert_eq!(heap.store_buffer().len(), 1);

    heap.collect_garbage();

    // The target was promoted: the slot holds the promoted address and the
    // rebuilt store buffer no longer tracks it.
    let target = holder.get(0);
    assert!(target.is_heap_object());
    assert_eq!(heap.space_of(target.to_object().address()), SpaceId::OldPointer);
    assert_eq!(heap.store_buffer().len(), 0);
}

#[test]
fn store_buffer_replay_when_target_stays_young() {
    let mut heap = heap_with("semispace_size=65536, max_old_space_pages=1");

    let holder = heap.alloc_fixed_array(4, true).unwrap();
    let _holder_handle = heap.create_local_handle(holder.value());

    // Exhaust old-pointer space with live data, so that no free block can
    // hold the young target and its promotion must fail.
    loop {
        match heap.alloc_fixed_array(4000, true) {
            Ok(filler) => {
                heap.create_local_handle(filler.value());
            }
            Err(_) => break,
        }
    }

    let young = heap.alloc_fixed_array(4000, false).unwrap();
    young.set(0, Value::from_smi(11));
    heap.write_field(holder.object(), element_offset(0), young.value());

    heap.collect_garbage();

    // The target stayed in the nursery: the slot holds the new to-space
    // address and was re-entered into the rebuilt store buffer.
    let target = holder.get(0);
    assert!(target.is_heap_object());
    assert_eq!(heap.space_of(target.to_object().address()), SpaceId::New);
    assert_eq!(
        FixedArray::from_object(target.to_object()).get(0),
        Value::from_smi(11)
    );
    let slot = holder.object().raw_field(element_offset(0));
    assert!(heap.store_buffer().contains(slot));
}

#[test]
fn dead_store_buffer_target_is_zapped() {
    let mut heap = small_heap();

    let holder = heap.alloc_fixed_array(4, true).unwrap();
    let _holder_handle = heap.create_local_handle(holder.value());
    // A weak edge simulation: record the slot, then drop every strong path
    // to the young target by overwriting the slot before collection would
    // mark it... the slot itself is the only reference, so instead make
    // the holder unreachable from the marking's point of view by storing
    // the young pointer into a dead holder.
    let dead_holder = heap.alloc_fixed_array(4, true).unwrap();
    let young = heap.alloc_fixed_array(1, false).unwrap();
    heap.write_field(dead_holder.object(), element_offset(0), young.value());
    let slot = dead_holder.object().raw_field(element_offset(0));
    assert!(heap.store_buffer().contains(slot));

    heap.collect_garbage();

    // Either the sweep freed the holder's region (and the slot was
    // filtered before replay) or the slot was replayed against a dead
    // target and zapped; in both cases the rebuilt buffer no longer
    // tracks it.
    assert!(!heap.store_buffer().contains(slot));
}

#[test]
fn cons_string_shortcut_rewrites_root_slots() {
    let mut heap = small_heap();

    let flat = heap.alloc_string("payload", false).unwrap();
    let cons = heap
        .alloc_cons_string(flat.value(), heap.empty_string(), false)
        .unwrap();
    let handle = heap.create_local_handle(cons.value());

    heap.collect_garbage();

    // The handle was short-cut to the left substring; the cons cell died.
    let value = heap.local_handle(handle);
    let object = value.to_object();
    assert_eq!(object.map().instance_type(), InstanceType::SeqString);
    assert_eq!(SeqString::from_object(object).length(), "payload".len());
}

#[test]
fn cons_string_shortcut_is_a_noop_for_nonempty_right() {
    let mut heap = small_heap();

    let left = heap.alloc_string("left", false).unwrap();
    let right = heap.alloc_string("right", false).unwrap();
    let cons = heap
        .alloc_cons_string(left.value(), right.value(), false)
        .unwrap();
    let handle = heap.create_local_handle(cons.value());

    heap.collect_garbage();

    let value = heap.local_handle(handle);
    let object = value.to_object();
    assert_eq!(object.map().instance_type(), InstanceType::ConsString);
    let cons = ConsString::from_object(object);
    assert_eq!(
        cons.first().to_object().map().instance_type(),
        InstanceType::SeqString
    );
    assert_eq!(
        cons.second().to_object().map().instance_type(),
        InstanceType::SeqString
    );
}

#[test]
fn weak_handles_are_cleared_when_referents_die() {
    let mut heap = small_heap();
    let doomed = heap.alloc_fixed_array(4, false).unwrap();
    let weak = heap.global_handles_mut().create_weak(doomed.value());

    heap.collect_garbage();

    assert_eq!(heap.global_handles().get(weak), Value::from_smi(0));
}

#[test]
fn weak_handles_keep_reachable_referents() {
    let mut heap = small_heap();
    let kept = heap.alloc_fixed_array(4, false).unwrap();
    let _strong = heap.create_local_handle(kept.value());
    let weak = heap.global_handles_mut().create_weak(kept.value());

    heap.collect_garbage();

    let value = heap.global_handles().get(weak);
    assert!(value.is_heap_object());
    assert_eq!(heap.space_of(value.to_object().address()), SpaceId::OldPointer);
}

#[test]
fn object_groups_share_liveness() {
    let mut heap = small_heap();

    let a = heap.alloc_fixed_array(1, false).unwrap();
    let b = heap.alloc_fixed_array(1, false).unwrap();
    let c = heap.alloc_fixed_array(1, false).unwrap();
    let d = heap.alloc_fixed_array(1, false).unwrap();

    // a is strongly rooted; b rides along in its group. c and d form a
    // group with no marked member and die together.
    let _root_a = heap.create_local_handle(a.value());
    let ha = heap.global_handles_mut().create(a.value());
    let hb = heap.global_handles_mut().create_weak(b.value());
    let hc = heap.global_handles_mut().create_weak(c.value());
    let hd = heap.global_handles_mut().create_weak(d.value());
    heap.global_handles_mut().add_object_group(&[ha, hb]);
    heap.global_handles_mut().add_object_group(&[hc, hd]);

    heap.collect_garbage();

    let b_value = heap.global_handles().get(hb);
    assert!(b_value.is_heap_object());
    assert_eq!(
        heap.space_of(b_value.to_object().address()),
        SpaceId::OldPointer
    );
    // The dead group's weak handles were identified and cleared.
    assert_eq!(heap.global_handles().get(hc), Value::from_smi(0));
    assert_eq!(heap.global_handles().get(hd), Value::from_smi(0));
    // All groups are disposed after marking.
    assert_eq!(heap.global_handles().group_count(), 0);
}

#[test]
fn global_context_list_drops_dead_contexts() {
    let mut heap = small_heap();

    let kept = heap.alloc_context(3, true).unwrap();
    heap.add_global_context(kept);
    let doomed = heap.alloc_context(3, true).unwrap();
    heap.add_global_context(doomed);
    let kept_handle = heap.create_local_handle(kept.value());

    // List head is the most recently added context.
    assert_eq!(heap.global_contexts_list(), doomed.value());

    heap.collect_garbage();

    assert_eq!(heap.global_contexts_list(), heap.local_handle(kept_handle));
    let kept = Context::from_object(heap.local_handle(kept_handle).to_object());
    assert_eq!(kept.next_context_link(), heap.undefined_value());
}

#[test]
fn dead_symbols_are_pruned_from_the_symbol_table() {
    let mut heap = small_heap();

    let alpha = heap.intern_symbol("alpha").unwrap();
    let _beta = heap.intern_symbol("beta").unwrap();
    assert_eq!(heap.symbol_table().get(0), Value::from_smi(2));
    let _kept = heap.create_local_handle(alpha);

    heap.collect_garbage();

    // beta died with the collection; alpha was held through a handle.
    assert_eq!(heap.symbol_table().get(0), Value::from_smi(1));
    let again = heap.intern_symbol("alpha").unwrap();
    assert_eq!(again, alpha);
}

#[test]
fn dead_external_strings_are_dropped_from_the_table() {
    let mut heap = small_heap();

    let kept = heap
        .alloc_external_string(String::from("kept-resource"), true)
        .unwrap();
    let _keep = heap.create_local_handle(kept.value());
    heap.alloc_external_string(String::from("doomed-resource"), true)
        .unwrap();
    assert_eq!(heap.external_string_table().len(), 2);

    heap.collect_garbage();

    assert_eq!(heap.external_string_table().len(), 1);
    assert_eq!(heap.external_string_table().entries()[0], kept.value());
}

#[test]
fn precisely_swept_spaces_have_clean_bitmaps() {
    let mut heap = small_heap();
    let array = heap.alloc_fixed_array(8, true).unwrap();
    let _root = heap.create_local_handle(array.value());
    let _map = heap
        .alloc_map(InstanceType::JsObject, JsObject::HEADER_SIZE)
        .unwrap();

    heap.collect_garbage();

    for id in [SpaceId::Code, SpaceId::Map, SpaceId::Cell] {
        for page in heap.paged_space(id).pages() {
            assert!(page.markbits().is_clean());
        }
    }
}

#[test]
fn code_relocation_targets_are_updated_by_scavenge() {
    let mut heap = small_heap();

    let embedded = heap.alloc_fixed_array(2, false).unwrap();
    embedded.set(0, Value::from_smi(99));
    let cell = heap.alloc_property_cell(heap.undefined_value()).unwrap();
    let code = heap
        .alloc_code(
            CodeKind::Function,
            4,
            &[
                (ember_gc::object::RelocMode::EmbeddedObject, embedded.value()),
                (ember_gc::object::RelocMode::Cell, cell.value()),
            ],
        )
        .unwrap();
    let _root = heap.create_local_handle(code.value());

    heap.collect_garbage();

    // The embedded array was promoted and the relocation slot follows it.
    let target = code.reloc_target(0);
    assert_eq!(heap.space_of(target.to_object().address()), SpaceId::OldPointer);
    assert_eq!(
        FixedArray::from_object(target.to_object()).get(0),
        Value::from_smi(99)
    );
    assert_eq!(code.reloc_target(1), cell.value());
}

#[test]
fn property_cells_track_scavenged_values() {
    let mut heap = small_heap();

    let young = heap.alloc_fixed_array(1, false).unwrap();
    young.set(0, Value::from_smi(7));
    let cell = heap.alloc_property_cell(young.value()).unwrap();
    let _root = heap.create_local_handle(cell.value());

    heap.collect_garbage();

    let value = cell.get();
    assert!(value.is_heap_object());
    assert_eq!(heap.space_of(value.to_object().address()), SpaceId::OldPointer);
    assert_eq!(
        FixedArray::from_object(value.to_object()).get(0),
        Value::from_smi(7)
    );
}

#[test]
fn incremental_marking_hands_off_to_full_collection() {
    let mut heap = heap_with("semispace_size=16384, incremental_marking=true");

    let mut handles = Vec::new();
    for i in 0..20 {
        let array = heap.alloc_fixed_array(3, false).unwrap();
        array.set(0, Value::from_smi(i));
        handles.push(heap.create_local_handle(array.value()));
    }

    heap.start_incremental_marking();
    heap.incremental_marking_step(5);
    heap.incremental_marking_step(5);

    // More allocation while marking is in flight.
    let late = heap.alloc_fixed_array(3, false).unwrap();
    late.set(0, Value::from_smi(100));
    handles.push(heap.create_local_handle(late.value()));

    heap.collect_garbage();

    for (i, &handle) in handles.iter().enumerate() {
        let value = heap.local_handle(handle);
        let array = FixedArray::from_object(value.to_object());
        let expected = if i == 20 { 100 } else { i as isize };
        assert_eq!(array.get(0), Value::from_smi(expected));
    }
}

#[test]
fn large_objects_survive_and_die_by_mark() {
    let mut heap = small_heap();

    let big_live = heap.alloc_byte_array(100_000, true).unwrap();
    let _root = heap.create_local_handle(big_live.value());
    let _big_dead = heap.alloc_byte_array(100_000, true).unwrap();

    heap.collect_garbage();

    assert_eq!(
        heap.space_of(big_live.object().address()),
        SpaceId::Large
    );
    // Only the rooted chunk remains.
    heap.collect_garbage();
    assert_eq!(
        heap.space_of(heap.local_handle(0).to_object().address()),
        SpaceId::Large
    );
}

#[test]
fn random_graph_survives_repeated_collections() {
    let mut rng = ChaCha8Rng::seed_from_u64(0x6702);
    let mut heap = heap_with("semispace_size=65536");

    const NODES: usize = 120;
    let mut handles = Vec::with_capacity(NODES);
    for i in 0..NODES {
        let pretenure = rng.random_bool(0.3);
        let node = heap.alloc_fixed_array(4, pretenure).unwrap();
        node.set(3, Value::from_smi(i as isize));
        handles.push(heap.create_local_handle(node.value()));
    }
    // Random edges, always through the write barrier.
    for _ in 0..NODES * 3 {
        let from = rng.random_range(0..NODES);
        let to = rng.random_range(0..NODES);
        let slot = rng.random_range(0..3);
        let from_object = heap.local_handle(handles[from]).to_object();
        let to_value = heap.local_handle(handles[to]);
        heap.write_field(from_object, element_offset(slot), to_value);
    }
    // Drop half the roots.
    let mut kept = Vec::new();
    for (i, &handle) in handles.iter().enumerate() {
        if i % 2 == 0 {
            kept.push((i, handle));
        } else {
            heap.set_local_handle(handle, Value::from_smi(0));
        }
    }

    heap.collect_garbage();
    heap.collect_garbage();

    // Every kept node is intact, and every edge from a kept node points at
    // a well-formed node.
    for &(i, handle) in &kept {
        let value = heap.local_handle(handle);
        assert!(value.is_heap_object());
        let node = FixedArray::from_object(value.to_object());
        assert_eq!(node.get(3), Value::from_smi(i as isize));
        for slot in 0..3 {
            let edge = node.get(slot);
            if edge.is_heap_object() && edge != heap.undefined_value() {
                let target = FixedArray::from_object(edge.to_object());
                assert_eq!(target.length(), 4);
                assert!(target.get(3).is_smi());
            }
        }
    }
}
