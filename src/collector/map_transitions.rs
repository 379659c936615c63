//! Dead-transition clearing for surviving class descriptors.
//!
//! Before marking, the prototype edge of every transition target is
//! reversed into a back pointer to its parent (pointer reversal; no
//! allocation). After marking, each back-pointer chain is walked to its
//! non-descriptor end (the real prototype) and then re-walked from the
//! leaf: a marked descriptor met after an unmarked one marks a dead
//! transition, whose edges are nulled out. The walk restores every
//! prototype slot it passes.

use crate::collector::MarkCompactCollector;
use crate::object::{InstanceType, Map, PropertyType, Value};

impl<'h> MarkCompactCollector<'h> {
    fn is_map_object(&self, value: Value) -> bool {
        value.is_heap_object()
            && !value.to_object().address().is_zero()
            && value.to_object().map().instance_type() == InstanceType::Map
    }

    /// Reverse the prototype edges of every JSObject-family descriptor's
    /// transitions. Runs in the prepare phase of a map-collecting cycle.
    pub(crate) fn create_back_pointers(&mut self) {
        let mut maps = Vec::new();
        self.heap
            .map_space
            .iterate_objects(|object| maps.push(object));
        for object in maps {
            let map = Map::from_object(object);
            if map.is_js_object_family() {
                map.create_back_pointers();
            } else {
                debug_assert!(
                    map.instance_descriptors().value() == self.heap.empty_descriptor_array(),
                    "only JSObject-family descriptors carry transitions"
                );
            }
        }
    }

    /// Walk every JSObject-family descriptor chain: restore prototype
    /// slots, reattach slack-tracked descriptors, and null out transitions
    /// from live descriptors to dead ones.
    pub(crate) fn clear_nonlive_transitions(&mut self) {
        let mut maps = Vec::new();
        self.heap
            .map_space
            .iterate_objects(|object| maps.push(object));

        for object in maps {
            let map = Map::from_object(object);
            let map_marked = self.heap.is_marked(object);

            // Only JSObject-family descriptors have transitions and back
            // pointers.
            if !map.is_js_object_family() {
                continue;
            }

            if map_marked && map.attached_to_shared_function_info() {
                // This descriptor was detached from its shared function
                // info for in-object slack tracking. It survived, so
                // reattach it now.
                self.reattach_initial_map(map);
            }

            // Follow the chain of back pointers to find the prototype.
            let mut current = map.value();
            while self.is_map_object(current) {
                current = Map::from_object(current.to_object()).prototype();
                debug_assert!(current.is_heap_object());
            }
            let real_prototype = current;

            // Follow back pointers again, setting them to the prototype and
            // clearing map transitions when necessary.
            let mut current = map.value();
            let mut on_dead_path = !map_marked;
            while self.is_map_object(current) {
                let current_map = Map::from_object(current.to_object());
                let next = current_map.prototype();
                let current_marked = self.heap.is_marked(current_map.object());
                // There should never be a dead map above a live map.
                debug_assert!(on_dead_path || current_marked);

                // A live map above a dead map indicates a dead transition.
                // This test is always false on the first iteration.
                if on_dead_path && current_marked {
                    on_dead_path = false;
                    self.clear_dead_transitions(current_map, real_prototype);
                }
                current_map.set_prototype(real_prototype);
                current = next;
            }
        }
    }

    /// Null out every transition of `map` whose target did not survive.
    fn clear_dead_transitions(&mut self, map: Map, real_prototype: Value) {
        let descriptors = map.instance_descriptors();
        if descriptors.value() == self.heap.empty_descriptor_array() {
            return;
        }
        let null = self.heap.null_value();
        for i in 0..descriptors.number_of_descriptors() {
            if descriptors.details_type(i) != PropertyType::MapTransition {
                continue;
            }
            let target = descriptors.value_at(i);
            debug_assert!(target.is_heap_object());
            let target_object = target.to_object();
            if !self.heap.is_marked(target_object) {
                debug_assert!(
                    target_object.map().instance_type() == InstanceType::Map
                );
                // Drop the edge so the dead target cannot be reached again,
                // not even by following a stale back pointer.
                debug_assert!(
                    Map::from_object(target_object).prototype() == map.value()
                        || Map::from_object(target_object).prototype() == real_prototype
                );
                descriptors.set_details(i, PropertyType::NullDescriptor as isize);
                descriptors.set_value(i, null);
            }
        }
    }

    fn reattach_initial_map(&mut self, map: Map) {
        let constructor = map.constructor();
        if constructor.is_heap_object()
            && constructor.to_object().map().instance_type() == InstanceType::JsFunction
        {
            let function = crate::object::JsFunction::from_object(constructor.to_object());
            let shared = function.shared();
            shared.set_initial_map(map.value());
        }
        map.set_attached_to_shared_function_info(false);
    }
}
