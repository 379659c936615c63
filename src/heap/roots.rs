//! Root-set providers: global handles, object groups, and the external
//! string table.

use crate::object::Value;
use crate::util::Address;

/// Index of a node in the global handle table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Handle(usize);

struct Node {
    value: Value,
    weak: bool,
    /// Weak handle whose referent was found dead by the last marking pass;
    /// cleared (zapped to a smi) once the cycle finishes.
    pending: bool,
}

/// A set of handles that live and die together: if any member is reachable,
/// every member is treated as reachable.
pub struct ObjectGroup {
    members: Vec<Handle>,
}

impl ObjectGroup {
    pub fn members(&self) -> &[Handle] {
        &self.members
    }
}

/// The handle table the embedder reaches the heap through, plus the object
/// groups used to model external retention (a DOM tree keeping its wrappers
/// alive, and vice versa).
#[derive(Default)]
pub struct GlobalHandles {
    nodes: Vec<Node>,
    groups: Vec<Option<ObjectGroup>>,
}

impl GlobalHandles {
    pub fn new() -> GlobalHandles {
        GlobalHandles::default()
    }

    pub fn create(&mut self, value: Value) -> Handle {
        self.nodes.push(Node {
            value,
            weak: false,
            pending: false,
        });
        Handle(self.nodes.len() - 1)
    }

    pub fn create_weak(&mut self, value: Value) -> Handle {
        let handle = self.create(value);
        self.nodes[handle.0].weak = true;
        handle
    }

    pub fn make_weak(&mut self, handle: Handle) {
        self.nodes[handle.0].weak = true;
    }

    pub fn get(&self, handle: Handle) -> Value {
        self.nodes[handle.0].value
    }

    pub fn is_pending(&self, handle: Handle) -> bool {
        self.nodes[handle.0].pending
    }

    /// The slot addresses of the strong handles.
    pub fn iterate_strong_roots(&mut self, mut f: impl FnMut(Address)) {
        for node in &mut self.nodes {
            if !node.weak {
                f(Address::from_mut_ptr(&mut node.value));
            }
        }
    }

    /// The slot addresses of the weak handles not yet identified as dead.
    pub fn iterate_weak_roots(&mut self, mut f: impl FnMut(Address)) {
        for node in &mut self.nodes {
            if node.weak && !node.pending {
                f(Address::from_mut_ptr(&mut node.value));
            }
        }
    }

    /// Every handle slot, for the pointer-updating passes.
    pub fn iterate_all_slots(&mut self, mut f: impl FnMut(Address)) {
        for node in &mut self.nodes {
            f(Address::from_mut_ptr(&mut node.value));
        }
    }

    /// Mark as pending every weak handle whose referent satisfies the
    /// predicate (in practice: is still unmarked after the strong closure).
    pub fn identify_weak_handles(&mut self, pred: impl Fn(Value) -> bool) {
        for node in &mut self.nodes {
            if node.weak && !node.pending && node.value.is_heap_object() && pred(node.value) {
                node.pending = true;
            }
        }
    }

    /// Zap the handles identified as dead. Runs once the cycle is over.
    pub fn clear_pending(&mut self) -> usize {
        let mut cleared = 0;
        for node in &mut self.nodes {
            if node.pending {
                node.value = Value::from_smi(0);
                node.pending = false;
                cleared += 1;
            }
        }
        cleared
    }

    pub fn add_object_group(&mut self, members: &[Handle]) {
        self.groups.push(Some(ObjectGroup {
            members: members.to_vec(),
        }));
    }

    pub fn group_count(&self) -> usize {
        self.groups.iter().filter(|g| g.is_some()).count()
    }

    pub fn groups_mut(&mut self) -> &mut Vec<Option<ObjectGroup>> {
        &mut self.groups
    }

    /// Dispose of all object groups; marking retires them group by group.
    pub fn remove_object_groups(&mut self) {
        self.groups.clear();
    }
}

/// The strings whose payloads live outside the heap. Iterated after marking
/// so dead entries can have their resources finalized, and after every move
/// of nursery survivors so the entries track their strings.
#[derive(Default)]
pub struct ExternalStringTable {
    entries: Vec<Value>,
}

impl ExternalStringTable {
    pub fn new() -> ExternalStringTable {
        ExternalStringTable::default()
    }

    pub fn add(&mut self, string: Value) {
        debug_assert!(string.is_heap_object());
        self.entries.push(string);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iterate_slots(&mut self, mut f: impl FnMut(Address)) {
        for entry in &mut self.entries {
            f(Address::from_mut_ptr(entry));
        }
    }

    pub fn entries(&self) -> &[Value] {
        &self.entries
    }

    /// Drop the entries the marker replaced with the deleted sentinel.
    pub fn clean_up(&mut self, deleted: Value) {
        self.entries
            .retain(|&e| e != deleted && e != Value::NULL_OBJECT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weak_identification_and_clearing() {
        let mut handles = GlobalHandles::new();
        let strong = handles.create(Value::from_smi(1));
        let weak = handles.create_weak(Value::from_raw(0x1001));
        handles.identify_weak_handles(|_| true);
        assert!(!handles.is_pending(strong));
        assert!(handles.is_pending(weak));

        let mut weak_roots = 0;
        handles.iterate_weak_roots(|_| weak_roots += 1);
        assert_eq!(weak_roots, 0);

        assert_eq!(handles.clear_pending(), 1);
        assert_eq!(handles.get(weak), Value::from_smi(0));
    }

    #[test]
    fn strong_iteration_skips_weak_nodes() {
        let mut handles = GlobalHandles::new();
        handles.create(Value::from_raw(0x1001));
        handles.create_weak(Value::from_raw(0x2001));
        let mut strong = 0;
        handles.iterate_strong_roots(|_| strong += 1);
        assert_eq!(strong, 1);
        let mut all = 0;
        handles.iterate_all_slots(|_| all += 1);
        assert_eq!(all, 2);
    }

    #[test]
    fn external_string_table_cleanup() {
        let deleted = Value::from_raw(0x31);
        let mut table = ExternalStringTable::new();
        table.add(Value::from_raw(0x1001));
        table.add(deleted);
        table.add(Value::NULL_OBJECT);
        table.clean_up(deleted);
        assert_eq!(table.len(), 1);
    }
}
