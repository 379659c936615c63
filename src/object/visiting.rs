//! Visitor ids and generic body traversal.
//!
//! Every descriptor carries a [`VisitorId`] naming the shape of its
//! instances' bodies. The marker keeps its own dispatch table keyed by these
//! ids (it needs per-class special cases for code flushing and weak edges);
//! the pointer-updating passes of the scavenger and the compactor use the
//! generic [`iterate_body`] below, which visits every reference-bearing slot
//! including the weak ones, since a weak edge still needs its address fixed
//! when the referent moves.

use enum_map::Enum;
use strum_macros::EnumCount;

use crate::object::{
    Code, ConsString, FixedArray, HeapObject, InstanceType, JsFunction, JsObject, Map, Oddball,
    PropertyCell, SharedFunctionInfo, Value,
};
use crate::util::constants::BYTES_IN_WORD;
use crate::util::Address;

/// The body shapes instances can have, derived from the class descriptor.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Enum, EnumCount)]
pub enum VisitorId {
    /// No outgoing references at all.
    DataObject,
    /// Length-prefixed run of tagged slots.
    FixedArray,
    /// A cons string whose pointer may be short-cut to its left part.
    ShortcutCandidate,
    Oddball,
    Map,
    Code,
    SharedFunctionInfo,
    JsFunction,
    PropertyCell,
    Context,
    JsObject,
}

static_assertions::const_assert!(<VisitorId as strum::EnumCount>::COUNT <= 256);

impl VisitorId {
    pub fn from_u8(raw: u8) -> VisitorId {
        debug_assert!((raw as usize) < <VisitorId as strum::EnumCount>::COUNT);
        VisitorId::from_usize(raw as usize)
    }

    pub fn for_instance_type(instance_type: InstanceType) -> VisitorId {
        match instance_type {
            InstanceType::Oddball => VisitorId::Oddball,
            InstanceType::SeqString
            | InstanceType::Symbol
            | InstanceType::ExternalString
            | InstanceType::ByteArray => VisitorId::DataObject,
            InstanceType::ConsString => VisitorId::ShortcutCandidate,
            InstanceType::FixedArray | InstanceType::DescriptorArray => VisitorId::FixedArray,
            InstanceType::Context => VisitorId::Context,
            InstanceType::Code => VisitorId::Code,
            InstanceType::SharedFunctionInfo => VisitorId::SharedFunctionInfo,
            InstanceType::PropertyCell => VisitorId::PropertyCell,
            InstanceType::Map => VisitorId::Map,
            InstanceType::JsObject => VisitorId::JsObject,
            InstanceType::JsFunction => VisitorId::JsFunction,
        }
    }
}

/// A visitor over the reference-bearing slots of one object.
pub trait SlotVisitor {
    /// Visit one tagged slot.
    fn visit_slot(&mut self, slot: Address);

    /// Visit a contiguous run of tagged slots in `[start, end)`.
    fn visit_slots(&mut self, start: Address, end: Address) {
        let mut slot = start;
        while slot.as_usize() < end.as_usize() {
            self.visit_slot(slot);
            slot += BYTES_IN_WORD;
        }
    }

    /// Visit a raw code-entry word. The default rewrites the entry through
    /// `visit_slot` on a temporary tagged slot, mirroring how entry words
    /// are updated wherever code objects can move.
    fn visit_code_entry(&mut self, entry_slot: Address) {
        let entry = unsafe { entry_slot.load::<usize>() };
        let code = Code::from_entry_address(unsafe { Address::from_usize(entry) });
        let mut tmp: Value = code.value();
        self.visit_slot(Address::from_mut_ptr(&mut tmp));
        if tmp.raw() != code.value().raw() {
            let moved = Code::from_object(tmp.to_object());
            unsafe { entry_slot.store::<usize>(moved.entry().as_usize()) };
        }
    }
}

/// Visit every reference-bearing slot of `object`, weak edges included, and
/// return the object's size so linear scans can advance.
pub fn iterate_body<V: SlotVisitor>(object: HeapObject, visitor: &mut V) -> usize {
    let map = object.map();
    let size = object.size();
    match map.visitor_id() {
        VisitorId::DataObject => {}
        VisitorId::FixedArray | VisitorId::Context => {
            visitor.visit_slots(
                object.raw_field(FixedArray::HEADER_SIZE),
                object.raw_field(size),
            );
        }
        VisitorId::ShortcutCandidate => {
            visitor.visit_slots(
                object.raw_field(ConsString::FIRST_OFFSET),
                object.raw_field(ConsString::SIZE),
            );
        }
        VisitorId::Oddball => {
            visitor.visit_slots(
                object.raw_field(Oddball::TO_STRING_OFFSET),
                object.raw_field(Oddball::KIND_OFFSET),
            );
        }
        VisitorId::Map => {
            visitor.visit_slots(
                object.raw_field(Map::POINTER_FIELDS_BEGIN_OFFSET),
                object.raw_field(Map::POINTER_FIELDS_END_OFFSET),
            );
        }
        VisitorId::Code => {
            let code = Code::from_object(object);
            for i in 0..code.reloc_count() {
                visitor.visit_slot(code.reloc_target_slot(i));
            }
        }
        VisitorId::SharedFunctionInfo => {
            visitor.visit_slots(
                object.raw_field(SharedFunctionInfo::NAME_OFFSET),
                object.raw_field(SharedFunctionInfo::SIZE),
            );
        }
        VisitorId::JsFunction => {
            visitor.visit_slots(
                object.raw_field(JsFunction::PROPERTIES_OFFSET),
                object.raw_field(JsFunction::CODE_ENTRY_OFFSET),
            );
            visitor.visit_code_entry(object.raw_field(JsFunction::CODE_ENTRY_OFFSET));
            visitor.visit_slots(
                object.raw_field(JsFunction::CONTEXT_OFFSET),
                object.raw_field(JsFunction::SIZE),
            );
        }
        VisitorId::PropertyCell => {
            visitor.visit_slots(
                object.raw_field(PropertyCell::VALUE_OFFSET),
                object.raw_field(PropertyCell::SIZE),
            );
        }
        VisitorId::JsObject => {
            visitor.visit_slots(
                object.raw_field(JsObject::PROPERTIES_OFFSET),
                object.raw_field(size),
            );
        }
    }
    size
}
