//! Class descriptors and their transition records.
//!
//! A [`Map`] describes the layout of its instances: instance type, visitor
//! id, size, prototype, and a [`DescriptorArray`] listing properties and map
//! transitions. For descriptors in the JSObject family the prototype slot is
//! temporarily repurposed during a map-collecting cycle: it holds a back
//! pointer from each transition target up to its parent, so dead transition
//! chains can be found without extra allocation.

use crate::object::{object_class, FixedArray, HeapObject, InstanceType, Value, VisitorId};
use crate::util::constants::BYTES_IN_WORD;

object_class! {
    /// A class descriptor. Lives in map space, which is precisely swept and
    /// never compacted, so map addresses are stable across a cycle.
    Map
}

mod bit_field {
    /// The descriptor was detached from its shared function info for
    /// in-object slack tracking and must be reattached if it survives.
    pub const ATTACHED_TO_SHARED_FUNCTION_INFO: isize = 1 << 0;
}

impl Map {
    pub const INSTANCE_TYPE_OFFSET: usize = BYTES_IN_WORD;
    pub const VISITOR_ID_OFFSET: usize = 2 * BYTES_IN_WORD;
    pub const INSTANCE_SIZE_OFFSET: usize = 3 * BYTES_IN_WORD;
    pub const BIT_FIELD_OFFSET: usize = 4 * BYTES_IN_WORD;
    pub const PROTOTYPE_OFFSET: usize = 5 * BYTES_IN_WORD;
    pub const CONSTRUCTOR_OFFSET: usize = 6 * BYTES_IN_WORD;
    pub const INSTANCE_DESCRIPTORS_OFFSET: usize = 7 * BYTES_IN_WORD;
    pub const CODE_CACHE_OFFSET: usize = 8 * BYTES_IN_WORD;
    pub const SIZE: usize = 9 * BYTES_IN_WORD;

    pub const POINTER_FIELDS_BEGIN_OFFSET: usize = Self::PROTOTYPE_OFFSET;
    pub const POINTER_FIELDS_END_OFFSET: usize = Self::SIZE;

    pub fn instance_type(self) -> InstanceType {
        let raw = self.object().smi_field(Self::INSTANCE_TYPE_OFFSET) as u8;
        debug_assert!(raw <= InstanceType::JsFunction as u8);
        unsafe { std::mem::transmute::<u8, InstanceType>(raw) }
    }

    pub fn visitor_id(self) -> VisitorId {
        VisitorId::from_u8(self.object().smi_field(Self::VISITOR_ID_OFFSET) as u8)
    }

    /// Instance size in bytes; zero for variable-sized classes.
    pub fn instance_size(self) -> usize {
        self.object().smi_field(Self::INSTANCE_SIZE_OFFSET) as usize
    }

    pub fn bit_field(self) -> isize {
        self.object().smi_field(Self::BIT_FIELD_OFFSET)
    }

    fn set_bit_field(self, bits: isize) {
        self.object().set_smi_field(Self::BIT_FIELD_OFFSET, bits);
    }

    pub fn attached_to_shared_function_info(self) -> bool {
        self.bit_field() & bit_field::ATTACHED_TO_SHARED_FUNCTION_INFO != 0
    }

    pub fn set_attached_to_shared_function_info(self, attached: bool) {
        let bits = self.bit_field();
        self.set_bit_field(if attached {
            bits | bit_field::ATTACHED_TO_SHARED_FUNCTION_INFO
        } else {
            bits & !bit_field::ATTACHED_TO_SHARED_FUNCTION_INFO
        });
    }

    /// The prototype slot. While back pointers are installed this holds a
    /// transition parent map instead of the real prototype.
    pub fn prototype(self) -> Value {
        self.object().field(Self::PROTOTYPE_OFFSET)
    }

    pub fn set_prototype(self, value: Value) {
        self.object().set_field(Self::PROTOTYPE_OFFSET, value);
    }

    pub fn constructor(self) -> Value {
        self.object().field(Self::CONSTRUCTOR_OFFSET)
    }

    pub fn set_constructor(self, value: Value) {
        self.object().set_field(Self::CONSTRUCTOR_OFFSET, value);
    }

    pub fn instance_descriptors(self) -> DescriptorArray {
        DescriptorArray::from_object(
            self.object().field(Self::INSTANCE_DESCRIPTORS_OFFSET).to_object(),
        )
    }

    pub fn set_instance_descriptors(self, descriptors: DescriptorArray) {
        self.object()
            .set_field(Self::INSTANCE_DESCRIPTORS_OFFSET, descriptors.value());
    }

    pub fn code_cache(self) -> Value {
        self.object().field(Self::CODE_CACHE_OFFSET)
    }

    pub fn clear_code_cache(self, empty: Value) {
        self.object().set_field(Self::CODE_CACHE_OFFSET, empty);
    }

    /// Does this descriptor describe instances that carry transitions and
    /// participate in back-pointer threading?
    pub fn is_js_object_family(self) -> bool {
        self.instance_type().is_js_object_family()
    }

    /// Reverse the prototype edges of every transition target: each child
    /// descriptor's prototype slot is overwritten with a back pointer to
    /// `self`. The real prototype is recovered after marking by following
    /// the chain to its non-map end.
    pub fn create_back_pointers(self) {
        let descriptors = self.instance_descriptors();
        for i in 0..descriptors.number_of_descriptors() {
            if descriptors.details_type(i) == PropertyType::MapTransition {
                let target = Map::from_object(descriptors.value_at(i).to_object());
                target.set_prototype(self.value());
            }
        }
    }
}

/// The kinds of entries a descriptor array can hold. Entries at or past
/// [`PropertyType::FIRST_PHANTOM`] do not keep their value alive.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(isize)]
pub enum PropertyType {
    Normal = 0,
    MapTransition = 1,
    NullDescriptor = 2,
}

impl PropertyType {
    pub const FIRST_PHANTOM: isize = PropertyType::MapTransition as isize;

    pub fn from_smi(v: isize) -> PropertyType {
        match v {
            0 => PropertyType::Normal,
            1 => PropertyType::MapTransition,
            2 => PropertyType::NullDescriptor,
            _ => unreachable!("bad property type {}", v),
        }
    }
}

object_class! {
    /// A descriptor array: slot 0 points at a contents array of
    /// (value, details) pairs. The indirection means the pair storage can be
    /// marked without strongly marking transition targets.
    DescriptorArray
}

impl DescriptorArray {
    pub const CONTENT_ARRAY_INDEX: usize = 0;

    pub fn as_array(self) -> FixedArray {
        FixedArray::from_object(self.object())
    }

    pub fn is_empty(self) -> bool {
        self.as_array().length() == 0
    }

    pub fn contents(self) -> FixedArray {
        debug_assert!(!self.is_empty());
        FixedArray::from_object(self.as_array().get(Self::CONTENT_ARRAY_INDEX).to_object())
    }

    pub fn number_of_descriptors(self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.contents().length() / 2
        }
    }

    pub fn value_at(self, i: usize) -> Value {
        self.contents().get(2 * i)
    }

    pub fn set_value(self, i: usize, value: Value) {
        self.contents().set(2 * i, value);
    }

    pub fn details(self, i: usize) -> isize {
        self.contents().get(2 * i + 1).to_smi()
    }

    pub fn set_details(self, i: usize, details: isize) {
        self.contents().set(2 * i + 1, Value::from_smi(details));
    }

    pub fn details_type(self, i: usize) -> PropertyType {
        PropertyType::from_smi(self.details(i))
    }

    /// Find the transition entry whose target is `target`, if any.
    pub fn transition_index_to(self, target: HeapObject) -> Option<usize> {
        (0..self.number_of_descriptors()).find(|&i| {
            self.details_type(i) == PropertyType::MapTransition
                && self.value_at(i).is_heap_object()
                && self.value_at(i).to_object() == target
        })
    }
}
