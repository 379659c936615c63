//! The object model the collector traverses.
//!
//! Everything on the heap is word-aligned raw memory reached through
//! [`Address`]. A [`HeapObject`] is an address whose first word holds the
//! address of its class descriptor ([`Map`]); bit 0 of that header word is
//! borrowed by the marker as the overflow flag. Slot contents are tagged
//! [`Value`]s: bit 0 distinguishes small integers from heap pointers.
//!
//! The accessor wrappers below are deliberately thin: they give field
//! offsets a name and keep the unsafe loads and stores in one place.

pub mod map;
pub mod visiting;

pub use map::{DescriptorArray, Map, PropertyType};
pub use visiting::VisitorId;

use bytemuck::NoUninit;

use crate::util::constants::*;
use crate::util::Address;

const TAG_OBJECT: usize = 1;

/// A tagged slot value: either a small integer (bit 0 clear, payload in the
/// upper bits) or a heap-object pointer (bit 0 set).
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, NoUninit)]
pub struct Value(usize);

impl Value {
    /// The heap-tagged null pointer. Written over slots whose referent died
    /// in the nursery so a later over-approximate store-buffer scan cannot
    /// follow them.
    pub const NULL_OBJECT: Value = Value(TAG_OBJECT);

    pub const fn from_smi(v: isize) -> Value {
        Value((v as usize) << 1)
    }

    pub fn from_object(object: HeapObject) -> Value {
        debug_assert!(object.address().is_aligned_to(BYTES_IN_WORD));
        Value(object.address().as_usize() | TAG_OBJECT)
    }

    pub const fn from_raw(raw: usize) -> Value {
        Value(raw)
    }

    pub const fn raw(self) -> usize {
        self.0
    }

    pub const fn is_smi(self) -> bool {
        self.0 & TAG_OBJECT == 0
    }

    pub const fn is_heap_object(self) -> bool {
        self.0 & TAG_OBJECT != 0
    }

    pub const fn to_smi(self) -> isize {
        (self.0 as isize) >> 1
    }

    pub fn to_object(self) -> HeapObject {
        debug_assert!(self.is_heap_object());
        HeapObject::from_address(unsafe { Address::from_usize(self.0 & !TAG_OBJECT) })
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.is_smi() {
            write!(f, "smi({})", self.to_smi())
        } else {
            write!(f, "obj({:#x})", self.0 & !TAG_OBJECT)
        }
    }
}

/// The instance classes of the runtime. The JSObject family (descriptors
/// with transitions and back pointers) comes last so the family test is a
/// single comparison.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum InstanceType {
    Oddball,
    SeqString,
    Symbol,
    ExternalString,
    ConsString,
    ByteArray,
    FixedArray,
    DescriptorArray,
    Context,
    Code,
    SharedFunctionInfo,
    PropertyCell,
    Map,
    JsObject,
    JsFunction,
}

impl InstanceType {
    pub const FIRST_JS_OBJECT_TYPE: InstanceType = InstanceType::JsObject;

    /// Do instances of this class carry map transitions and back pointers?
    pub fn is_js_object_family(self) -> bool {
        self >= Self::FIRST_JS_OBJECT_TYPE
    }
}

/// An aligned cell on a heap page, identified by its start address.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct HeapObject(Address);

/// Bit 0 of the header word: raised when the marker had to drop this grey
/// object because the marking stack was full.
const OVERFLOW_TAG: usize = 1;

impl HeapObject {
    pub const MAP_WORD_OFFSET: usize = 0;

    pub fn from_address(address: Address) -> HeapObject {
        HeapObject(address)
    }

    pub fn address(self) -> Address {
        self.0
    }

    pub fn map_word(self) -> usize {
        unsafe { self.0.load::<usize>() }
    }

    pub fn set_map_word(self, raw: usize) {
        unsafe { self.0.store::<usize>(raw) }
    }

    pub fn map(self) -> Map {
        Map::from_object(HeapObject::from_address(unsafe {
            Address::from_usize(self.map_word() & !OVERFLOW_TAG)
        }))
    }

    pub fn set_map(self, map: Map) {
        self.set_map_word(map.object().address().as_usize());
    }

    pub fn is_overflowed(self) -> bool {
        self.map_word() & OVERFLOW_TAG != 0
    }

    pub fn set_overflow(self) {
        self.set_map_word(self.map_word() | OVERFLOW_TAG);
    }

    pub fn clear_overflow(self) {
        self.set_map_word(self.map_word() & !OVERFLOW_TAG);
    }

    /// The address of the slot at `offset` bytes into the object.
    pub fn raw_field(self, offset: usize) -> Address {
        self.0 + offset
    }

    pub fn field(self, offset: usize) -> Value {
        unsafe { self.raw_field(offset).load::<Value>() }
    }

    pub fn set_field(self, offset: usize, value: Value) {
        unsafe { self.raw_field(offset).store::<Value>(value) }
    }

    pub fn smi_field(self, offset: usize) -> isize {
        debug_assert!(self.field(offset).is_smi());
        self.field(offset).to_smi()
    }

    pub fn set_smi_field(self, offset: usize, value: isize) {
        self.set_field(offset, Value::from_smi(value));
    }

    /// The object's size in bytes, decoded from its class descriptor and,
    /// for the variable-sized classes, its length field.
    pub fn size(self) -> usize {
        let map = self.map();
        match map.instance_type() {
            InstanceType::SeqString | InstanceType::Symbol => {
                SeqString::from_object(self).size()
            }
            InstanceType::ByteArray => ByteArray::from_object(self).size(),
            InstanceType::FixedArray
            | InstanceType::DescriptorArray
            | InstanceType::Context => FixedArray::from_object(self).size(),
            InstanceType::Code => Code::from_object(self).size(),
            _ => map.instance_size(),
        }
    }
}

impl std::fmt::Debug for HeapObject {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "HeapObject({:#x})", self.0.as_usize())
    }
}

/// Round an object payload size up to word alignment.
pub const fn align_object_size(size: usize) -> usize {
    (size + BYTES_IN_WORD - 1) & !(BYTES_IN_WORD - 1)
}

macro_rules! object_class {
    ($(#[$outer:meta])* $name:ident) => {
        $(#[$outer])*
        #[derive(Copy, Clone, PartialEq, Eq)]
        pub struct $name(HeapObject);

        impl $name {
            pub fn from_object(object: HeapObject) -> $name {
                $name(object)
            }

            pub fn object(self) -> HeapObject {
                self.0
            }

            pub fn value(self) -> Value {
                Value::from_object(self.0)
            }
        }
    };
}
pub(crate) use object_class;

object_class! {
    /// A singleton marker value: undefined, null, the booleans.
    Oddball
}

#[repr(isize)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OddballKind {
    Undefined = 0,
    Null = 1,
    True = 2,
    False = 3,
}

impl Oddball {
    pub const TO_STRING_OFFSET: usize = BYTES_IN_WORD;
    pub const TO_NUMBER_OFFSET: usize = 2 * BYTES_IN_WORD;
    pub const KIND_OFFSET: usize = 3 * BYTES_IN_WORD;
    pub const SIZE: usize = 4 * BYTES_IN_WORD;

    pub fn kind(self) -> isize {
        self.0.smi_field(Self::KIND_OFFSET)
    }
}

object_class! {
    /// A flat string; also the representation of interned symbols.
    SeqString
}

impl SeqString {
    pub const LENGTH_OFFSET: usize = BYTES_IN_WORD;
    pub const DATA_OFFSET: usize = 2 * BYTES_IN_WORD;

    pub fn length(self) -> usize {
        self.0.smi_field(Self::LENGTH_OFFSET) as usize
    }

    pub fn size(self) -> usize {
        align_object_size(Self::DATA_OFFSET + self.length())
    }

    pub fn size_for(length: usize) -> usize {
        align_object_size(Self::DATA_OFFSET + length)
    }

    pub fn data(self) -> Address {
        self.0.raw_field(Self::DATA_OFFSET)
    }
}

object_class! {
    /// A string whose payload lives outside the heap and must be finalized
    /// when the string dies.
    ExternalString
}

impl ExternalString {
    pub const LENGTH_OFFSET: usize = BYTES_IN_WORD;
    pub const RESOURCE_OFFSET: usize = 2 * BYTES_IN_WORD;
    pub const SIZE: usize = 3 * BYTES_IN_WORD;

    pub fn resource(self) -> *mut String {
        unsafe { self.0.raw_field(Self::RESOURCE_OFFSET).load::<*mut String>() }
    }

    pub fn set_resource(self, resource: *mut String) {
        unsafe {
            self.0
                .raw_field(Self::RESOURCE_OFFSET)
                .store::<*mut String>(resource)
        }
    }

    /// Release the external payload. Idempotent: the resource slot is
    /// nulled so a second finalization is a no-op.
    pub fn finalize(self) {
        let resource = self.resource();
        if !resource.is_null() {
            drop(unsafe { Box::from_raw(resource) });
            self.set_resource(std::ptr::null_mut());
        }
    }
}

object_class! {
    /// The concatenation of two strings. When the right part is the
    /// canonical empty string, pointers to the cons cell may be short-cut to
    /// the left part in place.
    ConsString
}

impl ConsString {
    pub const LENGTH_OFFSET: usize = BYTES_IN_WORD;
    pub const FIRST_OFFSET: usize = 2 * BYTES_IN_WORD;
    pub const SECOND_OFFSET: usize = 3 * BYTES_IN_WORD;
    pub const SIZE: usize = 4 * BYTES_IN_WORD;

    pub fn first(self) -> Value {
        self.0.field(Self::FIRST_OFFSET)
    }

    pub fn second(self) -> Value {
        self.0.field(Self::SECOND_OFFSET)
    }
}

object_class! {
    /// Raw bytes with no outgoing pointers.
    ByteArray
}

impl ByteArray {
    pub const LENGTH_OFFSET: usize = BYTES_IN_WORD;
    pub const DATA_OFFSET: usize = 2 * BYTES_IN_WORD;

    pub fn length(self) -> usize {
        self.0.smi_field(Self::LENGTH_OFFSET) as usize
    }

    pub fn size(self) -> usize {
        align_object_size(Self::DATA_OFFSET + self.length())
    }

    pub fn size_for(length: usize) -> usize {
        align_object_size(Self::DATA_OFFSET + length)
    }
}

object_class! {
    /// A fixed-length array of tagged values. Also the layout of descriptor
    /// arrays, contexts and the symbol table.
    FixedArray
}

impl FixedArray {
    pub const LENGTH_OFFSET: usize = BYTES_IN_WORD;
    pub const HEADER_SIZE: usize = 2 * BYTES_IN_WORD;

    pub fn length(self) -> usize {
        self.0.smi_field(Self::LENGTH_OFFSET) as usize
    }

    pub fn size(self) -> usize {
        Self::size_for(self.length())
    }

    pub fn size_for(length: usize) -> usize {
        Self::HEADER_SIZE + length * BYTES_IN_WORD
    }

    pub fn element_slot(self, index: usize) -> Address {
        debug_assert!(index < self.length());
        self.0.raw_field(Self::HEADER_SIZE + index * BYTES_IN_WORD)
    }

    pub fn get(self, index: usize) -> Value {
        unsafe { self.element_slot(index).load::<Value>() }
    }

    pub fn set(self, index: usize, value: Value) {
        unsafe { self.element_slot(index).store::<Value>(value) }
    }
}

object_class! {
    /// A chain of scopes; global contexts are threaded on a weak list
    /// through their last slot.
    Context
}

impl Context {
    pub const GLOBAL_OBJECT_INDEX: usize = 0;
    /// Number of leading slots plus the trailing weak link.
    pub const MIN_LENGTH: usize = 2;

    pub fn as_array(self) -> FixedArray {
        FixedArray::from_object(self.0)
    }

    pub fn next_context_link_index(self) -> usize {
        self.as_array().length() - 1
    }

    pub fn next_context_link(self) -> Value {
        self.as_array().get(self.next_context_link_index())
    }

    pub fn set_next_context_link(self, value: Value) {
        self.as_array().set(self.next_context_link_index(), value);
    }
}

/// The kinds of compiled code objects.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(isize)]
pub enum CodeKind {
    Function = 0,
    Builtin = 1,
    Optimized = 2,
}

/// The ways a relocation entry can reference the heap.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(isize)]
pub enum RelocMode {
    CodeTarget = 0,
    EmbeddedObject = 1,
    Cell = 2,
    DebugTarget = 3,
}

impl RelocMode {
    pub fn from_smi(v: isize) -> RelocMode {
        match v {
            0 => RelocMode::CodeTarget,
            1 => RelocMode::EmbeddedObject,
            2 => RelocMode::Cell,
            3 => RelocMode::DebugTarget,
            _ => unreachable!("bad reloc mode {}", v),
        }
    }
}

object_class! {
    /// A compiled code body. Outgoing references live in the relocation
    /// table at the object's tail; the instruction words in between are
    /// opaque. The padding word in the header is dead space that the code
    /// flusher reuses for its candidate list.
    Code
}

impl Code {
    pub const SIZE_OFFSET: usize = BYTES_IN_WORD;
    pub const KIND_OFFSET: usize = 2 * BYTES_IN_WORD;
    pub const HEADER_PADDING_OFFSET: usize = 3 * BYTES_IN_WORD;
    pub const RELOC_COUNT_OFFSET: usize = 4 * BYTES_IN_WORD;
    /// Where the instruction words start; also what a code-entry word in a
    /// function points at.
    pub const ENTRY_OFFSET: usize = 5 * BYTES_IN_WORD;
    pub const HEADER_SIZE: usize = Self::ENTRY_OFFSET;

    pub fn size(self) -> usize {
        self.0.smi_field(Self::SIZE_OFFSET) as usize
    }

    pub fn size_for(instruction_size: usize, reloc_count: usize) -> usize {
        align_object_size(Self::HEADER_SIZE + instruction_size) + reloc_count * 2 * BYTES_IN_WORD
    }

    pub fn kind(self) -> CodeKind {
        match self.0.smi_field(Self::KIND_OFFSET) {
            0 => CodeKind::Function,
            1 => CodeKind::Builtin,
            _ => CodeKind::Optimized,
        }
    }

    pub fn reloc_count(self) -> usize {
        self.0.smi_field(Self::RELOC_COUNT_OFFSET) as usize
    }

    /// The address a code-entry word holds for this code object.
    pub fn entry(self) -> Address {
        self.0.address() + Self::ENTRY_OFFSET
    }

    /// Recover the code object from a code-entry address.
    pub fn from_entry_address(entry: Address) -> Code {
        Code(HeapObject::from_address(entry - Self::ENTRY_OFFSET))
    }

    fn reloc_begin(self) -> usize {
        self.size() - self.reloc_count() * 2 * BYTES_IN_WORD
    }

    pub fn reloc_mode(self, i: usize) -> RelocMode {
        debug_assert!(i < self.reloc_count());
        RelocMode::from_smi(self.0.smi_field(self.reloc_begin() + i * 2 * BYTES_IN_WORD))
    }

    pub fn set_reloc_mode(self, i: usize, mode: RelocMode) {
        self.0
            .set_smi_field(self.reloc_begin() + i * 2 * BYTES_IN_WORD, mode as isize);
    }

    /// The slot of relocation entry `i` that holds the referenced value.
    pub fn reloc_target_slot(self, i: usize) -> Address {
        debug_assert!(i < self.reloc_count());
        self.0
            .raw_field(self.reloc_begin() + i * 2 * BYTES_IN_WORD + BYTES_IN_WORD)
    }

    pub fn reloc_target(self, i: usize) -> Value {
        unsafe { self.reloc_target_slot(i).load::<Value>() }
    }

    pub fn set_reloc_target(self, i: usize, value: Value) {
        unsafe { self.reloc_target_slot(i).store::<Value>(value) }
    }
}

/// Flag bits of a [`SharedFunctionInfo`].
pub mod shared_flags {
    pub const ALLOWS_LAZY_COMPILATION: isize = 1 << 0;
    pub const IS_TOPLEVEL: isize = 1 << 1;
    pub const SLACK_TRACKING_IN_PROGRESS: isize = 1 << 2;
}

object_class! {
    /// The compiler's per-function record, shared by every closure of the
    /// function. Owns the canonical pointer to the function's code.
    SharedFunctionInfo
}

impl SharedFunctionInfo {
    pub const NAME_OFFSET: usize = BYTES_IN_WORD;
    pub const CODE_OFFSET: usize = 2 * BYTES_IN_WORD;
    pub const SCOPE_INFO_OFFSET: usize = 3 * BYTES_IN_WORD;
    pub const SCRIPT_OFFSET: usize = 4 * BYTES_IN_WORD;
    pub const FUNCTION_DATA_OFFSET: usize = 5 * BYTES_IN_WORD;
    pub const INITIAL_MAP_OFFSET: usize = 6 * BYTES_IN_WORD;
    pub const FLAGS_OFFSET: usize = 7 * BYTES_IN_WORD;
    pub const CODE_AGE_OFFSET: usize = 8 * BYTES_IN_WORD;
    pub const SIZE: usize = 9 * BYTES_IN_WORD;

    pub fn code(self) -> Code {
        Code::from_object(self.0.field(Self::CODE_OFFSET).to_object())
    }

    pub fn set_code(self, code: Code) {
        self.0.set_field(Self::CODE_OFFSET, code.value());
    }

    pub fn script(self) -> Value {
        self.0.field(Self::SCRIPT_OFFSET)
    }

    pub fn function_data(self) -> Value {
        self.0.field(Self::FUNCTION_DATA_OFFSET)
    }

    pub fn initial_map(self) -> Value {
        self.0.field(Self::INITIAL_MAP_OFFSET)
    }

    pub fn set_initial_map(self, value: Value) {
        self.0.set_field(Self::INITIAL_MAP_OFFSET, value);
    }

    pub fn flags(self) -> isize {
        self.0.smi_field(Self::FLAGS_OFFSET)
    }

    pub fn set_flags(self, flags: isize) {
        self.0.set_smi_field(Self::FLAGS_OFFSET, flags);
    }

    pub fn allows_lazy_compilation(self) -> bool {
        self.flags() & shared_flags::ALLOWS_LAZY_COMPILATION != 0
    }

    pub fn is_toplevel(self) -> bool {
        self.flags() & shared_flags::IS_TOPLEVEL != 0
    }

    pub fn is_inobject_slack_tracking_in_progress(self) -> bool {
        self.flags() & shared_flags::SLACK_TRACKING_IN_PROGRESS != 0
    }

    pub fn code_age(self) -> usize {
        self.0.smi_field(Self::CODE_AGE_OFFSET) as usize
    }

    pub fn set_code_age(self, age: usize) {
        self.0.set_smi_field(Self::CODE_AGE_OFFSET, age as isize);
    }
}

object_class! {
    /// A closure: a shared function record paired with a context. The code
    /// entry word caches the shared code's entry address and is raw, not
    /// tagged; it doubles as the flusher's candidate link.
    JsFunction
}

impl JsFunction {
    pub const PROPERTIES_OFFSET: usize = BYTES_IN_WORD;
    pub const CODE_ENTRY_OFFSET: usize = 2 * BYTES_IN_WORD;
    pub const CONTEXT_OFFSET: usize = 3 * BYTES_IN_WORD;
    pub const SHARED_OFFSET: usize = 4 * BYTES_IN_WORD;
    pub const LITERALS_OFFSET: usize = 5 * BYTES_IN_WORD;
    pub const NEXT_FUNCTION_LINK_OFFSET: usize = 6 * BYTES_IN_WORD;
    pub const NON_WEAK_FIELDS_END_OFFSET: usize = Self::NEXT_FUNCTION_LINK_OFFSET;
    pub const SIZE: usize = 7 * BYTES_IN_WORD;

    pub fn code_entry_slot(self) -> Address {
        self.0.raw_field(Self::CODE_ENTRY_OFFSET)
    }

    pub fn code(self) -> Code {
        let entry = unsafe { self.code_entry_slot().load::<usize>() };
        Code::from_entry_address(unsafe { Address::from_usize(entry) })
    }

    pub fn set_code(self, code: Code) {
        unsafe {
            self.code_entry_slot()
                .store::<usize>(code.entry().as_usize())
        }
    }

    pub fn context(self) -> Value {
        self.0.field(Self::CONTEXT_OFFSET)
    }

    pub fn shared(self) -> SharedFunctionInfo {
        SharedFunctionInfo::from_object(self.0.field(Self::SHARED_OFFSET).to_object())
    }
}

object_class! {
    /// A global property cell; lives in cell space, holds one value.
    PropertyCell
}

impl PropertyCell {
    pub const VALUE_OFFSET: usize = BYTES_IN_WORD;
    pub const SIZE: usize = 2 * BYTES_IN_WORD;

    pub fn value_slot(self) -> Address {
        self.0.raw_field(Self::VALUE_OFFSET)
    }

    pub fn get(self) -> Value {
        self.0.field(Self::VALUE_OFFSET)
    }

    pub fn set(self, value: Value) {
        self.0.set_field(Self::VALUE_OFFSET, value);
    }
}

object_class! {
    /// A runtime object with named properties; in-object slots follow the
    /// two header pointers up to the size recorded in the descriptor.
    JsObject
}

impl JsObject {
    pub const PROPERTIES_OFFSET: usize = BYTES_IN_WORD;
    pub const ELEMENTS_OFFSET: usize = 2 * BYTES_IN_WORD;
    pub const HEADER_SIZE: usize = 3 * BYTES_IN_WORD;

    pub fn inobject_slot(self, index: usize) -> Address {
        self.0.raw_field(Self::HEADER_SIZE + index * BYTES_IN_WORD)
    }

    pub fn get_inobject(self, index: usize) -> Value {
        unsafe { self.inobject_slot(index).load::<Value>() }
    }

    pub fn set_inobject(self, index: usize, value: Value) {
        unsafe { self.inobject_slot(index).store::<Value>(value) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smi_tagging_roundtrip() {
        assert!(Value::from_smi(0).is_smi());
        assert_eq!(Value::from_smi(42).to_smi(), 42);
        assert_eq!(Value::from_smi(-7).to_smi(), -7);
    }

    #[test]
    fn object_tagging_roundtrip() {
        let object = HeapObject::from_address(unsafe { Address::from_usize(0x10000) });
        let value = Value::from_object(object);
        assert!(value.is_heap_object());
        assert_eq!(value.to_object().address().as_usize(), 0x10000);
    }

    #[test]
    fn null_object_sentinel() {
        assert!(Value::NULL_OBJECT.is_heap_object());
        assert!(Value::NULL_OBJECT.to_object().address().is_zero());
    }

    #[test]
    fn overflow_bit_is_separate_from_map() {
        let mut backing = [0usize; 4];
        let object = HeapObject::from_address(Address::from_mut_ptr(backing.as_mut_ptr()));
        object.set_map_word(0x4000);
        object.set_overflow();
        assert!(object.is_overflowed());
        assert_eq!(object.map().object().address().as_usize(), 0x4000);
        object.clear_overflow();
        assert!(!object.is_overflowed());
        assert_eq!(object.map_word(), 0x4000);
    }

    #[test]
    fn code_entry_roundtrip() {
        let entry = unsafe { Address::from_usize(0x8000) } + Code::ENTRY_OFFSET;
        assert_eq!(
            Code::from_entry_address(entry).object().address().as_usize(),
            0x8000
        );
    }

    #[test]
    fn variable_sizes_are_aligned() {
        assert_eq!(SeqString::size_for(0), SeqString::DATA_OFFSET);
        assert_eq!(
            SeqString::size_for(1),
            SeqString::DATA_OFFSET + BYTES_IN_WORD
        );
        assert_eq!(FixedArray::size_for(3), FixedArray::HEADER_SIZE + 3 * BYTES_IN_WORD);
        assert!(Code::size_for(10, 2) % BYTES_IN_WORD == 0);
    }
}
