//! Object construction: the canonical-roots bootstrap and the allocation
//! front end the runtime (and the tests) build heaps with.
//!
//! Every allocation routes through [`Heap::allocate_raw_in`], which answers
//! with [`AllocError`] when the chosen space will not grow; the only caller
//! allowed to assume success is the bootstrap, whose handful of canonical
//! objects trivially fit the smallest permitted configuration.

use crate::heap::{CanonicalRoots, Heap};
use crate::heap::space::{AllocError, SpaceId};
use crate::object::*;
use crate::util::constants::*;
use crate::util::Address;

/// Initial bucket count of the symbol table (plus one prefix slot).
const SYMBOL_TABLE_INITIAL_CAPACITY: usize = 64;
/// Index of the element-count prefix slot.
const SYMBOL_TABLE_PREFIX: usize = 1;

pub(crate) fn bootstrap_roots_placeholder() -> CanonicalRoots {
    let zero = Value::from_smi(0);
    CanonicalRoots {
        meta_map: zero,
        fixed_array_map: zero,
        byte_array_map: zero,
        seq_string_map: zero,
        symbol_map: zero,
        external_string_map: zero,
        cons_string_map: zero,
        oddball_map: zero,
        code_map: zero,
        shared_function_info_map: zero,
        js_function_map: zero,
        property_cell_map: zero,
        context_map: zero,
        descriptor_array_map: zero,
        empty_fixed_array: zero,
        empty_descriptor_array: zero,
        empty_string: zero,
        undefined_value: zero,
        null_value: zero,
        lazy_compile_stub: zero,
    }
}

impl Heap {
    pub(crate) fn allocate_raw_in(
        &mut self,
        id: SpaceId,
        size: usize,
    ) -> Result<Address, AllocError> {
        match id {
            SpaceId::New => self.new_space.allocate_raw(size),
            SpaceId::Large => self.lo_space.allocate_raw(size),
            paged => self.paged_space_mut(paged).allocate_raw(size),
        }
    }

    fn allocate_object(
        &mut self,
        id: SpaceId,
        map: Value,
        size: usize,
    ) -> Result<HeapObject, AllocError> {
        let addr = self.allocate_raw_in(id, size)?;
        let object = HeapObject::from_address(addr);
        object.set_map(Map::from_object(map.to_object()));
        Ok(object)
    }

    /// Pick the space for an ordinary allocation: the nursery by default,
    /// the matching old space when pretenured, the large-object space when
    /// the paged spaces cannot hold it.
    fn choose_space(&self, pretenure: bool, has_pointers: bool, size: usize) -> SpaceId {
        if size > MAX_OBJECT_SIZE_IN_PAGED_SPACE {
            SpaceId::Large
        } else if !pretenure {
            SpaceId::New
        } else if has_pointers {
            SpaceId::OldPointer
        } else {
            SpaceId::OldData
        }
    }

    // -----------------------------------------------------------------
    // Bootstrap.

    pub(crate) fn bootstrap(&mut self) {
        // The descriptor of descriptors refers to itself through its header.
        let meta_addr = self
            .map_space
            .allocate_raw(Map::SIZE)
            .expect("bootstrap allocation cannot fail");
        let meta = HeapObject::from_address(meta_addr);
        meta.set_map_word(meta_addr.as_usize());
        Self::init_boot_map_fields(meta, InstanceType::Map, Map::SIZE);
        self.roots.meta_map = Value::from_object(meta);

        self.roots.fixed_array_map = self.make_boot_map(InstanceType::FixedArray, 0);
        self.roots.byte_array_map = self.make_boot_map(InstanceType::ByteArray, 0);
        self.roots.seq_string_map = self.make_boot_map(InstanceType::SeqString, 0);
        self.roots.symbol_map = self.make_boot_map(InstanceType::Symbol, 0);
        self.roots.external_string_map =
            self.make_boot_map(InstanceType::ExternalString, ExternalString::SIZE);
        self.roots.cons_string_map =
            self.make_boot_map(InstanceType::ConsString, ConsString::SIZE);
        self.roots.oddball_map = self.make_boot_map(InstanceType::Oddball, Oddball::SIZE);
        self.roots.code_map = self.make_boot_map(InstanceType::Code, 0);
        self.roots.shared_function_info_map =
            self.make_boot_map(InstanceType::SharedFunctionInfo, SharedFunctionInfo::SIZE);
        self.roots.js_function_map =
            self.make_boot_map(InstanceType::JsFunction, JsFunction::SIZE);
        self.roots.property_cell_map =
            self.make_boot_map(InstanceType::PropertyCell, PropertyCell::SIZE);
        self.roots.context_map = self.make_boot_map(InstanceType::Context, 0);
        self.roots.descriptor_array_map = self.make_boot_map(InstanceType::DescriptorArray, 0);

        // Empty containers and singletons.
        let empty_array = self
            .allocate_object(
                SpaceId::OldData,
                self.roots.fixed_array_map,
                FixedArray::size_for(0),
            )
            .expect("bootstrap allocation cannot fail");
        empty_array.set_smi_field(FixedArray::LENGTH_OFFSET, 0);
        self.roots.empty_fixed_array = Value::from_object(empty_array);

        let empty_string = self
            .allocate_object(
                SpaceId::OldData,
                self.roots.symbol_map,
                SeqString::size_for(0),
            )
            .expect("bootstrap allocation cannot fail");
        empty_string.set_smi_field(SeqString::LENGTH_OFFSET, 0);
        self.roots.empty_string = Value::from_object(empty_string);

        self.roots.undefined_value = self.make_boot_oddball(OddballKind::Undefined);
        self.roots.null_value = self.make_boot_oddball(OddballKind::Null);

        let empty_descriptors = self
            .allocate_object(
                SpaceId::OldPointer,
                self.roots.descriptor_array_map,
                FixedArray::size_for(0),
            )
            .expect("bootstrap allocation cannot fail");
        empty_descriptors.set_smi_field(FixedArray::LENGTH_OFFSET, 0);
        self.roots.empty_descriptor_array = Value::from_object(empty_descriptors);

        let stub = self
            .allocate_object(SpaceId::Code, self.roots.code_map, Code::size_for(0, 0))
            .expect("bootstrap allocation cannot fail");
        stub.set_smi_field(Code::SIZE_OFFSET, Code::size_for(0, 0) as isize);
        stub.set_smi_field(Code::KIND_OFFSET, CodeKind::Builtin as isize);
        unsafe { stub.raw_field(Code::HEADER_PADDING_OFFSET).store::<usize>(0) };
        stub.set_smi_field(Code::RELOC_COUNT_OFFSET, 0);
        self.roots.lazy_compile_stub = Value::from_object(stub);

        // Now that null and the empty containers exist, give every
        // canonical map real pointer fields.
        let null = self.roots.null_value;
        let empty_descriptors = self.roots.empty_descriptor_array;
        let empty_array = self.roots.empty_fixed_array;
        for map_value in [
            self.roots.meta_map,
            self.roots.fixed_array_map,
            self.roots.byte_array_map,
            self.roots.seq_string_map,
            self.roots.symbol_map,
            self.roots.external_string_map,
            self.roots.cons_string_map,
            self.roots.oddball_map,
            self.roots.code_map,
            self.roots.shared_function_info_map,
            self.roots.js_function_map,
            self.roots.property_cell_map,
            self.roots.context_map,
            self.roots.descriptor_array_map,
        ] {
            let map = Map::from_object(map_value.to_object());
            map.set_prototype(null);
            map.set_constructor(null);
            map.object()
                .set_field(Map::INSTANCE_DESCRIPTORS_OFFSET, empty_descriptors);
            map.clear_code_cache(empty_array);
        }

        // Oddball string fields could not be set before the empty string
        // existed either.
        for oddball in [self.roots.undefined_value, self.roots.null_value] {
            let object = oddball.to_object();
            object.set_field(Oddball::TO_STRING_OFFSET, self.roots.empty_string);
            object.set_field(Oddball::TO_NUMBER_OFFSET, Value::from_smi(0));
        }

        let table = self
            .allocate_object(
                SpaceId::OldPointer,
                self.roots.fixed_array_map,
                FixedArray::size_for(SYMBOL_TABLE_PREFIX + SYMBOL_TABLE_INITIAL_CAPACITY),
            )
            .expect("bootstrap allocation cannot fail");
        table.set_smi_field(
            FixedArray::LENGTH_OFFSET,
            (SYMBOL_TABLE_PREFIX + SYMBOL_TABLE_INITIAL_CAPACITY) as isize,
        );
        let table = FixedArray::from_object(table);
        table.set(0, Value::from_smi(0));
        for i in SYMBOL_TABLE_PREFIX..table.length() {
            table.set(i, self.roots.undefined_value);
        }
        self.symbol_table = table.value();

        self.global_contexts_list = self.roots.undefined_value;
    }

    fn init_boot_map_fields(object: HeapObject, instance_type: InstanceType, instance_size: usize) {
        object.set_smi_field(Map::INSTANCE_TYPE_OFFSET, instance_type as u8 as isize);
        object.set_smi_field(
            Map::VISITOR_ID_OFFSET,
            VisitorId::for_instance_type(instance_type) as u8 as isize,
        );
        object.set_smi_field(Map::INSTANCE_SIZE_OFFSET, instance_size as isize);
        object.set_smi_field(Map::BIT_FIELD_OFFSET, 0);
        // Pointer fields are patched once the singletons exist.
        object.set_field(Map::PROTOTYPE_OFFSET, Value::from_smi(0));
        object.set_field(Map::CONSTRUCTOR_OFFSET, Value::from_smi(0));
        object.set_field(Map::INSTANCE_DESCRIPTORS_OFFSET, Value::from_smi(0));
        object.set_field(Map::CODE_CACHE_OFFSET, Value::from_smi(0));
    }

    fn make_boot_map(&mut self, instance_type: InstanceType, instance_size: usize) -> Value {
        let object = self
            .allocate_object(SpaceId::Map, self.roots.meta_map, Map::SIZE)
            .expect("bootstrap allocation cannot fail");
        Self::init_boot_map_fields(object, instance_type, instance_size);
        Value::from_object(object)
    }

    fn make_boot_oddball(&mut self, kind: OddballKind) -> Value {
        let object = self
            .allocate_object(SpaceId::OldPointer, self.roots.oddball_map, Oddball::SIZE)
            .expect("bootstrap allocation cannot fail");
        object.set_field(Oddball::TO_STRING_OFFSET, Value::from_smi(0));
        object.set_field(Oddball::TO_NUMBER_OFFSET, Value::from_smi(0));
        object.set_smi_field(Oddball::KIND_OFFSET, kind as isize);
        Value::from_object(object)
    }

    // -----------------------------------------------------------------
    // Descriptors.

    /// A fresh class descriptor. JSObject-family descriptors default to an
    /// empty descriptor array and the null prototype.
    pub fn alloc_map(
        &mut self,
        instance_type: InstanceType,
        instance_size: usize,
    ) -> Result<Map, AllocError> {
        let object = self.allocate_object(SpaceId::Map, self.roots.meta_map, Map::SIZE)?;
        Self::init_boot_map_fields(object, instance_type, instance_size);
        let map = Map::from_object(object);
        map.set_prototype(self.roots.null_value);
        map.set_constructor(self.roots.null_value);
        object.set_field(
            Map::INSTANCE_DESCRIPTORS_OFFSET,
            self.roots.empty_descriptor_array,
        );
        map.clear_code_cache(self.roots.empty_fixed_array);
        Ok(map)
    }

    /// A descriptor array with `descriptor_count` (value, details) pairs,
    /// all initialized to null descriptors.
    pub fn alloc_descriptor_array(
        &mut self,
        descriptor_count: usize,
    ) -> Result<DescriptorArray, AllocError> {
        let contents = self.alloc_fixed_array(2 * descriptor_count, true)?;
        for i in 0..descriptor_count {
            contents.set(2 * i, self.roots.null_value);
            contents.set(2 * i + 1, Value::from_smi(PropertyType::NullDescriptor as isize));
        }
        let outer = self.allocate_object(
            SpaceId::OldPointer,
            self.roots.descriptor_array_map,
            FixedArray::size_for(1),
        )?;
        outer.set_smi_field(FixedArray::LENGTH_OFFSET, 1);
        let array = DescriptorArray::from_object(outer);
        FixedArray::from_object(outer).set(DescriptorArray::CONTENT_ARRAY_INDEX, contents.value());
        Ok(array)
    }

    /// Record a map transition: `parent` plus one property leads to
    /// `target`.
    pub fn set_map_transition(
        &mut self,
        parent: Map,
        index: usize,
        target: Map,
    ) -> Result<(), AllocError> {
        if parent.instance_descriptors().is_empty() {
            let descriptors = self.alloc_descriptor_array(4)?;
            parent.set_instance_descriptors(descriptors);
        }
        let descriptors = parent.instance_descriptors();
        descriptors.set_value(index, target.value());
        descriptors.set_details(index, PropertyType::MapTransition as isize);
        Ok(())
    }

    // -----------------------------------------------------------------
    // Plain objects.

    pub fn alloc_fixed_array(
        &mut self,
        length: usize,
        pretenure: bool,
    ) -> Result<FixedArray, AllocError> {
        let size = FixedArray::size_for(length);
        let space = self.choose_space(pretenure, true, size);
        let object = self.allocate_object(space, self.roots.fixed_array_map, size)?;
        object.set_smi_field(FixedArray::LENGTH_OFFSET, length as isize);
        let array = FixedArray::from_object(object);
        for i in 0..length {
            array.set(i, self.roots.undefined_value);
        }
        Ok(array)
    }

    pub fn alloc_byte_array(
        &mut self,
        length: usize,
        pretenure: bool,
    ) -> Result<ByteArray, AllocError> {
        let size = ByteArray::size_for(length);
        let space = self.choose_space(pretenure, false, size);
        let object = self.allocate_object(space, self.roots.byte_array_map, size)?;
        object.set_smi_field(ByteArray::LENGTH_OFFSET, length as isize);
        unsafe {
            std::ptr::write_bytes(
                object.raw_field(ByteArray::DATA_OFFSET).to_mut_ptr::<u8>(),
                0,
                size - ByteArray::DATA_OFFSET,
            );
        }
        Ok(ByteArray::from_object(object))
    }

    fn alloc_string_with_map(
        &mut self,
        map: Value,
        space: SpaceId,
        contents: &str,
    ) -> Result<SeqString, AllocError> {
        let size = SeqString::size_for(contents.len());
        let object = self.allocate_object(space, map, size)?;
        object.set_smi_field(SeqString::LENGTH_OFFSET, contents.len() as isize);
        let string = SeqString::from_object(object);
        unsafe {
            // Zero the padded tail, then lay the bytes down.
            std::ptr::write_bytes(
                string.data().to_mut_ptr::<u8>(),
                0,
                size - SeqString::DATA_OFFSET,
            );
            std::ptr::copy_nonoverlapping(
                contents.as_ptr(),
                string.data().to_mut_ptr::<u8>(),
                contents.len(),
            );
        }
        Ok(string)
    }

    pub fn alloc_string(
        &mut self,
        contents: &str,
        pretenure: bool,
    ) -> Result<SeqString, AllocError> {
        let size = SeqString::size_for(contents.len());
        let space = self.choose_space(pretenure, false, size);
        self.alloc_string_with_map(self.roots.seq_string_map, space, contents)
    }

    /// An interned-string body; always tenured.
    fn alloc_symbol(&mut self, contents: &str) -> Result<SeqString, AllocError> {
        self.alloc_string_with_map(self.roots.symbol_map, SpaceId::OldData, contents)
    }

    pub fn alloc_cons_string(
        &mut self,
        first: Value,
        second: Value,
        pretenure: bool,
    ) -> Result<ConsString, AllocError> {
        let space = self.choose_space(pretenure, true, ConsString::SIZE);
        let object = self.allocate_object(space, self.roots.cons_string_map, ConsString::SIZE)?;
        let length = self.string_length(first) + self.string_length(second);
        object.set_smi_field(ConsString::LENGTH_OFFSET, length as isize);
        self.write_field(object, ConsString::FIRST_OFFSET, first);
        self.write_field(object, ConsString::SECOND_OFFSET, second);
        Ok(ConsString::from_object(object))
    }

    /// A string whose payload lives outside the heap. The new string is
    /// registered in the external string table.
    pub fn alloc_external_string(
        &mut self,
        contents: String,
        pretenure: bool,
    ) -> Result<ExternalString, AllocError> {
        let space = self.choose_space(pretenure, false, ExternalString::SIZE);
        let object =
            self.allocate_object(space, self.roots.external_string_map, ExternalString::SIZE)?;
        object.set_smi_field(ExternalString::LENGTH_OFFSET, contents.len() as isize);
        let string = ExternalString::from_object(object);
        string.set_resource(Box::into_raw(Box::new(contents)));
        self.external_string_table.add(string.value());
        Ok(string)
    }

    pub fn string_length(&self, string: Value) -> usize {
        debug_assert!(string.is_heap_object());
        let object = string.to_object();
        match object.map().instance_type() {
            InstanceType::SeqString | InstanceType::Symbol => {
                SeqString::from_object(object).length()
            }
            InstanceType::ConsString => {
                object.smi_field(ConsString::LENGTH_OFFSET) as usize
            }
            InstanceType::ExternalString => {
                object.smi_field(ExternalString::LENGTH_OFFSET) as usize
            }
            other => panic!("not a string: {:?}", other),
        }
    }

    pub fn alloc_context(&mut self, length: usize, pretenure: bool) -> Result<Context, AllocError> {
        debug_assert!(length >= Context::MIN_LENGTH);
        let size = FixedArray::size_for(length);
        let space = self.choose_space(pretenure, true, size);
        let object = self.allocate_object(space, self.roots.context_map, size)?;
        object.set_smi_field(FixedArray::LENGTH_OFFSET, length as isize);
        let context = Context::from_object(object);
        for i in 0..length {
            context.as_array().set(i, self.roots.undefined_value);
        }
        Ok(context)
    }

    /// Thread a context onto the weak global-contexts list.
    pub fn add_global_context(&mut self, context: Context) {
        context.set_next_context_link(self.global_contexts_list);
        self.global_contexts_list = context.value();
    }

    pub fn alloc_js_object(&mut self, map: Map, pretenure: bool) -> Result<JsObject, AllocError> {
        let size = map.instance_size();
        debug_assert!(size >= JsObject::HEADER_SIZE);
        let space = self.choose_space(pretenure, true, size);
        let object = self.allocate_object(space, map.value(), size)?;
        self.write_field(object, JsObject::PROPERTIES_OFFSET, self.roots.empty_fixed_array);
        self.write_field(object, JsObject::ELEMENTS_OFFSET, self.roots.empty_fixed_array);
        let js_object = JsObject::from_object(object);
        for i in 0..(size - JsObject::HEADER_SIZE) / BYTES_IN_WORD {
            js_object.set_inobject(i, self.roots.undefined_value);
        }
        Ok(js_object)
    }

    // -----------------------------------------------------------------
    // Code and functions.

    pub fn alloc_code(
        &mut self,
        kind: CodeKind,
        instruction_words: usize,
        reloc: &[(RelocMode, Value)],
    ) -> Result<Code, AllocError> {
        let size = Code::size_for(instruction_words * BYTES_IN_WORD, reloc.len());
        let object = self.allocate_object(SpaceId::Code, self.roots.code_map, size)?;
        object.set_smi_field(Code::SIZE_OFFSET, size as isize);
        object.set_smi_field(Code::KIND_OFFSET, kind as isize);
        unsafe { object.raw_field(Code::HEADER_PADDING_OFFSET).store::<usize>(0) };
        object.set_smi_field(Code::RELOC_COUNT_OFFSET, reloc.len() as isize);
        let code = Code::from_object(object);
        unsafe {
            std::ptr::write_bytes(
                code.entry().to_mut_ptr::<u8>(),
                0,
                instruction_words * BYTES_IN_WORD,
            );
        }
        for (i, &(mode, target)) in reloc.iter().enumerate() {
            code.set_reloc_mode(i, mode);
            code.set_reloc_target(i, target);
            // Embedded nursery pointers in code are tracked like any other
            // old→new store.
            if self.in_new_space(target) {
                self.store_buffer.enter_directly(code.reloc_target_slot(i));
            }
        }
        Ok(code)
    }

    pub fn alloc_shared_function_info(
        &mut self,
        name: Value,
        code: Code,
    ) -> Result<SharedFunctionInfo, AllocError> {
        let object = self.allocate_object(
            SpaceId::OldPointer,
            self.roots.shared_function_info_map,
            SharedFunctionInfo::SIZE,
        )?;
        self.write_field(object, SharedFunctionInfo::NAME_OFFSET, name);
        object.set_field(SharedFunctionInfo::CODE_OFFSET, code.value());
        object.set_field(SharedFunctionInfo::SCOPE_INFO_OFFSET, self.roots.empty_fixed_array);
        object.set_field(SharedFunctionInfo::SCRIPT_OFFSET, self.roots.undefined_value);
        object.set_field(
            SharedFunctionInfo::FUNCTION_DATA_OFFSET,
            self.roots.undefined_value,
        );
        object.set_field(
            SharedFunctionInfo::INITIAL_MAP_OFFSET,
            self.roots.undefined_value,
        );
        object.set_smi_field(
            SharedFunctionInfo::FLAGS_OFFSET,
            shared_flags::ALLOWS_LAZY_COMPILATION,
        );
        object.set_smi_field(SharedFunctionInfo::CODE_AGE_OFFSET, 0);
        Ok(SharedFunctionInfo::from_object(object))
    }

    /// Give a shared function a script whose source is available, making it
    /// a flushing candidate once it ages past the threshold.
    pub fn attach_script(&mut self, shared: SharedFunctionInfo) -> Result<(), AllocError> {
        let source = self.alloc_string("source", true)?;
        let script = self.alloc_fixed_array(1, true)?;
        script.set(0, source.value());
        self.write_field(shared.object(), SharedFunctionInfo::SCRIPT_OFFSET, script.value());
        Ok(())
    }

    pub fn alloc_function(
        &mut self,
        shared: SharedFunctionInfo,
        context: Value,
        pretenure: bool,
    ) -> Result<JsFunction, AllocError> {
        let space = self.choose_space(pretenure, true, JsFunction::SIZE);
        let object = self.allocate_object(space, self.roots.js_function_map, JsFunction::SIZE)?;
        self.write_field(object, JsFunction::PROPERTIES_OFFSET, self.roots.empty_fixed_array);
        let function = JsFunction::from_object(object);
        function.set_code(shared.code());
        self.write_field(object, JsFunction::CONTEXT_OFFSET, context);
        self.write_field(object, JsFunction::SHARED_OFFSET, shared.value());
        self.write_field(object, JsFunction::LITERALS_OFFSET, self.roots.empty_fixed_array);
        object.set_field(
            JsFunction::NEXT_FUNCTION_LINK_OFFSET,
            self.roots.undefined_value,
        );
        Ok(function)
    }

    pub fn alloc_property_cell(&mut self, value: Value) -> Result<PropertyCell, AllocError> {
        let object = self.allocate_object(
            SpaceId::Cell,
            self.roots.property_cell_map,
            PropertyCell::SIZE,
        )?;
        // Cells are repaired by the cell-space walk after every scavenge,
        // so the store buffer does not track them.
        object.set_field(PropertyCell::VALUE_OFFSET, value);
        Ok(PropertyCell::from_object(object))
    }

    // -----------------------------------------------------------------
    // Symbol interning.

    /// Intern `contents`: return the existing symbol or allocate one and
    /// add it to the symbol table.
    pub fn intern_symbol(&mut self, contents: &str) -> Result<Value, AllocError> {
        let table = self.symbol_table();
        let undefined = self.roots.undefined_value;
        let null = self.roots.null_value;
        let mut insert_at = None;
        for i in SYMBOL_TABLE_PREFIX..table.length() {
            let entry = table.get(i);
            if entry == undefined {
                if insert_at.is_none() {
                    insert_at = Some(i);
                }
                break;
            }
            if entry == null {
                // Deleted slot, reusable.
                if insert_at.is_none() {
                    insert_at = Some(i);
                }
                continue;
            }
            if self.symbol_equals(entry, contents) {
                return Ok(entry);
            }
        }
        let symbol = self.alloc_symbol(contents)?.value();
        let table = self.symbol_table();
        match insert_at {
            Some(i) => table.set(i, symbol),
            None => {
                let i = self.grow_symbol_table()?;
                self.symbol_table().set(i, symbol);
            }
        }
        let table = self.symbol_table();
        let count = table.get(0).to_smi();
        table.set(0, Value::from_smi(count + 1));
        Ok(symbol)
    }

    fn symbol_equals(&self, entry: Value, contents: &str) -> bool {
        if !entry.is_heap_object() {
            return false;
        }
        let object = entry.to_object();
        if object.map().instance_type() != InstanceType::Symbol {
            return false;
        }
        let symbol = SeqString::from_object(object);
        if symbol.length() != contents.len() {
            return false;
        }
        let bytes =
            unsafe { std::slice::from_raw_parts(symbol.data().to_ptr::<u8>(), symbol.length()) };
        bytes == contents.as_bytes()
    }

    /// Double the symbol table, copying the surviving entries. Returns the
    /// first free element index.
    fn grow_symbol_table(&mut self) -> Result<usize, AllocError> {
        let old = self.symbol_table();
        let new_capacity = (old.length() - SYMBOL_TABLE_PREFIX) * 2;
        let object = self.allocate_object(
            SpaceId::OldPointer,
            self.roots.fixed_array_map,
            FixedArray::size_for(SYMBOL_TABLE_PREFIX + new_capacity),
        )?;
        object.set_smi_field(
            FixedArray::LENGTH_OFFSET,
            (SYMBOL_TABLE_PREFIX + new_capacity) as isize,
        );
        let new_table = FixedArray::from_object(object);
        for i in 0..new_table.length() {
            new_table.set(i, self.roots.undefined_value);
        }
        let old = self.symbol_table();
        let mut next = SYMBOL_TABLE_PREFIX;
        let mut count = 0isize;
        for i in SYMBOL_TABLE_PREFIX..old.length() {
            let entry = old.get(i);
            if entry != self.roots.undefined_value && entry != self.roots.null_value {
                new_table.set(next, entry);
                next += 1;
                count += 1;
            }
        }
        new_table.set(0, Value::from_smi(count));
        self.symbol_table = new_table.value();
        Ok(next)
    }
}
