//! Hidden classes, objects, arrays, functions and named properties.
//!
//! Named properties live in slots described by the hidden class layout: the
//! first `inlined` slots sit inside the object, the rest spill into the
//! out-of-line `properties` array. Adding a property transitions the object to
//! a new hidden class; transitions are cached per `(hclass, key)` so objects
//! built the same way share classes.

use kiln_core::value::{TaggedValue, TAGGED_SIZE};
use kiln_core::{KilnError, KilnResult};

use crate::heap::{glue, ConstantIndex, GlobalEnvField};
use crate::layout::{
    accessor_data, array, byte_array, function, hclass, lexical_env, method, object,
    tagged_array, tagged_array_element_offset, typed_array, FunctionKind, HClassFlags, JsType,
};
use crate::thread::JsThread;

/// Inline property slots of a plain object.
pub const DEFAULT_INLINED_PROPS: u32 = 4;

/// Largest array index.
pub const MAX_ARRAY_INDEX: u32 = u32::MAX - 1;

/// A normalized property key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKey {
    /// Array index.
    Index(u32),
    /// Interned string key.
    Named(TaggedValue),
}

impl JsThread {
    // =========================================================================
    // Hidden Classes
    // =========================================================================

    /// Allocate a hidden class.
    ///
    /// # Errors
    ///
    /// Fails if the heap is exhausted beyond its ceiling.
    pub fn new_hclass(
        &mut self,
        ty: JsType,
        flags: HClassFlags,
        object_size: u64,
        inlined: u32,
        prototype: TaggedValue,
    ) -> KilnResult<TaggedValue> {
        let meta = self.heap.constant(ConstantIndex::HClassClass)?;
        let layout = self.heap.constant(ConstantIndex::EmptyArray)?;
        let address = self.heap.allocate(hclass::SIZE)?;
        let h = TaggedValue::object(address);
        self.heap.set_field(h, object::HCLASS_OFFSET, meta)?;
        self.heap.write_u32(address + hclass::OBJECT_TYPE_OFFSET, u32::from(ty as u8))?;
        self.heap.write_u32(address + hclass::BIT_FIELD_OFFSET, flags.bits())?;
        self.heap.write_u32(address + hclass::OBJECT_SIZE_OFFSET, object_size as u32)?;
        self.heap.write_u32(address + hclass::INLINED_PROPS_OFFSET, inlined)?;
        self.heap.set_field(h, hclass::PROTOTYPE_OFFSET, prototype)?;
        self.heap.set_field(h, hclass::LAYOUT_OFFSET, layout)?;
        self.heap.write_u32(address + hclass::NUM_PROPS_OFFSET, 0)?;
        Ok(h)
    }

    /// Copy a hidden class, keeping its layout.
    fn clone_hclass(&mut self, source: TaggedValue) -> KilnResult<TaggedValue> {
        let address = self.heap.allocate(hclass::SIZE)?;
        let bytes = self.heap.slice(source.as_address(), hclass::SIZE)?.to_vec();
        self.heap.write_bytes(address, &bytes)?;
        Ok(TaggedValue::object(address))
    }

    /// Hidden class of a heap object.
    ///
    /// # Errors
    ///
    /// Fails if `obj` is not a mapped heap object.
    pub fn hclass_of(&self, obj: TaggedValue) -> KilnResult<TaggedValue> {
        self.heap.field(obj, object::HCLASS_OFFSET)
    }

    /// Object type described by a hidden class.
    ///
    /// # Errors
    ///
    /// Fails if `hclass` is not mapped.
    pub fn hclass_type(&self, h: TaggedValue) -> KilnResult<Option<JsType>> {
        let raw = self.heap.read_u32(h.as_address() + hclass::OBJECT_TYPE_OFFSET)?;
        Ok(JsType::from_u8(raw as u8))
    }

    /// Flag bits of a hidden class.
    ///
    /// # Errors
    ///
    /// Fails if `hclass` is not mapped.
    pub fn hclass_flags(&self, h: TaggedValue) -> KilnResult<HClassFlags> {
        let raw = self.heap.read_u32(h.as_address() + hclass::BIT_FIELD_OFFSET)?;
        Ok(HClassFlags::from_bits_truncate(raw))
    }

    /// Update flag bits of a hidden class.
    ///
    /// # Errors
    ///
    /// Fails if `hclass` is not mapped.
    pub fn set_hclass_flags(&mut self, h: TaggedValue, flags: HClassFlags) -> KilnResult<()> {
        self.heap.write_u32(h.as_address() + hclass::BIT_FIELD_OFFSET, flags.bits())
    }

    fn flags_of(&self, value: TaggedValue) -> HClassFlags {
        if !value.is_heap_object() {
            return HClassFlags::empty();
        }
        self.hclass_of(value)
            .and_then(|h| self.hclass_flags(h))
            .unwrap_or_else(|_| HClassFlags::empty())
    }

    /// Whether `value` can be called.
    #[must_use]
    pub fn is_callable(&self, value: TaggedValue) -> bool {
        self.flags_of(value).contains(HClassFlags::CALLABLE)
    }

    /// Whether `value` can be constructed.
    #[must_use]
    pub fn is_constructor(&self, value: TaggedValue) -> bool {
        self.flags_of(value).contains(HClassFlags::CONSTRUCTOR)
    }

    /// Whether `value` is a base (non-derived) constructor.
    ///
    /// # Errors
    ///
    /// Fails if `value` is a dangling pointer.
    pub fn is_base_constructor(&self, value: TaggedValue) -> KilnResult<bool> {
        Ok(self.flags_of(value).contains(HClassFlags::CONSTRUCTOR | HClassFlags::BASE))
    }

    /// Whether `value` is a string.
    #[must_use]
    pub fn is_string(&self, value: TaggedValue) -> bool {
        self.object_type(value) == Some(JsType::String)
    }

    /// Whether `value` is an array.
    #[must_use]
    pub fn is_js_array(&self, value: TaggedValue) -> bool {
        self.object_type(value) == Some(JsType::JsArray)
    }

    /// Whether `value` is an ECMAScript object (as opposed to an internal cell).
    #[must_use]
    pub fn is_ecma_object(&self, value: TaggedValue) -> bool {
        self.object_type(value).is_some_and(JsType::is_js_object)
    }

    /// Prototype of an object.
    ///
    /// # Errors
    ///
    /// Fails if `obj` is not mapped.
    pub fn prototype_of(&self, obj: TaggedValue) -> KilnResult<TaggedValue> {
        let h = self.hclass_of(obj)?;
        self.heap.field(h, hclass::PROTOTYPE_OFFSET)
    }

    /// Give `obj` a fresh hidden class with prototype `proto`.
    ///
    /// # Errors
    ///
    /// Fails if the heap is exhausted beyond its ceiling.
    pub fn set_prototype(&mut self, obj: TaggedValue, proto: TaggedValue) -> KilnResult<()> {
        let h = self.hclass_of(obj)?;
        let new_h = self.clone_hclass(h)?;
        self.heap.set_field(new_h, hclass::PROTOTYPE_OFFSET, proto)?;
        self.heap.set_field(obj, object::HCLASS_OFFSET, new_h)
    }

    /// Mark `obj` as a prototype; array prototypes disable the stable-array guardian.
    pub(crate) fn note_prototype_write(&mut self, obj: TaggedValue) -> KilnResult<()> {
        let array_proto = self.global_env_field(GlobalEnvField::ArrayPrototype)?;
        let object_proto = self.global_env_field(GlobalEnvField::ObjectPrototype)?;
        if obj == array_proto || obj == object_proto {
            self.heap.write_u64(self.glue() + glue::STABLE_ARRAY_GUARDIAN_OFFSET, 0)?;
        }
        Ok(())
    }

    /// Whether the stable-array guardian still holds.
    ///
    /// # Errors
    ///
    /// Never fails after initialization.
    pub fn stable_array_guardian(&self) -> KilnResult<bool> {
        Ok(self.heap.read_u64(self.glue() + glue::STABLE_ARRAY_GUARDIAN_OFFSET)? != 0)
    }

    /// A slot of the global environment.
    ///
    /// # Errors
    ///
    /// Never fails after initialization.
    pub fn global_env_field(&self, field: GlobalEnvField) -> KilnResult<TaggedValue> {
        let env = self.heap.glue_field(glue::GLOBAL_ENV_OFFSET)?;
        if !env.is_heap_object() {
            return Ok(TaggedValue::UNDEFINED);
        }
        self.array_get(env, field as u32)
    }

    /// The global object.
    ///
    /// # Errors
    ///
    /// Never fails after initialization.
    pub fn global_object(&self) -> KilnResult<TaggedValue> {
        self.heap.glue_field(glue::GLOBAL_OBJECT_OFFSET)
    }

    // =========================================================================
    // Tagged Arrays
    // =========================================================================

    /// Allocate a tagged array filled with `fill`.
    ///
    /// # Errors
    ///
    /// Fails if the heap is exhausted beyond its ceiling.
    pub fn new_tagged_array(&mut self, len: u32, fill: TaggedValue) -> KilnResult<TaggedValue> {
        self.new_tagged_array_of(ConstantIndex::TaggedArrayClass, len, fill)
    }

    pub(crate) fn new_tagged_array_of(
        &mut self,
        class: ConstantIndex,
        len: u32,
        fill: TaggedValue,
    ) -> KilnResult<TaggedValue> {
        let class = self.heap.constant(class)?;
        let size = tagged_array_element_offset(u64::from(len));
        let address = self.heap.allocate(size)?;
        let arr = TaggedValue::object(address);
        self.heap.set_field(arr, object::HCLASS_OFFSET, class)?;
        self.heap.write_u32(address + tagged_array::LENGTH_OFFSET, len)?;
        for i in 0..u64::from(len) {
            self.heap.write_tagged(address + tagged_array_element_offset(i), fill)?;
        }
        Ok(arr)
    }

    /// Allocate a tagged array holding `values`.
    ///
    /// # Errors
    ///
    /// Fails if the heap is exhausted beyond its ceiling.
    pub fn tagged_array_from(&mut self, values: &[TaggedValue]) -> KilnResult<TaggedValue> {
        let arr = self.new_tagged_array(values.len() as u32, TaggedValue::UNDEFINED)?;
        for (i, v) in values.iter().enumerate() {
            self.array_set(arr, i as u32, *v)?;
        }
        Ok(arr)
    }

    /// Length of a tagged array.
    ///
    /// # Errors
    ///
    /// Fails if `arr` is not mapped.
    pub fn array_len(&self, arr: TaggedValue) -> KilnResult<u32> {
        self.heap.read_u32(arr.as_address() + tagged_array::LENGTH_OFFSET)
    }

    /// Element of a tagged array.
    ///
    /// # Errors
    ///
    /// Fails when `index` is out of bounds.
    pub fn array_get(&self, arr: TaggedValue, index: u32) -> KilnResult<TaggedValue> {
        let len = self.array_len(arr)?;
        if index >= len {
            return Err(KilnError::InvalidAccess {
                address: arr.as_address() + tagged_array_element_offset(u64::from(index)),
                size: TAGGED_SIZE,
            });
        }
        self.heap.field(arr, tagged_array_element_offset(u64::from(index)))
    }

    /// Store into a tagged array.
    ///
    /// # Errors
    ///
    /// Fails when `index` is out of bounds.
    pub fn array_set(&mut self, arr: TaggedValue, index: u32, value: TaggedValue) -> KilnResult<()> {
        let len = self.array_len(arr)?;
        if index >= len {
            return Err(KilnError::InvalidAccess {
                address: arr.as_address() + tagged_array_element_offset(u64::from(index)),
                size: TAGGED_SIZE,
            });
        }
        self.heap.set_field(arr, tagged_array_element_offset(u64::from(index)), value)
    }

    /// Copy `arr` into a new array of `new_len`, padding with `fill`.
    ///
    /// # Errors
    ///
    /// Fails if the heap is exhausted beyond its ceiling.
    pub fn grow_tagged_array(
        &mut self,
        arr: TaggedValue,
        new_len: u32,
        fill: TaggedValue,
    ) -> KilnResult<TaggedValue> {
        let old_len = self.array_len(arr)?;
        let grown = self.new_tagged_array(new_len, fill)?;
        for i in 0..old_len.min(new_len) {
            let v = self.array_get(arr, i)?;
            self.array_set(grown, i, v)?;
        }
        Ok(grown)
    }

    /// Allocate a lexical environment with `num_vars` hole-initialized slots.
    ///
    /// # Errors
    ///
    /// Fails if the heap is exhausted beyond its ceiling.
    pub fn new_lexical_env(&mut self, num_vars: u32, parent: TaggedValue) -> KilnResult<TaggedValue> {
        let len = num_vars + lexical_env::RESERVED_ENV_LENGTH;
        let env = self.new_tagged_array_of(ConstantIndex::LexicalEnvClass, len, TaggedValue::HOLE)?;
        self.array_set(env, lexical_env::PARENT_ENV_INDEX, parent)?;
        self.array_set(env, lexical_env::SCOPE_INFO_INDEX, TaggedValue::UNDEFINED)?;
        Ok(env)
    }

    // =========================================================================
    // Objects
    // =========================================================================

    /// Instance size described by a hidden class.
    ///
    /// # Errors
    ///
    /// Fails if `h` is not mapped.
    pub fn hclass_object_size(&self, h: TaggedValue) -> KilnResult<u64> {
        Ok(u64::from(self.heap.read_u32(h.as_address() + hclass::OBJECT_SIZE_OFFSET)?))
    }

    fn hclass_inlined(&self, h: TaggedValue) -> KilnResult<u32> {
        self.heap.read_u32(h.as_address() + hclass::INLINED_PROPS_OFFSET)
    }

    fn hclass_num_props(&self, h: TaggedValue) -> KilnResult<u32> {
        self.heap.read_u32(h.as_address() + hclass::NUM_PROPS_OFFSET)
    }

    /// Allocate an object described by `h`, with undefined in every slot.
    ///
    /// # Errors
    ///
    /// Fails if the heap is exhausted beyond its ceiling.
    pub fn new_object_with_hclass(&mut self, h: TaggedValue) -> KilnResult<TaggedValue> {
        let size = self.hclass_object_size(h)?;
        let empty = self.heap.constant(ConstantIndex::EmptyArray)?;
        let address = self.heap.allocate(size)?;
        let obj = TaggedValue::object(address);
        self.heap.set_field(obj, object::HCLASS_OFFSET, h)?;
        self.heap.set_field(obj, object::HASH_OFFSET, TaggedValue::int(0))?;
        self.heap.set_field(obj, object::PROPERTIES_OFFSET, empty)?;
        self.heap.set_field(obj, object::ELEMENTS_OFFSET, empty)?;
        let mut offset = object::SIZE;
        while offset < size {
            self.heap.set_field(obj, offset, TaggedValue::UNDEFINED)?;
            offset += TAGGED_SIZE;
        }
        Ok(obj)
    }

    /// Allocate an object from a global class constant.
    ///
    /// # Errors
    ///
    /// Fails if the heap is exhausted beyond its ceiling.
    pub fn new_object_of(&mut self, class: ConstantIndex) -> KilnResult<TaggedValue> {
        let h = self.heap.constant(class)?;
        self.new_object_with_hclass(h)
    }

    /// Allocate an empty plain object.
    ///
    /// # Errors
    ///
    /// Fails if the heap is exhausted beyond its ceiling.
    pub fn new_plain_object(&mut self) -> KilnResult<TaggedValue> {
        self.new_object_of(ConstantIndex::ObjectClass)
    }

    /// Allocate an array holding `values`.
    ///
    /// # Errors
    ///
    /// Fails if the heap is exhausted beyond its ceiling.
    pub fn new_js_array(&mut self, values: &[TaggedValue]) -> KilnResult<TaggedValue> {
        let arr = self.new_object_of(ConstantIndex::ArrayClass)?;
        self.heap.write_u64(arr.as_address() + array::LENGTH_OFFSET, 0)?;
        if !values.is_empty() {
            let elements = self.tagged_array_from(values)?;
            self.heap.set_field(arr, object::ELEMENTS_OFFSET, elements)?;
            self.heap
                .write_u32(arr.as_address() + array::LENGTH_OFFSET, values.len() as u32)?;
        }
        Ok(arr)
    }

    /// Length of a `JSArray`.
    ///
    /// # Errors
    ///
    /// Fails if `arr` is not mapped.
    pub fn js_array_length(&self, arr: TaggedValue) -> KilnResult<u32> {
        self.heap.read_u32(arr.as_address() + array::LENGTH_OFFSET)
    }

    /// Set the length of a `JSArray`, truncating elements.
    ///
    /// # Errors
    ///
    /// Fails if `arr` is not mapped.
    pub fn set_js_array_length(&mut self, arr: TaggedValue, len: u32) -> KilnResult<()> {
        let old = self.js_array_length(arr)?;
        if len < old {
            let elements = self.heap.field(arr, object::ELEMENTS_OFFSET)?;
            let cap = self.array_len(elements)?;
            for i in len..old.min(cap) {
                self.array_set(elements, i, TaggedValue::HOLE)?;
            }
        }
        self.heap.write_u32(arr.as_address() + array::LENGTH_OFFSET, len)
    }

    /// Allocate an error object of kind `name`.
    ///
    /// # Errors
    ///
    /// Fails if the heap is exhausted beyond its ceiling.
    pub fn new_error(&mut self, name: &str, message: &str) -> KilnResult<TaggedValue> {
        let error = self.new_object_of(ConstantIndex::ErrorClass)?;
        let name_key = self.heap.constant(ConstantIndex::NameString)?;
        let message_key = self.heap.constant(ConstantIndex::MessageString)?;
        let name_value = self.intern(name)?;
        let message_value = self.new_string(message)?;
        self.define_own_named(error, name_key, name_value)?;
        self.define_own_named(error, message_key, message_value)?;
        Ok(error)
    }

    /// Allocate a getter/setter pair.
    ///
    /// # Errors
    ///
    /// Fails if the heap is exhausted beyond its ceiling.
    pub fn new_accessor(&mut self, getter: TaggedValue, setter: TaggedValue) -> KilnResult<TaggedValue> {
        let class = self.heap.constant(ConstantIndex::AccessorDataClass)?;
        let address = self.heap.allocate(accessor_data::SIZE)?;
        let acc = TaggedValue::object(address);
        self.heap.set_field(acc, object::HCLASS_OFFSET, class)?;
        self.heap.set_field(acc, accessor_data::GETTER_OFFSET, getter)?;
        self.heap.set_field(acc, accessor_data::SETTER_OFFSET, setter)?;
        Ok(acc)
    }

    // =========================================================================
    // Functions
    // =========================================================================

    /// Allocate a method descriptor.
    ///
    /// # Errors
    ///
    /// Fails if the heap is exhausted beyond its ceiling.
    pub fn new_method(
        &mut self,
        native_id: u32,
        builtin_id: u32,
        kind: FunctionKind,
        num_args: u16,
    ) -> KilnResult<TaggedValue> {
        let class = self.heap.constant(ConstantIndex::MethodClass)?;
        let address = self.heap.allocate(method::SIZE)?;
        let m = TaggedValue::object(address);
        self.heap.set_field(m, object::HCLASS_OFFSET, class)?;
        self.heap.set_field(m, method::CONSTANT_POOL_OFFSET, TaggedValue::UNDEFINED)?;
        self.heap.set_field(m, method::PROFILE_TYPE_INFO_OFFSET, TaggedValue::UNDEFINED)?;
        self.heap.write_u32(address + method::NATIVE_ID_OFFSET, native_id)?;
        self.heap.write_u32(address + method::BUILTIN_ID_OFFSET, builtin_id)?;
        self.heap
            .write_u16(address + method::HOTNESS_OFFSET, self.config.hotness_threshold as u16)?;
        self.heap.write_u16(address + method::NUM_ARGS_OFFSET, num_args)?;
        self.heap.write_u32(address + method::KIND_OFFSET, kind as u32)?;
        self.heap.write_u32(address + method::NUM_VREGS_OFFSET, 0)?;
        Ok(m)
    }

    /// Kind of a method.
    ///
    /// # Errors
    ///
    /// Fails if `m` is not mapped.
    pub fn method_kind(&self, m: TaggedValue) -> KilnResult<FunctionKind> {
        Ok(FunctionKind::from_u32(self.heap.read_u32(m.as_address() + method::KIND_OFFSET)?))
    }

    /// Hotness counter of a method.
    ///
    /// # Errors
    ///
    /// Fails if `m` is not mapped.
    pub fn method_hotness(&self, m: TaggedValue) -> KilnResult<i16> {
        Ok(self.heap.read_u16(m.as_address() + method::HOTNESS_OFFSET)? as i16)
    }

    /// Allocate a function object for `method`.
    ///
    /// Constructors receive a fresh prototype object whose `constructor`
    /// points back at the function.
    ///
    /// # Errors
    ///
    /// Fails if the heap is exhausted beyond its ceiling.
    pub fn new_function(
        &mut self,
        m: TaggedValue,
        kind: FunctionKind,
        env: TaggedValue,
    ) -> KilnResult<TaggedValue> {
        let class = match kind {
            FunctionKind::Normal => ConstantIndex::ConstructorClass,
            FunctionKind::BaseConstructor => ConstantIndex::ClassConstructorClass,
            FunctionKind::DerivedConstructor => ConstantIndex::DerivedConstructorClass,
            FunctionKind::BuiltinConstructor => ConstantIndex::BuiltinConstructorClass,
            FunctionKind::Arrow
            | FunctionKind::Method
            | FunctionKind::Generator
            | FunctionKind::AsyncGenerator => ConstantIndex::FunctionClass,
        };
        let func = self.new_object_of(class)?;
        self.heap.set_field(func, function::LEXICAL_ENV_OFFSET, env)?;
        self.heap.set_field(func, function::HOME_OBJECT_OFFSET, TaggedValue::UNDEFINED)?;
        self.heap.set_field(func, function::METHOD_OFFSET, m)?;
        self.heap.set_field(func, function::PROTO_OR_HCLASS_OFFSET, TaggedValue::HOLE)?;
        if self.is_constructor(func) {
            let proto = self.new_plain_object()?;
            let key = self.heap.constant(ConstantIndex::ConstructorString)?;
            self.define_own_named(proto, key, func)?;
            self.heap.set_field(func, function::PROTO_OR_HCLASS_OFFSET, proto)?;
        }
        Ok(func)
    }

    /// Method of a function object.
    ///
    /// # Errors
    ///
    /// Fails if `func` is not mapped.
    pub fn function_method(&self, func: TaggedValue) -> KilnResult<TaggedValue> {
        self.heap.field(func, function::METHOD_OFFSET)
    }

    /// The `prototype` of a constructor, resolving a cached instance class.
    ///
    /// # Errors
    ///
    /// Fails if `func` is not mapped.
    pub fn function_prototype(&self, func: TaggedValue) -> KilnResult<TaggedValue> {
        let proto_or_hclass = self.heap.field(func, function::PROTO_OR_HCLASS_OFFSET)?;
        if self.object_type(proto_or_hclass) == Some(JsType::HClass) {
            return self.heap.field(proto_or_hclass, hclass::PROTOTYPE_OFFSET);
        }
        Ok(proto_or_hclass)
    }

    /// Replace the `prototype` of a constructor.
    ///
    /// # Errors
    ///
    /// Fails if `func` is not mapped.
    pub fn set_function_prototype(&mut self, func: TaggedValue, proto: TaggedValue) -> KilnResult<()> {
        self.heap.set_field(func, function::PROTO_OR_HCLASS_OFFSET, proto)
    }

    /// Hidden class for instances created with `new_target`.
    ///
    /// The class is created on first use and cached in the constructor's
    /// `protoOrHClass` slot.
    ///
    /// # Errors
    ///
    /// Fails if the heap is exhausted beyond its ceiling.
    pub fn instance_hclass(&mut self, new_target: TaggedValue) -> KilnResult<TaggedValue> {
        let proto_or_hclass = self.heap.field(new_target, function::PROTO_OR_HCLASS_OFFSET)?;
        if self.object_type(proto_or_hclass) == Some(JsType::HClass) {
            return Ok(proto_or_hclass);
        }
        let proto = if proto_or_hclass.is_heap_object() {
            proto_or_hclass
        } else {
            self.global_env_field(GlobalEnvField::ObjectPrototype)?
        };
        let template = self.heap.constant(ConstantIndex::ObjectClass)?;
        let h = self.clone_hclass(template)?;
        self.heap.set_field(h, hclass::PROTOTYPE_OFFSET, proto)?;
        self.heap
            .set_field(new_target, function::PROTO_OR_HCLASS_OFFSET, h)?;
        Ok(h)
    }

    // =========================================================================
    // Named Properties
    // =========================================================================

    fn find_slot(&self, h: TaggedValue, key: TaggedValue) -> KilnResult<Option<u32>> {
        let layout = self.heap.field(h, hclass::LAYOUT_OFFSET)?;
        let count = self.hclass_num_props(h)?;
        for slot in 0..count {
            if self.array_get(layout, slot)? == key {
                return Ok(Some(slot));
            }
        }
        Ok(None)
    }

    fn slot_address(&mut self, obj: TaggedValue, h: TaggedValue, slot: u32, grow: bool) -> KilnResult<u64> {
        let inlined = self.hclass_inlined(h)?;
        if slot < inlined {
            let size = self.hclass_object_size(h)?;
            let base = size - u64::from(inlined) * TAGGED_SIZE;
            return Ok(obj.as_address() + base + u64::from(slot) * TAGGED_SIZE);
        }
        let index = slot - inlined;
        let mut props = self.heap.field(obj, object::PROPERTIES_OFFSET)?;
        if grow && index >= self.array_len(props)? {
            let new_len = (index + 1).max(self.array_len(props)? * 2).max(4);
            props = self.grow_tagged_array(props, new_len, TaggedValue::HOLE)?;
            self.heap.set_field(obj, object::PROPERTIES_OFFSET, props)?;
        }
        Ok(props.as_address() + tagged_array_element_offset(u64::from(index)))
    }

    /// Own named property, if present.
    ///
    /// Accessor pairs are returned as stored.
    ///
    /// # Errors
    ///
    /// Fails if `obj` is not mapped.
    pub fn get_own_named(&mut self, obj: TaggedValue, key: TaggedValue) -> KilnResult<Option<TaggedValue>> {
        let h = self.hclass_of(obj)?;
        let Some(slot) = self.find_slot(h, key)? else {
            return Ok(None);
        };
        let address = self.slot_address(obj, h, slot, false)?;
        let value = self.heap.read_tagged(address)?;
        Ok(if value.is_hole() { None } else { Some(value) })
    }

    /// Define or overwrite an own data property without invoking setters.
    ///
    /// # Errors
    ///
    /// Fails if the heap is exhausted beyond its ceiling.
    pub fn define_own_named(&mut self, obj: TaggedValue, key: TaggedValue, value: TaggedValue) -> KilnResult<()> {
        let h = self.hclass_of(obj)?;
        if let Some(slot) = self.find_slot(h, key)? {
            let address = self.slot_address(obj, h, slot, true)?;
            return self.heap.write_tagged(address, value);
        }
        let slot = self.hclass_num_props(h)?;
        let new_h = self.transition(h, key)?;
        self.heap.set_field(obj, object::HCLASS_OFFSET, new_h)?;
        let address = self.slot_address(obj, new_h, slot, true)?;
        self.heap.write_tagged(address, value)
    }

    fn transition(&mut self, h: TaggedValue, key: TaggedValue) -> KilnResult<TaggedValue> {
        if let Some(&cached) = self.transitions.get(&(h.raw(), key.raw())) {
            return Ok(cached);
        }
        let count = self.hclass_num_props(h)?;
        let layout = self.heap.field(h, hclass::LAYOUT_OFFSET)?;
        let new_layout = self.grow_tagged_array(layout, count + 1, TaggedValue::UNDEFINED)?;
        self.array_set(new_layout, count, key)?;
        let new_h = self.clone_hclass(h)?;
        self.heap.set_field(new_h, hclass::LAYOUT_OFFSET, new_layout)?;
        self.heap.write_u32(new_h.as_address() + hclass::NUM_PROPS_OFFSET, count + 1)?;
        self.transitions.insert((h.raw(), key.raw()), new_h);
        Ok(new_h)
    }

    /// Byte offset of an inline property slot for objects of class `h`.
    ///
    /// # Errors
    ///
    /// Fails if the key is absent or not stored inline.
    pub fn inline_property_offset(&self, h: TaggedValue, key: TaggedValue) -> KilnResult<Option<u64>> {
        let Some(slot) = self.find_slot(h, key)? else {
            return Ok(None);
        };
        let inlined = self.hclass_inlined(h)?;
        if slot >= inlined {
            return Ok(None);
        }
        let size = self.hclass_object_size(h)?;
        Ok(Some(size - u64::from(inlined - slot) * TAGGED_SIZE))
    }

    /// Named property lookup along the prototype chain.
    ///
    /// # Errors
    ///
    /// Fails if a hidden class in the chain is not mapped.
    pub fn get_named(&mut self, obj: TaggedValue, key: TaggedValue) -> KilnResult<TaggedValue> {
        let receiver = obj;
        let mut current = obj;
        while current.is_heap_object() {
            if let Some(value) = self.get_own_named(current, key)? {
                if self.object_type(value) == Some(JsType::AccessorData) {
                    let getter = self.heap.field(value, accessor_data::GETTER_OFFSET)?;
                    if getter.is_undefined() {
                        return Ok(TaggedValue::UNDEFINED);
                    }
                    return Ok(self.call(getter, receiver, &[]));
                }
                return Ok(value);
            }
            current = self.prototype_of(current)?;
        }
        Ok(TaggedValue::UNDEFINED)
    }

    /// Store a named property, honouring accessors found on the chain.
    ///
    /// # Errors
    ///
    /// Fails if the heap is exhausted beyond its ceiling.
    pub fn set_named(&mut self, obj: TaggedValue, key: TaggedValue, value: TaggedValue) -> KilnResult<TaggedValue> {
        let mut current = obj;
        while current.is_heap_object() {
            if let Some(existing) = self.get_own_named(current, key)? {
                if self.object_type(existing) == Some(JsType::AccessorData) {
                    let setter = self.heap.field(existing, accessor_data::SETTER_OFFSET)?;
                    if setter.is_undefined() {
                        return Ok(self.throw_type_error("cannot set property without setter"));
                    }
                    let result = self.call(setter, obj, &[value]);
                    return Ok(if result.is_exception() { result } else { TaggedValue::TRUE });
                }
                break;
            }
            current = self.prototype_of(current)?;
        }
        self.note_prototype_write(obj)?;
        self.define_own_named(obj, key, value)?;
        Ok(TaggedValue::TRUE)
    }

    /// Delete an own named property.
    ///
    /// # Errors
    ///
    /// Fails if `obj` is not mapped.
    pub fn delete_named(&mut self, obj: TaggedValue, key: TaggedValue) -> KilnResult<bool> {
        let h = self.hclass_of(obj)?;
        if let Some(slot) = self.find_slot(h, key)? {
            let address = self.slot_address(obj, h, slot, false)?;
            self.heap.write_tagged(address, TaggedValue::HOLE)?;
        }
        Ok(true)
    }

    // =========================================================================
    // Elements
    // =========================================================================

    /// Element `index` of an object, walking the prototype chain on holes.
    ///
    /// # Errors
    ///
    /// Fails if an object in the chain is not mapped.
    pub fn get_element(&mut self, obj: TaggedValue, index: u32) -> KilnResult<TaggedValue> {
        let mut current = obj;
        while current.is_heap_object() {
            if self.object_type(current) == Some(JsType::JsFloat32Array) {
                return self.float32_array_get(current, index);
            }
            let elements = self.heap.field(current, object::ELEMENTS_OFFSET)?;
            if index < self.array_len(elements)? {
                let value = self.array_get(elements, index)?;
                if !value.is_hole() {
                    return Ok(value);
                }
            }
            current = self.prototype_of(current)?;
        }
        Ok(TaggedValue::UNDEFINED)
    }

    /// Store element `index`, growing the backing store.
    ///
    /// # Errors
    ///
    /// Fails if the heap is exhausted beyond its ceiling.
    pub fn set_element(&mut self, obj: TaggedValue, index: u32, value: TaggedValue) -> KilnResult<TaggedValue> {
        if self.object_type(obj) == Some(JsType::JsFloat32Array) {
            let number = crate::operations::to_number(self, value)?;
            if number.is_exception() {
                return Ok(number);
            }
            self.float32_array_set(obj, index, number.as_number())?;
            return Ok(TaggedValue::TRUE);
        }
        self.note_prototype_write(obj)?;
        let mut elements = self.heap.field(obj, object::ELEMENTS_OFFSET)?;
        let cap = self.array_len(elements)?;
        if index >= cap {
            let new_cap = (index + 1).max(cap + cap / 2).max(4);
            elements = self.grow_tagged_array(elements, new_cap, TaggedValue::HOLE)?;
            self.heap.set_field(obj, object::ELEMENTS_OFFSET, elements)?;
        }
        self.array_set(elements, index, value)?;
        if self.is_js_array(obj) && index >= self.js_array_length(obj)? {
            self.heap.write_u32(obj.as_address() + array::LENGTH_OFFSET, index + 1)?;
        }
        Ok(TaggedValue::TRUE)
    }

    /// Delete element `index`.
    ///
    /// # Errors
    ///
    /// Fails if `obj` is not mapped.
    pub fn delete_element(&mut self, obj: TaggedValue, index: u32) -> KilnResult<bool> {
        let elements = self.heap.field(obj, object::ELEMENTS_OFFSET)?;
        if index < self.array_len(elements)? {
            self.array_set(elements, index, TaggedValue::HOLE)?;
        }
        Ok(true)
    }

    // =========================================================================
    // Float32 Arrays
    // =========================================================================

    /// Allocate a `Float32Array` of `len` zeroed elements.
    ///
    /// # Errors
    ///
    /// Fails if the heap is exhausted beyond its ceiling.
    pub fn new_float32_array(&mut self, len: u32) -> KilnResult<TaggedValue> {
        let byte_class = self.heap.constant(ConstantIndex::ByteArrayClass)?;
        let bytes = u64::from(len) * 4;
        let buffer_address = self.heap.allocate(byte_array::DATA_OFFSET + bytes)?;
        let buffer = TaggedValue::object(buffer_address);
        self.heap.set_field(buffer, object::HCLASS_OFFSET, byte_class)?;
        self.heap.write_u32(buffer_address + byte_array::LENGTH_OFFSET, len)?;
        self.heap.write_u32(buffer_address + byte_array::ELEMENT_SIZE_OFFSET, 4)?;

        let arr = self.new_object_of(ConstantIndex::Float32ArrayClass)?;
        self.heap.set_field(arr, typed_array::VIEWED_ARRAY_BUFFER_OFFSET, buffer)?;
        self.heap.write_u32(arr.as_address() + typed_array::BYTE_LENGTH_OFFSET, bytes as u32)?;
        self.heap.write_u32(arr.as_address() + typed_array::BYTE_OFFSET_OFFSET, 0)?;
        self.heap.write_u64(arr.as_address() + typed_array::ARRAY_LENGTH_OFFSET, u64::from(len))?;
        Ok(arr)
    }

    /// Element count of a typed array.
    ///
    /// # Errors
    ///
    /// Fails if `arr` is not mapped.
    pub fn typed_array_length(&self, arr: TaggedValue) -> KilnResult<u32> {
        self.heap.read_u32(arr.as_address() + typed_array::ARRAY_LENGTH_OFFSET)
    }

    fn float32_address(&self, arr: TaggedValue, index: u32) -> KilnResult<Option<u64>> {
        if index >= self.typed_array_length(arr)? {
            return Ok(None);
        }
        let buffer = self.heap.field(arr, typed_array::VIEWED_ARRAY_BUFFER_OFFSET)?;
        let offset = u64::from(self.heap.read_u32(arr.as_address() + typed_array::BYTE_OFFSET_OFFSET)?);
        Ok(Some(buffer.as_address() + byte_array::DATA_OFFSET + offset + u64::from(index) * 4))
    }

    /// Read a `Float32Array` element as a number.
    ///
    /// # Errors
    ///
    /// Fails if `arr` is not mapped.
    pub fn float32_array_get(&self, arr: TaggedValue, index: u32) -> KilnResult<TaggedValue> {
        match self.float32_address(arr, index)? {
            Some(address) => {
                let bits = self.heap.read_u32(address)?;
                Ok(TaggedValue::number(f64::from(f32::from_bits(bits))))
            }
            None => Ok(TaggedValue::UNDEFINED),
        }
    }

    /// Store a `Float32Array` element; out-of-range stores are ignored.
    ///
    /// # Errors
    ///
    /// Fails if `arr` is not mapped.
    pub fn float32_array_set(&mut self, arr: TaggedValue, index: u32, value: f64) -> KilnResult<()> {
        if let Some(address) = self.float32_address(arr, index)? {
            #[allow(clippy::cast_possible_truncation)]
            self.heap.write_u32(address, (value as f32).to_bits())?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_properties_and_transitions() {
        let mut thread = JsThread::new().unwrap();
        let a = thread.new_plain_object().unwrap();
        let b = thread.new_plain_object().unwrap();
        let x = thread.intern("x").unwrap();
        let y = thread.intern("y").unwrap();

        thread.define_own_named(a, x, TaggedValue::int(1)).unwrap();
        thread.define_own_named(a, y, TaggedValue::int(2)).unwrap();
        thread.define_own_named(b, x, TaggedValue::int(3)).unwrap();
        thread.define_own_named(b, y, TaggedValue::int(4)).unwrap();

        assert_eq!(thread.hclass_of(a).unwrap(), thread.hclass_of(b).unwrap());
        assert_eq!(thread.get_named(a, y).unwrap(), TaggedValue::int(2));
        assert_eq!(thread.get_named(b, x).unwrap(), TaggedValue::int(3));
    }

    #[test]
    fn test_properties_spill_out_of_line() {
        let mut thread = JsThread::new().unwrap();
        let obj = thread.new_plain_object().unwrap();
        let keys: Vec<_> = (0..10).map(|i| thread.intern(&format!("k{i}")).unwrap()).collect();
        for (i, key) in keys.iter().enumerate() {
            thread.define_own_named(obj, *key, TaggedValue::int(i as i32)).unwrap();
        }
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(thread.get_named(obj, *key).unwrap(), TaggedValue::int(i as i32));
        }
        let h = thread.hclass_of(obj).unwrap();
        assert!(thread.inline_property_offset(h, keys[0]).unwrap().is_some());
        assert!(thread.inline_property_offset(h, keys[9]).unwrap().is_none());
    }

    #[test]
    fn test_prototype_lookup() {
        let mut thread = JsThread::new().unwrap();
        let proto = thread.new_plain_object().unwrap();
        let obj = thread.new_plain_object().unwrap();
        let key = thread.intern("inherited").unwrap();
        thread.define_own_named(proto, key, TaggedValue::TRUE).unwrap();
        thread.set_prototype(obj, proto).unwrap();
        assert_eq!(thread.get_named(obj, key).unwrap(), TaggedValue::TRUE);
    }

    #[test]
    fn test_array_elements_grow_length() {
        let mut thread = JsThread::new().unwrap();
        let arr = thread.new_js_array(&[TaggedValue::int(1)]).unwrap();
        thread.set_element(arr, 5, TaggedValue::int(6)).unwrap();
        assert_eq!(thread.js_array_length(arr).unwrap(), 6);
        assert_eq!(thread.get_element(arr, 3).unwrap(), TaggedValue::UNDEFINED);
        assert_eq!(thread.get_element(arr, 5).unwrap(), TaggedValue::int(6));
        thread.set_js_array_length(arr, 1).unwrap();
        assert_eq!(thread.get_element(arr, 5).unwrap(), TaggedValue::UNDEFINED);
    }

    #[test]
    fn test_array_prototype_write_clears_guardian() {
        let mut thread = JsThread::new().unwrap();
        assert!(thread.stable_array_guardian().unwrap());
        let proto = thread.global_env_field(GlobalEnvField::ArrayPrototype).unwrap();
        thread.set_element(proto, 0, TaggedValue::int(1)).unwrap();
        assert!(!thread.stable_array_guardian().unwrap());
    }

    #[test]
    fn test_float32_array() {
        let mut thread = JsThread::new().unwrap();
        let arr = thread.new_float32_array(3).unwrap();
        thread.set_element(arr, 1, TaggedValue::double(1.5)).unwrap();
        assert_eq!(thread.get_element(arr, 1).unwrap(), TaggedValue::double(1.5));
        assert_eq!(thread.get_element(arr, 0).unwrap(), TaggedValue::int(0));
        assert_eq!(thread.get_element(arr, 9).unwrap(), TaggedValue::UNDEFINED);
    }

    #[test]
    fn test_instance_hclass_is_cached() {
        let mut thread = JsThread::new().unwrap();
        let m = thread
            .new_method(method::NO_NATIVE, method::NO_BUILTIN, FunctionKind::BaseConstructor, 0)
            .unwrap();
        let ctor = thread.new_function(m, FunctionKind::BaseConstructor, TaggedValue::UNDEFINED).unwrap();
        let proto = thread.function_prototype(ctor).unwrap();
        let h1 = thread.instance_hclass(ctor).unwrap();
        let h2 = thread.instance_hclass(ctor).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(thread.function_prototype(ctor).unwrap(), proto);
        let obj = thread.allocate_this(ctor, ctor).unwrap();
        assert_eq!(thread.prototype_of(obj).unwrap(), proto);
    }
}
