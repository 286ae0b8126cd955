//! Builtin objects and the native slow paths of builtin stubs.
//!
//! [`initialize`] bootstraps the hidden classes, global constants, prototypes
//! and the global object of a fresh thread. Natives that back a builtin stub
//! are registered first, in [`BuiltinId`] order, so the native index of a
//! builtin equals its id.

use std::rc::Rc;

use kiln_core::value::TaggedValue;
use kiln_core::KilnResult;

use crate::containers::{ContainerKind, ContainersType};
use crate::date;
use crate::heap::{glue, ConstantIndex, GlobalEnvField};
use crate::layout::{
    accessor_data, arguments, array, date as date_layout, function, generator_context, generator_object,
    hclass, linked_node, method, object, primitive_ref, proxy, rb_tree_node, typed_array, FunctionKind,
    GeneratorState, HClassFlags, JsType, ResumeMode, async_generator_object,
};
use crate::object::DEFAULT_INLINED_PROPS;
use crate::operations::{self, to_f64, try_value};
use crate::thread::{CallInfo, JsThread, NativeFn};

// =============================================================================
// Builtin Ids
// =============================================================================

macro_rules! builtin_ids {
    (
        stubs { $($stub:ident => $stub_name:literal,)* }
        typed { $($typed:ident => $typed_name:literal,)* }
    ) => {
        /// Builtins with a dedicated compiled implementation.
        ///
        /// The first [`BuiltinId::NUM_OF_BUILTINS_STUBS`] ids have stub
        /// circuits; the rest are recognized and inlined by builtin lowering.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u32)]
        pub enum BuiltinId {
            $(
                #[allow(missing_docs)]
                $stub,
            )*
            $(
                #[allow(missing_docs)]
                $typed,
            )*
        }

        impl BuiltinId {
            /// Every id, in numeric order.
            pub const ALL: &'static [BuiltinId] = &[$(BuiltinId::$stub,)* $(BuiltinId::$typed,)*];

            /// Number of ids with stub circuits.
            pub const NUM_OF_BUILTINS_STUBS: u32 = [$(BuiltinId::$stub),*].len() as u32;

            /// Stub name.
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $(BuiltinId::$stub => $stub_name,)*
                    $(BuiltinId::$typed => $typed_name,)*
                }
            }
        }
    };
}

builtin_ids! {
    stubs {
        CharCodeAt => "CharCodeAt",
        IndexOf => "IndexOf",
        Substring => "Substring",
        CharAt => "CharAt",
        VectorForEach => "VectorForEach",
        VectorReplaceAllElements => "VectorReplaceAllElements",
        StackForEach => "StackForEach",
        PlainArrayForEach => "PlainArrayForEach",
        QueueForEach => "QueueForEach",
        DequeForEach => "DequeForEach",
        LightWeightMapForEach => "LightWeightMapForEach",
        LightWeightSetForEach => "LightWeightSetForEach",
        HashMapForEach => "HashMapForEach",
        HashSetForEach => "HashSetForEach",
        LinkedListForEach => "LinkedListForEach",
        ListForEach => "ListForEach",
        ArrayListForEach => "ArrayListForEach",
        ArrayListReplaceAllElements => "ArrayListReplaceAllElements",
        BooleanConstructor => "BooleanConstructor",
        DateConstructor => "DateConstructor",
        ArrayConstructor => "ArrayConstructor",
        StringConstructor => "StringConstructor",
    }
    typed {
        Sqrt => "SQRT",
        Cos => "COS",
        Sin => "SIN",
        ACos => "ACOS",
        ATan => "ATAN",
        Abs => "ABS",
        Floor => "FLOOR",
    }
}

impl BuiltinId {
    /// Id from its numeric value.
    #[must_use]
    pub fn from_u32(raw: u32) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    /// Whether the id has a stub circuit.
    #[must_use]
    pub const fn is_stub(self) -> bool {
        (self as u32) < Self::NUM_OF_BUILTINS_STUBS
    }

    /// Whether builtin lowering inlines calls to this id.
    #[must_use]
    pub const fn is_typed_builtin(self) -> bool {
        !self.is_stub()
    }

    /// The container iteration this id implements.
    #[must_use]
    pub fn containers_type(self) -> Option<ContainersType> {
        let first = BuiltinId::VectorForEach as u32;
        let raw = (self as u32).checked_sub(first)?;
        ContainersType::from_u32(raw)
    }

    /// Builtin id of a container iteration.
    #[must_use]
    pub fn from_containers_type(ty: ContainersType) -> Self {
        Self::ALL[BuiltinId::VectorForEach as usize + ty as usize]
    }

    /// Number of declared arguments of the builtin's native.
    #[must_use]
    pub const fn num_args(self) -> u16 {
        match self {
            BuiltinId::Substring => 2,
            BuiltinId::DateConstructor => 7,
            _ => 1,
        }
    }
}

// =============================================================================
// Native Helpers
// =============================================================================

type Body = fn(&mut JsThread, &CallInfo) -> KilnResult<TaggedValue>;

fn native(body: Body) -> NativeFn {
    Rc::new(move |thread: &mut JsThread, info: &CallInfo| match body(thread, info) {
        Ok(value) => value,
        Err(e) => thread.fault(&e),
    })
}

fn define_function(
    thread: &mut JsThread,
    holder: TaggedValue,
    name: &'static str,
    func: TaggedValue,
) -> KilnResult<()> {
    let key = thread.intern(name)?;
    let name_key = thread.constant(ConstantIndex::NameString)?;
    let name_value = thread.intern(name)?;
    thread.define_own_named(func, name_key, name_value)?;
    thread.define_own_named(holder, key, func)
}

/// Install a method on `holder` whose native is registered on the spot.
fn install_method(
    thread: &mut JsThread,
    holder: TaggedValue,
    name: &'static str,
    num_args: u16,
    func: NativeFn,
) -> KilnResult<TaggedValue> {
    let native_id = thread.register_native(name, func);
    let m = thread.new_method(native_id, method::NO_BUILTIN, FunctionKind::Method, num_args)?;
    let f = thread.new_function(m, FunctionKind::Method, TaggedValue::UNDEFINED)?;
    define_function(thread, holder, name, f)?;
    Ok(f)
}

/// Install a function whose native is the builtin `id`.
fn install_builtin(
    thread: &mut JsThread,
    holder: TaggedValue,
    name: &'static str,
    id: BuiltinId,
    kind: FunctionKind,
) -> KilnResult<TaggedValue> {
    let m = thread.new_method(id as u32, id as u32, kind, id.num_args())?;
    let f = thread.new_function(m, kind, TaggedValue::UNDEFINED)?;
    define_function(thread, holder, name, f)?;
    Ok(f)
}

fn link_constructor(thread: &mut JsThread, ctor: TaggedValue, proto: TaggedValue) -> KilnResult<()> {
    thread.set_function_prototype(ctor, proto)?;
    let key = thread.constant(ConstantIndex::ConstructorString)?;
    thread.define_own_named(proto, key, ctor)
}

/// Native body of a builtin.
fn builtin_body(id: BuiltinId) -> NativeFn {
    if let Some(ty) = id.containers_type() {
        return Rc::new(move |thread: &mut JsThread, info: &CallInfo| {
            let this_arg = if info.argc() > 1 { info.arg(1) } else { TaggedValue::UNDEFINED };
            thread.container_for_each(ty, info.this, info.arg(0), this_arg)
        });
    }
    match id {
        BuiltinId::CharCodeAt => native(string_char_code_at),
        BuiltinId::IndexOf => native(string_index_of),
        BuiltinId::Substring => native(string_substring),
        BuiltinId::CharAt => native(string_char_at),
        BuiltinId::BooleanConstructor => native(boolean_constructor),
        BuiltinId::DateConstructor => native(date_constructor),
        BuiltinId::ArrayConstructor => native(array_constructor),
        BuiltinId::StringConstructor => native(string_constructor),
        BuiltinId::Sqrt => math_unary(f64::sqrt),
        BuiltinId::Cos => math_unary(f64::cos),
        BuiltinId::Sin => math_unary(f64::sin),
        BuiltinId::ACos => math_unary(f64::acos),
        BuiltinId::ATan => math_unary(f64::atan),
        BuiltinId::Abs => math_unary(f64::abs),
        BuiltinId::Floor => math_unary(f64::floor),
        _ => unreachable!("container builtins are handled above"),
    }
}

// =============================================================================
// Bootstrap
// =============================================================================

/// Install every builtin on a fresh thread.
///
/// # Errors
///
/// Fails only if the heap cannot hold the builtin objects.
pub fn initialize(thread: &mut JsThread) -> KilnResult<()> {
    for &id in BuiltinId::ALL {
        let index = thread.register_native(id.name(), builtin_body(id));
        debug_assert_eq!(index, id as u32);
    }

    bootstrap_roots(thread)?;
    bootstrap_internal_classes(thread)?;
    for (index, text) in [
        (ConstantIndex::LengthString, "length"),
        (ConstantIndex::PrototypeString, "prototype"),
        (ConstantIndex::MessageString, "message"),
        (ConstantIndex::ConstructorString, "constructor"),
        (ConstantIndex::NameString, "name"),
        (ConstantIndex::UndefinedString, "undefined"),
        (ConstantIndex::BooleanString, "boolean"),
        (ConstantIndex::NumberString, "number"),
        (ConstantIndex::StringString, "string"),
        (ConstantIndex::FunctionString, "function"),
        (ConstantIndex::ObjectString, "object"),
    ] {
        let s = thread.intern(text)?;
        thread.heap.set_constant(index, s)?;
    }

    let protos = bootstrap_object_classes(thread)?;
    let globals = install_globals(thread, &protos)?;
    install_string_methods(thread, protos.string)?;
    install_math(thread, protos.math)?;
    install_prototype_methods(thread, &protos)?;
    install_containers(thread, globals.global_object)?;

    let env = thread.new_tagged_array(GlobalEnvField::COUNT, TaggedValue::UNDEFINED)?;
    for (field, value) in [
        (GlobalEnvField::ObjectPrototype, protos.object),
        (GlobalEnvField::FunctionPrototype, protos.function),
        (GlobalEnvField::ArrayPrototype, protos.array),
        (GlobalEnvField::StringPrototype, protos.string),
        (GlobalEnvField::ErrorPrototype, protos.error),
        (GlobalEnvField::GeneratorPrototype, protos.generator),
        (GlobalEnvField::AsyncGeneratorPrototype, protos.async_generator),
        (GlobalEnvField::BooleanPrototype, protos.boolean),
        (GlobalEnvField::DatePrototype, protos.date),
        (GlobalEnvField::Float32ArrayPrototype, protos.float32_array),
        (GlobalEnvField::MathObject, protos.math),
        (GlobalEnvField::BooleanFunction, globals.boolean),
        (GlobalEnvField::DateFunction, globals.date),
        (GlobalEnvField::ArrayFunction, globals.array),
        (GlobalEnvField::ObjectFunction, globals.object),
    ] {
        thread.array_set(env, field as u32, value)?;
    }
    thread.heap.set_glue_field(glue::GLOBAL_ENV_OFFSET, env)?;
    thread.heap.set_glue_field(glue::GLOBAL_OBJECT_OFFSET, globals.global_object)?;
    // Builtin setup writes to prototypes freely; the guardian is armed afterwards.
    thread.heap.write_u64(thread.glue() + glue::STABLE_ARRAY_GUARDIAN_OFFSET, 1)?;

    tracing::debug!(
        natives = thread.natives.len(),
        bytes = thread.heap.stats().allocated_bytes,
        "builtins initialized"
    );
    Ok(())
}

/// The meta class, tagged arrays, strings and their empty singletons.
fn bootstrap_roots(thread: &mut JsThread) -> KilnResult<()> {
    let address = thread.heap.allocate(hclass::SIZE)?;
    let meta = TaggedValue::object(address);
    thread.heap.set_field(meta, object::HCLASS_OFFSET, meta)?;
    thread.heap.write_u32(address + hclass::OBJECT_TYPE_OFFSET, u32::from(JsType::HClass as u8))?;
    thread.heap.write_u32(address + hclass::OBJECT_SIZE_OFFSET, hclass::SIZE as u32)?;
    thread.heap.set_field(meta, hclass::PROTOTYPE_OFFSET, TaggedValue::NULL)?;
    thread.heap.set_constant(ConstantIndex::HClassClass, meta)?;

    let array_class = thread.new_hclass(JsType::TaggedArray, HClassFlags::empty(), 0, 0, TaggedValue::NULL)?;
    thread.heap.set_constant(ConstantIndex::TaggedArrayClass, array_class)?;
    let empty_array = thread.new_tagged_array(0, TaggedValue::HOLE)?;
    thread.heap.set_constant(ConstantIndex::EmptyArray, empty_array)?;
    for h in [meta, array_class] {
        thread.heap.set_field(h, hclass::LAYOUT_OFFSET, empty_array)?;
    }

    let string_class = thread.new_hclass(JsType::String, HClassFlags::empty(), 0, 0, TaggedValue::NULL)?;
    thread.heap.set_constant(ConstantIndex::StringClass, string_class)?;
    let empty_string = thread.new_string_from_utf16(&[])?;
    thread.heap.set_constant(ConstantIndex::EmptyString, empty_string)
}

fn bootstrap_internal_classes(thread: &mut JsThread) -> KilnResult<()> {
    for (index, ty, size) in [
        (ConstantIndex::LexicalEnvClass, JsType::LexicalEnv, 0),
        (ConstantIndex::MethodClass, JsType::Method, method::SIZE),
        (ConstantIndex::ByteArrayClass, JsType::ByteArray, 0),
        (ConstantIndex::LinkedNodeClass, JsType::LinkedNode, linked_node::SIZE),
        (ConstantIndex::RbTreeNodeClass, JsType::RbTreeNode, rb_tree_node::SIZE),
        (ConstantIndex::GeneratorContextClass, JsType::GeneratorContext, generator_context::SIZE),
        (ConstantIndex::AccessorDataClass, JsType::AccessorData, accessor_data::SIZE),
    ] {
        let h = thread.new_hclass(ty, HClassFlags::empty(), size, 0, TaggedValue::NULL)?;
        thread.heap.set_constant(index, h)?;
    }
    Ok(())
}

struct Prototypes {
    object: TaggedValue,
    function: TaggedValue,
    array: TaggedValue,
    string: TaggedValue,
    error: TaggedValue,
    generator: TaggedValue,
    async_generator: TaggedValue,
    boolean: TaggedValue,
    date: TaggedValue,
    float32_array: TaggedValue,
    math: TaggedValue,
}

const PLAIN_OBJECT_SIZE: u64 = object::SIZE + DEFAULT_INLINED_PROPS as u64 * 8;

fn new_prototype(thread: &mut JsThread, parent: TaggedValue) -> KilnResult<TaggedValue> {
    let h = thread.new_hclass(
        JsType::JsObject,
        HClassFlags::EXTENSIBLE | HClassFlags::PROTOTYPE,
        PLAIN_OBJECT_SIZE,
        DEFAULT_INLINED_PROPS,
        parent,
    )?;
    thread.new_object_with_hclass(h)
}

fn bootstrap_object_classes(thread: &mut JsThread) -> KilnResult<Prototypes> {
    let object_proto = new_prototype(thread, TaggedValue::NULL)?;
    let mut proto = || new_prototype(thread, object_proto);
    let protos = Prototypes {
        object: object_proto,
        function: proto()?,
        array: proto()?,
        string: proto()?,
        error: proto()?,
        generator: proto()?,
        async_generator: proto()?,
        boolean: proto()?,
        date: proto()?,
        float32_array: proto()?,
        math: proto()?,
    };

    let ext = HClassFlags::EXTENSIBLE;
    let callable = ext | HClassFlags::CALLABLE;
    let base_ctor = callable | HClassFlags::CONSTRUCTOR | HClassFlags::BASE;
    let inlined = DEFAULT_INLINED_PROPS;
    for (index, ty, flags, size, inline, proto) in [
        (ConstantIndex::ObjectClass, JsType::JsObject, ext, PLAIN_OBJECT_SIZE, inlined, protos.object),
        (ConstantIndex::ArrayClass, JsType::JsArray, ext | HClassFlags::STABLE_ELEMENTS, array::SIZE, 0, protos.array),
        (ConstantIndex::FunctionClass, JsType::JsFunction, callable, function::SIZE, 0, protos.function),
        (ConstantIndex::ConstructorClass, JsType::JsFunction, base_ctor, function::SIZE, 0, protos.function),
        (ConstantIndex::BuiltinConstructorClass, JsType::JsFunction, base_ctor, function::SIZE, 0, protos.function),
        (
            ConstantIndex::ClassConstructorClass,
            JsType::JsFunction,
            base_ctor | HClassFlags::CLASS_CONSTRUCTOR,
            function::SIZE,
            0,
            protos.function,
        ),
        (
            ConstantIndex::DerivedConstructorClass,
            JsType::JsFunction,
            callable | HClassFlags::CONSTRUCTOR | HClassFlags::CLASS_CONSTRUCTOR,
            function::SIZE,
            0,
            protos.function,
        ),
        (ConstantIndex::ArgumentsClass, JsType::JsArguments, ext, arguments::SIZE, 0, protos.object),
        (ConstantIndex::ErrorClass, JsType::JsError, ext, PLAIN_OBJECT_SIZE, inlined, protos.error),
        (ConstantIndex::PrimitiveRefClass, JsType::JsPrimitiveRef, ext, primitive_ref::SIZE, 0, protos.boolean),
        (ConstantIndex::StringObjectClass, JsType::JsPrimitiveRef, ext, primitive_ref::STRING_SIZE, 0, protos.string),
        (ConstantIndex::DateClass, JsType::JsDate, ext, date_layout::SIZE, 0, protos.date),
        (ConstantIndex::Float32ArrayClass, JsType::JsFloat32Array, ext, typed_array::SIZE, 0, protos.float32_array),
        (
            ConstantIndex::GeneratorObjectClass,
            JsType::JsGeneratorObject,
            ext,
            generator_object::SIZE,
            0,
            protos.generator,
        ),
        (
            ConstantIndex::AsyncGeneratorObjectClass,
            JsType::JsAsyncGeneratorObject,
            ext,
            async_generator_object::SIZE,
            0,
            protos.async_generator,
        ),
        (ConstantIndex::ProxyClass, JsType::JsProxy, HClassFlags::empty(), proxy::SIZE, 0, TaggedValue::NULL),
    ] {
        let h = thread.new_hclass(ty, flags, size, inline, proto)?;
        thread.heap.set_constant(index, h)?;
    }

    for kind in ContainerKind::ALL {
        let proto = new_prototype(thread, protos.object)?;
        let h = thread.new_hclass(kind.js_type(), ext, kind.object_size(), 0, proto)?;
        thread.heap.set_constant(kind.class(), h)?;
    }
    Ok(protos)
}

struct Globals {
    global_object: TaggedValue,
    object: TaggedValue,
    boolean: TaggedValue,
    date: TaggedValue,
    array: TaggedValue,
}

fn install_globals(thread: &mut JsThread, protos: &Prototypes) -> KilnResult<Globals> {
    let h = thread.new_hclass(
        JsType::JsGlobalObject,
        HClassFlags::EXTENSIBLE,
        PLAIN_OBJECT_SIZE,
        DEFAULT_INLINED_PROPS,
        protos.object,
    )?;
    let global = thread.new_object_with_hclass(h)?;

    let boolean = install_builtin(thread, global, "Boolean", BuiltinId::BooleanConstructor, FunctionKind::BuiltinConstructor)?;
    link_constructor(thread, boolean, protos.boolean)?;
    let date = install_builtin(thread, global, "Date", BuiltinId::DateConstructor, FunctionKind::BuiltinConstructor)?;
    link_constructor(thread, date, protos.date)?;
    let array = install_builtin(thread, global, "Array", BuiltinId::ArrayConstructor, FunctionKind::BuiltinConstructor)?;
    link_constructor(thread, array, protos.array)?;
    let string = install_builtin(thread, global, "String", BuiltinId::StringConstructor, FunctionKind::BuiltinConstructor)?;
    link_constructor(thread, string, protos.string)?;

    let object = install_constructor(thread, global, "Object", 1, native(object_constructor))?;
    link_constructor(thread, object, protos.object)?;
    let error = install_constructor(thread, global, "Error", 1, native(error_constructor))?;
    link_constructor(thread, error, protos.error)?;

    let key = thread.intern("Math")?;
    thread.define_own_named(global, key, protos.math)?;
    for (name, value) in [
        ("undefined", TaggedValue::UNDEFINED),
        ("NaN", TaggedValue::double(f64::NAN)),
        ("Infinity", TaggedValue::double(f64::INFINITY)),
        ("globalThis", global),
    ] {
        let key = thread.intern(name)?;
        thread.define_own_named(global, key, value)?;
    }
    Ok(Globals { global_object: global, object, boolean, date, array })
}

fn install_constructor(
    thread: &mut JsThread,
    holder: TaggedValue,
    name: &'static str,
    num_args: u16,
    func: NativeFn,
) -> KilnResult<TaggedValue> {
    let native_id = thread.register_native(name, func);
    let m = thread.new_method(native_id, method::NO_BUILTIN, FunctionKind::BuiltinConstructor, num_args)?;
    let f = thread.new_function(m, FunctionKind::BuiltinConstructor, TaggedValue::UNDEFINED)?;
    define_function(thread, holder, name, f)?;
    Ok(f)
}

fn install_string_methods(thread: &mut JsThread, proto: TaggedValue) -> KilnResult<()> {
    for (name, id) in [
        ("charCodeAt", BuiltinId::CharCodeAt),
        ("indexOf", BuiltinId::IndexOf),
        ("substring", BuiltinId::Substring),
        ("charAt", BuiltinId::CharAt),
    ] {
        install_builtin(thread, proto, name, id, FunctionKind::Method)?;
    }
    Ok(())
}

fn install_math(thread: &mut JsThread, math: TaggedValue) -> KilnResult<()> {
    for (name, id) in [
        ("sqrt", BuiltinId::Sqrt),
        ("cos", BuiltinId::Cos),
        ("sin", BuiltinId::Sin),
        ("acos", BuiltinId::ACos),
        ("atan", BuiltinId::ATan),
        ("abs", BuiltinId::Abs),
        ("floor", BuiltinId::Floor),
    ] {
        install_builtin(thread, math, name, id, FunctionKind::Method)?;
    }
    install_method(thread, math, "ceil", 1, math_unary(f64::ceil))?;
    install_method(thread, math, "max", 2, native(math_max))?;
    install_method(thread, math, "min", 2, native(math_min))?;
    install_method(thread, math, "pow", 2, native(math_pow))?;
    for (name, value) in [("PI", std::f64::consts::PI), ("E", std::f64::consts::E)] {
        let key = thread.intern(name)?;
        thread.define_own_named(math, key, TaggedValue::double(value))?;
    }
    Ok(())
}

fn install_prototype_methods(thread: &mut JsThread, protos: &Prototypes) -> KilnResult<()> {
    install_method(thread, protos.boolean, "valueOf", 0, native(boolean_value_of))?;
    install_method(thread, protos.date, "getTime", 0, native(date_get_time))?;
    install_method(thread, protos.date, "valueOf", 0, native(date_get_time))?;
    install_method(thread, protos.date, "toISOString", 0, native(date_to_iso_string))?;
    install_method(thread, protos.generator, "next", 1, native(generator_next))?;
    install_method(thread, protos.async_generator, "next", 1, native(generator_next))?;
    Ok(())
}

fn install_containers(thread: &mut JsThread, global: TaggedValue) -> KilnResult<()> {
    for kind in ContainerKind::ALL {
        let ctor = install_constructor(
            thread,
            global,
            kind.name(),
            0,
            Rc::new(move |thread: &mut JsThread, info: &CallInfo| {
                if info.new_target.is_undefined() {
                    return thread.throw_type_error("container constructor requires 'new'");
                }
                thread.new_container(kind).unwrap_or_else(|e| thread.fault(&e))
            }),
        )?;
        let h = thread.constant(kind.class())?;
        let proto = thread.heap.field(h, hclass::PROTOTYPE_OFFSET)?;
        link_constructor(thread, ctor, proto)?;

        for ty in ContainersType::ALL.into_iter().filter(|ty| ty.kind() == kind) {
            let id = BuiltinId::from_containers_type(ty);
            install_builtin(thread, proto, ty.method_name(), id, FunctionKind::Method)?;
        }
        for (name, num_args, body) in container_methods(kind) {
            install_method(thread, proto, name, num_args, body)?;
        }
    }
    Ok(())
}

fn container_receiver(thread: &mut JsThread, info: &CallInfo, kind: ContainerKind) -> Option<TaggedValue> {
    if thread.container_kind(info.this) == Some(kind) {
        Some(info.this)
    } else {
        thread.throw_type_error("incompatible receiver for container method");
        None
    }
}

fn container_method(
    kind: ContainerKind,
    body: fn(&mut JsThread, TaggedValue, ContainerKind, &CallInfo) -> KilnResult<TaggedValue>,
) -> NativeFn {
    Rc::new(move |thread: &mut JsThread, info: &CallInfo| {
        let Some(obj) = container_receiver(thread, info, kind) else {
            return TaggedValue::EXCEPTION;
        };
        body(thread, obj, kind, info).unwrap_or_else(|e| thread.fault(&e))
    })
}

fn container_methods(kind: ContainerKind) -> Vec<(&'static str, u16, NativeFn)> {
    let add = container_method(kind, |t, obj, kind, info| {
        t.container_add(obj, kind, info.arg(0))?;
        Ok(TaggedValue::TRUE)
    });
    let put = container_method(kind, |t, obj, kind, info| {
        t.container_put(obj, kind, info.arg(0), info.arg(1))?;
        Ok(TaggedValue::UNDEFINED)
    });
    let get_by_key = container_method(kind, |t, obj, kind, info| {
        Ok(t.container_lookup(obj, kind, info.arg(0))?.unwrap_or(TaggedValue::UNDEFINED))
    });
    let get_by_index = container_method(kind, |t, obj, kind, info| {
        let Some(index) = to_f64(t, info.arg(0))? else {
            return Ok(TaggedValue::EXCEPTION);
        };
        if index < 0.0 || index >= f64::from(t.container_size(obj, kind)?) {
            return Ok(t.throw_range_error("container index out of range"));
        }
        t.container_get(obj, kind, index as u32)
    });
    match kind {
        ContainerKind::ArrayList | ContainerKind::Vector => vec![
            ("add", 1, add),
            ("get", 1, get_by_index),
            (
                "removeByIndex",
                1,
                container_method(kind, |t, obj, kind, info| {
                    let Some(index) = to_f64(t, info.arg(0))? else {
                        return Ok(TaggedValue::EXCEPTION);
                    };
                    if index < 0.0 || index >= f64::from(t.container_size(obj, kind)?) {
                        return Ok(t.throw_range_error("container index out of range"));
                    }
                    t.container_remove_at(obj, kind, index as u32)
                }),
            ),
        ],
        ContainerKind::Stack => vec![
            ("push", 1, add),
            ("pop", 0, container_method(kind, |t, obj, _, _| t.stack_pop(obj))),
        ],
        ContainerKind::Deque => vec![
            ("insertEnd", 1, add),
            (
                "insertFront",
                1,
                container_method(kind, |t, obj, _, info| {
                    t.deque_insert_front(obj, info.arg(0))?;
                    Ok(TaggedValue::UNDEFINED)
                }),
            ),
        ],
        ContainerKind::LightWeightMap | ContainerKind::HashMap => {
            vec![("set", 2, put), ("get", 1, get_by_key)]
        }
        ContainerKind::PlainArray => vec![("add", 2, put), ("get", 1, get_by_key)],
        ContainerKind::Queue
        | ContainerKind::LightWeightSet
        | ContainerKind::HashSet
        | ContainerKind::LinkedList
        | ContainerKind::List => vec![("add", 1, add)],
    }
}

// =============================================================================
// String.prototype
// =============================================================================

fn this_string(thread: &mut JsThread, info: &CallInfo) -> KilnResult<TaggedValue> {
    let this = try_value!(operations::require_object_coercible(thread, info.this));
    operations::to_string(thread, this)
}

fn to_integer(thread: &mut JsThread, value: TaggedValue) -> KilnResult<Option<f64>> {
    Ok(to_f64(thread, value)?.map(|v| if v.is_nan() { 0.0 } else { v.trunc() + 0.0 }))
}

fn string_char_code_at(thread: &mut JsThread, info: &CallInfo) -> KilnResult<TaggedValue> {
    let s = try_value!(this_string(thread, info)?);
    let Some(pos) = to_integer(thread, info.arg(0))? else {
        return Ok(TaggedValue::EXCEPTION);
    };
    if pos < 0.0 || pos >= f64::from(thread.string_length(s)?) {
        return Ok(TaggedValue::double(f64::NAN));
    }
    Ok(TaggedValue::int(i32::from(thread.code_unit_at(s, pos as u32)?)))
}

fn string_char_at(thread: &mut JsThread, info: &CallInfo) -> KilnResult<TaggedValue> {
    let s = try_value!(this_string(thread, info)?);
    let Some(pos) = to_integer(thread, info.arg(0))? else {
        return Ok(TaggedValue::EXCEPTION);
    };
    if pos < 0.0 || pos >= f64::from(thread.string_length(s)?) {
        return thread.constant(ConstantIndex::EmptyString);
    }
    thread.substring(s, pos as u32, 1)
}

fn string_index_of(thread: &mut JsThread, info: &CallInfo) -> KilnResult<TaggedValue> {
    let s = try_value!(this_string(thread, info)?);
    let search = try_value!(operations::to_string(thread, info.arg(0))?);
    let Some(pos) = to_integer(thread, info.arg(1))? else {
        return Ok(TaggedValue::EXCEPTION);
    };
    let len = f64::from(thread.string_length(s)?);
    let start = pos.clamp(0.0, len) as u32;
    Ok(TaggedValue::int(thread.string_index_of(s, search, start)?))
}

fn string_substring(thread: &mut JsThread, info: &CallInfo) -> KilnResult<TaggedValue> {
    let s = try_value!(this_string(thread, info)?);
    let len = f64::from(thread.string_length(s)?);
    let Some(start) = to_integer(thread, info.arg(0))? else {
        return Ok(TaggedValue::EXCEPTION);
    };
    let end = if info.arg(1).is_undefined() {
        len
    } else {
        match to_integer(thread, info.arg(1))? {
            Some(end) => end,
            None => return Ok(TaggedValue::EXCEPTION),
        }
    };
    let start = start.clamp(0.0, len);
    let end = end.clamp(0.0, len);
    let (from, to) = if start < end { (start, end) } else { (end, start) };
    thread.substring(s, from as u32, (to - from) as u32)
}

// =============================================================================
// Math
// =============================================================================

fn math_unary(f: fn(f64) -> f64) -> NativeFn {
    Rc::new(move |thread: &mut JsThread, info: &CallInfo| match to_f64(thread, info.arg(0)) {
        Ok(Some(v)) => TaggedValue::number(f(v)),
        Ok(None) => TaggedValue::EXCEPTION,
        Err(e) => thread.fault(&e),
    })
}

fn math_fold(thread: &mut JsThread, info: &CallInfo, init: f64, pick: fn(f64, f64) -> f64) -> KilnResult<TaggedValue> {
    let mut acc = init;
    for &arg in &info.args {
        let Some(v) = to_f64(thread, arg)? else {
            return Ok(TaggedValue::EXCEPTION);
        };
        acc = if v.is_nan() || acc.is_nan() { f64::NAN } else { pick(acc, v) };
    }
    Ok(TaggedValue::number(acc))
}

fn math_max(thread: &mut JsThread, info: &CallInfo) -> KilnResult<TaggedValue> {
    math_fold(thread, info, f64::NEG_INFINITY, |a, b| {
        if a == b && a == 0.0 { if a.is_sign_negative() { b } else { a } } else { a.max(b) }
    })
}

fn math_min(thread: &mut JsThread, info: &CallInfo) -> KilnResult<TaggedValue> {
    math_fold(thread, info, f64::INFINITY, |a, b| {
        if a == b && a == 0.0 { if a.is_sign_negative() { a } else { b } } else { a.min(b) }
    })
}

fn math_pow(thread: &mut JsThread, info: &CallInfo) -> KilnResult<TaggedValue> {
    operations::exp(thread, info.arg(0), info.arg(1))
}

// =============================================================================
// Constructors
// =============================================================================

fn object_constructor(thread: &mut JsThread, info: &CallInfo) -> KilnResult<TaggedValue> {
    let value = info.arg(0);
    if thread.is_ecma_object(value) {
        return Ok(value);
    }
    thread.new_plain_object()
}

fn error_constructor(thread: &mut JsThread, info: &CallInfo) -> KilnResult<TaggedValue> {
    let message = if info.arg(0).is_undefined() {
        String::new()
    } else {
        let s = try_value!(operations::to_string(thread, info.arg(0))?);
        thread.string_to_rust(s)?
    };
    thread.new_error("Error", &message)
}

fn boolean_constructor(thread: &mut JsThread, info: &CallInfo) -> KilnResult<TaggedValue> {
    let value = TaggedValue::boolean(operations::to_boolean(thread, info.arg(0)));
    if info.new_target.is_undefined() {
        return Ok(value);
    }
    let wrapper = thread.new_object_of(ConstantIndex::PrimitiveRefClass)?;
    thread.heap.set_field(wrapper, primitive_ref::VALUE_OFFSET, value)?;
    Ok(wrapper)
}

fn string_constructor(thread: &mut JsThread, info: &CallInfo) -> KilnResult<TaggedValue> {
    let value = if info.argc() == 0 {
        thread.constant(ConstantIndex::EmptyString)?
    } else {
        try_value!(operations::to_string(thread, info.arg(0))?)
    };
    if info.new_target.is_undefined() {
        return Ok(value);
    }
    new_string_object(thread, value)
}

/// Wrap the string `value` in a `String` object with its `length` set.
///
/// # Errors
///
/// Fails if `value` is not a string or the heap is exhausted.
pub fn new_string_object(thread: &mut JsThread, value: TaggedValue) -> KilnResult<TaggedValue> {
    let length = thread.string_length(value)?;
    let wrapper = thread.new_object_of(ConstantIndex::StringObjectClass)?;
    thread.heap.set_field(wrapper, primitive_ref::VALUE_OFFSET, value)?;
    thread.heap.set_field(wrapper, primitive_ref::LENGTH_OFFSET, TaggedValue::int(length as i32))?;
    Ok(wrapper)
}

fn boolean_value_of(thread: &mut JsThread, info: &CallInfo) -> KilnResult<TaggedValue> {
    if info.this.is_boolean() {
        return Ok(info.this);
    }
    if thread.object_type(info.this) == Some(JsType::JsPrimitiveRef) {
        let value = thread.heap.field(info.this, primitive_ref::VALUE_OFFSET)?;
        if value.is_boolean() {
            return Ok(value);
        }
    }
    Ok(thread.throw_type_error("Boolean.prototype.valueOf requires a boolean"))
}

/// Allocate a date object holding `time`.
///
/// # Errors
///
/// Fails if the heap is exhausted beyond its ceiling.
pub fn new_date(thread: &mut JsThread, time: f64) -> KilnResult<TaggedValue> {
    let obj = thread.new_object_of(ConstantIndex::DateClass)?;
    thread.heap.set_field(obj, date_layout::TIME_VALUE_OFFSET, TaggedValue::double(time))?;
    thread.heap.set_field(obj, date_layout::LOCAL_OFFSET_OFFSET, TaggedValue::double(0.0))?;
    Ok(obj)
}

fn date_constructor(thread: &mut JsThread, info: &CallInfo) -> KilnResult<TaggedValue> {
    if info.new_target.is_undefined() {
        return thread.new_string(&date::to_iso_string(date::now()));
    }
    let time = match info.argc() {
        0 => date::now(),
        1 => {
            let value = try_value!(operations::to_primitive(thread, info.arg(0))?);
            if thread.is_string(value) {
                date::parse(&thread.string_to_rust(value)?)
            } else {
                match to_f64(thread, value)? {
                    Some(v) => date::time_clip(v),
                    None => return Ok(TaggedValue::EXCEPTION),
                }
            }
        }
        argc => {
            let mut fields = [f64::NAN, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0];
            for (i, field) in fields.iter_mut().enumerate().take(argc.min(7)) {
                match to_f64(thread, info.arg(i))? {
                    Some(v) => *field = v,
                    None => return Ok(TaggedValue::EXCEPTION),
                }
            }
            let [year, month, day, hour, min, sec, ms] = fields;
            let year = if year.is_finite() && (0.0..=99.0).contains(&year.trunc()) {
                1900.0 + year.trunc()
            } else {
                year
            };
            date::time_clip(date::make_date(
                date::make_day(year, month, day),
                date::make_time(hour, min, sec, ms),
            ))
        }
    };
    new_date(thread, time)
}

fn this_time_value(thread: &mut JsThread, info: &CallInfo) -> KilnResult<Option<f64>> {
    if thread.object_type(info.this) != Some(JsType::JsDate) {
        thread.throw_type_error("receiver is not a Date");
        return Ok(None);
    }
    Ok(Some(thread.heap.field(info.this, date_layout::TIME_VALUE_OFFSET)?.as_number()))
}

fn date_get_time(thread: &mut JsThread, info: &CallInfo) -> KilnResult<TaggedValue> {
    Ok(this_time_value(thread, info)?.map_or(TaggedValue::EXCEPTION, TaggedValue::number))
}

fn date_to_iso_string(thread: &mut JsThread, info: &CallInfo) -> KilnResult<TaggedValue> {
    match this_time_value(thread, info)? {
        Some(t) if t.is_nan() => Ok(thread.throw_range_error("invalid time value")),
        Some(t) => thread.new_string(&date::to_iso_string(t)),
        None => Ok(TaggedValue::EXCEPTION),
    }
}

fn array_constructor(thread: &mut JsThread, info: &CallInfo) -> KilnResult<TaggedValue> {
    if info.argc() == 1 && info.arg(0).is_number() {
        let len = info.arg(0).as_number();
        if len < 0.0 || len.fract() != 0.0 || len > f64::from(u32::MAX) {
            return Ok(thread.throw_range_error("invalid array length"));
        }
        let arr = thread.new_js_array(&[])?;
        thread.set_js_array_length(arr, len as u32)?;
        return Ok(arr);
    }
    thread.new_js_array(&info.args)
}

// =============================================================================
// Generators
// =============================================================================

/// Build `{ value, done }`.
///
/// # Errors
///
/// Fails if the heap is exhausted beyond its ceiling.
pub fn create_iter_result(thread: &mut JsThread, value: TaggedValue, done: bool) -> KilnResult<TaggedValue> {
    let obj = thread.new_plain_object()?;
    let value_key = thread.intern("value")?;
    let done_key = thread.intern("done")?;
    thread.define_own_named(obj, value_key, value)?;
    thread.define_own_named(obj, done_key, TaggedValue::boolean(done))?;
    Ok(obj)
}

/// `next(value)` of generators and async generators.
///
/// Re-enters the generator's function with the generator object as both
/// receiver and `new.target`; compiled generator bodies dispatch on that to
/// restore their frame.
fn generator_next(thread: &mut JsThread, info: &CallInfo) -> KilnResult<TaggedValue> {
    let gen = info.this;
    let (state_offset, result_offset, mode_offset, context_offset) = match thread.object_type(gen) {
        Some(JsType::JsGeneratorObject) => (
            generator_object::GENERATOR_STATE_OFFSET,
            generator_object::RESUME_RESULT_OFFSET,
            generator_object::RESUME_MODE_OFFSET,
            generator_object::GENERATOR_CONTEXT_OFFSET,
        ),
        Some(JsType::JsAsyncGeneratorObject) => (
            async_generator_object::ASYNC_GENERATOR_STATE_OFFSET,
            async_generator_object::ASYNC_GENERATOR_RESUME_RESULT_OFFSET,
            async_generator_object::RESUME_MODE_OFFSET,
            async_generator_object::GENERATOR_CONTEXT_OFFSET,
        ),
        _ => return Ok(thread.throw_type_error("receiver is not a generator")),
    };
    let state = thread.heap.field(gen, state_offset)?.as_int();
    if state == GeneratorState::Executing as i32 {
        return Ok(thread.throw_type_error("generator is already running"));
    }
    if state == GeneratorState::Completed as i32 {
        return create_iter_result(thread, TaggedValue::UNDEFINED, true);
    }
    thread.heap.set_field(gen, result_offset, info.arg(0))?;
    thread.heap.set_field(gen, mode_offset, TaggedValue::int(ResumeMode::Next as i32))?;
    thread.heap.set_field(gen, state_offset, TaggedValue::int(GeneratorState::Executing as i32))?;

    let context = thread.heap.field(gen, context_offset)?;
    let func = thread.heap.field(context, generator_context::METHOD_OFFSET)?;
    let mut call = CallInfo::new(func, gen, &[]);
    call.new_target = gen;
    let result = thread.call_with(&call);
    let state = thread.heap.field(gen, state_offset)?.as_int();
    if result.is_exception() || state == GeneratorState::Executing as i32 {
        thread.heap.set_field(gen, state_offset, TaggedValue::int(GeneratorState::Completed as i32))?;
    }
    Ok(result)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::get_property;

    fn global(thread: &mut JsThread, name: &str) -> TaggedValue {
        let global = thread.global_object().unwrap();
        let key = thread.intern(name).unwrap();
        thread.get_named(global, key).unwrap()
    }

    fn method_of(thread: &mut JsThread, holder: TaggedValue, name: &str) -> TaggedValue {
        let key = thread.intern(name).unwrap();
        get_property(thread, holder, key).unwrap()
    }

    #[test]
    fn test_native_index_matches_builtin_id() {
        let thread = JsThread::new().unwrap();
        for &id in BuiltinId::ALL {
            assert_eq!(thread.native_name(id as u32), Some(id.name()));
        }
        assert_eq!(BuiltinId::NUM_OF_BUILTINS_STUBS, 22);
        assert!(BuiltinId::Floor.is_typed_builtin());
    }

    #[test]
    fn test_containers_type_mapping() {
        for ty in ContainersType::ALL {
            assert_eq!(BuiltinId::from_containers_type(ty).containers_type(), Some(ty));
        }
        assert_eq!(BuiltinId::CharAt.containers_type(), None);
        assert_eq!(BuiltinId::BooleanConstructor.containers_type(), None);
    }

    #[test]
    fn test_meta_class_is_self_describing() {
        let thread = JsThread::new().unwrap();
        let meta = thread.constant(ConstantIndex::HClassClass).unwrap();
        assert_eq!(thread.hclass_of(meta).unwrap(), meta);
        assert_eq!(thread.object_type(meta), Some(JsType::HClass));
        let empty = thread.constant(ConstantIndex::EmptyString).unwrap();
        assert_eq!(thread.string_length(empty).unwrap(), 0);
    }

    #[test]
    fn test_guardian_armed_after_init() {
        let thread = JsThread::new().unwrap();
        assert!(thread.stable_array_guardian().unwrap());
    }

    #[test]
    fn test_string_methods() {
        let mut thread = JsThread::new().unwrap();
        let s = thread.new_string("abcabc").unwrap();
        let index_of = method_of(&mut thread, s, "indexOf");
        let bc = thread.new_string("bc").unwrap();
        assert_eq!(thread.call(index_of, s, &[bc, TaggedValue::int(2)]), TaggedValue::int(4));
        let sub = method_of(&mut thread, s, "substring");
        let r = thread.call(sub, s, &[TaggedValue::int(4), TaggedValue::int(1)]);
        assert_eq!(thread.string_to_rust(r).unwrap(), "bca");
        let code = method_of(&mut thread, s, "charCodeAt");
        assert!(thread.call(code, s, &[TaggedValue::int(9)]).as_number().is_nan());
    }

    #[test]
    fn test_boolean_constructor() {
        let mut thread = JsThread::new().unwrap();
        let ctor = global(&mut thread, "Boolean");
        let s = thread.new_string("x").unwrap();
        assert_eq!(thread.call(ctor, TaggedValue::UNDEFINED, &[s]), TaggedValue::TRUE);
        let wrapped = thread.construct(ctor, &[TaggedValue::int(0)]);
        assert_eq!(thread.object_type(wrapped), Some(JsType::JsPrimitiveRef));
        let value_of = method_of(&mut thread, wrapped, "valueOf");
        assert_eq!(thread.call(value_of, wrapped, &[]), TaggedValue::FALSE);
    }

    #[test]
    fn test_string_constructor() {
        let mut thread = JsThread::new().unwrap();
        let ctor = global(&mut thread, "String");
        let empty = thread.call(ctor, TaggedValue::UNDEFINED, &[]);
        assert_eq!(empty, thread.constant(ConstantIndex::EmptyString).unwrap());
        let s = thread.call(ctor, TaggedValue::UNDEFINED, &[TaggedValue::int(42)]);
        assert_eq!(thread.string_to_rust(s).unwrap(), "42");
        let wrapped = thread.construct(ctor, &[s]);
        assert_eq!(thread.object_type(wrapped), Some(JsType::JsPrimitiveRef));
        assert_eq!(thread.heap.field(wrapped, primitive_ref::VALUE_OFFSET).unwrap(), s);
        assert_eq!(thread.heap.field(wrapped, primitive_ref::LENGTH_OFFSET).unwrap(), TaggedValue::int(2));
    }

    #[test]
    fn test_date_constructor() {
        let mut thread = JsThread::new().unwrap();
        let ctor = global(&mut thread, "Date");
        let d = thread.construct(ctor, &[TaggedValue::int(2000), TaggedValue::int(0), TaggedValue::int(1)]);
        let get_time = method_of(&mut thread, d, "getTime");
        assert_eq!(thread.call(get_time, d, &[]).as_number(), 946_684_800_000.0);
        let text = thread.new_string("1970-01-02").unwrap();
        let parsed = thread.construct(ctor, &[text]);
        assert_eq!(thread.call(get_time, parsed, &[]).as_number(), date::MS_PER_DAY);
    }

    #[test]
    fn test_array_constructor() {
        let mut thread = JsThread::new().unwrap();
        let ctor = global(&mut thread, "Array");
        let sized = thread.construct(ctor, &[TaggedValue::int(3)]);
        assert_eq!(thread.js_array_length(sized).unwrap(), 3);
        let listed = thread.construct(ctor, &[TaggedValue::int(3), TaggedValue::int(4)]);
        assert_eq!(thread.js_array_length(listed).unwrap(), 2);
        assert!(thread.construct(ctor, &[TaggedValue::double(1.5)]).is_exception());
    }

    #[test]
    fn test_math_abs_of_min_int() {
        let mut thread = JsThread::new().unwrap();
        let math = global(&mut thread, "Math");
        let abs = method_of(&mut thread, math, "abs");
        let r = thread.call(abs, math, &[TaggedValue::int(i32::MIN)]);
        assert_eq!(r, TaggedValue::double(2_147_483_648.0));
        let max = method_of(&mut thread, math, "max");
        assert_eq!(thread.call(max, math, &[TaggedValue::int(1), TaggedValue::int(7)]), TaggedValue::int(7));
    }

    #[test]
    fn test_container_constructor_and_for_each() {
        let mut thread = JsThread::new().unwrap();
        let ctor = global(&mut thread, "ArrayList");
        let list = thread.construct(ctor, &[]);
        let add = method_of(&mut thread, list, "add");
        for i in 0..3 {
            thread.call(add, list, &[TaggedValue::int(i)]);
        }
        let counter = thread.new_js_array(&[]).unwrap();
        let push = thread
            .new_native_function("record", 1, Rc::new(|t: &mut JsThread, info: &CallInfo| {
                let len = t.js_array_length(info.this).unwrap();
                t.set_element(info.this, len, info.arg(0)).unwrap()
            }))
            .unwrap();
        let for_each = method_of(&mut thread, list, "forEach");
        let r = thread.call(for_each, list, &[push, counter]);
        assert!(r.is_undefined());
        assert_eq!(thread.js_array_length(counter).unwrap(), 3);
        assert!(thread.call(ctor, TaggedValue::UNDEFINED, &[]).is_exception());
    }
}
