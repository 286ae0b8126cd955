//! The runtime stub table.
//!
//! Every stub has the uniform signature `fn(&mut JsThread, &[TaggedValue])`
//! and is reached through [`call_runtime`]. A handful of "no-GC" stubs work
//! on raw machine words instead and go through [`call_ngc_runtime`]; they
//! never allocate and never throw.
//!
//! Stubs signal program exceptions by returning [`TaggedValue::EXCEPTION`]
//! with a pending exception on the thread. `Err` is reserved for faults of
//! the simulated machine and for calls whose argument count does not match
//! the stub's signature, which are compiler bugs.

use kiln_core::value::TaggedValue;
use kiln_core::{KilnError, KilnResult};

use crate::builtins::create_iter_result;
use crate::date;
use crate::heap::{ConstantIndex, GlobalEnvField};
use crate::layout::{
    arguments, async_generator_object, function, generator_context, generator_object, lexical_env, method,
    object, FunctionKind, GeneratorState, JsType, ResumeMode,
};
use crate::operations::{self, try_value};
use crate::thread::{CallInfo, JsThread};

/// Signature of a regular runtime stub.
pub type RuntimeStubFn = fn(&mut JsThread, &[TaggedValue]) -> KilnResult<TaggedValue>;

/// Signature of a no-GC stub over raw machine words.
pub type NoGcStubFn = fn(&JsThread, &[u64]) -> u64;

/// Number of slots in a method's profile type info array.
pub const PROFILE_SLOTS: u32 = 16;

/// Argument count a stub accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly this many.
    Fixed(usize),
    /// At least this many.
    AtLeast(usize),
}

impl Arity {
    /// Whether `argc` arguments are acceptable.
    #[must_use]
    pub const fn accepts(self, argc: usize) -> bool {
        match self {
            Arity::Fixed(n) => argc == n,
            Arity::AtLeast(n) => argc >= n,
        }
    }
}

macro_rules! arity {
    ($n:literal) => {
        Arity::Fixed($n)
    };
    ($n:literal +) => {
        Arity::AtLeast($n)
    };
}

macro_rules! runtime_stubs {
    (
        gc { $($name:ident ($n:literal $($plus:tt)?) => $entry:path,)* }
        no_gc { $($ngc:ident ($m:literal) => $ngc_entry:path,)* }
    ) => {
        /// Runtime stub ids.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum RuntimeStubId {
            $(
                #[allow(missing_docs)]
                $name,
            )*
            $(
                #[allow(missing_docs)]
                $ngc,
            )*
        }

        impl RuntimeStubId {
            /// Every stub, in id order.
            pub const ALL: &'static [RuntimeStubId] = &[$(RuntimeStubId::$name,)* $(RuntimeStubId::$ngc,)*];

            /// Stub name.
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $(RuntimeStubId::$name => stringify!($name),)*
                    $(RuntimeStubId::$ngc => stringify!($ngc),)*
                }
            }

            /// Accepted argument count.
            #[must_use]
            pub const fn arity(self) -> Arity {
                match self {
                    $(RuntimeStubId::$name => arity!($n $($plus)?),)*
                    $(RuntimeStubId::$ngc => Arity::Fixed($m),)*
                }
            }

            /// Whether the stub runs on raw words without touching the heap.
            #[must_use]
            pub const fn is_no_gc(self) -> bool {
                match self {
                    $(RuntimeStubId::$name => false,)*
                    $(RuntimeStubId::$ngc => true,)*
                }
            }

            fn entry(self) -> Option<RuntimeStubFn> {
                match self {
                    $(RuntimeStubId::$name => Some($entry),)*
                    _ => None,
                }
            }

            fn no_gc_entry(self) -> Option<NoGcStubFn> {
                match self {
                    $(RuntimeStubId::$ngc => Some($ngc_entry),)*
                    _ => None,
                }
            }
        }
    };
}

runtime_stubs! {
    gc {
        Add2(2) => add2,
        Sub2(2) => sub2,
        Mul2(2) => mul2,
        Div2(2) => div2,
        Mod2(2) => mod2,
        Shl2(2) => shl2,
        Shr2(2) => shr2,
        Ashr2(2) => ashr2,
        And2(2) => and2,
        Or2(2) => or2,
        Xor2(2) => xor2,
        Exp(2) => exp,
        Eq(2) => eq,
        NotEq(2) => not_eq,
        StrictEq(2) => strict_eq,
        StrictNotEq(2) => strict_not_eq,
        Less(2) => less,
        LessEq(2) => less_eq,
        Greater(2) => greater,
        GreaterEq(2) => greater_eq,
        Inc(1) => inc,
        Dec(1) => dec,
        Neg(1) => neg,
        Not(1) => not,
        ToNumber(1) => to_number,
        ToNumeric(1) => to_number,
        TypeOf(1) => type_of,
        InstanceOf(2) => instance_of,
        IsIn(2) => is_in,
        DelObjProp(2) => del_obj_prop,
        Throw(1) => throw,
        ThrowConstAssignment(1) => throw_const_assignment,
        ThrowThrowNotExists(0) => throw_throw_not_exists,
        ThrowPatternNonCoercible(0) => throw_pattern_non_coercible,
        ThrowDeleteSuperProperty(0) => throw_delete_super_property,
        ThrowUndefinedIfHole(1) => throw_undefined_if_hole,
        ThrowIfNotObject(0) => throw_if_not_object,
        ThrowIfSuperNotCorrectCall(2) => throw_if_super_not_correct_call,
        ThrowNotCallableException(0) => throw_not_callable,
        ThrowTypeError(1) => throw_type_error,
        CreateEmptyObject(0) => create_empty_object,
        CreateEmptyArray(0) => create_empty_array,
        CreateArrayWithBuffer(1) => create_array_with_buffer,
        CreateObjectWithBuffer(1) => create_object_with_buffer,
        CopyDataProperties(2) => copy_data_properties,
        StArraySpread(3) => st_array_spread,
        StOwnByName(3) => st_own_by_name,
        StOwnByValue(3) => st_own_by_value,
        StOwnByIndex(3) => st_own_by_value,
        LdObjByName(2) => ld_obj_by_value,
        LdObjByValue(2) => ld_obj_by_value,
        LdObjByIndex(2) => ld_obj_by_value,
        StObjByName(3) => st_obj_by_value,
        StObjByValue(3) => st_obj_by_value,
        StObjByIndex(3) => st_obj_by_value,
        LdSuperByValue(3) => ld_super_by_value,
        StSuperByValue(4) => st_super_by_value,
        DefineGetterSetterByValue(5) => define_getter_setter_by_value,
        LdGlobalVar(1) => ld_global_var,
        StGlobalVar(2) => st_global_var,
        TryLdGlobalByName(1) => ld_global_var,
        TryStGlobalByName(2) => st_global_var,
        StGlobalRecord(3) => st_global_record,
        DefineFunc(3) => define_func,
        DefineMethod(3) => define_method,
        CreateClassWithBuffer(4) => create_class_with_buffer,
        NewObjRange(2+) => new_obj_range,
        NewObjApply(2) => new_obj_apply,
        SuperCall(2+) => super_call,
        CallSpread(3) => call_spread,
        NewThisObject(2) => new_this_object,
        CallNativeSlowPath(3+) => call_native_slow_path,
        NewLexicalEnv(2) => new_lexical_env,
        NewLexicalEnvWithName(3) => new_lexical_env_with_name,
        LdModuleVar(1) => ld_module_var,
        LdLocalModuleVar(1) => ld_module_var,
        LdExternalModuleVar(1) => ld_external_module_var,
        StModuleVar(2) => st_module_var,
        CreateGeneratorObj(1) => create_generator_obj,
        CreateAsyncGeneratorObj(1) => create_async_generator_obj,
        OptSuspendGenerator(2) => opt_suspend_generator,
        OptAsyncGeneratorResolve(3) => opt_async_generator_resolve,
        OptAsyncGeneratorReject(2) => opt_async_generator_reject,
        SetGeneratorState(2) => set_generator_state,
        CreateIterResultObj(2) => create_iter_result_obj,
        GetUnmappedArgs(0+) => get_unmapped_args,
        CopyRestArgs(1+) => copy_rest_args,
        NewTaggedArray(1) => new_tagged_array,
        UpdateHotnessCounter(1) => update_hotness_counter,
        ProfileOptimizedCode(2) => profile_optimized_code,
        ContainerRBTreeForEach(5) => container_rb_tree_for_each,
        TimeClip(1) => time_clip,
        SetDateValues(3) => set_date_values,
        AllocateInYoung(1) => allocate_in_young,
        GetTypeArrayPropertyByIndex(2) => get_typed_array_by_index,
        SetTypeArrayPropertyByIndex(3) => set_typed_array_by_index,
        Debugger(0) => debugger,
    }
    no_gc {
        FloatMod(2) => float_mod,
        FloatSqrt(1) => float_sqrt,
        FloatCos(1) => float_cos,
        FloatSin(1) => float_sin,
        FloatACos(1) => float_acos,
        FloatATan(1) => float_atan,
        FloatFloor(1) => float_floor,
        DoubleToInt(1) => double_to_int,
        ToBoolean(1) => to_boolean,
    }
}

/// Call a regular runtime stub.
///
/// # Errors
///
/// Fails on an argument count the stub does not accept, on a no-GC stub, or
/// when the stub faults the simulated machine.
pub fn call_runtime(thread: &mut JsThread, id: RuntimeStubId, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let Some(entry) = id.entry() else {
        return Err(KilnError::Unreachable(format!("{} must be called without GC", id.name())));
    };
    if !id.arity().accepts(argv.len()) {
        return Err(KilnError::Verification(format!(
            "runtime stub {} called with {} arguments",
            id.name(),
            argv.len()
        )));
    }
    thread.count_stub(id.name());
    tracing::trace!(stub = id.name(), argc = argv.len(), "runtime call");
    entry(thread, argv)
}

/// Call a no-GC stub on raw machine words.
///
/// # Errors
///
/// Fails on a regular stub or a wrong argument count.
pub fn call_ngc_runtime(thread: &JsThread, id: RuntimeStubId, args: &[u64]) -> KilnResult<u64> {
    let Some(entry) = id.no_gc_entry() else {
        return Err(KilnError::Unreachable(format!("{} is not a no-GC stub", id.name())));
    };
    if !id.arity().accepts(args.len()) {
        return Err(KilnError::Verification(format!(
            "no-GC stub {} called with {} arguments",
            id.name(),
            args.len()
        )));
    }
    Ok(entry(thread, args))
}

// =============================================================================
// Operators
// =============================================================================

macro_rules! binary_stubs {
    ($($name:ident => $op:path;)*) => {
        $(
            fn $name(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
                $op(thread, argv[0], argv[1])
            }
        )*
    };
}

binary_stubs! {
    add2 => operations::add;
    sub2 => operations::sub;
    mul2 => operations::mul;
    div2 => operations::div;
    mod2 => operations::modulo;
    shl2 => operations::shl;
    shr2 => operations::shr;
    ashr2 => operations::ashr;
    and2 => operations::and;
    or2 => operations::or;
    xor2 => operations::xor;
    exp => operations::exp;
    eq => operations::loose_equal;
    less => operations::less;
    less_eq => operations::less_eq;
    greater => operations::greater;
    greater_eq => operations::greater_eq;
    instance_of => operations::instance_of;
    is_in => operations::has_property;
    del_obj_prop => operations::delete_property;
}

fn not_eq(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let r = try_value!(operations::loose_equal(thread, argv[0], argv[1])?);
    Ok(TaggedValue::boolean(!r.is_true()))
}

fn strict_eq(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    Ok(TaggedValue::boolean(operations::strict_equal(thread, argv[0], argv[1])?))
}

fn strict_not_eq(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    Ok(TaggedValue::boolean(!operations::strict_equal(thread, argv[0], argv[1])?))
}

fn inc(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    operations::inc(thread, argv[0])
}

fn dec(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    operations::dec(thread, argv[0])
}

fn neg(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    operations::neg(thread, argv[0])
}

fn not(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    operations::not(thread, argv[0])
}

fn to_number(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    operations::to_number(thread, argv[0])
}

fn type_of(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let name = operations::type_of(thread, argv[0]);
    thread.intern(name)
}

// =============================================================================
// Throws
// =============================================================================

fn throw(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    Ok(thread.throw(argv[0]))
}

fn name_of(thread: &mut JsThread, value: TaggedValue) -> KilnResult<String> {
    if thread.is_string(value) {
        thread.string_to_rust(value)
    } else {
        Ok(String::from("<anonymous>"))
    }
}

fn throw_const_assignment(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let name = name_of(thread, argv[0])?;
    Ok(thread.throw_type_error(&format!("assignment to constant variable {name}")))
}

fn throw_throw_not_exists(thread: &mut JsThread, _: &[TaggedValue]) -> KilnResult<TaggedValue> {
    Ok(thread.throw_type_error("iterator does not have a throw method"))
}

fn throw_pattern_non_coercible(thread: &mut JsThread, _: &[TaggedValue]) -> KilnResult<TaggedValue> {
    Ok(thread.throw_type_error("cannot destructure undefined or null"))
}

fn throw_delete_super_property(thread: &mut JsThread, _: &[TaggedValue]) -> KilnResult<TaggedValue> {
    Ok(thread.throw_error("ReferenceError", "cannot delete super property"))
}

fn throw_undefined_if_hole(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let name = name_of(thread, argv[0])?;
    Ok(thread.throw_error("ReferenceError", &format!("{name} is not initialized")))
}

fn throw_if_not_object(thread: &mut JsThread, _: &[TaggedValue]) -> KilnResult<TaggedValue> {
    Ok(thread.throw_type_error("inner result is not an object"))
}

/// `argv`: `{index, this}`. Index 0 checks `super()` was called, index 1 that
/// it was called only once.
fn throw_if_super_not_correct_call(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let this_is_hole = argv[1].is_hole();
    match argv[0].as_int() {
        0 if this_is_hole => Ok(thread.throw_error("ReferenceError", "super() must be called before using this")),
        1 if !this_is_hole => Ok(thread.throw_error("ReferenceError", "super() called twice")),
        _ => Ok(TaggedValue::TRUE),
    }
}

fn throw_not_callable(thread: &mut JsThread, _: &[TaggedValue]) -> KilnResult<TaggedValue> {
    Ok(thread.throw_type_error("value is not callable"))
}

fn throw_type_error(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let message = name_of(thread, argv[0])?;
    Ok(thread.throw_type_error(&message))
}

// =============================================================================
// Objects and Properties
// =============================================================================

fn create_empty_object(thread: &mut JsThread, _: &[TaggedValue]) -> KilnResult<TaggedValue> {
    thread.new_plain_object()
}

fn create_empty_array(thread: &mut JsThread, _: &[TaggedValue]) -> KilnResult<TaggedValue> {
    thread.new_js_array(&[])
}

/// Copy the elements of a literal tagged array into a fresh array.
fn create_array_with_buffer(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let len = thread.array_len(argv[0])?;
    let values = (0..len)
        .map(|i| thread.array_get(argv[0], i))
        .collect::<KilnResult<Vec<_>>>()?;
    thread.new_js_array(&values)
}

/// The literal holds `key, value` pairs.
fn create_object_with_buffer(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let obj = thread.new_plain_object()?;
    let len = thread.array_len(argv[0])?;
    for i in (0..len.saturating_sub(1)).step_by(2) {
        let key = thread.array_get(argv[0], i)?;
        let value = thread.array_get(argv[0], i + 1)?;
        let key = thread.intern_string(key)?;
        thread.define_own_named(obj, key, value)?;
    }
    Ok(obj)
}

fn copy_data_properties(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let (dst, src) = (argv[0], argv[1]);
    if src.is_undefined_or_null() || !thread.is_ecma_object(src) {
        return Ok(dst);
    }
    let h = thread.hclass_of(src)?;
    let layout = thread.heap.field(h, crate::layout::hclass::LAYOUT_OFFSET)?;
    let count = thread.heap.read_u32(h.as_address() + crate::layout::hclass::NUM_PROPS_OFFSET)?;
    for slot in 0..count {
        let key = thread.array_get(layout, slot)?;
        if let Some(value) = thread.get_own_named(src, key)? {
            thread.define_own_named(dst, key, value)?;
        }
    }
    if thread.is_js_array(src) {
        let len = thread.js_array_length(src)?;
        for i in 0..len {
            let value = thread.get_element(src, i)?;
            try_value!(thread.set_element(dst, i, value)?);
        }
    }
    Ok(dst)
}

/// `argv`: `{dst, index, src}`; appends the elements of `src` and returns the
/// next index.
fn st_array_spread(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let (dst, src) = (argv[0], argv[2]);
    let mut index = argv[1].as_int().max(0) as u32;
    let values = if thread.is_string(src) {
        let mut out = Vec::new();
        for unit in thread.string_units(src)? {
            out.push(thread.new_string_from_utf16(&[unit])?);
        }
        out
    } else if thread.is_js_array(src) {
        let len = thread.js_array_length(src)?;
        (0..len).map(|i| thread.get_element(src, i)).collect::<KilnResult<Vec<_>>>()?
    } else if let Some(kind) = thread.container_kind(src) {
        let len = thread.container_len(src, kind)?;
        (0..len).map(|i| thread.container_get(src, kind, i)).collect::<KilnResult<Vec<_>>>()?
    } else {
        return Ok(thread.throw_type_error("spread target is not iterable"));
    };
    for value in values {
        try_value!(thread.set_element(dst, index, value)?);
        index += 1;
    }
    Ok(TaggedValue::int(index as i32))
}

fn st_own_by_name(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let key = thread.intern_string(argv[1])?;
    thread.define_own_named(argv[0], key, argv[2])?;
    Ok(argv[0])
}

fn st_own_by_value(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    try_value!(operations::set_property(thread, argv[0], argv[1], argv[2])?);
    Ok(argv[0])
}

fn ld_obj_by_value(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    operations::get_property(thread, argv[0], argv[1])
}

fn st_obj_by_value(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    operations::set_property(thread, argv[0], argv[1], argv[2])
}

fn super_base(thread: &mut JsThread, func: TaggedValue) -> KilnResult<TaggedValue> {
    let home = thread.heap.field(func, function::HOME_OBJECT_OFFSET)?;
    if !home.is_heap_object() {
        return Ok(thread.throw_error("SyntaxError", "super is not available here"));
    }
    thread.prototype_of(home)
}

/// `argv`: `{this, key, func}`.
fn ld_super_by_value(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let base = try_value!(super_base(thread, argv[2])?);
    let Some(key) = operations::property_key(thread, argv[1])? else {
        return Ok(TaggedValue::EXCEPTION);
    };
    match key {
        crate::object::PropertyKey::Named(name) if base.is_heap_object() => {
            let value = thread.get_named(base, name)?;
            Ok(value)
        }
        _ => operations::get_property(thread, base, argv[1]),
    }
}

/// `argv`: `{this, key, value, func}`.
fn st_super_by_value(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    try_value!(super_base(thread, argv[3])?);
    operations::set_property(thread, argv[0], argv[1], argv[2])
}

/// `argv`: `{obj, prop, getter, setter, acc}`; returns `obj`.
fn define_getter_setter_by_value(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let obj = argv[0];
    let key = try_value!(operations::to_string(thread, argv[1])?);
    let key = thread.intern_string(key)?;
    let accessor = thread.new_accessor(argv[2], argv[3])?;
    thread.define_own_named(obj, key, accessor)?;
    Ok(obj)
}

fn ld_global_var(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    operations::try_load_global(thread, argv[0])
}

fn st_global_var(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    operations::store_global(thread, argv[0], argv[1])
}

/// `argv`: `{name, value, isConst}`; declares a global binding.
fn st_global_record(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let global = thread.global_object()?;
    let key = thread.intern_string(argv[0])?;
    thread.define_own_named(global, key, argv[1])?;
    Ok(TaggedValue::TRUE)
}

// =============================================================================
// Functions and Calls
// =============================================================================

/// A function whose body is compiled code `code_index`.
fn new_code_function(
    thread: &mut JsThread,
    code_index: TaggedValue,
    kind: FunctionKind,
    env: TaggedValue,
) -> KilnResult<TaggedValue> {
    let m = thread.new_method(method::NO_NATIVE, method::NO_BUILTIN, kind, 0)?;
    thread.heap.set_field(m, method::CONSTANT_POOL_OFFSET, code_index)?;
    thread.new_function(m, kind, env)
}

/// `argv`: `{codeIndex, kind, env}`.
fn define_func(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let kind = FunctionKind::from_u32(argv[1].as_int() as u32);
    let func = new_code_function(thread, argv[0], kind, argv[2])?;
    if matches!(kind, FunctionKind::Generator | FunctionKind::AsyncGenerator) {
        let field = if kind == FunctionKind::Generator {
            GlobalEnvField::GeneratorPrototype
        } else {
            GlobalEnvField::AsyncGeneratorPrototype
        };
        let parent = thread.global_env_field(field)?;
        let proto = thread.new_plain_object()?;
        thread.set_prototype(proto, parent)?;
        thread.heap.set_field(func, function::PROTO_OR_HCLASS_OFFSET, proto)?;
    }
    Ok(func)
}

/// `argv`: `{codeIndex, homeObject, env}`.
fn define_method(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let func = new_code_function(thread, argv[0], FunctionKind::Method, argv[2])?;
    thread.heap.set_field(func, function::HOME_OBJECT_OFFSET, argv[1])?;
    Ok(func)
}

/// `argv`: `{codeIndex, literal, parent, env}`. The literal holds
/// `name, codeIndex` pairs of prototype methods; a hole parent makes a base
/// class.
fn create_class_with_buffer(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let (literal, parent, env) = (argv[1], argv[2], argv[3]);
    let derived = !parent.is_hole();
    let (proto_parent, ctor_parent) = if !derived {
        let object_proto = thread.global_env_field(GlobalEnvField::ObjectPrototype)?;
        let function_proto = thread.global_env_field(GlobalEnvField::FunctionPrototype)?;
        (object_proto, function_proto)
    } else if parent.is_null() {
        let function_proto = thread.global_env_field(GlobalEnvField::FunctionPrototype)?;
        (TaggedValue::NULL, function_proto)
    } else if thread.is_constructor(parent) {
        let proto = thread.function_prototype(parent)?;
        if !proto.is_heap_object() && !proto.is_null() {
            return Ok(thread.throw_type_error("parent prototype is not an object"));
        }
        (proto, parent)
    } else {
        return Ok(thread.throw_type_error("class extends value is not a constructor"));
    };

    let kind = if derived { FunctionKind::DerivedConstructor } else { FunctionKind::BaseConstructor };
    let ctor = new_code_function(thread, argv[0], kind, env)?;
    let proto = thread.function_prototype(ctor)?;
    thread.set_prototype(proto, proto_parent)?;
    thread.set_prototype(ctor, ctor_parent)?;
    thread.heap.set_field(ctor, function::HOME_OBJECT_OFFSET, proto)?;

    let len = thread.array_len(literal)?;
    for i in (0..len.saturating_sub(1)).step_by(2) {
        let name = thread.array_get(literal, i)?;
        let code = thread.array_get(literal, i + 1)?;
        let m = new_code_function(thread, code, FunctionKind::Method, env)?;
        thread.heap.set_field(m, function::HOME_OBJECT_OFFSET, proto)?;
        let key = thread.intern_string(name)?;
        thread.define_own_named(proto, key, m)?;
    }
    Ok(ctor)
}

/// `argv`: `{ctor, newTarget, args...}`.
fn new_obj_range(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    Ok(thread.construct_with(argv[0], argv[1], &argv[2..]))
}

fn array_values(thread: &mut JsThread, arr: TaggedValue) -> KilnResult<Option<Vec<TaggedValue>>> {
    if !thread.is_js_array(arr) {
        return Ok(None);
    }
    let len = thread.js_array_length(arr)?;
    (0..len).map(|i| thread.get_element(arr, i)).collect::<KilnResult<Vec<_>>>().map(Some)
}

/// `argv`: `{ctor, argsArray}`.
fn new_obj_apply(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let Some(args) = array_values(thread, argv[1])? else {
        return Ok(thread.throw_type_error("spread arguments must be an array"));
    };
    Ok(thread.construct(argv[0], &args))
}

/// `argv`: `{func, this, argsArray}`.
fn call_spread(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let Some(args) = array_values(thread, argv[2])? else {
        return Ok(thread.throw_type_error("spread arguments must be an array"));
    };
    Ok(thread.call(argv[0], argv[1], &args))
}

/// `argv`: `{currentFunc, newTarget, args...}`; constructs with the parent
/// class of the current constructor.
fn super_call(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let super_ctor = thread.prototype_of(argv[0])?;
    if !thread.is_constructor(super_ctor) {
        return Ok(thread.throw_type_error("super constructor is not a constructor"));
    }
    Ok(thread.construct_with(super_ctor, argv[1], &argv[2..]))
}

/// `argv`: `{ctor, newTarget}`.
fn new_this_object(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    thread.allocate_this(argv[0], argv[1])
}

/// `argv`: `{func, newTarget, this, args...}`.
fn call_native_slow_path(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let mut info = CallInfo::new(argv[0], argv[2], &argv[3..]);
    info.new_target = argv[1];
    Ok(thread.call_with(&info))
}

// =============================================================================
// Environments and Modules
// =============================================================================

/// `argv`: `{numVars, parentEnv}`.
fn new_lexical_env(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    thread.new_lexical_env(argv[0].as_int() as u32, argv[1])
}

/// `argv`: `{numVars, scopeId, parentEnv}`.
fn new_lexical_env_with_name(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let env = thread.new_lexical_env(argv[0].as_int() as u32, argv[2])?;
    thread.array_set(env, lexical_env::SCOPE_INFO_INDEX, argv[1])?;
    Ok(env)
}

fn ld_module_var(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let index = argv[0].as_int() as usize;
    Ok(thread.module_vars.get(index).copied().unwrap_or(TaggedValue::UNDEFINED))
}

fn ld_external_module_var(thread: &mut JsThread, _: &[TaggedValue]) -> KilnResult<TaggedValue> {
    Ok(thread.throw_type_error("external module bindings are not available"))
}

fn st_module_var(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let index = argv[0].as_int() as usize;
    if thread.module_vars.len() <= index {
        thread.module_vars.resize(index + 1, TaggedValue::UNDEFINED);
    }
    thread.module_vars[index] = argv[1];
    Ok(TaggedValue::UNDEFINED)
}

// =============================================================================
// Generators
// =============================================================================

fn new_generator_context(thread: &mut JsThread, func: TaggedValue, gen: TaggedValue) -> KilnResult<TaggedValue> {
    let class = thread.constant(ConstantIndex::GeneratorContextClass)?;
    let address = thread.heap.allocate(generator_context::SIZE)?;
    let context = TaggedValue::object(address);
    let empty = thread.constant(ConstantIndex::EmptyArray)?;
    thread.heap.set_field(context, object::HCLASS_OFFSET, class)?;
    thread.heap.set_field(context, generator_context::REGS_ARRAY_OFFSET, empty)?;
    thread.heap.set_field(context, generator_context::METHOD_OFFSET, func)?;
    thread.heap.set_field(context, generator_context::ACC_OFFSET, TaggedValue::UNDEFINED)?;
    thread.heap.write_u32(address + generator_context::NREGS_OFFSET, 0)?;
    thread.heap.write_u32(address + generator_context::BC_OFFSET_OFFSET, 0)?;
    thread.heap.set_field(context, generator_context::GENERATOR_OBJECT_OFFSET, gen)?;
    let env = thread.heap.field(func, function::LEXICAL_ENV_OFFSET)?;
    thread.heap.set_field(context, generator_context::LEXICAL_ENV_OFFSET, env)?;
    thread.heap.set_field(context, generator_context::THIS_OFFSET, TaggedValue::UNDEFINED)?;
    Ok(context)
}

fn new_generator(
    thread: &mut JsThread,
    func: TaggedValue,
    class: ConstantIndex,
    context_offset: u64,
    state_offset: u64,
) -> KilnResult<TaggedValue> {
    let gen = thread.new_object_of(class)?;
    let proto = thread.function_prototype(func)?;
    if proto.is_heap_object() {
        thread.set_prototype(gen, proto)?;
    }
    let context = new_generator_context(thread, func, gen)?;
    thread.heap.set_field(gen, context_offset, context)?;
    thread.heap.set_field(gen, state_offset, TaggedValue::int(GeneratorState::SuspendedStart as i32))?;
    Ok(gen)
}

fn create_generator_obj(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let gen = new_generator(
        thread,
        argv[0],
        ConstantIndex::GeneratorObjectClass,
        generator_object::GENERATOR_CONTEXT_OFFSET,
        generator_object::GENERATOR_STATE_OFFSET,
    )?;
    thread.heap.set_field(gen, generator_object::RESUME_MODE_OFFSET, TaggedValue::int(ResumeMode::Next as i32))?;
    Ok(gen)
}

fn create_async_generator_obj(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let gen = new_generator(
        thread,
        argv[0],
        ConstantIndex::AsyncGeneratorObjectClass,
        async_generator_object::GENERATOR_CONTEXT_OFFSET,
        async_generator_object::ASYNC_GENERATOR_STATE_OFFSET,
    )?;
    thread
        .heap
        .set_field(gen, async_generator_object::RESUME_MODE_OFFSET, TaggedValue::int(ResumeMode::Next as i32))?;
    let queue = thread.new_js_array(&[])?;
    thread.heap.set_field(gen, async_generator_object::QUEUE_OFFSET, queue)?;
    Ok(gen)
}

fn generator_state_offset(thread: &JsThread, gen: TaggedValue) -> Option<u64> {
    match thread.object_type(gen) {
        Some(JsType::JsGeneratorObject) => Some(generator_object::GENERATOR_STATE_OFFSET),
        Some(JsType::JsAsyncGeneratorObject) => Some(async_generator_object::ASYNC_GENERATOR_STATE_OFFSET),
        _ => None,
    }
}

/// `argv`: `{genObj, value}`. The frame has already been saved to the
/// generator context; marks the generator suspended and produces what `next`
/// returns.
fn opt_suspend_generator(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let (gen, value) = (argv[0], argv[1]);
    let Some(state_offset) = generator_state_offset(thread, gen) else {
        return Ok(thread.throw_type_error("suspend target is not a generator"));
    };
    thread.heap.set_field(gen, state_offset, TaggedValue::int(GeneratorState::SuspendedYield as i32))?;
    if thread.object_type(gen) == Some(JsType::JsAsyncGeneratorObject) {
        return Ok(value);
    }
    create_iter_result(thread, value, false)
}

/// `argv`: `{genObj, value, done}`.
fn opt_async_generator_resolve(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let done = argv[2].is_true();
    let state = if done { GeneratorState::Completed } else { GeneratorState::SuspendedYield };
    thread.heap.set_field(
        argv[0],
        async_generator_object::ASYNC_GENERATOR_STATE_OFFSET,
        TaggedValue::int(state as i32),
    )?;
    create_iter_result(thread, argv[1], done)
}

/// `argv`: `{genObj, reason}`.
fn opt_async_generator_reject(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    thread.heap.set_field(
        argv[0],
        async_generator_object::ASYNC_GENERATOR_STATE_OFFSET,
        TaggedValue::int(GeneratorState::Completed as i32),
    )?;
    Ok(thread.throw(argv[1]))
}

/// `argv`: `{genObj, state}`.
fn set_generator_state(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let Some(state_offset) = generator_state_offset(thread, argv[0]) else {
        return Ok(thread.throw_type_error("target is not a generator"));
    };
    thread.heap.set_field(argv[0], state_offset, argv[1])?;
    Ok(TaggedValue::UNDEFINED)
}

fn create_iter_result_obj(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let done = operations::to_boolean(thread, argv[1]);
    create_iter_result(thread, argv[0], done)
}

// =============================================================================
// Arguments
// =============================================================================

/// `argv`: the actual arguments of the frame.
fn get_unmapped_args(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let obj = thread.new_object_of(ConstantIndex::ArgumentsClass)?;
    let elements = thread.tagged_array_from(argv)?;
    thread.heap.set_field(obj, object::ELEMENTS_OFFSET, elements)?;
    thread.heap.set_field(obj, arguments::LENGTH_OFFSET, TaggedValue::int(argv.len() as i32))?;
    Ok(obj)
}

/// `argv`: `{restIndex, args...}`.
fn copy_rest_args(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let rest = &argv[1..];
    let start = (argv[0].as_int().max(0) as usize).min(rest.len());
    thread.new_js_array(&rest[start..])
}

// =============================================================================
// Miscellaneous
// =============================================================================

fn new_tagged_array(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    thread.new_tagged_array(argv[0].as_int().max(0) as u32, TaggedValue::UNDEFINED)
}

/// Reset the hotness counter of `func`'s method and make sure it has a
/// profile. Returns the profile.
fn update_hotness_counter(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let m = thread.function_method(argv[0])?;
    let threshold = thread.config.hotness_threshold as u16;
    thread.heap.write_u16(m.as_address() + method::HOTNESS_OFFSET, threshold)?;
    let profile = thread.heap.field(m, method::PROFILE_TYPE_INFO_OFFSET)?;
    if profile.is_heap_object() {
        return Ok(profile);
    }
    let profile = thread.new_tagged_array(PROFILE_SLOTS, TaggedValue::UNDEFINED)?;
    thread.heap.set_field(m, method::PROFILE_TYPE_INFO_OFFSET, profile)?;
    tracing::debug!(method = m.raw(), "profile type info created");
    Ok(profile)
}

fn profile_optimized_code(_: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    tracing::trace!(func = argv[0].raw(), bc_offset = argv[1].as_int(), "optimized code reached");
    Ok(TaggedValue::UNDEFINED)
}

/// `argv`: `{node, callback, thisArg, container, isSet}`.
fn container_rb_tree_for_each(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    thread.rb_tree_for_each(argv[0], argv[1], argv[2], argv[3], argv[4].is_true())
}

fn time_clip(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let Some(v) = operations::to_f64(thread, argv[0])? else {
        return Ok(TaggedValue::EXCEPTION);
    };
    Ok(TaggedValue::double(date::time_clip(v)))
}

fn set_date_values(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let mut fields = [0.0; 3];
    for (field, &arg) in fields.iter_mut().zip(argv) {
        match operations::to_f64(thread, arg)? {
            Some(v) => *field = v,
            None => return Ok(TaggedValue::EXCEPTION),
        }
    }
    Ok(TaggedValue::double(date::set_date_values(fields[0], fields[1], fields[2])))
}

/// `argv`: `{size}`; returns the raw address of uninitialized memory.
fn allocate_in_young(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let Ok(size) = u64::try_from(argv[0].as_int()) else {
        return Ok(thread.throw_range_error("negative allocation size"));
    };
    let address = thread.heap.allocate(size)?;
    Ok(TaggedValue::object(address))
}

fn get_typed_array_by_index(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let index = argv[1].as_int();
    if index < 0 || index as u32 >= thread.typed_array_length(argv[0])? {
        return Ok(TaggedValue::UNDEFINED);
    }
    thread.float32_array_get(argv[0], index as u32)
}

fn set_typed_array_by_index(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let index = argv[1].as_int();
    let Some(value) = operations::to_f64(thread, argv[2])? else {
        return Ok(TaggedValue::EXCEPTION);
    };
    if index >= 0 && (index as u32) < thread.typed_array_length(argv[0])? {
        thread.float32_array_set(argv[0], index as u32, value)?;
    }
    Ok(TaggedValue::TRUE)
}

fn debugger(_: &mut JsThread, _: &[TaggedValue]) -> KilnResult<TaggedValue> {
    Ok(TaggedValue::UNDEFINED)
}

// =============================================================================
// No-GC Stubs
// =============================================================================

fn arg_f64(args: &[u64], i: usize) -> f64 {
    f64::from_bits(args[i])
}

/// Floating remainder with the sign of the dividend.
fn float_mod(_: &JsThread, args: &[u64]) -> u64 {
    (arg_f64(args, 0) % arg_f64(args, 1)).to_bits()
}

fn float_sqrt(_: &JsThread, args: &[u64]) -> u64 {
    arg_f64(args, 0).sqrt().to_bits()
}

fn float_cos(_: &JsThread, args: &[u64]) -> u64 {
    arg_f64(args, 0).cos().to_bits()
}

fn float_sin(_: &JsThread, args: &[u64]) -> u64 {
    arg_f64(args, 0).sin().to_bits()
}

fn float_acos(_: &JsThread, args: &[u64]) -> u64 {
    arg_f64(args, 0).acos().to_bits()
}

fn float_atan(_: &JsThread, args: &[u64]) -> u64 {
    arg_f64(args, 0).atan().to_bits()
}

fn float_floor(_: &JsThread, args: &[u64]) -> u64 {
    arg_f64(args, 0).floor().to_bits()
}

/// `ToInt32` of a double, as a zero-extended word.
fn double_to_int(_: &JsThread, args: &[u64]) -> u64 {
    u64::from(operations::double_to_int32(arg_f64(args, 0)) as u32)
}

fn to_boolean(thread: &JsThread, args: &[u64]) -> u64 {
    u64::from(operations::to_boolean(thread, TaggedValue(args[0])))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_consistent() {
        for (i, &id) in RuntimeStubId::ALL.iter().enumerate() {
            assert_eq!(id as usize, i);
            assert_eq!(id.entry().is_some(), !id.is_no_gc(), "{}", id.name());
            assert_eq!(id.no_gc_entry().is_some(), id.is_no_gc(), "{}", id.name());
        }
    }

    #[test]
    fn test_arity_is_enforced() {
        let mut thread = JsThread::new().unwrap();
        let err = call_runtime(&mut thread, RuntimeStubId::Add2, &[TaggedValue::int(1)]).unwrap_err();
        assert!(matches!(err, KilnError::Verification(_)));
        assert!(call_runtime(&mut thread, RuntimeStubId::FloatMod, &[]).is_err());
    }

    #[test]
    fn test_add2_counts_calls() {
        let mut thread = JsThread::new().unwrap();
        let r = call_runtime(&mut thread, RuntimeStubId::Add2, &[TaggedValue::int(2), TaggedValue::int(3)]).unwrap();
        assert_eq!(r, TaggedValue::int(5));
        assert_eq!(thread.stub_count("Add2"), 1);
    }

    #[test]
    fn test_float_mod_no_gc() {
        let thread = JsThread::new().unwrap();
        let r = call_ngc_runtime(&thread, RuntimeStubId::FloatMod, &[(-7.5f64).to_bits(), 2.0f64.to_bits()]).unwrap();
        assert_eq!(f64::from_bits(r), -1.5);
        let b = call_ngc_runtime(&thread, RuntimeStubId::ToBoolean, &[TaggedValue::int(0).raw()]).unwrap();
        assert_eq!(b, 0);
    }

    #[test]
    fn test_throw_if_super_not_correct_call() {
        let mut thread = JsThread::new().unwrap();
        let ok = call_runtime(
            &mut thread,
            RuntimeStubId::ThrowIfSuperNotCorrectCall,
            &[TaggedValue::int(0), TaggedValue::int(1)],
        )
        .unwrap();
        assert_eq!(ok, TaggedValue::TRUE);
        let r = call_runtime(
            &mut thread,
            RuntimeStubId::ThrowIfSuperNotCorrectCall,
            &[TaggedValue::int(0), TaggedValue::HOLE],
        )
        .unwrap();
        assert!(r.is_exception());
    }

    #[test]
    fn test_module_vars() {
        let mut thread = JsThread::new().unwrap();
        call_runtime(&mut thread, RuntimeStubId::StModuleVar, &[TaggedValue::int(3), TaggedValue::int(9)]).unwrap();
        let v = call_runtime(&mut thread, RuntimeStubId::LdLocalModuleVar, &[TaggedValue::int(3)]).unwrap();
        assert_eq!(v, TaggedValue::int(9));
        let missing = call_runtime(&mut thread, RuntimeStubId::LdModuleVar, &[TaggedValue::int(7)]).unwrap();
        assert!(missing.is_undefined());
        let ext = call_runtime(&mut thread, RuntimeStubId::LdExternalModuleVar, &[TaggedValue::int(0)]).unwrap();
        assert!(ext.is_exception());
    }

    #[test]
    fn test_update_hotness_creates_profile() {
        let mut thread = JsThread::new().unwrap();
        let code = TaggedValue::int(0);
        let func = call_runtime(
            &mut thread,
            RuntimeStubId::DefineFunc,
            &[code, TaggedValue::int(FunctionKind::Normal as i32), TaggedValue::UNDEFINED],
        )
        .unwrap();
        let p1 = call_runtime(&mut thread, RuntimeStubId::UpdateHotnessCounter, &[func]).unwrap();
        let p2 = call_runtime(&mut thread, RuntimeStubId::UpdateHotnessCounter, &[func]).unwrap();
        assert_eq!(p1, p2);
        assert_eq!(thread.array_len(p1).unwrap(), PROFILE_SLOTS);
        let m = thread.function_method(func).unwrap();
        assert_eq!(thread.method_hotness(m).unwrap(), thread.config.hotness_threshold);
    }

    #[test]
    fn test_class_with_parent() {
        let mut thread = JsThread::new().unwrap();
        let literal = thread.new_tagged_array(0, TaggedValue::HOLE).unwrap();
        let base = call_runtime(
            &mut thread,
            RuntimeStubId::CreateClassWithBuffer,
            &[TaggedValue::int(1), literal, TaggedValue::HOLE, TaggedValue::UNDEFINED],
        )
        .unwrap();
        let derived = call_runtime(
            &mut thread,
            RuntimeStubId::CreateClassWithBuffer,
            &[TaggedValue::int(2), literal, base, TaggedValue::UNDEFINED],
        )
        .unwrap();
        assert!(thread.is_base_constructor(base).unwrap());
        assert!(!thread.is_base_constructor(derived).unwrap());
        assert_eq!(thread.prototype_of(derived).unwrap(), base);
        let bad = call_runtime(
            &mut thread,
            RuntimeStubId::CreateClassWithBuffer,
            &[TaggedValue::int(3), literal, TaggedValue::int(1), TaggedValue::UNDEFINED],
        )
        .unwrap();
        assert!(bad.is_exception());
    }

    #[test]
    fn test_generator_suspend_produces_iter_result() {
        let mut thread = JsThread::new().unwrap();
        let func = call_runtime(
            &mut thread,
            RuntimeStubId::DefineFunc,
            &[TaggedValue::int(0), TaggedValue::int(FunctionKind::Generator as i32), TaggedValue::UNDEFINED],
        )
        .unwrap();
        let gen = call_runtime(&mut thread, RuntimeStubId::CreateGeneratorObj, &[func]).unwrap();
        let r = call_runtime(&mut thread, RuntimeStubId::OptSuspendGenerator, &[gen, TaggedValue::int(4)]).unwrap();
        let value_key = thread.intern("value").unwrap();
        assert_eq!(thread.get_named(r, value_key).unwrap(), TaggedValue::int(4));
        let state = thread.heap.field(gen, generator_object::GENERATOR_STATE_OFFSET).unwrap();
        assert_eq!(state, TaggedValue::int(GeneratorState::SuspendedYield as i32));
    }

    #[test]
    fn test_rest_args() {
        let mut thread = JsThread::new().unwrap();
        let args = [TaggedValue::int(1), TaggedValue::int(10), TaggedValue::int(20), TaggedValue::int(30)];
        let rest = call_runtime(&mut thread, RuntimeStubId::CopyRestArgs, &args).unwrap();
        assert_eq!(thread.js_array_length(rest).unwrap(), 2);
        assert_eq!(thread.get_element(rest, 0).unwrap(), TaggedValue::int(20));
    }

    #[test]
    fn test_builtin_ids_reach_natives() {
        let thread = JsThread::new().unwrap();
        assert_eq!(thread.native_name(crate::builtins::BuiltinId::Substring as u32), Some("Substring"));
    }
}
