//! Object initializers and the constructor stubs built on them: `Boolean`,
//! `String`, `Date` and `Array`.
//!
//! Every initializer computes the exact byte size of its object, bump
//! allocates it and writes the header before anything else can allocate.

use kiln_core::value::TAGGED_SIZE;
use kiln_core::{KilnResult, TaggedValue};
use kiln_runtime::layout::{arguments, array, date, lexical_env, object, primitive_ref, tagged_array};
use kiln_runtime::{ConstantIndex, RuntimeStubId};

use super::builtins_string::string_length;
use super::{call_native_slow_path, StubEntry};
use crate::builder::CircuitBuilder;
use crate::call_signature::BUILTIN_STUB_ARGS;
use crate::ir::{Circuit, GateRef, MachineType};

// =============================================================================
// Object Initializers
// =============================================================================

/// Allocate an instance of a global class constant.
pub(crate) fn new_js_object(b: &mut CircuitBuilder<'_>, class: ConstantIndex) -> GateRef {
    let hclass = b.global_constant(class);
    let size = b.load_hclass_object_size(hclass);
    let size = b.zext_to_int64(size);
    b.new_object_with_hclass(hclass, size)
}

/// Tagged array of class `class` and constant length with every element
/// set to `fill`.
fn new_tagged_array(b: &mut CircuitBuilder<'_>, class: ConstantIndex, len: u32, fill: GateRef) -> GateRef {
    let size = b.int_ptr(tagged_array::DATA_OFFSET + u64::from(len) * TAGGED_SIZE);
    let arr = b.allocate_in_young(size);
    let hclass = b.global_constant(class);
    b.store_hclass(arr, hclass);
    let length = b.int32(len as i32);
    b.store_at(MachineType::I32, arr, tagged_array::LENGTH_OFFSET, length);
    let data = b.int_ptr(tagged_array::DATA_OFFSET);
    b.fill_tagged(arr, data, size, fill);
    arr
}

/// Tagged array holding exactly `values`.
fn tagged_array_of(b: &mut CircuitBuilder<'_>, values: &[GateRef]) -> GateRef {
    let size = b.int_ptr(tagged_array::DATA_OFFSET + values.len() as u64 * TAGGED_SIZE);
    let elements = b.allocate_in_young(size);
    let class = b.global_constant(ConstantIndex::TaggedArrayClass);
    b.store_hclass(elements, class);
    let len = b.int32(values.len() as i32);
    b.store_at(MachineType::I32, elements, tagged_array::LENGTH_OFFSET, len);
    for (index, &value) in values.iter().enumerate() {
        b.set_value_to_tagged_array_at(elements, index as u32, value);
    }
    elements
}

/// Lexical environment under `parent` with `num_vars` hole slots.
pub(crate) fn new_lexical_env(b: &mut CircuitBuilder<'_>, parent: GateRef, num_vars: u32) -> GateRef {
    let hole = b.hole();
    let len = num_vars + lexical_env::RESERVED_ENV_LENGTH;
    let env = new_tagged_array(b, ConstantIndex::LexicalEnvClass, len, hole);
    b.set_value_to_tagged_array_at(env, lexical_env::PARENT_ENV_INDEX, parent);
    let undefined = b.undefined();
    b.set_value_to_tagged_array_at(env, lexical_env::SCOPE_INFO_INDEX, undefined);
    env
}

/// Empty `JSArray`.
pub(crate) fn new_empty_array(b: &mut CircuitBuilder<'_>) -> GateRef {
    let arr = new_js_object(b, ConstantIndex::ArrayClass);
    let zero = b.int64(0);
    b.store_at(MachineType::I64, arr, array::LENGTH_OFFSET, zero);
    arr
}

/// `JSArray` over an existing elements array; `length` is I32.
pub(crate) fn new_js_array_literal(b: &mut CircuitBuilder<'_>, elements: GateRef, length: GateRef) -> GateRef {
    let arr = new_empty_array(b);
    b.store_field(arr, object::ELEMENTS_OFFSET, elements);
    b.store_at(MachineType::I32, arr, array::LENGTH_OFFSET, length);
    arr
}

/// `JSArray` holding exactly `values`.
fn array_of(b: &mut CircuitBuilder<'_>, values: &[GateRef]) -> GateRef {
    let elements = tagged_array_of(b, values);
    let len = b.int32(values.len() as i32);
    new_js_array_literal(b, elements, len)
}

/// Unmapped `arguments` object holding `values`.
pub(crate) fn new_arguments_obj(b: &mut CircuitBuilder<'_>, values: &[GateRef]) -> GateRef {
    let obj = new_js_object(b, ConstantIndex::ArgumentsClass);
    let elements = tagged_array_of(b, values);
    b.store_field(obj, object::ELEMENTS_OFFSET, elements);
    let length = b.tagged_int(values.len() as i32);
    b.store_field(obj, arguments::LENGTH_OFFSET, length);
    obj
}

/// Primitive wrapper object around `value`.
pub(crate) fn new_primitive_ref(b: &mut CircuitBuilder<'_>, value: GateRef) -> GateRef {
    let wrapper = new_js_object(b, ConstantIndex::PrimitiveRefClass);
    b.store_field(wrapper, primitive_ref::VALUE_OFFSET, value);
    wrapper
}

/// `String` wrapper object around the string `value`, with `length` filled
/// in from the string header.
pub(crate) fn alloc_string_object(b: &mut CircuitBuilder<'_>, value: GateRef) -> GateRef {
    let wrapper = new_js_object(b, ConstantIndex::StringObjectClass);
    b.store_field(wrapper, primitive_ref::VALUE_OFFSET, value);
    let length = string_length(b, value);
    let length = b.int32_to_tagged(length);
    b.store_field(wrapper, primitive_ref::LENGTH_OFFSET, length);
    wrapper
}

// =============================================================================
// Constructor Stubs
// =============================================================================

/// `Boolean(value)` and `new Boolean(value)`.
pub(super) fn boolean_constructor(circuit: &mut Circuit) -> KilnResult<()> {
    let entry = StubEntry::of(circuit);
    let mut b = CircuitBuilder::new(circuit);
    let truthy = b.call_ngc_runtime(RuntimeStubId::ToBoolean, &[entry.args[0]]);
    let value = b.boolean_to_tagged(truthy);
    let call = b.new_label();
    let construct = b.new_label();
    let plain_call = b.tagged_is_undefined(entry.new_target);
    b.branch(plain_call, call, construct);
    b.bind(call);
    b.return_(value);
    b.bind(construct);
    let wrapper = new_primitive_ref(&mut b, value);
    b.return_(wrapper);
    Ok(())
}

/// `String(value)` and `new String(value)` when `value` is already a string
/// or absent; any other argument needs `ToString` in the native body.
pub(super) fn string_constructor(circuit: &mut Circuit) -> KilnResult<()> {
    let entry = StubEntry::of(circuit);
    let mut b = CircuitBuilder::new(circuit);
    let slow = b.new_label();
    let some = b.new_label();
    let have_value = b.new_label();
    let empty = b.global_constant(ConstantIndex::EmptyString);

    let zero = b.int32(0);
    let no_args = b.int32_equal(entry.num_args, zero);
    b.branch(no_args, have_value, some);
    b.bind(some);
    let is_string = b.tagged_is_string(entry.args[0]);
    b.branch(is_string, have_value, slow);

    b.bind(have_value);
    let value = b.select(no_args, empty, entry.args[0]);
    let call = b.new_label();
    let construct = b.new_label();
    let plain_call = b.tagged_is_undefined(entry.new_target);
    b.branch(plain_call, call, construct);
    b.bind(call);
    b.return_(value);
    b.bind(construct);
    let wrapper = alloc_string_object(&mut b, value);
    b.return_(wrapper);

    b.bind(slow);
    let result = call_native_slow_path(&mut b, &entry);
    b.return_(result);
    Ok(())
}

/// `new Date(time)` for a single number argument.
///
/// Calls without `new`, without arguments, with a string or with date
/// fields go to the native body.
pub(super) fn date_constructor(circuit: &mut Circuit) -> KilnResult<()> {
    let entry = StubEntry::of(circuit);
    let mut b = CircuitBuilder::new(circuit);
    let slow = b.new_label();
    let constructing = b.new_label();
    let one_arg = b.new_label();
    let fast = b.new_label();
    let plain_call = b.tagged_is_undefined(entry.new_target);
    b.branch(plain_call, slow, constructing);
    b.bind(constructing);
    let one = b.int32(1);
    let single = b.int32_equal(entry.num_args, one);
    b.branch(single, one_arg, slow);
    b.bind(one_arg);
    let is_number = b.tagged_is_number(entry.args[0]);
    b.branch(is_number, fast, slow);

    b.bind(fast);
    let time = b.call_runtime(RuntimeStubId::TimeClip, &[entry.args[0]]);
    let obj = new_js_object(&mut b, ConstantIndex::DateClass);
    b.store_field(obj, date::TIME_VALUE_OFFSET, time);
    let zero = b.tagged(TaggedValue::double(0.0));
    b.store_field(obj, date::LOCAL_OFFSET_OFFSET, zero);
    b.return_(obj);

    b.bind(slow);
    let result = call_native_slow_path(&mut b, &entry);
    b.return_(result);
    Ok(())
}

/// `Array(...)` and `new Array(...)`.
///
/// A single int argument is a length; a single double is left to the
/// native body, which also raises the `RangeError` for invalid lengths.
pub(super) fn array_constructor(circuit: &mut Circuit) -> KilnResult<()> {
    let entry = StubEntry::of(circuit);
    let mut b = CircuitBuilder::new(circuit);
    let slow = b.new_label();

    let empty = b.new_label();
    let some = b.new_label();
    let zero = b.int32(0);
    let no_args = b.int32_equal(entry.num_args, zero);
    b.branch(no_args, empty, some);
    b.bind(empty);
    let arr = new_empty_array(&mut b);
    b.return_(arr);

    b.bind(some);
    let one = b.int32(1);
    let single = b.new_label();
    let several = b.new_label();
    let is_single = b.int32_equal(entry.num_args, one);
    b.branch(is_single, single, several);

    b.bind(single);
    let length = b.new_label();
    let not_int = b.new_label();
    let element = b.new_label();
    let is_int = b.tagged_is_int(entry.args[0]);
    b.branch(is_int, length, not_int);
    b.bind(not_int);
    let is_number = b.tagged_is_number(entry.args[0]);
    b.branch(is_number, slow, element);

    b.bind(length);
    let len = b.get_int32_of_tint(entry.args[0]);
    let valid = b.new_label();
    let negative = b.int32_less_than(len, zero);
    b.branch(negative, slow, valid);
    b.bind(valid);
    let arr = new_empty_array(&mut b);
    b.store_at(MachineType::I32, arr, array::LENGTH_OFFSET, len);
    b.return_(arr);

    b.bind(element);
    let arr = array_of(&mut b, &entry.args[..1]);
    b.return_(arr);

    b.bind(several);
    for count in 2..=BUILTIN_STUB_ARGS {
        let matched = b.new_label();
        let next = b.new_label();
        let expected = b.int32(count as i32);
        let is_count = b.int32_equal(entry.num_args, expected);
        b.branch(is_count, matched, next);
        b.bind(matched);
        let arr = array_of(&mut b, &entry.args[..count]);
        b.return_(arr);
        b.bind(next);
    }
    b.jump(slow);

    b.bind(slow);
    let result = call_native_slow_path(&mut b, &entry);
    b.return_(result);
    Ok(())
}
