//! Generic ECMAScript operations on tagged values.
//!
//! These are the reference semantics: runtime stubs, builtin slow paths and the
//! generic interpretation of bytecode gates all funnel through here. Every
//! function returns `Ok(TaggedValue::EXCEPTION)` when the program throws and
//! `Err` only for faults of the simulated machine.

use kiln_core::value::TaggedValue;
use kiln_core::KilnResult;

use crate::containers::ContainerKind;
use crate::heap::{ConstantIndex, GlobalEnvField};
use crate::layout::{date, primitive_ref, proxy, JsType};
use crate::object::{PropertyKey, MAX_ARRAY_INDEX};
use crate::thread::JsThread;

macro_rules! try_value {
    ($e:expr) => {{
        let v = $e;
        if v.is_exception() {
            return Ok(TaggedValue::EXCEPTION);
        }
        v
    }};
}

pub(crate) use try_value;

// =============================================================================
// Conversions
// =============================================================================

/// `ToBoolean`.
#[must_use]
pub fn to_boolean(thread: &JsThread, value: TaggedValue) -> bool {
    if value.is_boolean() {
        return value.is_true();
    }
    if value.is_int() {
        return value.as_int() != 0;
    }
    if value.is_double() {
        let d = value.as_double();
        return !(d == 0.0 || d.is_nan());
    }
    if value.is_heap_object() {
        if thread.is_string(value) {
            return thread.string_length(value).map_or(false, |len| len != 0);
        }
        return true;
    }
    false
}

/// Render a number the way `Number.prototype.toString()` does.
#[must_use]
pub fn number_to_string(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_owned();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_owned();
    }
    if value == 0.0 {
        return "0".to_owned();
    }
    let magnitude = value.abs();
    if magnitude >= 1e21 || magnitude < 1e-6 {
        let text = format!("{value:e}");
        return match text.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
            _ => text,
        };
    }
    if value.fract() == 0.0 {
        return format!("{value:.0}");
    }
    format!("{value}")
}

/// `StringToNumber`.
#[must_use]
pub fn string_to_number(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    for (prefix, radix) in [("0x", 16), ("0X", 16), ("0o", 8), ("0O", 8), ("0b", 2), ("0B", 2)] {
        if let Some(digits) = trimmed.strip_prefix(prefix) {
            return u64::from_str_radix(digits, radix).map_or(f64::NAN, |v| v as f64);
        }
    }
    if !trimmed
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
    {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

/// `ToPrimitive` with the default hint.
///
/// # Errors
///
/// Fails if an object in the conversion is not mapped.
pub fn to_primitive(thread: &mut JsThread, value: TaggedValue) -> KilnResult<TaggedValue> {
    if !thread.is_ecma_object(value) {
        return Ok(value);
    }
    match thread.object_type(value) {
        Some(JsType::JsPrimitiveRef) => thread.heap.field(value, primitive_ref::VALUE_OFFSET),
        Some(JsType::JsDate) => thread.heap.field(value, date::TIME_VALUE_OFFSET),
        Some(JsType::JsArray) => {
            let len = thread.js_array_length(value)?;
            let mut parts = Vec::with_capacity(len as usize);
            for i in 0..len {
                let element = thread.get_element(value, i)?;
                if element.is_undefined_or_null() {
                    parts.push(String::new());
                } else {
                    let s = try_value!(to_string(thread, element)?);
                    parts.push(thread.string_to_rust(s)?);
                }
            }
            thread.new_string(&parts.join(","))
        }
        Some(JsType::JsFunction) => thread.new_string("function () { [native code] }"),
        Some(JsType::JsError) => {
            let name_key = thread.constant(ConstantIndex::NameString)?;
            let message_key = thread.constant(ConstantIndex::MessageString)?;
            let name = try_value!(thread.get_named(value, name_key)?);
            let message = try_value!(thread.get_named(value, message_key)?);
            let name = try_value!(to_string(thread, name)?);
            let message = try_value!(to_string(thread, message)?);
            let text = format!("{}: {}", thread.string_to_rust(name)?, thread.string_to_rust(message)?);
            thread.new_string(&text)
        }
        _ => thread.new_string("[object Object]"),
    }
}

/// `ToNumber`; no BigInt, so this is also `ToNumeric`.
///
/// # Errors
///
/// Fails if an object in the conversion is not mapped.
pub fn to_number(thread: &mut JsThread, value: TaggedValue) -> KilnResult<TaggedValue> {
    if value.is_number() {
        return Ok(value);
    }
    if value.is_undefined() || value.is_hole() {
        return Ok(TaggedValue::double(f64::NAN));
    }
    if value.is_null() || value.is_false() {
        return Ok(TaggedValue::int(0));
    }
    if value.is_true() {
        return Ok(TaggedValue::int(1));
    }
    if thread.is_string(value) {
        let text = thread.string_to_rust(value)?;
        return Ok(TaggedValue::number(string_to_number(&text)));
    }
    if thread.is_ecma_object(value) {
        let primitive = try_value!(to_primitive(thread, value)?);
        return to_number(thread, primitive);
    }
    Ok(thread.throw_type_error("cannot convert value to a number"))
}

/// `ToNumber` as a host `f64`, or `None` when the conversion threw.
///
/// # Errors
///
/// Fails if an object in the conversion is not mapped.
pub fn to_f64(thread: &mut JsThread, value: TaggedValue) -> KilnResult<Option<f64>> {
    let number = to_number(thread, value)?;
    Ok(if number.is_exception() { None } else { Some(number.as_number()) })
}

/// `ToInt32` of a number.
#[must_use]
pub fn double_to_int32(value: f64) -> i32 {
    if !value.is_finite() {
        return 0;
    }
    let truncated = value.trunc();
    let modulo = truncated.rem_euclid(4_294_967_296.0);
    (modulo as u64 as u32) as i32
}

/// `ToString`.
///
/// # Errors
///
/// Fails if an object in the conversion is not mapped.
pub fn to_string(thread: &mut JsThread, value: TaggedValue) -> KilnResult<TaggedValue> {
    if thread.is_string(value) {
        return Ok(value);
    }
    let text = if value.is_int() {
        value.as_int().to_string()
    } else if value.is_double() {
        number_to_string(value.as_double())
    } else if value.is_undefined() || value.is_hole() {
        "undefined".to_owned()
    } else if value.is_null() {
        "null".to_owned()
    } else if value.is_boolean() {
        if value.is_true() { "true" } else { "false" }.to_owned()
    } else if thread.is_ecma_object(value) {
        let primitive = try_value!(to_primitive(thread, value)?);
        return to_string(thread, primitive);
    } else {
        return Ok(thread.throw_type_error("cannot convert value to a string"));
    };
    thread.new_string(&text)
}

/// `ToObject` for receivers: throws on `undefined`/`null`.
pub fn require_object_coercible(thread: &mut JsThread, value: TaggedValue) -> TaggedValue {
    if value.is_undefined_or_null() || value.is_hole() {
        return thread.throw_type_error("cannot convert undefined or null to object");
    }
    value
}

/// The `typeof` string.
#[must_use]
pub fn type_of(thread: &JsThread, value: TaggedValue) -> &'static str {
    if value.is_number() {
        "number"
    } else if value.is_boolean() {
        "boolean"
    } else if value.is_null() {
        "object"
    } else if value.is_undefined() || value.is_hole() {
        "undefined"
    } else if thread.is_string(value) {
        "string"
    } else if thread.is_callable(value) {
        "function"
    } else {
        "object"
    }
}

// =============================================================================
// Arithmetic
// =============================================================================

fn numeric_pair(thread: &mut JsThread, left: TaggedValue, right: TaggedValue) -> KilnResult<Option<(f64, f64)>> {
    let Some(l) = to_f64(thread, left)? else {
        return Ok(None);
    };
    let Some(r) = to_f64(thread, right)? else {
        return Ok(None);
    };
    Ok(Some((l, r)))
}

macro_rules! numeric_binary {
    ($(#[$doc:meta] $name:ident => |$l:ident, $r:ident| $body:expr;)*) => {
        $(
            #[$doc]
            ///
            /// # Errors
            ///
            /// Fails if an operand conversion faults.
            pub fn $name(thread: &mut JsThread, left: TaggedValue, right: TaggedValue) -> KilnResult<TaggedValue> {
                match numeric_pair(thread, left, right)? {
                    Some(($l, $r)) => Ok(TaggedValue::number($body)),
                    None => Ok(TaggedValue::EXCEPTION),
                }
            }
        )*
    };
}

numeric_binary! {
    /// `left - right`.
    sub => |l, r| l - r;
    /// `left * right`.
    mul => |l, r| l * r;
    /// `left / right`.
    div => |l, r| l / r;
    /// `left % right` (truncating, sign of the dividend).
    modulo => |l, r| l % r;
    /// `left ** right`.
    exp => |l, r| if r.is_nan() || (l.abs() == 1.0 && r.is_infinite()) { f64::NAN } else { l.powf(r) };
}

macro_rules! int_binary {
    ($(#[$doc:meta] $name:ident => |$l:ident, $r:ident| $body:expr;)*) => {
        $(
            #[$doc]
            ///
            /// # Errors
            ///
            /// Fails if an operand conversion faults.
            pub fn $name(thread: &mut JsThread, left: TaggedValue, right: TaggedValue) -> KilnResult<TaggedValue> {
                match numeric_pair(thread, left, right)? {
                    Some((a, b)) => {
                        let $l = double_to_int32(a);
                        let $r = double_to_int32(b);
                        Ok($body)
                    }
                    None => Ok(TaggedValue::EXCEPTION),
                }
            }
        )*
    };
}

int_binary! {
    /// `left << right`.
    shl => |l, r| TaggedValue::int(l.wrapping_shl((r as u32) & 0x1f));
    /// `left >>> right`.
    shr => |l, r| TaggedValue::number(f64::from((l as u32) >> ((r as u32) & 0x1f)));
    /// `left >> right`.
    ashr => |l, r| TaggedValue::int(l >> ((r as u32) & 0x1f));
    /// `left & right`.
    and => |l, r| TaggedValue::int(l & r);
    /// `left | right`.
    or => |l, r| TaggedValue::int(l | r);
    /// `left ^ right`.
    xor => |l, r| TaggedValue::int(l ^ r);
}

/// `left + right`, concatenating when either primitive is a string.
///
/// # Errors
///
/// Fails if an operand conversion faults.
pub fn add(thread: &mut JsThread, left: TaggedValue, right: TaggedValue) -> KilnResult<TaggedValue> {
    if left.is_int() && right.is_int() {
        return Ok(TaggedValue::number(f64::from(left.as_int()) + f64::from(right.as_int())));
    }
    let l = try_value!(to_primitive(thread, left)?);
    let r = try_value!(to_primitive(thread, right)?);
    if thread.is_string(l) || thread.is_string(r) {
        let ls = try_value!(to_string(thread, l)?);
        let rs = try_value!(to_string(thread, r)?);
        return thread.concat_strings(ls, rs);
    }
    match numeric_pair(thread, l, r)? {
        Some((a, b)) => Ok(TaggedValue::number(a + b)),
        None => Ok(TaggedValue::EXCEPTION),
    }
}

fn unary_number(thread: &mut JsThread, value: TaggedValue, f: impl FnOnce(f64) -> f64) -> KilnResult<TaggedValue> {
    match to_f64(thread, value)? {
        Some(v) => Ok(TaggedValue::number(f(v))),
        None => Ok(TaggedValue::EXCEPTION),
    }
}

/// `value + 1`.
///
/// # Errors
///
/// Fails if the conversion faults.
pub fn inc(thread: &mut JsThread, value: TaggedValue) -> KilnResult<TaggedValue> {
    unary_number(thread, value, |v| v + 1.0)
}

/// `value - 1`.
///
/// # Errors
///
/// Fails if the conversion faults.
pub fn dec(thread: &mut JsThread, value: TaggedValue) -> KilnResult<TaggedValue> {
    unary_number(thread, value, |v| v - 1.0)
}

/// `-value`.
///
/// # Errors
///
/// Fails if the conversion faults.
pub fn neg(thread: &mut JsThread, value: TaggedValue) -> KilnResult<TaggedValue> {
    if value.is_int() && value.as_int() != 0 && value.as_int() != i32::MIN {
        return Ok(TaggedValue::int(-value.as_int()));
    }
    unary_number(thread, value, |v| -v)
}

/// `~value`.
///
/// # Errors
///
/// Fails if the conversion faults.
pub fn not(thread: &mut JsThread, value: TaggedValue) -> KilnResult<TaggedValue> {
    match to_f64(thread, value)? {
        Some(v) => Ok(TaggedValue::int(!double_to_int32(v))),
        None => Ok(TaggedValue::EXCEPTION),
    }
}

// =============================================================================
// Comparison
// =============================================================================

/// `left === right`.
///
/// # Errors
///
/// Fails if a string operand is not mapped.
pub fn strict_equal(thread: &JsThread, left: TaggedValue, right: TaggedValue) -> KilnResult<bool> {
    if left.is_number() && right.is_number() {
        return Ok(left.as_number() == right.as_number());
    }
    if left == right {
        return Ok(true);
    }
    if thread.is_string(left) && thread.is_string(right) {
        return thread.string_equal(left, right);
    }
    Ok(false)
}

/// `left == right`.
///
/// # Errors
///
/// Fails if an operand conversion faults.
pub fn loose_equal(thread: &mut JsThread, left: TaggedValue, right: TaggedValue) -> KilnResult<TaggedValue> {
    if left.is_undefined_or_null() && right.is_undefined_or_null() {
        return Ok(TaggedValue::TRUE);
    }
    if left.is_undefined_or_null() || right.is_undefined_or_null() {
        return Ok(TaggedValue::FALSE);
    }
    let left_object = thread.is_ecma_object(left);
    let right_object = thread.is_ecma_object(right);
    if left_object && right_object {
        return Ok(TaggedValue::boolean(left == right));
    }
    let l = if left_object { try_value!(to_primitive(thread, left)?) } else { left };
    let r = if right_object { try_value!(to_primitive(thread, right)?) } else { right };
    if thread.is_string(l) && thread.is_string(r) {
        return Ok(TaggedValue::boolean(thread.string_equal(l, r)?));
    }
    match numeric_pair(thread, l, r)? {
        Some((a, b)) => Ok(TaggedValue::boolean(a == b)),
        None => Ok(TaggedValue::EXCEPTION),
    }
}

/// Abstract relational comparison: `Some(left < right)`, `None` for undefined
/// (NaN involved), or the exception sentinel.
fn less_than(thread: &mut JsThread, left: TaggedValue, right: TaggedValue) -> KilnResult<Result<Option<bool>, TaggedValue>> {
    let l = to_primitive(thread, left)?;
    if l.is_exception() {
        return Ok(Err(l));
    }
    let r = to_primitive(thread, right)?;
    if r.is_exception() {
        return Ok(Err(r));
    }
    if thread.is_string(l) && thread.is_string(r) {
        return Ok(Ok(Some(thread.string_units(l)? < thread.string_units(r)?)));
    }
    match numeric_pair(thread, l, r)? {
        Some((a, b)) if a.is_nan() || b.is_nan() => Ok(Ok(None)),
        Some((a, b)) => Ok(Ok(Some(a < b))),
        None => Ok(Err(TaggedValue::EXCEPTION)),
    }
}

/// `left < right`.
///
/// # Errors
///
/// Fails if an operand conversion faults.
pub fn less(thread: &mut JsThread, left: TaggedValue, right: TaggedValue) -> KilnResult<TaggedValue> {
    Ok(match less_than(thread, left, right)? {
        Ok(r) => TaggedValue::boolean(r == Some(true)),
        Err(e) => e,
    })
}

/// `left <= right`.
///
/// # Errors
///
/// Fails if an operand conversion faults.
pub fn less_eq(thread: &mut JsThread, left: TaggedValue, right: TaggedValue) -> KilnResult<TaggedValue> {
    Ok(match less_than(thread, right, left)? {
        Ok(r) => TaggedValue::boolean(r == Some(false)),
        Err(e) => e,
    })
}

/// `left > right`.
///
/// # Errors
///
/// Fails if an operand conversion faults.
pub fn greater(thread: &mut JsThread, left: TaggedValue, right: TaggedValue) -> KilnResult<TaggedValue> {
    less(thread, right, left)
}

/// `left >= right`.
///
/// # Errors
///
/// Fails if an operand conversion faults.
pub fn greater_eq(thread: &mut JsThread, left: TaggedValue, right: TaggedValue) -> KilnResult<TaggedValue> {
    less_eq(thread, right, left)
}

/// `object instanceof target`.
///
/// # Errors
///
/// Fails if an object in the prototype chain is not mapped.
pub fn instance_of(thread: &mut JsThread, object: TaggedValue, target: TaggedValue) -> KilnResult<TaggedValue> {
    if !thread.is_callable(target) {
        return Ok(thread.throw_type_error("right-hand side of instanceof is not callable"));
    }
    if !thread.is_ecma_object(object) {
        return Ok(TaggedValue::FALSE);
    }
    let proto = thread.function_prototype(target)?;
    let mut current = thread.prototype_of(object)?;
    while current.is_heap_object() {
        if current == proto {
            return Ok(TaggedValue::TRUE);
        }
        current = thread.prototype_of(current)?;
    }
    Ok(TaggedValue::FALSE)
}

/// `key in object`.
///
/// # Errors
///
/// Fails if an object in the prototype chain is not mapped.
pub fn has_property(thread: &mut JsThread, key: TaggedValue, object: TaggedValue) -> KilnResult<TaggedValue> {
    if !thread.is_ecma_object(object) {
        return Ok(thread.throw_type_error("cannot use 'in' operator on a non-object"));
    }
    let key = match property_key(thread, key)? {
        Some(k) => k,
        None => return Ok(TaggedValue::EXCEPTION),
    };
    let mut current = object;
    while current.is_heap_object() {
        let found = match key {
            PropertyKey::Index(i) => !thread.get_element(current, i)?.is_undefined(),
            PropertyKey::Named(name) => thread.get_own_named(current, name)?.is_some(),
        };
        if found {
            return Ok(TaggedValue::TRUE);
        }
        current = thread.prototype_of(current)?;
    }
    Ok(TaggedValue::FALSE)
}

// =============================================================================
// Property Access
// =============================================================================

/// Normalize a key; `None` when its string conversion threw.
///
/// # Errors
///
/// Fails if a key object is not mapped.
pub fn property_key(thread: &mut JsThread, key: TaggedValue) -> KilnResult<Option<PropertyKey>> {
    if key.is_int() && key.as_int() >= 0 {
        return Ok(Some(PropertyKey::Index(key.as_int() as u32)));
    }
    if key.is_double() {
        let d = key.as_double();
        if d >= 0.0 && d.fract() == 0.0 && d <= f64::from(MAX_ARRAY_INDEX) {
            return Ok(Some(PropertyKey::Index(d as u32)));
        }
    }
    let s = to_string(thread, key)?;
    if s.is_exception() {
        return Ok(None);
    }
    let text = thread.string_to_rust(s)?;
    if let Ok(index) = text.parse::<u32>() {
        if index <= MAX_ARRAY_INDEX && index.to_string() == text {
            return Ok(Some(PropertyKey::Index(index)));
        }
    }
    Ok(Some(PropertyKey::Named(thread.intern(&text)?)))
}

/// `receiver[key]`.
///
/// # Errors
///
/// Fails if an object in the lookup is not mapped.
pub fn get_property(thread: &mut JsThread, receiver: TaggedValue, key: TaggedValue) -> KilnResult<TaggedValue> {
    let receiver = try_value!(require_object_coercible(thread, receiver));
    let Some(key) = property_key(thread, key)? else {
        return Ok(TaggedValue::EXCEPTION);
    };
    get_property_by_key(thread, receiver, key)
}

/// `receiver[key]` with a normalized key.
///
/// # Errors
///
/// Fails if an object in the lookup is not mapped.
pub fn get_property_by_key(thread: &mut JsThread, receiver: TaggedValue, key: PropertyKey) -> KilnResult<TaggedValue> {
    if receiver.is_undefined_or_null() || receiver.is_hole() {
        return Ok(thread.throw_type_error("cannot read properties of undefined or null"));
    }
    let length_key = thread.constant(ConstantIndex::LengthString)?;
    if thread.is_string(receiver) {
        match key {
            PropertyKey::Named(name) if name == length_key => {
                return Ok(TaggedValue::int(thread.string_length(receiver)? as i32));
            }
            PropertyKey::Index(i) => {
                if i < thread.string_length(receiver)? {
                    let unit = thread.code_unit_at(receiver, i)?;
                    return thread.new_string_from_utf16(&[unit]);
                }
                return Ok(TaggedValue::UNDEFINED);
            }
            PropertyKey::Named(name) => {
                let proto = thread.global_env_field(GlobalEnvField::StringPrototype)?;
                return thread.get_named(proto, name);
            }
        }
    }
    if !receiver.is_heap_object() {
        let proto = if receiver.is_boolean() {
            thread.global_env_field(GlobalEnvField::BooleanPrototype)?
        } else {
            thread.global_env_field(GlobalEnvField::ObjectPrototype)?
        };
        return match key {
            PropertyKey::Named(name) => thread.get_named(proto, name),
            PropertyKey::Index(_) => Ok(TaggedValue::UNDEFINED),
        };
    }
    match thread.object_type(receiver) {
        Some(JsType::JsProxy) => {
            let target = thread.heap.field(receiver, proxy::TARGET_OFFSET)?;
            return get_property_by_key(thread, target, key);
        }
        Some(JsType::JsArray) => {
            if key == PropertyKey::Named(length_key) {
                return Ok(TaggedValue::number(f64::from(thread.js_array_length(receiver)?)));
            }
        }
        Some(JsType::JsFloat32Array) => {
            if key == PropertyKey::Named(length_key) {
                return Ok(TaggedValue::int(thread.typed_array_length(receiver)? as i32));
            }
        }
        Some(JsType::JsFunction) => {
            let prototype_key = thread.constant(ConstantIndex::PrototypeString)?;
            if key == PropertyKey::Named(prototype_key) && thread.is_constructor(receiver) {
                return thread.function_prototype(receiver);
            }
        }
        Some(ty) if ty.is_container() => {
            if key == PropertyKey::Named(length_key) {
                if let Some(kind) = ContainerKind::from_js_type(ty) {
                    return Ok(TaggedValue::int(thread.container_len(receiver, kind)? as i32));
                }
            }
            if let PropertyKey::Index(i) = key {
                if let Some(kind @ (ContainerKind::ArrayList | ContainerKind::Vector)) = ContainerKind::from_js_type(ty) {
                    if i < thread.container_size(receiver, kind)? {
                        return thread.container_get(receiver, kind, i);
                    }
                    return Ok(TaggedValue::UNDEFINED);
                }
            }
        }
        _ => {}
    }
    match key {
        PropertyKey::Index(i) => thread.get_element(receiver, i),
        PropertyKey::Named(name) => thread.get_named(receiver, name),
    }
}

/// `receiver[key] = value`.
///
/// # Errors
///
/// Fails if an object in the store is not mapped.
pub fn set_property(thread: &mut JsThread, receiver: TaggedValue, key: TaggedValue, value: TaggedValue) -> KilnResult<TaggedValue> {
    let receiver = try_value!(require_object_coercible(thread, receiver));
    let Some(key) = property_key(thread, key)? else {
        return Ok(TaggedValue::EXCEPTION);
    };
    set_property_by_key(thread, receiver, key, value)
}

/// `receiver[key] = value` with a normalized key.
///
/// # Errors
///
/// Fails if an object in the store is not mapped.
pub fn set_property_by_key(
    thread: &mut JsThread,
    receiver: TaggedValue,
    key: PropertyKey,
    value: TaggedValue,
) -> KilnResult<TaggedValue> {
    if receiver.is_undefined_or_null() || receiver.is_hole() {
        return Ok(thread.throw_type_error("cannot set properties of undefined or null"));
    }
    if !thread.is_ecma_object(receiver) {
        // Stores to primitives are silently dropped in sloppy code.
        return Ok(TaggedValue::TRUE);
    }
    let length_key = thread.constant(ConstantIndex::LengthString)?;
    match thread.object_type(receiver) {
        Some(JsType::JsProxy) => {
            let target = thread.heap.field(receiver, proxy::TARGET_OFFSET)?;
            return set_property_by_key(thread, target, key, value);
        }
        Some(JsType::JsArray) if key == PropertyKey::Named(length_key) => {
            let Some(len) = to_f64(thread, value)? else {
                return Ok(TaggedValue::EXCEPTION);
            };
            if len < 0.0 || len.fract() != 0.0 || len > f64::from(u32::MAX) {
                return Ok(thread.throw_range_error("invalid array length"));
            }
            thread.set_js_array_length(receiver, len as u32)?;
            return Ok(TaggedValue::TRUE);
        }
        Some(JsType::JsFunction) => {
            let prototype_key = thread.constant(ConstantIndex::PrototypeString)?;
            if key == PropertyKey::Named(prototype_key) && thread.is_constructor(receiver) {
                thread.set_function_prototype(receiver, value)?;
                return Ok(TaggedValue::TRUE);
            }
        }
        _ => {}
    }
    match key {
        PropertyKey::Index(i) => thread.set_element(receiver, i, value),
        PropertyKey::Named(name) => thread.set_named(receiver, name, value),
    }
}

/// `delete receiver[key]`.
///
/// # Errors
///
/// Fails if `receiver` is not mapped.
pub fn delete_property(thread: &mut JsThread, receiver: TaggedValue, key: TaggedValue) -> KilnResult<TaggedValue> {
    let receiver = try_value!(require_object_coercible(thread, receiver));
    if !thread.is_ecma_object(receiver) {
        return Ok(TaggedValue::TRUE);
    }
    let Some(key) = property_key(thread, key)? else {
        return Ok(TaggedValue::EXCEPTION);
    };
    let deleted = match key {
        PropertyKey::Index(i) => thread.delete_element(receiver, i)?,
        PropertyKey::Named(name) => thread.delete_named(receiver, name)?,
    };
    Ok(TaggedValue::boolean(deleted))
}

/// Read a global binding; a missing name is a `ReferenceError`.
///
/// # Errors
///
/// Fails if the global object is not mapped.
pub fn try_load_global(thread: &mut JsThread, name: TaggedValue) -> KilnResult<TaggedValue> {
    let global = thread.global_object()?;
    let key = thread.intern_string(name)?;
    let mut current = global;
    while current.is_heap_object() {
        if thread.get_own_named(current, key)?.is_some() {
            return thread.get_named(global, key);
        }
        current = thread.prototype_of(current)?;
    }
    let text = thread.string_to_rust(name)?;
    Ok(thread.throw_error("ReferenceError", &format!("{text} is not defined")))
}

/// Store a global binding.
///
/// # Errors
///
/// Fails if the global object is not mapped.
pub fn store_global(thread: &mut JsThread, name: TaggedValue, value: TaggedValue) -> KilnResult<TaggedValue> {
    let global = thread.global_object()?;
    let key = thread.intern_string(name)?;
    thread.set_named(global, key, value)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_number_to_string() {
        assert_eq!(number_to_string(1.0), "1");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(1.5), "1.5");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(number_to_string(1e21), "1e+21");
        assert_eq!(number_to_string(1e-7), "1e-7");
    }

    #[test]
    fn test_string_to_number() {
        assert_eq!(string_to_number("  42 "), 42.0);
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("0x1F"), 31.0);
        assert!(string_to_number("inf").is_nan());
        assert!(string_to_number("12px").is_nan());
        assert_eq!(string_to_number("-Infinity"), f64::NEG_INFINITY);
    }

    #[test]
    fn test_add_concatenates_strings() {
        let mut thread = JsThread::new().unwrap();
        let s = thread.new_string("a").unwrap();
        let r = add(&mut thread, s, TaggedValue::int(1)).unwrap();
        assert_eq!(thread.string_to_rust(r).unwrap(), "a1");
        let n = add(&mut thread, TaggedValue::int(i32::MAX), TaggedValue::int(1)).unwrap();
        assert_eq!(n, TaggedValue::double(2_147_483_648.0));
    }

    #[test]
    fn test_modulo_edge_cases() {
        let mut thread = JsThread::new().unwrap();
        let m = |t: &mut JsThread, a: f64, b: f64| modulo(t, TaggedValue::number(a), TaggedValue::number(b)).unwrap();
        assert!(m(&mut thread, 5.0, 0.0).as_number().is_nan());
        assert_eq!(m(&mut thread, 5.0, f64::INFINITY), TaggedValue::int(5));
        assert_eq!(m(&mut thread, 0.0, 3.0), TaggedValue::int(0));
        assert!(m(&mut thread, f64::NAN, 3.0).as_number().is_nan());
        assert_eq!(m(&mut thread, 7.0, 3.0), TaggedValue::int(1));
        assert_eq!(m(&mut thread, -7.0, 3.0), TaggedValue::int(-1));
    }

    #[test]
    fn test_comparisons_with_nan() {
        let mut thread = JsThread::new().unwrap();
        let nan = TaggedValue::double(f64::NAN);
        assert!(less(&mut thread, nan, TaggedValue::int(1)).unwrap().is_false());
        assert!(less_eq(&mut thread, nan, TaggedValue::int(1)).unwrap().is_false());
        assert!(greater_eq(&mut thread, TaggedValue::int(2), TaggedValue::int(2)).unwrap().is_true());
    }

    #[test]
    fn test_loose_equal() {
        let mut thread = JsThread::new().unwrap();
        let one = thread.new_string("1").unwrap();
        assert!(loose_equal(&mut thread, one, TaggedValue::int(1)).unwrap().is_true());
        assert!(loose_equal(&mut thread, TaggedValue::NULL, TaggedValue::UNDEFINED).unwrap().is_true());
        assert!(loose_equal(&mut thread, TaggedValue::NULL, TaggedValue::int(0)).unwrap().is_false());
    }

    #[test]
    fn test_get_property_on_undefined_throws() {
        let mut thread = JsThread::new().unwrap();
        let key = thread.intern("x").unwrap();
        let r = get_property(&mut thread, TaggedValue::UNDEFINED, key).unwrap();
        assert!(r.is_exception());
        assert!(thread.has_pending_exception());
    }

    #[test]
    fn test_string_index_and_length() {
        let mut thread = JsThread::new().unwrap();
        let s = thread.new_string("kiln").unwrap();
        let len_key = thread.intern("length").unwrap();
        assert_eq!(get_property(&mut thread, s, len_key).unwrap(), TaggedValue::int(4));
        let ch = get_property(&mut thread, s, TaggedValue::int(2)).unwrap();
        assert_eq!(thread.string_to_rust(ch).unwrap(), "l");
    }

    #[test]
    fn test_missing_global_is_reference_error() {
        let mut thread = JsThread::new().unwrap();
        let name = thread.intern("nowhere").unwrap();
        assert!(try_load_global(&mut thread, name).unwrap().is_exception());
        store_global(&mut thread, name, TaggedValue::int(3)).unwrap();
        assert_eq!(try_load_global(&mut thread, name).unwrap(), TaggedValue::int(3));
    }

    proptest! {
        #[test]
        fn prop_int32_ops_match_host(a in any::<i32>(), b in any::<i32>()) {
            let mut thread = JsThread::new().unwrap();
            let (ta, tb) = (TaggedValue::int(a), TaggedValue::int(b));
            prop_assert_eq!(and(&mut thread, ta, tb).unwrap(), TaggedValue::int(a & b));
            prop_assert_eq!(xor(&mut thread, ta, tb).unwrap(), TaggedValue::int(a ^ b));
            prop_assert_eq!(ashr(&mut thread, ta, tb).unwrap(), TaggedValue::int(a >> (b as u32 & 31)));
            let sum = add(&mut thread, ta, tb).unwrap();
            prop_assert_eq!(sum.as_number(), f64::from(a) + f64::from(b));
        }
    }
}
