//! Typed HIR to machine gates.
//!
//! Guards become `DeoptCheck`s on the frame state of the bytecode they
//! protect. Typed operations become integer and double arithmetic on the
//! unboxed payloads, re-tagged at the end. Int arithmetic is carried out in
//! 64 bits and falls back to a double result when it leaves the int32
//! range; `Div` and `Mod` go through the JS edge-case ladder before taking
//! the integer fast path.
//!
//! Lowering a typed `new` emits a `HeapAlloc`, which is itself typed HIR,
//! so the pass repeats until nothing typed is left.

use tracing::debug;

use kiln_core::{DeoptType, KilnError, KilnResult};
use kiln_runtime::layout::{array, byte_array, function, hclass, object, typed_array, HClassFlags};
use kiln_runtime::{ConstantIndex, GlobalEnvField, JsType, RuntimeStubId};

use super::{find_frame_state, frame_state_offset, BuiltinLowering, LoweringPass};
use crate::builder::CircuitBuilder;
use crate::ir::{
    Circuit, CommonArg, ElementKind, FCmpCond, GateRef, GateType, MachineType, OpCode, TypedBinOp, TypedJumpOp,
    TypedUnOp,
};

/// Rounds before giving up on typed HIR that keeps reappearing.
const MAX_ROUNDS: usize = 4;

/// Typed HIR lowering pass.
#[derive(Debug, Clone)]
pub struct TypeLowering {
    builtin_lowering: bool,
}

impl Default for TypeLowering {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeLowering {
    /// Pass with builtin inlining on.
    #[must_use]
    pub fn new() -> Self {
        Self { builtin_lowering: true }
    }

    /// Inline recognized builtin calls; when off they become plain JS calls.
    #[must_use]
    pub fn with_builtin_lowering(mut self, enabled: bool) -> Self {
        self.builtin_lowering = enabled;
        self
    }

    fn lower(&self, circuit: &mut Circuit, gate: GateRef) -> KilnResult<bool> {
        match circuit.opcode(gate) {
            OpCode::PrimitiveTypeCheck(ty) => lower_primitive_check(circuit, gate, ty),
            OpCode::ObjectTypeCheck => lower_object_type_check(circuit, gate),
            OpCode::ArrayCheck => lower_array_check(circuit, gate),
            OpCode::StableArrayCheck => lower_stable_array_check(circuit, gate),
            OpCode::TypedArrayCheck => lower_typed_array_check(circuit, gate),
            OpCode::IndexCheck(kind) => lower_index_check(circuit, gate, kind),
            OpCode::Int32OverflowCheck(op) => lower_overflow_check(circuit, gate, op),
            OpCode::CallTargetCheck(id) => BuiltinLowering::lower_call_target_check(circuit, gate, id),
            OpCode::ReceiverCheck(field) => lower_receiver_check(circuit, gate, field),
            OpCode::TypedCallBuiltin(id) if self.builtin_lowering => {
                BuiltinLowering::lower_typed_call_builtin(circuit, gate, id)
            }
            OpCode::TypedCallBuiltin(_) => lower_builtin_as_call(circuit, gate),
            OpCode::TypedBinaryOp { op, left, right } => lower_binary(circuit, gate, op, left, right),
            OpCode::TypedUnaryOp { op, ty } => lower_unary(circuit, gate, op, ty),
            OpCode::TypeConvert { from, .. } => lower_type_convert(circuit, gate, from),
            OpCode::TypedJump(op) => lower_typed_jump(circuit, gate, op),
            OpCode::LoadProperty => lower_load_property(circuit, gate),
            OpCode::StoreProperty => lower_store_property(circuit, gate),
            OpCode::LoadArrayLength => lower_array_length(circuit, gate),
            OpCode::LoadElement(kind) => lower_load_element(circuit, gate, kind),
            OpCode::StoreElement(kind) => lower_store_element(circuit, gate, kind),
            OpCode::HeapAlloc => lower_heap_alloc(circuit, gate),
            OpCode::TypedNewAllocateThis => lower_new_allocate_this(circuit, gate),
            OpCode::TypedSuperAllocateThis => lower_super_allocate_this(circuit, gate),
            OpCode::GetSuperConstructor => lower_get_super_constructor(circuit, gate),
            _ => Ok(false),
        }
    }
}

impl LoweringPass for TypeLowering {
    fn name(&self) -> &'static str {
        "type_lowering"
    }

    fn run(&mut self, circuit: &mut Circuit) -> KilnResult<usize> {
        let mut lowered = 0;
        for round in 0..MAX_ROUNDS {
            let mut changed = 0;
            for gate in circuit.all_gates() {
                if circuit.is_dead(gate) || !circuit.opcode(gate).is_typed_hir() {
                    continue;
                }
                let op = circuit.opcode(gate);
                if self.lower(circuit, gate)? {
                    debug!(%op, gate = gate.index(), round, "lowered");
                    changed += 1;
                }
            }
            lowered += changed;
            if changed == 0 {
                break;
            }
        }
        Ok(lowered)
    }
}

// =============================================================================
// Checks
// =============================================================================

/// Replace a check with a `DeoptCheck` on the condition `build` produces.
pub(super) fn lower_check(
    circuit: &mut Circuit,
    gate: GateRef,
    reason: DeoptType,
    build: impl FnOnce(&mut CircuitBuilder<'_>) -> GateRef,
) -> KilnResult<bool> {
    let frame_state = find_frame_state(circuit, gate);
    let mut b = CircuitBuilder::at(circuit, gate);
    let condition = build(&mut b);
    b.deopt_check(reason, condition, frame_state);
    let position = b.position();
    circuit.replace_hir(gate, position, None, GateRef::INVALID)?;
    Ok(true)
}

fn lower_primitive_check(circuit: &mut Circuit, gate: GateRef, ty: GateType) -> KilnResult<bool> {
    let value = circuit.value_in(gate, 0);
    let reason = match ty {
        GateType::Int => DeoptType::NotInt,
        GateType::Double => DeoptType::NotDouble,
        GateType::Number => DeoptType::NotNumber,
        GateType::Boolean => DeoptType::NotBool,
        GateType::String => DeoptType::NotString,
        GateType::Undefined | GateType::Null => DeoptType::Generic,
        other => return Err(KilnError::Unsupported(format!("primitive check for {other:?}"))),
    };
    lower_check(circuit, gate, reason, |b| match ty {
        GateType::Int => b.tagged_is_int(value),
        GateType::Double => b.tagged_is_double(value),
        GateType::Boolean => b.tagged_is_boolean(value),
        GateType::String => b.tagged_is_string(value),
        GateType::Undefined => b.tagged_is_undefined(value),
        GateType::Null => b.tagged_is_null(value),
        _ => b.tagged_is_number(value),
    })
}

fn lower_receiver_check(circuit: &mut Circuit, gate: GateRef, field: GlobalEnvField) -> KilnResult<bool> {
    let receiver = circuit.value_in(gate, 0);
    lower_check(circuit, gate, DeoptType::NotBuiltinReceiver, |b| {
        let expected = b.global_env_value(field);
        b.tagged_equal(receiver, expected)
    })
}

fn lower_object_type_check(circuit: &mut Circuit, gate: GateRef) -> KilnResult<bool> {
    let (receiver, expected) = (circuit.value_in(gate, 0), circuit.value_in(gate, 1));
    lower_check(circuit, gate, DeoptType::WrongHClass, |b| {
        b.tagged_object_is(receiver, |b, _| {
            let hclass = b.load_hclass(receiver);
            b.int64_equal(hclass, expected)
        })
    })
}

fn lower_array_check(circuit: &mut Circuit, gate: GateRef) -> KilnResult<bool> {
    let receiver = circuit.value_in(gate, 0);
    lower_check(circuit, gate, DeoptType::NotArray, |b| {
        b.tagged_is_object_type(receiver, JsType::JsArray)
    })
}

/// An array with stable elements, while the global guardian holds.
fn lower_stable_array_check(circuit: &mut Circuit, gate: GateRef) -> KilnResult<bool> {
    let receiver = circuit.value_in(gate, 0);
    lower_check(circuit, gate, DeoptType::NotStableArray, |b| {
        let is_stable = b.tagged_object_is(receiver, |b, object_type| {
            let expected = b.int32(i32::from(JsType::JsArray as u8));
            let is_array = b.int32_equal(object_type, expected);
            let hclass = b.load_hclass(receiver);
            let stable = b.hclass_has_flags(hclass, HClassFlags::STABLE_ELEMENTS);
            b.bool_and(is_array, stable)
        });
        let guardian = b.load_glue(kiln_runtime::heap::glue::STABLE_ARRAY_GUARDIAN_OFFSET);
        let zero = b.int_ptr(0);
        let intact = b.int64_not_equal(guardian, zero);
        b.bool_and(is_stable, intact)
    })
}

fn lower_typed_array_check(circuit: &mut Circuit, gate: GateRef) -> KilnResult<bool> {
    let receiver = circuit.value_in(gate, 0);
    lower_check(circuit, gate, DeoptType::NotF32Array, |b| {
        b.tagged_is_object_type(receiver, JsType::JsFloat32Array)
    })
}

/// Unsigned `index < length`, so negative indices fail too.
fn lower_index_check(circuit: &mut Circuit, gate: GateRef, kind: ElementKind) -> KilnResult<bool> {
    let (receiver, index) = (circuit.value_in(gate, 0), circuit.value_in(gate, 1));
    let reason = match kind {
        ElementKind::Array => DeoptType::NotArrayIdx,
        ElementKind::Float32Array => DeoptType::NotF32ArrayIdx,
    };
    lower_check(circuit, gate, reason, |b| {
        let length = load_length(b, kind, receiver);
        let index = b.get_int32_of_tint(index);
        b.int32_unsigned_less_than(index, length)
    })
}

/// The int operand of `Inc`, `Dec` or `Neg` must keep the result in int32
/// (and `Neg` must not produce `-0`).
fn lower_overflow_check(circuit: &mut Circuit, gate: GateRef, op: TypedUnOp) -> KilnResult<bool> {
    let value = circuit.value_in(gate, 0);
    let reason = match op {
        TypedUnOp::Inc => DeoptType::NotIncOverflow,
        TypedUnOp::Dec => DeoptType::NotDecOverflow,
        TypedUnOp::Neg => DeoptType::NotNegOverflow,
        other => return Err(KilnError::Unsupported(format!("overflow check for {other:?}"))),
    };
    lower_check(circuit, gate, reason, |b| {
        let x = b.get_int32_of_tint(value);
        match op {
            TypedUnOp::Inc => {
                let max = b.int32(i32::MAX);
                b.int32_not_equal(x, max)
            }
            TypedUnOp::Dec => {
                let min = b.int32(i32::MIN);
                b.int32_not_equal(x, min)
            }
            _ => {
                let zero = b.int32(0);
                let min = b.int32(i32::MIN);
                let non_zero = b.int32_not_equal(x, zero);
                let not_min = b.int32_not_equal(x, min);
                b.bool_and(non_zero, not_min)
            }
        }
    })
}

// =============================================================================
// Numbers
// =============================================================================

/// Payload of a number of type `ty` as a double.
fn to_double(b: &mut CircuitBuilder<'_>, ty: GateType, value: GateRef) -> GateRef {
    match ty {
        GateType::Int => {
            let x = b.get_int32_of_tint(value);
            b.int32_to_double(x)
        }
        GateType::Double => b.get_double_of_tdouble(value),
        _ => b.get_double_of_tnumber(value),
    }
}

/// ECMAScript `ToInt32` of a number of type `ty`.
fn to_int32(b: &mut CircuitBuilder<'_>, ty: GateType, value: GateRef) -> GateRef {
    if ty.is_int() {
        return b.get_int32_of_tint(value);
    }
    let d = to_double(b, ty, value);
    b.call_ngc_runtime(RuntimeStubId::DoubleToInt, &[d])
}

/// Box a double result: as a double when the gate promised one, otherwise
/// in the int form when exact.
fn tag_double(b: &mut CircuitBuilder<'_>, result_type: GateType, d: GateRef) -> GateRef {
    if result_type.is_double() {
        b.double_to_tagged(d)
    } else {
        b.double_to_tagged_number(d)
    }
}

/// Box a 64-bit int result, falling back to a double outside int32.
fn tag_int64(b: &mut CircuitBuilder<'_>, r: GateRef) -> GateRef {
    let narrow = b.trunc_to_int32(r);
    let widened = b.sext_to_int64(narrow);
    let fits = b.int64_equal(widened, r);
    let as_int = b.int32_to_tagged(narrow);
    let d = b.int64_to_double(r);
    let as_double = b.double_to_tagged(d);
    b.select(fits, as_int, as_double)
}

fn lower_binary(
    circuit: &mut Circuit,
    gate: GateRef,
    op: TypedBinOp,
    left_type: GateType,
    right_type: GateType,
) -> KilnResult<bool> {
    let (left, right) = (circuit.value_in(gate, 0), circuit.value_in(gate, 1));
    let result_type = circuit.gate_type(gate);
    let both_int = left_type.is_int() && right_type.is_int();
    let mut b = CircuitBuilder::at(circuit, gate);

    let result = if op.is_comparison() {
        compare(&mut b, op, left_type, right_type, left, right)
    } else if op.is_bitwise() {
        bitwise(&mut b, op, left_type, right_type, left, right)
    } else if both_int {
        int_binary(&mut b, op, left, right)
    } else if maybe_int(left_type) && maybe_int(right_type) {
        split_on_int(&mut b, op, result_type, left, right)?
    } else {
        double_binary(&mut b, op, result_type, (left_type, right_type), left, right)?
    };
    let position = b.position();
    circuit.replace_hir(gate, position, None, result)?;
    Ok(true)
}

/// Operand type that may still hold an int at run time.
fn maybe_int(ty: GateType) -> bool {
    ty.is_int() || ty == GateType::Number
}

fn int_binary(b: &mut CircuitBuilder<'_>, op: TypedBinOp, left: GateRef, right: GateRef) -> GateRef {
    match op {
        TypedBinOp::Div => int_div(b, left, right),
        TypedBinOp::Mod => int_mod(b, left, right),
        _ => int_arith(b, op, left, right),
    }
}

fn double_binary(
    b: &mut CircuitBuilder<'_>,
    op: TypedBinOp,
    result_type: GateType,
    (left_type, right_type): (GateType, GateType),
    left: GateRef,
    right: GateRef,
) -> KilnResult<GateRef> {
    let l = to_double(b, left_type, left);
    let r = to_double(b, right_type, right);
    let result = match op {
        TypedBinOp::Mod => double_mod(b, left, l, r),
        TypedBinOp::Div => double_div(b, result_type, l, r),
        TypedBinOp::Add => {
            let d = b.double_add(l, r);
            tag_double(b, result_type, d)
        }
        TypedBinOp::Sub => {
            let d = b.double_sub(l, r);
            tag_double(b, result_type, d)
        }
        TypedBinOp::Mul => {
            let d = b.double_mul(l, r);
            tag_double(b, result_type, d)
        }
        other => return Err(KilnError::Unsupported(format!("typed binary {other:?}"))),
    };
    Ok(result)
}

/// Arithmetic on `Number` operands: two tagged ints take the int path, any
/// double sends both through the double path.
fn split_on_int(
    b: &mut CircuitBuilder<'_>,
    op: TypedBinOp,
    result_type: GateType,
    left: GateRef,
    right: GateRef,
) -> KilnResult<GateRef> {
    let undefined = b.undefined();
    let result = b.new_variable(MachineType::I64, GateType::Number, undefined);
    let left_int = b.tagged_is_int(left);
    let right_int = b.tagged_is_int(right);
    let both_int = b.bool_and(left_int, right_int);

    let ints = b.new_label();
    let doubles = b.new_label();
    let exit = b.new_label();
    b.branch(both_int, ints, doubles);

    b.bind(ints);
    let value = int_binary(b, op, left, right);
    b.write(result, value);
    b.jump(exit);

    b.bind(doubles);
    let value = double_binary(b, op, result_type, (GateType::Number, GateType::Number), left, right)?;
    b.write(result, value);
    b.jump(exit);

    b.bind(exit);
    Ok(b.read(result))
}

/// `Add`, `Sub` and `Mul` on two ints, in 64 bits.
fn int_arith(b: &mut CircuitBuilder<'_>, op: TypedBinOp, left: GateRef, right: GateRef) -> GateRef {
    let x = b.get_int32_of_tint(left);
    let y = b.get_int32_of_tint(right);
    let x64 = b.sext_to_int64(x);
    let y64 = b.sext_to_int64(y);
    match op {
        TypedBinOp::Add => {
            let r = b.int64_add(x64, y64);
            tag_int64(b, r)
        }
        TypedBinOp::Sub => {
            let r = b.int64_sub(x64, y64);
            tag_int64(b, r)
        }
        _ => {
            // 0 * negative is -0.
            let r = b.int64_mul(x64, y64);
            let zero = b.int32(0);
            let zero64 = b.int_ptr(0);
            let is_zero = b.int64_equal(r, zero64);
            let x_neg = b.int32_less_than(x, zero);
            let y_neg = b.int32_less_than(y, zero);
            let any_neg = b.bool_or(x_neg, y_neg);
            let negative_zero = b.bool_and(is_zero, any_neg);
            let minus_zero = b.double(-0.0);
            let boxed_minus_zero = b.double_to_tagged(minus_zero);
            let product = tag_int64(b, r);
            b.select(negative_zero, boxed_minus_zero, product)
        }
    }
}

/// Int division: exact quotients stay ints, everything else is a double.
fn int_div(b: &mut CircuitBuilder<'_>, left: GateRef, right: GateRef) -> GateRef {
    let x = b.get_int32_of_tint(left);
    let y = b.get_int32_of_tint(right);
    let zero = b.int32(0);
    let dx = b.int32_to_double(x);
    let dy = b.int32_to_double(y);
    let quotient = b.double_div(dx, dy);
    let as_double = b.double_to_tagged_number(quotient);
    let result = b.new_variable(MachineType::I64, GateType::Number, as_double);

    let divisor_zero = b.int32_equal(y, zero);
    let dividend_zero = b.int32_equal(x, zero);
    let divisor_negative = b.int32_less_than(y, zero);
    let negative_zero = b.bool_and(dividend_zero, divisor_negative);
    let min = b.int32(i32::MIN);
    let minus_one = b.int32(-1);
    let dividend_min = b.int32_equal(x, min);
    let divisor_minus_one = b.int32_equal(y, minus_one);
    let overflow = b.bool_and(dividend_min, divisor_minus_one);
    let special = b.bool_or(divisor_zero, negative_zero);
    let special = b.bool_or(special, overflow);

    let fast = b.new_label();
    let exit = b.new_label();
    b.branch(special, exit, fast);
    b.bind(fast);
    let remainder = b.int32_mod(x, y);
    let exact = b.int32_equal(remainder, zero);
    let q = b.int32_div(x, y);
    let int_quotient = b.int32_to_tagged(q);
    let value = b.select(exact, int_quotient, as_double);
    b.write(result, value);
    b.jump(exit);
    b.bind(exit);
    b.read(result)
}

/// Int remainder: `x % 0` is NaN, a zero remainder of a negative dividend
/// is `-0`.
fn int_mod(b: &mut CircuitBuilder<'_>, left: GateRef, right: GateRef) -> GateRef {
    let x = b.get_int32_of_tint(left);
    let y = b.get_int32_of_tint(right);
    let zero = b.int32(0);
    let nan = b.tagged_nan();
    let result = b.new_variable(MachineType::I64, GateType::Number, nan);

    let divisor_zero = b.int32_equal(y, zero);
    let nonzero = b.new_label();
    let exit = b.new_label();
    b.branch(divisor_zero, exit, nonzero);
    b.bind(nonzero);
    let remainder = b.int32_mod(x, y);
    let remainder_zero = b.int32_equal(remainder, zero);
    let dividend_negative = b.int32_less_than(x, zero);
    let negative_zero = b.bool_and(remainder_zero, dividend_negative);
    let minus_zero = b.double(-0.0);
    let boxed_minus_zero = b.double_to_tagged(minus_zero);
    let boxed = b.int32_to_tagged(remainder);
    let value = b.select(negative_zero, boxed_minus_zero, boxed);
    b.write(result, value);
    b.jump(exit);
    b.bind(exit);
    b.read(result)
}

/// Double remainder: NaN cases first, then `x % ±Infinity` and `±0 % y`
/// keep the dividend, and the rest calls `FloatMod`.
fn double_mod(b: &mut CircuitBuilder<'_>, left: GateRef, l: GateRef, r: GateRef) -> GateRef {
    let nan = b.tagged_nan();
    let result = b.new_variable(MachineType::I64, GateType::Number, nan);

    let zero = b.double(0.0);
    let divisor_zero = b.double_equal(r, zero);
    let divisor_nan = b.double_is_nan(r);
    // NaN or infinite dividend.
    let l_minus_l = b.double_sub(l, l);
    let dividend_not_finite = b.double_is_nan(l_minus_l);
    let is_nan = b.bool_or(divisor_zero, divisor_nan);
    let is_nan = b.bool_or(is_nan, dividend_not_finite);

    let finite = b.new_label();
    let keep = b.new_label();
    let call = b.new_label();
    let exit = b.new_label();
    b.branch(is_nan, exit, finite);

    b.bind(finite);
    let r_minus_r = b.double_sub(r, r);
    let divisor_infinite = b.double_is_nan(r_minus_r);
    let dividend_zero = b.double_equal(l, zero);
    let trivial = b.bool_or(divisor_infinite, dividend_zero);
    b.branch(trivial, keep, call);

    b.bind(keep);
    b.write(result, left);
    b.jump(exit);

    b.bind(call);
    let m = b.call_ngc_runtime(RuntimeStubId::FloatMod, &[l, r]);
    let boxed = b.double_to_tagged_number(m);
    b.write(result, boxed);
    b.jump(exit);

    b.bind(exit);
    b.read(result)
}

/// Double division: a zero divisor gives NaN for a zero or NaN dividend and
/// otherwise an infinity carrying the xor of both signs; the rest divides.
fn double_div(b: &mut CircuitBuilder<'_>, result_type: GateType, l: GateRef, r: GateRef) -> GateRef {
    let nan = b.tagged_nan();
    let result = b.new_variable(MachineType::I64, GateType::Number, nan);

    let zero = b.double(0.0);
    let divisor_zero = b.double_equal(r, zero);
    let by_zero = b.new_label();
    let infinite = b.new_label();
    let divide = b.new_label();
    let exit = b.new_label();
    b.branch(divisor_zero, by_zero, divide);

    b.bind(by_zero);
    let dividend_zero = b.double_equal(l, zero);
    let dividend_nan = b.double_is_nan(l);
    let undefined_quotient = b.bool_or(dividend_zero, dividend_nan);
    b.branch(undefined_quotient, exit, infinite);

    b.bind(infinite);
    let l_bits = b.bitcast(l, MachineType::I64);
    let r_bits = b.bitcast(r, MachineType::I64);
    let sign = b.int64_xor(l_bits, r_bits);
    let zero64 = b.int_ptr(0);
    let negative = b.int64_less_than(sign, zero64);
    let minus_infinity = b.double(f64::NEG_INFINITY);
    let plus_infinity = b.double(f64::INFINITY);
    let boxed_minus = b.double_to_tagged(minus_infinity);
    let boxed_plus = b.double_to_tagged(plus_infinity);
    let value = b.select(negative, boxed_minus, boxed_plus);
    b.write(result, value);
    b.jump(exit);

    b.bind(divide);
    let d = b.double_div(l, r);
    let boxed = tag_double(b, result_type, d);
    b.write(result, boxed);
    b.jump(exit);

    b.bind(exit);
    b.read(result)
}

fn compare(
    b: &mut CircuitBuilder<'_>,
    op: TypedBinOp,
    left_type: GateType,
    right_type: GateType,
    left: GateRef,
    right: GateRef,
) -> GateRef {
    use TypedBinOp as T;

    let flag = if left_type.is_int() && right_type.is_int() {
        let x = b.get_int32_of_tint(left);
        let y = b.get_int32_of_tint(right);
        match op {
            T::Less => b.int32_less_than(x, y),
            T::LessEq => b.int32_less_than_or_equal(x, y),
            T::Greater => b.int32_greater_than(x, y),
            T::GreaterEq => b.int32_greater_than_or_equal(x, y),
            T::NotEq | T::StrictNotEq => b.int32_not_equal(x, y),
            _ => b.int32_equal(x, y),
        }
    } else {
        let x = to_double(b, left_type, left);
        let y = to_double(b, right_type, right);
        match op {
            T::Less => b.double_less_than(x, y),
            T::LessEq => b.double_less_than_or_equal(x, y),
            T::Greater => b.double_greater_than(x, y),
            T::GreaterEq => b.double_greater_than_or_equal(x, y),
            T::NotEq | T::StrictNotEq => b.double_not_equal(x, y),
            _ => b.double_equal(x, y),
        }
    };
    b.boolean_to_tagged(flag)
}

fn bitwise(
    b: &mut CircuitBuilder<'_>,
    op: TypedBinOp,
    left_type: GateType,
    right_type: GateType,
    left: GateRef,
    right: GateRef,
) -> GateRef {
    let x = to_int32(b, left_type, left);
    let y = to_int32(b, right_type, right);
    let shift_mask = b.int32(31);
    match op {
        TypedBinOp::And => {
            let r = b.int32_and(x, y);
            b.int32_to_tagged(r)
        }
        TypedBinOp::Or => {
            let r = b.int32_or(x, y);
            b.int32_to_tagged(r)
        }
        TypedBinOp::Xor => {
            let r = b.int32_xor(x, y);
            b.int32_to_tagged(r)
        }
        TypedBinOp::Shl => {
            let count = b.int32_and(y, shift_mask);
            let r = b.int32_lsl(x, count);
            b.int32_to_tagged(r)
        }
        TypedBinOp::Ashr => {
            let count = b.int32_and(y, shift_mask);
            let r = b.int32_asr(x, count);
            b.int32_to_tagged(r)
        }
        _ => {
            // `>>>` yields a uint32: above int32 range it is a double.
            let count = b.int32_and(y, shift_mask);
            let r = b.int32_lsr(x, count);
            let zero = b.int32(0);
            let fits = b.int32_greater_than_or_equal(r, zero);
            let as_int = b.int32_to_tagged(r);
            let unsigned = b.zext_to_int64(r);
            let d = b.int64_to_double(unsigned);
            let as_double = b.double_to_tagged(d);
            b.select(fits, as_int, as_double)
        }
    }
}

fn lower_unary(circuit: &mut Circuit, gate: GateRef, op: TypedUnOp, ty: GateType) -> KilnResult<bool> {
    let value = circuit.value_in(gate, 0);
    let result_type = circuit.gate_type(gate);
    let mut b = CircuitBuilder::at(circuit, gate);
    let result = if ty.is_int() {
        int_unary(&mut b, op, value)
    } else if ty.is_number() {
        double_unary(&mut b, op, ty, value, result_type)
    } else if ty.is_boolean() {
        match op {
            TypedUnOp::IsTrue => value,
            TypedUnOp::IsFalse => {
                let flag = b.tagged_is_false(value);
                b.boolean_to_tagged(flag)
            }
            TypedUnOp::ToNumber => {
                let flag = b.tagged_is_true(value);
                let one = b.tagged_int(1);
                let zero = b.tagged_int(0);
                b.select(flag, one, zero)
            }
            other => return Err(KilnError::Unsupported(format!("typed {other:?} on a boolean"))),
        }
    } else {
        return Err(KilnError::Unsupported(format!("typed {op:?} on {ty:?}")));
    };
    let position = b.position();
    circuit.replace_hir(gate, position, None, result)?;
    Ok(true)
}

/// Int operand; overflow was ruled out by an `Int32OverflowCheck`.
fn int_unary(b: &mut CircuitBuilder<'_>, op: TypedUnOp, value: GateRef) -> GateRef {
    let x = b.get_int32_of_tint(value);
    let zero = b.int32(0);
    match op {
        TypedUnOp::Inc => {
            let one = b.int32(1);
            let r = b.int32_add(x, one);
            b.int32_to_tagged(r)
        }
        TypedUnOp::Dec => {
            let one = b.int32(1);
            let r = b.int32_sub(x, one);
            b.int32_to_tagged(r)
        }
        TypedUnOp::Neg => {
            let r = b.int32_sub(zero, x);
            b.int32_to_tagged(r)
        }
        TypedUnOp::Not => {
            let r = b.int32_not(x);
            b.int32_to_tagged(r)
        }
        TypedUnOp::ToNumber => value,
        TypedUnOp::IsTrue => {
            let flag = b.int32_not_equal(x, zero);
            b.boolean_to_tagged(flag)
        }
        TypedUnOp::IsFalse => {
            let flag = b.int32_equal(x, zero);
            b.boolean_to_tagged(flag)
        }
    }
}

fn double_unary(
    b: &mut CircuitBuilder<'_>,
    op: TypedUnOp,
    ty: GateType,
    value: GateRef,
    result_type: GateType,
) -> GateRef {
    if op == TypedUnOp::ToNumber {
        return value;
    }
    if op == TypedUnOp::Not {
        let x = to_int32(b, ty, value);
        let r = b.int32_not(x);
        return b.int32_to_tagged(r);
    }
    let d = to_double(b, ty, value);
    match op {
        TypedUnOp::IsTrue | TypedUnOp::IsFalse => {
            // Ordered and non-zero: NaN, 0 and -0 are falsy.
            let zero = b.double(0.0);
            let truthy = b.binary(OpCode::Fcmp(FCmpCond::One), MachineType::I1, d, zero);
            let flag = if op == TypedUnOp::IsTrue { truthy } else { b.bool_not(truthy) };
            b.boolean_to_tagged(flag)
        }
        TypedUnOp::Neg => {
            let r = b.double_neg(d);
            tag_double(b, result_type, r)
        }
        _ => {
            let one = b.double(1.0);
            let r = if op == TypedUnOp::Inc { b.double_add(d, one) } else { b.double_sub(d, one) };
            tag_double(b, result_type, r)
        }
    }
}

fn lower_type_convert(circuit: &mut Circuit, gate: GateRef, from: GateType) -> KilnResult<bool> {
    let value = circuit.value_in(gate, 0);
    let mut b = CircuitBuilder::at(circuit, gate);
    let result = match from {
        GateType::Boolean => {
            let flag = b.tagged_is_true(value);
            let one = b.tagged_int(1);
            let zero = b.tagged_int(0);
            b.select(flag, one, zero)
        }
        GateType::Null => b.tagged_int(0),
        GateType::Undefined => b.tagged_nan(),
        ty if ty.is_number() => value,
        other => return Err(KilnError::Unsupported(format!("conversion from {other:?}"))),
    };
    let position = b.position();
    circuit.replace_hir(gate, position, None, result)?;
    Ok(true)
}

/// `TypedJump` on a tagged boolean becomes an `IfBranch` keeping its
/// projections: true means the jump is taken.
fn lower_typed_jump(circuit: &mut Circuit, gate: GateRef, op: TypedJumpOp) -> KilnResult<bool> {
    let condition = circuit.value_in(gate, 0);
    let mut b = CircuitBuilder::at(circuit, gate);
    let taken = match op {
        TypedJumpOp::Jeqz => b.tagged_is_false(condition),
        TypedJumpOp::Jnez => b.tagged_is_true(condition),
    };
    let (state, depend) = b.position();
    let branch = b.gate(OpCode::IfBranch, MachineType::NoValue, &[state], &[], &[taken], GateType::Any);
    circuit.replace_gate(gate, branch, depend, GateRef::INVALID)?;
    Ok(true)
}

// =============================================================================
// Properties and Elements
// =============================================================================

fn lower_load_property(circuit: &mut Circuit, gate: GateRef) -> KilnResult<bool> {
    let (receiver, offset) = (circuit.value_in(gate, 0), circuit.value_in(gate, 1));
    let mut b = CircuitBuilder::at(circuit, gate);
    let value = b.load(MachineType::I64, receiver, offset);
    let position = b.position();
    circuit.replace_hir(gate, position, None, value)?;
    Ok(true)
}

fn lower_store_property(circuit: &mut Circuit, gate: GateRef) -> KilnResult<bool> {
    let values = circuit.value_ins(gate);
    let mut b = CircuitBuilder::at(circuit, gate);
    b.store(MachineType::I64, values[0], values[1], values[2]);
    let position = b.position();
    circuit.replace_hir(gate, position, None, GateRef::INVALID)?;
    Ok(true)
}

/// `u32` element count of an array or `Float32Array`.
fn load_length(b: &mut CircuitBuilder<'_>, kind: ElementKind, receiver: GateRef) -> GateRef {
    let offset = match kind {
        ElementKind::Array => array::LENGTH_OFFSET,
        ElementKind::Float32Array => typed_array::ARRAY_LENGTH_OFFSET,
    };
    b.load_at(MachineType::I32, receiver, offset)
}

fn lower_array_length(circuit: &mut Circuit, gate: GateRef) -> KilnResult<bool> {
    let receiver = circuit.value_in(gate, 0);
    let kind = if circuit.gate_type(receiver) == GateType::Float32Array {
        ElementKind::Float32Array
    } else {
        ElementKind::Array
    };
    let mut b = CircuitBuilder::at(circuit, gate);
    let length = load_length(&mut b, kind, receiver);
    let value = b.int32_to_tagged(length);
    let position = b.position();
    circuit.replace_hir(gate, position, None, value)?;
    Ok(true)
}

/// Backing store address and byte offset of element `index` of a
/// `Float32Array`.
fn f32_element_address(b: &mut CircuitBuilder<'_>, receiver: GateRef, index: GateRef) -> (GateRef, GateRef) {
    let buffer = b.load_field(receiver, typed_array::VIEWED_ARRAY_BUFFER_OFFSET);
    let byte_offset = b.load_at(MachineType::I32, receiver, typed_array::BYTE_OFFSET_OFFSET);
    let byte_offset = b.zext_to_int64(byte_offset);
    let index = b.get_int32_of_tint(index);
    let index = b.zext_to_int64(index);
    let four = b.int_ptr(4);
    let scaled = b.int64_mul(index, four);
    let offset = b.ptr_add(byte_offset, scaled);
    let offset = b.ptr_add_const(offset, byte_array::DATA_OFFSET);
    (buffer, offset)
}

fn lower_load_element(circuit: &mut Circuit, gate: GateRef, kind: ElementKind) -> KilnResult<bool> {
    let (receiver, index) = (circuit.value_in(gate, 0), circuit.value_in(gate, 1));
    let mut b = CircuitBuilder::at(circuit, gate);
    let value = match kind {
        ElementKind::Array => {
            let elements = b.load_field(receiver, object::ELEMENTS_OFFSET);
            let index = b.get_int32_of_tint(index);
            let element = b.get_value_from_tagged_array(elements, index);
            let is_hole = b.tagged_is_hole(element);
            let undefined = b.undefined();
            b.select(is_hole, undefined, element)
        }
        ElementKind::Float32Array => {
            let (buffer, offset) = f32_element_address(&mut b, receiver, index);
            let single = b.load(MachineType::F32, buffer, offset);
            let d = b.float_ext(single);
            b.double_to_tagged_number(d)
        }
    };
    let position = b.position();
    circuit.replace_hir(gate, position, None, value)?;
    Ok(true)
}

fn lower_store_element(circuit: &mut Circuit, gate: GateRef, kind: ElementKind) -> KilnResult<bool> {
    let values = circuit.value_ins(gate);
    let (receiver, index, value) = (values[0], values[1], values[2]);
    let value_type = circuit.gate_type(value);
    let mut b = CircuitBuilder::at(circuit, gate);
    match kind {
        ElementKind::Array => {
            let elements = b.load_field(receiver, object::ELEMENTS_OFFSET);
            let index = b.get_int32_of_tint(index);
            b.set_value_to_tagged_array(elements, index, value);
        }
        ElementKind::Float32Array => {
            let (buffer, offset) = f32_element_address(&mut b, receiver, index);
            let d = to_double(&mut b, value_type, value);
            let single = b.float_trunc(d);
            b.store(MachineType::F32, buffer, offset, single);
        }
    }
    let position = b.position();
    circuit.replace_hir(gate, position, None, GateRef::INVALID)?;
    Ok(true)
}

// =============================================================================
// Allocation
// =============================================================================

/// Bump allocation followed by a loop filling every word with `undefined`.
fn lower_heap_alloc(circuit: &mut Circuit, gate: GateRef) -> KilnResult<bool> {
    let size = circuit.value_in(gate, 0);
    let mut b = CircuitBuilder::at(circuit, gate);
    let obj = b.allocate_in_young(size);
    let start = b.int_ptr(0);
    let undefined = b.undefined();
    b.fill_tagged(obj, start, size, undefined);

    let position = b.position();
    circuit.replace_hir(gate, position, None, obj)?;
    Ok(true)
}

/// Receiver of `new` on a base constructor: inline allocation once the
/// constructor caches its instance class, the runtime otherwise.
fn lower_new_allocate_this(circuit: &mut Circuit, gate: GateRef) -> KilnResult<bool> {
    let ctor = circuit.value_in(gate, 0);
    let mut b = CircuitBuilder::at(circuit, gate);
    let undefined = b.undefined();
    let result = b.new_variable(MachineType::I64, GateType::Any, undefined);
    let proto_or_hclass = b.load_field(ctor, function::PROTO_OR_HCLASS_OFFSET);
    let is_hclass = b.tagged_is_object_type(proto_or_hclass, JsType::HClass);
    let fast = b.new_label();
    let slow = b.new_label();
    let exit = b.new_label();
    b.branch(is_hclass, fast, slow);

    b.bind(fast);
    let size = b.load_hclass_object_size(proto_or_hclass);
    let size = b.zext_to_int64(size);
    let obj = b.heap_alloc(size);
    b.store_hclass(obj, proto_or_hclass);
    let hash = b.tagged_int(0);
    b.store_field(obj, object::HASH_OFFSET, hash);
    let empty = b.global_constant(ConstantIndex::EmptyArray);
    b.store_field(obj, object::PROPERTIES_OFFSET, empty);
    b.store_field(obj, object::ELEMENTS_OFFSET, empty);
    b.write(result, obj);
    b.jump(exit);

    b.bind(slow);
    let obj = b.call_runtime(RuntimeStubId::NewThisObject, &[ctor, ctor]);
    b.write(result, obj);
    b.jump(exit);

    b.bind(exit);
    let this = b.read(result);
    let position = b.position();
    circuit.replace_hir(gate, position, None, this)?;
    Ok(true)
}

fn lower_super_allocate_this(circuit: &mut Circuit, gate: GateRef) -> KilnResult<bool> {
    let (super_ctor, new_target) = (circuit.value_in(gate, 0), circuit.value_in(gate, 1));
    let mut b = CircuitBuilder::at(circuit, gate);
    let this = b.call_runtime(RuntimeStubId::NewThisObject, &[super_ctor, new_target]);
    let position = b.position();
    circuit.replace_hir(gate, position, None, this)?;
    Ok(true)
}

/// The parent class is the prototype of the constructor itself.
fn lower_get_super_constructor(circuit: &mut Circuit, gate: GateRef) -> KilnResult<bool> {
    let func = circuit.value_in(gate, 0);
    let mut b = CircuitBuilder::at(circuit, gate);
    let hclass_word = b.load_hclass(func);
    let parent = b.load_field(hclass_word, hclass::PROTOTYPE_OFFSET);
    let position = b.position();
    circuit.replace_hir(gate, position, None, parent)?;
    Ok(true)
}

// =============================================================================
// Builtin Calls
// =============================================================================

/// A recognized builtin call with inlining off: an ordinary JS call whose
/// exceptional exit returns the exception sentinel.
fn lower_builtin_as_call(circuit: &mut Circuit, gate: GateRef) -> KilnResult<bool> {
    let values = circuit.value_ins(gate);
    let (func, this, args) = (values[0], values[1], &values[2..]);
    let frame_state = find_frame_state(circuit, gate);
    let bc_offset = frame_state_offset(circuit, frame_state);
    let env = circuit.common_arg(CommonArg::Env);
    let mut b = CircuitBuilder::at(circuit, gate);
    let new_target = b.undefined();
    let result = b.js_call(env, CircuitBuilder::call_argc(args), func, new_target, this, args, bc_offset, false);
    let (state, depend) = b.check_exception(result);
    let sentinel = b.exception();
    b.gate(OpCode::Return, MachineType::NoValue, &[state], &[depend], &[sentinel], GateType::Any);
    let position = b.position();
    circuit.replace_hir(gate, position, None, result)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{verify, BytecodeBuilder, CallTarget, EcmaOpcode};
    use crate::lowering::TsTypeLowering;

    fn count(circuit: &Circuit, pred: impl Fn(OpCode) -> bool) -> usize {
        circuit.all_gates().into_iter().filter(|&g| pred(circuit.opcode(g))).count()
    }

    fn typed_circuit(op: EcmaOpcode, left: GateType, right: GateType) -> Circuit {
        let mut circuit = Circuit::for_function("f", 2, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let (a, b) = (bc.param(0), bc.param(1));
        bc.set_type(a, left);
        bc.set_type(b, right);
        let r = bc.emit(op, &[a, b]);
        bc.ret(r);
        TsTypeLowering::default().run(&mut circuit).unwrap();
        circuit
    }

    fn lower(circuit: &mut Circuit) -> usize {
        let lowered = TypeLowering::new().run(circuit).unwrap();
        verify(circuit).unwrap();
        assert_eq!(count(circuit, |op| op.is_typed_hir() && !matches!(op, OpCode::DeoptCheck(_) | OpCode::Construct)), 0);
        lowered
    }

    #[test]
    fn test_checks_become_deopt_checks() {
        let mut circuit = typed_circuit(EcmaOpcode::Add2, GateType::Int, GateType::Int);
        assert_eq!(lower(&mut circuit), 3);
        assert_eq!(count(&circuit, |op| op == OpCode::DeoptCheck(DeoptType::NotInt)), 2);
    }

    #[test]
    fn test_receiver_check_compares_global_env_slot() {
        let mut circuit = Circuit::for_function("f", 1, 0);
        let receiver = circuit.arg(crate::ir::NUM_COMMON_ARGS);
        let mut b = CircuitBuilder::new(&mut circuit);
        b.receiver_check(GlobalEnvField::MathObject, receiver);
        b.return_(receiver);
        assert_eq!(TypeLowering::new().run(&mut circuit).unwrap(), 1);
        verify(&circuit).unwrap();
        assert_eq!(count(&circuit, |op| matches!(op, OpCode::ReceiverCheck(_))), 0);
        assert_eq!(count(&circuit, |op| op == OpCode::DeoptCheck(DeoptType::NotBuiltinReceiver)), 1);
    }

    #[test]
    fn test_int_mod_has_no_runtime_call() {
        let mut circuit = typed_circuit(EcmaOpcode::Mod2, GateType::Int, GateType::Int);
        lower(&mut circuit);
        assert_eq!(count(&circuit, |op| matches!(op, OpCode::Call(_))), 0);
        assert!(count(&circuit, |op| op == OpCode::Smod) > 0);
    }

    #[test]
    fn test_double_mod_calls_float_mod() {
        let mut circuit = typed_circuit(EcmaOpcode::Mod2, GateType::Double, GateType::Int);
        lower(&mut circuit);
        let float_mod = OpCode::Call(CallTarget::NoGc(RuntimeStubId::FloatMod));
        assert_eq!(count(&circuit, |op| op == float_mod), 1);
    }

    #[test]
    fn test_double_div_branches_on_zero_divisor() {
        let mut circuit = typed_circuit(EcmaOpcode::Div2, GateType::Double, GateType::Double);
        let branches = count(&circuit, |op| op == OpCode::IfBranch);
        lower(&mut circuit);
        // divisor == 0, then 0/0 or NaN/0 against x/0 and -x/0.
        assert_eq!(count(&circuit, |op| op == OpCode::IfBranch), branches + 2);
        assert_eq!(count(&circuit, |op| op == OpCode::Fdiv), 1);
        assert_eq!(count(&circuit, |op| op == OpCode::Fcmp(FCmpCond::Uno)), 1);
        let sign_xor = circuit
            .all_gates()
            .into_iter()
            .filter(|&g| circuit.opcode(g) == OpCode::Xor && circuit.machine_type(g) == MachineType::I64)
            .count();
        assert_eq!(sign_xor, 1);
        let infinities: Vec<_> = circuit
            .all_gates()
            .into_iter()
            .filter(|&g| circuit.machine_type(g) == MachineType::F64)
            .filter_map(|g| circuit.constant_value(g))
            .map(f64::from_bits)
            .filter(|d| d.is_infinite())
            .collect();
        assert_eq!(infinities.len(), 2);
        assert!(infinities.contains(&f64::INFINITY) && infinities.contains(&f64::NEG_INFINITY));
    }

    #[test]
    fn test_number_add_splits_on_int_tags() {
        let mut circuit = typed_circuit(EcmaOpcode::Add2, GateType::Number, GateType::Number);
        let branches = count(&circuit, |op| op == OpCode::IfBranch);
        lower(&mut circuit);
        assert_eq!(count(&circuit, |op| op == OpCode::IfBranch), branches + 1);
        let adds = |mt: MachineType| {
            circuit
                .all_gates()
                .into_iter()
                .filter(|&g| circuit.opcode(g) == OpCode::Add && circuit.machine_type(g) == mt)
                .count()
        };
        assert!(adds(MachineType::I64) >= 1);
        assert_eq!(adds(MachineType::F64), 1);
        assert_eq!(count(&circuit, |op| matches!(op, OpCode::Call(_))), 0);
    }

    #[test]
    fn test_double_operand_skips_int_split() {
        let mut circuit = typed_circuit(EcmaOpcode::Add2, GateType::Double, GateType::Number);
        let branches = count(&circuit, |op| op == OpCode::IfBranch);
        lower(&mut circuit);
        assert_eq!(count(&circuit, |op| op == OpCode::IfBranch), branches);
    }

    #[test]
    fn test_number_div_has_int_and_double_ladders() {
        let mut circuit = typed_circuit(EcmaOpcode::Div2, GateType::Number, GateType::Number);
        let branches = count(&circuit, |op| op == OpCode::IfBranch);
        lower(&mut circuit);
        // Tag split, the int special cases, then the two double ladder steps.
        assert_eq!(count(&circuit, |op| op == OpCode::IfBranch), branches + 4);
        assert_eq!(count(&circuit, |op| op == OpCode::Sdiv), 1);
    }

    #[test]
    fn test_bitwise_on_double_truncates_through_runtime() {
        let mut circuit = typed_circuit(EcmaOpcode::And2, GateType::Double, GateType::Int);
        lower(&mut circuit);
        let to_int = OpCode::Call(CallTarget::NoGc(RuntimeStubId::DoubleToInt));
        assert_eq!(count(&circuit, |op| op == to_int), 1);
    }

    #[test]
    fn test_inc_overflow_check_reason() {
        let mut circuit = Circuit::for_function("f", 1, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let a = bc.param(0);
        bc.set_type(a, GateType::Int);
        let r = bc.emit(EcmaOpcode::Inc, &[a]);
        bc.ret(r);
        TsTypeLowering::default().run(&mut circuit).unwrap();
        lower(&mut circuit);
        assert_eq!(count(&circuit, |op| op == OpCode::DeoptCheck(DeoptType::NotIncOverflow)), 1);
    }

    #[test]
    fn test_boolean_jump_becomes_branch() {
        let mut circuit = Circuit::for_function("f", 1, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let cond = bc.param(0);
        bc.set_type(cond, GateType::Boolean);
        let (taken, fall) = (bc.new_label(), bc.new_label());
        bc.jump_if(EcmaOpcode::Jnez, cond, taken, fall);
        bc.bind(taken);
        let one = bc.int(1);
        bc.ret(one);
        bc.bind(fall);
        let two = bc.int(2);
        bc.ret(two);
        TsTypeLowering::default().run(&mut circuit).unwrap();
        let branches = count(&circuit, |op| op == OpCode::IfBranch);
        lower(&mut circuit);
        assert_eq!(count(&circuit, |op| matches!(op, OpCode::TypedJump(_))), 0);
        assert!(count(&circuit, |op| op == OpCode::IfBranch) > branches);
    }

    #[test]
    fn test_f32_element_load() {
        let mut circuit = Circuit::for_function("f", 2, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let (arr, idx) = (bc.param(0), bc.param(1));
        bc.set_type(arr, GateType::Float32Array);
        bc.set_type(idx, GateType::Int);
        let slot = bc.int(0);
        let r = bc.emit(EcmaOpcode::LdObjByValue, &[slot, arr, idx]);
        bc.ret(r);
        TsTypeLowering::default().run(&mut circuit).unwrap();
        lower(&mut circuit);
        assert_eq!(count(&circuit, |op| op == OpCode::DeoptCheck(DeoptType::NotF32Array)), 1);
        assert_eq!(count(&circuit, |op| op == OpCode::DeoptCheck(DeoptType::NotF32ArrayIdx)), 1);
        let f32_loads = circuit
            .all_gates()
            .into_iter()
            .filter(|&g| circuit.opcode(g) == OpCode::Load && circuit.machine_type(g) == MachineType::F32)
            .count();
        assert_eq!(f32_loads, 1);
    }

    #[test]
    fn test_heap_alloc_fills_in_a_loop() {
        let mut circuit = Circuit::for_function("f", 0, 0);
        let mut b = CircuitBuilder::new(&mut circuit);
        let size = b.int_ptr(48);
        let obj = b.heap_alloc(size);
        b.return_(obj);
        assert_eq!(TypeLowering::new().run(&mut circuit).unwrap(), 1);
        verify(&circuit).unwrap();
        assert_eq!(count(&circuit, |op| op == OpCode::HeapAlloc), 0);
        assert_eq!(count(&circuit, |op| op == OpCode::LoopBegin), 1);
        let alloc = OpCode::Call(CallTarget::Runtime(RuntimeStubId::AllocateInYoung));
        assert_eq!(count(&circuit, |op| op == alloc), 1);
    }

    #[test]
    fn test_new_allocate_this_lowers_nested_heap_alloc() {
        let mut circuit = Circuit::for_function("f", 1, 0);
        let ctor = circuit.arg(crate::ir::NUM_COMMON_ARGS);
        let mut b = CircuitBuilder::new(&mut circuit);
        let this = b.typed_new_allocate_this(ctor);
        b.return_(this);
        assert_eq!(TypeLowering::new().run(&mut circuit).unwrap(), 2);
        verify(&circuit).unwrap();
        assert_eq!(count(&circuit, |op| op == OpCode::HeapAlloc), 0);
        let new_this = OpCode::Call(CallTarget::Runtime(RuntimeStubId::NewThisObject));
        assert_eq!(count(&circuit, |op| op == new_this), 1);
    }
}
