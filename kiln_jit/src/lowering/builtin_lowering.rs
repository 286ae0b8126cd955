//! Inline expansion of recognized `Math` builtins.
//!
//! A call recognized from type information arrives as a `CallTargetCheck`
//! on the callee followed by a `TypedCallBuiltin`. The check compares the
//! builtin id stored in the callee's method; the call becomes double
//! arithmetic on the argument, or a no-GC runtime call for the
//! transcendental functions.

use kiln_core::{DeoptType, KilnError, KilnResult};
use kiln_runtime::layout::{function, method};
use kiln_runtime::{BuiltinId, JsType, RuntimeStubId};

use super::find_frame_state;
use super::type_lowering::lower_check;
use crate::builder::CircuitBuilder;
use crate::ir::{Circuit, GateRef, GateType, MachineType};

/// Sign bit of an IEEE double.
const SIGN_MASK: u64 = 1 << 63;

/// Lowering of builtin call HIR; driven by [`super::TypeLowering`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinLowering;

impl BuiltinLowering {
    /// `CallTargetCheck(id)`: the callee is a function whose method carries
    /// builtin id `id`.
    ///
    /// # Errors
    ///
    /// Fails if the check's uses cannot be redirected.
    pub fn lower_call_target_check(circuit: &mut Circuit, gate: GateRef, id: BuiltinId) -> KilnResult<bool> {
        let func = circuit.value_in(gate, 0);
        lower_check(circuit, gate, DeoptType::NotCallTarget, |b| {
            let initial = b.boolean(false);
            let result = b.new_variable(MachineType::I1, GateType::NJSValue, initial);
            let is_function = b.tagged_is_object_type(func, JsType::JsFunction);
            let check = b.new_label();
            let exit = b.new_label();
            b.branch(is_function, check, exit);
            b.bind(check);
            let m = b.load_field(func, function::METHOD_OFFSET);
            let builtin = b.load_at(MachineType::I32, m, method::BUILTIN_ID_OFFSET);
            let expected = b.int32(id as u32 as i32);
            let same = b.int32_equal(builtin, expected);
            b.write(result, same);
            b.jump(exit);
            b.bind(exit);
            b.read(result)
        })
    }

    /// `TypedCallBuiltin(id)` with `[func, this, arg]`.
    ///
    /// # Errors
    ///
    /// Returns [`KilnError::Unsupported`] for ids without an inline form.
    pub fn lower_typed_call_builtin(circuit: &mut Circuit, gate: GateRef, id: BuiltinId) -> KilnResult<bool> {
        if !id.is_typed_builtin() {
            return Err(KilnError::Unsupported(format!("inline builtin {}", id.name())));
        }
        let arg = circuit.value_in(gate, 2);
        let frame_state = find_frame_state(circuit, gate);
        let mut b = CircuitBuilder::at(circuit, gate);
        let is_number = b.tagged_is_number(arg);
        b.deopt_check(DeoptType::NotNumber, is_number, frame_state);
        let x = b.get_double_of_tnumber(arg);
        let r = match id {
            BuiltinId::Sqrt => sqrt(&mut b, x),
            BuiltinId::Abs => abs(&mut b, x),
            BuiltinId::Floor => b.call_ngc_runtime(RuntimeStubId::FloatFloor, &[x]),
            BuiltinId::Cos => b.call_ngc_runtime(RuntimeStubId::FloatCos, &[x]),
            BuiltinId::Sin => b.call_ngc_runtime(RuntimeStubId::FloatSin, &[x]),
            BuiltinId::ACos => b.call_ngc_runtime(RuntimeStubId::FloatACos, &[x]),
            _ => b.call_ngc_runtime(RuntimeStubId::FloatATan, &[x]),
        };
        let value = b.double_to_tagged_number(r);
        let position = b.position();
        circuit.replace_hir(gate, position, None, value)?;
        Ok(true)
    }
}

/// Negative inputs (but not `-0`) give NaN without calling out.
fn sqrt(b: &mut CircuitBuilder<'_>, x: GateRef) -> GateRef {
    let nan = b.double(f64::NAN);
    let result = b.new_variable(MachineType::F64, GateType::NJSValue, nan);
    let zero = b.double(0.0);
    let negative = b.double_less_than(x, zero);
    let compute = b.new_label();
    let exit = b.new_label();
    b.branch(negative, exit, compute);
    b.bind(compute);
    let root = b.call_ngc_runtime(RuntimeStubId::FloatSqrt, &[x]);
    b.write(result, root);
    b.jump(exit);
    b.bind(exit);
    b.read(result)
}

/// Clear the sign bit.
fn abs(b: &mut CircuitBuilder<'_>, x: GateRef) -> GateRef {
    let bits = b.bitcast(x, MachineType::I64);
    let mask = b.int_ptr(!SIGN_MASK);
    let cleared = b.int64_and(bits, mask);
    b.bitcast(cleared, MachineType::F64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{verify, BytecodeBuilder, CallTarget, EcmaOpcode, OpCode};
    use crate::lowering::{LoweringPass, TsTypeLowering, TypeLowering};

    fn count(circuit: &Circuit, pred: impl Fn(OpCode) -> bool) -> usize {
        circuit.all_gates().into_iter().filter(|&g| pred(circuit.opcode(g))).count()
    }

    fn math_call(id: BuiltinId, arg_type: GateType) -> Circuit {
        let mut circuit = Circuit::for_function("f", 2, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let (func, x) = (bc.param(0), bc.param(1));
        bc.set_type(func, GateType::BuiltinFunction(id));
        bc.set_type(x, arg_type);
        let r = bc.emit(EcmaOpcode::CallArg1, &[x, func]);
        bc.ret(r);
        TsTypeLowering::default().run(&mut circuit).unwrap();
        TypeLowering::new().run(&mut circuit).unwrap();
        verify(&circuit).unwrap();
        circuit
    }

    #[test]
    fn test_sqrt_calls_float_sqrt_once() {
        let circuit = math_call(BuiltinId::Sqrt, GateType::Double);
        let float_sqrt = OpCode::Call(CallTarget::NoGc(RuntimeStubId::FloatSqrt));
        assert_eq!(count(&circuit, |op| op == float_sqrt), 1);
        assert_eq!(count(&circuit, |op| op == OpCode::DeoptCheck(DeoptType::NotCallTarget)), 1);
        assert_eq!(count(&circuit, |op| op == OpCode::DeoptCheck(DeoptType::NotNumber)), 1);
        assert_eq!(count(&circuit, |op| matches!(op, OpCode::TypedCallBuiltin(_))), 0);
    }

    #[test]
    fn test_abs_is_inline() {
        let circuit = math_call(BuiltinId::Abs, GateType::Int);
        assert_eq!(count(&circuit, |op| matches!(op, OpCode::Call(CallTarget::NoGc(_)))), 0);
        let mask = circuit.all_gates().into_iter().any(|g| circuit.constant_value(g) == Some(!SIGN_MASK));
        assert!(mask);
    }

    #[test]
    fn test_floor_uses_runtime() {
        let circuit = math_call(BuiltinId::Floor, GateType::Number);
        let float_floor = OpCode::Call(CallTarget::NoGc(RuntimeStubId::FloatFloor));
        assert_eq!(count(&circuit, |op| op == float_floor), 1);
    }

    #[test]
    fn test_disabled_inlining_calls_the_function() {
        let mut circuit = Circuit::for_function("f", 2, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let (func, x) = (bc.param(0), bc.param(1));
        bc.set_type(func, GateType::BuiltinFunction(BuiltinId::Cos));
        bc.set_type(x, GateType::Double);
        let r = bc.emit(EcmaOpcode::CallArg1, &[x, func]);
        bc.ret(r);
        TsTypeLowering::default().run(&mut circuit).unwrap();
        TypeLowering::new().with_builtin_lowering(false).run(&mut circuit).unwrap();
        verify(&circuit).unwrap();
        assert_eq!(count(&circuit, |op| matches!(op, OpCode::Call(CallTarget::Js))), 1);
        assert_eq!(count(&circuit, |op| matches!(op, OpCode::Call(CallTarget::NoGc(_)))), 0);
    }
}
