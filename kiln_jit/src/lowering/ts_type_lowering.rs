//! Type-feedback lowering.
//!
//! Rewrites bytecodes whose operands carry sound type information into a
//! guard followed by typed HIR. A specialized bytecode keeps its
//! `StateSplit`: the guards chain after it and deoptimize to its frame
//! state. A bytecode left generic loses its `StateSplit` and frame state
//! here, so no `JsBytecode` depends on a split once the pass is done (see
//! [`crate::ir::verify_guard`]).

use tracing::debug;

use kiln_core::KilnResult;
use kiln_runtime::{GlobalEnvField, RuntimeStubId};

use super::{remove_state_split, LoweringPass};
use crate::builder::CircuitBuilder;
use crate::ir::{
    Circuit, CommonArg, EcmaOpcode, ElementKind, GateRef, GateType, OpCode, TypedBinOp, TypedJumpOp, TypedUnOp,
};
use crate::type_info::TypeInfo;

/// Type-feedback lowering pass.
#[derive(Debug, Clone, Default)]
pub struct TsTypeLowering {
    type_info: TypeInfo,
    profiling: bool,
}

impl TsTypeLowering {
    /// Pass specializing against `type_info`.
    #[must_use]
    pub fn new(type_info: TypeInfo) -> Self {
        Self {
            type_info,
            profiling: false,
        }
    }

    /// Also report the function to the profiler on entry.
    #[must_use]
    pub fn with_profiling(mut self, profiling: bool) -> Self {
        self.profiling = profiling;
        self
    }

    /// Class layouts used for property and `new` specialization.
    #[must_use]
    pub fn type_info(&self) -> &TypeInfo {
        &self.type_info
    }

    fn lower(&self, circuit: &mut Circuit, gate: GateRef, op: EcmaOpcode) -> KilnResult<bool> {
        use EcmaOpcode as E;

        if let Some(bin) = TypedBinOp::from_bytecode(op) {
            return lower_binary(circuit, gate, bin);
        }
        match op {
            E::Inc | E::Dec | E::Neg | E::Not => lower_arith_unary(circuit, gate, op),
            E::ToNumber | E::ToNumeric => lower_to_numeric(circuit, gate),
            E::IsTrue | E::IsFalse => lower_truthiness(circuit, gate, op),
            E::Jeqz | E::Jnez => lower_jump(circuit, gate, op),
            E::LdObjByName => self.lower_named_load(circuit, gate),
            E::StObjByName => self.lower_named_store(circuit, gate),
            E::LdObjByValue => lower_element_load(circuit, gate, 1, 2),
            E::LdObjByIndex => lower_element_load(circuit, gate, 0, 1),
            E::StObjByValue => lower_element_store(circuit, gate, 1, 2, 3),
            E::StObjByIndex => lower_element_store(circuit, gate, 0, 1, 2),
            E::CallArg1 | E::CallThis1 => lower_builtin_call(circuit, gate, op),
            E::NewObjRange => self.lower_new(circuit, gate),
            E::SuperCallThisRange => lower_super_call(circuit, gate),
            _ => Ok(false),
        }
    }

    // =========================================================================
    // Property Access
    // =========================================================================

    /// `[slot, key, receiver]` on a class instance with a known inline slot,
    /// or `length` of an array.
    fn lower_named_load(&self, circuit: &mut Circuit, gate: GateRef) -> KilnResult<bool> {
        let (key, receiver) = (circuit.value_in(gate, 1), circuit.value_in(gate, 2));
        let Some(key) = circuit.constant_value(key) else {
            return Ok(false);
        };
        let receiver_type = circuit.gate_type(receiver);

        if self.type_info.is_length_key(key) && matches!(receiver_type, GateType::Array | GateType::Float32Array) {
            let mut b = CircuitBuilder::at(circuit, gate);
            if receiver_type == GateType::Array {
                b.array_check(receiver);
            } else {
                b.typed_array_check(receiver);
            }
            let length = b.load_array_length(receiver);
            let position = b.position();
            circuit.replace_hir(gate, position, None, length)?;
            return Ok(true);
        }

        let Some((hclass, offset)) = self.inline_slot(receiver_type, key) else {
            return Ok(false);
        };
        let mut b = CircuitBuilder::at(circuit, gate);
        let hclass = b.tagged(hclass);
        b.object_type_check(receiver, hclass);
        let offset = b.int_ptr(offset);
        let value = b.load_property(receiver, offset);
        let position = b.position();
        circuit.replace_hir(gate, position, None, value)?;
        Ok(true)
    }

    /// `[slot, key, receiver, value]` on a class instance with a known
    /// inline slot.
    fn lower_named_store(&self, circuit: &mut Circuit, gate: GateRef) -> KilnResult<bool> {
        let (key, receiver, value) = (circuit.value_in(gate, 1), circuit.value_in(gate, 2), circuit.value_in(gate, 3));
        let Some(key) = circuit.constant_value(key) else {
            return Ok(false);
        };
        let Some((hclass, offset)) = self.inline_slot(circuit.gate_type(receiver), key) else {
            return Ok(false);
        };
        let mut b = CircuitBuilder::at(circuit, gate);
        let hclass = b.tagged(hclass);
        b.object_type_check(receiver, hclass);
        let offset = b.int_ptr(offset);
        b.store_property(receiver, offset, value);
        let position = b.position();
        circuit.replace_hir(gate, position, None, value)?;
        Ok(true)
    }

    fn inline_slot(&self, receiver_type: GateType, key: u64) -> Option<(kiln_core::TaggedValue, u64)> {
        let class = receiver_type.class_instance()?;
        let hclass = self.type_info.class_hclass(class)?;
        let offset = self.type_info.property_offset(class, key)?;
        Some((hclass, offset))
    }

    // =========================================================================
    // Construction
    // =========================================================================

    /// `new C(args)` for a base class with recorded layout.
    fn lower_new(&self, circuit: &mut Circuit, gate: GateRef) -> KilnResult<bool> {
        let values = circuit.value_ins(gate);
        let ctor = values[0];
        let Some(class) = circuit.gate_type(ctor).class_constructor() else {
            return Ok(false);
        };
        if !self.type_info.is_base_class(class) {
            return Ok(false);
        }
        let mut b = CircuitBuilder::at(circuit, gate);
        let this = b.typed_new_allocate_this(ctor);
        let construct = b.construct(ctor, ctor, this, &values[1..]);
        transfer_to(circuit, gate, construct)?;
        Ok(true)
    }

    // =========================================================================
    // Profiling
    // =========================================================================

    /// Call `ProfileOptimizedCode` before anything else in the function.
    fn insert_profiling(circuit: &mut Circuit) {
        let entry = circuit.depend_entry();
        let users = circuit.uses(entry);
        let func = circuit.common_arg(CommonArg::Func);
        let mut b = CircuitBuilder::new(circuit);
        let offset = b.tagged_int(0);
        let call = b.call_runtime(RuntimeStubId::ProfileOptimizedCode, &[func, offset]);
        for u in users {
            circuit.replace_in(u.user, u.index as usize, call);
        }
    }
}

impl LoweringPass for TsTypeLowering {
    fn name(&self) -> &'static str {
        "ts_type_lowering"
    }

    fn run(&mut self, circuit: &mut Circuit) -> KilnResult<usize> {
        if self.profiling && matches!(circuit.layout(), crate::ir::ArgLayout::Function { .. }) {
            Self::insert_profiling(circuit);
        }
        let mut lowered = 0;
        for gate in circuit.all_gates() {
            if circuit.is_dead(gate) {
                continue;
            }
            let OpCode::JsBytecode { op, bc_offset } = circuit.opcode(gate) else {
                continue;
            };
            if self.lower(circuit, gate, op)? {
                debug!(%op, bc_offset, "typed");
                lowered += 1;
            } else if !circuit.is_dead(gate) {
                remove_state_split(circuit, gate)?;
            }
        }
        Ok(lowered)
    }
}

// =============================================================================
// Guards
// =============================================================================

/// Guard `value` to `ty` unless it is a constant of that type already.
fn guard(b: &mut CircuitBuilder<'_>, ty: GateType, value: GateRef) {
    if matches!(b.circuit_ref().opcode(value), OpCode::Constant(_)) {
        return;
    }
    b.primitive_type_check(ty, value);
}

/// Point the exception projections of `gate` at `replacement`, then every
/// other use.
fn transfer_to(circuit: &mut Circuit, gate: GateRef, replacement: GateRef) -> KilnResult<()> {
    for u in circuit.uses(gate) {
        if matches!(circuit.opcode(u.user), OpCode::IfSuccess | OpCode::IfException) {
            circuit.replace_in(u.user, u.index as usize, replacement);
        }
    }
    circuit.replace_gate(gate, replacement, replacement, replacement)
}

// =============================================================================
// Arithmetic
// =============================================================================

/// Result type of a typed binary operator.
fn binary_result_type(op: TypedBinOp, left: GateType, right: GateType) -> GateType {
    if op.is_comparison() {
        GateType::Boolean
    } else if op == TypedBinOp::Shr {
        GateType::Number
    } else if op.is_bitwise() {
        GateType::Int
    } else if left.is_double() && right.is_double() && op != TypedBinOp::Mod {
        GateType::Double
    } else {
        GateType::Number
    }
}

fn lower_binary(circuit: &mut Circuit, gate: GateRef, op: TypedBinOp) -> KilnResult<bool> {
    let (left, right) = (circuit.value_in(gate, 0), circuit.value_in(gate, 1));
    let (lt, rt) = (circuit.gate_type(left), circuit.gate_type(right));
    if !lt.is_number() || !rt.is_number() {
        return Ok(false);
    }
    let mut b = CircuitBuilder::at(circuit, gate);
    guard(&mut b, lt, left);
    guard(&mut b, rt, right);
    let result = b.typed_binary_op(op, lt, rt, left, right, binary_result_type(op, lt, rt));
    let position = b.position();
    circuit.replace_hir(gate, position, None, result)?;
    Ok(true)
}

fn lower_arith_unary(circuit: &mut Circuit, gate: GateRef, op: EcmaOpcode) -> KilnResult<bool> {
    let Some(un) = TypedUnOp::from_bytecode(op) else {
        return Ok(false);
    };
    let value = circuit.value_in(gate, 0);
    let ty = circuit.gate_type(value);
    if !ty.is_number() {
        return Ok(false);
    }
    let mut b = CircuitBuilder::at(circuit, gate);
    guard(&mut b, ty, value);
    let result_type = if un == TypedUnOp::Not {
        GateType::Int
    } else {
        if ty.is_int() {
            b.int32_overflow_check(un, value);
        }
        ty
    };
    let result = b.typed_unary_op(un, ty, value, result_type);
    let position = b.position();
    circuit.replace_hir(gate, position, None, result)?;
    Ok(true)
}

fn lower_to_numeric(circuit: &mut Circuit, gate: GateRef) -> KilnResult<bool> {
    let value = circuit.value_in(gate, 0);
    let ty = circuit.gate_type(value);
    if !ty.is_digitable_primitive() {
        return Ok(false);
    }
    let mut b = CircuitBuilder::at(circuit, gate);
    guard(&mut b, ty, value);
    let result = if ty.is_number() {
        b.typed_unary_op(TypedUnOp::ToNumber, ty, value, ty)
    } else {
        let to = if ty == GateType::Undefined { GateType::Double } else { GateType::Int };
        b.type_convert(ty, to, value)
    };
    let position = b.position();
    circuit.replace_hir(gate, position, None, result)?;
    Ok(true)
}

fn lower_truthiness(circuit: &mut Circuit, gate: GateRef, op: EcmaOpcode) -> KilnResult<bool> {
    let value = circuit.value_in(gate, 0);
    let ty = circuit.gate_type(value);
    if !ty.is_boolean() && !ty.is_number() {
        return Ok(false);
    }
    let un = if op == EcmaOpcode::IsTrue { TypedUnOp::IsTrue } else { TypedUnOp::IsFalse };
    let mut b = CircuitBuilder::at(circuit, gate);
    guard(&mut b, ty, value);
    let result = b.typed_unary_op(un, ty, value, GateType::Boolean);
    let position = b.position();
    circuit.replace_hir(gate, position, None, result)?;
    Ok(true)
}

/// `Jeqz`/`Jnez` on a boolean becomes a `TypedJump` with the same
/// projections.
fn lower_jump(circuit: &mut Circuit, gate: GateRef, op: EcmaOpcode) -> KilnResult<bool> {
    let cond = circuit.value_in(gate, 0);
    if !circuit.gate_type(cond).is_boolean() {
        return Ok(false);
    }
    let jump_op = if op == EcmaOpcode::Jeqz { TypedJumpOp::Jeqz } else { TypedJumpOp::Jnez };
    let mut b = CircuitBuilder::at(circuit, gate);
    guard(&mut b, GateType::Boolean, cond);
    let jump = b.typed_jump(jump_op, cond);
    circuit.replace_gate(gate, jump, jump, GateRef::INVALID)?;
    Ok(true)
}

// =============================================================================
// Elements
// =============================================================================

fn element_kind(ty: GateType) -> Option<ElementKind> {
    match ty {
        GateType::Array => Some(ElementKind::Array),
        GateType::Float32Array => Some(ElementKind::Float32Array),
        _ => None,
    }
}

fn receiver_checks(b: &mut CircuitBuilder<'_>, kind: ElementKind, receiver: GateRef, index: GateRef) {
    match kind {
        ElementKind::Array => b.stable_array_check(receiver),
        ElementKind::Float32Array => b.typed_array_check(receiver),
    };
    guard(b, GateType::Int, index);
    b.index_check(kind, receiver, index);
}

fn lower_element_load(circuit: &mut Circuit, gate: GateRef, receiver: usize, index: usize) -> KilnResult<bool> {
    let (receiver, index) = (circuit.value_in(gate, receiver), circuit.value_in(gate, index));
    let Some(kind) = element_kind(circuit.gate_type(receiver)) else {
        return Ok(false);
    };
    if !circuit.gate_type(index).is_int() {
        return Ok(false);
    }
    let mut b = CircuitBuilder::at(circuit, gate);
    receiver_checks(&mut b, kind, receiver, index);
    let value = b.load_element(kind, receiver, index);
    let position = b.position();
    circuit.replace_hir(gate, position, None, value)?;
    Ok(true)
}

fn lower_element_store(
    circuit: &mut Circuit,
    gate: GateRef,
    receiver: usize,
    index: usize,
    value: usize,
) -> KilnResult<bool> {
    let (receiver, index, value) = (
        circuit.value_in(gate, receiver),
        circuit.value_in(gate, index),
        circuit.value_in(gate, value),
    );
    let Some(kind) = element_kind(circuit.gate_type(receiver)) else {
        return Ok(false);
    };
    let value_type = circuit.gate_type(value);
    if !circuit.gate_type(index).is_int() || (kind == ElementKind::Float32Array && !value_type.is_number()) {
        return Ok(false);
    }
    let mut b = CircuitBuilder::at(circuit, gate);
    receiver_checks(&mut b, kind, receiver, index);
    if kind == ElementKind::Float32Array {
        guard(&mut b, value_type, value);
    }
    b.store_element(kind, receiver, index, value);
    let position = b.position();
    circuit.replace_hir(gate, position, None, value)?;
    Ok(true)
}

// =============================================================================
// Calls
// =============================================================================

/// `Math.fn(x)` on a number. A call through a receiver also guards that
/// the receiver is still the global `Math` object.
fn lower_builtin_call(circuit: &mut Circuit, gate: GateRef, op: EcmaOpcode) -> KilnResult<bool> {
    let values = circuit.value_ins(gate);
    let (this, arg) = if op == EcmaOpcode::CallThis1 {
        (Some(values[0]), values[1])
    } else {
        (None, values[0])
    };
    let func = values[values.len() - 1];
    let Some(id) = circuit.gate_type(func).builtin() else {
        return Ok(false);
    };
    let arg_type = circuit.gate_type(arg);
    if !id.is_typed_builtin() || !arg_type.is_number() {
        return Ok(false);
    }
    let mut b = CircuitBuilder::at(circuit, gate);
    b.call_target_check(id, func);
    if let Some(receiver) = this {
        b.receiver_check(GlobalEnvField::MathObject, receiver);
    }
    guard(&mut b, arg_type, arg);
    let this = match this {
        Some(this) => this,
        None => b.undefined(),
    };
    let result = b.typed_call_builtin(id, func, this, &[arg]);
    b.circuit().set_gate_type(result, GateType::Number);
    let position = b.position();
    circuit.replace_hir(gate, position, None, result)?;
    Ok(true)
}

/// `super(args)` in a class constructor.
fn lower_super_call(circuit: &mut Circuit, gate: GateRef) -> KilnResult<bool> {
    let func = circuit.common_arg(CommonArg::Func);
    if circuit.gate_type(func).class_constructor().is_none() {
        return Ok(false);
    }
    let new_target = circuit.common_arg(CommonArg::NewTarget);
    let args = circuit.value_ins(gate);
    let mut b = CircuitBuilder::at(circuit, gate);
    let super_ctor = b.get_super_constructor(func);
    let this = b.typed_super_allocate_this(super_ctor, new_target);
    let construct = b.construct(super_ctor, new_target, this, &args);
    transfer_to(circuit, gate, construct)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{verify, verify_guard, BytecodeBuilder};
    use kiln_runtime::{BuiltinId, FunctionKind};

    fn count(circuit: &Circuit, pred: impl Fn(OpCode) -> bool) -> usize {
        circuit.all_gates().into_iter().filter(|&g| pred(circuit.opcode(g))).count()
    }

    fn lower(circuit: &mut Circuit) -> usize {
        TsTypeLowering::default().run(circuit).unwrap()
    }

    #[test]
    fn test_int_add_is_guarded() {
        let mut circuit = Circuit::for_function("f", 2, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let (a, b) = (bc.param(0), bc.param(1));
        bc.set_type(a, GateType::Int);
        bc.set_type(b, GateType::Int);
        let sum = bc.emit(EcmaOpcode::Add2, &[a, b]);
        bc.ret(sum);

        assert_eq!(lower(&mut circuit), 1);
        assert_eq!(count(&circuit, |op| matches!(op, OpCode::PrimitiveTypeCheck(GateType::Int))), 2);
        assert_eq!(count(&circuit, |op| matches!(op, OpCode::TypedBinaryOp { .. })), 1);
        assert_eq!(count(&circuit, |op| matches!(op, OpCode::IfException)), 0);
        verify(&circuit).unwrap();
        assert!(verify_guard(&circuit).is_empty());
    }

    #[test]
    fn test_untyped_bytecode_loses_state_split() {
        let mut circuit = Circuit::for_function("f", 2, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let (a, b) = (bc.param(0), bc.param(1));
        let sum = bc.emit(EcmaOpcode::Add2, &[a, b]);
        bc.ret(sum);

        assert!(!verify_guard(&circuit).is_empty());
        assert_eq!(lower(&mut circuit), 0);
        assert_eq!(count(&circuit, |op| op == OpCode::StateSplit), 0);
        assert_eq!(count(&circuit, |op| matches!(op, OpCode::FrameState(_))), 0);
        assert!(verify_guard(&circuit).is_empty());
        verify(&circuit).unwrap();
    }

    #[test]
    fn test_int_inc_checks_overflow() {
        let mut circuit = Circuit::for_function("f", 1, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let a = bc.param(0);
        bc.set_type(a, GateType::Int);
        let inc = bc.emit(EcmaOpcode::Inc, &[a]);
        bc.ret(inc);
        lower(&mut circuit);
        assert_eq!(count(&circuit, |op| op == OpCode::Int32OverflowCheck(TypedUnOp::Inc)), 1);
        verify(&circuit).unwrap();
    }

    #[test]
    fn test_math_call_on_number() {
        let mut circuit = Circuit::for_function("f", 2, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let (sqrt, x) = (bc.param(0), bc.param(1));
        bc.set_type(sqrt, GateType::BuiltinFunction(BuiltinId::Sqrt));
        bc.set_type(x, GateType::Double);
        let r = bc.emit(EcmaOpcode::CallArg1, &[x, sqrt]);
        bc.ret(r);
        lower(&mut circuit);
        assert_eq!(count(&circuit, |op| op == OpCode::CallTargetCheck(BuiltinId::Sqrt)), 1);
        assert_eq!(count(&circuit, |op| op == OpCode::TypedCallBuiltin(BuiltinId::Sqrt)), 1);
        assert_eq!(count(&circuit, |op| matches!(op, OpCode::ReceiverCheck(_))), 0);
        verify(&circuit).unwrap();
    }

    #[test]
    fn test_math_method_call_guards_receiver() {
        let mut circuit = Circuit::for_function("f", 3, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let (math, sqrt, x) = (bc.param(0), bc.param(1), bc.param(2));
        bc.set_type(math, GateType::MathObject);
        bc.set_type(sqrt, GateType::BuiltinFunction(BuiltinId::Sqrt));
        bc.set_type(x, GateType::Double);
        let r = bc.emit(EcmaOpcode::CallThis1, &[math, x, sqrt]);
        bc.ret(r);
        lower(&mut circuit);
        assert_eq!(count(&circuit, |op| op == OpCode::ReceiverCheck(GlobalEnvField::MathObject)), 1);
        assert_eq!(count(&circuit, |op| op == OpCode::TypedCallBuiltin(BuiltinId::Sqrt)), 1);
        verify(&circuit).unwrap();
    }

    #[test]
    fn test_boolean_jump_becomes_typed_jump() {
        let mut circuit = Circuit::for_function("f", 1, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let cond = bc.param(0);
        bc.set_type(cond, GateType::Boolean);
        let (taken, fall) = (bc.new_label(), bc.new_label());
        bc.jump_if(EcmaOpcode::Jeqz, cond, taken, fall);
        bc.bind(taken);
        let one = bc.int(1);
        bc.ret(one);
        bc.bind(fall);
        let two = bc.int(2);
        bc.ret(two);
        lower(&mut circuit);
        assert_eq!(count(&circuit, |op| op == OpCode::TypedJump(TypedJumpOp::Jeqz)), 1);
        verify(&circuit).unwrap();
    }

    #[test]
    fn test_new_on_base_class() {
        let mut thread = kiln_runtime::JsThread::new().unwrap();
        let native = thread.register_native("C", std::rc::Rc::new(|_, _| kiln_core::TaggedValue::UNDEFINED));
        let method = thread
            .new_method(native, kiln_runtime::layout::method::NO_BUILTIN, FunctionKind::BaseConstructor, 0)
            .unwrap();
        let ctor = thread
            .new_function(method, FunctionKind::BaseConstructor, kiln_core::TaggedValue::UNDEFINED)
            .unwrap();
        let mut info = TypeInfo::new();
        info.record_constructor(&thread, 3, ctor).unwrap();

        let mut circuit = Circuit::for_function("f", 1, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let c = bc.param(0);
        bc.set_type(c, GateType::ClassConstructor(3));
        let obj = bc.emit(EcmaOpcode::NewObjRange, &[c]);
        bc.ret(obj);

        assert_eq!(TsTypeLowering::new(info).run(&mut circuit).unwrap(), 1);
        assert_eq!(count(&circuit, |op| op == OpCode::TypedNewAllocateThis), 1);
        assert_eq!(count(&circuit, |op| op == OpCode::Construct), 1);
        assert_eq!(count(&circuit, |op| op == OpCode::IfException), 1);
        verify(&circuit).unwrap();
    }

    #[test]
    fn test_profiling_call_on_entry() {
        let mut circuit = Circuit::for_function("f", 0, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        bc.ret_undefined();
        TsTypeLowering::default().with_profiling(true).run(&mut circuit).unwrap();
        let profile = OpCode::Call(crate::ir::CallTarget::Runtime(RuntimeStubId::ProfileOptimizedCode));
        assert_eq!(count(&circuit, |op| op == profile), 1);
        verify(&circuit).unwrap();
    }
}
