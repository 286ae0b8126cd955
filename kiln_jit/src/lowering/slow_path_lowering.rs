//! Generic lowering of everything type feedback left behind.
//!
//! Each remaining bytecode becomes a call into the runtime, a common stub or
//! the JS call trampoline. Every call is followed by an exception check: the
//! exceptional continuation takes over the bytecode's `IfException` and the
//! normal one its `IfSuccess` (the two-exit convention). Jumps become
//! `IfBranch`es, returns feed their `Return` gate directly, and `DeoptCheck`s
//! branch to a `Deopt` exit. Once everything is lowered the remaining
//! `StateSplit`s are unlinked from the depend chain.

use tracing::{debug, trace};

use kiln_core::{DeoptType, KilnError, KilnResult, TaggedValue};
use kiln_runtime::layout::{async_generator_object, function, generator_context, generator_object, lexical_env, method};
use kiln_runtime::{glue, CommonStubId, ConstantIndex, JsType, RuntimeStubId};

use super::generic::{call_parts, common_stub, compute_call_argc, runtime_operands, FrameArgs, Operand};
use super::{delete_state_split, find_frame_state, frame_state_offset, join_exits, LoweringPass};
use crate::builder::{CircuitBuilder, Label, Variable};
use crate::ir::{Circuit, CommonArg, EcmaOpcode, GateRef, GateType, MachineType, OpCode, NUM_COMMON_ARGS};
use crate::stubs::new_object;

const _: () = assert!(generator_object::GENERATOR_CONTEXT_OFFSET == async_generator_object::GENERATOR_CONTEXT_OFFSET);
const _: () = assert!(generator_object::RESUME_MODE_OFFSET == async_generator_object::RESUME_MODE_OFFSET);

/// Slow path lowering pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlowPathLowering {
    trace_bytecode: bool,
}

impl SlowPathLowering {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trace every bytecode as it is lowered.
    #[must_use]
    pub fn with_trace_bytecode(mut self, enabled: bool) -> Self {
        self.trace_bytecode = enabled;
        self
    }
}

impl LoweringPass for SlowPathLowering {
    fn name(&self) -> &'static str {
        "slow_path_lowering"
    }

    fn run(&mut self, circuit: &mut Circuit) -> KilnResult<usize> {
        let saved = saved_registers(circuit);
        let mut lowered = 0;
        for gate in circuit.all_gates() {
            if circuit.is_dead(gate) {
                continue;
            }
            let op = circuit.opcode(gate);
            let done = match op {
                OpCode::JsBytecode { op: bytecode, bc_offset } => {
                    if self.trace_bytecode {
                        trace!(%bytecode, bc_offset, gate = gate.index(), "slow path");
                    }
                    lower_bytecode(circuit, gate, bytecode, bc_offset, saved)?
                }
                OpCode::UpdateHotness(distance) => lower_update_hotness(circuit, gate, distance)?,
                OpCode::DeoptCheck(reason) => lower_deopt_check(circuit, gate, reason)?,
                OpCode::Construct => lower_construct(circuit, gate)?,
                OpCode::GetException => lower_get_exception(circuit, gate)?,
                _ => false,
            };
            if done {
                debug!(%op, gate = gate.index(), "lowered");
                lowered += 1;
            }
        }
        for gate in circuit.all_gates() {
            if !circuit.is_dead(gate) && circuit.opcode(gate) == OpCode::StateSplit {
                delete_state_split(circuit, gate)?;
            }
        }
        Ok(lowered)
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Registers a resumed generator may read back: the widest register list
/// any `SuspendGenerator` saves, or every register when nothing suspends.
fn saved_registers(circuit: &Circuit) -> usize {
    circuit
        .all_gates()
        .into_iter()
        .filter(|&g| !circuit.is_dead(g))
        .filter(|&g| circuit.opcode(g).bytecode() == Some(EcmaOpcode::SuspendGenerator))
        .map(|g| circuit.num_value_in(g) - 3)
        .max()
        .unwrap_or(circuit.num_vregs() as usize)
}

fn frame_args(circuit: &Circuit) -> FrameArgs<GateRef> {
    FrameArgs {
        func: circuit.common_arg(CommonArg::Func),
        new_target: circuit.common_arg(CommonArg::NewTarget),
        this: circuit.common_arg(CommonArg::This),
        env: circuit.common_arg(CommonArg::Env),
        params: (NUM_COMMON_ARGS..circuit.num_args() as u32).map(|i| circuit.arg(i)).collect(),
    }
}

fn has_exception_exit(circuit: &Circuit, gate: GateRef) -> bool {
    circuit
        .state_users(gate)
        .iter()
        .any(|&u| circuit.opcode(u) == OpCode::IfException)
}

/// Hand an exceptional continuation to the gate's `IfException`, or end it
/// with the exception sentinel when the gate has none.
fn route_exception(b: &mut CircuitBuilder<'_>, exit: (GateRef, GateRef), throws: bool) -> Option<(GateRef, GateRef)> {
    if throws {
        return Some(exit);
    }
    let sentinel = b.exception();
    b.gate(OpCode::Return, MachineType::NoValue, &[exit.0], &[exit.1], &[sentinel], GateType::Any);
    None
}

/// Check `result` for the exception sentinel and route the exceptional side.
fn checked(b: &mut CircuitBuilder<'_>, result: GateRef, throws: bool) -> Option<(GateRef, GateRef)> {
    let exit = b.check_exception(result);
    route_exception(b, exit, throws)
}

/// Bytecode offset of the frame state in effect at `gate`.
fn bc_offset_at(circuit: &mut Circuit, gate: GateRef) -> u32 {
    let frame_state = find_frame_state(circuit, gate);
    let offset = frame_state_offset(circuit, frame_state);
    if circuit.use_count(frame_state) == 0 {
        circuit.delete_gate(frame_state);
    }
    offset
}

/// Non-negative tagged int constant operand.
fn constant_index(circuit: &Circuit, gate: GateRef, operand: usize) -> KilnResult<u32> {
    let value = circuit.value_in(gate, operand);
    circuit
        .constant_value(value)
        .map(TaggedValue)
        .filter(|v| v.is_int() && v.as_int() >= 0)
        .map(|v| v.as_int() as u32)
        .ok_or_else(|| KilnError::malformed(gate.index(), format!("operand {operand} is not a constant index")))
}

// =============================================================================
// Bytecodes
// =============================================================================

fn lower_bytecode(
    circuit: &mut Circuit,
    gate: GateRef,
    op: EcmaOpcode,
    bc_offset: u32,
    saved: usize,
) -> KilnResult<bool> {
    use EcmaOpcode as E;

    let argc = circuit.num_value_in(gate);
    if !op.accepts(argc) {
        return Err(KilnError::malformed(gate.index(), format!("{op} with {argc} operands")));
    }
    match op {
        E::Jeqz | E::Jnez => lower_jump(circuit, gate, op),
        E::Return => {
            let (state, depend, value) = (circuit.state_in(gate, 0), circuit.dep(gate), circuit.value_in(gate, 0));
            circuit.replace_gate(gate, state, depend, value)?;
            Ok(true)
        }
        E::ReturnUndefined => {
            let (state, depend) = (circuit.state_in(gate, 0), circuit.dep(gate));
            circuit.replace_gate(gate, state, depend, GateRef::INVALID)?;
            Ok(true)
        }
        E::LdNaN
        | E::LdInfinity
        | E::LdUndefined
        | E::LdNull
        | E::LdTrue
        | E::LdFalse
        | E::LdHole
        | E::LdGlobal
        | E::LdThis
        | E::LdFunction
        | E::LdNewTarget => lower_frame_load(circuit, gate, op),
        E::IsTrue | E::IsFalse => lower_truthiness(circuit, gate, op),
        // [slot, key, receiver(, value)]
        E::LdObjByName => lower_property_ic(circuit, gate, CommonStubId::GetPropertyByName, 2, 1, None),
        E::StObjByName => lower_property_ic(circuit, gate, CommonStubId::SetPropertyByName, 2, 1, Some(3)),
        // [slot, receiver, key(, value)]
        E::LdObjByValue => lower_property_ic(circuit, gate, CommonStubId::GetPropertyByValue, 1, 2, None),
        E::StObjByValue => lower_property_ic(circuit, gate, CommonStubId::SetPropertyByValue, 1, 2, Some(3)),
        E::LdObjByIndex => lower_stub_call(circuit, gate, CommonStubId::GetPropertyByIndex, &[0, 1]),
        E::StObjByIndex => lower_stub_call(circuit, gate, CommonStubId::SetPropertyByIndex, &[0, 1, 2]),
        E::TryLdGlobalByName => lower_stub_call(circuit, gate, CommonStubId::TryLdGlobalByName, &[1]),
        E::StGlobalVar => lower_stub_call(circuit, gate, CommonStubId::StGlobalVar, &[1, 2]),
        E::PopLexEnv | E::LdLexVar | E::StLexVar => lower_lexical_env(circuit, gate, op),
        E::CreateEmptyObject | E::CreateEmptyArray | E::GetUnmappedArgs | E::NewLexEnv => {
            lower_new_object(circuit, gate, op)
        }
        E::ThrowUndefinedIfHole => lower_throw_if_hole(circuit, gate),
        E::ThrowIfNotObject => lower_throw_if_not_object(circuit, gate),
        E::SuspendGenerator => lower_suspend(circuit, gate, bc_offset),
        E::ResumeGenerator => lower_resume(circuit, gate, saved),
        E::GetResumeMode => lower_resume_mode(circuit, gate),
        E::ToNumber => lower_to_number(circuit, gate),
        E::StrictEq | E::StrictNotEq => lower_strict_equal(circuit, gate, op),
        E::TypeOf => lower_type_of(circuit, gate),
        _ if op.is_call_arg() || op.is_call_this() => lower_call(circuit, gate, op, bc_offset),
        _ => match common_stub(op) {
            Some(id) => {
                let operands: Vec<usize> = (0..argc).collect();
                lower_stub_call(circuit, gate, id, &operands)
            }
            None => lower_runtime_call(circuit, gate, op),
        },
    }
}

/// `Jeqz`/`Jnez`: ints and booleans are tested inline, anything else asks
/// the runtime for its truthiness. The jump keeps its projections.
fn lower_jump(circuit: &mut Circuit, gate: GateRef, op: EcmaOpcode) -> KilnResult<bool> {
    let cond = circuit.value_in(gate, 0);
    let mut b = CircuitBuilder::at(circuit, gate);
    let initial = b.boolean(false);
    let truthy = b.new_variable(MachineType::I1, GateType::NJSValue, initial);
    let int_case = b.new_label();
    let not_int = b.new_label();
    let bool_case = b.new_label();
    let slow = b.new_label();
    let exit = b.new_label();
    let is_int = b.tagged_is_int(cond);
    b.branch(is_int, int_case, not_int);
    b.bind(int_case);
    let payload = b.get_int32_of_tint(cond);
    let zero = b.int32(0);
    let nonzero = b.int32_not_equal(payload, zero);
    b.write(truthy, nonzero);
    b.jump(exit);
    b.bind(not_int);
    let is_boolean = b.tagged_is_boolean(cond);
    b.branch(is_boolean, bool_case, slow);
    b.bind(bool_case);
    let is_true = b.tagged_is_true(cond);
    b.write(truthy, is_true);
    b.jump(exit);
    b.bind(slow);
    let converted = b.call_ngc_runtime(RuntimeStubId::ToBoolean, &[cond]);
    b.write(truthy, converted);
    b.jump(exit);
    b.bind(exit);
    let truthy = b.read(truthy);
    let taken = if op == EcmaOpcode::Jeqz { b.bool_not(truthy) } else { truthy };
    let (state, depend) = b.position();
    let branch = b.gate(OpCode::IfBranch, MachineType::NoValue, &[state], &[], &[taken], GateType::Any);
    circuit.replace_gate(gate, branch, depend, GateRef::INVALID)?;
    Ok(true)
}

fn lower_frame_load(circuit: &mut Circuit, gate: GateRef, op: EcmaOpcode) -> KilnResult<bool> {
    use EcmaOpcode as E;

    let mut b = CircuitBuilder::at(circuit, gate);
    let value = match op {
        E::LdNaN => b.tagged_nan(),
        E::LdInfinity => b.tagged_typed(TaggedValue::double(f64::INFINITY), GateType::Double),
        E::LdUndefined => b.undefined(),
        E::LdNull => b.null(),
        E::LdTrue => b.tagged_true(),
        E::LdFalse => b.tagged_false(),
        E::LdHole => b.hole(),
        E::LdGlobal => b.load_glue(glue::GLOBAL_OBJECT_OFFSET),
        E::LdThis => b.circuit_ref().common_arg(CommonArg::This),
        E::LdFunction => b.circuit_ref().common_arg(CommonArg::Func),
        _ => b.circuit_ref().common_arg(CommonArg::NewTarget),
    };
    let position = b.position();
    circuit.replace_hir(gate, position, None, value)?;
    Ok(true)
}

fn lower_truthiness(circuit: &mut Circuit, gate: GateRef, op: EcmaOpcode) -> KilnResult<bool> {
    let value = circuit.value_in(gate, 0);
    let mut b = CircuitBuilder::at(circuit, gate);
    let truthy = b.call_ngc_runtime(RuntimeStubId::ToBoolean, &[value]);
    let flag = if op == EcmaOpcode::IsFalse { b.bool_not(truthy) } else { truthy };
    let result = b.boolean_to_tagged(flag);
    let position = b.position();
    circuit.replace_hir(gate, position, None, result)?;
    Ok(true)
}

/// The generic path: one runtime stub call.
fn lower_runtime_call(circuit: &mut Circuit, gate: GateRef, op: EcmaOpcode) -> KilnResult<bool> {
    let values = circuit.value_ins(gate);
    let frame = frame_args(circuit);
    let Some((id, operands)) = runtime_operands(op, &values, &frame) else {
        return Err(KilnError::Unreachable(format!("{op} has no runtime form")));
    };
    let throws = has_exception_exit(circuit, gate);
    let mut b = CircuitBuilder::at(circuit, gate);
    let args: Vec<GateRef> = operands
        .into_iter()
        .map(|operand| match operand {
            Operand::Value(g) => g,
            Operand::Const(v) => b.tagged(v),
        })
        .collect();
    let result = b.call_runtime(id, &args);
    let exit = checked(&mut b, result, throws);
    let position = b.position();
    circuit.replace_hir(gate, position, exit, result)?;
    Ok(true)
}

/// A common stub taking the listed operands in order.
fn lower_stub_call(circuit: &mut Circuit, gate: GateRef, id: CommonStubId, operands: &[usize]) -> KilnResult<bool> {
    let args: Vec<GateRef> = operands.iter().map(|&i| circuit.value_in(gate, i)).collect();
    let throws = has_exception_exit(circuit, gate);
    let mut b = CircuitBuilder::at(circuit, gate);
    let result = b.call_stub(id, &args);
    let exit = checked(&mut b, result, throws);
    let position = b.position();
    circuit.replace_hir(gate, position, exit, result)?;
    Ok(true)
}

// =============================================================================
// Operators
// =============================================================================

/// `[value]`: numbers pass through, anything else converts in the runtime.
fn lower_to_number(circuit: &mut Circuit, gate: GateRef) -> KilnResult<bool> {
    let value = circuit.value_in(gate, 0);
    let throws = has_exception_exit(circuit, gate);
    let mut b = CircuitBuilder::at(circuit, gate);
    let result = b.new_variable(MachineType::I64, GateType::Any, value);
    let slow = b.new_label();
    let exit = b.new_label();
    let is_number = b.tagged_is_number(value);
    b.branch(is_number, exit, slow);
    b.bind(slow);
    let converted = b.call_runtime(RuntimeStubId::ToNumber, &[value]);
    let raised = checked(&mut b, converted, throws);
    b.write(result, converted);
    b.jump(exit);
    b.bind(exit);
    let number = b.read(result);
    let position = b.position();
    circuit.replace_hir(gate, position, raised, number)?;
    Ok(true)
}

/// `[left, right]`: `===` inline. Identical words are equal unless they are
/// NaN, two numbers compare as doubles, and only two strings need the
/// runtime; any other pair is unequal.
fn lower_strict_equal(circuit: &mut Circuit, gate: GateRef, op: EcmaOpcode) -> KilnResult<bool> {
    let (left, right) = (circuit.value_in(gate, 0), circuit.value_in(gate, 1));
    let throws = has_exception_exit(circuit, gate);
    let mut b = CircuitBuilder::at(circuit, gate);
    let initial = b.boolean(false);
    let result = b.new_variable(MachineType::I1, GateType::NJSValue, initial);
    let same = b.new_label();
    let different = b.new_label();
    let numbers = b.new_label();
    let others = b.new_label();
    let left_string = b.new_label();
    let strings = b.new_label();
    let exit = b.new_label();

    let identical = b.tagged_equal(left, right);
    b.branch(identical, same, different);
    b.bind(same);
    let is_double = b.tagged_is_double(left);
    let payload = b.get_double_of_tdouble(left);
    let is_nan = b.double_is_nan(payload);
    let nan = b.bool_and(is_double, is_nan);
    let equal = b.bool_not(nan);
    b.write(result, equal);
    b.jump(exit);

    b.bind(different);
    let left_number = b.tagged_is_number(left);
    let right_number = b.tagged_is_number(right);
    let both_numbers = b.bool_and(left_number, right_number);
    b.branch(both_numbers, numbers, others);
    b.bind(numbers);
    let x = b.get_double_of_tnumber(left);
    let y = b.get_double_of_tnumber(right);
    let equal = b.double_equal(x, y);
    b.write(result, equal);
    b.jump(exit);

    b.bind(others);
    let is_string = b.tagged_is_string(left);
    b.branch(is_string, left_string, exit);
    b.bind(left_string);
    let is_string = b.tagged_is_string(right);
    b.branch(is_string, strings, exit);
    b.bind(strings);
    let compared = b.call_runtime(RuntimeStubId::StrictEq, &[left, right]);
    let raised = checked(&mut b, compared, throws);
    let yes = b.tagged_true();
    let equal = b.tagged_equal(compared, yes);
    b.write(result, equal);
    b.jump(exit);

    b.bind(exit);
    let equal = b.read(result);
    let flag = if op == EcmaOpcode::StrictNotEq { b.bool_not(equal) } else { equal };
    let value = b.boolean_to_tagged(flag);
    let position = b.position();
    circuit.replace_hir(gate, position, raised, value)?;
    Ok(true)
}

/// Leave with the `typeof` string `name` when `cond` holds.
fn type_of_case(b: &mut CircuitBuilder<'_>, cond: GateRef, name: ConstantIndex, result: Variable, exit: Label) {
    let hit = b.new_label();
    let next = b.new_label();
    b.branch(cond, hit, next);
    b.bind(hit);
    let name = b.global_constant(name);
    b.write(result, name);
    b.jump(exit);
    b.bind(next);
}

/// `[value]`: the `typeof` string from the global constants. Heap objects
/// that are neither strings, callables nor JS objects ask the runtime.
fn lower_type_of(circuit: &mut Circuit, gate: GateRef) -> KilnResult<bool> {
    let value = circuit.value_in(gate, 0);
    let throws = has_exception_exit(circuit, gate);
    let mut b = CircuitBuilder::at(circuit, gate);
    let undefined_name = b.global_constant(ConstantIndex::UndefinedString);
    let result = b.new_variable(MachineType::I64, GateType::String, undefined_name);
    let exit = b.new_label();

    let is_number = b.tagged_is_number(value);
    type_of_case(&mut b, is_number, ConstantIndex::NumberString, result, exit);
    let is_boolean = b.tagged_is_boolean(value);
    type_of_case(&mut b, is_boolean, ConstantIndex::BooleanString, result, exit);
    let is_null = b.tagged_is_null(value);
    type_of_case(&mut b, is_null, ConstantIndex::ObjectString, result, exit);
    let is_undefined = b.tagged_is_undefined(value);
    let is_hole = b.tagged_is_hole(value);
    let absent = b.bool_or(is_undefined, is_hole);
    type_of_case(&mut b, absent, ConstantIndex::UndefinedString, result, exit);
    let is_string = b.tagged_is_string(value);
    type_of_case(&mut b, is_string, ConstantIndex::StringString, result, exit);
    let is_callable = b.tagged_is_callable(value);
    type_of_case(&mut b, is_callable, ConstantIndex::FunctionString, result, exit);
    let is_object = b.tagged_is_js_object(value);
    type_of_case(&mut b, is_object, ConstantIndex::ObjectString, result, exit);

    let name = b.call_runtime(RuntimeStubId::TypeOf, &[value]);
    let raised = checked(&mut b, name, throws);
    b.write(result, name);
    b.jump(exit);
    b.bind(exit);
    let name = b.read(result);
    let position = b.position();
    circuit.replace_hir(gate, position, raised, name)?;
    Ok(true)
}

// =============================================================================
// Property Access
// =============================================================================

/// Profile array of the running function, created on first use.
fn load_profile(b: &mut CircuitBuilder<'_>) -> GateRef {
    let func = b.circuit_ref().common_arg(CommonArg::Func);
    let m = b.load_field(func, function::METHOD_OFFSET);
    let current = b.load_field(m, method::PROFILE_TYPE_INFO_OFFSET);
    let profile = b.new_variable(MachineType::I64, GateType::Any, current);
    let missing = b.tagged_is_undefined(current);
    let create = b.new_label();
    let exit = b.new_label();
    b.branch(missing, create, exit);
    b.bind(create);
    let created = b.call_runtime(RuntimeStubId::UpdateHotnessCounter, &[func]);
    b.write(profile, created);
    b.jump(exit);
    b.bind(exit);
    b.read(profile)
}

/// Name and value access through the inline cache stubs:
/// `{receiver, key(, value), profile, slot}`.
fn lower_property_ic(
    circuit: &mut Circuit,
    gate: GateRef,
    id: CommonStubId,
    receiver: usize,
    key: usize,
    value: Option<usize>,
) -> KilnResult<bool> {
    let values = circuit.value_ins(gate);
    let slot = values[0];
    let throws = has_exception_exit(circuit, gate);
    let mut b = CircuitBuilder::at(circuit, gate);
    let profile = load_profile(&mut b);
    let mut args = vec![values[receiver], values[key]];
    args.extend(value.map(|i| values[i]));
    args.extend([profile, slot]);
    let result = b.call_stub(id, &args);
    let exit = checked(&mut b, result, throws);
    let position = b.position();
    circuit.replace_hir(gate, position, exit, result)?;
    Ok(true)
}

// =============================================================================
// Lexical Environments
// =============================================================================

fn parent_env(b: &mut CircuitBuilder<'_>, env: GateRef, levels: u32) -> GateRef {
    (0..levels).fold(env, |env, _| {
        b.get_value_from_tagged_array_at(env, lexical_env::PARENT_ENV_INDEX)
    })
}

fn lower_lexical_env(circuit: &mut Circuit, gate: GateRef, op: EcmaOpcode) -> KilnResult<bool> {
    let values = circuit.value_ins(gate);
    let slots = match op {
        EcmaOpcode::PopLexEnv => None,
        _ => Some((constant_index(circuit, gate, 0)?, constant_index(circuit, gate, 1)?)),
    };
    let mut b = CircuitBuilder::at(circuit, gate);
    let value = match (op, slots) {
        (EcmaOpcode::LdLexVar, Some((level, slot))) => {
            let env = parent_env(&mut b, values[2], level);
            b.get_value_from_tagged_array_at(env, lexical_env::RESERVED_ENV_LENGTH + slot)
        }
        (EcmaOpcode::StLexVar, Some((level, slot))) => {
            let env = parent_env(&mut b, values[3], level);
            b.set_value_to_tagged_array_at(env, lexical_env::RESERVED_ENV_LENGTH + slot, values[2]);
            b.undefined()
        }
        _ => parent_env(&mut b, values[0], 1),
    };
    let position = b.position();
    circuit.replace_hir(gate, position, None, value)?;
    Ok(true)
}

// =============================================================================
// Allocation
// =============================================================================

/// Inline allocation of literals, `arguments` and environments. A
/// `NewLexEnv` with a dynamic slot count stays a runtime call.
fn lower_new_object(circuit: &mut Circuit, gate: GateRef, op: EcmaOpcode) -> KilnResult<bool> {
    let num_vars = match op {
        EcmaOpcode::NewLexEnv => match constant_index(circuit, gate, 0) {
            Ok(n) => Some(n),
            Err(_) => return lower_runtime_call(circuit, gate, op),
        },
        _ => None,
    };
    let values = circuit.value_ins(gate);
    let params = frame_args(circuit).params;
    let mut b = CircuitBuilder::at(circuit, gate);
    let obj = match (op, num_vars) {
        (EcmaOpcode::NewLexEnv, Some(n)) => new_object::new_lexical_env(&mut b, values[1], n),
        (EcmaOpcode::CreateEmptyArray, _) => new_object::new_empty_array(&mut b),
        (EcmaOpcode::GetUnmappedArgs, _) => new_object::new_arguments_obj(&mut b, &params),
        _ => new_object::new_js_object(&mut b, ConstantIndex::ObjectClass),
    };
    let position = b.position();
    circuit.replace_hir(gate, position, None, obj)?;
    Ok(true)
}

// =============================================================================
// Conditional Throws
// =============================================================================

/// `[value, name]`: throw a `ReferenceError` naming `name` if `value` is the
/// hole.
fn lower_throw_if_hole(circuit: &mut Circuit, gate: GateRef) -> KilnResult<bool> {
    let (value, name) = (circuit.value_in(gate, 0), circuit.value_in(gate, 1));
    let throws = has_exception_exit(circuit, gate);
    let mut b = CircuitBuilder::at(circuit, gate);
    let is_hole = b.tagged_is_hole(value);
    let throw = b.new_label();
    let ok = b.new_label();
    b.branch(is_hole, throw, ok);
    b.bind(throw);
    b.call_runtime(RuntimeStubId::ThrowUndefinedIfHole, &[name]);
    let raised = b.position();
    let exit = route_exception(&mut b, raised, throws);
    b.bind(ok);
    let position = b.position();
    circuit.replace_hir(gate, position, exit, value)?;
    Ok(true)
}

fn lower_throw_if_not_object(circuit: &mut Circuit, gate: GateRef) -> KilnResult<bool> {
    let value = circuit.value_in(gate, 0);
    let throws = has_exception_exit(circuit, gate);
    let mut b = CircuitBuilder::at(circuit, gate);
    let is_object = b.tagged_is_js_object(value);
    let ok = b.new_label();
    let throw = b.new_label();
    b.branch(is_object, ok, throw);
    b.bind(throw);
    b.call_runtime(RuntimeStubId::ThrowIfNotObject, &[]);
    let raised = b.position();
    let exit = route_exception(&mut b, raised, throws);
    b.bind(ok);
    let position = b.position();
    circuit.replace_hir(gate, position, exit, value)?;
    Ok(true)
}

// =============================================================================
// Calls
// =============================================================================

fn lower_call(circuit: &mut Circuit, gate: GateRef, op: EcmaOpcode, bc_offset: u32) -> KilnResult<bool> {
    let values = circuit.value_ins(gate);
    let (Some((func, this, args)), Some(argc)) = (call_parts(op, &values), compute_call_argc(op, values.len())) else {
        return Err(KilnError::Unreachable(format!("{op} is not a call")));
    };
    let env = circuit.common_arg(CommonArg::Env);
    let throws = has_exception_exit(circuit, gate);
    let mut b = CircuitBuilder::at(circuit, gate);
    let this = match this {
        Some(this) => this,
        None => b.undefined(),
    };
    let new_target = b.undefined();
    let result = b.js_call(env, argc, func, new_target, this, args, bc_offset, false);
    let exit = checked(&mut b, result, throws);
    let position = b.position();
    circuit.replace_hir(gate, position, exit, result)?;
    Ok(true)
}

/// `[func, newTarget, this, args...]`: `JSCallNew`, then the constructor
/// result check.
fn lower_construct(circuit: &mut Circuit, gate: GateRef) -> KilnResult<bool> {
    let values = circuit.value_ins(gate);
    let (func, new_target, this) = (values[0], values[1], values[2]);
    let bc_offset = bc_offset_at(circuit, gate);
    let env = circuit.common_arg(CommonArg::Env);
    let throws = has_exception_exit(circuit, gate);
    let mut b = CircuitBuilder::at(circuit, gate);
    let args = &values[3..];
    let result = b.js_call(env, CircuitBuilder::call_argc(args), func, new_target, this, args, bc_offset, true);
    let mut exits = Vec::with_capacity(2);
    exits.extend(checked(&mut b, result, throws));
    let object = b.call_stub(CommonStubId::ConstructorCheck, &[func, result, this]);
    exits.extend(checked(&mut b, object, throws));
    let exit = join_exits(&mut b, &exits);
    let position = b.position();
    circuit.replace_hir(gate, position, exit, object)?;
    Ok(true)
}

// =============================================================================
// Frame Bookkeeping
// =============================================================================

/// Subtract the back-edge distance from the method's hotness counter; once
/// it runs out the runtime resets it and sets up the profile.
fn lower_update_hotness(circuit: &mut Circuit, gate: GateRef, distance: i32) -> KilnResult<bool> {
    let func = circuit.common_arg(CommonArg::Func);
    let mut b = CircuitBuilder::at(circuit, gate);
    let m = b.load_field(func, function::METHOD_OFFSET);
    let counter = b.load_at(MachineType::I16, m, method::HOTNESS_OFFSET);
    let wide = b.unary(OpCode::Sext, MachineType::I32, counter);
    let delta = b.int32(distance);
    let updated = b.int32_add(wide, delta);
    let zero = b.int32(0);
    let exhausted = b.int32_less_than(updated, zero);
    let reset = b.new_label();
    let store = b.new_label();
    let exit = b.new_label();
    b.branch(exhausted, reset, store);
    b.bind(reset);
    b.call_runtime(RuntimeStubId::UpdateHotnessCounter, &[func]);
    b.jump(exit);
    b.bind(store);
    let narrow = b.trunc_to_int16(updated);
    b.store_at(MachineType::I16, m, method::HOTNESS_OFFSET, narrow);
    b.jump(exit);
    b.bind(exit);
    let position = b.position();
    circuit.replace_hir(gate, position, None, GateRef::INVALID)?;
    Ok(true)
}

/// `[condition, frameState]`: continue when the condition holds, otherwise
/// leave through a `Deopt` carrying the frame state.
fn lower_deopt_check(circuit: &mut Circuit, gate: GateRef, reason: DeoptType) -> KilnResult<bool> {
    let (condition, frame_state) = (circuit.value_in(gate, 0), circuit.value_in(gate, 1));
    let mut b = CircuitBuilder::at(circuit, gate);
    let ok = b.new_label();
    let fail = b.new_label();
    b.branch(condition, ok, fail);
    b.bind(fail);
    b.effect_gate(OpCode::Deopt(reason), MachineType::NoValue, &[frame_state], GateType::Any);
    b.return_void();
    b.bind(ok);
    let position = b.position();
    circuit.replace_hir(gate, position, None, GateRef::INVALID)?;
    Ok(true)
}

/// Take the pending exception and clear the slot.
fn lower_get_exception(circuit: &mut Circuit, gate: GateRef) -> KilnResult<bool> {
    let depend = circuit.dep(gate);
    let mut b = CircuitBuilder::at_position(circuit, GateRef::INVALID, depend);
    let exception = b.pending_exception();
    let hole = b.hole();
    let glue_arg = b.glue();
    b.store_at(MachineType::I64, glue_arg, glue::EXCEPTION_OFFSET, hole);
    let depend = b.depend();
    circuit.replace_gate(gate, GateRef::INVALID, depend, exception)?;
    Ok(true)
}

// =============================================================================
// Generators
// =============================================================================

/// `[generator, value, env, registers...]`: save the frame into the
/// generator context, then let the runtime mark the generator suspended.
fn lower_suspend(circuit: &mut Circuit, gate: GateRef, bc_offset: u32) -> KilnResult<bool> {
    let values = circuit.value_ins(gate);
    let (generator, value, env, registers) = (values[0], values[1], values[2], &values[3..]);
    let func = circuit.common_arg(CommonArg::Func);
    let this = circuit.common_arg(CommonArg::This);
    let throws = has_exception_exit(circuit, gate);
    let mut b = CircuitBuilder::at(circuit, gate);
    let context = b.load_field(generator, generator_object::GENERATOR_CONTEXT_OFFSET);
    let count = b.tagged_int(registers.len() as i32);
    let array = b.call_runtime(RuntimeStubId::NewTaggedArray, &[count]);
    for (index, &register) in registers.iter().enumerate() {
        b.set_value_to_tagged_array_at(array, index as u32, register);
    }
    b.store_field(context, generator_context::REGS_ARRAY_OFFSET, array);
    b.store_field(context, generator_context::METHOD_OFFSET, func);
    b.store_field(context, generator_context::THIS_OFFSET, this);
    b.store_field(context, generator_context::ACC_OFFSET, value);
    b.store_field(context, generator_context::GENERATOR_OBJECT_OFFSET, generator);
    b.store_field(context, generator_context::LEXICAL_ENV_OFFSET, env);
    let nregs = b.int32(registers.len() as i32);
    b.store_at(MachineType::I32, context, generator_context::NREGS_OFFSET, nregs);
    let offset = b.int32(bc_offset as i32);
    b.store_at(MachineType::I32, context, generator_context::BC_OFFSET_OFFSET, offset);
    let result = b.call_runtime(RuntimeStubId::OptSuspendGenerator, &[generator, value]);
    let exit = checked(&mut b, result, throws);
    let position = b.position();
    circuit.replace_hir(gate, position, exit, result)?;
    Ok(true)
}

/// Value passed to `next`, stored at a layout-specific offset.
fn load_resume_result(b: &mut CircuitBuilder<'_>, generator: GateRef) -> GateRef {
    let undefined = b.undefined();
    let result = b.new_variable(MachineType::I64, GateType::Any, undefined);
    let is_async = b.tagged_is_object_type(generator, JsType::JsAsyncGeneratorObject);
    let async_gen = b.new_label();
    let sync_gen = b.new_label();
    let exit = b.new_label();
    b.branch(is_async, async_gen, sync_gen);
    b.bind(async_gen);
    let value = b.load_field(generator, async_generator_object::ASYNC_GENERATOR_RESUME_RESULT_OFFSET);
    b.write(result, value);
    b.jump(exit);
    b.bind(sync_gen);
    let value = b.load_field(generator, generator_object::RESUME_RESULT_OFFSET);
    b.write(result, value);
    b.jump(exit);
    b.bind(exit);
    b.read(result)
}

/// `[generator]`: restore the saved registers and environment and produce
/// the resume value.
fn lower_resume(circuit: &mut Circuit, gate: GateRef, saved: usize) -> KilnResult<bool> {
    let generator = circuit.value_in(gate, 0);
    let env_restores: Vec<GateRef> = circuit
        .uses(gate)
        .into_iter()
        .filter(|u| circuit.opcode(u.user) == OpCode::RestoreEnv)
        .map(|u| u.user)
        .collect();
    let restores: Vec<(GateRef, u16)> = circuit
        .uses(gate)
        .into_iter()
        .filter_map(|u| match circuit.opcode(u.user) {
            OpCode::RestoreRegister(index) => Some((u.user, index)),
            _ => None,
        })
        .collect();
    if let Some(&(_, index)) = restores.iter().find(|&&(_, index)| usize::from(index) >= saved) {
        return Err(KilnError::RegisterCountMismatch {
            saved,
            restored: usize::from(index) + 1,
        });
    }
    let mut b = CircuitBuilder::at(circuit, gate);
    let context = b.load_field(generator, generator_object::GENERATOR_CONTEXT_OFFSET);
    let registers = b.load_field(context, generator_context::REGS_ARRAY_OFFSET);
    let loaded: Vec<(GateRef, GateRef)> = restores
        .iter()
        .map(|&(restore, index)| (restore, b.get_value_from_tagged_array_at(registers, u32::from(index))))
        .collect();
    let env = b.load_field(context, generator_context::LEXICAL_ENV_OFFSET);
    let result = load_resume_result(&mut b, generator);
    let position = b.position();
    for (restore, value) in loaded {
        circuit.replace_gate(restore, GateRef::INVALID, GateRef::INVALID, value)?;
    }
    for restore in env_restores {
        circuit.replace_gate(restore, GateRef::INVALID, GateRef::INVALID, env)?;
    }
    circuit.replace_hir(gate, position, None, result)?;
    Ok(true)
}

fn lower_resume_mode(circuit: &mut Circuit, gate: GateRef) -> KilnResult<bool> {
    let generator = circuit.value_in(gate, 0);
    let mut b = CircuitBuilder::at(circuit, gate);
    let mode = b.load_field(generator, generator_object::RESUME_MODE_OFFSET);
    let position = b.position();
    circuit.replace_hir(gate, position, None, mode)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{verify, BytecodeBuilder, CallTarget};
    use crate::lowering::{TsTypeLowering, TypeLowering};

    fn count(circuit: &Circuit, pred: impl Fn(OpCode) -> bool) -> usize {
        circuit.all_gates().into_iter().filter(|&g| pred(circuit.opcode(g))).count()
    }

    fn lower(circuit: &mut Circuit) -> usize {
        let lowered = SlowPathLowering::new().run(circuit).unwrap();
        verify(circuit).unwrap();
        assert_eq!(count(circuit, OpCode::is_hir), 0);
        assert_eq!(count(circuit, |op| op == OpCode::StateSplit), 0);
        lowered
    }

    fn unary(op: EcmaOpcode) -> Circuit {
        let mut circuit = Circuit::for_function("f", 1, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let x = bc.param(0);
        let r = bc.emit(op, &[x]);
        bc.ret(r);
        circuit
    }

    #[test]
    fn test_generic_add_calls_common_stub() {
        let mut circuit = Circuit::for_function("f", 2, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let (a, b) = (bc.param(0), bc.param(1));
        let sum = bc.emit(EcmaOpcode::Add2, &[a, b]);
        bc.ret(sum);
        assert_eq!(lower(&mut circuit), 2);
        let add = OpCode::Call(CallTarget::Common(CommonStubId::Add));
        assert_eq!(count(&circuit, |op| op == add), 1);
        assert_eq!(count(&circuit, |op| matches!(op, OpCode::Call(CallTarget::Runtime(_)))), 0);
        assert_eq!(count(&circuit, |op| matches!(op, OpCode::FrameState(_))), 0);
        assert_eq!(count(&circuit, |op| op == OpCode::IfException), 0);
        assert_eq!(count(&circuit, |op| op == OpCode::Return), 2);
    }

    #[test]
    fn test_call_goes_through_trampoline() {
        let mut circuit = Circuit::for_function("f", 2, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let (func, x) = (bc.param(0), bc.param(1));
        let r = bc.emit(EcmaOpcode::CallArg1, &[x, func]);
        bc.ret(r);
        TsTypeLowering::default().run(&mut circuit).unwrap();
        lower(&mut circuit);
        assert_eq!(count(&circuit, |op| op == OpCode::Call(CallTarget::Js)), 1);
        let call = circuit
            .all_gates()
            .into_iter()
            .find(|&g| circuit.opcode(g) == OpCode::Call(CallTarget::Js))
            .unwrap();
        // glue, env, argc, func, newTarget, this, x, bcOffset
        assert_eq!(circuit.num_value_in(call), 8);
        assert_eq!(circuit.value_in(call, 3), func);
    }

    #[test]
    fn test_call_argc_follows_the_call_variant() {
        let argc_of = |op: EcmaOpcode, operands: u32| {
            let mut circuit = Circuit::for_function("f", operands, 0);
            let mut bc = BytecodeBuilder::new(&mut circuit);
            let values: Vec<_> = (0..operands).map(|i| bc.param(i)).collect();
            let r = bc.emit(op, &values);
            bc.ret(r);
            lower(&mut circuit);
            let call = circuit
                .all_gates()
                .into_iter()
                .find(|&g| circuit.opcode(g) == OpCode::Call(CallTarget::Js))
                .unwrap();
            circuit.constant_value(circuit.value_in(call, 2))
        };
        // CallArg1: [x, func]
        assert_eq!(argc_of(EcmaOpcode::CallArg1, 2), Some(4));
        // CallThis2: [this, x, y, func]
        assert_eq!(argc_of(EcmaOpcode::CallThis2, 4), Some(5));
        // CallThis0: [this, func]
        assert_eq!(argc_of(EcmaOpcode::CallThis0, 2), Some(3));
    }

    #[test]
    fn test_jeqz_becomes_branch_on_truthiness() {
        let mut circuit = Circuit::for_function("f", 1, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let cond = bc.param(0);
        let (taken, fall) = (bc.new_label(), bc.new_label());
        bc.jump_if(EcmaOpcode::Jeqz, cond, taken, fall);
        bc.bind(taken);
        let one = bc.int(1);
        bc.ret(one);
        bc.bind(fall);
        let two = bc.int(2);
        bc.ret(two);
        lower(&mut circuit);
        let to_boolean = OpCode::Call(CallTarget::NoGc(RuntimeStubId::ToBoolean));
        assert_eq!(count(&circuit, |op| op == to_boolean), 1);
        // int test, boolean test, then the jump itself
        assert_eq!(count(&circuit, |op| op == OpCode::IfBranch), 3);
    }

    #[test]
    fn test_comparisons_and_unary_ops_call_common_stubs() {
        let mut circuit = Circuit::for_function("f", 2, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let (a, b) = (bc.param(0), bc.param(1));
        let less = bc.emit(EcmaOpcode::Less, &[a, b]);
        let not = bc.emit(EcmaOpcode::Not, &[less]);
        let inc = bc.emit(EcmaOpcode::Inc, &[not]);
        let eq = bc.emit(EcmaOpcode::Eq, &[inc, a]);
        bc.ret(eq);
        lower(&mut circuit);
        let stub = |id| OpCode::Call(CallTarget::Common(id));
        for id in [CommonStubId::Less, CommonStubId::Not, CommonStubId::Inc, CommonStubId::Equal] {
            assert_eq!(count(&circuit, |op| op == stub(id)), 1, "{}", id.name());
        }
        assert_eq!(count(&circuit, |op| matches!(op, OpCode::Call(CallTarget::Runtime(_)))), 0);
    }

    #[test]
    fn test_to_number_converts_only_non_numbers() {
        let mut circuit = unary(EcmaOpcode::ToNumber);
        lower(&mut circuit);
        let convert = OpCode::Call(CallTarget::Runtime(RuntimeStubId::ToNumber));
        assert_eq!(count(&circuit, |op| op == convert), 1);
        assert_eq!(count(&circuit, |op| op == OpCode::IfBranch), 2);
        assert!(count(&circuit, |op| op == OpCode::ValueSelector) >= 1);
    }

    #[test]
    fn test_strict_equal_calls_runtime_only_for_strings() {
        for op in [EcmaOpcode::StrictEq, EcmaOpcode::StrictNotEq] {
            let mut circuit = Circuit::for_function("f", 2, 0);
            let mut bc = BytecodeBuilder::new(&mut circuit);
            let (a, b) = (bc.param(0), bc.param(1));
            let r = bc.emit(op, &[a, b]);
            bc.ret(r);
            lower(&mut circuit);
            let runtime = OpCode::Call(CallTarget::Runtime(RuntimeStubId::StrictEq));
            assert_eq!(count(&circuit, |op| op == runtime), 1);
            assert_eq!(count(&circuit, |op| op == OpCode::Fcmp(crate::ir::FCmpCond::Oeq)), 1);
        }
    }

    #[test]
    fn test_type_of_reads_constant_names() {
        let mut circuit = unary(EcmaOpcode::TypeOf);
        lower(&mut circuit);
        let runtime = OpCode::Call(CallTarget::Runtime(RuntimeStubId::TypeOf));
        assert_eq!(count(&circuit, |op| op == runtime), 1);
        // one glue load per name, plus the initial `undefined`
        let glue_loads = circuit
            .all_gates()
            .into_iter()
            .filter(|&g| circuit.opcode(g) == OpCode::Load)
            .filter(|&g| circuit.opcode(circuit.value_in(g, 0)) == OpCode::Arg(CommonArg::Glue as u32))
            .count();
        assert_eq!(glue_loads, 8);
    }

    #[test]
    fn test_named_load_reads_profile() {
        let mut circuit = Circuit::for_function("f", 2, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let (receiver, key) = (bc.param(0), bc.param(1));
        let slot = bc.int(0);
        let value = bc.emit(EcmaOpcode::LdObjByName, &[slot, key, receiver]);
        bc.ret(value);
        lower(&mut circuit);
        let ic = OpCode::Call(CallTarget::Common(CommonStubId::GetPropertyByName));
        let create = OpCode::Call(CallTarget::Runtime(RuntimeStubId::UpdateHotnessCounter));
        assert_eq!(count(&circuit, |op| op == ic), 1);
        assert_eq!(count(&circuit, |op| op == create), 1);
    }

    #[test]
    fn test_loop_back_edge_counts_hotness() {
        let mut circuit = Circuit::for_function("f", 0, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let header = bc.loop_header();
        let f = bc.emit(EcmaOpcode::LdFalse, &[]);
        let (body, exit) = (bc.new_label(), bc.new_label());
        bc.jump_if(EcmaOpcode::Jnez, f, body, exit);
        bc.bind(body);
        bc.loop_back(header, 4);
        bc.bind(exit);
        bc.ret_undefined();
        lower(&mut circuit);
        let reset = OpCode::Call(CallTarget::Runtime(RuntimeStubId::UpdateHotnessCounter));
        assert_eq!(count(&circuit, |op| op == reset), 1);
        let stores = circuit
            .all_gates()
            .into_iter()
            .filter(|&g| circuit.opcode(g) == OpCode::Store && circuit.machine_type(g) == MachineType::I16)
            .count();
        assert_eq!(stores, 1);
    }

    #[test]
    fn test_deopt_checks_exit_through_deopt() {
        let mut circuit = Circuit::for_function("f", 2, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let (a, b) = (bc.param(0), bc.param(1));
        bc.set_type(a, GateType::Int);
        bc.set_type(b, GateType::Int);
        let sum = bc.emit(EcmaOpcode::Add2, &[a, b]);
        bc.ret(sum);
        TsTypeLowering::default().run(&mut circuit).unwrap();
        TypeLowering::new().run(&mut circuit).unwrap();
        assert_eq!(lower(&mut circuit), 3);
        assert_eq!(count(&circuit, |op| op == OpCode::Deopt(DeoptType::NotInt)), 2);
        assert_eq!(count(&circuit, |op| op == OpCode::ReturnVoid), 2);
        assert!(count(&circuit, |op| matches!(op, OpCode::FrameState(_))) >= 1);
    }

    #[test]
    fn test_handler_takes_pending_exception() {
        let mut circuit = Circuit::for_function("f", 1, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let handler = bc.new_label();
        bc.set_handler(Some(handler));
        let v = bc.param(0);
        bc.emit(EcmaOpcode::Throw, &[v]);
        bc.set_handler(None);
        let undefined = bc.constant(TaggedValue::UNDEFINED, GateType::Undefined);
        bc.ret(undefined);
        let caught = bc.bind_handler(handler);
        bc.ret(caught);
        lower(&mut circuit);
        assert_eq!(count(&circuit, |op| op == OpCode::GetException), 0);
        let clears = circuit
            .all_gates()
            .into_iter()
            .filter(|&g| circuit.opcode(g) == OpCode::Store)
            .filter(|&g| circuit.constant_value(circuit.value_in(g, 2)) == Some(TaggedValue::HOLE.raw()))
            .count();
        assert_eq!(clears, 1);
    }

    #[test]
    fn test_lexical_variable_walks_parents() {
        let mut circuit = Circuit::for_function("f", 0, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let env = bc.env();
        let (level, slot) = (bc.int(2), bc.int(1));
        let value = bc.emit(EcmaOpcode::LdLexVar, &[level, slot, env]);
        bc.ret(value);
        lower(&mut circuit);
        assert_eq!(count(&circuit, |op| op == OpCode::Load), 3);
    }

    #[test]
    fn test_literals_allocate_inline() {
        let mut circuit = Circuit::for_function("f", 0, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let obj = bc.emit(EcmaOpcode::CreateEmptyObject, &[]);
        let arr = bc.emit(EcmaOpcode::CreateEmptyArray, &[]);
        let key = bc.int(0);
        bc.emit(EcmaOpcode::StOwnByValue, &[obj, key, arr]);
        bc.ret(obj);
        lower(&mut circuit);
        let runtime = |id| OpCode::Call(CallTarget::Runtime(id));
        assert_eq!(count(&circuit, |op| op == runtime(RuntimeStubId::CreateEmptyObject)), 0);
        assert_eq!(count(&circuit, |op| op == runtime(RuntimeStubId::CreateEmptyArray)), 0);
        // One bump allocation slow path per object.
        assert_eq!(count(&circuit, |op| op == runtime(RuntimeStubId::AllocateInYoung)), 2);
    }

    #[test]
    fn test_constant_lexical_env_is_inline() {
        let mut circuit = Circuit::for_function("f", 1, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let env = bc.env();
        let two = bc.int(2);
        let inner = bc.emit(EcmaOpcode::NewLexEnv, &[two, env]);
        let dynamic = bc.param(0);
        let other = bc.emit(EcmaOpcode::NewLexEnv, &[dynamic, inner]);
        bc.ret(other);
        lower(&mut circuit);
        let new_env = OpCode::Call(CallTarget::Runtime(RuntimeStubId::NewLexicalEnv));
        assert_eq!(count(&circuit, |op| op == new_env), 1);
    }

    #[test]
    fn test_dynamic_lexical_slot_is_rejected() {
        let mut circuit = Circuit::for_function("f", 1, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let env = bc.env();
        let level = bc.param(0);
        let slot = bc.int(0);
        let value = bc.emit(EcmaOpcode::LdLexVar, &[level, slot, env]);
        bc.ret(value);
        let err = SlowPathLowering::new().run(&mut circuit).unwrap_err();
        assert!(matches!(err, KilnError::MalformedGate { .. }));
    }

    #[test]
    fn test_generator_frame_round_trip() {
        let mut circuit = Circuit::for_function("g", 1, 2);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let generator = bc.param(0);
        let one = bc.int(1);
        bc.set_vreg(1, one);
        bc.suspend(generator, one);
        bc.resume(generator);
        let restored = bc.vreg(1);
        bc.ret(restored);
        lower(&mut circuit);
        let new_array = OpCode::Call(CallTarget::Runtime(RuntimeStubId::NewTaggedArray));
        let suspend = OpCode::Call(CallTarget::Runtime(RuntimeStubId::OptSuspendGenerator));
        assert_eq!(count(&circuit, |op| op == new_array), 1);
        assert_eq!(count(&circuit, |op| op == suspend), 1);
        assert_eq!(count(&circuit, |op| matches!(op, OpCode::RestoreRegister(_))), 0);
    }

    #[test]
    fn test_suspend_in_scope_saves_scope_env() {
        let mut circuit = Circuit::for_function("g", 1, 1);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let generator = bc.param(0);
        let outer = bc.env();
        let one = bc.int(1);
        let scope = bc.emit(EcmaOpcode::NewLexEnv, &[one, outer]);
        bc.set_env(scope);
        bc.suspend(generator, one);
        bc.resume(generator);
        let restored = bc.env();
        let slot = bc.int(0);
        let level = bc.int(0);
        let value = bc.emit(EcmaOpcode::LdLexVar, &[level, slot, restored]);
        bc.ret(value);
        lower(&mut circuit);

        let on_context = |g: GateRef| {
            let base = circuit.value_in(g, 0);
            circuit.opcode(base) == OpCode::Load && circuit.value_in(base, 0) == generator
        };
        let stored_at = |offset: u64| {
            circuit
                .all_gates()
                .into_iter()
                .filter(|&g| circuit.opcode(g) == OpCode::Store && on_context(g))
                .filter(|&g| circuit.constant_value(circuit.value_in(g, 1)) == Some(offset))
                .map(|g| circuit.value_in(g, 2))
                .collect::<Vec<_>>()
        };
        let saved_env = stored_at(generator_context::LEXICAL_ENV_OFFSET);
        assert_eq!(saved_env.len(), 1);
        assert_ne!(saved_env[0], circuit.common_arg(CommonArg::Env));
        assert_eq!(stored_at(generator_context::THIS_OFFSET), vec![circuit.common_arg(CommonArg::This)]);
        assert_eq!(stored_at(generator_context::METHOD_OFFSET), vec![circuit.common_arg(CommonArg::Func)]);
        assert_eq!(stored_at(generator_context::GENERATOR_OBJECT_OFFSET), vec![generator]);
        assert_eq!(count(&circuit, |op| op == OpCode::RestoreEnv), 0);
    }

    #[test]
    fn test_restoring_unsaved_register_fails() {
        let mut circuit = Circuit::for_function("g", 1, 2);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let generator = bc.param(0);
        let value = bc.int(0);
        bc.suspend(generator, value);
        let resumed = bc.resume(generator);
        let stray = bc.builder().gate(
            OpCode::RestoreRegister(5),
            MachineType::I64,
            &[],
            &[],
            &[resumed],
            GateType::Any,
        );
        bc.ret(stray);
        let err = SlowPathLowering::new().run(&mut circuit).unwrap_err();
        assert_eq!(err, KilnError::RegisterCountMismatch { saved: 2, restored: 6 });
    }
}
