use kiln_runtime::RuntimeStubId;

use super::*;
use crate::ir::{verify, CallTarget};

fn stub() -> Circuit {
    Circuit::for_stub("test", &[(MachineType::I64, GateType::NJSValue), (MachineType::I64, GateType::Any)])
}

fn count(circuit: &Circuit, pred: impl Fn(OpCode) -> bool) -> usize {
    circuit.all_gates().into_iter().filter(|&g| pred(circuit.opcode(g))).count()
}

#[test]
fn test_diamond_merges_variables() {
    let mut circuit = stub();
    let mut b = CircuitBuilder::new(&mut circuit);
    let x = b.circuit_ref().arg(1);
    let zero = b.int64(0);
    let one = b.int64(1);
    let var = b.new_variable(MachineType::I64, GateType::Any, zero);
    let keep = b.new_variable(MachineType::I64, GateType::Any, x);
    let then_label = b.new_label();
    let exit = b.new_label();
    let cond = b.int64_equal(x, zero);
    b.branch(cond, then_label, exit);
    b.bind(then_label);
    b.write(var, one);
    b.jump(exit);
    b.bind(exit);
    let merged = b.read(var);
    assert_eq!(b.read(keep), x);
    b.return_(merged);

    assert_eq!(circuit.opcode(merged), OpCode::ValueSelector);
    assert_eq!(circuit.num_value_in(merged), 2);
    assert_eq!(count(&circuit, |op| op == OpCode::Merge), 1);
    assert_eq!(count(&circuit, |op| op == OpCode::DependSelector), 1);
    verify(&circuit).unwrap();
}

#[test]
fn test_single_predecessor_relays_depend() {
    let mut circuit = stub();
    let mut b = CircuitBuilder::new(&mut circuit);
    let x = b.circuit_ref().arg(1);
    let yes = b.new_label();
    let no = b.new_label();
    let cond = b.tagged_is_int(x);
    b.branch(cond, yes, no);
    b.bind(yes);
    let (state, depend) = b.position();
    assert_eq!(b.circuit_ref().opcode(state), OpCode::IfTrue);
    assert_eq!(b.circuit_ref().opcode(depend), OpCode::DependRelay);
    b.return_(x);
    b.bind(no);
    let undefined = b.undefined();
    b.return_(undefined);
    verify(&circuit).unwrap();
}

#[test]
fn test_loop_keeps_changed_variables_only() {
    let mut circuit = stub();
    let mut b = CircuitBuilder::new(&mut circuit);
    let x = b.circuit_ref().arg(1);
    let zero = b.int32(0);
    let i = b.new_variable(MachineType::I32, GateType::NJSValue, zero);
    let fixed = b.new_variable(MachineType::I64, GateType::Any, x);
    let head = b.new_label();
    let body = b.new_label();
    let exit = b.new_label();
    b.jump(head);
    b.loop_begin(head);
    let current = b.read(i);
    let ten = b.int32(10);
    let more = b.int32_less_than(current, ten);
    b.branch(more, body, exit);
    b.bind(body);
    let one = b.int32(1);
    let next = b.int32_add(current, one);
    b.write(i, next);
    b.loop_end(head);
    b.bind(exit);
    assert_eq!(b.read(fixed), x);
    let result = b.read(i);
    b.return_(result);

    assert_eq!(circuit.opcode(result), OpCode::ValueSelector);
    assert_eq!(circuit.num_value_in(result), 2);
    assert_eq!(count(&circuit, |op| op == OpCode::ValueSelector), 1);
    assert_eq!(count(&circuit, |op| op == OpCode::LoopBack), 1);
    verify(&circuit).unwrap();
}

#[test]
fn test_allocate_in_young_has_runtime_fallback() {
    let mut circuit = stub();
    let mut b = CircuitBuilder::new(&mut circuit);
    let size = b.int_ptr(32);
    let obj = b.allocate_in_young(size);
    b.return_(obj);
    assert_eq!(
        count(&circuit, |op| op == OpCode::Call(CallTarget::Runtime(RuntimeStubId::AllocateInYoung))),
        1
    );
    assert_eq!(count(&circuit, |op| op == OpCode::Store), 1);
    verify(&circuit).unwrap();
}

#[test]
fn test_js_call_layout() {
    let mut circuit = Circuit::for_function("f", 0, 0);
    let mut b = CircuitBuilder::new(&mut circuit);
    let env = b.circuit_ref().common_arg(crate::ir::CommonArg::Env);
    let func = b.circuit_ref().common_arg(crate::ir::CommonArg::Func);
    let undefined = b.undefined();
    let one = b.tagged_int(1);
    let call = b.js_call(env, 5, func, undefined, undefined, &[one, one], 7, false);
    b.return_(call);
    let values = circuit.value_ins(call);
    assert_eq!(values.len(), 9);
    assert_eq!(circuit.constant_value(values[2]), Some(5));
    assert_eq!(circuit.constant_value(values[8]), Some(7));
    verify(&circuit).unwrap();
}

#[test]
fn test_check_exception_splits_control() {
    let mut circuit = stub();
    let mut b = CircuitBuilder::new(&mut circuit);
    let x = b.circuit_ref().arg(1);
    let result = b.call_runtime(RuntimeStubId::Throw, &[x]);
    let (state, depend) = b.check_exception(result);
    b.return_(result);
    let exception = b.exception();
    b.set_position(state, depend);
    b.return_(exception);
    assert_eq!(count(&circuit, |op| op == OpCode::IfBranch), 1);
    assert_eq!(count(&circuit, OpCode::is_return), 2);
    verify(&circuit).unwrap();
}
