//! Structural checks over a circuit.
//!
//! [`verify`] checks edge shape: input counts per opcode, selector and merge
//! arity agreement, live inputs and use-list symmetry. [`verify_guard`]
//! checks that type-feedback lowering left no bytecode depending directly on
//! a `StateSplit`.

use tracing::warn;

use kiln_core::{KilnError, KilnResult};

use super::circuit::Circuit;
use super::gate::{GateRef, Use};
use super::opcode::OpCode;

/// Verify the shape of every live gate.
///
/// # Errors
///
/// Returns [`KilnError::MalformedGate`] for the first gate that violates its
/// opcode's shape and [`KilnError::Verification`] for broken use lists.
pub fn verify(circuit: &Circuit) -> KilnResult<()> {
    for gate in circuit.all_gates() {
        verify_gate(circuit, gate)?;
    }
    Ok(())
}

fn verify_gate(circuit: &Circuit, gate: GateRef) -> KilnResult<()> {
    let g = circuit.gate(gate);
    let opcode = g.opcode();
    let shape = opcode.shape();
    let malformed = |message: String| KilnError::malformed(gate.index(), format!("{opcode}: {message}"));

    if !shape.state.accepts(g.num_state()) {
        return Err(malformed(format!("bad state input count {}", g.num_state())));
    }
    if !shape.depend.accepts(g.num_depend()) {
        return Err(malformed(format!("bad depend input count {}", g.num_depend())));
    }
    if !shape.value.accepts(g.num_value()) {
        return Err(malformed(format!("bad value input count {}", g.num_value())));
    }

    for (index, &input) in g.inputs().iter().enumerate() {
        if circuit.is_dead(input) {
            return Err(malformed(format!("input {index} is dead or null")));
        }
        let back = Use {
            user: gate,
            index: index as u32,
        };
        if !circuit.uses(input).contains(&back) {
            return Err(KilnError::Verification(format!(
                "use list of #{} misses #{}[{index}]",
                input.index(),
                gate.index()
            )));
        }
    }
    for u in circuit.uses(gate) {
        if circuit.is_dead(u.user) {
            return Err(KilnError::Verification(format!(
                "#{} is used by dead gate #{}",
                gate.index(),
                u.user.index()
            )));
        }
    }

    for &state in g.state_inputs() {
        if !circuit.opcode(state).is_control() {
            return Err(malformed(format!("state input {} is not a control gate", circuit.opcode(state))));
        }
    }

    match opcode {
        OpCode::ValueSelector | OpCode::DependSelector => {
            let merge = circuit.state_in(gate, 0);
            if !circuit.opcode(merge).is_merge() {
                return Err(malformed("selector not attached to a merge".into()));
            }
            let expected = circuit.num_state_in(merge);
            let actual = if opcode == OpCode::ValueSelector { g.num_value() } else { g.num_depend() };
            if actual != expected {
                return Err(malformed(format!("{actual} operands for a {expected}-way merge")));
            }
        }
        OpCode::LoopBegin => {
            for i in 1..g.num_state() {
                let back = circuit.state_in(gate, i);
                if circuit.opcode(back) != OpCode::LoopBack {
                    return Err(malformed(format!("back edge {i} is {}", circuit.opcode(back))));
                }
            }
        }
        OpCode::IfTrue | OpCode::IfFalse => {
            let branch = circuit.state_in(gate, 0);
            let ok = matches!(circuit.opcode(branch), OpCode::IfBranch | OpCode::TypedJump(_))
                || circuit.opcode(branch).bytecode().is_some_and(|op| op.is_jump());
            if !ok {
                return Err(malformed(format!("projection of {}", circuit.opcode(branch))));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Report bytecode gates that still depend directly on a `StateSplit`.
///
/// Returns the offending gates; each one is also logged as a warning.
#[must_use]
pub fn verify_guard(circuit: &Circuit) -> Vec<GateRef> {
    let mut offenders = Vec::new();
    for gate in circuit.all_gates() {
        if !matches!(circuit.opcode(gate), OpCode::JsBytecode { .. }) {
            continue;
        }
        let dep = circuit.dep(gate);
        if dep.is_valid() && circuit.opcode(dep) == OpCode::StateSplit {
            warn!(
                circuit = circuit.name(),
                gate = gate.index(),
                opcode = %circuit.opcode(gate),
                "bytecode still depends on a state split"
            );
            offenders.push(gate);
        }
    }
    offenders
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ecma_opcode::EcmaOpcode;
    use crate::ir::types::{GateType, MachineType};

    #[test]
    fn test_verify_accepts_minimal_return() {
        let mut circuit = Circuit::for_stub("s", &[(MachineType::I64, GateType::Any)]);
        let (s, d, a) = (circuit.state_entry(), circuit.depend_entry(), circuit.arg(0));
        circuit.new_gate(OpCode::Return, MachineType::NoValue, &[s], &[d], &[a], GateType::Any);
        verify(&circuit).unwrap();
    }

    #[test]
    fn test_verify_rejects_bad_value_count() {
        let mut circuit = Circuit::for_stub("s", &[(MachineType::I64, GateType::Any)]);
        let a = circuit.arg(0);
        circuit.new_gate(OpCode::Add, MachineType::I64, &[], &[], &[a], GateType::Any);
        let err = verify(&circuit).unwrap_err();
        assert!(matches!(err, KilnError::MalformedGate { .. }));
    }

    #[test]
    fn test_verify_rejects_selector_arity() {
        let mut circuit = Circuit::for_stub("s", &[(MachineType::I64, GateType::Any)]);
        let (s, a) = (circuit.state_entry(), circuit.arg(0));
        let merge = circuit.new_gate(OpCode::Merge, MachineType::NoValue, &[s], &[], &[], GateType::Any);
        circuit.new_gate(OpCode::ValueSelector, MachineType::I64, &[merge], &[], &[a, a], GateType::Any);
        assert!(verify(&circuit).is_err());
    }

    #[test]
    fn test_verify_guard_flags_state_split() {
        let mut circuit = Circuit::for_function("f", 0, 1);
        let (s, d) = (circuit.state_entry(), circuit.depend_entry());
        let fs = circuit.new_gate(OpCode::FrameState(0), MachineType::NoValue, &[], &[], &[], GateType::Any);
        let split = circuit.new_gate(OpCode::StateSplit, MachineType::NoValue, &[], &[d], &[fs], GateType::Any);
        let bc = OpCode::JsBytecode {
            op: EcmaOpcode::LdTrue,
            bc_offset: 0,
        };
        let gate = circuit.new_gate(bc, MachineType::I64, &[s], &[split], &[], GateType::Any);
        assert_eq!(verify_guard(&circuit), vec![gate]);
        circuit.set_dep(gate, d);
        assert!(verify_guard(&circuit).is_empty());
    }
}
