//! Lowering passes.
//!
//! A function circuit starts as a chain of `JsBytecode` gates and leaves as
//! machine-level gates only. The passes run in a fixed order:
//!
//! 1. [`TsTypeLowering`]: bytecodes whose operands carry sound type feedback
//!    become guards plus typed HIR.
//! 2. [`TypeLowering`]: typed HIR becomes machine gates; guards become
//!    `DeoptCheck`s. Recognized builtin calls go through
//!    [`BuiltinLowering`].
//! 3. [`SlowPathLowering`]: every remaining bytecode becomes runtime, stub
//!    or JS calls with explicit exception exits.
//!
//! [`crate::pipeline::LoweringPipeline`] sequences them.

pub mod builtin_lowering;
pub mod generic;
pub mod slow_path_lowering;
pub mod ts_type_lowering;
pub mod type_lowering;

pub use builtin_lowering::BuiltinLowering;
pub use slow_path_lowering::SlowPathLowering;
pub use ts_type_lowering::TsTypeLowering;
pub use type_lowering::TypeLowering;

use kiln_core::KilnResult;
use tracing::trace;

use crate::builder::CircuitBuilder;
use crate::ir::{Circuit, GateRef, GateType, MachineType, OpCode};

// =============================================================================
// Pass Interface
// =============================================================================

/// A lowering pass over one circuit.
pub trait LoweringPass {
    /// Pass name.
    fn name(&self) -> &'static str;

    /// Run the pass; returns the number of gates it lowered.
    ///
    /// # Errors
    ///
    /// Fails on a malformed input gate.
    fn run(&mut self, circuit: &mut Circuit) -> KilnResult<usize>;
}

// =============================================================================
// Shared Helpers
// =============================================================================

/// Frame state in effect at `gate`.
///
/// Walks the depend chain back to the nearest `StateSplit`. Gates lowered
/// after their split was removed get an empty frame state.
pub(crate) fn find_frame_state(circuit: &mut Circuit, gate: GateRef) -> GateRef {
    let mut current = circuit.dep(gate);
    while current.is_valid() {
        let op = circuit.opcode(current);
        match op {
            OpCode::StateSplit => return circuit.value_in(current, 0),
            OpCode::DependRelay | OpCode::DependSelector => current = circuit.dep_in(current, 0),
            _ if op.is_effect() || op.is_hir() => current = circuit.dep(current),
            _ => break,
        }
    }
    circuit.new_gate(OpCode::FrameState(0), MachineType::NoValue, &[], &[], &[], GateType::Any)
}

/// Bytecode offset recorded in a frame state gate.
pub(crate) fn frame_state_offset(circuit: &Circuit, frame_state: GateRef) -> u32 {
    match circuit.opcode(frame_state) {
        OpCode::FrameState(bc_offset) => bc_offset,
        _ => 0,
    }
}

/// Remove the `StateSplit` feeding `gate`, along with its frame state when
/// nothing else reads it.
///
/// # Errors
///
/// Fails if the split has users the removal cannot redirect.
pub(crate) fn remove_state_split(circuit: &mut Circuit, gate: GateRef) -> KilnResult<bool> {
    let split = circuit.dep(gate);
    if !split.is_valid() || circuit.opcode(split) != OpCode::StateSplit {
        return Ok(false);
    }
    delete_state_split(circuit, split)?;
    Ok(true)
}

/// Unlink a `StateSplit` from the depend chain.
pub(crate) fn delete_state_split(circuit: &mut Circuit, split: GateRef) -> KilnResult<()> {
    let frame_state = circuit.value_in(split, 0);
    let previous = circuit.dep(split);
    circuit.replace_gate(split, GateRef::INVALID, previous, GateRef::INVALID)?;
    if frame_state.is_valid() && !circuit.is_dead(frame_state) && circuit.use_count(frame_state) == 0 {
        circuit.delete_gate(frame_state);
    }
    Ok(())
}

/// Join several exceptional continuations into one.
///
/// The builder position is left unchanged.
pub(crate) fn join_exits(b: &mut CircuitBuilder<'_>, exits: &[(GateRef, GateRef)]) -> Option<(GateRef, GateRef)> {
    match exits {
        [] => None,
        [single] => Some(*single),
        _ => {
            let (state, depend) = b.position();
            let label = b.new_label();
            for &(s, d) in exits {
                b.set_position(s, d);
                b.jump(label);
            }
            b.bind(label);
            let joined = b.position();
            b.set_position(state, depend);
            Some(joined)
        }
    }
}

/// Dump the circuit after a pass when compiler logging is on.
pub(crate) fn log_circuit(circuit: &Circuit, pass: &str, enabled: bool) {
    if enabled {
        trace!(pass, "\n{circuit}");
    }
}
