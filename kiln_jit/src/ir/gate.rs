//! Gates: the nodes of a circuit.
//!
//! A gate's inputs are one ordered list split into three groups:
//!
//! ```text
//!   [ state inputs | depend inputs | value inputs ]
//!     num_state      num_depend      the rest
//! ```
//!
//! State edges order control flow, depend edges order memory effects and
//! value edges carry data.

use smallvec::SmallVec;

use super::arena::Id;
use super::opcode::OpCode;
use super::types::{GateType, MachineType};

/// Handle to a gate in its circuit.
pub type GateRef = Id<Gate>;

/// Input list; most gates have at most four inputs.
pub type InputList = SmallVec<[GateRef; 4]>;

/// One use of a gate: `user` reads it at input position `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Use {
    /// The reading gate.
    pub user: GateRef,
    /// Position in the user's input list.
    pub index: u32,
}

/// Which group an input position belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// Control predecessor.
    State,
    /// Effect predecessor.
    Depend,
    /// Data operand.
    Value,
}

/// A node of the circuit.
#[derive(Debug, Clone)]
pub struct Gate {
    pub(crate) opcode: OpCode,
    pub(crate) machine_type: MachineType,
    pub(crate) gate_type: GateType,
    pub(crate) inputs: InputList,
    pub(crate) num_state: u16,
    pub(crate) num_depend: u16,
    pub(crate) dead: bool,
}

impl Gate {
    /// Opcode.
    #[inline]
    #[must_use]
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    /// Machine type of the output.
    #[inline]
    #[must_use]
    pub fn machine_type(&self) -> MachineType {
        self.machine_type
    }

    /// Language type of the output.
    #[inline]
    #[must_use]
    pub fn gate_type(&self) -> GateType {
        self.gate_type
    }

    /// All inputs.
    #[inline]
    #[must_use]
    pub fn inputs(&self) -> &[GateRef] {
        &self.inputs
    }

    /// State inputs.
    #[inline]
    #[must_use]
    pub fn state_inputs(&self) -> &[GateRef] {
        &self.inputs[..self.num_state as usize]
    }

    /// Depend inputs.
    #[inline]
    #[must_use]
    pub fn depend_inputs(&self) -> &[GateRef] {
        let start = self.num_state as usize;
        &self.inputs[start..start + self.num_depend as usize]
    }

    /// Value inputs.
    #[inline]
    #[must_use]
    pub fn value_inputs(&self) -> &[GateRef] {
        &self.inputs[(self.num_state + self.num_depend) as usize..]
    }

    /// Number of state inputs.
    #[inline]
    #[must_use]
    pub fn num_state(&self) -> usize {
        self.num_state as usize
    }

    /// Number of depend inputs.
    #[inline]
    #[must_use]
    pub fn num_depend(&self) -> usize {
        self.num_depend as usize
    }

    /// Number of value inputs.
    #[inline]
    #[must_use]
    pub fn num_value(&self) -> usize {
        self.inputs.len() - self.num_state() - self.num_depend()
    }

    /// Group of input position `index`.
    #[must_use]
    pub fn input_kind(&self, index: usize) -> InputKind {
        if index < self.num_state() {
            InputKind::State
        } else if index < self.num_state() + self.num_depend() {
            InputKind::Depend
        } else {
            InputKind::Value
        }
    }

    /// Whether the gate was deleted.
    #[inline]
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.dead
    }
}
