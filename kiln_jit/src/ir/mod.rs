//! Circuit intermediate representation.
//!
//! A circuit is a sea-of-nodes graph: gates connected by state (control),
//! depend (memory ordering) and value edges, stored in an arena and
//! addressed by stable indices.

pub mod arena;
pub mod bytecode;
pub mod circuit;
pub mod ecma_opcode;
pub mod gate;
pub mod opcode;
pub mod types;
pub mod verifier;

pub use arena::{Arena, BitSet, Id, SecondaryMap};
pub use bytecode::BytecodeBuilder;
pub use circuit::{ArgLayout, Circuit, CommonArg, NUM_COMMON_ARGS, NUM_MANDATORY_JSFUNC_ARGS};
pub use ecma_opcode::EcmaOpcode;
pub use gate::{Gate, GateRef, InputKind, Use};
pub use opcode::{CallTarget, ElementKind, FCmpCond, GateShape, ICmpCond, OpCode, TypedBinOp, TypedJumpOp, TypedUnOp};
pub use types::{GateType, MachineType};
pub use verifier::{verify, verify_guard};
