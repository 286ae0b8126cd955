//! Kiln JIT: the circuit IR, its lowering passes and the builtin stub
//! builders.
//!
//! A compilation job owns one [`ir::Circuit`] built from bytecode and runs
//! it through the [`pipeline::LoweringPipeline`]:
//!
//! 1. [`lowering::ts_type_lowering`]: type feedback turns bytecode into
//!    guarded typed operations
//! 2. [`lowering::type_lowering`]: typed operations and guards become
//!    concrete arithmetic, memory access and `DeoptCheck`s
//! 3. [`lowering::slow_path_lowering`]: what is left becomes runtime and
//!    stub calls with explicit exception edges
//!
//! The [`exec`] module schedules and runs circuits against a
//! [`kiln_runtime::JsThread`], which is how lowered code is checked against
//! the generic path.
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod builder;
pub mod call_signature;
pub mod exec;
pub mod ir;
pub mod lowering;
pub mod pipeline;
pub mod stubs;
pub mod type_info;

pub use builder::{CircuitBuilder, Label, Variable};
pub use call_signature::CallSignature;
pub use exec::{execute_with_bailout, Interpreter, Outcome, Schedule};
pub use ir::{Circuit, GateRef, GateType, MachineType, OpCode};
pub use pipeline::{LoweringPipeline, PipelineConfig, PipelineStats};
pub use type_info::TypeInfo;

/// JIT crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
