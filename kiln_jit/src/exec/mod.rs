//! Circuit execution.
//!
//! [`Schedule`] splits a circuit into basic blocks and places its floating
//! effects; [`Interpreter`] walks the schedule against a
//! [`kiln_runtime::JsThread`]. Lowered and unlowered circuits both run, so
//! the optimized form of a function can be checked against its generic
//! form, and [`execute_with_bailout`] falls back to the generic form when
//! a guard fails.

pub mod interpreter;
pub mod schedule;

pub use interpreter::{eval_pure, execute_with_bailout, Interpreter, Outcome, DEFAULT_STEP_LIMIT};
pub use schedule::{Block, Schedule};
