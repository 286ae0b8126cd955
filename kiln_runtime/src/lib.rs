//! Kiln runtime: the simulated heap and object model that lowered circuits
//! run against.
//!
//! # Layout
//!
//! - [`heap`]: the flat byte heap, glue area and global constants
//! - [`layout`]: field offsets and object type tags
//! - [`thread`]: the runtime thread and call dispatch
//! - [`object`], [`string`], [`containers`]: object model services
//! - [`operations`]: the generic language operations
//! - [`runtime_stubs`], [`common_stubs`]: the stub tables compiled code calls
//! - [`builtins`]: builtin bootstrap and native bodies

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod builtins;
pub mod common_stubs;
pub mod containers;
pub mod date;
pub mod heap;
pub mod layout;
pub mod object;
pub mod operations;
pub mod runtime_stubs;
pub mod string;
pub mod thread;

pub use builtins::BuiltinId;
pub use common_stubs::{call_common_stub, CommonStubId};
pub use containers::{ContainerKind, ContainersType};
pub use heap::{glue, ConstantIndex, GlobalEnvField, Heap, HeapStats};
pub use layout::{FunctionKind, GeneratorState, JsType};
pub use object::PropertyKey;
pub use runtime_stubs::{call_ngc_runtime, call_runtime, RuntimeStubId};
pub use thread::{CallInfo, CodeInvoker, JsThread, NativeFn};

/// Runtime version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
