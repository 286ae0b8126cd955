//! Kiln core: tagged values, deoptimization reasons, errors and configuration
//! shared by the runtime and the JIT lowering passes.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod deopt;
pub mod error;
pub mod logging;
pub mod value;

pub use config::CompilerConfig;
pub use deopt::DeoptType;
pub use error::{KilnError, KilnResult};
pub use logging::init_logging;
pub use value::TaggedValue;

/// Kiln version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
