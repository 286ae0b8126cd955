//! Error types for the compiler and the executable runtime model.
//!
//! Program-level exceptions are not errors in this sense: they travel on the
//! two-exit control convention and the pending-exception slot of the glue.
//! `KilnError` covers compiler invariant violations and faults of the
//! execution model.

use thiserror::Error;

/// The unified result type used throughout Kiln.
pub type KilnResult<T> = Result<T, KilnError>;

/// Compiler and execution-model errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KilnError {
    /// A gate does not have the shape its opcode requires.
    #[error("malformed gate #{gate}: {message}")]
    MalformedGate {
        /// Index of the offending gate.
        gate: u32,
        /// What was wrong.
        message: String,
    },

    /// A closed dispatch reached an arm that cannot occur.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// Circuit verification failed.
    #[error("verification failed: {0}")]
    Verification(String),

    /// Generator resume restores registers that were never saved.
    #[error("generator register mismatch: {saved} saved, {restored} restored")]
    RegisterCountMismatch {
        /// Registers captured by the suspend side.
        saved: usize,
        /// Register index or count requested by the resume side.
        restored: usize,
    },

    /// Allocation could not be satisfied.
    #[error("out of memory allocating {requested} bytes")]
    OutOfMemory {
        /// Requested size in bytes.
        requested: u64,
    },

    /// Access outside the simulated heap.
    #[error("invalid memory access at {address:#x} ({size} bytes)")]
    InvalidAccess {
        /// Faulting address.
        address: u64,
        /// Access width.
        size: u64,
    },

    /// A feature with no implementation in this runtime.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The execution model could not make progress.
    #[error("execution error: {0}")]
    Execution(String),
}

impl KilnError {
    /// Create a malformed-gate error.
    #[must_use]
    pub fn malformed(gate: u32, message: impl Into<String>) -> Self {
        KilnError::MalformedGate {
            gate,
            message: message.into(),
        }
    }

    /// Create an execution error.
    #[must_use]
    pub fn execution(message: impl Into<String>) -> Self {
        KilnError::Execution(message.into())
    }

    /// Whether this error reports a bug in the compiler itself.
    #[must_use]
    pub const fn is_compiler_bug(&self) -> bool {
        matches!(
            self,
            KilnError::MalformedGate { .. }
                | KilnError::Unreachable(_)
                | KilnError::Verification(_)
                | KilnError::RegisterCountMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = KilnError::malformed(12, "expected 2 value inputs");
        assert_eq!(err.to_string(), "malformed gate #12: expected 2 value inputs");

        let err = KilnError::RegisterCountMismatch { saved: 3, restored: 5 };
        assert!(err.to_string().contains("3 saved"));
    }

    #[test]
    fn test_compiler_bug_classification() {
        assert!(KilnError::Unreachable("x".into()).is_compiler_bug());
        assert!(!KilnError::OutOfMemory { requested: 8 }.is_compiler_bug());
        assert!(!KilnError::execution("stuck").is_compiler_bug());
    }
}
