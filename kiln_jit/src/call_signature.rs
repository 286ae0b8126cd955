//! Call signatures of every stub compiled code can call.
//!
//! Three process-wide tables, one per stub family, are filled on first use
//! and read-only afterwards:
//!
//! - runtime stubs, indexed by [`RuntimeStubId`]
//! - common stubs, indexed by [`CommonStubId`]
//! - builtin stubs, indexed by [`BuiltinId`]
//!
//! plus the two JS call trampolines. Builtin signatures carry the generator
//! of their stub circuit.

use std::fmt;
use std::sync::OnceLock;

use kiln_core::KilnResult;
use kiln_runtime::runtime_stubs::Arity;
use kiln_runtime::{BuiltinId, CommonStubId, RuntimeStubId};

use crate::ir::{CallTarget, Circuit, MachineType};

/// Builds the body of a builtin stub circuit.
pub type StubGenerator = fn(&mut Circuit) -> KilnResult<()>;

/// Which calling convention a signature follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureKind {
    /// `{glue, args...}` with tagged arguments; may allocate.
    RuntimeStub,
    /// `{glue, args...}` over raw machine words; never allocates.
    NoGcRuntimeStub,
    /// `{glue, args...}` with tagged arguments.
    CommonStub,
    /// `{glue, nativeCode, func, newTarget, thisValue, numArgs, argv...}`.
    BuiltinStub,
    /// `{glue, env, actualArgc, func, newTarget, this, args..., bcOffset}`.
    JsCall,
}

/// Descriptor of one callable entry point.
#[derive(Clone)]
pub struct CallSignature {
    name: &'static str,
    kind: SignatureKind,
    target: CallTarget,
    params: Vec<MachineType>,
    variadic: bool,
    return_type: MachineType,
    generator: Option<StubGenerator>,
}

impl CallSignature {
    /// Name of the entry point.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Calling convention.
    #[must_use]
    pub fn kind(&self) -> SignatureKind {
        self.kind
    }

    /// Target to put on a `Call` gate.
    #[must_use]
    pub fn target(&self) -> CallTarget {
        self.target
    }

    /// Fixed parameter types, glue included.
    #[must_use]
    pub fn params(&self) -> &[MachineType] {
        &self.params
    }

    /// Whether extra arguments may follow the fixed ones.
    #[must_use]
    pub fn is_variadic(&self) -> bool {
        self.variadic
    }

    /// Result type.
    #[must_use]
    pub fn return_type(&self) -> MachineType {
        self.return_type
    }

    /// Whether `n` value inputs (glue included) fit this signature.
    #[must_use]
    pub fn accepts(&self, n: usize) -> bool {
        if self.variadic {
            n >= self.params.len()
        } else {
            n == self.params.len()
        }
    }

    /// Generator of the stub circuit, for builtin stubs.
    #[must_use]
    pub fn generator(&self) -> Option<StubGenerator> {
        self.generator
    }
}

impl fmt::Debug for CallSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSignature")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("params", &self.params)
            .field("variadic", &self.variadic)
            .field("return_type", &self.return_type)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tables
// =============================================================================

static RUNTIME_SIGNATURES: OnceLock<Vec<CallSignature>> = OnceLock::new();
static COMMON_SIGNATURES: OnceLock<Vec<CallSignature>> = OnceLock::new();
static BUILTIN_SIGNATURES: OnceLock<Vec<CallSignature>> = OnceLock::new();
static JS_CALL_SIGNATURES: OnceLock<[CallSignature; 2]> = OnceLock::new();

/// Fill every table. Later calls are no-ops.
pub fn initialize() {
    let _ = runtime_table();
    let _ = common_table();
    let _ = builtin_table();
    let _ = js_call_table();
    tracing::debug!(
        runtime = RuntimeStubId::ALL.len(),
        common = CommonStubId::ALL.len(),
        builtins = BuiltinId::ALL.len(),
        "call signatures initialized"
    );
}

/// Signature of a runtime stub.
#[must_use]
pub fn runtime_signature(id: RuntimeStubId) -> &'static CallSignature {
    &runtime_table()[id as usize]
}

/// Signature of a common stub.
#[must_use]
pub fn common_signature(id: CommonStubId) -> &'static CallSignature {
    &common_table()[id as usize]
}

/// Signature of a builtin stub.
#[must_use]
pub fn builtin_signature(id: BuiltinId) -> &'static CallSignature {
    &builtin_table()[id as usize]
}

/// Signature of the JS call trampoline (`is_new` selects `JSCallNew`).
#[must_use]
pub fn js_call_signature(is_new: bool) -> &'static CallSignature {
    &js_call_table()[usize::from(is_new)]
}

/// Signature for the target of a `Call` gate.
#[must_use]
pub fn signature_of(target: CallTarget) -> &'static CallSignature {
    match target {
        CallTarget::Runtime(id) | CallTarget::NoGc(id) => runtime_signature(id),
        CallTarget::Common(id) => common_signature(id),
        CallTarget::Builtin(id) => builtin_signature(id),
        CallTarget::Js => js_call_signature(false),
        CallTarget::JsNew => js_call_signature(true),
    }
}

fn runtime_table() -> &'static [CallSignature] {
    RUNTIME_SIGNATURES.get_or_init(|| RuntimeStubId::ALL.iter().map(|&id| runtime_entry(id)).collect())
}

fn common_table() -> &'static [CallSignature] {
    COMMON_SIGNATURES.get_or_init(|| CommonStubId::ALL.iter().map(|&id| common_entry(id)).collect())
}

fn builtin_table() -> &'static [CallSignature] {
    BUILTIN_SIGNATURES.get_or_init(|| BuiltinId::ALL.iter().map(|&id| builtin_entry(id)).collect())
}

fn js_call_table() -> &'static [CallSignature; 2] {
    JS_CALL_SIGNATURES.get_or_init(|| [js_call_entry("JSCall", CallTarget::Js), js_call_entry("JSCallNew", CallTarget::JsNew)])
}

// =============================================================================
// Entries
// =============================================================================

fn runtime_entry(id: RuntimeStubId) -> CallSignature {
    let (count, variadic) = match id.arity() {
        Arity::Fixed(n) => (n, false),
        Arity::AtLeast(n) => (n, true),
    };
    let (kind, target, arg_type, return_type) = if id.is_no_gc() {
        let (arg, ret) = no_gc_types(id);
        (SignatureKind::NoGcRuntimeStub, CallTarget::NoGc(id), arg, ret)
    } else {
        (SignatureKind::RuntimeStub, CallTarget::Runtime(id), MachineType::I64, MachineType::I64)
    };
    let mut params = vec![MachineType::I64];
    params.extend(std::iter::repeat(arg_type).take(count));
    CallSignature {
        name: id.name(),
        kind,
        target,
        params,
        variadic,
        return_type,
        generator: None,
    }
}

fn no_gc_types(id: RuntimeStubId) -> (MachineType, MachineType) {
    match id {
        RuntimeStubId::DoubleToInt => (MachineType::F64, MachineType::I32),
        RuntimeStubId::ToBoolean => (MachineType::I64, MachineType::I1),
        _ => (MachineType::F64, MachineType::F64),
    }
}

fn common_entry(id: CommonStubId) -> CallSignature {
    let (count, variadic) = id.arity();
    let mut params = vec![MachineType::I64];
    params.extend(std::iter::repeat(MachineType::I64).take(count));
    CallSignature {
        name: id.name(),
        kind: SignatureKind::CommonStub,
        target: CallTarget::Common(id),
        params,
        variadic,
        return_type: MachineType::I64,
        generator: None,
    }
}

/// Fixed part of the builtin stub layout.
pub const BUILTIN_FIXED_PARAMS: usize = 6;

/// Arguments a builtin stub circuit declares after the fixed part.
pub const BUILTIN_STUB_ARGS: usize = 3;

fn builtin_entry(id: BuiltinId) -> CallSignature {
    let params = vec![
        MachineType::I64, // glue
        MachineType::I64, // nativeCode
        MachineType::I64, // func
        MachineType::I64, // newTarget
        MachineType::I64, // thisValue
        MachineType::I32, // numArgs
    ];
    CallSignature {
        name: id.name(),
        kind: SignatureKind::BuiltinStub,
        target: CallTarget::Builtin(id),
        params,
        variadic: true,
        return_type: MachineType::I64,
        generator: crate::stubs::generator_for(id),
    }
}

fn js_call_entry(name: &'static str, target: CallTarget) -> CallSignature {
    CallSignature {
        name,
        kind: SignatureKind::JsCall,
        target,
        params: vec![
            MachineType::I64, // glue
            MachineType::I64, // env
            MachineType::I32, // actualArgc
            MachineType::I64, // func
            MachineType::I64, // newTarget
            MachineType::I64, // this
        ],
        variadic: true,
        return_type: MachineType::I64,
        generator: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_are_indexed_by_id() {
        initialize();
        for &id in RuntimeStubId::ALL {
            assert_eq!(runtime_signature(id).name(), id.name());
        }
        for &id in CommonStubId::ALL {
            assert_eq!(common_signature(id).target(), CallTarget::Common(id));
        }
        for &id in BuiltinId::ALL {
            assert_eq!(builtin_signature(id).kind(), SignatureKind::BuiltinStub);
        }
    }

    #[test]
    fn test_runtime_arity() {
        let add = runtime_signature(RuntimeStubId::Add2);
        assert!(add.accepts(3));
        assert!(!add.accepts(2));
        let range = runtime_signature(RuntimeStubId::NewObjRange);
        assert!(range.is_variadic());
        assert!(range.accepts(6));
    }

    #[test]
    fn test_no_gc_types() {
        let floor = runtime_signature(RuntimeStubId::FloatFloor);
        assert_eq!(floor.kind(), SignatureKind::NoGcRuntimeStub);
        assert_eq!(floor.params(), &[MachineType::I64, MachineType::F64]);
        assert_eq!(floor.return_type(), MachineType::F64);
        assert_eq!(runtime_signature(RuntimeStubId::ToBoolean).return_type(), MachineType::I1);
    }

    #[test]
    fn test_builtin_generators() {
        assert!(builtin_signature(BuiltinId::IndexOf).generator().is_some());
        assert!(builtin_signature(BuiltinId::Sqrt).generator().is_none());
    }

    #[test]
    fn test_tables_are_shared() {
        let a: *const CallSignature = runtime_signature(RuntimeStubId::Throw);
        let b: *const CallSignature = runtime_signature(RuntimeStubId::Throw);
        assert_eq!(a, b);
    }
}
