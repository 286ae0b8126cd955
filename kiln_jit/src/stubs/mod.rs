//! Builtin stub circuits.
//!
//! A builtin stub is a circuit compiled from a generator function rather
//! than from bytecode. Every stub shares the builtin entry layout:
//!
//! ```text
//! {glue, nativeCode, func, newTarget, this, numArgs, arg0, arg1, arg2}
//! ```
//!
//! Arguments past `numArgs` hold undefined. A stub handles the common case
//! inline and falls back to the native body through `CallNativeSlowPath`
//! whenever its preconditions do not hold, so a stub never changes what a
//! builtin observably does.
//!
//! Built circuits are cached process-wide by [`BuiltinId`].

mod builtins_string;
mod containers;
pub(crate) mod new_object;

use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

use kiln_core::{KilnError, KilnResult};
use kiln_runtime::{BuiltinId, RuntimeStubId};

use crate::builder::CircuitBuilder;
use crate::call_signature::{StubGenerator, BUILTIN_STUB_ARGS};
use crate::ir::{verify, Circuit, GateRef, GateType, MachineType};

// =============================================================================
// Entry Layout
// =============================================================================

/// Parameter types of every builtin stub circuit.
#[must_use]
pub fn stub_params() -> Vec<(MachineType, GateType)> {
    let mut params = vec![
        (MachineType::I64, GateType::NJSValue), // glue
        (MachineType::I64, GateType::NJSValue), // nativeCode
        (MachineType::I64, GateType::Any),      // func
        (MachineType::I64, GateType::Any),      // newTarget
        (MachineType::I64, GateType::Any),      // this
        (MachineType::I32, GateType::NJSValue), // numArgs
    ];
    params.extend(std::iter::repeat((MachineType::I64, GateType::Any)).take(BUILTIN_STUB_ARGS));
    params
}

/// The argument gates of a stub circuit.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StubEntry {
    pub func: GateRef,
    pub new_target: GateRef,
    pub this: GateRef,
    pub num_args: GateRef,
    pub args: [GateRef; BUILTIN_STUB_ARGS],
}

impl StubEntry {
    pub(crate) fn of(circuit: &Circuit) -> Self {
        StubEntry {
            func: circuit.arg(2),
            new_target: circuit.arg(3),
            this: circuit.arg(4),
            num_args: circuit.arg(5),
            args: [circuit.arg(6), circuit.arg(7), circuit.arg(8)],
        }
    }
}

/// Call the native body with the arguments the stub actually received.
pub(crate) fn call_native_slow_path(b: &mut CircuitBuilder<'_>, entry: &StubEntry) -> GateRef {
    let init = b.undefined();
    let result = b.new_variable(MachineType::I64, GateType::Any, init);
    let exit = b.new_label();
    for count in 0..BUILTIN_STUB_ARGS {
        let matched = b.new_label();
        let next = b.new_label();
        let expected = b.int32(count as i32);
        let is_count = b.int32_equal(entry.num_args, expected);
        b.branch(is_count, matched, next);
        b.bind(matched);
        let mut argv = vec![entry.func, entry.new_target, entry.this];
        argv.extend_from_slice(&entry.args[..count]);
        let value = b.call_runtime(RuntimeStubId::CallNativeSlowPath, &argv);
        b.write(result, value);
        b.jump(exit);
        b.bind(next);
    }
    let mut argv = vec![entry.func, entry.new_target, entry.this];
    argv.extend_from_slice(&entry.args);
    let value = b.call_runtime(RuntimeStubId::CallNativeSlowPath, &argv);
    b.write(result, value);
    b.jump(exit);
    b.bind(exit);
    b.read(result)
}

// =============================================================================
// Generators
// =============================================================================

/// Generator of the stub circuit for `id`, if it has one.
///
/// The typed math builtins have no stub: they are lowered inline.
#[must_use]
pub fn generator_for(id: BuiltinId) -> Option<StubGenerator> {
    if let Some(ty) = id.containers_type() {
        return Some(containers::generator_for(ty));
    }
    let generator: StubGenerator = match id {
        BuiltinId::CharCodeAt => builtins_string::char_code_at,
        BuiltinId::IndexOf => builtins_string::index_of,
        BuiltinId::Substring => builtins_string::substring,
        BuiltinId::CharAt => builtins_string::char_at,
        BuiltinId::BooleanConstructor => new_object::boolean_constructor,
        BuiltinId::StringConstructor => new_object::string_constructor,
        BuiltinId::DateConstructor => new_object::date_constructor,
        BuiltinId::ArrayConstructor => new_object::array_constructor,
        _ => return None,
    };
    Some(generator)
}

/// Build the stub circuit for `id` without consulting the cache.
///
/// # Errors
///
/// Fails with [`KilnError::Unsupported`] for builtins without a stub, or
/// when the generated circuit does not verify.
pub fn build_stub(id: BuiltinId) -> KilnResult<Circuit> {
    let generator = generator_for(id)
        .ok_or_else(|| KilnError::Unsupported(format!("builtin {} has no stub", id.name())))?;
    let mut circuit = Circuit::for_stub(id.name(), &stub_params());
    generator(&mut circuit)?;
    verify(&circuit)?;
    debug!(stub = id.name(), gates = circuit.gate_count(), "builtin stub built");
    Ok(circuit)
}

type StubCache = RwLock<FxHashMap<BuiltinId, Arc<Circuit>>>;

static STUBS: OnceLock<StubCache> = OnceLock::new();

fn cache() -> &'static StubCache {
    STUBS.get_or_init(|| RwLock::new(FxHashMap::default()))
}

/// The shared stub circuit for `id`, building it on first use.
///
/// # Errors
///
/// See [`build_stub`].
pub fn builtin_stub(id: BuiltinId) -> KilnResult<Arc<Circuit>> {
    if let Some(circuit) = cache().read().get(&id) {
        return Ok(Arc::clone(circuit));
    }
    let built = Arc::new(build_stub(id)?);
    let mut stubs = cache().write();
    Ok(Arc::clone(stubs.entry(id).or_insert(built)))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CallTarget, OpCode};

    #[test]
    fn test_every_stub_builds_and_verifies() {
        for &id in BuiltinId::ALL {
            if id.is_stub() {
                let circuit = build_stub(id).unwrap();
                assert_eq!(circuit.num_args(), 6 + BUILTIN_STUB_ARGS, "{}", id.name());
            } else {
                assert!(generator_for(id).is_none(), "{}", id.name());
            }
        }
    }

    #[test]
    fn test_cache_shares_circuits() {
        let a = builtin_stub(BuiltinId::CharAt).unwrap();
        let b = builtin_stub(BuiltinId::CharAt).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_typed_builtins_have_no_stub() {
        assert!(matches!(build_stub(BuiltinId::Sqrt), Err(KilnError::Unsupported(_))));
    }

    #[test]
    fn test_stubs_keep_a_native_fallback() {
        let circuit = build_stub(BuiltinId::IndexOf).unwrap();
        let slow = circuit
            .all_gates()
            .into_iter()
            .filter(|&g| circuit.opcode(g) == OpCode::Call(CallTarget::Runtime(RuntimeStubId::CallNativeSlowPath)))
            .count();
        assert_eq!(slow, BUILTIN_STUB_ARGS + 1);
    }
}
