//! Generic bytecode semantics as runtime stub calls.
//!
//! [`runtime_operands`] maps a bytecode and its operands onto the runtime
//! stub implementing it, reordering operands into the stub's layout: slots
//! used only by inline caches are dropped, frame values the instruction
//! reads implicitly (the callee, `new.target`, the actual arguments) are
//! added, and flag operands become constants.
//!
//! Arithmetic, comparison and unary instructions go through the common
//! stubs instead ([`common_stub`]).
//!
//! Slow path lowering emits the resulting list as a `Call` gate; the
//! interpreter calls the stub directly for bytecodes left unlowered. Both
//! therefore agree on what the generic path of every instruction is.

use kiln_core::TaggedValue;
use kiln_runtime::{CommonStubId, RuntimeStubId};

use crate::ir::{EcmaOpcode, NUM_MANDATORY_JSFUNC_ARGS};

/// One operand of a runtime call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand<T> {
    /// A value of the frame or an instruction operand.
    Value(T),
    /// A constant the mapping supplies.
    Const(TaggedValue),
}

/// Frame values an instruction may read implicitly.
#[derive(Debug, Clone)]
pub struct FrameArgs<T> {
    /// The running function.
    pub func: T,
    /// `new.target` of the frame.
    pub new_target: T,
    /// The receiver.
    pub this: T,
    /// The lexical environment on entry.
    pub env: T,
    /// Actual arguments, excluding the mandatory slots.
    pub params: Vec<T>,
}

impl<T: Copy> FrameArgs<T> {
    /// Map every value through `f`.
    pub fn map<U>(&self, mut f: impl FnMut(T) -> U) -> FrameArgs<U> {
        FrameArgs {
            func: f(self.func),
            new_target: f(self.new_target),
            this: f(self.this),
            env: f(self.env),
            params: self.params.iter().map(|&p| f(p)).collect(),
        }
    }
}

/// Common stub implementing an arithmetic, comparison or unary instruction.
/// The stub takes the instruction's operands unchanged.
#[must_use]
pub fn common_stub(op: EcmaOpcode) -> Option<CommonStubId> {
    use CommonStubId as C;
    use EcmaOpcode as E;

    Some(match op {
        E::Add2 => C::Add,
        E::Sub2 => C::Sub,
        E::Mul2 => C::Mul,
        E::Div2 => C::Div,
        E::Mod2 => C::Mod,
        E::Shl2 => C::Shl,
        E::Shr2 => C::Shr,
        E::Ashr2 => C::Ashr,
        E::And2 => C::And,
        E::Or2 => C::Or,
        E::Xor2 => C::Xor,
        E::Eq => C::Equal,
        E::NotEq => C::NotEqual,
        E::Less => C::Less,
        E::LessEq => C::LessEq,
        E::Greater => C::Greater,
        E::GreaterEq => C::GreaterEq,
        E::Inc => C::Inc,
        E::Dec => C::Dec,
        E::Neg => C::Neg,
        E::Not => C::Not,
        _ => return None,
    })
}

/// Runtime stub and operand list implementing `op` generically.
///
/// Returns `None` for instructions whose generic semantics are not a single
/// runtime call: the [`common_stub`] instructions, constant and frame loads,
/// calls, jumps, returns, lexical variable access, conditional throws and
/// the generator frame operations.
#[must_use]
pub fn runtime_operands<T: Copy>(
    op: EcmaOpcode,
    values: &[T],
    frame: &FrameArgs<T>,
) -> Option<(RuntimeStubId, Vec<Operand<T>>)> {
    use EcmaOpcode as E;
    use RuntimeStubId as R;

    let v = |i: usize| Operand::Value(values[i]);
    let all = || values.iter().map(|&x| Operand::Value(x)).collect::<Vec<_>>();

    let (id, operands) = match op {
        E::Exp => (R::Exp, all()),
        E::StrictEq => (R::StrictEq, all()),
        E::StrictNotEq => (R::StrictNotEq, all()),
        E::IsIn => (R::IsIn, all()),
        E::InstanceOf => (R::InstanceOf, all()),
        E::DelObjProp => (R::DelObjProp, all()),

        E::ToNumber => (R::ToNumber, all()),
        E::ToNumeric => (R::ToNumeric, all()),
        E::TypeOf => (R::TypeOf, all()),

        E::CreateEmptyObject => (R::CreateEmptyObject, vec![]),
        E::CreateEmptyArray => (R::CreateEmptyArray, vec![]),
        E::CreateArrayWithBuffer => (R::CreateArrayWithBuffer, all()),
        E::CreateObjectWithBuffer => (R::CreateObjectWithBuffer, all()),
        E::CopyDataProperties => (R::CopyDataProperties, all()),
        E::StArraySpread => (R::StArraySpread, all()),

        // [slot, key, receiver(, value)] -> {receiver, key(, value)}
        E::LdObjByName => (R::LdObjByName, vec![v(2), v(1)]),
        E::StObjByName => (R::StObjByName, vec![v(2), v(1), v(3)]),
        // [slot, receiver, key(, value)]
        E::LdObjByValue => (R::LdObjByValue, vec![v(1), v(2)]),
        E::StObjByValue => (R::StObjByValue, vec![v(1), v(2), v(3)]),
        E::LdObjByIndex => (R::LdObjByIndex, all()),
        E::StObjByIndex => (R::StObjByIndex, all()),
        E::StOwnByName => (R::StOwnByName, vec![v(1), v(0), v(2)]),
        E::StOwnByValue => (R::StOwnByValue, all()),
        E::StOwnByIndex => (R::StOwnByIndex, all()),
        E::LdSuperByValue => (R::LdSuperByValue, vec![v(0), v(1), Operand::Value(frame.func)]),
        E::StSuperByValue => (R::StSuperByValue, vec![v(0), v(1), v(2), Operand::Value(frame.func)]),
        E::DefineGetterSetterByValue => (R::DefineGetterSetterByValue, all()),

        E::TryLdGlobalByName => (R::TryLdGlobalByName, vec![v(1)]),
        E::TryStGlobalByName => (R::TryStGlobalByName, vec![v(1), v(2)]),
        E::LdGlobalVar => (R::LdGlobalVar, vec![v(1)]),
        E::StGlobalVar => (R::StGlobalVar, vec![v(1), v(2)]),
        E::StConstToGlobalRecord => (R::StGlobalRecord, vec![v(0), v(1), Operand::Const(TaggedValue::TRUE)]),
        E::StLetToGlobalRecord => (R::StGlobalRecord, vec![v(0), v(1), Operand::Const(TaggedValue::FALSE)]),

        E::NewLexEnv => (R::NewLexicalEnv, all()),
        E::NewLexEnvWithName => (R::NewLexicalEnvWithName, all()),

        E::DefineFunc => (R::DefineFunc, all()),
        E::DefineMethod => (R::DefineMethod, all()),
        E::CreateClassWithBuffer => (R::CreateClassWithBuffer, all()),
        E::GetUnmappedArgs => (R::GetUnmappedArgs, frame.params.iter().map(|&p| Operand::Value(p)).collect()),
        E::CopyRestArgs => {
            let mut operands = vec![v(0)];
            operands.extend(frame.params.iter().map(|&p| Operand::Value(p)));
            (R::CopyRestArgs, operands)
        }

        E::CallSpread => (R::CallSpread, all()),
        // [ctor, args...] -> {ctor, newTarget = ctor, args...}
        E::NewObjRange => {
            let mut operands = vec![v(0), v(0)];
            operands.extend(values[1..].iter().map(|&x| Operand::Value(x)));
            (R::NewObjRange, operands)
        }
        E::NewObjApply => (R::NewObjApply, vec![v(1), v(0)]),
        E::SuperCallThisRange => {
            let mut operands = vec![Operand::Value(frame.func), Operand::Value(frame.new_target)];
            operands.extend(all());
            (R::SuperCall, operands)
        }
        E::ThrowIfSuperNotCorrectCall => (R::ThrowIfSuperNotCorrectCall, all()),

        E::Throw => (R::Throw, all()),
        E::ThrowNotExists => (R::ThrowThrowNotExists, vec![]),
        E::ThrowPatternNonCoercible => (R::ThrowPatternNonCoercible, vec![]),
        E::ThrowDeleteSuperProperty => (R::ThrowDeleteSuperProperty, vec![]),
        E::ThrowConstAssignment => (R::ThrowConstAssignment, all()),

        E::LdModuleVar => (R::LdModuleVar, all()),
        E::LdLocalModuleVar => (R::LdLocalModuleVar, all()),
        E::LdExternalModuleVar => (R::LdExternalModuleVar, all()),
        E::StModuleVar => (R::StModuleVar, all()),

        E::CreateGeneratorObj => (R::CreateGeneratorObj, all()),
        E::CreateAsyncGeneratorObj => (R::CreateAsyncGeneratorObj, all()),
        E::AsyncGeneratorResolve => (R::OptAsyncGeneratorResolve, all()),
        E::AsyncGeneratorReject => (R::OptAsyncGeneratorReject, all()),
        E::SetGeneratorState => (R::SetGeneratorState, all()),
        E::CreateIterResultObj => (R::CreateIterResultObj, all()),

        E::Debugger => (R::Debugger, vec![]),

        E::Add2
        | E::Sub2
        | E::Mul2
        | E::Div2
        | E::Mod2
        | E::Shl2
        | E::Shr2
        | E::Ashr2
        | E::And2
        | E::Or2
        | E::Xor2
        | E::Eq
        | E::NotEq
        | E::Less
        | E::LessEq
        | E::Greater
        | E::GreaterEq
        | E::Inc
        | E::Dec
        | E::Neg
        | E::Not
        | E::IsTrue
        | E::IsFalse
        | E::LdNaN
        | E::LdInfinity
        | E::LdUndefined
        | E::LdNull
        | E::LdTrue
        | E::LdFalse
        | E::LdHole
        | E::LdGlobal
        | E::LdThis
        | E::LdFunction
        | E::LdNewTarget
        | E::PopLexEnv
        | E::LdLexVar
        | E::StLexVar
        | E::CallArg0
        | E::CallArg1
        | E::CallArgs2
        | E::CallArgs3
        | E::CallRange
        | E::CallThis0
        | E::CallThis1
        | E::CallThis2
        | E::CallThis3
        | E::CallThisRange
        | E::ThrowUndefinedIfHole
        | E::ThrowIfNotObject
        | E::SuspendGenerator
        | E::ResumeGenerator
        | E::GetResumeMode
        | E::Jeqz
        | E::Jnez
        | E::Return
        | E::ReturnUndefined => return None,
    };
    Some((id, operands))
}

/// `actualArgc` of a call bytecode with `num_value_in` operands: the callee
/// (and the receiver of a `this` call) leave the count, the func, newTarget
/// and this slots join it.
///
/// Returns `None` for non-call opcodes or too few operands.
#[must_use]
pub fn compute_call_argc(op: EcmaOpcode, num_value_in: usize) -> Option<u32> {
    let fixed = if op.is_call_this() {
        2
    } else if op.is_call_arg() {
        1
    } else {
        return None;
    };
    let user_args = u32::try_from(num_value_in.checked_sub(fixed)?).ok()?;
    Some(user_args + NUM_MANDATORY_JSFUNC_ARGS)
}

/// Callee, receiver and arguments of a call bytecode's operands.
///
/// Returns `None` for non-call opcodes. Plain calls get an `undefined`
/// receiver.
#[must_use]
pub fn call_parts<T: Copy>(op: EcmaOpcode, values: &[T]) -> Option<(T, Option<T>, &[T])> {
    let (&func, rest) = values.split_last()?;
    if op.is_call_arg() {
        Some((func, None, rest))
    } else if op.is_call_this() {
        let (&this, args) = rest.split_first()?;
        Some((func, Some(this), args))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> FrameArgs<u32> {
        FrameArgs {
            func: 100,
            new_target: 101,
            this: 102,
            env: 103,
            params: vec![7, 8],
        }
    }

    #[test]
    fn test_named_access_drops_slot() {
        let (id, ops) = runtime_operands(EcmaOpcode::LdObjByName, &[1, 2, 3], &frame()).unwrap();
        assert_eq!(id, RuntimeStubId::LdObjByName);
        assert_eq!(ops, vec![Operand::Value(3), Operand::Value(2)]);

        let (_, ops) = runtime_operands(EcmaOpcode::StObjByValue, &[1, 2, 3, 4], &frame()).unwrap();
        assert_eq!(ops, vec![Operand::Value(2), Operand::Value(3), Operand::Value(4)]);
    }

    #[test]
    fn test_implicit_frame_operands() {
        let (id, ops) = runtime_operands(EcmaOpcode::SuperCallThisRange, &[5], &frame()).unwrap();
        assert_eq!(id, RuntimeStubId::SuperCall);
        assert_eq!(ops, vec![Operand::Value(100), Operand::Value(101), Operand::Value(5)]);

        let (_, ops) = runtime_operands(EcmaOpcode::CopyRestArgs, &[1], &frame()).unwrap();
        assert_eq!(ops.len(), 3);

        let (_, ops) = runtime_operands(EcmaOpcode::LdSuperByValue, &[1, 2], &frame()).unwrap();
        assert_eq!(ops[2], Operand::Value(100));
    }

    #[test]
    fn test_global_record_flag() {
        let (id, ops) = runtime_operands(EcmaOpcode::StConstToGlobalRecord, &[1, 2], &frame()).unwrap();
        assert_eq!(id, RuntimeStubId::StGlobalRecord);
        assert_eq!(ops[2], Operand::Const(TaggedValue::TRUE));
    }

    #[test]
    fn test_stub_arity_agrees() {
        let f = frame();
        for &op in EcmaOpcode::ALL {
            let values: Vec<u32> = (0..op.value_count() as u32).collect();
            if let Some((id, ops)) = runtime_operands(op, &values, &f) {
                assert!(id.arity().accepts(ops.len()), "{op} -> {} with {}", id.name(), ops.len());
            }
        }
    }

    #[test]
    fn test_operators_use_common_stubs() {
        let f = frame();
        for &op in EcmaOpcode::ALL {
            if let Some(id) = common_stub(op) {
                assert_eq!(id.arity(), (op.value_count(), false), "{op}");
                let values: Vec<u32> = (0..op.value_count() as u32).collect();
                assert!(runtime_operands(op, &values, &f).is_none(), "{op}");
            }
        }
        assert_eq!(common_stub(EcmaOpcode::Eq), Some(CommonStubId::Equal));
        assert_eq!(common_stub(EcmaOpcode::Not), Some(CommonStubId::Not));
        assert_eq!(common_stub(EcmaOpcode::StrictEq), None);
        assert_eq!(common_stub(EcmaOpcode::Exp), None);
    }

    #[test]
    fn test_call_parts() {
        let (func, this, args) = call_parts(EcmaOpcode::CallThis2, &[1, 2, 3, 4]).unwrap();
        assert_eq!((func, this, args), (4, Some(1), &[2, 3][..]));
        let (func, this, args) = call_parts(EcmaOpcode::CallArg0, &[9]).unwrap();
        assert_eq!((func, this, args.len()), (9, None, 0));
        assert!(call_parts(EcmaOpcode::Add2, &[1, 2]).is_none());
    }

    #[test]
    fn test_call_argc_per_variant() {
        assert_eq!(compute_call_argc(EcmaOpcode::CallArg0, 1), Some(3));
        assert_eq!(compute_call_argc(EcmaOpcode::CallArgs3, 4), Some(6));
        assert_eq!(compute_call_argc(EcmaOpcode::CallRange, 6), Some(8));
        assert_eq!(compute_call_argc(EcmaOpcode::CallThis0, 2), Some(3));
        assert_eq!(compute_call_argc(EcmaOpcode::CallThis2, 4), Some(5));
        assert_eq!(compute_call_argc(EcmaOpcode::CallThisRange, 5), Some(6));
        assert_eq!(compute_call_argc(EcmaOpcode::CallThis1, 1), None);
        assert_eq!(compute_call_argc(EcmaOpcode::NewObjRange, 3), None);
    }
}
