//! The bytecode set carried by `JsBytecode` gates.
//!
//! Width variants of the same instruction (imm8/imm16, v8/v16) are collapsed:
//! operands arrive as value inputs, so only the operand layout matters. Each
//! opcode fixes its value-input count; slow path lowering rejects a gate whose
//! count differs.
//!
//! Operand layouts follow the instruction encoding with the accumulator last
//! where it is an operand.

use std::fmt;

macro_rules! ecma_opcodes {
    ($($(#[doc = $doc:literal])* $name:ident ($argc:literal $($plus:tt)?),)*) => {
        /// Bytecode opcodes.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum EcmaOpcode {
            $(
                $(#[doc = $doc])*
                $name,
            )*
        }

        impl EcmaOpcode {
            /// Every opcode.
            pub const ALL: &'static [EcmaOpcode] = &[$(EcmaOpcode::$name,)*];

            /// Mnemonic.
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $(EcmaOpcode::$name => stringify!($name),)*
                }
            }

            /// Fixed value-input count, or the minimum for variadic opcodes.
            #[must_use]
            pub const fn value_count(self) -> usize {
                match self {
                    $(EcmaOpcode::$name => $argc,)*
                }
            }

            /// Whether extra value inputs (call arguments) are allowed.
            #[must_use]
            pub const fn is_variadic(self) -> bool {
                match self {
                    $(EcmaOpcode::$name => ecma_opcodes!(@variadic $($plus)?),)*
                }
            }
        }
    };
    (@variadic +) => { true };
    (@variadic) => { false };
}

ecma_opcodes! {
    /// `[lhs, rhs]`
    Add2(2),
    /// `[lhs, rhs]`
    Sub2(2),
    /// `[lhs, rhs]`
    Mul2(2),
    /// `[lhs, rhs]`
    Div2(2),
    /// `[lhs, rhs]`
    Mod2(2),
    /// `[base, exponent]`
    Exp(2),
    /// `[lhs, rhs]`
    Shl2(2),
    /// `[lhs, rhs]`
    Shr2(2),
    /// `[lhs, rhs]`
    Ashr2(2),
    /// `[lhs, rhs]`
    And2(2),
    /// `[lhs, rhs]`
    Or2(2),
    /// `[lhs, rhs]`
    Xor2(2),
    /// `[lhs, rhs]`
    Eq(2),
    /// `[lhs, rhs]`
    NotEq(2),
    /// `[lhs, rhs]`
    Less(2),
    /// `[lhs, rhs]`
    LessEq(2),
    /// `[lhs, rhs]`
    Greater(2),
    /// `[lhs, rhs]`
    GreaterEq(2),
    /// `[lhs, rhs]`
    StrictEq(2),
    /// `[lhs, rhs]`
    StrictNotEq(2),
    /// `[key, object]`
    IsIn(2),
    /// `[object, target]`
    InstanceOf(2),

    /// `[value]`
    Inc(1),
    /// `[value]`
    Dec(1),
    /// `[value]`
    Neg(1),
    /// `[value]`
    Not(1),
    /// `[value]`
    ToNumber(1),
    /// `[value]`
    ToNumeric(1),
    /// `[value]`
    TypeOf(1),
    /// `[value]`
    IsTrue(1),
    /// `[value]`
    IsFalse(1),

    /// `[]`
    LdNaN(0),
    /// `[]`
    LdInfinity(0),
    /// `[]`
    LdUndefined(0),
    /// `[]`
    LdNull(0),
    /// `[]`
    LdTrue(0),
    /// `[]`
    LdFalse(0),
    /// `[]`
    LdHole(0),
    /// `[]`
    LdGlobal(0),
    /// `[]`
    LdThis(0),
    /// `[]`
    LdFunction(0),
    /// `[]`
    LdNewTarget(0),

    /// `[]`
    CreateEmptyObject(0),
    /// `[]`
    CreateEmptyArray(0),
    /// `[literal]`
    CreateArrayWithBuffer(1),
    /// `[literal]`
    CreateObjectWithBuffer(1),
    /// `[dst, src]`
    CopyDataProperties(2),
    /// `[dst, index, src]`
    StArraySpread(3),

    /// `[slot, key, receiver]`
    LdObjByName(3),
    /// `[slot, key, receiver, value]`
    StObjByName(4),
    /// `[slot, receiver, key]`
    LdObjByValue(3),
    /// `[slot, receiver, key, value]`
    StObjByValue(4),
    /// `[receiver, index]`
    LdObjByIndex(2),
    /// `[receiver, index, value]`
    StObjByIndex(3),
    /// `[key, receiver, value]`
    StOwnByName(3),
    /// `[receiver, key, value]`
    StOwnByValue(3),
    /// `[receiver, index, value]`
    StOwnByIndex(3),
    /// `[receiver, key]`
    LdSuperByValue(2),
    /// `[receiver, key, value]`
    StSuperByValue(3),
    /// `[object, key, getter, setter, flag]`
    DefineGetterSetterByValue(5),
    /// `[object, key]`
    DelObjProp(2),

    /// `[slot, key]`
    TryLdGlobalByName(2),
    /// `[slot, key, value]`
    TryStGlobalByName(3),
    /// `[slot, key]`
    LdGlobalVar(2),
    /// `[slot, key, value]`
    StGlobalVar(3),
    /// `[key, value]`
    StConstToGlobalRecord(2),
    /// `[key, value]`
    StLetToGlobalRecord(2),

    /// `[numVars, parentEnv]`
    NewLexEnv(2),
    /// `[numVars, scopeId, parentEnv]`
    NewLexEnvWithName(3),
    /// `[env]`
    PopLexEnv(1),
    /// `[level, slot, env]`
    LdLexVar(3),
    /// `[level, slot, value, env]`
    StLexVar(4),

    /// `[codeIndex, kind, env]`
    DefineFunc(3),
    /// `[codeIndex, homeObject, env]`
    DefineMethod(3),
    /// `[codeIndex, literal, parent, env]`
    CreateClassWithBuffer(4),
    /// `[]`
    GetUnmappedArgs(0),
    /// `[restIndex]`
    CopyRestArgs(1),

    /// `[func]`
    CallArg0(1),
    /// `[arg0, func]`
    CallArg1(2),
    /// `[arg0, arg1, func]`
    CallArgs2(3),
    /// `[arg0, arg1, arg2, func]`
    CallArgs3(4),
    /// `[args..., func]`
    CallRange(1+),
    /// `[this, func]`
    CallThis0(2),
    /// `[this, arg0, func]`
    CallThis1(3),
    /// `[this, arg0, arg1, func]`
    CallThis2(4),
    /// `[this, arg0, arg1, arg2, func]`
    CallThis3(5),
    /// `[this, args..., func]`
    CallThisRange(2+),
    /// `[func, this, array]`
    CallSpread(3),
    /// `[ctor, args...]`
    NewObjRange(1+),
    /// `[array, ctor]`
    NewObjApply(2),
    /// `[args...]`
    SuperCallThisRange(0+),
    /// `[index, this]`
    ThrowIfSuperNotCorrectCall(2),

    /// `[value]`
    Throw(1),
    /// `[]`
    ThrowNotExists(0),
    /// `[]`
    ThrowPatternNonCoercible(0),
    /// `[]`
    ThrowDeleteSuperProperty(0),
    /// `[name]`
    ThrowConstAssignment(1),
    /// `[value, name]`
    ThrowUndefinedIfHole(2),
    /// `[value]`
    ThrowIfNotObject(1),

    /// `[index]`
    LdModuleVar(1),
    /// `[index]`
    LdLocalModuleVar(1),
    /// `[index]`
    LdExternalModuleVar(1),
    /// `[index, value]`
    StModuleVar(2),

    /// `[func]`
    CreateGeneratorObj(1),
    /// `[func]`
    CreateAsyncGeneratorObj(1),
    /// `[generator, value, env, savedRegisters...]`
    SuspendGenerator(3+),
    /// `[generator]`
    ResumeGenerator(1),
    /// `[generator]`
    GetResumeMode(1),
    /// `[generator, value, done]`
    AsyncGeneratorResolve(3),
    /// `[generator, value]`
    AsyncGeneratorReject(2),
    /// `[generator, state]`
    SetGeneratorState(2),
    /// `[value, done]`
    CreateIterResultObj(2),

    /// `[condition]`
    Jeqz(1),
    /// `[condition]`
    Jnez(1),
    /// `[value]`
    Return(1),
    /// `[]`
    ReturnUndefined(0),
    /// `[]`
    Debugger(0),
}

impl EcmaOpcode {
    /// Whether `n` value inputs fit this opcode.
    #[must_use]
    pub const fn accepts(self, n: usize) -> bool {
        if self.is_variadic() {
            n >= self.value_count()
        } else {
            n == self.value_count()
        }
    }

    /// Whether the instruction can raise a program exception.
    #[must_use]
    pub const fn can_throw(self) -> bool {
        !matches!(
            self,
            EcmaOpcode::LdNaN
                | EcmaOpcode::LdInfinity
                | EcmaOpcode::LdUndefined
                | EcmaOpcode::LdNull
                | EcmaOpcode::LdTrue
                | EcmaOpcode::LdFalse
                | EcmaOpcode::LdHole
                | EcmaOpcode::LdGlobal
                | EcmaOpcode::LdThis
                | EcmaOpcode::LdFunction
                | EcmaOpcode::LdNewTarget
                | EcmaOpcode::CreateEmptyArray
                | EcmaOpcode::GetUnmappedArgs
                | EcmaOpcode::CopyRestArgs
                | EcmaOpcode::NewLexEnv
                | EcmaOpcode::PopLexEnv
                | EcmaOpcode::LdLexVar
                | EcmaOpcode::StLexVar
                | EcmaOpcode::GetResumeMode
                | EcmaOpcode::ResumeGenerator
                | EcmaOpcode::Jeqz
                | EcmaOpcode::Jnez
                | EcmaOpcode::Return
                | EcmaOpcode::ReturnUndefined
                | EcmaOpcode::Debugger
        )
    }

    /// Conditional jumps.
    #[must_use]
    pub const fn is_jump(self) -> bool {
        matches!(self, EcmaOpcode::Jeqz | EcmaOpcode::Jnez)
    }

    /// Instructions that leave the function.
    #[must_use]
    pub const fn is_return(self) -> bool {
        matches!(self, EcmaOpcode::Return | EcmaOpcode::ReturnUndefined)
    }

    /// Plain calls with the callee as the last operand.
    #[must_use]
    pub const fn is_call_arg(self) -> bool {
        matches!(
            self,
            EcmaOpcode::CallArg0
                | EcmaOpcode::CallArg1
                | EcmaOpcode::CallArgs2
                | EcmaOpcode::CallArgs3
                | EcmaOpcode::CallRange
        )
    }

    /// Calls with an explicit receiver first and the callee last.
    #[must_use]
    pub const fn is_call_this(self) -> bool {
        matches!(
            self,
            EcmaOpcode::CallThis0
                | EcmaOpcode::CallThis1
                | EcmaOpcode::CallThis2
                | EcmaOpcode::CallThis3
                | EcmaOpcode::CallThisRange
        )
    }
}

impl fmt::Display for EcmaOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_counts() {
        assert!(EcmaOpcode::Add2.accepts(2));
        assert!(!EcmaOpcode::Add2.accepts(3));
        assert!(EcmaOpcode::CallRange.accepts(1));
        assert!(EcmaOpcode::CallRange.accepts(6));
        assert!(!EcmaOpcode::CallThisRange.accepts(1));
        assert!(EcmaOpcode::SuperCallThisRange.accepts(0));
    }

    #[test]
    fn test_classification() {
        assert!(EcmaOpcode::CallArgs2.is_call_arg());
        assert!(EcmaOpcode::CallThis3.is_call_this());
        assert!(!EcmaOpcode::LdTrue.can_throw());
        assert!(EcmaOpcode::Add2.can_throw());
        assert_eq!(EcmaOpcode::ALL.iter().filter(|op| op.is_jump()).count(), 2);
    }
}
