//! Gate opcodes.
//!
//! Opcodes fall into a handful of families:
//! - **Roots**: `StateEntry`, `DependEntry`
//! - **Control**: branch, merge, loop, exception projections, returns
//! - **Relays and selectors**: anchor depend chains and merge values at joins
//! - **HIR**: bytecode and typed operations that sit on the control chain and
//!   are replaced by the lowering passes
//! - **Effects**: loads, stores and calls threaded through the depend chain
//! - **Pure**: constants, arguments, arithmetic, comparisons, conversions
//!
//! Every opcode has a fixed [`GateShape`] that the verifier checks.

use std::fmt;

use kiln_core::DeoptType;
use kiln_runtime::{BuiltinId, CommonStubId, GlobalEnvField, RuntimeStubId};

use super::ecma_opcode::EcmaOpcode;
use super::types::GateType;

// =============================================================================
// Operand Enums
// =============================================================================

/// Integer comparison predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ICmpCond {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// Signed `<`.
    Slt,
    /// Signed `<=`.
    Sle,
    /// Signed `>`.
    Sgt,
    /// Signed `>=`.
    Sge,
    /// Unsigned `<`.
    Ult,
    /// Unsigned `<=`.
    Ule,
    /// Unsigned `>`.
    Ugt,
    /// Unsigned `>=`.
    Uge,
}

/// Floating comparison predicate. `O*` are false on NaN, `U*` true.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FCmpCond {
    /// Ordered equal.
    Oeq,
    /// Ordered not equal.
    One,
    /// Ordered less than.
    Olt,
    /// Ordered less or equal.
    Ole,
    /// Ordered greater than.
    Ogt,
    /// Ordered greater or equal.
    Oge,
    /// Unordered or equal.
    Ueq,
    /// Unordered or not equal.
    Une,
    /// Either operand is NaN.
    Uno,
    /// Neither operand is NaN.
    Ord,
}

/// Binary operators of `TypedBinaryOp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypedBinOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `<`
    Less,
    /// `<=`
    LessEq,
    /// `>`
    Greater,
    /// `>=`
    GreaterEq,
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `===`
    StrictEq,
    /// `!==`
    StrictNotEq,
    /// `<<`
    Shl,
    /// `>>>`
    Shr,
    /// `>>`
    Ashr,
    /// `&`
    And,
    /// `|`
    Or,
    /// `^`
    Xor,
}

impl TypedBinOp {
    /// Comparison operators produce a boolean.
    #[must_use]
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            TypedBinOp::Less
                | TypedBinOp::LessEq
                | TypedBinOp::Greater
                | TypedBinOp::GreaterEq
                | TypedBinOp::Eq
                | TypedBinOp::NotEq
                | TypedBinOp::StrictEq
                | TypedBinOp::StrictNotEq
        )
    }

    /// Shift and bitwise operators work on int32 operands.
    #[must_use]
    pub const fn is_bitwise(self) -> bool {
        matches!(
            self,
            TypedBinOp::Shl
                | TypedBinOp::Shr
                | TypedBinOp::Ashr
                | TypedBinOp::And
                | TypedBinOp::Or
                | TypedBinOp::Xor
        )
    }

    /// Operator for a bytecode, if it has a typed form.
    #[must_use]
    pub const fn from_bytecode(op: EcmaOpcode) -> Option<Self> {
        Some(match op {
            EcmaOpcode::Add2 => TypedBinOp::Add,
            EcmaOpcode::Sub2 => TypedBinOp::Sub,
            EcmaOpcode::Mul2 => TypedBinOp::Mul,
            EcmaOpcode::Div2 => TypedBinOp::Div,
            EcmaOpcode::Mod2 => TypedBinOp::Mod,
            EcmaOpcode::Less => TypedBinOp::Less,
            EcmaOpcode::LessEq => TypedBinOp::LessEq,
            EcmaOpcode::Greater => TypedBinOp::Greater,
            EcmaOpcode::GreaterEq => TypedBinOp::GreaterEq,
            EcmaOpcode::Eq => TypedBinOp::Eq,
            EcmaOpcode::NotEq => TypedBinOp::NotEq,
            EcmaOpcode::StrictEq => TypedBinOp::StrictEq,
            EcmaOpcode::StrictNotEq => TypedBinOp::StrictNotEq,
            EcmaOpcode::Shl2 => TypedBinOp::Shl,
            EcmaOpcode::Shr2 => TypedBinOp::Shr,
            EcmaOpcode::Ashr2 => TypedBinOp::Ashr,
            EcmaOpcode::And2 => TypedBinOp::And,
            EcmaOpcode::Or2 => TypedBinOp::Or,
            EcmaOpcode::Xor2 => TypedBinOp::Xor,
            _ => return None,
        })
    }
}

/// Unary operators of `TypedUnaryOp` and `Int32OverflowCheck`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypedUnOp {
    /// `++`
    Inc,
    /// `--`
    Dec,
    /// Unary `-`.
    Neg,
    /// `~`
    Not,
    /// `ToNumeric` on a number.
    ToNumber,
    /// Boolean test.
    IsTrue,
    /// Negated boolean test.
    IsFalse,
}

impl TypedUnOp {
    /// Operator for a bytecode, if it has a typed form.
    #[must_use]
    pub const fn from_bytecode(op: EcmaOpcode) -> Option<Self> {
        Some(match op {
            EcmaOpcode::Inc => TypedUnOp::Inc,
            EcmaOpcode::Dec => TypedUnOp::Dec,
            EcmaOpcode::Neg => TypedUnOp::Neg,
            EcmaOpcode::Not => TypedUnOp::Not,
            EcmaOpcode::ToNumeric | EcmaOpcode::ToNumber => TypedUnOp::ToNumber,
            EcmaOpcode::IsTrue => TypedUnOp::IsTrue,
            EcmaOpcode::IsFalse => TypedUnOp::IsFalse,
            _ => return None,
        })
    }
}

/// Element storage of `LoadElement`/`StoreElement`/`IndexCheck`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// Tagged elements of a stable `Array`.
    Array,
    /// `Float32Array` backing store.
    Float32Array,
}

/// Conditional jump flavor of `TypedJump`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypedJumpOp {
    /// Jump when the condition is false.
    Jeqz,
    /// Jump when the condition is true.
    Jnez,
}

/// What a `Call` gate calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallTarget {
    /// A GC-capable runtime stub; arguments are tagged values.
    Runtime(RuntimeStubId),
    /// A no-GC runtime stub; arguments are raw words.
    NoGc(RuntimeStubId),
    /// A common stub.
    Common(CommonStubId),
    /// A builtin stub, with the builtin entry layout.
    Builtin(BuiltinId),
    /// `JSCall`: `[env, argc, func, newTarget, this, args..., bcOffset]`.
    Js,
    /// `JSCallNew`: same layout as [`CallTarget::Js`].
    JsNew,
}

impl CallTarget {
    /// Display name of the callee.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            CallTarget::Runtime(id) | CallTarget::NoGc(id) => id.name(),
            CallTarget::Common(id) => id.name(),
            CallTarget::Builtin(id) => id.name(),
            CallTarget::Js => "JSCall",
            CallTarget::JsNew => "JSCallNew",
        }
    }
}

// =============================================================================
// Gate Shape
// =============================================================================

/// Expected number of inputs in one input group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Count {
    /// Exactly `n`.
    Exact(usize),
    /// At least `n`.
    AtLeast(usize),
}

impl Count {
    /// Whether `n` inputs satisfy this count.
    #[must_use]
    pub const fn accepts(self, n: usize) -> bool {
        match self {
            Count::Exact(k) => n == k,
            Count::AtLeast(k) => n >= k,
        }
    }
}

/// Input groups an opcode requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateShape {
    /// State inputs.
    pub state: Count,
    /// Depend inputs.
    pub depend: Count,
    /// Value inputs.
    pub value: Count,
}

const fn shape(state: Count, depend: Count, value: Count) -> GateShape {
    GateShape { state, depend, value }
}

const fn exact(state: usize, depend: usize, value: usize) -> GateShape {
    shape(Count::Exact(state), Count::Exact(depend), Count::Exact(value))
}

// =============================================================================
// OpCode
// =============================================================================

/// Gate opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    // ---- Roots ----
    /// Control root.
    StateEntry,
    /// Depend root.
    DependEntry,

    // ---- Control ----
    /// Two-way branch on an `I1` condition.
    IfBranch,
    /// Taken side of a branch.
    IfTrue,
    /// Fall-through side of a branch.
    IfFalse,
    /// Control join.
    Merge,
    /// Loop header; state 0 enters, the rest are back edges.
    LoopBegin,
    /// Loop back edge.
    LoopBack,
    /// Normal completion of a throwing HIR gate.
    IfSuccess,
    /// Exceptional completion of a throwing HIR gate.
    IfException,
    /// Return a value.
    Return,
    /// Return without a value.
    ReturnVoid,

    // ---- Relays and selectors ----
    /// Anchor a depend chain on a control gate.
    DependRelay,
    /// Depend phi at a merge or loop.
    DependSelector,
    /// Value phi at a merge or loop.
    ValueSelector,

    // ---- Bytecode HIR ----
    /// A bytecode instruction awaiting lowering.
    JsBytecode {
        /// Instruction.
        op: EcmaOpcode,
        /// Bytecode offset.
        bc_offset: u32,
    },
    /// Hotness counter update at a loop back edge; the payload is the
    /// (negative) jump distance.
    UpdateHotness(i32),
    /// Guard: deoptimize unless the `I1` condition holds.
    DeoptCheck(DeoptType),

    // ---- Typed HIR ----
    /// Guard on the primitive type of a value.
    PrimitiveTypeCheck(GateType),
    /// Guard that `[receiver]` has hidden class `[hclass]`.
    ObjectTypeCheck,
    /// Guard that a value is an `Array`.
    ArrayCheck,
    /// Guard that an `Array` has stable elements.
    StableArrayCheck,
    /// Guard that a value is a `Float32Array`.
    TypedArrayCheck,
    /// Guard that `[receiver, index]` is in bounds.
    IndexCheck(ElementKind),
    /// Guard that the unary operation on an int does not leave int32.
    Int32OverflowCheck(TypedUnOp),
    /// Guard that `[func]` is the given builtin.
    CallTargetCheck(BuiltinId),
    /// Guard that `[receiver]` is the given global environment object.
    ReceiverCheck(GlobalEnvField),
    /// Typed binary operation.
    TypedBinaryOp {
        /// Operator.
        op: TypedBinOp,
        /// Left operand type.
        left: GateType,
        /// Right operand type.
        right: GateType,
    },
    /// Typed unary operation.
    TypedUnaryOp {
        /// Operator.
        op: TypedUnOp,
        /// Operand type.
        ty: GateType,
    },
    /// Primitive to number conversion.
    TypeConvert {
        /// Source type.
        from: GateType,
        /// Target type.
        to: GateType,
    },
    /// Conditional jump on a trusted boolean.
    TypedJump(TypedJumpOp),
    /// Load an inline property: `[receiver, offset]`.
    LoadProperty,
    /// Store an inline property: `[receiver, offset, value]`.
    StoreProperty,
    /// `length` of an `Array` or `Float32Array`.
    LoadArrayLength,
    /// `[receiver, index]`.
    LoadElement(ElementKind),
    /// `[receiver, index, value]`.
    StoreElement(ElementKind),
    /// Young-space allocation of `[size]` bytes.
    HeapAlloc,
    /// Allocate the receiver of `new` for a known base class: `[ctor]`.
    TypedNewAllocateThis,
    /// Allocate the receiver in a derived constructor: `[superCtor, newTarget]`.
    TypedSuperAllocateThis,
    /// Parent constructor of `[func]`.
    GetSuperConstructor,
    /// `[func, newTarget, this, args...]`.
    Construct,
    /// Builtin call recognized from type information:
    /// `[func, this, args...]`.
    TypedCallBuiltin(BuiltinId),

    // ---- Effects ----
    /// `[base, offset]`.
    Load,
    /// `[base, offset, value]`.
    Store,
    /// `[glue, args...]`.
    Call(CallTarget),
    /// Take the pending exception.
    GetException,
    /// Frame state bookkeeping for the next bytecode: `[frameState]`.
    StateSplit,
    /// Leave compiled code: `[frameState]`.
    Deopt(DeoptType),

    // ---- Pure ----
    /// Constant word.
    Constant(u64),
    /// Common or declared argument by index.
    Arg(u32),
    /// Declared argument at a dynamic `[index]`; undefined past the end.
    ArgAt,
    /// Snapshot of `[vregs..., acc, env]` at a bytecode offset.
    FrameState(u32),
    /// Register of a resumed generator: `[resumeGate]`.
    RestoreRegister(u16),
    /// Lexical environment of a resumed generator: `[resumeGate]`.
    RestoreEnv,
    /// Wrapping add.
    Add,
    /// Wrapping subtract.
    Sub,
    /// Wrapping multiply; float multiply on float types.
    Mul,
    /// Signed divide.
    Sdiv,
    /// Signed remainder.
    Smod,
    /// Float divide.
    Fdiv,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise xor.
    Xor,
    /// Shift left.
    Lsl,
    /// Logical shift right.
    Lsr,
    /// Arithmetic shift right.
    Asr,
    /// Integer compare.
    Icmp(ICmpCond),
    /// Float compare.
    Fcmp(FCmpCond),
    /// `[cond, then, else]`.
    Select,
    /// Zero extend.
    Zext,
    /// Sign extend.
    Sext,
    /// Truncate.
    Trunc,
    /// Signed integer to double.
    SignedIntToFloat,
    /// Double to signed integer, saturating.
    FloatToSignedInt,
    /// Reinterpret bits.
    Bitcast,
    /// `f32` to `f64`.
    FExt,
    /// `f64` to `f32`.
    FTrunc,
}

impl OpCode {
    /// Input groups required by this opcode.
    #[must_use]
    pub const fn shape(self) -> GateShape {
        use Count::{AtLeast, Exact};
        match self {
            OpCode::StateEntry | OpCode::DependEntry => exact(0, 0, 0),
            OpCode::IfBranch => exact(1, 0, 1),
            OpCode::IfTrue | OpCode::IfFalse | OpCode::LoopBack | OpCode::IfSuccess => exact(1, 0, 0),
            OpCode::Merge => shape(AtLeast(1), Exact(0), Exact(0)),
            OpCode::LoopBegin => shape(AtLeast(1), Exact(0), Exact(0)),
            OpCode::IfException => exact(1, 1, 0),
            OpCode::Return => exact(1, 1, 1),
            OpCode::ReturnVoid => exact(1, 1, 0),
            OpCode::DependRelay => exact(1, 1, 0),
            OpCode::DependSelector => shape(Exact(1), AtLeast(1), Exact(0)),
            OpCode::ValueSelector => shape(Exact(1), Exact(0), AtLeast(1)),
            OpCode::JsBytecode { op, .. } => {
                if op.is_variadic() {
                    shape(Exact(1), Exact(1), AtLeast(op.value_count()))
                } else {
                    exact(1, 1, op.value_count())
                }
            }
            OpCode::UpdateHotness(_) => exact(1, 1, 0),
            OpCode::DeoptCheck(_) => exact(1, 1, 2),
            OpCode::PrimitiveTypeCheck(_)
            | OpCode::ArrayCheck
            | OpCode::StableArrayCheck
            | OpCode::TypedArrayCheck
            | OpCode::Int32OverflowCheck(_)
            | OpCode::CallTargetCheck(_)
            | OpCode::ReceiverCheck(_)
            | OpCode::TypedUnaryOp { .. }
            | OpCode::TypeConvert { .. }
            | OpCode::TypedJump(_)
            | OpCode::LoadArrayLength
            | OpCode::HeapAlloc
            | OpCode::TypedNewAllocateThis
            | OpCode::GetSuperConstructor => exact(1, 1, 1),
            OpCode::ObjectTypeCheck
            | OpCode::IndexCheck(_)
            | OpCode::TypedBinaryOp { .. }
            | OpCode::LoadProperty
            | OpCode::LoadElement(_)
            | OpCode::TypedSuperAllocateThis => exact(1, 1, 2),
            OpCode::StoreProperty | OpCode::StoreElement(_) => exact(1, 1, 3),
            OpCode::Construct => shape(Exact(1), Exact(1), AtLeast(3)),
            OpCode::TypedCallBuiltin(_) => shape(Exact(1), Exact(1), AtLeast(2)),
            OpCode::Load => exact(0, 1, 2),
            OpCode::Store => exact(0, 1, 3),
            OpCode::Call(_) => shape(Exact(0), Exact(1), AtLeast(1)),
            OpCode::GetException => exact(0, 1, 0),
            OpCode::StateSplit | OpCode::Deopt(_) => exact(0, 1, 1),
            OpCode::Constant(_) | OpCode::Arg(_) => exact(0, 0, 0),
            OpCode::FrameState(_) => shape(Exact(0), Exact(0), AtLeast(0)),
            OpCode::ArgAt
            | OpCode::RestoreRegister(_)
            | OpCode::RestoreEnv
            | OpCode::Zext
            | OpCode::Sext
            | OpCode::Trunc
            | OpCode::SignedIntToFloat
            | OpCode::FloatToSignedInt
            | OpCode::Bitcast
            | OpCode::FExt
            | OpCode::FTrunc => exact(0, 0, 1),
            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Sdiv
            | OpCode::Smod
            | OpCode::Fdiv
            | OpCode::And
            | OpCode::Or
            | OpCode::Xor
            | OpCode::Lsl
            | OpCode::Lsr
            | OpCode::Asr
            | OpCode::Icmp(_)
            | OpCode::Fcmp(_) => exact(0, 0, 2),
            OpCode::Select => exact(0, 0, 3),
        }
    }

    /// Gates that take part in control flow (have a state output).
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(
            self,
            OpCode::StateEntry
                | OpCode::IfBranch
                | OpCode::IfTrue
                | OpCode::IfFalse
                | OpCode::Merge
                | OpCode::LoopBegin
                | OpCode::LoopBack
                | OpCode::IfSuccess
                | OpCode::IfException
                | OpCode::Return
                | OpCode::ReturnVoid
        ) || self.is_hir()
    }

    /// Gates that start a basic block.
    #[must_use]
    pub const fn is_block_head(self) -> bool {
        matches!(
            self,
            OpCode::StateEntry
                | OpCode::IfTrue
                | OpCode::IfFalse
                | OpCode::Merge
                | OpCode::LoopBegin
                | OpCode::IfSuccess
                | OpCode::IfException
        )
    }

    /// Joins with selectors.
    #[must_use]
    pub const fn is_merge(self) -> bool {
        matches!(self, OpCode::Merge | OpCode::LoopBegin)
    }

    /// Gates that end a function.
    #[must_use]
    pub const fn is_return(self) -> bool {
        matches!(self, OpCode::Return | OpCode::ReturnVoid)
    }

    /// High-level gates replaced by the lowering passes.
    #[must_use]
    pub const fn is_hir(self) -> bool {
        matches!(
            self,
            OpCode::JsBytecode { .. }
                | OpCode::UpdateHotness(_)
                | OpCode::DeoptCheck(_)
                | OpCode::PrimitiveTypeCheck(_)
                | OpCode::ObjectTypeCheck
                | OpCode::ArrayCheck
                | OpCode::StableArrayCheck
                | OpCode::TypedArrayCheck
                | OpCode::IndexCheck(_)
                | OpCode::Int32OverflowCheck(_)
                | OpCode::CallTargetCheck(_)
                | OpCode::ReceiverCheck(_)
                | OpCode::TypedBinaryOp { .. }
                | OpCode::TypedUnaryOp { .. }
                | OpCode::TypeConvert { .. }
                | OpCode::TypedJump(_)
                | OpCode::LoadProperty
                | OpCode::StoreProperty
                | OpCode::LoadArrayLength
                | OpCode::LoadElement(_)
                | OpCode::StoreElement(_)
                | OpCode::HeapAlloc
                | OpCode::TypedNewAllocateThis
                | OpCode::TypedSuperAllocateThis
                | OpCode::GetSuperConstructor
                | OpCode::Construct
                | OpCode::TypedCallBuiltin(_)
        )
    }

    /// Typed HIR introduced by type-feedback lowering.
    #[must_use]
    pub const fn is_typed_hir(self) -> bool {
        self.is_hir() && !matches!(self, OpCode::JsBytecode { .. } | OpCode::UpdateHotness(_))
    }

    /// Guards that TypeLowering turns into `DeoptCheck`s.
    #[must_use]
    pub const fn is_check(self) -> bool {
        matches!(
            self,
            OpCode::PrimitiveTypeCheck(_)
                | OpCode::ObjectTypeCheck
                | OpCode::ArrayCheck
                | OpCode::StableArrayCheck
                | OpCode::TypedArrayCheck
                | OpCode::IndexCheck(_)
                | OpCode::Int32OverflowCheck(_)
                | OpCode::CallTargetCheck(_)
                | OpCode::ReceiverCheck(_)
        )
    }

    /// Floating gates ordered by the depend chain.
    #[must_use]
    pub const fn is_effect(self) -> bool {
        matches!(
            self,
            OpCode::Load
                | OpCode::Store
                | OpCode::Call(_)
                | OpCode::GetException
                | OpCode::StateSplit
                | OpCode::Deopt(_)
        )
    }

    /// Gates whose output anchors a depend chain on a control gate.
    #[must_use]
    pub const fn is_depend_anchor(self) -> bool {
        matches!(
            self,
            OpCode::DependEntry | OpCode::DependRelay | OpCode::DependSelector | OpCode::IfException
        ) || self.is_hir()
    }

    /// Side-effect free value gates.
    #[must_use]
    pub const fn is_pure(self) -> bool {
        !self.is_control()
            && !self.is_effect()
            && !matches!(
                self,
                OpCode::DependEntry
                    | OpCode::DependRelay
                    | OpCode::DependSelector
                    | OpCode::ValueSelector
                    | OpCode::RestoreRegister(_)
                    | OpCode::RestoreEnv
            )
    }

    /// Bytecode carried by a `JsBytecode` gate.
    #[must_use]
    pub const fn bytecode(self) -> Option<EcmaOpcode> {
        match self {
            OpCode::JsBytecode { op, .. } => Some(op),
            _ => None,
        }
    }

    /// Short mnemonic.
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            OpCode::StateEntry => "STATE_ENTRY",
            OpCode::DependEntry => "DEPEND_ENTRY",
            OpCode::IfBranch => "IF_BRANCH",
            OpCode::IfTrue => "IF_TRUE",
            OpCode::IfFalse => "IF_FALSE",
            OpCode::Merge => "MERGE",
            OpCode::LoopBegin => "LOOP_BEGIN",
            OpCode::LoopBack => "LOOP_BACK",
            OpCode::IfSuccess => "IF_SUCCESS",
            OpCode::IfException => "IF_EXCEPTION",
            OpCode::Return => "RETURN",
            OpCode::ReturnVoid => "RETURN_VOID",
            OpCode::DependRelay => "DEPEND_RELAY",
            OpCode::DependSelector => "DEPEND_SELECTOR",
            OpCode::ValueSelector => "VALUE_SELECTOR",
            OpCode::JsBytecode { .. } => "JS_BYTECODE",
            OpCode::UpdateHotness(_) => "UPDATE_HOTNESS",
            OpCode::DeoptCheck(_) => "DEOPT_CHECK",
            OpCode::PrimitiveTypeCheck(_) => "PRIMITIVE_TYPE_CHECK",
            OpCode::ObjectTypeCheck => "OBJECT_TYPE_CHECK",
            OpCode::ArrayCheck => "ARRAY_CHECK",
            OpCode::StableArrayCheck => "STABLE_ARRAY_CHECK",
            OpCode::TypedArrayCheck => "TYPED_ARRAY_CHECK",
            OpCode::IndexCheck(_) => "INDEX_CHECK",
            OpCode::Int32OverflowCheck(_) => "INT32_OVERFLOW_CHECK",
            OpCode::CallTargetCheck(_) => "CALL_TARGET_CHECK",
            OpCode::ReceiverCheck(_) => "RECEIVER_CHECK",
            OpCode::TypedBinaryOp { .. } => "TYPED_BINARY_OP",
            OpCode::TypedUnaryOp { .. } => "TYPED_UNARY_OP",
            OpCode::TypeConvert { .. } => "TYPE_CONVERT",
            OpCode::TypedJump(_) => "TYPED_JUMP",
            OpCode::LoadProperty => "LOAD_PROPERTY",
            OpCode::StoreProperty => "STORE_PROPERTY",
            OpCode::LoadArrayLength => "LOAD_ARRAY_LENGTH",
            OpCode::LoadElement(_) => "LOAD_ELEMENT",
            OpCode::StoreElement(_) => "STORE_ELEMENT",
            OpCode::HeapAlloc => "HEAP_ALLOC",
            OpCode::TypedNewAllocateThis => "TYPED_NEW_ALLOCATE_THIS",
            OpCode::TypedSuperAllocateThis => "TYPED_SUPER_ALLOCATE_THIS",
            OpCode::GetSuperConstructor => "GET_SUPER_CONSTRUCTOR",
            OpCode::Construct => "CONSTRUCT",
            OpCode::TypedCallBuiltin(_) => "TYPED_CALL_BUILTIN",
            OpCode::Load => "LOAD",
            OpCode::Store => "STORE",
            OpCode::Call(_) => "CALL",
            OpCode::GetException => "GET_EXCEPTION",
            OpCode::StateSplit => "STATE_SPLIT",
            OpCode::Deopt(_) => "DEOPT",
            OpCode::Constant(_) => "CONSTANT",
            OpCode::Arg(_) => "ARG",
            OpCode::ArgAt => "ARG_AT",
            OpCode::FrameState(_) => "FRAME_STATE",
            OpCode::RestoreRegister(_) => "RESTORE_REGISTER",
            OpCode::RestoreEnv => "RESTORE_ENV",
            OpCode::Add => "ADD",
            OpCode::Sub => "SUB",
            OpCode::Mul => "MUL",
            OpCode::Sdiv => "SDIV",
            OpCode::Smod => "SMOD",
            OpCode::Fdiv => "FDIV",
            OpCode::And => "AND",
            OpCode::Or => "OR",
            OpCode::Xor => "XOR",
            OpCode::Lsl => "LSL",
            OpCode::Lsr => "LSR",
            OpCode::Asr => "ASR",
            OpCode::Icmp(_) => "ICMP",
            OpCode::Fcmp(_) => "FCMP",
            OpCode::Select => "SELECT",
            OpCode::Zext => "ZEXT",
            OpCode::Sext => "SEXT",
            OpCode::Trunc => "TRUNC",
            OpCode::SignedIntToFloat => "SIGNED_INT_TO_FLOAT",
            OpCode::FloatToSignedInt => "FLOAT_TO_SIGNED_INT",
            OpCode::Bitcast => "BITCAST",
            OpCode::FExt => "FEXT",
            OpCode::FTrunc => "FTRUNC",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpCode::JsBytecode { op, bc_offset } => write!(f, "JS_BYTECODE({op}@{bc_offset})"),
            OpCode::Constant(bits) => write!(f, "CONSTANT({bits:#x})"),
            OpCode::Arg(i) => write!(f, "ARG({i})"),
            OpCode::Call(target) => write!(f, "CALL({})", target.name()),
            OpCode::DeoptCheck(ty) | OpCode::Deopt(ty) => write!(f, "{}({ty})", self.mnemonic()),
            OpCode::TypedBinaryOp { op, .. } => write!(f, "TYPED_BINARY_OP({op:?})"),
            OpCode::TypedUnaryOp { op, .. } => write!(f, "TYPED_UNARY_OP({op:?})"),
            other => f.write_str(other.mnemonic()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shapes() {
        assert_eq!(OpCode::IfBranch.shape(), exact(1, 0, 1));
        assert!(OpCode::Merge.shape().state.accepts(3));
        assert!(!OpCode::Merge.shape().state.accepts(0));
        let call = OpCode::JsBytecode { op: EcmaOpcode::CallRange, bc_offset: 0 };
        assert!(call.shape().value.accepts(4));
        let add = OpCode::JsBytecode { op: EcmaOpcode::Add2, bc_offset: 0 };
        assert!(!add.shape().value.accepts(3));
    }

    #[test]
    fn test_classification() {
        assert!(OpCode::TypedBinaryOp {
            op: TypedBinOp::Add,
            left: GateType::Int,
            right: GateType::Int
        }
        .is_typed_hir());
        assert!(OpCode::Call(CallTarget::Js).is_effect());
        assert!(OpCode::Add.is_pure());
        assert!(!OpCode::ValueSelector.is_pure());
        assert!(OpCode::IfException.is_depend_anchor());
        assert!(OpCode::ArrayCheck.is_check());
        assert!(!OpCode::HeapAlloc.is_check());
    }

    #[test]
    fn test_bytecode_mapping() {
        assert_eq!(TypedBinOp::from_bytecode(EcmaOpcode::Mod2), Some(TypedBinOp::Mod));
        assert_eq!(TypedBinOp::from_bytecode(EcmaOpcode::Exp), None);
        assert!(TypedBinOp::Less.is_comparison());
        assert!(TypedBinOp::Xor.is_bitwise());
        assert_eq!(TypedUnOp::from_bytecode(EcmaOpcode::ToNumeric), Some(TypedUnOp::ToNumber));
    }
}
