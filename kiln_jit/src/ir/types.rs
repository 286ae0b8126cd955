//! Machine types and the gate type lattice.
//!
//! Every gate has a [`MachineType`] describing the bits it produces and a
//! [`GateType`] describing which language values those bits may hold. The
//! type lowering passes branch on the latter to pick a specialization.

use std::fmt;

use kiln_runtime::BuiltinId;

// =============================================================================
// Machine Type
// =============================================================================

/// Representation of a gate's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MachineType {
    /// Produces no value (control and pure ordering gates).
    #[default]
    NoValue,
    /// Boolean flag.
    I1,
    /// Byte.
    I8,
    /// 16-bit integer.
    I16,
    /// 32-bit integer.
    I32,
    /// 64-bit integer, pointer or tagged value.
    I64,
    /// Single precision float.
    F32,
    /// Double precision float.
    F64,
}

impl MachineType {
    /// Width in bytes of a memory access of this type.
    #[must_use]
    pub const fn size(self) -> u64 {
        match self {
            MachineType::NoValue => 0,
            MachineType::I1 | MachineType::I8 => 1,
            MachineType::I16 => 2,
            MachineType::I32 | MachineType::F32 => 4,
            MachineType::I64 | MachineType::F64 => 8,
        }
    }

    /// Integer width in bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            MachineType::NoValue => 0,
            MachineType::I1 => 1,
            MachineType::I8 => 8,
            MachineType::I16 => 16,
            MachineType::I32 | MachineType::F32 => 32,
            MachineType::I64 | MachineType::F64 => 64,
        }
    }

    /// Floating point types.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, MachineType::F32 | MachineType::F64)
    }

    /// Mask selecting the low `bits()` of a word.
    #[must_use]
    pub const fn mask(self) -> u64 {
        match self.bits() {
            0 => 0,
            64 => u64::MAX,
            n => (1u64 << n) - 1,
        }
    }
}

// =============================================================================
// Gate Type
// =============================================================================

/// What language values a gate may produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GateType {
    /// Raw machine value, not a tagged language value.
    NJSValue,
    /// Anything.
    #[default]
    Any,
    /// Int-tagged number.
    Int,
    /// Double-tagged number.
    Double,
    /// Int or double.
    Number,
    /// `true` or `false`.
    Boolean,
    /// `undefined`.
    Undefined,
    /// `null`.
    Null,
    /// Big integer.
    BigInt,
    /// String.
    String,
    /// Instance of the class registered under this index.
    ClassInstance(u32),
    /// Constructor of the class registered under this index.
    ClassConstructor(u32),
    /// Array.
    Array,
    /// `Float32Array`.
    Float32Array,
    /// Any function.
    Function,
    /// The global `Math` object.
    MathObject,
    /// A builtin function recognized by builtin lowering.
    BuiltinFunction(BuiltinId),
}

impl GateType {
    /// No static information.
    #[must_use]
    pub const fn is_any(self) -> bool {
        matches!(self, GateType::Any)
    }

    /// Int-tagged.
    #[must_use]
    pub const fn is_int(self) -> bool {
        matches!(self, GateType::Int)
    }

    /// Double-tagged.
    #[must_use]
    pub const fn is_double(self) -> bool {
        matches!(self, GateType::Double)
    }

    /// Int, double or number.
    #[must_use]
    pub const fn is_number(self) -> bool {
        matches!(self, GateType::Int | GateType::Double | GateType::Number)
    }

    /// Boolean.
    #[must_use]
    pub const fn is_boolean(self) -> bool {
        matches!(self, GateType::Boolean)
    }

    /// Primitives whose `ToNumber` is free of side effects and allocation.
    #[must_use]
    pub const fn is_digitable_primitive(self) -> bool {
        matches!(
            self,
            GateType::Int
                | GateType::Double
                | GateType::Number
                | GateType::Boolean
                | GateType::Null
                | GateType::Undefined
        )
    }

    /// Class instance index, if any.
    #[must_use]
    pub const fn class_instance(self) -> Option<u32> {
        match self {
            GateType::ClassInstance(index) => Some(index),
            _ => None,
        }
    }

    /// Class constructor index, if any.
    #[must_use]
    pub const fn class_constructor(self) -> Option<u32> {
        match self {
            GateType::ClassConstructor(index) => Some(index),
            _ => None,
        }
    }

    /// Builtin id of a recognized builtin function.
    #[must_use]
    pub const fn builtin(self) -> Option<BuiltinId> {
        match self {
            GateType::BuiltinFunction(id) => Some(id),
            _ => None,
        }
    }

    /// Least upper bound of two types.
    #[must_use]
    pub fn join(self, other: GateType) -> GateType {
        if self == other {
            return self;
        }
        if self.is_number() && other.is_number() {
            return GateType::Number;
        }
        GateType::Any
    }
}

impl fmt::Display for GateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateType::ClassInstance(i) => write!(f, "instance<{i}>"),
            GateType::ClassConstructor(i) => write!(f, "ctor<{i}>"),
            GateType::BuiltinFunction(id) => write!(f, "builtin<{}>", id.name()),
            other => write!(f, "{other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_type_mask() {
        assert_eq!(MachineType::I1.mask(), 1);
        assert_eq!(MachineType::I32.mask(), 0xFFFF_FFFF);
        assert_eq!(MachineType::I64.mask(), u64::MAX);
        assert_eq!(MachineType::F32.size(), 4);
    }

    #[test]
    fn test_join() {
        assert_eq!(GateType::Int.join(GateType::Double), GateType::Number);
        assert_eq!(GateType::Int.join(GateType::Int), GateType::Int);
        assert_eq!(GateType::Int.join(GateType::String), GateType::Any);
        assert!(GateType::Null.is_digitable_primitive());
        assert!(!GateType::String.is_digitable_primitive());
    }
}
