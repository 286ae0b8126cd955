//! Constants, arithmetic, comparisons and conversions.
//!
//! Integer helpers are named after their width (`int32_add`, `int64_and`),
//! pointer-sized helpers use `ptr_`. Comparisons produce `I1`.

use kiln_core::TaggedValue;

use super::CircuitBuilder;
use crate::ir::{FCmpCond, GateRef, GateType, ICmpCond, MachineType, OpCode};

macro_rules! binary_helpers {
    ($($(#[$meta:meta])* $name:ident => $op:expr, $mt:expr;)*) => {
        $(
            $(#[$meta])*
            pub fn $name(&mut self, a: GateRef, b: GateRef) -> GateRef {
                self.binary($op, $mt, a, b)
            }
        )*
    };
}

macro_rules! compare_helpers {
    ($($name:ident => $op:expr;)*) => {
        $(
            #[allow(missing_docs)]
            pub fn $name(&mut self, a: GateRef, b: GateRef) -> GateRef {
                self.binary($op, MachineType::I1, a, b)
            }
        )*
    };
}

impl CircuitBuilder<'_> {
    // =========================================================================
    // Constants
    // =========================================================================

    /// 32-bit integer constant.
    pub fn int32(&mut self, value: i32) -> GateRef {
        self.circuit.constant(u64::from(value as u32), MachineType::I32, GateType::NJSValue)
    }

    /// 64-bit integer constant.
    pub fn int64(&mut self, value: i64) -> GateRef {
        self.circuit.constant(value as u64, MachineType::I64, GateType::NJSValue)
    }

    /// Pointer-sized constant.
    pub fn int_ptr(&mut self, value: u64) -> GateRef {
        self.circuit.constant(value, MachineType::I64, GateType::NJSValue)
    }

    /// 8-bit constant.
    pub fn int8(&mut self, value: u8) -> GateRef {
        self.circuit.constant(u64::from(value), MachineType::I8, GateType::NJSValue)
    }

    /// 16-bit constant.
    pub fn int16(&mut self, value: u16) -> GateRef {
        self.circuit.constant(u64::from(value), MachineType::I16, GateType::NJSValue)
    }

    /// Double constant.
    pub fn double(&mut self, value: f64) -> GateRef {
        self.circuit.constant(value.to_bits(), MachineType::F64, GateType::NJSValue)
    }

    /// Boolean constant.
    pub fn boolean(&mut self, value: bool) -> GateRef {
        self.circuit.constant(u64::from(value), MachineType::I1, GateType::NJSValue)
    }

    /// Tagged constant.
    pub fn tagged(&mut self, value: TaggedValue) -> GateRef {
        self.circuit.tagged_constant(value, GateType::Any)
    }

    /// Tagged constant carrying a language type.
    pub fn tagged_typed(&mut self, value: TaggedValue, gt: GateType) -> GateRef {
        self.circuit.tagged_constant(value, gt)
    }

    /// `undefined`.
    pub fn undefined(&mut self) -> GateRef {
        self.circuit.tagged_constant(TaggedValue::UNDEFINED, GateType::Undefined)
    }

    /// `null`.
    pub fn null(&mut self) -> GateRef {
        self.circuit.tagged_constant(TaggedValue::NULL, GateType::Null)
    }

    /// The hole.
    pub fn hole(&mut self) -> GateRef {
        self.tagged(TaggedValue::HOLE)
    }

    /// The exception sentinel.
    pub fn exception(&mut self) -> GateRef {
        self.tagged(TaggedValue::EXCEPTION)
    }

    /// Tagged `true`.
    pub fn tagged_true(&mut self) -> GateRef {
        self.circuit.tagged_constant(TaggedValue::TRUE, GateType::Boolean)
    }

    /// Tagged `false`.
    pub fn tagged_false(&mut self) -> GateRef {
        self.circuit.tagged_constant(TaggedValue::FALSE, GateType::Boolean)
    }

    /// Tagged int constant.
    pub fn tagged_int(&mut self, value: i32) -> GateRef {
        self.circuit.tagged_constant(TaggedValue::int(value), GateType::Int)
    }

    /// Tagged NaN.
    pub fn tagged_nan(&mut self) -> GateRef {
        self.circuit.tagged_constant(TaggedValue::double(f64::NAN), GateType::Double)
    }

    // =========================================================================
    // Generic Nodes
    // =========================================================================

    /// Pure binary gate.
    pub fn binary(&mut self, op: OpCode, mt: MachineType, a: GateRef, b: GateRef) -> GateRef {
        self.circuit.new_gate(op, mt, &[], &[], &[a, b], GateType::NJSValue)
    }

    /// Pure unary gate.
    pub fn unary(&mut self, op: OpCode, mt: MachineType, x: GateRef) -> GateRef {
        self.circuit.new_gate(op, mt, &[], &[], &[x], GateType::NJSValue)
    }

    /// `cond ? a : b`.
    pub fn select(&mut self, cond: GateRef, a: GateRef, b: GateRef) -> GateRef {
        let mt = self.circuit.machine_type(a);
        let gt = self.circuit.gate_type(a).join(self.circuit.gate_type(b));
        self.circuit.new_gate(OpCode::Select, mt, &[], &[], &[cond, a, b], gt)
    }

    // =========================================================================
    // Integer Arithmetic
    // =========================================================================

    binary_helpers! {
        /// Wrapping 32-bit add.
        int32_add => OpCode::Add, MachineType::I32;
        /// Wrapping 32-bit subtract.
        int32_sub => OpCode::Sub, MachineType::I32;
        /// Wrapping 32-bit multiply.
        int32_mul => OpCode::Mul, MachineType::I32;
        /// Signed 32-bit divide.
        int32_div => OpCode::Sdiv, MachineType::I32;
        /// Signed 32-bit remainder.
        int32_mod => OpCode::Smod, MachineType::I32;
        /// 32-bit and.
        int32_and => OpCode::And, MachineType::I32;
        /// 32-bit or.
        int32_or => OpCode::Or, MachineType::I32;
        /// 32-bit xor.
        int32_xor => OpCode::Xor, MachineType::I32;
        /// 32-bit shift left.
        int32_lsl => OpCode::Lsl, MachineType::I32;
        /// 32-bit logical shift right.
        int32_lsr => OpCode::Lsr, MachineType::I32;
        /// 32-bit arithmetic shift right.
        int32_asr => OpCode::Asr, MachineType::I32;
        /// Wrapping 64-bit add.
        int64_add => OpCode::Add, MachineType::I64;
        /// Wrapping 64-bit subtract.
        int64_sub => OpCode::Sub, MachineType::I64;
        /// Wrapping 64-bit multiply.
        int64_mul => OpCode::Mul, MachineType::I64;
        /// 64-bit and.
        int64_and => OpCode::And, MachineType::I64;
        /// 64-bit or.
        int64_or => OpCode::Or, MachineType::I64;
        /// 64-bit xor.
        int64_xor => OpCode::Xor, MachineType::I64;
        /// 64-bit shift left.
        int64_lsl => OpCode::Lsl, MachineType::I64;
        /// 64-bit logical shift right.
        int64_lsr => OpCode::Lsr, MachineType::I64;
        /// Boolean and.
        bool_and => OpCode::And, MachineType::I1;
        /// Boolean or.
        bool_or => OpCode::Or, MachineType::I1;
        /// Double add.
        double_add => OpCode::Add, MachineType::F64;
        /// Double subtract.
        double_sub => OpCode::Sub, MachineType::F64;
        /// Double multiply.
        double_mul => OpCode::Mul, MachineType::F64;
        /// Double divide.
        double_div => OpCode::Fdiv, MachineType::F64;
        /// Double remainder (`fmod`).
        double_mod => OpCode::Smod, MachineType::F64;
    }

    /// Pointer add.
    pub fn ptr_add(&mut self, base: GateRef, offset: GateRef) -> GateRef {
        self.int64_add(base, offset)
    }

    /// Pointer add of a constant offset.
    pub fn ptr_add_const(&mut self, base: GateRef, offset: u64) -> GateRef {
        if offset == 0 {
            return base;
        }
        let offset = self.int_ptr(offset);
        self.int64_add(base, offset)
    }

    /// Boolean not.
    pub fn bool_not(&mut self, x: GateRef) -> GateRef {
        let one = self.boolean(true);
        self.binary(OpCode::Xor, MachineType::I1, x, one)
    }

    /// 32-bit not.
    pub fn int32_not(&mut self, x: GateRef) -> GateRef {
        let ones = self.int32(-1);
        self.int32_xor(x, ones)
    }

    /// Double negate.
    pub fn double_neg(&mut self, x: GateRef) -> GateRef {
        let zero = self.double(-0.0);
        self.double_sub(zero, x)
    }

    // =========================================================================
    // Comparisons
    // =========================================================================

    compare_helpers! {
        int32_equal => OpCode::Icmp(ICmpCond::Eq);
        int32_not_equal => OpCode::Icmp(ICmpCond::Ne);
        int32_less_than => OpCode::Icmp(ICmpCond::Slt);
        int32_less_than_or_equal => OpCode::Icmp(ICmpCond::Sle);
        int32_greater_than => OpCode::Icmp(ICmpCond::Sgt);
        int32_greater_than_or_equal => OpCode::Icmp(ICmpCond::Sge);
        int32_unsigned_less_than => OpCode::Icmp(ICmpCond::Ult);
        int32_unsigned_greater_than_or_equal => OpCode::Icmp(ICmpCond::Uge);
        int32_unsigned_greater_than => OpCode::Icmp(ICmpCond::Ugt);
        int64_equal => OpCode::Icmp(ICmpCond::Eq);
        int64_not_equal => OpCode::Icmp(ICmpCond::Ne);
        int64_less_than => OpCode::Icmp(ICmpCond::Slt);
        int64_less_than_or_equal => OpCode::Icmp(ICmpCond::Sle);
        int64_greater_than => OpCode::Icmp(ICmpCond::Sgt);
        int64_greater_than_or_equal => OpCode::Icmp(ICmpCond::Sge);
        int64_unsigned_less_than => OpCode::Icmp(ICmpCond::Ult);
        int64_unsigned_greater_than => OpCode::Icmp(ICmpCond::Ugt);
        double_equal => OpCode::Fcmp(FCmpCond::Oeq);
        double_not_equal => OpCode::Fcmp(FCmpCond::Une);
        double_less_than => OpCode::Fcmp(FCmpCond::Olt);
        double_less_than_or_equal => OpCode::Fcmp(FCmpCond::Ole);
        double_greater_than => OpCode::Fcmp(FCmpCond::Ogt);
        double_greater_than_or_equal => OpCode::Fcmp(FCmpCond::Oge);
    }

    /// `x != x`.
    pub fn double_is_nan(&mut self, x: GateRef) -> GateRef {
        self.binary(OpCode::Fcmp(FCmpCond::Uno), MachineType::I1, x, x)
    }

    /// Whether `x` is a finite integral double.
    pub fn double_is_integer(&mut self, x: GateRef) -> GateRef {
        let truncated = self.float_to_int64(x);
        let back = self.int64_to_double(truncated);
        self.double_equal(x, back)
    }

    // =========================================================================
    // Conversions
    // =========================================================================

    /// Zero extend to 64 bits.
    pub fn zext_to_int64(&mut self, x: GateRef) -> GateRef {
        self.unary(OpCode::Zext, MachineType::I64, x)
    }

    /// Zero extend to 32 bits.
    pub fn zext_to_int32(&mut self, x: GateRef) -> GateRef {
        self.unary(OpCode::Zext, MachineType::I32, x)
    }

    /// Sign extend to 64 bits.
    pub fn sext_to_int64(&mut self, x: GateRef) -> GateRef {
        self.unary(OpCode::Sext, MachineType::I64, x)
    }

    /// Truncate to 32 bits.
    pub fn trunc_to_int32(&mut self, x: GateRef) -> GateRef {
        self.unary(OpCode::Trunc, MachineType::I32, x)
    }

    /// Truncate to 16 bits.
    pub fn trunc_to_int16(&mut self, x: GateRef) -> GateRef {
        self.unary(OpCode::Trunc, MachineType::I16, x)
    }

    /// Truncate to 8 bits.
    pub fn trunc_to_int8(&mut self, x: GateRef) -> GateRef {
        self.unary(OpCode::Trunc, MachineType::I8, x)
    }

    /// Truncate to a flag.
    pub fn trunc_to_bool(&mut self, x: GateRef) -> GateRef {
        self.unary(OpCode::Trunc, MachineType::I1, x)
    }

    /// Signed int32 to double.
    pub fn int32_to_double(&mut self, x: GateRef) -> GateRef {
        self.unary(OpCode::SignedIntToFloat, MachineType::F64, x)
    }

    /// Signed int64 to double.
    pub fn int64_to_double(&mut self, x: GateRef) -> GateRef {
        self.unary(OpCode::SignedIntToFloat, MachineType::F64, x)
    }

    /// Saturating double to int32 (truncating toward zero).
    pub fn float_to_int32(&mut self, x: GateRef) -> GateRef {
        self.unary(OpCode::FloatToSignedInt, MachineType::I32, x)
    }

    /// Saturating double to int64 (truncating toward zero).
    pub fn float_to_int64(&mut self, x: GateRef) -> GateRef {
        self.unary(OpCode::FloatToSignedInt, MachineType::I64, x)
    }

    /// Reinterpret bits as `mt`.
    pub fn bitcast(&mut self, x: GateRef, mt: MachineType) -> GateRef {
        self.unary(OpCode::Bitcast, mt, x)
    }

    /// `f32` to `f64`.
    pub fn float_ext(&mut self, x: GateRef) -> GateRef {
        self.unary(OpCode::FExt, MachineType::F64, x)
    }

    /// `f64` to `f32`.
    pub fn float_trunc(&mut self, x: GateRef) -> GateRef {
        self.unary(OpCode::FTrunc, MachineType::F32, x)
    }
}
