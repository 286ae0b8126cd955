//! Typed HIR constructors.
//!
//! These gates sit on the control chain like bytecode gates and are expanded
//! by type lowering. Checks produce no value; operations produce tagged
//! words unless noted.

use kiln_core::DeoptType;
use kiln_runtime::{BuiltinId, GlobalEnvField};

use super::CircuitBuilder;
use crate::ir::{ElementKind, GateRef, GateType, MachineType, OpCode, TypedBinOp, TypedJumpOp, TypedUnOp};

impl CircuitBuilder<'_> {
    fn check(&mut self, op: OpCode, values: &[GateRef]) -> GateRef {
        self.control_gate(op, MachineType::NoValue, values, GateType::Any)
    }

    // =========================================================================
    // Checks
    // =========================================================================

    /// Guard that `value` has primitive type `ty`.
    pub fn primitive_type_check(&mut self, ty: GateType, value: GateRef) -> GateRef {
        self.check(OpCode::PrimitiveTypeCheck(ty), &[value])
    }

    /// Guard that `receiver` has hidden class `hclass`.
    pub fn object_type_check(&mut self, receiver: GateRef, hclass: GateRef) -> GateRef {
        self.check(OpCode::ObjectTypeCheck, &[receiver, hclass])
    }

    /// Guard that `receiver` is an array.
    pub fn array_check(&mut self, receiver: GateRef) -> GateRef {
        self.check(OpCode::ArrayCheck, &[receiver])
    }

    /// Guard that `receiver` has stable elements and the guardian holds.
    pub fn stable_array_check(&mut self, receiver: GateRef) -> GateRef {
        self.check(OpCode::StableArrayCheck, &[receiver])
    }

    /// Guard that `receiver` is a `Float32Array`.
    pub fn typed_array_check(&mut self, receiver: GateRef) -> GateRef {
        self.check(OpCode::TypedArrayCheck, &[receiver])
    }

    /// Guard that `index` is in bounds of `receiver`.
    pub fn index_check(&mut self, kind: ElementKind, receiver: GateRef, index: GateRef) -> GateRef {
        self.check(OpCode::IndexCheck(kind), &[receiver, index])
    }

    /// Guard that applying `op` to the int `value` stays in int32.
    pub fn int32_overflow_check(&mut self, op: TypedUnOp, value: GateRef) -> GateRef {
        self.check(OpCode::Int32OverflowCheck(op), &[value])
    }

    /// Guard that `func` is builtin `id`.
    pub fn call_target_check(&mut self, id: BuiltinId, func: GateRef) -> GateRef {
        self.check(OpCode::CallTargetCheck(id), &[func])
    }

    /// Guard that `receiver` is the object in global environment slot `field`.
    pub fn receiver_check(&mut self, field: GlobalEnvField, receiver: GateRef) -> GateRef {
        self.check(OpCode::ReceiverCheck(field), &[receiver])
    }

    /// Conditional deoptimization: continue when `condition` holds.
    pub fn deopt_check(&mut self, reason: DeoptType, condition: GateRef, frame_state: GateRef) -> GateRef {
        self.check(OpCode::DeoptCheck(reason), &[condition, frame_state])
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Typed binary operation producing a value of type `result`.
    pub fn typed_binary_op(
        &mut self,
        op: TypedBinOp,
        left_type: GateType,
        right_type: GateType,
        left: GateRef,
        right: GateRef,
        result: GateType,
    ) -> GateRef {
        let opcode = OpCode::TypedBinaryOp {
            op,
            left: left_type,
            right: right_type,
        };
        self.control_gate(opcode, MachineType::I64, &[left, right], result)
    }

    /// Typed unary operation.
    pub fn typed_unary_op(&mut self, op: TypedUnOp, ty: GateType, value: GateRef, result: GateType) -> GateRef {
        self.control_gate(OpCode::TypedUnaryOp { op, ty }, MachineType::I64, &[value], result)
    }

    /// Primitive to number conversion.
    pub fn type_convert(&mut self, from: GateType, to: GateType, value: GateRef) -> GateRef {
        self.control_gate(OpCode::TypeConvert { from, to }, MachineType::I64, &[value], to)
    }

    /// Conditional jump on a trusted boolean.
    pub fn typed_jump(&mut self, op: TypedJumpOp, condition: GateRef) -> GateRef {
        self.control_gate(OpCode::TypedJump(op), MachineType::NoValue, &[condition], GateType::Any)
    }

    /// Inline property load at byte `offset`.
    pub fn load_property(&mut self, receiver: GateRef, offset: GateRef) -> GateRef {
        self.control_gate(OpCode::LoadProperty, MachineType::I64, &[receiver, offset], GateType::Any)
    }

    /// Inline property store at byte `offset`.
    pub fn store_property(&mut self, receiver: GateRef, offset: GateRef, value: GateRef) -> GateRef {
        self.control_gate(OpCode::StoreProperty, MachineType::NoValue, &[receiver, offset, value], GateType::Any)
    }

    /// `length` of an array or typed array.
    pub fn load_array_length(&mut self, receiver: GateRef) -> GateRef {
        self.control_gate(OpCode::LoadArrayLength, MachineType::I64, &[receiver], GateType::Int)
    }

    /// Element load.
    pub fn load_element(&mut self, kind: ElementKind, receiver: GateRef, index: GateRef) -> GateRef {
        let gt = match kind {
            ElementKind::Array => GateType::Any,
            ElementKind::Float32Array => GateType::Number,
        };
        self.control_gate(OpCode::LoadElement(kind), MachineType::I64, &[receiver, index], gt)
    }

    /// Element store.
    pub fn store_element(&mut self, kind: ElementKind, receiver: GateRef, index: GateRef, value: GateRef) -> GateRef {
        self.control_gate(
            OpCode::StoreElement(kind),
            MachineType::NoValue,
            &[receiver, index, value],
            GateType::Any,
        )
    }

    /// Young-space allocation of `size` bytes.
    pub fn heap_alloc(&mut self, size: GateRef) -> GateRef {
        self.control_gate(OpCode::HeapAlloc, MachineType::I64, &[size], GateType::Any)
    }

    /// Builtin call recognized from type information.
    pub fn typed_call_builtin(&mut self, id: BuiltinId, func: GateRef, this: GateRef, args: &[GateRef]) -> GateRef {
        let mut values = vec![func, this];
        values.extend_from_slice(args);
        self.control_gate(OpCode::TypedCallBuiltin(id), MachineType::I64, &values, GateType::Any)
    }

    /// Receiver of `new` for a base class constructor.
    pub fn typed_new_allocate_this(&mut self, ctor: GateRef) -> GateRef {
        self.control_gate(OpCode::TypedNewAllocateThis, MachineType::I64, &[ctor], GateType::Any)
    }

    /// Receiver in a derived constructor.
    pub fn typed_super_allocate_this(&mut self, super_ctor: GateRef, new_target: GateRef) -> GateRef {
        self.control_gate(
            OpCode::TypedSuperAllocateThis,
            MachineType::I64,
            &[super_ctor, new_target],
            GateType::Any,
        )
    }

    /// Parent constructor of `func`.
    pub fn get_super_constructor(&mut self, func: GateRef) -> GateRef {
        self.control_gate(OpCode::GetSuperConstructor, MachineType::I64, &[func], GateType::Any)
    }

    /// Constructor call with a preallocated receiver.
    pub fn construct(&mut self, func: GateRef, new_target: GateRef, this: GateRef, args: &[GateRef]) -> GateRef {
        let mut values = vec![func, new_target, this];
        values.extend_from_slice(args);
        self.control_gate(OpCode::Construct, MachineType::I64, &values, GateType::Any)
    }
}
