//! Call emission.
//!
//! Every call is a `Call` gate on the depend chain whose first value input is
//! the glue. The result machine type comes from the callee's signature.

use kiln_runtime::{BuiltinId, CommonStubId, RuntimeStubId};

use super::CircuitBuilder;
use crate::call_signature::{self, signature_of};
use crate::ir::{CallTarget, GateRef, GateType, MachineType, OpCode, NUM_MANDATORY_JSFUNC_ARGS};

impl CircuitBuilder<'_> {
    /// Emit a call to `target` with `args` after the glue.
    pub fn call(&mut self, target: CallTarget, args: &[GateRef]) -> GateRef {
        let signature = signature_of(target);
        debug_assert!(
            signature.accepts(args.len() + 1),
            "{} called with {} arguments",
            signature.name(),
            args.len()
        );
        let mut values = Vec::with_capacity(args.len() + 1);
        values.push(self.glue());
        values.extend_from_slice(args);
        let gt = if signature.return_type() == MachineType::I64 {
            GateType::Any
        } else {
            GateType::NJSValue
        };
        self.effect_gate(OpCode::Call(target), signature.return_type(), &values, gt)
    }

    /// Call a GC-capable runtime stub with tagged arguments.
    pub fn call_runtime(&mut self, id: RuntimeStubId, args: &[GateRef]) -> GateRef {
        debug_assert!(!id.is_no_gc());
        self.call(CallTarget::Runtime(id), args)
    }

    /// Call a no-GC runtime stub with raw arguments.
    pub fn call_ngc_runtime(&mut self, id: RuntimeStubId, args: &[GateRef]) -> GateRef {
        debug_assert!(id.is_no_gc());
        self.call(CallTarget::NoGc(id), args)
    }

    /// Call a common stub.
    pub fn call_stub(&mut self, id: CommonStubId, args: &[GateRef]) -> GateRef {
        self.call(CallTarget::Common(id), args)
    }

    /// Call a builtin stub with the builtin entry layout.
    pub fn call_builtin(
        &mut self,
        id: BuiltinId,
        func: GateRef,
        new_target: GateRef,
        this: GateRef,
        args: &[GateRef],
    ) -> GateRef {
        let native_code = self.int_ptr(u64::from(id as u32));
        let num_args = self.int32(args.len() as i32);
        let mut values = vec![native_code, func, new_target, this, num_args];
        values.extend_from_slice(args);
        self.call(CallTarget::Builtin(id), &values)
    }

    /// Call a JS function through the `JSCall` trampoline.
    ///
    /// `actual_argc` counts the user arguments plus the func, newTarget and
    /// this slots; [`CircuitBuilder::call_argc`] gives it for a plain list.
    #[allow(clippy::too_many_arguments)]
    pub fn js_call(
        &mut self,
        env: GateRef,
        actual_argc: u32,
        func: GateRef,
        new_target: GateRef,
        this: GateRef,
        args: &[GateRef],
        bc_offset: u32,
        is_new: bool,
    ) -> GateRef {
        let argc = self.int32(actual_argc as i32);
        let bc = self.int32(bc_offset as i32);
        let mut values = vec![env, argc, func, new_target, this];
        values.extend_from_slice(args);
        values.push(bc);
        let target = call_signature::js_call_signature(is_new).target();
        self.call(target, &values)
    }

    /// `actualArgc` of a call passing `args` after the mandatory slots.
    #[must_use]
    pub fn call_argc(args: &[GateRef]) -> u32 {
        args.len() as u32 + NUM_MANDATORY_JSFUNC_ARGS
    }
}
