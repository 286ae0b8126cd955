//! Bytecode to circuit translation.
//!
//! [`BytecodeBuilder`] plays the role of the bytecode circuit builder: it
//! tracks the virtual registers, the accumulator and the lexical environment
//! as builder variables and emits one `JsBytecode` gate per instruction:
//!
//! ```text
//! FrameState(bc)[vregs..., acc, env]
//! StateSplit[frameState]               (depend chain)
//! JsBytecode{op, bc}[operands...]      (state + depend = StateSplit)
//!   IfSuccess / IfException            (instructions that can throw)
//!   IfTrue / IfFalse                   (Jeqz / Jnez)
//! ```
//!
//! Exceptional exits either jump to the active handler label, whose block
//! starts with a `GetException`, or end the function with
//! `Return(EXCEPTION)`.

use kiln_core::TaggedValue;

use super::circuit::{Circuit, CommonArg, NUM_COMMON_ARGS};
use super::ecma_opcode::EcmaOpcode;
use super::gate::GateRef;
use super::opcode::OpCode;
use super::types::{GateType, MachineType};
use crate::builder::{CircuitBuilder, Label, Variable};

/// Emits bytecode gates into a function circuit.
pub struct BytecodeBuilder<'a> {
    b: CircuitBuilder<'a>,
    vregs: Vec<Variable>,
    acc: Variable,
    env: Variable,
    bc_offset: u32,
    handler: Option<Label>,
}

impl<'a> BytecodeBuilder<'a> {
    /// Builder at the entry of a function circuit. Registers start out
    /// `undefined`; the environment is the `env` argument.
    pub fn new(circuit: &'a mut Circuit) -> Self {
        let num_vregs = circuit.num_vregs();
        let env_arg = circuit.common_arg(CommonArg::Env);
        let mut b = CircuitBuilder::new(circuit);
        let undefined = b.undefined();
        let vregs = (0..num_vregs)
            .map(|_| b.new_variable(MachineType::I64, GateType::Any, undefined))
            .collect();
        let acc = b.new_variable(MachineType::I64, GateType::Any, undefined);
        let env = b.new_variable(MachineType::I64, GateType::Any, env_arg);
        BytecodeBuilder {
            b,
            vregs,
            acc,
            env,
            bc_offset: 0,
            handler: None,
        }
    }

    /// The underlying circuit builder.
    pub fn builder(&mut self) -> &mut CircuitBuilder<'a> {
        &mut self.b
    }

    /// The circuit.
    pub fn circuit(&mut self) -> &mut Circuit {
        self.b.circuit()
    }

    // =========================================================================
    // Frame Values
    // =========================================================================

    /// Declared parameter `index`.
    #[must_use]
    pub fn param(&self, index: u32) -> GateRef {
        self.b.circuit_ref().arg(NUM_COMMON_ARGS + index)
    }

    /// A common argument.
    #[must_use]
    pub fn common(&self, arg: CommonArg) -> GateRef {
        self.b.circuit_ref().common_arg(arg)
    }

    /// Tagged constant with a language type.
    pub fn constant(&mut self, value: TaggedValue, gt: GateType) -> GateRef {
        self.b.tagged_typed(value, gt)
    }

    /// Tagged int constant.
    pub fn int(&mut self, value: i32) -> GateRef {
        self.b.tagged_int(value)
    }

    /// Register `index`.
    #[must_use]
    pub fn vreg(&self, index: u16) -> GateRef {
        self.b.read(self.vregs[usize::from(index)])
    }

    /// Assign register `index`.
    pub fn set_vreg(&mut self, index: u16, value: GateRef) {
        self.b.write(self.vregs[usize::from(index)], value);
    }

    /// The accumulator.
    #[must_use]
    pub fn acc(&self) -> GateRef {
        self.b.read(self.acc)
    }

    /// The current lexical environment.
    #[must_use]
    pub fn env(&self) -> GateRef {
        self.b.read(self.env)
    }

    /// Make `env` the current lexical environment.
    pub fn set_env(&mut self, env: GateRef) {
        self.b.write(self.env, env);
    }

    /// Attach type feedback to a value.
    pub fn set_type(&mut self, gate: GateRef, gt: GateType) {
        self.b.circuit().set_gate_type(gate, gt);
    }

    /// Offset the next instruction will get.
    #[must_use]
    pub fn bc_offset(&self) -> u32 {
        self.bc_offset
    }

    /// Whether the current position can be reached.
    #[must_use]
    pub fn is_reachable(&self) -> bool {
        self.b.is_reachable()
    }

    // =========================================================================
    // Instructions
    // =========================================================================

    fn frame_state(&mut self, bc_offset: u32) -> GateRef {
        let mut values: Vec<GateRef> = self.vregs.iter().map(|&v| self.b.read(v)).collect();
        values.push(self.b.read(self.acc));
        values.push(self.b.read(self.env));
        self.b
            .gate(OpCode::FrameState(bc_offset), MachineType::NoValue, &[], &[], &values, GateType::Any)
    }

    fn bytecode_gate(&mut self, op: EcmaOpcode, values: &[GateRef]) -> GateRef {
        debug_assert!(op.accepts(values.len()), "{op} with {} operands", values.len());
        let bc_offset = self.bc_offset;
        self.bc_offset += 1;
        let frame_state = self.frame_state(bc_offset);
        self.b
            .effect_gate(OpCode::StateSplit, MachineType::NoValue, &[frame_state], GateType::Any);
        let mt = if op.is_jump() || op == EcmaOpcode::ReturnUndefined {
            MachineType::NoValue
        } else {
            MachineType::I64
        };
        self.b
            .control_gate(OpCode::JsBytecode { op, bc_offset }, mt, values, GateType::Any)
    }

    fn project_exception(&mut self, hir: GateRef) {
        let success = self
            .b
            .gate(OpCode::IfSuccess, MachineType::NoValue, &[hir], &[], &[], GateType::Any);
        let exception = self
            .b
            .gate(OpCode::IfException, MachineType::NoValue, &[hir], &[hir], &[], GateType::Any);
        match self.handler {
            Some(handler) => {
                self.b.set_position(exception, exception);
                self.b.jump(handler);
            }
            None => {
                let sentinel = self.b.exception();
                self.b.gate(
                    OpCode::Return,
                    MachineType::NoValue,
                    &[exception],
                    &[exception],
                    &[sentinel],
                    GateType::Any,
                );
            }
        }
        self.b.set_position(success, hir);
    }

    /// Emit an instruction; its result becomes the accumulator.
    pub fn emit(&mut self, op: EcmaOpcode, values: &[GateRef]) -> GateRef {
        debug_assert!(!op.is_jump() && !op.is_return() && op != EcmaOpcode::SuspendGenerator);
        let hir = self.bytecode_gate(op, values);
        if op.can_throw() {
            self.project_exception(hir);
        }
        self.b.write(self.acc, hir);
        hir
    }

    /// Emit an instruction whose result carries type feedback `gt`.
    pub fn emit_typed(&mut self, op: EcmaOpcode, values: &[GateRef], gt: GateType) -> GateRef {
        let hir = self.emit(op, values);
        self.set_type(hir, gt);
        hir
    }

    /// Emit `Jeqz`/`Jnez` on `cond`: control continues at `taken` when the
    /// jump is taken and at `fallthrough` otherwise.
    pub fn jump_if(&mut self, op: EcmaOpcode, cond: GateRef, taken: Label, fallthrough: Label) -> GateRef {
        debug_assert!(op.is_jump());
        let hir = self.bytecode_gate(op, &[cond]);
        self.b.split(hir, taken, fallthrough);
        hir
    }

    /// `return value`.
    pub fn ret(&mut self, value: GateRef) -> GateRef {
        let hir = self.bytecode_gate(EcmaOpcode::Return, &[value]);
        self.b.return_(hir);
        hir
    }

    /// `return undefined`.
    pub fn ret_undefined(&mut self) -> GateRef {
        let hir = self.bytecode_gate(EcmaOpcode::ReturnUndefined, &[]);
        self.b.return_void();
        hir
    }

    // =========================================================================
    // Labels and Loops
    // =========================================================================

    /// A fresh label.
    pub fn new_label(&mut self) -> Label {
        self.b.new_label()
    }

    /// Jump to `label`.
    pub fn jump(&mut self, label: Label) {
        self.b.jump(label);
    }

    /// Continue at `label`.
    pub fn bind(&mut self, label: Label) {
        self.b.bind(label);
    }

    /// Open a loop: falls through into a new loop header and returns it.
    pub fn loop_header(&mut self) -> Label {
        let header = self.b.new_label();
        self.b.jump(header);
        self.b.loop_begin(header);
        header
    }

    /// Close the loop at `header` with a back edge, counting hotness on the
    /// way.
    pub fn loop_back(&mut self, header: Label, distance: i32) {
        if self.b.is_reachable() {
            self.b
                .control_gate(OpCode::UpdateHotness(-distance), MachineType::NoValue, &[], GateType::Any);
        }
        self.b.loop_end(header);
    }

    // =========================================================================
    // Exceptions
    // =========================================================================

    /// Route exceptional exits of the following instructions to `handler`
    /// (`None` returns the exception sentinel).
    pub fn set_handler(&mut self, handler: Option<Label>) {
        self.handler = handler;
    }

    /// Start the handler block: the pending exception becomes the
    /// accumulator.
    pub fn bind_handler(&mut self, handler: Label) -> GateRef {
        self.b.bind(handler);
        if !self.b.is_reachable() {
            return GateRef::INVALID;
        }
        let exception = self
            .b
            .effect_gate(OpCode::GetException, MachineType::I64, &[], GateType::Any);
        self.b.write(self.acc, exception);
        exception
    }

    // =========================================================================
    // Generators
    // =========================================================================

    /// `SuspendGenerator gen, value`, saving the current environment and
    /// every register.
    pub fn suspend(&mut self, generator: GateRef, value: GateRef) -> GateRef {
        let mut values = vec![generator, value, self.b.read(self.env)];
        values.extend(self.vregs.iter().map(|&v| self.b.read(v)));
        let hir = self.bytecode_gate(EcmaOpcode::SuspendGenerator, &values);
        self.project_exception(hir);
        self.b.write(self.acc, hir);
        hir
    }

    /// `ResumeGenerator gen`, restoring every register and the environment
    /// from the context.
    pub fn resume(&mut self, generator: GateRef) -> GateRef {
        let hir = self.bytecode_gate(EcmaOpcode::ResumeGenerator, &[generator]);
        for index in 0..self.vregs.len() {
            let restored = self.b.gate(
                OpCode::RestoreRegister(index as u16),
                MachineType::I64,
                &[],
                &[],
                &[hir],
                GateType::Any,
            );
            self.b.write(self.vregs[index], restored);
        }
        let env = self
            .b
            .gate(OpCode::RestoreEnv, MachineType::I64, &[], &[], &[hir], GateType::Any);
        self.b.write(self.env, env);
        self.b.write(self.acc, hir);
        hir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::verify;

    #[test]
    fn test_instruction_shape() {
        let mut circuit = Circuit::for_function("f", 2, 1);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let (a, b) = (bc.param(0), bc.param(1));
        let add = bc.emit(EcmaOpcode::Add2, &[a, b]);
        bc.set_vreg(0, add);
        bc.ret(add);

        let split = circuit.dep(add);
        assert_eq!(circuit.opcode(split), OpCode::StateSplit);
        let fs = circuit.value_in(split, 0);
        assert_eq!(circuit.opcode(fs), OpCode::FrameState(0));
        assert_eq!(circuit.num_value_in(fs), 3);
        let users: Vec<OpCode> = circuit.state_users(add).iter().map(|&g| circuit.opcode(g)).collect();
        assert!(users.contains(&OpCode::IfSuccess));
        assert!(users.contains(&OpCode::IfException));
        verify(&circuit).unwrap();
    }

    #[test]
    fn test_non_throwing_instruction_has_no_projections() {
        let mut circuit = Circuit::for_function("f", 0, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let t = bc.emit(EcmaOpcode::LdTrue, &[]);
        bc.ret(t);
        assert!(circuit
            .state_users(t)
            .iter()
            .all(|&g| !matches!(circuit.opcode(g), OpCode::IfSuccess | OpCode::IfException)));
        verify(&circuit).unwrap();
    }

    #[test]
    fn test_branch_merges_registers() {
        let mut circuit = Circuit::for_function("f", 1, 1);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let cond = bc.param(0);
        let (taken, fall, exit) = (bc.new_label(), bc.new_label(), bc.new_label());
        bc.jump_if(EcmaOpcode::Jeqz, cond, taken, fall);
        bc.bind(taken);
        let one = bc.int(1);
        bc.set_vreg(0, one);
        bc.jump(exit);
        bc.bind(fall);
        let two = bc.int(2);
        bc.set_vreg(0, two);
        bc.jump(exit);
        bc.bind(exit);
        let merged = bc.vreg(0);
        bc.ret(merged);
        assert_eq!(circuit.opcode(merged), OpCode::ValueSelector);
        verify(&circuit).unwrap();
    }

    #[test]
    fn test_loop_back_counts_hotness() {
        let mut circuit = Circuit::for_function("f", 0, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let header = bc.loop_header();
        let f = bc.emit(EcmaOpcode::LdFalse, &[]);
        let (body, exit) = (bc.new_label(), bc.new_label());
        bc.jump_if(EcmaOpcode::Jnez, f, body, exit);
        bc.bind(body);
        bc.loop_back(header, 4);
        bc.bind(exit);
        bc.ret_undefined();
        assert!(circuit
            .all_gates()
            .iter()
            .any(|&g| circuit.opcode(g) == OpCode::UpdateHotness(-4)));
        verify(&circuit).unwrap();
    }

    #[test]
    fn test_suspend_saves_scoped_env() {
        let mut circuit = Circuit::for_function("g", 1, 1);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let generator = bc.param(0);
        let outer = bc.env();
        let one = bc.int(1);
        let scope = bc.emit(EcmaOpcode::NewLexEnv, &[one, outer]);
        bc.set_env(scope);
        let suspended = bc.suspend(generator, one);
        bc.resume(generator);
        let restored = bc.env();
        bc.ret(restored);

        assert_eq!(circuit.num_value_in(suspended), 4);
        assert_eq!(circuit.value_in(suspended, 2), scope);
        assert_eq!(circuit.opcode(restored), OpCode::RestoreEnv);
        verify(&circuit).unwrap();
    }

    #[test]
    fn test_handler_receives_exception() {
        let mut circuit = Circuit::for_function("f", 1, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let handler = bc.new_label();
        bc.set_handler(Some(handler));
        let v = bc.param(0);
        let thrown = bc.emit(EcmaOpcode::Throw, &[v]);
        bc.set_handler(None);
        let undefined = bc.constant(TaggedValue::UNDEFINED, GateType::Undefined);
        bc.ret(undefined);
        let caught = bc.bind_handler(handler);
        bc.ret(caught);
        assert_eq!(circuit.opcode(caught), OpCode::GetException);
        assert!(circuit.state_users(thrown).len() >= 2);
        verify(&circuit).unwrap();
    }
}
