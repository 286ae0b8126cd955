//! Circuit builder: structured control flow on top of raw gates.
//!
//! A [`CircuitBuilder`] tracks a current position, a `(state, depend)` pair,
//! and emits gates there. Lowering code writes straight-line logic with
//! [`Label`]s and [`Variable`]s:
//!
//! ```text
//! let exit = b.new_label();
//! let result = b.new_variable(MachineType::I64, GateType::Any, init);
//! b.branch(cond, then_label, exit);
//! b.bind(then_label);
//! b.write(result, other);
//! b.jump(exit);
//! b.bind(exit);          // Merge + DependSelector + ValueSelector
//! let value = b.read(result);
//! ```
//!
//! Binding a label with one predecessor continues that predecessor; binding
//! it with several emits a `Merge`, a `DependSelector` and one
//! `ValueSelector` for every variable whose incoming values differ. Loops use
//! [`CircuitBuilder::loop_begin`]/[`CircuitBuilder::loop_end`], which give
//! every variable a selector and drop the ones the loop never changes.
//!
//! The helper families live in submodules:
//! - [`arith`]: constants, integer/float arithmetic, comparisons, conversions
//! - [`tagged`]: tagged-value tests and boxing
//! - [`memory`]: loads, stores, object fields, glue and global constants
//! - [`calls`]: runtime, stub and JS calls
//! - [`typed`]: typed HIR constructors used by type-feedback lowering

pub mod arith;
pub mod calls;
pub mod memory;
pub mod tagged;
pub mod typed;

#[cfg(test)]
mod tests;

use crate::ir::{Circuit, GateRef, GateType, MachineType, OpCode};

/// A join point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// A lowering-local SSA variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Variable(usize);

#[derive(Debug, Clone)]
struct Predecessor {
    state: GateRef,
    depend: GateRef,
    values: Vec<GateRef>,
}

#[derive(Debug, Clone)]
struct LoopHeader {
    begin: GateRef,
    depend_selector: GateRef,
    selectors: Vec<GateRef>,
}

#[derive(Debug, Clone, Default)]
struct LabelData {
    preds: Vec<Predecessor>,
    bound: bool,
    header: Option<LoopHeader>,
}

#[derive(Debug, Clone, Copy)]
struct VariableData {
    machine_type: MachineType,
    gate_type: GateType,
    value: GateRef,
}

/// Emits gates at a moving position in a circuit.
pub struct CircuitBuilder<'a> {
    circuit: &'a mut Circuit,
    state: GateRef,
    depend: GateRef,
    variables: Vec<VariableData>,
    labels: Vec<LabelData>,
}

impl<'a> CircuitBuilder<'a> {
    /// Builder positioned at the circuit entry.
    pub fn new(circuit: &'a mut Circuit) -> Self {
        let (state, depend) = (circuit.state_entry(), circuit.depend_entry());
        Self::at_position(circuit, state, depend)
    }

    /// Builder positioned where `gate` sits on the control and depend chains.
    pub fn at(circuit: &'a mut Circuit, gate: GateRef) -> Self {
        let (state, depend) = (circuit.state_in(gate, 0), circuit.dep(gate));
        Self::at_position(circuit, state, depend)
    }

    /// Builder positioned at an explicit `(state, depend)` pair.
    pub fn at_position(circuit: &'a mut Circuit, state: GateRef, depend: GateRef) -> Self {
        CircuitBuilder {
            circuit,
            state,
            depend,
            variables: Vec::new(),
            labels: Vec::new(),
        }
    }

    /// The circuit being built.
    pub fn circuit(&mut self) -> &mut Circuit {
        self.circuit
    }

    /// Read-only view of the circuit.
    #[must_use]
    pub fn circuit_ref(&self) -> &Circuit {
        self.circuit
    }

    // =========================================================================
    // Position
    // =========================================================================

    /// Current control gate.
    #[must_use]
    pub fn state(&self) -> GateRef {
        self.state
    }

    /// Current depend gate.
    #[must_use]
    pub fn depend(&self) -> GateRef {
        self.depend
    }

    /// Current `(state, depend)` pair.
    #[must_use]
    pub fn position(&self) -> (GateRef, GateRef) {
        (self.state, self.depend)
    }

    /// Move to `(state, depend)`.
    pub fn set_position(&mut self, state: GateRef, depend: GateRef) {
        self.state = state;
        self.depend = depend;
    }

    /// Replace the current depend gate.
    pub fn set_depend(&mut self, depend: GateRef) {
        self.depend = depend;
    }

    /// Whether the current position can be reached.
    #[must_use]
    pub fn is_reachable(&self) -> bool {
        self.state.is_valid()
    }

    /// Glue argument (argument 0 in every layout).
    #[must_use]
    pub fn glue(&self) -> GateRef {
        self.circuit.arg(0)
    }

    /// Create a gate with explicit input groups.
    pub fn gate(
        &mut self,
        op: OpCode,
        mt: MachineType,
        state: &[GateRef],
        depend: &[GateRef],
        values: &[GateRef],
        gt: GateType,
    ) -> GateRef {
        self.circuit.new_gate(op, mt, state, depend, values, gt)
    }

    /// Create a control gate chained after the current state and depend,
    /// moving the position onto it.
    pub fn control_gate(&mut self, op: OpCode, mt: MachineType, values: &[GateRef], gt: GateType) -> GateRef {
        let (state, depend) = self.position();
        let gate = self.circuit.new_gate(op, mt, &[state], &[depend], values, gt);
        self.set_position(gate, gate);
        gate
    }

    /// Create an effect gate on the depend chain.
    pub fn effect_gate(&mut self, op: OpCode, mt: MachineType, values: &[GateRef], gt: GateType) -> GateRef {
        let depend = self.depend;
        let gate = self.circuit.new_gate(op, mt, &[], &[depend], values, gt);
        self.depend = gate;
        gate
    }

    // =========================================================================
    // Variables
    // =========================================================================

    /// A new variable holding `init`.
    pub fn new_variable(&mut self, mt: MachineType, gt: GateType, init: GateRef) -> Variable {
        self.variables.push(VariableData {
            machine_type: mt,
            gate_type: gt,
            value: init,
        });
        Variable(self.variables.len() - 1)
    }

    /// Current value of `var`.
    #[must_use]
    pub fn read(&self, var: Variable) -> GateRef {
        self.variables[var.0].value
    }

    /// Assign `var`.
    pub fn write(&mut self, var: Variable, value: GateRef) {
        self.variables[var.0].value = value;
    }

    fn snapshot(&self) -> Vec<GateRef> {
        self.variables.iter().map(|v| v.value).collect()
    }

    // =========================================================================
    // Labels
    // =========================================================================

    /// A fresh, unbound label.
    pub fn new_label(&mut self) -> Label {
        self.labels.push(LabelData::default());
        Label(self.labels.len() - 1)
    }

    fn add_predecessor(&mut self, label: Label, state: GateRef, depend: GateRef) {
        let values = self.snapshot();
        self.labels[label.0].preds.push(Predecessor { state, depend, values });
    }

    /// Jump to `label`; the position becomes unreachable.
    pub fn jump(&mut self, label: Label) {
        if self.is_reachable() {
            let (state, depend) = self.position();
            self.add_predecessor(label, state, depend);
        }
        self.state = GateRef::INVALID;
    }

    /// Branch on the `I1` condition; the position becomes unreachable.
    pub fn branch(&mut self, cond: GateRef, if_true: Label, if_false: Label) {
        if !self.is_reachable() {
            return;
        }
        let state = self.state;
        let branch = self
            .circuit
            .new_gate(OpCode::IfBranch, MachineType::NoValue, &[state], &[], &[cond], GateType::Any);
        self.split(branch, if_true, if_false);
    }

    /// Project an existing two-way control gate (an `IfBranch` or a jump
    /// bytecode) onto `if_true` and `if_false`; the position becomes
    /// unreachable.
    pub fn split(&mut self, branch: GateRef, if_true: Label, if_false: Label) {
        let depend = self.depend;
        let t = self
            .circuit
            .new_gate(OpCode::IfTrue, MachineType::NoValue, &[branch], &[], &[], GateType::Any);
        let f = self
            .circuit
            .new_gate(OpCode::IfFalse, MachineType::NoValue, &[branch], &[], &[], GateType::Any);
        self.add_predecessor(if_true, t, depend);
        self.add_predecessor(if_false, f, depend);
        self.state = GateRef::INVALID;
    }

    /// Anchor `depend` on a branch projection so effects after it stay on
    /// that side of the branch.
    fn relay(&mut self, state: GateRef, depend: GateRef) -> GateRef {
        if matches!(self.circuit.opcode(state), OpCode::IfTrue | OpCode::IfFalse) {
            self.circuit
                .new_gate(OpCode::DependRelay, MachineType::NoValue, &[state], &[depend], &[], GateType::Any)
        } else {
            depend
        }
    }

    /// Continue at `label`, joining every recorded predecessor.
    pub fn bind(&mut self, label: Label) {
        let preds = std::mem::take(&mut self.labels[label.0].preds);
        self.labels[label.0].bound = true;
        match preds.len() {
            0 => {
                self.state = GateRef::INVALID;
            }
            1 => {
                let pred = &preds[0];
                let depend = self.relay(pred.state, pred.depend);
                self.set_position(pred.state, depend);
                for (var, &value) in self.variables.iter_mut().zip(&pred.values) {
                    var.value = value;
                }
            }
            _ => {
                let states: Vec<GateRef> = preds.iter().map(|p| p.state).collect();
                let depends: Vec<GateRef> = preds.iter().map(|p| p.depend).collect();
                let merge = self
                    .circuit
                    .new_gate(OpCode::Merge, MachineType::NoValue, &states, &[], &[], GateType::Any);
                let selector = self.circuit.new_gate(
                    OpCode::DependSelector,
                    MachineType::NoValue,
                    &[merge],
                    &depends,
                    &[],
                    GateType::Any,
                );
                for index in 0..self.variables.len() {
                    let values: Vec<GateRef> = preds
                        .iter()
                        .map(|p| p.values.get(index).copied().unwrap_or(GateRef::INVALID))
                        .collect();
                    let first = values[0];
                    let value = if values.iter().all(|&v| v == first) {
                        first
                    } else if values.iter().any(|v| !v.is_valid()) {
                        GateRef::INVALID
                    } else {
                        let var = self.variables[index];
                        self.circuit.new_gate(
                            OpCode::ValueSelector,
                            var.machine_type,
                            &[merge],
                            &[],
                            &values,
                            var.gate_type,
                        )
                    };
                    self.variables[index].value = value;
                }
                self.set_position(merge, selector);
            }
        }
    }

    /// Bind `label` as a loop header: every variable gets a selector whose
    /// back-edge operands are filled by [`CircuitBuilder::loop_end`].
    pub fn loop_begin(&mut self, label: Label) {
        self.bind(label);
        if !self.is_reachable() {
            return;
        }
        let (state, depend) = self.position();
        let begin = self
            .circuit
            .new_gate(OpCode::LoopBegin, MachineType::NoValue, &[state], &[], &[], GateType::Any);
        let depend_selector = self.circuit.new_gate(
            OpCode::DependSelector,
            MachineType::NoValue,
            &[begin],
            &[depend],
            &[],
            GateType::Any,
        );
        let mut selectors = Vec::with_capacity(self.variables.len());
        for index in 0..self.variables.len() {
            let var = self.variables[index];
            let selector = if var.value.is_valid() {
                self.circuit
                    .new_gate(OpCode::ValueSelector, var.machine_type, &[begin], &[], &[var.value], var.gate_type)
            } else {
                GateRef::INVALID
            };
            self.variables[index].value = selector;
            selectors.push(selector);
        }
        self.labels[label.0].header = Some(LoopHeader {
            begin,
            depend_selector,
            selectors,
        });
        self.set_position(begin, depend_selector);
    }

    /// Close the loop headed by `label` with a back edge from here.
    pub fn loop_end(&mut self, label: Label) {
        let Some(header) = self.labels[label.0].header.clone() else {
            self.state = GateRef::INVALID;
            return;
        };
        if self.is_reachable() {
            let (state, depend) = self.position();
            let back = self
                .circuit
                .new_gate(OpCode::LoopBack, MachineType::NoValue, &[state], &[], &[], GateType::Any);
            self.circuit.append_state(header.begin, back);
            self.circuit.append_depend(header.depend_selector, depend);
            for (index, &selector) in header.selectors.iter().enumerate() {
                if selector.is_valid() {
                    let value = self.variables[index].value;
                    let value = if value.is_valid() { value } else { selector };
                    self.circuit.append_value(selector, value);
                }
            }
        }
        self.state = GateRef::INVALID;
        self.simplify_selectors(&header.selectors);
    }

    /// Replace loop selectors whose back edges only carry the selector itself
    /// or the entry value.
    fn simplify_selectors(&mut self, selectors: &[GateRef]) {
        for &selector in selectors {
            if !selector.is_valid() || self.circuit.is_dead(selector) {
                continue;
            }
            let inputs = self.circuit.value_ins(selector);
            let entry = inputs[0];
            if !inputs.iter().all(|&v| v == entry || v == selector) {
                continue;
            }
            if self
                .circuit
                .replace_gate(selector, GateRef::INVALID, GateRef::INVALID, entry)
                .is_err()
            {
                continue;
            }
            for var in &mut self.variables {
                if var.value == selector {
                    var.value = entry;
                }
            }
            for label in &mut self.labels {
                for pred in &mut label.preds {
                    for value in &mut pred.values {
                        if *value == selector {
                            *value = entry;
                        }
                    }
                }
            }
        }
    }

    // =========================================================================
    // Returns and Exceptions
    // =========================================================================

    /// Return `value`; the position becomes unreachable.
    pub fn return_(&mut self, value: GateRef) -> GateRef {
        let (state, depend) = self.position();
        let ret = self
            .circuit
            .new_gate(OpCode::Return, MachineType::NoValue, &[state], &[depend], &[value], GateType::Any);
        self.state = GateRef::INVALID;
        ret
    }

    /// Return without a value.
    pub fn return_void(&mut self) -> GateRef {
        let (state, depend) = self.position();
        let ret = self
            .circuit
            .new_gate(OpCode::ReturnVoid, MachineType::NoValue, &[state], &[depend], &[], GateType::Any);
        self.state = GateRef::INVALID;
        ret
    }

    /// Branch on `result` being the exception sentinel.
    ///
    /// Returns the exceptional `(state, depend)` continuation and leaves the
    /// builder on the normal one.
    pub fn check_exception(&mut self, result: GateRef) -> (GateRef, GateRef) {
        let is_exception = self.tagged_is_exception(result);
        let exception = self.new_label();
        let success = self.new_label();
        self.branch(is_exception, exception, success);
        self.bind(exception);
        let exceptional = self.position();
        self.bind(success);
        exceptional
    }
}
