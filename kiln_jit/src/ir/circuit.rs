//! The circuit: one function's gate graph.
//!
//! The circuit owns every gate and keeps the reverse edges in sync with the
//! input lists. Passes never hold borrowed iterators across edits: [`Circuit::uses`]
//! and [`Circuit::all_gates`] return owned snapshots, so a pass collects the
//! gates it wants to touch first and applies its edits afterwards.

use std::fmt;

use rustc_hash::FxHashMap;

use kiln_core::{KilnError, KilnResult, TaggedValue};

use super::arena::{Arena, SecondaryMap};
use super::gate::{Gate, GateRef, InputKind, InputList, Use};
use super::opcode::OpCode;
use super::types::{GateType, MachineType};

// =============================================================================
// Argument Layouts
// =============================================================================

/// The common arguments every compiled function receives, in order, before
/// its declared parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CommonArg {
    /// Thread glue address.
    Glue = 0,
    /// Lexical environment of the callee.
    Env = 1,
    /// Actual argument count, including the three mandatory slots.
    ActualArgc = 2,
    /// The callee.
    Func = 3,
    /// `new.target`, or undefined for plain calls.
    NewTarget = 4,
    /// The receiver.
    This = 5,
}

/// Number of [`CommonArg`]s.
pub const NUM_COMMON_ARGS: u32 = 6;

/// Mandatory slots counted by `actualArgc`: func, newTarget and this.
pub const NUM_MANDATORY_JSFUNC_ARGS: u32 = 3;

/// Shape of the circuit's parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgLayout {
    /// A compiled function: the common arguments then declared parameters.
    Function {
        /// Declared parameters.
        num_params: u32,
    },
    /// A stub with an explicit parameter list.
    Stub,
}

// =============================================================================
// Circuit
// =============================================================================

/// A gate graph.
#[derive(Clone)]
pub struct Circuit {
    gates: Arena<Gate>,
    uses: SecondaryMap<Gate, Vec<Use>>,
    state_entry: GateRef,
    depend_entry: GateRef,
    args: Vec<GateRef>,
    layout: ArgLayout,
    num_vregs: u32,
    name: String,
    constants: FxHashMap<(u64, MachineType, GateType), GateRef>,
}

impl Circuit {
    /// Circuit of a compiled function with `num_params` declared parameters
    /// and `num_vregs` virtual registers.
    #[must_use]
    pub fn for_function(name: impl Into<String>, num_params: u32, num_vregs: u32) -> Self {
        let mut circuit = Self::empty(name.into(), ArgLayout::Function { num_params });
        circuit.num_vregs = num_vregs;
        circuit.add_arg(MachineType::I64, GateType::NJSValue);
        circuit.add_arg(MachineType::I64, GateType::Any);
        circuit.add_arg(MachineType::I32, GateType::NJSValue);
        for _ in CommonArg::Func as u32..NUM_COMMON_ARGS + num_params {
            circuit.add_arg(MachineType::I64, GateType::Any);
        }
        circuit
    }

    /// Circuit of a stub with the given parameter types.
    #[must_use]
    pub fn for_stub(name: impl Into<String>, params: &[(MachineType, GateType)]) -> Self {
        let mut circuit = Self::empty(name.into(), ArgLayout::Stub);
        for &(mt, gt) in params {
            circuit.add_arg(mt, gt);
        }
        circuit
    }

    fn empty(name: String, layout: ArgLayout) -> Self {
        let mut circuit = Circuit {
            gates: Arena::with_capacity(256),
            uses: SecondaryMap::new(),
            state_entry: GateRef::INVALID,
            depend_entry: GateRef::INVALID,
            args: Vec::new(),
            layout,
            num_vregs: 0,
            name,
            constants: FxHashMap::default(),
        };
        circuit.state_entry = circuit.new_gate(OpCode::StateEntry, MachineType::NoValue, &[], &[], &[], GateType::Any);
        circuit.depend_entry =
            circuit.new_gate(OpCode::DependEntry, MachineType::NoValue, &[], &[], &[], GateType::Any);
        circuit
    }

    fn add_arg(&mut self, mt: MachineType, gt: GateType) -> GateRef {
        let index = self.args.len() as u32;
        let gate = self.new_gate(OpCode::Arg(index), mt, &[], &[], &[], gt);
        self.args.push(gate);
        gate
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    /// Function or stub name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of virtual registers of the source method.
    #[must_use]
    pub fn num_vregs(&self) -> u32 {
        self.num_vregs
    }

    /// Parameter layout.
    #[must_use]
    pub fn layout(&self) -> ArgLayout {
        self.layout
    }

    /// The control root.
    #[must_use]
    pub fn state_entry(&self) -> GateRef {
        self.state_entry
    }

    /// The depend root.
    #[must_use]
    pub fn depend_entry(&self) -> GateRef {
        self.depend_entry
    }

    /// Argument gate by position.
    #[must_use]
    pub fn arg(&self, index: u32) -> GateRef {
        self.args.get(index as usize).copied().unwrap_or(GateRef::INVALID)
    }

    /// A common argument of a function circuit.
    #[must_use]
    pub fn common_arg(&self, arg: CommonArg) -> GateRef {
        self.arg(arg as u32)
    }

    /// Number of argument gates.
    #[must_use]
    pub fn num_args(&self) -> usize {
        self.args.len()
    }

    // =========================================================================
    // Gate Creation
    // =========================================================================

    /// Create a gate from its three input groups.
    pub fn new_gate(
        &mut self,
        opcode: OpCode,
        machine_type: MachineType,
        state: &[GateRef],
        depend: &[GateRef],
        values: &[GateRef],
        gate_type: GateType,
    ) -> GateRef {
        let mut inputs = InputList::with_capacity(state.len() + depend.len() + values.len());
        inputs.extend_from_slice(state);
        inputs.extend_from_slice(depend);
        inputs.extend_from_slice(values);
        let id = self.gates.alloc(Gate {
            opcode,
            machine_type,
            gate_type,
            inputs: InputList::new(),
            num_state: state.len() as u16,
            num_depend: depend.len() as u16,
            dead: false,
        });
        for (index, &input) in inputs.iter().enumerate() {
            self.add_use(input, id, index);
        }
        self.gates[id].inputs = inputs;
        id
    }

    /// Deduplicated constant.
    pub fn constant(&mut self, bits: u64, machine_type: MachineType, gate_type: GateType) -> GateRef {
        let key = (bits, machine_type, gate_type);
        if let Some(&gate) = self.constants.get(&key) {
            if !self.gates[gate].dead {
                return gate;
            }
        }
        let gate = self.new_gate(OpCode::Constant(bits), machine_type, &[], &[], &[], gate_type);
        self.constants.insert(key, gate);
        gate
    }

    /// Tagged constant.
    pub fn tagged_constant(&mut self, value: TaggedValue, gate_type: GateType) -> GateRef {
        self.constant(value.raw(), MachineType::I64, gate_type)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Gate by handle.
    ///
    /// # Panics
    ///
    /// Panics if `gate` does not belong to this circuit.
    #[inline]
    #[must_use]
    pub fn gate(&self, gate: GateRef) -> &Gate {
        &self.gates[gate]
    }

    /// Gate by handle, if it exists.
    #[inline]
    #[must_use]
    pub fn get(&self, gate: GateRef) -> Option<&Gate> {
        self.gates.get(gate)
    }

    /// Opcode of a gate.
    #[inline]
    #[must_use]
    pub fn opcode(&self, gate: GateRef) -> OpCode {
        self.gates[gate].opcode
    }

    /// Machine type of a gate.
    #[inline]
    #[must_use]
    pub fn machine_type(&self, gate: GateRef) -> MachineType {
        self.gates[gate].machine_type
    }

    /// Language type of a gate.
    #[inline]
    #[must_use]
    pub fn gate_type(&self, gate: GateRef) -> GateType {
        self.gates[gate].gate_type
    }

    /// Set the language type of a gate.
    pub fn set_gate_type(&mut self, gate: GateRef, ty: GateType) {
        self.gates[gate].gate_type = ty;
    }

    /// Set the machine type of a gate.
    pub fn set_machine_type(&mut self, gate: GateRef, ty: MachineType) {
        self.gates[gate].machine_type = ty;
    }

    /// Replace the opcode, keeping inputs.
    pub fn set_opcode(&mut self, gate: GateRef, opcode: OpCode) {
        self.gates[gate].opcode = opcode;
    }

    /// State input `index`.
    #[must_use]
    pub fn state_in(&self, gate: GateRef, index: usize) -> GateRef {
        self.gates[gate].state_inputs().get(index).copied().unwrap_or(GateRef::INVALID)
    }

    /// First depend input, or the null gate.
    #[must_use]
    pub fn dep(&self, gate: GateRef) -> GateRef {
        self.dep_in(gate, 0)
    }

    /// Depend input `index`.
    #[must_use]
    pub fn dep_in(&self, gate: GateRef, index: usize) -> GateRef {
        self.gates[gate].depend_inputs().get(index).copied().unwrap_or(GateRef::INVALID)
    }

    /// Value input `index`.
    #[must_use]
    pub fn value_in(&self, gate: GateRef, index: usize) -> GateRef {
        self.gates[gate].value_inputs().get(index).copied().unwrap_or(GateRef::INVALID)
    }

    /// All value inputs.
    #[must_use]
    pub fn value_ins(&self, gate: GateRef) -> Vec<GateRef> {
        self.gates[gate].value_inputs().to_vec()
    }

    /// Number of value inputs.
    #[must_use]
    pub fn num_value_in(&self, gate: GateRef) -> usize {
        self.gates[gate].num_value()
    }

    /// Number of state inputs.
    #[must_use]
    pub fn num_state_in(&self, gate: GateRef) -> usize {
        self.gates[gate].num_state()
    }

    /// Number of depend inputs.
    #[must_use]
    pub fn num_dep_in(&self, gate: GateRef) -> usize {
        self.gates[gate].num_depend()
    }

    /// Snapshot of the uses of `gate`.
    #[must_use]
    pub fn uses(&self, gate: GateRef) -> Vec<Use> {
        self.uses.get(gate).cloned().unwrap_or_default()
    }

    /// Number of uses.
    #[must_use]
    pub fn use_count(&self, gate: GateRef) -> usize {
        self.uses.get(gate).map_or(0, Vec::len)
    }

    /// Users reading `gate` through a state edge.
    #[must_use]
    pub fn state_users(&self, gate: GateRef) -> Vec<GateRef> {
        self.uses_of_kind(gate, InputKind::State)
    }

    /// Users reading `gate` through a depend edge.
    #[must_use]
    pub fn depend_users(&self, gate: GateRef) -> Vec<GateRef> {
        self.uses_of_kind(gate, InputKind::Depend)
    }

    fn uses_of_kind(&self, gate: GateRef, kind: InputKind) -> Vec<GateRef> {
        self.uses
            .get(gate)
            .map(|uses| {
                uses.iter()
                    .filter(|u| self.gates[u.user].input_kind(u.index as usize) == kind)
                    .map(|u| u.user)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether the gate was deleted.
    #[must_use]
    pub fn is_dead(&self, gate: GateRef) -> bool {
        self.gates.get(gate).map_or(true, Gate::is_dead)
    }

    /// Constant payload of a `Constant` gate.
    #[must_use]
    pub fn constant_value(&self, gate: GateRef) -> Option<u64> {
        match self.gates.get(gate)?.opcode {
            OpCode::Constant(bits) => Some(bits),
            _ => None,
        }
    }

    /// Snapshot of every live gate, in creation order.
    #[must_use]
    pub fn all_gates(&self) -> Vec<GateRef> {
        self.gates.iter().filter(|(_, g)| !g.dead).map(|(id, _)| id).collect()
    }

    /// Number of live gates.
    #[must_use]
    pub fn gate_count(&self) -> usize {
        self.gates.iter().filter(|(_, g)| !g.dead).count()
    }

    /// Number of gate slots ever allocated.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.gates.len()
    }

    // =========================================================================
    // Edge Editing
    // =========================================================================

    fn add_use(&mut self, def: GateRef, user: GateRef, index: usize) {
        if def.is_valid() {
            self.uses.entry(def).push(Use {
                user,
                index: index as u32,
            });
        }
    }

    fn remove_use(&mut self, def: GateRef, user: GateRef, index: usize) {
        if !def.is_valid() {
            return;
        }
        let uses = self.uses.entry(def);
        if let Some(pos) = uses.iter().position(|u| u.user == user && u.index == index as u32) {
            uses.swap_remove(pos);
        }
    }

    /// Point input `index` of `user` at `new`.
    pub fn replace_in(&mut self, user: GateRef, index: usize, new: GateRef) {
        let old = self.gates[user].inputs[index];
        if old == new {
            return;
        }
        self.remove_use(old, user, index);
        self.gates[user].inputs[index] = new;
        self.add_use(new, user, index);
    }

    /// Replace state input `index`.
    pub fn set_state_in(&mut self, gate: GateRef, index: usize, state: GateRef) {
        self.replace_in(gate, index, state);
    }

    /// Replace the first depend input.
    pub fn set_dep(&mut self, gate: GateRef, depend: GateRef) {
        let index = self.gates[gate].num_state();
        self.replace_in(gate, index, depend);
    }

    /// Replace value input `index`.
    pub fn set_value_in(&mut self, gate: GateRef, index: usize, value: GateRef) {
        let g = &self.gates[gate];
        let pos = g.num_state() + g.num_depend() + index;
        self.replace_in(gate, pos, value);
    }

    fn insert_input(&mut self, gate: GateRef, pos: usize, input: GateRef) {
        let tail: Vec<(usize, GateRef)> = self.gates[gate].inputs[pos..]
            .iter()
            .enumerate()
            .map(|(i, &g)| (pos + i, g))
            .collect();
        for &(i, g) in &tail {
            self.remove_use(g, gate, i);
        }
        self.gates[gate].inputs.insert(pos, input);
        self.add_use(input, gate, pos);
        for (i, g) in tail {
            self.add_use(g, gate, i + 1);
        }
    }

    /// Append a state input (a new merge predecessor).
    pub fn append_state(&mut self, gate: GateRef, state: GateRef) {
        let pos = self.gates[gate].num_state();
        self.insert_input(gate, pos, state);
        self.gates[gate].num_state += 1;
    }

    /// Append a depend input (a new depend selector operand).
    pub fn append_depend(&mut self, gate: GateRef, depend: GateRef) {
        let g = &self.gates[gate];
        let pos = g.num_state() + g.num_depend();
        self.insert_input(gate, pos, depend);
        self.gates[gate].num_depend += 1;
    }

    /// Append a value input.
    pub fn append_value(&mut self, gate: GateRef, value: GateRef) {
        let pos = self.gates[gate].inputs.len();
        self.insert_input(gate, pos, value);
    }

    /// Remove input `index`, shifting later inputs down.
    pub fn remove_input(&mut self, gate: GateRef, index: usize) {
        let inputs: Vec<GateRef> = self.gates[gate].inputs.to_vec();
        for (i, &g) in inputs.iter().enumerate().skip(index) {
            self.remove_use(g, gate, i);
        }
        let kind = self.gates[gate].input_kind(index);
        self.gates[gate].inputs.remove(index);
        match kind {
            InputKind::State => self.gates[gate].num_state -= 1,
            InputKind::Depend => self.gates[gate].num_depend -= 1,
            InputKind::Value => {}
        }
        for (i, &g) in inputs.iter().enumerate().skip(index + 1) {
            self.add_use(g, gate, i - 1);
        }
    }

    // =========================================================================
    // Replacement
    // =========================================================================

    /// Redirect every use of `gate` by edge kind: state users to `state`,
    /// depend users to `depend`, value users to `value`, then delete `gate`.
    ///
    /// The replacement value inherits the language type of `gate` unless
    /// that type is `Any`.
    ///
    /// # Errors
    ///
    /// Fails if a use of some kind exists but its replacement is the null
    /// gate.
    pub fn replace_gate(&mut self, gate: GateRef, state: GateRef, depend: GateRef, value: GateRef) -> KilnResult<()> {
        for u in self.uses(gate) {
            let replacement = match self.gates[u.user].input_kind(u.index as usize) {
                InputKind::State => state,
                InputKind::Depend => depend,
                InputKind::Value => value,
            };
            if !replacement.is_valid() {
                return Err(KilnError::malformed(
                    gate.index(),
                    format!("{} still used by #{} without a replacement", self.opcode(gate), u.user.index()),
                ));
            }
            self.replace_in(u.user, u.index as usize, replacement);
        }
        if value.is_valid() {
            self.inherit_type(gate, value);
        }
        self.delete_gate(gate);
        Ok(())
    }

    fn inherit_type(&mut self, from: GateRef, to: GateRef) {
        let ty = self.gates[from].gate_type;
        let target = &self.gates[to];
        let shared = matches!(target.opcode, OpCode::Constant(_) | OpCode::Arg(_));
        if !ty.is_any() && !shared && target.gate_type.is_any() && target.machine_type == MachineType::I64 {
            self.gates[to].gate_type = ty;
        }
    }

    /// Splice a lowered subgraph in place of a HIR gate.
    ///
    /// `success` continues normal completion. `exception` continues the
    /// exceptional one; `None` means the replacement cannot throw and the
    /// exception region is deleted. `value` replaces value uses.
    ///
    /// # Errors
    ///
    /// Fails if the gate has value uses but no value is given.
    pub fn replace_hir(
        &mut self,
        hir: GateRef,
        success: (GateRef, GateRef),
        exception: Option<(GateRef, GateRef)>,
        value: GateRef,
    ) -> KilnResult<()> {
        for u in self.uses(hir) {
            if self.is_dead(u.user) {
                continue;
            }
            match self.opcode(u.user) {
                OpCode::IfSuccess => {
                    self.replace_gate(u.user, success.0, success.1, GateRef::INVALID)?;
                }
                OpCode::IfException => match exception {
                    Some((state, depend)) => self.replace_gate(u.user, state, depend, GateRef::INVALID)?,
                    None => self.kill_control_region(u.user),
                },
                _ => {}
            }
        }
        self.replace_gate(hir, success.0, success.1, value)
    }

    /// Mark `gate` dead and drop its input edges.
    pub fn delete_gate(&mut self, gate: GateRef) {
        let inputs: Vec<GateRef> = self.gates[gate].inputs.to_vec();
        for (i, g) in inputs.into_iter().enumerate() {
            self.remove_use(g, gate, i);
        }
        let g = &mut self.gates[gate];
        g.inputs.clear();
        g.num_state = 0;
        g.num_depend = 0;
        g.dead = true;
    }

    /// Delete a control gate and every gate reachable only through it.
    ///
    /// Merges that lose a predecessor drop the matching selector operands;
    /// a merge left without predecessors dies too.
    pub fn kill_control_region(&mut self, root: GateRef) {
        let mut worklist = vec![root];
        while let Some(gate) = worklist.pop() {
            if self.is_dead(gate) {
                continue;
            }
            for u in self.uses(gate) {
                if self.is_dead(u.user) {
                    continue;
                }
                let user = u.user;
                let index = u.index as usize;
                match self.opcode(user) {
                    OpCode::Merge | OpCode::LoopBegin if index < self.num_state_in(user) => {
                        self.remove_merge_input(user, index);
                        if self.num_state_in(user) == 0 || (index == 0 && self.opcode(user) == OpCode::LoopBegin) {
                            worklist.push(user);
                        }
                    }
                    OpCode::ValueSelector | OpCode::DependSelector if index > 0 => {}
                    _ => worklist.push(user),
                }
            }
            self.delete_gate(gate);
        }
    }

    fn remove_merge_input(&mut self, merge: GateRef, index: usize) {
        for u in self.uses(merge) {
            match self.opcode(u.user) {
                OpCode::ValueSelector => self.remove_input(u.user, 1 + index),
                OpCode::DependSelector => self.remove_input(u.user, 1 + index),
                _ => {}
            }
        }
        self.remove_input(merge, index);
    }
}

// =============================================================================
// Debug Printing
// =============================================================================

impl fmt::Debug for Circuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Circuit")
            .field("name", &self.name)
            .field("gates", &self.gate_count())
            .field("num_vregs", &self.num_vregs)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Circuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "circuit {} ({} gates)", self.name, self.gate_count())?;
        for (id, gate) in self.gates.iter() {
            if gate.dead {
                continue;
            }
            write!(f, "  {id:>6} = {} : {:?}/{}", gate.opcode, gate.machine_type, gate.gate_type)?;
            if !gate.inputs.is_empty() {
                write!(f, "  s{:?} d{:?} v{:?}", gate.state_inputs(), gate.depend_inputs(), gate.value_inputs())?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary(circuit: &mut Circuit, op: OpCode, a: GateRef, b: GateRef) -> GateRef {
        circuit.new_gate(op, MachineType::I32, &[], &[], &[a, b], GateType::NJSValue)
    }

    #[test]
    fn test_function_args() {
        let circuit = Circuit::for_function("f", 2, 4);
        assert_eq!(circuit.num_args(), 8);
        assert_eq!(circuit.machine_type(circuit.common_arg(CommonArg::ActualArgc)), MachineType::I32);
        assert_eq!(circuit.opcode(circuit.arg(7)), OpCode::Arg(7));
        assert!(!circuit.arg(8).is_valid());
    }

    #[test]
    fn test_constants_are_shared() {
        let mut circuit = Circuit::for_stub("s", &[]);
        let a = circuit.constant(7, MachineType::I32, GateType::NJSValue);
        let b = circuit.constant(7, MachineType::I32, GateType::NJSValue);
        let c = circuit.constant(7, MachineType::I64, GateType::NJSValue);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_use_lists_follow_edits() {
        let mut circuit = Circuit::for_stub("s", &[]);
        let one = circuit.constant(1, MachineType::I32, GateType::NJSValue);
        let two = circuit.constant(2, MachineType::I32, GateType::NJSValue);
        let add = binary(&mut circuit, OpCode::Add, one, one);
        assert_eq!(circuit.use_count(one), 2);
        circuit.set_value_in(add, 1, two);
        assert_eq!(circuit.use_count(one), 1);
        assert_eq!(circuit.uses(two), vec![Use { user: add, index: 1 }]);
    }

    #[test]
    fn test_append_state_shifts_uses() {
        let mut circuit = Circuit::for_stub("s", &[]);
        let entry = circuit.state_entry();
        let merge = circuit.new_gate(OpCode::Merge, MachineType::NoValue, &[entry], &[], &[], GateType::Any);
        let v = circuit.constant(3, MachineType::I64, GateType::Any);
        let phi = circuit.new_gate(OpCode::ValueSelector, MachineType::I64, &[merge], &[], &[v], GateType::Any);
        let t = circuit.new_gate(OpCode::IfTrue, MachineType::NoValue, &[entry], &[], &[], GateType::Any);
        circuit.append_state(merge, t);
        circuit.append_value(phi, v);
        assert_eq!(circuit.num_state_in(merge), 2);
        assert_eq!(circuit.num_value_in(phi), 2);
        assert!(circuit.uses(v).contains(&Use { user: phi, index: 2 }));
    }

    #[test]
    fn test_replace_gate_inherits_type() {
        let mut circuit = Circuit::for_stub("s", &[(MachineType::I64, GateType::Any)]);
        let a = circuit.arg(0);
        let hir = circuit.new_gate(OpCode::Add, MachineType::I64, &[], &[], &[a, a], GateType::Int);
        let repl = circuit.new_gate(OpCode::Sub, MachineType::I64, &[], &[], &[a, a], GateType::Any);
        let user = circuit.new_gate(OpCode::Mul, MachineType::I64, &[], &[], &[hir, a], GateType::Any);
        circuit.replace_gate(hir, GateRef::INVALID, GateRef::INVALID, repl).unwrap();
        assert_eq!(circuit.value_in(user, 0), repl);
        assert_eq!(circuit.gate_type(repl), GateType::Int);
        assert!(circuit.is_dead(hir));
    }

    #[test]
    fn test_replace_gate_requires_value() {
        let mut circuit = Circuit::for_stub("s", &[(MachineType::I64, GateType::Any)]);
        let a = circuit.arg(0);
        let hir = circuit.new_gate(OpCode::Add, MachineType::I64, &[], &[], &[a, a], GateType::Any);
        circuit.new_gate(OpCode::Mul, MachineType::I64, &[], &[], &[hir, a], GateType::Any);
        let err = circuit
            .replace_gate(hir, GateRef::INVALID, GateRef::INVALID, GateRef::INVALID)
            .unwrap_err();
        assert!(err.is_compiler_bug());
    }

    #[test]
    fn test_kill_control_region_prunes_merge() {
        let mut circuit = Circuit::for_stub("s", &[]);
        let entry = circuit.state_entry();
        let dep = circuit.depend_entry();
        let t = circuit.new_gate(OpCode::IfTrue, MachineType::NoValue, &[entry], &[], &[], GateType::Any);
        let f = circuit.new_gate(OpCode::IfFalse, MachineType::NoValue, &[entry], &[], &[], GateType::Any);
        let rt = circuit.new_gate(OpCode::DependRelay, MachineType::NoValue, &[t], &[dep], &[], GateType::Any);
        let rf = circuit.new_gate(OpCode::DependRelay, MachineType::NoValue, &[f], &[dep], &[], GateType::Any);
        let merge = circuit.new_gate(OpCode::Merge, MachineType::NoValue, &[t, f], &[], &[], GateType::Any);
        let ds = circuit.new_gate(OpCode::DependSelector, MachineType::NoValue, &[merge], &[rt, rf], &[], GateType::Any);
        circuit.kill_control_region(f);
        assert!(circuit.is_dead(f));
        assert!(circuit.is_dead(rf));
        assert_eq!(circuit.num_state_in(merge), 1);
        assert_eq!(circuit.num_dep_in(ds), 1);
        assert_eq!(circuit.dep(ds), rt);
        assert!(!circuit.is_dead(merge));
    }
}
