//! Reference interpreter over scheduled circuits.
//!
//! Control walks block by block from the state entry. Within a block:
//! - control gates run in chain order; a gate with a depend input first
//!   forces the effects its chain still owes
//! - pure gates are evaluated on demand and cached until the next effect
//! - effects run when forced, and every effect of a block has run by the
//!   time control leaves it
//! - on entry to a merge, its selectors take the values of the incoming
//!   edge, all assigned at once
//!
//! Re-entering a block (a loop iteration) resets its effects so they run
//! again. Bytecodes left unlowered run their generic semantics directly
//! against the runtime.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use kiln_core::{DeoptType, KilnError, KilnResult, TaggedValue};
use kiln_runtime::layout::{async_generator_object, function, generator_context, generator_object, lexical_env, tagged_array};
use kiln_runtime::operations::to_boolean;
use kiln_runtime::{
    call_common_stub, call_ngc_runtime, call_runtime, glue, BuiltinId, CallInfo, CommonStubId, JsThread, JsType,
    RuntimeStubId,
};

use super::schedule::Schedule;
use crate::ir::{
    ArgLayout, CallTarget, Circuit, CommonArg, EcmaOpcode, FCmpCond, GateRef, ICmpCond, MachineType, OpCode,
    NUM_MANDATORY_JSFUNC_ARGS,
};
use crate::lowering::generic::{call_parts, common_stub, runtime_operands, FrameArgs, Operand};
use crate::stubs::builtin_stub;

/// Block entries allowed per run before giving up.
pub const DEFAULT_STEP_LIMIT: u64 = 10_000_000;

// =============================================================================
// Outcome
// =============================================================================

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Normal return.
    Return(TaggedValue),
    /// An exception left the function; it is no longer pending.
    Threw(TaggedValue),
    /// A guard failed.
    Deopt {
        /// The failed guard's reason.
        reason: DeoptType,
        /// Bytecode offset of the frame state.
        bc_offset: u32,
        /// Frame state values: registers, accumulator, environment.
        frame: Vec<TaggedValue>,
    },
}

impl Outcome {
    /// The returned value, if the run returned.
    #[must_use]
    pub fn returned(&self) -> Option<TaggedValue> {
        match self {
            Outcome::Return(v) => Some(*v),
            _ => None,
        }
    }

    /// Whether a guard failed.
    #[must_use]
    pub fn is_deopt(&self) -> bool {
        matches!(self, Outcome::Deopt { .. })
    }
}

/// Why evaluation stopped early.
enum Stop {
    Fault(KilnError),
    Deopt {
        reason: DeoptType,
        bc_offset: u32,
        frame: Vec<TaggedValue>,
    },
}

impl From<KilnError> for Stop {
    fn from(error: KilnError) -> Self {
        Stop::Fault(error)
    }
}

type Exec<T> = Result<T, Stop>;

/// What a control gate does next.
enum Flow {
    Continue,
    Goto(GateRef),
    Done(Outcome),
}

// =============================================================================
// Frame
// =============================================================================

/// State of one circuit activation.
struct Frame<'c> {
    circuit: &'c Circuit,
    schedule: Schedule,
    args: Vec<u64>,
    actual: Vec<TaggedValue>,
    values: FxHashMap<GateRef, u64>,
    pure: FxHashMap<GateRef, u64>,
    executed: FxHashSet<GateRef>,
    block: usize,
}

impl<'c> Frame<'c> {
    fn new(circuit: &'c Circuit, args: Vec<u64>, actual: Vec<TaggedValue>) -> KilnResult<Self> {
        Ok(Self {
            circuit,
            schedule: Schedule::build(circuit)?,
            args,
            actual,
            values: FxHashMap::default(),
            pure: FxHashMap::default(),
            executed: FxHashSet::default(),
            block: 0,
        })
    }

    fn arg(&self, arg: CommonArg) -> TaggedValue {
        TaggedValue(self.args.get(arg as usize).copied().unwrap_or(TaggedValue::UNDEFINED.raw()))
    }

    fn generic_frame(&self) -> FrameArgs<TaggedValue> {
        FrameArgs {
            func: self.arg(CommonArg::Func),
            new_target: self.arg(CommonArg::NewTarget),
            this: self.arg(CommonArg::This),
            env: self.arg(CommonArg::Env),
            params: self.actual.clone(),
        }
    }
}

// =============================================================================
// Interpreter
// =============================================================================

/// Executes circuits against a runtime thread.
pub struct Interpreter<'t> {
    thread: &'t mut JsThread,
    call_counts: FxHashMap<&'static str, u64>,
    step_limit: u64,
}

impl<'t> Interpreter<'t> {
    /// Interpreter over `thread`.
    pub fn new(thread: &'t mut JsThread) -> Self {
        Self {
            thread,
            call_counts: FxHashMap::default(),
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }

    /// Cap the number of block entries per run.
    #[must_use]
    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    /// The runtime thread.
    pub fn thread(&mut self) -> &mut JsThread {
        self.thread
    }

    /// Calls made to a target (runtime stub, common stub, builtin, `JSCall`
    /// or `JSCallNew`), by name.
    #[must_use]
    pub fn call_count(&self, name: &str) -> u64 {
        self.call_counts.get(name).copied().unwrap_or(0)
    }

    fn record(&mut self, name: &'static str) {
        *self.call_counts.entry(name).or_insert(0) += 1;
    }

    /// Run a function circuit for one call.
    ///
    /// # Errors
    ///
    /// Fails for stub circuits, on malformed circuits, and on runtime faults.
    /// Program exceptions are [`Outcome::Threw`], not errors.
    pub fn run(&mut self, circuit: &Circuit, info: &CallInfo) -> KilnResult<Outcome> {
        let args = self.activation(circuit, info)?;
        self.execute(circuit, args, info.args.to_vec())
    }

    /// Continue a call in `circuit` at the instruction at `bc_offset`.
    ///
    /// `frame` holds the registers, accumulator and environment a failed
    /// guard captured, in frame state order. Instructions before `bc_offset`
    /// do not run again.
    ///
    /// # Errors
    ///
    /// Fails if `circuit` has no instruction at `bc_offset`, if its frame
    /// state does not match `frame`, and as [`Interpreter::run`].
    pub fn resume_at(
        &mut self,
        circuit: &Circuit,
        info: &CallInfo,
        bc_offset: u32,
        frame: &[TaggedValue],
    ) -> KilnResult<Outcome> {
        let entry = circuit
            .all_gates()
            .into_iter()
            .find(|&g| matches!(circuit.opcode(g), OpCode::JsBytecode { bc_offset: at, .. } if at == bc_offset))
            .ok_or_else(|| KilnError::execution(format!("{} has no instruction at {bc_offset}", circuit.name())))?;
        let split = circuit.dep(entry);
        if circuit.opcode(split) != OpCode::StateSplit {
            return Err(KilnError::malformed(entry.index(), "instruction without a state split"));
        }
        let state = circuit.value_in(split, 0);
        let slots = circuit.value_ins(state);
        if slots.len() != frame.len() {
            return Err(KilnError::RegisterCountMismatch {
                saved: frame.len(),
                restored: slots.len(),
            });
        }
        let args = self.activation(circuit, info)?;
        let mut activation = Frame::new(circuit, args, info.args.to_vec())?;
        for (&slot, value) in slots.iter().zip(frame) {
            let op = circuit.opcode(slot);
            if matches!(op, OpCode::ValueSelector | OpCode::JsBytecode { .. }) || op.is_effect() {
                activation.values.insert(slot, value.raw());
            }
        }
        debug!(circuit = circuit.name(), bc_offset, "resuming");
        let outcome = self.run_frame(&mut activation, entry);
        Self::settle(circuit, outcome)
    }

    /// Common arguments and declared parameters for a call.
    fn activation(&mut self, circuit: &Circuit, info: &CallInfo) -> KilnResult<Vec<u64>> {
        let ArgLayout::Function { num_params } = circuit.layout() else {
            return Err(KilnError::Unsupported(format!("{} is a stub circuit", circuit.name())));
        };
        let env = if info.func.is_heap_object() {
            self.thread
                .heap
                .field(info.func, function::LEXICAL_ENV_OFFSET)
                .unwrap_or(TaggedValue::UNDEFINED)
        } else {
            TaggedValue::UNDEFINED
        };
        let argc = info.argc() as u64 + u64::from(NUM_MANDATORY_JSFUNC_ARGS);
        let mut args = vec![
            self.thread.glue(),
            env.raw(),
            argc,
            info.func.raw(),
            info.new_target.raw(),
            info.this.raw(),
        ];
        args.extend((0..num_params as usize).map(|i| info.arg(i).raw()));
        Ok(args)
    }

    /// Run a stub circuit with raw arguments (the glue is supplied).
    ///
    /// # Errors
    ///
    /// Fails on malformed circuits or runtime faults.
    pub fn run_stub(&mut self, circuit: &Circuit, args: &[u64]) -> KilnResult<Outcome> {
        let mut all = Vec::with_capacity(args.len() + 1);
        all.push(self.thread.glue());
        all.extend_from_slice(args);
        self.execute(circuit, all, Vec::new())
    }

    /// Call builtin `id` through its stub circuit.
    ///
    /// # Errors
    ///
    /// Fails if `id` has no stub or the stub faults.
    pub fn call_builtin(&mut self, id: BuiltinId, info: &CallInfo) -> KilnResult<Outcome> {
        let stub = builtin_stub(id)?;
        let mut args = vec![0, info.func.raw(), info.new_target.raw(), info.this.raw(), info.argc() as u64];
        args.extend((0..crate::call_signature::BUILTIN_STUB_ARGS).map(|i| info.arg(i).raw()));
        self.run_stub(&stub, &args)
    }

    fn execute(&mut self, circuit: &Circuit, args: Vec<u64>, actual: Vec<TaggedValue>) -> KilnResult<Outcome> {
        let mut frame = Frame::new(circuit, args, actual)?;
        let outcome = self.run_frame(&mut frame, circuit.state_entry());
        Self::settle(circuit, outcome)
    }

    fn settle(circuit: &Circuit, outcome: Exec<Outcome>) -> KilnResult<Outcome> {
        match outcome {
            Ok(outcome) => Ok(outcome),
            Err(Stop::Fault(error)) => Err(error),
            Err(Stop::Deopt { reason, bc_offset, frame }) => {
                debug!(circuit = circuit.name(), %reason, bc_offset, "deoptimized");
                Ok(Outcome::Deopt { reason, bc_offset, frame })
            }
        }
    }

    /// Run from control gate `start`. A `start` inside its block skips the
    /// control gates before it, and the effects they own count as run.
    fn run_frame(&mut self, frame: &mut Frame<'_>, start: GateRef) -> Exec<Outcome> {
        let mut head = start;
        let mut resume = (start != frame.circuit.state_entry()).then_some(start);
        let mut from = GateRef::INVALID;
        let mut steps = 0u64;
        loop {
            steps += 1;
            if steps > self.step_limit {
                return Err(KilnError::execution(format!("{} exceeded the step limit", frame.circuit.name())).into());
            }
            let block = frame
                .schedule
                .block_of(head)
                .ok_or_else(|| KilnError::malformed(head.index(), "control reaches an unscheduled gate"))?;
            self.enter(frame, block, from)?;

            let control = frame.schedule.blocks()[block].control.clone();
            let skip = match resume.take() {
                Some(start) => {
                    let at = control.iter().position(|&g| g == start).unwrap_or(0);
                    for &gate in control.iter().take(at + 1) {
                        mark_owed_effects(frame, gate);
                    }
                    at
                }
                None => 0,
            };
            let mut next = None;
            for gate in control.into_iter().skip(skip) {
                match self.exec_control(frame, gate)? {
                    Flow::Continue => {}
                    Flow::Goto(target) => {
                        next = Some((gate, target));
                        break;
                    }
                    Flow::Done(outcome) => return Ok(outcome),
                }
            }
            let effects = frame.schedule.blocks()[block].effects.clone();
            for effect in effects {
                self.force(frame, effect)?;
            }
            let (terminator, target) =
                next.ok_or_else(|| KilnError::malformed(head.index(), "block ends without a successor"))?;
            from = terminator;
            head = target;
        }
    }

    /// Enter `block` from control gate `from`.
    fn enter(&mut self, frame: &mut Frame<'_>, block: usize, from: GateRef) -> Exec<()> {
        let circuit = frame.circuit;
        let head = frame.schedule.blocks()[block].head;
        let mut assigned = Vec::new();
        if circuit.opcode(head).is_merge() && from.is_valid() {
            let edge = (0..circuit.num_state_in(head))
                .find(|&i| circuit.state_in(head, i) == from)
                .ok_or_else(|| KilnError::malformed(head.index(), "merge entered from a non-predecessor"))?;
            for selector in circuit.state_users(head) {
                match circuit.opcode(selector) {
                    OpCode::ValueSelector => {
                        let value = self.eval(frame, circuit.value_in(selector, edge))?;
                        assigned.push((selector, value));
                    }
                    OpCode::DependSelector => self.force(frame, circuit.dep_in(selector, edge))?,
                    _ => {}
                }
            }
        }
        for effect in &frame.schedule.blocks()[block].effects {
            frame.executed.remove(effect);
        }
        frame.values.extend(assigned);
        frame.pure.clear();
        frame.block = block;
        Ok(())
    }

    // =========================================================================
    // Control
    // =========================================================================

    fn exec_control(&mut self, frame: &mut Frame<'_>, gate: GateRef) -> Exec<Flow> {
        let circuit = frame.circuit;
        let op = circuit.opcode(gate);
        if circuit.num_dep_in(gate) > 0 && !matches!(op, OpCode::DependSelector) {
            self.force(frame, circuit.dep(gate))?;
        }
        match op {
            OpCode::StateEntry
            | OpCode::IfTrue
            | OpCode::IfFalse
            | OpCode::IfSuccess
            | OpCode::IfException
            | OpCode::Merge
            | OpCode::LoopBegin
            | OpCode::LoopBack
            | OpCode::UpdateHotness(_) => self.fall_through(frame, gate),
            OpCode::IfBranch => {
                let taken = self.eval(frame, circuit.value_in(gate, 0))? != 0;
                self.branch(frame, gate, taken)
            }
            OpCode::Return => {
                let value = TaggedValue(self.eval(frame, circuit.value_in(gate, 0))?);
                Ok(Flow::Done(self.finish(value)))
            }
            OpCode::ReturnVoid => Ok(Flow::Done(Outcome::Return(TaggedValue::UNDEFINED))),
            OpCode::DeoptCheck(reason) => {
                if self.eval(frame, circuit.value_in(gate, 0))? == 0 {
                    return Err(self.deopt(frame, reason, circuit.value_in(gate, 1)));
                }
                self.fall_through(frame, gate)
            }
            OpCode::JsBytecode { op, bc_offset } => self.exec_bytecode(frame, gate, op, bc_offset),
            OpCode::Construct => self.exec_construct(frame, gate),
            _ => Err(KilnError::Unsupported(format!("executing {op}")).into()),
        }
    }

    fn fall_through(&mut self, frame: &Frame<'_>, gate: GateRef) -> Exec<Flow> {
        let circuit = frame.circuit;
        let successors = frame.schedule.successors(gate);
        if let Some(&success) = successors.iter().find(|&&s| circuit.opcode(s) == OpCode::IfSuccess) {
            return Ok(Flow::Goto(success));
        }
        match successors {
            [next] if circuit.opcode(*next).is_block_head() => Ok(Flow::Goto(*next)),
            [_] => Ok(Flow::Continue),
            _ => Err(KilnError::malformed(gate.index(), "control falls off the circuit").into()),
        }
    }

    fn branch(&mut self, frame: &Frame<'_>, gate: GateRef, taken: bool) -> Exec<Flow> {
        let want = if taken { OpCode::IfTrue } else { OpCode::IfFalse };
        frame
            .schedule
            .successors(gate)
            .iter()
            .find(|&&s| frame.circuit.opcode(s) == want)
            .map(|&s| Flow::Goto(s))
            .ok_or_else(|| KilnError::malformed(gate.index(), "branch without projection").into())
    }

    /// Exceptional completion of a throwing gate.
    fn throw_from(&mut self, frame: &Frame<'_>, gate: GateRef) -> Flow {
        let handler = frame
            .schedule
            .successors(gate)
            .iter()
            .find(|&&s| frame.circuit.opcode(s) == OpCode::IfException)
            .copied();
        match handler {
            Some(handler) => Flow::Goto(handler),
            None => Flow::Done(Outcome::Threw(self.thread.take_exception())),
        }
    }

    fn finish(&mut self, value: TaggedValue) -> Outcome {
        if value.is_exception() {
            Outcome::Threw(self.thread.take_exception())
        } else {
            Outcome::Return(value)
        }
    }

    fn deopt(&mut self, frame: &mut Frame<'_>, reason: DeoptType, frame_state: GateRef) -> Stop {
        let circuit = frame.circuit;
        let OpCode::FrameState(bc_offset) = circuit.opcode(frame_state) else {
            return KilnError::malformed(frame_state.index(), "deopt without a frame state").into();
        };
        let mut values = Vec::with_capacity(circuit.num_value_in(frame_state));
        for input in circuit.value_ins(frame_state) {
            match self.eval(frame, input) {
                Ok(v) => values.push(TaggedValue(v)),
                Err(stop) => return stop,
            }
        }
        Stop::Deopt {
            reason,
            bc_offset,
            frame: values,
        }
    }

    // =========================================================================
    // Effects
    // =========================================================================

    /// Run the unexecuted effects ending at `gate`, oldest first.
    fn force(&mut self, frame: &mut Frame<'_>, gate: GateRef) -> Exec<()> {
        let circuit = frame.circuit;
        let mut chain = Vec::new();
        let mut current = gate;
        while current.is_valid() && circuit.opcode(current).is_effect() && !frame.executed.contains(&current) {
            chain.push(current);
            current = circuit.dep(current);
        }
        for &effect in chain.iter().rev() {
            self.exec_effect(frame, effect)?;
        }
        Ok(())
    }

    fn exec_effect(&mut self, frame: &mut Frame<'_>, gate: GateRef) -> Exec<()> {
        let circuit = frame.circuit;
        let mt = circuit.machine_type(gate);
        let value = match circuit.opcode(gate) {
            OpCode::Load => {
                let address = self.address(frame, gate)?;
                self.read(address, mt)?
            }
            OpCode::Store => {
                let address = self.address(frame, gate)?;
                let value = self.eval(frame, circuit.value_in(gate, 2))?;
                self.write(address, mt, value)?;
                0
            }
            OpCode::Call(target) => self.exec_call(frame, gate, target)?,
            OpCode::GetException => self.thread.take_exception().raw(),
            OpCode::StateSplit => 0,
            OpCode::Deopt(reason) => return Err(self.deopt(frame, reason, circuit.value_in(gate, 0))),
            op => return Err(KilnError::Unreachable(format!("{op} is not an effect")).into()),
        };
        frame.values.insert(gate, value);
        frame.executed.insert(gate);
        frame.pure.clear();
        Ok(())
    }

    fn address(&mut self, frame: &mut Frame<'_>, gate: GateRef) -> Exec<u64> {
        let base = self.eval(frame, frame.circuit.value_in(gate, 0))?;
        let offset = self.eval(frame, frame.circuit.value_in(gate, 1))?;
        Ok(base.wrapping_add(offset))
    }

    fn read(&self, address: u64, mt: MachineType) -> KilnResult<u64> {
        let heap = &self.thread.heap;
        Ok(match mt.size() {
            1 => u64::from(heap.read_u8(address)?),
            2 => u64::from(heap.read_u16(address)?),
            4 => u64::from(heap.read_u32(address)?),
            _ => heap.read_u64(address)?,
        })
    }

    fn write(&mut self, address: u64, mt: MachineType, value: u64) -> KilnResult<()> {
        let heap = &mut self.thread.heap;
        match mt.size() {
            1 => heap.write_u8(address, value as u8),
            2 => heap.write_u16(address, value as u16),
            4 => heap.write_u32(address, value as u32),
            _ => heap.write_u64(address, value),
        }
    }

    fn exec_call(&mut self, frame: &mut Frame<'_>, gate: GateRef, target: CallTarget) -> Exec<u64> {
        let mut args = Vec::with_capacity(frame.circuit.num_value_in(gate));
        for input in frame.circuit.value_ins(gate) {
            args.push(self.eval(frame, input)?);
        }
        self.record(target.name());
        let tagged = |raw: &[u64]| raw.iter().map(|&v| TaggedValue(v)).collect::<Vec<_>>();
        let rest = args.get(1..).unwrap_or(&[]);
        Ok(match target {
            CallTarget::Runtime(id) => call_runtime(self.thread, id, &tagged(rest))?.raw(),
            CallTarget::NoGc(id) => call_ngc_runtime(self.thread, id, rest)?,
            CallTarget::Common(id) => call_common_stub(self.thread, id, &tagged(rest))?.raw(),
            CallTarget::Builtin(id) => {
                let stub = builtin_stub(id)?;
                match self.execute(&stub, args, Vec::new())? {
                    Outcome::Return(value) => value.raw(),
                    Outcome::Threw(exception) => self.thread.throw(exception).raw(),
                    Outcome::Deopt { .. } => {
                        return Err(KilnError::execution(format!("builtin stub {} deoptimized", id.name())).into());
                    }
                }
            }
            CallTarget::Js | CallTarget::JsNew => {
                // [glue, env, argc, func, newTarget, this, args..., bcOffset]
                if args.len() < 7 {
                    return Err(KilnError::malformed(gate.index(), "JS call without its fixed operands").into());
                }
                let values = tagged(&args[..args.len() - 1]);
                let mut info = CallInfo::new(values[3], values[5], &values[6..]);
                info.new_target = values[4];
                self.thread.call_with(&info).raw()
            }
        })
    }

    // =========================================================================
    // Values
    // =========================================================================

    fn eval(&mut self, frame: &mut Frame<'_>, gate: GateRef) -> Exec<u64> {
        if let Some(&value) = frame.pure.get(&gate) {
            return Ok(value);
        }
        let circuit = frame.circuit;
        let op = circuit.opcode(gate);
        let mt = circuit.machine_type(gate);
        if op.is_effect() {
            if !frame.executed.contains(&gate) && frame.schedule.block_of(gate) == Some(frame.block) {
                self.force(frame, gate)?;
            }
            return frame
                .values
                .get(&gate)
                .copied()
                .ok_or_else(|| KilnError::malformed(gate.index(), "effect read before it ran").into());
        }
        let value = match op {
            OpCode::ValueSelector | OpCode::JsBytecode { .. } => {
                return frame
                    .values
                    .get(&gate)
                    .copied()
                    .ok_or_else(|| KilnError::malformed(gate.index(), "value read before it was produced").into());
            }
            OpCode::Constant(bits) => bits & mt.mask(),
            OpCode::Arg(index) => frame.args.get(index as usize).copied().unwrap_or(TaggedValue::UNDEFINED.raw()),
            OpCode::ArgAt => {
                let index = self.eval(frame, circuit.value_in(gate, 0))? as u32 as usize;
                frame.actual.get(index).copied().unwrap_or(TaggedValue::UNDEFINED).raw()
            }
            OpCode::RestoreRegister(index) => {
                let resume = circuit.value_in(gate, 0);
                let generator = TaggedValue(self.eval(frame, circuit.value_in(resume, 0))?);
                self.saved_register(generator, u32::from(index))?.raw()
            }
            OpCode::RestoreEnv => {
                let resume = circuit.value_in(gate, 0);
                let generator = TaggedValue(self.eval(frame, circuit.value_in(resume, 0))?);
                let heap = &self.thread.heap;
                let context = heap.field(generator, generator_object::GENERATOR_CONTEXT_OFFSET)?;
                heap.field(context, generator_context::LEXICAL_ENV_OFFSET)?.raw()
            }
            op if op.is_pure() => {
                let mut inputs = Vec::with_capacity(circuit.num_value_in(gate));
                for input in circuit.value_ins(gate) {
                    inputs.push((self.eval(frame, input)?, circuit.machine_type(input)));
                }
                eval_pure(op, mt, &inputs).map_err(|e| match e {
                    KilnError::Unsupported(m) => KilnError::malformed(gate.index(), m),
                    other => other,
                })?
            }
            op => return Err(KilnError::malformed(gate.index(), format!("{op} has no value")).into()),
        };
        frame.pure.insert(gate, value);
        Ok(value)
    }

    // =========================================================================
    // Generic Bytecode
    // =========================================================================

    /// `[func, newTarget, this, args...]`.
    fn exec_construct(&mut self, frame: &mut Frame<'_>, gate: GateRef) -> Exec<Flow> {
        let mut values = Vec::with_capacity(frame.circuit.num_value_in(gate));
        for input in frame.circuit.value_ins(gate) {
            values.push(TaggedValue(self.eval(frame, input)?));
        }
        let (func, new_target, this) = (values[0], values[1], values[2]);
        let mut info = CallInfo::new(func, this, &values[3..]);
        info.new_target = new_target;
        self.record("JSCallNew");
        let mut result = self.thread.call_with(&info);
        if !result.is_exception() {
            self.record(CommonStubId::ConstructorCheck.name());
            result = call_common_stub(self.thread, CommonStubId::ConstructorCheck, &[func, result, this])?;
        }
        self.complete(frame, gate, result)
    }

    /// Record a bytecode's result and leave through the matching exit.
    fn complete(&mut self, frame: &mut Frame<'_>, gate: GateRef, result: TaggedValue) -> Exec<Flow> {
        frame.values.insert(gate, result.raw());
        frame.pure.clear();
        if result.is_exception() {
            Ok(self.throw_from(frame, gate))
        } else {
            self.fall_through(frame, gate)
        }
    }

    fn exec_bytecode(&mut self, frame: &mut Frame<'_>, gate: GateRef, op: EcmaOpcode, bc_offset: u32) -> Exec<Flow> {
        use EcmaOpcode as E;

        let circuit = frame.circuit;
        let mut values = Vec::with_capacity(circuit.num_value_in(gate));
        for input in circuit.value_ins(gate) {
            values.push(TaggedValue(self.eval(frame, input)?));
        }
        if let Some(id) = common_stub(op) {
            self.record(id.name());
            let result = call_common_stub(self.thread, id, &values)?;
            return self.complete(frame, gate, result);
        }
        let thread = &mut *self.thread;
        let result = match op {
            E::Jeqz | E::Jnez => {
                let truthy = to_boolean(thread, values[0]);
                return self.branch(frame, gate, truthy == (op == E::Jnez));
            }
            E::Return => values[0],
            E::ReturnUndefined => TaggedValue::UNDEFINED,
            E::IsTrue => TaggedValue::boolean(to_boolean(thread, values[0])),
            E::IsFalse => TaggedValue::boolean(!to_boolean(thread, values[0])),
            E::LdNaN => TaggedValue::double(f64::NAN),
            E::LdInfinity => TaggedValue::double(f64::INFINITY),
            E::LdUndefined => TaggedValue::UNDEFINED,
            E::LdNull => TaggedValue::NULL,
            E::LdTrue => TaggedValue::TRUE,
            E::LdFalse => TaggedValue::FALSE,
            E::LdHole => TaggedValue::HOLE,
            E::LdGlobal => thread.heap.glue_field(glue::GLOBAL_OBJECT_OFFSET)?,
            E::LdThis => frame.arg(CommonArg::This),
            E::LdFunction => frame.arg(CommonArg::Func),
            E::LdNewTarget => frame.arg(CommonArg::NewTarget),
            E::PopLexEnv => env_slot(thread, values[0], lexical_env::PARENT_ENV_INDEX)?,
            E::LdLexVar => {
                let env = parent_env(thread, values[2], values[0].as_int() as u32)?;
                env_slot(thread, env, lexical_env::RESERVED_ENV_LENGTH + values[1].as_int() as u32)?
            }
            E::StLexVar => {
                let env = parent_env(thread, values[3], values[0].as_int() as u32)?;
                let index = lexical_env::RESERVED_ENV_LENGTH + values[1].as_int() as u32;
                thread.heap.write_tagged(element_address(env, index), values[2])?;
                TaggedValue::UNDEFINED
            }
            E::ThrowUndefinedIfHole => {
                if values[0].is_hole() {
                    call_runtime(thread, RuntimeStubId::ThrowUndefinedIfHole, &[values[1]])?
                } else {
                    values[0]
                }
            }
            E::ThrowIfNotObject => {
                if thread.object_type(values[0]).is_some_and(JsType::is_js_object) {
                    values[0]
                } else {
                    call_runtime(thread, RuntimeStubId::ThrowIfNotObject, &[])?
                }
            }
            E::SuspendGenerator => self.suspend(frame, &values, bc_offset)?,
            E::ResumeGenerator => resume_result(thread, values[0])?,
            E::GetResumeMode => thread.heap.field(values[0], generator_object::RESUME_MODE_OFFSET)?,
            _ if op.is_call_arg() || op.is_call_this() => {
                let Some((func, this, args)) = call_parts(op, &values) else {
                    return Err(KilnError::Unreachable(format!("{op} is not a call")).into());
                };
                self.record("JSCall");
                self.thread.call(func, this.unwrap_or(TaggedValue::UNDEFINED), args)
            }
            _ => {
                let Some((id, operands)) = runtime_operands(op, &values, &frame.generic_frame()) else {
                    return Err(KilnError::Unreachable(format!("{op} has no runtime form")).into());
                };
                let argv: Vec<TaggedValue> = operands
                    .into_iter()
                    .map(|operand| match operand {
                        Operand::Value(v) | Operand::Const(v) => v,
                    })
                    .collect();
                self.record(id.name());
                call_runtime(self.thread, id, &argv)?
            }
        };
        self.complete(frame, gate, result)
    }

    /// Save the frame into the generator context and suspend.
    fn suspend(&mut self, frame: &Frame<'_>, values: &[TaggedValue], bc_offset: u32) -> KilnResult<TaggedValue> {
        let (generator, value, env, registers) = (values[0], values[1], values[2], &values[3..]);
        let thread = &mut *self.thread;
        let context = thread.heap.field(generator, generator_object::GENERATOR_CONTEXT_OFFSET)?;
        let array = call_runtime(thread, RuntimeStubId::NewTaggedArray, &[TaggedValue::int(registers.len() as i32)])?;
        for (index, &register) in registers.iter().enumerate() {
            thread.heap.write_tagged(element_address(array, index as u32), register)?;
        }
        let base = context.as_address();
        thread.heap.set_field(context, generator_context::REGS_ARRAY_OFFSET, array)?;
        thread.heap.set_field(context, generator_context::METHOD_OFFSET, frame.arg(CommonArg::Func))?;
        thread.heap.set_field(context, generator_context::THIS_OFFSET, frame.arg(CommonArg::This))?;
        thread.heap.set_field(context, generator_context::ACC_OFFSET, value)?;
        thread.heap.set_field(context, generator_context::GENERATOR_OBJECT_OFFSET, generator)?;
        thread.heap.set_field(context, generator_context::LEXICAL_ENV_OFFSET, env)?;
        thread.heap.write_u32(base + generator_context::NREGS_OFFSET, registers.len() as u32)?;
        thread.heap.write_u32(base + generator_context::BC_OFFSET_OFFSET, bc_offset)?;
        self.record(RuntimeStubId::OptSuspendGenerator.name());
        call_runtime(self.thread, RuntimeStubId::OptSuspendGenerator, &[generator, value])
    }

    fn saved_register(&self, generator: TaggedValue, index: u32) -> KilnResult<TaggedValue> {
        let heap = &self.thread.heap;
        let context = heap.field(generator, generator_object::GENERATOR_CONTEXT_OFFSET)?;
        let registers = heap.field(context, generator_context::REGS_ARRAY_OFFSET)?;
        let length = heap.read_u32(registers.as_address() + tagged_array::LENGTH_OFFSET)?;
        if index >= length {
            return Err(KilnError::RegisterCountMismatch {
                saved: length as usize,
                restored: index as usize + 1,
            });
        }
        heap.read_tagged(element_address(registers, index))
    }
}

// =============================================================================
// Runtime Helpers
// =============================================================================

/// Count the effects `gate` would force as already run.
fn mark_owed_effects(frame: &mut Frame<'_>, gate: GateRef) {
    let circuit = frame.circuit;
    if circuit.num_dep_in(gate) == 0 {
        return;
    }
    let mut current = circuit.dep(gate);
    while current.is_valid() && circuit.opcode(current).is_effect() && frame.executed.insert(current) {
        current = circuit.dep(current);
    }
}

fn element_address(array: TaggedValue, index: u32) -> u64 {
    array.as_address() + tagged_array::DATA_OFFSET + u64::from(index) * 8
}

fn env_slot(thread: &JsThread, env: TaggedValue, index: u32) -> KilnResult<TaggedValue> {
    thread.heap.read_tagged(element_address(env, index))
}

fn parent_env(thread: &JsThread, env: TaggedValue, levels: u32) -> KilnResult<TaggedValue> {
    (0..levels).try_fold(env, |env, _| env_slot(thread, env, lexical_env::PARENT_ENV_INDEX))
}

fn resume_result(thread: &JsThread, generator: TaggedValue) -> KilnResult<TaggedValue> {
    let offset = if thread.object_type(generator) == Some(JsType::JsAsyncGeneratorObject) {
        async_generator_object::ASYNC_GENERATOR_RESUME_RESULT_OFFSET
    } else {
        generator_object::RESUME_RESULT_OFFSET
    };
    thread.heap.field(generator, offset)
}

// =============================================================================
// Pure Operations
// =============================================================================

/// Sign-extend the low `mt.bits()` of `value`.
fn signed(value: u64, mt: MachineType) -> i64 {
    match mt.bits() {
        0 | 64 => value as i64,
        bits => {
            let shift = 64 - bits;
            ((value << shift) as i64) >> shift
        }
    }
}

fn to_f64(value: u64, mt: MachineType) -> f64 {
    if mt == MachineType::F32 {
        f64::from(f32::from_bits(value as u32))
    } else {
        f64::from_bits(value)
    }
}

fn from_f64(value: f64, mt: MachineType) -> u64 {
    if mt == MachineType::F32 {
        u64::from((value as f32).to_bits())
    } else {
        value.to_bits()
    }
}

fn shift_amount(amount: u64, mt: MachineType) -> u32 {
    (amount as u32) & (mt.bits().max(1) - 1)
}

/// Evaluate a pure arithmetic, comparison or conversion gate.
///
/// `inputs` pairs each operand's bits with its machine type; `mt` is the
/// gate's own machine type. Integer division and remainder by zero give 0.
///
/// # Errors
///
/// Returns [`KilnError::Unsupported`] for opcodes that are not pure
/// operations, or an operand count that does not match.
pub fn eval_pure(op: OpCode, mt: MachineType, inputs: &[(u64, MachineType)]) -> KilnResult<u64> {
    let mask = mt.mask();
    let binary = || match inputs {
        [(a, amt), (b, _)] => Ok((*a, *b, *amt)),
        _ => Err(KilnError::Unsupported(format!("{op} expects two operands"))),
    };
    let unary = || match inputs {
        [(a, amt)] => Ok((*a, *amt)),
        _ => Err(KilnError::Unsupported(format!("{op} expects one operand"))),
    };
    let float = |a: u64, b: u64, f: fn(f64, f64) -> f64| from_f64(f(to_f64(a, mt), to_f64(b, mt)), mt);

    Ok(match op {
        OpCode::Add | OpCode::Sub | OpCode::Mul if mt.is_float() => {
            let (a, b, _) = binary()?;
            match op {
                OpCode::Add => float(a, b, |x, y| x + y),
                OpCode::Sub => float(a, b, |x, y| x - y),
                _ => float(a, b, |x, y| x * y),
            }
        }
        OpCode::Add => {
            let (a, b, _) = binary()?;
            a.wrapping_add(b) & mask
        }
        OpCode::Sub => {
            let (a, b, _) = binary()?;
            a.wrapping_sub(b) & mask
        }
        OpCode::Mul => {
            let (a, b, _) = binary()?;
            a.wrapping_mul(b) & mask
        }
        OpCode::Fdiv => {
            let (a, b, _) = binary()?;
            float(a, b, |x, y| x / y)
        }
        OpCode::Sdiv | OpCode::Smod if mt.is_float() => {
            let (a, b, _) = binary()?;
            if op == OpCode::Sdiv {
                float(a, b, |x, y| x / y)
            } else {
                float(a, b, |x, y| x % y)
            }
        }
        OpCode::Sdiv | OpCode::Smod => {
            let (a, b, _) = binary()?;
            let (x, y) = (signed(a, mt), signed(b, mt));
            let r = match (y, op) {
                (0, _) => 0,
                (_, OpCode::Sdiv) => x.wrapping_div(y),
                _ => x.wrapping_rem(y),
            };
            (r as u64) & mask
        }
        OpCode::And => {
            let (a, b, _) = binary()?;
            a & b & mask
        }
        OpCode::Or => {
            let (a, b, _) = binary()?;
            (a | b) & mask
        }
        OpCode::Xor => {
            let (a, b, _) = binary()?;
            (a ^ b) & mask
        }
        OpCode::Lsl => {
            let (a, b, _) = binary()?;
            (a << shift_amount(b, mt)) & mask
        }
        OpCode::Lsr => {
            let (a, b, _) = binary()?;
            (a & mask) >> shift_amount(b, mt)
        }
        OpCode::Asr => {
            let (a, b, _) = binary()?;
            ((signed(a, mt) >> shift_amount(b, mt)) as u64) & mask
        }
        OpCode::Icmp(cond) => {
            let (a, b, amt) = binary()?;
            let (sa, sb) = (signed(a, amt), signed(b, amt));
            let (ua, ub) = (a & amt.mask(), b & amt.mask());
            u64::from(match cond {
                ICmpCond::Eq => ua == ub,
                ICmpCond::Ne => ua != ub,
                ICmpCond::Slt => sa < sb,
                ICmpCond::Sle => sa <= sb,
                ICmpCond::Sgt => sa > sb,
                ICmpCond::Sge => sa >= sb,
                ICmpCond::Ult => ua < ub,
                ICmpCond::Ule => ua <= ub,
                ICmpCond::Ugt => ua > ub,
                ICmpCond::Uge => ua >= ub,
            })
        }
        OpCode::Fcmp(cond) => {
            let (a, b, amt) = binary()?;
            let (x, y) = (to_f64(a, amt), to_f64(b, amt));
            let unordered = x.is_nan() || y.is_nan();
            u64::from(match cond {
                FCmpCond::Oeq => x == y,
                FCmpCond::One => !unordered && x != y,
                FCmpCond::Olt => x < y,
                FCmpCond::Ole => x <= y,
                FCmpCond::Ogt => x > y,
                FCmpCond::Oge => x >= y,
                FCmpCond::Ueq => unordered || x == y,
                FCmpCond::Une => x != y,
                FCmpCond::Uno => unordered,
                FCmpCond::Ord => !unordered,
            })
        }
        OpCode::Select => match inputs {
            [(cond, _), (a, _), (b, _)] => {
                if *cond != 0 {
                    *a
                } else {
                    *b
                }
            }
            _ => return Err(KilnError::Unsupported(format!("{op} expects three operands"))),
        },
        OpCode::Zext => {
            let (a, amt) = unary()?;
            a & amt.mask() & mask
        }
        OpCode::Sext => {
            let (a, amt) = unary()?;
            (signed(a, amt) as u64) & mask
        }
        OpCode::Trunc => {
            let (a, _) = unary()?;
            a & mask
        }
        OpCode::SignedIntToFloat => {
            let (a, amt) = unary()?;
            from_f64(signed(a, amt) as f64, mt)
        }
        OpCode::FloatToSignedInt => {
            let (a, amt) = unary()?;
            let x = to_f64(a, amt);
            if mt.bits() == 64 {
                x as i64 as u64
            } else {
                (x as i32 as u64) & mask
            }
        }
        OpCode::Bitcast => {
            let (a, _) = unary()?;
            a & mask
        }
        OpCode::FExt => {
            let (a, amt) = unary()?;
            from_f64(to_f64(a, amt), mt)
        }
        OpCode::FTrunc => {
            let (a, amt) = unary()?;
            from_f64(to_f64(a, amt), MachineType::F32)
        }
        _ => return Err(KilnError::Unsupported(format!("{op} is not a pure operation"))),
    })
}

// =============================================================================
// Bailout
// =============================================================================

/// Run `optimized`; if a guard fails, continue in `generic` from the failed
/// guard's frame state.
///
/// The generic circuit starts at the guarded instruction with the captured
/// registers, accumulator and environment, so the instructions that already
/// ran in optimized code are not repeated.
///
/// # Errors
///
/// See [`Interpreter::run`] and [`Interpreter::resume_at`].
pub fn execute_with_bailout(
    thread: &mut JsThread,
    optimized: &Circuit,
    generic: &Circuit,
    info: &CallInfo,
) -> KilnResult<Outcome> {
    let mut interpreter = Interpreter::new(thread);
    match interpreter.run(optimized, info)? {
        Outcome::Deopt { reason, bc_offset, frame } => {
            debug!(circuit = optimized.name(), %reason, bc_offset, "bailing out to generic code");
            interpreter.resume_at(generic, info, bc_offset, &frame)
        }
        outcome => Ok(outcome),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::ir::{BytecodeBuilder, GateType};
    use crate::lowering::{LoweringPass, SlowPathLowering, TsTypeLowering, TypeLowering};

    fn binary(op: EcmaOpcode, ty: GateType) -> Circuit {
        let mut circuit = Circuit::for_function("f", 2, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let (a, b) = (bc.param(0), bc.param(1));
        bc.set_type(a, ty);
        bc.set_type(b, ty);
        let r = bc.emit(op, &[a, b]);
        bc.ret(r);
        circuit
    }

    fn typed(mut circuit: Circuit) -> Circuit {
        TsTypeLowering::default().run(&mut circuit).unwrap();
        TypeLowering::new().run(&mut circuit).unwrap();
        SlowPathLowering::new().run(&mut circuit).unwrap();
        circuit
    }

    fn call(thread: &mut JsThread, circuit: &Circuit, args: &[TaggedValue]) -> Outcome {
        let info = CallInfo::new(TaggedValue::UNDEFINED, TaggedValue::UNDEFINED, args);
        Interpreter::new(thread).run(circuit, &info).unwrap()
    }

    #[test]
    fn test_pure_int_ops_wrap() {
        let i32t = MachineType::I32;
        let max = u64::from(i32::MAX as u32);
        assert_eq!(eval_pure(OpCode::Add, i32t, &[(max, i32t), (1, i32t)]).unwrap(), 0x8000_0000);
        assert_eq!(eval_pure(OpCode::Sdiv, i32t, &[(7, i32t), (0, i32t)]).unwrap(), 0);
        let minus7 = u64::from((-7i32) as u32);
        let r = eval_pure(OpCode::Smod, i32t, &[(minus7, i32t), (3, i32t)]).unwrap();
        assert_eq!(r as u32 as i32, -1);
        let lt = eval_pure(OpCode::Icmp(ICmpCond::Slt), MachineType::I1, &[(minus7, i32t), (3, i32t)]).unwrap();
        assert_eq!(lt, 1);
    }

    #[test]
    fn test_pure_float_ops() {
        let f = MachineType::F64;
        let r = eval_pure(OpCode::Smod, f, &[(5.5f64.to_bits(), f), (2.0f64.to_bits(), f)]).unwrap();
        assert_eq!(f64::from_bits(r), 1.5);
        let nan = f64::NAN.to_bits();
        let uno = eval_pure(OpCode::Fcmp(FCmpCond::Uno), MachineType::I1, &[(nan, f), (nan, f)]).unwrap();
        assert_eq!(uno, 1);
        let conv = eval_pure(OpCode::FloatToSignedInt, MachineType::I32, &[(1e20f64.to_bits(), f)]).unwrap();
        assert_eq!(conv as u32 as i32, i32::MAX);
    }

    #[test]
    fn test_generic_add_runs_through_runtime() {
        let mut thread = JsThread::new().unwrap();
        let circuit = binary(EcmaOpcode::Add2, GateType::Any);
        let outcome = call(&mut thread, &circuit, &[TaggedValue::int(2), TaggedValue::int(3)]);
        assert_eq!(outcome, Outcome::Return(TaggedValue::int(5)));
    }

    #[test]
    fn test_typed_add_matches_generic() {
        let mut thread = JsThread::new().unwrap();
        let generic = binary(EcmaOpcode::Add2, GateType::Int);
        let optimized = typed(binary(EcmaOpcode::Add2, GateType::Int));
        let args = [TaggedValue::int(40), TaggedValue::int(2)];
        let expected = call(&mut thread, &generic, &args);
        assert_eq!(call(&mut thread, &optimized, &args), expected);
    }

    #[test]
    fn test_failed_guard_deopts() {
        let mut thread = JsThread::new().unwrap();
        let optimized = typed(binary(EcmaOpcode::Add2, GateType::Int));
        let outcome = call(&mut thread, &optimized, &[TaggedValue::double(0.5), TaggedValue::int(2)]);
        match outcome {
            Outcome::Deopt { reason, .. } => assert_eq!(reason, DeoptType::NotInt),
            other => panic!("expected deopt, got {other:?}"),
        }
    }

    /// `f(a, b, cb) { cb(); return a + b }` with int feedback on `a` and `b`.
    fn call_then_add() -> Circuit {
        let mut circuit = Circuit::for_function("f", 3, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let (a, b, cb) = (bc.param(0), bc.param(1), bc.param(2));
        bc.set_type(a, GateType::Int);
        bc.set_type(b, GateType::Int);
        bc.emit(EcmaOpcode::CallArg0, &[cb]);
        let r = bc.emit(EcmaOpcode::Add2, &[a, b]);
        bc.ret(r);
        circuit
    }

    #[test]
    fn test_bailout_resumes_generic() {
        let mut thread = JsThread::new().unwrap();
        let generic = binary(EcmaOpcode::Add2, GateType::Int);
        let optimized = typed(binary(EcmaOpcode::Add2, GateType::Int));
        let info = CallInfo::new(
            TaggedValue::UNDEFINED,
            TaggedValue::UNDEFINED,
            &[TaggedValue::double(0.5), TaggedValue::int(2)],
        );
        let outcome = execute_with_bailout(&mut thread, &optimized, &generic, &info).unwrap();
        assert_eq!(outcome, Outcome::Return(TaggedValue::double(2.5)));
    }

    #[test]
    fn test_bailout_runs_earlier_calls_once() {
        let mut thread = JsThread::new().unwrap();
        let calls = Rc::new(Cell::new(0u32));
        let seen = Rc::clone(&calls);
        let cb = thread
            .new_native_function(
                "count",
                0,
                Rc::new(move |_: &mut JsThread, _: &CallInfo| {
                    seen.set(seen.get() + 1);
                    TaggedValue::UNDEFINED
                }),
            )
            .unwrap();
        let generic = call_then_add();
        let optimized = typed(call_then_add());
        let args = [TaggedValue::double(1.5), TaggedValue::int(1), cb];
        let info = CallInfo::new(TaggedValue::UNDEFINED, TaggedValue::UNDEFINED, &args);

        match Interpreter::new(&mut thread).run(&optimized, &info).unwrap() {
            Outcome::Deopt { reason, frame, .. } => {
                assert_eq!(reason, DeoptType::NotInt);
                assert_eq!(frame.len(), 2);
            }
            other => panic!("expected deopt, got {other:?}"),
        }
        assert_eq!(calls.get(), 1);

        calls.set(0);
        let outcome = execute_with_bailout(&mut thread, &optimized, &generic, &info).unwrap();
        assert_eq!(outcome, Outcome::Return(TaggedValue::double(2.5)));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_resume_rejects_unknown_offset() {
        let mut thread = JsThread::new().unwrap();
        let generic = binary(EcmaOpcode::Add2, GateType::Int);
        let info = CallInfo::new(TaggedValue::UNDEFINED, TaggedValue::UNDEFINED, &[]);
        let frame = [TaggedValue::UNDEFINED, TaggedValue::UNDEFINED];
        let err = Interpreter::new(&mut thread)
            .resume_at(&generic, &info, 40, &frame)
            .unwrap_err();
        assert!(matches!(err, KilnError::Execution(_)));
    }

    #[test]
    fn test_uncaught_throw() {
        let mut thread = JsThread::new().unwrap();
        let mut circuit = Circuit::for_function("f", 1, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let v = bc.param(0);
        bc.emit(EcmaOpcode::Throw, &[v]);
        bc.ret_undefined();
        let outcome = call(&mut thread, &circuit, &[TaggedValue::int(9)]);
        assert_eq!(outcome, Outcome::Threw(TaggedValue::int(9)));
        assert!(!thread.has_pending_exception());
    }

    #[test]
    fn test_step_limit_stops_infinite_loop() {
        let mut thread = JsThread::new().unwrap();
        let mut circuit = Circuit::for_function("spin", 0, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let header = bc.loop_header();
        bc.loop_back(header, 2);
        let info = CallInfo::new(TaggedValue::UNDEFINED, TaggedValue::UNDEFINED, &[]);
        let err = Interpreter::new(&mut thread)
            .with_step_limit(100)
            .run(&circuit, &info)
            .unwrap_err();
        assert!(matches!(err, KilnError::Execution(_)));
    }
}
