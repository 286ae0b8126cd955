//! Lowering pipeline.
//!
//! Sequences the lowering passes over one function circuit and keeps
//! per-pass statistics.
//!
//! # Pass Phases
//!
//! 1. **Type feedback**: [`TsTypeLowering`]
//! 2. **Type**: [`TypeLowering`] (builtins through `BuiltinLowering`)
//! 3. **Slow path**: [`SlowPathLowering`]
//!
//! The first two phases run together or not at all: typed HIR left behind
//! by type-feedback lowering has no slow-path form.

use std::time::{Duration, Instant};

use tracing::{info, info_span};

use kiln_core::{CompilerConfig, KilnError, KilnResult};

use crate::ir::{verify, verify_guard, Circuit};
use crate::lowering::{log_circuit, LoweringPass, SlowPathLowering, TsTypeLowering, TypeLowering};
use crate::type_info::TypeInfo;

// =============================================================================
// Pass Phase
// =============================================================================

/// Phase of the lowering pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PassPhase {
    /// Bytecodes with sound operand types become typed HIR.
    TypeFeedback,
    /// Typed HIR becomes machine gates.
    Type,
    /// Everything left becomes calls.
    SlowPath,
}

// =============================================================================
// Pass Entry
// =============================================================================

/// A registered pass in the pipeline.
struct PassEntry {
    pass: Box<dyn LoweringPass + Send>,
    phase: PassPhase,
    enabled: bool,
    runs: usize,
    changes: usize,
    time: Duration,
}

impl PassEntry {
    fn new<P: LoweringPass + Send + 'static>(pass: P, phase: PassPhase) -> Self {
        Self {
            pass: Box::new(pass),
            phase,
            enabled: true,
            runs: 0,
            changes: 0,
            time: Duration::ZERO,
        }
    }
}

// =============================================================================
// Pipeline Configuration
// =============================================================================

/// Configuration for the lowering pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Run type-feedback and type lowering.
    pub type_lowering: bool,

    /// Inline recognized builtins during type lowering.
    pub builtin_lowering: bool,

    /// Verify the circuit after every pass.
    pub verify: bool,

    /// Dump the circuit after every pass.
    pub log_compiler: bool,

    /// Trace each bytecode the slow path lowers.
    pub trace_bytecode: bool,

    /// Report specialized functions to the profiler.
    pub profiling: bool,

    /// Collect timing statistics.
    pub collect_timing: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&CompilerConfig::default())
    }
}

impl From<&CompilerConfig> for PipelineConfig {
    fn from(config: &CompilerConfig) -> Self {
        Self {
            type_lowering: config.type_lowering,
            builtin_lowering: config.builtin_lowering,
            verify: config.verify,
            log_compiler: config.log_compiler,
            trace_bytecode: config.trace_bytecode,
            profiling: config.profiling,
            collect_timing: true,
        }
    }
}

impl PipelineConfig {
    /// Slow path only: every bytecode becomes a call.
    #[must_use]
    pub fn generic() -> Self {
        Self {
            type_lowering: false,
            builtin_lowering: false,
            collect_timing: false,
            ..Self::default()
        }
    }

    /// Every pass, verified after each one.
    #[must_use]
    pub fn checked() -> Self {
        Self {
            verify: true,
            ..Self::default()
        }
    }
}

// =============================================================================
// Lowering Pipeline
// =============================================================================

/// The lowering pipeline for one compilation job.
pub struct LoweringPipeline {
    config: PipelineConfig,
    passes: Vec<PassEntry>,
    total_time: Duration,
}

impl LoweringPipeline {
    /// Pipeline with the default configuration and no recorded types.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    /// Pipeline with a custom configuration and no recorded types.
    #[must_use]
    pub fn with_config(config: PipelineConfig) -> Self {
        Self::with_type_info(config, TypeInfo::new())
    }

    /// Pipeline specializing property access and `new` against `type_info`.
    #[must_use]
    pub fn with_type_info(config: PipelineConfig, type_info: TypeInfo) -> Self {
        let mut pipeline = Self {
            config,
            passes: Vec::new(),
            total_time: Duration::ZERO,
        };
        pipeline.register_default_passes(type_info);
        pipeline
    }

    fn register_default_passes(&mut self, type_info: TypeInfo) {
        if self.config.type_lowering {
            let ts = TsTypeLowering::new(type_info).with_profiling(self.config.profiling);
            self.register(ts, PassPhase::TypeFeedback);
            let ty = TypeLowering::new().with_builtin_lowering(self.config.builtin_lowering);
            self.register(ty, PassPhase::Type);
        }
        let slow = SlowPathLowering::new().with_trace_bytecode(self.config.trace_bytecode);
        self.register(slow, PassPhase::SlowPath);
    }

    /// Register a custom pass; it runs after the built-in passes of its
    /// phase.
    pub fn register<P: LoweringPass + Send + 'static>(&mut self, pass: P, phase: PassPhase) {
        let at = self.passes.iter().position(|e| e.phase > phase).unwrap_or(self.passes.len());
        self.passes.insert(at, PassEntry::new(pass, phase));
    }

    /// Enable or disable a registered pass by name.
    ///
    /// Disabling type-feedback lowering alone is fine; disabling type
    /// lowering while type-feedback lowering runs leaves typed HIR behind,
    /// which the slow path rejects.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        let mut found = false;
        for entry in self.passes.iter_mut().filter(|e| e.pass.name() == name) {
            entry.enabled = enabled;
            found = true;
        }
        found
    }

    /// Configuration in effect.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Lower `circuit` to machine gates.
    ///
    /// # Errors
    ///
    /// Propagates the first pass or verification failure; the circuit is
    /// left in whatever state the failing pass produced.
    pub fn run(&mut self, circuit: &mut Circuit) -> KilnResult<PipelineStats> {
        let span = info_span!("lowering", circuit = circuit.name());
        let _enter = span.enter();
        let start = Instant::now();
        let mut stats = PipelineStats {
            initial_size: circuit.gate_count(),
            ..PipelineStats::default()
        };

        if self.config.verify {
            verify(circuit)?;
        }
        log_circuit(circuit, "bytecode", self.config.log_compiler);

        for entry in self.passes.iter_mut().filter(|e| e.enabled) {
            let pass_start = self.config.collect_timing.then(Instant::now);
            let lowered = entry.pass.run(circuit)?;
            let elapsed = pass_start.map(|s| s.elapsed());
            if let Some(elapsed) = elapsed {
                entry.time += elapsed;
            }
            entry.runs += 1;
            if lowered > 0 {
                entry.changes += 1;
            }
            stats.passes_run += 1;
            stats.gates_lowered += lowered;
            info!(pass = entry.pass.name(), lowered, elapsed = ?elapsed, "pass finished");

            log_circuit(circuit, entry.pass.name(), self.config.log_compiler);
            if self.config.verify {
                verify(circuit)?;
                if entry.phase == PassPhase::TypeFeedback {
                    let offenders = verify_guard(circuit);
                    if !offenders.is_empty() {
                        return Err(KilnError::Verification(format!(
                            "{} bytecodes still depend on a state split",
                            offenders.len()
                        )));
                    }
                }
            }
        }

        self.total_time += start.elapsed();
        stats.total_time = start.elapsed();
        stats.final_size = circuit.gate_count();
        Ok(stats)
    }

    /// Per-pass statistics accumulated over every run.
    #[must_use]
    pub fn pass_stats(&self) -> Vec<PassStat> {
        self.passes
            .iter()
            .map(|e| PassStat {
                name: e.pass.name(),
                phase: e.phase,
                enabled: e.enabled,
                runs: e.runs,
                changes: e.changes,
                time: e.time,
            })
            .collect()
    }

    /// Total time spent over every run.
    #[inline]
    #[must_use]
    pub fn total_time(&self) -> Duration {
        self.total_time
    }
}

impl Default for LoweringPipeline {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics for one registered pass.
#[derive(Debug, Clone)]
pub struct PassStat {
    /// Pass name.
    pub name: &'static str,
    /// Pass phase.
    pub phase: PassPhase,
    /// Whether the pass is enabled.
    pub enabled: bool,
    /// Number of times run.
    pub runs: usize,
    /// Number of runs that lowered anything.
    pub changes: usize,
    /// Total time spent in this pass.
    pub time: Duration,
}

/// Statistics from one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Passes run.
    pub passes_run: usize,
    /// Gates lowered over all passes.
    pub gates_lowered: usize,
    /// Time spent.
    pub total_time: Duration,
    /// Gate count before lowering.
    pub initial_size: usize,
    /// Gate count after lowering.
    pub final_size: usize,
}

impl PipelineStats {
    /// Final over initial gate count.
    #[must_use]
    pub fn growth(&self) -> f64 {
        if self.initial_size == 0 {
            1.0
        } else {
            self.final_size as f64 / self.initial_size as f64
        }
    }
}

// =============================================================================
// Quick Lowering Functions
// =============================================================================

/// Lower with the default configuration.
///
/// # Errors
///
/// See [`LoweringPipeline::run`].
pub fn lower(circuit: &mut Circuit) -> KilnResult<PipelineStats> {
    LoweringPipeline::new().run(circuit)
}

/// Lower through the slow path only.
///
/// # Errors
///
/// See [`LoweringPipeline::run`].
pub fn lower_generic(circuit: &mut Circuit) -> KilnResult<PipelineStats> {
    LoweringPipeline::with_config(PipelineConfig::generic()).run(circuit)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BytecodeBuilder, CallTarget, EcmaOpcode, GateType, OpCode};
    use kiln_runtime::CommonStubId;

    fn count(circuit: &Circuit, pred: impl Fn(OpCode) -> bool) -> usize {
        circuit.all_gates().into_iter().filter(|&g| pred(circuit.opcode(g))).count()
    }

    fn add(a_type: GateType, b_type: GateType) -> Circuit {
        let mut circuit = Circuit::for_function("add", 2, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let (a, b) = (bc.param(0), bc.param(1));
        bc.set_type(a, a_type);
        bc.set_type(b, b_type);
        let sum = bc.emit(EcmaOpcode::Add2, &[a, b]);
        bc.ret(sum);
        circuit
    }

    #[test]
    fn test_pass_phase_ordering() {
        assert!(PassPhase::TypeFeedback < PassPhase::Type);
        assert!(PassPhase::Type < PassPhase::SlowPath);
    }

    #[test]
    fn test_config_follows_compiler_config() {
        let compiler = CompilerConfig {
            builtin_lowering: false,
            verify: true,
            ..CompilerConfig::default()
        };
        let config = PipelineConfig::from(&compiler);
        assert!(config.type_lowering);
        assert!(!config.builtin_lowering);
        assert!(config.verify);
    }

    #[test]
    fn test_default_registers_three_passes() {
        let pipeline = LoweringPipeline::new();
        let names: Vec<_> = pipeline.pass_stats().iter().map(|s| s.name).collect();
        assert_eq!(names, ["ts_type_lowering", "type_lowering", "slow_path_lowering"]);
    }

    #[test]
    fn test_generic_registers_slow_path_only() {
        let pipeline = LoweringPipeline::with_config(PipelineConfig::generic());
        assert_eq!(pipeline.pass_stats().len(), 1);
    }

    #[test]
    fn test_typed_add_is_inline() {
        let mut circuit = add(GateType::Int, GateType::Int);
        let stats = LoweringPipeline::with_config(PipelineConfig::checked())
            .run(&mut circuit)
            .unwrap();
        assert_eq!(stats.passes_run, 3);
        assert!(stats.gates_lowered > 0);
        assert_eq!(count(&circuit, OpCode::is_hir), 0);
        let stub_add = OpCode::Call(CallTarget::Common(CommonStubId::Add));
        assert_eq!(count(&circuit, |op| op == stub_add), 0);
    }

    #[test]
    fn test_generic_add_calls_common_stub() {
        let mut circuit = add(GateType::Int, GateType::Int);
        lower_generic(&mut circuit).unwrap();
        let stub_add = OpCode::Call(CallTarget::Common(CommonStubId::Add));
        assert_eq!(count(&circuit, |op| op == stub_add), 1);
    }

    #[test]
    fn test_disabled_pass_is_skipped() {
        let mut circuit = add(GateType::Int, GateType::Int);
        let mut pipeline = LoweringPipeline::with_config(PipelineConfig::checked());
        assert!(pipeline.set_enabled("ts_type_lowering", false));
        assert!(!pipeline.set_enabled("no_such_pass", false));
        let stats = pipeline.run(&mut circuit).unwrap();
        assert_eq!(stats.passes_run, 2);
        let stub_add = OpCode::Call(CallTarget::Common(CommonStubId::Add));
        assert_eq!(count(&circuit, |op| op == stub_add), 1);
    }

    #[test]
    fn test_pass_stats_accumulate() {
        let mut pipeline = LoweringPipeline::new();
        for _ in 0..2 {
            let mut circuit = add(GateType::Any, GateType::Any);
            pipeline.run(&mut circuit).unwrap();
        }
        let stats = pipeline.pass_stats();
        assert!(stats.iter().all(|s| s.runs == 2));
        let slow = stats.iter().find(|s| s.phase == PassPhase::SlowPath).unwrap();
        assert_eq!(slow.changes, 2);
    }

    #[test]
    fn test_growth() {
        let stats = PipelineStats {
            initial_size: 10,
            final_size: 25,
            ..Default::default()
        };
        assert_eq!(stats.growth(), 2.5);
        assert_eq!(PipelineStats::default().growth(), 1.0);
    }
}
