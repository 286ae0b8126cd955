//! Lowering Pipeline Benchmarks
//!
//! Measures the cost of the lowering passes and of running their output.
//!
//! # Benchmark Categories
//!
//! 1. **Pipeline**: typed and generic lowering of straight-line arithmetic
//! 2. **Stubs**: building a builtin stub circuit from scratch
//! 3. **Execution**: typed code against the generic path in the interpreter

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kiln_core::TaggedValue;
use kiln_jit::exec::Interpreter;
use kiln_jit::ir::{BytecodeBuilder, Circuit, EcmaOpcode, GateType};
use kiln_jit::pipeline::{lower, lower_generic};
use kiln_jit::stubs::build_stub;
use kiln_runtime::{BuiltinId, CallInfo, JsThread};

// =============================================================================
// Benchmark Helpers
// =============================================================================

const OPS: [EcmaOpcode; 4] = [EcmaOpcode::Add2, EcmaOpcode::Sub2, EcmaOpcode::Mul2, EcmaOpcode::Mod2];

/// A chain of `n` binary operations over two parameters of type `ty`.
fn arithmetic_chain(n: usize, ty: GateType) -> Circuit {
    let mut circuit = Circuit::for_function("chain", 2, 0);
    let mut bc = BytecodeBuilder::new(&mut circuit);
    let (a, b) = (bc.param(0), bc.param(1));
    bc.set_type(a, ty);
    bc.set_type(b, ty);
    let mut acc = a;
    for i in 0..n {
        acc = bc.emit_typed(OPS[i % OPS.len()], &[acc, b], ty);
    }
    bc.ret(acc);
    circuit
}

// =============================================================================
// Pipeline Benchmarks
// =============================================================================

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");

    for n in [8, 64, 256] {
        group.throughput(Throughput::Elements(n as u64));

        group.bench_with_input(BenchmarkId::new("typed_int", n), &n, |b, &n| {
            b.iter_batched(
                || arithmetic_chain(n, GateType::Int),
                |mut circuit| black_box(lower(&mut circuit)),
                criterion::BatchSize::SmallInput,
            )
        });

        group.bench_with_input(BenchmarkId::new("generic", n), &n, |b, &n| {
            b.iter_batched(
                || arithmetic_chain(n, GateType::Any),
                |mut circuit| black_box(lower_generic(&mut circuit)),
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

// =============================================================================
// Stub Benchmarks
// =============================================================================

fn bench_stub_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("stub_build");

    for id in [BuiltinId::CharCodeAt, BuiltinId::IndexOf, BuiltinId::ArrayListForEach] {
        group.bench_function(id.name(), |b| b.iter(|| black_box(build_stub(id))));
    }

    group.finish();
}

// =============================================================================
// Execution Benchmarks
// =============================================================================

fn bench_execution(c: &mut Criterion) {
    let mut group = c.benchmark_group("execution");
    let args = [TaggedValue::int(1_000), TaggedValue::int(7)];
    let info = CallInfo::new(TaggedValue::UNDEFINED, TaggedValue::UNDEFINED, &args);

    let mut typed = arithmetic_chain(64, GateType::Int);
    lower(&mut typed).expect("typed chain lowers");
    let generic = arithmetic_chain(64, GateType::Any);

    group.bench_function("typed_chain", |b| {
        let mut thread = JsThread::new().expect("thread");
        b.iter(|| black_box(Interpreter::new(&mut thread).run(&typed, &info)))
    });

    group.bench_function("generic_chain", |b| {
        let mut thread = JsThread::new().expect("thread");
        b.iter(|| black_box(Interpreter::new(&mut thread).run(&generic, &info)))
    });

    group.finish();
}

criterion_group!(benches, bench_pipeline, bench_stub_build, bench_execution);
criterion_main!(benches);
