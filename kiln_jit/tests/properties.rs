//! End-to-end behavior of lowered circuits and builtin stubs, checked by
//! running them against the runtime.

use std::cell::Cell;
use std::rc::Rc;

use proptest::prelude::*;

use kiln_core::{DeoptType, TaggedValue};
use kiln_jit::exec::{execute_with_bailout, Interpreter, Outcome};
use kiln_jit::ir::{BytecodeBuilder, Circuit, EcmaOpcode, GateType};
use kiln_jit::pipeline::{lower, lower_generic};
use kiln_runtime::layout::{arguments, primitive_ref};
use kiln_runtime::{BuiltinId, CallInfo, ConstantIndex, ContainerKind, GlobalEnvField, JsThread, JsType};

// =============================================================================
// Helpers
// =============================================================================

/// `f(a, b) { return a OP b }` with typed parameters.
fn binary(op: EcmaOpcode, left: GateType, right: GateType) -> Circuit {
    let mut circuit = Circuit::for_function("f", 2, 0);
    let mut bc = BytecodeBuilder::new(&mut circuit);
    let (a, b) = (bc.param(0), bc.param(1));
    bc.set_type(a, left);
    bc.set_type(b, right);
    let r = bc.emit(op, &[a, b]);
    bc.ret(r);
    circuit
}

fn optimized(op: EcmaOpcode, left: GateType, right: GateType) -> Circuit {
    let mut circuit = binary(op, left, right);
    lower(&mut circuit).unwrap();
    circuit
}

fn info(this: TaggedValue, args: &[TaggedValue]) -> CallInfo {
    CallInfo::new(TaggedValue::UNDEFINED, this, args)
}

fn run(thread: &mut JsThread, circuit: &Circuit, args: &[TaggedValue]) -> Outcome {
    Interpreter::new(thread).run(circuit, &info(TaggedValue::UNDEFINED, args)).unwrap()
}

fn returned(outcome: Outcome) -> TaggedValue {
    match outcome {
        Outcome::Return(value) => value,
        other => panic!("expected a return, got {other:?}"),
    }
}

fn number_mod(a: f64, b: f64) -> TaggedValue {
    let mut thread = JsThread::new().unwrap();
    let circuit = optimized(EcmaOpcode::Mod2, GateType::Number, GateType::Number);
    returned(run(&mut thread, &circuit, &[TaggedValue::number(a), TaggedValue::number(b)]))
}

fn call_builtin(thread: &mut JsThread, id: BuiltinId, this: TaggedValue, args: &[TaggedValue]) -> TaggedValue {
    let mut interpreter = Interpreter::new(thread);
    returned(interpreter.call_builtin(id, &info(this, args)).unwrap())
}

// =============================================================================
// Modulo
// =============================================================================

#[test]
fn test_mod_edge_cases() {
    assert!(number_mod(5.0, 0.0).as_number().is_nan());
    assert_eq!(number_mod(5.0, f64::INFINITY), TaggedValue::int(5));
    assert_eq!(number_mod(0.0, 3.0), TaggedValue::int(0));
    assert!(number_mod(f64::NAN, 3.0).as_number().is_nan());
    assert_eq!(number_mod(5.5, 2.0), TaggedValue::double(1.5));
}

#[test]
fn test_int_mod_stays_inline() {
    let mut thread = JsThread::new().unwrap();
    let circuit = optimized(EcmaOpcode::Mod2, GateType::Int, GateType::Int);
    let mut interpreter = Interpreter::new(&mut thread);
    let outcome = interpreter
        .run(&circuit, &info(TaggedValue::UNDEFINED, &[TaggedValue::int(7), TaggedValue::int(3)]))
        .unwrap();
    assert_eq!(outcome, Outcome::Return(TaggedValue::int(1)));
    assert_eq!(interpreter.call_count("Mod"), 0);
    assert_eq!(interpreter.call_count("FloatMod"), 0);
    assert_eq!(thread.stub_count("Mod"), 0);
}

#[test]
fn test_int_mod_by_zero_is_nan() {
    let mut thread = JsThread::new().unwrap();
    let circuit = optimized(EcmaOpcode::Mod2, GateType::Int, GateType::Int);
    let r = returned(run(&mut thread, &circuit, &[TaggedValue::int(5), TaggedValue::int(0)]));
    assert!(r.as_number().is_nan());
}

#[test]
fn test_generic_mod_calls_common_stub() {
    let mut thread = JsThread::new().unwrap();
    let circuit = binary(EcmaOpcode::Mod2, GateType::Any, GateType::Any);
    let mut interpreter = Interpreter::new(&mut thread);
    let outcome = interpreter
        .run(&circuit, &info(TaggedValue::UNDEFINED, &[TaggedValue::int(7), TaggedValue::int(3)]))
        .unwrap();
    assert_eq!(outcome, Outcome::Return(TaggedValue::int(1)));
    assert_eq!(interpreter.call_count("Mod"), 1);
    assert_eq!(interpreter.call_count("Mod2"), 0);
}

// =============================================================================
// Division
// =============================================================================

fn divide(left: GateType, right: GateType, a: TaggedValue, b: TaggedValue) -> TaggedValue {
    let mut thread = JsThread::new().unwrap();
    let circuit = optimized(EcmaOpcode::Div2, left, right);
    returned(run(&mut thread, &circuit, &[a, b]))
}

#[test]
fn test_double_division_by_zero() {
    let d = |x: f64, y: f64| divide(GateType::Double, GateType::Double, TaggedValue::double(x), TaggedValue::double(y));
    assert_eq!(d(3.5, 0.0).as_number(), f64::INFINITY);
    assert_eq!(d(-3.5, 0.0).as_number(), f64::NEG_INFINITY);
    assert_eq!(d(3.5, -0.0).as_number(), f64::NEG_INFINITY);
    assert_eq!(d(-3.5, -0.0).as_number(), f64::INFINITY);
    assert!(d(0.0, 0.0).as_number().is_nan());
    assert!(d(f64::NAN, 0.0).as_number().is_nan());
    assert_eq!(d(7.5, 2.5).as_number(), 3.0);
}

#[test]
fn test_number_division_keeps_exact_ints() {
    let n = |x: f64, y: f64| divide(GateType::Number, GateType::Number, TaggedValue::number(x), TaggedValue::number(y));
    assert_eq!(n(12.0, 4.0), TaggedValue::int(3));
    assert_eq!(n(7.0, 2.0), TaggedValue::double(3.5));
    assert_eq!(n(-4.0, 0.0).as_number(), f64::NEG_INFINITY);
    assert!(n(0.0, 0.0).as_number().is_nan());
    assert_eq!(n(4.5, 1.5), TaggedValue::int(3));
}

#[test]
fn test_number_add_stays_int() {
    let mut thread = JsThread::new().unwrap();
    let circuit = optimized(EcmaOpcode::Add2, GateType::Number, GateType::Number);
    let r = returned(run(&mut thread, &circuit, &[TaggedValue::int(2), TaggedValue::int(3)]));
    assert_eq!(r, TaggedValue::int(5));
    let r = returned(run(&mut thread, &circuit, &[TaggedValue::int(i32::MAX), TaggedValue::int(1)]));
    assert_eq!(r, TaggedValue::double(f64::from(i32::MAX) + 1.0));
    let r = returned(run(&mut thread, &circuit, &[TaggedValue::double(0.5), TaggedValue::int(2)]));
    assert_eq!(r, TaggedValue::double(2.5));
}

// =============================================================================
// Generic Operators
// =============================================================================

/// `f(x) { return OP x }` through the generic pipeline.
fn generic_unary(op: EcmaOpcode) -> Circuit {
    let mut circuit = Circuit::for_function("f", 1, 0);
    let mut bc = BytecodeBuilder::new(&mut circuit);
    let x = bc.param(0);
    let r = bc.emit(op, &[x]);
    bc.ret(r);
    lower_generic(&mut circuit).unwrap();
    circuit
}

#[test]
fn test_inline_strict_equal() {
    let mut thread = JsThread::new().unwrap();
    let mut circuit = binary(EcmaOpcode::StrictEq, GateType::Any, GateType::Any);
    lower_generic(&mut circuit).unwrap();
    let ab = thread.new_string_from_utf16(&[0x61, 0x62]).unwrap();
    let other_ab = thread.new_string_from_utf16(&[0x61, 0x62]).unwrap();
    let nan = TaggedValue::double(f64::NAN);
    let cases = [
        (TaggedValue::int(1), TaggedValue::double(1.0), true),
        (nan, nan, false),
        (TaggedValue::TRUE, TaggedValue::TRUE, true),
        (TaggedValue::UNDEFINED, TaggedValue::NULL, false),
        (ab, TaggedValue::int(1), false),
        (ab, other_ab, true),
    ];
    for (a, b, expected) in cases {
        let r = returned(run(&mut thread, &circuit, &[a, b]));
        assert_eq!(r, TaggedValue::boolean(expected), "{a:?} === {b:?}");
    }
    // Only the string pair reached the runtime.
    assert_eq!(thread.stub_count("StrictEq"), 1);
}

#[test]
fn test_inline_to_number_keeps_numbers() {
    let mut thread = JsThread::new().unwrap();
    let circuit = generic_unary(EcmaOpcode::ToNumber);
    assert_eq!(returned(run(&mut thread, &circuit, &[TaggedValue::int(4)])), TaggedValue::int(4));
    assert_eq!(thread.stub_count("ToNumber"), 0);
    assert_eq!(returned(run(&mut thread, &circuit, &[TaggedValue::TRUE])).as_number(), 1.0);
    assert_eq!(thread.stub_count("ToNumber"), 1);
}

#[test]
fn test_inline_type_of_matches_runtime() {
    let mut thread = JsThread::new().unwrap();
    let circuit = generic_unary(EcmaOpcode::TypeOf);
    let s = thread.new_string_from_utf16(&[0x78]).unwrap();
    let object = thread.global_object().unwrap();
    let func = thread
        .new_native_function("noop", 0, Rc::new(|_: &mut JsThread, _: &CallInfo| TaggedValue::UNDEFINED))
        .unwrap();
    let values = [
        TaggedValue::int(3),
        TaggedValue::double(0.5),
        TaggedValue::FALSE,
        TaggedValue::NULL,
        TaggedValue::UNDEFINED,
        s,
        object,
        func,
    ];
    for value in values {
        let expected = kiln_runtime::operations::type_of(&thread, value);
        let expected = thread.intern(expected).unwrap();
        assert_eq!(returned(run(&mut thread, &circuit, &[value])), expected, "{value:?}");
    }
    assert_eq!(thread.stub_count("TypeOf"), 0);
}

#[test]
fn test_inline_jump_truthiness() {
    let mut thread = JsThread::new().unwrap();
    let mut circuit = Circuit::for_function("f", 1, 0);
    let mut bc = BytecodeBuilder::new(&mut circuit);
    let cond = bc.param(0);
    let (taken, fall) = (bc.new_label(), bc.new_label());
    bc.jump_if(EcmaOpcode::Jeqz, cond, taken, fall);
    bc.bind(taken);
    let zero = bc.int(0);
    bc.ret(zero);
    bc.bind(fall);
    let one = bc.int(1);
    bc.ret(one);
    lower_generic(&mut circuit).unwrap();

    let empty = thread.constant(ConstantIndex::EmptyString).unwrap();
    let cases = [
        (TaggedValue::int(0), 0),
        (TaggedValue::int(-2), 1),
        (TaggedValue::TRUE, 1),
        (TaggedValue::FALSE, 0),
        (TaggedValue::UNDEFINED, 0),
        (TaggedValue::double(0.5), 1),
        (empty, 0),
    ];
    for (value, expected) in cases {
        let r = returned(run(&mut thread, &circuit, &[value]));
        assert_eq!(r, TaggedValue::int(expected), "{value:?}");
    }
}

// =============================================================================
// Strings
// =============================================================================

#[test]
fn test_index_of() {
    let mut thread = JsThread::new().unwrap();
    let abcabc = thread.new_string("abcabc").unwrap();
    let abc = thread.new_string("abc").unwrap();
    let bc = thread.new_string("bc").unwrap();
    let empty = thread.new_string("").unwrap();
    let at = |thread: &mut JsThread, s, search, pos| {
        call_builtin(thread, BuiltinId::IndexOf, s, &[search, TaggedValue::int(pos)])
    };
    assert_eq!(at(&mut thread, abcabc, bc, 0), TaggedValue::int(1));
    assert_eq!(at(&mut thread, abcabc, bc, 2), TaggedValue::int(4));
    assert_eq!(at(&mut thread, abc, empty, 1), TaggedValue::int(1));
    assert_eq!(thread.stub_count("CallNativeSlowPath"), 0);
}

#[test]
fn test_empty_substring_is_shared() {
    let mut thread = JsThread::new().unwrap();
    let s = thread.new_string("kiln").unwrap();
    let a = call_builtin(&mut thread, BuiltinId::Substring, s, &[TaggedValue::int(2), TaggedValue::int(2)]);
    let b = call_builtin(&mut thread, BuiltinId::Substring, s, &[TaggedValue::int(9), TaggedValue::int(4)]);
    assert_eq!(a, b);
    assert_eq!(a, thread.constant(ConstantIndex::EmptyString).unwrap());
    assert_eq!(thread.string_length(a).unwrap(), 0);
}

#[test]
fn test_non_string_receiver_takes_native_path() {
    let mut thread = JsThread::new().unwrap();
    let r = Interpreter::new(&mut thread)
        .call_builtin(BuiltinId::CharAt, &info(TaggedValue::UNDEFINED, &[TaggedValue::int(0)]))
        .unwrap();
    assert!(matches!(r, Outcome::Threw(_)));
    assert_eq!(thread.stub_count("CallNativeSlowPath"), 1);
}

#[test]
fn test_string_constructor_stub_wraps_with_length() {
    let mut thread = JsThread::new().unwrap();
    let s = thread.new_string("kiln").unwrap();
    let plain = call_builtin(&mut thread, BuiltinId::StringConstructor, TaggedValue::UNDEFINED, &[s]);
    assert_eq!(plain, s);

    let global = thread.global_object().unwrap();
    let key = thread.intern("String").unwrap();
    let ctor = thread.get_named(global, key).unwrap();
    let mut call = info(TaggedValue::UNDEFINED, &[s]);
    call.new_target = ctor;
    let wrapped = returned(Interpreter::new(&mut thread).call_builtin(BuiltinId::StringConstructor, &call).unwrap());
    assert_eq!(thread.object_type(wrapped), Some(JsType::JsPrimitiveRef));
    assert_eq!(thread.heap.field(wrapped, primitive_ref::VALUE_OFFSET).unwrap(), s);
    assert_eq!(thread.heap.field(wrapped, primitive_ref::LENGTH_OFFSET).unwrap(), TaggedValue::int(4));
    let class = thread.constant(ConstantIndex::StringObjectClass).unwrap();
    assert_eq!(thread.hclass_of(wrapped).unwrap(), class);

    let empty = call_builtin(&mut thread, BuiltinId::StringConstructor, TaggedValue::UNDEFINED, &[]);
    assert_eq!(empty, thread.constant(ConstantIndex::EmptyString).unwrap());
    assert_eq!(thread.stub_count("CallNativeSlowPath"), 0);

    let converted = call_builtin(&mut thread, BuiltinId::StringConstructor, TaggedValue::UNDEFINED, &[TaggedValue::int(7)]);
    assert_eq!(thread.string_to_rust(converted).unwrap(), "7");
    assert_eq!(thread.stub_count("CallNativeSlowPath"), 1);
}

// =============================================================================
// Containers
// =============================================================================

#[test]
fn test_for_each_rereads_length_after_removal() {
    let mut thread = JsThread::new().unwrap();
    let list = thread.new_container(ContainerKind::ArrayList).unwrap();
    for i in 0..5 {
        thread.container_add(list, ContainerKind::ArrayList, TaggedValue::int(i)).unwrap();
    }
    let calls = Rc::new(Cell::new(0u32));
    let seen = Rc::clone(&calls);
    let callback = thread
        .new_native_function(
            "removeThird",
            3,
            Rc::new(move |t: &mut JsThread, info: &CallInfo| {
                seen.set(seen.get() + 1);
                if seen.get() == 3 {
                    let index = info.arg(1).as_int() as u32;
                    t.container_remove_at(info.arg(2), ContainerKind::ArrayList, index).unwrap();
                }
                TaggedValue::UNDEFINED
            }),
        )
        .unwrap();
    let r = call_builtin(&mut thread, BuiltinId::ArrayListForEach, list, &[callback]);
    assert!(r.is_undefined());
    assert_eq!(calls.get(), 4);
    assert_eq!(thread.container_len(list, ContainerKind::ArrayList).unwrap(), 4);
}

#[test]
fn test_for_each_stops_at_first_exception() {
    let mut thread = JsThread::new().unwrap();
    let list = thread.new_container(ContainerKind::ArrayList).unwrap();
    for i in 0..5 {
        thread.container_add(list, ContainerKind::ArrayList, TaggedValue::int(i)).unwrap();
    }
    let calls = Rc::new(Cell::new(0u32));
    let seen = Rc::clone(&calls);
    let callback = thread
        .new_native_function(
            "throwSecond",
            3,
            Rc::new(move |t: &mut JsThread, _: &CallInfo| {
                seen.set(seen.get() + 1);
                if seen.get() == 2 {
                    t.throw(TaggedValue::int(99))
                } else {
                    TaggedValue::UNDEFINED
                }
            }),
        )
        .unwrap();
    let outcome = Interpreter::new(&mut thread)
        .call_builtin(BuiltinId::ArrayListForEach, &info(list, &[callback]))
        .unwrap();
    assert_eq!(outcome, Outcome::Threw(TaggedValue::int(99)));
    assert_eq!(calls.get(), 2);
}

// =============================================================================
// Allocation
// =============================================================================

/// `f(x) { let env = { x }; return env.x }` through a fresh environment.
fn lexical_round_trip() -> Circuit {
    let mut circuit = Circuit::for_function("f", 1, 0);
    let mut bc = BytecodeBuilder::new(&mut circuit);
    let x = bc.param(0);
    let outer = bc.env();
    let (zero, one) = (bc.int(0), bc.int(1));
    let env = bc.emit(EcmaOpcode::NewLexEnv, &[one, outer]);
    bc.emit(EcmaOpcode::StLexVar, &[zero, zero, x, env]);
    let value = bc.emit(EcmaOpcode::LdLexVar, &[zero, zero, env]);
    bc.ret(value);
    circuit
}

#[test]
fn test_inline_lexical_env_matches_runtime() {
    let mut thread = JsThread::new().unwrap();
    let generic = lexical_round_trip();
    let mut lowered = lexical_round_trip();
    lower_generic(&mut lowered).unwrap();
    let args = [TaggedValue::int(42)];
    assert_eq!(returned(run(&mut thread, &generic, &args)), TaggedValue::int(42));
    assert_eq!(returned(run(&mut thread, &lowered, &args)), TaggedValue::int(42));
}

#[test]
fn test_inline_arguments_object_has_length() {
    let build = || {
        let mut circuit = Circuit::for_function("f", 2, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let args = bc.emit(EcmaOpcode::GetUnmappedArgs, &[]);
        bc.ret(args);
        circuit
    };
    let mut thread = JsThread::new().unwrap();
    let mut lowered = build();
    lower_generic(&mut lowered).unwrap();
    let args = [TaggedValue::int(1), TaggedValue::int(2)];
    for circuit in [build(), lowered] {
        let obj = returned(run(&mut thread, &circuit, &args));
        assert!(obj.is_heap_object());
        let length = thread.heap.field(obj, arguments::LENGTH_OFFSET).unwrap();
        assert_eq!(length, TaggedValue::int(2));
    }
}

// =============================================================================
// Deoptimization
// =============================================================================

#[test]
fn test_double_argument_deopts_int_add() {
    let mut thread = JsThread::new().unwrap();
    let circuit = optimized(EcmaOpcode::Add2, GateType::Int, GateType::Int);
    let outcome = run(&mut thread, &circuit, &[TaggedValue::double(1.5), TaggedValue::int(1)]);
    match outcome {
        Outcome::Deopt { reason, .. } => assert_eq!(reason, DeoptType::NotInt),
        other => panic!("expected deopt, got {other:?}"),
    }
}

#[test]
fn test_math_call_deopts_on_foreign_receiver() {
    let mut circuit = Circuit::for_function("f", 3, 0);
    let mut bc = BytecodeBuilder::new(&mut circuit);
    let (math, sqrt, x) = (bc.param(0), bc.param(1), bc.param(2));
    bc.set_type(math, GateType::MathObject);
    bc.set_type(sqrt, GateType::BuiltinFunction(BuiltinId::Sqrt));
    bc.set_type(x, GateType::Double);
    let r = bc.emit(EcmaOpcode::CallThis1, &[math, x, sqrt]);
    bc.ret(r);
    lower(&mut circuit).unwrap();

    let mut thread = JsThread::new().unwrap();
    let math_object = thread.global_env_field(GlobalEnvField::MathObject).unwrap();
    let key = thread.intern("sqrt").unwrap();
    let sqrt_fn = thread.get_named(math_object, key).unwrap();
    let x = TaggedValue::double(2.25);
    let r = returned(run(&mut thread, &circuit, &[math_object, sqrt_fn, x]));
    assert_eq!(r.as_number(), 1.5);

    let impostor = thread.new_plain_object().unwrap();
    thread.define_own_named(impostor, key, sqrt_fn).unwrap();
    match run(&mut thread, &circuit, &[impostor, sqrt_fn, x]) {
        Outcome::Deopt { reason, .. } => assert_eq!(reason, DeoptType::NotBuiltinReceiver),
        other => panic!("expected deopt, got {other:?}"),
    }
}

// =============================================================================
// Properties
// =============================================================================

fn numeric() -> impl Strategy<Value = TaggedValue> {
    prop_oneof![
        any::<i32>().prop_map(TaggedValue::int),
        (-1.0e6f64..1.0e6).prop_map(TaggedValue::double),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_int_arith_promotes_to_double(a in any::<i32>(), b in any::<i32>()) {
        let (fa, fb) = (f64::from(a), f64::from(b));
        for (op, expected) in [
            (EcmaOpcode::Add2, fa + fb),
            (EcmaOpcode::Sub2, fa - fb),
            (EcmaOpcode::Mul2, fa * fb),
        ] {
            let mut thread = JsThread::new().unwrap();
            let circuit = optimized(op, GateType::Int, GateType::Int);
            let r = returned(run(&mut thread, &circuit, &[TaggedValue::int(a), TaggedValue::int(b)]));
            prop_assert_eq!(r, TaggedValue::number(expected));
        }
    }

    #[test]
    fn prop_division_by_zero_sign(a in prop_oneof![-1.0e9f64..-1.0e-9, 1.0e-9f64..1.0e9]) {
        let mut thread = JsThread::new().unwrap();
        let circuit = optimized(EcmaOpcode::Div2, GateType::Number, GateType::Number);
        let r = returned(run(&mut thread, &circuit, &[TaggedValue::double(a), TaggedValue::double(0.0)]));
        let expected = if a > 0.0 { f64::INFINITY } else { f64::NEG_INFINITY };
        prop_assert_eq!(r.as_number(), expected);
        let zero = returned(run(&mut thread, &circuit, &[TaggedValue::double(0.0), TaggedValue::double(0.0)]));
        prop_assert!(zero.as_number().is_nan());
    }

    #[test]
    fn prop_deopt_resume_matches_generic(a in numeric(), b in numeric()) {
        let generic = binary(EcmaOpcode::Add2, GateType::Int, GateType::Int);
        let fast = optimized(EcmaOpcode::Add2, GateType::Int, GateType::Int);
        let mut reference_thread = JsThread::new().unwrap();
        let expected = run(&mut reference_thread, &generic, &[a, b]);
        let mut thread = JsThread::new().unwrap();
        let call = info(TaggedValue::UNDEFINED, &[a, b]);
        let outcome = execute_with_bailout(&mut thread, &fast, &generic, &call).unwrap();
        prop_assert_eq!(outcome, expected);
    }

    #[test]
    fn prop_substring_matches_runtime(
        units in prop::collection::vec(prop_oneof![0u16..=0x7F, 0x80u16..=0x3FF, Just(0u16)], 0..24),
        from in 0usize..24,
        len in 0usize..24,
    ) {
        let mut thread = JsThread::new().unwrap();
        let s = thread.new_string_from_utf16(&units).unwrap();
        let from = from.min(units.len());
        let to = (from + len).min(units.len());
        let args = [TaggedValue::int(from as i32), TaggedValue::int(to as i32)];
        let fast = call_builtin(&mut thread, BuiltinId::Substring, s, &args);
        let reference = thread.substring(s, from as u32, (to - from) as u32).unwrap();
        prop_assert_eq!(thread.string_units(fast).unwrap(), thread.string_units(reference).unwrap());
        if from == to {
            prop_assert_eq!(fast, thread.constant(ConstantIndex::EmptyString).unwrap());
        } else {
            let compressible = units[from..to].iter().all(|&u| (1..=0x7F).contains(&u));
            prop_assert_eq!(thread.string_is_compressed(fast).unwrap(), compressible);
        }
    }
}
