//! Common stubs: the shared fast paths compiled code calls instead of going
//! all the way to the runtime.
//!
//! The property access stubs take the method's profile array and a slot in
//! it; they record the receiver's hidden class there so later compilations
//! can specialise the access.

use kiln_core::value::TaggedValue;
use kiln_core::{KilnError, KilnResult};

use crate::operations::{self, try_value};
use crate::thread::{CallInfo, JsThread};

macro_rules! common_stubs {
    ($($name:ident ($argc:literal $($plus:tt)?) => $entry:path,)*) => {
        /// Common stub ids.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum CommonStubId {
            $(
                #[allow(missing_docs)]
                $name,
            )*
        }

        impl CommonStubId {
            /// Every stub, in id order.
            pub const ALL: &'static [CommonStubId] = &[$(CommonStubId::$name,)*];

            /// Stub name.
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $(CommonStubId::$name => stringify!($name),)*
                }
            }

            /// Minimum argument count and whether more are accepted.
            #[must_use]
            pub const fn arity(self) -> (usize, bool) {
                match self {
                    $(CommonStubId::$name => ($argc, common_stubs!(@variadic $($plus)?)),)*
                }
            }

            fn entry(self) -> fn(&mut JsThread, &[TaggedValue]) -> KilnResult<TaggedValue> {
                match self {
                    $(CommonStubId::$name => $entry,)*
                }
            }
        }
    };
    (@variadic +) => { true };
    (@variadic) => { false };
}

common_stubs! {
    Add(2) => add,
    Sub(2) => sub,
    Mul(2) => mul,
    Div(2) => div,
    Mod(2) => modulo,
    Shl(2) => shl,
    Shr(2) => shr,
    Ashr(2) => ashr,
    And(2) => and,
    Or(2) => or,
    Xor(2) => xor,
    Equal(2) => equal,
    NotEqual(2) => not_equal,
    Less(2) => less,
    LessEq(2) => less_eq,
    Greater(2) => greater,
    GreaterEq(2) => greater_eq,
    Inc(1) => inc,
    Dec(1) => dec,
    Neg(1) => neg,
    Not(1) => not,
    GetPropertyByName(4) => get_property_ic,
    SetPropertyByName(5) => set_property_ic,
    GetPropertyByIndex(2) => get_property_by_index,
    SetPropertyByIndex(3) => set_property_by_index,
    GetPropertyByValue(4) => get_property_ic,
    SetPropertyByValue(5) => set_property_ic,
    TryLdGlobalByName(1) => try_ld_global_by_name,
    StGlobalVar(2) => st_global_var,
    ConstructorCheck(3) => constructor_check_stub,
    JSCallDispatch(2+) => js_call_dispatch,
}

/// Call a common stub.
///
/// # Errors
///
/// Fails on an argument count the stub does not accept, or when the stub
/// faults the simulated machine.
pub fn call_common_stub(thread: &mut JsThread, id: CommonStubId, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let (argc, variadic) = id.arity();
    if argv.len() < argc || (!variadic && argv.len() != argc) {
        return Err(KilnError::Verification(format!(
            "common stub {} called with {} arguments",
            id.name(),
            argv.len()
        )));
    }
    thread.count_stub(id.name());
    tracing::trace!(stub = id.name(), "common stub call");
    (id.entry())(thread, argv)
}

macro_rules! binary {
    ($($name:ident => $op:path;)*) => {
        $(
            fn $name(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
                $op(thread, argv[0], argv[1])
            }
        )*
    };
}

binary! {
    add => operations::add;
    sub => operations::sub;
    mul => operations::mul;
    div => operations::div;
    modulo => operations::modulo;
    shl => operations::shl;
    shr => operations::shr;
    ashr => operations::ashr;
    and => operations::and;
    or => operations::or;
    xor => operations::xor;
    equal => operations::loose_equal;
    less => operations::less;
    less_eq => operations::less_eq;
    greater => operations::greater;
    greater_eq => operations::greater_eq;
}

fn not_equal(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    let r = try_value!(operations::loose_equal(thread, argv[0], argv[1])?);
    Ok(TaggedValue::boolean(!r.is_true()))
}

fn inc(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    operations::inc(thread, argv[0])
}

fn dec(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    operations::dec(thread, argv[0])
}

fn neg(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    operations::neg(thread, argv[0])
}

fn not(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    operations::not(thread, argv[0])
}

// =============================================================================
// Property Access
// =============================================================================

/// Record the hidden class of `receiver` in `profile[slot]`.
fn record_receiver(thread: &mut JsThread, receiver: TaggedValue, profile: TaggedValue, slot: TaggedValue) -> KilnResult<()> {
    if !profile.is_heap_object() || !slot.is_int() || !receiver.is_heap_object() {
        return Ok(());
    }
    let slot = slot.as_int();
    if slot < 0 || slot as u32 >= thread.array_len(profile)? {
        return Ok(());
    }
    let h = thread.hclass_of(receiver)?;
    thread.array_set(profile, slot as u32, h)
}

/// `argv`: `{receiver, key, profile, slot}`.
fn get_property_ic(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    record_receiver(thread, argv[0], argv[2], argv[3])?;
    operations::get_property(thread, argv[0], argv[1])
}

/// `argv`: `{receiver, key, value, profile, slot}`.
fn set_property_ic(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    record_receiver(thread, argv[0], argv[3], argv[4])?;
    operations::set_property(thread, argv[0], argv[1], argv[2])
}

fn get_property_by_index(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    operations::get_property(thread, argv[0], argv[1])
}

fn set_property_by_index(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    operations::set_property(thread, argv[0], argv[1], argv[2])
}

fn try_ld_global_by_name(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    operations::try_load_global(thread, argv[0])
}

fn st_global_var(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    operations::store_global(thread, argv[0], argv[1])
}

// =============================================================================
// Calls
// =============================================================================

/// Result of `new ctor(...)` given the constructor body's return value.
///
/// An object result wins. Otherwise base constructors produce `this`; a
/// derived constructor that returned something other than `undefined`, or
/// never called `super`, throws.
pub fn constructor_check(thread: &mut JsThread, ctor: TaggedValue, result: TaggedValue, this: TaggedValue) -> TaggedValue {
    if thread.is_ecma_object(result) {
        return result;
    }
    let base = match thread.is_base_constructor(ctor) {
        Ok(base) => base,
        Err(e) => return thread.fault(&e),
    };
    if !base && !result.is_undefined() {
        return thread.throw_type_error("derived constructor returned a non-object");
    }
    if this.is_hole() {
        return thread.throw_error("ReferenceError", "derived constructor did not call super()");
    }
    this
}

/// `argv`: `{ctor, result, this}`.
fn constructor_check_stub(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    Ok(constructor_check(thread, argv[0], argv[1], argv[2]))
}

/// `argv`: `{func, this, args...}`.
fn js_call_dispatch(thread: &mut JsThread, argv: &[TaggedValue]) -> KilnResult<TaggedValue> {
    if !thread.is_callable(argv[0]) {
        return Ok(thread.throw_type_error("callee is not callable"));
    }
    let result = try_value!(thread.call_with(&CallInfo::new(argv[0], argv[1], &argv[2..])));
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_stubs::PROFILE_SLOTS;

    #[test]
    fn test_ids_are_dense() {
        for (i, id) in CommonStubId::ALL.iter().enumerate() {
            assert_eq!(*id as usize, i);
        }
    }

    #[test]
    fn test_add_overflow_goes_to_double() {
        let mut thread = JsThread::new().unwrap();
        let r = call_common_stub(&mut thread, CommonStubId::Add, &[TaggedValue::int(i32::MAX), TaggedValue::int(1)])
            .unwrap();
        assert!(r.is_double());
        assert_eq!(r.as_double(), f64::from(i32::MAX) + 1.0);
    }

    #[test]
    fn test_property_ic_records_hclass() {
        let mut thread = JsThread::new().unwrap();
        let obj = thread.new_plain_object().unwrap();
        let key = thread.intern("x").unwrap();
        let profile = thread.new_tagged_array(PROFILE_SLOTS, TaggedValue::UNDEFINED).unwrap();
        call_common_stub(
            &mut thread,
            CommonStubId::SetPropertyByName,
            &[obj, key, TaggedValue::int(7), profile, TaggedValue::int(2)],
        )
        .unwrap();
        let v = call_common_stub(
            &mut thread,
            CommonStubId::GetPropertyByName,
            &[obj, key, profile, TaggedValue::int(3)],
        )
        .unwrap();
        assert_eq!(v, TaggedValue::int(7));
        let h = thread.hclass_of(obj).unwrap();
        assert_eq!(thread.array_get(profile, 3).unwrap(), h);
        assert!(thread.array_get(profile, 2).unwrap().is_heap_object());
    }

    #[test]
    fn test_constructor_check() {
        let mut thread = JsThread::new().unwrap();
        let obj = thread.new_plain_object().unwrap();
        let other = thread.new_plain_object().unwrap();
        let ctor = thread.global_env_field(crate::heap::GlobalEnvField::ObjectFunction).unwrap();
        assert_eq!(constructor_check(&mut thread, ctor, other, obj), other);
        assert_eq!(constructor_check(&mut thread, ctor, TaggedValue::int(1), obj), obj);
        let r = constructor_check(&mut thread, ctor, TaggedValue::UNDEFINED, TaggedValue::HOLE);
        assert!(r.is_exception());
        assert!(thread.has_pending_exception());
    }

    #[test]
    fn test_call_dispatch_rejects_non_callable() {
        let mut thread = JsThread::new().unwrap();
        let r = call_common_stub(&mut thread, CommonStubId::JSCallDispatch, &[TaggedValue::int(3), TaggedValue::UNDEFINED])
            .unwrap();
        assert!(r.is_exception());
        assert!(call_common_stub(&mut thread, CommonStubId::JSCallDispatch, &[TaggedValue::int(3)]).is_err());
    }
}
