//! The runtime thread: heap, natives, interned strings and call dispatch.
//!
//! Every runtime service takes `&mut JsThread`. Program-level exceptions are
//! recorded in the glue's pending-exception slot and signalled to callers by
//! returning [`TaggedValue::EXCEPTION`].

use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use kiln_core::value::TaggedValue;
use kiln_core::{CompilerConfig, KilnError, KilnResult};

use crate::heap::{glue, ConstantIndex, Heap};
use crate::layout::{function, method, object, JsType};

// =============================================================================
// Calls
// =============================================================================

/// Arguments of one call.
#[derive(Debug, Clone)]
pub struct CallInfo {
    /// The callee.
    pub func: TaggedValue,
    /// `new.target`, undefined for ordinary calls.
    pub new_target: TaggedValue,
    /// Receiver.
    pub this: TaggedValue,
    /// Positional arguments.
    pub args: SmallVec<[TaggedValue; 4]>,
}

impl CallInfo {
    /// Build a call record.
    #[must_use]
    pub fn new(func: TaggedValue, this: TaggedValue, args: &[TaggedValue]) -> Self {
        Self {
            func,
            new_target: TaggedValue::UNDEFINED,
            this,
            args: SmallVec::from_slice(args),
        }
    }

    /// Argument `index`, undefined when absent.
    #[inline]
    #[must_use]
    pub fn arg(&self, index: usize) -> TaggedValue {
        self.args.get(index).copied().unwrap_or(TaggedValue::UNDEFINED)
    }

    /// Number of arguments.
    #[inline]
    #[must_use]
    pub fn argc(&self) -> usize {
        self.args.len()
    }
}

/// A native function body.
pub type NativeFn = Rc<dyn Fn(&mut JsThread, &CallInfo) -> TaggedValue>;

/// Invoker for methods without a native body (bytecode or compiled code).
pub type CodeInvoker = Rc<dyn Fn(&mut JsThread, TaggedValue, &CallInfo) -> TaggedValue>;

/// A registered native.
#[derive(Clone)]
pub struct NativeEntry {
    /// Display name.
    pub name: &'static str,
    /// Body.
    pub func: NativeFn,
}

impl fmt::Debug for NativeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeEntry").field("name", &self.name).finish()
    }
}

// =============================================================================
// JsThread
// =============================================================================

/// Maximum nesting of calls before a `RangeError`-style exception is raised.
pub const MAX_CALL_DEPTH: u32 = 512;

/// One runtime thread.
pub struct JsThread {
    /// The heap.
    pub heap: Heap,
    /// Compiler settings the runtime honours (hotness threshold).
    pub config: CompilerConfig,
    pub(crate) natives: Vec<NativeEntry>,
    pub(crate) interned: FxHashMap<String, TaggedValue>,
    pub(crate) transitions: FxHashMap<(u64, u64), TaggedValue>,
    pub(crate) next_hash: i32,
    /// Values of the current module's local variables, by index.
    pub(crate) module_vars: Vec<TaggedValue>,
    invoker: Option<CodeInvoker>,
    call_depth: u32,
    /// Runtime stub invocation counter, by stub name.
    pub(crate) stub_counts: FxHashMap<&'static str, u64>,
}

impl fmt::Debug for JsThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsThread")
            .field("natives", &self.natives.len())
            .field("interned", &self.interned.len())
            .field("heap", &self.heap.stats())
            .finish_non_exhaustive()
    }
}

impl JsThread {
    /// Create a thread with default configuration.
    ///
    /// # Errors
    ///
    /// Fails only if the initial heap cannot hold the builtin objects.
    pub fn new() -> KilnResult<Self> {
        Self::with_config(CompilerConfig::default())
    }

    /// Create a thread and install every builtin.
    ///
    /// # Errors
    ///
    /// Fails only if the initial heap cannot hold the builtin objects.
    pub fn with_config(config: CompilerConfig) -> KilnResult<Self> {
        let mut thread = Self {
            heap: Heap::new(config.young_space),
            config,
            natives: Vec::new(),
            interned: FxHashMap::default(),
            transitions: FxHashMap::default(),
            next_hash: 1,
            module_vars: Vec::new(),
            invoker: None,
            call_depth: 0,
            stub_counts: FxHashMap::default(),
        };
        crate::builtins::initialize(&mut thread)?;
        Ok(thread)
    }

    /// The glue address passed to compiled code.
    #[inline]
    #[must_use]
    pub fn glue(&self) -> u64 {
        self.heap.glue()
    }

    /// A global constant.
    ///
    /// # Errors
    ///
    /// Never fails after initialization.
    pub fn constant(&self, index: ConstantIndex) -> KilnResult<TaggedValue> {
        self.heap.constant(index)
    }

    /// Number of times a runtime stub ran.
    #[must_use]
    pub fn stub_count(&self, name: &str) -> u64 {
        self.stub_counts.get(name).copied().unwrap_or(0)
    }

    pub(crate) fn count_stub(&mut self, name: &'static str) {
        *self.stub_counts.entry(name).or_insert(0) += 1;
    }

    // =========================================================================
    // Exceptions
    // =========================================================================

    /// Whether an exception is pending.
    #[must_use]
    pub fn has_pending_exception(&self) -> bool {
        self.heap
            .glue_field(glue::EXCEPTION_OFFSET)
            .map_or(false, |v| !v.is_hole())
    }

    /// The pending exception, or hole.
    #[must_use]
    pub fn pending_exception(&self) -> TaggedValue {
        self.heap
            .glue_field(glue::EXCEPTION_OFFSET)
            .unwrap_or(TaggedValue::HOLE)
    }

    /// Clear and return the pending exception.
    pub fn take_exception(&mut self) -> TaggedValue {
        let value = self.pending_exception();
        let _ = self.heap.set_glue_field(glue::EXCEPTION_OFFSET, TaggedValue::HOLE);
        value
    }

    /// Make `value` the pending exception and return the exception sentinel.
    pub fn throw(&mut self, value: TaggedValue) -> TaggedValue {
        let _ = self.heap.set_glue_field(glue::EXCEPTION_OFFSET, value);
        TaggedValue::EXCEPTION
    }

    /// Throw a `TypeError` carrying `message`.
    pub fn throw_type_error(&mut self, message: &str) -> TaggedValue {
        self.throw_error("TypeError", message)
    }

    /// Throw a `RangeError` carrying `message`.
    pub fn throw_range_error(&mut self, message: &str) -> TaggedValue {
        self.throw_error("RangeError", message)
    }

    /// Throw an error object of kind `name`.
    pub fn throw_error(&mut self, name: &str, message: &str) -> TaggedValue {
        tracing::trace!(name, message, "runtime throw");
        match self.new_error(name, message) {
            Ok(error) => self.throw(error),
            Err(_) => self.throw(TaggedValue::UNDEFINED),
        }
    }

    /// Convert a fault of the simulated machine into a pending exception.
    pub fn fault(&mut self, error: &KilnError) -> TaggedValue {
        self.throw_error("InternalError", &error.to_string())
    }

    // =========================================================================
    // Natives
    // =========================================================================

    /// Register a native body and return its index.
    pub fn register_native(&mut self, name: &'static str, func: NativeFn) -> u32 {
        self.natives.push(NativeEntry { name, func });
        (self.natives.len() - 1) as u32
    }

    /// Create a callable function object backed by a native body.
    ///
    /// # Errors
    ///
    /// Fails if the heap is exhausted beyond its ceiling.
    pub fn new_native_function(
        &mut self,
        name: &'static str,
        num_args: u16,
        func: NativeFn,
    ) -> KilnResult<TaggedValue> {
        let native_id = self.register_native(name, func);
        let method = self.new_method(native_id, method::NO_BUILTIN, crate::layout::FunctionKind::Normal, num_args)?;
        self.new_function(method, crate::layout::FunctionKind::Normal, TaggedValue::UNDEFINED)
    }

    /// Name of native `index`.
    #[must_use]
    pub fn native_name(&self, index: u32) -> Option<&'static str> {
        self.natives.get(index as usize).map(|n| n.name)
    }

    /// Install the invoker for methods without a native body.
    pub fn set_code_invoker(&mut self, invoker: CodeInvoker) {
        self.invoker = Some(invoker);
    }

    // =========================================================================
    // Call Dispatch
    // =========================================================================

    /// Call `func` with `this` and `args`.
    pub fn call(&mut self, func: TaggedValue, this: TaggedValue, args: &[TaggedValue]) -> TaggedValue {
        self.call_with(&CallInfo::new(func, this, args))
    }

    /// Construct with `func` as both callee and `new.target`.
    pub fn construct(&mut self, func: TaggedValue, args: &[TaggedValue]) -> TaggedValue {
        self.construct_with(func, func, args)
    }

    /// `new` with an explicit `new.target`.
    pub fn construct_with(&mut self, func: TaggedValue, new_target: TaggedValue, args: &[TaggedValue]) -> TaggedValue {
        if !self.is_constructor(func) {
            return self.throw_type_error("not a constructor");
        }
        let this = match self.allocate_this(func, new_target) {
            Ok(this) => this,
            Err(e) => return self.fault(&e),
        };
        if this.is_exception() {
            return this;
        }
        let mut info = CallInfo::new(func, this, args);
        info.new_target = new_target;
        let result = self.call_with(&info);
        if result.is_exception() {
            return result;
        }
        crate::common_stubs::constructor_check(self, func, result, this)
    }

    /// Dispatch a prepared call.
    pub fn call_with(&mut self, info: &CallInfo) -> TaggedValue {
        if !self.is_callable(info.func) {
            return self.throw_type_error("callee is not callable");
        }
        if self.call_depth >= MAX_CALL_DEPTH {
            return self.throw_range_error("maximum call stack size exceeded");
        }
        let method = match self.heap.field(info.func, function::METHOD_OFFSET) {
            Ok(m) => m,
            Err(e) => return self.fault(&e),
        };
        let native_id = match self.heap.read_u32(method.as_address() + method::NATIVE_ID_OFFSET) {
            Ok(id) => id,
            Err(e) => return self.fault(&e),
        };

        self.call_depth += 1;
        let result = if native_id == method::NO_NATIVE {
            match self.invoker.clone() {
                Some(invoker) => invoker(self, method, info),
                None => self.throw_type_error("no code attached to method"),
            }
        } else {
            match self.natives.get(native_id as usize).map(|n| Rc::clone(&n.func)) {
                Some(native) => native(self, info),
                None => self.throw_type_error("unknown native"),
            }
        };
        self.call_depth -= 1;
        result
    }

    /// Allocate the receiver for `new ctor(...)`.
    ///
    /// Derived constructors get a hole receiver; their `super` call provides
    /// the object.
    ///
    /// # Errors
    ///
    /// Fails if the heap is exhausted beyond its ceiling.
    pub fn allocate_this(&mut self, ctor: TaggedValue, new_target: TaggedValue) -> KilnResult<TaggedValue> {
        if !self.is_base_constructor(ctor)? {
            return Ok(TaggedValue::HOLE);
        }
        let hclass = self.instance_hclass(new_target)?;
        self.new_object_with_hclass(hclass)
    }

    /// Object type of a heap object.
    #[must_use]
    pub fn object_type(&self, value: TaggedValue) -> Option<JsType> {
        if !value.is_heap_object() {
            return None;
        }
        let hclass = self.heap.field(value, object::HCLASS_OFFSET).ok()?;
        let raw = self
            .heap
            .read_u32(hclass.as_address() + crate::layout::hclass::OBJECT_TYPE_OFFSET)
            .ok()?;
        JsType::from_u8(raw as u8)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throw_sets_pending() {
        let mut thread = JsThread::new().unwrap();
        assert!(!thread.has_pending_exception());
        let ret = thread.throw(TaggedValue::int(3));
        assert!(ret.is_exception());
        assert!(thread.has_pending_exception());
        assert_eq!(thread.take_exception(), TaggedValue::int(3));
        assert!(!thread.has_pending_exception());
    }

    #[test]
    fn test_native_call() {
        let mut thread = JsThread::new().unwrap();
        let func = thread
            .new_native_function("add1", 1, Rc::new(|_, info: &CallInfo| {
                TaggedValue::int(info.arg(0).as_int() + 1)
            }))
            .unwrap();
        let result = thread.call(func, TaggedValue::UNDEFINED, &[TaggedValue::int(41)]);
        assert_eq!(result, TaggedValue::int(42));
    }

    #[test]
    fn test_calling_non_callable_throws() {
        let mut thread = JsThread::new().unwrap();
        let result = thread.call(TaggedValue::int(1), TaggedValue::UNDEFINED, &[]);
        assert!(result.is_exception());
        assert!(thread.has_pending_exception());
    }

    #[test]
    fn test_missing_invoker_throws() {
        let mut thread = JsThread::new().unwrap();
        let method = thread
            .new_method(method::NO_NATIVE, method::NO_BUILTIN, crate::layout::FunctionKind::Normal, 0)
            .unwrap();
        let func = thread
            .new_function(method, crate::layout::FunctionKind::Normal, TaggedValue::UNDEFINED)
            .unwrap();
        assert!(thread.call(func, TaggedValue::UNDEFINED, &[]).is_exception());
    }
}
