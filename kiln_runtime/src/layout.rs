//! Byte layouts of every heap object kind.
//!
//! Every heap object begins with its hidden-class pointer at offset 0. The
//! compiled code and the runtime both address fields through the constants in
//! this module, so the two sides can never disagree about where a field lives.

use kiln_core::value::TAGGED_SIZE;

// =============================================================================
// Object Types
// =============================================================================

/// Object type tag stored in every hidden class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum JsType {
    /// A hidden class.
    HClass = 1,
    /// Fixed-length array of tagged slots.
    TaggedArray,
    /// Lexical environment (a tagged array with a parent slot).
    LexicalEnv,
    /// String.
    String,
    /// Method descriptor.
    Method,
    /// Raw byte storage.
    ByteArray,
    /// Hash bucket list node.
    LinkedNode,
    /// Hash bucket tree node.
    RbTreeNode,
    /// Saved generator frame.
    GeneratorContext,
    /// Getter/setter pair stored in a property slot.
    AccessorData,

    /// Plain object.
    JsObject = 16,
    /// Error object.
    JsError,
    /// Function.
    JsFunction,
    /// Array.
    JsArray,
    /// Proxy.
    JsProxy,
    /// Boxed primitive.
    JsPrimitiveRef,
    /// Date.
    JsDate,
    /// Unmapped arguments object.
    JsArguments,
    /// `Float32Array`.
    JsFloat32Array,
    /// Generator.
    JsGeneratorObject,
    /// Async generator.
    JsAsyncGeneratorObject,
    /// The global object.
    JsGlobalObject,

    /// `ArrayList`.
    JsApiArrayList = 48,
    /// `Vector`.
    JsApiVector,
    /// `Stack`.
    JsApiStack,
    /// `Queue`.
    JsApiQueue,
    /// `Deque`.
    JsApiDeque,
    /// `LightWeightMap`.
    JsApiLightWeightMap,
    /// `LightWeightSet`.
    JsApiLightWeightSet,
    /// `HashMap`.
    JsApiHashMap,
    /// `HashSet`.
    JsApiHashSet,
    /// `LinkedList`.
    JsApiLinkedList,
    /// `List`.
    JsApiList,
    /// `PlainArray`.
    JsApiPlainArray,
}

impl JsType {
    /// First JS-visible object type.
    pub const JS_OBJECT_FIRST: u8 = JsType::JsObject as u8;
    /// First container type.
    pub const JS_API_FIRST: u8 = JsType::JsApiArrayList as u8;
    /// Last container type.
    pub const JS_API_LAST: u8 = JsType::JsApiPlainArray as u8;

    /// Decode a raw tag.
    #[must_use]
    pub fn from_u8(raw: u8) -> Option<Self> {
        use JsType::*;
        const TABLE: &[JsType] = &[
            HClass,
            TaggedArray,
            LexicalEnv,
            String,
            Method,
            ByteArray,
            LinkedNode,
            RbTreeNode,
            GeneratorContext,
            AccessorData,
            JsObject,
            JsError,
            JsFunction,
            JsArray,
            JsProxy,
            JsPrimitiveRef,
            JsDate,
            JsArguments,
            JsFloat32Array,
            JsGeneratorObject,
            JsAsyncGeneratorObject,
            JsGlobalObject,
            JsApiArrayList,
            JsApiVector,
            JsApiStack,
            JsApiQueue,
            JsApiDeque,
            JsApiLightWeightMap,
            JsApiLightWeightSet,
            JsApiHashMap,
            JsApiHashSet,
            JsApiLinkedList,
            JsApiList,
            JsApiPlainArray,
        ];
        TABLE.iter().copied().find(|t| *t as u8 == raw)
    }

    /// Objects that carry properties and elements.
    #[must_use]
    pub const fn is_js_object(self) -> bool {
        self as u8 >= Self::JS_OBJECT_FIRST
    }

    /// Container types.
    #[must_use]
    pub const fn is_container(self) -> bool {
        let raw = self as u8;
        raw >= Self::JS_API_FIRST && raw <= Self::JS_API_LAST
    }
}

// =============================================================================
// Hidden Class
// =============================================================================

bitflags::bitflags! {
    /// Per-class flag bits stored in the hidden class bit field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HClassFlags: u32 {
        /// Instances can be called.
        const CALLABLE = 1 << 0;
        /// Instances can be constructed with `new`.
        const CONSTRUCTOR = 1 << 1;
        /// Base (non-derived) class constructor.
        const BASE = 1 << 2;
        /// Elements are a dense tagged array with no accessors.
        const STABLE_ELEMENTS = 1 << 3;
        /// Class is used as a prototype.
        const PROTOTYPE = 1 << 4;
        /// New properties may be added.
        const EXTENSIBLE = 1 << 5;
        /// Class constructor (calling without `new` throws).
        const CLASS_CONSTRUCTOR = 1 << 6;
    }
}

/// `JSHClass` field offsets.
pub mod hclass {
    /// `u32` object type tag.
    pub const OBJECT_TYPE_OFFSET: u64 = 8;
    /// `u32` flag bits.
    pub const BIT_FIELD_OFFSET: u64 = 12;
    /// `u32` instance size in bytes.
    pub const OBJECT_SIZE_OFFSET: u64 = 16;
    /// `u32` number of inline property slots.
    pub const INLINED_PROPS_OFFSET: u64 = 20;
    /// Tagged prototype.
    pub const PROTOTYPE_OFFSET: u64 = 24;
    /// Tagged array of property keys, in slot order.
    pub const LAYOUT_OFFSET: u64 = 32;
    /// `u32` number of used property keys.
    pub const NUM_PROPS_OFFSET: u64 = 40;
    /// Total size.
    pub const SIZE: u64 = 48;
}

// =============================================================================
// Objects
// =============================================================================

/// `JSObject` field offsets.
pub mod object {
    /// Hidden class.
    pub const HCLASS_OFFSET: u64 = 0;
    /// Identity hash.
    pub const HASH_OFFSET: u64 = 8;
    /// Out-of-line properties (tagged array).
    pub const PROPERTIES_OFFSET: u64 = 16;
    /// Elements (tagged array).
    pub const ELEMENTS_OFFSET: u64 = 24;
    /// Header size; inline properties follow.
    pub const SIZE: u64 = 32;
}

/// `JSArray` field offsets.
pub mod array {
    /// `u32` length.
    pub const LENGTH_OFFSET: u64 = super::object::SIZE;
    /// Total size.
    pub const SIZE: u64 = super::object::SIZE + 8;
}

/// `JSFunction` field offsets.
pub mod function {
    /// Prototype for instances, or their hidden class once created.
    pub const PROTO_OR_HCLASS_OFFSET: u64 = super::object::SIZE;
    /// Captured lexical environment.
    pub const LEXICAL_ENV_OFFSET: u64 = PROTO_OR_HCLASS_OFFSET + 8;
    /// Home object for `super` lookups.
    pub const HOME_OBJECT_OFFSET: u64 = LEXICAL_ENV_OFFSET + 8;
    /// Method descriptor.
    pub const METHOD_OFFSET: u64 = HOME_OBJECT_OFFSET + 8;
    /// Total size.
    pub const SIZE: u64 = METHOD_OFFSET + 8;
}

/// `Method` field offsets.
pub mod method {
    /// Constant pool (tagged array).
    pub const CONSTANT_POOL_OFFSET: u64 = 8;
    /// Profile type info (tagged array or undefined).
    pub const PROFILE_TYPE_INFO_OFFSET: u64 = 16;
    /// `u32` native function index, or [`NO_NATIVE`].
    pub const NATIVE_ID_OFFSET: u64 = 24;
    /// `u32` builtin stub id for fast-call recognition, or [`NO_BUILTIN`].
    pub const BUILTIN_ID_OFFSET: u64 = 28;
    /// `i16` hotness counter.
    pub const HOTNESS_OFFSET: u64 = 32;
    /// `u16` declared parameter count.
    pub const NUM_ARGS_OFFSET: u64 = 34;
    /// `u32` function kind.
    pub const KIND_OFFSET: u64 = 36;
    /// `u32` number of virtual registers.
    pub const NUM_VREGS_OFFSET: u64 = 40;
    /// Total size.
    pub const SIZE: u64 = 48;

    /// No native implementation.
    pub const NO_NATIVE: u32 = u32::MAX;
    /// Not a recognized builtin.
    pub const NO_BUILTIN: u32 = u32::MAX;
}

/// Function kinds stored in a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum FunctionKind {
    /// Ordinary function.
    Normal = 0,
    /// Arrow function.
    Arrow,
    /// Class method.
    Method,
    /// Base class constructor.
    BaseConstructor,
    /// Derived class constructor.
    DerivedConstructor,
    /// Generator function.
    Generator,
    /// Async generator function.
    AsyncGenerator,
    /// Builtin constructor (callable with or without `new`).
    BuiltinConstructor,
}

impl FunctionKind {
    /// Decode a raw kind, defaulting to `Normal`.
    #[must_use]
    pub const fn from_u32(raw: u32) -> Self {
        match raw {
            1 => FunctionKind::Arrow,
            2 => FunctionKind::Method,
            3 => FunctionKind::BaseConstructor,
            4 => FunctionKind::DerivedConstructor,
            5 => FunctionKind::Generator,
            6 => FunctionKind::AsyncGenerator,
            7 => FunctionKind::BuiltinConstructor,
            _ => FunctionKind::Normal,
        }
    }
}

/// `TaggedArray` (and `LexicalEnv`) field offsets.
pub mod tagged_array {
    /// `u32` element count.
    pub const LENGTH_OFFSET: u64 = 8;
    /// First element.
    pub const DATA_OFFSET: u64 = 16;
}

/// `AccessorData` field offsets.
pub mod accessor_data {
    /// Getter function or undefined.
    pub const GETTER_OFFSET: u64 = 8;
    /// Setter function or undefined.
    pub const SETTER_OFFSET: u64 = 16;
    /// Total size.
    pub const SIZE: u64 = 24;
}

/// `LexicalEnv` reserved slots.
pub mod lexical_env {
    /// Parent environment slot.
    pub const PARENT_ENV_INDEX: u32 = 0;
    /// Scope info slot.
    pub const SCOPE_INFO_INDEX: u32 = 1;
    /// Number of reserved slots before the variables.
    pub const RESERVED_ENV_LENGTH: u32 = 2;
}

/// `EcmaString` field offsets.
pub mod string {
    /// `u32` mixed length: `length << 2 | flags`.
    pub const MIX_LENGTH_OFFSET: u64 = 8;
    /// `u32` cached hash.
    pub const HASH_OFFSET: u64 = 12;
    /// Character data.
    pub const DATA_OFFSET: u64 = 16;

    /// Shift of the length inside the mixed length.
    pub const LENGTH_SHIFT: u32 = 2;
    /// Flag bit set when the string is stored as UTF-16.
    pub const UNCOMPRESSED_BIT: u32 = 0x1;
    /// Flag bit set on interned strings.
    pub const INTERNED_BIT: u32 = 0x2;
    /// Largest code unit stored in one byte.
    pub const UTF8_1B_MAX: u16 = 0x7F;
}

/// `ByteArray` field offsets.
pub mod byte_array {
    /// `u32` element count.
    pub const LENGTH_OFFSET: u64 = 8;
    /// `u32` element size.
    pub const ELEMENT_SIZE_OFFSET: u64 = 12;
    /// Data.
    pub const DATA_OFFSET: u64 = 16;
}

/// `JSTypedArray` field offsets.
pub mod typed_array {
    /// Backing byte array.
    pub const VIEWED_ARRAY_BUFFER_OFFSET: u64 = super::object::SIZE;
    /// `u32` byte length.
    pub const BYTE_LENGTH_OFFSET: u64 = VIEWED_ARRAY_BUFFER_OFFSET + 8;
    /// `u32` byte offset into the buffer.
    pub const BYTE_OFFSET_OFFSET: u64 = BYTE_LENGTH_OFFSET + 4;
    /// `u32` element count.
    pub const ARRAY_LENGTH_OFFSET: u64 = BYTE_OFFSET_OFFSET + 4;
    /// Total size.
    pub const SIZE: u64 = ARRAY_LENGTH_OFFSET + 8;
}

/// `JSPrimitiveRef` field offsets.
pub mod primitive_ref {
    /// Wrapped primitive.
    pub const VALUE_OFFSET: u64 = super::object::SIZE;
    /// Total size.
    pub const SIZE: u64 = VALUE_OFFSET + 8;
    /// `length` of a `String` wrapper (tagged int), after the value.
    pub const LENGTH_OFFSET: u64 = SIZE;
    /// Total size of a `String` wrapper.
    pub const STRING_SIZE: u64 = LENGTH_OFFSET + 8;
}

/// `JSDate` field offsets.
pub mod date {
    /// Time value (tagged double, NaN for invalid dates).
    pub const TIME_VALUE_OFFSET: u64 = super::object::SIZE;
    /// Local offset (tagged double).
    pub const LOCAL_OFFSET_OFFSET: u64 = TIME_VALUE_OFFSET + 8;
    /// Total size.
    pub const SIZE: u64 = LOCAL_OFFSET_OFFSET + 8;
}

/// `JSProxy` field offsets.
pub mod proxy {
    /// Target object.
    pub const TARGET_OFFSET: u64 = 16;
    /// Handler object.
    pub const HANDLER_OFFSET: u64 = 24;
    /// Total size.
    pub const SIZE: u64 = 32;
}

/// `JSArguments` field offsets.
pub mod arguments {
    /// `length` property slot.
    pub const LENGTH_OFFSET: u64 = super::object::SIZE;
    /// Total size.
    pub const SIZE: u64 = LENGTH_OFFSET + 8;
}

// =============================================================================
// Generators
// =============================================================================

/// `GeneratorContext` field offsets.
pub mod generator_context {
    /// Saved registers (tagged array).
    pub const REGS_ARRAY_OFFSET: u64 = 8;
    /// Function being suspended.
    pub const METHOD_OFFSET: u64 = 16;
    /// Saved accumulator.
    pub const ACC_OFFSET: u64 = 24;
    /// `u32` number of saved registers.
    pub const NREGS_OFFSET: u64 = 32;
    /// `u32` bytecode offset to resume at.
    pub const BC_OFFSET_OFFSET: u64 = 36;
    /// Owning generator object.
    pub const GENERATOR_OBJECT_OFFSET: u64 = 40;
    /// Saved lexical environment.
    pub const LEXICAL_ENV_OFFSET: u64 = 48;
    /// `this` of the suspended call.
    pub const THIS_OFFSET: u64 = 56;
    /// Total size.
    pub const SIZE: u64 = 64;
}

/// `JSGeneratorObject` field offsets.
pub mod generator_object {
    /// Saved context.
    pub const GENERATOR_CONTEXT_OFFSET: u64 = super::object::SIZE;
    /// Value passed to `next`/`throw`/`return`.
    pub const RESUME_RESULT_OFFSET: u64 = GENERATOR_CONTEXT_OFFSET + 8;
    /// Generator state (tagged int).
    pub const GENERATOR_STATE_OFFSET: u64 = RESUME_RESULT_OFFSET + 8;
    /// Resume mode (tagged int).
    pub const RESUME_MODE_OFFSET: u64 = GENERATOR_STATE_OFFSET + 8;
    /// Total size.
    pub const SIZE: u64 = RESUME_MODE_OFFSET + 8;
}

/// `JSAsyncGeneratorObject` field offsets.
pub mod async_generator_object {
    /// Saved context.
    pub const GENERATOR_CONTEXT_OFFSET: u64 = super::object::SIZE;
    /// Generator state (tagged int).
    pub const ASYNC_GENERATOR_STATE_OFFSET: u64 = GENERATOR_CONTEXT_OFFSET + 8;
    /// Value passed on resumption.
    pub const ASYNC_GENERATOR_RESUME_RESULT_OFFSET: u64 = ASYNC_GENERATOR_STATE_OFFSET + 8;
    /// Resume mode (tagged int).
    pub const RESUME_MODE_OFFSET: u64 = ASYNC_GENERATOR_RESUME_RESULT_OFFSET + 8;
    /// Queue of pending requests.
    pub const QUEUE_OFFSET: u64 = RESUME_MODE_OFFSET + 8;
    /// Total size.
    pub const SIZE: u64 = QUEUE_OFFSET + 8;
}

/// Generator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum GeneratorState {
    /// Created, never resumed.
    SuspendedStart = 0,
    /// Suspended at a yield.
    SuspendedYield,
    /// Running.
    Executing,
    /// Finished.
    Completed,
}

/// Resume modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ResumeMode {
    /// `next(value)`.
    Next = 0,
    /// `return(value)`.
    Return,
    /// `throw(value)`.
    Throw,
}

// =============================================================================
// Containers
// =============================================================================

/// `JSAPIArrayList`: elements in the object elements array.
pub mod array_list {
    /// Tagged int length.
    pub const LENGTH_OFFSET: u64 = super::object::SIZE;
    /// Total size.
    pub const SIZE: u64 = LENGTH_OFFSET + 8;
}

/// `JSAPIVector`: elements in the object elements array.
pub mod vector {
    /// `u32` element count.
    pub const ELEMENT_COUNT_OFFSET: u64 = super::object::SIZE;
    /// Total size.
    pub const SIZE: u64 = ELEMENT_COUNT_OFFSET + 8;
}

/// `JSAPIStack`: elements in the object elements array.
pub mod stack {
    /// `i32` index of the top element, `-1` when empty.
    pub const TOP_OFFSET: u64 = super::object::SIZE;
    /// Total size.
    pub const SIZE: u64 = TOP_OFFSET + 8;
}

/// `JSAPIQueue`: ring buffer in the object elements array.
pub mod queue {
    /// `u32` index of the first element.
    pub const FRONT_OFFSET: u64 = super::object::SIZE;
    /// `u32` index one past the last element.
    pub const TAIL_OFFSET: u64 = FRONT_OFFSET + 4;
    /// Total size.
    pub const SIZE: u64 = FRONT_OFFSET + 8;
}

/// `JSAPIDeque`: ring buffer in the object elements array.
pub mod deque {
    /// `u32` index of the first element.
    pub const FIRST_OFFSET: u64 = super::object::SIZE;
    /// `u32` index one past the last element.
    pub const LAST_OFFSET: u64 = FIRST_OFFSET + 4;
    /// Total size.
    pub const SIZE: u64 = FIRST_OFFSET + 8;
}

/// `JSAPILightWeightMap`: parallel sorted arrays.
pub mod light_weight_map {
    /// Hashes (tagged array).
    pub const HASHES_OFFSET: u64 = super::object::SIZE;
    /// Keys (tagged array).
    pub const KEYS_OFFSET: u64 = HASHES_OFFSET + 8;
    /// Values (tagged array).
    pub const VALUES_OFFSET: u64 = KEYS_OFFSET + 8;
    /// `u32` element count.
    pub const LENGTH_OFFSET: u64 = VALUES_OFFSET + 8;
    /// Total size.
    pub const SIZE: u64 = LENGTH_OFFSET + 8;
}

/// `JSAPILightWeightSet`: parallel sorted arrays.
pub mod light_weight_set {
    /// Hashes (tagged array).
    pub const HASHES_OFFSET: u64 = super::object::SIZE;
    /// Values (tagged array).
    pub const VALUES_OFFSET: u64 = HASHES_OFFSET + 8;
    /// `u32` element count.
    pub const LENGTH_OFFSET: u64 = VALUES_OFFSET + 8;
    /// Total size.
    pub const SIZE: u64 = LENGTH_OFFSET + 8;
}

/// `JSAPIPlainArray`: sorted int keys with parallel values.
pub mod plain_array {
    /// Keys (tagged array of ints).
    pub const KEYS_OFFSET: u64 = super::object::SIZE;
    /// Values (tagged array).
    pub const VALUES_OFFSET: u64 = KEYS_OFFSET + 8;
    /// `u32` element count.
    pub const LENGTH_OFFSET: u64 = VALUES_OFFSET + 8;
    /// Total size.
    pub const SIZE: u64 = LENGTH_OFFSET + 8;
}

/// `JSAPIHashMap`/`JSAPIHashSet`: bucket table.
pub mod hash_map {
    /// Buckets (tagged array of hole, linked node or tree node).
    pub const TABLE_OFFSET: u64 = super::object::SIZE;
    /// `u32` entry count.
    pub const SIZE_OFFSET: u64 = TABLE_OFFSET + 8;
    /// Total size.
    pub const SIZE: u64 = SIZE_OFFSET + 8;

    /// Initial bucket count.
    pub const DEFAULT_CAPACITY: u32 = 16;
    /// Chain length at which a bucket becomes a tree.
    pub const TREEIFY_THRESHOLD: u32 = 8;
}

/// `LinkedNode` field offsets.
pub mod linked_node {
    /// Tagged int hash.
    pub const HASH_OFFSET: u64 = 8;
    /// Key.
    pub const KEY_OFFSET: u64 = 16;
    /// Value.
    pub const VALUE_OFFSET: u64 = 24;
    /// Next node or hole.
    pub const NEXT_OFFSET: u64 = 32;
    /// Total size.
    pub const SIZE: u64 = 40;
}

/// `RBTreeNode` field offsets.
pub mod rb_tree_node {
    /// Tagged int hash.
    pub const HASH_OFFSET: u64 = 8;
    /// Key.
    pub const KEY_OFFSET: u64 = 16;
    /// Value.
    pub const VALUE_OFFSET: u64 = 24;
    /// Left child or hole.
    pub const LEFT_OFFSET: u64 = 32;
    /// Right child or hole.
    pub const RIGHT_OFFSET: u64 = 40;
    /// Tagged boolean color.
    pub const IS_RED_OFFSET: u64 = 48;
    /// Tagged int subtree size.
    pub const COUNT_OFFSET: u64 = 56;
    /// Total size.
    pub const SIZE: u64 = 64;
}

/// `JSAPILinkedList`/`JSAPIList`: node list stored in a tagged array.
///
/// Slot layout: `[node count, deleted count, head, tail, nodes...]`. Each node
/// occupies `ENTRY_SIZE` slots: value, next index, and for the doubly linked
/// list also a previous index. The head node sits at `ELEMENTS_START_INDEX`.
pub mod tagged_list {
    /// The list object's pointer to its tagged array.
    pub const LIST_OFFSET: u64 = super::object::SIZE;
    /// Total size of the owning container object.
    pub const SIZE: u64 = LIST_OFFSET + 8;

    /// Slot holding the live node count.
    pub const NUMBER_OF_NODE_INDEX: u32 = 0;
    /// Slot holding the deleted node count.
    pub const NUMBER_OF_DELETED_NODES_INDEX: u32 = 1;
    /// Slot holding the head index.
    pub const HEAD_TABLE_INDEX: u32 = 2;
    /// Slot holding the tail index.
    pub const TAIL_TABLE_INDEX: u32 = 3;
    /// Index of the head sentinel node.
    pub const ELEMENTS_START_INDEX: u32 = 4;
    /// Offset of the next pointer inside a node.
    pub const NEXT_PTR_OFFSET: u32 = 1;
    /// Offset of the previous pointer inside a doubly linked node.
    pub const PREV_PTR_OFFSET: u32 = 2;
    /// Slots per node of the singly linked list.
    pub const SINGLE_ENTRY_SIZE: u32 = 2;
    /// Slots per node of the doubly linked list.
    pub const DOUBLE_ENTRY_SIZE: u32 = 3;
}

// =============================================================================
// Helpers
// =============================================================================

/// Byte offset of element `index` in a tagged array.
#[inline]
#[must_use]
pub const fn tagged_array_element_offset(index: u64) -> u64 {
    tagged_array::DATA_OFFSET + index * TAGGED_SIZE
}

/// Byte offset of inline property `slot` in an object.
#[inline]
#[must_use]
pub const fn inline_property_offset(base_size: u64, slot: u64) -> u64 {
    base_size + slot * TAGGED_SIZE
}

/// Round a size up to 8 bytes.
#[inline]
#[must_use]
pub const fn align_object_size(size: u64) -> u64 {
    (size + 7) & !7
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_ranges() {
        assert!(JsType::JsArray.is_js_object());
        assert!(!JsType::TaggedArray.is_js_object());
        assert!(JsType::JsApiDeque.is_container());
        assert!(!JsType::JsArray.is_container());
        assert_eq!(JsType::from_u8(JsType::JsApiList as u8), Some(JsType::JsApiList));
        assert_eq!(JsType::from_u8(0), None);
    }

    #[test]
    fn test_layouts_do_not_overlap() {
        assert!(function::METHOD_OFFSET < function::SIZE);
        assert_eq!(tagged_array_element_offset(2), 32);
        assert_eq!(align_object_size(17), 24);
        assert_ne!(
            generator_object::RESUME_RESULT_OFFSET,
            async_generator_object::ASYNC_GENERATOR_RESUME_RESULT_OFFSET
        );
    }
}
