//! Utility containers: `ArrayList`, `Vector`, `Stack`, `Queue`, `Deque`,
//! `LightWeightMap`, `LightWeightSet`, `HashMap`, `HashSet`, `LinkedList`,
//! `List` and `PlainArray`.
//!
//! Layouts are shared with the compiled stubs, which read them directly:
//!
//! - list-like containers keep values in the object's `elements` array with a
//!   separate count field (`Queue`/`Deque` use it as a ring buffer);
//! - the light-weight containers keep parallel arrays sorted by hash (by key
//!   for `PlainArray`);
//! - hash containers keep a power-of-two bucket table whose slots hold a hole,
//!   a chain of linked nodes, or a red-black tree once a chain reaches
//!   [`hash_map::TREEIFY_THRESHOLD`];
//! - `LinkedList`/`List` keep a `TaggedList`: a flat array of
//!   `[count, deleted, head, tail, entries...]` whose entries are
//!   `[value, next, prev]` (`[value, next]` for `List`), with a sentinel head
//!   entry at [`tagged_list::ELEMENTS_START_INDEX`].

use kiln_core::value::TaggedValue;
use kiln_core::{KilnError, KilnResult};

use crate::heap::ConstantIndex;
use crate::layout::{
    array_list, deque, hash_map, light_weight_map, light_weight_set, linked_node, object,
    plain_array, queue, rb_tree_node, stack, tagged_list, vector, JsType,
};
use crate::thread::JsThread;

// =============================================================================
// Kinds
// =============================================================================

/// The container families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ContainerKind {
    /// `ArrayList`.
    ArrayList,
    /// `Vector`.
    Vector,
    /// `Stack`.
    Stack,
    /// `Queue`.
    Queue,
    /// `Deque`.
    Deque,
    /// `LightWeightMap`.
    LightWeightMap,
    /// `LightWeightSet`.
    LightWeightSet,
    /// `HashMap`.
    HashMap,
    /// `HashSet`.
    HashSet,
    /// `LinkedList`.
    LinkedList,
    /// `List`.
    List,
    /// `PlainArray`.
    PlainArray,
}

impl ContainerKind {
    /// Every kind.
    pub const ALL: [ContainerKind; 12] = [
        ContainerKind::ArrayList,
        ContainerKind::Vector,
        ContainerKind::Stack,
        ContainerKind::Queue,
        ContainerKind::Deque,
        ContainerKind::LightWeightMap,
        ContainerKind::LightWeightSet,
        ContainerKind::HashMap,
        ContainerKind::HashSet,
        ContainerKind::LinkedList,
        ContainerKind::List,
        ContainerKind::PlainArray,
    ];

    /// Object type of instances.
    #[must_use]
    pub const fn js_type(self) -> JsType {
        match self {
            ContainerKind::ArrayList => JsType::JsApiArrayList,
            ContainerKind::Vector => JsType::JsApiVector,
            ContainerKind::Stack => JsType::JsApiStack,
            ContainerKind::Queue => JsType::JsApiQueue,
            ContainerKind::Deque => JsType::JsApiDeque,
            ContainerKind::LightWeightMap => JsType::JsApiLightWeightMap,
            ContainerKind::LightWeightSet => JsType::JsApiLightWeightSet,
            ContainerKind::HashMap => JsType::JsApiHashMap,
            ContainerKind::HashSet => JsType::JsApiHashSet,
            ContainerKind::LinkedList => JsType::JsApiLinkedList,
            ContainerKind::List => JsType::JsApiList,
            ContainerKind::PlainArray => JsType::JsApiPlainArray,
        }
    }

    /// Kind of a container object type.
    #[must_use]
    pub fn from_js_type(ty: JsType) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.js_type() == ty)
    }

    /// Global class constant of instances.
    #[must_use]
    pub const fn class(self) -> ConstantIndex {
        match self {
            ContainerKind::ArrayList => ConstantIndex::ArrayListClass,
            ContainerKind::Vector => ConstantIndex::VectorClass,
            ContainerKind::Stack => ConstantIndex::StackClass,
            ContainerKind::Queue => ConstantIndex::QueueClass,
            ContainerKind::Deque => ConstantIndex::DequeClass,
            ContainerKind::LightWeightMap => ConstantIndex::LightWeightMapClass,
            ContainerKind::LightWeightSet => ConstantIndex::LightWeightSetClass,
            ContainerKind::HashMap => ConstantIndex::HashMapClass,
            ContainerKind::HashSet => ConstantIndex::HashSetClass,
            ContainerKind::LinkedList => ConstantIndex::LinkedListClass,
            ContainerKind::List => ConstantIndex::ListClass,
            ContainerKind::PlainArray => ConstantIndex::PlainArrayClass,
        }
    }

    /// Constructor name on the global object.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            ContainerKind::ArrayList => "ArrayList",
            ContainerKind::Vector => "Vector",
            ContainerKind::Stack => "Stack",
            ContainerKind::Queue => "Queue",
            ContainerKind::Deque => "Deque",
            ContainerKind::LightWeightMap => "LightWeightMap",
            ContainerKind::LightWeightSet => "LightWeightSet",
            ContainerKind::HashMap => "HashMap",
            ContainerKind::HashSet => "HashSet",
            ContainerKind::LinkedList => "LinkedList",
            ContainerKind::List => "List",
            ContainerKind::PlainArray => "PlainArray",
        }
    }

    /// Instance size.
    #[must_use]
    pub const fn object_size(self) -> u64 {
        match self {
            ContainerKind::ArrayList => array_list::SIZE,
            ContainerKind::Vector => vector::SIZE,
            ContainerKind::Stack => stack::SIZE,
            ContainerKind::Queue => queue::SIZE,
            ContainerKind::Deque => deque::SIZE,
            ContainerKind::LightWeightMap => light_weight_map::SIZE,
            ContainerKind::LightWeightSet => light_weight_set::SIZE,
            ContainerKind::HashMap | ContainerKind::HashSet => hash_map::SIZE,
            ContainerKind::LinkedList | ContainerKind::List => tagged_list::SIZE,
            ContainerKind::PlainArray => plain_array::SIZE,
        }
    }

    fn list_entry_size(self) -> u32 {
        if self == ContainerKind::LinkedList {
            tagged_list::DOUBLE_ENTRY_SIZE
        } else {
            tagged_list::SINGLE_ENTRY_SIZE
        }
    }
}

/// The container iteration builtins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ContainersType {
    /// `Vector.prototype.forEach`.
    VectorForEach,
    /// `Vector.prototype.replaceAllElements`.
    VectorReplaceAllElements,
    /// `Stack.prototype.forEach`.
    StackForEach,
    /// `PlainArray.prototype.forEach`.
    PlainArrayForEach,
    /// `Queue.prototype.forEach`.
    QueueForEach,
    /// `Deque.prototype.forEach`.
    DequeForEach,
    /// `LightWeightMap.prototype.forEach`.
    LightWeightMapForEach,
    /// `LightWeightSet.prototype.forEach`.
    LightWeightSetForEach,
    /// `HashMap.prototype.forEach`.
    HashMapForEach,
    /// `HashSet.prototype.forEach`.
    HashSetForEach,
    /// `LinkedList.prototype.forEach`.
    LinkedListForEach,
    /// `List.prototype.forEach`.
    ListForEach,
    /// `ArrayList.prototype.forEach`.
    ArrayListForEach,
    /// `ArrayList.prototype.replaceAllElements`.
    ArrayListReplaceAllElements,
}

impl ContainersType {
    /// Every iteration builtin.
    pub const ALL: [ContainersType; 14] = [
        ContainersType::VectorForEach,
        ContainersType::VectorReplaceAllElements,
        ContainersType::StackForEach,
        ContainersType::PlainArrayForEach,
        ContainersType::QueueForEach,
        ContainersType::DequeForEach,
        ContainersType::LightWeightMapForEach,
        ContainersType::LightWeightSetForEach,
        ContainersType::HashMapForEach,
        ContainersType::HashSetForEach,
        ContainersType::LinkedListForEach,
        ContainersType::ListForEach,
        ContainersType::ArrayListForEach,
        ContainersType::ArrayListReplaceAllElements,
    ];

    /// Decode a discriminant.
    #[must_use]
    pub fn from_u32(raw: u32) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    /// Container family iterated.
    #[must_use]
    pub const fn kind(self) -> ContainerKind {
        match self {
            ContainersType::VectorForEach | ContainersType::VectorReplaceAllElements => ContainerKind::Vector,
            ContainersType::StackForEach => ContainerKind::Stack,
            ContainersType::PlainArrayForEach => ContainerKind::PlainArray,
            ContainersType::QueueForEach => ContainerKind::Queue,
            ContainersType::DequeForEach => ContainerKind::Deque,
            ContainersType::LightWeightMapForEach => ContainerKind::LightWeightMap,
            ContainersType::LightWeightSetForEach => ContainerKind::LightWeightSet,
            ContainersType::HashMapForEach => ContainerKind::HashMap,
            ContainersType::HashSetForEach => ContainerKind::HashSet,
            ContainersType::LinkedListForEach => ContainerKind::LinkedList,
            ContainersType::ListForEach => ContainerKind::List,
            ContainersType::ArrayListForEach | ContainersType::ArrayListReplaceAllElements => {
                ContainerKind::ArrayList
            }
        }
    }

    /// Whether the callback result is stored back.
    #[must_use]
    pub const fn is_replace_all(self) -> bool {
        matches!(
            self,
            ContainersType::VectorReplaceAllElements | ContainersType::ArrayListReplaceAllElements
        )
    }

    /// Method name on the prototype.
    #[must_use]
    pub const fn method_name(self) -> &'static str {
        if self.is_replace_all() {
            "replaceAllElements"
        } else {
            "forEach"
        }
    }
}

const RING_INITIAL_CAPACITY: u32 = 8;

// =============================================================================
// Construction and sizing
// =============================================================================

impl JsThread {
    /// Allocate an empty container.
    ///
    /// # Errors
    ///
    /// Fails if the heap is exhausted beyond its ceiling.
    pub fn new_container(&mut self, kind: ContainerKind) -> KilnResult<TaggedValue> {
        let obj = self.new_object_of(kind.class())?;
        let base = obj.as_address() + object::SIZE;
        match kind {
            ContainerKind::ArrayList => {
                self.heap.set_field(obj, array_list::LENGTH_OFFSET, TaggedValue::int(0))?;
            }
            ContainerKind::Vector => self.heap.write_u64(base, 0)?,
            ContainerKind::Stack => {
                self.heap.write_u64(base, 0)?;
                self.heap.write_u32(obj.as_address() + stack::TOP_OFFSET, (-1i32) as u32)?;
            }
            ContainerKind::Queue | ContainerKind::Deque => {
                self.heap.write_u64(base, 0)?;
                let ring = self.new_tagged_array(RING_INITIAL_CAPACITY, TaggedValue::HOLE)?;
                self.heap.set_field(obj, object::ELEMENTS_OFFSET, ring)?;
            }
            ContainerKind::LightWeightMap => {
                let empty = self.heap.constant(ConstantIndex::EmptyArray)?;
                self.heap.set_field(obj, light_weight_map::HASHES_OFFSET, empty)?;
                self.heap.set_field(obj, light_weight_map::KEYS_OFFSET, empty)?;
                self.heap.set_field(obj, light_weight_map::VALUES_OFFSET, empty)?;
                self.heap.set_field(obj, light_weight_map::LENGTH_OFFSET, TaggedValue::int(0))?;
            }
            ContainerKind::LightWeightSet => {
                let empty = self.heap.constant(ConstantIndex::EmptyArray)?;
                self.heap.set_field(obj, light_weight_set::HASHES_OFFSET, empty)?;
                self.heap.set_field(obj, light_weight_set::VALUES_OFFSET, empty)?;
                self.heap.set_field(obj, light_weight_set::LENGTH_OFFSET, TaggedValue::int(0))?;
            }
            ContainerKind::PlainArray => {
                let empty = self.heap.constant(ConstantIndex::EmptyArray)?;
                self.heap.set_field(obj, plain_array::KEYS_OFFSET, empty)?;
                self.heap.set_field(obj, plain_array::VALUES_OFFSET, empty)?;
                self.heap.set_field(obj, plain_array::LENGTH_OFFSET, TaggedValue::int(0))?;
            }
            ContainerKind::HashMap | ContainerKind::HashSet => {
                let table = self.new_tagged_array(hash_map::DEFAULT_CAPACITY, TaggedValue::HOLE)?;
                self.heap.set_field(obj, hash_map::TABLE_OFFSET, table)?;
                self.heap.set_field(obj, hash_map::SIZE_OFFSET, TaggedValue::int(0))?;
            }
            ContainerKind::LinkedList | ContainerKind::List => {
                let entry = kind.list_entry_size();
                let len = tagged_list::ELEMENTS_START_INDEX + entry * 4;
                let list = self.new_tagged_array(len, TaggedValue::HOLE)?;
                let head = TaggedValue::int(tagged_list::ELEMENTS_START_INDEX as i32);
                self.array_set(list, tagged_list::NUMBER_OF_NODE_INDEX, TaggedValue::int(0))?;
                self.array_set(list, tagged_list::NUMBER_OF_DELETED_NODES_INDEX, TaggedValue::int(0))?;
                self.array_set(list, tagged_list::HEAD_TABLE_INDEX, head)?;
                self.array_set(list, tagged_list::TAIL_TABLE_INDEX, head)?;
                let sentinel = tagged_list::ELEMENTS_START_INDEX;
                self.array_set(list, sentinel + tagged_list::NEXT_PTR_OFFSET, head)?;
                if entry == tagged_list::DOUBLE_ENTRY_SIZE {
                    self.array_set(list, sentinel + tagged_list::PREV_PTR_OFFSET, head)?;
                }
                self.heap.set_field(obj, tagged_list::LIST_OFFSET, list)?;
            }
        }
        Ok(obj)
    }

    /// Container kind of `value`, if it is one.
    #[must_use]
    pub fn container_kind(&self, value: TaggedValue) -> Option<ContainerKind> {
        self.object_type(value).and_then(ContainerKind::from_js_type)
    }

    fn elements(&self, obj: TaggedValue) -> KilnResult<TaggedValue> {
        self.heap.field(obj, object::ELEMENTS_OFFSET)
    }

    fn tagged_int_field(&self, obj: TaggedValue, offset: u64) -> KilnResult<u32> {
        Ok(self.heap.field(obj, offset)?.as_int() as u32)
    }

    fn ring_capacity(&self, obj: TaggedValue) -> KilnResult<u32> {
        let ring = self.elements(obj)?;
        Ok(self.array_len(ring)?.max(1))
    }

    /// Loop bound the iteration builtins use: element count, except for hash
    /// containers where it is the bucket count.
    ///
    /// # Errors
    ///
    /// Fails if `obj` is not a mapped container of `kind`.
    pub fn container_size(&self, obj: TaggedValue, kind: ContainerKind) -> KilnResult<u32> {
        let address = obj.as_address();
        match kind {
            ContainerKind::ArrayList => self.tagged_int_field(obj, array_list::LENGTH_OFFSET),
            ContainerKind::Vector => self.heap.read_u32(address + vector::ELEMENT_COUNT_OFFSET),
            ContainerKind::Stack => {
                let top = self.heap.read_u32(address + stack::TOP_OFFSET)? as i32;
                Ok((top + 1) as u32)
            }
            ContainerKind::Queue => {
                let front = self.heap.read_u32(address + queue::FRONT_OFFSET)?;
                let tail = self.heap.read_u32(address + queue::TAIL_OFFSET)?;
                let cap = self.ring_capacity(obj)?;
                Ok((tail + cap - front) % cap)
            }
            ContainerKind::Deque => {
                let first = self.heap.read_u32(address + deque::FIRST_OFFSET)?;
                let last = self.heap.read_u32(address + deque::LAST_OFFSET)?;
                let cap = self.ring_capacity(obj)?;
                Ok((last + cap - first) % cap)
            }
            ContainerKind::LightWeightMap => self.tagged_int_field(obj, light_weight_map::LENGTH_OFFSET),
            ContainerKind::LightWeightSet => self.tagged_int_field(obj, light_weight_set::LENGTH_OFFSET),
            ContainerKind::PlainArray => self.tagged_int_field(obj, plain_array::LENGTH_OFFSET),
            ContainerKind::HashMap | ContainerKind::HashSet => {
                let table = self.heap.field(obj, hash_map::TABLE_OFFSET)?;
                self.array_len(table)
            }
            ContainerKind::LinkedList | ContainerKind::List => {
                let list = self.heap.field(obj, tagged_list::LIST_OFFSET)?;
                Ok(self.array_get(list, tagged_list::NUMBER_OF_NODE_INDEX)?.as_int() as u32)
            }
        }
    }

    /// Number of entries, as `length` reports it.
    ///
    /// # Errors
    ///
    /// Fails if `obj` is not a mapped container of `kind`.
    pub fn container_len(&self, obj: TaggedValue, kind: ContainerKind) -> KilnResult<u32> {
        match kind {
            ContainerKind::HashMap | ContainerKind::HashSet => {
                self.tagged_int_field(obj, hash_map::SIZE_OFFSET)
            }
            _ => self.container_size(obj, kind),
        }
    }

    /// Value at logical position `index`.
    ///
    /// For `Queue` the index is a raw ring position; hash containers return
    /// the bucket head; lists return the entry slot at `index`.
    ///
    /// # Errors
    ///
    /// Fails if `obj` is not a mapped container of `kind`.
    pub fn container_get(&self, obj: TaggedValue, kind: ContainerKind, index: u32) -> KilnResult<TaggedValue> {
        match kind {
            ContainerKind::ArrayList | ContainerKind::Vector | ContainerKind::Stack | ContainerKind::Queue => {
                let elements = self.elements(obj)?;
                self.array_get(elements, index)
            }
            ContainerKind::Deque => {
                let first = self.heap.read_u32(obj.as_address() + deque::FIRST_OFFSET)?;
                let cap = self.ring_capacity(obj)?;
                self.array_get(self.elements(obj)?, (first + index) % cap)
            }
            ContainerKind::LightWeightMap => {
                self.array_get(self.heap.field(obj, light_weight_map::VALUES_OFFSET)?, index)
            }
            ContainerKind::LightWeightSet => {
                self.array_get(self.heap.field(obj, light_weight_set::VALUES_OFFSET)?, index)
            }
            ContainerKind::PlainArray => {
                self.array_get(self.heap.field(obj, plain_array::VALUES_OFFSET)?, index)
            }
            ContainerKind::HashMap | ContainerKind::HashSet => {
                self.array_get(self.heap.field(obj, hash_map::TABLE_OFFSET)?, index)
            }
            ContainerKind::LinkedList | ContainerKind::List => {
                self.array_get(self.heap.field(obj, tagged_list::LIST_OFFSET)?, index)
            }
        }
    }

    /// Key at position `index` of a light-weight container or `PlainArray`.
    ///
    /// # Errors
    ///
    /// Fails for other kinds.
    pub fn container_key(&self, obj: TaggedValue, kind: ContainerKind, index: u32) -> KilnResult<TaggedValue> {
        match kind {
            ContainerKind::LightWeightMap => {
                self.array_get(self.heap.field(obj, light_weight_map::KEYS_OFFSET)?, index)
            }
            ContainerKind::LightWeightSet => {
                self.array_get(self.heap.field(obj, light_weight_set::VALUES_OFFSET)?, index)
            }
            ContainerKind::PlainArray => {
                self.array_get(self.heap.field(obj, plain_array::KEYS_OFFSET)?, index)
            }
            _ => Err(KilnError::Unreachable(format!("{} has no keys", kind.name()))),
        }
    }

    /// Overwrite position `index` of an `ArrayList` or `Vector`.
    ///
    /// # Errors
    ///
    /// Fails for other kinds or an out-of-range index.
    pub fn container_set(
        &mut self,
        obj: TaggedValue,
        kind: ContainerKind,
        index: u32,
        value: TaggedValue,
    ) -> KilnResult<()> {
        match kind {
            ContainerKind::ArrayList | ContainerKind::Vector => {
                let elements = self.elements(obj)?;
                self.array_set(elements, index, value)
            }
            _ => Err(KilnError::Unreachable(format!("{} cannot be set by index", kind.name()))),
        }
    }

    /// Next raw ring position after `position` in a `Queue`.
    ///
    /// # Errors
    ///
    /// Fails if `obj` is not mapped.
    pub fn queue_next_position(&self, obj: TaggedValue, position: u32) -> KilnResult<u32> {
        Ok((position + 1) % self.ring_capacity(obj)?)
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    fn ensure_elements(&mut self, obj: TaggedValue, needed: u32) -> KilnResult<TaggedValue> {
        let elements = self.elements(obj)?;
        let cap = self.array_len(elements)?;
        if needed <= cap {
            return Ok(elements);
        }
        let grown = self.grow_tagged_array(elements, needed.max(cap * 2).max(8), TaggedValue::HOLE)?;
        self.heap.set_field(obj, object::ELEMENTS_OFFSET, grown)?;
        Ok(grown)
    }

    fn set_count(&mut self, obj: TaggedValue, kind: ContainerKind, count: u32) -> KilnResult<()> {
        let address = obj.as_address();
        match kind {
            ContainerKind::ArrayList => {
                self.heap.set_field(obj, array_list::LENGTH_OFFSET, TaggedValue::int(count as i32))
            }
            ContainerKind::Vector => self.heap.write_u32(address + vector::ELEMENT_COUNT_OFFSET, count),
            ContainerKind::Stack => self.heap.write_u32(address + stack::TOP_OFFSET, count.wrapping_sub(1)),
            _ => Err(KilnError::Unreachable(format!("{} has no element count", kind.name()))),
        }
    }

    /// Append `value` (push for `Stack`, enqueue for `Queue`, insert-end for `Deque`).
    ///
    /// Map-like kinds use [`JsThread::container_put`].
    ///
    /// # Errors
    ///
    /// Fails for map-like kinds.
    pub fn container_add(&mut self, obj: TaggedValue, kind: ContainerKind, value: TaggedValue) -> KilnResult<()> {
        match kind {
            ContainerKind::ArrayList | ContainerKind::Vector | ContainerKind::Stack => {
                let count = self.container_size(obj, kind)?;
                let elements = self.ensure_elements(obj, count + 1)?;
                self.array_set(elements, count, value)?;
                self.set_count(obj, kind, count + 1)
            }
            ContainerKind::Queue => {
                self.grow_ring_if_full(obj, kind)?;
                let tail_address = obj.as_address() + queue::TAIL_OFFSET;
                let tail = self.heap.read_u32(tail_address)?;
                let cap = self.ring_capacity(obj)?;
                self.array_set(self.elements(obj)?, tail, value)?;
                self.heap.write_u32(tail_address, (tail + 1) % cap)
            }
            ContainerKind::Deque => {
                self.grow_ring_if_full(obj, kind)?;
                let last_address = obj.as_address() + deque::LAST_OFFSET;
                let last = self.heap.read_u32(last_address)?;
                let cap = self.ring_capacity(obj)?;
                self.array_set(self.elements(obj)?, last, value)?;
                self.heap.write_u32(last_address, (last + 1) % cap)
            }
            ContainerKind::LightWeightSet | ContainerKind::HashSet => {
                self.container_put(obj, kind, value, TaggedValue::TRUE)
            }
            ContainerKind::LinkedList | ContainerKind::List => self.tagged_list_add(obj, kind, value),
            ContainerKind::LightWeightMap | ContainerKind::HashMap | ContainerKind::PlainArray => {
                Err(KilnError::Unreachable(format!("{} needs a key", kind.name())))
            }
        }
    }

    /// Insert `value` at the front of a `Deque`.
    ///
    /// # Errors
    ///
    /// Fails if `obj` is not a mapped `Deque`.
    pub fn deque_insert_front(&mut self, obj: TaggedValue, value: TaggedValue) -> KilnResult<()> {
        self.grow_ring_if_full(obj, ContainerKind::Deque)?;
        let first_address = obj.as_address() + deque::FIRST_OFFSET;
        let first = self.heap.read_u32(first_address)?;
        let cap = self.ring_capacity(obj)?;
        let new_first = (first + cap - 1) % cap;
        self.array_set(self.elements(obj)?, new_first, value)?;
        self.heap.write_u32(first_address, new_first)
    }

    fn grow_ring_if_full(&mut self, obj: TaggedValue, kind: ContainerKind) -> KilnResult<()> {
        let size = self.container_size(obj, kind)?;
        let cap = self.ring_capacity(obj)?;
        if size + 1 < cap {
            return Ok(());
        }
        let (head_offset, tail_offset) = match kind {
            ContainerKind::Queue => (queue::FRONT_OFFSET, queue::TAIL_OFFSET),
            _ => (deque::FIRST_OFFSET, deque::LAST_OFFSET),
        };
        let head = self.heap.read_u32(obj.as_address() + head_offset)?;
        let old = self.elements(obj)?;
        let grown = self.new_tagged_array(cap * 2, TaggedValue::HOLE)?;
        for i in 0..size {
            let v = self.array_get(old, (head + i) % cap)?;
            self.array_set(grown, i, v)?;
        }
        self.heap.set_field(obj, object::ELEMENTS_OFFSET, grown)?;
        self.heap.write_u32(obj.as_address() + head_offset, 0)?;
        self.heap.write_u32(obj.as_address() + tail_offset, size)
    }

    /// Remove and return position `index` of an `ArrayList` or `Vector`.
    ///
    /// # Errors
    ///
    /// Fails for other kinds.
    pub fn container_remove_at(&mut self, obj: TaggedValue, kind: ContainerKind, index: u32) -> KilnResult<TaggedValue> {
        if !matches!(kind, ContainerKind::ArrayList | ContainerKind::Vector) {
            return Err(KilnError::Unreachable(format!("{} cannot remove by index", kind.name())));
        }
        let count = self.container_size(obj, kind)?;
        if index >= count {
            return Ok(TaggedValue::UNDEFINED);
        }
        let elements = self.elements(obj)?;
        let removed = self.array_get(elements, index)?;
        for i in index..count - 1 {
            let next = self.array_get(elements, i + 1)?;
            self.array_set(elements, i, next)?;
        }
        self.array_set(elements, count - 1, TaggedValue::HOLE)?;
        self.set_count(obj, kind, count - 1)?;
        Ok(removed)
    }

    /// Pop the top of a `Stack`.
    ///
    /// # Errors
    ///
    /// Fails if `obj` is not a mapped `Stack`.
    pub fn stack_pop(&mut self, obj: TaggedValue) -> KilnResult<TaggedValue> {
        let count = self.container_size(obj, ContainerKind::Stack)?;
        if count == 0 {
            return Ok(TaggedValue::UNDEFINED);
        }
        let elements = self.elements(obj)?;
        let top = self.array_get(elements, count - 1)?;
        self.array_set(elements, count - 1, TaggedValue::HOLE)?;
        self.set_count(obj, ContainerKind::Stack, count - 1)?;
        Ok(top)
    }

    // =========================================================================
    // Keyed containers
    // =========================================================================

    /// Hash of a key: string contents, number value or object identity.
    ///
    /// # Errors
    ///
    /// Fails if a heap key is not mapped.
    pub fn hash_value(&mut self, key: TaggedValue) -> KilnResult<u32> {
        if key.is_int() {
            return Ok(key.as_int() as u32);
        }
        if key.is_double() {
            let bits = key.as_double().to_bits();
            return Ok((bits ^ (bits >> 32)) as u32);
        }
        if self.is_string(key) {
            return self.string_hash(key);
        }
        if key.is_heap_object() {
            let existing = self.heap.field(key, object::HASH_OFFSET)?;
            if existing.is_int() && existing.as_int() != 0 {
                return Ok(existing.as_int() as u32);
            }
            let hash = self.next_hash;
            self.next_hash = self.next_hash.wrapping_add(1).max(1);
            self.heap.set_field(key, object::HASH_OFFSET, TaggedValue::int(hash))?;
            return Ok(hash as u32);
        }
        Ok(key.raw() as u32)
    }

    /// Canonical form of a key: interned strings, int-valued doubles as ints.
    fn normalize_key(&mut self, key: TaggedValue) -> KilnResult<TaggedValue> {
        if key.is_double() {
            return Ok(TaggedValue::number(key.as_double()));
        }
        if self.is_string(key) {
            return self.intern_string(key);
        }
        Ok(key)
    }

    /// Insert or update `key → value` in a map-like container.
    ///
    /// # Errors
    ///
    /// Fails for list-like kinds.
    pub fn container_put(
        &mut self,
        obj: TaggedValue,
        kind: ContainerKind,
        key: TaggedValue,
        value: TaggedValue,
    ) -> KilnResult<()> {
        let key = self.normalize_key(key)?;
        match kind {
            ContainerKind::LightWeightMap | ContainerKind::LightWeightSet => {
                self.light_weight_put(obj, kind, key, value)
            }
            ContainerKind::PlainArray => self.plain_array_put(obj, key, value),
            ContainerKind::HashMap | ContainerKind::HashSet => self.hash_put(obj, key, value),
            _ => Err(KilnError::Unreachable(format!("{} is not keyed", kind.name()))),
        }
    }

    /// Look up `key` in a map-like container.
    ///
    /// # Errors
    ///
    /// Fails for list-like kinds.
    pub fn container_lookup(&mut self, obj: TaggedValue, kind: ContainerKind, key: TaggedValue) -> KilnResult<Option<TaggedValue>> {
        let key = self.normalize_key(key)?;
        match kind {
            ContainerKind::LightWeightMap | ContainerKind::LightWeightSet => {
                let hash = self.hash_value(key)?;
                let (keys_offset, values_offset) = light_weight_offsets(kind);
                let len = self.container_size(obj, kind)?;
                let keys = self.heap.field(obj, keys_offset)?;
                for i in self.hash_range_start(obj, kind, hash, len)?..len {
                    let k = self.array_get(keys, i)?;
                    if k == key {
                        let values = self.heap.field(obj, values_offset)?;
                        return self.array_get(values, i).map(Some);
                    }
                }
                Ok(None)
            }
            ContainerKind::PlainArray => {
                let len = self.container_size(obj, kind)?;
                let keys = self.heap.field(obj, plain_array::KEYS_OFFSET)?;
                for i in 0..len {
                    if self.array_get(keys, i)? == key {
                        let values = self.heap.field(obj, plain_array::VALUES_OFFSET)?;
                        return self.array_get(values, i).map(Some);
                    }
                }
                Ok(None)
            }
            ContainerKind::HashMap | ContainerKind::HashSet => self.hash_get(obj, key),
            _ => Err(KilnError::Unreachable(format!("{} is not keyed", kind.name()))),
        }
    }

    fn hash_range_start(&self, obj: TaggedValue, kind: ContainerKind, hash: u32, len: u32) -> KilnResult<u32> {
        let hashes = self.heap.field(obj, hashes_offset(kind))?;
        let (mut lo, mut hi) = (0, len);
        while lo < hi {
            let mid = (lo + hi) / 2;
            if (self.array_get(hashes, mid)?.as_int() as u32) < hash {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    fn insert_at(&mut self, obj: TaggedValue, offset: u64, len: u32, pos: u32, value: TaggedValue) -> KilnResult<()> {
        let mut arr = self.heap.field(obj, offset)?;
        let cap = self.array_len(arr)?;
        if len + 1 > cap {
            arr = self.grow_tagged_array(arr, (cap * 2).max(8), TaggedValue::HOLE)?;
            self.heap.set_field(obj, offset, arr)?;
        }
        let mut i = len;
        while i > pos {
            let prev = self.array_get(arr, i - 1)?;
            self.array_set(arr, i, prev)?;
            i -= 1;
        }
        self.array_set(arr, pos, value)
    }

    fn light_weight_put(&mut self, obj: TaggedValue, kind: ContainerKind, key: TaggedValue, value: TaggedValue) -> KilnResult<()> {
        let hash = self.hash_value(key)?;
        let len = self.container_size(obj, kind)?;
        let (keys_offset, values_offset) = light_weight_offsets(kind);
        let keys = self.heap.field(obj, keys_offset)?;
        let hashes = self.heap.field(obj, hashes_offset(kind))?;
        let mut pos = self.hash_range_start(obj, kind, hash, len)?;
        while pos < len && self.array_get(hashes, pos)?.as_int() as u32 == hash {
            if self.array_get(keys, pos)? == key {
                if kind == ContainerKind::LightWeightMap {
                    let values = self.heap.field(obj, values_offset)?;
                    self.array_set(values, pos, value)?;
                }
                return Ok(());
            }
            pos += 1;
        }
        self.insert_at(obj, hashes_offset(kind), len, pos, TaggedValue::int(hash as i32))?;
        self.insert_at(obj, keys_offset, len, pos, key)?;
        if kind == ContainerKind::LightWeightMap {
            self.insert_at(obj, values_offset, len, pos, value)?;
        }
        let length_offset = match kind {
            ContainerKind::LightWeightMap => light_weight_map::LENGTH_OFFSET,
            _ => light_weight_set::LENGTH_OFFSET,
        };
        self.heap.set_field(obj, length_offset, TaggedValue::int(len as i32 + 1))
    }

    fn plain_array_put(&mut self, obj: TaggedValue, key: TaggedValue, value: TaggedValue) -> KilnResult<()> {
        if !key.is_int() {
            return Err(KilnError::execution("PlainArray keys are int32"));
        }
        let len = self.container_size(obj, ContainerKind::PlainArray)?;
        let keys = self.heap.field(obj, plain_array::KEYS_OFFSET)?;
        let mut pos = 0;
        while pos < len {
            let k = self.array_get(keys, pos)?.as_int();
            if k == key.as_int() {
                let values = self.heap.field(obj, plain_array::VALUES_OFFSET)?;
                return self.array_set(values, pos, value);
            }
            if k > key.as_int() {
                break;
            }
            pos += 1;
        }
        self.insert_at(obj, plain_array::KEYS_OFFSET, len, pos, key)?;
        self.insert_at(obj, plain_array::VALUES_OFFSET, len, pos, value)?;
        self.heap.set_field(obj, plain_array::LENGTH_OFFSET, TaggedValue::int(len as i32 + 1))
    }

    // =========================================================================
    // Hash buckets
    // =========================================================================

    fn new_linked_node(&mut self, hash: u32, key: TaggedValue, value: TaggedValue) -> KilnResult<TaggedValue> {
        let class = self.heap.constant(ConstantIndex::LinkedNodeClass)?;
        let node = TaggedValue::object(self.heap.allocate(linked_node::SIZE)?);
        self.heap.set_field(node, object::HCLASS_OFFSET, class)?;
        self.heap.set_field(node, linked_node::HASH_OFFSET, TaggedValue::int(hash as i32))?;
        self.heap.set_field(node, linked_node::KEY_OFFSET, key)?;
        self.heap.set_field(node, linked_node::VALUE_OFFSET, value)?;
        self.heap.set_field(node, linked_node::NEXT_OFFSET, TaggedValue::HOLE)?;
        Ok(node)
    }

    fn hash_put(&mut self, obj: TaggedValue, key: TaggedValue, value: TaggedValue) -> KilnResult<()> {
        let hash = self.hash_value(key)?;
        let table = self.heap.field(obj, hash_map::TABLE_OFFSET)?;
        let added = self.bucket_insert(table, hash, key, value)?;
        if added {
            let size = self.tagged_int_field(obj, hash_map::SIZE_OFFSET)? + 1;
            self.heap.set_field(obj, hash_map::SIZE_OFFSET, TaggedValue::int(size as i32))?;
            let cap = self.array_len(table)?;
            if size * 4 > cap * 3 {
                self.hash_resize(obj, cap * 2)?;
            }
        }
        Ok(())
    }

    fn bucket_insert(&mut self, table: TaggedValue, hash: u32, key: TaggedValue, value: TaggedValue) -> KilnResult<bool> {
        let index = hash & (self.array_len(table)? - 1);
        let head = self.array_get(table, index)?;
        if head.is_hole() {
            let node = self.new_linked_node(hash, key, value)?;
            self.array_set(table, index, node)?;
            return Ok(true);
        }
        if self.object_type(head) == Some(JsType::RbTreeNode) {
            let (root, added) = self.rb_insert(head, hash, key, value)?;
            self.heap.set_field(root, rb_tree_node::IS_RED_OFFSET, TaggedValue::FALSE)?;
            self.array_set(table, index, root)?;
            return Ok(added);
        }
        let mut node = head;
        let mut chain = 1;
        loop {
            if self.heap.field(node, linked_node::KEY_OFFSET)? == key {
                self.heap.set_field(node, linked_node::VALUE_OFFSET, value)?;
                return Ok(false);
            }
            let next = self.heap.field(node, linked_node::NEXT_OFFSET)?;
            if next.is_hole() {
                break;
            }
            node = next;
            chain += 1;
        }
        let fresh = self.new_linked_node(hash, key, value)?;
        self.heap.set_field(node, linked_node::NEXT_OFFSET, fresh)?;
        if chain + 1 >= hash_map::TREEIFY_THRESHOLD {
            self.treeify(table, index)?;
        }
        Ok(true)
    }

    fn treeify(&mut self, table: TaggedValue, index: u32) -> KilnResult<()> {
        let mut node = self.array_get(table, index)?;
        let mut root = TaggedValue::HOLE;
        while !node.is_hole() {
            let hash = self.heap.field(node, linked_node::HASH_OFFSET)?.as_int() as u32;
            let key = self.heap.field(node, linked_node::KEY_OFFSET)?;
            let value = self.heap.field(node, linked_node::VALUE_OFFSET)?;
            root = self.rb_insert(root, hash, key, value)?.0;
            self.heap.set_field(root, rb_tree_node::IS_RED_OFFSET, TaggedValue::FALSE)?;
            node = self.heap.field(node, linked_node::NEXT_OFFSET)?;
        }
        tracing::trace!(index, "hash bucket treeified");
        self.array_set(table, index, root)
    }

    fn hash_get(&mut self, obj: TaggedValue, key: TaggedValue) -> KilnResult<Option<TaggedValue>> {
        let hash = self.hash_value(key)?;
        let table = self.heap.field(obj, hash_map::TABLE_OFFSET)?;
        let index = hash & (self.array_len(table)? - 1);
        let mut node = self.array_get(table, index)?;
        if self.object_type(node) == Some(JsType::RbTreeNode) {
            while !node.is_hole() {
                let node_key = self.heap.field(node, rb_tree_node::KEY_OFFSET)?;
                if node_key == key {
                    return self.heap.field(node, rb_tree_node::VALUE_OFFSET).map(Some);
                }
                let node_hash = self.heap.field(node, rb_tree_node::HASH_OFFSET)?.as_int() as u32;
                let offset = if (hash, key.raw()) < (node_hash, node_key.raw()) {
                    rb_tree_node::LEFT_OFFSET
                } else {
                    rb_tree_node::RIGHT_OFFSET
                };
                node = self.heap.field(node, offset)?;
            }
            return Ok(None);
        }
        while !node.is_hole() {
            if self.heap.field(node, linked_node::KEY_OFFSET)? == key {
                return self.heap.field(node, linked_node::VALUE_OFFSET).map(Some);
            }
            node = self.heap.field(node, linked_node::NEXT_OFFSET)?;
        }
        Ok(None)
    }

    /// Every `(hash, key, value)` of a hash container, in bucket order.
    ///
    /// # Errors
    ///
    /// Fails if `obj` is not a mapped hash container.
    pub fn hash_entries(&self, obj: TaggedValue) -> KilnResult<Vec<(u32, TaggedValue, TaggedValue)>> {
        let table = self.heap.field(obj, hash_map::TABLE_OFFSET)?;
        let mut out = Vec::new();
        for i in 0..self.array_len(table)? {
            let head = self.array_get(table, i)?;
            if self.object_type(head) == Some(JsType::RbTreeNode) {
                self.rb_collect(head, &mut out)?;
                continue;
            }
            let mut node = head;
            while !node.is_hole() {
                out.push((
                    self.heap.field(node, linked_node::HASH_OFFSET)?.as_int() as u32,
                    self.heap.field(node, linked_node::KEY_OFFSET)?,
                    self.heap.field(node, linked_node::VALUE_OFFSET)?,
                ));
                node = self.heap.field(node, linked_node::NEXT_OFFSET)?;
            }
        }
        Ok(out)
    }

    fn hash_resize(&mut self, obj: TaggedValue, new_cap: u32) -> KilnResult<()> {
        let entries = self.hash_entries(obj)?;
        let table = self.new_tagged_array(new_cap, TaggedValue::HOLE)?;
        for (hash, key, value) in entries {
            self.bucket_insert(table, hash, key, value)?;
        }
        self.heap.set_field(obj, hash_map::TABLE_OFFSET, table)
    }

    // =========================================================================
    // Red-black tree buckets (left-leaning)
    // =========================================================================

    fn is_red(&self, node: TaggedValue) -> KilnResult<bool> {
        if node.is_hole() {
            return Ok(false);
        }
        Ok(self.heap.field(node, rb_tree_node::IS_RED_OFFSET)?.is_true())
    }

    fn rb_count(&self, node: TaggedValue) -> KilnResult<i32> {
        if node.is_hole() {
            return Ok(0);
        }
        Ok(self.heap.field(node, rb_tree_node::COUNT_OFFSET)?.as_int())
    }

    fn rb_child(&self, node: TaggedValue, offset: u64) -> KilnResult<TaggedValue> {
        self.heap.field(node, offset)
    }

    fn rb_fix_count(&mut self, node: TaggedValue) -> KilnResult<()> {
        let left = self.rb_child(node, rb_tree_node::LEFT_OFFSET)?;
        let right = self.rb_child(node, rb_tree_node::RIGHT_OFFSET)?;
        let count = 1 + self.rb_count(left)? + self.rb_count(right)?;
        self.heap.set_field(node, rb_tree_node::COUNT_OFFSET, TaggedValue::int(count))
    }

    fn rb_rotate(&mut self, node: TaggedValue, left: bool) -> KilnResult<TaggedValue> {
        let (toward, away) = if left {
            (rb_tree_node::LEFT_OFFSET, rb_tree_node::RIGHT_OFFSET)
        } else {
            (rb_tree_node::RIGHT_OFFSET, rb_tree_node::LEFT_OFFSET)
        };
        let pivot = self.rb_child(node, away)?;
        let inner = self.rb_child(pivot, toward)?;
        self.heap.set_field(node, away, inner)?;
        self.heap.set_field(pivot, toward, node)?;
        let color = self.heap.field(node, rb_tree_node::IS_RED_OFFSET)?;
        self.heap.set_field(pivot, rb_tree_node::IS_RED_OFFSET, color)?;
        self.heap.set_field(node, rb_tree_node::IS_RED_OFFSET, TaggedValue::TRUE)?;
        self.rb_fix_count(node)?;
        self.rb_fix_count(pivot)?;
        Ok(pivot)
    }

    fn rb_insert(&mut self, node: TaggedValue, hash: u32, key: TaggedValue, value: TaggedValue) -> KilnResult<(TaggedValue, bool)> {
        if node.is_hole() {
            let class = self.heap.constant(ConstantIndex::RbTreeNodeClass)?;
            let fresh = TaggedValue::object(self.heap.allocate(rb_tree_node::SIZE)?);
            self.heap.set_field(fresh, object::HCLASS_OFFSET, class)?;
            self.heap.set_field(fresh, rb_tree_node::HASH_OFFSET, TaggedValue::int(hash as i32))?;
            self.heap.set_field(fresh, rb_tree_node::KEY_OFFSET, key)?;
            self.heap.set_field(fresh, rb_tree_node::VALUE_OFFSET, value)?;
            self.heap.set_field(fresh, rb_tree_node::LEFT_OFFSET, TaggedValue::HOLE)?;
            self.heap.set_field(fresh, rb_tree_node::RIGHT_OFFSET, TaggedValue::HOLE)?;
            self.heap.set_field(fresh, rb_tree_node::IS_RED_OFFSET, TaggedValue::TRUE)?;
            self.heap.set_field(fresh, rb_tree_node::COUNT_OFFSET, TaggedValue::int(1))?;
            return Ok((fresh, true));
        }
        let node_key = self.heap.field(node, rb_tree_node::KEY_OFFSET)?;
        let node_hash = self.heap.field(node, rb_tree_node::HASH_OFFSET)?.as_int() as u32;
        let added = match (hash, key.raw()).cmp(&(node_hash, node_key.raw())) {
            std::cmp::Ordering::Equal => {
                self.heap.set_field(node, rb_tree_node::VALUE_OFFSET, value)?;
                false
            }
            ordering => {
                let offset = if ordering.is_lt() {
                    rb_tree_node::LEFT_OFFSET
                } else {
                    rb_tree_node::RIGHT_OFFSET
                };
                let child = self.rb_child(node, offset)?;
                let (new_child, added) = self.rb_insert(child, hash, key, value)?;
                self.heap.set_field(node, offset, new_child)?;
                added
            }
        };

        let mut node = node;
        let left = self.rb_child(node, rb_tree_node::LEFT_OFFSET)?;
        let right = self.rb_child(node, rb_tree_node::RIGHT_OFFSET)?;
        if self.is_red(right)? && !self.is_red(left)? {
            node = self.rb_rotate(node, true)?;
        }
        let left = self.rb_child(node, rb_tree_node::LEFT_OFFSET)?;
        if self.is_red(left)? && self.is_red(self.rb_child(left, rb_tree_node::LEFT_OFFSET)?)? {
            node = self.rb_rotate(node, false)?;
        }
        let left = self.rb_child(node, rb_tree_node::LEFT_OFFSET)?;
        let right = self.rb_child(node, rb_tree_node::RIGHT_OFFSET)?;
        if self.is_red(left)? && self.is_red(right)? {
            self.heap.set_field(node, rb_tree_node::IS_RED_OFFSET, TaggedValue::TRUE)?;
            self.heap.set_field(left, rb_tree_node::IS_RED_OFFSET, TaggedValue::FALSE)?;
            self.heap.set_field(right, rb_tree_node::IS_RED_OFFSET, TaggedValue::FALSE)?;
        }
        self.rb_fix_count(node)?;
        Ok((node, added))
    }

    fn rb_collect(&self, node: TaggedValue, out: &mut Vec<(u32, TaggedValue, TaggedValue)>) -> KilnResult<()> {
        if node.is_hole() {
            return Ok(());
        }
        self.rb_collect(self.rb_child(node, rb_tree_node::LEFT_OFFSET)?, out)?;
        out.push((
            self.heap.field(node, rb_tree_node::HASH_OFFSET)?.as_int() as u32,
            self.heap.field(node, rb_tree_node::KEY_OFFSET)?,
            self.heap.field(node, rb_tree_node::VALUE_OFFSET)?,
        ));
        self.rb_collect(self.rb_child(node, rb_tree_node::RIGHT_OFFSET)?, out)
    }

    /// Invoke `callback(value, key, container)` for every entry of a tree
    /// bucket, stopping at the first exception.
    ///
    /// # Errors
    ///
    /// Fails if `node` is not a mapped tree node.
    pub fn rb_tree_for_each(
        &mut self,
        node: TaggedValue,
        callback: TaggedValue,
        this_arg: TaggedValue,
        container: TaggedValue,
        set_semantics: bool,
    ) -> KilnResult<TaggedValue> {
        let mut entries = Vec::new();
        self.rb_collect(node, &mut entries)?;
        for (_, key, value) in entries {
            let shown = if set_semantics { key } else { value };
            let result = self.call(callback, this_arg, &[shown, key, container]);
            if self.has_pending_exception() {
                return Ok(result);
            }
        }
        Ok(TaggedValue::UNDEFINED)
    }

    // =========================================================================
    // Tagged lists
    // =========================================================================

    fn tagged_list_add(&mut self, obj: TaggedValue, kind: ContainerKind, value: TaggedValue) -> KilnResult<()> {
        let entry = kind.list_entry_size();
        let mut list = self.heap.field(obj, tagged_list::LIST_OFFSET)?;
        let count = self.array_get(list, tagged_list::NUMBER_OF_NODE_INDEX)?.as_int() as u32;
        let deleted = self.array_get(list, tagged_list::NUMBER_OF_DELETED_NODES_INDEX)?.as_int() as u32;
        let index = tagged_list::ELEMENTS_START_INDEX + (count + deleted + 1) * entry;
        let cap = self.array_len(list)?;
        if index + entry > cap {
            list = self.grow_tagged_array(list, (cap * 2).max(index + entry), TaggedValue::HOLE)?;
            self.heap.set_field(obj, tagged_list::LIST_OFFSET, list)?;
        }
        let head = tagged_list::ELEMENTS_START_INDEX;
        let tail = self.array_get(list, tagged_list::TAIL_TABLE_INDEX)?.as_int() as u32;
        let index_value = TaggedValue::int(index as i32);
        self.array_set(list, index, value)?;
        self.array_set(list, index + tagged_list::NEXT_PTR_OFFSET, TaggedValue::int(head as i32))?;
        self.array_set(list, tail + tagged_list::NEXT_PTR_OFFSET, index_value)?;
        if entry == tagged_list::DOUBLE_ENTRY_SIZE {
            self.array_set(list, index + tagged_list::PREV_PTR_OFFSET, TaggedValue::int(tail as i32))?;
            self.array_set(list, head + tagged_list::PREV_PTR_OFFSET, index_value)?;
        }
        self.array_set(list, tagged_list::TAIL_TABLE_INDEX, index_value)?;
        self.array_set(list, tagged_list::NUMBER_OF_NODE_INDEX, TaggedValue::int(count as i32 + 1))
    }

    /// Values of a `LinkedList` or `List` in order.
    ///
    /// # Errors
    ///
    /// Fails if `obj` is not a mapped list.
    pub fn tagged_list_values(&self, obj: TaggedValue) -> KilnResult<Vec<TaggedValue>> {
        let list = self.heap.field(obj, tagged_list::LIST_OFFSET)?;
        let count = self.array_get(list, tagged_list::NUMBER_OF_NODE_INDEX)?.as_int() as u32;
        let mut node = tagged_list::ELEMENTS_START_INDEX;
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            node = self.array_get(list, node + tagged_list::NEXT_PTR_OFFSET)?.as_int() as u32;
            out.push(self.array_get(list, node)?);
        }
        Ok(out)
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    /// Generic `forEach`/`replaceAllElements`: the semantics the compiled
    /// container stubs reproduce.
    ///
    /// Invokes `callback.call(this_arg, value, key, container)` per element,
    /// re-reading the size after each call and stopping at the first
    /// exception. A proxy receiver is unwrapped once.
    pub fn container_for_each(
        &mut self,
        ty: ContainersType,
        receiver: TaggedValue,
        callback: TaggedValue,
        this_arg: TaggedValue,
    ) -> TaggedValue {
        match self.container_for_each_inner(ty, receiver, callback, this_arg) {
            Ok(v) => v,
            Err(e) => self.fault(&e),
        }
    }

    fn container_for_each_inner(
        &mut self,
        ty: ContainersType,
        receiver: TaggedValue,
        callback: TaggedValue,
        this_arg: TaggedValue,
    ) -> KilnResult<TaggedValue> {
        let kind = ty.kind();
        let mut obj = receiver;
        if self.container_kind(obj) != Some(kind) && self.object_type(obj) == Some(JsType::JsProxy) {
            obj = self.heap.field(obj, crate::layout::proxy::TARGET_OFFSET)?;
        }
        if self.container_kind(obj) != Some(kind) {
            return Ok(self.throw_type_error("incompatible receiver for container method"));
        }
        if !self.is_callable(callback) {
            return Ok(self.throw_type_error("callback is not callable"));
        }

        match kind {
            ContainerKind::Queue => {
                let length = self.container_size(obj, kind)?;
                let mut position = self.heap.read_u32(obj.as_address() + queue::FRONT_OFFSET)?;
                for k in 0..length {
                    let value = self.container_get(obj, kind, position)?;
                    position = self.queue_next_position(obj, position)?;
                    let ret = self.call(callback, this_arg, &[value, TaggedValue::int(k as i32), obj]);
                    if self.has_pending_exception() {
                        return Ok(ret);
                    }
                }
            }
            ContainerKind::Deque => {
                let mut first = self.heap.read_u32(obj.as_address() + deque::FIRST_OFFSET)?;
                let last = self.heap.read_u32(obj.as_address() + deque::LAST_OFFSET)?;
                let cap = self.ring_capacity(obj)?;
                let mut index = 0;
                while first != last {
                    let value = self.container_get(obj, kind, index)?;
                    let ret = self.call(callback, this_arg, &[value, TaggedValue::int(index as i32), obj]);
                    if self.has_pending_exception() {
                        return Ok(ret);
                    }
                    first = (first + 1) % cap;
                    index += 1;
                }
            }
            ContainerKind::HashMap | ContainerKind::HashSet => {
                let length = self.container_size(obj, kind)?;
                let set_semantics = kind == ContainerKind::HashSet;
                for index in 0..length {
                    let mut node = self.container_get(obj, kind, index)?;
                    if node.is_hole() {
                        continue;
                    }
                    if self.object_type(node) == Some(JsType::RbTreeNode) {
                        let ret = self.rb_tree_for_each(node, callback, this_arg, obj, set_semantics)?;
                        if self.has_pending_exception() {
                            return Ok(ret);
                        }
                        continue;
                    }
                    while !node.is_hole() {
                        let key = self.heap.field(node, linked_node::KEY_OFFSET)?;
                        let value = if set_semantics {
                            key
                        } else {
                            self.heap.field(node, linked_node::VALUE_OFFSET)?
                        };
                        let ret = self.call(callback, this_arg, &[value, key, obj]);
                        if self.has_pending_exception() {
                            return Ok(ret);
                        }
                        node = self.heap.field(node, linked_node::NEXT_OFFSET)?;
                    }
                }
            }
            ContainerKind::LinkedList | ContainerKind::List => {
                let length = self.container_size(obj, kind)?;
                let mut node = tagged_list::ELEMENTS_START_INDEX;
                for index in 0..length {
                    node = self.container_get(obj, kind, node + tagged_list::NEXT_PTR_OFFSET)?.as_int() as u32;
                    let value = self.container_get(obj, kind, node)?;
                    if value.is_hole() {
                        continue;
                    }
                    let ret = self.call(callback, this_arg, &[value, TaggedValue::int(index as i32), obj]);
                    if self.has_pending_exception() {
                        return Ok(ret);
                    }
                }
            }
            ContainerKind::LightWeightMap | ContainerKind::LightWeightSet => {
                let mut length = self.container_size(obj, kind)?;
                let mut index = 0;
                while index < length {
                    let value = self.container_get(obj, kind, index)?;
                    let key = self.container_key(obj, kind, index)?;
                    let ret = self.call(callback, this_arg, &[value, key, obj]);
                    if self.has_pending_exception() {
                        return Ok(ret);
                    }
                    length = self.container_size(obj, kind)?;
                    index += 1;
                }
            }
            ContainerKind::ArrayList | ContainerKind::Vector | ContainerKind::Stack | ContainerKind::PlainArray => {
                let mut length = self.container_size(obj, kind)?;
                let mut k = 0;
                while k < length {
                    let value = self.container_get(obj, kind, k)?;
                    let key = if kind == ContainerKind::PlainArray {
                        self.container_key(obj, kind, k)?
                    } else {
                        TaggedValue::int(k as i32)
                    };
                    let ret = self.call(callback, this_arg, &[value, key, obj]);
                    if self.has_pending_exception() {
                        return Ok(ret);
                    }
                    length = self.container_size(obj, kind)?;
                    if ty.is_replace_all() && k < length {
                        self.container_set(obj, kind, k, ret)?;
                    }
                    k += 1;
                }
            }
        }
        Ok(TaggedValue::UNDEFINED)
    }
}

fn hashes_offset(kind: ContainerKind) -> u64 {
    match kind {
        ContainerKind::LightWeightMap => light_weight_map::HASHES_OFFSET,
        _ => light_weight_set::HASHES_OFFSET,
    }
}

fn light_weight_offsets(kind: ContainerKind) -> (u64, u64) {
    match kind {
        ContainerKind::LightWeightMap => (light_weight_map::KEYS_OFFSET, light_weight_map::VALUES_OFFSET),
        _ => (light_weight_set::VALUES_OFFSET, light_weight_set::VALUES_OFFSET),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::thread::CallInfo;

    fn recorder(thread: &mut JsThread) -> (TaggedValue, Rc<RefCell<Vec<(TaggedValue, TaggedValue)>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let func = thread
            .new_native_function("record", 3, Rc::new(move |_, info: &CallInfo| {
                sink.borrow_mut().push((info.arg(0), info.arg(1)));
                TaggedValue::UNDEFINED
            }))
            .unwrap();
        (func, seen)
    }

    #[test]
    fn test_array_list_add_remove() {
        let mut thread = JsThread::new().unwrap();
        let list = thread.new_container(ContainerKind::ArrayList).unwrap();
        for i in 0..5 {
            thread.container_add(list, ContainerKind::ArrayList, TaggedValue::int(i)).unwrap();
        }
        assert_eq!(thread.container_len(list, ContainerKind::ArrayList).unwrap(), 5);
        let removed = thread.container_remove_at(list, ContainerKind::ArrayList, 1).unwrap();
        assert_eq!(removed, TaggedValue::int(1));
        assert_eq!(thread.container_get(list, ContainerKind::ArrayList, 1).unwrap(), TaggedValue::int(2));
    }

    #[test]
    fn test_queue_and_deque_wrap() {
        let mut thread = JsThread::new().unwrap();
        let queue = thread.new_container(ContainerKind::Queue).unwrap();
        for i in 0..20 {
            thread.container_add(queue, ContainerKind::Queue, TaggedValue::int(i)).unwrap();
        }
        assert_eq!(thread.container_size(queue, ContainerKind::Queue).unwrap(), 20);

        let dq = thread.new_container(ContainerKind::Deque).unwrap();
        thread.container_add(dq, ContainerKind::Deque, TaggedValue::int(2)).unwrap();
        thread.deque_insert_front(dq, TaggedValue::int(1)).unwrap();
        assert_eq!(thread.container_get(dq, ContainerKind::Deque, 0).unwrap(), TaggedValue::int(1));
        assert_eq!(thread.container_get(dq, ContainerKind::Deque, 1).unwrap(), TaggedValue::int(2));
    }

    #[test]
    fn test_light_weight_map_sorted_by_hash() {
        let mut thread = JsThread::new().unwrap();
        let map = thread.new_container(ContainerKind::LightWeightMap).unwrap();
        for k in [30, 10, 20] {
            thread
                .container_put(map, ContainerKind::LightWeightMap, TaggedValue::int(k), TaggedValue::int(k * 2))
                .unwrap();
        }
        thread
            .container_put(map, ContainerKind::LightWeightMap, TaggedValue::int(10), TaggedValue::int(7))
            .unwrap();
        assert_eq!(thread.container_len(map, ContainerKind::LightWeightMap).unwrap(), 3);
        assert_eq!(thread.container_key(map, ContainerKind::LightWeightMap, 0).unwrap(), TaggedValue::int(10));
        assert_eq!(
            thread.container_lookup(map, ContainerKind::LightWeightMap, TaggedValue::int(10)).unwrap(),
            Some(TaggedValue::int(7))
        );
    }

    #[test]
    fn test_hash_map_treeifies_and_finds_everything() {
        let mut thread = JsThread::new().unwrap();
        let map = thread.new_container(ContainerKind::HashMap).unwrap();
        // Keys that collide in a 16-slot table while the map stays small.
        let keys: Vec<i32> = (0..10).map(|i| i * 1024).collect();
        for &k in &keys {
            thread
                .container_put(map, ContainerKind::HashMap, TaggedValue::int(k), TaggedValue::int(k + 1))
                .unwrap();
        }
        let table = thread.heap.field(map, hash_map::TABLE_OFFSET).unwrap();
        let bucket = thread.array_get(table, 0).unwrap();
        assert_eq!(thread.object_type(bucket), Some(JsType::RbTreeNode));
        for &k in &keys {
            assert_eq!(
                thread.container_lookup(map, ContainerKind::HashMap, TaggedValue::int(k)).unwrap(),
                Some(TaggedValue::int(k + 1))
            );
        }
        assert_eq!(thread.hash_entries(map).unwrap().len(), keys.len());
    }

    #[test]
    fn test_string_keys_match_by_content() {
        let mut thread = JsThread::new().unwrap();
        let map = thread.new_container(ContainerKind::HashMap).unwrap();
        let a = thread.new_string("key").unwrap();
        let b = thread.new_string("key").unwrap();
        thread.container_put(map, ContainerKind::HashMap, a, TaggedValue::TRUE).unwrap();
        assert_eq!(
            thread.container_lookup(map, ContainerKind::HashMap, b).unwrap(),
            Some(TaggedValue::TRUE)
        );
    }

    #[test]
    fn test_linked_list_order() {
        let mut thread = JsThread::new().unwrap();
        for kind in [ContainerKind::LinkedList, ContainerKind::List] {
            let list = thread.new_container(kind).unwrap();
            for i in 0..6 {
                thread.container_add(list, kind, TaggedValue::int(i)).unwrap();
            }
            let values = thread.tagged_list_values(list).unwrap();
            assert_eq!(values, (0..6).map(TaggedValue::int).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_for_each_passes_value_and_key() {
        let mut thread = JsThread::new().unwrap();
        let (callback, seen) = recorder(&mut thread);
        let pa = thread.new_container(ContainerKind::PlainArray).unwrap();
        thread
            .container_put(pa, ContainerKind::PlainArray, TaggedValue::int(5), TaggedValue::int(50))
            .unwrap();
        thread
            .container_put(pa, ContainerKind::PlainArray, TaggedValue::int(1), TaggedValue::int(10))
            .unwrap();
        let ret = thread.container_for_each(ContainersType::PlainArrayForEach, pa, callback, TaggedValue::UNDEFINED);
        assert!(ret.is_undefined());
        assert_eq!(
            *seen.borrow(),
            vec![
                (TaggedValue::int(10), TaggedValue::int(1)),
                (TaggedValue::int(50), TaggedValue::int(5)),
            ]
        );
    }

    #[test]
    fn test_for_each_rejects_wrong_receiver() {
        let mut thread = JsThread::new().unwrap();
        let (callback, _) = recorder(&mut thread);
        let stack = thread.new_container(ContainerKind::Stack).unwrap();
        let ret = thread.container_for_each(ContainersType::VectorForEach, stack, callback, TaggedValue::UNDEFINED);
        assert!(ret.is_exception());
    }

    #[test]
    fn test_containers_type_round_trip() {
        for ty in ContainersType::ALL {
            assert_eq!(ContainersType::from_u32(ty as u32), Some(ty));
        }
        assert_eq!(ContainersType::from_u32(14), None);
    }
}
