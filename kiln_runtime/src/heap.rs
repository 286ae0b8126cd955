//! Byte-addressed simulated heap with the glue area.
//!
//! Memory is a single little-endian byte vector addressed from zero. The first
//! page is never mapped so that a zero pointer faults. The glue area sits at
//! [`GLUE_ADDRESS`] and holds the per-thread state compiled code reaches
//! through the `glue` argument; young-space objects are bump allocated above
//! [`HEAP_START`].
//!
//! ```text
//! 0x0000 ┌──────────────┐
//!        │  unmapped    │
//! 0x1000 ├──────────────┤  glue: exception, globals, top/end, constants
//!        │  glue        │
//! 0x10000├──────────────┤  young space (bump pointer, grows on exhaustion)
//!        │  objects ... │
//!        └──────────────┘
//! ```

use kiln_core::value::{TaggedValue, TAGGED_SIZE};
use kiln_core::{KilnError, KilnResult};

use crate::layout::align_object_size;

// =============================================================================
// Address Map
// =============================================================================

/// Address of the glue area.
pub const GLUE_ADDRESS: u64 = 0x1000;

/// First address of the young space.
pub const HEAP_START: u64 = 0x1_0000;

/// Hard ceiling for the simulated address space.
pub const MAX_HEAP_SIZE: u64 = 1 << 32;

/// Glue field offsets, relative to the glue address.
pub mod glue {
    /// Pending exception, hole when none.
    pub const EXCEPTION_OFFSET: u64 = 0;
    /// Global object.
    pub const GLOBAL_OBJECT_OFFSET: u64 = 8;
    /// Global environment (tagged array indexed by `GlobalEnvField`).
    pub const GLOBAL_ENV_OFFSET: u64 = 16;
    /// Young space bump pointer.
    pub const NEW_SPACE_TOP_OFFSET: u64 = 24;
    /// Young space limit.
    pub const NEW_SPACE_END_OFFSET: u64 = 32;
    /// `u64` set while no array prototype has been modified.
    pub const STABLE_ARRAY_GUARDIAN_OFFSET: u64 = 40;
    /// First global constant.
    pub const GLOBAL_CONST_OFFSET: u64 = 48;
}

// =============================================================================
// Global Constants
// =============================================================================

macro_rules! global_constants {
    ($($name:ident),* $(,)?) => {
        /// Slots of the global constant table in the glue area.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum ConstantIndex {
            $(
                #[allow(missing_docs)]
                $name,
            )*
        }

        impl ConstantIndex {
            /// Number of constants.
            pub const COUNT: u32 = [$(ConstantIndex::$name),*].len() as u32;
        }
    };
}

global_constants! {
    HClassClass,
    TaggedArrayClass,
    LexicalEnvClass,
    StringClass,
    MethodClass,
    ByteArrayClass,
    LinkedNodeClass,
    RbTreeNodeClass,
    GeneratorContextClass,
    AccessorDataClass,
    ObjectClass,
    ArrayClass,
    FunctionClass,
    ConstructorClass,
    BuiltinConstructorClass,
    ClassConstructorClass,
    DerivedConstructorClass,
    ArgumentsClass,
    ErrorClass,
    PrimitiveRefClass,
    StringObjectClass,
    DateClass,
    Float32ArrayClass,
    GeneratorObjectClass,
    AsyncGeneratorObjectClass,
    ProxyClass,
    ArrayListClass,
    VectorClass,
    StackClass,
    QueueClass,
    DequeClass,
    LightWeightMapClass,
    LightWeightSetClass,
    HashMapClass,
    HashSetClass,
    LinkedListClass,
    ListClass,
    PlainArrayClass,
    EmptyString,
    EmptyArray,
    LengthString,
    PrototypeString,
    MessageString,
    ConstructorString,
    NameString,
    UndefinedString,
    BooleanString,
    NumberString,
    StringString,
    FunctionString,
    ObjectString,
}

/// Slots of the global environment array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum GlobalEnvField {
    /// `Object.prototype`.
    ObjectPrototype,
    /// `Function.prototype`.
    FunctionPrototype,
    /// `Array.prototype`.
    ArrayPrototype,
    /// `String.prototype`.
    StringPrototype,
    /// `Error.prototype`.
    ErrorPrototype,
    /// Prototype of generator objects.
    GeneratorPrototype,
    /// Prototype of async generator objects.
    AsyncGeneratorPrototype,
    /// `Boolean.prototype`.
    BooleanPrototype,
    /// `Date.prototype`.
    DatePrototype,
    /// `Float32Array.prototype`.
    Float32ArrayPrototype,
    /// The `Math` object.
    MathObject,
    /// `Boolean`.
    BooleanFunction,
    /// `Date`.
    DateFunction,
    /// `Array`.
    ArrayFunction,
    /// `Object`.
    ObjectFunction,
}

impl GlobalEnvField {
    /// Number of slots.
    pub const COUNT: u32 = GlobalEnvField::ObjectFunction as u32 + 1;
}

impl ConstantIndex {
    /// Byte offset of this constant relative to the glue address.
    #[must_use]
    pub const fn glue_offset(self) -> u64 {
        glue::GLOBAL_CONST_OFFSET + self as u64 * TAGGED_SIZE
    }
}

/// Total glue area size.
pub const GLUE_SIZE: u64 = glue::GLOBAL_CONST_OFFSET + ConstantIndex::COUNT as u64 * TAGGED_SIZE;

// =============================================================================
// Heap
// =============================================================================

/// Statistics kept by the allocator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Objects allocated through the runtime.
    pub allocations: u64,
    /// Bytes handed out through the runtime.
    pub allocated_bytes: u64,
    /// Times the young space had to be extended.
    pub expansions: u64,
}

/// The simulated heap.
#[derive(Debug, Clone)]
pub struct Heap {
    memory: Vec<u8>,
    young_space: u64,
    stats: HeapStats,
}

impl Heap {
    /// Create a heap with an empty young space of `young_space` bytes.
    #[must_use]
    pub fn new(young_space: u64) -> Self {
        let young_space = align_object_size(young_space.max(TAGGED_SIZE));
        let len = usize::try_from(HEAP_START + young_space).unwrap_or(usize::MAX);
        let mut heap = Self {
            memory: vec![0; len],
            young_space,
            stats: HeapStats::default(),
        };
        heap.init_glue();
        heap
    }

    fn init_glue(&mut self) {
        let end = self.memory.len() as u64;
        // The glue lies below HEAP_START, which is always mapped.
        let _ = self.write_tagged(GLUE_ADDRESS + glue::EXCEPTION_OFFSET, TaggedValue::HOLE);
        let _ = self.write_u64(GLUE_ADDRESS + glue::NEW_SPACE_TOP_OFFSET, HEAP_START);
        let _ = self.write_u64(GLUE_ADDRESS + glue::NEW_SPACE_END_OFFSET, end);
        let _ = self.write_u64(GLUE_ADDRESS + glue::STABLE_ARRAY_GUARDIAN_OFFSET, 1);
    }

    /// The glue address.
    #[inline]
    #[must_use]
    pub const fn glue(&self) -> u64 {
        GLUE_ADDRESS
    }

    /// Allocator statistics.
    #[must_use]
    pub const fn stats(&self) -> HeapStats {
        self.stats
    }

    /// Mapped size in bytes.
    #[must_use]
    pub fn mapped_size(&self) -> u64 {
        self.memory.len() as u64
    }

    // =========================================================================
    // Raw Access
    // =========================================================================

    fn range(&self, address: u64, size: u64) -> KilnResult<std::ops::Range<usize>> {
        let end = address.checked_add(size);
        match end {
            Some(end) if address >= GLUE_ADDRESS && end <= self.memory.len() as u64 => {
                Ok(address as usize..end as usize)
            }
            _ => Err(KilnError::InvalidAccess { address, size }),
        }
    }

    /// Whether `[address, address + size)` is mapped.
    #[must_use]
    pub fn is_mapped(&self, address: u64, size: u64) -> bool {
        self.range(address, size).is_ok()
    }

    /// Read `N` bytes.
    pub fn read_bytes<const N: usize>(&self, address: u64) -> KilnResult<[u8; N]> {
        let range = self.range(address, N as u64)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.memory[range]);
        Ok(out)
    }

    /// Write raw bytes.
    pub fn write_bytes(&mut self, address: u64, bytes: &[u8]) -> KilnResult<()> {
        let range = self.range(address, bytes.len() as u64)?;
        self.memory[range].copy_from_slice(bytes);
        Ok(())
    }

    /// Read a byte slice.
    pub fn slice(&self, address: u64, len: u64) -> KilnResult<&[u8]> {
        let range = self.range(address, len)?;
        Ok(&self.memory[range])
    }

    /// Read a `u8`.
    pub fn read_u8(&self, address: u64) -> KilnResult<u8> {
        Ok(self.read_bytes::<1>(address)?[0])
    }

    /// Read a `u16`.
    pub fn read_u16(&self, address: u64) -> KilnResult<u16> {
        Ok(u16::from_le_bytes(self.read_bytes(address)?))
    }

    /// Read a `u32`.
    pub fn read_u32(&self, address: u64) -> KilnResult<u32> {
        Ok(u32::from_le_bytes(self.read_bytes(address)?))
    }

    /// Read a `u64`.
    pub fn read_u64(&self, address: u64) -> KilnResult<u64> {
        Ok(u64::from_le_bytes(self.read_bytes(address)?))
    }

    /// Write a `u8`.
    pub fn write_u8(&mut self, address: u64, value: u8) -> KilnResult<()> {
        self.write_bytes(address, &[value])
    }

    /// Write a `u16`.
    pub fn write_u16(&mut self, address: u64, value: u16) -> KilnResult<()> {
        self.write_bytes(address, &value.to_le_bytes())
    }

    /// Write a `u32`.
    pub fn write_u32(&mut self, address: u64, value: u32) -> KilnResult<()> {
        self.write_bytes(address, &value.to_le_bytes())
    }

    /// Write a `u64`.
    pub fn write_u64(&mut self, address: u64, value: u64) -> KilnResult<()> {
        self.write_bytes(address, &value.to_le_bytes())
    }

    /// Read a tagged slot.
    pub fn read_tagged(&self, address: u64) -> KilnResult<TaggedValue> {
        self.read_u64(address).map(TaggedValue)
    }

    /// Write a tagged slot.
    pub fn write_tagged(&mut self, address: u64, value: TaggedValue) -> KilnResult<()> {
        self.write_u64(address, value.raw())
    }

    /// Read a field of an object.
    pub fn field(&self, object: TaggedValue, offset: u64) -> KilnResult<TaggedValue> {
        self.read_tagged(object.as_address() + offset)
    }

    /// Write a field of an object.
    pub fn set_field(&mut self, object: TaggedValue, offset: u64, value: TaggedValue) -> KilnResult<()> {
        self.write_tagged(object.as_address() + offset, value)
    }

    // =========================================================================
    // Glue
    // =========================================================================

    /// Read a glue field.
    pub fn glue_field(&self, offset: u64) -> KilnResult<TaggedValue> {
        self.read_tagged(GLUE_ADDRESS + offset)
    }

    /// Write a glue field.
    pub fn set_glue_field(&mut self, offset: u64, value: TaggedValue) -> KilnResult<()> {
        self.write_tagged(GLUE_ADDRESS + offset, value)
    }

    /// Read a global constant.
    pub fn constant(&self, index: ConstantIndex) -> KilnResult<TaggedValue> {
        self.glue_field(index.glue_offset())
    }

    /// Install a global constant.
    pub fn set_constant(&mut self, index: ConstantIndex, value: TaggedValue) -> KilnResult<()> {
        self.set_glue_field(index.glue_offset(), value)
    }

    // =========================================================================
    // Young Space
    // =========================================================================

    /// Bump allocate `size` zeroed bytes.
    ///
    /// When the young space is exhausted it is extended; nothing is ever
    /// collected.
    pub fn allocate(&mut self, size: u64) -> KilnResult<u64> {
        let size = align_object_size(size);
        let top = self.read_u64(GLUE_ADDRESS + glue::NEW_SPACE_TOP_OFFSET)?;
        let end = self.read_u64(GLUE_ADDRESS + glue::NEW_SPACE_END_OFFSET)?;
        let new_top = top.checked_add(size).ok_or(KilnError::OutOfMemory { requested: size })?;
        if new_top > end {
            self.extend_young(new_top - end)?;
        }
        self.write_u64(GLUE_ADDRESS + glue::NEW_SPACE_TOP_OFFSET, new_top)?;
        self.stats.allocations += 1;
        self.stats.allocated_bytes += size;
        Ok(top)
    }

    /// Map at least `additional` more bytes at the end of the young space.
    pub fn extend_young(&mut self, additional: u64) -> KilnResult<()> {
        let grow = align_object_size(additional.max(self.young_space));
        let new_len = self.memory.len() as u64 + grow;
        if new_len > MAX_HEAP_SIZE {
            return Err(KilnError::OutOfMemory { requested: additional });
        }
        self.memory.resize(new_len as usize, 0);
        self.write_u64(GLUE_ADDRESS + glue::NEW_SPACE_END_OFFSET, new_len)?;
        self.stats.expansions += 1;
        tracing::debug!(new_len, "young space extended");
        Ok(())
    }

    /// Bytes left before the young space must be extended.
    pub fn young_available(&self) -> KilnResult<u64> {
        let top = self.read_u64(GLUE_ADDRESS + glue::NEW_SPACE_TOP_OFFSET)?;
        let end = self.read_u64(GLUE_ADDRESS + glue::NEW_SPACE_END_OFFSET)?;
        Ok(end.saturating_sub(top))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glue_initialized() {
        let heap = Heap::new(4096);
        assert!(heap.glue_field(glue::EXCEPTION_OFFSET).unwrap().is_hole());
        assert_eq!(heap.young_available().unwrap(), 4096);
        assert!(GLUE_SIZE < HEAP_START - GLUE_ADDRESS);
    }

    #[test]
    fn test_null_page_faults() {
        let heap = Heap::new(4096);
        assert!(matches!(
            heap.read_u64(0),
            Err(KilnError::InvalidAccess { address: 0, size: 8 })
        ));
        assert!(heap.read_u64(heap.mapped_size()).is_err());
    }

    #[test]
    fn test_bump_allocation() {
        let mut heap = Heap::new(64);
        let a = heap.allocate(20).unwrap();
        let b = heap.allocate(8).unwrap();
        assert_eq!(a, HEAP_START);
        assert_eq!(b, HEAP_START + 24);
        assert_eq!(heap.stats().allocations, 2);
    }

    #[test]
    fn test_exhaustion_extends_space() {
        let mut heap = Heap::new(32);
        heap.allocate(24).unwrap();
        let next = heap.allocate(64).unwrap();
        heap.write_u64(next + 56, 7).unwrap();
        assert_eq!(heap.read_u64(next + 56).unwrap(), 7);
        assert_eq!(heap.stats().expansions, 1);
    }

    #[test]
    fn test_little_endian_access() {
        let mut heap = Heap::new(64);
        let a = heap.allocate(8).unwrap();
        heap.write_u32(a, 0x1122_3344).unwrap();
        assert_eq!(heap.read_u8(a).unwrap(), 0x44);
        assert_eq!(heap.read_u16(a + 2).unwrap(), 0x1122);
    }
}
