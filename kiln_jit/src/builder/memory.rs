//! Loads, stores and object field helpers.
//!
//! Every access goes through the depend chain. Offsets are byte offsets from
//! the object or glue address; a `Store` gate's machine type is the width of
//! the access.

use kiln_core::value::TAGGED_SIZE;
use kiln_runtime::heap::glue;
use kiln_runtime::layout::{hclass, object, tagged_array};
use kiln_runtime::{ConstantIndex, GlobalEnvField, RuntimeStubId};

use super::CircuitBuilder;
use crate::ir::{GateRef, GateType, MachineType, OpCode};

impl CircuitBuilder<'_> {
    // =========================================================================
    // Raw Access
    // =========================================================================

    /// Load `mt` from `base + offset`.
    pub fn load(&mut self, mt: MachineType, base: GateRef, offset: GateRef) -> GateRef {
        let gt = if mt == MachineType::I64 { GateType::Any } else { GateType::NJSValue };
        self.effect_gate(OpCode::Load, mt, &[base, offset], gt)
    }

    /// Load `mt` from `base + offset` for a constant offset.
    pub fn load_at(&mut self, mt: MachineType, base: GateRef, offset: u64) -> GateRef {
        let offset = self.int_ptr(offset);
        self.load(mt, base, offset)
    }

    /// Store `value` as `mt` at `base + offset`.
    pub fn store(&mut self, mt: MachineType, base: GateRef, offset: GateRef, value: GateRef) -> GateRef {
        self.effect_gate(OpCode::Store, mt, &[base, offset, value], GateType::NJSValue)
    }

    /// Store at a constant offset.
    pub fn store_at(&mut self, mt: MachineType, base: GateRef, offset: u64, value: GateRef) -> GateRef {
        let offset = self.int_ptr(offset);
        self.store(mt, base, offset, value)
    }

    /// Load a tagged field.
    pub fn load_field(&mut self, base: GateRef, offset: u64) -> GateRef {
        self.load_at(MachineType::I64, base, offset)
    }

    /// Store a tagged field.
    pub fn store_field(&mut self, base: GateRef, offset: u64, value: GateRef) -> GateRef {
        self.store_at(MachineType::I64, base, offset, value)
    }

    // =========================================================================
    // Hidden Classes
    // =========================================================================

    /// Hidden class of a heap object.
    pub fn load_hclass(&mut self, object: GateRef) -> GateRef {
        self.load_at(MachineType::I64, object, object::HCLASS_OFFSET)
    }

    /// Store the hidden class of a fresh object.
    pub fn store_hclass(&mut self, object: GateRef, hclass: GateRef) -> GateRef {
        self.store_at(MachineType::I64, object, object::HCLASS_OFFSET, hclass)
    }

    /// Object type tag (low byte of the type word) as an int32.
    pub fn object_type(&mut self, object: GateRef) -> GateRef {
        let hclass = self.load_hclass(object);
        self.hclass_object_type(hclass)
    }

    /// Object type tag stored in a hidden class.
    pub fn hclass_object_type(&mut self, hclass: GateRef) -> GateRef {
        let word = self.load_at(MachineType::I32, hclass, hclass::OBJECT_TYPE_OFFSET);
        let mask = self.int32(0xFF);
        self.int32_and(word, mask)
    }

    /// Flag word of a hidden class.
    pub fn load_hclass_bit_field(&mut self, hclass: GateRef) -> GateRef {
        self.load_at(MachineType::I32, hclass, hclass::BIT_FIELD_OFFSET)
    }

    /// Instance size recorded in a hidden class.
    pub fn load_hclass_object_size(&mut self, hclass: GateRef) -> GateRef {
        self.load_at(MachineType::I32, hclass, hclass::OBJECT_SIZE_OFFSET)
    }

    // =========================================================================
    // Tagged Arrays
    // =========================================================================

    /// Length of a tagged array.
    pub fn tagged_array_length(&mut self, array: GateRef) -> GateRef {
        self.load_at(MachineType::I32, array, tagged_array::LENGTH_OFFSET)
    }

    fn tagged_array_slot(&mut self, index: GateRef) -> GateRef {
        let wide = self.zext_to_int64(index);
        let size = self.int_ptr(TAGGED_SIZE);
        let scaled = self.int64_mul(wide, size);
        let data = self.int_ptr(tagged_array::DATA_OFFSET);
        self.int64_add(scaled, data)
    }

    /// Element `index` (int32) of a tagged array.
    pub fn get_value_from_tagged_array(&mut self, array: GateRef, index: GateRef) -> GateRef {
        let offset = self.tagged_array_slot(index);
        self.load(MachineType::I64, array, offset)
    }

    /// Element at a constant index.
    pub fn get_value_from_tagged_array_at(&mut self, array: GateRef, index: u32) -> GateRef {
        let offset = tagged_array::DATA_OFFSET + u64::from(index) * TAGGED_SIZE;
        self.load_field(array, offset)
    }

    /// Store element `index` (int32) of a tagged array.
    pub fn set_value_to_tagged_array(&mut self, array: GateRef, index: GateRef, value: GateRef) -> GateRef {
        let offset = self.tagged_array_slot(index);
        self.store(MachineType::I64, array, offset, value)
    }

    /// Store at a constant index.
    pub fn set_value_to_tagged_array_at(&mut self, array: GateRef, index: u32, value: GateRef) -> GateRef {
        let offset = tagged_array::DATA_OFFSET + u64::from(index) * TAGGED_SIZE;
        self.store_field(array, offset, value)
    }

    // =========================================================================
    // Glue
    // =========================================================================

    /// Tagged word stored in the glue area.
    pub fn load_glue(&mut self, offset: u64) -> GateRef {
        let glue = self.glue();
        self.load_at(MachineType::I64, glue, offset)
    }

    /// Entry of the global constant table.
    pub fn global_constant(&mut self, index: ConstantIndex) -> GateRef {
        self.load_glue(index.glue_offset())
    }

    /// Slot of the global environment.
    pub fn global_env_value(&mut self, field: GlobalEnvField) -> GateRef {
        let env = self.load_glue(glue::GLOBAL_ENV_OFFSET);
        self.get_value_from_tagged_array_at(env, field as u32)
    }

    /// The pending exception, or the hole when none.
    pub fn pending_exception(&mut self) -> GateRef {
        self.load_glue(glue::EXCEPTION_OFFSET)
    }

    /// Whether an exception is pending.
    pub fn has_pending_exception(&mut self) -> GateRef {
        let exception = self.pending_exception();
        let hole = self.tagged_is_hole(exception);
        self.bool_not(hole)
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Bump-allocate `size` bytes (I64) in the young space.
    ///
    /// Falls back to the runtime when the inline space is exhausted; the
    /// result is the tagged object address.
    pub fn allocate_in_young(&mut self, size: GateRef) -> GateRef {
        let glue = self.glue();
        let top = self.load_at(MachineType::I64, glue, glue::NEW_SPACE_TOP_OFFSET);
        let end = self.load_at(MachineType::I64, glue, glue::NEW_SPACE_END_OFFSET);
        let new_top = self.int64_add(top, size);
        let result = self.new_variable(MachineType::I64, GateType::Any, top);
        let fast = self.new_label();
        let slow = self.new_label();
        let exit = self.new_label();
        let overflow = self.int64_unsigned_greater_than(new_top, end);
        self.branch(overflow, slow, fast);
        self.bind(fast);
        self.store_at(MachineType::I64, glue, glue::NEW_SPACE_TOP_OFFSET, new_top);
        self.jump(exit);
        self.bind(slow);
        let size32 = self.trunc_to_int32(size);
        let tagged_size = self.int32_to_tagged(size32);
        let allocated = self.call_runtime(RuntimeStubId::AllocateInYoung, &[tagged_size]);
        self.write(result, allocated);
        self.jump(exit);
        self.bind(exit);
        self.read(result)
    }

    /// Store `value` into every tagged word of `obj` in `[from, to)`.
    ///
    /// `from` and `to` are I64 byte offsets.
    pub fn fill_tagged(&mut self, obj: GateRef, from: GateRef, to: GateRef, value: GateRef) {
        let offset = self.new_variable(MachineType::I64, GateType::NJSValue, from);
        let header = self.new_label();
        let body = self.new_label();
        let exit = self.new_label();
        self.jump(header);
        self.loop_begin(header);
        let current = self.read(offset);
        let more = self.int64_less_than(current, to);
        self.branch(more, body, exit);
        self.bind(body);
        self.store(MachineType::I64, obj, current, value);
        let next = self.ptr_add_const(current, TAGGED_SIZE);
        self.write(offset, next);
        self.loop_end(header);
        self.bind(exit);
    }

    /// Allocate a plain object shaped by `hclass`: class word, hash,
    /// properties and elements, then `undefined` in every inline slot.
    ///
    /// No GC is allowed until the header is written.
    pub fn new_object_with_hclass(&mut self, hclass: GateRef, size: GateRef) -> GateRef {
        let obj = self.allocate_in_young(size);
        self.store_hclass(obj, hclass);
        let hash = self.tagged_int(0);
        self.store_field(obj, object::HASH_OFFSET, hash);
        let empty = self.global_constant(ConstantIndex::EmptyArray);
        self.store_field(obj, object::PROPERTIES_OFFSET, empty);
        self.store_field(obj, object::ELEMENTS_OFFSET, empty);
        let header = self.int_ptr(object::SIZE);
        let undefined = self.undefined();
        self.fill_tagged(obj, header, size, undefined);
        obj
    }
}
