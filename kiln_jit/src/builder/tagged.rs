//! Tagged value tests and boxing.
//!
//! Tag tests on the raw word are pure; tests that look at a heap object's
//! type load its hidden class and therefore sit on the depend chain behind a
//! heap-object check.

use kiln_core::value::{DOUBLE_ENCODE_OFFSET, TAG_HEAPOBJECT_MASK, TAG_INT, TAG_MARK, TAG_SPECIAL_MASK, VALUE_FALSE};
use kiln_core::TaggedValue;
use kiln_runtime::layout::HClassFlags;
use kiln_runtime::JsType;

use super::CircuitBuilder;
use crate::ir::{GateRef, GateType, MachineType};

impl CircuitBuilder<'_> {
    // =========================================================================
    // Tag Tests
    // =========================================================================

    fn masked_equal(&mut self, x: GateRef, mask: u64, expected: u64) -> GateRef {
        let mask = self.int_ptr(mask);
        let bits = self.int64_and(x, mask);
        let expected = self.int_ptr(expected);
        self.int64_equal(bits, expected)
    }

    fn equals_tagged(&mut self, x: GateRef, value: TaggedValue) -> GateRef {
        let constant = self.int_ptr(value.raw());
        self.int64_equal(x, constant)
    }

    /// Int-tagged.
    pub fn tagged_is_int(&mut self, x: GateRef) -> GateRef {
        self.masked_equal(x, TAG_MARK, TAG_INT)
    }

    /// Int or double.
    pub fn tagged_is_number(&mut self, x: GateRef) -> GateRef {
        let mask = self.int_ptr(TAG_MARK);
        let bits = self.int64_and(x, mask);
        let zero = self.int_ptr(0);
        self.int64_not_equal(bits, zero)
    }

    /// Double-tagged.
    pub fn tagged_is_double(&mut self, x: GateRef) -> GateRef {
        let number = self.tagged_is_number(x);
        let int = self.tagged_is_int(x);
        let not_int = self.bool_not(int);
        self.bool_and(number, not_int)
    }

    /// Heap object pointer.
    pub fn tagged_is_heap_object(&mut self, x: GateRef) -> GateRef {
        let clear = self.masked_equal(x, TAG_HEAPOBJECT_MASK, 0);
        let zero = self.int_ptr(0);
        let nonzero = self.int64_not_equal(x, zero);
        self.bool_and(clear, nonzero)
    }

    /// Special constant.
    pub fn tagged_is_special(&mut self, x: GateRef) -> GateRef {
        let special = self.masked_equal(x, TAG_SPECIAL_MASK, kiln_core::value::TAG_SPECIAL);
        let hole = self.tagged_is_hole(x);
        self.bool_or(special, hole)
    }

    /// Hole.
    pub fn tagged_is_hole(&mut self, x: GateRef) -> GateRef {
        self.equals_tagged(x, TaggedValue::HOLE)
    }

    /// `undefined`.
    pub fn tagged_is_undefined(&mut self, x: GateRef) -> GateRef {
        self.equals_tagged(x, TaggedValue::UNDEFINED)
    }

    /// `null`.
    pub fn tagged_is_null(&mut self, x: GateRef) -> GateRef {
        self.equals_tagged(x, TaggedValue::NULL)
    }

    /// `undefined` or `null`.
    pub fn tagged_is_undefined_or_null(&mut self, x: GateRef) -> GateRef {
        let one = self.int_ptr(1);
        let merged = self.int64_or(x, one);
        self.equals_tagged(merged, TaggedValue::NULL)
    }

    /// `true` or `false`.
    pub fn tagged_is_boolean(&mut self, x: GateRef) -> GateRef {
        let one = self.int_ptr(1);
        let merged = self.int64_or(x, one);
        self.equals_tagged(merged, TaggedValue::TRUE)
    }

    /// `true`.
    pub fn tagged_is_true(&mut self, x: GateRef) -> GateRef {
        self.equals_tagged(x, TaggedValue::TRUE)
    }

    /// `false`.
    pub fn tagged_is_false(&mut self, x: GateRef) -> GateRef {
        self.equals_tagged(x, TaggedValue::FALSE)
    }

    /// Exception sentinel.
    pub fn tagged_is_exception(&mut self, x: GateRef) -> GateRef {
        self.equals_tagged(x, TaggedValue::EXCEPTION)
    }

    /// Bitwise equality of two tagged words.
    pub fn tagged_equal(&mut self, a: GateRef, b: GateRef) -> GateRef {
        self.int64_equal(a, b)
    }

    // =========================================================================
    // Boxing
    // =========================================================================

    /// Payload of an int-tagged value.
    pub fn get_int32_of_tint(&mut self, x: GateRef) -> GateRef {
        self.trunc_to_int32(x)
    }

    /// Payload of a double-tagged value.
    pub fn get_double_of_tdouble(&mut self, x: GateRef) -> GateRef {
        let offset = self.int_ptr(DOUBLE_ENCODE_OFFSET);
        let raw = self.int64_sub(x, offset);
        self.bitcast(raw, MachineType::F64)
    }

    /// Numeric payload of an int or double as a double.
    pub fn get_double_of_tnumber(&mut self, x: GateRef) -> GateRef {
        let is_int = self.tagged_is_int(x);
        let as_int = self.get_int32_of_tint(x);
        let widened = self.int32_to_double(as_int);
        let as_double = self.get_double_of_tdouble(x);
        self.select(is_int, widened, as_double)
    }

    /// Box an int32.
    pub fn int32_to_tagged(&mut self, x: GateRef) -> GateRef {
        let wide = self.zext_to_int64(x);
        let tag = self.int_ptr(TAG_INT);
        let tagged = self.int64_or(wide, tag);
        self.circuit.set_gate_type(tagged, GateType::Int);
        tagged
    }

    /// Box a double.
    pub fn double_to_tagged(&mut self, x: GateRef) -> GateRef {
        let raw = self.bitcast(x, MachineType::I64);
        let offset = self.int_ptr(DOUBLE_ENCODE_OFFSET);
        let tagged = self.int64_add(raw, offset);
        self.circuit.set_gate_type(tagged, GateType::Double);
        tagged
    }

    /// Box a flag.
    pub fn boolean_to_tagged(&mut self, x: GateRef) -> GateRef {
        let wide = self.zext_to_int64(x);
        let base = self.int_ptr(VALUE_FALSE);
        let tagged = self.int64_or(wide, base);
        self.circuit.set_gate_type(tagged, GateType::Boolean);
        tagged
    }

    /// Box a double, preferring the int form when exact and not `-0`.
    pub fn double_to_tagged_number(&mut self, x: GateRef) -> GateRef {
        let truncated = self.float_to_int32(x);
        let back = self.int32_to_double(truncated);
        let exact = self.double_equal(x, back);
        let zero = self.int32(0);
        let is_zero = self.int32_equal(truncated, zero);
        let bits = self.bitcast(x, MachineType::I64);
        let sign_mask = self.int_ptr(1 << 63);
        let sign = self.int64_and(bits, sign_mask);
        let zero64 = self.int_ptr(0);
        let negative = self.int64_not_equal(sign, zero64);
        let negative_zero = self.bool_and(is_zero, negative);
        let not_negative_zero = self.bool_not(negative_zero);
        let use_int = self.bool_and(exact, not_negative_zero);
        let as_int = self.int32_to_tagged(truncated);
        let as_double = self.double_to_tagged(x);
        let result = self.select(use_int, as_int, as_double);
        self.circuit.set_gate_type(result, GateType::Number);
        result
    }

    // =========================================================================
    // Object Type Tests
    // =========================================================================

    /// Heap object whose type satisfies `predicate`; false for primitives.
    pub fn tagged_object_is(
        &mut self,
        x: GateRef,
        predicate: impl FnOnce(&mut Self, GateRef) -> GateRef,
    ) -> GateRef {
        let initial = self.boolean(false);
        let result = self.new_variable(MachineType::I1, GateType::NJSValue, initial);
        let heap = self.new_label();
        let exit = self.new_label();
        let is_heap = self.tagged_is_heap_object(x);
        self.branch(is_heap, heap, exit);
        self.bind(heap);
        let object_type = self.object_type(x);
        let value = predicate(self, object_type);
        self.write(result, value);
        self.jump(exit);
        self.bind(exit);
        self.read(result)
    }

    /// Heap object of exactly `ty`.
    pub fn tagged_is_object_type(&mut self, x: GateRef, ty: JsType) -> GateRef {
        self.tagged_object_is(x, |b, object_type| {
            let expected = b.int32(i32::from(ty as u8));
            b.int32_equal(object_type, expected)
        })
    }

    /// String.
    pub fn tagged_is_string(&mut self, x: GateRef) -> GateRef {
        self.tagged_is_object_type(x, JsType::String)
    }

    /// JS-visible object (not a string or internal structure).
    pub fn tagged_is_js_object(&mut self, x: GateRef) -> GateRef {
        self.tagged_object_is(x, |b, object_type| {
            let first = b.int32(i32::from(JsType::JS_OBJECT_FIRST));
            b.int32_greater_than_or_equal(object_type, first)
        })
    }

    /// Heap object whose class has all of `flags`.
    pub fn tagged_has_class_flags(&mut self, x: GateRef, flags: HClassFlags) -> GateRef {
        self.tagged_object_is(x, |b, _| {
            let hclass = b.load_hclass(x);
            b.hclass_has_flags(hclass, flags)
        })
    }

    /// Callable heap object.
    pub fn tagged_is_callable(&mut self, x: GateRef) -> GateRef {
        self.tagged_has_class_flags(x, HClassFlags::CALLABLE)
    }

    /// Whether the class word `hclass` has all of `flags`.
    pub fn hclass_has_flags(&mut self, hclass: GateRef, flags: HClassFlags) -> GateRef {
        let bits = self.load_hclass_bit_field(hclass);
        let mask = self.int32(flags.bits() as i32);
        let masked = self.int32_and(bits, mask);
        self.int32_equal(masked, mask)
    }
}
