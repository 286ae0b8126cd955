//! Tagged value encoding.
//!
//! Every value the VM manipulates is a single 64-bit word. The top 16 bits
//! and the low tag bits distinguish the representations:
//!
//! ```text
//!   Pointer     | 0x0000 | ......48-bit address...... |  (low bits 0b?000 clear)
//!   Int         | 0xFFFF | 0x0000 |  32-bit payload    |
//!   Double      | raw f64 bits + (1 << 48)             |  top 16 bits in 0x0001..=0xFFFE
//!   Special     | 0x0000 | 0x0000 | 0x0000 | 0b0000_0XXX|
//! ```
//!
//! Specials: `Hole = 0x05`, `Undefined = 0x02`, `Null = 0x03`,
//! `False = 0x06`, `True = 0x07`, `Exception = 0x0A`.
//!
//! The same bit manipulation is emitted as IR by the lowering passes, so the
//! constants here are the single source of truth for both sides.

use std::fmt;

// =============================================================================
// Encoding Constants
// =============================================================================

/// Tag marking a boxed int32.
pub const TAG_INT: u64 = 0xFFFF_u64 << 48;
/// Mask over the top 16 bits.
pub const TAG_MARK: u64 = 0xFFFF_u64 << 48;
/// Offset added to raw double bits so that no double aliases a pointer.
pub const DOUBLE_ENCODE_OFFSET: u64 = 1 << 48;
/// Low tag bit shared by every special value.
pub const TAG_SPECIAL: u64 = 0x02;
/// Low tag bit shared by the two booleans.
pub const TAG_BOOLEAN: u64 = 0x04;
/// Mask separating specials from pointers.
pub const TAG_SPECIAL_MASK: u64 = TAG_MARK | TAG_SPECIAL;
/// Mask that must be clear for a heap object pointer.
pub const TAG_HEAPOBJECT_MASK: u64 = TAG_MARK | TAG_SPECIAL | TAG_BOOLEAN;
/// Mask for the boolean tag bits.
pub const TAG_BOOLEAN_MASK: u64 = TAG_SPECIAL | TAG_BOOLEAN;

/// `false`.
pub const VALUE_FALSE: u64 = TAG_BOOLEAN | TAG_SPECIAL;
/// `true`.
pub const VALUE_TRUE: u64 = TAG_BOOLEAN | TAG_SPECIAL | 0x01;
/// `undefined`.
pub const VALUE_UNDEFINED: u64 = TAG_SPECIAL;
/// `null`.
pub const VALUE_NULL: u64 = TAG_SPECIAL | 0x01;
/// Empty slot marker. Never visible to programs.
pub const VALUE_HOLE: u64 = 0x05;
/// Sentinel returned by stubs that left a pending exception.
pub const VALUE_EXCEPTION: u64 = TAG_SPECIAL | 0x08;

/// `INT32_MAX + 1`, the result of incrementing `INT32_MAX`.
pub const TAG_INT32_INC_MAX: f64 = i32::MAX as f64 + 1.0;
/// `INT32_MIN - 1`, the result of decrementing `INT32_MIN`.
pub const TAG_INT32_DEC_MIN: f64 = i32::MIN as f64 - 1.0;

/// Size of a tagged slot in bytes.
pub const TAGGED_SIZE: u64 = 8;

// =============================================================================
// TaggedValue
// =============================================================================

/// A 64-bit tagged word.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct TaggedValue(pub u64);

impl TaggedValue {
    /// `undefined`.
    pub const UNDEFINED: Self = TaggedValue(VALUE_UNDEFINED);
    /// `null`.
    pub const NULL: Self = TaggedValue(VALUE_NULL);
    /// `true`.
    pub const TRUE: Self = TaggedValue(VALUE_TRUE);
    /// `false`.
    pub const FALSE: Self = TaggedValue(VALUE_FALSE);
    /// Hole.
    pub const HOLE: Self = TaggedValue(VALUE_HOLE);
    /// Exception sentinel.
    pub const EXCEPTION: Self = TaggedValue(VALUE_EXCEPTION);

    /// Raw bits.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Box an int32.
    #[inline]
    #[must_use]
    pub const fn int(value: i32) -> Self {
        TaggedValue(TAG_INT | (value as u32 as u64))
    }

    /// Box a double. NaNs are canonicalized.
    #[inline]
    #[must_use]
    pub fn double(value: f64) -> Self {
        let bits = if value.is_nan() { f64::NAN.to_bits() } else { value.to_bits() };
        TaggedValue(bits.wrapping_add(DOUBLE_ENCODE_OFFSET))
    }

    /// Box a number, preferring the int representation when exact.
    ///
    /// `-0.0` stays a double.
    #[must_use]
    pub fn number(value: f64) -> Self {
        let truncated = value as i32;
        if f64::from(truncated) == value && !(value == 0.0 && value.is_sign_negative()) {
            Self::int(truncated)
        } else {
            Self::double(value)
        }
    }

    /// Box a boolean.
    #[inline]
    #[must_use]
    pub const fn boolean(value: bool) -> Self {
        if value {
            Self::TRUE
        } else {
            Self::FALSE
        }
    }

    /// Wrap a heap address.
    #[inline]
    #[must_use]
    pub const fn object(address: u64) -> Self {
        TaggedValue(address)
    }

    /// Int-tagged.
    #[inline]
    #[must_use]
    pub const fn is_int(self) -> bool {
        (self.0 & TAG_MARK) == TAG_INT
    }

    /// Double-tagged.
    #[inline]
    #[must_use]
    pub const fn is_double(self) -> bool {
        let top = self.0 & TAG_MARK;
        top != 0 && top != TAG_INT
    }

    /// Int or double.
    #[inline]
    #[must_use]
    pub const fn is_number(self) -> bool {
        (self.0 & TAG_MARK) != 0
    }

    /// Heap object pointer.
    #[inline]
    #[must_use]
    pub const fn is_heap_object(self) -> bool {
        (self.0 & TAG_HEAPOBJECT_MASK) == 0 && self.0 != 0
    }

    /// Special constant (including hole).
    #[inline]
    #[must_use]
    pub const fn is_special(self) -> bool {
        ((self.0 & TAG_SPECIAL_MASK) == TAG_SPECIAL) || self.0 == VALUE_HOLE
    }

    /// `true` or `false`.
    #[inline]
    #[must_use]
    pub const fn is_boolean(self) -> bool {
        self.0 == VALUE_TRUE || self.0 == VALUE_FALSE
    }

    /// `true`.
    #[inline]
    #[must_use]
    pub const fn is_true(self) -> bool {
        self.0 == VALUE_TRUE
    }

    /// `false`.
    #[inline]
    #[must_use]
    pub const fn is_false(self) -> bool {
        self.0 == VALUE_FALSE
    }

    /// `undefined`.
    #[inline]
    #[must_use]
    pub const fn is_undefined(self) -> bool {
        self.0 == VALUE_UNDEFINED
    }

    /// `null`.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == VALUE_NULL
    }

    /// `undefined` or `null`.
    #[inline]
    #[must_use]
    pub const fn is_undefined_or_null(self) -> bool {
        (self.0 & !0x01) == VALUE_UNDEFINED
    }

    /// Hole.
    #[inline]
    #[must_use]
    pub const fn is_hole(self) -> bool {
        self.0 == VALUE_HOLE
    }

    /// Exception sentinel.
    #[inline]
    #[must_use]
    pub const fn is_exception(self) -> bool {
        self.0 == VALUE_EXCEPTION
    }

    /// Payload of an int-tagged value.
    #[inline]
    #[must_use]
    pub const fn as_int(self) -> i32 {
        self.0 as u32 as i32
    }

    /// Payload of a double-tagged value.
    #[inline]
    #[must_use]
    pub fn as_double(self) -> f64 {
        f64::from_bits(self.0.wrapping_sub(DOUBLE_ENCODE_OFFSET))
    }

    /// Numeric payload of an int or double.
    #[must_use]
    pub fn as_number(self) -> f64 {
        if self.is_int() {
            f64::from(self.as_int())
        } else {
            self.as_double()
        }
    }

    /// Address of a heap object.
    #[inline]
    #[must_use]
    pub const fn as_address(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for TaggedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            VALUE_UNDEFINED => write!(f, "undefined"),
            VALUE_NULL => write!(f, "null"),
            VALUE_TRUE => write!(f, "true"),
            VALUE_FALSE => write!(f, "false"),
            VALUE_HOLE => write!(f, "hole"),
            VALUE_EXCEPTION => write!(f, "exception"),
            _ if self.is_int() => write!(f, "int({})", self.as_int()),
            _ if self.is_double() => write!(f, "double({})", self.as_double()),
            _ => write!(f, "object({:#x})", self.0),
        }
    }
}

impl From<i32> for TaggedValue {
    fn from(value: i32) -> Self {
        Self::int(value)
    }
}

impl From<bool> for TaggedValue {
    fn from(value: bool) -> Self {
        Self::boolean(value)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_int_encoding() {
        let v = TaggedValue::int(-7);
        assert!(v.is_int());
        assert!(v.is_number());
        assert!(!v.is_double());
        assert!(!v.is_heap_object());
        assert_eq!(v.as_int(), -7);
    }

    #[test]
    fn test_double_encoding() {
        let v = TaggedValue::double(1.5);
        assert!(v.is_double());
        assert!(!v.is_int());
        assert_eq!(v.as_double(), 1.5);

        let nan = TaggedValue::double(f64::NAN);
        assert!(nan.is_double());
        assert!(nan.as_double().is_nan());

        let neg_inf = TaggedValue::double(f64::NEG_INFINITY);
        assert!(neg_inf.is_double());
    }

    #[test]
    fn test_specials() {
        assert!(TaggedValue::UNDEFINED.is_special());
        assert!(TaggedValue::NULL.is_special());
        assert!(TaggedValue::HOLE.is_special());
        assert!(TaggedValue::TRUE.is_boolean());
        assert!(TaggedValue::FALSE.is_boolean());
        assert!(TaggedValue::UNDEFINED.is_undefined_or_null());
        assert!(TaggedValue::NULL.is_undefined_or_null());
        assert!(!TaggedValue::HOLE.is_undefined_or_null());
        assert!(!TaggedValue::UNDEFINED.is_heap_object());
        assert!(!TaggedValue::EXCEPTION.is_heap_object());
    }

    #[test]
    fn test_pointer_is_heap_object() {
        let v = TaggedValue::object(0x10_0000);
        assert!(v.is_heap_object());
        assert!(!v.is_number());
        assert!(!v.is_special());
    }

    #[test]
    fn test_number_prefers_int() {
        assert!(TaggedValue::number(3.0).is_int());
        assert!(TaggedValue::number(3.5).is_double());
        assert!(TaggedValue::number(-0.0).is_double());
        assert!(TaggedValue::number(f64::from(i32::MAX) + 1.0).is_double());
    }

    proptest! {
        #[test]
        fn prop_double_roundtrip(
            d in prop::num::f64::NORMAL | prop::num::f64::SUBNORMAL | prop::num::f64::ZERO | prop::num::f64::INFINITE
        ) {
            let v = TaggedValue::double(d);
            prop_assert!(v.is_double());
            prop_assert_eq!(v.as_double().to_bits(), d.to_bits());
        }

        #[test]
        fn prop_int_roundtrip(i in any::<i32>()) {
            let v = TaggedValue::int(i);
            prop_assert!(v.is_int());
            prop_assert_eq!(v.as_int(), i);
        }
    }
}
