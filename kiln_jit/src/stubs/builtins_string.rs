//! String builtin stubs: `charCodeAt`, `indexOf`, `substring` and `charAt`.
//!
//! The fast paths require a string receiver and int (or absent) positions.
//! Everything else, including coercions that could run user code, goes to
//! the native body.

use kiln_core::KilnResult;
use kiln_runtime::layout::string;
use kiln_runtime::ConstantIndex;

use super::{call_native_slow_path, StubEntry};
use crate::builder::{CircuitBuilder, Label};
use crate::ir::{Circuit, GateRef, GateType, MachineType};

// =============================================================================
// String Access
// =============================================================================

fn mix_length(b: &mut CircuitBuilder<'_>, s: GateRef) -> GateRef {
    b.load_at(MachineType::I32, s, string::MIX_LENGTH_OFFSET)
}

/// Length in UTF-16 units (int32).
pub(crate) fn string_length(b: &mut CircuitBuilder<'_>, s: GateRef) -> GateRef {
    let mix = mix_length(b, s);
    let shift = b.int32(string::LENGTH_SHIFT as i32);
    b.int32_lsr(mix, shift)
}

/// Whether `s` stores two bytes per unit.
pub(crate) fn is_utf16(b: &mut CircuitBuilder<'_>, s: GateRef) -> GateRef {
    let mix = mix_length(b, s);
    let bit = b.int32(string::UNCOMPRESSED_BIT as i32);
    let masked = b.int32_and(mix, bit);
    let zero = b.int32(0);
    b.int32_not_equal(masked, zero)
}

/// Code unit `index` of `s` as an int32.
pub(crate) fn load_code_unit(b: &mut CircuitBuilder<'_>, s: GateRef, index: GateRef, utf16: GateRef) -> GateRef {
    let zero = b.int32(0);
    let unit = b.new_variable(MachineType::I32, GateType::NJSValue, zero);
    let wide = b.new_label();
    let narrow = b.new_label();
    let exit = b.new_label();
    let wide_index = b.zext_to_int64(index);
    let data = b.int_ptr(string::DATA_OFFSET);
    b.branch(utf16, wide, narrow);

    b.bind(wide);
    let two = b.int_ptr(2);
    let scaled = b.int64_mul(wide_index, two);
    let offset = b.int64_add(scaled, data);
    let value = b.load(MachineType::I16, s, offset);
    let value = b.zext_to_int32(value);
    b.write(unit, value);
    b.jump(exit);

    b.bind(narrow);
    let offset = b.int64_add(wide_index, data);
    let value = b.load(MachineType::I8, s, offset);
    let value = b.zext_to_int32(value);
    b.write(unit, value);
    b.jump(exit);

    b.bind(exit);
    b.read(unit)
}

/// Copy `len` units of `s` starting at `from` into a fresh string.
///
/// A zero length yields the `EmptyString` constant. The copy is stored one
/// byte per unit unless some unit falls outside `1..=0x7F`.
pub(crate) fn new_substring(b: &mut CircuitBuilder<'_>, s: GateRef, from: GateRef, len: GateRef) -> GateRef {
    let init = b.undefined();
    let result = b.new_variable(MachineType::I64, GateType::String, init);
    let yes = b.boolean(true);
    let compressed = b.new_variable(MachineType::I1, GateType::NJSValue, yes);
    let zero = b.int32(0);
    let k = b.new_variable(MachineType::I32, GateType::NJSValue, zero);
    let one = b.int32(1);

    let empty = b.new_label();
    let alloc = b.new_label();
    let exit = b.new_label();
    let is_empty = b.int32_equal(len, zero);
    b.branch(is_empty, empty, alloc);

    b.bind(empty);
    let empty_string = b.global_constant(ConstantIndex::EmptyString);
    b.write(result, empty_string);
    b.jump(exit);

    b.bind(alloc);
    let utf16 = is_utf16(b, s);
    let scan = b.new_label();
    let scanned = b.new_label();
    b.branch(utf16, scan, scanned);

    // Scan a two-byte source for units that keep the copy two-byte.
    b.bind(scan);
    b.write(k, zero);
    let scan_head = b.new_label();
    let scan_body = b.new_label();
    let scan_next = b.new_label();
    let scan_wide = b.new_label();
    b.jump(scan_head);
    b.loop_begin(scan_head);
    let current = b.read(k);
    let more = b.int32_less_than(current, len);
    b.branch(more, scan_body, scanned);
    b.bind(scan_body);
    let index = b.int32_add(from, current);
    let unit = load_code_unit(b, s, index, utf16);
    let biased = b.int32_sub(unit, one);
    let limit = b.int32(i32::from(string::UTF8_1B_MAX));
    let fits = b.int32_unsigned_less_than(biased, limit);
    b.branch(fits, scan_next, scan_wide);
    b.bind(scan_wide);
    let no = b.boolean(false);
    b.write(compressed, no);
    b.jump(scanned);
    b.bind(scan_next);
    let next = b.int32_add(current, one);
    b.write(k, next);
    b.loop_end(scan_head);

    b.bind(scanned);
    let narrow = b.read(compressed);
    let unit_shift = b.select(narrow, zero, one);
    let bytes = b.int32_lsl(len, unit_shift);
    let bytes = b.zext_to_int64(bytes);
    let header = b.int_ptr(string::DATA_OFFSET + 7);
    let padded = b.int64_add(bytes, header);
    let align = b.int_ptr(!7);
    let size = b.int64_and(padded, align);
    let str_obj = b.allocate_in_young(size);
    let class = b.global_constant(ConstantIndex::StringClass);
    b.store_hclass(str_obj, class);
    let length_shift = b.int32(string::LENGTH_SHIFT as i32);
    let shifted = b.int32_lsl(len, length_shift);
    let wide_bit = b.int32(string::UNCOMPRESSED_BIT as i32);
    let flag = b.select(narrow, zero, wide_bit);
    let mix = b.int32_or(shifted, flag);
    b.store_at(MachineType::I32, str_obj, string::MIX_LENGTH_OFFSET, mix);
    b.store_at(MachineType::I32, str_obj, string::HASH_OFFSET, zero);

    b.write(k, zero);
    let copy_head = b.new_label();
    let copy_body = b.new_label();
    let copied = b.new_label();
    b.jump(copy_head);
    b.loop_begin(copy_head);
    let current = b.read(k);
    let more = b.int32_less_than(current, len);
    b.branch(more, copy_body, copied);
    b.bind(copy_body);
    let index = b.int32_add(from, current);
    let unit = load_code_unit(b, s, index, utf16);
    let slot = b.zext_to_int64(current);
    let data = b.int_ptr(string::DATA_OFFSET);
    let one_byte = b.new_label();
    let two_byte = b.new_label();
    let stored = b.new_label();
    b.branch(narrow, one_byte, two_byte);
    b.bind(one_byte);
    let offset = b.int64_add(slot, data);
    let byte = b.trunc_to_int8(unit);
    b.store(MachineType::I8, str_obj, offset, byte);
    b.jump(stored);
    b.bind(two_byte);
    let two = b.int_ptr(2);
    let scaled = b.int64_mul(slot, two);
    let offset = b.int64_add(scaled, data);
    let half = b.trunc_to_int16(unit);
    b.store(MachineType::I16, str_obj, offset, half);
    b.jump(stored);
    b.bind(stored);
    let next = b.int32_add(current, one);
    b.write(k, next);
    b.loop_end(copy_head);

    b.bind(copied);
    b.write(result, str_obj);
    b.jump(exit);

    b.bind(exit);
    b.read(result)
}

// =============================================================================
// Argument Helpers
// =============================================================================

/// Int32 value of a position argument: `default` when undefined, the int
/// payload when an int, otherwise a jump to `slow`.
fn int_argument(b: &mut CircuitBuilder<'_>, arg: GateRef, default: GateRef, slow: Label) -> GateRef {
    let value = b.new_variable(MachineType::I32, GateType::NJSValue, default);
    let done = b.new_label();
    let check_int = b.new_label();
    let is_int = b.new_label();
    let undefined = b.tagged_is_undefined(arg);
    b.branch(undefined, done, check_int);
    b.bind(check_int);
    let int = b.tagged_is_int(arg);
    b.branch(int, is_int, slow);
    b.bind(is_int);
    let payload = b.get_int32_of_tint(arg);
    b.write(value, payload);
    b.jump(done);
    b.bind(done);
    b.read(value)
}

fn clamp(b: &mut CircuitBuilder<'_>, value: GateRef, len: GateRef) -> GateRef {
    let zero = b.int32(0);
    let negative = b.int32_less_than(value, zero);
    let low = b.select(negative, zero, value);
    let over = b.int32_greater_than(low, len);
    b.select(over, len, low)
}

/// Continue on a string receiver; anything else goes to `slow`.
fn require_string_this(b: &mut CircuitBuilder<'_>, entry: &StubEntry, slow: Label) {
    let fast = b.new_label();
    let is_string = b.tagged_is_string(entry.this);
    b.branch(is_string, fast, slow);
    b.bind(fast);
}

fn finish_with_slow_path(b: &mut CircuitBuilder<'_>, entry: &StubEntry, slow: Label) {
    b.bind(slow);
    let result = call_native_slow_path(b, entry);
    b.return_(result);
}

// =============================================================================
// Stubs
// =============================================================================

/// `String.prototype.charCodeAt(pos)`.
pub(super) fn char_code_at(circuit: &mut Circuit) -> KilnResult<()> {
    let entry = StubEntry::of(circuit);
    let mut b = CircuitBuilder::new(circuit);
    let slow = b.new_label();
    require_string_this(&mut b, &entry, slow);
    let zero = b.int32(0);
    let pos = int_argument(&mut b, entry.args[0], zero, slow);
    let len = string_length(&mut b, entry.this);
    let in_range = b.int32_unsigned_less_than(pos, len);
    let hit = b.new_label();
    let miss = b.new_label();
    b.branch(in_range, hit, miss);
    b.bind(hit);
    let utf16 = is_utf16(&mut b, entry.this);
    let unit = load_code_unit(&mut b, entry.this, pos, utf16);
    let tagged = b.int32_to_tagged(unit);
    b.return_(tagged);
    b.bind(miss);
    let nan = b.tagged_nan();
    b.return_(nan);
    finish_with_slow_path(&mut b, &entry, slow);
    Ok(())
}

/// `String.prototype.charAt(pos)`.
pub(super) fn char_at(circuit: &mut Circuit) -> KilnResult<()> {
    let entry = StubEntry::of(circuit);
    let mut b = CircuitBuilder::new(circuit);
    let slow = b.new_label();
    require_string_this(&mut b, &entry, slow);
    let zero = b.int32(0);
    let pos = int_argument(&mut b, entry.args[0], zero, slow);
    let len = string_length(&mut b, entry.this);
    let in_range = b.int32_unsigned_less_than(pos, len);
    let hit = b.new_label();
    let miss = b.new_label();
    b.branch(in_range, hit, miss);
    b.bind(hit);
    let one = b.int32(1);
    let result = new_substring(&mut b, entry.this, pos, one);
    b.return_(result);
    b.bind(miss);
    let empty = b.global_constant(ConstantIndex::EmptyString);
    b.return_(empty);
    finish_with_slow_path(&mut b, &entry, slow);
    Ok(())
}

/// `String.prototype.substring(start, end)`.
pub(super) fn substring(circuit: &mut Circuit) -> KilnResult<()> {
    let entry = StubEntry::of(circuit);
    let mut b = CircuitBuilder::new(circuit);
    let slow = b.new_label();
    require_string_this(&mut b, &entry, slow);
    let len = string_length(&mut b, entry.this);
    let zero = b.int32(0);
    let start = int_argument(&mut b, entry.args[0], zero, slow);
    let end = int_argument(&mut b, entry.args[1], len, slow);
    let start = clamp(&mut b, start, len);
    let end = clamp(&mut b, end, len);
    let swapped = b.int32_greater_than(start, end);
    let from = b.select(swapped, end, start);
    let to = b.select(swapped, start, end);
    let count = b.int32_sub(to, from);
    let result = new_substring(&mut b, entry.this, from, count);
    b.return_(result);
    finish_with_slow_path(&mut b, &entry, slow);
    Ok(())
}

/// `String.prototype.indexOf(search, position)`.
///
/// Only string search values stay on the fast path; `ToString` on anything
/// else is left to the native body.
pub(super) fn index_of(circuit: &mut Circuit) -> KilnResult<()> {
    let entry = StubEntry::of(circuit);
    let mut b = CircuitBuilder::new(circuit);
    let slow = b.new_label();
    require_string_this(&mut b, &entry, slow);
    let search = entry.args[0];
    let search_ok = b.new_label();
    let is_string = b.tagged_is_string(search);
    b.branch(is_string, search_ok, slow);
    b.bind(search_ok);

    let len = string_length(&mut b, entry.this);
    let needle_len = string_length(&mut b, search);
    let zero = b.int32(0);
    let pos = int_argument(&mut b, entry.args[1], zero, slow);
    let from = clamp(&mut b, pos, len);
    let hay_utf16 = is_utf16(&mut b, entry.this);
    let needle_utf16 = is_utf16(&mut b, search);
    let last = b.int32_sub(len, needle_len);
    let one = b.int32(1);

    let minus_one = b.int32(-1);
    let found_at = b.new_variable(MachineType::I32, GateType::NJSValue, minus_one);
    let i = b.new_variable(MachineType::I32, GateType::NJSValue, from);
    let j = b.new_variable(MachineType::I32, GateType::NJSValue, zero);

    let outer_head = b.new_label();
    let outer_body = b.new_label();
    let exit = b.new_label();
    b.jump(outer_head);
    b.loop_begin(outer_head);
    let current = b.read(i);
    let candidate = b.int32_less_than_or_equal(current, last);
    b.branch(candidate, outer_body, exit);

    b.bind(outer_body);
    b.write(j, zero);
    let inner_head = b.new_label();
    let inner_body = b.new_label();
    let inner_next = b.new_label();
    let found = b.new_label();
    let mismatch = b.new_label();
    b.jump(inner_head);
    b.loop_begin(inner_head);
    let offset = b.read(j);
    let more = b.int32_less_than(offset, needle_len);
    b.branch(more, inner_body, found);
    b.bind(inner_body);
    let hay_index = b.int32_add(current, offset);
    let a = load_code_unit(&mut b, entry.this, hay_index, hay_utf16);
    let c = load_code_unit(&mut b, search, offset, needle_utf16);
    let same = b.int32_equal(a, c);
    b.branch(same, inner_next, mismatch);
    b.bind(inner_next);
    let next = b.int32_add(offset, one);
    b.write(j, next);
    b.loop_end(inner_head);

    b.bind(found);
    b.write(found_at, current);
    b.jump(exit);

    b.bind(mismatch);
    let next = b.int32_add(current, one);
    b.write(i, next);
    b.loop_end(outer_head);

    b.bind(exit);
    let index = b.read(found_at);
    let tagged = b.int32_to_tagged(index);
    b.return_(tagged);
    finish_with_slow_path(&mut b, &entry, slow);
    Ok(())
}
