//! Line strings: compressed (one byte per unit) or UTF-16.
//!
//! A string is compressed iff every code unit lies in `1..=0x7F`. The mixed
//! length word holds `length << 2 | interned << 1 | uncompressed`.

use kiln_core::value::TaggedValue;
use kiln_core::KilnResult;

use crate::heap::ConstantIndex;
use crate::layout::{object, string};
use crate::thread::JsThread;

/// Whether a code unit can be stored in a compressed string.
#[inline]
#[must_use]
pub const fn is_compressible(unit: u16) -> bool {
    unit.wrapping_sub(1) < string::UTF8_1B_MAX
}

impl JsThread {
    /// Allocate a string from UTF-8 text.
    ///
    /// # Errors
    ///
    /// Fails if the heap is exhausted beyond its ceiling.
    pub fn new_string(&mut self, text: &str) -> KilnResult<TaggedValue> {
        let units: Vec<u16> = text.encode_utf16().collect();
        self.new_string_from_utf16(&units)
    }

    /// Allocate a string from UTF-16 code units, compressing when possible.
    ///
    /// # Errors
    ///
    /// Fails if the heap is exhausted beyond its ceiling.
    pub fn new_string_from_utf16(&mut self, units: &[u16]) -> KilnResult<TaggedValue> {
        if units.is_empty() {
            let empty = self.heap.constant(ConstantIndex::EmptyString)?;
            if empty.is_heap_object() {
                return Ok(empty);
            }
        }
        let compressed = units.iter().all(|&u| is_compressible(u));
        let unit_size = if compressed { 1 } else { 2 };
        let size = string::DATA_OFFSET + units.len() as u64 * unit_size;
        let class = self.heap.constant(ConstantIndex::StringClass)?;
        let address = self.heap.allocate(size)?;
        let s = TaggedValue::object(address);
        self.heap.set_field(s, object::HCLASS_OFFSET, class)?;
        let mut mix = (units.len() as u32) << string::LENGTH_SHIFT;
        if !compressed {
            mix |= string::UNCOMPRESSED_BIT;
        }
        self.heap.write_u32(address + string::MIX_LENGTH_OFFSET, mix)?;
        self.heap.write_u32(address + string::HASH_OFFSET, 0)?;
        let data = address + string::DATA_OFFSET;
        if compressed {
            let bytes: Vec<u8> = units.iter().map(|&u| u as u8).collect();
            self.heap.write_bytes(data, &bytes)?;
        } else {
            let bytes: Vec<u8> = units.iter().flat_map(|u| u.to_le_bytes()).collect();
            self.heap.write_bytes(data, &bytes)?;
        }
        Ok(s)
    }

    fn mix_length(&self, s: TaggedValue) -> KilnResult<u32> {
        self.heap.read_u32(s.as_address() + string::MIX_LENGTH_OFFSET)
    }

    /// Number of UTF-16 code units.
    ///
    /// # Errors
    ///
    /// Fails if `s` is not mapped.
    pub fn string_length(&self, s: TaggedValue) -> KilnResult<u32> {
        Ok(self.mix_length(s)? >> string::LENGTH_SHIFT)
    }

    /// Whether `s` stores one byte per unit.
    ///
    /// # Errors
    ///
    /// Fails if `s` is not mapped.
    pub fn string_is_compressed(&self, s: TaggedValue) -> KilnResult<bool> {
        Ok(self.mix_length(s)? & string::UNCOMPRESSED_BIT == 0)
    }

    /// Whether `s` is the canonical interned copy.
    ///
    /// # Errors
    ///
    /// Fails if `s` is not mapped.
    pub fn string_is_interned(&self, s: TaggedValue) -> KilnResult<bool> {
        Ok(self.mix_length(s)? & string::INTERNED_BIT != 0)
    }

    /// Code unit at `index`; the caller checks bounds.
    ///
    /// # Errors
    ///
    /// Fails if the read leaves the heap.
    pub fn code_unit_at(&self, s: TaggedValue, index: u32) -> KilnResult<u16> {
        let data = s.as_address() + string::DATA_OFFSET;
        if self.string_is_compressed(s)? {
            Ok(u16::from(self.heap.read_u8(data + u64::from(index))?))
        } else {
            self.heap.read_u16(data + u64::from(index) * 2)
        }
    }

    /// All code units of `s`.
    ///
    /// # Errors
    ///
    /// Fails if `s` is not mapped.
    pub fn string_units(&self, s: TaggedValue) -> KilnResult<Vec<u16>> {
        let len = u64::from(self.string_length(s)?);
        let data = s.as_address() + string::DATA_OFFSET;
        if self.string_is_compressed(s)? {
            Ok(self.heap.slice(data, len)?.iter().map(|&b| u16::from(b)).collect())
        } else {
            Ok(self
                .heap
                .slice(data, len * 2)?
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect())
        }
    }

    /// Decode `s` to Rust text, replacing lone surrogates.
    ///
    /// # Errors
    ///
    /// Fails if `s` is not mapped.
    pub fn string_to_rust(&self, s: TaggedValue) -> KilnResult<String> {
        Ok(String::from_utf16_lossy(&self.string_units(s)?))
    }

    /// Code-unit equality.
    ///
    /// # Errors
    ///
    /// Fails if either string is not mapped.
    pub fn string_equal(&self, a: TaggedValue, b: TaggedValue) -> KilnResult<bool> {
        if a == b {
            return Ok(true);
        }
        if self.string_length(a)? != self.string_length(b)? {
            return Ok(false);
        }
        if self.string_is_interned(a)? && self.string_is_interned(b)? {
            return Ok(false);
        }
        Ok(self.string_units(a)? == self.string_units(b)?)
    }

    /// Hash of `s`, computed once and cached in the string.
    ///
    /// # Errors
    ///
    /// Fails if `s` is not mapped.
    pub fn string_hash(&mut self, s: TaggedValue) -> KilnResult<u32> {
        let cached = self.heap.read_u32(s.as_address() + string::HASH_OFFSET)?;
        if cached != 0 {
            return Ok(cached);
        }
        let hash = self
            .string_units(s)?
            .iter()
            .fold(0u32, |h, &u| h.wrapping_mul(31).wrapping_add(u32::from(u)));
        self.heap.write_u32(s.as_address() + string::HASH_OFFSET, hash)?;
        Ok(hash)
    }

    /// The canonical string for `text`.
    ///
    /// # Errors
    ///
    /// Fails if the heap is exhausted beyond its ceiling.
    pub fn intern(&mut self, text: &str) -> KilnResult<TaggedValue> {
        if let Some(&s) = self.interned.get(text) {
            return Ok(s);
        }
        let s = self.new_string(text)?;
        let mix = self.mix_length(s)?;
        self.heap
            .write_u32(s.as_address() + string::MIX_LENGTH_OFFSET, mix | string::INTERNED_BIT)?;
        self.interned.insert(text.to_owned(), s);
        Ok(s)
    }

    /// The canonical copy of an existing string.
    ///
    /// # Errors
    ///
    /// Fails if the heap is exhausted beyond its ceiling.
    pub fn intern_string(&mut self, s: TaggedValue) -> KilnResult<TaggedValue> {
        if self.string_is_interned(s)? {
            return Ok(s);
        }
        let text = self.string_to_rust(s)?;
        self.intern(&text)
    }

    /// Code units `[start, start + len)` as a new string.
    ///
    /// # Errors
    ///
    /// Fails if the range is outside `s`.
    pub fn substring(&mut self, s: TaggedValue, start: u32, len: u32) -> KilnResult<TaggedValue> {
        let units = self.string_units(s)?;
        let end = (start as usize + len as usize).min(units.len());
        let start = (start as usize).min(end);
        self.new_string_from_utf16(&units[start..end])
    }

    /// `a + b`.
    ///
    /// # Errors
    ///
    /// Fails if the heap is exhausted beyond its ceiling.
    pub fn concat_strings(&mut self, a: TaggedValue, b: TaggedValue) -> KilnResult<TaggedValue> {
        let mut units = self.string_units(a)?;
        units.extend(self.string_units(b)?);
        self.new_string_from_utf16(&units)
    }

    /// First index of `search` in `s` at or after `from`, or -1.
    ///
    /// # Errors
    ///
    /// Fails if either string is not mapped.
    pub fn string_index_of(&self, s: TaggedValue, search: TaggedValue, from: u32) -> KilnResult<i32> {
        let hay = self.string_units(s)?;
        let needle = self.string_units(search)?;
        Ok(index_of_units(&hay, &needle, from as usize).map_or(-1, |i| i as i32))
    }
}

/// First occurrence of `needle` in `hay` at or after `from`.
#[must_use]
pub fn index_of_units(hay: &[u16], needle: &[u16], from: usize) -> Option<usize> {
    if from > hay.len() {
        return None;
    }
    if needle.is_empty() {
        return Some(from);
    }
    hay[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression() {
        let mut thread = JsThread::new().unwrap();
        let ascii = thread.new_string("hello").unwrap();
        let wide = thread.new_string("h\u{e9}llo").unwrap();
        let nul = thread.new_string_from_utf16(&[0, 65]).unwrap();
        assert!(thread.string_is_compressed(ascii).unwrap());
        assert!(!thread.string_is_compressed(wide).unwrap());
        assert!(!thread.string_is_compressed(nul).unwrap());
        assert_eq!(thread.code_unit_at(wide, 1).unwrap(), 0xE9);
        assert_eq!(thread.string_length(wide).unwrap(), 5);
    }

    #[test]
    fn test_equality_across_encodings() {
        let mut thread = JsThread::new().unwrap();
        let a = thread.new_string("abc").unwrap();
        let b = thread.new_string_from_utf16(&[97, 98, 99]).unwrap();
        assert!(thread.string_equal(a, b).unwrap());
        let c = thread.new_string("abd").unwrap();
        assert!(!thread.string_equal(a, c).unwrap());
    }

    #[test]
    fn test_intern_is_canonical() {
        let mut thread = JsThread::new().unwrap();
        let a = thread.intern("key").unwrap();
        let b = thread.intern("key").unwrap();
        assert_eq!(a, b);
        let fresh = thread.new_string("key").unwrap();
        assert_eq!(thread.intern_string(fresh).unwrap(), a);
    }

    #[test]
    fn test_index_of_units() {
        let hay: Vec<u16> = "abcabc".encode_utf16().collect();
        let needle: Vec<u16> = "ca".encode_utf16().collect();
        assert_eq!(index_of_units(&hay, &needle, 0), Some(2));
        assert_eq!(index_of_units(&hay, &needle, 3), None);
        assert_eq!(index_of_units(&hay, &[], 4), Some(4));
        assert_eq!(index_of_units(&hay, &needle, 9), None);
    }

    #[test]
    fn test_substring_and_concat() {
        let mut thread = JsThread::new().unwrap();
        let s = thread.new_string("kiln lowering").unwrap();
        let sub = thread.substring(s, 5, 3).unwrap();
        assert_eq!(thread.string_to_rust(sub).unwrap(), "low");
        let joined = thread.concat_strings(sub, s).unwrap();
        assert_eq!(thread.string_to_rust(joined).unwrap(), "lowkiln lowering");
    }
}
