//! Class layouts recorded from the running program.
//!
//! Type-feedback lowering specializes property access on class instances
//! and `new` on class constructors. Both need facts about the class that
//! the bytecode alone does not carry: the hidden class instances end up
//! with once their constructor has run, the byte offset of every inline
//! property under that hidden class, and whether the constructor is a base
//! constructor. [`TypeInfo`] holds those facts, keyed by the class index
//! carried in `GateType::ClassInstance` and `GateType::ClassConstructor`.

use rustc_hash::FxHashMap;
use tracing::debug;

use kiln_core::{KilnResult, TaggedValue};
use kiln_runtime::JsThread;

/// Layout facts about one class.
#[derive(Debug, Clone, Default)]
pub struct ClassLayout {
    hclass: Option<TaggedValue>,
    offsets: FxHashMap<u64, u64>,
    base: Option<bool>,
}

impl ClassLayout {
    /// Hidden class of fully constructed instances.
    #[must_use]
    pub fn hclass(&self) -> Option<TaggedValue> {
        self.hclass
    }

    /// Byte offset of the inline property named by the raw key word.
    #[must_use]
    pub fn offset(&self, key: u64) -> Option<u64> {
        self.offsets.get(&key).copied()
    }
}

/// Recorded class layouts.
#[derive(Debug, Clone, Default)]
pub struct TypeInfo {
    classes: FxHashMap<u32, ClassLayout>,
    length_key: Option<u64>,
}

impl TypeInfo {
    /// Empty table: every lookup misses and lowering stays generic.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the layout of `instance` as class `id`.
    ///
    /// `instance` must be fully constructed: its hidden class is the one
    /// later instances reach after the same constructor. Keys not stored
    /// inline are skipped.
    ///
    /// # Errors
    ///
    /// Fails if `instance` or its hidden class is not mapped.
    pub fn record_instance(
        &mut self,
        thread: &JsThread,
        id: u32,
        instance: TaggedValue,
        keys: &[TaggedValue],
    ) -> KilnResult<()> {
        let hclass = thread.hclass_of(instance)?;
        let layout = self.classes.entry(id).or_default();
        layout.hclass = Some(hclass);
        layout.offsets.clear();
        for &key in keys {
            if let Some(offset) = thread.inline_property_offset(hclass, key)? {
                layout.offsets.insert(key.raw(), offset);
            }
        }
        debug!(class = id, props = layout.offsets.len(), "class layout recorded");
        Ok(())
    }

    /// Record whether the constructor of class `id` is a base constructor.
    ///
    /// # Errors
    ///
    /// Fails if `ctor` is not a mapped function.
    pub fn record_constructor(&mut self, thread: &JsThread, id: u32, ctor: TaggedValue) -> KilnResult<()> {
        let base = thread.is_base_constructor(ctor)?;
        self.classes.entry(id).or_default().base = Some(base);
        Ok(())
    }

    /// Intern `"length"` so array length loads can be recognized.
    ///
    /// # Errors
    ///
    /// Fails if the string cannot be allocated.
    pub fn record_length_key(&mut self, thread: &mut JsThread) -> KilnResult<()> {
        self.length_key = Some(thread.intern("length")?.raw());
        Ok(())
    }

    /// Whether the raw key word is the interned `"length"`.
    #[must_use]
    pub fn is_length_key(&self, key: u64) -> bool {
        self.length_key == Some(key)
    }

    /// Layout of class `id`.
    #[must_use]
    pub fn class(&self, id: u32) -> Option<&ClassLayout> {
        self.classes.get(&id)
    }

    /// Hidden class of instances of class `id`.
    #[must_use]
    pub fn class_hclass(&self, id: u32) -> Option<TaggedValue> {
        self.class(id)?.hclass()
    }

    /// Inline offset of property `key` (a raw key word) on class `id`.
    #[must_use]
    pub fn property_offset(&self, id: u32, key: u64) -> Option<u64> {
        self.class(id)?.offset(key)
    }

    /// Whether class `id` has a known base constructor.
    #[must_use]
    pub fn is_base_class(&self, id: u32) -> bool {
        self.class(id).and_then(|c| c.base).unwrap_or(false)
    }

    /// Number of classes with any recorded fact.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_inline_offsets() {
        let mut thread = JsThread::new().unwrap();
        let obj = thread.new_plain_object().unwrap();
        let x = thread.intern("x").unwrap();
        let y = thread.intern("y").unwrap();
        thread.define_own_named(obj, x, TaggedValue::int(1)).unwrap();
        thread.define_own_named(obj, y, TaggedValue::int(2)).unwrap();

        let mut info = TypeInfo::new();
        info.record_instance(&thread, 7, obj, &[x, y]).unwrap();
        assert_eq!(info.class_hclass(7), Some(thread.hclass_of(obj).unwrap()));
        let ox = info.property_offset(7, x.raw()).unwrap();
        let oy = info.property_offset(7, y.raw()).unwrap();
        assert_eq!(oy, ox + 8);
        assert_eq!(thread.heap.read_tagged(obj.as_address() + oy).unwrap(), TaggedValue::int(2));
    }

    #[test]
    fn test_unknown_class_misses() {
        let info = TypeInfo::new();
        assert!(info.is_empty());
        assert!(info.class_hclass(1).is_none());
        assert!(info.property_offset(1, 0).is_none());
        assert!(!info.is_base_class(1));
        assert!(!info.is_length_key(0));
    }

    #[test]
    fn test_length_key() {
        let mut thread = JsThread::new().unwrap();
        let mut info = TypeInfo::new();
        info.record_length_key(&mut thread).unwrap();
        let length = thread.intern("length").unwrap();
        assert!(info.is_length_key(length.raw()));
        assert!(info.is_empty());
    }
}
