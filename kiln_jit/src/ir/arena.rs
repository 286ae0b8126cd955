//! Index-addressed storage for circuit gates.
//!
//! Gates live in an [`Arena`] and are named by [`Id`]s, plain `u32` indices
//! that stay valid for the life of the circuit. Deleted gates keep their slot
//! (marked dead by the circuit), so an id is never reused and a pass holding a
//! stale id can detect it instead of reading an unrelated gate.
//!
//! - [`SecondaryMap`] attaches side tables (use lists, schedule data) to ids
//! - [`BitSet`] tracks visited sets during region walks and scheduling

use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

// =============================================================================
// Typed ID
// =============================================================================

/// A stable, typed index into an [`Arena`].
///
/// Traits are implemented by hand so `Id<T>` is `Copy`/`Eq`/`Hash` whatever
/// `T` is.
pub struct Id<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Copy for Id<T> {}

impl<T> Clone for Id<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for Id<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    #[inline]
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> std::hash::Hash for Id<T> {
    #[inline]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> Id<T> {
    /// The null id, standing in for an absent gate.
    pub const INVALID: Self = Id {
        index: u32::MAX,
        _marker: PhantomData,
    };

    /// Id from a raw index.
    #[inline]
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Id {
            index,
            _marker: PhantomData,
        }
    }

    /// Raw index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Index as `usize`.
    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.index as usize
    }

    /// Whether this is not the null id.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.index != u32::MAX
    }
}

impl<T> std::fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "#{}", self.index)
        } else {
            write!(f, "#null")
        }
    }
}

impl<T> std::fmt::Display for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::INVALID
    }
}

// =============================================================================
// Arena
// =============================================================================

/// Append-only storage. Items are never removed individually.
#[derive(Debug, Clone)]
pub struct Arena<T> {
    items: Vec<T>,
}

impl<T> Arena<T> {
    /// Empty arena.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Arena { items: Vec::new() }
    }

    /// Empty arena with room for `capacity` items.
    #[inline]
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Arena {
            items: Vec::with_capacity(capacity),
        }
    }

    /// Store `item` and return its id.
    #[inline]
    pub fn alloc(&mut self, item: T) -> Id<T> {
        let index = u32::try_from(self.items.len()).unwrap_or(u32::MAX - 1);
        self.items.push(item);
        Id::new(index)
    }

    /// Item by id.
    #[inline]
    #[must_use]
    pub fn get(&self, id: Id<T>) -> Option<&T> {
        self.items.get(id.as_usize())
    }

    /// Mutable item by id.
    #[inline]
    pub fn get_mut(&mut self, id: Id<T>) -> Option<&mut T> {
        self.items.get_mut(id.as_usize())
    }

    /// Number of slots ever allocated.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing was allocated.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items with their ids, in allocation order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (Id<T>, &T)> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| (Id::new(i as u32), item))
    }

    /// All ids, in allocation order.
    #[inline]
    pub fn ids(&self) -> impl Iterator<Item = Id<T>> {
        (0..self.items.len() as u32).map(Id::new)
    }

    /// Id the next allocation will get.
    #[inline]
    #[must_use]
    pub fn next_id(&self) -> Id<T> {
        Id::new(self.items.len() as u32)
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<Id<T>> for Arena<T> {
    type Output = T;

    #[inline]
    fn index(&self, id: Id<T>) -> &Self::Output {
        &self.items[id.as_usize()]
    }
}

impl<T> IndexMut<Id<T>> for Arena<T> {
    #[inline]
    fn index_mut(&mut self, id: Id<T>) -> &mut Self::Output {
        &mut self.items[id.as_usize()]
    }
}

// =============================================================================
// Secondary Map
// =============================================================================

/// Dense side table keyed by arena ids; grows on write.
#[derive(Debug, Clone)]
pub struct SecondaryMap<K, V> {
    values: Vec<V>,
    _marker: PhantomData<fn() -> K>,
}

impl<K, V: Default + Clone> SecondaryMap<K, V> {
    /// Empty map.
    #[must_use]
    pub fn new() -> Self {
        SecondaryMap {
            values: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Map pre-filled with defaults for `capacity` ids.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        SecondaryMap {
            values: vec![V::default(); capacity],
            _marker: PhantomData,
        }
    }

    /// Make room for ids below `len`.
    pub fn resize(&mut self, len: usize) {
        if len > self.values.len() {
            self.values.resize(len, V::default());
        }
    }

    /// Value by id.
    #[must_use]
    pub fn get(&self, id: Id<K>) -> Option<&V> {
        self.values.get(id.as_usize())
    }

    /// Mutable value by id, growing the table if needed.
    pub fn entry(&mut self, id: Id<K>) -> &mut V {
        let idx = id.as_usize();
        if idx >= self.values.len() {
            self.values.resize(idx + 1, V::default());
        }
        &mut self.values[idx]
    }

    /// Overwrite the value of `id`.
    pub fn set(&mut self, id: Id<K>, value: V) {
        *self.entry(id) = value;
    }

    /// Values with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (Id<K>, &V)> {
        self.values
            .iter()
            .enumerate()
            .map(|(i, v)| (Id::new(i as u32), v))
    }
}

impl<K, V: Default + Clone> Default for SecondaryMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V: Default + Clone> Index<Id<K>> for SecondaryMap<K, V> {
    type Output = V;

    fn index(&self, id: Id<K>) -> &Self::Output {
        &self.values[id.as_usize()]
    }
}

// =============================================================================
// Bit Set
// =============================================================================

/// Compact set of ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitSet {
    bits: Vec<u64>,
}

impl BitSet {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        BitSet { bits: Vec::new() }
    }

    /// Empty set with room for `n` bits.
    #[must_use]
    pub fn with_capacity(n: usize) -> Self {
        BitSet {
            bits: vec![0; n.div_ceil(64)],
        }
    }

    /// Add `index`; returns whether it was absent.
    #[inline]
    pub fn insert(&mut self, index: usize) -> bool {
        let word = index / 64;
        if word >= self.bits.len() {
            self.bits.resize(word + 1, 0);
        }
        let mask = 1 << (index % 64);
        let fresh = self.bits[word] & mask == 0;
        self.bits[word] |= mask;
        fresh
    }

    /// Remove `index`.
    #[inline]
    pub fn remove(&mut self, index: usize) {
        if let Some(word) = self.bits.get_mut(index / 64) {
            *word &= !(1 << (index % 64));
        }
    }

    /// Whether `index` is present.
    #[inline]
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        self.bits
            .get(index / 64)
            .is_some_and(|word| word & (1 << (index % 64)) != 0)
    }

    /// Number of members.
    #[must_use]
    pub fn count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Members in increasing order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter().enumerate().flat_map(|(w, &word)| {
            (0..64).filter(move |b| word & (1 << b) != 0).map(move |b| w * 64 + b)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;

    #[test]
    fn test_arena_alloc() {
        let mut arena: Arena<u32> = Arena::new();
        let a = arena.alloc(7);
        let b = arena.alloc(9);
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(arena[b], 9);
        assert_eq!(arena.next_id().index(), 2);
        assert_eq!(arena.ids().count(), 2);
    }

    #[test]
    fn test_secondary_map_grows() {
        let mut map: SecondaryMap<Dummy, Vec<u32>> = SecondaryMap::new();
        map.entry(Id::new(5)).push(3);
        assert_eq!(map[Id::new(5)], vec![3]);
        assert!(map[Id::new(2)].is_empty());
        assert!(map.get(Id::new(9)).is_none());
    }

    #[test]
    fn test_bit_set() {
        let mut set = BitSet::with_capacity(10);
        assert!(set.insert(3));
        assert!(!set.insert(3));
        assert!(set.insert(130));
        assert!(set.contains(130));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![3, 130]);
        set.remove(3);
        assert_eq!(set.count(), 1);
    }

    #[test]
    fn test_id_null() {
        let id: Id<Dummy> = Id::default();
        assert!(!id.is_valid());
        assert_eq!(format!("{id:?}"), "#null");
    }
}
