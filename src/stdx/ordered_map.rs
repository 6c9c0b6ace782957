//! Insertion-ordered hash map.
//!
//! Slots live in a dense `Vec` in insertion order; a side index maps each key
//! to its slot. Lookups are O(1). Removal shifts later slots down and patches
//! their index entries, so it is O(n); the maps this backs are built once and
//! rarely shrink.
//!
//! # Invariants
//! - `index[slots[i].0] == i` for every slot.
//! - `slots.len() == index.len()`.

use std::borrow::Borrow;
use std::hash::Hash;

use ahash::AHashMap;

#[derive(Clone, Debug)]
pub struct OrderedMap<K, V> {
    slots: Vec<(K, V)>,
    index: AHashMap<K, usize>,
}

impl<K, V> Default for OrderedMap<K, V> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            index: AHashMap::new(),
        }
    }
}

impl<K: Hash + Eq + Clone, V> OrderedMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            slots: Vec::with_capacity(cap),
            index: AHashMap::with_capacity(cap),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.get(key).map(|&i| &self.slots[i].1)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.index.get(key) {
            Some(&i) => Some(&mut self.slots[i].1),
            None => None,
        }
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.contains_key(key)
    }

    /// Insert or replace. A replaced value keeps its original position.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        if let Some(&i) = self.index.get(&key) {
            return Some(std::mem::replace(&mut self.slots[i].1, value));
        }
        self.index.insert(key.clone(), self.slots.len());
        self.slots.push((key, value));
        None
    }

    /// Return the value for `key`, inserting `make()` at the end if absent.
    pub fn get_or_insert_with(&mut self, key: K, make: impl FnOnce() -> V) -> &mut V {
        let i = match self.index.get(&key) {
            Some(&i) => i,
            None => {
                let i = self.slots.len();
                self.index.insert(key.clone(), i);
                self.slots.push((key, make()));
                i
            }
        };
        &mut self.slots[i].1
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let i = self.index.remove(key)?;
        let (_, value) = self.slots.remove(i);
        for (k, _) in &self.slots[i..] {
            if let Some(slot) = self.index.get_mut::<K>(k) {
                *slot -= 1;
            }
        }
        Some(value)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&K, &V)> + '_ {
        self.slots.iter().map(|(k, v)| (k, v))
    }

    pub fn iter_mut(&mut self) -> impl ExactSizeIterator<Item = (&K, &mut V)> + '_ {
        self.slots.iter_mut().map(|(k, v)| (&*k, v))
    }

    pub fn keys(&self) -> impl ExactSizeIterator<Item = &K> + '_ {
        self.slots.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl ExactSizeIterator<Item = &V> + '_ {
        self.slots.iter().map(|(_, v)| v)
    }
}

impl<K: Hash + Eq + Clone, V: PartialEq> OrderedMap<K, V> {
    /// Order-independent equality over key/value pairs.
    pub fn same_pairs(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .slots
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|ov| ov == v))
    }
}
