//! Attribute blocks: ordered, case-insensitive key/value records.
//!
//! An `Attributes` value holds one record's worth of manifest metadata, either
//! the archive's main attributes or one entry's attributes.
//!
//! # Invariants
//! - Keys are validated `AttributeName`s: 1..=68 bytes of `[A-Za-z0-9_-]`.
//! - Lookup folds ASCII case; iteration and serialization use the spelling
//!   supplied at insertion (the first spelling wins on replace).
//! - Iteration order is insertion order.
//! - Equality and hashing ignore order and key case.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::stdx::OrderedMap;

/// Longest attribute name accepted: a 72-byte line minus `": "` and CRLF.
/// Anything longer would be split by the encoder before its separator.
pub const MAX_NAME_LEN: usize = 68;

/// A validated attribute name that remembers its original spelling.
#[derive(Clone, Debug)]
pub struct AttributeName {
    name: Box<str>,
}

/// Reason an attribute name was rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidAttributeName {
    pub name: String,
}

impl fmt::Display for InvalidAttributeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid attribute name {:?}", self.name)
    }
}

impl std::error::Error for InvalidAttributeName {}

#[inline]
fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

impl AttributeName {
    pub fn new(name: &str) -> Result<Self, InvalidAttributeName> {
        if Self::is_valid(name) {
            Ok(Self { name: name.into() })
        } else {
            Err(InvalidAttributeName {
                name: name.to_string(),
            })
        }
    }

    pub fn is_valid(name: &str) -> bool {
        !name.is_empty() && name.len() <= MAX_NAME_LEN && name.bytes().all(is_name_byte)
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Case-folded lookup key.
    #[inline]
    pub fn folded(&self) -> Box<str> {
        self.name.to_ascii_lowercase().into_boxed_str()
    }

    #[inline]
    pub fn eq_ignore_case(&self, other: &str) -> bool {
        self.name.eq_ignore_ascii_case(other)
    }
}

impl PartialEq for AttributeName {
    fn eq(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
    }
}

impl Eq for AttributeName {}

impl Hash for AttributeName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.name.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

impl fmt::Display for AttributeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl TryFrom<&str> for AttributeName {
    type Error = InvalidAttributeName;

    fn try_from(name: &str) -> Result<Self, Self::Error> {
        Self::new(name)
    }
}

/// Well-known attribute names.
pub mod names {
    pub const MANIFEST_VERSION: &str = "Manifest-Version";
    pub const SIGNATURE_VERSION: &str = "Signature-Version";
    pub const CREATED_BY: &str = "Created-By";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const CLASS_PATH: &str = "Class-Path";
    pub const MAIN_CLASS: &str = "Main-Class";
    pub const SEALED: &str = "Sealed";
    pub const EXTENSION_LIST: &str = "Extension-List";
    pub const EXTENSION_NAME: &str = "Extension-Name";
    pub const IMPLEMENTATION_TITLE: &str = "Implementation-Title";
    pub const IMPLEMENTATION_VERSION: &str = "Implementation-Version";
    pub const IMPLEMENTATION_VENDOR: &str = "Implementation-Vendor";
    pub const SPECIFICATION_TITLE: &str = "Specification-Title";
    pub const SPECIFICATION_VERSION: &str = "Specification-Version";
    pub const SPECIFICATION_VENDOR: &str = "Specification-Vendor";
    pub const MULTI_RELEASE: &str = "Multi-Release";
    /// Header that opens every per-entry section.
    pub const NAME: &str = "Name";
}

#[derive(Clone)]
struct Slot {
    name: AttributeName,
    value: String,
}

/// One record's case-insensitive key/value map.
#[derive(Clone, Default)]
pub struct Attributes {
    map: OrderedMap<Box<str>, Slot>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            map: OrderedMap::with_capacity(cap),
        }
    }

    /// Live pair count.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.map
            .get(&*fold(name))
            .map(|slot| slot.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(&*fold(name))
    }

    /// Insert or replace; returns the previous value.
    pub fn insert(&mut self, name: AttributeName, value: impl Into<String>) -> Option<String> {
        let value = value.into();
        if let Some(slot) = self.map.get_mut(&*name.folded()) {
            return Some(std::mem::replace(&mut slot.value, value));
        }
        self.map.insert(name.folded(), Slot { name, value });
        None
    }

    /// Validate `name` and insert.
    pub fn put(
        &mut self,
        name: &str,
        value: impl Into<String>,
    ) -> Result<Option<String>, InvalidAttributeName> {
        Ok(self.insert(AttributeName::new(name)?, value))
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.map.remove(&*fold(name)).map(|slot| slot.value)
    }

    /// Copy every pair of `other` into `self`, replacing existing values.
    pub fn extend_from(&mut self, other: &Attributes) {
        for (name, value) in other.iter() {
            self.insert(name.clone(), value);
        }
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Pairs in insertion order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&AttributeName, &str)> + '_ {
        self.map
            .values()
            .map(|slot| (&slot.name, slot.value.as_str()))
    }

    pub fn names(&self) -> impl ExactSizeIterator<Item = &AttributeName> + '_ {
        self.map.values().map(|slot| &slot.name)
    }

    fn folded_pairs(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<(&str, &str)> = self
            .map
            .iter()
            .map(|(k, slot)| (&**k, slot.value.as_str()))
            .collect();
        pairs.sort_unstable();
        pairs
    }
}

#[inline]
fn fold(name: &str) -> Box<str> {
    name.to_ascii_lowercase().into_boxed_str()
}

impl PartialEq for Attributes {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self.map.iter().all(|(k, slot)| {
                other
                    .map
                    .get(&**k)
                    .is_some_and(|o| o.value == slot.value)
            })
    }
}

impl Eq for Attributes {}

impl Hash for Attributes {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folded_pairs().hash(state);
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|(k, v)| (k.as_str(), v)))
            .finish()
    }
}

impl<'a> Extend<(AttributeName, &'a str)> for Attributes {
    fn extend<I: IntoIterator<Item = (AttributeName, &'a str)>>(&mut self, iter: I) {
        for (name, value) in iter {
            self.insert(name, value);
        }
    }
}
