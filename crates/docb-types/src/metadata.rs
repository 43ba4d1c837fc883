//! Typed custom metadata.
//!
//! Objects carry an open key→value bag so that caches can tag them with the
//! keys they were stored under (repository name, repository hash, transform
//! name, build signature, ...). Values are restricted to a small closed set of
//! primitives so the bag stays serializable with every backend codec.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single metadata value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetaValue {
    String(String),
    Int(i64),
    Bool(bool),
    Map(BTreeMap<String, MetaValue>),
}

impl MetaValue {
    /// Short type label, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Int(_) => "int",
            Self::Bool(_) => "bool",
            Self::Map(_) => "map",
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for MetaValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<bool> for MetaValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<BTreeMap<String, MetaValue>> for MetaValue {
    fn from(m: BTreeMap<String, MetaValue>) -> Self {
        Self::Map(m)
    }
}

/// Ordered custom metadata bag.
///
/// The typed getters never fail: a missing key or a value of another type
/// yields the type's default together with `false`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata(BTreeMap<String, MetaValue>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetaValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<MetaValue> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetaValue)> {
        self.0.iter()
    }

    pub fn get_str(&self, key: &str) -> (String, bool) {
        match self.0.get(key) {
            Some(MetaValue::String(s)) => (s.clone(), true),
            _ => (String::new(), false),
        }
    }

    pub fn get_int(&self, key: &str) -> (i64, bool) {
        match self.0.get(key) {
            Some(MetaValue::Int(n)) => (*n, true),
            _ => (0, false),
        }
    }

    pub fn get_bool(&self, key: &str) -> (bool, bool) {
        match self.0.get(key) {
            Some(MetaValue::Bool(b)) => (*b, true),
            _ => (false, false),
        }
    }

    pub fn get_map(&self, key: &str) -> (BTreeMap<String, MetaValue>, bool) {
        match self.0.get(key) {
            Some(MetaValue::Map(m)) => (m.clone(), true),
            _ => (BTreeMap::new(), false),
        }
    }

    /// Returns `true` if `key` holds exactly the string `expected`.
    pub fn str_eq(&self, key: &str, expected: &str) -> bool {
        matches!(self.0.get(key), Some(MetaValue::String(s)) if s == expected)
    }
}

impl FromIterator<(String, MetaValue)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (String, MetaValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
