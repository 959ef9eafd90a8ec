//! Ordered key/value attributes.

use std::fmt;

use indexmap::IndexMap;
use serde::{Serialize, Serializer};

/// An ordered set of string attributes.
///
/// `Attributes` is the single annotation type used throughout the engine: outcome annotations, span tags, metric tags,
/// and encoded log record attributes are all built from it. Insertion order is preserved, and re-inserting an
/// existing key replaces its value in place without moving it.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    inner: IndexMap<String, String>,
}

impl Attributes {
    /// Creates an empty set of attributes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an attribute, returning `self` for chaining.
    pub fn with<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: ToString,
    {
        self.insert(key, value);
        self
    }

    /// Sets an attribute, replacing any existing value for the same key.
    pub fn insert<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: ToString,
    {
        self.inner.insert(key.into(), value.to_string());
    }

    /// Sets an attribute only if the key is not already present.
    pub fn insert_if_absent<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: ToString,
    {
        self.inner.entry(key.into()).or_insert_with(|| value.to_string());
    }

    /// Appends every attribute from `other`, in order.
    pub fn extend(&mut self, other: &Attributes) {
        for (key, value) in other.iter() {
            self.insert(key, value);
        }
    }

    /// Returns the value for the given key, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner.get(key).map(String::as_str)
    }

    /// Returns `true` if the given key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    /// Returns the number of attributes.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if there are no attributes.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterates over the attributes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Renders the attributes as `key:value` tags.
    pub fn to_tags(&self) -> Vec<String> {
        self.iter().map(|(k, v)| format!("{}:{}", k, v)).collect()
    }

    /// Returns the attributes in their OTLP JSON representation.
    pub fn to_otlp(&self) -> Vec<KeyValue> {
        self.iter()
            .map(|(key, value)| KeyValue {
                key: key.to_string(),
                value: AnyValue::string(value),
            })
            .collect()
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.inner.iter()).finish()
    }
}

impl<K, V> FromIterator<(K, V)> for Attributes
where
    K: Into<String>,
    V: ToString,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut attributes = Attributes::new();
        for (key, value) in iter {
            attributes.insert(key, value);
        }
        attributes
    }
}

/// An OTLP `KeyValue` in its JSON form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct KeyValue {
    /// Attribute key.
    pub key: String,

    /// Attribute value.
    pub value: AnyValue,
}

/// An OTLP `AnyValue` in its JSON form.
///
/// Only string values are produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnyValue {
    string_value: String,
}

impl AnyValue {
    /// Creates a string value.
    pub fn string<S: Into<String>>(value: S) -> Self {
        Self {
            string_value: value.into(),
        }
    }

    /// Returns the string value.
    pub fn as_str(&self) -> &str {
        &self.string_value
    }
}

impl Serialize for AnyValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap as _;

        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("stringValue", &self.string_value)?;
        map.end()
    }
}
