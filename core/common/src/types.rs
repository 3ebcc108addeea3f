//! Common types used throughout vsync.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Path separator for secret paths.
pub const SEPARATOR: char = '/';

/// Collapse every run of consecutive separators into a single one.
///
/// No other transformation is applied: leading and trailing separators
/// survive (collapsed), so folder paths stay folder paths.
pub fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut previous_was_separator = false;
    for c in path.chars() {
        if c == SEPARATOR {
            if previous_was_separator {
                continue;
            }
            previous_was_separator = true;
        } else {
            previous_was_separator = false;
        }
        out.push(c);
    }
    out
}

/// A hierarchical secret path, normalized at construction.
///
/// A trailing `/` marks a folder (enumerable); its absence marks a leaf
/// (holds a value). A leading `/` is kept as given; backends and mount
/// matching ignore it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct SecretPath(String);

impl SecretPath {
    /// Create a path from any string, normalizing it.
    pub fn new(path: impl AsRef<str>) -> Self {
        Self(normalize(path.as_ref()))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The path without its leading separator.
    pub fn relative(&self) -> &str {
        self.0.trim_start_matches(SEPARATOR)
    }

    /// Whether the path starts at the root separator.
    pub fn is_absolute(&self) -> bool {
        self.0.starts_with(SEPARATOR)
    }

    /// Whether the path denotes a folder.
    pub fn is_folder(&self) -> bool {
        self.0.ends_with(SEPARATOR)
    }

    /// Whether this is the empty (or bare root) path.
    pub fn is_root(&self) -> bool {
        self.relative().is_empty()
    }

    /// Join a child name returned by a listing.
    ///
    /// Names ending in `/` produce folder paths.
    pub fn join(&self, name: &str) -> Self {
        Self::new(format!("{}{}{}", self.0, SEPARATOR, name))
    }

    /// This path with a trailing separator.
    pub fn as_folder(&self) -> Self {
        if self.is_folder() {
            self.clone()
        } else {
            Self::new(format!("{}{}", self.0, SEPARATOR))
        }
    }

    /// Non-empty path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR).filter(|s| !s.is_empty())
    }
}

impl fmt::Display for SecretPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SecretPath {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}

impl From<&str> for SecretPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<SecretPath> for String {
    fn from(path: SecretPath) -> Self {
        path.0
    }
}

impl AsRef<str> for SecretPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A single value inside a secret.
///
/// Closed union over the JSON data model. Integers and floats are kept
/// apart so a value read back compares equal to what was written.
/// Integers that fit `i64` are `Integer`; only larger ones are `Unsigned`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Borrow the nested mapping, if this is one.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Borrow the string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        match i64::try_from(n) {
            Ok(n) => Value::Integer(n),
            Err(_) => Value::Unsigned(n),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<SecretValue> for Value {
    fn from(secret: SecretValue) -> Self {
        Value::Map(secret.0)
    }
}

/// The value stored at a leaf: a mapping from keys to values.
///
/// Equality is structural and independent of key insertion order.
/// `Debug` only reveals key names.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretValue(BTreeMap<String, Value>);

impl SecretValue {
    /// Create an empty secret value.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Convert from an arbitrary JSON document.
    ///
    /// # Errors
    /// - Returns error if the document is not a JSON object
    pub fn from_json(json: serde_json::Value) -> crate::Result<Self> {
        if !json.is_object() {
            return Err(crate::Error::Serialization(format!(
                "expected a JSON object, got {}",
                json
            )));
        }
        Ok(serde_json::from_value(json)?)
    }

    /// Convert into a JSON document.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume into the underlying mapping.
    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }
}

impl From<BTreeMap<String, Value>> for SecretValue {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for SecretValue {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretValue")
            .field("keys", &self.0.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Storage layout of a key-value mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineVersion {
    /// Values stored, read and listed at the logical path.
    V1,
    /// Values under `<mount>/data/`, listings under `<mount>/metadata/`,
    /// payloads wrapped as `{"data": value}`.
    V2,
    /// No matching kv mount; handled like `V1`.
    Unknown,
}

impl EngineVersion {
    /// Derive the version from a mount's engine type and `options.version`.
    pub fn from_mount(engine_type: &str, version: Option<&str>) -> Self {
        match (engine_type, version) {
            (_, Some("2")) => EngineVersion::V2,
            ("kv" | "generic", _) => EngineVersion::V1,
            _ => EngineVersion::Unknown,
        }
    }

    pub fn is_v2(self) -> bool {
        self == EngineVersion::V2
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineVersion::V1 => f.write_str("v1"),
            EngineVersion::V2 => f.write_str("v2"),
            EngineVersion::Unknown => f.write_str("unknown"),
        }
    }
}
