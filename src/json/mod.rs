//! Mutable JSON documents addressed by dot-delimited paths
//!
//! A `JsonDocument` is decoded once per response and handed to JSON hooks.
//! Lookups never panic: a missing key, or a key whose value has the wrong
//! type, is reported as a `PathError` the caller has to handle.

mod path;

use serde_json::{Map, Value};
use std::fmt;

pub use path::{JsonPath, PathError};

/// A decoded JSON body
#[derive(Debug, Clone, PartialEq)]
pub struct JsonDocument {
    root: Value,
}

impl JsonDocument {
    /// Decode a document from raw bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes).map(Self::from_value)
    }

    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn into_value(self) -> Value {
        self.root
    }

    /// Look up the value at `path`
    pub fn get(&self, path: &str) -> Result<&Value, PathError> {
        let path = JsonPath::parse(path)?;
        let mut current = &self.root;

        for (depth, segment) in path.segments().iter().enumerate() {
            let Value::Object(map) = current else {
                return Err(PathError::TypeMismatch {
                    path: path.prefix(depth),
                    expected: "object",
                    found: kind_of(current),
                });
            };
            current = map.get(segment).ok_or_else(|| PathError::NotFound {
                path: path.to_string(),
            })?;
        }

        Ok(current)
    }

    /// Look up the string at `path`
    pub fn get_str(&self, path: &str) -> Result<&str, PathError> {
        let value = self.get(path)?;
        value.as_str().ok_or_else(|| PathError::TypeMismatch {
            path: path.to_string(),
            expected: "string",
            found: kind_of(value),
        })
    }

    /// True when every key along `path` exists, even if the value is `null`
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_ok()
    }

    /// Write `value` at `path`, creating missing intermediate objects
    ///
    /// Fails without touching the document when an intermediate value exists
    /// but is not an object. Objects are only created past the last existing
    /// segment, so a failed write never leaves half-built objects behind.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> Result<(), PathError> {
        let path = JsonPath::parse(path)?;
        let (last, parents) = path.split_last();
        let mut current = &mut self.root;

        for (depth, segment) in parents.iter().enumerate() {
            let found = kind_of(current);
            let Value::Object(map) = current else {
                return Err(PathError::TypeMismatch {
                    path: path.prefix(depth),
                    expected: "object",
                    found,
                });
            };
            current = map
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
        }

        let found = kind_of(current);
        let Value::Object(map) = current else {
            return Err(PathError::TypeMismatch {
                path: path.prefix(parents.len()),
                expected: "object",
                found,
            });
        };
        map.insert(last.to_string(), value.into());
        Ok(())
    }

    /// Serialize back to compact JSON
    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.root)
    }
}

impl fmt::Display for JsonDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.root.fmt(f)
    }
}

/// Short name of a value's JSON type, used in error messages
pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
