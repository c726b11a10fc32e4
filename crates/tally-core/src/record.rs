//! Records and the dot-path accessor used to read them.
//!
//! A `FieldPath` is parsed once from a caller-declared string such as
//! `"results.votes"` and then walked against each record. Numeric segments
//! index into arrays (`"candidates.0.name"`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::types::Scalar;

/// One domain record: a JSON object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Wrap a JSON value; anything but an object is rejected.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::Record(format!(
                "expected a JSON object, found {}",
                json_kind(&other)
            ))),
        }
    }

    /// Raw JSON at `path`, if every segment resolves.
    pub fn get(&self, path: &FieldPath) -> Option<&Value> {
        let mut segments = path.segments.iter();
        let first = segments.next()?;
        let mut cur = self.0.get(first)?;
        for seg in segments {
            cur = match cur {
                Value::Object(map) => map.get(seg)?,
                Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(cur)
    }

    /// Typed leaf at `path`; missing fields read as `Scalar::Null`.
    pub fn scalar(&self, path: &FieldPath) -> Scalar {
        self.get(path).map(Scalar::from_json).unwrap_or(Scalar::Null)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl TryFrom<Value> for Record {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Record::from_value(value)
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Parsed dot-path into a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath {
    raw: String,
    segments: Vec<String>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::FieldPath(raw.to_string()));
        }
        let segments: Vec<String> = trimmed.split('.').map(|s| s.to_string()).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(Error::FieldPath(raw.to_string()));
        }
        Ok(Self {
            raw: trimmed.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }
}

impl FromStr for FieldPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        FieldPath::parse(s)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for FieldPath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        FieldPath::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(v: Value) -> Record {
        Record::from_value(v).unwrap()
    }

    #[test]
    fn nested_lookup() {
        let r = rec(json!({"meta": {"region": "South West"}, "votes": [10, 20]}));
        let region = FieldPath::parse("meta.region").unwrap();
        let second = FieldPath::parse("votes.1").unwrap();
        assert_eq!(r.scalar(&region), Scalar::Str("South West".into()));
        assert_eq!(r.scalar(&second), Scalar::I64(20));
    }

    #[test]
    fn missing_reads_as_null() {
        let r = rec(json!({"a": {"b": 1}}));
        assert!(r.scalar(&FieldPath::parse("a.c").unwrap()).is_null());
        assert!(r.scalar(&FieldPath::parse("a.b.c").unwrap()).is_null());
        assert!(r.scalar(&FieldPath::parse("z").unwrap()).is_null());
    }

    #[test]
    fn rejects_bad_paths_and_non_objects() {
        assert!(FieldPath::parse("").is_err());
        assert!(FieldPath::parse("a..b").is_err());
        assert!(Record::from_value(json!([1, 2])).is_err());
    }
}
