//! Typed leaf values read out of records.
//!
//! Records are schemaless JSON, but every comparison the engine makes happens
//! on a `Scalar`: the filter engine buckets and matches on its `Display` form,
//! the aggregation engine reads it through `as_f64`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Str(String),
}

impl Scalar {
    /// Convert a JSON leaf. Arrays and objects are carried as their JSON text.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Scalar::Null,
            Value::Bool(b) => Scalar::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Scalar::I64(i),
                None => Scalar::F64(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Scalar::Str(s.clone()),
            other => Scalar::Str(other.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Numeric view of the value.
    ///
    /// Numbers and numeric strings (after trimming) qualify; NaN and
    /// infinities do not. Booleans are not numbers.
    pub fn as_f64(&self) -> Option<f64> {
        let v = match self {
            Scalar::I64(i) => *i as f64,
            Scalar::F64(f) => *f,
            Scalar::Str(s) => s.trim().parse::<f64>().ok()?,
            Scalar::Null | Scalar::Bool(_) => return None,
        };
        v.is_finite().then_some(v)
    }

    /// Stringified form used for index buckets and text matching.
    /// `None` for nulls, which never land in a bucket.
    pub fn key(&self) -> Option<String> {
        if self.is_null() {
            None
        } else {
            Some(self.to_string())
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "null"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::I64(i) => write!(f, "{i}"),
            Scalar::F64(v) => write!(f, "{v}"),
            Scalar::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Str(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Str(s)
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Scalar::I64(i)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::F64(v)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_coercion() {
        assert_eq!(Scalar::from_json(&json!(3)).as_f64(), Some(3.0));
        assert_eq!(Scalar::from_json(&json!(2.5)).as_f64(), Some(2.5));
        assert_eq!(Scalar::from_json(&json!(" 42 ")).as_f64(), Some(42.0));
        assert_eq!(Scalar::from_json(&json!("n/a")).as_f64(), None);
        assert_eq!(Scalar::from_json(&json!(true)).as_f64(), None);
        assert_eq!(Scalar::from_json(&json!(null)).as_f64(), None);
    }

    #[test]
    fn stringified_keys() {
        assert_eq!(Scalar::from_json(&json!(7)).key().as_deref(), Some("7"));
        assert_eq!(Scalar::from_json(&json!(1.5)).key().as_deref(), Some("1.5"));
        assert_eq!(Scalar::from_json(&json!("APC")).key().as_deref(), Some("APC"));
        assert_eq!(Scalar::Null.key(), None);
    }
}
