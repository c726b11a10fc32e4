//! Filter predicates and their canonical cache keys.
//!
//! Evaluation rules, applied to the stringified field value:
//! - any-of: exact equality with one of the listed values;
//! - range: inclusive numeric bounds, either side optional;
//! - wildcard (`*`, `?`): case-insensitive, whole-value pattern match;
//! - exact: case-insensitive substring containment.
//!
//! Null or missing fields never match. Because every rule depends only on
//! the stringified value, the same rule decides both which index buckets
//! contribute candidates and whether a scanned record passes.

use std::collections::BTreeMap;

use regex::{Regex, RegexBuilder};
use serde_json::Value;

use tally_core::record::{FieldPath, Record};
use tally_core::types::Scalar;

use crate::dataset::DatasetId;
use crate::error::{FilterError, Result};

const WILDCARDS: [char; 2] = ['*', '?'];

#[derive(Debug, Clone)]
pub struct Predicate {
    kind: Kind,
}

#[derive(Debug, Clone)]
enum Kind {
    Exact { needle: String },
    AnyOf { keys: Vec<String> },
    Range { min: Option<f64>, max: Option<f64> },
    Pattern { raw: String, regex: Regex },
}

impl Predicate {
    /// Substring match, or a wildcard pattern if `text` contains `*` or `?`.
    ///
    /// `?` is an extension over plain `*` globbing: it matches exactly one
    /// character, so `"?a*"` matches `"Lagos"` and `"Kano"` but not `"Abuja"`.
    /// See [`Predicate::pattern`].
    pub fn text(text: &str) -> Result<Self> {
        if text.contains(WILDCARDS) {
            Self::pattern(text)
        } else {
            Ok(Self::exact(text))
        }
    }

    /// Case-insensitive containment of `value`'s string form.
    pub fn exact(value: impl Into<Scalar>) -> Self {
        let needle = value.into().to_string().to_lowercase();
        Self {
            kind: Kind::Exact { needle },
        }
    }

    /// Matches when the value equals any of `values` (OR).
    pub fn any_of<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Scalar>,
    {
        let mut keys: Vec<String> = values
            .into_iter()
            .filter_map(|v| v.into().key())
            .collect();
        keys.sort();
        keys.dedup();
        Self {
            kind: Kind::AnyOf { keys },
        }
    }

    /// Inclusive numeric range; `None` leaves that side open.
    pub fn range(min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            kind: Kind::Range { min, max },
        }
    }

    /// Whole-value wildcard match.
    ///
    /// Syntax:
    /// - `*` matches any run of characters, including none;
    /// - `?` matches exactly one character;
    /// - everything else is literal, regex metacharacters included.
    ///
    /// The pattern is anchored at both ends and compared case-insensitively,
    /// so `"lag*"` matches `"Lagos"` but not `"Outside Lagos"`. There is no
    /// escape for a literal `*` or `?`.
    pub fn pattern(pattern: &str) -> Result<Self> {
        let mut expr = String::with_capacity(pattern.len() + 8);
        expr.push('^');
        let mut literal = String::new();
        for ch in pattern.chars() {
            if WILDCARDS.contains(&ch) {
                expr.push_str(&regex::escape(&literal));
                literal.clear();
                expr.push_str(if ch == '*' { ".*" } else { "." });
            } else {
                literal.push(ch);
            }
        }
        expr.push_str(&regex::escape(&literal));
        expr.push('$');

        let regex = RegexBuilder::new(&expr)
            .case_insensitive(true)
            .build()
            .map_err(|source| FilterError::Pattern {
                pattern: pattern.to_string(),
                source,
            })?;
        Ok(Self {
            kind: Kind::Pattern {
                raw: pattern.to_lowercase(),
                regex,
            },
        })
    }

    /// Interpret a loosely typed JSON predicate the way dashboard widgets
    /// send them: arrays are any-of, `{min, max}` objects are ranges,
    /// strings are text (wildcard or substring), other scalars are exact.
    pub fn from_json(field: &str, value: &Value) -> Result<Self> {
        match value {
            Value::Array(items) => Ok(Self::any_of(items.iter().map(Scalar::from_json))),
            Value::Object(map) => {
                let bound = |name: &str| -> Result<Option<f64>> {
                    match map.get(name) {
                        None | Some(Value::Null) => Ok(None),
                        Some(v) => Scalar::from_json(v).as_f64().map(Some).ok_or_else(|| {
                            FilterError::Predicate {
                                field: field.to_string(),
                                reason: format!("'{name}' bound is not numeric"),
                            }
                        }),
                    }
                };
                if !map.contains_key("min") && !map.contains_key("max") {
                    return Err(FilterError::Predicate {
                        field: field.to_string(),
                        reason: "object predicates need 'min' and/or 'max'".into(),
                    });
                }
                Ok(Self::range(bound("min")?, bound("max")?))
            }
            Value::String(s) => Self::text(s),
            other => Ok(Self::exact(Scalar::from_json(other))),
        }
    }

    /// Decide on a stringified field value.
    pub fn matches_key(&self, key: &str) -> bool {
        match &self.kind {
            Kind::Exact { needle } => key.to_lowercase().contains(needle.as_str()),
            Kind::AnyOf { keys } => keys.binary_search_by(|k| k.as_str().cmp(key)).is_ok(),
            Kind::Range { min, max } => match key.trim().parse::<f64>() {
                Ok(v) if v.is_finite() => {
                    min.map_or(true, |lo| v >= lo) && max.map_or(true, |hi| v <= hi)
                }
                _ => false,
            },
            Kind::Pattern { regex, .. } => regex.is_match(key),
        }
    }

    /// Full evaluation against one record.
    pub fn matches(&self, record: &Record, field: &FieldPath) -> bool {
        record
            .scalar(field)
            .key()
            .map_or(false, |key| self.matches_key(&key))
    }

    /// Buckets an any-of predicate can name directly, without a key scan.
    pub(crate) fn direct_keys(&self) -> Option<&[String]> {
        match &self.kind {
            Kind::AnyOf { keys } => Some(keys),
            _ => None,
        }
    }

    pub fn canonical(&self) -> CanonicalPredicate {
        match &self.kind {
            Kind::Exact { needle } => CanonicalPredicate::Exact(needle.clone()),
            Kind::AnyOf { keys } => CanonicalPredicate::AnyOf(keys.clone()),
            Kind::Range { min, max } => {
                CanonicalPredicate::Range(min.map(f64::to_bits), max.map(f64::to_bits))
            }
            Kind::Pattern { raw, .. } => CanonicalPredicate::Pattern(raw.clone()),
        }
    }
}

/// Hashable, order-stable form of a predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CanonicalPredicate {
    Exact(String),
    AnyOf(Vec<String>),
    /// Bounds as `f64::to_bits`.
    Range(Option<u64>, Option<u64>),
    Pattern(String),
}

/// Field → predicate; iteration is always sorted by field path.
#[derive(Debug, Clone, Default)]
pub struct PredicateSet {
    predicates: BTreeMap<FieldPath, Predicate>,
}

impl PredicateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the predicate for `field`.
    pub fn with(mut self, field: &str, predicate: Predicate) -> Result<Self> {
        self.insert(FieldPath::parse(field)?, predicate);
        Ok(self)
    }

    pub fn insert(&mut self, field: FieldPath, predicate: Predicate) {
        self.predicates.insert(field, predicate);
    }

    /// Build from a JSON object of `field: predicate` pairs.
    pub fn from_json(value: &Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(FilterError::Predicate {
                field: "<root>".into(),
                reason: "predicate set must be a JSON object".into(),
            });
        };
        let mut set = Self::new();
        for (field, pred) in map {
            set.insert(FieldPath::parse(field)?, Predicate::from_json(field, pred)?);
        }
        Ok(set)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldPath, &Predicate)> {
        self.predicates.iter()
    }

    pub fn get(&self, field: &FieldPath) -> Option<&Predicate> {
        self.predicates.get(field)
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Every predicate holds for `record`, optionally skipping one field
    /// already guaranteed by the scan base.
    pub fn matches(&self, record: &Record, skip: Option<&FieldPath>) -> bool {
        self.predicates
            .iter()
            .filter(|(field, _)| Some(*field) != skip)
            .all(|(field, pred)| pred.matches(record, field))
    }

    pub fn canonical(&self) -> Vec<(String, CanonicalPredicate)> {
        self.predicates
            .iter()
            .map(|(field, pred)| (field.as_str().to_string(), pred.canonical()))
            .collect()
    }
}

/// Result-cache key: which records, which predicates, which limits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterKey {
    pub dataset: DatasetId,
    pub predicates: Vec<(String, CanonicalPredicate)>,
    pub max_results: usize,
    pub early_termination: bool,
}

impl FilterKey {
    pub fn new(
        dataset: DatasetId,
        predicates: &PredicateSet,
        max_results: usize,
        early_termination: bool,
    ) -> Self {
        Self {
            dataset,
            predicates: predicates.canonical(),
            max_results,
            early_termination,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn exact_is_case_insensitive_substring() {
        let p = Predicate::exact("lag");
        assert!(p.matches_key("Lagos"));
        assert!(p.matches_key("LAGOS"));
        assert!(!p.matches_key("Kano"));
    }

    #[test]
    fn any_of_is_exact_or() {
        let p = Predicate::any_of(["APC", "PDP"]);
        assert!(p.matches_key("APC"));
        assert!(p.matches_key("PDP"));
        assert!(!p.matches_key("apc"));
        assert!(!p.matches_key("APC-North"));
    }

    #[test]
    fn range_is_inclusive() {
        let p = Predicate::range(Some(10.0), Some(20.0));
        assert!(p.matches_key("10"));
        assert!(p.matches_key("20"));
        assert!(p.matches_key("15.5"));
        assert!(!p.matches_key("20.01"));
        assert!(!p.matches_key("abc"));
        assert!(Predicate::range(None, Some(0.0)).matches_key("-3"));
    }

    #[test]
    fn wildcard_matches_whole_value() {
        let p = Predicate::text("lag*").unwrap();
        assert!(p.matches_key("Lagos"));
        assert!(!p.matches_key("Outside Lagos"));
        let q = Predicate::text("k?no").unwrap();
        assert!(q.matches_key("Kano"));
        assert!(!q.matches_key("Kanoo"));
        // regex metacharacters are literal
        let r = Predicate::text("a.b*").unwrap();
        assert!(r.matches_key("a.bc"));
        assert!(!r.matches_key("axbc"));
    }

    #[test]
    fn question_mark_is_exactly_one_char() {
        let p = Predicate::pattern("k?no").unwrap();
        assert!(!p.matches_key("kno"));
        assert!(!p.matches_key("kaano"));
        let q = Predicate::text("?a*").unwrap();
        assert!(q.matches_key("Lagos"));
        assert!(q.matches_key("KANO"));
        assert!(!q.matches_key("Abuja"));
    }

    #[test]
    fn json_predicates() {
        let set = PredicateSet::from_json(&json!({
            "state": "Lagos",
            "party": ["APC", "LP"],
            "votes": {"min": 100},
            "lga": "Ik*"
        }))
        .unwrap();
        assert_eq!(set.len(), 4);
        let canon = set.canonical();
        let fields: Vec<&str> = canon.iter().map(|(f, _)| f.as_str()).collect();
        assert_eq!(fields, vec!["lga", "party", "state", "votes"]);
        assert_eq!(canon[1].1, CanonicalPredicate::AnyOf(vec!["APC".into(), "LP".into()]));
        assert!(PredicateSet::from_json(&json!({"votes": {"low": 1}})).is_err());
        assert!(PredicateSet::from_json(&json!(["x"])).is_err());
    }

    #[test]
    fn canonical_form_ignores_insertion_order_and_case() {
        let a = PredicateSet::new()
            .with("state", Predicate::exact("LAGOS"))
            .unwrap()
            .with("party", Predicate::any_of(["PDP", "APC"]))
            .unwrap();
        let b = PredicateSet::new()
            .with("party", Predicate::any_of(["APC", "PDP", "APC"]))
            .unwrap()
            .with("state", Predicate::exact("lagos"))
            .unwrap();
        assert_eq!(a.canonical(), b.canonical());
    }
}
