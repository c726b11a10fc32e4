//! Per-field value indexes over one record set.
//!
//! Each indexed field maps the stringified value to the ascending positions
//! of the records holding it. Records with a null or missing value are left
//! out, matching predicate semantics (nulls never match).
//!
//! The index remembers which [`Dataset`] it was built for and is only
//! consulted for that same dataset.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use serde::Serialize;

use tally_core::record::FieldPath;

use crate::dataset::{Dataset, DatasetId};
use crate::predicate::Predicate;

type Buckets = HashMap<String, Vec<usize>>;

/// Outcome of a build request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexBuild {
    Rebuilt { fields: usize, took: Duration },
    /// Same records and fields were indexed inside the rebuild window.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub field: String,
    pub distinct_values: usize,
    pub indexed_records: usize,
}

#[derive(Debug, Default)]
pub struct FieldIndex {
    fields: HashMap<FieldPath, Buckets>,
    dataset: Option<DatasetId>,
    built_at: Option<Instant>,
}

impl FieldIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when every field is indexed for `dataset` and the last build is
    /// younger than `window`.
    pub fn is_fresh(&self, dataset: DatasetId, fields: &[FieldPath], window: Duration) -> bool {
        self.dataset == Some(dataset)
            && fields.iter().all(|f| self.fields.contains_key(f))
            && self.built_at.map_or(false, |t| t.elapsed() < window)
    }

    /// Bucket `records` for each of `fields`. Indexes of other fields are
    /// kept only if they were built for the same record set.
    pub fn build(&mut self, records: &Dataset, fields: &[FieldPath]) -> IndexBuild {
        let started = Instant::now();
        let dataset = records.id();
        if self.dataset != Some(dataset) {
            self.fields.clear();
        }

        for field in fields {
            let mut buckets: Buckets = HashMap::new();
            for (pos, record) in records.iter().enumerate() {
                if let Some(key) = record.scalar(field).key() {
                    buckets.entry(key).or_default().push(pos);
                }
            }
            self.fields.insert(field.clone(), buckets);
        }

        self.dataset = Some(dataset);
        self.built_at = Some(Instant::now());

        IndexBuild::Rebuilt {
            fields: fields.len(),
            took: started.elapsed(),
        }
    }

    pub fn clear(&mut self) {
        self.fields.clear();
        self.dataset = None;
        self.built_at = None;
    }

    /// Whether lookups for `field` are valid against `dataset`.
    pub fn covers(&self, dataset: DatasetId, field: &FieldPath) -> bool {
        self.dataset == Some(dataset) && self.fields.contains_key(field)
    }

    pub fn is_indexed(&self, field: &FieldPath) -> bool {
        self.fields.contains_key(field)
    }

    /// Number of records `predicate` selects through the index, or `None`
    /// if `field` has no index.
    pub fn candidate_count(&self, field: &FieldPath, predicate: &Predicate) -> Option<usize> {
        let buckets = self.fields.get(field)?;
        let count = match predicate.direct_keys() {
            Some(keys) => keys
                .iter()
                .filter_map(|k| buckets.get(k))
                .map(Vec::len)
                .sum(),
            None => buckets
                .iter()
                .filter(|(key, _)| predicate.matches_key(key))
                .map(|(_, positions)| positions.len())
                .sum(),
        };
        Some(count)
    }

    /// Ascending record positions `predicate` selects through the index.
    pub fn candidates(&self, field: &FieldPath, predicate: &Predicate) -> Option<Vec<usize>> {
        let buckets = self.fields.get(field)?;
        let mut positions: Vec<usize> = match predicate.direct_keys() {
            Some(keys) => keys
                .iter()
                .filter_map(|k| buckets.get(k))
                .flatten()
                .copied()
                .collect(),
            None => buckets
                .iter()
                .filter(|(key, _)| predicate.matches_key(key))
                .flat_map(|(_, positions)| positions.iter().copied())
                .collect(),
        };
        // Buckets are disjoint, so sorting restores record order without dups.
        positions.sort_unstable();
        Some(positions)
    }

    /// Distinct values of `field` with their record counts, sorted by value.
    pub fn distinct_values(&self, field: &FieldPath) -> Option<Vec<(String, usize)>> {
        let buckets = self.fields.get(field)?;
        let sorted: BTreeMap<&String, usize> =
            buckets.iter().map(|(k, v)| (k, v.len())).collect();
        Some(sorted.into_iter().map(|(k, n)| (k.clone(), n)).collect())
    }

    pub fn stats(&self) -> Vec<IndexStats> {
        let mut stats: Vec<IndexStats> = self
            .fields
            .iter()
            .map(|(field, buckets)| IndexStats {
                field: field.as_str().to_string(),
                distinct_values: buckets.len(),
                indexed_records: buckets.values().map(Vec::len).sum(),
            })
            .collect();
        stats.sort_by(|a, b| a.field.cmp(&b.field));
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tally_core::record::Record;

    fn records() -> Dataset {
        vec![
            json!({"party": "APC", "votes": 10}),
            json!({"party": "PDP", "votes": 25}),
            json!({"party": "APC", "votes": 40}),
            json!({"votes": 5}),
        ]
        .into_iter()
        .map(|v| Record::from_value(v).unwrap())
        .collect::<Vec<_>>()
        .into()
    }

    #[test]
    fn buckets_skip_missing_values() {
        let recs = records();
        let party = FieldPath::parse("party").unwrap();
        let mut idx = FieldIndex::new();
        idx.build(&recs, &[party.clone()]);
        assert_eq!(
            idx.distinct_values(&party).unwrap(),
            vec![("APC".to_string(), 2), ("PDP".to_string(), 1)]
        );
        assert_eq!(idx.stats()[0].indexed_records, 3);
    }

    #[test]
    fn candidates_follow_predicate_rules() {
        let recs = records();
        let party = FieldPath::parse("party").unwrap();
        let votes = FieldPath::parse("votes").unwrap();
        let mut idx = FieldIndex::new();
        idx.build(&recs, &[party.clone(), votes.clone()]);

        let apc = Predicate::any_of(["APC"]);
        assert_eq!(idx.candidate_count(&party, &apc), Some(2));
        assert_eq!(idx.candidates(&party, &apc), Some(vec![0, 2]));

        let mid = Predicate::range(Some(10.0), Some(30.0));
        assert_eq!(idx.candidates(&votes, &mid), Some(vec![0, 1]));

        let sub = Predicate::exact("p");
        assert_eq!(idx.candidates(&party, &sub), Some(vec![0, 1, 2]));
    }

    #[test]
    fn freshness_is_per_dataset() {
        let recs = records();
        let other = records();
        let party = FieldPath::parse("party").unwrap();
        let mut idx = FieldIndex::new();
        idx.build(&recs, &[party.clone()]);
        let window = Duration::from_secs(60);
        assert!(idx.is_fresh(recs.id(), &[party.clone()], window));
        assert!(!idx.is_fresh(other.id(), &[party.clone()], window));
        assert!(!idx.is_fresh(recs.id(), &[party], Duration::ZERO));
    }
}
