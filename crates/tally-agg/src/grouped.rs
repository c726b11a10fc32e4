//! Per-group aggregation with pairwise interval comparison.

use std::collections::BTreeMap;

use serde::Serialize;

use tally_core::record::{FieldPath, Record};

use crate::aggregate::{aggregate_values, extract};
use crate::error::{AggError, Result};
use crate::options::AggregationOptions;
use crate::result::AggregationResult;

/// Bucket for records without a group value.
pub const UNKNOWN_GROUP: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupComparison {
    pub group_a: String,
    pub group_b: String,
    /// `a − b` when both groups produced a value.
    pub difference: Option<f64>,
    /// Both intervals exist and do not overlap.
    pub significant_difference: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupedAggregationResult {
    /// Sorted by group key.
    pub groups: BTreeMap<String, AggregationResult>,
    pub overall: AggregationResult,
    /// Every unordered pair once, `group_a < group_b`.
    pub comparisons: Vec<GroupComparison>,
}

impl GroupedAggregationResult {
    pub fn comparison(&self, a: &str, b: &str) -> Option<&GroupComparison> {
        self.comparisons.iter().find(|c| {
            (c.group_a == a && c.group_b == b) || (c.group_a == b && c.group_b == a)
        })
    }
}

/// Aggregate `value_field` per distinct `group_field` value and overall.
///
/// With `options.weights` set (weighted mean), the weights are parallel to
/// `records` and are partitioned along with them.
pub fn aggregate_grouped(
    records: &[Record],
    value_field: &str,
    group_field: &str,
    options: &AggregationOptions,
) -> Result<GroupedAggregationResult> {
    let group_path = FieldPath::parse(group_field)?;
    let values = extract(records, value_field)?;
    if let Some(weights) = &options.weights {
        if weights.len() != records.len() {
            return Err(AggError::Usage(format!(
                "weights must be parallel to records ({} vs {})",
                weights.len(),
                records.len()
            )));
        }
    }

    let mut partitions: BTreeMap<String, (Vec<Option<f64>>, Vec<f64>)> = BTreeMap::new();
    for (i, record) in records.iter().enumerate() {
        let key = record
            .scalar(&group_path)
            .key()
            .unwrap_or_else(|| UNKNOWN_GROUP.to_string());
        let slot = partitions.entry(key).or_default();
        slot.0.push(values[i]);
        if let Some(weights) = &options.weights {
            slot.1.push(weights[i]);
        }
    }

    let mut groups = BTreeMap::new();
    for (key, (group_values, group_weights)) in partitions {
        let group_options = options
            .clone()
            .with_weights(options.weights.as_ref().map(|_| group_weights));
        groups.insert(key, aggregate_values(&group_values, &group_options)?);
    }
    let overall = aggregate_values(&values, options)?;
    let comparisons = compare(&groups);

    #[cfg(feature = "tracing")]
    tracing::debug!(
        groups = groups.len(),
        significant = comparisons.iter().filter(|c| c.significant_difference).count(),
        "grouped aggregate"
    );

    Ok(GroupedAggregationResult {
        groups,
        overall,
        comparisons,
    })
}

fn compare(groups: &BTreeMap<String, AggregationResult>) -> Vec<GroupComparison> {
    let entries: Vec<(&String, &AggregationResult)> = groups.iter().collect();
    let mut out = Vec::new();
    for (i, (a_key, a)) in entries.iter().enumerate() {
        for (b_key, b) in &entries[i + 1..] {
            let significant = match (&a.confidence_interval, &b.confidence_interval) {
                (Some(ca), Some(cb)) => !ca.overlaps(cb),
                _ => false,
            };
            out.push(GroupComparison {
                group_a: (*a_key).clone(),
                group_b: (*b_key).clone(),
                difference: a.value.zip(b.value).map(|(x, y)| x - y),
                significant_difference: significant,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(rows: &[(&str, f64)]) -> Vec<Record> {
        rows.iter()
            .map(|(g, v)| Record::from_value(json!({"state": g, "turnout": v})).unwrap())
            .collect()
    }

    #[test]
    fn disjoint_intervals_are_significant() {
        let recs = records(&[
            ("Lagos", 10.0),
            ("Lagos", 11.0),
            ("Lagos", 12.0),
            ("Lagos", 11.0),
            ("Kano", 50.0),
            ("Kano", 51.0),
            ("Kano", 52.0),
            ("Kano", 51.0),
            ("Oyo", 12.0),
            ("Oyo", 13.0),
            ("Oyo", 11.0),
            ("Oyo", 12.0),
        ]);
        let r = aggregate_grouped(&recs, "turnout", "state", &AggregationOptions::default())
            .unwrap();
        assert_eq!(r.groups.len(), 3);
        assert_eq!(r.comparisons.len(), 3);
        assert!(r.comparison("Kano", "Lagos").unwrap().significant_difference);
        assert!(!r.comparison("Lagos", "Oyo").unwrap().significant_difference);
        assert_eq!(r.comparison("Kano", "Lagos").unwrap().difference, Some(40.0));
        assert_eq!(r.overall.sample_size, 12);
    }

    #[test]
    fn missing_group_and_single_points() {
        let mut recs = records(&[("Lagos", 1.0)]);
        recs.push(Record::from_value(json!({"turnout": 2.0})).unwrap());
        let r = aggregate_grouped(&recs, "turnout", "state", &AggregationOptions::default())
            .unwrap();
        assert!(r.groups.contains_key(UNKNOWN_GROUP));
        // One point per group: no intervals, never significant.
        assert!(!r.comparisons[0].significant_difference);
    }

    #[test]
    fn weights_must_match_records() {
        let recs = records(&[("Lagos", 1.0), ("Kano", 2.0)]);
        let opts = AggregationOptions::default().with_weights(Some(vec![1.0]));
        assert!(matches!(
            aggregate_grouped(&recs, "turnout", "state", &opts),
            Err(AggError::Usage(_))
        ));
    }
}
