//! The filter engine: indexes, planning, scanning, result caching.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use tally_core::config::FilterConfig;
use tally_core::record::{FieldPath, Record};

use crate::cache::{CachedResult, ResultCache};
use crate::error::Result;
use crate::dataset::{Dataset, DatasetId};
use crate::index::{FieldIndex, IndexBuild, IndexStats};
use crate::metrics::{FilterCounters, FilterMetrics};
use crate::predicate::{FilterKey, PredicateSet};

/// Per-call knobs; defaults come from [`FilterConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterOptions {
    pub max_results: usize,
    pub early_termination: bool,
    /// Read from and write to the result cache.
    pub use_cache: bool,
}

impl FilterOptions {
    pub fn from_config(config: &FilterConfig) -> Self {
        Self {
            max_results: config.max_results,
            early_termination: config.early_termination,
            use_cache: true,
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_early_termination(mut self, enabled: bool) -> Self {
        self.early_termination = enabled;
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self::from_config(&FilterConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct FilterOutcome {
    /// Matching records in input order, at most `max_results`.
    pub results: Arc<[Record]>,
    pub from_cache: bool,
    /// Matches seen before the scan stopped. Equals the full match count
    /// unless early termination cut the scan short.
    pub total_matched: usize,
    pub elapsed: Duration,
}

/// Where a scan starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanBase {
    /// Every record is visited.
    Full,
    /// Only the candidates the most selective index produced.
    Index { field: String },
}

/// How `filter` would evaluate a predicate set against a record set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanPlan {
    pub base: ScanBase,
    /// Records the scan visits.
    pub scanned: usize,
    /// Index candidate count per indexed predicate field, sorted by field.
    pub selectivity: Vec<(String, usize)>,
    /// Predicate fields without a usable index (evaluated by brute force).
    pub unindexed: Vec<String>,
}

pub struct FilterEngine {
    config: FilterConfig,
    index: FieldIndex,
    cache: ResultCache,
    counters: FilterCounters,
}

impl FilterEngine {
    pub fn new(config: FilterConfig) -> Self {
        let cache = ResultCache::new(
            Duration::from_millis(config.result_cache_ttl_ms),
            config.result_cache_capacity,
        );
        Self {
            config,
            index: FieldIndex::new(),
            cache,
            counters: FilterCounters::default(),
        }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn options(&self) -> FilterOptions {
        FilterOptions::from_config(&self.config)
    }

    /// Index `fields` over `records`. Skipped when the same dataset and
    /// fields were indexed within `min_rebuild_interval_ms`.
    pub fn build_indexes(&mut self, records: &Dataset, fields: &[&str]) -> Result<IndexBuild> {
        let fields = parse_fields(fields)?;
        let window = Duration::from_millis(self.config.min_rebuild_interval_ms);
        if self.index.is_fresh(records.id(), &fields, window) {
            #[cfg(feature = "tracing")]
            tracing::trace!(fields = fields.len(), "index rebuild skipped");
            return Ok(IndexBuild::Skipped);
        }
        Ok(self.build(records, &fields))
    }

    /// Index `fields` unconditionally.
    pub fn rebuild_indexes(&mut self, records: &Dataset, fields: &[&str]) -> Result<IndexBuild> {
        let fields = parse_fields(fields)?;
        Ok(self.build(records, &fields))
    }

    fn build(&mut self, records: &Dataset, fields: &[FieldPath]) -> IndexBuild {
        let build = self.index.build(records, fields);
        self.counters.index_built();
        // A build starts from an empty result cache.
        self.cache.clear();
        #[cfg(feature = "tracing")]
        tracing::debug!(records = records.len(), ?build, "indexes built");
        build
    }

    /// Drop every index and cached result.
    pub fn invalidate(&mut self) {
        self.index.clear();
        self.cache.clear();
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn cached_results(&self) -> usize {
        self.cache.len()
    }

    pub fn filter(
        &mut self,
        records: &Dataset,
        predicates: &PredicateSet,
        options: &FilterOptions,
    ) -> FilterOutcome {
        let started = Instant::now();
        let key = FilterKey::new(
            records.id(),
            predicates,
            options.max_results,
            options.early_termination,
        );

        if options.use_cache {
            if let Some(hit) = self.cache.get(&key, started) {
                return self.finish(started, hit, true);
            }
        }

        let (results, total_matched) = self.evaluate(records, predicates, options);
        let result = CachedResult {
            results: Arc::from(results),
            total_matched,
        };
        if options.use_cache {
            self.cache.insert(key, result.clone(), Instant::now());
        }
        self.finish(started, result, false)
    }

    fn finish(&mut self, started: Instant, result: CachedResult, from_cache: bool) -> FilterOutcome {
        let elapsed = started.elapsed();
        self.counters.record(elapsed, from_cache);
        #[cfg(feature = "tracing")]
        tracing::debug!(
            results = result.results.len(),
            total_matched = result.total_matched,
            from_cache,
            elapsed_us = elapsed.as_micros() as u64,
            "filter"
        );
        FilterOutcome {
            results: result.results,
            from_cache,
            total_matched: result.total_matched,
            elapsed,
        }
    }

    fn evaluate(
        &self,
        records: &Dataset,
        predicates: &PredicateSet,
        options: &FilterOptions,
    ) -> (Vec<Record>, usize) {
        if predicates.is_empty() {
            let n = options.max_results.min(records.len());
            return (records[..n].to_vec(), records.len());
        }

        let dataset = records.id();
        let mut out = Vec::new();
        let mut total = 0usize;
        let mut visit = |record: &Record, skip: Option<&FieldPath>| -> bool {
            if !predicates.matches(record, skip) {
                return true;
            }
            total += 1;
            if out.len() < options.max_results {
                out.push(record.clone());
            }
            !(options.early_termination && out.len() >= options.max_results)
        };

        match self.most_selective(dataset, predicates) {
            Some((field, _)) => {
                let positions = predicates
                    .get(field)
                    .and_then(|p| self.index.candidates(field, p))
                    .unwrap_or_default();
                for pos in positions {
                    let Some(record) = records.get(pos) else {
                        continue;
                    };
                    if !visit(record, Some(field)) {
                        break;
                    }
                }
            }
            None => {
                for record in records.iter() {
                    if !visit(record, None) {
                        break;
                    }
                }
            }
        }
        (out, total)
    }

    /// Indexed predicate with the fewest candidates; ties go to the first
    /// field in sorted order.
    fn most_selective<'p>(
        &self,
        dataset: DatasetId,
        predicates: &'p PredicateSet,
    ) -> Option<(&'p FieldPath, usize)> {
        predicates
            .iter()
            .filter(|(field, _)| self.index.covers(dataset, field))
            .filter_map(|(field, pred)| Some((field, self.index.candidate_count(field, pred)?)))
            .min_by_key(|(_, count)| *count)
    }

    /// Describe how `filter` would scan, without running it.
    pub fn explain(&self, records: &Dataset, predicates: &PredicateSet) -> ScanPlan {
        let dataset = records.id();
        let mut selectivity = Vec::new();
        let mut unindexed = Vec::new();
        for (field, pred) in predicates.iter() {
            let count = if self.index.covers(dataset, field) {
                self.index.candidate_count(field, pred)
            } else {
                None
            };
            match count {
                Some(n) => selectivity.push((field.as_str().to_string(), n)),
                None => unindexed.push(field.as_str().to_string()),
            }
        }

        let (base, scanned) = if predicates.is_empty() {
            (ScanBase::Full, 0)
        } else {
            match self.most_selective(dataset, predicates) {
                Some((field, n)) => (
                    ScanBase::Index {
                        field: field.as_str().to_string(),
                    },
                    n,
                ),
                None => (ScanBase::Full, records.len()),
            }
        };

        ScanPlan {
            base,
            scanned,
            selectivity,
            unindexed,
        }
    }

    /// Distinct indexed values of `field` with record counts, or `None` when
    /// the field is not indexed.
    pub fn distinct_values(&self, field: &str) -> Result<Option<Vec<(String, usize)>>> {
        let field = FieldPath::parse(field)?;
        Ok(self.index.distinct_values(&field))
    }

    pub fn is_indexed(&self, field: &str) -> bool {
        FieldPath::parse(field)
            .map(|f| self.index.is_indexed(&f))
            .unwrap_or(false)
    }

    pub fn index_stats(&self) -> Vec<IndexStats> {
        self.index.stats()
    }

    pub fn metrics(&self) -> FilterMetrics {
        self.counters.snapshot()
    }

    pub fn reset_metrics(&mut self) {
        self.counters.reset();
    }
}

impl Default for FilterEngine {
    fn default() -> Self {
        Self::new(FilterConfig::default())
    }
}

fn parse_fields(fields: &[&str]) -> Result<Vec<FieldPath>> {
    fields
        .iter()
        .map(|f| FieldPath::parse(f).map_err(Into::into))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::Predicate;
    use serde_json::json;

    fn records() -> Dataset {
        let states = ["Lagos", "Kano", "Rivers"];
        let parties = ["APC", "PDP"];
        (0..12)
            .map(|i| {
                Record::from_value(json!({
                    "id": i,
                    "state": states[i % 3],
                    "party": parties[i % 2],
                    "votes": i * 10,
                }))
                .unwrap()
            })
            .collect::<Vec<_>>()
            .into()
    }

    fn ids(outcome: &FilterOutcome) -> Vec<i64> {
        outcome
            .results
            .iter()
            .map(|r| r.scalar(&FieldPath::parse("id").unwrap()).as_f64().unwrap() as i64)
            .collect()
    }

    #[test]
    fn no_predicates_returns_prefix() {
        let recs = records();
        let mut engine = FilterEngine::default();
        let opts = engine.options().with_max_results(5);
        let out = engine.filter(&recs, &PredicateSet::new(), &opts);
        assert_eq!(ids(&out), vec![0, 1, 2, 3, 4]);
        assert_eq!(out.total_matched, 12);
    }

    #[test]
    fn indexed_and_brute_force_agree() {
        let recs = records();
        let set = PredicateSet::new()
            .with("state", Predicate::exact("lagos"))
            .unwrap()
            .with("votes", Predicate::range(Some(20.0), None))
            .unwrap();

        let mut plain = FilterEngine::default();
        let opts = plain.options().without_cache();
        let brute = plain.filter(&recs, &set, &opts);

        let mut indexed = FilterEngine::default();
        indexed.build_indexes(&recs, &["state", "votes"]).unwrap();
        let fast = indexed.filter(&recs, &set, &opts);

        assert_eq!(ids(&brute), vec![3, 6, 9]);
        assert_eq!(ids(&fast), ids(&brute));
    }

    #[test]
    fn plan_starts_from_smallest_candidate_set() {
        let recs = records();
        let mut engine = FilterEngine::default();
        engine.build_indexes(&recs, &["state", "party"]).unwrap();
        let set = PredicateSet::new()
            .with("party", Predicate::any_of(["APC"]))
            .unwrap()
            .with("state", Predicate::any_of(["Kano"]))
            .unwrap()
            .with("votes", Predicate::range(None, Some(50.0)))
            .unwrap();
        let plan = engine.explain(&recs, &set);
        assert_eq!(
            plan.base,
            ScanBase::Index {
                field: "state".into()
            }
        );
        assert_eq!(plan.scanned, 4);
        assert_eq!(
            plan.selectivity,
            vec![("party".to_string(), 6), ("state".to_string(), 4)]
        );
        assert_eq!(plan.unindexed, vec!["votes".to_string()]);
    }

    #[test]
    fn early_termination_stops_scan() {
        let recs = records();
        let mut engine = FilterEngine::default();
        let set = PredicateSet::new()
            .with("party", Predicate::any_of(["PDP"]))
            .unwrap();
        let opts = engine.options().with_max_results(2);
        let early = engine.filter(&recs, &set, &opts);
        assert_eq!(ids(&early), vec![1, 3]);
        assert_eq!(early.total_matched, 2);

        let full = engine.filter(&recs, &set, &opts.clone().with_early_termination(false));
        assert_eq!(ids(&full), vec![1, 3]);
        assert_eq!(full.total_matched, 6);
    }

    #[test]
    fn repeat_query_hits_cache_until_rebuild() {
        let recs = records();
        let mut engine = FilterEngine::default();
        let set = PredicateSet::new()
            .with("state", Predicate::text("R*").unwrap())
            .unwrap();
        let opts = engine.options();
        let first = engine.filter(&recs, &set, &opts);
        let second = engine.filter(&recs, &set, &opts);
        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(ids(&first), ids(&second));

        engine.rebuild_indexes(&recs, &["state"]).unwrap();
        assert!(!engine.filter(&recs, &set, &opts).from_cache);

        let m = engine.metrics();
        assert_eq!(m.invocations, 3);
        assert_eq!(m.cache_hits, 1);
        assert_eq!(m.index_builds, 1);
    }

    #[test]
    fn rebuild_within_window_is_skipped() {
        let recs = records();
        let mut engine = FilterEngine::default();
        assert!(matches!(
            engine.build_indexes(&recs, &["state"]).unwrap(),
            IndexBuild::Rebuilt { fields: 1, .. }
        ));
        assert_eq!(
            engine.build_indexes(&recs, &["state"]).unwrap(),
            IndexBuild::Skipped
        );
        // A new field forces a build even inside the window.
        assert!(matches!(
            engine.build_indexes(&recs, &["state", "party"]).unwrap(),
            IndexBuild::Rebuilt { .. }
        ));
        assert_eq!(
            engine.distinct_values("party").unwrap(),
            Some(vec![("APC".to_string(), 6), ("PDP".to_string(), 6)])
        );
        engine.invalidate();
        assert!(engine.index_stats().is_empty());
    }

    #[test]
    fn index_is_not_reused_for_a_new_dataset() {
        let mut engine = FilterEngine::default();
        let set = PredicateSet::new()
            .with("party", Predicate::any_of(["APC"]))
            .unwrap();
        let opts = engine.options();

        let parties = ["APC", "PDP"];
        let first: Dataset = (0..8)
            .map(|i| Record::from_value(json!({"id": i, "party": parties[i / 4]})).unwrap())
            .collect::<Vec<_>>()
            .into();
        engine.build_indexes(&first, &["party"]).unwrap();
        assert_eq!(ids(&engine.filter(&first, &set, &opts)), vec![0, 1, 2, 3]);
        drop(first);

        // Same length, possibly the same allocation, different content.
        let second: Dataset = (0..8)
            .map(|i| Record::from_value(json!({"id": i, "party": "LP"})).unwrap())
            .collect::<Vec<_>>()
            .into();
        assert_eq!(engine.explain(&second, &set).base, ScanBase::Full);
        let out = engine.filter(&second, &set, &opts);
        assert!(out.results.is_empty());
        assert!(!out.from_cache);
    }

    #[test]
    fn empty_record_set() {
        let mut engine = FilterEngine::default();
        let set = PredicateSet::new()
            .with("state", Predicate::exact("x"))
            .unwrap();
        let opts = engine.options();
        let out = engine.filter(&Dataset::default(), &set, &opts);
        assert!(out.results.is_empty());
        assert_eq!(out.total_matched, 0);
    }
}
