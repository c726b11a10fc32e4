//! tally CLI: load, filter and aggregate JSON record files.

use clap::{Args, Parser, Subcommand};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tally_agg::{
    aggregate, aggregate_grouped, temporal_aggregation, AggregationMethod, AggregationOptions,
    ConfidenceLevel, NullPolicy, TimeInterval,
};
use tally_core::config::{AggregationConfig, EngineConfig};
use tally_core::hash::{hash_bytes, hash_serde, hash_str};
use tally_core::record::{FieldPath, Record};
use tally_filter::{Dataset, FilterEngine, FilterOptions, PredicateSet};
use tally_loader::Loader;
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "tally: deduplicated loading, indexed filtering and null-tolerant aggregation over JSON records", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct Input {
    /// JSON array or JSON-lines file of records
    #[arg(short, long)]
    input: PathBuf,

    /// Predicate set as a JSON object, e.g. '{"state": "Lagos", "votes": {"min": 100}}'
    #[arg(short = 'w', long = "where")]
    predicates: Option<String>,

    /// Fields to index before filtering (comma separated)
    #[arg(long, value_delimiter = ',')]
    index: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Filter records and print the matches
    Filter {
        #[command(flatten)]
        input: Input,

        /// Maximum records returned (overrides config)
        #[arg(long)]
        max_results: Option<usize>,

        /// Scan every candidate even after max_results matches
        #[arg(long)]
        no_early_termination: bool,
    },

    /// Aggregate a numeric field, optionally per group or per time bucket
    Aggregate {
        #[command(flatten)]
        input: Input,

        /// Field to aggregate (dot paths allowed)
        #[arg(short, long)]
        field: String,

        /// mean | median | mode | sum | count | weighted_mean
        #[arg(long, default_value = "mean")]
        method: String,

        /// skip | zero | interpolate | weighted_skip
        #[arg(long, default_value = "skip")]
        nulls: String,

        /// 0.90, 0.95 or 0.99 (overrides config)
        #[arg(long)]
        confidence: Option<f64>,

        /// Minimum sample size (overrides config)
        #[arg(long)]
        min_points: Option<usize>,

        /// Disable IQR outlier removal
        #[arg(long)]
        keep_outliers: bool,

        /// Field holding per-record weights (implies weighted_mean)
        #[arg(long)]
        weight_field: Option<String>,

        /// Aggregate per distinct value of this field
        #[arg(long, conflicts_with = "time_field")]
        group_by: Option<String>,

        /// Timestamp field (RFC 3339 or epoch milliseconds) for time buckets
        #[arg(long)]
        time_field: Option<String>,

        /// hour | day | week | month
        #[arg(long, default_value = "day")]
        interval: String,
    },

    /// Show how a predicate set would be evaluated (EXPLAIN)
    Explain {
        #[command(flatten)]
        input: Input,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let config = EngineConfig::from_env();
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    let loader: Loader<Dataset> = Loader::new(config.loader.clone());

    let outcome = match cli.command {
        Commands::Filter {
            input,
            max_results,
            no_early_termination,
        } => run_filter(&loader, &config, &input, max_results, no_early_termination).await,
        Commands::Aggregate {
            input,
            field,
            method,
            nulls,
            confidence,
            min_points,
            keep_outliers,
            weight_field,
            group_by,
            time_field,
            interval,
        } => {
            let request = AggregateRequest {
                field,
                method,
                nulls,
                confidence,
                min_points,
                keep_outliers,
                weight_field,
                group_by,
                time_field,
                interval,
            };
            run_aggregate(&loader, &config, &input, &request).await
        }
        Commands::Explain { input } => run_explain(&loader, &config, &input).await,
    };

    if let Err(e) = outcome {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let m = loader.metrics();
    tracing::info!(
        requests = m.total_requests,
        cache_hits = m.cache_hits,
        avg_load_ms = m.average_load_time_ms,
        memory_mb = m.memory_usage_estimate_mb,
        "loader metrics"
    );
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("TALLY_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Parse a JSON array of objects or JSON-lines (blank lines ignored).
fn parse_records(text: &str) -> CliResult<Vec<Record>> {
    let trimmed = text.trim_start();
    let values: Vec<Value> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)?
    } else {
        trimmed
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(serde_json::from_str::<Value>)
            .collect::<Result<_, _>>()?
    };
    Ok(values
        .into_iter()
        .map(Record::from_value)
        .collect::<Result<_, _>>()?)
}

fn cache_key(path: &Path) -> String {
    format!("file:{}", hash_str(&path.display().to_string()).short())
}

async fn load_records(loader: &Loader<Dataset>, path: &Path) -> CliResult<Arc<Dataset>> {
    let key = cache_key(path);
    let path = path.to_path_buf();
    let options = loader
        .options()
        .with_progress(|p| tracing::debug!(progress = p, "loading records"));
    let records = loader
        .load(
            &key,
            || {
                let path = path.clone();
                async move {
                    let text = fs::read_to_string(&path)
                        .map_err(|e| format!("{}: {}", path.display(), e))?;
                    parse_records(&text)
                        .map(Dataset::from)
                        .map_err(|e| e.to_string())
                }
            },
            options,
        )
        .await?;
    tracing::debug!(records = records.len(), key = %key, "records loaded");
    Ok(records)
}

fn predicate_set(input: &Input) -> CliResult<PredicateSet> {
    match &input.predicates {
        Some(raw) => Ok(PredicateSet::from_json(&serde_json::from_str::<Value>(raw)?)?),
        None => Ok(PredicateSet::new()),
    }
}

fn filter_engine(config: &EngineConfig, records: &Dataset, input: &Input) -> CliResult<FilterEngine> {
    let mut engine = FilterEngine::new(config.filter.clone());
    if !input.index.is_empty() {
        let fields: Vec<&str> = input.index.iter().map(String::as_str).collect();
        engine.build_indexes(records, &fields)?;
    }
    Ok(engine)
}

async fn run_filter(
    loader: &Loader<Dataset>,
    config: &EngineConfig,
    input: &Input,
    max_results: Option<usize>,
    no_early_termination: bool,
) -> CliResult<()> {
    let records = load_records(loader, &input.input).await?;
    let predicates = predicate_set(input)?;
    let mut engine = filter_engine(config, &records, input)?;

    let mut options = FilterOptions::from_config(&config.filter);
    if let Some(max) = max_results {
        options = options.with_max_results(max);
    }
    if no_early_termination {
        options = options.with_early_termination(false);
    }

    let outcome = engine.filter(&records, &predicates, &options);
    let report = json!({
        "total_matched": outcome.total_matched,
        "returned": outcome.results.len(),
        "elapsed_ms": outcome.elapsed.as_secs_f64() * 1_000.0,
        "results": &*outcome.results,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

struct AggregateRequest {
    field: String,
    method: String,
    nulls: String,
    confidence: Option<f64>,
    min_points: Option<usize>,
    keep_outliers: bool,
    weight_field: Option<String>,
    group_by: Option<String>,
    time_field: Option<String>,
    interval: String,
}

/// Config values first, then the command line on top.
fn aggregation_options(
    config: &AggregationConfig,
    request: &AggregateRequest,
) -> CliResult<AggregationOptions> {
    let mut options = AggregationOptions::from_config(config)?
        .with_method(request.method.parse::<AggregationMethod>()?)
        .with_nulls(request.nulls.parse::<NullPolicy>()?);
    if let Some(level) = request.confidence {
        options = options.with_confidence(ConfidenceLevel::from_f64(level)?);
    }
    if let Some(n) = request.min_points {
        options = options.with_min_data_points(n);
    }
    if request.keep_outliers {
        options = options.with_outlier_removal(false);
    }
    if request.weight_field.is_some() {
        options = options.with_method(AggregationMethod::WeightedMean);
    }
    Ok(options)
}

/// Weights read from `field`; missing or non-numeric weights become 0 and
/// drop their record from the weighted mean.
fn weights(records: &[Record], field: &str) -> CliResult<Vec<f64>> {
    let path = FieldPath::parse(field)?;
    Ok(records
        .iter()
        .map(|r| r.scalar(&path).as_f64().unwrap_or(0.0))
        .collect())
}

/// RFC 3339 strings or epoch milliseconds.
fn timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => DateTime::from_timestamp_millis(n.as_i64()?),
        _ => None,
    }
}

async fn run_aggregate(
    loader: &Loader<Dataset>,
    config: &EngineConfig,
    input: &Input,
    request: &AggregateRequest,
) -> CliResult<()> {
    let records = load_records(loader, &input.input).await?;
    let predicates = predicate_set(input)?;
    let selected: Arc<[Record]> = if predicates.is_empty() {
        Arc::clone(records.records())
    } else {
        let mut engine = filter_engine(config, &records, input)?;
        let options = FilterOptions::from_config(&config.filter)
            .with_max_results(records.len())
            .without_cache();
        engine.filter(&records, &predicates, &options).results
    };

    let mut options = aggregation_options(&config.aggregation, request)?;
    if let Some(field) = &request.weight_field {
        options = options.with_weights(Some(weights(&selected, field)?));
    }

    let report = if let Some(group) = &request.group_by {
        serde_json::to_value(aggregate_grouped(&selected, &request.field, group, &options)?)?
    } else if let Some(time_field) = &request.time_field {
        let interval: TimeInterval = request.interval.parse()?;
        let time_path = FieldPath::parse(time_field)?;
        let value_path = FieldPath::parse(&request.field)?;
        let mut series = Vec::new();
        let mut series_weights = Vec::new();
        for (i, record) in selected.iter().enumerate() {
            let Some(ts) = timestamp(record.get(&time_path)) else {
                continue;
            };
            series.push((ts, record.scalar(&value_path).as_f64()));
            if let Some(w) = &options.weights {
                series_weights.push(w[i]);
            }
        }
        if options.weights.is_some() {
            options = options.with_weights(Some(series_weights));
        }
        if series.len() < selected.len() {
            tracing::warn!(
                skipped = selected.len() - series.len(),
                "records without a usable timestamp were skipped"
            );
        }
        serde_json::to_value(temporal_aggregation(&series, interval, &options)?)?
    } else {
        serde_json::to_value(aggregate(&selected, &request.field, &options)?)?
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_explain(
    loader: &Loader<Dataset>,
    config: &EngineConfig,
    input: &Input,
) -> CliResult<()> {
    let fingerprint = hash_bytes(&fs::read(&input.input)?);
    let records = load_records(loader, &input.input).await?;
    let predicates = predicate_set(input)?;
    let engine = filter_engine(config, &records, input)?;
    let plan = engine.explain(&records, &predicates);

    println!("Filter Plan");
    println!("===========");
    println!();
    println!("Input: {} ({})", input.input.display(), fingerprint.short());
    println!("Config: {}", hash_serde(config)?.short());
    println!("Records: {}", records.len());
    println!("Predicates: {}", predicates.len());
    println!();
    match &plan.base {
        tally_filter::ScanBase::Full => println!("Scan base: full scan"),
        tally_filter::ScanBase::Index { field } => println!("Scan base: index on '{}'", field),
    }
    println!("  Records visited: {}", plan.scanned);
    println!();
    println!("Index selectivity:");
    for (field, candidates) in &plan.selectivity {
        println!("  {}: {} candidates", field, candidates);
    }
    for field in &plan.unindexed {
        println!("  {}: no index (brute force)", field);
    }
    if !engine.index_stats().is_empty() {
        println!();
        println!("Indexes:");
        for stats in engine.index_stats() {
            println!(
                "  {}: {} distinct values over {} records",
                stats.field, stats.distinct_values, stats.indexed_records
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AggregateRequest {
        AggregateRequest {
            field: "votes".into(),
            method: "median".into(),
            nulls: "interpolate".into(),
            confidence: None,
            min_points: None,
            keep_outliers: false,
            weight_field: None,
            group_by: None,
            time_field: None,
            interval: "day".into(),
        }
    }

    #[test]
    fn parses_array_and_json_lines() {
        let array = parse_records(r#"[{"a": 1}, {"a": 2}]"#).unwrap();
        let lines = parse_records("{\"a\": 1}\n\n{\"a\": 2}\n").unwrap();
        assert_eq!(array, lines);
        assert_eq!(array.len(), 2);
        assert!(parse_records("[1, 2]").is_err());
    }

    #[test]
    fn flags_override_config() {
        let config = AggregationConfig {
            min_data_points: 5,
            confidence_level: 0.90,
            remove_outliers: true,
        };
        let base = aggregation_options(&config, &request()).unwrap();
        assert_eq!(base.method, AggregationMethod::Median);
        assert_eq!(base.handle_nulls, NullPolicy::Interpolate);
        assert_eq!(base.min_data_points, 5);
        assert_eq!(base.confidence_level, ConfidenceLevel::P90);

        let mut req = request();
        req.min_points = Some(2);
        req.confidence = Some(0.99);
        req.keep_outliers = true;
        req.weight_field = Some("registered".into());
        let over = aggregation_options(&config, &req).unwrap();
        assert_eq!(over.min_data_points, 2);
        assert_eq!(over.confidence_level, ConfidenceLevel::P99);
        assert!(!over.remove_outliers);
        assert_eq!(over.method, AggregationMethod::WeightedMean);
    }

    #[test]
    fn timestamps() {
        let rfc = json!("2023-02-25T14:30:00Z");
        let millis = json!(1_677_335_400_000_i64);
        assert_eq!(timestamp(Some(&rfc)), timestamp(Some(&millis)));
        assert!(timestamp(Some(&json!("yesterday"))).is_none());
        assert!(timestamp(None).is_none());
    }

    #[test]
    fn cache_key_is_stable_per_path() {
        let a = cache_key(Path::new("/data/results.json"));
        assert_eq!(a, cache_key(Path::new("/data/results.json")));
        assert_ne!(a, cache_key(Path::new("/data/turnout.json")));
        assert!(a.starts_with("file:"));
    }
}
