//! The generic aggregation path: extract, clean, trim, reduce, score.

use tally_core::record::{FieldPath, Record};

use crate::error::{AggError, Result};
use crate::nulls;
use crate::options::{AggregationMethod, AggregationOptions};
use crate::result::{AggregationMetadata, AggregationResult, ConfidenceInterval, QualityLevel};
use crate::stats;
use crate::weighted::weighted_average;

/// Numeric view of `field` in each record; missing, null and non-numeric
/// values become `None`. `field` may be a dot path (`results.apc.votes`).
pub fn extract(records: &[Record], field: &str) -> Result<Vec<Option<f64>>> {
    let path = FieldPath::parse(field)?;
    Ok(records.iter().map(|r| r.scalar(&path).as_f64()).collect())
}

pub fn aggregate(
    records: &[Record],
    field: &str,
    options: &AggregationOptions,
) -> Result<AggregationResult> {
    aggregate_values(&extract(records, field)?, options)
}

/// Aggregate a raw series. `WeightedMean` is routed to [`weighted_average`]
/// with `options.weights` and is a usage error without them.
pub fn aggregate_values(
    values: &[Option<f64>],
    options: &AggregationOptions,
) -> Result<AggregationResult> {
    if options.method == AggregationMethod::WeightedMean {
        let Some(weights) = options.weights.as_deref() else {
            return Err(AggError::Usage(
                "weighted_mean needs weights; call weighted_average or set options.weights".into(),
            ));
        };
        return weighted_average(values, weights, options);
    }

    let total = values.len();
    let cleaned = nulls::apply(values, options.handle_nulls);
    let completeness = ratio(cleaned.valid, total);
    let mut metadata = AggregationMetadata::new(options.method, options.handle_nulls);
    metadata.nulls_filled = cleaned.filled;

    let sample = if options.remove_outliers {
        let (kept, removed) = stats::remove_outliers(&cleaned.values);
        metadata.outliers_removed = removed;
        kept
    } else {
        cleaned.values
    };

    let n = sample.len();
    let Some(mean) = stats::mean(&sample).filter(|_| n >= options.min_data_points) else {
        return Ok(AggregationResult::insufficient(n, total, completeness, metadata));
    };

    let value = match options.method {
        AggregationMethod::Mean | AggregationMethod::WeightedMean => mean,
        AggregationMethod::Median => stats::median(&sample).unwrap_or(mean),
        AggregationMethod::Mode => stats::mode(&sample).unwrap_or(mean),
        AggregationMethod::Sum => sample.iter().sum(),
        AggregationMethod::Count => n as f64,
    };

    let spread = Spread {
        n,
        n_eff: n as f64,
        mean,
        std_dev: stats::std_dev(&sample),
        std_error: stats::std_error(&sample),
    };
    let result = finish(value, spread, total, completeness, metadata, options);

    #[cfg(feature = "tracing")]
    tracing::debug!(
        method = %options.method,
        n = result.sample_size,
        total = result.total_size,
        outliers = result.metadata.outliers_removed,
        quality = ?result.quality,
        "aggregate"
    );

    Ok(result)
}

/// Location and dispersion of the reduced sample.
pub(crate) struct Spread {
    pub n: usize,
    /// Sample size used for the confidence score and interval multiplier.
    pub n_eff: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub std_error: f64,
}

/// Attach confidence, interval and quality to a computed value. The interval
/// is about `spread.mean`.
pub(crate) fn finish(
    value: f64,
    spread: Spread,
    total: usize,
    completeness: f64,
    mut metadata: AggregationMetadata,
    options: &AggregationOptions,
) -> AggregationResult {
    let confidence = stats::confidence_score(spread.n_eff, spread.mean, spread.std_error);

    let confidence_interval = if spread.n >= 2 {
        let df_n = (spread.n_eff.ceil() as usize).max(2);
        stats::multiplier(df_n, options.confidence_level).map(|m| ConfidenceInterval {
            lower: spread.mean - m * spread.std_error,
            upper: spread.mean + m * spread.std_error,
            level: options.confidence_level.as_f64(),
        })
    } else {
        None
    };

    metadata.mean = Some(spread.mean);
    metadata.std_dev = Some(spread.std_dev);
    metadata.std_error = Some(spread.std_error);

    AggregationResult {
        value: Some(value),
        confidence,
        sample_size: spread.n,
        total_size: total,
        completeness,
        quality: QualityLevel::classify(completeness, spread.n, options.min_data_points),
        confidence_interval,
        metadata,
    }
}

pub(crate) fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
