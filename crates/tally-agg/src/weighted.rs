//! Weighted averages.

use crate::aggregate::{finish, ratio, Spread};
use crate::error::{AggError, Result};
use crate::options::{AggregationMethod, AggregationOptions};
use crate::result::{AggregationMetadata, AggregationResult};

/// Weight-normalized mean of `values`.
///
/// Only pairs with a finite value and a finite, strictly positive weight
/// take part. Dispersion is the weighted variance, and the confidence score
/// and interval use the effective sample size `(Σw)²/Σw²`.
pub fn weighted_average(
    values: &[Option<f64>],
    weights: &[f64],
    options: &AggregationOptions,
) -> Result<AggregationResult> {
    if values.len() != weights.len() {
        return Err(AggError::Usage(format!(
            "values and weights differ in length ({} vs {})",
            values.len(),
            weights.len()
        )));
    }

    let pairs: Vec<(f64, f64)> = values
        .iter()
        .zip(weights)
        .filter_map(|(v, w)| match v {
            Some(v) if v.is_finite() && w.is_finite() && *w > 0.0 => Some((*v, *w)),
            _ => None,
        })
        .collect();

    let total = values.len();
    let n = pairs.len();
    let completeness = ratio(n, total);
    let mut metadata = AggregationMetadata::new(AggregationMethod::WeightedMean, options.handle_nulls);

    if n == 0 || n < options.min_data_points {
        return Ok(AggregationResult::insufficient(n, total, completeness, metadata));
    }

    let sum_w: f64 = pairs.iter().map(|(_, w)| w).sum();
    let sum_w2: f64 = pairs.iter().map(|(_, w)| w * w).sum();
    let mean = pairs.iter().map(|(v, w)| v * w).sum::<f64>() / sum_w;
    let variance = pairs.iter().map(|(v, w)| w * (v - mean).powi(2)).sum::<f64>() / sum_w;
    let n_eff = sum_w * sum_w / sum_w2;
    let std_dev = variance.sqrt();
    metadata.effective_sample_size = Some(n_eff);

    let spread = Spread {
        n,
        n_eff,
        mean,
        std_dev,
        std_error: std_dev / n_eff.sqrt(),
    };
    Ok(finish(mean, spread, total, completeness, metadata, options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::QualityLevel;

    #[test]
    fn weighted_mean() {
        let r = weighted_average(&[Some(10.0), Some(20.0)], &[1.0, 3.0], &AggregationOptions::default())
            .unwrap();
        assert_eq!(r.value, Some(17.5));
        assert_eq!(r.sample_size, 2);
        let n_eff = r.metadata.effective_sample_size.unwrap();
        assert!((n_eff - 1.6).abs() < 1e-12);
        let ci = r.confidence_interval.unwrap();
        assert!(ci.lower < 17.5 && ci.upper > 17.5);
    }

    #[test]
    fn invalid_pairs_are_dropped() {
        let r = weighted_average(
            &[Some(10.0), None, Some(50.0), Some(30.0)],
            &[1.0, 5.0, 0.0, 1.0],
            &AggregationOptions::default(),
        )
        .unwrap();
        assert_eq!(r.value, Some(20.0));
        assert_eq!(r.sample_size, 2);
        assert_eq!(r.total_size, 4);
        assert_eq!(r.completeness, 0.5);
    }

    #[test]
    fn length_mismatch_is_usage_error() {
        let err = weighted_average(&[Some(1.0)], &[1.0, 2.0], &AggregationOptions::default());
        assert!(matches!(err, Err(AggError::Usage(_))));
    }

    #[test]
    fn no_valid_pairs() {
        let r = weighted_average(&[None, Some(3.0)], &[1.0, -1.0], &AggregationOptions::default())
            .unwrap();
        assert_eq!(r.value, None);
        assert_eq!(r.quality, QualityLevel::Unknown);
    }
}
