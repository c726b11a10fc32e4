//! Aggregation knobs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use tally_core::config::AggregationConfig;

use crate::error::{AggError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    #[default]
    Mean,
    Median,
    Mode,
    Sum,
    Count,
    /// Requires `AggregationOptions::weights`.
    WeightedMean,
}

impl FromStr for AggregationMethod {
    type Err = AggError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Self::Mean,
            "median" => Self::Median,
            "mode" => Self::Mode,
            "sum" => Self::Sum,
            "count" => Self::Count,
            "weighted_mean" | "weighted-mean" => Self::WeightedMean,
            other => return Err(AggError::Usage(format!("unknown method '{other}'"))),
        })
    }
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Mean => "mean",
            Self::Median => "median",
            Self::Mode => "mode",
            Self::Sum => "sum",
            Self::Count => "count",
            Self::WeightedMean => "weighted_mean",
        };
        f.write_str(s)
    }
}

/// What to do with missing or non-numeric values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullPolicy {
    #[default]
    Skip,
    Zero,
    /// Linear between the nearest valid neighbours.
    Interpolate,
    /// `Skip`, for use with a parallel weights array.
    WeightedSkip,
}

impl FromStr for NullPolicy {
    type Err = AggError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Self::Skip,
            "zero" => Self::Zero,
            "interpolate" => Self::Interpolate,
            "weighted_skip" | "weighted-skip" => Self::WeightedSkip,
            other => return Err(AggError::Usage(format!("unknown null policy '{other}'"))),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    #[serde(rename = "0.90")]
    P90,
    #[default]
    #[serde(rename = "0.95")]
    P95,
    #[serde(rename = "0.99")]
    P99,
}

impl ConfidenceLevel {
    /// Accepts 0.90, 0.95 and 0.99.
    pub fn from_f64(level: f64) -> Result<Self> {
        [Self::P90, Self::P95, Self::P99]
            .into_iter()
            .find(|l| (l.as_f64() - level).abs() < 1e-9)
            .ok_or_else(|| {
                AggError::Usage(format!(
                    "confidence level must be 0.90, 0.95 or 0.99 (got {level})"
                ))
            })
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Self::P90 => 0.90,
            Self::P95 => 0.95,
            Self::P99 => 0.99,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregationOptions {
    pub method: AggregationMethod,
    pub handle_nulls: NullPolicy,
    pub confidence_level: ConfidenceLevel,
    pub min_data_points: usize,
    pub remove_outliers: bool,
    /// Parallel to the values; only read by `WeightedMean`.
    pub weights: Option<Vec<f64>>,
}

impl AggregationOptions {
    pub fn from_config(config: &AggregationConfig) -> Result<Self> {
        Ok(Self {
            method: AggregationMethod::default(),
            handle_nulls: NullPolicy::default(),
            confidence_level: ConfidenceLevel::from_f64(config.confidence_level)?,
            min_data_points: config.min_data_points,
            remove_outliers: config.remove_outliers,
            weights: None,
        })
    }

    pub fn with_method(mut self, method: AggregationMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_nulls(mut self, policy: NullPolicy) -> Self {
        self.handle_nulls = policy;
        self
    }

    pub fn with_confidence(mut self, level: ConfidenceLevel) -> Self {
        self.confidence_level = level;
        self
    }

    pub fn with_min_data_points(mut self, n: usize) -> Self {
        self.min_data_points = n;
        self
    }

    pub fn with_outlier_removal(mut self, enabled: bool) -> Self {
        self.remove_outliers = enabled;
        self
    }

    pub fn with_weights(mut self, weights: Option<Vec<f64>>) -> Self {
        self.weights = weights;
        self
    }
}

impl Default for AggregationOptions {
    fn default() -> Self {
        let config = AggregationConfig::default();
        Self {
            method: AggregationMethod::default(),
            handle_nulls: NullPolicy::default(),
            confidence_level: ConfidenceLevel::default(),
            min_data_points: config.min_data_points,
            remove_outliers: config.remove_outliers,
            weights: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names() {
        assert_eq!(
            "weighted_mean".parse::<AggregationMethod>().unwrap(),
            AggregationMethod::WeightedMean
        );
        assert_eq!("Interpolate".parse::<NullPolicy>().unwrap(), NullPolicy::Interpolate);
        assert!("average".parse::<AggregationMethod>().is_err());
    }

    #[test]
    fn confidence_levels() {
        assert_eq!(ConfidenceLevel::from_f64(0.99).unwrap(), ConfidenceLevel::P99);
        assert!(ConfidenceLevel::from_f64(0.5).is_err());
        let opts = AggregationOptions::from_config(&AggregationConfig::default()).unwrap();
        assert_eq!(opts, AggregationOptions::default());
    }
}
