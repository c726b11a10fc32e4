//! Aggregation result types.

use serde::Serialize;

use crate::options::{AggregationMethod, NullPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityLevel {
    Unknown,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl QualityLevel {
    /// Thresholds on completeness and sample size.
    pub fn classify(completeness: f64, n: usize, min_data_points: usize) -> Self {
        if n == 0 {
            Self::Unknown
        } else if completeness >= 0.95 && n >= 30 {
            Self::Excellent
        } else if completeness >= 0.8 && n >= 15 {
            Self::Good
        } else if completeness >= 0.6 && n >= 5 {
            Self::Fair
        } else if n >= min_data_points {
            Self::Poor
        } else {
            Self::Unknown
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
    pub level: f64,
}

impl ConfidenceInterval {
    pub fn overlaps(&self, other: &ConfidenceInterval) -> bool {
        self.lower <= other.upper && other.lower <= self.upper
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationMetadata {
    pub method: AggregationMethod,
    pub null_policy: NullPolicy,
    /// Null slots replaced by `Zero`/`Interpolate`.
    pub nulls_filled: usize,
    pub outliers_removed: usize,
    pub mean: Option<f64>,
    pub std_dev: Option<f64>,
    pub std_error: Option<f64>,
    /// `(Σw)²/Σw²`; weighted aggregations only.
    pub effective_sample_size: Option<f64>,
}

impl AggregationMetadata {
    pub(crate) fn new(method: AggregationMethod, null_policy: NullPolicy) -> Self {
        Self {
            method,
            null_policy,
            nulls_filled: 0,
            outliers_removed: 0,
            mean: None,
            std_dev: None,
            std_error: None,
            effective_sample_size: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationResult {
    pub value: Option<f64>,
    /// Heuristic score in `[0, 1]`.
    pub confidence: f64,
    pub sample_size: usize,
    pub total_size: usize,
    /// Valid input values over all input values.
    pub completeness: f64,
    pub quality: QualityLevel,
    pub confidence_interval: Option<ConfidenceInterval>,
    pub metadata: AggregationMetadata,
}

impl AggregationResult {
    /// The "not enough data" outcome: no value, zero confidence.
    pub(crate) fn insufficient(
        sample_size: usize,
        total_size: usize,
        completeness: f64,
        metadata: AggregationMetadata,
    ) -> Self {
        Self {
            value: None,
            confidence: 0.0,
            sample_size,
            total_size,
            completeness,
            quality: QualityLevel::Unknown,
            confidence_interval: None,
            metadata,
        }
    }

    pub fn is_sufficient(&self) -> bool {
        self.value.is_some()
    }
}
