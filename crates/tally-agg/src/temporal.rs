//! Time-bucketed aggregation.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Days, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::aggregate_values;
use crate::error::{AggError, Result};
use crate::nulls;
use crate::options::{AggregationOptions, NullPolicy};
use crate::result::AggregationResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInterval {
    Hour,
    Day,
    /// ISO week, starting Monday.
    Week,
    Month,
}

impl FromStr for TimeInterval {
    type Err = AggError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "hour" => Self::Hour,
            "day" => Self::Day,
            "week" => Self::Week,
            "month" => Self::Month,
            other => return Err(AggError::Usage(format!("unknown interval '{other}'"))),
        })
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        })
    }
}

impl TimeInterval {
    /// Start of the bucket containing `ts`.
    pub fn bucket_start(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let date = ts.date_naive();
        let start = match self {
            Self::Hour => date.and_hms_opt(ts.hour(), 0, 0),
            Self::Day => date.and_hms_opt(0, 0, 0),
            Self::Week => date
                .checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))
                .and_then(|d| d.and_hms_opt(0, 0, 0)),
            Self::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0)),
        };
        start.map(|dt| dt.and_utc()).unwrap_or(ts)
    }

    /// Human-readable bucket label, e.g. `2023-02-25T14:00`, `2023-02-25`,
    /// `2023-W08`, `2023-02`.
    pub fn bucket_key(self, ts: DateTime<Utc>) -> String {
        let start = self.bucket_start(ts);
        match self {
            Self::Hour => start.format("%Y-%m-%dT%H:00").to_string(),
            Self::Day => start.format("%Y-%m-%d").to_string(),
            Self::Week => {
                let week = start.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            Self::Month => start.format("%Y-%m").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemporalBucket {
    pub key: String,
    pub start: DateTime<Utc>,
    pub result: AggregationResult,
}

/// Aggregate each `interval` bucket of a timestamped series, oldest first.
///
/// With `NullPolicy::Interpolate` the gaps are filled over the whole
/// time-sorted series before bucketing, so a bucket of nulls borrows from its
/// neighbours in time. With weights (weighted mean) the weights are parallel
/// to `series`.
pub fn temporal_aggregation(
    series: &[(DateTime<Utc>, Option<f64>)],
    interval: TimeInterval,
    options: &AggregationOptions,
) -> Result<Vec<TemporalBucket>> {
    if let Some(weights) = &options.weights {
        if weights.len() != series.len() {
            return Err(AggError::Usage(format!(
                "weights must be parallel to the series ({} vs {})",
                weights.len(),
                series.len()
            )));
        }
    }

    let mut order: Vec<usize> = (0..series.len()).collect();
    order.sort_by_key(|&i| series[i].0);

    let sorted: Vec<Option<f64>> = order.iter().map(|&i| series[i].1).collect();
    let values = if options.handle_nulls == NullPolicy::Interpolate {
        nulls::interpolate(&sorted)
    } else {
        sorted
    };

    let mut buckets: BTreeMap<DateTime<Utc>, (Vec<Option<f64>>, Vec<f64>)> = BTreeMap::new();
    for (pos, &i) in order.iter().enumerate() {
        let slot = buckets.entry(interval.bucket_start(series[i].0)).or_default();
        slot.0.push(values[pos]);
        if let Some(weights) = &options.weights {
            slot.1.push(weights[i]);
        }
    }

    let mut out = Vec::with_capacity(buckets.len());
    for (start, (bucket_values, bucket_weights)) in buckets {
        let bucket_options = options
            .clone()
            .with_weights(options.weights.as_ref().map(|_| bucket_weights));
        out.push(TemporalBucket {
            key: interval.bucket_key(start),
            start,
            result: aggregate_values(&bucket_values, &bucket_options)?,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 30, 0).unwrap()
    }

    #[test]
    fn bucket_keys() {
        // 2023-02-25 is a Saturday in ISO week 8.
        let ts = at(2023, 2, 25, 14);
        assert_eq!(TimeInterval::Hour.bucket_key(ts), "2023-02-25T14:00");
        assert_eq!(TimeInterval::Day.bucket_key(ts), "2023-02-25");
        assert_eq!(TimeInterval::Week.bucket_key(ts), "2023-W08");
        assert_eq!(TimeInterval::Month.bucket_key(ts), "2023-02");
        assert_eq!(
            TimeInterval::Week.bucket_start(ts),
            Utc.with_ymd_and_hms(2023, 2, 20, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn buckets_are_chronological() {
        let series = vec![
            (at(2023, 3, 2, 9), Some(30.0)),
            (at(2023, 2, 25, 9), Some(10.0)),
            (at(2023, 2, 25, 18), Some(20.0)),
        ];
        let out = temporal_aggregation(&series, TimeInterval::Day, &AggregationOptions::default())
            .unwrap();
        let keys: Vec<&str> = out.iter().map(|b| b.key.as_str()).collect();
        assert_eq!(keys, vec!["2023-02-25", "2023-03-02"]);
        assert_eq!(out[0].result.value, Some(15.0));
        assert_eq!(out[1].result.value, Some(30.0));
    }

    #[test]
    fn interpolation_crosses_bucket_boundaries() {
        let series = vec![
            (at(2023, 2, 1, 0), Some(10.0)),
            (at(2023, 3, 1, 0), None),
            (at(2023, 4, 1, 0), Some(30.0)),
        ];
        let skip = temporal_aggregation(&series, TimeInterval::Month, &AggregationOptions::default())
            .unwrap();
        assert_eq!(skip[1].result.value, None);

        let opts = AggregationOptions::default().with_nulls(NullPolicy::Interpolate);
        let filled = temporal_aggregation(&series, TimeInterval::Month, &opts).unwrap();
        assert_eq!(filled[1].key, "2023-03");
        assert_eq!(filled[1].result.value, Some(20.0));
    }
}
