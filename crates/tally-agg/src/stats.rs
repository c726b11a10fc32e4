//! Descriptive statistics and interval multipliers.

use std::collections::HashMap;

use crate::options::ConfidenceLevel;

/// Two-sided Student-t critical values for df = 1..=29.
const T_90: [f64; 29] = [
    6.314, 2.920, 2.353, 2.132, 2.015, 1.943, 1.895, 1.860, 1.833, 1.812, 1.796, 1.782, 1.771,
    1.761, 1.753, 1.746, 1.740, 1.734, 1.729, 1.725, 1.721, 1.717, 1.714, 1.711, 1.708, 1.706,
    1.703, 1.701, 1.699,
];
const T_95: [f64; 29] = [
    12.706, 4.303, 3.182, 2.776, 2.571, 2.447, 2.365, 2.306, 2.262, 2.228, 2.201, 2.179, 2.160,
    2.145, 2.131, 2.120, 2.110, 2.101, 2.093, 2.086, 2.080, 2.074, 2.069, 2.064, 2.060, 2.056,
    2.052, 2.048, 2.045,
];
const T_99: [f64; 29] = [
    63.657, 9.925, 5.841, 4.604, 4.032, 3.707, 3.499, 3.355, 3.250, 3.169, 3.106, 3.055, 3.012,
    2.977, 2.947, 2.921, 2.898, 2.878, 2.861, 2.845, 2.831, 2.819, 2.807, 2.797, 2.787, 2.779,
    2.771, 2.763, 2.756,
];

/// Samples at least this large use the normal approximation.
pub const LARGE_SAMPLE: usize = 30;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n − 1); zero below two points.
pub fn std_dev(values: &[f64]) -> f64 {
    let n = values.len();
    let Some(m) = mean(values) else {
        return 0.0;
    };
    if n < 2 {
        return 0.0;
    }
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (ss / (n - 1) as f64).sqrt()
}

pub fn std_error(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    std_dev(values) / (values.len() as f64).sqrt()
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut v = values.to_vec();
    v.sort_by(f64::total_cmp);
    v
}

/// Middle value; mean of the two middles for even sizes.
pub fn median(values: &[f64]) -> Option<f64> {
    let v = sorted(values);
    let n = v.len();
    match n {
        0 => None,
        _ if n % 2 == 1 => Some(v[n / 2]),
        _ => Some((v[n / 2 - 1] + v[n / 2]) / 2.0),
    }
}

/// Most frequent value; the first one seen wins ties.
pub fn mode(values: &[f64]) -> Option<f64> {
    let mut counts: HashMap<u64, (usize, usize)> = HashMap::new();
    for (i, v) in values.iter().enumerate() {
        // +0.0 and -0.0 count as one value
        let bits = if *v == 0.0 { 0 } else { v.to_bits() };
        counts.entry(bits).or_insert((0, i)).0 += 1;
    }
    counts
        .values()
        .max_by(|(ca, ia), (cb, ib)| ca.cmp(cb).then(ib.cmp(ia)))
        .map(|(_, first)| values[*first])
}

/// Quantile of sorted data by linear interpolation at `(n − 1)·p`.
pub fn quantile_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    let pos = (n - 1) as f64 * p.clamp(0.0, 1.0);
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// `(Q1, Q3)`.
pub fn quartiles(values: &[f64]) -> Option<(f64, f64)> {
    let v = sorted(values);
    Some((quantile_sorted(&v, 0.25)?, quantile_sorted(&v, 0.75)?))
}

/// Drop values outside `[Q1 − 1.5·IQR, Q3 + 1.5·IQR]`, keeping input order.
/// Samples under four points are returned unchanged. Returns the kept values
/// and how many were removed.
pub fn remove_outliers(values: &[f64]) -> (Vec<f64>, usize) {
    if values.len() < 4 {
        return (values.to_vec(), 0);
    }
    let Some((q1, q3)) = quartiles(values) else {
        return (values.to_vec(), 0);
    };
    let iqr = q3 - q1;
    let (lo, hi) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);
    let kept: Vec<f64> = values
        .iter()
        .copied()
        .filter(|v| *v >= lo && *v <= hi)
        .collect();
    let removed = values.len() - kept.len();
    (kept, removed)
}

pub fn z_multiplier(level: ConfidenceLevel) -> f64 {
    match level {
        ConfidenceLevel::P90 => 1.64,
        ConfidenceLevel::P95 => 1.96,
        ConfidenceLevel::P99 => 2.58,
    }
}

/// Critical value for a sample of `n`: Student-t with `n − 1` degrees of
/// freedom below [`LARGE_SAMPLE`], z otherwise. `None` below two points.
pub fn multiplier(n: usize, level: ConfidenceLevel) -> Option<f64> {
    if n < 2 {
        return None;
    }
    if n >= LARGE_SAMPLE {
        return Some(z_multiplier(level));
    }
    let table = match level {
        ConfidenceLevel::P90 => &T_90,
        ConfidenceLevel::P95 => &T_95,
        ConfidenceLevel::P99 => &T_99,
    };
    table.get(n - 2).copied()
}

/// Average of a sample-size factor `min(n/30, 1)` and a dispersion factor
/// `max(0, 1 − se/|mean|)`.
pub fn confidence_score(n: f64, mean: f64, se: f64) -> f64 {
    let size = (n / LARGE_SAMPLE as f64).min(1.0);
    let dispersion = if mean == 0.0 {
        if se == 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        (1.0 - se / mean.abs()).max(0.0)
    };
    ((size + dispersion) / 2.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn mode_first_seen_wins_ties() {
        assert_eq!(mode(&[5.0, 3.0, 3.0, 5.0, 1.0]), Some(5.0));
        assert_eq!(mode(&[1.0, 2.0, 2.0]), Some(2.0));
    }

    #[test]
    fn quartiles_interpolate() {
        let (q1, q3) = quartiles(&[1.0, 2.0, 3.0, 4.0, 5.0, 100.0]).unwrap();
        assert!((q1 - 2.25).abs() < 1e-12);
        assert!((q3 - 4.75).abs() < 1e-12);
    }

    #[test]
    fn iqr_rule_drops_far_values() {
        let (kept, removed) = remove_outliers(&[1.0, 2.0, 3.0, 4.0, 5.0, 100.0]);
        assert_eq!(kept, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(removed, 1);
        let (kept, removed) = remove_outliers(&[1.0, 2.0, 100.0]);
        assert_eq!(kept.len(), 3);
        assert_eq!(removed, 0);
    }

    #[test]
    fn t_then_z() {
        assert_eq!(multiplier(1, ConfidenceLevel::P95), None);
        assert_eq!(multiplier(2, ConfidenceLevel::P95), Some(12.706));
        assert_eq!(multiplier(29, ConfidenceLevel::P99), Some(2.763));
        assert_eq!(multiplier(30, ConfidenceLevel::P90), Some(1.64));
    }

    #[test]
    fn sample_std_dev() {
        let sd = std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((sd - 2.138089935).abs() < 1e-6);
        assert_eq!(std_dev(&[5.0]), 0.0);
    }

    #[test]
    fn confidence_combines_size_and_dispersion() {
        assert!((confidence_score(30.0, 10.0, 0.0) - 1.0).abs() < 1e-12);
        assert!((confidence_score(15.0, 10.0, 5.0) - 0.5).abs() < 1e-12);
        assert!((confidence_score(3.0, 0.0, 1.0) - 0.05).abs() < 1e-12);
    }
}
