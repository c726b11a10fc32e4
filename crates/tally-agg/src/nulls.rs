//! Null-handling policies.

use crate::options::NullPolicy;

/// A series after its null policy has been applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Cleaned {
    pub values: Vec<f64>,
    /// Valid (non-null) values in the input.
    pub valid: usize,
    /// Null slots that received a substitute.
    pub filled: usize,
}

/// Apply `policy` to `values`, preserving order.
///
/// `Interpolate` fills each gap linearly between the nearest valid
/// neighbours, copies the only neighbour at either end, and falls back to
/// the mean of the valid values when there is no neighbour at all (which
/// only happens when there are no valid values, so nothing is filled).
pub fn apply(values: &[Option<f64>], policy: NullPolicy) -> Cleaned {
    let valid = values.iter().flatten().count();
    match policy {
        NullPolicy::Skip | NullPolicy::WeightedSkip => Cleaned {
            values: values.iter().flatten().copied().collect(),
            valid,
            filled: 0,
        },
        NullPolicy::Zero => Cleaned {
            values: values.iter().map(|v| v.unwrap_or(0.0)).collect(),
            valid,
            filled: values.len() - valid,
        },
        NullPolicy::Interpolate => {
            let filled = interpolate(values);
            let n = filled.iter().flatten().count();
            Cleaned {
                values: filled.into_iter().flatten().collect(),
                valid,
                filled: n - valid,
            }
        }
    }
}

/// Fill null slots by position; slots stay `None` only when the
/// series has no valid value at all.
pub fn interpolate(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let anchors: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (i, v)))
        .collect();
    if anchors.is_empty() {
        return values.to_vec();
    }

    let mut out = Vec::with_capacity(values.len());
    // Index into `anchors` of the first anchor at or after the current slot.
    let mut next: usize = 0;
    for (i, v) in values.iter().enumerate() {
        if let Some(v) = v {
            out.push(Some(*v));
            next += 1;
            continue;
        }
        let before = next.checked_sub(1).map(|k| anchors[k]);
        let after = anchors.get(next).copied();
        let fill = match (before, after) {
            (Some((i0, v0)), Some((i1, v1))) => {
                v0 + (v1 - v0) * (i - i0) as f64 / (i1 - i0) as f64
            }
            (Some((_, v0)), None) => v0,
            (None, Some((_, v1))) => v1,
            (None, None) => anchors.iter().map(|(_, v)| v).sum::<f64>() / anchors.len() as f64,
        };
        out.push(Some(fill));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolate_between_neighbours() {
        let series = [Some(10.0), None, Some(20.0), None, Some(30.0)];
        let cleaned = apply(&series, NullPolicy::Interpolate);
        assert_eq!(cleaned.values, vec![10.0, 15.0, 20.0, 25.0, 30.0]);
        assert_eq!(cleaned.filled, 2);
        assert_eq!(cleaned.valid, 3);
    }

    #[test]
    fn interpolate_uneven_gap_and_edges() {
        let series = [None, Some(0.0), None, None, Some(30.0), None];
        assert_eq!(
            interpolate(&series),
            vec![Some(0.0), Some(0.0), Some(10.0), Some(20.0), Some(30.0), Some(30.0)]
        );
        assert_eq!(interpolate(&[None, None]), vec![None, None]);
    }

    #[test]
    fn skip_and_zero() {
        let series = [Some(10.0), None, Some(20.0), None, Some(30.0)];
        assert_eq!(apply(&series, NullPolicy::Skip).values, vec![10.0, 20.0, 30.0]);
        let zero = apply(&series, NullPolicy::Zero);
        assert_eq!(zero.values, vec![10.0, 0.0, 20.0, 0.0, 30.0]);
        assert_eq!(zero.filled, 2);
    }
}
