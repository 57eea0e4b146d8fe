//! Numeric helpers shared by datasets and modules.

use serde::{Deserialize, Serialize};

/// Observed value range of one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinMax {
    /// Smallest value.
    pub min: f64,
    /// Largest value.
    pub max: f64,
}

impl MinMax {
    /// Creates a range.
    #[must_use]
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Widens the range to include `value`.
    pub fn update(&mut self, value: f64) {
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }
}

/// Computes per-dimension ranges over rows of equal length.
pub fn ranges<'a, I>(rows: I, dimensions: usize) -> Vec<MinMax>
where
    I: IntoIterator<Item = &'a [f64]>,
{
    let mut iter = rows.into_iter();
    let Some(first) = iter.next() else {
        return vec![MinMax::new(0.0, 0.0); dimensions];
    };
    let mut ranges: Vec<MinMax> = first.iter().map(|v| MinMax::new(*v, *v)).collect();
    for row in iter {
        for (range, value) in ranges.iter_mut().zip(row) {
            range.update(*value);
        }
    }
    ranges
}

/// Linearly maps `value` from `[min, max]` onto `[target_min, target_max]`.
///
/// A degenerate source range maps everything onto `target_min`.
#[must_use]
pub fn scale(value: f64, min: f64, max: f64, target_min: f64, target_max: f64) -> f64 {
    if (max - min).abs() < f64::EPSILON {
        return target_min;
    }
    (value - min) * (target_max - target_min) / (max - min) + target_min
}

/// Scales every element of `values` into `[target_min, target_max]` using `ranges`.
pub fn scale_vector(values: &mut [f64], ranges: &[MinMax], target_min: f64, target_max: f64) {
    for (value, range) in values.iter_mut().zip(ranges) {
        *value = scale(*value, range.min, range.max, target_min, target_max);
    }
}

/// Copy of `values` mapped into `[0, 1]` when `ranges` is given.
#[must_use]
pub fn scale_to_unit(values: &[f64], ranges: Option<&[MinMax]>) -> Vec<f64> {
    let mut scaled = values.to_vec();
    if let Some(ranges) = ranges {
        scale_vector(&mut scaled, ranges, 0.0, 1.0);
    }
    scaled
}

/// Squared Euclidean distance.
#[must_use]
pub fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Euclidean distance.
#[must_use]
pub fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    squared_distance(a, b).sqrt()
}

/// Arithmetic mean; 0 for an empty slice.
#[must_use]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n-1); 0 below two values.
#[must_use]
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mu = mean(values);
    let variance =
        values.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Index of the largest value (first on ties).
#[must_use]
pub fn arg_max(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (idx, value)| match best {
            Some((_, current)) if *value <= current => best,
            _ => Some((idx, *value)),
        })
        .map(|(idx, _)| idx)
}

/// Index of the smallest value (first on ties).
#[must_use]
pub fn arg_min(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (idx, value)| match best {
            Some((_, current)) if *value >= current => best,
            _ => Some((idx, *value)),
        })
        .map(|(idx, _)| idx)
}

/// Mean squared error between paired values; 0 when lengths differ or are empty.
#[must_use]
pub fn mean_squared_error(predictions: &[f64], targets: &[f64]) -> f64 {
    if predictions.is_empty() || predictions.len() != targets.len() {
        return 0.0;
    }
    predictions
        .iter()
        .zip(targets)
        .map(|(pred, target)| (pred - target).powi(2))
        .sum::<f64>()
        / predictions.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_maps_ranges() {
        assert!((scale(5.0, 0.0, 10.0, 0.0, 1.0) - 0.5).abs() < 1e-12);
        assert_eq!(scale(3.0, 2.0, 2.0, -1.0, 1.0), -1.0);
    }

    #[test]
    fn ranges_cover_rows() {
        let rows = [vec![1.0, -2.0], vec![3.0, 4.0], vec![-1.0, 0.0]];
        let found = ranges(rows.iter().map(Vec::as_slice), 2);
        assert_eq!(found[0], MinMax::new(-1.0, 3.0));
        assert_eq!(found[1], MinMax::new(-2.0, 4.0));
        assert_eq!(ranges(std::iter::empty(), 3).len(), 3);
    }

    #[test]
    fn arg_extremes_prefer_first() {
        assert_eq!(arg_max(&[1.0, 3.0, 3.0]), Some(1));
        assert_eq!(arg_min(&[2.0, 0.5, 0.5]), Some(1));
        assert_eq!(arg_max(&[]), None);
    }

    #[test]
    fn statistics_handle_small_inputs() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(std_dev(&[4.0]), 0.0);
        assert!((std_dev(&[1.0, 3.0]) - 2.0_f64.sqrt()).abs() < 1e-12);
        assert!(mean_squared_error(&[1.0, 2.0], &[1.0, 1.5]) > 0.0);
    }
}
