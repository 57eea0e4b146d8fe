//! Dataset containers: labelled, regression and unlabelled samples.

/// Class-labelled samples.
pub mod classification;
/// Samples with continuous target vectors.
pub mod regression;
/// Samples without labels.
pub mod unlabelled;

pub use classification::{ClassTracker, ClassificationData};
pub use regression::RegressionData;
pub use unlabelled::UnlabelledData;

use std::{fs, path::Path};

use anyhow::Context;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{ModuleError, Result};

/// Class id reserved for "no gesture" / rejected predictions.
pub const NULL_CLASS_LABEL: u32 = 0;

/// One input vector with its label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample<L> {
    /// Input vector.
    pub features: Vec<f64>,
    /// Class id, target vector, or `()`.
    pub label: L,
}

impl<L> Sample<L> {
    /// Creates a sample.
    pub fn new(features: Vec<f64>, label: L) -> Self {
        Self { features, label }
    }

    /// Input dimensionality.
    #[must_use]
    pub fn num_dimensions(&self) -> usize {
        self.features.len()
    }
}

/// Minimal view every dataset exposes to modules and pipelines.
pub trait Dataset: Clone + Send + Sync {
    /// Number of stored samples.
    fn num_samples(&self) -> usize;

    /// Input dimensionality shared by every sample.
    fn num_dimensions(&self) -> usize;

    /// Input vector of sample `index`.
    ///
    /// # Panics
    /// Panics when `index >= num_samples()`.
    fn input(&self, index: usize) -> &[f64];

    /// Copy of this dataset with every input replaced, labels untouched.
    fn with_inputs(&self, inputs: Vec<Vec<f64>>) -> Result<Self>;

    /// True when the dataset holds no samples.
    fn is_empty(&self) -> bool {
        self.num_samples() == 0
    }

    /// Iterates over the input vectors in order.
    fn inputs(&self) -> Inputs<'_, Self>
    where
        Self: Sized,
    {
        Inputs {
            data: self,
            next: 0,
        }
    }
}

/// Iterator over the inputs of a [`Dataset`].
#[derive(Debug)]
pub struct Inputs<'a, D> {
    data: &'a D,
    next: usize,
}

impl<'a, D: Dataset> Iterator for Inputs<'a, D> {
    type Item = &'a [f64];

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.data.num_samples() {
            return None;
        }
        let row = self.data.input(self.next);
        self.next += 1;
        Some(row)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.data.num_samples().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

/// Checks a replacement input matrix and returns its dimensionality.
pub(crate) fn replacement_dimensions(expected_rows: usize, inputs: &[Vec<f64>]) -> Result<usize> {
    if inputs.len() != expected_rows {
        return Err(ModuleError::InvalidData(format!(
            "expected {expected_rows} replacement inputs, got {}",
            inputs.len()
        )));
    }
    let dims = inputs.first().map_or(0, Vec::len);
    if let Some(row) = inputs.iter().find(|row| row.len() != dims) {
        return Err(ModuleError::DimensionMismatch {
            expected: dims,
            actual: row.len(),
        });
    }
    Ok(dims)
}

/// Number of samples kept for training when splitting `count` at `training_pct`.
pub(crate) fn training_share(count: usize, training_pct: u32) -> usize {
    count * training_pct as usize / 100
}

pub(crate) fn check_percentage(training_pct: u32) -> Result<()> {
    if training_pct > 100 {
        return Err(ModuleError::invalid(
            "training_pct",
            format!("{training_pct} is not a percentage"),
        ));
    }
    Ok(())
}

pub(crate) fn save_json<T: Serialize>(value: &T, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating dataset dir {}", parent.display()))?;
    }
    let contents = serde_json::to_string(value).context("serializing dataset")?;
    fs::write(path, contents).with_context(|| format!("writing dataset {}", path.display()))
}

pub(crate) fn load_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading dataset {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing dataset {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replacement_inputs_are_checked() {
        assert_eq!(
            replacement_dimensions(2, &[vec![1.0], vec![2.0]]).unwrap(),
            1
        );
        assert!(replacement_dimensions(3, &[vec![1.0]]).is_err());
        assert!(matches!(
            replacement_dimensions(2, &[vec![1.0], vec![2.0, 3.0]]),
            Err(ModuleError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn training_share_floors() {
        assert_eq!(training_share(10, 80), 8);
        assert_eq!(training_share(7, 50), 3);
        assert_eq!(training_share(3, 100), 3);
    }
}
