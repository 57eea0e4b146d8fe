use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::{
    check_percentage, load_json, replacement_dimensions, save_json, training_share, Dataset,
    Sample,
};
use crate::{
    error::{ModuleError, Result},
    random::Random,
    util::{self, MinMax},
};

/// Samples paired with continuous target vectors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegressionData {
    name: String,
    num_input_dimensions: usize,
    num_target_dimensions: usize,
    samples: Vec<Sample<Vec<f64>>>,
}

impl RegressionData {
    /// Creates an empty dataset.
    #[must_use]
    pub fn new(num_input_dimensions: usize, num_target_dimensions: usize) -> Self {
        Self {
            name: "NOT_SET".into(),
            num_input_dimensions,
            num_target_dimensions,
            samples: Vec::new(),
        }
    }

    /// Dataset name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renames the dataset.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Target vector dimensionality.
    #[must_use]
    pub const fn num_target_dimensions(&self) -> usize {
        self.num_target_dimensions
    }

    /// Stored samples.
    #[must_use]
    pub fn samples(&self) -> &[Sample<Vec<f64>>] {
        &self.samples
    }

    /// Target vector of sample `index`.
    #[must_use]
    pub fn target(&self, index: usize) -> Option<&[f64]> {
        self.samples.get(index).map(|s| s.label.as_slice())
    }

    /// Appends a sample; an empty dataset adopts the sample's shapes.
    pub fn add_sample(&mut self, features: Vec<f64>, targets: Vec<f64>) -> Result<()> {
        if self.samples.is_empty() {
            self.num_input_dimensions = features.len();
            self.num_target_dimensions = targets.len();
        } else if features.len() != self.num_input_dimensions {
            return Err(ModuleError::DimensionMismatch {
                expected: self.num_input_dimensions,
                actual: features.len(),
            });
        } else if targets.len() != self.num_target_dimensions {
            return Err(ModuleError::DimensionMismatch {
                expected: self.num_target_dimensions,
                actual: targets.len(),
            });
        }
        self.samples.push(Sample::new(features, targets));
        Ok(())
    }

    /// Removes every sample.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Appends every sample of `other`; both shapes must agree.
    pub fn merge(&mut self, other: &Self) -> Result<()> {
        if !self.samples.is_empty()
            && !other.samples.is_empty()
            && (other.num_input_dimensions != self.num_input_dimensions
                || other.num_target_dimensions != self.num_target_dimensions)
        {
            return Err(ModuleError::DimensionMismatch {
                expected: self.num_input_dimensions,
                actual: other.num_input_dimensions,
            });
        }
        for sample in &other.samples {
            self.add_sample(sample.features.clone(), sample.label.clone())?;
        }
        Ok(())
    }

    /// Keeps `training_pct` percent of the samples and returns the rest.
    pub fn split(&mut self, training_pct: u32, random: &mut Random) -> Result<Self> {
        check_percentage(training_pct)?;
        let mut indices: Vec<usize> = (0..self.samples.len()).collect();
        random.shuffle(&mut indices);
        let hold_out = indices.split_off(training_share(indices.len(), training_pct));
        let held = self.subset(&hold_out);
        *self = self.subset(&indices);
        Ok(held)
    }

    /// Resamples `num_samples` samples with replacement.
    #[must_use]
    pub fn bootstrap(&self, num_samples: usize, random: &mut Random) -> Self {
        self.subset(&random.sample_with_replacement(self.samples.len(), num_samples))
    }

    /// Per-dimension range of the inputs.
    #[must_use]
    pub fn input_ranges(&self) -> Vec<MinMax> {
        util::ranges(self.inputs(), self.num_input_dimensions)
    }

    /// Per-dimension range of the targets.
    #[must_use]
    pub fn target_ranges(&self) -> Vec<MinMax> {
        util::ranges(
            self.samples.iter().map(|s| s.label.as_slice()),
            self.num_target_dimensions,
        )
    }

    /// Scales inputs and targets with the given ranges.
    pub fn scale_with(
        &mut self,
        input_ranges: &[MinMax],
        target_ranges: &[MinMax],
        min: f64,
        max: f64,
    ) {
        for sample in &mut self.samples {
            util::scale_vector(&mut sample.features, input_ranges, min, max);
            util::scale_vector(&mut sample.label, target_ranges, min, max);
        }
    }

    /// Inputs and targets as matrices.
    #[must_use]
    pub fn to_matrices(&self) -> (Array2<f64>, Array2<f64>) {
        let rows = self.samples.len();
        let inputs: Vec<f64> = self
            .samples
            .iter()
            .flat_map(|s| s.features.iter().copied())
            .collect();
        let targets: Vec<f64> = self
            .samples
            .iter()
            .flat_map(|s| s.label.iter().copied())
            .collect();
        (
            Array2::from_shape_vec((rows, self.num_input_dimensions), inputs)
                .unwrap_or_else(|_| Array2::zeros((0, self.num_input_dimensions))),
            Array2::from_shape_vec((rows, self.num_target_dimensions), targets)
                .unwrap_or_else(|_| Array2::zeros((0, self.num_target_dimensions))),
        )
    }

    /// Writes the dataset as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        save_json(self, path.as_ref())
    }

    /// Reads a dataset written by [`Self::save`].
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let data: Self = load_json(path.as_ref())?;
        let malformed = data.samples.iter().any(|s| {
            s.features.len() != data.num_input_dimensions
                || s.label.len() != data.num_target_dimensions
        });
        anyhow::ensure!(!malformed, "sample shape disagrees with the dataset header");
        Ok(data)
    }

    fn subset(&self, indices: &[usize]) -> Self {
        Self {
            name: self.name.clone(),
            num_input_dimensions: self.num_input_dimensions,
            num_target_dimensions: self.num_target_dimensions,
            samples: indices
                .iter()
                .filter_map(|i| self.samples.get(*i).cloned())
                .collect(),
        }
    }
}

impl Dataset for RegressionData {
    fn num_samples(&self) -> usize {
        self.samples.len()
    }

    fn num_dimensions(&self) -> usize {
        self.num_input_dimensions
    }

    fn input(&self, index: usize) -> &[f64] {
        &self.samples[index].features
    }

    fn with_inputs(&self, inputs: Vec<Vec<f64>>) -> Result<Self> {
        let num_input_dimensions = replacement_dimensions(self.samples.len(), &inputs)?;
        Ok(Self {
            name: self.name.clone(),
            num_input_dimensions,
            num_target_dimensions: self.num_target_dimensions,
            samples: self
                .samples
                .iter()
                .zip(inputs)
                .map(|(sample, features)| Sample::new(features, sample.label.clone()))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn line(n: usize) -> RegressionData {
        let mut data = RegressionData::new(1, 1);
        for i in 0..n {
            let x = i as f64;
            data.add_sample(vec![x], vec![2.0 * x + 1.0]).unwrap();
        }
        data
    }

    #[test]
    fn shapes_are_enforced() {
        let mut data = line(3);
        assert!(data.add_sample(vec![1.0, 2.0], vec![1.0]).is_err());
        assert!(data.add_sample(vec![1.0], vec![1.0, 2.0]).is_err());
        assert_eq!(data.num_samples(), 3);
    }

    #[test]
    fn split_and_merge_conserve_samples() {
        let mut data = line(10);
        let held = data.split(80, &mut Random::with_seed(3)).unwrap();
        assert_eq!((data.num_samples(), held.num_samples()), (8, 2));
        data.merge(&held).unwrap();
        assert_eq!(data.num_samples(), 10);
        assert!(data.merge(&RegressionData::new(1, 2)).is_ok());
    }

    #[test]
    fn ranges_cover_targets() {
        let data = line(4);
        assert_eq!(data.input_ranges()[0], MinMax::new(0.0, 3.0));
        assert_eq!(data.target_ranges()[0], MinMax::new(1.0, 7.0));
        let (inputs, targets) = data.to_matrices();
        assert_eq!(inputs.shape(), &[4, 1]);
        assert_eq!(targets[[3, 0]], 7.0);
    }

    #[test]
    fn bootstrap_draws_requested_size() {
        assert_eq!(line(5).bootstrap(12, &mut Random::with_seed(1)).num_samples(), 12);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("line.json");
        let data = line(4);
        data.save(&path).unwrap();
        assert_eq!(RegressionData::load(&path).unwrap().samples(), data.samples());
    }
}
