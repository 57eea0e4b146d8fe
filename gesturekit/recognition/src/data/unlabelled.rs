use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::{
    check_percentage, load_json, replacement_dimensions, save_json, training_share, Dataset,
};
use crate::{
    error::{ModuleError, Result},
    random::Random,
    util::{self, MinMax},
};

/// Input vectors without labels.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnlabelledData {
    name: String,
    num_dimensions: usize,
    samples: Vec<Vec<f64>>,
}

impl UnlabelledData {
    /// Creates an empty dataset.
    #[must_use]
    pub fn new(num_dimensions: usize) -> Self {
        Self {
            name: "NOT_SET".into(),
            num_dimensions,
            samples: Vec::new(),
        }
    }

    /// Builds a dataset from rows of equal length.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let num_dimensions = replacement_dimensions(rows.len(), &rows)?;
        Ok(Self {
            name: "NOT_SET".into(),
            num_dimensions,
            samples: rows,
        })
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

    /// Stored rows.
    #[must_use]
    pub fn samples(&self) -> &[Vec<f64>] {
        &self.samples
    }

    /// Appends a row; an empty dataset adopts its dimensionality.
    pub fn add_sample(&mut self, features: Vec<f64>) -> Result<()> {
        if features.len() != self.num_dimensions {
            if !self.samples.is_empty() {
                return Err(ModuleError::DimensionMismatch {
                    expected: self.num_dimensions,
                    actual: features.len(),
                });
            }
            self.num_dimensions = features.len();
        }
        self.samples.push(features);
        Ok(())
    }

    /// Removes every row.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Appends every row of `other`.
    pub fn merge(&mut self, other: &Self) -> Result<()> {
        if !self.samples.is_empty() && other.num_dimensions != self.num_dimensions {
            return Err(ModuleError::DimensionMismatch {
                expected: self.num_dimensions,
                actual: other.num_dimensions,
            });
        }
        for row in &other.samples {
            self.add_sample(row.clone())?;
        }
        Ok(())
    }

    /// Keeps `training_pct` percent of the rows and returns the rest.
    pub fn split(&mut self, training_pct: u32, random: &mut Random) -> Result<Self> {
        check_percentage(training_pct)?;
        let mut indices: Vec<usize> = (0..self.samples.len()).collect();
        random.shuffle(&mut indices);
        let hold_out = indices.split_off(training_share(indices.len(), training_pct));
        let held = self.subset(&hold_out);
        *self = self.subset(&indices);
        Ok(held)
    }

    /// Per-dimension min/max.
    #[must_use]
    pub fn ranges(&self) -> Vec<MinMax> {
        util::ranges(self.inputs(), self.num_dimensions)
    }

    /// Scales every row into `[min, max]` with the given ranges.
    pub fn scale_with(&mut self, ranges: &[MinMax], min: f64, max: f64) {
        for row in &mut self.samples {
            util::scale_vector(row, ranges, min, max);
        }
    }

    /// Rows as a `(samples, dimensions)` matrix.
    #[must_use]
    pub fn to_matrix(&self) -> Array2<f64> {
        let flat: Vec<f64> = self.samples.iter().flatten().copied().collect();
        Array2::from_shape_vec((self.samples.len(), self.num_dimensions), flat)
            .unwrap_or_else(|_| Array2::zeros((0, self.num_dimensions)))
    }

    /// Writes the dataset as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        save_json(self, path.as_ref())
    }

    /// Reads a dataset written by [`Self::save`].
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let data: Self = load_json(path.as_ref())?;
        anyhow::ensure!(
            data.samples.iter().all(|row| row.len() == data.num_dimensions),
            "row length disagrees with the dataset header"
        );
        Ok(data)
    }

    fn subset(&self, indices: &[usize]) -> Self {
        Self {
            name: self.name.clone(),
            num_dimensions: self.num_dimensions,
            samples: indices
                .iter()
                .filter_map(|i| self.samples.get(*i).cloned())
                .collect(),
        }
    }
}

impl Dataset for UnlabelledData {
    fn num_samples(&self) -> usize {
        self.samples.len()
    }

    fn num_dimensions(&self) -> usize {
        self.num_dimensions
    }

    fn input(&self, index: usize) -> &[f64] {
        &self.samples[index]
    }

    fn with_inputs(&self, inputs: Vec<Vec<f64>>) -> Result<Self> {
        let num_dimensions = replacement_dimensions(self.samples.len(), &inputs)?;
        Ok(Self {
            name: self.name.clone(),
            num_dimensions,
            samples: inputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rows_must_share_dimensionality() {
        assert!(UnlabelledData::from_rows(vec![vec![1.0], vec![1.0, 2.0]]).is_err());
        let mut data = UnlabelledData::from_rows(vec![vec![1.0, 2.0]]).unwrap();
        assert!(data.add_sample(vec![3.0]).is_err());
        data.add_sample(vec![3.0, 4.0]).unwrap();
        assert_eq!(data.ranges()[1], MinMax::new(2.0, 4.0));
    }

    #[test]
    fn split_conserves_rows() {
        let mut data = UnlabelledData::from_rows((0..9).map(|i| vec![f64::from(i)]).collect())
            .unwrap();
        let held = data.split(50, &mut Random::with_seed(8)).unwrap();
        assert_eq!((data.num_samples(), held.num_samples()), (4, 5));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rows.json");
        let data = UnlabelledData::from_rows(vec![vec![0.5, 1.5], vec![2.5, 3.5]]).unwrap();
        data.save(&path).unwrap();
        let loaded = UnlabelledData::load(&path).unwrap();
        assert_eq!(loaded.samples(), data.samples());
        assert_eq!(loaded.to_matrix()[[1, 0]], 2.5);
    }
}
