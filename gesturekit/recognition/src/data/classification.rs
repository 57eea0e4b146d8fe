use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::{
    check_percentage, load_json, replacement_dimensions, save_json, training_share, Dataset,
    Sample, NULL_CLASS_LABEL,
};
use crate::{
    error::{ModuleError, Result},
    random::Random,
    util::{self, MinMax},
};

/// Per-class bookkeeping entry, kept sorted by label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassTracker {
    /// Class id.
    pub label: u32,
    /// Display name.
    pub name: String,
    /// Number of samples with this label.
    pub count: usize,
}

impl ClassTracker {
    fn new(label: u32, name: impl Into<String>) -> Self {
        Self {
            label,
            name: name.into(),
            count: 0,
        }
    }
}

/// Labelled samples for classifier training and testing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassificationData {
    name: String,
    num_dimensions: usize,
    #[serde(default)]
    allow_null_gesture_class: bool,
    samples: Vec<Sample<u32>>,
    class_tracker: Vec<ClassTracker>,
    #[serde(skip)]
    folds: Option<Vec<Vec<usize>>>,
}

impl ClassificationData {
    /// Creates an empty dataset of the given dimensionality.
    #[must_use]
    pub fn new(num_dimensions: usize) -> Self {
        Self {
            name: "NOT_SET".into(),
            num_dimensions,
            ..Self::default()
        }
    }

    /// Creates an empty named dataset.
    #[must_use]
    pub fn with_name(num_dimensions: usize, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::new(num_dimensions)
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

    /// Whether class 0 samples are accepted.
    #[must_use]
    pub const fn allow_null_gesture_class(&self) -> bool {
        self.allow_null_gesture_class
    }

    /// Accepts or refuses samples labelled with the null class.
    pub fn set_allow_null_gesture_class(&mut self, allow: bool) {
        self.allow_null_gesture_class = allow;
    }

    /// Changes the dimensionality; only valid while the dataset is empty.
    pub fn set_num_dimensions(&mut self, num_dimensions: usize) -> Result<()> {
        if !self.samples.is_empty() {
            return Err(ModuleError::Precondition(
                "cannot change dimensionality of a non-empty dataset".into(),
            ));
        }
        self.num_dimensions = num_dimensions;
        Ok(())
    }

    /// Stored samples.
    #[must_use]
    pub fn samples(&self) -> &[Sample<u32>] {
        &self.samples
    }

    /// Sample at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Sample<u32>> {
        self.samples.get(index)
    }

    /// Appends a labelled sample.
    ///
    /// An empty dataset adopts the dimensionality of its first sample.
    pub fn add_sample(&mut self, label: u32, features: Vec<f64>) -> Result<()> {
        if label == NULL_CLASS_LABEL && !self.allow_null_gesture_class {
            return Err(ModuleError::InvalidData(
                "class label 0 is reserved for the null gesture class".into(),
            ));
        }
        if features.len() != self.num_dimensions {
            if !self.samples.is_empty() {
                return Err(ModuleError::DimensionMismatch {
                    expected: self.num_dimensions,
                    actual: features.len(),
                });
            }
            self.num_dimensions = features.len();
        }
        self.samples.push(Sample::new(features, label));
        self.tracker_entry(label).count += 1;
        self.folds = None;
        Ok(())
    }

    /// Removes and returns the sample at `index`.
    pub fn remove_sample(&mut self, index: usize) -> Result<Sample<u32>> {
        if index >= self.samples.len() {
            return Err(ModuleError::InvalidData(format!(
                "sample index {index} out of range ({} samples)",
                self.samples.len()
            )));
        }
        let sample = self.samples.remove(index);
        if let Some(entry) = self.tracker_mut(sample.label) {
            entry.count = entry.count.saturating_sub(1);
            if entry.count == 0 {
                self.class_tracker.retain(|entry| entry.label != sample.label);
            }
        }
        self.folds = None;
        Ok(sample)
    }

    /// Removes every sample.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.class_tracker.clear();
        self.folds = None;
    }

    /// Registers a class without samples; returns false when it already exists.
    pub fn add_class(&mut self, label: u32, name: impl Into<String>) -> bool {
        if self.class_index(label).is_some() {
            return false;
        }
        let pos = self.class_tracker.partition_point(|entry| entry.label < label);
        self.class_tracker.insert(pos, ClassTracker::new(label, name));
        true
    }

    /// Removes every sample of `label`; returns how many were removed.
    pub fn remove_class(&mut self, label: u32) -> usize {
        let before = self.samples.len();
        self.samples.retain(|sample| sample.label != label);
        self.class_tracker.retain(|entry| entry.label != label);
        self.folds = None;
        before - self.samples.len()
    }

    /// Moves every sample of `old` to `new`, merging with an existing class.
    pub fn relabel(&mut self, old: u32, new: u32) -> Result<()> {
        if new == NULL_CLASS_LABEL && !self.allow_null_gesture_class {
            return Err(ModuleError::InvalidData(
                "cannot relabel into the null gesture class".into(),
            ));
        }
        let Some(index) = self.class_index(old) else {
            return Err(ModuleError::InvalidData(format!("unknown class label {old}")));
        };
        if old == new {
            return Ok(());
        }
        let moved = self.class_tracker.remove(index);
        for sample in self.samples.iter_mut().filter(|s| s.label == old) {
            sample.label = new;
        }
        if let Some(entry) = self.tracker_mut(new) {
            entry.count += moved.count;
        } else {
            let pos = self.class_tracker.partition_point(|entry| entry.label < new);
            self.class_tracker.insert(
                pos,
                ClassTracker {
                    label: new,
                    name: moved.name,
                    count: moved.count,
                },
            );
        }
        self.folds = None;
        Ok(())
    }

    /// Sets the display name of an existing class.
    pub fn set_class_name(&mut self, label: u32, name: impl Into<String>) -> Result<()> {
        let entry = self
            .tracker_mut(label)
            .ok_or_else(|| ModuleError::InvalidData(format!("unknown class label {label}")))?;
        entry.name = name.into();
        Ok(())
    }

    /// Class table, sorted by label.
    #[must_use]
    pub fn class_tracker(&self) -> &[ClassTracker] {
        &self.class_tracker
    }

    /// Sorted class ids.
    #[must_use]
    pub fn class_labels(&self) -> Vec<u32> {
        self.class_tracker.iter().map(|entry| entry.label).collect()
    }

    /// Number of classes in the table.
    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.class_tracker.len()
    }

    /// Sample count per class, in class table order.
    #[must_use]
    pub fn num_samples_per_class(&self) -> Vec<usize> {
        self.class_tracker.iter().map(|entry| entry.count).collect()
    }

    /// Position of `label` in the class table.
    #[must_use]
    pub fn class_index(&self, label: u32) -> Option<usize> {
        self.class_tracker
            .binary_search_by_key(&label, |entry| entry.label)
            .ok()
    }

    /// Appends every sample of `other`; dimensionality must agree.
    pub fn merge(&mut self, other: &Self) -> Result<()> {
        if !self.samples.is_empty() && other.num_dimensions != self.num_dimensions {
            return Err(ModuleError::DimensionMismatch {
                expected: self.num_dimensions,
                actual: other.num_dimensions,
            });
        }
        if other.samples.iter().any(|s| s.label == NULL_CLASS_LABEL)
            && !self.allow_null_gesture_class
        {
            return Err(ModuleError::InvalidData(
                "merged dataset contains null class samples".into(),
            ));
        }
        if self.samples.is_empty() {
            self.num_dimensions = other.num_dimensions;
        }
        for sample in &other.samples {
            self.samples.push(sample.clone());
            self.tracker_entry(sample.label).count += 1;
        }
        for entry in &other.class_tracker {
            self.add_class(entry.label, entry.name.clone());
            if let Some(mine) = self.tracker_mut(entry.label) {
                if mine.name.is_empty() || mine.name == default_class_name(entry.label) {
                    mine.name.clone_from(&entry.name);
                }
            }
        }
        self.folds = None;
        Ok(())
    }

    /// Keeps `training_pct` percent of the samples and returns the rest.
    ///
    /// A stratified split keeps `floor(n_k * pct / 100)` samples of every
    /// class `k`; a plain split applies the same floor to the whole set.
    pub fn split(
        &mut self,
        training_pct: u32,
        stratified: bool,
        random: &mut Random,
    ) -> Result<Self> {
        check_percentage(training_pct)?;
        let mut keep = Vec::new();
        let mut hold_out = Vec::new();
        if stratified {
            for label in self.class_labels() {
                let mut indices = self.indices_of(label);
                random.shuffle(&mut indices);
                let share = training_share(indices.len(), training_pct);
                hold_out.extend(indices.split_off(share));
                keep.extend(indices);
            }
        } else {
            let mut indices: Vec<usize> = (0..self.samples.len()).collect();
            random.shuffle(&mut indices);
            let share = training_share(indices.len(), training_pct);
            hold_out.extend(indices.split_off(share));
            keep.extend(indices);
        }
        let held = self.subset(&hold_out);
        *self = self.subset(&keep);
        Ok(held)
    }

    /// Partitions the sample indices into `k` folds.
    pub fn split_into_k_folds(&mut self, k: usize, stratified: bool, random: &mut Random) -> Result<()> {
        if k == 0 || k > self.samples.len() {
            return Err(ModuleError::invalid(
                "k",
                format!(
                    "must be between 1 and the number of samples ({})",
                    self.samples.len()
                ),
            ));
        }
        let mut folds = vec![Vec::new(); k];
        let mut fold = 0;
        let mut assign = |indices: Vec<usize>, folds: &mut Vec<Vec<usize>>| {
            for index in indices {
                folds[fold].push(index);
                fold = (fold + 1) % k;
            }
        };
        if stratified {
            for label in self.class_labels() {
                let mut indices = self.indices_of(label);
                random.shuffle(&mut indices);
                assign(indices, &mut folds);
            }
        } else {
            let mut indices: Vec<usize> = (0..self.samples.len()).collect();
            random.shuffle(&mut indices);
            assign(indices, &mut folds);
        }
        self.folds = Some(folds);
        Ok(())
    }

    /// Number of folds from the last [`Self::split_into_k_folds`].
    #[must_use]
    pub fn num_folds(&self) -> usize {
        self.folds.as_ref().map_or(0, Vec::len)
    }

    /// Every sample outside fold `index`.
    pub fn training_fold(&self, index: usize) -> Result<Self> {
        let folds = self.folds_checked(index)?;
        let indices: Vec<usize> = folds
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .flat_map(|(_, fold)| fold.iter().copied())
            .collect();
        Ok(self.subset(&indices))
    }

    /// The samples of fold `index`.
    pub fn test_fold(&self, index: usize) -> Result<Self> {
        let folds = self.folds_checked(index)?;
        Ok(self.subset(&folds[index]))
    }

    /// Samples of a single class.
    #[must_use]
    pub fn class_data(&self, label: u32) -> Self {
        self.subset(&self.indices_of(label))
    }

    /// Resamples `num_samples` samples with replacement.
    ///
    /// Every class of the source table stays in the result's table.
    #[must_use]
    pub fn bootstrap(&self, num_samples: usize, random: &mut Random) -> Self {
        let picks = random.sample_with_replacement(self.samples.len(), num_samples);
        self.subset(&picks)
    }

    /// Per-dimension min/max over every sample.
    #[must_use]
    pub fn ranges(&self) -> Vec<MinMax> {
        util::ranges(self.inputs(), self.num_dimensions)
    }

    /// Scales every input into `[min, max]` using the dataset's own ranges.
    pub fn scale(&mut self, min: f64, max: f64) -> Vec<MinMax> {
        let ranges = self.ranges();
        self.scale_with(&ranges, min, max);
        ranges
    }

    /// Scales every input into `[min, max]` using externally supplied ranges.
    pub fn scale_with(&mut self, ranges: &[MinMax], min: f64, max: f64) {
        for sample in &mut self.samples {
            util::scale_vector(&mut sample.features, ranges, min, max);
        }
    }

    /// Per-dimension mean.
    #[must_use]
    pub fn mean(&self) -> Vec<f64> {
        self.column_stat(util::mean)
    }

    /// Per-dimension sample standard deviation.
    #[must_use]
    pub fn std_dev(&self) -> Vec<f64> {
        self.column_stat(util::std_dev)
    }

    /// Inputs as a `(samples, dimensions)` matrix.
    #[must_use]
    pub fn to_matrix(&self) -> Array2<f64> {
        let flat: Vec<f64> = self
            .samples
            .iter()
            .flat_map(|s| s.features.iter().copied())
            .collect();
        Array2::from_shape_vec((self.samples.len(), self.num_dimensions), flat)
            .unwrap_or_else(|_| Array2::zeros((0, self.num_dimensions)))
    }

    /// Labels in sample order.
    #[must_use]
    pub fn labels(&self) -> Vec<u32> {
        self.samples.iter().map(|s| s.label).collect()
    }

    /// Synthetic dataset with one gaussian blob per class.
    ///
    /// Class centres are drawn uniformly from `[-range, range]` per dimension
    /// and samples are spread around them with standard deviation `sigma`.
    /// Labels run from 1 to `num_classes`.
    pub fn generate_gauss(
        num_samples: usize,
        num_classes: usize,
        num_dimensions: usize,
        range: f64,
        sigma: f64,
        random: &mut Random,
    ) -> Result<Self> {
        if num_classes == 0 || num_dimensions == 0 {
            return Err(ModuleError::invalid(
                "num_classes",
                "classes and dimensions must be non-zero",
            ));
        }
        let labels = u32::try_from(num_classes)
            .map_err(|_| ModuleError::invalid("num_classes", "too many classes"))?;
        let centres: Vec<Vec<f64>> = (0..num_classes)
            .map(|_| {
                (0..num_dimensions)
                    .map(|_| random.uniform(-range, range))
                    .collect()
            })
            .collect();
        let mut data = Self::with_name(num_dimensions, "gauss");
        for _ in 0..num_samples {
            let class = random.int(0, num_classes);
            let features = centres[class]
                .iter()
                .map(|centre| random.gauss(*centre, sigma))
                .collect();
            data.add_sample(class as u32 + 1, features)?;
        }
        for label in 1..=labels {
            data.add_class(label, default_class_name(label));
        }
        Ok(data)
    }

    /// Writes the dataset as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        save_json(self, path.as_ref())
    }

    /// Reads a dataset written by [`Self::save`].
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let data: Self = load_json(path.as_ref())?;
        if let Some(sample) = data
            .samples
            .iter()
            .find(|s| s.features.len() != data.num_dimensions)
        {
            anyhow::bail!(
                "sample has {} dimensions, dataset declares {}",
                sample.features.len(),
                data.num_dimensions
            );
        }
        if let Some(sample) = data
            .samples
            .iter()
            .find(|s| data.class_index(s.label).is_none())
        {
            anyhow::bail!("sample label {} missing from the class table", sample.label);
        }
        Ok(data)
    }

    fn tracker_mut(&mut self, label: u32) -> Option<&mut ClassTracker> {
        let index = self.class_index(label)?;
        self.class_tracker.get_mut(index)
    }

    fn tracker_entry(&mut self, label: u32) -> &mut ClassTracker {
        let pos = match self
            .class_tracker
            .binary_search_by_key(&label, |entry| entry.label)
        {
            Ok(pos) => pos,
            Err(pos) => {
                self.class_tracker
                    .insert(pos, ClassTracker::new(label, default_class_name(label)));
                pos
            }
        };
        &mut self.class_tracker[pos]
    }

    fn indices_of(&self, label: u32) -> Vec<usize> {
        self.samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.label == label)
            .map(|(i, _)| i)
            .collect()
    }

    /// Copy holding the samples at `indices`, keeping the full class table.
    fn subset(&self, indices: &[usize]) -> Self {
        let mut class_tracker: Vec<ClassTracker> = self
            .class_tracker
            .iter()
            .map(|entry| ClassTracker {
                count: 0,
                ..entry.clone()
            })
            .collect();
        let samples: Vec<Sample<u32>> = indices
            .iter()
            .filter_map(|i| self.samples.get(*i).cloned())
            .collect();
        for sample in &samples {
            if let Ok(pos) = class_tracker.binary_search_by_key(&sample.label, |e| e.label) {
                class_tracker[pos].count += 1;
            }
        }
        Self {
            name: self.name.clone(),
            num_dimensions: self.num_dimensions,
            allow_null_gesture_class: self.allow_null_gesture_class,
            samples,
            class_tracker,
            folds: None,
        }
    }

    fn folds_checked(&self, index: usize) -> Result<&Vec<Vec<usize>>> {
        let folds = self.folds.as_ref().ok_or_else(|| {
            ModuleError::Precondition("dataset has not been split into folds".into())
        })?;
        if index >= folds.len() {
            return Err(ModuleError::InvalidData(format!(
                "fold {index} out of range ({} folds)",
                folds.len()
            )));
        }
        Ok(folds)
    }

    fn column_stat(&self, stat: fn(&[f64]) -> f64) -> Vec<f64> {
        (0..self.num_dimensions)
            .map(|dim| {
                let column: Vec<f64> = self.samples.iter().map(|s| s.features[dim]).collect();
                stat(&column)
            })
            .collect()
    }
}

fn default_class_name(label: u32) -> String {
    format!("CLASS_{label}")
}

impl Dataset for ClassificationData {
    fn num_samples(&self) -> usize {
        self.samples.len()
    }

    fn num_dimensions(&self) -> usize {
        self.num_dimensions
    }

    fn input(&self, index: usize) -> &[f64] {
        &self.samples[index].features
    }

    fn with_inputs(&self, inputs: Vec<Vec<f64>>) -> Result<Self> {
        let num_dimensions = replacement_dimensions(self.samples.len(), &inputs)?;
        let samples = self
            .samples
            .iter()
            .zip(inputs)
            .map(|(sample, features)| Sample::new(features, sample.label))
            .collect();
        Ok(Self {
            name: self.name.clone(),
            num_dimensions,
            allow_null_gesture_class: self.allow_null_gesture_class,
            samples,
            class_tracker: self.class_tracker.clone(),
            folds: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn two_class(per_class: usize) -> ClassificationData {
        let mut data = ClassificationData::new(2);
        for i in 0..per_class {
            let x = i as f64;
            data.add_sample(1, vec![x, 0.0]).unwrap();
            data.add_sample(2, vec![x, 10.0]).unwrap();
        }
        data
    }

    #[test]
    fn null_class_is_rejected_by_default() {
        let mut data = ClassificationData::new(1);
        assert!(data.add_sample(0, vec![1.0]).is_err());
        data.set_allow_null_gesture_class(true);
        data.add_sample(0, vec![1.0]).unwrap();
        assert_eq!(data.class_labels(), vec![0]);
    }

    #[test]
    fn dimension_mismatch_is_refused() {
        let mut data = two_class(2);
        let err = data.add_sample(1, vec![1.0]).unwrap_err();
        assert!(matches!(err, ModuleError::DimensionMismatch { expected: 2, actual: 1 }));
        assert_eq!(data.num_samples(), 4);
    }

    #[test]
    fn empty_dataset_adopts_first_dimensionality() {
        let mut data = ClassificationData::new(0);
        data.add_sample(3, vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(data.num_dimensions(), 3);
    }

    #[test]
    fn tracker_stays_sorted_and_counted() {
        let mut data = ClassificationData::new(1);
        for label in [3, 1, 2, 1] {
            data.add_sample(label, vec![f64::from(label)]).unwrap();
        }
        assert_eq!(data.class_labels(), vec![1, 2, 3]);
        assert_eq!(data.num_samples_per_class(), vec![2, 1, 1]);
        data.remove_sample(2).unwrap();
        assert_eq!(data.class_labels(), vec![1, 3]);
    }

    #[test]
    fn relabel_merges_classes() {
        let mut data = two_class(3);
        data.relabel(2, 1).unwrap();
        assert_eq!(data.class_labels(), vec![1]);
        assert_eq!(data.num_samples_per_class(), vec![6]);
        assert!(data.relabel(9, 1).is_err());
    }

    #[test]
    fn stratified_split_preserves_class_proportions() {
        let mut data = ClassificationData::new(1);
        for i in 0..13 {
            data.add_sample(1, vec![f64::from(i)]).unwrap();
        }
        for i in 0..7 {
            data.add_sample(2, vec![f64::from(i)]).unwrap();
        }
        let mut random = Random::with_seed(5);
        let held = data.split(70, true, &mut random).unwrap();
        // floor(13 * 0.7) = 9, floor(7 * 0.7) = 4
        assert_eq!(data.num_samples_per_class(), vec![9, 4]);
        assert_eq!(held.num_samples_per_class(), vec![4, 3]);
        for (held_count, total) in held.num_samples_per_class().into_iter().zip([13.0, 7.0]) {
            let expected = total * 0.3;
            assert!((held_count as f64 - expected).abs() <= 1.0);
        }
    }

    #[test]
    fn plain_split_floors_overall() {
        let mut data = two_class(5);
        let held = data.split(75, false, &mut Random::with_seed(1)).unwrap();
        assert_eq!(data.num_samples(), 7);
        assert_eq!(held.num_samples(), 3);
        assert!(data.split(101, false, &mut Random::with_seed(1)).is_err());
    }

    #[test]
    fn folds_cover_every_sample_once() {
        let mut data = two_class(6);
        data.split_into_k_folds(4, true, &mut Random::with_seed(2))
            .unwrap();
        let total: usize = (0..4).map(|i| data.test_fold(i).unwrap().num_samples()).sum();
        assert_eq!(total, 12);
        let train = data.training_fold(0).unwrap();
        let test = data.test_fold(0).unwrap();
        assert_eq!(train.num_samples() + test.num_samples(), 12);
        assert!(data.test_fold(4).is_err());
        assert!(data
            .split_into_k_folds(13, false, &mut Random::with_seed(2))
            .is_err());
    }

    #[test]
    fn bootstrap_keeps_class_table() {
        let data = two_class(4);
        let sample = data.bootstrap(20, &mut Random::with_seed(9));
        assert_eq!(sample.num_samples(), 20);
        assert_eq!(sample.class_labels(), vec![1, 2]);
        assert_eq!(sample.num_samples_per_class().iter().sum::<usize>(), 20);
    }

    #[test]
    fn merge_checks_dimensions() {
        let mut data = two_class(2);
        let mut other = ClassificationData::new(2);
        other.add_sample(5, vec![1.0, 1.0]).unwrap();
        other.set_class_name(5, "wave").unwrap();
        data.merge(&other).unwrap();
        assert_eq!(data.class_labels(), vec![1, 2, 5]);
        assert_eq!(data.class_tracker()[2].name, "wave");

        let mut wrong = ClassificationData::new(3);
        wrong.add_sample(1, vec![0.0; 3]).unwrap();
        assert!(data.merge(&wrong).is_err());
    }

    #[test]
    fn scaling_uses_ranges() {
        let mut data = two_class(3);
        let ranges = data.scale(0.0, 1.0);
        assert_eq!(ranges[0], MinMax::new(0.0, 2.0));
        assert!(data
            .inputs()
            .all(|row| row.iter().all(|v| (0.0..=1.0).contains(v))));
        assert_eq!(data.to_matrix().shape(), &[6, 2]);
    }

    #[test]
    fn gauss_generator_labels_from_one() {
        let data =
            ClassificationData::generate_gauss(100, 2, 10, 10.0, 1.0, &mut Random::with_seed(4))
                .unwrap();
        assert_eq!(data.num_samples(), 100);
        assert_eq!(data.num_dimensions(), 10);
        assert_eq!(data.class_labels(), vec![1, 2]);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data/set.json");
        let data = two_class(3);
        data.save(&path).unwrap();
        let loaded = ClassificationData::load(&path).unwrap();
        assert_eq!(loaded.samples(), data.samples());
        assert_eq!(loaded.class_tracker(), data.class_tracker());
        assert!(ClassificationData::load(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn with_inputs_keeps_labels() {
        let data = two_class(2);
        let replaced = data
            .with_inputs(data.inputs().map(|row| vec![row[0] * 2.0]).collect())
            .unwrap();
        assert_eq!(replaced.num_dimensions(), 1);
        assert_eq!(replaced.labels(), data.labels());
    }
}
