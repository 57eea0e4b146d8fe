use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    classifier::{ClassPrediction, Classifier, NullRejection},
    data::{ClassificationData, Dataset, Sample, NULL_CLASS_LABEL},
    error::{ModuleError, Result},
    module::{check_dimensions, Module, ModuleBase},
    persist::{decode_block, encode_block},
    util::{self, MinMax},
};

/// Hyperparameters of [`Knn`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnnSettings {
    /// Number of neighbours consulted per prediction.
    pub k: usize,
    /// Scale inputs into `[0, 1]` with the training ranges.
    pub use_scaling: bool,
    /// Null-rejection options.
    pub null_rejection: NullRejection,
}

impl Default for KnnSettings {
    fn default() -> Self {
        Self {
            k: 10,
            use_scaling: false,
            null_rejection: NullRejection::default(),
        }
    }
}

impl KnnSettings {
    fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(ModuleError::invalid("k", "must be at least 1"));
        }
        self.null_rejection.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct KnnState {
    num_dimensions: usize,
    ranges: Option<Vec<MinMax>>,
    class_labels: Vec<u32>,
    samples: Vec<Sample<u32>>,
    /// Mean and spread of each class's leave-one-out nearest distance.
    class_stats: Vec<(f64, f64)>,
    thresholds: Vec<f64>,
}

impl KnnState {
    /// Checks the cross-field shape a decoded state must have before use.
    fn validate(&self) -> Result<()> {
        let invalid = |what: &str| Err(ModuleError::InvalidData(format!("KNN state: {what}")));
        if self.num_dimensions == 0 || self.samples.is_empty() || self.class_labels.is_empty() {
            return invalid("no trained samples");
        }
        if !self.class_labels.windows(2).all(|pair| pair[0] < pair[1]) {
            return invalid("class labels must be strictly increasing");
        }
        if self.class_stats.len() != self.class_labels.len()
            || self.thresholds.len() != self.class_labels.len()
        {
            return invalid("per-class statistics do not match the class count");
        }
        if self
            .ranges
            .as_ref()
            .is_some_and(|ranges| ranges.len() != self.num_dimensions)
        {
            return invalid("ranges do not match the input dimensions");
        }
        for sample in &self.samples {
            if sample.features.len() != self.num_dimensions {
                return invalid("sample width does not match the input dimensions");
            }
            if self.class_labels.binary_search(&sample.label).is_err() {
                return invalid("sample label is not a known class");
            }
        }
        Ok(())
    }
}

/// K-nearest-neighbour classifier.
#[derive(Debug, Clone)]
pub struct Knn {
    base: ModuleBase,
    settings: KnnSettings,
    state: Option<KnnState>,
    prediction: Option<ClassPrediction>,
}

impl Default for Knn {
    fn default() -> Self {
        Self::new(KnnSettings::default())
    }
}

impl Knn {
    /// Registry id.
    pub const ID: &'static str = "KNN";

    /// Creates an untrained classifier.
    #[must_use]
    pub fn new(settings: KnnSettings) -> Self {
        Self {
            base: ModuleBase::new(Self::ID),
            settings,
            state: None,
            prediction: None,
        }
    }

    /// Convenience constructor setting only `k`.
    #[must_use]
    pub fn with_k(k: usize) -> Self {
        Self::new(KnnSettings {
            k,
            ..KnnSettings::default()
        })
    }

    /// Current hyperparameters.
    #[must_use]
    pub const fn settings(&self) -> &KnnSettings {
        &self.settings
    }

    fn fit(&self, data: &ClassificationData) -> Result<KnnState> {
        self.settings.validate()?;
        if data.is_empty() {
            return Err(ModuleError::EmptyDataset);
        }
        let ranges = self.settings.use_scaling.then(|| data.ranges());
        let samples: Vec<Sample<u32>> = data
            .samples()
            .iter()
            .map(|s| Sample::new(util::scale_to_unit(&s.features, ranges.as_deref()), s.label))
            .collect();
        let class_labels: Vec<u32> = data
            .class_tracker()
            .iter()
            .filter(|entry| entry.count > 0)
            .map(|entry| entry.label)
            .collect();
        let class_stats = class_labels
            .iter()
            .map(|label| {
                let members: Vec<&Sample<u32>> =
                    samples.iter().filter(|s| s.label == *label).collect();
                let nearest: Vec<f64> = members
                    .iter()
                    .enumerate()
                    .filter_map(|(i, sample)| {
                        members
                            .iter()
                            .enumerate()
                            .filter(|(j, _)| *j != i)
                            .map(|(_, other)| {
                                util::euclidean_distance(&sample.features, &other.features)
                            })
                            .min_by(f64::total_cmp)
                    })
                    .collect();
                (util::mean(&nearest), util::std_dev(&nearest))
            })
            .collect();
        let mut state = KnnState {
            num_dimensions: data.num_dimensions(),
            ranges,
            class_labels,
            samples,
            class_stats,
            thresholds: Vec::new(),
        };
        state.thresholds = thresholds(&state.class_stats, &self.settings.null_rejection);
        Ok(state)
    }

    fn classify(&self, input: &[f64]) -> Result<ClassPrediction> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| ModuleError::NotTrained(Self::ID.into()))?;
        check_dimensions(state.num_dimensions, input)?;
        let scaled = util::scale_to_unit(input, state.ranges.as_deref());
        let mut neighbours: Vec<(f64, u32)> = state
            .samples
            .iter()
            .map(|s| (util::euclidean_distance(&scaled, &s.features), s.label))
            .collect();
        neighbours.sort_by(|a, b| a.0.total_cmp(&b.0));
        neighbours.truncate(self.settings.k.min(neighbours.len()));

        let num_classes = state.class_labels.len();
        let mut votes = vec![0.0; num_classes];
        let mut distance_sums = vec![0.0; num_classes];
        for (distance, label) in &neighbours {
            if let Ok(index) = state.class_labels.binary_search(label) {
                votes[index] += 1.0;
                distance_sums[index] += distance;
            }
        }
        let total = neighbours.len() as f64;
        let likelihoods: Vec<f64> = votes.iter().map(|v| v / total).collect();
        let distances: Vec<f64> = votes
            .iter()
            .zip(&distance_sums)
            .map(|(v, d)| if *v > 0.0 { d / v } else { f64::INFINITY })
            .collect();
        let best = util::arg_max(&likelihoods).unwrap_or(0);
        let mut label = state.class_labels[best];
        if self.settings.null_rejection.enabled {
            let threshold = state.thresholds.get(best).copied().ok_or_else(|| {
                ModuleError::InvalidData(format!("KNN has no threshold for class {label}"))
            })?;
            if distances[best] > threshold {
                label = NULL_CLASS_LABEL;
            }
        }
        Ok(ClassPrediction {
            label,
            maximum_likelihood: likelihoods[best],
            likelihoods,
            distances,
        })
    }
}

fn thresholds(stats: &[(f64, f64)], null_rejection: &NullRejection) -> Vec<f64> {
    stats
        .iter()
        .map(|(mu, sigma)| null_rejection.threshold(*mu, *sigma))
        .collect()
}

impl Module for Knn {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn base(&self) -> &ModuleBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ModuleBase {
        &mut self.base
    }

    fn trained(&self) -> bool {
        self.state.is_some()
    }

    fn clear(&mut self) {
        self.state = None;
        self.prediction = None;
    }

    fn encode_settings(&self) -> Result<Value> {
        encode_block(&self.settings, "settings")
    }

    fn encode_state(&self) -> Result<Option<Value>> {
        self.state
            .as_ref()
            .map(|state| encode_block(state, "state"))
            .transpose()
    }

    fn decode(&mut self, settings: Value, state: Option<Value>) -> Result<()> {
        let settings: KnnSettings = decode_block(settings, "settings")?;
        settings.validate()?;
        let state: Option<KnnState> = state.map(|s| decode_block(s, "state")).transpose()?;
        if let Some(state) = &state {
            state.validate()?;
        }
        self.settings = settings;
        self.state = state;
        self.prediction = None;
        Ok(())
    }
}

impl Classifier for Knn {
    fn train(&mut self, data: &ClassificationData) -> Result<()> {
        self.base
            .training_started(data.num_samples(), data.num_dimensions());
        let outcome = self.fit(data).map(|state| {
            self.state = Some(state);
            self.prediction = None;
        });
        self.base.training_finished(outcome)
    }

    fn predict(&mut self, input: &[f64]) -> Result<u32> {
        let result = self.classify(input).map(|prediction| {
            let label = prediction.label;
            self.prediction = Some(prediction);
            label
        });
        self.base.record(result)
    }

    fn prediction(&self) -> Option<&ClassPrediction> {
        self.prediction.as_ref()
    }

    fn class_labels(&self) -> Vec<u32> {
        self.state
            .as_ref()
            .map(|state| state.class_labels.clone())
            .unwrap_or_default()
    }

    fn num_input_dimensions(&self) -> usize {
        self.state.as_ref().map_or(0, |state| state.num_dimensions)
    }

    fn clone_box(&self) -> Box<dyn Classifier> {
        Box::new(self.clone())
    }

    fn null_rejection(&self) -> Option<&NullRejection> {
        Some(&self.settings.null_rejection)
    }

    fn null_rejection_mut(&mut self) -> Option<&mut NullRejection> {
        Some(&mut self.settings.null_rejection)
    }

    fn update_null_rejection_thresholds(&mut self) {
        if let Some(state) = &mut self.state {
            state.thresholds = thresholds(&state.class_stats, &self.settings.null_rejection);
        }
    }

    fn null_rejection_thresholds(&self) -> Vec<f64> {
        self.state
            .as_ref()
            .map(|state| state.thresholds.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        persist::ModelRecord,
        test_support::{round_trip, three_blobs},
    };

    #[test]
    fn votes_follow_neighbours() {
        let mut knn = Knn::with_k(5);
        knn.train(&three_blobs()).unwrap();
        assert_eq!(knn.predict(&[19.5, 0.3]).unwrap(), 3);
        assert!((knn.maximum_likelihood() - 1.0).abs() < 1e-12);
        let sum: f64 = knn.class_likelihoods().iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn k_larger_than_dataset_is_clamped() {
        let mut data = ClassificationData::new(1);
        data.add_sample(1, vec![0.0]).unwrap();
        data.add_sample(1, vec![0.1]).unwrap();
        data.add_sample(2, vec![5.0]).unwrap();
        let mut knn = Knn::with_k(50);
        knn.train(&data).unwrap();
        assert_eq!(knn.predict(&[4.0]).unwrap(), 1);
        assert!((knn.maximum_likelihood() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn zero_k_is_a_configuration_error() {
        let mut knn = Knn::with_k(0);
        assert!(matches!(
            knn.train(&three_blobs()),
            Err(ModuleError::InvalidParameter { name: "k", .. })
        ));
        assert!(!knn.trained());
    }

    #[test]
    fn null_rejection_uses_neighbour_distance() {
        let mut knn = Knn::with_k(3);
        knn.enable_null_rejection(true).unwrap();
        knn.train(&three_blobs()).unwrap();
        assert_eq!(knn.predict(&[10.0, 0.0]).unwrap(), 2);
        assert_eq!(knn.predict(&[10.0, 40.0]).unwrap(), 0);
        assert_eq!(knn.null_rejection_thresholds().len(), 3);
    }

    #[test]
    fn configure_overrides_k() {
        let mut knn = Knn::default();
        knn.configure(serde_json::json!({ "k": 3 })).unwrap();
        assert_eq!(knn.settings().k, 3);
        assert!(knn.configure(serde_json::json!({ "k": 0 })).is_err());
        assert_eq!(knn.settings().k, 3);
    }

    #[test]
    fn save_load_reproduces_predictions() {
        let mut knn = Knn::new(KnnSettings {
            k: 4,
            use_scaling: true,
            ..KnnSettings::default()
        });
        let data = three_blobs();
        knn.train(&data).unwrap();
        let mut loaded = Knn::default();
        round_trip(&knn, &mut loaded);
        assert_eq!(loaded.settings().k, 4);
        for row in data.inputs() {
            assert_eq!(knn.predict(row).unwrap(), loaded.predict(row).unwrap());
        }
    }

    #[test]
    fn inconsistent_state_is_refused_on_load() {
        let mut knn = Knn::with_k(3);
        knn.enable_null_rejection(true).unwrap();
        knn.train(&three_blobs()).unwrap();
        let valid = ModelRecord::from_module(&knn).unwrap();

        let mut short_thresholds = valid.clone();
        short_thresholds.state.as_mut().unwrap()["thresholds"] = json!([1.0]);
        let mut missing_stats = valid.clone();
        missing_stats.state.as_mut().unwrap()["class_stats"] = json!([]);
        let mut foreign_label = valid.clone();
        foreign_label.state.as_mut().unwrap()["samples"][0]["label"] = json!(42);
        let mut narrow_sample = valid;
        narrow_sample.state.as_mut().unwrap()["samples"][3]["features"] = json!([0.0]);

        for record in [short_thresholds, missing_stats, foreign_label, narrow_sample] {
            let bytes = record.to_bytes().unwrap();
            assert!(matches!(
                knn.load(&mut bytes.as_slice()),
                Err(ModuleError::InvalidData(_))
            ));
            assert_eq!(knn.null_rejection_thresholds().len(), 3);
            assert_eq!(knn.predict(&[10.0, 0.0]).unwrap(), 2);
            assert_eq!(knn.predict(&[10.0, 40.0]).unwrap(), 0);
        }
    }
}
