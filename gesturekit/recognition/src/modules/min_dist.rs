use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    classifier::{likelihoods_from_distances, ClassPrediction, Classifier, NullRejection},
    data::{ClassificationData, Dataset, NULL_CLASS_LABEL},
    error::{ModuleError, Result},
    module::{check_dimensions, Module, ModuleBase},
    persist::{decode_block, encode_block},
    util::{self, MinMax},
};

/// Hyperparameters of [`MinDist`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinDistSettings {
    /// Scale inputs into `[0, 1]` with the training ranges.
    pub use_scaling: bool,
    /// Null-rejection options.
    pub null_rejection: NullRejection,
}

/// Centroid and in-class distance statistics of one class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ClassModel {
    label: u32,
    centroid: Vec<f64>,
    mean_distance: f64,
    std_distance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct MinDistState {
    num_dimensions: usize,
    ranges: Option<Vec<MinMax>>,
    classes: Vec<ClassModel>,
    thresholds: Vec<f64>,
}

impl MinDistState {
    /// Checks the cross-field shape a decoded state must have before use.
    fn validate(&self) -> Result<()> {
        let invalid = |what: &str| Err(ModuleError::InvalidData(format!("MinDist state: {what}")));
        if self.num_dimensions == 0 || self.classes.is_empty() {
            return invalid("no trained classes");
        }
        if !self.classes.windows(2).all(|pair| pair[0].label < pair[1].label) {
            return invalid("class labels must be strictly increasing");
        }
        if self.thresholds.len() != self.classes.len() {
            return invalid("threshold count does not match the class count");
        }
        if self
            .ranges
            .as_ref()
            .is_some_and(|ranges| ranges.len() != self.num_dimensions)
        {
            return invalid("ranges do not match the input dimensions");
        }
        if self
            .classes
            .iter()
            .any(|class| class.centroid.len() != self.num_dimensions)
        {
            return invalid("centroid width does not match the input dimensions");
        }
        Ok(())
    }
}

/// Minimum-distance classifier: one centroid per class.
#[derive(Debug, Clone)]
pub struct MinDist {
    base: ModuleBase,
    settings: MinDistSettings,
    state: Option<MinDistState>,
    prediction: Option<ClassPrediction>,
}

impl Default for MinDist {
    fn default() -> Self {
        Self::new(MinDistSettings::default())
    }
}

impl MinDist {
    /// Registry id.
    pub const ID: &'static str = "MinDist";

    /// Creates an untrained classifier.
    #[must_use]
    pub fn new(settings: MinDistSettings) -> Self {
        Self {
            base: ModuleBase::new(Self::ID),
            settings,
            state: None,
            prediction: None,
        }
    }

    /// Current hyperparameters.
    #[must_use]
    pub const fn settings(&self) -> &MinDistSettings {
        &self.settings
    }

    /// Trained centroids in class label order.
    #[must_use]
    pub fn centroids(&self) -> Vec<Vec<f64>> {
        self.state
            .as_ref()
            .map(|state| state.classes.iter().map(|c| c.centroid.clone()).collect())
            .unwrap_or_default()
    }

    fn fit(&self, data: &ClassificationData) -> Result<MinDistState> {
        self.settings.null_rejection.validate()?;
        if data.is_empty() {
            return Err(ModuleError::EmptyDataset);
        }
        let ranges = self.settings.use_scaling.then(|| data.ranges());
        let mut classes = Vec::new();
        for entry in data.class_tracker().iter().filter(|entry| entry.count > 0) {
            let rows: Vec<Vec<f64>> = data
                .samples()
                .iter()
                .filter(|s| s.label == entry.label)
                .map(|s| util::scale_to_unit(&s.features, ranges.as_deref()))
                .collect();
            let centroid: Vec<f64> = (0..data.num_dimensions())
                .map(|dim| util::mean(&rows.iter().map(|row| row[dim]).collect::<Vec<_>>()))
                .collect();
            let distances: Vec<f64> = rows
                .iter()
                .map(|row| util::euclidean_distance(row, &centroid))
                .collect();
            classes.push(ClassModel {
                label: entry.label,
                centroid,
                mean_distance: util::mean(&distances),
                std_distance: util::std_dev(&distances),
            });
        }
        let mut state = MinDistState {
            num_dimensions: data.num_dimensions(),
            ranges,
            classes,
            thresholds: Vec::new(),
        };
        state.thresholds = thresholds(&state.classes, &self.settings.null_rejection);
        Ok(state)
    }
}

fn thresholds(classes: &[ClassModel], null_rejection: &NullRejection) -> Vec<f64> {
    classes
        .iter()
        .map(|class| null_rejection.threshold(class.mean_distance, class.std_distance))
        .collect()
}

impl Module for MinDist {
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
        let settings: MinDistSettings = decode_block(settings, "settings")?;
        settings.null_rejection.validate()?;
        let state: Option<MinDistState> = state.map(|s| decode_block(s, "state")).transpose()?;
        if let Some(state) = &state {
            state.validate()?;
        }
        self.settings = settings;
        self.state = state;
        self.prediction = None;
        Ok(())
    }
}

impl Classifier for MinDist {
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
        let result = self.classify(input);
        let result = result.map(|prediction| {
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
            .map(|state| state.classes.iter().map(|c| c.label).collect())
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
            state.thresholds = thresholds(&state.classes, &self.settings.null_rejection);
        }
    }

    fn null_rejection_thresholds(&self) -> Vec<f64> {
        self.state
            .as_ref()
            .map(|state| state.thresholds.clone())
            .unwrap_or_default()
    }
}

impl MinDist {
    fn classify(&self, input: &[f64]) -> Result<ClassPrediction> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| ModuleError::NotTrained(Self::ID.into()))?;
        check_dimensions(state.num_dimensions, input)?;
        let scaled = util::scale_to_unit(input, state.ranges.as_deref());
        let labels: Vec<u32> = state.classes.iter().map(|c| c.label).collect();
        let distances = state
            .classes
            .iter()
            .map(|class| util::euclidean_distance(&scaled, &class.centroid))
            .collect();
        let mut prediction = likelihoods_from_distances(&labels, distances);
        if self.settings.null_rejection.enabled {
            if let Some(best) = labels.iter().position(|l| *l == prediction.label) {
                let threshold = state.thresholds.get(best).copied().ok_or_else(|| {
                    ModuleError::InvalidData(format!(
                        "MinDist has no threshold for class {}",
                        prediction.label
                    ))
                })?;
                if prediction.distances[best] > threshold {
                    prediction.label = NULL_CLASS_LABEL;
                }
            }
        }
        Ok(prediction)
    }
}
