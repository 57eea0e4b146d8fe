//! Ordered chain of pre-processing, feature extraction, one predictor and
//! post-processing stages, trained and run as a unit.

use std::{
    fmt,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared_logging::LogLevel;
use uuid::Uuid;

use crate::{
    classifier::Classifier,
    clusterer::Clusterer,
    data::{ClassificationData, Dataset, RegressionData, UnlabelledData, NULL_CLASS_LABEL},
    error::{ModuleError, Result},
    feature_extraction::FeatureExtraction,
    metrics::{ConfusionTally, RegressionReport, TestReport},
    module::{check_dimensions, Module, ModuleBase},
    persist::{decode_block, encode_block, NestedRecord},
    postprocessing::PostProcessing,
    preprocessing::PreProcessing,
    random::Random,
    registry,
    regressor::Regressor,
    telemetry::{Telemetry, PIPELINE_VALIDATION, TEST_INSTANCE},
    util,
};

/// Lifecycle of a [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// No predictor set.
    Empty,
    /// A predictor is set but the chain is not trained.
    Configured,
    /// Every stage is trained; `predict` is available.
    Trained,
}

/// Capability of the final stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictorKind {
    /// Trains on [`ClassificationData`].
    Classifier,
    /// Trains on [`RegressionData`].
    Regressor,
    /// Trains on [`UnlabelledData`].
    Clusterer,
}

impl fmt::Display for PredictorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Classifier => "classifier",
            Self::Regressor => "regressor",
            Self::Clusterer => "clusterer",
        })
    }
}

/// The final stage of a pipeline.
#[derive(Debug, Clone)]
pub enum Predictor {
    /// Labels each input with a class.
    Classifier(Box<dyn Classifier>),
    /// Maps each input to an output vector.
    Regressor(Box<dyn Regressor>),
    /// Assigns each input to a cluster.
    Clusterer(Box<dyn Clusterer>),
}

macro_rules! with_predictor {
    ($predictor:expr, $module:ident => $body:expr) => {
        match $predictor {
            Predictor::Classifier($module) => $body,
            Predictor::Regressor($module) => $body,
            Predictor::Clusterer($module) => $body,
        }
    };
}

impl Predictor {
    /// Capability of the wrapped module.
    #[must_use]
    pub const fn kind(&self) -> PredictorKind {
        match self {
            Self::Classifier(_) => PredictorKind::Classifier,
            Self::Regressor(_) => PredictorKind::Regressor,
            Self::Clusterer(_) => PredictorKind::Clusterer,
        }
    }

    /// Registry id of the wrapped module.
    #[must_use]
    pub fn id(&self) -> &'static str {
        with_predictor!(self, module => module.id())
    }

    /// Whether the wrapped module holds a trained model.
    #[must_use]
    pub fn trained(&self) -> bool {
        with_predictor!(self, module => module.trained())
    }

    fn reset(&mut self) -> Result<()> {
        with_predictor!(self, module => module.reset())
    }

    fn clear(&mut self) {
        with_predictor!(self, module => module.clear());
    }

    fn set_telemetry(&mut self, telemetry: &Telemetry) {
        with_predictor!(self, module => module.set_telemetry(telemetry));
    }

    fn capture(&self, with_state: bool) -> Result<PredictorRecord> {
        let record = with_predictor!(self, module => capture_stage(module.as_ref(), with_state))?;
        Ok(PredictorRecord {
            kind: self.kind(),
            record,
        })
    }

    fn restore(record: &PredictorRecord) -> Result<Self> {
        Ok(match record.kind {
            PredictorKind::Classifier => {
                Self::Classifier(record.record.restore(registry::classifiers())?)
            }
            PredictorKind::Regressor => {
                Self::Regressor(record.record.restore(registry::regressors())?)
            }
            PredictorKind::Clusterer => {
                Self::Clusterer(record.record.restore(registry::clusterers())?)
            }
        })
    }
}

/// Output of [`Pipeline::predict`].
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    /// Post-processed class label.
    Class(u32),
    /// Regressor output vector.
    Regression(Vec<f64>),
    /// Cluster label.
    Cluster(u32),
}

impl Prediction {
    /// Class or cluster label.
    #[must_use]
    pub const fn label(&self) -> Option<u32> {
        match self {
            Self::Class(label) | Self::Cluster(label) => Some(*label),
            Self::Regression(_) => None,
        }
    }

    /// Regression output.
    #[must_use]
    pub fn values(&self) -> Option<&[f64]> {
        match self {
            Self::Regression(values) => Some(values),
            _ => None,
        }
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::ClassificationData {}
    impl Sealed for super::RegressionData {}
    impl Sealed for super::UnlabelledData {}
}

/// Borrowed view of a training set by kind.
#[derive(Debug, Clone, Copy)]
pub enum TrainingView<'a> {
    /// Labelled samples.
    Classification(&'a ClassificationData),
    /// Input and target vectors.
    Regression(&'a RegressionData),
    /// Inputs only.
    Unlabelled(&'a UnlabelledData),
}

/// Datasets a pipeline can train on; each kind pairs with one predictor kind.
pub trait TrainingSet: Dataset + sealed::Sealed {
    /// Predictor kind this dataset trains.
    const PREDICTOR: PredictorKind;

    /// Keeps `training_pct` percent and returns the held-out rest.
    fn hold_out(&mut self, training_pct: u32, stratified: bool, random: &mut Random) -> Result<Self>;

    /// Typed view used to dispatch to the predictor.
    fn view(&self) -> TrainingView<'_>;
}

impl TrainingSet for ClassificationData {
    const PREDICTOR: PredictorKind = PredictorKind::Classifier;

    fn hold_out(&mut self, training_pct: u32, stratified: bool, random: &mut Random) -> Result<Self> {
        self.split(training_pct, stratified, random)
    }

    fn view(&self) -> TrainingView<'_> {
        TrainingView::Classification(self)
    }
}

impl TrainingSet for RegressionData {
    const PREDICTOR: PredictorKind = PredictorKind::Regressor;

    fn hold_out(&mut self, training_pct: u32, _stratified: bool, random: &mut Random) -> Result<Self> {
        self.split(training_pct, random)
    }

    fn view(&self) -> TrainingView<'_> {
        TrainingView::Regression(self)
    }
}

impl TrainingSet for UnlabelledData {
    const PREDICTOR: PredictorKind = PredictorKind::Clusterer;

    fn hold_out(&mut self, training_pct: u32, _stratified: bool, random: &mut Random) -> Result<Self> {
        self.split(training_pct, random)
    }

    fn view(&self) -> TrainingView<'_> {
        TrainingView::Unlabelled(self)
    }
}

/// Training options of a [`Pipeline`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineOptions {
    /// Hold out part of the training data and score the trained chain on it.
    pub use_validation_set: bool,
    /// Percentage of samples held out for validation.
    pub validation_set_size: u32,
    /// Hold out the same share of every class.
    pub stratified_validation: bool,
    /// Seed for hold-out and fold sampling; entropy when unset.
    pub random_seed: Option<u64>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            use_validation_set: false,
            validation_set_size: 20,
            stratified_validation: true,
            random_seed: None,
        }
    }
}

impl PipelineOptions {
    fn validate(&self) -> Result<()> {
        if self.validation_set_size == 0 || self.validation_set_size >= 100 {
            return Err(ModuleError::invalid(
                "validation_set_size",
                format!("{} must be within 1..=99", self.validation_set_size),
            ));
        }
        Ok(())
    }
}

/// Per-fold reports of [`Pipeline::train_with_cross_validation`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossValidationReport {
    /// Mean of the fold accuracies (percent).
    pub mean_accuracy: f64,
    /// One report per fold, in fold order.
    pub folds: Vec<TestReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TrainingSummary {
    run_id: Uuid,
    trained_at: DateTime<Utc>,
    input_dimensions: usize,
    num_training_samples: usize,
    training_time: Duration,
    validation_score: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PredictorRecord {
    kind: PredictorKind,
    #[serde(flatten)]
    record: NestedRecord,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StageRecords {
    #[serde(default)]
    preprocessing: Vec<NestedRecord>,
    #[serde(default)]
    feature_extraction: Option<NestedRecord>,
    #[serde(default)]
    predictor: Option<PredictorRecord>,
    #[serde(default)]
    postprocessing: Vec<NestedRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SettingsBlock {
    options: PipelineOptions,
    #[serde(flatten)]
    stages: StageRecords,
}

#[derive(Debug, Serialize, Deserialize)]
struct StateBlock {
    #[serde(flatten)]
    summary: TrainingSummary,
    stages: StageRecords,
}

fn stage_label(kind: &str, index: Option<usize>, id: &str) -> String {
    match index {
        Some(index) => format!("{kind}[{index}] ({id})"),
        None => format!("{kind} ({id})"),
    }
}

fn capture_stage<M: Module + ?Sized>(module: &M, with_state: bool) -> Result<NestedRecord> {
    if with_state {
        NestedRecord::capture(module)
    } else {
        NestedRecord::capture_settings(module)
    }
}

fn unlabelled<D: Dataset>(data: &D) -> Result<UnlabelledData> {
    UnlabelledData::from_rows(data.inputs().map(<[f64]>::to_vec).collect())
}

/// Everything one pass through the chain produced.
struct ChainOutput {
    preprocessed: Vec<f64>,
    features: Vec<f64>,
    raw_label: u32,
    prediction: Prediction,
}

#[derive(Debug, Clone, Default)]
struct Stages {
    preprocessing: Vec<Box<dyn PreProcessing>>,
    feature_extraction: Option<Box<dyn FeatureExtraction>>,
    predictor: Option<Predictor>,
    postprocessing: Vec<Box<dyn PostProcessing>>,
}

impl Stages {
    fn reset(&mut self) -> Result<()> {
        for (index, stage) in self.preprocessing.iter_mut().enumerate() {
            stage
                .reset()
                .map_err(|err| err.in_stage(stage_label("preprocessing", Some(index), stage.id())))?;
        }
        if let Some(stage) = &mut self.feature_extraction {
            stage
                .reset()
                .map_err(|err| err.in_stage(stage_label("feature_extraction", None, stage.id())))?;
        }
        if let Some(predictor) = &mut self.predictor {
            predictor
                .reset()
                .map_err(|err| err.in_stage(stage_label("predictor", None, predictor.id())))?;
        }
        for (index, stage) in self.postprocessing.iter_mut().enumerate() {
            stage
                .reset()
                .map_err(|err| err.in_stage(stage_label("postprocessing", Some(index), stage.id())))?;
        }
        Ok(())
    }

    /// Whether a predictor is set and every stage holds a trained model.
    fn all_trained(&self) -> bool {
        self.predictor.as_ref().is_some_and(Predictor::trained)
            && self.preprocessing.iter().all(|stage| stage.trained())
            && self.feature_extraction.iter().all(|stage| stage.trained())
            && self.postprocessing.iter().all(|stage| stage.trained())
    }

    fn clear(&mut self) {
        self.preprocessing.iter_mut().for_each(|stage| stage.clear());
        if let Some(stage) = &mut self.feature_extraction {
            stage.clear();
        }
        if let Some(predictor) = &mut self.predictor {
            predictor.clear();
        }
        self.postprocessing.iter_mut().for_each(|stage| stage.clear());
    }

    fn set_telemetry(&mut self, telemetry: &Telemetry) {
        self.preprocessing
            .iter_mut()
            .for_each(|stage| stage.set_telemetry(telemetry));
        if let Some(stage) = &mut self.feature_extraction {
            stage.set_telemetry(telemetry);
        }
        if let Some(predictor) = &mut self.predictor {
            predictor.set_telemetry(telemetry);
        }
        self.postprocessing
            .iter_mut()
            .for_each(|stage| stage.set_telemetry(telemetry));
    }

    /// Fits every stage before the predictor, each on the previous stage's
    /// output, and returns the fully transformed dataset.
    fn fit_transform<D: Dataset>(&mut self, mut data: D) -> Result<D> {
        for (index, stage) in self.preprocessing.iter_mut().enumerate() {
            let label = stage_label("preprocessing", Some(index), stage.id());
            let outputs = unlabelled(&data)
                .and_then(|rows| stage.train(&rows))
                .and_then(|()| data.inputs().map(|input| stage.process(input)).collect())
                .map_err(|err| err.in_stage(&label))?;
            data = data.with_inputs(outputs).map_err(|err| err.in_stage(&label))?;
        }
        if let Some(stage) = &mut self.feature_extraction {
            let label = stage_label("feature_extraction", None, stage.id());
            let outputs = unlabelled(&data)
                .and_then(|rows| stage.train(&rows))
                .and_then(|()| {
                    data.inputs()
                        .map(|input| stage.compute_features(input))
                        .collect()
                })
                .map_err(|err| err.in_stage(&label))?;
            data = data.with_inputs(outputs).map_err(|err| err.in_stage(&label))?;
        }
        Ok(data)
    }

    /// Trains the predictor, then the post-processing stages on its labels.
    fn train_predictor<D: TrainingSet>(&mut self, data: &D) -> Result<()> {
        let predictor = self
            .predictor
            .as_mut()
            .ok_or_else(|| ModuleError::Precondition("pipeline has no predictor".into()))?;
        let label = stage_label("predictor", None, predictor.id());
        let class_labels = match (predictor, data.view()) {
            (Predictor::Classifier(classifier), TrainingView::Classification(data)) => {
                classifier.train(data).map(|()| classifier.class_labels())
            }
            (Predictor::Regressor(regressor), TrainingView::Regression(data)) => {
                regressor.train(data).map(|()| Vec::new())
            }
            (Predictor::Clusterer(clusterer), TrainingView::Unlabelled(data)) => {
                clusterer.train(data).map(|()| Vec::new())
            }
            (predictor, _) => Err(ModuleError::Precondition(format!(
                "a {} cannot train on data for a {}",
                predictor.kind(),
                D::PREDICTOR
            ))),
        }
        .map_err(|err| err.in_stage(&label))?;
        for (index, stage) in self.postprocessing.iter_mut().enumerate() {
            stage
                .train(&class_labels)
                .map_err(|err| err.in_stage(stage_label("postprocessing", Some(index), stage.id())))?;
        }
        Ok(())
    }

    /// Runs one input through every stage in transform-only mode.
    fn run(&mut self, input: &[f64]) -> Result<ChainOutput> {
        let mut data = input.to_vec();
        for (index, stage) in self.preprocessing.iter_mut().enumerate() {
            data = stage
                .process(&data)
                .map_err(|err| err.in_stage(stage_label("preprocessing", Some(index), stage.id())))?;
        }
        let preprocessed = data.clone();
        if let Some(stage) = &mut self.feature_extraction {
            data = stage
                .compute_features(&data)
                .map_err(|err| err.in_stage(stage_label("feature_extraction", None, stage.id())))?;
        }
        let predictor = self
            .predictor
            .as_mut()
            .ok_or_else(|| ModuleError::Precondition("pipeline has no predictor".into()))?;
        let label = stage_label("predictor", None, predictor.id());
        let (raw_label, prediction) = match predictor {
            Predictor::Classifier(classifier) => {
                let raw = classifier
                    .predict(&data)
                    .map_err(|err| err.in_stage(&label))?;
                let mut filtered = raw;
                for (index, stage) in self.postprocessing.iter_mut().enumerate() {
                    filtered = stage.process(filtered).map_err(|err| {
                        err.in_stage(stage_label("postprocessing", Some(index), stage.id()))
                    })?;
                }
                (raw, Prediction::Class(filtered))
            }
            Predictor::Regressor(regressor) => {
                let output = regressor
                    .predict(&data)
                    .map_err(|err| err.in_stage(&label))?;
                (NULL_CLASS_LABEL, Prediction::Regression(output))
            }
            Predictor::Clusterer(clusterer) => {
                let cluster = clusterer
                    .predict(&data)
                    .map_err(|err| err.in_stage(&label))?;
                (cluster, Prediction::Cluster(cluster))
            }
        };
        Ok(ChainOutput {
            preprocessed,
            features: data,
            raw_label,
            prediction,
        })
    }

    /// Accuracy (percent) for classification, RMS error for regression.
    fn score<D: TrainingSet>(&mut self, held: &D) -> Result<f64> {
        match held.view() {
            TrainingView::Classification(data) => {
                let mut correct = 0usize;
                for sample in data.samples() {
                    if self.run(&sample.features)?.prediction.label() == Some(sample.label) {
                        correct += 1;
                    }
                }
                Ok(correct as f64 / data.num_samples() as f64 * 100.0)
            }
            TrainingView::Regression(data) => {
                let mut squared_error = 0.0;
                for sample in data.samples() {
                    let prediction = self.run(&sample.features)?.prediction;
                    squared_error +=
                        util::squared_distance(prediction.values().unwrap_or(&[]), &sample.label);
                }
                Ok(
                    RegressionReport::from_squared_error(squared_error, data.num_samples(), Duration::ZERO)
                        .rms_error,
                )
            }
            TrainingView::Unlabelled(_) => Err(ModuleError::Precondition(
                "clustering has no validation score".into(),
            )),
        }
    }

    fn capture(&self, with_state: bool) -> Result<StageRecords> {
        Ok(StageRecords {
            preprocessing: self
                .preprocessing
                .iter()
                .map(|stage| capture_stage(stage.as_ref(), with_state))
                .collect::<Result<_>>()?,
            feature_extraction: self
                .feature_extraction
                .as_ref()
                .map(|stage| capture_stage(stage.as_ref(), with_state))
                .transpose()?,
            predictor: self
                .predictor
                .as_ref()
                .map(|predictor| predictor.capture(with_state))
                .transpose()?,
            postprocessing: self
                .postprocessing
                .iter()
                .map(|stage| capture_stage(stage.as_ref(), with_state))
                .collect::<Result<_>>()?,
        })
    }

    fn restore(records: &StageRecords) -> Result<Self> {
        Ok(Self {
            preprocessing: records
                .preprocessing
                .iter()
                .enumerate()
                .map(|(index, record)| {
                    record.restore(registry::preprocessing()).map_err(|err| {
                        err.in_stage(stage_label("preprocessing", Some(index), &record.type_id))
                    })
                })
                .collect::<Result<_>>()?,
            feature_extraction: records
                .feature_extraction
                .as_ref()
                .map(|record| {
                    record.restore(registry::feature_extraction()).map_err(|err| {
                        err.in_stage(stage_label("feature_extraction", None, &record.type_id))
                    })
                })
                .transpose()?,
            predictor: records
                .predictor
                .as_ref()
                .map(|record| {
                    Predictor::restore(record).map_err(|err| {
                        err.in_stage(stage_label("predictor", None, &record.record.type_id))
                    })
                })
                .transpose()?,
            postprocessing: records
                .postprocessing
                .iter()
                .enumerate()
                .map(|(index, record)| {
                    record.restore(registry::postprocessing()).map_err(|err| {
                        err.in_stage(stage_label("postprocessing", Some(index), &record.type_id))
                    })
                })
                .collect::<Result<_>>()?,
        })
    }
}

/// A trainable chain of modules.
///
/// Training works on deep copies of the stages and commits them only when
/// every stage succeeded, so a failed `train` leaves the pipeline as it was.
#[derive(Debug, Clone)]
pub struct Pipeline {
    base: ModuleBase,
    options: PipelineOptions,
    stages: Stages,
    random: Random,
    summary: Option<TrainingSummary>,
    preprocessed: Vec<f64>,
    features: Vec<f64>,
    predicted_label: u32,
    unprocessed_label: u32,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// Id written into saved pipeline records.
    pub const ID: &'static str = "Pipeline";

    /// Creates an empty pipeline with default options.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: ModuleBase::new(Self::ID),
            options: PipelineOptions::default(),
            stages: Stages::default(),
            random: Random::new(),
            summary: None,
            preprocessed: Vec::new(),
            features: Vec::new(),
            predicted_label: NULL_CLASS_LABEL,
            unprocessed_label: NULL_CLASS_LABEL,
        }
    }

    /// Creates an empty pipeline with validated options.
    pub fn with_options(options: PipelineOptions) -> Result<Self> {
        let mut pipeline = Self::new();
        pipeline.set_options(options)?;
        Ok(pipeline)
    }

    /// Current lifecycle state.
    ///
    /// A stage cleared or reconfigured through [`Pipeline::classifier_mut`]
    /// drops the pipeline back to [`PipelineState::Configured`].
    #[must_use]
    pub fn state(&self) -> PipelineState {
        match (&self.stages.predictor, &self.summary) {
            (None, _) => PipelineState::Empty,
            (Some(_), Some(_)) if self.stages.all_trained() => PipelineState::Trained,
            (Some(_), _) => PipelineState::Configured,
        }
    }

    /// Summary of the current training run, if every stage is still trained.
    fn trained_summary(&self) -> Result<&TrainingSummary> {
        self.summary
            .as_ref()
            .filter(|_| self.stages.all_trained())
            .ok_or_else(|| ModuleError::NotTrained(Self::ID.into()))
    }

    /// Training options.
    #[must_use]
    pub const fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Replaces the training options.
    pub fn set_options(&mut self, options: PipelineOptions) -> Result<()> {
        let result = options.validate().map(|()| {
            self.random = Random::from_optional_seed(options.random_seed);
            self.options = options;
        });
        self.base.record(result)
    }

    /// Appends a pre-processing stage; the pipeline needs retraining.
    pub fn add_preprocessing(&mut self, mut stage: Box<dyn PreProcessing>) -> &mut Self {
        stage.set_telemetry(self.base.telemetry());
        self.stages.preprocessing.push(stage);
        self.invalidate();
        self
    }

    /// Removes the pre-processing stage at `index`.
    pub fn remove_preprocessing(&mut self, index: usize) -> Result<Box<dyn PreProcessing>> {
        let result = if index < self.stages.preprocessing.len() {
            self.invalidate();
            Ok(self.stages.preprocessing.remove(index))
        } else {
            Err(ModuleError::InvalidData(format!(
                "no preprocessing stage at index {index}"
            )))
        };
        self.base.record(result)
    }

    /// Sets (or replaces) the feature extraction stage.
    pub fn set_feature_extraction(&mut self, mut stage: Box<dyn FeatureExtraction>) -> &mut Self {
        stage.set_telemetry(self.base.telemetry());
        self.stages.feature_extraction = Some(stage);
        self.invalidate();
        self
    }

    /// Removes the feature extraction stage.
    pub fn remove_feature_extraction(&mut self) -> Option<Box<dyn FeatureExtraction>> {
        self.invalidate();
        self.stages.feature_extraction.take()
    }

    /// Sets a classifier as the predictor.
    pub fn set_classifier(&mut self, classifier: Box<dyn Classifier>) -> &mut Self {
        self.set_predictor(Predictor::Classifier(classifier))
    }

    /// Sets a regressor as the predictor.
    pub fn set_regressor(&mut self, regressor: Box<dyn Regressor>) -> &mut Self {
        self.set_predictor(Predictor::Regressor(regressor))
    }

    /// Sets a clusterer as the predictor.
    pub fn set_clusterer(&mut self, clusterer: Box<dyn Clusterer>) -> &mut Self {
        self.set_predictor(Predictor::Clusterer(clusterer))
    }

    /// Sets (or replaces) the predictor.
    pub fn set_predictor(&mut self, mut predictor: Predictor) -> &mut Self {
        predictor.set_telemetry(self.base.telemetry());
        self.stages.predictor = Some(predictor);
        self.invalidate();
        self
    }

    /// Appends a post-processing stage; only valid with a classifier.
    pub fn add_postprocessing(&mut self, mut stage: Box<dyn PostProcessing>) -> &mut Self {
        stage.set_telemetry(self.base.telemetry());
        self.stages.postprocessing.push(stage);
        self.invalidate();
        self
    }

    /// Removes every post-processing stage.
    pub fn clear_postprocessing(&mut self) {
        self.stages.postprocessing.clear();
        self.invalidate();
    }

    /// Pre-processing stages in run order.
    #[must_use]
    pub fn preprocessing(&self) -> &[Box<dyn PreProcessing>] {
        &self.stages.preprocessing
    }

    /// The feature extraction stage, if any.
    #[must_use]
    pub fn feature_extraction(&self) -> Option<&dyn FeatureExtraction> {
        self.stages.feature_extraction.as_deref()
    }

    /// The final stage, if set.
    #[must_use]
    pub const fn predictor(&self) -> Option<&Predictor> {
        self.stages.predictor.as_ref()
    }

    /// Post-processing stages in run order.
    #[must_use]
    pub fn postprocessing(&self) -> &[Box<dyn PostProcessing>] {
        &self.stages.postprocessing
    }

    /// The classifier predictor, if that is what the pipeline holds.
    #[must_use]
    pub fn classifier(&self) -> Option<&dyn Classifier> {
        match &self.stages.predictor {
            Some(Predictor::Classifier(classifier)) => Some(classifier.as_ref()),
            _ => None,
        }
    }

    /// Mutable classifier access, e.g. to tune null rejection after training.
    pub fn classifier_mut(&mut self) -> Option<&mut (dyn Classifier + 'static)> {
        match &mut self.stages.predictor {
            Some(Predictor::Classifier(classifier)) => Some(classifier.as_mut()),
            _ => None,
        }
    }

    /// The regressor predictor, if that is what the pipeline holds.
    #[must_use]
    pub fn regressor(&self) -> Option<&dyn Regressor> {
        match &self.stages.predictor {
            Some(Predictor::Regressor(regressor)) => Some(regressor.as_ref()),
            _ => None,
        }
    }

    /// The clusterer predictor, if that is what the pipeline holds.
    #[must_use]
    pub fn clusterer(&self) -> Option<&dyn Clusterer> {
        match &self.stages.predictor {
            Some(Predictor::Clusterer(clusterer)) => Some(clusterer.as_ref()),
            _ => None,
        }
    }

    /// Trains every stage on `data`.
    ///
    /// The dataset kind must match the predictor: classification data for a
    /// classifier, regression data for a regressor, unlabelled data for a
    /// clusterer.
    pub fn train<D: TrainingSet>(&mut self, data: &D) -> Result<()> {
        let started = Instant::now();
        self.base
            .training_started(data.num_samples(), data.num_dimensions());
        let outcome = self.fit(data).map(|(stages, mut summary)| {
            summary.training_time = started.elapsed();
            self.base.log(
                LogLevel::Info,
                "pipeline.trained",
                json!({
                    "run_id": summary.run_id,
                    "samples": summary.num_training_samples,
                    "millis": summary.training_time.as_millis(),
                    "validation_score": summary.validation_score,
                }),
            );
            self.stages = stages;
            self.summary = Some(summary);
            self.clear_outputs();
        });
        self.base.training_finished(outcome)
    }

    fn fit<D: TrainingSet>(&mut self, data: &D) -> Result<(Stages, TrainingSummary)> {
        self.options.validate()?;
        let kind = self
            .stages
            .predictor
            .as_ref()
            .map(Predictor::kind)
            .ok_or_else(|| ModuleError::Precondition("pipeline has no predictor".into()))?;
        if kind != D::PREDICTOR {
            return Err(ModuleError::Precondition(format!(
                "a {kind} cannot train on data for a {}",
                D::PREDICTOR
            )));
        }
        if kind != PredictorKind::Classifier && !self.stages.postprocessing.is_empty() {
            return Err(ModuleError::Precondition(
                "post-processing stages need a classifier".into(),
            ));
        }
        if data.is_empty() {
            return Err(ModuleError::EmptyDataset);
        }
        let run_id = Uuid::new_v4();
        let mut random = match self.options.random_seed {
            Some(seed) => Random::with_seed(seed),
            None => self.random.fork(),
        };
        let mut training = data.clone();
        let validation = if self.options.use_validation_set && kind != PredictorKind::Clusterer {
            Some(training.hold_out(
                100 - self.options.validation_set_size,
                self.options.stratified_validation,
                &mut random,
            )?)
        } else {
            None
        };
        if training.is_empty() {
            return Err(ModuleError::EmptyDataset);
        }
        let num_training_samples = training.num_samples();

        let mut staged = self.stages.clone();
        staged.reset()?;
        let transformed = staged.fit_transform(training)?;
        staged.train_predictor(&transformed)?;

        let validation_score = match validation {
            Some(held) if !held.is_empty() => {
                staged.reset()?;
                let score = staged.score(&held)?;
                self.base.event(
                    PIPELINE_VALIDATION,
                    json!({ "run_id": run_id, "score": score, "samples": held.num_samples() }),
                );
                Some(score)
            }
            _ => None,
        };
        staged.reset()?;
        Ok((
            staged,
            TrainingSummary {
                run_id,
                trained_at: Utc::now(),
                input_dimensions: data.num_dimensions(),
                num_training_samples,
                training_time: Duration::ZERO,
                validation_score,
            },
        ))
    }

    /// Runs one input through the trained chain.
    pub fn predict(&mut self, input: &[f64]) -> Result<Prediction> {
        let result = self.run(input);
        self.base.record(result)
    }

    fn run(&mut self, input: &[f64]) -> Result<Prediction> {
        check_dimensions(self.trained_summary()?.input_dimensions, input)?;
        let output = self.stages.run(input)?;
        self.preprocessed = output.preprocessed;
        self.features = output.features;
        self.unprocessed_label = output.raw_label;
        self.predicted_label = output.prediction.label().unwrap_or(NULL_CLASS_LABEL);
        Ok(output.prediction)
    }

    /// Scores a trained classification pipeline on labelled data.
    pub fn test(&mut self, data: &ClassificationData) -> Result<TestReport> {
        let result = self.run_test(data);
        self.base.record(result)
    }

    fn run_test(&mut self, data: &ClassificationData) -> Result<TestReport> {
        let input_dimensions = self.trained_summary()?.input_dimensions;
        let classifier = self
            .classifier()
            .ok_or_else(|| ModuleError::Precondition("test needs a classifier".into()))?;
        let class_labels = classifier.class_labels();
        let includes_null = classifier.null_rejection().is_some_and(|nr| nr.enabled)
            || !self.stages.postprocessing.is_empty();
        if data.is_empty() {
            return Err(ModuleError::EmptyDataset);
        }
        if data.num_dimensions() != input_dimensions {
            return Err(ModuleError::DimensionMismatch {
                expected: input_dimensions,
                actual: data.num_dimensions(),
            });
        }
        if let Some(label) = data.samples().iter().map(|s| s.label).find(|label| {
            !(class_labels.contains(label) || (includes_null && *label == NULL_CLASS_LABEL))
        }) {
            return Err(ModuleError::InvalidData(format!(
                "test label {label} is unknown to the model"
            )));
        }

        self.stages.reset()?;
        let started = Instant::now();
        let mut tally = ConfusionTally::new(class_labels, includes_null);
        for (index, sample) in data.samples().iter().enumerate() {
            let predicted = self
                .run(&sample.features)?
                .label()
                .unwrap_or(NULL_CLASS_LABEL);
            tally.update(sample.label, predicted)?;
            self.base.event(
                TEST_INSTANCE,
                json!({
                    "index": index,
                    "expected": sample.label,
                    "predicted": predicted,
                    "likelihood": self.maximum_likelihood(),
                }),
            );
        }
        self.stages.reset()?;
        let report = tally.finish(started.elapsed());
        self.base.log(
            LogLevel::Info,
            "pipeline.tested",
            json!({ "summary": report.summary() }),
        );
        Ok(report)
    }

    /// Scores a trained regression pipeline.
    pub fn test_regression(&mut self, data: &RegressionData) -> Result<RegressionReport> {
        let result = self.run_regression_test(data);
        self.base.record(result)
    }

    fn run_regression_test(&mut self, data: &RegressionData) -> Result<RegressionReport> {
        let input_dimensions = self.trained_summary()?.input_dimensions;
        let outputs = self
            .regressor()
            .ok_or_else(|| ModuleError::Precondition("regression test needs a regressor".into()))?
            .num_output_dimensions();
        if data.is_empty() {
            return Err(ModuleError::EmptyDataset);
        }
        if data.num_dimensions() != input_dimensions {
            return Err(ModuleError::DimensionMismatch {
                expected: input_dimensions,
                actual: data.num_dimensions(),
            });
        }
        if data.num_target_dimensions() != outputs {
            return Err(ModuleError::DimensionMismatch {
                expected: outputs,
                actual: data.num_target_dimensions(),
            });
        }
        self.stages.reset()?;
        let started = Instant::now();
        let mut squared_error = 0.0;
        for (index, sample) in data.samples().iter().enumerate() {
            let prediction = self.run(&sample.features)?;
            let output = prediction.values().unwrap_or(&[]);
            squared_error += util::squared_distance(output, &sample.label);
            self.base.event(
                TEST_INSTANCE,
                json!({ "index": index, "expected": sample.label, "predicted": output }),
            );
        }
        self.stages.reset()?;
        Ok(RegressionReport::from_squared_error(
            squared_error,
            data.num_samples(),
            started.elapsed(),
        ))
    }

    /// K-fold cross validation; afterwards the pipeline is trained on all of
    /// `data`. On failure the previous stages are restored.
    pub fn train_with_cross_validation(
        &mut self,
        data: &ClassificationData,
        k: usize,
        stratified: bool,
    ) -> Result<CrossValidationReport> {
        let backup = (self.stages.clone(), self.summary.clone());
        let result = self.cross_validate(data, k, stratified);
        if result.is_err() {
            (self.stages, self.summary) = backup;
            self.clear_outputs();
        }
        self.base.record(result)
    }

    fn cross_validate(
        &mut self,
        data: &ClassificationData,
        k: usize,
        stratified: bool,
    ) -> Result<CrossValidationReport> {
        let mut random = match self.options.random_seed {
            Some(seed) => Random::with_seed(seed),
            None => self.random.fork(),
        };
        let mut folded = data.clone();
        folded.split_into_k_folds(k, stratified, &mut random)?;
        let mut folds = Vec::with_capacity(k);
        for index in 0..k {
            self.train(&folded.training_fold(index)?)?;
            folds.push(self.test(&folded.test_fold(index)?)?);
        }
        self.train(data)?;
        let accuracies: Vec<f64> = folds.iter().map(|report| report.accuracy).collect();
        Ok(CrossValidationReport {
            mean_accuracy: util::mean(&accuracies),
            folds,
        })
    }

    /// Post-processed class (or cluster) label of the last prediction.
    #[must_use]
    pub const fn predicted_class_label(&self) -> u32 {
        self.predicted_label
    }

    /// Classifier label before post-processing.
    #[must_use]
    pub const fn unprocessed_predicted_class_label(&self) -> u32 {
        self.unprocessed_label
    }

    /// Likelihood of the last predicted class or cluster.
    #[must_use]
    pub fn maximum_likelihood(&self) -> f64 {
        match &self.stages.predictor {
            Some(Predictor::Classifier(classifier)) => classifier.maximum_likelihood(),
            Some(Predictor::Clusterer(clusterer)) => clusterer
                .cluster_likelihoods()
                .iter()
                .copied()
                .fold(0.0, f64::max),
            _ => 0.0,
        }
    }

    /// Per-class (or per-cluster) likelihoods of the last prediction.
    #[must_use]
    pub fn class_likelihoods(&self) -> Vec<f64> {
        match &self.stages.predictor {
            Some(Predictor::Classifier(classifier)) => classifier.class_likelihoods(),
            Some(Predictor::Clusterer(clusterer)) => clusterer.cluster_likelihoods().to_vec(),
            _ => Vec::new(),
        }
    }

    /// Class labels of the trained classifier.
    #[must_use]
    pub fn class_labels(&self) -> Vec<u32> {
        self.classifier()
            .map(|classifier| classifier.class_labels())
            .unwrap_or_default()
    }

    /// Output of the last regression.
    #[must_use]
    pub fn regression_data(&self) -> &[f64] {
        match &self.stages.predictor {
            Some(Predictor::Regressor(regressor)) => regressor.regression_data(),
            _ => &[],
        }
    }

    /// Input after the last pre-processing stage of the last prediction.
    #[must_use]
    pub fn preprocessed_data(&self) -> &[f64] {
        &self.preprocessed
    }

    /// Input of the predictor in the last prediction.
    #[must_use]
    pub fn feature_data(&self) -> &[f64] {
        &self.features
    }

    /// Raw input dimensionality the pipeline was trained on; 0 when untrained.
    #[must_use]
    pub fn input_dimensions(&self) -> usize {
        self.summary.as_ref().map_or(0, |s| s.input_dimensions)
    }

    /// Samples used to fit the stages (after any validation hold-out).
    #[must_use]
    pub fn num_training_samples(&self) -> usize {
        self.summary.as_ref().map_or(0, |s| s.num_training_samples)
    }

    /// Wall time of the last successful training run.
    #[must_use]
    pub fn training_time(&self) -> Option<Duration> {
        self.summary.as_ref().map(|s| s.training_time)
    }

    /// Accuracy (percent) or RMS error on the validation hold-out.
    #[must_use]
    pub fn validation_score(&self) -> Option<f64> {
        self.summary.as_ref().and_then(|s| s.validation_score)
    }

    /// Identifier of the training run, also carried by its events.
    #[must_use]
    pub fn run_id(&self) -> Option<Uuid> {
        self.summary.as_ref().map(|s| s.run_id)
    }

    /// When the current model finished training.
    #[must_use]
    pub fn trained_at(&self) -> Option<DateTime<Utc>> {
        self.summary.as_ref().map(|s| s.trained_at)
    }

    fn invalidate(&mut self) {
        self.summary = None;
        self.clear_outputs();
    }

    fn clear_outputs(&mut self) {
        self.preprocessed.clear();
        self.features.clear();
        self.predicted_label = NULL_CLASS_LABEL;
        self.unprocessed_label = NULL_CLASS_LABEL;
    }
}

impl Module for Pipeline {
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
        self.state() == PipelineState::Trained
    }

    fn reset(&mut self) -> Result<()> {
        let result = self.stages.reset();
        self.clear_outputs();
        self.base.record(result)
    }

    fn clear(&mut self) {
        self.stages.clear();
        self.invalidate();
    }

    fn set_telemetry(&mut self, telemetry: &Telemetry) {
        self.base.set_telemetry(telemetry.scoped(Self::ID));
        self.stages.set_telemetry(telemetry);
    }

    fn encode_settings(&self) -> Result<Value> {
        let block = SettingsBlock {
            options: self.options.clone(),
            stages: self.stages.capture(false)?,
        };
        encode_block(&block, "settings")
    }

    fn encode_state(&self) -> Result<Option<Value>> {
        let Ok(summary) = self.trained_summary() else {
            return Ok(None);
        };
        let block = StateBlock {
            summary: summary.clone(),
            stages: self.stages.capture(true)?,
        };
        encode_block(&block, "state").map(Some)
    }

    fn decode(&mut self, settings: Value, state: Option<Value>) -> Result<()> {
        let settings: SettingsBlock = decode_block(settings, "settings")?;
        settings.options.validate()?;
        let state: Option<StateBlock> = state.map(|s| decode_block(s, "state")).transpose()?;
        let mut stages = match &state {
            Some(block) => Stages::restore(&block.stages)?,
            None => Stages::restore(&settings.stages)?,
        };
        if state.is_some() && stages.predictor.is_none() {
            return Err(ModuleError::InvalidData(
                "trained pipeline record has no predictor".into(),
            ));
        }
        if state.is_some() && !stages.all_trained() {
            return Err(ModuleError::InvalidData(
                "trained pipeline record holds an untrained stage".into(),
            ));
        }
        stages.set_telemetry(self.base.telemetry());
        self.random = Random::from_optional_seed(settings.options.random_seed);
        self.options = settings.options;
        self.stages = stages;
        self.summary = state.map(|block| block.summary);
        self.clear_outputs();
        Ok(())
    }
}
