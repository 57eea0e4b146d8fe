#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]
// Sample counts are converted to f64 throughout the statistics code.
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions
)]

//! Gesturekit recognition: datasets, classical recognition modules, pipelines,
//! ensembles and versioned model records.

/// Module and record error types.
pub mod error;

/// Seedable random source shared by data generation and training.
pub mod random;

/// Ranges, scaling and distance helpers.
pub mod util;

/// Labelled, regression and unlabelled datasets.
pub mod data;

/// Logging and event handle carried by every module.
pub mod telemetry;

/// Shared module contract and bookkeeping.
pub mod module;

/// Binary model records.
pub mod persist;

/// Id-keyed module factories.
pub mod registry;

/// Classifier capability.
pub mod classifier;

/// Regressor capability.
pub mod regressor;

/// Clusterer capability.
pub mod clusterer;

/// Pre-processing capability.
pub mod preprocessing;

/// Feature extraction capability.
pub mod feature_extraction;

/// Post-processing capability.
pub mod postprocessing;

/// Built-in algorithms.
pub mod modules;

/// Bootstrap-aggregated classifier ensemble.
pub mod ensemble;

/// Test reports.
pub mod metrics;

/// Chained recognition pipeline.
pub mod pipeline;

/// TOML pipeline descriptions.
pub mod config;

#[cfg(test)]
mod test_support;

pub use classifier::{Classifier, NullRejection};
pub use clusterer::Clusterer;
pub use config::{load_pipeline, PipelineConfig};
pub use data::{ClassificationData, Dataset, RegressionData, UnlabelledData, NULL_CLASS_LABEL};
pub use ensemble::Bag;
pub use error::{ModuleError, PersistError};
pub use feature_extraction::FeatureExtraction;
pub use metrics::{RegressionReport, TestReport};
pub use module::Module;
pub use persist::ModelRecord;
pub use pipeline::{
    CrossValidationReport, Pipeline, PipelineOptions, PipelineState, Prediction, Predictor,
    PredictorKind,
};
pub use postprocessing::PostProcessing;
pub use preprocessing::PreProcessing;
pub use random::Random;
pub use regressor::Regressor;
pub use telemetry::{Telemetry, TelemetryBuilder};
