use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    data::{Dataset, RegressionData},
    error::{ModuleError, Result},
    module::{check_dimensions, Module, ModuleBase},
    persist::{decode_block, encode_block},
    random::Random,
    regressor::Regressor,
    telemetry::TRAINING_RESULT,
    util::{self, MinMax},
};

/// Hyperparameters of [`LinearRegression`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearRegressionSettings {
    /// Gradient descent step size.
    pub learning_rate: f64,
    /// Upper bound on passes over the data.
    pub max_epochs: usize,
    /// Stop once the error improves by less than this between epochs.
    pub min_change: f64,
    /// Scale inputs and targets into `[0, 1]` with the training ranges.
    pub use_scaling: bool,
    /// Seed for the initial weights; entropy when unset.
    pub random_seed: Option<u64>,
}

impl Default for LinearRegressionSettings {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            max_epochs: 5000,
            min_change: 1e-10,
            use_scaling: true,
            random_seed: None,
        }
    }
}

impl LinearRegressionSettings {
    fn validate(&self) -> Result<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ModuleError::invalid("learning_rate", "must be > 0"));
        }
        if self.max_epochs == 0 {
            return Err(ModuleError::invalid("max_epochs", "must be at least 1"));
        }
        if !(self.min_change.is_finite() && self.min_change >= 0.0) {
            return Err(ModuleError::invalid("min_change", "must be >= 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LinearModel {
    weights: Vec<f64>,
    bias: f64,
}

impl LinearModel {
    fn predict(&self, input: &[f64]) -> f64 {
        input
            .iter()
            .zip(&self.weights)
            .map(|(feature, weight)| feature * weight)
            .sum::<f64>()
            + self.bias
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LinearRegressionState {
    num_inputs: usize,
    input_ranges: Option<Vec<MinMax>>,
    target_ranges: Option<Vec<MinMax>>,
    models: Vec<LinearModel>,
    training_error: f64,
    epochs: usize,
}

/// One linear model per target dimension, fitted by batch gradient descent.
#[derive(Debug, Clone)]
pub struct LinearRegression {
    base: ModuleBase,
    settings: LinearRegressionSettings,
    state: Option<LinearRegressionState>,
    output: Vec<f64>,
}

impl Default for LinearRegression {
    fn default() -> Self {
        Self::new(LinearRegressionSettings::default())
    }
}

impl LinearRegression {
    /// Registry id.
    pub const ID: &'static str = "LinearRegression";

    /// Creates an untrained regressor.
    #[must_use]
    pub fn new(settings: LinearRegressionSettings) -> Self {
        Self {
            base: ModuleBase::new(Self::ID),
            settings,
            state: None,
            output: Vec::new(),
        }
    }

    /// Current hyperparameters.
    #[must_use]
    pub const fn settings(&self) -> &LinearRegressionSettings {
        &self.settings
    }

    /// Mean squared error on the (scaled) training data after the last epoch.
    #[must_use]
    pub fn training_error(&self) -> Option<f64> {
        self.state.as_ref().map(|state| state.training_error)
    }

    /// Epochs run by the last successful training.
    #[must_use]
    pub fn epochs(&self) -> Option<usize> {
        self.state.as_ref().map(|state| state.epochs)
    }

    fn fit(&self, data: &RegressionData) -> Result<LinearRegressionState> {
        self.settings.validate()?;
        if data.is_empty() {
            return Err(ModuleError::EmptyDataset);
        }
        let (input_ranges, target_ranges) = if self.settings.use_scaling {
            (Some(data.input_ranges()), Some(data.target_ranges()))
        } else {
            (None, None)
        };
        let mut scaled = data.clone();
        if let (Some(inputs), Some(targets)) = (&input_ranges, &target_ranges) {
            scaled.scale_with(inputs, targets, 0.0, 1.0);
        }
        let features: Vec<&[f64]> = scaled.inputs().collect();
        let num_inputs = data.num_dimensions();
        let n = features.len() as f64;
        let mut random = Random::from_optional_seed(self.settings.random_seed);
        let mut models: Vec<LinearModel> = (0..data.num_target_dimensions())
            .map(|_| LinearModel {
                weights: (0..num_inputs).map(|_| random.uniform(-0.05, 0.05)).collect(),
                bias: random.uniform(-0.05, 0.05),
            })
            .collect();

        let mut previous = f64::INFINITY;
        let mut training_error = 0.0;
        let mut epochs = 0;
        for epoch in 0..self.settings.max_epochs {
            let mut total_error = 0.0;
            for (output, model) in models.iter_mut().enumerate() {
                let labels: Vec<f64> = scaled.samples().iter().map(|s| s.label[output]).collect();
                let error: Vec<f64> = features
                    .iter()
                    .zip(&labels)
                    .map(|(sample, label)| model.predict(sample) - label)
                    .collect();
                for (idx, weight) in model.weights.iter_mut().enumerate() {
                    let grad = error
                        .iter()
                        .zip(&features)
                        .map(|(err, sample)| err * sample[idx])
                        .sum::<f64>()
                        / n;
                    *weight -= self.settings.learning_rate * grad;
                }
                model.bias -= self.settings.learning_rate * error.iter().sum::<f64>() / n;
                let predictions: Vec<f64> = features.iter().map(|s| model.predict(s)).collect();
                total_error += util::mean_squared_error(&predictions, &labels);
            }
            training_error = total_error / models.len().max(1) as f64;
            epochs = epoch + 1;
            self.base.event(
                TRAINING_RESULT,
                json!({ "epoch": epochs, "mse": training_error }),
            );
            if !training_error.is_finite() {
                return Err(ModuleError::InvalidData(
                    "gradient descent diverged; lower the learning rate".into(),
                ));
            }
            if (previous - training_error).abs() < self.settings.min_change {
                break;
            }
            previous = training_error;
        }
        Ok(LinearRegressionState {
            num_inputs,
            input_ranges,
            target_ranges,
            models,
            training_error,
            epochs,
        })
    }

    fn regress(&self, input: &[f64]) -> Result<Vec<f64>> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| ModuleError::NotTrained(Self::ID.into()))?;
        check_dimensions(state.num_inputs, input)?;
        let scaled = util::scale_to_unit(input, state.input_ranges.as_deref());
        let mut output: Vec<f64> = state.models.iter().map(|m| m.predict(&scaled)).collect();
        if let Some(ranges) = &state.target_ranges {
            for (value, range) in output.iter_mut().zip(ranges) {
                *value = util::scale(*value, 0.0, 1.0, range.min, range.max);
            }
        }
        Ok(output)
    }
}

impl Module for LinearRegression {
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
        self.output.clear();
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
        let settings: LinearRegressionSettings = decode_block(settings, "settings")?;
        settings.validate()?;
        let state: Option<LinearRegressionState> =
            state.map(|s| decode_block(s, "state")).transpose()?;
        self.settings = settings;
        self.state = state;
        self.output.clear();
        Ok(())
    }
}

impl Regressor for LinearRegression {
    fn train(&mut self, data: &RegressionData) -> Result<()> {
        self.base
            .training_started(data.num_samples(), data.num_dimensions());
        let outcome = self.fit(data).map(|state| {
            self.state = Some(state);
            self.output.clear();
        });
        self.base.training_finished(outcome)
    }

    fn predict(&mut self, input: &[f64]) -> Result<Vec<f64>> {
        let result = self.regress(input).map(|output| {
            self.output.clone_from(&output);
            output
        });
        self.base.record(result)
    }

    fn regression_data(&self) -> &[f64] {
        &self.output
    }

    fn num_input_dimensions(&self) -> usize {
        self.state.as_ref().map_or(0, |state| state.num_inputs)
    }

    fn num_output_dimensions(&self) -> usize {
        self.state.as_ref().map_or(0, |state| state.models.len())
    }

    fn clone_box(&self) -> Box<dyn Regressor> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{plane, round_trip};

    fn fast() -> LinearRegression {
        LinearRegression::new(LinearRegressionSettings {
            learning_rate: 0.5,
            random_seed: Some(1),
            ..LinearRegressionSettings::default()
        })
    }

    #[test]
    fn training_reduces_error_and_fits_plane() {
        let mut model = fast();
        model.train(&plane()).unwrap();
        assert!(model.training_error().unwrap() < 1e-4);
        let output = model.predict(&[0.5, 0.25]).unwrap();
        assert!((output[0] - 1.75).abs() < 0.05, "got {output:?}");
        assert_eq!(model.regression_data(), output.as_slice());
        assert_eq!(model.num_output_dimensions(), 1);
    }

    #[test]
    fn invalid_settings_fail_without_touching_state() {
        let mut model = fast();
        model.train(&plane()).unwrap();
        model
            .configure(json!({ "learning_rate": 0.0 }))
            .unwrap_err();
        assert!(model.trained());
        let mut broken = LinearRegression::new(LinearRegressionSettings {
            max_epochs: 0,
            ..LinearRegressionSettings::default()
        });
        assert!(broken.train(&plane()).is_err());
        assert!(broken.last_error().unwrap().contains("max_epochs"));
    }

    #[test]
    fn predict_checks_dimensions() {
        let mut model = fast();
        assert!(model.predict(&[1.0, 2.0]).is_err());
        model.train(&plane()).unwrap();
        assert!(model.predict(&[1.0]).is_err());
    }

    #[test]
    fn save_load_reproduces_outputs() {
        let mut model = fast();
        model.train(&plane()).unwrap();
        let mut loaded = LinearRegression::default();
        round_trip(&model, &mut loaded);
        assert_eq!(loaded.settings().learning_rate, 0.5);
        assert_eq!(
            model.predict(&[0.3, 0.6]).unwrap(),
            loaded.predict(&[0.3, 0.6]).unwrap()
        );
    }
}
