use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    data::{Dataset, UnlabelledData},
    error::{ModuleError, Result},
    module::{check_dimensions, Module, ModuleBase},
    persist::{decode_block, encode_block},
    preprocessing::PreProcessing,
};

/// Hyperparameters of [`MovingAverageFilter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovingAverageSettings {
    /// Number of recent inputs averaged per output.
    pub window_size: usize,
}

impl Default for MovingAverageSettings {
    fn default() -> Self {
        Self { window_size: 5 }
    }
}

impl MovingAverageSettings {
    fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(ModuleError::invalid("window_size", "must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct MovingAverageState {
    num_dimensions: usize,
}

/// Per-dimension mean over a sliding window of recent inputs.
///
/// The window only holds runtime history: it is not persisted and
/// [`Module::reset`] empties it.
#[derive(Debug, Clone)]
pub struct MovingAverageFilter {
    base: ModuleBase,
    settings: MovingAverageSettings,
    state: Option<MovingAverageState>,
    window: VecDeque<Vec<f64>>,
    output: Vec<f64>,
}

impl Default for MovingAverageFilter {
    fn default() -> Self {
        Self::new(MovingAverageSettings::default())
    }
}

impl MovingAverageFilter {
    /// Registry id.
    pub const ID: &'static str = "MovingAverageFilter";

    /// Creates an untrained filter.
    #[must_use]
    pub fn new(settings: MovingAverageSettings) -> Self {
        Self {
            base: ModuleBase::new(Self::ID),
            settings,
            state: None,
            window: VecDeque::new(),
            output: Vec::new(),
        }
    }

    /// Convenience constructor setting only the window size.
    #[must_use]
    pub fn with_window(window_size: usize) -> Self {
        Self::new(MovingAverageSettings { window_size })
    }

    /// Current hyperparameters.
    #[must_use]
    pub const fn settings(&self) -> &MovingAverageSettings {
        &self.settings
    }

    /// Inputs currently held in the window.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.window.len()
    }

    fn filter(&mut self, input: &[f64]) -> Result<Vec<f64>> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| ModuleError::NotTrained(Self::ID.into()))?;
        check_dimensions(state.num_dimensions, input)?;
        if self.window.len() == self.settings.window_size {
            self.window.pop_front();
        }
        self.window.push_back(input.to_vec());
        let count = self.window.len() as f64;
        let mut output = vec![0.0; state.num_dimensions];
        for row in &self.window {
            for (sum, value) in output.iter_mut().zip(row) {
                *sum += value;
            }
        }
        output.iter_mut().for_each(|sum| *sum /= count);
        Ok(output)
    }
}

impl Module for MovingAverageFilter {
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

    fn reset(&mut self) -> Result<()> {
        self.window.clear();
        self.output.clear();
        Ok(())
    }

    fn clear(&mut self) {
        self.state = None;
        self.window.clear();
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
        let settings: MovingAverageSettings = decode_block(settings, "settings")?;
        settings.validate()?;
        let state: Option<MovingAverageState> =
            state.map(|s| decode_block(s, "state")).transpose()?;
        self.settings = settings;
        self.state = state;
        self.window.clear();
        self.output.clear();
        Ok(())
    }
}

impl PreProcessing for MovingAverageFilter {
    fn train(&mut self, data: &UnlabelledData) -> Result<()> {
        self.base
            .training_started(data.num_samples(), data.num_dimensions());
        let outcome = self.settings.validate().and_then(|()| {
            if data.num_dimensions() == 0 {
                return Err(ModuleError::EmptyDataset);
            }
            self.state = Some(MovingAverageState {
                num_dimensions: data.num_dimensions(),
            });
            self.window.clear();
            self.output.clear();
            Ok(())
        });
        self.base.training_finished(outcome)
    }

    fn process(&mut self, input: &[f64]) -> Result<Vec<f64>> {
        let result = self.filter(input).map(|output| {
            self.output.clone_from(&output);
            output
        });
        self.base.record(result)
    }

    fn processed_data(&self) -> &[f64] {
        &self.output
    }

    fn num_input_dimensions(&self) -> usize {
        self.state.as_ref().map_or(0, |state| state.num_dimensions)
    }

    fn num_output_dimensions(&self) -> usize {
        self.num_input_dimensions()
    }

    fn clone_box(&self) -> Box<dyn PreProcessing> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::round_trip;

    fn trained(window: usize) -> MovingAverageFilter {
        let mut filter = MovingAverageFilter::with_window(window);
        filter.train(&UnlabelledData::new(2)).unwrap();
        filter
    }

    #[test]
    fn averages_over_the_window() {
        let mut filter = trained(3);
        assert_eq!(filter.process(&[3.0, 0.0]).unwrap(), vec![3.0, 0.0]);
        assert_eq!(filter.process(&[6.0, 3.0]).unwrap(), vec![4.5, 1.5]);
        assert_eq!(filter.process(&[9.0, 6.0]).unwrap(), vec![6.0, 3.0]);
        assert_eq!(filter.process(&[12.0, 9.0]).unwrap(), vec![9.0, 6.0]);
        assert_eq!(filter.buffered(), 3);
        assert_eq!(filter.processed_data(), &[9.0, 6.0]);
    }

    #[test]
    fn reset_empties_the_window() {
        let mut filter = trained(4);
        filter.process(&[10.0, 10.0]).unwrap();
        filter.reset().unwrap();
        assert_eq!(filter.buffered(), 0);
        assert!(filter.trained());
        assert_eq!(filter.process(&[2.0, 4.0]).unwrap(), vec![2.0, 4.0]);
    }

    #[test]
    fn rejects_bad_window_and_dimensions() {
        let mut filter = MovingAverageFilter::with_window(0);
        assert!(filter.train(&UnlabelledData::new(2)).is_err());
        assert!(filter.process(&[1.0, 1.0]).is_err());
        let mut filter = trained(2);
        assert!(matches!(
            filter.process(&[1.0]),
            Err(ModuleError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn save_load_keeps_dimensions_not_history() {
        let mut filter = trained(2);
        filter.process(&[1.0, 1.0]).unwrap();
        let mut loaded = MovingAverageFilter::default();
        round_trip(&filter, &mut loaded);
        assert_eq!(loaded.settings().window_size, 2);
        assert_eq!(loaded.num_output_dimensions(), 2);
        assert_eq!(loaded.buffered(), 0);
    }
}
