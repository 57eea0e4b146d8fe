use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    data::{Dataset, UnlabelledData},
    error::{ModuleError, Result},
    module::{check_dimensions, Module, ModuleBase},
    persist::{decode_block, encode_block},
    preprocessing::PreProcessing,
    util::{self, MinMax},
};

/// Hyperparameters of [`Normalize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeSettings {
    /// Lower bound of the output range.
    pub target_min: f64,
    /// Upper bound of the output range.
    pub target_max: f64,
}

impl Default for NormalizeSettings {
    fn default() -> Self {
        Self {
            target_min: 0.0,
            target_max: 1.0,
        }
    }
}

impl NormalizeSettings {
    fn validate(&self) -> Result<()> {
        if !(self.target_min.is_finite() && self.target_max.is_finite()) {
            return Err(ModuleError::invalid("target_min", "bounds must be finite"));
        }
        if self.target_min >= self.target_max {
            return Err(ModuleError::invalid(
                "target_max",
                format!(
                    "must exceed target_min ({} >= {})",
                    self.target_min, self.target_max
                ),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct NormalizeState {
    ranges: Vec<MinMax>,
}

/// Min-max scaling of each dimension into `[target_min, target_max]`.
///
/// Values outside the training range map linearly outside the target range;
/// they are not clipped. A constant training dimension maps to `target_min`.
#[derive(Debug, Clone)]
pub struct Normalize {
    base: ModuleBase,
    settings: NormalizeSettings,
    state: Option<NormalizeState>,
    output: Vec<f64>,
}

impl Default for Normalize {
    fn default() -> Self {
        Self::new(NormalizeSettings::default())
    }
}

impl Normalize {
    /// Registry id.
    pub const ID: &'static str = "Normalize";

    /// Creates an untrained normaliser.
    #[must_use]
    pub fn new(settings: NormalizeSettings) -> Self {
        Self {
            base: ModuleBase::new(Self::ID),
            settings,
            state: None,
            output: Vec::new(),
        }
    }

    /// Current hyperparameters.
    #[must_use]
    pub const fn settings(&self) -> &NormalizeSettings {
        &self.settings
    }

    /// Per-dimension training ranges.
    #[must_use]
    pub fn ranges(&self) -> Option<&[MinMax]> {
        self.state.as_ref().map(|state| state.ranges.as_slice())
    }

    fn fit(&self, data: &UnlabelledData) -> Result<NormalizeState> {
        self.settings.validate()?;
        if data.is_empty() {
            return Err(ModuleError::EmptyDataset);
        }
        if let Some((row, _)) = data
            .inputs()
            .enumerate()
            .find(|(_, row)| row.iter().any(|v| !v.is_finite()))
        {
            return Err(ModuleError::InvalidData(format!(
                "sample {row} contains a non-finite value"
            )));
        }
        Ok(NormalizeState {
            ranges: data.ranges(),
        })
    }

    fn scale(&self, input: &[f64]) -> Result<Vec<f64>> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| ModuleError::NotTrained(Self::ID.into()))?;
        check_dimensions(state.ranges.len(), input)?;
        let mut output = input.to_vec();
        util::scale_vector(
            &mut output,
            &state.ranges,
            self.settings.target_min,
            self.settings.target_max,
        );
        Ok(output)
    }
}

impl Module for Normalize {
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
        self.output.clear();
        Ok(())
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
        let settings: NormalizeSettings = decode_block(settings, "settings")?;
        settings.validate()?;
        let state: Option<NormalizeState> = state.map(|s| decode_block(s, "state")).transpose()?;
        self.settings = settings;
        self.state = state;
        self.output.clear();
        Ok(())
    }
}

impl PreProcessing for Normalize {
    fn train(&mut self, data: &UnlabelledData) -> Result<()> {
        self.base
            .training_started(data.num_samples(), data.num_dimensions());
        let outcome = self.fit(data).map(|state| {
            self.state = Some(state);
            self.output.clear();
        });
        self.base.training_finished(outcome)
    }

    fn process(&mut self, input: &[f64]) -> Result<Vec<f64>> {
        let result = self.scale(input).map(|output| {
            self.output.clone_from(&output);
            output
        });
        self.base.record(result)
    }

    fn processed_data(&self) -> &[f64] {
        &self.output
    }

    fn num_input_dimensions(&self) -> usize {
        self.state.as_ref().map_or(0, |state| state.ranges.len())
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

    fn rows() -> UnlabelledData {
        UnlabelledData::from_rows(vec![vec![0.0, -5.0], vec![10.0, 5.0], vec![5.0, 0.0]]).unwrap()
    }

    #[test]
    fn maps_training_range_onto_target() {
        let mut normalize = Normalize::new(NormalizeSettings {
            target_min: -1.0,
            target_max: 1.0,
        });
        normalize.train(&rows()).unwrap();
        assert_eq!(normalize.process(&[0.0, 5.0]).unwrap(), vec![-1.0, 1.0]);
        assert_eq!(normalize.process(&[5.0, 0.0]).unwrap(), vec![0.0, 0.0]);
        let outside = normalize.process(&[20.0, 0.0]).unwrap();
        assert!((outside[0] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_inverted_bounds() {
        let mut normalize = Normalize::default();
        let err = normalize
            .configure(serde_json::json!({ "target_min": 2.0, "target_max": 1.0 }))
            .unwrap_err();
        assert!(matches!(err, ModuleError::InvalidParameter { .. }));
        assert_eq!(normalize.settings(), &NormalizeSettings::default());
    }

    #[test]
    fn rejects_non_finite_training_values() {
        let mut normalize = Normalize::default();
        normalize.train(&rows()).unwrap();
        let mut bad = rows();
        bad.add_sample(vec![f64::NAN, 1.0]).unwrap();
        assert!(matches!(
            normalize.train(&bad),
            Err(ModuleError::InvalidData(_))
        ));
        assert_eq!(normalize.ranges().unwrap()[0].max, 10.0);
    }

    #[test]
    fn save_load_keeps_ranges() {
        let mut normalize = Normalize::default();
        normalize.train(&rows()).unwrap();
        let mut loaded = Normalize::default();
        round_trip(&normalize, &mut loaded);
        assert_eq!(loaded.ranges(), normalize.ranges());
        assert_eq!(loaded.process(&[10.0, -5.0]).unwrap(), vec![1.0, 0.0]);
    }
}
