use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    data::NULL_CLASS_LABEL,
    error::{ModuleError, Result},
    module::{Module, ModuleBase},
    persist::{decode_block, encode_block},
    postprocessing::PostProcessing,
};

/// Hyperparameters of [`ClassLabelFilter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassLabelFilterSettings {
    /// Votes a label needs within the buffer before it is emitted.
    pub minimum_count: usize,
    /// Number of recent predictions considered.
    pub buffer_size: usize,
}

impl Default for ClassLabelFilterSettings {
    fn default() -> Self {
        Self {
            minimum_count: 1,
            buffer_size: 1,
        }
    }
}

impl ClassLabelFilterSettings {
    fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(ModuleError::invalid("buffer_size", "must be at least 1"));
        }
        if self.minimum_count == 0 || self.minimum_count > self.buffer_size {
            return Err(ModuleError::invalid(
                "minimum_count",
                format!("must be in 1..={}", self.buffer_size),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct FilterState {
    class_labels: Vec<u32>,
}

/// Debounces predicted labels: a label is emitted only once it won the
/// majority of the last `buffer_size` predictions with at least
/// `minimum_count` votes, otherwise the null label comes out.
#[derive(Debug, Clone)]
pub struct ClassLabelFilter {
    base: ModuleBase,
    settings: ClassLabelFilterSettings,
    state: Option<FilterState>,
    buffer: VecDeque<u32>,
    output: u32,
}

impl Default for ClassLabelFilter {
    fn default() -> Self {
        Self::new(ClassLabelFilterSettings::default())
    }
}

impl ClassLabelFilter {
    /// Registry id.
    pub const ID: &'static str = "ClassLabelFilter";

    /// Creates an untrained filter.
    #[must_use]
    pub fn new(settings: ClassLabelFilterSettings) -> Self {
        Self {
            base: ModuleBase::new(Self::ID),
            settings,
            state: None,
            buffer: VecDeque::new(),
            output: NULL_CLASS_LABEL,
        }
    }

    /// Convenience constructor from the two counts.
    #[must_use]
    pub fn with_counts(minimum_count: usize, buffer_size: usize) -> Self {
        Self::new(ClassLabelFilterSettings {
            minimum_count,
            buffer_size,
        })
    }

    /// Current hyperparameters.
    #[must_use]
    pub const fn settings(&self) -> &ClassLabelFilterSettings {
        &self.settings
    }

    /// Labels of the classifier the filter was trained for.
    #[must_use]
    pub fn class_labels(&self) -> &[u32] {
        self.state
            .as_ref()
            .map_or(&[], |state| state.class_labels.as_slice())
    }

    fn filter(&mut self, label: u32) -> Result<u32> {
        if self.state.is_none() {
            return Err(ModuleError::NotTrained(Self::ID.into()));
        }
        if self.buffer.len() == self.settings.buffer_size {
            self.buffer.pop_front();
        }
        self.buffer.push_back(label);

        // (label, votes, most recent position)
        let mut tally: Vec<(u32, usize, usize)> = Vec::new();
        for (position, label) in self.buffer.iter().enumerate() {
            if *label == NULL_CLASS_LABEL {
                continue;
            }
            match tally.iter_mut().find(|(l, _, _)| l == label) {
                Some(entry) => {
                    entry.1 += 1;
                    entry.2 = position;
                }
                None => tally.push((*label, 1, position)),
            }
        }
        let winner = tally
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)));
        Ok(match winner {
            Some((label, votes, _)) if votes >= self.settings.minimum_count => label,
            _ => NULL_CLASS_LABEL,
        })
    }
}

impl Module for ClassLabelFilter {
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
        self.buffer.clear();
        self.output = NULL_CLASS_LABEL;
        Ok(())
    }

    fn clear(&mut self) {
        self.state = None;
        self.buffer.clear();
        self.output = NULL_CLASS_LABEL;
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
        let settings: ClassLabelFilterSettings = decode_block(settings, "settings")?;
        settings.validate()?;
        let state: Option<FilterState> = state.map(|s| decode_block(s, "state")).transpose()?;
        self.settings = settings;
        self.state = state;
        self.buffer.clear();
        self.output = NULL_CLASS_LABEL;
        Ok(())
    }
}

impl PostProcessing for ClassLabelFilter {
    fn train(&mut self, class_labels: &[u32]) -> Result<()> {
        self.base.training_started(class_labels.len(), 1);
        let outcome = self.settings.validate().map(|()| {
            self.state = Some(FilterState {
                class_labels: class_labels.to_vec(),
            });
            self.buffer.clear();
            self.output = NULL_CLASS_LABEL;
        });
        self.base.training_finished(outcome)
    }

    fn process(&mut self, label: u32) -> Result<u32> {
        let result = self.filter(label).map(|output| {
            self.output = output;
            output
        });
        self.base.record(result)
    }

    fn processed_label(&self) -> u32 {
        self.output
    }

    fn clone_box(&self) -> Box<dyn PostProcessing> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::round_trip;

    fn trained(minimum_count: usize, buffer_size: usize) -> ClassLabelFilter {
        let mut filter = ClassLabelFilter::with_counts(minimum_count, buffer_size);
        filter.train(&[1, 2, 3]).unwrap();
        filter
    }

    #[test]
    fn emits_label_once_it_has_enough_votes() {
        let mut filter = trained(3, 5);
        assert_eq!(filter.process(1).unwrap(), 0);
        assert_eq!(filter.process(1).unwrap(), 0);
        assert_eq!(filter.process(2).unwrap(), 0);
        assert_eq!(filter.process(1).unwrap(), 1);
        assert_eq!(filter.processed_label(), 1);
    }

    #[test]
    fn null_predictions_never_vote() {
        let mut filter = trained(2, 3);
        assert_eq!(filter.process(0).unwrap(), 0);
        assert_eq!(filter.process(0).unwrap(), 0);
        assert_eq!(filter.process(2).unwrap(), 0);
        assert_eq!(filter.process(2).unwrap(), 2);
        assert_eq!(filter.process(0).unwrap(), 2);
        assert_eq!(filter.process(0).unwrap(), 0);
    }

    #[test]
    fn old_votes_fall_out_of_the_buffer() {
        let mut filter = trained(2, 2);
        filter.process(1).unwrap();
        assert_eq!(filter.process(1).unwrap(), 1);
        assert_eq!(filter.process(3).unwrap(), 0);
        assert_eq!(filter.process(3).unwrap(), 3);
    }

    #[test]
    fn reset_clears_history_and_untrained_fails() {
        let mut filter = trained(1, 4);
        filter.process(2).unwrap();
        filter.reset().unwrap();
        assert_eq!(filter.processed_label(), 0);
        assert_eq!(filter.process(3).unwrap(), 3);
        filter.clear();
        assert!(filter.process(3).is_err());
    }

    #[test]
    fn minimum_count_must_fit_in_buffer() {
        let mut filter = ClassLabelFilter::with_counts(4, 3);
        assert!(filter.train(&[1]).is_err());
        assert!(!filter.trained());
        let mut filter = ClassLabelFilter::default();
        assert!(filter
            .configure(serde_json::json!({ "minimum_count": 2 }))
            .is_err());
    }

    #[test]
    fn save_load_keeps_settings() {
        let filter = trained(2, 6);
        let mut loaded = ClassLabelFilter::default();
        round_trip(&filter, &mut loaded);
        assert_eq!(loaded.settings(), filter.settings());
        assert_eq!(loaded.class_labels(), &[1, 2, 3]);
    }
}
