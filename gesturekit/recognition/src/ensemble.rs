//! Bootstrap aggregation over heterogeneous classifiers.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared_logging::LogLevel;

use crate::{
    classifier::{ClassPrediction, Classifier},
    data::{ClassificationData, Dataset, NULL_CLASS_LABEL},
    error::{ModuleError, Result},
    module::{check_dimensions, Module, ModuleBase},
    persist::{decode_block, encode_block, NestedRecord},
    random::Random,
    registry,
    telemetry::Telemetry,
    util::{self, MinMax},
};

/// Hyperparameters of [`Bag`] other than its members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BagSettings {
    /// Scale inputs into `[0, 1]` before they reach the members.
    pub use_scaling: bool,
    /// Train each member on a resample (with replacement) of equal size.
    pub bootstrap: bool,
    /// Seed for member resampling; entropy when unset.
    pub random_seed: Option<u64>,
}

impl Default for BagSettings {
    fn default() -> Self {
        Self {
            use_scaling: false,
            bootstrap: true,
            random_seed: None,
        }
    }
}

/// One owned member and its vote weight.
#[derive(Debug, Clone)]
pub struct BagMember {
    classifier: Box<dyn Classifier>,
    weight: f64,
}

impl BagMember {
    /// The member classifier.
    #[must_use]
    pub fn classifier(&self) -> &dyn Classifier {
        self.classifier.as_ref()
    }

    /// Vote weight.
    #[must_use]
    pub const fn weight(&self) -> f64 {
        self.weight
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct BagState {
    num_dimensions: usize,
    class_labels: Vec<u32>,
    ranges: Option<Vec<MinMax>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SettingsBlock {
    #[serde(flatten)]
    settings: BagSettings,
    #[serde(default)]
    weights: Vec<f64>,
    #[serde(default)]
    members: Vec<NestedRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StateBlock {
    #[serde(flatten)]
    state: BagState,
    count: usize,
    members: Vec<NestedRecord>,
}

/// Ensemble classifier combining member votes.
///
/// Members keep their own hyperparameters. Training works on copies of the
/// members and replaces them only when every member trained successfully.
#[derive(Debug, Clone)]
pub struct Bag {
    base: ModuleBase,
    settings: BagSettings,
    members: Vec<BagMember>,
    random: Random,
    state: Option<BagState>,
    prediction: Option<ClassPrediction>,
}

impl Default for Bag {
    fn default() -> Self {
        Self::new(BagSettings::default())
    }
}

impl Bag {
    /// Registry id.
    pub const ID: &'static str = "BAG";

    /// Creates an ensemble without members.
    #[must_use]
    pub fn new(settings: BagSettings) -> Self {
        let random = Random::from_optional_seed(settings.random_seed);
        Self {
            base: ModuleBase::new(Self::ID),
            settings,
            members: Vec::new(),
            random,
            state: None,
            prediction: None,
        }
    }

    /// Current hyperparameters.
    #[must_use]
    pub const fn settings(&self) -> &BagSettings {
        &self.settings
    }

    /// Adds a member with weight 1. The ensemble becomes untrained.
    pub fn add_member(&mut self, classifier: Box<dyn Classifier>) -> Result<()> {
        self.add_weighted_member(classifier, 1.0)
    }

    /// Adds a member with a vote weight (> 0). The ensemble becomes untrained.
    pub fn add_weighted_member(&mut self, mut classifier: Box<dyn Classifier>, weight: f64) -> Result<()> {
        let result = check_weight(weight).map(|()| {
            classifier.set_telemetry(self.base.telemetry());
            self.members.push(BagMember { classifier, weight });
            self.state = None;
            self.prediction = None;
        });
        self.base.record(result)
    }

    /// Removes the member at `index`. The ensemble becomes untrained.
    pub fn remove_member(&mut self, index: usize) -> Result<Box<dyn Classifier>> {
        let result = if index < self.members.len() {
            self.state = None;
            self.prediction = None;
            Ok(self.members.remove(index).classifier)
        } else {
            Err(ModuleError::InvalidData(format!(
                "member index {index} out of range ({} members)",
                self.members.len()
            )))
        };
        self.base.record(result)
    }

    /// Removes every member.
    pub fn clear_members(&mut self) {
        self.members.clear();
        self.state = None;
        self.prediction = None;
    }

    /// Owned members in insertion order.
    #[must_use]
    pub fn members(&self) -> &[BagMember] {
        &self.members
    }

    /// Number of members.
    #[must_use]
    pub fn num_members(&self) -> usize {
        self.members.len()
    }

    /// Member vote weights.
    #[must_use]
    pub fn weights(&self) -> Vec<f64> {
        self.members.iter().map(|m| m.weight).collect()
    }

    /// Replaces every weight; the count must match the members.
    pub fn set_weights(&mut self, weights: &[f64]) -> Result<()> {
        let result = if weights.len() == self.members.len() {
            weights.iter().try_for_each(|w| check_weight(*w)).map(|()| {
                for (member, weight) in self.members.iter_mut().zip(weights) {
                    member.weight = *weight;
                }
            })
        } else {
            Err(ModuleError::invalid(
                "weights",
                format!("expected {} weights, got {}", self.members.len(), weights.len()),
            ))
        };
        self.base.record(result)
    }

    fn fit(&mut self, data: &ClassificationData) -> Result<(BagState, Vec<BagMember>)> {
        if self.members.is_empty() {
            return Err(ModuleError::Precondition(
                "ensemble has no members to train".into(),
            ));
        }
        if data.is_empty() {
            return Err(ModuleError::EmptyDataset);
        }
        if let Some(seed) = self.settings.random_seed {
            self.random = Random::with_seed(seed);
        }
        let ranges = self.settings.use_scaling.then(|| data.ranges());
        let mut scaled = data.clone();
        if let Some(ranges) = &ranges {
            scaled.scale_with(ranges, 0.0, 1.0);
        }

        let mut staged = self.members.clone();
        for (index, member) in staged.iter_mut().enumerate() {
            let mut member_random = self.random.fork();
            let subset = if self.settings.bootstrap {
                scaled.bootstrap(scaled.num_samples(), &mut member_random)
            } else {
                scaled.clone()
            };
            member
                .classifier
                .train(&subset)
                .map_err(|err| err.in_member(index, member.classifier.id()))?;
            self.base.log(
                LogLevel::Debug,
                "member.trained",
                json!({ "index": index, "member": member.classifier.id() }),
            );
        }
        let class_labels = data
            .class_tracker()
            .iter()
            .filter(|entry| entry.count > 0)
            .map(|entry| entry.label)
            .collect();
        Ok((
            BagState {
                num_dimensions: data.num_dimensions(),
                class_labels,
                ranges,
            },
            staged,
        ))
    }

    fn vote(&mut self, input: &[f64]) -> Result<ClassPrediction> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| ModuleError::NotTrained(Self::ID.into()))?;
        check_dimensions(state.num_dimensions, input)?;
        let scaled = util::scale_to_unit(input, state.ranges.as_deref());
        let labels = state.class_labels.clone();

        let num_classes = labels.len();
        let mut votes = vec![0.0; num_classes];
        let mut confidence = vec![0.0; num_classes];
        let mut voters = vec![0usize; num_classes];
        let mut first_voter = vec![usize::MAX; num_classes];
        for (index, member) in self.members.iter_mut().enumerate() {
            let label = member
                .classifier
                .predict(&scaled)
                .map_err(|err| err.in_member(index, member.classifier.id()))?;
            if label == NULL_CLASS_LABEL {
                continue;
            }
            let Ok(class) = labels.binary_search(&label) else {
                continue;
            };
            votes[class] += member.weight;
            confidence[class] += member.classifier.maximum_likelihood();
            voters[class] += 1;
            first_voter[class] = first_voter[class].min(index);
        }

        let total: f64 = votes.iter().sum();
        let likelihoods: Vec<f64> = if total > 0.0 {
            votes.iter().map(|v| v / total).collect()
        } else {
            vec![0.0; num_classes]
        };
        let distances: Vec<f64> = confidence
            .iter()
            .zip(&voters)
            .map(|(c, n)| if *n > 0 { c / *n as f64 } else { 0.0 })
            .collect();
        let winner = (0..num_classes)
            .filter(|class| voters[*class] > 0)
            .reduce(|best, class| {
                let better = votes[class]
                    .total_cmp(&votes[best])
                    .then(confidence[class].total_cmp(&confidence[best]))
                    .then(first_voter[best].cmp(&first_voter[class]));
                if better.is_gt() {
                    class
                } else {
                    best
                }
            });
        Ok(winner.map_or_else(
            || ClassPrediction {
                label: NULL_CLASS_LABEL,
                maximum_likelihood: 0.0,
                likelihoods: likelihoods.clone(),
                distances: distances.clone(),
            },
            |class| ClassPrediction {
                label: labels[class],
                maximum_likelihood: likelihoods[class],
                likelihoods: likelihoods.clone(),
                distances: distances.clone(),
            },
        ))
    }
}

fn check_weight(weight: f64) -> Result<()> {
    if weight.is_finite() && weight > 0.0 {
        Ok(())
    } else {
        Err(ModuleError::invalid(
            "weight",
            format!("{weight} must be strictly positive"),
        ))
    }
}

fn restore_members(records: &[NestedRecord], weights: &[f64]) -> Result<Vec<BagMember>> {
    if records.len() != weights.len() {
        return Err(ModuleError::InvalidData(format!(
            "{} member records but {} weights",
            records.len(),
            weights.len()
        )));
    }
    records
        .iter()
        .zip(weights)
        .enumerate()
        .map(|(index, (record, weight))| {
            check_weight(*weight)?;
            let classifier = record
                .restore(registry::classifiers())
                .map_err(|err| err.in_member(index, record.type_id.clone()))?;
            Ok(BagMember {
                classifier,
                weight: *weight,
            })
        })
        .collect()
}

impl Module for Bag {
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
        self.state.is_some() && self.members.iter().all(|m| m.classifier.trained())
    }

    fn reset(&mut self) -> Result<()> {
        let result = self
            .members
            .iter_mut()
            .enumerate()
            .try_for_each(|(index, member)| {
                member
                    .classifier
                    .reset()
                    .map_err(|err| err.in_member(index, member.classifier.id()))
            });
        self.base.record(result)
    }

    fn clear(&mut self) {
        for member in &mut self.members {
            member.classifier.clear();
        }
        self.state = None;
        self.prediction = None;
    }

    fn set_telemetry(&mut self, telemetry: &Telemetry) {
        self.base.set_telemetry(telemetry.scoped(Self::ID));
        for member in &mut self.members {
            member.classifier.set_telemetry(telemetry);
        }
    }

    fn encode_settings(&self) -> Result<Value> {
        let block = SettingsBlock {
            settings: self.settings.clone(),
            weights: self.weights(),
            members: self
                .members
                .iter()
                .map(|m| NestedRecord::capture_settings(m.classifier.as_ref()))
                .collect::<Result<_>>()?,
        };
        encode_block(&block, "settings")
    }

    fn encode_state(&self) -> Result<Option<Value>> {
        let Some(state) = &self.state else {
            return Ok(None);
        };
        let block = StateBlock {
            state: state.clone(),
            count: self.members.len(),
            members: self
                .members
                .iter()
                .map(|m| NestedRecord::capture(m.classifier.as_ref()))
                .collect::<Result<_>>()?,
        };
        encode_block(&block, "state").map(Some)
    }

    fn decode(&mut self, settings: Value, state: Option<Value>) -> Result<()> {
        let settings: SettingsBlock = decode_block(settings, "settings")?;
        let state: Option<StateBlock> = state.map(|s| decode_block(s, "state")).transpose()?;
        let members = match &state {
            Some(block) => {
                if block.count != block.members.len() {
                    return Err(ModuleError::InvalidData(format!(
                        "state declares {} members but holds {}",
                        block.count,
                        block.members.len()
                    )));
                }
                restore_members(&block.members, &settings.weights)?
            }
            None => restore_members(&settings.members, &settings.weights)?,
        };
        self.random = Random::from_optional_seed(settings.settings.random_seed);
        self.settings = settings.settings;
        self.members = members;
        self.state = state.map(|block| block.state);
        self.prediction = None;
        let telemetry = self.base.telemetry().clone();
        for member in &mut self.members {
            member.classifier.set_telemetry(&telemetry);
        }
        Ok(())
    }
}

impl Classifier for Bag {
    fn train(&mut self, data: &ClassificationData) -> Result<()> {
        self.base
            .training_started(data.num_samples(), data.num_dimensions());
        let outcome = self.fit(data).map(|(state, members)| {
            self.state = Some(state);
            self.members = members;
            self.prediction = None;
        });
        self.base.training_finished(outcome)
    }

    fn predict(&mut self, input: &[f64]) -> Result<u32> {
        let result = self.vote(input).map(|prediction| {
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        modules::{Knn, MinDist},
        test_support::{round_trip, three_blobs},
    };

    /// Always predicts one label with a fixed confidence.
    #[derive(Debug, Clone)]
    struct Constant {
        base: ModuleBase,
        label: u32,
        confidence: f64,
        fail: bool,
        trained: bool,
        prediction: Option<ClassPrediction>,
    }

    impl Constant {
        fn boxed(label: u32, confidence: f64) -> Box<dyn Classifier> {
            Box::new(Self {
                base: ModuleBase::new("Constant"),
                label,
                confidence,
                fail: false,
                trained: false,
                prediction: None,
            })
        }

        fn failing() -> Box<dyn Classifier> {
            Box::new(Self {
                base: ModuleBase::new("Constant"),
                label: 1,
                confidence: 1.0,
                fail: true,
                trained: false,
                prediction: None,
            })
        }
    }

    impl Module for Constant {
        fn id(&self) -> &'static str {
            "Constant"
        }
        fn base(&self) -> &ModuleBase {
            &self.base
        }
        fn base_mut(&mut self) -> &mut ModuleBase {
            &mut self.base
        }
        fn trained(&self) -> bool {
            self.trained
        }
        fn clear(&mut self) {
            self.trained = false;
        }
        fn encode_settings(&self) -> Result<Value> {
            Ok(json!({}))
        }
        fn encode_state(&self) -> Result<Option<Value>> {
            Ok(None)
        }
        fn decode(&mut self, _settings: Value, _state: Option<Value>) -> Result<()> {
            Ok(())
        }
    }

    impl Classifier for Constant {
        fn train(&mut self, _data: &ClassificationData) -> Result<()> {
            if self.fail {
                return Err(ModuleError::InvalidData("refusing to train".into()));
            }
            self.trained = true;
            Ok(())
        }
        fn predict(&mut self, _input: &[f64]) -> Result<u32> {
            self.prediction = Some(ClassPrediction {
                label: self.label,
                maximum_likelihood: self.confidence,
                ..ClassPrediction::default()
            });
            Ok(self.label)
        }
        fn prediction(&self) -> Option<&ClassPrediction> {
            self.prediction.as_ref()
        }
        fn class_labels(&self) -> Vec<u32> {
            vec![1, 2, 3]
        }
        fn num_input_dimensions(&self) -> usize {
            2
        }
        fn clone_box(&self) -> Box<dyn Classifier> {
            Box::new(self.clone())
        }
    }

    fn ensemble(members: Vec<Box<dyn Classifier>>) -> Bag {
        let mut bag = Bag::new(BagSettings {
            random_seed: Some(21),
            ..BagSettings::default()
        });
        for member in members {
            bag.add_member(member).unwrap();
        }
        bag
    }

    #[test]
    fn majority_wins() {
        let mut bag = ensemble(vec![
            Constant::boxed(1, 0.4),
            Constant::boxed(1, 0.4),
            Constant::boxed(2, 0.9),
        ]);
        bag.train(&three_blobs()).unwrap();
        assert!(bag.trained());
        assert_eq!(bag.predict(&[0.0, 0.0]).unwrap(), 1);
        let likelihoods = bag.class_likelihoods();
        assert!((likelihoods[0] - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn ties_fall_back_to_confidence_then_member_order() {
        let mut bag = ensemble(vec![Constant::boxed(2, 0.3), Constant::boxed(3, 0.8)]);
        bag.train(&three_blobs()).unwrap();
        assert_eq!(bag.predict(&[0.0, 0.0]).unwrap(), 3);

        let mut bag = ensemble(vec![Constant::boxed(3, 0.5), Constant::boxed(2, 0.5)]);
        bag.train(&three_blobs()).unwrap();
        assert_eq!(bag.predict(&[0.0, 0.0]).unwrap(), 3);
    }

    #[test]
    fn weights_and_null_votes() {
        let mut bag = ensemble(vec![
            Constant::boxed(1, 0.5),
            Constant::boxed(2, 0.5),
            Constant::boxed(0, 1.0),
        ]);
        bag.set_weights(&[1.0, 2.5, 1.0]).unwrap();
        assert!(bag.set_weights(&[1.0]).is_err());
        assert!(bag.set_weights(&[1.0, 0.0, 1.0]).is_err());
        bag.train(&three_blobs()).unwrap();
        assert_eq!(bag.predict(&[0.0, 0.0]).unwrap(), 2);

        let mut silent = ensemble(vec![Constant::boxed(0, 1.0)]);
        silent.train(&three_blobs()).unwrap();
        assert_eq!(silent.predict(&[0.0, 0.0]).unwrap(), 0);
    }

    #[test]
    fn training_without_members_fails() {
        let mut bag = Bag::default();
        assert!(matches!(
            bag.train(&three_blobs()),
            Err(ModuleError::Precondition(_))
        ));
        assert!(!bag.trained());
    }

    #[test]
    fn member_failure_discards_staged_members() {
        let mut bag = ensemble(vec![Box::new(MinDist::default())]);
        bag.train(&three_blobs()).unwrap();
        bag.add_member(Constant::failing()).unwrap();
        let err = bag.train(&three_blobs()).unwrap_err();
        assert!(matches!(err, ModuleError::Member { index: 1, .. }));
        assert!(!bag.trained());
        assert!(bag.members()[0].classifier().trained());
        assert!(!bag.members()[1].classifier().trained());
    }

    #[test]
    fn real_members_agree_on_blobs() {
        let mut bag = ensemble(vec![
            Box::new(MinDist::default()),
            Box::new(Knn::with_k(3)),
            Box::new(MinDist::default()),
        ]);
        bag.train(&three_blobs()).unwrap();
        assert_eq!(bag.predict(&[20.1, 0.2]).unwrap(), 3);
        assert_eq!(bag.class_labels(), vec![1, 2, 3]);
    }

    #[test]
    fn save_load_restores_members_through_registry() {
        let mut bag = ensemble(vec![Box::new(MinDist::default()), Box::new(Knn::with_k(3))]);
        bag.set_weights(&[1.0, 2.0]).unwrap();
        let data = three_blobs();
        bag.train(&data).unwrap();
        let mut loaded = Bag::default();
        round_trip(&bag, &mut loaded);
        assert!(loaded.trained());
        assert_eq!(loaded.num_members(), 2);
        assert_eq!(loaded.weights(), vec![1.0, 2.0]);
        assert_eq!(loaded.members()[1].classifier().id(), Knn::ID);
        for row in data.inputs() {
            assert_eq!(bag.predict(row).unwrap(), loaded.predict(row).unwrap());
        }
    }

    #[test]
    fn untrained_ensemble_keeps_member_configuration() {
        let bag = ensemble(vec![Box::new(Knn::with_k(7))]);
        let mut loaded = Bag::default();
        round_trip(&bag, &mut loaded);
        assert!(!loaded.trained());
        assert_eq!(loaded.num_members(), 1);
        let settings = loaded.members()[0].classifier().encode_settings().unwrap();
        assert_eq!(settings["k"], 7);
    }

    #[test]
    fn unregistered_members_fail_to_load() {
        let mut bag = ensemble(vec![Constant::boxed(1, 1.0)]);
        bag.train(&three_blobs()).unwrap();
        let mut bytes = Vec::new();
        bag.save(&mut bytes).unwrap();
        let mut loaded = Bag::default();
        let err = loaded.load(&mut bytes.as_slice()).unwrap_err();
        assert!(matches!(err.root_cause(), ModuleError::UnknownType { .. }));
        assert_eq!(loaded.num_members(), 0);
    }
}
