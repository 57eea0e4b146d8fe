use ndarray::{aview1, Array2};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    data::{Dataset, UnlabelledData},
    error::{ModuleError, Result},
    feature_extraction::FeatureExtraction,
    module::{check_dimensions, Module, ModuleBase},
    modules::kmeans::{lloyd, nearest_centroid, KMeansSettings},
    persist::{decode_block, encode_block},
    random::Random,
    telemetry::TRAINING_RESULT,
};

/// Hyperparameters of [`KMeansQuantizer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KMeansQuantizerSettings {
    /// Size of the codebook.
    pub num_clusters: usize,
    /// Upper bound on clustering iterations.
    pub max_iterations: usize,
    /// Stop once no centroid moves further than this.
    pub min_change: f64,
    /// Seed for centroid initialisation; `None` draws from entropy.
    pub random_seed: Option<u64>,
}

impl Default for KMeansQuantizerSettings {
    fn default() -> Self {
        Self {
            num_clusters: 10,
            max_iterations: 100,
            min_change: 1e-5,
            random_seed: None,
        }
    }
}

impl KMeansQuantizerSettings {
    fn clustering(&self) -> KMeansSettings {
        KMeansSettings {
            num_clusters: self.num_clusters,
            max_iterations: self.max_iterations,
            min_change: self.min_change,
            use_scaling: false,
            random_seed: self.random_seed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct QuantizerState {
    num_dimensions: usize,
    codebook: Array2<f64>,
}

/// Vector quantizer: replaces each input by the index of its nearest
/// codebook entry, learned with k-means.
#[derive(Debug, Clone)]
pub struct KMeansQuantizer {
    base: ModuleBase,
    settings: KMeansQuantizerSettings,
    state: Option<QuantizerState>,
    features: Vec<f64>,
}

impl Default for KMeansQuantizer {
    fn default() -> Self {
        Self::new(KMeansQuantizerSettings::default())
    }
}

impl KMeansQuantizer {
    /// Registry id.
    pub const ID: &'static str = "KMeansQuantizer";

    /// Creates an untrained quantizer.
    #[must_use]
    pub fn new(settings: KMeansQuantizerSettings) -> Self {
        Self {
            base: ModuleBase::new(Self::ID),
            settings,
            state: None,
            features: Vec::new(),
        }
    }

    /// Current hyperparameters.
    #[must_use]
    pub const fn settings(&self) -> &KMeansQuantizerSettings {
        &self.settings
    }

    /// Learned codebook, one row per entry.
    #[must_use]
    pub fn codebook(&self) -> Option<&Array2<f64>> {
        self.state.as_ref().map(|state| &state.codebook)
    }

    fn fit(&self, data: &UnlabelledData) -> Result<QuantizerState> {
        let clustering = self.settings.clustering();
        clustering.validate()?;
        if data.is_empty() {
            return Err(ModuleError::EmptyDataset);
        }
        let mut random = Random::from_optional_seed(self.settings.random_seed);
        let (codebook, _) = lloyd(&data.to_matrix(), &clustering, &mut random, |iteration, inertia| {
            self.base.event(
                TRAINING_RESULT,
                json!({ "iteration": iteration, "inertia": inertia }),
            );
        })?;
        Ok(QuantizerState {
            num_dimensions: data.num_dimensions(),
            codebook,
        })
    }

    fn quantize(&self, input: &[f64]) -> Result<Vec<f64>> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| ModuleError::NotTrained(Self::ID.into()))?;
        check_dimensions(state.num_dimensions, input)?;
        let (index, _) = nearest_centroid(&state.codebook, aview1(input));
        Ok(vec![index as f64])
    }
}

impl Module for KMeansQuantizer {
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
        self.features.clear();
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
        let settings: KMeansQuantizerSettings = decode_block(settings, "settings")?;
        settings.clustering().validate()?;
        let state: Option<QuantizerState> = state.map(|s| decode_block(s, "state")).transpose()?;
        self.settings = settings;
        self.state = state;
        self.features.clear();
        Ok(())
    }
}

impl FeatureExtraction for KMeansQuantizer {
    fn train(&mut self, data: &UnlabelledData) -> Result<()> {
        self.base
            .training_started(data.num_samples(), data.num_dimensions());
        let outcome = self.fit(data).map(|state| {
            self.state = Some(state);
            self.features.clear();
        });
        self.base.training_finished(outcome)
    }

    fn compute_features(&mut self, input: &[f64]) -> Result<Vec<f64>> {
        let result = self.quantize(input).map(|features| {
            self.features.clone_from(&features);
            features
        });
        self.base.record(result)
    }

    fn feature_vector(&self) -> &[f64] {
        &self.features
    }

    fn num_input_dimensions(&self) -> usize {
        self.state.as_ref().map_or(0, |state| state.num_dimensions)
    }

    fn num_output_dimensions(&self) -> usize {
        usize::from(self.state.is_some())
    }

    fn clone_box(&self) -> Box<dyn FeatureExtraction> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{blob_rows, round_trip};

    fn quantizer() -> KMeansQuantizer {
        KMeansQuantizer::new(KMeansQuantizerSettings {
            num_clusters: 3,
            random_seed: Some(11),
            ..KMeansQuantizerSettings::default()
        })
    }

    #[test]
    fn emits_one_codebook_index() {
        let mut quantizer = quantizer();
        quantizer.train(&blob_rows()).unwrap();
        assert_eq!(quantizer.num_output_dimensions(), 1);
        let near_origin = quantizer.compute_features(&[0.1, 0.0]).unwrap();
        assert_eq!(near_origin.len(), 1);
        assert!(near_origin[0] < 3.0);
        assert_eq!(
            quantizer.compute_features(&[-0.2, 0.1]).unwrap(),
            near_origin
        );
        assert_ne!(quantizer.compute_features(&[20.0, 0.0]).unwrap(), near_origin);
        assert_eq!(quantizer.feature_vector().len(), 1);
    }

    #[test]
    fn untrained_quantizer_fails() {
        let mut quantizer = quantizer();
        assert_eq!(quantizer.num_output_dimensions(), 0);
        assert!(matches!(
            quantizer.compute_features(&[0.0, 0.0]),
            Err(ModuleError::NotTrained(_))
        ));
    }

    #[test]
    fn save_load_keeps_codebook() {
        let mut quantizer = quantizer();
        quantizer.train(&blob_rows()).unwrap();
        let mut loaded = KMeansQuantizer::default();
        round_trip(&quantizer, &mut loaded);
        assert_eq!(loaded.codebook(), quantizer.codebook());
        assert_eq!(loaded.settings().num_clusters, 3);
    }
}
