//! TOML pipeline descriptions.
//!
//! ```toml
//! [pipeline]
//! use_validation_set = true
//! random_seed = 7
//!
//! [[preprocessing]]
//! type = "Normalize"
//!
//! [predictor]
//! kind = "classifier"
//! type = "MinDist"
//! settings = { null_rejection = { enabled = true, coeff = 2.0 } }
//!
//! [[postprocessing]]
//! type = "ClassLabelFilter"
//! settings = { minimum_count = 2, buffer_size = 5 }
//! ```
//!
//! Stage settings overlay the module defaults; keys the module does not know
//! are refused.
//!
//! A `BAG` classifier lists its members as sub-tables:
//!
//! ```toml
//! [predictor]
//! kind = "classifier"
//! type = "BAG"
//! settings = { bootstrap = false }
//!
//! [[predictor.members]]
//! type = "MinDist"
//!
//! [[predictor.members]]
//! type = "KNN"
//! weight = 2.0
//! settings = { k = 3 }
//! ```

use std::{fs, path::Path};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::{
    classifier::Classifier,
    ensemble::Bag,
    error::ModuleError,
    module::Module,
    pipeline::{Pipeline, PipelineOptions, Predictor, PredictorKind},
    registry::{self, Registry},
};

/// One stage: a registry id plus optional settings overrides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    /// Registry id, written `type` in the document.
    #[serde(rename = "type")]
    pub type_id: String,
    /// Overrides applied on top of the module defaults.
    #[serde(default)]
    pub settings: Option<toml::Table>,
}

/// The `[predictor]` table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PredictorConfig {
    /// Capability the predictor is looked up under.
    pub kind: PredictorKind,
    /// Registry id, written `type` in the document.
    #[serde(rename = "type")]
    pub type_id: String,
    /// Overrides applied on top of the module defaults.
    #[serde(default)]
    pub settings: Option<toml::Table>,
    /// Ensemble members; only a `BAG` classifier accepts them.
    #[serde(default)]
    pub members: Vec<MemberConfig>,
}

/// One `[[predictor.members]]` entry of an ensemble.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemberConfig {
    /// Classifier registry id, written `type` in the document.
    #[serde(rename = "type")]
    pub type_id: String,
    /// Vote weight; 1 when unset.
    #[serde(default)]
    pub weight: Option<f64>,
    /// Overrides applied on top of the member's defaults.
    #[serde(default)]
    pub settings: Option<toml::Table>,
}

/// Parsed pipeline document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Training options from the `[pipeline]` table.
    #[serde(default)]
    pub pipeline: PipelineOptions,
    /// Pre-processing stages in run order.
    #[serde(default)]
    pub preprocessing: Vec<StageConfig>,
    /// Optional feature extraction stage.
    #[serde(default)]
    pub feature_extraction: Option<StageConfig>,
    /// Final stage; a pipeline without one stays empty.
    #[serde(default)]
    pub predictor: Option<PredictorConfig>,
    /// Post-processing stages in run order.
    #[serde(default)]
    pub postprocessing: Vec<StageConfig>,
}

impl PipelineConfig {
    /// Parses a document held in memory.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("parsing pipeline config")
    }

    /// Loads a document from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// Instantiates every stage through the process-wide registries.
    pub fn build(&self) -> Result<Pipeline> {
        let mut pipeline =
            Pipeline::with_options(self.pipeline.clone()).context("invalid [pipeline] options")?;
        for (index, stage) in self.preprocessing.iter().enumerate() {
            let module = instantiate(registry::preprocessing(), &stage.type_id, stage.settings.as_ref())
                .with_context(|| format!("preprocessing[{index}]"))?;
            pipeline.add_preprocessing(module);
        }
        if let Some(stage) = &self.feature_extraction {
            let module = instantiate(
                registry::feature_extraction(),
                &stage.type_id,
                stage.settings.as_ref(),
            )
            .context("feature_extraction")?;
            pipeline.set_feature_extraction(module);
        }
        if let Some(predictor) = &self.predictor {
            pipeline.set_predictor(build_predictor(predictor).context("predictor")?);
        }
        for (index, stage) in self.postprocessing.iter().enumerate() {
            let module = instantiate(registry::postprocessing(), &stage.type_id, stage.settings.as_ref())
                .with_context(|| format!("postprocessing[{index}]"))?;
            pipeline.add_postprocessing(module);
        }
        Ok(pipeline)
    }
}

/// Reads a pipeline config file and builds the untrained pipeline.
pub fn load_pipeline(path: impl AsRef<Path>) -> Result<Pipeline> {
    let path = path.as_ref();
    PipelineConfig::load(path)?
        .build()
        .with_context(|| format!("building pipeline from {}", path.display()))
}

fn build_predictor(config: &PredictorConfig) -> Result<Predictor> {
    let settings = config.settings.as_ref();
    if !config.members.is_empty() {
        if config.kind != PredictorKind::Classifier || config.type_id != Bag::ID {
            bail!(
                "only a {} classifier takes members, not {} {}",
                Bag::ID,
                config.kind,
                config.type_id
            );
        }
        return Ok(Predictor::Classifier(build_bag(settings, &config.members)?));
    }
    Ok(match config.kind {
        PredictorKind::Classifier => Predictor::Classifier(instantiate(
            registry::classifiers(),
            &config.type_id,
            settings,
        )?),
        PredictorKind::Regressor => Predictor::Regressor(instantiate(
            registry::regressors(),
            &config.type_id,
            settings,
        )?),
        PredictorKind::Clusterer => Predictor::Clusterer(instantiate(
            registry::clusterers(),
            &config.type_id,
            settings,
        )?),
    })
}

fn build_bag(settings: Option<&toml::Table>, members: &[MemberConfig]) -> Result<Box<dyn Classifier>> {
    let mut bag = Bag::default();
    if let Some(settings) = settings {
        let overrides = serde_json::to_value(settings).context("converting settings of BAG")?;
        bag.configure(overrides).context("configuring BAG")?;
    }
    for (index, member) in members.iter().enumerate() {
        let classifier = instantiate(registry::classifiers(), &member.type_id, member.settings.as_ref())
            .with_context(|| format!("members[{index}]"))?;
        bag.add_weighted_member(classifier, member.weight.unwrap_or(1.0))
            .with_context(|| format!("members[{index}] ({})", member.type_id))?;
    }
    Ok(Box::new(bag))
}

fn instantiate<T>(registry: &Registry<T>, type_id: &str, settings: Option<&toml::Table>) -> Result<Box<T>>
where
    T: Module + ?Sized,
{
    let mut module = registry
        .create(type_id)
        .ok_or_else(|| ModuleError::UnknownType {
            capability: registry.capability(),
            id: type_id.to_owned(),
        })?;
    if let Some(settings) = settings {
        let overrides = serde_json::to_value(settings)
            .with_context(|| format!("converting settings of {type_id}"))?;
        module
            .configure(overrides)
            .with_context(|| format!("configuring {type_id}"))?;
    }
    Ok(module)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::{
        pipeline::{PipelineState, Prediction},
        test_support::three_blobs,
    };

    const CLASSIFIER_DOC: &str = r#"
        [pipeline]
        use_validation_set = true
        validation_set_size = 20
        random_seed = 7

        [[preprocessing]]
        type = "Normalize"

        [predictor]
        kind = "classifier"
        type = "MinDist"
        settings = { null_rejection = { coeff = 2.0 } }

        [[postprocessing]]
        type = "ClassLabelFilter"
        settings = { minimum_count = 1, buffer_size = 1 }
    "#;

    #[test]
    fn builds_and_trains_a_described_pipeline() {
        let config = PipelineConfig::from_toml_str(CLASSIFIER_DOC).unwrap();
        assert_eq!(config.pipeline.random_seed, Some(7));
        assert_eq!(config.preprocessing.len(), 1);

        let mut pipeline = config.build().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Configured);
        let classifier = pipeline.classifier().unwrap();
        assert_eq!(classifier.null_rejection_coeff(), Some(2.0));
        assert!(!classifier.null_rejection().unwrap().enabled);

        pipeline.train(&three_blobs()).unwrap();
        assert!(pipeline.validation_score().is_some());
        assert_eq!(pipeline.predict(&[0.1, 0.0]).unwrap(), Prediction::Class(1));
    }

    #[test]
    fn unknown_type_ids_are_reported_with_their_stage() {
        let err = PipelineConfig::from_toml_str(
            r#"
            [[preprocessing]]
            type = "Wavelet"
            "#,
        )
        .unwrap()
        .build()
        .unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("preprocessing[0]"), "{message}");
        assert!(message.contains("Wavelet"), "{message}");
    }

    #[test]
    fn invalid_or_unknown_settings_are_refused() {
        for doc in [
            r#"
            [[preprocessing]]
            type = "Normalize"
            settings = { target_min = 1.0, target_max = 0.0 }
            "#,
            r#"
            [predictor]
            kind = "clusterer"
            type = "KMeans"
            settings = { clusters = 3 }
            "#,
            r#"
            [predictor]
            kind = "regressor"
            type = "MinDist"
            "#,
        ] {
            assert!(PipelineConfig::from_toml_str(doc).unwrap().build().is_err());
        }
        assert!(PipelineConfig::from_toml_str("[pipeline]\nvalidation_set_size = 0")
            .unwrap()
            .build()
            .is_err());
        assert!(PipelineConfig::from_toml_str("[pipeline]\nshuffle = true").is_err());
    }

    #[test]
    fn document_without_predictor_builds_an_empty_pipeline() {
        let pipeline = PipelineConfig::from_toml_str("[[preprocessing]]\ntype = \"MovingAverageFilter\"")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(pipeline.state(), PipelineState::Empty);
        assert_eq!(pipeline.preprocessing().len(), 1);
    }

    #[test]
    fn loads_from_disk_with_path_context() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CLASSIFIER_DOC.as_bytes()).unwrap();
        let pipeline = load_pipeline(file.path()).unwrap();
        assert_eq!(pipeline.postprocessing().len(), 1);

        let missing = file.path().with_extension("missing");
        let err = load_pipeline(&missing).unwrap_err();
        assert!(format!("{err:#}").contains("reading pipeline config"));
    }

    const BAG_DOC: &str = r#"
        [predictor]
        kind = "classifier"
        type = "BAG"
        settings = { bootstrap = false, random_seed = 3 }

        [[predictor.members]]
        type = "MinDist"

        [[predictor.members]]
        type = "KNN"
        weight = 2.0
        settings = { k = 3 }
    "#;

    #[test]
    fn ensemble_members_come_from_sub_tables() {
        let config = PipelineConfig::from_toml_str(BAG_DOC).unwrap();
        let members = &config.predictor.as_ref().unwrap().members;
        assert_eq!(members.len(), 2);
        assert_eq!(members[1].weight, Some(2.0));

        let mut pipeline = config.build().unwrap();
        let classifier = pipeline.classifier().unwrap();
        assert_eq!(classifier.id(), Bag::ID);
        pipeline.train(&three_blobs()).unwrap();
        assert_eq!(pipeline.state(), PipelineState::Trained);
        assert_eq!(pipeline.predict(&[10.0, 0.0]).unwrap(), Prediction::Class(2));
        assert_eq!(pipeline.predict(&[20.2, 0.1]).unwrap(), Prediction::Class(3));
    }

    #[test]
    fn members_are_refused_outside_an_ensemble() {
        for doc in [
            r#"
            [predictor]
            kind = "classifier"
            type = "MinDist"
            [[predictor.members]]
            type = "KNN"
            "#,
            r#"
            [predictor]
            kind = "classifier"
            type = "BAG"
            [[predictor.members]]
            type = "KNN"
            weight = -1.0
            "#,
            r#"
            [predictor]
            kind = "classifier"
            type = "BAG"
            [[predictor.members]]
            type = "LinearRegression"
            "#,
        ] {
            assert!(PipelineConfig::from_toml_str(doc).unwrap().build().is_err());
        }
    }
}
