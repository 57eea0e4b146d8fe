use std::{fmt, sync::Arc};

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::{
    classifier::Classifier,
    clusterer::Clusterer,
    ensemble::Bag,
    feature_extraction::FeatureExtraction,
    modules::{
        ClassLabelFilter, KMeans, KMeansQuantizer, Knn, LinearRegression, MinDist,
        MovingAverageFilter, Normalize,
    },
    postprocessing::PostProcessing,
    preprocessing::PreProcessing,
    regressor::Regressor,
};

/// Factory producing a default-configured instance.
pub type Factory<T> = Arc<dyn Fn() -> Box<T> + Send + Sync>;

/// Maps stable type ids to factories for one capability.
pub struct Registry<T: ?Sized> {
    capability: &'static str,
    factories: RwLock<IndexMap<String, Factory<T>>>,
    aliases: RwLock<IndexMap<String, String>>,
}

impl<T: ?Sized> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("capability", &self.capability)
            .field("ids", &self.list_registered())
            .finish()
    }
}

impl<T: ?Sized> Registry<T> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(capability: &'static str) -> Self {
        Self {
            capability,
            factories: RwLock::new(IndexMap::new()),
            aliases: RwLock::new(IndexMap::new()),
        }
    }

    /// Capability name used in error messages.
    #[must_use]
    pub const fn capability(&self) -> &'static str {
        self.capability
    }

    /// Registers or replaces the factory for `id`.
    pub fn register<F>(&self, id: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<T> + Send + Sync + 'static,
    {
        self.factories.write().insert(id.into(), Arc::new(factory));
    }

    /// Lets a retired id resolve to a current one.
    pub fn register_alias(&self, alias: impl Into<String>, current: impl Into<String>) {
        self.aliases.write().insert(alias.into(), current.into());
    }

    /// Resolves an alias to its registered id; registered ids map to themselves.
    #[must_use]
    pub fn resolve(&self, id: &str) -> Option<String> {
        if self.factories.read().contains_key(id) {
            return Some(id.to_owned());
        }
        let current = self.aliases.read().get(id).cloned()?;
        self.factories
            .read()
            .contains_key(&current)
            .then_some(current)
    }

    /// Instantiates the type registered under `id` or one of its aliases.
    #[must_use]
    pub fn create(&self, id: &str) -> Option<Box<T>> {
        let id = self.resolve(id)?;
        // Invoke outside the lock so factories may consult the registry.
        let factory = self.factories.read().get(&id).cloned()?;
        Some(factory())
    }

    /// True when `id` or an alias of it is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.resolve(id).is_some()
    }

    /// Registered ids in registration order.
    #[must_use]
    pub fn list_registered(&self) -> Vec<String> {
        self.factories.read().keys().cloned().collect()
    }
}

static CLASSIFIERS: Lazy<Registry<dyn Classifier>> = Lazy::new(|| {
    let registry = Registry::new("classifier");
    registry.register(MinDist::ID, || Box::new(MinDist::default()) as Box<dyn Classifier>);
    registry.register(Knn::ID, || Box::new(Knn::default()) as Box<dyn Classifier>);
    registry.register(Bag::ID, || Box::new(Bag::default()) as Box<dyn Classifier>);
    registry.register_alias("MINDIST", MinDist::ID);
    registry
});

static REGRESSORS: Lazy<Registry<dyn Regressor>> = Lazy::new(|| {
    let registry = Registry::new("regressor");
    registry.register(LinearRegression::ID, || {
        Box::new(LinearRegression::default()) as Box<dyn Regressor>
    });
    registry
});

static CLUSTERERS: Lazy<Registry<dyn Clusterer>> = Lazy::new(|| {
    let registry = Registry::new("clusterer");
    registry.register(KMeans::ID, || Box::new(KMeans::default()) as Box<dyn Clusterer>);
    registry
});

static PREPROCESSING: Lazy<Registry<dyn PreProcessing>> = Lazy::new(|| {
    let registry = Registry::new("preprocessing module");
    registry.register(MovingAverageFilter::ID, || {
        Box::new(MovingAverageFilter::default()) as Box<dyn PreProcessing>
    });
    registry.register(Normalize::ID, || {
        Box::new(Normalize::default()) as Box<dyn PreProcessing>
    });
    registry
});

static FEATURE_EXTRACTION: Lazy<Registry<dyn FeatureExtraction>> = Lazy::new(|| {
    let registry = Registry::new("feature extraction module");
    registry.register(KMeansQuantizer::ID, || {
        Box::new(KMeansQuantizer::default()) as Box<dyn FeatureExtraction>
    });
    registry
});

static POSTPROCESSING: Lazy<Registry<dyn PostProcessing>> = Lazy::new(|| {
    let registry = Registry::new("postprocessing module");
    registry.register(ClassLabelFilter::ID, || {
        Box::new(ClassLabelFilter::default()) as Box<dyn PostProcessing>
    });
    registry
});

/// Process-wide classifier registry.
#[must_use]
pub fn classifiers() -> &'static Registry<dyn Classifier> {
    &CLASSIFIERS
}

/// Process-wide regressor registry.
#[must_use]
pub fn regressors() -> &'static Registry<dyn Regressor> {
    &REGRESSORS
}

/// Process-wide clusterer registry.
#[must_use]
pub fn clusterers() -> &'static Registry<dyn Clusterer> {
    &CLUSTERERS
}

/// Process-wide preprocessing registry.
#[must_use]
pub fn preprocessing() -> &'static Registry<dyn PreProcessing> {
    &PREPROCESSING
}

/// Process-wide feature extraction registry.
#[must_use]
pub fn feature_extraction() -> &'static Registry<dyn FeatureExtraction> {
    &FEATURE_EXTRACTION
}

/// Process-wide postprocessing registry.
#[must_use]
pub fn postprocessing() -> &'static Registry<dyn PostProcessing> {
    &POSTPROCESSING
}

/// Registered id an alias resolves to, searching every process-wide registry.
#[must_use]
pub fn canonical_id(id: &str) -> Option<String> {
    classifiers()
        .resolve(id)
        .or_else(|| regressors().resolve(id))
        .or_else(|| clusterers().resolve(id))
        .or_else(|| preprocessing().resolve(id))
        .or_else(|| feature_extraction().resolve(id))
        .or_else(|| postprocessing().resolve(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Module;

    #[test]
    fn unknown_ids_are_none() {
        assert!(classifiers().create("nonexistent-id").is_none());
        assert!(!preprocessing().contains("nonexistent-id"));
    }

    #[test]
    fn created_instances_report_their_id() {
        for id in [MinDist::ID, Knn::ID, Bag::ID] {
            let module = classifiers().create(id).unwrap();
            assert_eq!(module.id(), id);
            assert!(!module.trained());
        }
        assert_eq!(
            regressors().create(LinearRegression::ID).unwrap().id(),
            LinearRegression::ID
        );
        assert_eq!(clusterers().create(KMeans::ID).unwrap().id(), KMeans::ID);
        assert_eq!(
            feature_extraction().create(KMeansQuantizer::ID).unwrap().id(),
            KMeansQuantizer::ID
        );
        assert_eq!(
            postprocessing().create(ClassLabelFilter::ID).unwrap().id(),
            ClassLabelFilter::ID
        );
    }

    #[test]
    fn bootstrap_list_is_ordered() {
        let ids = preprocessing().list_registered();
        assert_eq!(ids, vec![MovingAverageFilter::ID, Normalize::ID]);
    }

    #[test]
    fn aliases_resolve_to_current_ids() {
        assert_eq!(classifiers().create("MINDIST").unwrap().id(), MinDist::ID);
        assert_eq!(canonical_id("MINDIST").as_deref(), Some(MinDist::ID));
        assert!(canonical_id("nope").is_none());
    }

    #[test]
    fn local_registries_accept_new_types() {
        let registry: Registry<dyn PreProcessing> = Registry::new("preprocessing module");
        assert!(registry.list_registered().is_empty());
        registry.register("Smoother", || {
            Box::new(MovingAverageFilter::default()) as Box<dyn PreProcessing>
        });
        registry.register_alias("OldSmoother", "Smoother");
        registry.register_alias("Dangling", "Missing");
        assert!(registry.contains("OldSmoother"));
        assert!(!registry.contains("Dangling"));
        assert!(registry.create("Smoother").is_some());
    }
}
