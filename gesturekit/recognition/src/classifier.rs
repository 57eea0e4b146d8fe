use serde::{Deserialize, Serialize};

use crate::{
    data::{ClassificationData, NULL_CLASS_LABEL},
    error::{ModuleError, Result},
    module::{boxed_clone, Module},
};

/// Rejection coefficient used until one is configured.
pub const DEFAULT_NULL_REJECTION_COEFF: f64 = 5.0;

/// Null-rejection settings shared by classifiers that support it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NullRejection {
    /// Whether low-confidence predictions collapse to the null class.
    pub enabled: bool,
    /// Scales the per-class spread when deriving thresholds; must be > 0.
    pub coeff: f64,
}

impl Default for NullRejection {
    fn default() -> Self {
        Self {
            enabled: false,
            coeff: DEFAULT_NULL_REJECTION_COEFF,
        }
    }
}

impl NullRejection {
    /// Refuses non-positive or non-finite coefficients.
    pub fn validate(&self) -> Result<()> {
        check_coeff(self.coeff)
    }

    /// Threshold `mu + coeff * sigma`.
    #[must_use]
    pub fn threshold(&self, mu: f64, sigma: f64) -> f64 {
        self.coeff.mul_add(sigma, mu)
    }
}

fn check_coeff(coeff: f64) -> Result<()> {
    if coeff.is_finite() && coeff > 0.0 {
        Ok(())
    } else {
        Err(ModuleError::invalid(
            "null_rejection_coeff",
            format!("{coeff} must be strictly positive"),
        ))
    }
}

/// Outcome of the last successful [`Classifier::predict`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassPrediction {
    /// Predicted class id; 0 when rejected.
    pub label: u32,
    /// Likelihood of the winning class.
    pub maximum_likelihood: f64,
    /// Per-class likelihoods in class label order.
    pub likelihoods: Vec<f64>,
    /// Per-class distances (or scores) in class label order.
    pub distances: Vec<f64>,
}

/// Modules that assign class labels.
pub trait Classifier: Module {
    /// Fits the classifier. On failure the previous state is kept.
    fn train(&mut self, data: &ClassificationData) -> Result<()>;

    /// Classifies one input vector and returns the predicted label.
    fn predict(&mut self, input: &[f64]) -> Result<u32>;

    /// Result of the last successful prediction.
    fn prediction(&self) -> Option<&ClassPrediction>;

    /// Class ids seen during training, sorted.
    fn class_labels(&self) -> Vec<u32>;

    /// Input dimensionality of the trained model; 0 when untrained.
    fn num_input_dimensions(&self) -> usize;

    /// Deep copy behind a fresh box.
    fn clone_box(&self) -> Box<dyn Classifier>;

    /// Null-rejection settings, `None` when unsupported.
    fn null_rejection(&self) -> Option<&NullRejection> {
        None
    }

    /// Mutable null-rejection settings, `None` when unsupported.
    fn null_rejection_mut(&mut self) -> Option<&mut NullRejection> {
        None
    }

    /// Recomputes thresholds from stored training statistics.
    fn update_null_rejection_thresholds(&mut self) {}

    /// Per-class rejection thresholds; empty when untrained or unsupported.
    fn null_rejection_thresholds(&self) -> Vec<f64> {
        Vec::new()
    }

    /// Number of trained classes.
    fn num_classes(&self) -> usize {
        self.class_labels().len()
    }

    /// Label of the last prediction; 0 before any prediction.
    fn predicted_class_label(&self) -> u32 {
        self.prediction().map_or(NULL_CLASS_LABEL, |p| p.label)
    }

    /// Likelihood of the last predicted class.
    fn maximum_likelihood(&self) -> f64 {
        self.prediction().map_or(0.0, |p| p.maximum_likelihood)
    }

    /// Per-class likelihoods of the last prediction.
    fn class_likelihoods(&self) -> Vec<f64> {
        self.prediction()
            .map(|p| p.likelihoods.clone())
            .unwrap_or_default()
    }

    /// Per-class distances of the last prediction.
    fn class_distances(&self) -> Vec<f64> {
        self.prediction()
            .map(|p| p.distances.clone())
            .unwrap_or_default()
    }

    /// Current rejection coefficient, if supported.
    fn null_rejection_coeff(&self) -> Option<f64> {
        self.null_rejection().map(|nr| nr.coeff)
    }

    /// Sets the rejection coefficient; values <= 0 fail and keep the old one.
    fn set_null_rejection_coeff(&mut self, coeff: f64) -> Result<()> {
        let id = self.id();
        let result = check_coeff(coeff).and_then(|()| {
            let settings = self.null_rejection_mut().ok_or_else(|| {
                ModuleError::Precondition(format!("{id} does not support null rejection"))
            })?;
            settings.coeff = coeff;
            Ok(())
        });
        if result.is_ok() {
            self.update_null_rejection_thresholds();
        }
        self.base().record(result)
    }

    /// Turns null rejection on or off.
    fn enable_null_rejection(&mut self, enabled: bool) -> Result<()> {
        let id = self.id();
        let result = self
            .null_rejection_mut()
            .map(|settings| settings.enabled = enabled)
            .ok_or_else(|| {
                ModuleError::Precondition(format!("{id} does not support null rejection"))
            });
        self.base().record(result)
    }
}

boxed_clone!(Classifier);

/// Fills likelihoods from distances (`1 / (d + 1e-4)`, normalised) and
/// picks the nearest class.
///
/// Returns the prediction with `label` set to the nearest class.
#[must_use]
pub fn likelihoods_from_distances(labels: &[u32], distances: Vec<f64>) -> ClassPrediction {
    let inverse: Vec<f64> = distances.iter().map(|d| 1.0 / (d + 1e-4)).collect();
    let total: f64 = inverse.iter().sum();
    let likelihoods: Vec<f64> = if total > 0.0 {
        inverse.iter().map(|v| v / total).collect()
    } else {
        vec![0.0; inverse.len()]
    };
    let best = crate::util::arg_min(&distances).unwrap_or(0);
    ClassPrediction {
        label: labels.get(best).copied().unwrap_or(NULL_CLASS_LABEL),
        maximum_likelihood: likelihoods.get(best).copied().unwrap_or(0.0),
        likelihoods,
        distances,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_coeff_is_positive() {
        let nr = NullRejection::default();
        assert!(!nr.enabled);
        assert!(nr.validate().is_ok());
        assert!((nr.threshold(1.0, 0.5) - 3.5).abs() < 1e-12);
    }

    #[test]
    fn coefficient_domain() {
        assert!(check_coeff(0.0).is_err());
        assert!(check_coeff(-1.0).is_err());
        assert!(check_coeff(f64::NAN).is_err());
        assert!(check_coeff(0.1).is_ok());
    }

    #[test]
    fn nearest_class_wins() {
        let prediction = likelihoods_from_distances(&[1, 2, 3], vec![4.0, 0.5, 2.0]);
        assert_eq!(prediction.label, 2);
        let sum: f64 = prediction.likelihoods.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(prediction.likelihoods[1] > prediction.likelihoods[2]);
    }
}
