//! Test metrics for classification and regression runs.

use std::time::Duration;

use ndarray::Array2;
use serde::Serialize;

use crate::{
    data::NULL_CLASS_LABEL,
    error::{ModuleError, Result},
};

/// Outcome of testing a classification pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestReport {
    /// Number of test samples.
    pub num_samples: usize,
    /// Percentage of samples whose predicted label matched.
    pub accuracy: f64,
    /// Model class labels; index `k` of the per-class vectors refers to
    /// `class_labels[k]`.
    pub class_labels: Vec<u32>,
    /// Per-class precision.
    pub precision: Vec<f64>,
    /// Per-class recall.
    pub recall: Vec<f64>,
    /// Per-class F1 score.
    pub f_measure: Vec<f64>,
    /// Share of null predictions whose true label was null.
    pub rejection_precision: f64,
    /// Share of null samples that were predicted null.
    pub rejection_recall: f64,
    /// Row-normalised confusion matrix, rows = true class, columns =
    /// predicted class. When `includes_null` is set, row and column 0 belong
    /// to the null class and the model classes follow.
    pub confusion_matrix: Array2<f64>,
    /// Whether the null class has its own row and column.
    pub includes_null: bool,
    /// Wall time of the test run.
    pub test_time: Duration,
}

impl TestReport {
    /// One-line summary for logs.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "accuracy={:.2}% samples={} classes={}",
            self.accuracy,
            self.num_samples,
            self.class_labels.len()
        )
    }

    /// Mean of the per-class F-measures.
    #[must_use]
    pub fn mean_f_measure(&self) -> f64 {
        crate::util::mean(&self.f_measure)
    }
}

/// Running counters that turn (true, predicted) label pairs into a
/// [`TestReport`].
///
/// Call [`ConfusionTally::update`] once per test sample, then
/// [`ConfusionTally::finish`].
#[derive(Debug, Clone)]
pub struct ConfusionTally {
    class_labels: Vec<u32>,
    includes_null: bool,
    samples: usize,
    correct: usize,
    precision_hits: Vec<f64>,
    precision_counts: Vec<f64>,
    recall_hits: Vec<f64>,
    recall_counts: Vec<f64>,
    rejection_precision: (f64, f64),
    rejection_recall: (f64, f64),
    confusion: Array2<f64>,
}

impl ConfusionTally {
    /// Starts a tally for a model with `class_labels`; `includes_null` adds
    /// the null class as an extra outcome.
    #[must_use]
    pub fn new(class_labels: Vec<u32>, includes_null: bool) -> Self {
        let k = class_labels.len();
        let side = k + usize::from(includes_null);
        Self {
            class_labels,
            includes_null,
            samples: 0,
            correct: 0,
            precision_hits: vec![0.0; k],
            precision_counts: vec![0.0; k],
            recall_hits: vec![0.0; k],
            recall_counts: vec![0.0; k],
            rejection_precision: (0.0, 0.0),
            rejection_recall: (0.0, 0.0),
            confusion: Array2::zeros((side, side)),
        }
    }

    /// Matrix row/column of `label`, or `None` when it is not an outcome.
    fn slot(&self, label: u32) -> Option<usize> {
        let offset = usize::from(self.includes_null);
        if label == NULL_CLASS_LABEL && self.includes_null {
            return Some(0);
        }
        self.class_labels
            .iter()
            .position(|l| *l == label)
            .map(|index| index + offset)
    }

    /// Records one prediction.
    pub fn update(&mut self, actual: u32, predicted: u32) -> Result<()> {
        let row = self.slot(actual).ok_or_else(|| {
            ModuleError::InvalidData(format!("test label {actual} is unknown to the model"))
        })?;
        let col = self.slot(predicted).ok_or_else(|| {
            ModuleError::InvalidData(format!("predicted label {predicted} is unknown to the model"))
        })?;
        let offset = usize::from(self.includes_null);
        self.samples += 1;
        if actual == predicted {
            self.correct += 1;
        }
        if predicted != NULL_CLASS_LABEL || !self.includes_null {
            let k = col - offset;
            self.precision_counts[k] += 1.0;
            if actual == predicted {
                self.precision_hits[k] += 1.0;
            }
        }
        if actual != NULL_CLASS_LABEL || !self.includes_null {
            let k = row - offset;
            self.recall_counts[k] += 1.0;
            if actual == predicted {
                self.recall_hits[k] += 1.0;
            }
        }
        if self.includes_null {
            if predicted == NULL_CLASS_LABEL {
                self.rejection_precision.1 += 1.0;
                if actual == NULL_CLASS_LABEL {
                    self.rejection_precision.0 += 1.0;
                }
            }
            if actual == NULL_CLASS_LABEL {
                self.rejection_recall.1 += 1.0;
                if predicted == NULL_CLASS_LABEL {
                    self.rejection_recall.0 += 1.0;
                }
            }
        }
        self.confusion[[row, col]] += 1.0;
        Ok(())
    }

    /// Samples recorded so far.
    #[must_use]
    pub const fn num_samples(&self) -> usize {
        self.samples
    }

    /// Normalises the counters.
    #[must_use]
    pub fn finish(self, test_time: Duration) -> TestReport {
        let ratio = |hits: f64, count: f64| if count > 0.0 { hits / count } else { 0.0 };
        let precision: Vec<f64> = self
            .precision_hits
            .iter()
            .zip(&self.precision_counts)
            .map(|(h, c)| ratio(*h, *c))
            .collect();
        let recall: Vec<f64> = self
            .recall_hits
            .iter()
            .zip(&self.recall_counts)
            .map(|(h, c)| ratio(*h, *c))
            .collect();
        let f_measure = precision
            .iter()
            .zip(&recall)
            .map(|(p, r)| if p + r > 0.0 { 2.0 * p * r / (p + r) } else { 0.0 })
            .collect();
        let mut confusion_matrix = self.confusion;
        for mut row in confusion_matrix.rows_mut() {
            let total = row.sum();
            if total > 0.0 {
                row /= total;
            }
        }
        TestReport {
            num_samples: self.samples,
            accuracy: ratio(self.correct as f64, self.samples as f64) * 100.0,
            class_labels: self.class_labels,
            precision,
            recall,
            f_measure,
            rejection_precision: ratio(self.rejection_precision.0, self.rejection_precision.1),
            rejection_recall: ratio(self.rejection_recall.0, self.rejection_recall.1),
            confusion_matrix,
            includes_null: self.includes_null,
            test_time,
        }
    }
}

/// Outcome of testing a regression pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegressionReport {
    /// Number of test samples.
    pub num_samples: usize,
    /// Summed squared error over every sample and target dimension.
    pub ss_error: f64,
    /// `sqrt(ss_error / num_samples)`.
    pub rms_error: f64,
    /// Wall time of the test run.
    pub test_time: Duration,
}

impl RegressionReport {
    /// Builds the report from a summed squared error.
    #[must_use]
    pub fn from_squared_error(ss_error: f64, num_samples: usize, test_time: Duration) -> Self {
        let rms_error = if num_samples == 0 {
            0.0
        } else {
            (ss_error / num_samples as f64).sqrt()
        };
        Self {
            num_samples,
            ss_error,
            rms_error,
            test_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_predictions() {
        let mut tally = ConfusionTally::new(vec![1, 2], false);
        for label in [1, 2, 2, 1] {
            tally.update(label, label).unwrap();
        }
        let report = tally.finish(Duration::ZERO);
        assert_eq!(report.accuracy, 100.0);
        assert_eq!(report.precision, vec![1.0, 1.0]);
        assert_eq!(report.f_measure, vec![1.0, 1.0]);
        assert_eq!(report.confusion_matrix[[0, 0]], 1.0);
        assert_eq!(report.confusion_matrix[[1, 0]], 0.0);
    }

    #[test]
    fn counts_precision_and_recall_per_class() {
        let mut tally = ConfusionTally::new(vec![1, 2], false);
        tally.update(1, 1).unwrap();
        tally.update(1, 2).unwrap();
        tally.update(2, 2).unwrap();
        tally.update(2, 2).unwrap();
        let report = tally.finish(Duration::ZERO);
        assert_eq!(report.accuracy, 75.0);
        assert_eq!(report.precision, vec![1.0, 2.0 / 3.0]);
        assert_eq!(report.recall, vec![0.5, 1.0]);
        assert!((report.f_measure[0] - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(report.confusion_matrix[[0, 1]], 0.5);
        assert!(report.summary().contains("accuracy=75.00%"));
    }

    #[test]
    fn null_class_gets_its_own_row_and_column() {
        let mut tally = ConfusionTally::new(vec![1, 2], true);
        tally.update(1, 0).unwrap();
        tally.update(0, 0).unwrap();
        tally.update(0, 2).unwrap();
        tally.update(2, 2).unwrap();
        let report = tally.finish(Duration::ZERO);
        assert_eq!(report.confusion_matrix.dim(), (3, 3));
        assert_eq!(report.rejection_precision, 0.5);
        assert_eq!(report.rejection_recall, 0.5);
        assert_eq!(report.confusion_matrix[[0, 2]], 0.5);
        assert_eq!(report.recall, vec![0.0, 1.0]);
        assert_eq!(report.precision, vec![0.0, 0.5]);
    }

    #[test]
    fn unknown_labels_are_rejected() {
        let mut tally = ConfusionTally::new(vec![1, 2], false);
        assert!(tally.update(7, 1).is_err());
        assert!(tally.update(1, 0).is_err());
        assert_eq!(tally.num_samples(), 0);
    }

    #[test]
    fn rms_from_squared_error() {
        let report = RegressionReport::from_squared_error(8.0, 2, Duration::ZERO);
        assert_eq!(report.rms_error, 2.0);
        assert_eq!(RegressionReport::from_squared_error(0.0, 0, Duration::ZERO).rms_error, 0.0);
    }
}
