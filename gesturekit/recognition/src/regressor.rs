use crate::{
    data::RegressionData,
    error::Result,
    module::{boxed_clone, Module},
};

/// Modules that map inputs to continuous target vectors.
pub trait Regressor: Module {
    /// Fits the regressor. On failure the previous state is kept.
    fn train(&mut self, data: &RegressionData) -> Result<()>;

    /// Maps one input vector to an output vector.
    fn predict(&mut self, input: &[f64]) -> Result<Vec<f64>>;

    /// Output of the last successful prediction.
    fn regression_data(&self) -> &[f64];

    /// Input dimensionality of the trained model; 0 when untrained.
    fn num_input_dimensions(&self) -> usize;

    /// Output dimensionality of the trained model; 0 when untrained.
    fn num_output_dimensions(&self) -> usize;

    /// Deep copy behind a fresh box.
    fn clone_box(&self) -> Box<dyn Regressor>;
}

boxed_clone!(Regressor);
