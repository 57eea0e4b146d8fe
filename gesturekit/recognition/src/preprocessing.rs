use crate::{
    data::UnlabelledData,
    error::Result,
    module::{boxed_clone, Module},
};

/// Signal conditioning stages that run before feature extraction.
pub trait PreProcessing: Module {
    /// Fits the stage on raw inputs.
    fn train(&mut self, data: &UnlabelledData) -> Result<()>;

    /// Transforms one input vector.
    fn process(&mut self, input: &[f64]) -> Result<Vec<f64>>;

    /// Output of the last successful `process` call.
    fn processed_data(&self) -> &[f64];

    /// Expected input dimensionality; 0 when untrained.
    fn num_input_dimensions(&self) -> usize;

    /// Produced output dimensionality; 0 when untrained.
    fn num_output_dimensions(&self) -> usize;

    /// Deep copy behind a fresh box.
    fn clone_box(&self) -> Box<dyn PreProcessing>;
}

boxed_clone!(PreProcessing);
