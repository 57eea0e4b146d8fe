use crate::{
    data::UnlabelledData,
    error::Result,
    module::{boxed_clone, Module},
};

/// Stages that turn (pre-processed) inputs into feature vectors.
pub trait FeatureExtraction: Module {
    /// Fits the extractor.
    fn train(&mut self, data: &UnlabelledData) -> Result<()>;

    /// Computes the feature vector of one input.
    fn compute_features(&mut self, input: &[f64]) -> Result<Vec<f64>>;

    /// Output of the last successful `compute_features` call.
    fn feature_vector(&self) -> &[f64];

    /// Expected input dimensionality; 0 when untrained.
    fn num_input_dimensions(&self) -> usize;

    /// Feature dimensionality; 0 when untrained.
    fn num_output_dimensions(&self) -> usize;

    /// Deep copy behind a fresh box.
    fn clone_box(&self) -> Box<dyn FeatureExtraction>;
}

boxed_clone!(FeatureExtraction);
