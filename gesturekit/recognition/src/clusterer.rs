use crate::{
    data::UnlabelledData,
    error::Result,
    module::{boxed_clone, Module},
};

/// Modules that group unlabelled inputs.
pub trait Clusterer: Module {
    /// Fits the clusters. On failure the previous state is kept.
    fn train(&mut self, data: &UnlabelledData) -> Result<()>;

    /// Assigns one input vector to a cluster and returns its label (`1..=K`).
    fn predict(&mut self, input: &[f64]) -> Result<u32>;

    /// Label of the last prediction; 0 before any prediction.
    fn predicted_cluster_label(&self) -> u32;

    /// Per-cluster likelihoods of the last prediction.
    fn cluster_likelihoods(&self) -> &[f64];

    /// Number of fitted clusters.
    fn num_clusters(&self) -> usize;

    /// Input dimensionality of the trained model; 0 when untrained.
    fn num_input_dimensions(&self) -> usize;

    /// Deep copy behind a fresh box.
    fn clone_box(&self) -> Box<dyn Clusterer>;
}

boxed_clone!(Clusterer);
