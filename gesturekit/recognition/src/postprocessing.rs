use crate::{
    error::Result,
    module::{boxed_clone, Module},
};

/// Stages that filter the class label predicted by a classifier.
pub trait PostProcessing: Module {
    /// Prepares the stage for the classes a classifier was trained on.
    fn train(&mut self, class_labels: &[u32]) -> Result<()>;

    /// Filters one predicted label.
    fn process(&mut self, label: u32) -> Result<u32>;

    /// Output of the last successful `process` call.
    fn processed_label(&self) -> u32;

    /// Deep copy behind a fresh box.
    fn clone_box(&self) -> Box<dyn PostProcessing>;
}

boxed_clone!(PostProcessing);
