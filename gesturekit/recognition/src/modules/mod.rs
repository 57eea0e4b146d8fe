//! Built-in algorithms, one per file, registered in [`crate::registry`].

/// Majority filter over recent class labels.
pub mod class_label_filter;
/// K-means clusterer.
pub mod kmeans;
/// K-means codebook feature extraction.
pub mod kmeans_quantizer;
/// K-nearest-neighbour classifier.
pub mod knn;
/// Least-squares linear regression.
pub mod linear_regression;
/// Minimum-distance classifier.
pub mod min_dist;
/// Moving-average pre-processing filter.
pub mod moving_average;
/// Min-max normalisation.
pub mod normalize;

pub use class_label_filter::{ClassLabelFilter, ClassLabelFilterSettings};
pub use kmeans::{KMeans, KMeansSettings};
pub use kmeans_quantizer::{KMeansQuantizer, KMeansQuantizerSettings};
pub use knn::{Knn, KnnSettings};
pub use linear_regression::{LinearRegression, LinearRegressionSettings};
pub use min_dist::{MinDist, MinDistSettings};
pub use moving_average::{MovingAverageFilter, MovingAverageSettings};
pub use normalize::{Normalize, NormalizeSettings};
