use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    clusterer::Clusterer,
    data::{Dataset, UnlabelledData},
    error::{ModuleError, Result},
    module::{check_dimensions, Module, ModuleBase},
    persist::{decode_block, encode_block},
    random::Random,
    telemetry::TRAINING_RESULT,
    util::{self, MinMax},
};

/// Hyperparameters of [`KMeans`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KMeansSettings {
    /// Number of clusters.
    pub num_clusters: usize,
    /// Upper bound on Lloyd iterations.
    pub max_iterations: usize,
    /// Stop once no centroid moves further than this.
    pub min_change: f64,
    /// Scale inputs into `[0, 1]` with the training ranges.
    pub use_scaling: bool,
    /// Seed used to pick the initial centroids; entropy when unset.
    pub random_seed: Option<u64>,
}

impl Default for KMeansSettings {
    fn default() -> Self {
        Self {
            num_clusters: 10,
            max_iterations: 100,
            min_change: 1e-5,
            use_scaling: false,
            random_seed: None,
        }
    }
}

impl KMeansSettings {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.num_clusters == 0 {
            return Err(ModuleError::invalid("num_clusters", "must be at least 1"));
        }
        if self.max_iterations == 0 {
            return Err(ModuleError::invalid("max_iterations", "must be at least 1"));
        }
        if !(self.min_change.is_finite() && self.min_change >= 0.0) {
            return Err(ModuleError::invalid("min_change", "must be >= 0"));
        }
        Ok(())
    }
}

/// Runs Lloyd iterations and returns the centroids and iteration count.
///
/// Centroids are seeded k-means++ style from `random`; a cluster that
/// loses every sample keeps its previous centroid.
pub(crate) fn lloyd(
    data: &Array2<f64>,
    settings: &KMeansSettings,
    random: &mut Random,
    mut on_iteration: impl FnMut(usize, f64),
) -> Result<(Array2<f64>, usize)> {
    let (rows, dims) = data.dim();
    if settings.num_clusters > rows {
        return Err(ModuleError::invalid(
            "num_clusters",
            format!("{} clusters need at least as many samples, got {rows}", settings.num_clusters),
        ));
    }
    let mut centroids = seed_centroids(data, settings.num_clusters, random);

    let mut iterations = 0;
    for iteration in 0..settings.max_iterations {
        let mut sums = Array2::<f64>::zeros((settings.num_clusters, dims));
        let mut counts = vec![0usize; settings.num_clusters];
        let mut inertia = 0.0;
        for row in data.axis_iter(Axis(0)) {
            let (nearest, distance) = nearest_centroid(&centroids, row);
            inertia += distance * distance;
            counts[nearest] += 1;
            let mut sum = sums.row_mut(nearest);
            sum += &row;
        }
        let mut shift: f64 = 0.0;
        for (cluster, count) in counts.iter().enumerate() {
            if *count == 0 {
                continue;
            }
            let updated: Array1<f64> = &sums.row(cluster) / *count as f64;
            let moved = (&updated - &centroids.row(cluster))
                .mapv(|v| v * v)
                .sum()
                .sqrt();
            shift = shift.max(moved);
            centroids.row_mut(cluster).assign(&updated);
        }
        iterations = iteration + 1;
        on_iteration(iterations, inertia);
        if shift <= settings.min_change {
            break;
        }
    }
    Ok((centroids, iterations))
}

/// k-means++ seeding: each further centroid is a sample drawn with
/// probability proportional to its squared distance from the chosen ones.
fn seed_centroids(data: &Array2<f64>, k: usize, random: &mut Random) -> Array2<f64> {
    let rows = data.nrows();
    let mut chosen = vec![random.int(0, rows)];
    while chosen.len() < k {
        let centroids = data.select(Axis(0), &chosen);
        let weights: Vec<f64> = data
            .axis_iter(Axis(0))
            .map(|row| nearest_centroid(&centroids, row).1.powi(2))
            .collect();
        let total: f64 = weights.iter().sum();
        let next = if total > 0.0 {
            let mut target = random.uniform(0.0, total);
            weights
                .iter()
                .position(|w| {
                    target -= w;
                    target <= 0.0 && *w > 0.0
                })
                .unwrap_or_else(|| weights.iter().rposition(|w| *w > 0.0).unwrap_or(0))
        } else {
            // every sample sits on a centroid already
            (0..rows).find(|i| !chosen.contains(i)).unwrap_or(0)
        };
        chosen.push(next);
    }
    data.select(Axis(0), &chosen)
}

/// Index of and distance to the closest centroid.
pub(crate) fn nearest_centroid(centroids: &Array2<f64>, input: ArrayView1<'_, f64>) -> (usize, f64) {
    centroids
        .axis_iter(Axis(0))
        .map(|centroid| {
            centroid
                .iter()
                .zip(input.iter())
                .map(|(c, x)| (c - x).powi(2))
                .sum::<f64>()
                .sqrt()
        })
        .enumerate()
        .fold((0, f64::INFINITY), |best, (index, distance)| {
            if distance < best.1 {
                (index, distance)
            } else {
                best
            }
        })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct KMeansState {
    num_dimensions: usize,
    ranges: Option<Vec<MinMax>>,
    centroids: Array2<f64>,
    iterations: usize,
}

/// Lloyd k-means clusterer with labels `1..=K`.
#[derive(Debug, Clone)]
pub struct KMeans {
    base: ModuleBase,
    settings: KMeansSettings,
    state: Option<KMeansState>,
    predicted: u32,
    likelihoods: Vec<f64>,
}

impl Default for KMeans {
    fn default() -> Self {
        Self::new(KMeansSettings::default())
    }
}

impl KMeans {
    /// Registry id.
    pub const ID: &'static str = "KMeans";

    /// Creates an untrained clusterer.
    #[must_use]
    pub fn new(settings: KMeansSettings) -> Self {
        Self {
            base: ModuleBase::new(Self::ID),
            settings,
            state: None,
            predicted: 0,
            likelihoods: Vec::new(),
        }
    }

    /// Current hyperparameters.
    #[must_use]
    pub const fn settings(&self) -> &KMeansSettings {
        &self.settings
    }

    /// Fitted centroids, one row per cluster.
    #[must_use]
    pub fn centroids(&self) -> Option<&Array2<f64>> {
        self.state.as_ref().map(|state| &state.centroids)
    }

    /// Lloyd iterations run by the last successful training.
    #[must_use]
    pub fn iterations(&self) -> Option<usize> {
        self.state.as_ref().map(|state| state.iterations)
    }

    fn fit(&self, data: &UnlabelledData) -> Result<KMeansState> {
        self.settings.validate()?;
        if data.is_empty() {
            return Err(ModuleError::EmptyDataset);
        }
        let ranges = self.settings.use_scaling.then(|| data.ranges());
        let mut scaled = data.clone();
        if let Some(ranges) = &ranges {
            scaled.scale_with(ranges, 0.0, 1.0);
        }
        let mut random = Random::from_optional_seed(self.settings.random_seed);
        let (centroids, iterations) =
            lloyd(&scaled.to_matrix(), &self.settings, &mut random, |iteration, inertia| {
                self.base.event(
                    TRAINING_RESULT,
                    json!({ "iteration": iteration, "inertia": inertia }),
                );
            })?;
        Ok(KMeansState {
            num_dimensions: data.num_dimensions(),
            ranges,
            centroids,
            iterations,
        })
    }

    fn assign(&self, input: &[f64]) -> Result<(u32, Vec<f64>)> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| ModuleError::NotTrained(Self::ID.into()))?;
        check_dimensions(state.num_dimensions, input)?;
        let scaled = util::scale_to_unit(input, state.ranges.as_deref());
        let distances: Vec<f64> = state
            .centroids
            .axis_iter(Axis(0))
            .map(|centroid| util::euclidean_distance(&centroid.to_vec(), &scaled))
            .collect();
        let inverse: Vec<f64> = distances.iter().map(|d| 1.0 / (d + 1e-4)).collect();
        let total: f64 = inverse.iter().sum();
        let likelihoods = inverse.iter().map(|v| v / total).collect();
        let nearest = util::arg_min(&distances).unwrap_or(0);
        let label = u32::try_from(nearest + 1)
            .map_err(|_| ModuleError::InvalidData("cluster index overflow".into()))?;
        Ok((label, likelihoods))
    }
}

impl Module for KMeans {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn base(&self) -> &ModuleBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ModuleBase {
        &mut self.base
    }

    fn trained(&self) -> bool {
        self.state.is_some()
    }

    fn clear(&mut self) {
        self.state = None;
        self.predicted = 0;
        self.likelihoods.clear();
    }

    fn encode_settings(&self) -> Result<Value> {
        encode_block(&self.settings, "settings")
    }

    fn encode_state(&self) -> Result<Option<Value>> {
        self.state
            .as_ref()
            .map(|state| encode_block(state, "state"))
            .transpose()
    }

    fn decode(&mut self, settings: Value, state: Option<Value>) -> Result<()> {
        let settings: KMeansSettings = decode_block(settings, "settings")?;
        settings.validate()?;
        let state: Option<KMeansState> = state.map(|s| decode_block(s, "state")).transpose()?;
        self.settings = settings;
        self.state = state;
        self.predicted = 0;
        self.likelihoods.clear();
        Ok(())
    }
}

impl Clusterer for KMeans {
    fn train(&mut self, data: &UnlabelledData) -> Result<()> {
        self.base
            .training_started(data.num_samples(), data.num_dimensions());
        let outcome = self.fit(data).map(|state| {
            self.state = Some(state);
            self.predicted = 0;
            self.likelihoods.clear();
        });
        self.base.training_finished(outcome)
    }

    fn predict(&mut self, input: &[f64]) -> Result<u32> {
        let result = self.assign(input).map(|(label, likelihoods)| {
            self.predicted = label;
            self.likelihoods = likelihoods;
            label
        });
        self.base.record(result)
    }

    fn predicted_cluster_label(&self) -> u32 {
        self.predicted
    }

    fn cluster_likelihoods(&self) -> &[f64] {
        &self.likelihoods
    }

    fn num_clusters(&self) -> usize {
        self.state
            .as_ref()
            .map_or(0, |state| state.centroids.nrows())
    }

    fn num_input_dimensions(&self) -> usize {
        self.state.as_ref().map_or(0, |state| state.num_dimensions)
    }

    fn clone_box(&self) -> Box<dyn Clusterer> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{blob_rows, round_trip};

    fn three_means() -> KMeans {
        KMeans::new(KMeansSettings {
            num_clusters: 3,
            random_seed: Some(5),
            ..KMeansSettings::default()
        })
    }

    #[test]
    fn finds_three_blobs() {
        let mut kmeans = three_means();
        kmeans.train(&blob_rows()).unwrap();
        assert_eq!(kmeans.num_clusters(), 3);
        assert!(kmeans.iterations().unwrap() >= 1);
        let a = kmeans.predict(&[0.0, 0.0]).unwrap();
        let b = kmeans.predict(&[10.0, 0.0]).unwrap();
        let c = kmeans.predict(&[20.0, 0.0]).unwrap();
        assert!((1..=3).contains(&a));
        assert!(a != b && b != c && a != c);
        assert_eq!(kmeans.predicted_cluster_label(), c);
        let sum: f64 = kmeans.cluster_likelihoods().iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let mut first = three_means();
        let mut second = three_means();
        first.train(&blob_rows()).unwrap();
        second.train(&blob_rows()).unwrap();
        assert_eq!(first.centroids(), second.centroids());
    }

    #[test]
    fn more_clusters_than_samples_fails() {
        let mut kmeans = KMeans::new(KMeansSettings {
            num_clusters: 4,
            ..KMeansSettings::default()
        });
        let rows = UnlabelledData::from_rows(vec![vec![0.0], vec![1.0]]).unwrap();
        assert!(matches!(
            kmeans.train(&rows),
            Err(ModuleError::InvalidParameter { name: "num_clusters", .. })
        ));
        assert!(!kmeans.trained());
    }

    #[test]
    fn save_load_reproduces_assignments() {
        let mut kmeans = three_means();
        kmeans.train(&blob_rows()).unwrap();
        let mut loaded = KMeans::default();
        round_trip(&kmeans, &mut loaded);
        for x in [0.0, 9.0, 21.0] {
            assert_eq!(
                kmeans.predict(&[x, 0.0]).unwrap(),
                loaded.predict(&[x, 0.0]).unwrap()
            );
        }
        loaded.clear();
        assert!(loaded.predict(&[0.0, 0.0]).is_err());
    }
}
