//! K-Means clustering model implementation

use crate::error::{AnalyticsError, Result};
use linfa::prelude::*;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;

/// Column-wise standardisation to zero mean and unit variance
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    pub means: Array1<f64>,
    pub stds: Array1<f64>,
}

impl StandardScaler {
    /// Population standard deviation; constant columns keep a divisor of 1 so they stay centred.
    pub fn fit(data: &Array2<f64>) -> Self {
        let means = data
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(data.ncols()));
        let stds = data
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 0.0 && s.is_finite() { s } else { 1.0 });
        Self { means, stds }
    }

    pub fn transform(&self, data: &Array2<f64>) -> Array2<f64> {
        (data - &self.means) / &self.stds
    }

    /// Map a point from standardised space back to original units.
    pub fn inverse_transform_row(&self, row: ArrayView1<f64>) -> Array1<f64> {
        &row * &self.stds + &self.means
    }
}

/// Iteration controls shared by every fit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KMeansSettings {
    pub max_iterations: u64,
    pub tolerance: f64,
    pub n_runs: usize,
    pub seed: u64,
}

/// K-Means model wrapper with fitted parameters
#[derive(Debug)]
pub struct KMeansModel {
    pub n_clusters: usize,
    /// Cluster assignments for training data
    pub labels: Array1<usize>,
    /// Cluster centroids in standardised space
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares
    pub inertia: f64,
}

impl KMeansModel {
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters];
        for &label in self.labels.iter() {
            if label < self.n_clusters {
                sizes[label] += 1;
            }
        }
        sizes
    }

    /// Distance of training point `index` to its own centroid.
    pub fn distance_to_centroid(&self, features: &Array2<f64>, index: usize) -> f64 {
        let label = self.labels[index];
        euclidean_distance(&features.row(index), &self.centroids.row(label))
    }

    /// Mean silhouette over the first `sample_size` points.
    ///
    /// A point alone in its cluster scores 0, and a labelling with fewer
    /// than two distinct clusters scores 0 overall.
    pub fn compute_silhouette_sample(&self, features: &Array2<f64>, sample_size: usize) -> f64 {
        let n_samples = features.nrows().min(sample_size).min(self.labels.len());
        if n_samples < 2 {
            return 0.0;
        }

        let mut silhouette_sum = 0.0;
        for i in 0..n_samples {
            let point = features.row(i);
            let cluster_label = self.labels[i];

            let mut same_sum = 0.0;
            let mut same_count = 0usize;
            let mut other_sums = vec![0.0; self.n_clusters];
            let mut other_counts = vec![0usize; self.n_clusters];

            for j in 0..n_samples {
                if i == j {
                    continue;
                }
                let distance = euclidean_distance(&point, &features.row(j));
                let other_label = self.labels[j];
                if other_label == cluster_label {
                    same_sum += distance;
                    same_count += 1;
                } else if other_label < self.n_clusters {
                    other_sums[other_label] += distance;
                    other_counts[other_label] += 1;
                }
            }

            if same_count == 0 {
                continue;
            }
            let a_i = same_sum / same_count as f64;
            let b_i = other_sums
                .iter()
                .zip(&other_counts)
                .filter(|(_, &count)| count > 0)
                .map(|(sum, &count)| sum / count as f64)
                .fold(f64::INFINITY, f64::min);

            if b_i.is_finite() && a_i.max(b_i) > 0.0 {
                silhouette_sum += (b_i - a_i) / a_i.max(b_i);
            }
        }

        silhouette_sum / n_samples as f64
    }
}

/// Fit K-Means on an already standardised feature matrix.
///
/// Every call seeds a fresh RNG from `settings.seed`, so the same matrix
/// and `k` always produce the same labelling.
pub fn fit_kmeans(features: &Array2<f64>, n_clusters: usize, settings: &KMeansSettings) -> Result<KMeansModel> {
    if n_clusters < 2 {
        return Err(AnalyticsError::InsufficientData(
            "K-Means needs at least two clusters".to_string(),
        ));
    }
    if features.nrows() < n_clusters {
        return Err(AnalyticsError::InsufficientData(format!(
            "number of data points ({}) must be at least the number of clusters ({})",
            features.nrows(),
            n_clusters
        )));
    }

    let n_samples = features.nrows();
    let targets: Array1<usize> = Array1::zeros(n_samples);
    let dataset = Dataset::new(features.clone(), targets);

    let rng = Xoshiro256Plus::seed_from_u64(settings.seed);
    let model = KMeans::params_with(n_clusters, rng, L2Dist)
        .max_n_iterations(settings.max_iterations)
        .tolerance(settings.tolerance)
        .n_runs(settings.n_runs)
        .fit(&dataset)
        .map_err(|e| AnalyticsError::Computation(format!("k-means fit failed: {}", e)))?;

    let labels = model.predict(features);
    let centroids = model.centroids().clone();
    let inertia = compute_inertia(features, &labels, &centroids);

    Ok(KMeansModel {
        n_clusters,
        labels,
        centroids,
        inertia,
    })
}

/// Within-cluster sum of squares
fn compute_inertia(features: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    labels
        .iter()
        .enumerate()
        .filter(|(_, &cluster)| cluster < centroids.nrows())
        .map(|(i, &cluster)| {
            features
                .row(i)
                .iter()
                .zip(centroids.row(cluster).iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>()
        })
        .sum()
}

fn euclidean_distance(point1: &ArrayView1<f64>, point2: &ArrayView1<f64>) -> f64 {
    point1
        .iter()
        .zip(point2.iter())
        .map(|(a, b)| (a - b).powi(2))
        .sum::<f64>()
        .sqrt()
}
