//! Behavioural customer segmentation with K-Means and silhouette model selection.

use crate::config::SegmentationConfig;
use crate::error::{AnalyticsError, Result};
use crate::features::{CustomerFeatures, FeatureSet};
use crate::model::{fit_kmeans, KMeansModel, KMeansSettings, StandardScaler};
use crate::stats;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Per-customer attribute usable as a clustering dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterFeature {
    TotalTransactions,
    TotalSpend,
    AvgTransaction,
    TotalItems,
    RecencyDays,
    TenureDays,
}

impl ClusterFeature {
    pub fn defaults() -> Vec<ClusterFeature> {
        vec![
            ClusterFeature::TotalTransactions,
            ClusterFeature::TotalSpend,
            ClusterFeature::AvgTransaction,
            ClusterFeature::TotalItems,
            ClusterFeature::RecencyDays,
            ClusterFeature::TenureDays,
        ]
    }

    pub fn name(self) -> &'static str {
        match self {
            ClusterFeature::TotalTransactions => "total_transactions",
            ClusterFeature::TotalSpend => "total_spend",
            ClusterFeature::AvgTransaction => "avg_transaction",
            ClusterFeature::TotalItems => "total_items",
            ClusterFeature::RecencyDays => "recency_days",
            ClusterFeature::TenureDays => "tenure_days",
        }
    }

    fn value(self, customer: &CustomerFeatures) -> f64 {
        match self {
            ClusterFeature::TotalTransactions => customer.total_transactions as f64,
            ClusterFeature::TotalSpend => customer.total_spend,
            ClusterFeature::AvgTransaction => customer.avg_transaction,
            ClusterFeature::TotalItems => customer.total_items as f64,
            ClusterFeature::RecencyDays => customer.recency_days as f64,
            ClusterFeature::TenureDays => customer.tenure_days as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClusterLabel {
    #[serde(rename = "High-Value")]
    HighValue,
    #[serde(rename = "Low-Engagement")]
    LowEngagement,
    #[serde(rename = "At-Risk")]
    AtRisk,
    #[serde(rename = "Frequent Buyers")]
    FrequentBuyers,
    #[serde(rename = "Big Spenders")]
    BigSpenders,
    Regular,
}

impl ClusterLabel {
    pub fn name(self) -> &'static str {
        match self {
            ClusterLabel::HighValue => "High-Value",
            ClusterLabel::LowEngagement => "Low-Engagement",
            ClusterLabel::AtRisk => "At-Risk",
            ClusterLabel::FrequentBuyers => "Frequent Buyers",
            ClusterLabel::BigSpenders => "Big Spenders",
            ClusterLabel::Regular => "Regular",
        }
    }
}

impl std::fmt::Display for ClusterLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Standardised recency above which a middle cluster counts as at risk.
const AT_RISK_RECENCY_Z: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterProfile {
    pub cluster_id: usize,
    pub label: ClusterLabel,
    pub customer_count: usize,
    pub percentage: f64,
    pub avg_transactions: f64,
    pub avg_spend: f64,
    pub total_revenue: f64,
    pub avg_transaction_value: f64,
    pub avg_items: f64,
    pub avg_recency: f64,
    pub avg_tenure: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterCentroid {
    pub cluster_id: usize,
    pub label: ClusterLabel,
    /// Centroid in original feature units
    pub values: BTreeMap<&'static str, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterAssignment {
    pub customer_id: String,
    pub cluster_id: usize,
    pub label: ClusterLabel,
    /// Raw feature values in `features_used` order
    pub features: Vec<f64>,
    /// Euclidean distance in standardised space
    pub distance_to_centroid: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElbowAnalysis {
    pub k_values: Vec<usize>,
    pub inertias: Vec<f64>,
    pub silhouette_scores: Vec<f64>,
    pub optimal_k: usize,
    pub best_silhouette: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentationResult {
    pub n_clusters: usize,
    pub silhouette_score: f64,
    pub total_customers: usize,
    pub features_used: Vec<&'static str>,
    /// Sorted by total revenue, highest first
    pub cluster_profiles: Vec<ClusterProfile>,
    pub cluster_centroids: Vec<ClusterCentroid>,
    pub elbow_analysis: ElbowAnalysis,
    pub assignments: Vec<ClusterAssignment>,
}

pub fn segment_customers(features: &FeatureSet, config: &SegmentationConfig) -> Result<SegmentationResult> {
    let customers = &features.customers;
    let required = config.k_max * config.min_points_per_cluster;
    if customers.len() < required {
        return Err(AnalyticsError::InsufficientData(format!(
            "segmentation needs at least {} customers, found {}",
            required,
            customers.len()
        )));
    }

    let dims = config.features.len();
    let raw = Array2::from_shape_vec(
        (customers.len(), dims),
        customers
            .iter()
            .flat_map(|c| config.features.iter().map(move |f| f.value(c)))
            .collect(),
    )?;
    let scaler = StandardScaler::fit(&raw);
    let scaled = scaler.transform(&raw);

    let settings = KMeansSettings {
        max_iterations: config.max_iterations,
        tolerance: config.tolerance,
        n_runs: config.n_runs,
        seed: config.seed,
    };

    let mut elbow = ElbowAnalysis {
        k_values: Vec::new(),
        inertias: Vec::new(),
        silhouette_scores: Vec::new(),
        optimal_k: config.k_min,
        best_silhouette: f64::NEG_INFINITY,
    };
    let mut best: Option<KMeansModel> = None;
    for k in config.k_min..=config.k_max {
        let model = fit_kmeans(&scaled, k, &settings)?;
        let silhouette = model.compute_silhouette_sample(&scaled, config.silhouette_sample);
        debug!(k, inertia = model.inertia, silhouette, "evaluated cluster count");

        elbow.k_values.push(k);
        elbow.inertias.push(model.inertia);
        elbow.silhouette_scores.push(silhouette);
        // Strict comparison keeps the smallest k on ties.
        if silhouette > elbow.best_silhouette {
            elbow.best_silhouette = silhouette;
            elbow.optimal_k = k;
            best = Some(model);
        }
    }
    let model = best.ok_or_else(|| AnalyticsError::Computation("no cluster count evaluated".to_string()))?;

    let labels = label_clusters(&model, &config.features);
    let sizes = model.cluster_sizes();

    let assignments: Vec<ClusterAssignment> = customers
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let cluster_id = model.labels[i];
            ClusterAssignment {
                customer_id: c.customer_id.clone(),
                cluster_id,
                label: labels[cluster_id],
                features: raw.row(i).to_vec(),
                distance_to_centroid: model.distance_to_centroid(&scaled, i),
            }
        })
        .collect();

    let mut cluster_profiles: Vec<ClusterProfile> = (0..model.n_clusters)
        .filter(|&cluster| sizes[cluster] > 0)
        .map(|cluster| profile(cluster, labels[cluster], customers, &model, customers.len()))
        .collect();
    cluster_profiles.sort_by(|a, b| b.total_revenue.total_cmp(&a.total_revenue));

    let cluster_centroids = model
        .centroids
        .outer_iter()
        .enumerate()
        .map(|(cluster_id, centroid)| {
            let original = scaler.inverse_transform_row(centroid);
            ClusterCentroid {
                cluster_id,
                label: labels[cluster_id],
                values: config
                    .features
                    .iter()
                    .map(|f| f.name())
                    .zip(original.iter().copied())
                    .collect(),
            }
        })
        .collect();

    info!(
        n_clusters = model.n_clusters,
        silhouette = elbow.best_silhouette,
        customers = customers.len(),
        "segmentation complete"
    );

    Ok(SegmentationResult {
        n_clusters: model.n_clusters,
        silhouette_score: elbow.best_silhouette,
        total_customers: customers.len(),
        features_used: config.features.iter().map(|f| f.name()).collect(),
        cluster_profiles,
        cluster_centroids,
        elbow_analysis: elbow,
        assignments,
    })
}

/// Name clusters from their standardised centroids.
fn label_clusters(model: &KMeansModel, features: &[ClusterFeature]) -> Vec<ClusterLabel> {
    let column = |feature: ClusterFeature| features.iter().position(|f| *f == feature);
    let transactions = column(ClusterFeature::TotalTransactions);
    let spend = column(ClusterFeature::TotalSpend);
    let recency = column(ClusterFeature::RecencyDays);
    let z = |cluster: usize, idx: Option<usize>| idx.map(|i| model.centroids[[cluster, i]]).unwrap_or(0.0);

    let engagement: Vec<f64> = (0..model.n_clusters)
        .map(|c| z(c, transactions) + z(c, spend))
        .collect();
    let highest = (0..model.n_clusters).max_by(|&a, &b| engagement[a].total_cmp(&engagement[b]));
    let lowest = (0..model.n_clusters).min_by(|&a, &b| engagement[a].total_cmp(&engagement[b]));

    (0..model.n_clusters)
        .map(|c| {
            if Some(c) == highest {
                ClusterLabel::HighValue
            } else if Some(c) == lowest {
                ClusterLabel::LowEngagement
            } else if z(c, recency) > AT_RISK_RECENCY_Z {
                ClusterLabel::AtRisk
            } else if z(c, transactions) > z(c, spend) && z(c, transactions) > 0.0 {
                ClusterLabel::FrequentBuyers
            } else if z(c, spend) > 0.0 {
                ClusterLabel::BigSpenders
            } else {
                ClusterLabel::Regular
            }
        })
        .collect()
}

fn profile(
    cluster: usize,
    label: ClusterLabel,
    customers: &[CustomerFeatures],
    model: &KMeansModel,
    total: usize,
) -> ClusterProfile {
    let members: Vec<&CustomerFeatures> = customers
        .iter()
        .enumerate()
        .filter(|(i, _)| model.labels[*i] == cluster)
        .map(|(_, c)| c)
        .collect();
    let count = members.len() as f64;
    let total_revenue: f64 = members.iter().map(|c| c.total_spend).sum();
    let total_transactions: f64 = members.iter().map(|c| c.total_transactions as f64).sum();

    ClusterProfile {
        cluster_id: cluster,
        label,
        customer_count: members.len(),
        percentage: stats::percent(count, total as f64),
        avg_transactions: average(&members, |c| c.total_transactions as f64),
        avg_spend: average(&members, |c| c.total_spend),
        total_revenue,
        avg_transaction_value: if total_transactions > 0.0 {
            total_revenue / total_transactions
        } else {
            0.0
        },
        avg_items: average(&members, |c| c.total_items as f64),
        avg_recency: average(&members, |c| c.recency_days as f64),
        avg_tenure: average(&members, |c| c.tenure_days as f64),
    }
}

fn average<F>(members: &[&CustomerFeatures], value: F) -> f64
where
    F: Fn(&CustomerFeatures) -> f64,
{
    if members.is_empty() {
        return 0.0;
    }
    members.iter().map(|c| value(c)).sum::<f64>() / members.len() as f64
}
