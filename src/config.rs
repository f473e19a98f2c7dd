//! Tunable constants for every analytics stage, loadable from TOML.

use crate::error::{AnalyticsError, Result};
use crate::segmentation::ClusterFeature;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub cleaning: CleaningConfig,
    pub rfm: RfmConfig,
    pub segmentation: SegmentationConfig,
    pub clv: ClvConfig,
    pub kpi: KpiConfig,
    pub forecast: ForecastConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningConfig {
    /// Drop lines with a non-positive quantity or price (returns, cancellations, free lines).
    pub remove_cancelled: bool,
    /// IQR fence multiplier for quantity/amount outlier removal; `None` keeps every line.
    pub outlier_iqr_multiplier: Option<f64>,
    /// Absolute difference tolerated between a supplied amount and quantity × price.
    pub amount_tolerance: f64,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            remove_cancelled: true,
            outlier_iqr_multiplier: None,
            amount_tolerance: 0.01,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RfmConfig {
    /// Number of score buckets per dimension.
    pub quantiles: u8,
    /// Reference date for recency; ignored when earlier than the day after the last purchase.
    pub analysis_date: Option<NaiveDate>,
}

impl Default for RfmConfig {
    fn default() -> Self {
        Self {
            quantiles: 5,
            analysis_date: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    pub k_min: usize,
    pub k_max: usize,
    pub min_points_per_cluster: usize,
    pub seed: u64,
    pub max_iterations: u64,
    pub tolerance: f64,
    pub n_runs: usize,
    pub features: Vec<ClusterFeature>,
    /// Upper bound on the points used for silhouette scoring.
    pub silhouette_sample: usize,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            k_min: 2,
            k_max: 8,
            min_points_per_cluster: 2,
            seed: 42,
            max_iterations: 300,
            tolerance: 1e-4,
            n_runs: 10,
            features: ClusterFeature::defaults(),
            silhouette_sample: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClvConfig {
    pub horizon_months: u32,
    pub churn_threshold: f64,
    /// Recency beyond this many average purchase intervals counts as fully churned.
    pub churn_interval_multiplier: f64,
    pub profit_margin: f64,
    pub top_n: usize,
}

impl Default for ClvConfig {
    fn default() -> Self {
        Self {
            horizon_months: 12,
            churn_threshold: 0.5,
            churn_interval_multiplier: 3.0,
            profit_margin: 0.30,
            top_n: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KpiConfig {
    /// Skip the trailing month in month-over-month growth when it ends before the month does.
    pub exclude_partial_month: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub horizon: usize,
    pub moving_average_window: usize,
    pub smoothing_alpha: f64,
    pub min_history: usize,
    pub seasonal_min_periods: usize,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            horizon: 6,
            moving_average_window: 3,
            smoothing_alpha: 0.3,
            min_history: 2,
            seasonal_min_periods: 12,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub title: String,
    pub top_n: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            title: "Retail Analytics Report".to_string(),
            top_n: 10,
        }
    }
}

impl AnalyticsConfig {
    /// Read and validate a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            AnalyticsError::Config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AnalyticsConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations no stage can work with.
    pub fn validate(&self) -> Result<()> {
        let seg = &self.segmentation;
        if seg.k_min < 2 || seg.k_min > seg.k_max {
            return Err(AnalyticsError::Config(format!(
                "cluster range must satisfy 2 <= k_min <= k_max, got [{}, {}]",
                seg.k_min, seg.k_max
            )));
        }
        if seg.min_points_per_cluster == 0 || seg.n_runs == 0 {
            return Err(AnalyticsError::Config(
                "min_points_per_cluster and n_runs must be positive".to_string(),
            ));
        }
        for required in [
            ClusterFeature::TotalTransactions,
            ClusterFeature::TotalSpend,
            ClusterFeature::RecencyDays,
        ] {
            if !seg.features.contains(&required) {
                return Err(AnalyticsError::Config(format!(
                    "clustering features must include {}",
                    required.name()
                )));
            }
        }
        if !(2..=100).contains(&self.rfm.quantiles) {
            return Err(AnalyticsError::Config(format!(
                "rfm.quantiles must be between 2 and 100, got {}",
                self.rfm.quantiles
            )));
        }
        if !(0.0..=1.0).contains(&self.clv.churn_threshold) {
            return Err(AnalyticsError::Config(
                "clv.churn_threshold must lie in [0, 1]".to_string(),
            ));
        }
        if self.clv.churn_interval_multiplier <= 0.0 || self.clv.horizon_months == 0 {
            return Err(AnalyticsError::Config(
                "clv.churn_interval_multiplier and clv.horizon_months must be positive"
                    .to_string(),
            ));
        }
        let fc = &self.forecast;
        if !(fc.smoothing_alpha > 0.0 && fc.smoothing_alpha <= 1.0) {
            return Err(AnalyticsError::Config(
                "forecast.smoothing_alpha must lie in (0, 1]".to_string(),
            ));
        }
        if fc.horizon == 0 || fc.moving_average_window == 0 || fc.min_history < 2 {
            return Err(AnalyticsError::Config(
                "forecast horizon and window must be positive and min_history at least 2"
                    .to_string(),
            ));
        }
        if let Some(multiplier) = self.cleaning.outlier_iqr_multiplier {
            if multiplier <= 0.0 {
                return Err(AnalyticsError::Config(
                    "cleaning.outlier_iqr_multiplier must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AnalyticsConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.forecast.horizon, 6);
        assert_eq!(config.segmentation.k_max, 8);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = AnalyticsConfig::from_toml_str(
            r#"
            [forecast]
            smoothing_alpha = 0.5

            [rfm]
            analysis_date = "2024-01-01"
            "#,
        )
        .unwrap();
        assert_eq!(config.forecast.smoothing_alpha, 0.5);
        assert_eq!(config.forecast.moving_average_window, 3);
        assert_eq!(
            config.rfm.analysis_date,
            Some(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
        );
        assert_eq!(config.clv.top_n, 10);
    }

    #[test]
    fn rejects_inverted_cluster_range() {
        let result = AnalyticsConfig::from_toml_str(
            r#"
            [segmentation]
            k_min = 6
            k_max = 3
            "#,
        );
        assert!(matches!(result, Err(AnalyticsError::Config(_))));
    }

    #[test]
    fn rejects_feature_set_without_recency() {
        let mut config = AnalyticsConfig::default();
        config
            .segmentation
            .features
            .retain(|f| *f != ClusterFeature::RecencyDays);
        assert!(config.validate().is_err());
    }
}
