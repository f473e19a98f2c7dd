//! Customer lifetime value estimates with a recency-based churn adjustment.

use crate::config::ClvConfig;
use crate::error::{AnalyticsError, Result};
use crate::features::FeatureSet;
use crate::stats;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

/// Average days per month used to convert lifespans.
pub const DAYS_PER_MONTH: f64 = 30.44;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ValueTier {
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
}

const TIERS: [ValueTier; 5] = [
    ValueTier::Bronze,
    ValueTier::Silver,
    ValueTier::Gold,
    ValueTier::Platinum,
    ValueTier::Diamond,
];

const BUCKETS: [(&str, f64); 6] = [
    ("$0-100", 100.0),
    ("$100-500", 500.0),
    ("$500-1K", 1_000.0),
    ("$1K-5K", 5_000.0),
    ("$5K-10K", 10_000.0),
    ("$10K+", f64::INFINITY),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClvRecord {
    pub customer_id: String,
    pub historical_value: f64,
    pub order_count: usize,
    pub avg_order_value: f64,
    pub first_purchase: NaiveDateTime,
    pub last_purchase: NaiveDateTime,
    pub lifespan_days: i64,
    pub lifespan_months: f64,
    pub purchase_frequency: f64,
    pub days_since_last_purchase: i64,
    pub churn_probability: f64,
    pub gross_clv: f64,
    pub predictive_clv: f64,
    pub profit_clv: f64,
    pub tier: ValueTier,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClvSummary {
    pub total_customers: usize,
    pub total_historical_value: f64,
    pub total_predictive_clv: f64,
    pub total_profit_clv: f64,
    pub avg_predictive_clv: f64,
    pub median_predictive_clv: f64,
    pub avg_churn_probability: f64,
    pub high_churn_customers: usize,
    pub avg_order_value: f64,
    pub avg_purchase_frequency: f64,
    pub horizon_months: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClvBucket {
    pub range: &'static str,
    pub customer_count: usize,
    pub total_clv: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierSummary {
    pub tier: ValueTier,
    pub customer_count: usize,
    pub avg_predictive_clv: f64,
    pub total_predictive_clv: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClvAnalysis {
    pub summary: ClvSummary,
    pub distribution: Vec<ClvBucket>,
    pub tiers: Vec<TierSummary>,
    pub top_customers: Vec<ClvRecord>,
    /// Total number of at-risk customers before truncation
    pub at_risk_count: usize,
    pub at_risk_customers: Vec<ClvRecord>,
    pub records: Vec<ClvRecord>,
}

pub fn analyze_clv(features: &FeatureSet, config: &ClvConfig) -> Result<ClvAnalysis> {
    if features.customers.is_empty() {
        return Err(AnalyticsError::InsufficientData(
            "CLV needs at least one customer".to_string(),
        ));
    }
    let last_date = features.last_date().date();
    let horizon = config.horizon_months as f64;

    let mut records: Vec<ClvRecord> = features
        .customers
        .iter()
        .map(|c| {
            let orders = c.total_transactions.max(1) as f64;
            let avg_order_value = c.total_spend / orders;
            let lifespan_days = c.tenure_days.max(1);
            let lifespan_months = lifespan_days as f64 / DAYS_PER_MONTH;
            let purchase_frequency = orders / lifespan_months;
            let days_since_last_purchase = (last_date - c.last_purchase.date()).num_days();
            let avg_interval = lifespan_days as f64 / orders;
            let churn_probability = (days_since_last_purchase as f64
                / (avg_interval * config.churn_interval_multiplier))
                .clamp(0.0, 1.0);
            let gross_clv = avg_order_value * purchase_frequency * horizon;
            let predictive_clv = gross_clv * (1.0 - churn_probability);

            ClvRecord {
                customer_id: c.customer_id.clone(),
                historical_value: c.total_spend,
                order_count: c.total_transactions,
                avg_order_value,
                first_purchase: c.first_purchase,
                last_purchase: c.last_purchase,
                lifespan_days,
                lifespan_months,
                purchase_frequency,
                days_since_last_purchase,
                churn_probability,
                gross_clv,
                predictive_clv,
                profit_clv: predictive_clv * config.profit_margin,
                tier: ValueTier::Bronze,
            }
        })
        .collect();

    assign_tiers(&mut records);

    let predictive: Vec<f64> = records.iter().map(|r| r.predictive_clv).collect();
    let gross: Vec<f64> = records.iter().map(|r| r.gross_clv).collect();
    let median_gross = stats::median(&gross);

    let mut by_value: Vec<&ClvRecord> = records.iter().collect();
    by_value.sort_by(|a, b| {
        b.predictive_clv
            .total_cmp(&a.predictive_clv)
            .then_with(|| a.customer_id.cmp(&b.customer_id))
    });

    let top_customers = by_value.iter().take(config.top_n).map(|r| (*r).clone()).collect();
    let at_risk: Vec<&ClvRecord> = by_value
        .iter()
        .copied()
        .filter(|r| r.churn_probability > config.churn_threshold && r.gross_clv > median_gross)
        .collect();

    let summary = ClvSummary {
        total_customers: records.len(),
        total_historical_value: records.iter().map(|r| r.historical_value).sum(),
        total_predictive_clv: predictive.iter().sum(),
        total_profit_clv: records.iter().map(|r| r.profit_clv).sum(),
        avg_predictive_clv: stats::mean(&predictive),
        median_predictive_clv: stats::median(&predictive),
        avg_churn_probability: stats::mean(&records.iter().map(|r| r.churn_probability).collect::<Vec<_>>()),
        high_churn_customers: records
            .iter()
            .filter(|r| r.churn_probability > config.churn_threshold)
            .count(),
        avg_order_value: stats::mean(&records.iter().map(|r| r.avg_order_value).collect::<Vec<_>>()),
        avg_purchase_frequency: stats::mean(&records.iter().map(|r| r.purchase_frequency).collect::<Vec<_>>()),
        horizon_months: config.horizon_months,
    };
    info!(
        customers = summary.total_customers,
        total_predictive = summary.total_predictive_clv,
        at_risk = at_risk.len(),
        "CLV analysis complete"
    );

    Ok(ClvAnalysis {
        distribution: distribution(&records),
        tiers: tier_summary(&records),
        top_customers,
        at_risk_count: at_risk.len(),
        at_risk_customers: at_risk.into_iter().take(config.top_n).cloned().collect(),
        summary,
        records,
    })
}

/// Rank by predictive CLV and split into five equal-sized tiers.
fn assign_tiers(records: &mut [ClvRecord]) {
    let n = records.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| records[a].predictive_clv.total_cmp(&records[b].predictive_clv));
    for (rank, index) in order.into_iter().enumerate() {
        records[index].tier = TIERS[rank * TIERS.len() / n];
    }
}

fn distribution(records: &[ClvRecord]) -> Vec<ClvBucket> {
    let mut buckets: Vec<ClvBucket> = BUCKETS
        .iter()
        .map(|(range, _)| ClvBucket {
            range: *range,
            customer_count: 0,
            total_clv: 0.0,
        })
        .collect();
    for record in records {
        let index = BUCKETS
            .iter()
            .position(|(_, upper)| record.predictive_clv < *upper)
            .unwrap_or(BUCKETS.len() - 1);
        buckets[index].customer_count += 1;
        buckets[index].total_clv += record.predictive_clv;
    }
    buckets
}

fn tier_summary(records: &[ClvRecord]) -> Vec<TierSummary> {
    let mut grouped: BTreeMap<ValueTier, Vec<f64>> = BTreeMap::new();
    for r in records {
        grouped.entry(r.tier).or_default().push(r.predictive_clv);
    }
    grouped
        .into_iter()
        .rev()
        .map(|(tier, values)| TierSummary {
            tier,
            customer_count: values.len(),
            avg_predictive_clv: stats::mean(&values),
            total_predictive_clv: values.iter().sum(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleaning::CleanedTable;
    use crate::features::{engineer_features, tests::tx};
    use std::sync::Arc;

    fn features() -> FeatureSet {
        let rows = vec![
            // Steady buyer, active until the end.
            tx("A1", "C1", "2023-01-01", 1, 100.0),
            tx("A2", "C1", "2023-02-01", 1, 100.0),
            tx("A3", "C1", "2023-03-01", 1, 100.0),
            tx("A4", "C1", "2023-03-31", 1, 100.0),
            // Big early buyer who went quiet.
            tx("B1", "C2", "2023-01-01", 10, 50.0),
            tx("B2", "C2", "2023-01-11", 10, 50.0),
            // One-off small buyer.
            tx("D1", "C3", "2023-02-15", 1, 5.0),
        ];
        engineer_features(Arc::new(CleanedTable { rows })).unwrap()
    }

    #[test]
    fn test_clv_formulas() {
        let analysis = analyze_clv(&features(), &ClvConfig::default()).unwrap();
        let c1 = analysis.records.iter().find(|r| r.customer_id == "C1").unwrap();

        assert_eq!(c1.order_count, 4);
        assert_eq!(c1.avg_order_value, 100.0);
        assert_eq!(c1.lifespan_days, 89);
        assert_eq!(c1.days_since_last_purchase, 0);
        assert_eq!(c1.churn_probability, 0.0);
        let expected_gross = 100.0 * (4.0 / (89.0 / DAYS_PER_MONTH)) * 12.0;
        assert!((c1.gross_clv - expected_gross).abs() < 1e-9);
        assert_eq!(c1.predictive_clv, c1.gross_clv);
        assert!((c1.profit_clv - c1.predictive_clv * 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_churn_bounds_and_at_risk_subset() {
        let analysis = analyze_clv(&features(), &ClvConfig::default()).unwrap();
        for r in &analysis.records {
            assert!((0.0..=1.0).contains(&r.churn_probability));
        }

        let c2 = analysis.records.iter().find(|r| r.customer_id == "C2").unwrap();
        // 79 days quiet against a 5-day interval: fully churned.
        assert_eq!(c2.churn_probability, 1.0);
        assert_eq!(c2.predictive_clv, 0.0);

        let median_gross = stats::median(&analysis.records.iter().map(|r| r.gross_clv).collect::<Vec<_>>());
        for r in &analysis.at_risk_customers {
            assert!(r.churn_probability > 0.5);
            assert!(r.gross_clv > median_gross);
        }
        assert!(analysis.at_risk_customers.iter().any(|r| r.customer_id == "C2"));
    }

    #[test]
    fn test_distribution_and_tiers_cover_everyone() {
        let analysis = analyze_clv(&features(), &ClvConfig::default()).unwrap();
        let bucketed: usize = analysis.distribution.iter().map(|b| b.customer_count).sum();
        assert_eq!(bucketed, 3);
        assert_eq!(analysis.distribution[0].range, "$0-100");
        let tiered: usize = analysis.tiers.iter().map(|t| t.customer_count).sum();
        assert_eq!(tiered, 3);
        assert_eq!(analysis.top_customers[0].customer_id, "C1");
        assert!(analysis
            .top_customers
            .windows(2)
            .all(|w| w[0].predictive_clv >= w[1].predictive_clv));
    }
}
