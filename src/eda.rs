//! Exploratory statistics over the engineered features.

use crate::features::{weekday_name, FeatureSet, SizeTier, YearMonth, WEEKDAYS};
use crate::stats;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericSummary {
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub q1: f64,
    pub q3: f64,
}

impl NumericSummary {
    fn of(values: &[f64]) -> Self {
        Self {
            mean: stats::mean(values),
            median: stats::median(values),
            std: stats::sample_std(values),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            q1: stats::quantile(values, 0.25),
            q3: stats::quantile(values, 0.75),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BasicStatistics {
    pub total_lines: usize,
    pub total_transactions: usize,
    pub total_customers: usize,
    pub total_products: usize,
    pub total_revenue: f64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub span_days: i64,
    pub amount: NumericSummary,
    pub quantity: NumericSummary,
    pub price: NumericSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketCount {
    pub bucket: String,
    pub count: usize,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Correlations {
    pub quantity_price: Option<f64>,
    pub quantity_amount: Option<f64>,
    pub price_amount: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedEntity {
    pub name: String,
    pub revenue: f64,
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdaReport {
    pub basic_statistics: BasicStatistics,
    pub amount_distribution: Vec<BucketCount>,
    pub monthly_revenue: BTreeMap<String, f64>,
    pub revenue_by_weekday: Vec<BucketCount>,
    pub revenue_by_hour: BTreeMap<u32, f64>,
    pub correlations: Correlations,
    pub top_products: Vec<RankedEntity>,
    pub top_customers: Vec<RankedEntity>,
    pub insights: Vec<String>,
}

pub fn explore(features: &FeatureSet, top_n: usize) -> EdaReport {
    let rows = &features.table.rows;
    let amounts: Vec<f64> = rows.iter().map(|t| t.amount).collect();
    let quantities: Vec<f64> = rows.iter().map(|t| t.quantity as f64).collect();
    let prices: Vec<f64> = rows.iter().map(|t| t.price).collect();
    let total_revenue: f64 = amounts.iter().sum();

    let start_date = features.first_date().date();
    let end_date = features.last_date().date();
    let basic_statistics = BasicStatistics {
        total_lines: rows.len(),
        total_transactions: rows
            .iter()
            .map(|t| t.transaction_id.as_str())
            .collect::<HashSet<_>>()
            .len(),
        total_customers: features.customers.len(),
        total_products: features.products.len(),
        total_revenue,
        start_date,
        end_date,
        span_days: (end_date - start_date).num_days(),
        amount: NumericSummary::of(&amounts),
        quantity: NumericSummary::of(&quantities),
        price: NumericSummary::of(&prices),
    };

    let mut amount_distribution: Vec<BucketCount> = [SizeTier::Small, SizeTier::Medium, SizeTier::Large]
        .iter()
        .map(|tier| BucketCount {
            bucket: format!("{:?}", tier).to_lowercase(),
            count: 0,
            revenue: 0.0,
        })
        .collect();
    let mut revenue_by_weekday: Vec<BucketCount> = WEEKDAYS
        .iter()
        .map(|d| BucketCount {
            bucket: weekday_name(*d).to_string(),
            count: 0,
            revenue: 0.0,
        })
        .collect();
    let mut monthly: BTreeMap<YearMonth, f64> = BTreeMap::new();
    let mut revenue_by_hour: BTreeMap<u32, f64> = BTreeMap::new();

    for (tx, line) in rows.iter().zip(&features.lines) {
        let tier = match line.size_tier {
            SizeTier::Small => 0,
            SizeTier::Medium => 1,
            SizeTier::Large => 2,
        };
        amount_distribution[tier].count += 1;
        amount_distribution[tier].revenue += tx.amount;

        let day = &mut revenue_by_weekday[line.weekday.num_days_from_monday() as usize];
        day.count += 1;
        day.revenue += tx.amount;

        *monthly.entry(line.period).or_default() += tx.amount;
        *revenue_by_hour.entry(line.hour).or_default() += tx.amount;
    }

    let top_products = features
        .products
        .iter()
        .take(top_n)
        .map(|p| RankedEntity {
            name: p.product.clone(),
            revenue: p.revenue,
            share: stats::percent(p.revenue, total_revenue),
        })
        .collect();

    let mut spenders: Vec<_> = features.customers.iter().collect();
    spenders.sort_by(|a, b| b.total_spend.total_cmp(&a.total_spend));
    let top_customers: Vec<RankedEntity> = spenders
        .into_iter()
        .take(top_n)
        .map(|c| RankedEntity {
            name: c.customer_id.clone(),
            revenue: c.total_spend,
            share: stats::percent(c.total_spend, total_revenue),
        })
        .collect();

    let correlations = Correlations {
        quantity_price: stats::pearson(&quantities, &prices),
        quantity_amount: stats::pearson(&quantities, &amounts),
        price_amount: stats::pearson(&prices, &amounts),
    };

    let insights = insights(&basic_statistics, &revenue_by_weekday, &monthly, &top_customers);
    debug!(insights = insights.len(), "exploratory analysis complete");

    EdaReport {
        basic_statistics,
        amount_distribution,
        monthly_revenue: monthly.into_iter().map(|(m, v)| (m.to_string(), v)).collect(),
        revenue_by_weekday,
        revenue_by_hour,
        correlations,
        top_products,
        top_customers,
        insights,
    }
}

fn insights(
    basic: &BasicStatistics,
    weekdays: &[BucketCount],
    monthly: &BTreeMap<YearMonth, f64>,
    top_customers: &[RankedEntity],
) -> Vec<String> {
    let mut insights = vec![format!(
        "{} transactions from {} customers generated {:.2} in revenue",
        basic.total_transactions, basic.total_customers, basic.total_revenue
    )];

    if let Some(best_day) = weekdays
        .iter()
        .filter(|d| d.count > 0)
        .max_by(|a, b| a.revenue.total_cmp(&b.revenue))
    {
        insights.push(format!("{} is the strongest trading day", best_day.bucket));
    }
    if let Some((month, revenue)) = monthly.iter().max_by(|a, b| a.1.total_cmp(b.1)) {
        insights.push(format!("peak month was {} with {:.2} in revenue", month, revenue));
    }
    let top_share: f64 = top_customers.iter().map(|c| c.share).sum();
    if !top_customers.is_empty() {
        insights.push(format!(
            "top {} customers account for {} of revenue",
            top_customers.len(),
            stats::format_percent(top_share)
        ));
    }
    insights
}
