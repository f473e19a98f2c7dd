//! Revenue breakdowns by period, category, country, weekday and product.

use crate::cleaning::Transaction;
use crate::features::{weekday_name, FeatureSet, YearMonth, WEEKDAYS};
use crate::stats;
use chrono::{Datelike, Weekday};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodPerformance {
    pub period: String,
    pub revenue: f64,
    pub transactions: usize,
    pub customers: usize,
    pub items_sold: i64,
    pub avg_transaction_value: f64,
    pub market_share: f64,
    /// Percentage change against the previous row; `None` for the first row.
    pub revenue_growth: Option<f64>,
    pub customer_growth: Option<f64>,
    pub transaction_growth: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupPerformance {
    pub name: String,
    pub revenue: f64,
    pub transactions: usize,
    pub customers: usize,
    pub items_sold: i64,
    pub avg_transaction_value: f64,
    pub market_share: f64,
}

impl GroupPerformance {
    pub fn share_label(&self) -> String {
        stats::format_percent(self.market_share)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductPerformance {
    pub product: String,
    pub product_type: String,
    pub quantity: i64,
    pub revenue: f64,
    pub transactions: usize,
    pub customers: usize,
    pub avg_price: f64,
    pub market_share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub total_revenue: f64,
    pub monthly: Vec<PeriodPerformance>,
    pub quarterly: Vec<PeriodPerformance>,
    pub yearly: Vec<PeriodPerformance>,
    /// Sorted by revenue, highest first
    pub by_category: Vec<GroupPerformance>,
    /// Sorted by revenue, highest first
    pub by_country: Vec<GroupPerformance>,
    /// Monday first
    pub by_day_of_week: Vec<GroupPerformance>,
    pub top_products: Vec<ProductPerformance>,
}

#[derive(Default)]
struct Group<'a> {
    revenue: f64,
    items: i64,
    transactions: HashSet<&'a str>,
    customers: HashSet<&'a str>,
}

fn group_by<'a, K, F>(rows: &'a [Transaction], key: F) -> BTreeMap<K, Group<'a>>
where
    K: Ord,
    F: Fn(&'a Transaction) -> K,
{
    let mut groups: BTreeMap<K, Group<'a>> = BTreeMap::new();
    for tx in rows {
        let group = groups.entry(key(tx)).or_default();
        group.revenue += tx.amount;
        group.items += tx.quantity;
        group.transactions.insert(&tx.transaction_id);
        group.customers.insert(&tx.customer_id);
    }
    groups
}

impl Group<'_> {
    fn summarize(&self, name: String, total_revenue: f64) -> GroupPerformance {
        GroupPerformance {
            name,
            revenue: self.revenue,
            transactions: self.transactions.len(),
            customers: self.customers.len(),
            items_sold: self.items,
            avg_transaction_value: self.revenue / self.transactions.len().max(1) as f64,
            market_share: stats::percent(self.revenue, total_revenue),
        }
    }
}

fn periods<K: ToString>(groups: BTreeMap<K, Group<'_>>, total_revenue: f64) -> Vec<PeriodPerformance> {
    let mut result: Vec<PeriodPerformance> = Vec::with_capacity(groups.len());
    for (key, group) in groups {
        let summary = group.summarize(key.to_string(), total_revenue);
        let previous = result.last();
        let row = PeriodPerformance {
            revenue_growth: previous.and_then(|p| stats::pct_change(p.revenue, summary.revenue)),
            customer_growth: previous
                .and_then(|p| stats::pct_change(p.customers as f64, summary.customers as f64)),
            transaction_growth: previous
                .and_then(|p| stats::pct_change(p.transactions as f64, summary.transactions as f64)),
            period: summary.name,
            revenue: summary.revenue,
            transactions: summary.transactions,
            customers: summary.customers,
            items_sold: summary.items_sold,
            avg_transaction_value: summary.avg_transaction_value,
            market_share: summary.market_share,
        };
        result.push(row);
    }
    result
}

fn ranked(groups: BTreeMap<&str, Group<'_>>, total_revenue: f64) -> Vec<GroupPerformance> {
    let mut result: Vec<GroupPerformance> = groups
        .into_iter()
        .map(|(name, group)| group.summarize(name.to_string(), total_revenue))
        .collect();
    result.sort_by(|a, b| b.revenue.total_cmp(&a.revenue).then_with(|| a.name.cmp(&b.name)));
    result
}

pub fn analyze_performance(features: &FeatureSet, top_n: usize) -> PerformanceReport {
    let rows = features.table.rows.as_slice();
    let total_revenue = features.table.total_revenue();

    let monthly = periods(group_by(rows, |t| YearMonth::of(t.date)), total_revenue);
    let quarterly = periods(
        group_by(rows, |t| {
            let month = YearMonth::of(t.date);
            (month.year, month.quarter())
        })
        .into_iter()
        .map(|((year, quarter), group)| (format!("{}Q{}", year, quarter), group))
        .collect::<BTreeMap<_, _>>(),
        total_revenue,
    );
    let yearly = periods(group_by(rows, |t| t.date.year()), total_revenue);

    let by_category = ranked(group_by(rows, |t| t.product_type.as_str()), total_revenue);
    let by_country = ranked(group_by(rows, |t| t.country.as_str()), total_revenue);

    let weekdays = group_by(rows, |t| t.date.weekday().num_days_from_monday());
    let by_day_of_week = WEEKDAYS
        .iter()
        .filter_map(|day: &Weekday| {
            weekdays
                .get(&day.num_days_from_monday())
                .map(|g| g.summarize(weekday_name(*day).to_string(), total_revenue))
        })
        .collect();

    let top_products = features
        .products
        .iter()
        .take(top_n)
        .map(|p| ProductPerformance {
            product: p.product.clone(),
            product_type: p.product_type.clone(),
            quantity: p.total_quantity,
            revenue: p.revenue,
            transactions: p.transactions,
            customers: p.unique_customers,
            avg_price: p.avg_price,
            market_share: stats::percent(p.revenue, total_revenue),
        })
        .collect();

    info!(
        months = monthly.len(),
        categories = by_category.len(),
        countries = by_country.len(),
        "performance analysis complete"
    );

    PerformanceReport {
        total_revenue,
        monthly,
        quarterly,
        yearly,
        by_category,
        by_country,
        by_day_of_week,
        top_products,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleaning::CleanedTable;
    use crate::features::{engineer_features, tests::tx};
    use std::sync::Arc;

    fn report() -> PerformanceReport {
        let mut rows = vec![
            tx("T1", "C1", "2022-12-30 10:00:00", 1, 100.0),
            tx("T2", "C2", "2023-01-02 10:00:00", 2, 30.0),
            tx("T2", "C2", "2023-01-02 10:00:00", 1, 40.0),
            tx("T3", "C1", "2023-04-03 18:00:00", 5, 10.0),
        ];
        rows[1].product_type = "Toys".to_string();
        rows[3].country = "Germany".to_string();
        let features = engineer_features(Arc::new(CleanedTable { rows })).unwrap();
        analyze_performance(&features, 10)
    }

    #[test]
    fn test_revenue_agrees_across_groupings() {
        let report = report();
        let total = 250.0;
        let sum = |groups: &[GroupPerformance]| groups.iter().map(|g| g.revenue).sum::<f64>();
        assert_eq!(report.total_revenue, total);
        assert_eq!(report.monthly.iter().map(|m| m.revenue).sum::<f64>(), total);
        assert_eq!(report.quarterly.iter().map(|m| m.revenue).sum::<f64>(), total);
        assert_eq!(report.yearly.iter().map(|m| m.revenue).sum::<f64>(), total);
        assert_eq!(sum(&report.by_category), total);
        assert_eq!(sum(&report.by_country), total);
        assert_eq!(sum(&report.by_day_of_week), total);
        let share: f64 = report.by_country.iter().map(|c| c.market_share).sum();
        assert!((share - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_period_growth_and_averages() {
        let report = report();
        assert_eq!(report.monthly.len(), 3);
        assert_eq!(report.monthly[0].period, "2022-12");
        assert_eq!(report.monthly[0].revenue_growth, None);
        assert_eq!(report.monthly[1].revenue_growth, Some(0.0));
        assert_eq!(report.monthly[1].avg_transaction_value, 100.0);
        assert_eq!(report.quarterly[0].period, "2022Q4");
        assert_eq!(report.quarterly[2].period, "2023Q2");
        assert_eq!(report.yearly[1].period, "2023");
        assert_eq!(report.yearly[1].revenue_growth, Some(50.0));
    }

    #[test]
    fn test_groupings_are_sorted_and_labelled() {
        let report = report();
        assert_eq!(report.by_country[0].name, "United Kingdom");
        assert_eq!(report.by_country[0].share_label(), "80.0%");
        assert_eq!(report.by_category[0].name, "Home");
        assert_eq!(report.by_day_of_week[0].name, "Monday");
        assert_eq!(report.by_day_of_week[0].transactions, 2);
    }
}
