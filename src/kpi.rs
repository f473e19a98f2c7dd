//! Headline business KPIs.

use crate::config::KpiConfig;
use crate::features::{product_label, FeatureSet, YearMonth};
use crate::stats;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RevenueKpis {
    pub total_revenue: f64,
    pub total_transactions: usize,
    /// Mean line amount
    pub avg_order_value: f64,
    pub median_order_value: f64,
    pub revenue_per_transaction: f64,
    pub total_items_sold: i64,
    pub avg_items_per_transaction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerKpis {
    pub unique_customers: usize,
    pub revenue_per_customer: f64,
    pub avg_orders_per_customer: f64,
    pub max_orders_single_customer: usize,
    pub repeat_customer_count: usize,
    pub single_purchase_customers: usize,
    pub repeat_customer_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductKpis {
    pub unique_products: usize,
    pub avg_revenue_per_product: f64,
    pub max_product_revenue: f64,
    pub top_product: Option<String>,
    pub unique_product_types: usize,
    pub top_category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeographicKpis {
    pub unique_countries: usize,
    pub top_country: Option<String>,
    pub top_country_revenue: f64,
    pub top_country_share: f64,
    /// Herfindahl-Hirschman index of country revenue shares (0..=10000)
    pub country_hhi: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeKpis {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub data_span_days: i64,
    pub avg_monthly_revenue: f64,
    pub best_month: Option<YearMonth>,
    pub best_month_revenue: f64,
    pub avg_daily_revenue: f64,
    pub best_day_revenue: f64,
    pub avg_daily_transactions: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GrowthKpis {
    pub mom_growth: Option<f64>,
    pub avg_monthly_growth: Option<f64>,
    pub yoy_growth: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiSummaryItem {
    pub category: &'static str,
    pub name: &'static str,
    pub value: String,
    pub raw_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiReport {
    pub revenue: RevenueKpis,
    pub customer: CustomerKpis,
    pub product: ProductKpis,
    pub geographic: GeographicKpis,
    pub time: TimeKpis,
    pub growth: GrowthKpis,
    pub summary: Vec<KpiSummaryItem>,
}

pub fn generate_kpis(features: &FeatureSet, config: &KpiConfig) -> KpiReport {
    let rows = &features.table.rows;
    let amounts: Vec<f64> = rows.iter().map(|t| t.amount).collect();
    let total_revenue: f64 = amounts.iter().sum();
    let total_transactions = rows
        .iter()
        .map(|t| t.transaction_id.as_str())
        .collect::<HashSet<_>>()
        .len();
    let total_items_sold: i64 = rows.iter().map(|t| t.quantity).sum();

    let revenue = RevenueKpis {
        total_revenue,
        total_transactions,
        avg_order_value: stats::mean(&amounts),
        median_order_value: stats::median(&amounts),
        revenue_per_transaction: total_revenue / total_transactions.max(1) as f64,
        total_items_sold,
        avg_items_per_transaction: total_items_sold as f64 / rows.len().max(1) as f64,
    };

    let orders: Vec<usize> = features.customers.iter().map(|c| c.total_transactions).collect();
    let unique_customers = orders.len();
    let repeat_customer_count = orders.iter().filter(|&&o| o > 1).count();
    let customer = CustomerKpis {
        unique_customers,
        revenue_per_customer: total_revenue / unique_customers.max(1) as f64,
        avg_orders_per_customer: stats::mean(&orders.iter().map(|&o| o as f64).collect::<Vec<_>>()),
        max_orders_single_customer: orders.iter().copied().max().unwrap_or(0),
        repeat_customer_count,
        single_purchase_customers: unique_customers - repeat_customer_count,
        repeat_customer_rate: stats::percent(repeat_customer_count as f64, unique_customers as f64),
    };

    let product = product_kpis(features);
    let geographic = geographic_kpis(features, total_revenue);

    let mut monthly: BTreeMap<YearMonth, f64> = BTreeMap::new();
    let mut daily: BTreeMap<NaiveDate, (f64, HashSet<&str>)> = BTreeMap::new();
    for tx in rows {
        *monthly.entry(YearMonth::of(tx.date)).or_default() += tx.amount;
        let day = daily.entry(tx.date.date()).or_default();
        day.0 += tx.amount;
        day.1.insert(&tx.transaction_id);
    }

    let start_date = features.first_date().date();
    let end_date = features.last_date().date();
    let monthly_values: Vec<f64> = monthly.values().copied().collect();
    let daily_values: Vec<f64> = daily.values().map(|d| d.0).collect();
    let best_month = monthly.iter().max_by(|a, b| a.1.total_cmp(b.1));
    let time = TimeKpis {
        start_date,
        end_date,
        data_span_days: (features.last_date() - features.first_date()).num_days(),
        avg_monthly_revenue: stats::mean(&monthly_values),
        best_month: best_month.map(|(m, _)| *m),
        best_month_revenue: best_month.map(|(_, v)| *v).unwrap_or(0.0),
        avg_daily_revenue: stats::mean(&daily_values),
        best_day_revenue: daily_values.iter().copied().fold(0.0, f64::max),
        avg_daily_transactions: stats::mean(
            &daily.values().map(|d| d.1.len() as f64).collect::<Vec<_>>(),
        ),
    };

    let growth = growth_kpis(&monthly, end_date, config);
    let summary = summary(&revenue, &customer, &growth);
    info!(
        revenue = total_revenue,
        transactions = total_transactions,
        customers = unique_customers,
        "KPIs generated"
    );

    KpiReport {
        revenue,
        customer,
        product,
        geographic,
        time,
        growth,
        summary,
    }
}

fn product_kpis(features: &FeatureSet) -> ProductKpis {
    let product_revenue: Vec<f64> = features.products.iter().map(|p| p.revenue).collect();

    let mut categories: BTreeMap<&str, f64> = BTreeMap::new();
    for tx in &features.table.rows {
        *categories.entry(tx.product_type.as_str()).or_default() += tx.amount;
    }
    let top_category = categories
        .iter()
        .max_by(|a, b| a.1.total_cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(c, _)| c.to_string());

    ProductKpis {
        unique_products: features
            .table
            .rows
            .iter()
            .map(product_label)
            .collect::<HashSet<_>>()
            .len(),
        avg_revenue_per_product: stats::mean(&product_revenue),
        max_product_revenue: product_revenue.iter().copied().fold(0.0, f64::max),
        top_product: features.products.first().map(|p| p.product.clone()),
        unique_product_types: categories.len(),
        top_category,
    }
}

fn geographic_kpis(features: &FeatureSet, total_revenue: f64) -> GeographicKpis {
    let mut countries: BTreeMap<&str, f64> = BTreeMap::new();
    for tx in &features.table.rows {
        *countries.entry(tx.country.as_str()).or_default() += tx.amount;
    }
    let top = countries
        .iter()
        .max_by(|a, b| a.1.total_cmp(b.1).then_with(|| b.0.cmp(a.0)));
    let country_hhi = if total_revenue > 0.0 {
        countries
            .values()
            .map(|v| (v / total_revenue).powi(2))
            .sum::<f64>()
            * 10_000.0
    } else {
        0.0
    };

    GeographicKpis {
        unique_countries: countries.len(),
        top_country: top.map(|(c, _)| c.to_string()),
        top_country_revenue: top.map(|(_, v)| *v).unwrap_or(0.0),
        top_country_share: stats::percent(top.map(|(_, v)| *v).unwrap_or(0.0), total_revenue),
        country_hhi,
    }
}

/// Growth over observed months.
///
/// Month-over-month compares the two most recent months; with
/// `exclude_partial_month` a trailing month that the data does not reach the
/// end of is ignored.
fn growth_kpis(monthly: &BTreeMap<YearMonth, f64>, end_date: NaiveDate, config: &KpiConfig) -> GrowthKpis {
    let mut series: Vec<(YearMonth, f64)> = monthly.iter().map(|(m, v)| (*m, *v)).collect();
    if config.exclude_partial_month {
        if let Some((last, _)) = series.last() {
            if last.last_day().map_or(false, |day| end_date < day) {
                series.pop();
            }
        }
    }
    let values: Vec<f64> = series.iter().map(|(_, v)| *v).collect();
    let n = values.len();

    let mom_growth = if n >= 2 {
        Some(stats::pct_change(values[n - 2], values[n - 1]).unwrap_or(0.0))
    } else {
        None
    };
    let avg_monthly_growth = if n > 2 {
        let rates: Vec<f64> = values
            .windows(2)
            .filter_map(|w| stats::pct_change(w[0], w[1]))
            .collect();
        (!rates.is_empty()).then(|| stats::mean(&rates))
    } else {
        None
    };
    let yoy_growth = if n >= 12 {
        let last_12: f64 = values[n - 12..].iter().sum();
        let prev_start = n.saturating_sub(24);
        let prev_12: f64 = values[prev_start..n - 12].iter().sum();
        Some(stats::pct_change(prev_12, last_12).unwrap_or(0.0))
    } else {
        None
    };

    GrowthKpis {
        mom_growth,
        avg_monthly_growth,
        yoy_growth,
    }
}

fn summary(revenue: &RevenueKpis, customer: &CustomerKpis, growth: &GrowthKpis) -> Vec<KpiSummaryItem> {
    let mut items = vec![
        KpiSummaryItem {
            category: "Revenue",
            name: "Total Revenue",
            value: format_currency(revenue.total_revenue),
            raw_value: revenue.total_revenue,
        },
        KpiSummaryItem {
            category: "Revenue",
            name: "Average Order Value",
            value: format_currency(revenue.avg_order_value),
            raw_value: revenue.avg_order_value,
        },
        KpiSummaryItem {
            category: "Revenue",
            name: "Total Transactions",
            value: group_thousands(&revenue.total_transactions.to_string()),
            raw_value: revenue.total_transactions as f64,
        },
        KpiSummaryItem {
            category: "Customer",
            name: "Unique Customers",
            value: group_thousands(&customer.unique_customers.to_string()),
            raw_value: customer.unique_customers as f64,
        },
        KpiSummaryItem {
            category: "Customer",
            name: "Repeat Customer Rate",
            value: stats::format_percent(customer.repeat_customer_rate),
            raw_value: customer.repeat_customer_rate,
        },
    ];
    if let Some(mom) = growth.mom_growth {
        items.push(KpiSummaryItem {
            category: "Growth",
            name: "Month over Month",
            value: format!("{:+.1}%", mom),
            raw_value: mom,
        });
    }
    items
}

/// `$1,234.56`
pub fn format_currency(value: f64) -> String {
    let formatted = format!("{:.2}", value.abs());
    let (whole, fraction) = formatted.split_once('.').unwrap_or((formatted.as_str(), "00"));
    let sign = if value < 0.0 { "-" } else { "" };
    format!("{}${}.{}", sign, group_thousands(whole), fraction)
}

fn group_thousands(digits: &str) -> String {
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleaning::CleanedTable;
    use crate::features::{engineer_features, tests::tx};
    use std::sync::Arc;

    fn features() -> FeatureSet {
        let mut rows = vec![
            tx("T1", "C1", "2023-01-10", 2, 50.0),
            tx("T1", "C1", "2023-01-10", 1, 20.0),
            tx("T2", "C2", "2023-02-14", 1, 200.0),
            tx("T3", "C1", "2023-03-05", 3, 100.0),
        ];
        rows[2].country = "France".to_string();
        rows[3].product_type = "Garden".to_string();
        engineer_features(Arc::new(CleanedTable { rows })).unwrap()
    }

    #[test]
    fn test_revenue_and_customer_kpis() {
        let report = generate_kpis(&features(), &KpiConfig::default());
        assert_eq!(report.revenue.total_revenue, 620.0);
        assert_eq!(report.revenue.total_transactions, 3);
        assert_eq!(report.revenue.avg_order_value, 155.0);
        assert_eq!(report.revenue.total_items_sold, 7);
        assert_eq!(report.customer.unique_customers, 2);
        assert_eq!(report.customer.repeat_customer_count, 1);
        assert_eq!(report.customer.repeat_customer_rate, 50.0);
        assert_eq!(report.product.top_category.as_deref(), Some("Home"));
        assert_eq!(report.time.best_month, Some(YearMonth::new(2023, 3)));
    }

    #[test]
    fn test_geographic_concentration() {
        let report = generate_kpis(&features(), &KpiConfig::default());
        assert_eq!(report.geographic.unique_countries, 2);
        assert_eq!(report.geographic.top_country.as_deref(), Some("United Kingdom"));
        let uk = 420.0 / 620.0;
        let fr = 200.0 / 620.0;
        assert!((report.geographic.country_hhi - (uk * uk + fr * fr) * 10_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_concentration_is_identical_across_runs() {
        let countries = ["Spain", "France", "Germany", "Norway", "Italy", "Japan", "Chile"];
        let rows: Vec<_> = countries
            .iter()
            .enumerate()
            .map(|(i, country)| {
                let mut line = tx(&format!("T{}", i), "C1", "2023-01-10", 1, 0.1 + i as f64 / 3.0);
                line.country = country.to_string();
                line
            })
            .collect();
        let total: f64 = rows.iter().map(|t| t.amount).sum();
        let mut by_name: Vec<(&str, f64)> = rows.iter().map(|t| (t.country.as_str(), t.amount)).collect();
        by_name.sort_by(|a, b| a.0.cmp(b.0));
        let expected = by_name.iter().map(|(_, v)| (v / total).powi(2)).sum::<f64>() * 10_000.0;

        for _ in 0..5 {
            let features = engineer_features(Arc::new(CleanedTable { rows: rows.clone() })).unwrap();
            let report = generate_kpis(&features, &KpiConfig::default());
            assert_eq!(report.geographic.country_hhi.to_bits(), expected.to_bits());
        }
    }

    #[test]
    fn test_growth_uses_last_two_months() {
        let report = generate_kpis(&features(), &KpiConfig::default());
        // February 200 -> March 300.
        assert_eq!(report.growth.mom_growth, Some(50.0));
        assert!(report.growth.yoy_growth.is_none());

        let trimmed = generate_kpis(
            &features(),
            &KpiConfig {
                exclude_partial_month: true,
            },
        );
        // March ends on the 5th, so January 120 -> February 200.
        let mom = trimmed.growth.mom_growth.unwrap();
        assert!((mom - 66.666_666_666).abs() < 1e-6);
    }

    #[test]
    fn test_presentation_formatting() {
        assert_eq!(format_currency(1234567.891), "$1,234,567.89");
        assert_eq!(format_currency(12.5), "$12.50");
        let report = generate_kpis(&features(), &KpiConfig::default());
        let mom = report.summary.iter().find(|s| s.name == "Month over Month").unwrap();
        assert_eq!(mom.value, "+50.0%");
    }
}
