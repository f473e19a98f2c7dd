//! Per-line and per-entity features derived from the cleaned table.

use crate::cleaning::{from_millis, to_millis, CleanedTable, Transaction};
use crate::error::{AnalyticsError, Result};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike, Weekday};
use polars::prelude::*;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Calendar month, ordered chronologically and rendered as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    pub fn of(date: NaiveDateTime) -> Self {
        Self::new(date.year(), date.month())
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self::new(self.year + 1, 1)
        } else {
            Self::new(self.year, self.month + 1)
        }
    }

    pub fn quarter(self) -> u32 {
        (self.month - 1) / 3 + 1
    }

    pub fn first_day(self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    pub fn last_day(self) -> Option<NaiveDate> {
        self.next().first_day().and_then(|d| d.pred_opt())
    }

    /// Every month from `start` to `end` inclusive.
    pub fn range(start: Self, end: Self) -> Vec<Self> {
        let mut months = Vec::new();
        let mut current = start;
        while current <= end {
            months.push(current);
            current = current.next();
        }
        months
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl Serialize for YearMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

pub const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

pub const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Name shown for a product: description, then item code, then product type.
pub fn product_label(tx: &Transaction) -> &str {
    tx.description
        .as_deref()
        .or(tx.item_code.as_deref())
        .unwrap_or(&tx.product_type)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeTier {
    Small,
    Medium,
    Large,
}

impl SizeTier {
    fn of(amount: f64) -> Self {
        if amount < 10.0 {
            SizeTier::Small
        } else if amount < 100.0 {
            SizeTier::Medium
        } else {
            SizeTier::Large
        }
    }
}

/// Features attached to one cleaned line (same index as the table row)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineFeatures {
    pub period: YearMonth,
    pub quarter: u32,
    pub weekday: Weekday,
    pub hour: u32,
    pub is_weekend: bool,
    /// Items in the whole transaction this line belongs to
    pub basket_items: i64,
    pub size_tier: SizeTier,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerFeatures {
    pub customer_id: String,
    pub total_transactions: usize,
    pub total_spend: f64,
    /// Mean line amount
    pub avg_transaction: f64,
    pub std_transaction: f64,
    pub total_items: i64,
    pub avg_items: f64,
    pub first_purchase: NaiveDateTime,
    pub last_purchase: NaiveDateTime,
    pub tenure_days: i64,
    pub avg_days_between_purchases: f64,
    /// Days from the last purchase to the last date in the dataset
    pub recency_days: i64,
    /// Revenue per distinct transaction
    pub avg_order_value: f64,
    pub primary_country: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductFeatures {
    pub product: String,
    pub product_type: String,
    pub total_quantity: i64,
    pub revenue: f64,
    pub transactions: usize,
    pub unique_customers: usize,
    pub avg_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureReport {
    pub customers: usize,
    pub products: usize,
    pub months: usize,
    pub first_date: NaiveDateTime,
    pub last_date: NaiveDateTime,
    pub customer_feature_columns: Vec<&'static str>,
}

/// Output of the feature engineering stage
#[derive(Debug, Clone)]
pub struct FeatureSet {
    pub table: Arc<CleanedTable>,
    pub lines: Vec<LineFeatures>,
    /// Sorted by customer id
    pub customers: Vec<CustomerFeatures>,
    /// Sorted by revenue, highest first
    pub products: Vec<ProductFeatures>,
    pub report: FeatureReport,
}

impl FeatureSet {
    pub fn last_date(&self) -> NaiveDateTime {
        self.report.last_date
    }

    pub fn first_date(&self) -> NaiveDateTime {
        self.report.first_date
    }

    pub fn customer(&self, customer_id: &str) -> Option<&CustomerFeatures> {
        self.customers
            .binary_search_by(|c| c.customer_id.as_str().cmp(customer_id))
            .ok()
            .map(|i| &self.customers[i])
    }
}

pub fn engineer_features(table: Arc<CleanedTable>) -> Result<FeatureSet> {
    let (first_date, last_date) = match (table.first_date(), table.last_date()) {
        (Some(first), Some(last)) => (first, last),
        _ => {
            return Err(AnalyticsError::InsufficientData(
                "cannot derive features from an empty table".to_string(),
            ))
        }
    };

    let frame = line_frame(&table)?;
    let basket_items = frame
        .clone()
        .lazy()
        .select([col("quantity").sum().over([col("transaction_id")]).alias("basket_items")])
        .collect()?;
    let basket_items = basket_items.column("basket_items")?.i64()?;

    let lines: Vec<LineFeatures> = table
        .rows
        .iter()
        .zip(basket_items.into_iter())
        .map(|(tx, basket)| {
            let weekday = tx.date.weekday();
            LineFeatures {
                period: YearMonth::of(tx.date),
                quarter: YearMonth::of(tx.date).quarter(),
                weekday,
                hour: tx.date.hour(),
                is_weekend: matches!(weekday, Weekday::Sat | Weekday::Sun),
                basket_items: basket.unwrap_or(0),
                size_tier: SizeTier::of(tx.amount),
            }
        })
        .collect();

    let customers = customer_features(&frame, last_date)?;
    let products = product_features(&frame)?;
    let months: BTreeSet<YearMonth> = lines.iter().map(|l| l.period).collect();

    let report = FeatureReport {
        customers: customers.len(),
        products: products.len(),
        months: months.len(),
        first_date,
        last_date,
        customer_feature_columns: vec![
            "total_transactions",
            "total_spend",
            "avg_transaction",
            "std_transaction",
            "total_items",
            "avg_items",
            "tenure_days",
            "avg_days_between_purchases",
            "recency_days",
            "avg_order_value",
        ],
    };
    info!(
        customers = report.customers,
        products = report.products,
        months = report.months,
        "features engineered"
    );

    Ok(FeatureSet {
        table,
        lines,
        customers,
        products,
        report,
    })
}

/// Cleaned lines as a frame; dates as epoch milliseconds, `product` from [`product_label`].
fn line_frame(table: &CleanedTable) -> Result<DataFrame> {
    let rows = &table.rows;
    Ok(df!(
        "transaction_id" => rows.iter().map(|t| t.transaction_id.as_str()).collect::<Vec<_>>(),
        "customer_id" => rows.iter().map(|t| t.customer_id.as_str()).collect::<Vec<_>>(),
        "quantity" => rows.iter().map(|t| t.quantity).collect::<Vec<_>>(),
        "price" => rows.iter().map(|t| t.price).collect::<Vec<_>>(),
        "amount" => rows.iter().map(|t| t.amount).collect::<Vec<_>>(),
        "date_ms" => rows.iter().map(|t| to_millis(t.date)).collect::<Vec<_>>(),
        "country" => rows.iter().map(|t| t.country.as_str()).collect::<Vec<_>>(),
        "product_type" => rows.iter().map(|t| t.product_type.as_str()).collect::<Vec<_>>(),
        "product" => rows.iter().map(product_label).collect::<Vec<_>>()
    )?)
}

fn required<T>(value: Option<T>, column: &str) -> Result<T> {
    value.ok_or_else(|| AnalyticsError::Computation(format!("null '{}' in aggregated features", column)))
}

fn customer_features(frame: &DataFrame, last_date: NaiveDateTime) -> Result<Vec<CustomerFeatures>> {
    let grouped = frame
        .clone()
        .lazy()
        .group_by_stable([col("customer_id")])
        .agg([
            col("transaction_id").n_unique().cast(DataType::Int64).alias("total_transactions"),
            col("amount").sum().alias("total_spend"),
            col("amount").mean().alias("avg_transaction"),
            col("amount")
                .std(1)
                .fill_nan(lit(0.0))
                .fill_null(lit(0.0))
                .alias("std_transaction"),
            col("quantity").sum().alias("total_items"),
            col("quantity").count().cast(DataType::Int64).alias("lines"),
            col("date_ms").min().alias("first_purchase"),
            col("date_ms").max().alias("last_purchase"),
        ])
        .collect()?;
    let primary = primary_countries(frame)?;

    let ids = grouped.column("customer_id")?.str()?;
    let transactions = grouped.column("total_transactions")?.i64()?;
    let spend = grouped.column("total_spend")?.f64()?;
    let avg = grouped.column("avg_transaction")?.f64()?;
    let spread = grouped.column("std_transaction")?.f64()?;
    let items = grouped.column("total_items")?.i64()?;
    let lines = grouped.column("lines")?.i64()?;
    let first = grouped.column("first_purchase")?.i64()?;
    let last = grouped.column("last_purchase")?.i64()?;

    let mut customers = Vec::with_capacity(grouped.height());
    for i in 0..grouped.height() {
        let customer_id = required(ids.get(i), "customer_id")?;
        let total_transactions = required(transactions.get(i), "total_transactions")? as usize;
        let total_spend = required(spend.get(i), "total_spend")?;
        let total_items = required(items.get(i), "total_items")?;
        let first_purchase = required(first.get(i).and_then(from_millis), "first_purchase")?;
        let last_purchase = required(last.get(i).and_then(from_millis), "last_purchase")?;
        let tenure_days = (last_purchase.date() - first_purchase.date()).num_days();

        customers.push(CustomerFeatures {
            customer_id: customer_id.to_string(),
            total_transactions,
            total_spend,
            avg_transaction: required(avg.get(i), "avg_transaction")?,
            std_transaction: spread.get(i).unwrap_or(0.0),
            total_items,
            avg_items: total_items as f64 / required(lines.get(i), "lines")? as f64,
            first_purchase,
            last_purchase,
            tenure_days,
            avg_days_between_purchases: if total_transactions > 1 {
                tenure_days as f64 / (total_transactions - 1) as f64
            } else {
                0.0
            },
            recency_days: (last_date.date() - last_purchase.date()).num_days(),
            avg_order_value: total_spend / total_transactions as f64,
            primary_country: primary.get(customer_id).cloned().unwrap_or_default(),
        });
    }
    customers.sort_by(|a, b| a.customer_id.cmp(&b.customer_id));
    Ok(customers)
}

/// Most frequent country per customer; ties go to the alphabetically first.
fn primary_countries(frame: &DataFrame) -> Result<BTreeMap<String, String>> {
    let counts = frame
        .clone()
        .lazy()
        .group_by_stable([col("customer_id"), col("country")])
        .agg([col("amount").count().cast(DataType::Int64).alias("lines")])
        .collect()?;
    let ids = counts.column("customer_id")?.str()?;
    let countries = counts.column("country")?.str()?;
    let lines = counts.column("lines")?.i64()?;

    let mut best: BTreeMap<&str, (&str, i64)> = BTreeMap::new();
    for i in 0..counts.height() {
        let (Some(id), Some(country), Some(n)) = (ids.get(i), countries.get(i), lines.get(i)) else {
            continue;
        };
        let entry = best.entry(id).or_insert((country, n));
        if n > entry.1 || (n == entry.1 && country < entry.0) {
            *entry = (country, n);
        }
    }
    Ok(best
        .into_iter()
        .map(|(id, (country, _))| (id.to_string(), country.to_string()))
        .collect())
}

fn product_features(frame: &DataFrame) -> Result<Vec<ProductFeatures>> {
    let grouped = frame
        .clone()
        .lazy()
        .group_by_stable([col("product")])
        .agg([
            col("product_type").first(),
            col("quantity").sum().alias("total_quantity"),
            col("amount").sum().alias("revenue"),
            col("transaction_id").n_unique().cast(DataType::Int64).alias("transactions"),
            col("customer_id").n_unique().cast(DataType::Int64).alias("unique_customers"),
            col("price").mean().alias("avg_price"),
        ])
        .collect()?;

    let names = grouped.column("product")?.str()?;
    let product_types = grouped.column("product_type")?.str()?;
    let quantities = grouped.column("total_quantity")?.i64()?;
    let revenues = grouped.column("revenue")?.f64()?;
    let transactions = grouped.column("transactions")?.i64()?;
    let customers = grouped.column("unique_customers")?.i64()?;
    let prices = grouped.column("avg_price")?.f64()?;

    let mut products = Vec::with_capacity(grouped.height());
    for i in 0..grouped.height() {
        products.push(ProductFeatures {
            product: required(names.get(i), "product")?.to_string(),
            product_type: required(product_types.get(i), "product_type")?.to_string(),
            total_quantity: required(quantities.get(i), "total_quantity")?,
            revenue: required(revenues.get(i), "revenue")?,
            transactions: required(transactions.get(i), "transactions")? as usize,
            unique_customers: required(customers.get(i), "unique_customers")? as usize,
            avg_price: required(prices.get(i), "avg_price")?,
        });
    }
    products.sort_by(|a, b| {
        b.revenue
            .total_cmp(&a.revenue)
            .then_with(|| a.product.cmp(&b.product))
    });
    Ok(products)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn tx(id: &str, customer: &str, date: &str, quantity: i64, price: f64) -> Transaction {
        Transaction {
            transaction_id: id.to_string(),
            customer_id: customer.to_string(),
            quantity,
            price,
            amount: quantity as f64 * price,
            date: crate::cleaning::parse_datetime(date).unwrap(),
            product_type: "Home".to_string(),
            country: "United Kingdom".to_string(),
            item_code: None,
            description: None,
        }
    }

    #[test]
    fn test_year_month_navigation() {
        let dec = YearMonth::new(2022, 12);
        assert_eq!(dec.next(), YearMonth::new(2023, 1));
        assert_eq!(dec.to_string(), "2022-12");
        assert_eq!(dec.quarter(), 4);
        assert_eq!(YearMonth::range(YearMonth::new(2022, 11), YearMonth::new(2023, 2)).len(), 4);
        assert_eq!(
            YearMonth::new(2024, 2).last_day(),
            NaiveDate::from_ymd_opt(2024, 2, 29)
        );
    }

    #[test]
    fn test_customer_features() {
        let table = Arc::new(CleanedTable {
            rows: vec![
                tx("T1", "C1", "2023-01-01 10:00:00", 2, 10.0),
                tx("T1", "C1", "2023-01-01 10:00:00", 1, 5.0),
                tx("T2", "C1", "2023-01-11 12:00:00", 1, 15.0),
                tx("T3", "C2", "2023-01-21 09:00:00", 4, 2.5),
            ],
        });

        let features = engineer_features(table).unwrap();
        assert_eq!(features.customers.len(), 2);
        let c1 = features.customer("C1").unwrap();
        assert_eq!(c1.total_transactions, 2);
        assert_eq!(c1.total_spend, 40.0);
        assert_eq!(c1.avg_order_value, 20.0);
        assert_eq!(c1.tenure_days, 10);
        assert_eq!(c1.recency_days, 10);
        assert_eq!(c1.total_items, 4);
        assert_eq!(features.lines[0].basket_items, 3);
        assert_eq!(features.lines[0].weekday, Weekday::Sun);
        assert!(features.lines[0].is_weekend);
        assert_eq!(features.report.months, 1);
        assert_eq!(features.customer("C2").unwrap().recency_days, 0);
    }

    #[test]
    fn test_product_aggregates_and_primary_country() {
        let mut rows = vec![
            tx("T1", "C1", "2023-02-01 10:00:00", 2, 10.0),
            tx("T2", "C1", "2023-02-02 10:00:00", 1, 30.0),
            tx("T3", "C2", "2023-02-03 10:00:00", 5, 1.0),
        ];
        rows[0].description = Some("Lantern".to_string());
        rows[1].description = Some("Lantern".to_string());
        rows[1].country = "France".to_string();
        rows[2].description = Some("Candle".to_string());

        let features = engineer_features(Arc::new(CleanedTable { rows })).unwrap();
        assert_eq!(features.products.len(), 2);
        let lantern = &features.products[0];
        assert_eq!(lantern.product, "Lantern");
        assert_eq!(lantern.total_quantity, 3);
        assert_eq!(lantern.revenue, 50.0);
        assert_eq!(lantern.transactions, 2);
        assert_eq!(lantern.unique_customers, 1);
        assert_eq!(lantern.avg_price, 20.0);
        assert_eq!(features.products[1].product, "Candle");

        // One line each in France and the United Kingdom: alphabetical tie-break.
        assert_eq!(features.customer("C1").unwrap().primary_country, "France");
        assert_eq!(features.customer("C2").unwrap().primary_country, "United Kingdom");
        assert_eq!(features.customer("C2").unwrap().std_transaction, 0.0);
    }
}
