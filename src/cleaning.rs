//! Turns the raw snapshot into the canonical table of transaction lines.

use crate::config::CleaningConfig;
use crate::data::DatasetSnapshot;
use crate::error::{AnalyticsError, Result};
use crate::stats;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

const UNKNOWN: &str = "Unknown";

const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
];

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%d.%m.%Y"];

/// One valid transaction line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub customer_id: String,
    pub quantity: i64,
    pub price: f64,
    /// Always `quantity × price` after cleaning
    pub amount: f64,
    pub date: NaiveDateTime,
    pub product_type: String,
    pub country: String,
    pub item_code: Option<String>,
    pub description: Option<String>,
}

/// Cleaned lines owned by a single pipeline run
#[derive(Debug, Clone, Default)]
pub struct CleanedTable {
    pub rows: Vec<Transaction>,
}

impl CleanedTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn total_revenue(&self) -> f64 {
        self.rows.iter().map(|t| t.amount).sum()
    }

    pub fn last_date(&self) -> Option<NaiveDateTime> {
        self.rows.iter().map(|t| t.date).max()
    }

    pub fn first_date(&self) -> Option<NaiveDateTime> {
        self.rows.iter().map(|t| t.date).min()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleaningOperation {
    pub operation: String,
    pub affected: usize,
    pub records_after: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleaningReport {
    pub original_rows: usize,
    pub final_rows: usize,
    pub records_removed: usize,
    pub removal_percentage: f64,
    pub amounts_derived: usize,
    pub amounts_reconciled: usize,
    pub operations: Vec<CleaningOperation>,
}

struct Cleaner<'a> {
    config: &'a CleaningConfig,
    operations: Vec<CleaningOperation>,
}

impl Cleaner<'_> {
    fn log(&mut self, operation: &str, affected: usize, records_after: usize) {
        debug!(operation, affected, records_after, "cleaning step");
        self.operations.push(CleaningOperation {
            operation: operation.to_string(),
            affected,
            records_after,
        });
    }
}

/// Run the full cleaning sequence over a snapshot.
///
/// Order: exact-duplicate removal, missing-value handling and type
/// normalisation, cancelled-line removal, amount reconciliation, text
/// normalisation, optional IQR outlier removal.
pub fn clean_dataset(
    snapshot: &DatasetSnapshot,
    config: &CleaningConfig,
) -> Result<(CleanedTable, CleaningReport)> {
    let original_rows = snapshot.row_count();
    let mut cleaner = Cleaner {
        config,
        operations: Vec::new(),
    };

    let deduped = snapshot
        .frame
        .unique_stable(None, UniqueKeepStrategy::First, None)?;
    cleaner.log(
        "remove_duplicates",
        original_rows - deduped.height(),
        deduped.height(),
    );

    let before = deduped.height();
    let quantity = || col("quantity").cast(DataType::Float64);
    let required = ["transaction_id", "customer_id", "quantity", "price", "amount", "date_ms"]
        .into_iter()
        .fold(lit(true), |keep, name| keep.and(col(name).is_not_null()));
    let mut frame = canonical_frame(&deduped)?
        .lazy()
        // Repair a missing unit price from the line total when possible.
        .with_columns([when(col("price").is_null().and(col("quantity").neq(lit(0))))
            .then(col("amount") / quantity())
            .otherwise(col("price"))
            .alias("price")])
        .with_columns([
            col("amount").is_null().alias("amount_derived"),
            col("amount")
                .fill_null(quantity() * col("price"))
                .alias("amount"),
        ])
        .filter(required)
        .collect()?;
    let amounts_derived = count_flags(&frame, "amount_derived")?;
    cleaner.log("handle_missing_values", before - frame.height(), frame.height());

    if cleaner.config.remove_cancelled {
        let before = frame.height();
        frame = frame
            .lazy()
            .filter(col("quantity").gt(lit(0)).and(col("price").gt(lit(0.0))))
            .collect()?;
        cleaner.log("remove_cancelled_transactions", before - frame.height(), frame.height());
    }

    let tolerance = cleaner.config.amount_tolerance;
    frame = frame
        .lazy()
        .with_columns([(col("amount") - quantity() * col("price")).alias("amount_gap")])
        .with_columns([col("amount_gap")
            .gt(lit(tolerance))
            .or(col("amount_gap").lt(lit(-tolerance)))
            .alias("amount_reconciled")])
        .with_columns([when(col("amount_reconciled"))
            .then(quantity() * col("price"))
            .otherwise(col("amount"))
            .alias("amount")])
        .collect()?;
    let amounts_reconciled = count_flags(&frame, "amount_reconciled")?;
    cleaner.log("reconcile_amounts", amounts_reconciled, frame.height());

    if let Some(multiplier) = cleaner.config.outlier_iqr_multiplier {
        let before = frame.height();
        frame = remove_outliers(frame, "quantity", multiplier)?;
        frame = remove_outliers(frame, "amount", multiplier)?;
        cleaner.log("remove_outliers", before - frame.height(), frame.height());
    }

    let rows = transactions(&frame)?;
    if rows.is_empty() {
        return Err(AnalyticsError::InsufficientData(
            "no valid transactions remain after cleaning".to_string(),
        ));
    }

    let final_rows = rows.len();
    let report = CleaningReport {
        original_rows,
        final_rows,
        records_removed: original_rows - final_rows,
        removal_percentage: stats::percent((original_rows - final_rows) as f64, original_rows as f64),
        amounts_derived,
        amounts_reconciled,
        operations: cleaner.operations,
    };
    info!(
        original = original_rows,
        cleaned = final_rows,
        derived = amounts_derived,
        reconciled = amounts_reconciled,
        "cleaning complete"
    );
    Ok((CleanedTable { rows }, report))
}

/// Typed working frame: trimmed text with empty cells as null, numbers as
/// `Int64`/`Float64`, dates as epoch milliseconds.
fn canonical_frame(raw: &DataFrame) -> Result<DataFrame> {
    let quantity: Int64Chunked = numeric_column(raw, "quantity")?
        .into_iter()
        .map(|v| v.map(|q| q.round() as i64))
        .collect();
    let frame = DataFrame::new(vec![
        text_column(raw, "transaction_id", "transaction_id")?,
        text_column(raw, "customer_id", "customer_id")?,
        quantity.into_series().with_name("quantity"),
        numeric_column(raw, "price")?.into_series().with_name("price"),
        numeric_column(raw, "transaction_amount")?
            .into_series()
            .with_name("amount"),
        date_column(raw)?.into_series().with_name("date_ms"),
        text_column(raw, "product_type", "product_type")?,
        text_column(raw, "country", "country")?,
        text_column(raw, "transaction_item_code", "item_code")?,
        text_column(raw, "transaction_item_description", "description")?,
    ])?;

    let text = ["transaction_id", "customer_id", "product_type", "country", "item_code", "description"];
    let trimmed = text
        .into_iter()
        .map(|name| {
            let value = col(name).str().strip_chars(lit(NULL));
            when(value.clone().eq(lit("")))
                .then(lit(NULL))
                .otherwise(value)
                .alias(name)
        })
        .collect::<Vec<_>>();

    Ok(frame
        .lazy()
        .with_columns(trimmed)
        .with_columns([
            // Numeric ids read as floats ("17850.0") collapse to their integer form.
            col("customer_id").str().strip_suffix(lit(".0")),
            col("product_type").fill_null(lit(UNKNOWN)),
            col("country").fill_null(lit(UNKNOWN)),
        ])
        .collect()?)
}

fn text_column(raw: &DataFrame, source: &str, name: &str) -> Result<Series> {
    match raw.column(source) {
        Ok(series) => Ok(series.cast(&DataType::String)?.with_name(name)),
        Err(_) => Ok(Series::full_null(name, raw.height(), &DataType::String)),
    }
}

/// Numbers stored as text may carry a currency sign or thousands separators.
fn numeric_column(raw: &DataFrame, name: &str) -> Result<Float64Chunked> {
    let series = raw.column(name)?;
    if series.dtype() == &DataType::String {
        return Ok(series.str()?.into_iter().map(|v| v.and_then(parse_number)).collect());
    }
    let values = series.cast(&DataType::Float64)?;
    let values = values.f64()?;
    Ok(values.into_iter().map(|v| v.filter(|x| x.is_finite())).collect())
}

fn date_column(raw: &DataFrame) -> Result<Int64Chunked> {
    let dates = raw.column("transaction_date")?.cast(&DataType::String)?;
    Ok(dates
        .str()?
        .into_iter()
        .map(|v| v.and_then(parse_datetime).map(to_millis))
        .collect())
}

fn count_flags(frame: &DataFrame, name: &str) -> Result<usize> {
    Ok(frame
        .column(name)?
        .bool()?
        .into_iter()
        .filter(|flag| *flag == Some(true))
        .count())
}

fn remove_outliers(frame: DataFrame, name: &str, multiplier: f64) -> Result<DataFrame> {
    let values = frame.column(name)?.cast(&DataType::Float64)?;
    let values = values.f64()?;
    let (Some(q1), Some(q3)) = (
        values.quantile(0.25, QuantileInterpolOptions::Linear)?,
        values.quantile(0.75, QuantileInterpolOptions::Linear)?,
    ) else {
        return Ok(frame);
    };
    let iqr = q3 - q1;
    let value = col(name).cast(DataType::Float64);
    Ok(frame
        .lazy()
        .filter(
            value
                .clone()
                .gt_eq(lit(q1 - multiplier * iqr))
                .and(value.lt_eq(lit(q3 + multiplier * iqr))),
        )
        .collect()?)
}

/// Materialise the cleaned frame as owned lines.
fn transactions(frame: &DataFrame) -> Result<Vec<Transaction>> {
    let transaction_ids = frame.column("transaction_id")?.str()?;
    let customer_ids = frame.column("customer_id")?.str()?;
    let quantities = frame.column("quantity")?.i64()?;
    let prices = frame.column("price")?.f64()?;
    let amounts = frame.column("amount")?.f64()?;
    let dates = frame.column("date_ms")?.i64()?;
    let product_types = frame.column("product_type")?.str()?;
    let countries = frame.column("country")?.str()?;
    let item_codes = frame.column("item_code")?.str()?;
    let descriptions = frame.column("description")?.str()?;

    let mut rows = Vec::with_capacity(frame.height());
    for i in 0..frame.height() {
        let (Some(transaction_id), Some(customer_id), Some(quantity), Some(price), Some(amount), Some(date)) = (
            transaction_ids.get(i),
            customer_ids.get(i),
            quantities.get(i),
            prices.get(i),
            amounts.get(i),
            dates.get(i).and_then(from_millis),
        ) else {
            continue;
        };
        rows.push(Transaction {
            transaction_id: transaction_id.to_string(),
            customer_id: customer_id.to_string(),
            quantity,
            price,
            amount,
            date,
            product_type: product_types.get(i).unwrap_or(UNKNOWN).to_string(),
            country: title_case(countries.get(i).unwrap_or(UNKNOWN)),
            item_code: item_codes.get(i).map(str::to_string),
            description: descriptions.get(i).map(str::to_string),
        });
    }
    Ok(rows)
}

pub(crate) fn to_millis(date: NaiveDateTime) -> i64 {
    date.and_utc().timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(ms).map(|d| d.naive_utc())
}

/// Parse the date formats retail exports commonly use.
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches('$')
        .chars()
        .filter(|c| *c != ',')
        .collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn title_case(raw: &str) -> String {
    raw.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn snapshot(frame: DataFrame) -> std::sync::Arc<DatasetSnapshot> {
        DatasetSnapshot::new(frame, "test.csv").unwrap()
    }

    #[test]
    fn test_clean_removes_duplicates_nulls_and_cancellations() {
        let frame = df!(
            "transaction_id" => &[Some("T1"), Some("T1"), Some("T2"), Some("T3"), Some("T4")],
            "quantity" => &[Some(2i64), Some(2), Some(-1), Some(3), Some(1)],
            "transaction_date" => &[Some("2023-01-05"), Some("2023-01-05"), Some("2023-01-06"), Some("2023-01-07"), Some("2023-01-08")],
            "price" => &[Some(5.0), Some(5.0), Some(4.0), Some(2.0), Some(1.0)],
            "customer_id" => &[Some("C1"), Some("C1"), Some("C2"), None, Some("C3")],
            "transaction_amount" => &[Some(10.0), Some(10.0), Some(-4.0), Some(6.0), Some(1.0)]
        )
        .unwrap();

        let (table, report) = clean_dataset(&snapshot(frame), &CleaningConfig::default()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(report.original_rows, 5);
        assert_eq!(report.records_removed, 3);
        assert_eq!(report.operations[0].affected, 1);
        assert!(table.rows.iter().all(|t| t.quantity > 0));
    }

    #[test]
    fn test_zero_and_negative_prices_are_dropped_with_cancellations() {
        let frame = df!(
            "transaction_id" => &["T1", "T2", "T3", "T4"],
            "quantity" => &[2i64, 3, 1, -2],
            "transaction_date" => &["2023-01-05", "2023-01-06", "2023-01-07", "2023-01-08"],
            "price" => &[5.0, 0.0, -1.5, 4.0],
            "customer_id" => &["C1", "C2", "C3", "C4"],
            "transaction_amount" => &[10.0, 0.0, -1.5, -8.0]
        )
        .unwrap();
        let snap = snapshot(frame);

        let (table, report) = clean_dataset(&snap, &CleaningConfig::default()).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows[0].transaction_id, "T1");
        let cancelled = report
            .operations
            .iter()
            .find(|op| op.operation == "remove_cancelled_transactions")
            .unwrap();
        assert_eq!(cancelled.affected, 3);
        assert!(table.rows.iter().all(|t| t.price > 0.0 && t.amount > 0.0));

        let config = CleaningConfig {
            remove_cancelled: false,
            ..CleaningConfig::default()
        };
        let (kept, _) = clean_dataset(&snap, &config).unwrap();
        assert_eq!(kept.len(), 4);
    }

    #[test]
    fn test_missing_amount_is_derived_and_wrong_amount_reconciled() {
        let frame = df!(
            "transaction_id" => &["T1", "T2"],
            "quantity" => &[4i64, 2],
            "transaction_date" => &["2023-03-01 10:00:00", "03/02/2023 11:30"],
            "price" => &[2.5, 3.0],
            "customer_id" => &["17850.0", "13047"],
            "transaction_amount" => &[None, Some(99.0)],
            "country" => &["  united kingdom ", "FRANCE"]
        )
        .unwrap();

        let (table, report) = clean_dataset(&snapshot(frame), &CleaningConfig::default()).unwrap();
        assert_eq!(report.amounts_derived, 1);
        assert_eq!(report.amounts_reconciled, 1);
        assert_eq!(table.rows[0].amount, 10.0);
        assert_eq!(table.rows[1].amount, 6.0);
        assert_eq!(table.rows[0].customer_id, "17850");
        assert_eq!(table.rows[0].country, "United Kingdom");
        assert_eq!(table.rows[1].country, "France");
        assert_eq!(table.rows[1].product_type, "Unknown");
        assert_eq!(
            table.rows[1].date,
            NaiveDate::from_ymd_opt(2023, 3, 2).unwrap().and_hms_opt(11, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_everything_invalid_is_insufficient_data() {
        let frame = df!(
            "transaction_id" => &["T1"],
            "quantity" => &[1i64],
            "transaction_date" => &["not a date"],
            "price" => &[1.0],
            "customer_id" => &["C1"],
            "transaction_amount" => &[1.0]
        )
        .unwrap();
        let result = clean_dataset(&snapshot(frame), &CleaningConfig::default());
        assert!(matches!(result, Err(AnalyticsError::InsufficientData(_))));
    }

    #[test]
    fn test_outlier_removal_is_opt_in() {
        let mut quantities = vec![1i64; 20];
        quantities.push(500);
        let n = quantities.len();
        let ids: Vec<String> = (0..n).map(|i| format!("T{}", i)).collect();
        let prices = vec![1.0; n];
        let amounts: Vec<f64> = quantities.iter().map(|q| *q as f64).collect();
        let frame = df!(
            "transaction_id" => ids,
            "quantity" => quantities,
            "transaction_date" => vec!["2023-01-01"; n],
            "price" => prices,
            "customer_id" => vec!["C1"; n],
            "transaction_amount" => amounts
        )
        .unwrap();
        let snap = snapshot(frame);

        let (kept, _) = clean_dataset(&snap, &CleaningConfig::default()).unwrap();
        assert_eq!(kept.len(), 21);

        let config = CleaningConfig {
            outlier_iqr_multiplier: Some(3.0),
            ..CleaningConfig::default()
        };
        let (trimmed, _) = clean_dataset(&snap, &config).unwrap();
        assert_eq!(trimmed.len(), 20);
    }

    #[test]
    fn test_parse_datetime_formats() {
        assert!(parse_datetime("2010-12-01T08:26:00Z").is_some());
        assert!(parse_datetime("2010-12-01 08:26:00").is_some());
        assert!(parse_datetime("12/1/2010 8:26").is_some());
        assert!(parse_datetime("2010-12-01").is_some());
        assert!(parse_datetime("yesterday").is_none());
    }
}
