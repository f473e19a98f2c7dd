//! Dataset loading and schema validation using Polars

use crate::error::{AnalyticsError, Result};
use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Columns every dataset must carry.
pub const REQUIRED_COLUMNS: [&str; 6] = [
    "transaction_id",
    "quantity",
    "transaction_date",
    "price",
    "customer_id",
    "transaction_amount",
];

/// Columns used when present; stages fall back to defaults otherwise.
pub const OPTIONAL_COLUMNS: [&str; 4] = [
    "product_type",
    "country",
    "transaction_item_code",
    "transaction_item_description",
];

/// Outcome of checking a raw table against the column contract
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub file_name: String,
    pub is_valid: bool,
    pub total_records: usize,
    pub total_columns: usize,
    pub columns_found: Vec<String>,
    pub optional_columns_present: Vec<String>,
    pub null_counts: BTreeMap<String, usize>,
    pub duplicate_rows: usize,
}

/// Immutable raw table as it was activated
#[derive(Debug, Clone)]
pub struct DatasetSnapshot {
    /// Raw Polars frame, never modified after construction
    pub frame: DataFrame,
    pub file_name: String,
    pub loaded_at: DateTime<Utc>,
    pub validation: ValidationReport,
}

impl DatasetSnapshot {
    /// Validate `frame` and wrap it; fails with a schema error when required columns are absent.
    pub fn new(frame: DataFrame, file_name: impl Into<String>) -> Result<Arc<Self>> {
        let file_name = file_name.into();
        let validation = validate_dataset(&frame, &file_name)?;
        Ok(Arc::new(Self {
            frame,
            file_name,
            loaded_at: Utc::now(),
            validation,
        }))
    }

    pub fn row_count(&self) -> usize {
        self.frame.height()
    }

    pub fn column_count(&self) -> usize {
        self.frame.width()
    }

    pub fn column_names(&self) -> Vec<String> {
        column_names(&self.frame)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_names().iter().any(|c| c == name)
    }
}

/// Load a dataset file into a raw frame.
///
/// Only CSV is understood here; anything else is a format error.
pub fn load_dataset(path: impl AsRef<Path>) -> Result<DataFrame> {
    let path = path.as_ref();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if extension != "csv" {
        return Err(AnalyticsError::Format {
            file: file_name,
            reason: format!("unsupported file format '.{}'", extension),
        });
    }

    info!(file = %file_name, "loading dataset");
    let frame = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .and_then(|reader| reader.finish())
        .map_err(|e| AnalyticsError::Format {
            file: file_name.clone(),
            reason: e.to_string(),
        })?;

    ensure_tabular(frame, &file_name)
}

fn ensure_tabular(frame: DataFrame, file_name: &str) -> Result<DataFrame> {
    if frame.width() == 0 {
        return Err(AnalyticsError::Format {
            file: file_name.to_string(),
            reason: "no columns found".to_string(),
        });
    }
    debug!(rows = frame.height(), columns = frame.width(), "parsed table");
    Ok(frame)
}

/// Check `frame` against the required-column contract.
///
/// Pure: the frame is only read. Every missing column is reported at once.
pub fn validate_dataset(frame: &DataFrame, file_name: &str) -> Result<ValidationReport> {
    let columns_found = column_names(frame);

    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|required| !columns_found.iter().any(|c| c == *required))
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(AnalyticsError::Schema { missing });
    }

    let optional_columns_present = OPTIONAL_COLUMNS
        .iter()
        .filter(|optional| columns_found.iter().any(|c| c == *optional))
        .map(|c| c.to_string())
        .collect();

    let null_counts = frame
        .get_columns()
        .iter()
        .map(|series| (series.name().to_string(), series.null_count()))
        .collect();

    let duplicate_rows = count_duplicate_rows(frame)?;

    let report = ValidationReport {
        file_name: file_name.to_string(),
        is_valid: true,
        total_records: frame.height(),
        total_columns: frame.width(),
        columns_found,
        optional_columns_present,
        null_counts,
        duplicate_rows,
    };
    info!(
        file = %file_name,
        records = report.total_records,
        columns = report.total_columns,
        "schema validation passed"
    );
    Ok(report)
}

/// Rows beyond the first occurrence of an identical row; null cells compare equal.
fn count_duplicate_rows(frame: &DataFrame) -> Result<usize> {
    let unique = frame.unique_stable(None, UniqueKeepStrategy::First, None)?;
    Ok(frame.height() - unique.height())
}

fn column_names(frame: &DataFrame) -> Vec<String> {
    frame
        .get_column_names()
        .iter()
        .map(|c| c.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    fn sample_frame() -> DataFrame {
        df!(
            "transaction_id" => &["T1", "T1", "T2"],
            "quantity" => &[2i64, 2, 1],
            "transaction_date" => &["2023-01-05", "2023-01-05", "2023-02-10"],
            "price" => &[5.0, 5.0, 12.5],
            "customer_id" => &["C1", "C1", "C2"],
            "transaction_amount" => &[10.0, 10.0, 12.5],
            "country" => &["france", "france", "Spain"]
        )
        .unwrap()
    }

    #[test]
    fn test_validate_reports_shape_and_duplicates() {
        let report = validate_dataset(&sample_frame(), "sales.csv").unwrap();
        assert!(report.is_valid);
        assert_eq!(report.total_records, 3);
        assert_eq!(report.total_columns, 7);
        assert_eq!(report.duplicate_rows, 1);
        assert_eq!(report.optional_columns_present, vec!["country".to_string()]);
    }

    #[test]
    fn test_missing_columns_is_schema_error() {
        let frame = sample_frame().drop("price").unwrap().drop("customer_id").unwrap();
        match validate_dataset(&frame, "sales.csv") {
            Err(AnalyticsError::Schema { missing }) => {
                assert_eq!(missing, vec!["price".to_string(), "customer_id".to_string()]);
            }
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_extension_is_format_error() {
        let result = load_dataset("sales.parquet");
        assert!(matches!(result, Err(AnalyticsError::Format { .. })));
    }

    #[test]
    fn test_load_csv_file() {
        let mut file = Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "transaction_id,quantity,transaction_date,price,customer_id,transaction_amount").unwrap();
        writeln!(file, "536365,6,2010-12-01 08:26:00,2.55,17850,15.30").unwrap();
        writeln!(file, "536366,6,2010-12-01 08:28:00,1.85,17850,11.10").unwrap();

        let frame = load_dataset(file.path()).unwrap();
        assert_eq!(frame.height(), 2);

        let snapshot = DatasetSnapshot::new(frame, "upload.csv").unwrap();
        assert_eq!(snapshot.row_count(), 2);
        assert!(snapshot.has_column("transaction_amount"));
    }

    #[test]
    fn test_duplicate_rows_treat_nulls_as_equal() {
        let frame = df!(
            "transaction_id" => &["T1", "T1", "T1"],
            "quantity" => &[2i64, 2, 2],
            "transaction_date" => &["2023-01-05", "2023-01-05", "2023-01-05"],
            "price" => &[5.0, 5.0, 5.0],
            "customer_id" => &[None, None, Some("C1")],
            "transaction_amount" => &[10.0, 10.0, 10.0]
        )
        .unwrap();
        let report = validate_dataset(&frame, "sales.csv").unwrap();
        assert_eq!(report.duplicate_rows, 1);
        assert_eq!(report.null_counts["customer_id"], 2);
    }
}
