use thiserror::Error;

/// Every failure the analytics library can report.
///
/// `Schema`/`Format` are input problems the caller fixes by supplying another
/// dataset, `NoDataset`/`AlreadyRunning` are run-start preconditions, and
/// `InsufficientData`/`InsufficientHistory` mean a stage cannot produce a
/// meaningful result for the data it was given.
#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("dataset is missing required columns: {}", .missing.join(", "))]
    Schema { missing: Vec<String> },

    #[error("could not read '{file}' as tabular data: {reason}")]
    Format { file: String, reason: String },

    #[error("no active dataset; activate a validated dataset before starting a run")]
    NoDataset,

    #[error("a pipeline run is already in progress")]
    AlreadyRunning,

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("insufficient history: {periods} period(s) available, at least {required} required")]
    InsufficientHistory { periods: usize, required: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("computation failed: {0}")]
    Computation(String),

    #[error("tabular data error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl AnalyticsError {
    /// Stable machine-readable kind, used in status payloads and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalyticsError::Schema { .. } => "schema_error",
            AnalyticsError::Format { .. } => "format_error",
            AnalyticsError::NoDataset => "no_dataset_error",
            AnalyticsError::AlreadyRunning => "already_running_error",
            AnalyticsError::InsufficientData(_) => "insufficient_data_error",
            AnalyticsError::InsufficientHistory { .. } => "insufficient_history_error",
            AnalyticsError::Config(_) => "config_error",
            _ => "computation_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, AnalyticsError>;
