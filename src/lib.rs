//! Salesforge: retail transaction analytics.
//!
//! A validated transaction table flows through a fixed twelve-stage pipeline
//! (cleaning, feature engineering, EDA, RFM scoring, K-Means segmentation,
//! lifetime value, KPIs, performance breakdowns, forecasting, report and
//! export preparation). Each stage publishes its artifact to a
//! [`ResultCache`] that read-only callers query while runs are in progress.

pub mod cache;
pub mod cleaning;
pub mod cli;
pub mod clv;
pub mod config;
pub mod data;
pub mod eda;
pub mod error;
pub mod features;
pub mod forecast;
pub mod kpi;
pub mod logging;
pub mod model;
pub mod performance;
pub mod pipeline;
pub mod report;
pub mod rfm;
pub mod segmentation;
pub mod stats;

// Re-export public items for easier access
pub use cache::{CacheEntry, ResultCache, StageArtifact};
pub use cli::Args;
pub use config::AnalyticsConfig;
pub use data::{load_dataset, DatasetSnapshot, ValidationReport};
pub use error::{AnalyticsError, Result};
pub use pipeline::{Orchestrator, PipelineService, PipelineState, PipelineStatus, StageId};
