//! Latest artifact per stage, shared read-only with query callers.

use crate::cleaning::CleaningReport;
use crate::clv::ClvAnalysis;
use crate::data::ValidationReport;
use crate::eda::EdaReport;
use crate::error::Result;
use crate::features::FeatureReport;
use crate::forecast::ForecastResult;
use crate::kpi::KpiReport;
use crate::performance::PerformanceReport;
use crate::pipeline::StageId;
use crate::report::{AnalyticsReport, ExportBundle};
use crate::rfm::RfmAnalysis;
use crate::segmentation::SegmentationResult;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// What a stage leaves behind once it completes
#[derive(Debug, Clone)]
pub enum StageArtifact {
    Ingestion(Arc<ValidationReport>),
    Cleaning(Arc<CleaningReport>),
    FeatureEngineering(Arc<FeatureReport>),
    Eda(Arc<EdaReport>),
    Rfm(Arc<RfmAnalysis>),
    Segmentation(Arc<SegmentationResult>),
    Clv(Arc<ClvAnalysis>),
    Kpi(Arc<KpiReport>),
    Performance(Arc<PerformanceReport>),
    Forecast(Arc<ForecastResult>),
    Report(Arc<AnalyticsReport>),
    Export(Arc<ExportBundle>),
}

impl StageArtifact {
    pub fn stage(&self) -> StageId {
        match self {
            StageArtifact::Ingestion(_) => StageId::Ingestion,
            StageArtifact::Cleaning(_) => StageId::Cleaning,
            StageArtifact::FeatureEngineering(_) => StageId::FeatureEngineering,
            StageArtifact::Eda(_) => StageId::Eda,
            StageArtifact::Rfm(_) => StageId::RfmAnalysis,
            StageArtifact::Segmentation(_) => StageId::Segmentation,
            StageArtifact::Clv(_) => StageId::Clv,
            StageArtifact::Kpi(_) => StageId::KpiGeneration,
            StageArtifact::Performance(_) => StageId::PerformanceAnalysis,
            StageArtifact::Forecast(_) => StageId::Forecasting,
            StageArtifact::Report(_) => StageId::ReportGeneration,
            StageArtifact::Export(_) => StageId::Export,
        }
    }

    pub fn to_json(&self) -> Result<Value> {
        let value = match self {
            StageArtifact::Ingestion(a) => serde_json::to_value(a.as_ref())?,
            StageArtifact::Cleaning(a) => serde_json::to_value(a.as_ref())?,
            StageArtifact::FeatureEngineering(a) => serde_json::to_value(a.as_ref())?,
            StageArtifact::Eda(a) => serde_json::to_value(a.as_ref())?,
            StageArtifact::Rfm(a) => serde_json::to_value(a.as_ref())?,
            StageArtifact::Segmentation(a) => serde_json::to_value(a.as_ref())?,
            StageArtifact::Clv(a) => serde_json::to_value(a.as_ref())?,
            StageArtifact::Kpi(a) => serde_json::to_value(a.as_ref())?,
            StageArtifact::Performance(a) => serde_json::to_value(a.as_ref())?,
            StageArtifact::Forecast(a) => serde_json::to_value(a.as_ref())?,
            StageArtifact::Report(a) => serde_json::to_value(a.as_ref())?,
            StageArtifact::Export(a) => serde_json::to_value(a.as_ref())?,
        };
        Ok(value)
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub artifact: StageArtifact,
    pub generated_at: DateTime<Utc>,
    pub run_id: u64,
}

/// One slot per stage; a slot is replaced as a whole when its stage completes.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: RwLock<HashMap<StageId, CacheEntry>>,
}

macro_rules! artifact_getter {
    ($(#[$doc:meta])* $name:ident, $stage:expr, $variant:ident, $ty:ty) => {
        $(#[$doc])*
        pub fn $name(&self) -> Option<Arc<$ty>> {
            match self.entry($stage)?.artifact {
                StageArtifact::$variant(artifact) => Some(artifact),
                _ => None,
            }
        }
    };
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, run_id: u64, artifact: StageArtifact) {
        let stage = artifact.stage();
        let entry = CacheEntry {
            artifact,
            generated_at: Utc::now(),
            run_id,
        };
        // A poisoned lock still holds whole entries; swaps never leave one half-written.
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(stage, entry);
        debug!(stage = %stage, run_id, "artifact published");
    }

    pub fn entry(&self, stage: StageId) -> Option<CacheEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(&stage).cloned()
    }

    pub fn is_available(&self, stage: StageId) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.contains_key(&stage)
    }

    artifact_getter!(validation, StageId::Ingestion, Ingestion, ValidationReport);
    artifact_getter!(cleaning_report, StageId::Cleaning, Cleaning, CleaningReport);
    artifact_getter!(feature_report, StageId::FeatureEngineering, FeatureEngineering, FeatureReport);
    artifact_getter!(eda, StageId::Eda, Eda, EdaReport);
    artifact_getter!(rfm, StageId::RfmAnalysis, Rfm, RfmAnalysis);
    artifact_getter!(segmentation, StageId::Segmentation, Segmentation, SegmentationResult);
    artifact_getter!(clv, StageId::Clv, Clv, ClvAnalysis);
    artifact_getter!(kpis, StageId::KpiGeneration, Kpi, KpiReport);
    artifact_getter!(performance, StageId::PerformanceAnalysis, Performance, PerformanceReport);
    artifact_getter!(forecast, StageId::Forecasting, Forecast, ForecastResult);
    artifact_getter!(
        /// Report digest from the most recent completed report stage.
        report,
        StageId::ReportGeneration,
        Report,
        AnalyticsReport
    );
    artifact_getter!(exports, StageId::Export, Export, ExportBundle);

    /// JSON object keyed by stage name holding every available artifact.
    pub fn snapshot_json(&self) -> Result<Value> {
        let entries: Vec<(StageId, CacheEntry)> = {
            let guard = self.entries.read().unwrap_or_else(|e| e.into_inner());
            StageId::ALL
                .iter()
                .filter_map(|stage| guard.get(stage).map(|e| (*stage, e.clone())))
                .collect()
        };

        let mut out = Map::new();
        for (stage, entry) in entries {
            let mut wrapped = Map::new();
            wrapped.insert("run_id".to_string(), Value::from(entry.run_id));
            wrapped.insert(
                "generated_at".to_string(),
                Value::String(entry.generated_at.to_rfc3339()),
            );
            wrapped.insert("result".to_string(), entry.artifact.to_json()?);
            out.insert(stage.name().to_string(), Value::Object(wrapped));
        }
        Ok(Value::Object(out))
    }
}
