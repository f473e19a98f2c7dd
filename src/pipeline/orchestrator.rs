//! Sequential twelve-stage run over one dataset snapshot.

use crate::cache::{ResultCache, StageArtifact};
use crate::cleaning::{clean_dataset, CleanedTable};
use crate::clv::{analyze_clv, ClvAnalysis};
use crate::config::AnalyticsConfig;
use crate::data::{validate_dataset, DatasetSnapshot};
use crate::eda::{explore, EdaReport};
use crate::error::{AnalyticsError, Result};
use crate::features::{engineer_features, FeatureSet};
use crate::forecast::{forecast_sales, ForecastResult};
use crate::kpi::{generate_kpis, KpiReport};
use crate::performance::{analyze_performance, PerformanceReport};
use crate::pipeline::stage::StageId;
use crate::pipeline::status::{PipelineStatus, StatusTracker};
use crate::report::{build_exports, build_report, ReportInputs};
use crate::rfm::{analyze_rfm, RfmAnalysis};
use crate::segmentation::{segment_customers, SegmentationResult};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Intermediate products handed from one stage to the next within a run
#[derive(Default)]
struct RunContext {
    cleaned: Option<Arc<CleanedTable>>,
    features: Option<Arc<FeatureSet>>,
    eda: Option<Arc<EdaReport>>,
    rfm: Option<Arc<RfmAnalysis>>,
    segmentation: Option<Arc<SegmentationResult>>,
    clv: Option<Arc<ClvAnalysis>>,
    kpis: Option<Arc<KpiReport>>,
    performance: Option<Arc<PerformanceReport>>,
    forecast: Option<Arc<ForecastResult>>,
}

fn require<T>(slot: &Option<Arc<T>>, what: &str) -> Result<Arc<T>> {
    slot.clone()
        .ok_or_else(|| AnalyticsError::Computation(format!("{} is not available", what)))
}

/// Run a stage body, turning a panic inside it into a stage error.
fn guard_stage<T, F>(stage: StageId, body: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    panic::catch_unwind(AssertUnwindSafe(body)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(AnalyticsError::Computation(format!("{} panicked: {}", stage, message)))
    })
}

#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: Arc<AnalyticsConfig>,
    tracker: Arc<StatusTracker>,
    cache: Arc<ResultCache>,
}

impl Orchestrator {
    pub fn new(config: Arc<AnalyticsConfig>, tracker: Arc<StatusTracker>, cache: Arc<ResultCache>) -> Self {
        Self { config, tracker, cache }
    }

    pub fn tracker(&self) -> &Arc<StatusTracker> {
        &self.tracker
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Claim the run slot and execute on the calling thread.
    pub fn run_blocking(&self, dataset: &Arc<DatasetSnapshot>) -> Result<PipelineStatus> {
        let run_id = self.tracker.begin_run()?;
        Ok(self.execute(run_id, dataset))
    }

    /// Run every stage for an already claimed `run_id`.
    ///
    /// Stage errors end up in the returned status rather than in an `Err`.
    pub fn execute(&self, run_id: u64, dataset: &Arc<DatasetSnapshot>) -> PipelineStatus {
        let total = StageId::ALL.len();
        let run_start = Instant::now();
        let mut ctx = RunContext::default();
        info!(run_id, file = %dataset.file_name, rows = dataset.row_count(), "pipeline run started");

        for stage in StageId::ALL {
            self.tracker.stage_started(stage);
            let started = Instant::now();
            info!(run_id, stage = %stage, "stage started");

            match guard_stage(stage, || self.run_stage(stage, dataset, &mut ctx)) {
                Ok(artifact) => {
                    self.cache.publish(run_id, artifact);
                    self.tracker.stage_completed(stage, total);
                    info!(
                        run_id,
                        stage = %stage,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "stage completed"
                    );
                }
                Err(e) => {
                    error!(run_id, stage = %stage, kind = e.kind(), error = %e, "stage failed");
                    self.tracker.fail(format!("{} failed: {}", stage, e));
                    return self.tracker.snapshot();
                }
            }
        }

        self.tracker.complete();
        info!(
            run_id,
            elapsed_ms = run_start.elapsed().as_millis() as u64,
            "pipeline run completed"
        );
        self.tracker.snapshot()
    }

    fn run_stage(&self, stage: StageId, dataset: &DatasetSnapshot, ctx: &mut RunContext) -> Result<StageArtifact> {
        let config = &self.config;
        let artifact = match stage {
            StageId::Ingestion => {
                let report = validate_dataset(&dataset.frame, &dataset.file_name)?;
                StageArtifact::Ingestion(Arc::new(report))
            }
            StageId::Cleaning => {
                let (table, report) = clean_dataset(dataset, &config.cleaning)?;
                ctx.cleaned = Some(Arc::new(table));
                StageArtifact::Cleaning(Arc::new(report))
            }
            StageId::FeatureEngineering => {
                let features = engineer_features(require(&ctx.cleaned, "cleaned table")?)?;
                let report = features.report.clone();
                ctx.features = Some(Arc::new(features));
                StageArtifact::FeatureEngineering(Arc::new(report))
            }
            StageId::Eda => {
                let features = require(&ctx.features, "feature set")?;
                let eda = Arc::new(explore(&features, config.report.top_n));
                ctx.eda = Some(eda.clone());
                StageArtifact::Eda(eda)
            }
            StageId::RfmAnalysis => {
                let features = require(&ctx.features, "feature set")?;
                let rfm = Arc::new(analyze_rfm(&features, &config.rfm)?);
                ctx.rfm = Some(rfm.clone());
                StageArtifact::Rfm(rfm)
            }
            StageId::Segmentation => {
                let features = require(&ctx.features, "feature set")?;
                let segmentation = Arc::new(segment_customers(&features, &config.segmentation)?);
                ctx.segmentation = Some(segmentation.clone());
                StageArtifact::Segmentation(segmentation)
            }
            StageId::Clv => {
                let features = require(&ctx.features, "feature set")?;
                let clv = Arc::new(analyze_clv(&features, &config.clv)?);
                ctx.clv = Some(clv.clone());
                StageArtifact::Clv(clv)
            }
            StageId::KpiGeneration => {
                let features = require(&ctx.features, "feature set")?;
                let kpis = Arc::new(generate_kpis(&features, &config.kpi));
                ctx.kpis = Some(kpis.clone());
                StageArtifact::Kpi(kpis)
            }
            StageId::PerformanceAnalysis => {
                let features = require(&ctx.features, "feature set")?;
                let performance = Arc::new(analyze_performance(&features, config.report.top_n));
                ctx.performance = Some(performance.clone());
                StageArtifact::Performance(performance)
            }
            StageId::Forecasting => {
                let features = require(&ctx.features, "feature set")?;
                let forecast = Arc::new(forecast_sales(&features, &config.forecast)?);
                ctx.forecast = Some(forecast.clone());
                StageArtifact::Forecast(forecast)
            }
            StageId::ReportGeneration => {
                let cleaned = require(&ctx.cleaned, "cleaned table")?;
                let eda = require(&ctx.eda, "EDA report")?;
                let rfm = require(&ctx.rfm, "RFM analysis")?;
                let segmentation = require(&ctx.segmentation, "segmentation")?;
                let clv = require(&ctx.clv, "CLV analysis")?;
                let kpis = require(&ctx.kpis, "KPI report")?;
                let performance = require(&ctx.performance, "performance report")?;
                let forecast = require(&ctx.forecast, "forecast")?;
                let inputs = ReportInputs {
                    file_name: &dataset.file_name,
                    total_records: dataset.row_count(),
                    cleaned: &cleaned,
                    eda: &eda,
                    rfm: &rfm,
                    segmentation: &segmentation,
                    clv: &clv,
                    kpis: &kpis,
                    performance: &performance,
                    forecast: &forecast,
                };
                let report = build_report(&inputs, &config.report.title, config.report.top_n);
                StageArtifact::Report(Arc::new(report))
            }
            StageId::Export => {
                let cleaned = require(&ctx.cleaned, "cleaned table")?;
                let rfm = require(&ctx.rfm, "RFM analysis")?;
                let segmentation = require(&ctx.segmentation, "segmentation")?;
                let clv = require(&ctx.clv, "CLV analysis")?;
                StageArtifact::Export(Arc::new(build_exports(&cleaned, &rfm, &segmentation, &clv)?))
            }
        };
        Ok(artifact)
    }
}
