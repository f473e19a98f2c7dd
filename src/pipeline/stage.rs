use serde::Serialize;
use std::fmt;

/// The twelve pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Ingestion,
    Cleaning,
    FeatureEngineering,
    Eda,
    RfmAnalysis,
    Segmentation,
    Clv,
    KpiGeneration,
    PerformanceAnalysis,
    Forecasting,
    ReportGeneration,
    Export,
}

impl StageId {
    pub const ALL: [StageId; 12] = [
        StageId::Ingestion,
        StageId::Cleaning,
        StageId::FeatureEngineering,
        StageId::Eda,
        StageId::RfmAnalysis,
        StageId::Segmentation,
        StageId::Clv,
        StageId::KpiGeneration,
        StageId::PerformanceAnalysis,
        StageId::Forecasting,
        StageId::ReportGeneration,
        StageId::Export,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StageId::Ingestion => "ingestion",
            StageId::Cleaning => "cleaning",
            StageId::FeatureEngineering => "feature_engineering",
            StageId::Eda => "eda",
            StageId::RfmAnalysis => "rfm_analysis",
            StageId::Segmentation => "segmentation",
            StageId::Clv => "clv",
            StageId::KpiGeneration => "kpi_generation",
            StageId::PerformanceAnalysis => "performance_analysis",
            StageId::Forecasting => "forecasting",
            StageId::ReportGeneration => "report_generation",
            StageId::Export => "export",
        }
    }

    /// Position in [`StageId::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
