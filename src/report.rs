//! Report digest and export tables assembled from the stage results.
//!
//! Nothing here touches the filesystem; an external writer renders the
//! digest and the tables.

use crate::cleaning::CleanedTable;
use crate::clv::ClvAnalysis;
use crate::eda::EdaReport;
use crate::forecast::ForecastResult;
use crate::kpi::{KpiReport, KpiSummaryItem};
use crate::performance::PerformanceReport;
use crate::rfm::{RfmAnalysis, SegmentSummary};
use crate::segmentation::{ClusterProfile, SegmentationResult};
use crate::error::{AnalyticsError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use polars::prelude::*;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetOverview {
    pub file_name: String,
    pub total_records: usize,
    pub cleaned_records: usize,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastHeadline {
    pub method: &'static str,
    pub total_forecasted_revenue: f64,
}

/// Everything a rendered report needs, in presentation order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsReport {
    pub title: String,
    pub generated_at: DateTime<Utc>,
    pub dataset: DatasetOverview,
    pub kpi_highlights: Vec<KpiSummaryItem>,
    pub insights: Vec<String>,
    pub top_segments: Vec<SegmentSummary>,
    pub clusters: Vec<ClusterProfile>,
    pub silhouette_score: f64,
    pub total_predictive_clv: f64,
    pub at_risk_customers: usize,
    pub top_category: Option<String>,
    pub top_country: Option<String>,
    pub forecasts: Vec<ForecastHeadline>,
    pub seasonal_peak: Option<&'static str>,
}

/// Borrowed view over every artifact the report draws on
pub struct ReportInputs<'a> {
    pub file_name: &'a str,
    pub total_records: usize,
    pub cleaned: &'a CleanedTable,
    pub eda: &'a EdaReport,
    pub rfm: &'a RfmAnalysis,
    pub segmentation: &'a SegmentationResult,
    pub clv: &'a ClvAnalysis,
    pub kpis: &'a KpiReport,
    pub performance: &'a PerformanceReport,
    pub forecast: &'a ForecastResult,
}

pub fn build_report(inputs: &ReportInputs<'_>, title: &str, top_n: usize) -> AnalyticsReport {
    let forecasts = [
        &inputs.forecast.forecasts.linear_trend,
        &inputs.forecast.forecasts.moving_average,
        &inputs.forecast.forecasts.exponential_smoothing,
    ]
    .iter()
    .map(|f| ForecastHeadline {
        method: f.method,
        total_forecasted_revenue: f.total_forecasted_revenue,
    })
    .collect();

    let report = AnalyticsReport {
        title: title.to_string(),
        generated_at: Utc::now(),
        dataset: DatasetOverview {
            file_name: inputs.file_name.to_string(),
            total_records: inputs.total_records,
            cleaned_records: inputs.cleaned.len(),
            start_date: inputs.eda.basic_statistics.start_date,
            end_date: inputs.eda.basic_statistics.end_date,
        },
        kpi_highlights: inputs.kpis.summary.clone(),
        insights: inputs.eda.insights.clone(),
        top_segments: inputs.rfm.segment_summary.iter().take(top_n).cloned().collect(),
        clusters: inputs.segmentation.cluster_profiles.clone(),
        silhouette_score: inputs.segmentation.silhouette_score,
        total_predictive_clv: inputs.clv.summary.total_predictive_clv,
        at_risk_customers: inputs.clv.at_risk_count,
        top_category: inputs.performance.by_category.first().map(|c| c.name.clone()),
        top_country: inputs.performance.by_country.first().map(|c| c.name.clone()),
        forecasts,
        seasonal_peak: inputs.forecast.seasonal_analysis.peak_month,
    };
    info!(title = %report.title, insights = report.insights.len(), "report assembled");
    report
}

/// Rectangular table ready for a CSV/spreadsheet writer
#[derive(Debug, Clone, Serialize)]
pub struct ExportTable {
    pub name: &'static str,
    pub columns: Vec<String>,
    pub row_count: usize,
    #[serde(skip)]
    pub frame: DataFrame,
}

impl ExportTable {
    fn new(name: &'static str, frame: DataFrame) -> Self {
        Self {
            name,
            columns: frame
                .get_column_names()
                .iter()
                .map(|c| c.to_string())
                .collect(),
            row_count: frame.height(),
            frame,
        }
    }

    /// Render as CSV text; every text cell is quoted.
    pub fn to_csv_string(&self) -> Result<String> {
        let mut buffer = Vec::new();
        CsvWriter::new(&mut buffer)
            .include_header(true)
            .with_quote_style(QuoteStyle::NonNumeric)
            .finish(&mut self.frame.clone())?;
        String::from_utf8(buffer).map_err(|e| AnalyticsError::Computation(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportBundle {
    pub tables: Vec<ExportTable>,
}

impl ExportBundle {
    pub fn table(&self, name: &str) -> Option<&ExportTable> {
        self.tables.iter().find(|t| t.name == name)
    }
}

pub fn build_exports(
    cleaned: &CleanedTable,
    rfm: &RfmAnalysis,
    segmentation: &SegmentationResult,
    clv: &ClvAnalysis,
) -> Result<ExportBundle> {
    let lines = &cleaned.rows;
    let cleaned_data = ExportTable::new(
        "cleaned_data",
        df!(
            "transaction_id" => lines.iter().map(|t| t.transaction_id.as_str()).collect::<Vec<_>>(),
            "customer_id" => lines.iter().map(|t| t.customer_id.as_str()).collect::<Vec<_>>(),
            "transaction_date" => lines
                .iter()
                .map(|t| t.date.format("%Y-%m-%d %H:%M:%S").to_string())
                .collect::<Vec<_>>(),
            "quantity" => lines.iter().map(|t| t.quantity).collect::<Vec<_>>(),
            "price" => lines.iter().map(|t| t.price).collect::<Vec<_>>(),
            "transaction_amount" => lines.iter().map(|t| t.amount).collect::<Vec<_>>(),
            "product_type" => lines.iter().map(|t| t.product_type.as_str()).collect::<Vec<_>>(),
            "country" => lines.iter().map(|t| t.country.as_str()).collect::<Vec<_>>()
        )?,
    );

    let records = &rfm.records;
    let rfm_table = ExportTable::new(
        "rfm_analysis",
        df!(
            "customer_id" => records.iter().map(|r| r.customer_id.as_str()).collect::<Vec<_>>(),
            "recency" => records.iter().map(|r| r.recency).collect::<Vec<_>>(),
            "frequency" => records.iter().map(|r| r.frequency as i64).collect::<Vec<_>>(),
            "monetary" => records.iter().map(|r| r.monetary).collect::<Vec<_>>(),
            "r_score" => records.iter().map(|r| r.r_score as i32).collect::<Vec<_>>(),
            "f_score" => records.iter().map(|r| r.f_score as i32).collect::<Vec<_>>(),
            "m_score" => records.iter().map(|r| r.m_score as i32).collect::<Vec<_>>(),
            "rfm_score" => records.iter().map(|r| r.rfm_score.as_str()).collect::<Vec<_>>(),
            "segment" => records.iter().map(|r| r.segment.to_string()).collect::<Vec<_>>()
        )?,
    );

    let assignments = &segmentation.assignments;
    let segments = ExportTable::new(
        "customer_segments",
        df!(
            "customer_id" => assignments.iter().map(|a| a.customer_id.as_str()).collect::<Vec<_>>(),
            "cluster_id" => assignments.iter().map(|a| a.cluster_id as i64).collect::<Vec<_>>(),
            "label" => assignments.iter().map(|a| a.label.to_string()).collect::<Vec<_>>(),
            "distance_to_centroid" => assignments.iter().map(|a| a.distance_to_centroid).collect::<Vec<_>>()
        )?,
    );

    let values = &clv.records;
    let ltv = ExportTable::new(
        "customer_ltv",
        df!(
            "customer_id" => values.iter().map(|r| r.customer_id.as_str()).collect::<Vec<_>>(),
            "historical_value" => values.iter().map(|r| r.historical_value).collect::<Vec<_>>(),
            "order_count" => values.iter().map(|r| r.order_count as i64).collect::<Vec<_>>(),
            "avg_order_value" => values.iter().map(|r| r.avg_order_value).collect::<Vec<_>>(),
            "churn_probability" => values.iter().map(|r| r.churn_probability).collect::<Vec<_>>(),
            "predictive_clv" => values.iter().map(|r| r.predictive_clv).collect::<Vec<_>>(),
            "tier" => values.iter().map(|r| format!("{:?}", r.tier)).collect::<Vec<_>>()
        )?,
    );

    info!(
        cleaned = cleaned_data.row_count,
        rfm = rfm_table.row_count,
        segments = segments.row_count,
        ltv = ltv.row_count,
        "export tables prepared"
    );
    Ok(ExportBundle {
        tables: vec![cleaned_data, rfm_table, segments, ltv],
    })
}
