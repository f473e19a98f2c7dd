//! Recency / Frequency / Monetary scoring and rule-based segmentation.

use crate::config::RfmConfig;
use crate::error::{AnalyticsError, Result};
use crate::features::FeatureSet;
use crate::stats;
use chrono::{Days, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Segment {
    Champions,
    #[serde(rename = "Can't Lose Them")]
    CantLoseThem,
    #[serde(rename = "Loyal Customers")]
    LoyalCustomers,
    #[serde(rename = "Potential Loyalists")]
    PotentialLoyalists,
    #[serde(rename = "Recent Customers")]
    RecentCustomers,
    Promising,
    #[serde(rename = "Need Attention")]
    NeedAttention,
    #[serde(rename = "About to Sleep")]
    AboutToSleep,
    #[serde(rename = "At Risk")]
    AtRisk,
    Hibernating,
    Lost,
}

impl Segment {
    pub fn name(self) -> &'static str {
        match self {
            Segment::Champions => "Champions",
            Segment::CantLoseThem => "Can't Lose Them",
            Segment::LoyalCustomers => "Loyal Customers",
            Segment::PotentialLoyalists => "Potential Loyalists",
            Segment::RecentCustomers => "Recent Customers",
            Segment::Promising => "Promising",
            Segment::NeedAttention => "Need Attention",
            Segment::AboutToSleep => "About to Sleep",
            Segment::AtRisk => "At Risk",
            Segment::Hibernating => "Hibernating",
            Segment::Lost => "Lost",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Inclusive score interval
#[derive(Debug, Clone, Copy)]
struct Band {
    min: u8,
    max: u8,
}

impl Band {
    const fn any() -> Self {
        Band { min: 0, max: u8::MAX }
    }
    const fn at_least(min: u8) -> Self {
        Band { min, max: u8::MAX }
    }
    const fn at_most(max: u8) -> Self {
        Band { min: 0, max }
    }
    const fn between(min: u8, max: u8) -> Self {
        Band { min, max }
    }
    fn contains(self, score: u8) -> bool {
        (self.min..=self.max).contains(&score)
    }
}

struct SegmentRule {
    segment: Segment,
    recency: Band,
    frequency: Band,
    monetary: Band,
}

const fn rule(segment: Segment, recency: Band, frequency: Band, monetary: Band) -> SegmentRule {
    SegmentRule {
        segment,
        recency,
        frequency,
        monetary,
    }
}

/// Ordered rule table, first match wins.
const SEGMENT_RULES: [SegmentRule; 11] = [
    rule(Segment::Champions, Band::at_least(4), Band::at_least(4), Band::at_least(4)),
    rule(Segment::CantLoseThem, Band::at_most(2), Band::any(), Band::at_least(4)),
    rule(Segment::LoyalCustomers, Band::any(), Band::at_least(4), Band::at_least(3)),
    rule(Segment::PotentialLoyalists, Band::at_least(4), Band::between(2, 3), Band::any()),
    rule(Segment::RecentCustomers, Band::at_least(4), Band::at_most(1), Band::any()),
    rule(Segment::Promising, Band::at_least(3), Band::any(), Band::at_most(2)),
    rule(Segment::NeedAttention, Band::between(2, 3), Band::at_least(2), Band::at_least(2)),
    rule(Segment::AboutToSleep, Band::between(2, 2), Band::at_most(2), Band::any()),
    rule(Segment::AtRisk, Band::at_most(2), Band::at_least(3), Band::at_least(3)),
    rule(Segment::Hibernating, Band::at_most(1), Band::at_most(1), Band::any()),
    rule(Segment::Lost, Band::any(), Band::any(), Band::any()),
];

pub fn assign_segment(r: u8, f: u8, m: u8) -> Segment {
    SEGMENT_RULES
        .iter()
        .find(|rule| rule.recency.contains(r) && rule.frequency.contains(f) && rule.monetary.contains(m))
        .map(|rule| rule.segment)
        .unwrap_or(Segment::Lost)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RfmRecord {
    pub customer_id: String,
    pub recency: i64,
    pub frequency: usize,
    pub monetary: f64,
    pub r_score: u8,
    pub f_score: u8,
    pub m_score: u8,
    pub rfm_score: String,
    pub score_total: u16,
    pub segment: Segment,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentSummary {
    pub segment: Segment,
    pub customer_count: usize,
    pub avg_recency: f64,
    pub avg_frequency: f64,
    pub avg_monetary: f64,
    pub total_monetary: f64,
    pub customer_pct: f64,
    pub revenue_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricBrief {
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
}

impl MetricBrief {
    fn of(values: &[f64]) -> Self {
        Self {
            mean: stats::mean(values),
            median: stats::median(values),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub recency: MetricBrief,
    pub frequency: MetricBrief,
    pub monetary: MetricBrief,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RfmDistribution {
    pub r_score_distribution: BTreeMap<u8, usize>,
    pub f_score_distribution: BTreeMap<u8, usize>,
    pub m_score_distribution: BTreeMap<u8, usize>,
    pub segment_distribution: BTreeMap<Segment, usize>,
}

/// One cell of the recency × frequency grid
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RfmMatrixCell {
    pub r_score: u8,
    pub f_score: u8,
    pub customer_count: usize,
    pub total_monetary: f64,
    pub avg_monetary: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RfmAnalysis {
    pub total_customers: usize,
    pub reference_date: NaiveDate,
    pub metrics_summary: MetricsSummary,
    /// Sorted by total monetary, highest first
    pub segment_summary: Vec<SegmentSummary>,
    pub rfm_distribution: RfmDistribution,
    pub rfm_matrix: Vec<RfmMatrixCell>,
    pub records: Vec<RfmRecord>,
}

impl RfmAnalysis {
    pub fn record(&self, customer_id: &str) -> Option<&RfmRecord> {
        self.records.iter().find(|r| r.customer_id == customer_id)
    }
}

/// Bucket scores for "higher is better" values; ties broken by position.
fn ascending_scores(values: &[f64], quantiles: u8) -> Vec<u8> {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut scores = vec![1u8; n];
    for (rank, &index) in order.iter().enumerate() {
        scores[index] = (rank * quantiles as usize / n) as u8 + 1;
    }
    scores
}

/// Bucket scores for "lower is better" values; equal values share a score.
fn descending_scores(values: &[f64], quantiles: u8) -> Vec<u8> {
    let n = values.len();
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    values
        .iter()
        .map(|v| {
            let rank = sorted.partition_point(|s| s < v);
            quantiles - (rank * quantiles as usize / n) as u8
        })
        .collect()
}

pub fn analyze_rfm(features: &FeatureSet, config: &RfmConfig) -> Result<RfmAnalysis> {
    if features.customers.is_empty() {
        return Err(AnalyticsError::InsufficientData(
            "RFM analysis needs at least one customer".to_string(),
        ));
    }

    let day_after_last = features
        .last_date()
        .date()
        .checked_add_days(Days::new(1))
        .ok_or_else(|| AnalyticsError::Computation("analysis date out of range".to_string()))?;
    let reference_date = match config.analysis_date {
        Some(configured) if configured > day_after_last => configured,
        _ => day_after_last,
    };

    let recency: Vec<f64> = features
        .customers
        .iter()
        .map(|c| (reference_date - c.last_purchase.date()).num_days() as f64)
        .collect();
    let frequency: Vec<f64> = features.customers.iter().map(|c| c.total_transactions as f64).collect();
    let monetary: Vec<f64> = features.customers.iter().map(|c| c.total_spend).collect();

    let q = config.quantiles;
    let r_scores = descending_scores(&recency, q);
    let f_scores = ascending_scores(&frequency, q);
    let m_scores = ascending_scores(&monetary, q);

    let records: Vec<RfmRecord> = features
        .customers
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let (r, f, m) = (r_scores[i], f_scores[i], m_scores[i]);
            RfmRecord {
                customer_id: c.customer_id.clone(),
                recency: recency[i] as i64,
                frequency: c.total_transactions,
                monetary: c.total_spend,
                r_score: r,
                f_score: f,
                m_score: m,
                rfm_score: format!("{}{}{}", r, f, m),
                score_total: r as u16 + f as u16 + m as u16,
                segment: assign_segment(r, f, m),
            }
        })
        .collect();

    let analysis = RfmAnalysis {
        total_customers: records.len(),
        reference_date,
        metrics_summary: MetricsSummary {
            recency: MetricBrief::of(&recency),
            frequency: MetricBrief::of(&frequency),
            monetary: MetricBrief::of(&monetary),
        },
        segment_summary: summarize_segments(&records),
        rfm_distribution: distribution(&records),
        rfm_matrix: matrix(&records),
        records,
    };
    info!(
        customers = analysis.total_customers,
        segments = analysis.segment_summary.len(),
        reference_date = %analysis.reference_date,
        "RFM analysis complete"
    );
    Ok(analysis)
}

fn summarize_segments(records: &[RfmRecord]) -> Vec<SegmentSummary> {
    let total_customers = records.len() as f64;
    let total_revenue: f64 = records.iter().map(|r| r.monetary).sum();

    let mut groups: BTreeMap<Segment, Vec<&RfmRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.segment).or_default().push(record);
    }

    let mut summary: Vec<SegmentSummary> = groups
        .into_iter()
        .map(|(segment, members)| {
            let count = members.len() as f64;
            let total_monetary: f64 = members.iter().map(|r| r.monetary).sum();
            SegmentSummary {
                segment,
                customer_count: members.len(),
                avg_recency: members.iter().map(|r| r.recency as f64).sum::<f64>() / count,
                avg_frequency: members.iter().map(|r| r.frequency as f64).sum::<f64>() / count,
                avg_monetary: total_monetary / count,
                total_monetary,
                customer_pct: stats::percent(count, total_customers),
                revenue_pct: stats::percent(total_monetary, total_revenue),
            }
        })
        .collect();
    summary.sort_by(|a, b| b.total_monetary.total_cmp(&a.total_monetary));
    debug!(segments = summary.len(), "segment summary built");
    summary
}

fn distribution(records: &[RfmRecord]) -> RfmDistribution {
    let mut dist = RfmDistribution {
        r_score_distribution: BTreeMap::new(),
        f_score_distribution: BTreeMap::new(),
        m_score_distribution: BTreeMap::new(),
        segment_distribution: BTreeMap::new(),
    };
    for r in records {
        *dist.r_score_distribution.entry(r.r_score).or_default() += 1;
        *dist.f_score_distribution.entry(r.f_score).or_default() += 1;
        *dist.m_score_distribution.entry(r.m_score).or_default() += 1;
        *dist.segment_distribution.entry(r.segment).or_default() += 1;
    }
    dist
}

fn matrix(records: &[RfmRecord]) -> Vec<RfmMatrixCell> {
    let mut cells: BTreeMap<(u8, u8), (usize, f64)> = BTreeMap::new();
    for r in records {
        let cell = cells.entry((r.r_score, r.f_score)).or_default();
        cell.0 += 1;
        cell.1 += r.monetary;
    }
    cells
        .into_iter()
        .map(|((r_score, f_score), (count, total))| RfmMatrixCell {
            r_score,
            f_score,
            customer_count: count,
            total_monetary: total,
            avg_monetary: total / count as f64,
        })
        .collect()
}
