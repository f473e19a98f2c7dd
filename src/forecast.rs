//! Monthly revenue forecasting.
//!
//! Three independent methods run over the same contiguous monthly series:
//! an OLS linear trend, a trailing moving average and simple exponential
//! smoothing. Seasonal indices are reported once a full year is available.

use crate::config::ForecastConfig;
use crate::error::{AnalyticsError, Result};
use crate::features::{FeatureSet, YearMonth, MONTH_NAMES};
use crate::stats;
use chrono::NaiveDate;
use linfa::prelude::*;
use linfa_linear::LinearRegression;
use ndarray::{Array1, Array2};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyPoint {
    pub period: YearMonth,
    pub date: NaiveDate,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FittedPoint {
    pub date: NaiveDate,
    pub revenue: f64,
    /// Model value for this month; `None` where the method has no fit yet
    pub fitted: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodForecast {
    pub method: &'static str,
    pub parameters: BTreeMap<&'static str, f64>,
    pub historical: Vec<FittedPoint>,
    pub forecast: Vec<ForecastPoint>,
    pub total_forecasted_revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Forecasts {
    pub linear_trend: MethodForecast,
    pub moving_average: MethodForecast,
    pub exponential_smoothing: MethodForecast,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeasonalIndex {
    pub month: u32,
    pub month_name: &'static str,
    pub avg_revenue: f64,
    pub seasonal_index: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeasonalAnalysis {
    pub available: bool,
    pub reason: Option<String>,
    pub seasonal_indices: Vec<SeasonalIndex>,
    pub peak_month: Option<&'static str>,
    pub low_month: Option<&'static str>,
    /// Coefficient of variation of the indices
    pub seasonality_strength: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodTotal {
    pub method: &'static str,
    pub total_forecasted_revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastComparison {
    pub methods: Vec<MethodTotal>,
    pub min_forecast: f64,
    pub max_forecast: f64,
    pub avg_forecast: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastResult {
    pub history: Vec<MonthlyPoint>,
    pub horizon: usize,
    pub forecasts: Forecasts,
    pub seasonal_analysis: SeasonalAnalysis,
    pub comparison: ForecastComparison,
}

/// Monthly revenue from the first to the last observed month; empty months are 0.
pub fn monthly_series(features: &FeatureSet) -> Vec<MonthlyPoint> {
    let mut totals: BTreeMap<YearMonth, f64> = BTreeMap::new();
    for (tx, line) in features.table.rows.iter().zip(&features.lines) {
        *totals.entry(line.period).or_default() += tx.amount;
    }
    let (first, last) = match (totals.keys().next(), totals.keys().next_back()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return Vec::new(),
    };

    YearMonth::range(first, last)
        .into_iter()
        .filter_map(|period| {
            Some(MonthlyPoint {
                period,
                date: period.first_day()?,
                revenue: totals.get(&period).copied().unwrap_or(0.0),
            })
        })
        .collect()
}

pub fn forecast_sales(features: &FeatureSet, config: &ForecastConfig) -> Result<ForecastResult> {
    let history = monthly_series(features);
    if history.len() < config.min_history {
        return Err(AnalyticsError::InsufficientHistory {
            periods: history.len(),
            required: config.min_history,
        });
    }

    let last_period = history[history.len() - 1].period;
    let future_dates = future_dates(last_period, config.horizon);

    let forecasts = Forecasts {
        linear_trend: linear_trend(&history, &future_dates)?,
        moving_average: moving_average(&history, &future_dates, config.moving_average_window),
        exponential_smoothing: exponential_smoothing(&history, &future_dates, config.smoothing_alpha),
    };
    let seasonal_analysis = seasonal_analysis(&history, config.seasonal_min_periods);
    let comparison = compare(&forecasts);

    info!(
        periods = history.len(),
        horizon = config.horizon,
        linear = forecasts.linear_trend.total_forecasted_revenue,
        seasonal = seasonal_analysis.available,
        "forecast complete"
    );

    Ok(ForecastResult {
        history,
        horizon: config.horizon,
        forecasts,
        seasonal_analysis,
        comparison,
    })
}

fn future_dates(last: YearMonth, horizon: usize) -> Vec<NaiveDate> {
    let mut dates = Vec::with_capacity(horizon);
    let mut period = last;
    for _ in 0..horizon {
        period = period.next();
        if let Some(date) = period.first_day() {
            dates.push(date);
        }
    }
    dates
}

fn method_forecast(
    method: &'static str,
    parameters: BTreeMap<&'static str, f64>,
    history: &[MonthlyPoint],
    fitted: Vec<Option<f64>>,
    future_dates: &[NaiveDate],
    values: impl Fn(usize) -> f64,
) -> MethodForecast {
    let forecast: Vec<ForecastPoint> = future_dates
        .iter()
        .enumerate()
        .map(|(h, date)| ForecastPoint {
            date: *date,
            revenue: values(h),
        })
        .collect();
    MethodForecast {
        method,
        parameters,
        historical: history
            .iter()
            .zip(fitted)
            .map(|(point, fitted)| FittedPoint {
                date: point.date,
                revenue: point.revenue,
                fitted,
            })
            .collect(),
        total_forecasted_revenue: forecast.iter().map(|p| p.revenue).sum(),
        forecast,
    }
}

fn linear_trend(history: &[MonthlyPoint], future_dates: &[NaiveDate]) -> Result<MethodForecast> {
    let n = history.len();
    let x = Array2::from_shape_vec((n, 1), (0..n).map(|i| i as f64).collect())?;
    let y: Array1<f64> = history.iter().map(|p| p.revenue).collect();

    let model = LinearRegression::new()
        .fit(&Dataset::new(x, y.clone()))
        .map_err(|e| AnalyticsError::Computation(format!("linear trend fit failed: {}", e)))?;
    let slope = model.params()[0];
    let intercept = model.intercept();
    let predict = |i: f64| slope * i + intercept;

    let fitted: Vec<f64> = (0..n).map(|i| predict(i as f64)).collect();
    let mean = stats::mean(y.as_slice().unwrap_or(&[]));
    let ss_tot: f64 = y.iter().map(|v| (v - mean).powi(2)).sum();
    let ss_res: f64 = y.iter().zip(&fitted).map(|(v, f)| (v - f).powi(2)).sum();
    let r_squared = if ss_tot <= f64::EPSILON {
        1.0
    } else {
        (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
    };
    debug!(slope, intercept, r_squared, "linear trend fitted");

    let parameters = BTreeMap::from([("slope", slope), ("intercept", intercept), ("r_squared", r_squared)]);
    Ok(method_forecast(
        "Linear Trend",
        parameters,
        history,
        fitted.into_iter().map(Some).collect(),
        future_dates,
        |h| predict((n + h) as f64).max(0.0),
    ))
}

fn moving_average(history: &[MonthlyPoint], future_dates: &[NaiveDate], window: usize) -> MethodForecast {
    let values: Vec<f64> = history.iter().map(|p| p.revenue).collect();
    let fitted = (0..values.len())
        .map(|i| (i + 1 >= window).then(|| stats::mean(&values[i + 1 - window..=i])))
        .collect();
    let tail = &values[values.len().saturating_sub(window)..];
    let level = stats::mean(tail);

    method_forecast(
        "Moving Average",
        BTreeMap::from([("window", window as f64)]),
        history,
        fitted,
        future_dates,
        |_| level,
    )
}

fn exponential_smoothing(history: &[MonthlyPoint], future_dates: &[NaiveDate], alpha: f64) -> MethodForecast {
    let mut smoothed: Vec<f64> = Vec::with_capacity(history.len());
    for point in history {
        let next = match smoothed.last() {
            Some(previous) => alpha * point.revenue + (1.0 - alpha) * previous,
            None => point.revenue,
        };
        smoothed.push(next);
    }
    let level = smoothed.last().copied().unwrap_or(0.0);

    method_forecast(
        "Exponential Smoothing",
        BTreeMap::from([("alpha", alpha)]),
        history,
        smoothed.into_iter().map(Some).collect(),
        future_dates,
        |_| level,
    )
}

fn seasonal_analysis(history: &[MonthlyPoint], min_periods: usize) -> SeasonalAnalysis {
    if history.len() < min_periods {
        return SeasonalAnalysis {
            available: false,
            reason: Some(format!(
                "seasonal analysis needs at least {} periods, found {}",
                min_periods,
                history.len()
            )),
            seasonal_indices: Vec::new(),
            peak_month: None,
            low_month: None,
            seasonality_strength: None,
        };
    }

    let mut by_month: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    for point in history {
        by_month.entry(point.period.month).or_default().push(point.revenue);
    }
    let averages: Vec<(u32, f64)> = by_month
        .into_iter()
        .map(|(month, values)| (month, stats::mean(&values)))
        .collect();
    let overall = stats::mean(&averages.iter().map(|(_, avg)| *avg).collect::<Vec<_>>());

    let seasonal_indices: Vec<SeasonalIndex> = averages
        .into_iter()
        .map(|(month, avg_revenue)| SeasonalIndex {
            month,
            month_name: MONTH_NAMES[(month - 1) as usize],
            avg_revenue,
            seasonal_index: if overall > 0.0 { avg_revenue / overall } else { 1.0 },
        })
        .collect();

    let indices: Vec<f64> = seasonal_indices.iter().map(|s| s.seasonal_index).collect();
    let peak = seasonal_indices
        .iter()
        .max_by(|a, b| a.seasonal_index.total_cmp(&b.seasonal_index));
    let low = seasonal_indices
        .iter()
        .min_by(|a, b| a.seasonal_index.total_cmp(&b.seasonal_index));
    let index_mean = stats::mean(&indices);

    SeasonalAnalysis {
        available: true,
        reason: None,
        peak_month: peak.map(|s| s.month_name),
        low_month: low.map(|s| s.month_name),
        seasonality_strength: Some(if index_mean > 0.0 {
            stats::sample_std(&indices) / index_mean
        } else {
            0.0
        }),
        seasonal_indices,
    }
}

fn compare(forecasts: &Forecasts) -> ForecastComparison {
    let methods: Vec<MethodTotal> = [
        &forecasts.linear_trend,
        &forecasts.moving_average,
        &forecasts.exponential_smoothing,
    ]
    .iter()
    .map(|f| MethodTotal {
        method: f.method,
        total_forecasted_revenue: f.total_forecasted_revenue,
    })
    .collect();
    let totals: Vec<f64> = methods.iter().map(|m| m.total_forecasted_revenue).collect();

    ForecastComparison {
        min_forecast: totals.iter().copied().fold(f64::INFINITY, f64::min),
        max_forecast: totals.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        avg_forecast: stats::mean(&totals),
        methods,
    }
}
