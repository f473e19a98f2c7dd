//! Pipeline service tests over a synthetic year of trading

use polars::prelude::*;
use salesforge::{
    AnalyticsConfig, AnalyticsError, DatasetSnapshot, PipelineService, PipelineState, StageId,
};
use std::sync::Arc;

/// 1,000 lines from 50 customers spread over the twelve months of 2023.
fn year_dataset() -> Arc<DatasetSnapshot> {
    let n = 1_000;
    let categories = ["Home", "Toys", "Garden", "Kitchen"];
    let countries = ["United Kingdom", "France", "Germany"];

    let ids: Vec<String> = (0..n).map(|i| format!("T{:05}", i / 2)).collect();
    let customers: Vec<String> = (0..n).map(|i| format!("C{:03}", (i / 2) % 50)).collect();
    let dates: Vec<String> = (0..n)
        .map(|i| {
            let order = i / 2;
            format!(
                "2023-{:02}-{:02} {:02}:15:00",
                order % 12 + 1,
                order % 28 + 1,
                8 + order % 10
            )
        })
        .collect();
    let quantities: Vec<i64> = (0..n).map(|i| (i % 5 + 1) as i64).collect();
    let prices: Vec<f64> = (0..n).map(|i| 2.5 + ((i * 37) % 100) as f64 / 4.0).collect();
    let amounts: Vec<f64> = quantities
        .iter()
        .zip(&prices)
        .map(|(q, p)| *q as f64 * p)
        .collect();
    let product_types: Vec<&str> = (0..n).map(|i| categories[i % 4]).collect();
    let country: Vec<&str> = (0..n).map(|i| countries[(i / 2) % 50 % 3]).collect();

    let frame = df!(
        "transaction_id" => ids,
        "customer_id" => customers,
        "transaction_date" => dates,
        "quantity" => quantities,
        "price" => prices,
        "transaction_amount" => amounts,
        "product_type" => product_types,
        "country" => country,
    )
    .unwrap();
    DatasetSnapshot::new(frame, "year.csv").unwrap()
}

/// Enough customers to cluster, but only one month of history.
fn single_month_dataset() -> Arc<DatasetSnapshot> {
    let n = 60;
    let frame = df!(
        "transaction_id" => (0..n).map(|i| format!("M{}", i)).collect::<Vec<_>>(),
        "customer_id" => (0..n).map(|i| format!("C{:03}", i % 20)).collect::<Vec<_>>(),
        "transaction_date" => (0..n).map(|i| format!("2024-02-{:02} 11:00:00", i % 28 + 1)).collect::<Vec<_>>(),
        "quantity" => (0..n).map(|i| (i % 3 + 1) as i64).collect::<Vec<_>>(),
        "price" => (0..n).map(|i| 4.0 + (i % 11) as f64).collect::<Vec<_>>(),
        "transaction_amount" => (0..n).map(|i| (i % 3 + 1) as f64 * (4.0 + (i % 11) as f64)).collect::<Vec<_>>(),
    )
    .unwrap();
    DatasetSnapshot::new(frame, "february.csv").unwrap()
}

#[tokio::test]
async fn test_full_run_completes_all_stages() {
    let service = PipelineService::start(AnalyticsConfig::default());
    service.activate_dataset(year_dataset());

    let run_id = service.start_run().unwrap();
    let status = service.wait_for_run(run_id).await;

    assert_eq!(status.state, PipelineState::Completed, "error: {:?}", status.error);
    assert_eq!(status.progress, 100.0);
    assert_eq!(status.stages_completed, StageId::ALL.to_vec());
    assert!(status.end_time.unwrap() >= status.start_time.unwrap());

    let cache = service.cache();
    let cleaning = cache.cleaning_report().unwrap();
    assert_eq!(cleaning.final_rows, 1_000);
    assert_eq!(cleaning.records_removed, 0);

    // Revenue the generator put in, recomputed independently of the pipeline.
    let expected_revenue: f64 = (0..1_000usize)
        .map(|i| (i % 5 + 1) as f64 * (2.5 + ((i * 37) % 100) as f64 / 4.0))
        .sum();

    let kpis = cache.kpis().unwrap();
    let performance = cache.performance().unwrap();
    assert_eq!(kpis.revenue.total_transactions, 500);
    assert_eq!(kpis.customer.unique_customers, 50);
    assert_eq!(performance.monthly.len(), 12);

    let total = kpis.revenue.total_revenue;
    assert!((total - expected_revenue).abs() < 1e-6, "{} vs {}", total, expected_revenue);
    let monthly: f64 = performance.monthly.iter().map(|m| m.revenue).sum();
    let category: f64 = performance.by_category.iter().map(|c| c.revenue).sum();
    let country: f64 = performance.by_country.iter().map(|c| c.revenue).sum();
    assert!((expected_revenue - monthly).abs() < 1e-6);
    assert!((expected_revenue - category).abs() < 1e-6);
    assert!((expected_revenue - country).abs() < 1e-6);

    let rfm = cache.rfm().unwrap();
    assert_eq!(rfm.total_customers, 50);
    assert_eq!(rfm.records.len(), 50);
    let counted: usize = rfm.segment_summary.iter().map(|s| s.customer_count).sum();
    assert_eq!(counted, 50);
    for record in &rfm.records {
        assert!((1..=5).contains(&record.r_score));
        assert_eq!(record.frequency, 10);
    }
    let monetary: f64 = rfm.records.iter().map(|r| r.monetary).sum();
    assert!((monetary - expected_revenue).abs() < 1e-6);

    let segmentation = cache.segmentation().unwrap();
    assert!((2..=8).contains(&segmentation.n_clusters));
    assert!((-1.0..=1.0).contains(&segmentation.silhouette_score));
    assert_eq!(segmentation.assignments.len(), 50);
    let clustered: usize = segmentation.cluster_profiles.iter().map(|p| p.customer_count).sum();
    assert_eq!(clustered, 50);

    let clv = cache.clv().unwrap();
    assert_eq!(clv.records.len(), 50);

    let forecast = cache.forecast().unwrap();
    assert!(forecast.seasonal_analysis.available);
    assert_eq!(forecast.forecasts.linear_trend.forecast.len(), 6);
    assert_eq!(forecast.forecasts.moving_average.forecast.len(), 6);
    assert_eq!(forecast.forecasts.exponential_smoothing.forecast.len(), 6);

    let exports = cache.exports().unwrap();
    assert_eq!(exports.table("cleaned_data").unwrap().row_count, 1_000);
    assert_eq!(exports.table("rfm_analysis").unwrap().row_count, 50);
}

#[tokio::test]
async fn test_reruns_produce_identical_results() {
    let service = PipelineService::start(AnalyticsConfig::default());
    service.activate_dataset(year_dataset());

    let first = service.start_run().unwrap();
    service.wait_for_run(first).await;
    let cache = service.cache();
    let (rfm, segmentation, clv, kpis, forecast) = (
        cache.rfm().unwrap(),
        cache.segmentation().unwrap(),
        cache.clv().unwrap(),
        cache.kpis().unwrap(),
        cache.forecast().unwrap(),
    );

    let second = service.start_run().unwrap();
    let status = service.wait_for_run(second).await;
    assert_eq!(status.state, PipelineState::Completed);
    assert_eq!(cache.entry(StageId::Segmentation).unwrap().run_id, second);

    assert_eq!(*cache.rfm().unwrap(), *rfm);
    assert_eq!(*cache.segmentation().unwrap(), *segmentation);
    assert_eq!(*cache.clv().unwrap(), *clv);
    assert_eq!(*cache.kpis().unwrap(), *kpis);
    assert_eq!(*cache.forecast().unwrap(), *forecast);
}

#[tokio::test]
async fn test_second_start_while_running_is_rejected() {
    let service = PipelineService::start(AnalyticsConfig::default());
    service.activate_dataset(year_dataset());

    let run_id = service.start_run().unwrap();
    let before = service.status();
    assert_eq!(before.state, PipelineState::Running);

    let err = service.start_run().unwrap_err();
    assert!(matches!(err, AnalyticsError::AlreadyRunning));
    assert_eq!(service.status().run_id, run_id);

    let status = service.wait_for_run(run_id).await;
    assert_eq!(status.state, PipelineState::Completed);
}

#[tokio::test]
async fn test_start_without_dataset_fails() {
    let service = PipelineService::start(AnalyticsConfig::default());
    assert!(matches!(service.start_run(), Err(AnalyticsError::NoDataset)));
    assert_eq!(service.status().state, PipelineState::Idle);
    assert!(service.cache().kpis().is_none());
}

#[tokio::test]
async fn test_failed_stage_keeps_earlier_artifacts() {
    let service = PipelineService::start(AnalyticsConfig::default());
    service.activate_dataset(year_dataset());
    let good = service.start_run().unwrap();
    service.wait_for_run(good).await;

    service.activate_dataset(single_month_dataset());
    let bad = service.start_run().unwrap();
    let status = service.wait_for_run(bad).await;

    assert_eq!(status.state, PipelineState::Failed);
    assert_eq!(status.current_stage, Some(StageId::Forecasting));
    assert_eq!(status.stages_completed, StageId::ALL[..9].to_vec());
    let error = status.error.unwrap();
    assert!(error.starts_with("forecasting failed:"), "{}", error);

    // Stages before the failure advanced, the rest still hold the earlier run.
    let cache = service.cache();
    assert_eq!(cache.entry(StageId::PerformanceAnalysis).unwrap().run_id, bad);
    assert_eq!(cache.entry(StageId::Forecasting).unwrap().run_id, good);
    assert_eq!(cache.entry(StageId::Export).unwrap().run_id, good);

    // The service accepts the next run.
    service.activate_dataset(year_dataset());
    let retry = service.start_run().unwrap();
    assert_eq!(service.wait_for_run(retry).await.state, PipelineState::Completed);
}
