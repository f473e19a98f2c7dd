//! Integration tests for Salesforge

use salesforge::cache::ResultCache;
use salesforge::pipeline::StatusTracker;
use salesforge::{
    load_dataset, AnalyticsConfig, AnalyticsError, DatasetSnapshot, Orchestrator, PipelineState,
    StageId,
};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

const HEADER: &str = "transaction_id,customer_id,transaction_date,quantity,price,transaction_amount,product_type,country";

/// Create a CSV with 20 customers trading over four months, plus a
/// duplicated line and a cancellation for the cleaner to remove.
fn create_test_csv() -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    writeln!(file, "{}", HEADER).unwrap();

    let categories = ["Home", "Toys", "Garden"];
    let mut id = 1000;
    for customer in 0..20 {
        let visits = customer % 4 + 1;
        for visit in 0..visits {
            id += 1;
            let month = (customer + visit) % 4 + 1;
            let quantity = (customer * 3 + visit) % 7 + 1;
            let price = 2.5 + customer as f64;
            writeln!(
                file,
                "INV{},{},2023-0{}-{:02} 10:30:00,{},{},{},{},{}",
                id,
                17000 + customer,
                month,
                visit * 5 + 3,
                quantity,
                price,
                quantity as f64 * price,
                categories[customer % 3],
                if customer % 5 == 0 { "france" } else { "United Kingdom" }
            )
            .unwrap();
        }
    }
    // Exact duplicate of the last line
    writeln!(
        file,
        "INV{},17019,2023-04-18 10:30:00,3,21.5,64.5,Home,United Kingdom",
        id + 1
    )
    .unwrap();
    writeln!(
        file,
        "INV{},17019,2023-04-18 10:30:00,3,21.5,64.5,Home,United Kingdom",
        id + 1
    )
    .unwrap();
    writeln!(file, "CINV9,17001,2023-02-10 09:00:00,-2,3.5,-7.0,Home,United Kingdom").unwrap();

    file
}

fn orchestrator() -> Orchestrator {
    Orchestrator::new(
        Arc::new(AnalyticsConfig::default()),
        Arc::new(StatusTracker::new()),
        Arc::new(ResultCache::new()),
    )
}

#[test]
fn test_end_to_end_pipeline() {
    let test_file = create_test_csv();
    let frame = load_dataset(test_file.path()).unwrap();
    let dataset = DatasetSnapshot::new(frame, "sales.csv").unwrap();
    assert_eq!(dataset.validation.duplicate_rows, 1);
    assert!(dataset.has_column("country"));

    let orchestrator = orchestrator();
    let status = orchestrator.run_blocking(&dataset).unwrap();
    assert_eq!(status.state, PipelineState::Completed, "error: {:?}", status.error);
    assert_eq!(status.stages_completed, StageId::ALL.to_vec());
    assert_eq!(status.progress, 100.0);
    assert_eq!(status.current_stage, None);

    let cache = orchestrator.cache();
    let cleaning = cache.cleaning_report().unwrap();
    assert_eq!(cleaning.records_removed, 2);

    let rfm = cache.rfm().unwrap();
    assert_eq!(rfm.total_customers, 20);
    let pct: f64 = rfm.segment_summary.iter().map(|s| s.customer_pct).sum();
    assert!((pct - 100.0).abs() < 1e-6);

    let segmentation = cache.segmentation().unwrap();
    assert!((2..=8).contains(&segmentation.n_clusters));
    let clustered: usize = segmentation.cluster_profiles.iter().map(|p| p.customer_count).sum();
    assert_eq!(clustered, 20);

    let kpis = cache.kpis().unwrap();
    let performance = cache.performance().unwrap();
    let monthly: f64 = performance.monthly.iter().map(|m| m.revenue).sum();
    assert!((kpis.revenue.total_revenue - monthly).abs() < 1e-6);
    assert_eq!(kpis.geographic.top_country.as_deref(), Some("United Kingdom"));
    assert!(performance.by_country.iter().any(|c| c.name == "France"));

    let forecast = cache.forecast().unwrap();
    assert_eq!(forecast.history.len(), 4);
    assert!(!forecast.seasonal_analysis.available);

    let exports = cache.exports().unwrap();
    assert_eq!(exports.table("customer_ltv").unwrap().row_count, 20);
    let csv = exports.table("customer_ltv").unwrap().to_csv_string().unwrap();
    assert_eq!(csv.lines().count(), 21);
    let report = cache.report().unwrap();
    assert_eq!(report.dataset.cleaned_records, cleaning.final_rows);

    let json = cache.snapshot_json().unwrap();
    for stage in StageId::ALL {
        assert!(json.get(stage.name()).is_some(), "missing {}", stage);
    }
}

#[test]
fn test_missing_columns_are_listed() {
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    writeln!(file, "transaction_id,customer_id,quantity").unwrap();
    writeln!(file, "T1,C1,2").unwrap();

    let frame = load_dataset(file.path()).unwrap();
    match DatasetSnapshot::new(frame, "partial.csv") {
        Err(AnalyticsError::Schema { missing }) => {
            assert_eq!(missing, vec!["transaction_date", "price", "transaction_amount"]);
        }
        other => panic!("expected schema error, got {:?}", other.map(|d| d.row_count())),
    }
}

#[test]
fn test_unsupported_extension_is_format_error() {
    let file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    let err = load_dataset(file.path()).unwrap_err();
    assert_eq!(err.kind(), "format_error");
}

#[test]
fn test_rerun_after_completion_reuses_slot() {
    let test_file = create_test_csv();
    let dataset = DatasetSnapshot::new(load_dataset(test_file.path()).unwrap(), "sales.csv").unwrap();

    let orchestrator = orchestrator();
    let first = orchestrator.run_blocking(&dataset).unwrap();
    let clv_first = orchestrator.cache().clv().unwrap();
    let second = orchestrator.run_blocking(&dataset).unwrap();

    assert_eq!(first.run_id + 1, second.run_id);
    assert_eq!(second.state, PipelineState::Completed);
    assert_eq!(orchestrator.cache().entry(StageId::Clv).unwrap().run_id, second.run_id);
    assert_eq!(orchestrator.cache().clv().unwrap().records, clv_first.records);
}
