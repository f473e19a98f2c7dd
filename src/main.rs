//! Salesforge: retail analytics CLI
//!
//! Loads a transaction CSV, runs the analytics pipeline through the worker
//! queue, prints a summary and optionally dumps every stage result as JSON
//! and the export tables as CSV.

use anyhow::{Context, Result};
use clap::Parser;
use salesforge::logging::init_logging;
use salesforge::{AnalyticsConfig, Args, PipelineService, PipelineState, ResultCache, StageId};
use std::fs;
use std::path::Path;
use std::time::Instant;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.json_logs);

    let mut config = match &args.config {
        Some(path) => AnalyticsConfig::load(path)
            .with_context(|| format!("failed to load configuration from {}", path))?,
        None => AnalyticsConfig::default(),
    };
    args.apply_overrides(&mut config)?;

    if args.verbose {
        println!("Salesforge - Retail Sales Analytics");
        println!("===================================\n");
    }

    let start_time = Instant::now();
    let service = PipelineService::start(config);

    let dataset = service
        .load_and_activate(&args.input)
        .with_context(|| format!("failed to load dataset {}", args.input))?;
    println!(
        "✓ Dataset loaded: {} rows, {} columns",
        dataset.row_count(),
        dataset.column_count()
    );

    let run_id = service.start_run()?;
    let status = service.wait_for_run(run_id).await;

    match status.state {
        PipelineState::Completed => println!("✓ Pipeline completed ({} stages)", status.stages_completed.len()),
        _ => println!(
            "✗ Pipeline failed after {} of {} stages: {}",
            status.stages_completed.len(),
            StageId::ALL.len(),
            status.error.as_deref().unwrap_or("unknown error")
        ),
    }

    print_summary(service.cache());

    if let Some(output) = &args.output {
        let snapshot = service.cache().snapshot_json()?;
        fs::write(output, serde_json::to_string_pretty(&snapshot)?)
            .with_context(|| format!("failed to write {}", output))?;
        println!("\nResults saved to: {}", output);
    }

    if let (Some(dir), Some(exports)) = (&args.export_dir, service.cache().exports()) {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir))?;
        for table in &exports.tables {
            let path = Path::new(dir).join(format!("{}.csv", table.name));
            fs::write(&path, table.to_csv_string()?)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
        println!("Export tables written to: {}", dir);
    }

    println!(
        "\nTotal processing time: {:.2}s",
        start_time.elapsed().as_secs_f64()
    );

    if status.state == PipelineState::Failed {
        anyhow::bail!(status.error.unwrap_or_else(|| "pipeline failed".to_string()));
    }
    Ok(())
}

fn print_summary(cache: &ResultCache) {
    if let Some(kpis) = cache.kpis() {
        println!("\n=== Key Metrics ===");
        for item in &kpis.summary {
            println!("{:<28} {}", item.name, item.value);
        }
    }

    if let Some(rfm) = cache.rfm() {
        println!("\n=== RFM Segments ===");
        for segment in &rfm.segment_summary {
            println!(
                "{:<22} {:>6} customers ({:.1}% of revenue)",
                segment.segment.to_string(),
                segment.customer_count,
                segment.revenue_pct
            );
        }
    }

    if let Some(segmentation) = cache.segmentation() {
        println!("\n=== Cluster Statistics ===");
        for profile in &segmentation.cluster_profiles {
            println!(
                "Cluster {} ({}): {} customers ({:.1}%)",
                profile.cluster_id, profile.label, profile.customer_count, profile.percentage
            );
        }
        println!("Silhouette score: {:.3}", segmentation.silhouette_score);
    }

    if let Some(clv) = cache.clv() {
        println!("\n=== Customer Lifetime Value ===");
        println!("Total predictive CLV: {:.2}", clv.summary.total_predictive_clv);
        println!("At-risk customers: {}", clv.at_risk_count);
    }

    if let Some(forecast) = cache.forecast() {
        println!("\n=== {}-Month Forecast ===", forecast.horizon);
        for method in &forecast.comparison.methods {
            println!("{:<24} {:.2}", method.method, method.total_forecasted_revenue);
        }
    }
}
