//! Command-line interface definitions and argument parsing

use crate::config::AnalyticsConfig;
use chrono::NaiveDate;
use clap::Parser;

/// Retail sales analytics over a transaction CSV
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the input CSV file
    #[arg(short, long, default_value = "data.csv")]
    pub input: String,

    /// Optional TOML file overriding analytics defaults
    #[arg(short, long)]
    pub config: Option<String>,

    /// Write every cached stage result to this JSON file
    #[arg(short, long)]
    pub output: Option<String>,

    /// Directory that receives one CSV file per export table
    #[arg(long)]
    pub export_dir: Option<String>,

    /// Reference date for RFM recency (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub analysis_date: Option<NaiveDate>,

    /// Seed for K-Means initialisation
    #[arg(long)]
    pub seed: Option<u64>,

    /// Range of cluster counts to evaluate, as "min,max"
    /// Example: --k-range "3,6"
    #[arg(short = 'k', long)]
    pub k_range: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| format!("invalid date '{}': {}", raw, e))
}

impl Args {
    /// Parse the cluster range string
    /// Expected format: "min,max"
    pub fn parse_k_range(&self) -> anyhow::Result<Option<(usize, usize)>> {
        let Some(ref range) = self.k_range else {
            return Ok(None);
        };
        let parts: Vec<&str> = range.split(',').collect();
        if parts.len() != 2 {
            anyhow::bail!("Cluster range must be in format 'min,max'");
        }
        let k_min: usize = parts[0]
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid minimum cluster count: {}", parts[0]))?;
        let k_max: usize = parts[1]
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid maximum cluster count: {}", parts[1]))?;
        Ok(Some((k_min, k_max)))
    }

    /// Fold command-line overrides into `config` and re-validate it.
    pub fn apply_overrides(&self, config: &mut AnalyticsConfig) -> anyhow::Result<()> {
        if let Some(date) = self.analysis_date {
            config.rfm.analysis_date = Some(date);
        }
        if let Some(seed) = self.seed {
            config.segmentation.seed = seed;
        }
        if let Some((k_min, k_max)) = self.parse_k_range()? {
            config.segmentation.k_min = k_min;
            config.segmentation.k_max = k_max;
        }
        config.validate()?;
        Ok(())
    }
}
