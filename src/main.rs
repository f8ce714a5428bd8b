//! Station analysis - batch station inference and visit metrics
//!
//! Reads a JSONL file of position samples, infers stations per workshop,
//! segments every entity into visits and writes the results.
//!
//! Module structure:
//! - `domain/` - Core types (samples, stations, visits)
//! - `services/` - Inference, segmentation, interval metrics, pipeline
//! - `io/` - Sample ingest and result egress
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use clap::Parser;
use station_analysis::domain::types::secs_f64;
use station_analysis::infra::{Config, Metrics};
use station_analysis::io::{read_samples, Egress};
use station_analysis::services::{AnalysisMode, WorkshopAnalyzer};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Station analysis - infer work stations and visit metrics from position traces
#[derive(Parser, Debug)]
#[command(name = "station-analysis", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// JSONL file of position samples
    #[arg(short, long)]
    input: String,

    /// Output directory (overrides [output] dir)
    #[arg(short, long)]
    output: Option<String>,

    /// Analysis mode: shared or individual (overrides [analysis] mode)
    #[arg(short, long)]
    mode: Option<AnalysisMode>,
}

fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for per-entity events
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), git_hash = env!("GIT_HASH"), "station-analysis starting");

    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(|| Config::resolve_config_path(&[]));
    let mut config = Config::load_from_path(&config_path);
    if let Some(mode) = args.mode {
        config = config.with_mode(mode);
    }
    if let Some(dir) = &args.output {
        config = config.with_output_dir(dir);
    }

    info!(
        config_file = %config.config_file(),
        k_min = config.k_min(),
        k_max = config.k_max(),
        seed = config.seed(),
        radius_percentile = config.radius_percentile(),
        ordering = config.ordering().as_str(),
        min_dwell_secs = secs_f64(config.min_dwell()),
        mode = config.mode().as_str(),
        parallel = config.parallel(),
        output_dir = %config.output_dir().display(),
        "config_loaded"
    );

    let samples = read_samples(&args.input)
        .with_context(|| format!("Failed to read samples from {}", args.input))?;

    let metrics = Arc::new(Metrics::new());
    let analyzer = WorkshopAnalyzer::new(config.analysis_config(), metrics.clone());
    let results = analyzer.analyze_batch(&samples);

    let mut analyses = Vec::new();
    let mut failed = 0usize;
    for (workshop, result) in &results {
        match result {
            Ok(analysis) => {
                for failure in &analysis.failures {
                    warn!(workshop = ?workshop, entity = %failure.entity_id, reason = %failure.reason, "entity_skipped");
                }
                analyses.push(analysis);
            }
            Err(e) => {
                error!(workshop = ?workshop, error = %e, "workshop_skipped");
                failed += 1;
            }
        }
    }

    if analyses.is_empty() {
        anyhow::bail!("no workshop could be analyzed ({} failed)", failed);
    }

    let egress = Egress::new(config.output_dir());
    egress.write_stations(&analyses).context("Failed to write stations")?;
    let reports: usize = analyses.iter().map(|a| egress.write_reports(a)).sum();

    metrics.report().log();
    info!(workshops = analyses.len(), failed, reports, "station-analysis finished");
    Ok(())
}
