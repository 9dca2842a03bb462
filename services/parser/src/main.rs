//! Parser Service - Loads collected artifacts into the normalized tables
//!
//! Responsibilities:
//! - Read `<DATA_DIR>/<category>.json` (or `.csv`) for each report category
//! - Classify rows by section header and validate taxonomy labels
//! - Replace each category's table inside one transaction
//! - Track job runs for auditing
//!
//! The run is deterministic: same artifacts, same table contents.
//!
//! Usage:
//!   cargo run --bin parser
//!   cargo run --bin parser -- --category sales --data-dir ./data/vitibrasil
//!   cargo run --bin parser -- --dry-run

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use viticulture::import::{import_categories, ImportReport};
use viticulture::jobs::{create_job_run, finish_job_run, mark_running, JobStatus};
use viticulture::memory::MemoryStore;
use viticulture::query::PageQuery;
use viticulture::store::{PgStore, ReportStore};
use viticulture::{Category, Config};

#[derive(Parser, Debug)]
#[command(name = "parser", about = "Imports VitiBrasil artifacts into the database")]
struct Args {
    /// Category to import (repeatable); all five in fixed order when omitted
    #[arg(long)]
    category: Vec<Category>,

    /// Artifact directory (defaults to DATA_DIR)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Dry run - classify into memory, don't touch the database
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

fn print_report(report: &ImportReport) {
    for outcome in &report.outcomes {
        if outcome.ok {
            println!("  ✓ {}: {} records", outcome.category, outcome.rows);
        } else {
            eprintln!(
                "  ✗ {}: {}",
                outcome.category,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

/// Prints the first records of each loaded category.
async fn print_samples<S: ReportStore>(store: &S, report: &ImportReport) -> Result<()> {
    let page = PageQuery::new(None, 0, 3)?;
    for outcome in report.outcomes.iter().filter(|o| o.ok && o.rows > 0) {
        let sample = store.fetch_page(outcome.category, &page).await?;
        println!("\n[{}]", outcome.category);
        for (i, stored) in sample.iter().enumerate() {
            println!("  [{}] {}", i + 1, stored.record.describe());
        }
        if outcome.rows > sample.len() {
            println!("  ... and {} more", outcome.rows - sample.len());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;
    let data_dir = args.data_dir.clone().unwrap_or_else(|| config.data_dir.clone());
    let categories = if args.category.is_empty() {
        Category::ALL.to_vec()
    } else {
        args.category.clone()
    };

    println!("=== VitiBrasil Parser ===");
    println!("Data dir: {}", data_dir.display());
    println!("Mode: {}", if args.dry_run { "dry-run" } else { "live" });

    if args.dry_run {
        let store = MemoryStore::new();
        let report = import_categories(&store, &data_dir, &categories).await;
        print_report(&report);
        print_samples(&store, &report).await?;
        println!("\nDry run - no records saved to database");
        println!("{}", report.message());
        if !report.all_ok() {
            anyhow::bail!("{}", report.message());
        }
        return Ok(());
    }

    let store = PgStore::connect(config.require_db_url()?, 5).await?;

    let job_run_id = create_job_run(store.pool(), "parser", Some(data_dir.to_string_lossy().as_ref()))
        .await
        .context("Failed to create job run")?;
    mark_running(store.pool(), job_run_id).await?;

    let report = import_categories(&store, &data_dir, &categories).await;
    print_report(&report);

    let status = if report.all_ok() {
        JobStatus::Ok
    } else if report.outcomes.iter().any(|o| o.ok) {
        JobStatus::Partial
    } else {
        JobStatus::Failed
    };
    let error = (!report.all_ok()).then(|| report.message());
    finish_job_run(
        store.pool(),
        job_run_id,
        status,
        &serde_json::to_value(&report)?,
        error.as_deref(),
    )
    .await?;

    println!("\n=== Import Summary ===");
    println!("Job run: {} ({})", job_run_id, status.as_str());
    println!("Inserted: {}", report.inserted());
    println!("{}", report.message());

    if !report.all_ok() {
        anyhow::bail!("{}", report.message());
    }
    Ok(())
}
