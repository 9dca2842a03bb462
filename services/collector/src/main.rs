//! Collector Service - Scrapes the VitiBrasil portal into per-category artifacts
//!
//! Responsibilities:
//! - Fetch report pages (HTML) or downloads (CSV) with retry and rate limiting
//! - Merge sub-reports in source order and reshape wide tables
//! - Write `<DATA_DIR>/<category>.json` for the parser
//! - Track job runs for auditing
//!
//! Usage:
//!   # Every category, current year pages:
//!   cargo run --bin collector
//!
//!   # One category, specific years:
//!   cargo run --bin collector -- --category process --year 2021 --year 2022
//!
//!   # CSV downloads, nothing written:
//!   cargo run --bin collector -- --format csv --dry-run

use anyhow::{Context, Result};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use viticulture::fetch::Fetcher;
use viticulture::jobs::{create_job_run, finish_job_run, mark_running, JobStatus};
use viticulture::scrape::{self, OutcomeStatus, ScrapeRequest, SourceFormat};
use viticulture::{Category, Config};

#[derive(Parser, Debug)]
#[command(name = "collector", about = "Scrapes VitiBrasil reports into artifact files")]
struct Args {
    /// Category to scrape (repeatable); all five when omitted
    #[arg(long)]
    category: Vec<Category>,

    /// Source format: html pages or csv downloads
    #[arg(long, default_value = "html")]
    format: SourceFormat,

    /// Year to request (repeatable, html only)
    #[arg(long)]
    year: Vec<i32>,

    /// Output directory (defaults to DATA_DIR)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Dry run - fetch and extract, write nothing
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;
    let output_dir = args.output_dir.clone().unwrap_or_else(|| config.data_dir.clone());

    let request = ScrapeRequest {
        categories: if args.category.is_empty() {
            Category::ALL.to_vec()
        } else {
            args.category.clone()
        },
        format: args.format,
        years: args.year.clone(),
    };

    println!("=== VitiBrasil Collector ===");
    println!("Source: {}", config.source_base_url);
    println!("Output: {}", output_dir.display());
    println!("Format: {}", request.format.as_str());
    println!("Mode: {}", if args.dry_run { "dry-run" } else { "live" });

    let fetcher = Fetcher::from_config(&config).context("Failed to build HTTP client")?;

    // Job runs are recorded only when a database is configured
    let pool = match (&config.db_url, args.dry_run) {
        (Some(db_url), false) => Some(
            PgPoolOptions::new()
                .max_connections(2)
                .connect(db_url)
                .await
                .context("Failed to connect to database")?,
        ),
        _ => None,
    };

    let source_id = format!("vitibrasil-{}", request.format.as_str());
    let job_run_id = match &pool {
        Some(pool) => {
            let id = create_job_run(pool, "collector", Some(&source_id)).await?;
            mark_running(pool, id).await?;
            Some(id)
        }
        None => None,
    };

    println!("\nScraping {} categor(ies)...", request.categories.len());
    let report = scrape::run(
        &fetcher,
        &config.source_base_url,
        config.fetch_workers,
        &request,
        &output_dir,
        args.dry_run,
    )
    .await;

    for outcome in &report.outcomes {
        match outcome.status {
            OutcomeStatus::Ok => {
                println!("  ✓ {}: {} rows", outcome.category, outcome.rows);
                if let Some(path) = &outcome.path {
                    println!("    Saved to: {}", path.display());
                }
                for source in &outcome.sources {
                    println!("    {} ({})", source.url, source.content_hash);
                }
            }
            OutcomeStatus::Failed => {
                eprintln!(
                    "  ✗ {}: {}",
                    outcome.category,
                    outcome.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }

    if let (Some(pool), Some(job_id)) = (&pool, job_run_id) {
        let status = JobStatus::from_report(&report);
        let detail = serde_json::to_value(&report)?;
        let error = (!report.all_ok()).then(|| format!("{} categor(ies) failed", report.failed()));
        finish_job_run(pool, job_id, status, &detail, error.as_deref()).await?;
        println!("\nJob run: {} ({})", job_id, status.as_str());
    }

    println!("\n=== Collection Summary ===");
    println!("Collected: {}", report.outcomes.len() - report.failed());
    println!("Failed: {}", report.failed());

    if report.all_failed() {
        anyhow::bail!("No category could be scraped");
    }
    if !args.dry_run {
        println!("Ready for parsing: cargo run --bin parser");
    }

    Ok(())
}
