//! API Service - Public API for the VitiBrasil datasets
//!
//! Endpoints:
//! - GET /health - Health check
//! - GET /data/:category - Paginated records (product, process, sales, import, export)
//! - POST /data/import-all - Load every category from the artifact directory
//! - POST /scraper/run - Scrape synchronously and return the report
//! - POST /scraper/jobs - Start a background scrape, tracked in job_runs
//! - GET /scraper/jobs - Recent scrape jobs
//! - GET /scraper/jobs/:id - One scrape job

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use viticulture::fetch::Fetcher;
use viticulture::import::{import_all, ImportOutcome};
use viticulture::jobs::{self, JobStatus};
use viticulture::query::{self, PageQuery, DEFAULT_PAGE_SIZE};
use viticulture::scrape::{self, ScrapeReport, ScrapeRequest, SourceFormat};
use viticulture::store::PgStore;
use viticulture::{Category, Config, StoredRecord};

const SCRAPER_COMPONENT: &str = "api-scraper";

// ============================================================================
// State
// ============================================================================

struct AppState {
    store: PgStore,
    config: Config,
    fetcher: Fetcher,
    // One loader run at a time; concurrent replaces of a table would interleave.
    load_lock: Mutex<()>,
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

#[derive(Serialize)]
struct DataResponse {
    modulo: Category,
    ano: Option<i32>,
    pagina: i64,
    quantidade_por_pagina: i64,
    dados: Vec<StoredRecord>,
}

#[derive(Serialize)]
struct ImportResponse {
    message: String,
    outcomes: Vec<ImportOutcome>,
}

#[derive(Serialize)]
struct JobStartedResponse {
    job_run_id: Uuid,
    status: JobStatus,
    status_url: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

// ============================================================================
// Query params
// ============================================================================

#[derive(Debug, Deserialize)]
struct DataQuery {
    #[serde(alias = "ano")]
    year: Option<i32>,
    #[serde(alias = "pagina")]
    page: Option<i64>,
    #[serde(alias = "qtd_por_pagina")]
    page_size: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct JobsQuery {
    limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct ScrapeBody {
    #[serde(default)]
    categories: Vec<Category>,
    format: Option<SourceFormat>,
    #[serde(default)]
    years: Vec<i32>,
}

impl ScrapeBody {
    fn into_request(self) -> ScrapeRequest {
        let mut request = ScrapeRequest::default();
        if !self.categories.is_empty() {
            request.categories = self.categories;
        }
        if let Some(format) = self.format {
            request.format = format;
        }
        request.years = self.years;
        request
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn data_handler(
    State(state): State<Arc<AppState>>,
    Path(category): Path<String>,
    Query(params): Query<DataQuery>,
) -> impl IntoResponse {
    let category: Category = match category.parse() {
        Ok(c) => c,
        Err(e) => return error_response(StatusCode::NOT_FOUND, e),
    };

    let page = params.page.unwrap_or(1);
    let page_size = params.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    let page_query = match PageQuery::from_page(params.year, page, page_size) {
        Ok(q) => q,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    match query::query(&state.store, category, &page_query).await {
        Ok(dados) => Json(DataResponse {
            modulo: category,
            ano: params.year,
            pagina: page,
            quantidade_por_pagina: page_size,
            dados,
        })
        .into_response(),
        Err(e) => {
            error!(%category, error = %format!("{:#}", e), "query failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
        }
    }
}

async fn import_all_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let _guard = state.load_lock.lock().await;
    let report = import_all(&state.store, &state.config.data_dir).await;
    let status = StatusCode::from_u16(report.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    info!(status = status.as_u16(), inserted = report.inserted(), "import-all finished");

    (
        status,
        Json(ImportResponse {
            message: report.message(),
            outcomes: report.outcomes,
        }),
    )
}

async fn run_scrape(state: &AppState, request: &ScrapeRequest) -> ScrapeReport {
    scrape::run(
        &state.fetcher,
        &state.config.source_base_url,
        state.config.fetch_workers,
        request,
        &state.config.data_dir,
        false,
    )
    .await
}

async fn scraper_run_handler(
    State(state): State<Arc<AppState>>,
    body: Option<Json<ScrapeBody>>,
) -> impl IntoResponse {
    let request = body.map(|Json(b)| b).unwrap_or_default().into_request();
    let report = run_scrape(&state, &request).await;
    let status = if report.all_failed() {
        StatusCode::BAD_GATEWAY
    } else {
        StatusCode::OK
    };
    (status, Json(report))
}

/// Background task body: every state change lands in job_runs.
async fn scrape_job(state: Arc<AppState>, job_run_id: Uuid, request: ScrapeRequest) {
    let pool = state.store.pool();
    if let Err(e) = jobs::mark_running(pool, job_run_id).await {
        error!(%job_run_id, error = %e, "failed to mark job running");
    }

    let report = run_scrape(&state, &request).await;
    let status = JobStatus::from_report(&report);
    let error = (!report.all_ok()).then(|| format!("{} categor(ies) failed", report.failed()));
    let detail = serde_json::to_value(&report).unwrap_or_default();

    match jobs::finish_job_run(pool, job_run_id, status, &detail, error.as_deref()).await {
        Ok(()) => info!(%job_run_id, status = status.as_str(), "scrape job finished"),
        Err(e) => error!(%job_run_id, error = %e, "failed to record job result"),
    }
}

async fn scraper_jobs_create_handler(
    State(state): State<Arc<AppState>>,
    body: Option<Json<ScrapeBody>>,
) -> impl IntoResponse {
    let request = body.map(|Json(b)| b).unwrap_or_default().into_request();
    let source_id = format!("vitibrasil-{}", request.format.as_str());

    let job_run_id = match jobs::create_job_run(state.store.pool(), SCRAPER_COMPONENT, Some(&source_id)).await {
        Ok(id) => id,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    };

    tokio::spawn(scrape_job(state.clone(), job_run_id, request));
    info!(%job_run_id, "scrape job started");

    (
        StatusCode::ACCEPTED,
        Json(JobStartedResponse {
            job_run_id,
            status: JobStatus::Pending,
            status_url: format!("/scraper/jobs/{}", job_run_id),
        }),
    )
        .into_response()
}

async fn scraper_jobs_list_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<JobsQuery>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    match jobs::list_job_runs(state.store.pool(), Some(SCRAPER_COMPONENT), limit).await {
        Ok(runs) => Json(runs).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn scraper_job_handler(
    State(state): State<Arc<AppState>>,
    Path(job_run_id): Path<Uuid>,
) -> impl IntoResponse {
    match jobs::get_job_run(state.store.pool(), job_run_id).await {
        Ok(Some(run)) => Json(run).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Job not found"),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    println!("=== VitiBrasil API ===");
    println!("Connecting to database...");

    let store = PgStore::connect(config.require_db_url()?, 10).await?;

    println!("Database connected");

    let fetcher = Fetcher::from_config(&config).context("Failed to build HTTP client")?;
    let bind = config.api_bind.clone();
    let state = Arc::new(AppState {
        store,
        config,
        fetcher,
        load_lock: Mutex::new(()),
    });

    // CORS for web frontend
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/data/import-all", post(import_all_handler))
        .route("/data/:category", get(data_handler))
        .route("/scraper/run", post(scraper_run_handler))
        .route(
            "/scraper/jobs",
            post(scraper_jobs_create_handler).get(scraper_jobs_list_handler),
        )
        .route("/scraper/jobs/:id", get(scraper_job_handler))
        .layer(cors)
        .with_state(state);

    println!("API listening on http://{}", bind);
    println!("\nEndpoints:");
    println!("  GET  /health");
    println!("  GET  /data/:category?year=&page=&page_size=");
    println!("  POST /data/import-all");
    println!("  POST /scraper/run");
    println!("  POST /scraper/jobs");
    println!("  GET  /scraper/jobs?limit=");
    println!("  GET  /scraper/jobs/:id");

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Uri;

    fn params(uri: &str) -> DataQuery {
        let uri: Uri = uri.parse().unwrap();
        Query::<DataQuery>::try_from_uri(&uri).unwrap().0
    }

    #[test]
    fn test_data_query_accepts_portuguese_names() {
        let q = params("/data/product?ano=2020&pagina=3&qtd_por_pagina=25");
        assert_eq!((q.year, q.page, q.page_size), (Some(2020), Some(3), Some(25)));

        let q = params("/data/product?year=2021&page=1&page_size=10");
        assert_eq!((q.year, q.page, q.page_size), (Some(2021), Some(1), Some(10)));

        let q = params("/data/product");
        assert!(q.year.is_none() && q.page.is_none() && q.page_size.is_none());
    }

    #[test]
    fn test_scrape_body_defaults() {
        let request = ScrapeBody::default().into_request();
        assert_eq!(request.categories, Category::ALL.to_vec());
        assert_eq!(request.format, SourceFormat::Html);

        let body: ScrapeBody =
            serde_json::from_str(r#"{"categories": ["sales"], "format": "csv"}"#).unwrap();
        let request = body.into_request();
        assert_eq!(request.categories, vec![Category::Sales]);
        assert_eq!(request.format, SourceFormat::Csv);
    }
}
