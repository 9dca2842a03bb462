//! Scrape orchestration: portal pages (or CSV downloads) per category,
//! merged in source order and written as one artifact per category.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{error, info, warn};

use crate::artifact;
use crate::category::{Category, LABEL_COLUMN, YEAR_COLUMN};
use crate::error::PipelineError;
use crate::extract::{decode, extract_csv, extract_html, Table};
use crate::fetch::{Fetcher, RawPayload};
use crate::reshape::reshape;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Html,
    Csv,
}

impl SourceFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceFormat::Html => "html",
            SourceFormat::Csv => "csv",
        }
    }
}

impl FromStr for SourceFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "html" => Ok(SourceFormat::Html),
            "csv" => Ok(SourceFormat::Csv),
            other => Err(format!("unknown source format '{}' (expected html or csv)", other)),
        }
    }
}

/// One portal sub-report: a page in the HTML UI and its CSV download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePage {
    pub label: &'static str,
    pub option: &'static str,
    pub suboption: Option<&'static str>,
    pub csv_file: &'static str,
}

const fn page(
    label: &'static str,
    option: &'static str,
    suboption: Option<&'static str>,
    csv_file: &'static str,
) -> SourcePage {
    SourcePage {
        label,
        option,
        suboption,
        csv_file,
    }
}

const PRODUCT_PAGES: &[SourcePage] = &[page("principal", "opt_02", None, "Producao.csv")];

const PROCESS_PAGES: &[SourcePage] = &[
    page("Viníferas", "opt_03", Some("subopt_01"), "ProcessaViniferas.csv"),
    page("Americanas e híbridas", "opt_03", Some("subopt_02"), "ProcessaAmericanas.csv"),
    page("Uvas de mesa", "opt_03", Some("subopt_03"), "ProcessaMesa.csv"),
    page("Sem classificação", "opt_03", Some("subopt_04"), "ProcessaSemclass.csv"),
];

const SALES_PAGES: &[SourcePage] = &[page("principal", "opt_04", None, "Comercio.csv")];

const IMPORT_PAGES: &[SourcePage] = &[
    page("Vinhos de mesa", "opt_05", Some("subopt_01"), "ImpVinhos.csv"),
    page("Espumantes", "opt_05", Some("subopt_02"), "ImpEspumantes.csv"),
    page("Uvas frescas", "opt_05", Some("subopt_03"), "ImpFrescas.csv"),
    page("Uvas passas", "opt_05", Some("subopt_04"), "ImpPassas.csv"),
    page("Suco de uva", "opt_05", Some("subopt_05"), "ImpSuco.csv"),
];

const EXPORT_PAGES: &[SourcePage] = &[
    page("Vinhos de mesa", "opt_06", Some("subopt_01"), "ExpVinho.csv"),
    page("Espumantes", "opt_06", Some("subopt_02"), "ExpEspumantes.csv"),
    page("Uvas frescas", "opt_06", Some("subopt_03"), "ExpUva.csv"),
    page("Suco de uva", "opt_06", Some("subopt_04"), "ExpSuco.csv"),
];

pub fn sources(category: Category) -> &'static [SourcePage] {
    match category {
        Category::Product => PRODUCT_PAGES,
        Category::Process => PROCESS_PAGES,
        Category::Sales => SALES_PAGES,
        Category::Import => IMPORT_PAGES,
        Category::Export => EXPORT_PAGES,
    }
}

impl SourcePage {
    pub fn html_url(&self, base_url: &str, year: Option<i32>) -> String {
        let mut url = match self.suboption {
            Some(sub) => format!("{}/index.php?subopcao={}&opcao={}", base_url, sub, self.option),
            None => format!("{}/index.php?opcao={}", base_url, self.option),
        };
        if let Some(year) = year {
            url.push_str(&format!("&ano={}", year));
        }
        url
    }

    pub fn csv_url(&self, base_url: &str) -> String {
        format!("{}/download/{}", base_url, self.csv_file)
    }
}

#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    pub categories: Vec<Category>,
    pub format: SourceFormat,
    /// HTML only: one page per year. Empty means the portal's default year.
    pub years: Vec<i32>,
}

impl Default for ScrapeRequest {
    fn default() -> Self {
        Self {
            categories: Category::ALL.to_vec(),
            format: SourceFormat::Html,
            years: Vec::new(),
        }
    }
}

/// Provenance of one fetched page.
#[derive(Debug, Clone, Serialize)]
pub struct SourceTrace {
    pub url: String,
    pub content_hash: String,
    pub bytes: usize,
}

impl From<&RawPayload> for SourceTrace {
    fn from(payload: &RawPayload) -> Self {
        Self {
            url: payload.url.clone(),
            content_hash: payload.content_hash.clone(),
            bytes: payload.bytes.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Ok,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryOutcome {
    pub category: Category,
    pub status: OutcomeStatus,
    pub rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceTrace>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScrapeReport {
    pub outcomes: Vec<CategoryOutcome>,
}

impl ScrapeReport {
    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Failed)
            .count()
    }

    pub fn all_ok(&self) -> bool {
        self.failed() == 0
    }

    pub fn all_failed(&self) -> bool {
        !self.outcomes.is_empty() && self.failed() == self.outcomes.len()
    }
}

#[derive(Debug, Clone)]
struct FetchJob {
    url: String,
    label: &'static str,
    year: Option<i32>,
}

fn jobs_for(category: Category, base_url: &str, format: SourceFormat, years: &[i32]) -> Vec<FetchJob> {
    let mut jobs = Vec::new();
    for source in sources(category) {
        match format {
            SourceFormat::Csv => jobs.push(FetchJob {
                url: source.csv_url(base_url),
                label: source.label,
                year: None,
            }),
            SourceFormat::Html if years.is_empty() => jobs.push(FetchJob {
                url: source.html_url(base_url, None),
                label: source.label,
                year: None,
            }),
            SourceFormat::Html => {
                for &year in years {
                    jobs.push(FetchJob {
                        url: source.html_url(base_url, Some(year)),
                        label: source.label,
                        year: Some(year),
                    });
                }
            }
        }
    }
    jobs
}

fn table_from_payload(
    category: Category,
    format: SourceFormat,
    job: &FetchJob,
    payload: &RawPayload,
) -> Result<Table, PipelineError> {
    let mut table = match format {
        SourceFormat::Html => extract_html(&decode(&payload.bytes), job.label)?,
        SourceFormat::Csv => {
            let mut table = extract_csv(&payload.bytes)?;
            table.set_constant(LABEL_COLUMN, Value::String(job.label.to_string()));
            table
        }
    };
    if let Some(year) = job.year {
        table.set_constant(YEAR_COLUMN, Value::from(year));
    }
    Ok(reshape(table, category))
}

/// Fetches every sub-report of `category` and merges them in source order.
///
/// Any failed page fails the whole category: a partial dataset would shift
/// the section headers the classifier relies on.
pub async fn scrape_category(
    fetcher: &Fetcher,
    base_url: &str,
    workers: usize,
    category: Category,
    format: SourceFormat,
    years: &[i32],
) -> Result<(Table, Vec<SourceTrace>), PipelineError> {
    let jobs = jobs_for(category, base_url, format, years);
    info!(%category, pages = jobs.len(), ?format, "scraping category");

    let fetched: Vec<_> = stream::iter(jobs)
        .map(|job| async move {
            let result = fetcher.fetch(&job.url).await;
            (job, result)
        })
        .buffered(workers.max(1))
        .collect()
        .await;

    let mut tables = Vec::with_capacity(fetched.len());
    let mut traces = Vec::with_capacity(fetched.len());
    for (job, result) in fetched {
        let payload = result?;
        let table = table_from_payload(category, format, &job, &payload)?;
        if table.is_empty() {
            warn!(%category, url = %job.url, "no data table on page");
        }
        traces.push(SourceTrace::from(&payload));
        tables.push(table);
    }

    Ok((Table::concat(tables), traces))
}

/// Runs every requested category, writing `<category>.json` under `output_dir`
/// unless `dry_run`. Failures are reported per category and never stop the run.
pub async fn run(
    fetcher: &Fetcher,
    base_url: &str,
    workers: usize,
    request: &ScrapeRequest,
    output_dir: &Path,
    dry_run: bool,
) -> ScrapeReport {
    let mut report = ScrapeReport::default();

    for &category in &request.categories {
        let result = scrape_category(fetcher, base_url, workers, category, request.format, &request.years).await;

        let outcome = match result {
            Ok((table, sources)) if table.is_empty() => {
                warn!(%category, "no rows extracted, artifact not written");
                CategoryOutcome {
                    category,
                    status: OutcomeStatus::Ok,
                    rows: 0,
                    path: None,
                    sources,
                    error: None,
                }
            }
            Ok((table, sources)) => {
                let rows = table.len();
                let written = if dry_run {
                    Ok(None)
                } else {
                    artifact::write_rows(output_dir, category, table).await.map(Some)
                };
                match written {
                    Ok(path) => {
                        info!(%category, rows, path = ?path, "category scraped");
                        CategoryOutcome {
                            category,
                            status: OutcomeStatus::Ok,
                            rows,
                            path,
                            sources,
                            error: None,
                        }
                    }
                    Err(e) => failed_outcome(category, e),
                }
            }
            Err(e) => failed_outcome(category, e),
        };
        report.outcomes.push(outcome);
    }

    report
}

fn failed_outcome(category: Category, err: PipelineError) -> CategoryOutcome {
    error!(%category, error = %err, "category scrape failed");
    CategoryOutcome {
        category,
        status: OutcomeStatus::Failed,
        rows: 0,
        path: None,
        sources: Vec::new(),
        error: Some(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::RetryPolicy;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const PRODUCT_PAGE: &str = r#"<html><body>
        <table class="tb_base tb_dados">
          <thead><tr><th>Produto</th><th>Quantidade (L.)</th></tr></thead>
          <tbody>
            <tr><td>VINHO DE MESA</td><td>169.762.429</td></tr>
            <tr><td>Tinto</td><td>139.320.884</td></tr>
          </tbody>
          <tfoot><tr><td>Total</td><td>169.762.429</td></tr></tfoot>
        </table></body></html>"#;

    /// Answers each request by its path-and-query; unknown paths get a 404.
    async fn serve_pages(pages: HashMap<String, String>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let pages = Arc::new(pages);

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let pages = pages.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 8192];
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    let request = String::from_utf8_lossy(&buf[..n]);
                    let target = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                    let (status, body) = match pages.get(&target) {
                        Some(body) => (200, body.clone()),
                        None => (404, String::new()),
                    };
                    let response = format!(
                        "HTTP/1.1 {} Canned\r\ncontent-type: text/html\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });

        format!("http://{}", addr)
    }

    fn fetcher() -> Fetcher {
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let policy = RetryPolicy {
            max_attempts: 1,
            backoff: Duration::ZERO,
            retry_statuses: vec![503],
        };
        Fetcher::new(client, policy, Duration::ZERO)
    }

    fn process_page(header: &str, cultivar: &str) -> String {
        format!(
            r#"<table class="tb_base tb_dados"><thead><tr><th>Cultivar</th><th>Quantidade (Kg)</th></tr></thead>
            <tbody><tr><td>{}</td><td>10</td></tr><tr><td>{}</td><td>5</td></tr></tbody></table>"#,
            header, cultivar
        )
    }

    #[test]
    fn test_source_urls() {
        let base = "http://portal";
        assert_eq!(
            PRODUCT_PAGES[0].html_url(base, Some(2023)),
            "http://portal/index.php?opcao=opt_02&ano=2023"
        );
        assert_eq!(
            IMPORT_PAGES[1].html_url(base, None),
            "http://portal/index.php?subopcao=subopt_02&opcao=opt_05"
        );
        assert_eq!(EXPORT_PAGES[3].csv_url(base), "http://portal/download/ExpSuco.csv");
    }

    #[test]
    fn test_page_counts() {
        assert_eq!(sources(Category::Process).len(), 4);
        assert_eq!(sources(Category::Import).len(), 5);
        assert_eq!(sources(Category::Export).len(), 4);
    }

    #[test]
    fn test_jobs_per_year() {
        let jobs = jobs_for(Category::Process, "http://p", SourceFormat::Html, &[2021, 2022]);
        assert_eq!(jobs.len(), 8);
        assert_eq!(jobs[1].year, Some(2022));
        assert_eq!(jobs[1].label, "Viníferas");
        assert!(jobs_for(Category::Sales, "http://p", SourceFormat::Csv, &[2021])[0].year.is_none());
    }

    #[test]
    fn test_source_format_parse() {
        assert_eq!("CSV".parse::<SourceFormat>(), Ok(SourceFormat::Csv));
        assert!("xls".parse::<SourceFormat>().is_err());
    }

    #[tokio::test]
    async fn test_scrape_tags_label_and_year() {
        let mut pages = HashMap::new();
        pages.insert("/index.php?opcao=opt_02&ano=2023".to_string(), PRODUCT_PAGE.to_string());
        let base = serve_pages(pages).await;

        let (table, traces) =
            scrape_category(&fetcher(), &base, 2, Category::Product, SourceFormat::Html, &[2023])
                .await
                .unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(traces.len(), 1);
        assert!(traces[0].content_hash.starts_with("sha256:"));

        let rows = table.into_records();
        assert_eq!(rows[1]["Produto"], "Tinto");
        assert_eq!(rows[1]["type"], "principal");
        assert_eq!(rows[1]["ano"], 2023);
    }

    #[tokio::test]
    async fn test_merge_keeps_source_order_under_parallel_fetch() {
        let mut pages = HashMap::new();
        let headers = ["TINTAS", "BRANCAS E ROSADAS", "TINTAS", "TINTAS"];
        for (i, header) in headers.iter().enumerate() {
            pages.insert(
                format!("/index.php?subopcao=subopt_0{}&opcao=opt_03", i + 1),
                process_page(header, &format!("Cultivar {}", i + 1)),
            );
        }
        let base = serve_pages(pages).await;

        let (table, _) = scrape_category(&fetcher(), &base, 4, Category::Process, SourceFormat::Html, &[])
            .await
            .unwrap();
        let rows = table.into_records();
        let labels: Vec<&str> = rows.iter().filter_map(|r| r["type"].as_str()).collect();
        assert_eq!(
            labels,
            [
                "Viníferas",
                "Viníferas",
                "Americanas e híbridas",
                "Americanas e híbridas",
                "Uvas de mesa",
                "Uvas de mesa",
                "Sem classificação",
                "Sem classificação",
            ]
        );
        assert_eq!(rows[3]["Cultivar"], "Cultivar 2");
    }

    #[tokio::test]
    async fn test_run_reports_failure_per_category() {
        let mut pages = HashMap::new();
        pages.insert("/index.php?opcao=opt_02".to_string(), PRODUCT_PAGE.to_string());
        let base = serve_pages(pages).await;
        let dir = tempfile::tempdir().unwrap();

        let request = ScrapeRequest {
            categories: vec![Category::Product, Category::Sales],
            ..ScrapeRequest::default()
        };
        let report = run(&fetcher(), &base, 2, &request, dir.path(), false).await;

        assert_eq!(report.outcomes[0].status, OutcomeStatus::Ok);
        assert_eq!(report.outcomes[0].rows, 3);
        assert!(artifact::json_path(dir.path(), Category::Product).exists());
        assert_eq!(report.outcomes[1].status, OutcomeStatus::Failed);
        assert!(report.outcomes[1].error.as_deref().unwrap().contains("404"));
        assert!(!report.all_ok());
        assert!(!report.all_failed());
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let mut pages = HashMap::new();
        pages.insert("/index.php?opcao=opt_02".to_string(), PRODUCT_PAGE.to_string());
        let base = serve_pages(pages).await;
        let dir = tempfile::tempdir().unwrap();

        let request = ScrapeRequest {
            categories: vec![Category::Product],
            ..ScrapeRequest::default()
        };
        let report = run(&fetcher(), &base, 1, &request, dir.path(), true).await;
        assert!(report.all_ok());
        assert!(!artifact::json_path(dir.path(), Category::Product).exists());
    }
}
