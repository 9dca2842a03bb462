//! "Import all": artifact -> classifier -> loader for each category in turn.

use serde::Serialize;
use std::path::Path;
use tracing::{error, info};

use crate::artifact;
use crate::category::Category;
use crate::classify::classify;
use crate::error::PipelineError;
use crate::load::load;
use crate::store::ReportStore;

#[derive(Debug, Clone, Serialize)]
pub struct ImportOutcome {
    pub category: Category,
    pub ok: bool,
    pub rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub missing_artifact: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub outcomes: Vec<ImportOutcome>,
}

impl ImportReport {
    pub fn all_ok(&self) -> bool {
        self.outcomes.iter().all(|o| o.ok)
    }

    pub fn inserted(&self) -> usize {
        self.outcomes.iter().map(|o| o.rows).sum()
    }

    /// 200 when everything loaded, 500 on any server-side failure, 404 when
    /// the only failures are missing artifacts.
    pub fn http_status(&self) -> u16 {
        if self.all_ok() {
            200
        } else if self.outcomes.iter().any(|o| !o.ok && !o.missing_artifact) {
            500
        } else {
            404
        }
    }

    /// One line for the caller; per-category details are in the logs.
    pub fn message(&self) -> String {
        if self.all_ok() {
            return format!("Imported {} records into {} tables", self.inserted(), self.outcomes.len());
        }
        let failed: Vec<String> = self
            .outcomes
            .iter()
            .filter(|o| !o.ok)
            .map(|o| o.category.to_string())
            .collect();
        format!("Import failed for: {}", failed.join(", "))
    }
}

/// Classifies and loads one category from its artifact.
pub async fn import_category<S: ReportStore>(
    store: &S,
    data_dir: &Path,
    category: Category,
) -> Result<usize, PipelineError> {
    let rows = artifact::read_rows(data_dir, category).await?;
    let records = classify(category, &rows)?;
    load(store, category, &records).await
}

/// Runs `categories` in the given order; one failure never stops the next.
pub async fn import_categories<S: ReportStore>(
    store: &S,
    data_dir: &Path,
    categories: &[Category],
) -> ImportReport {
    let mut report = ImportReport::default();
    for &category in categories {
        let outcome = match import_category(store, data_dir, category).await {
            Ok(rows) => {
                info!(%category, rows, "category imported");
                ImportOutcome {
                    category,
                    ok: true,
                    rows,
                    error: None,
                    missing_artifact: false,
                }
            }
            Err(e) => {
                error!(%category, error = %e, "category import failed");
                ImportOutcome {
                    category,
                    ok: false,
                    rows: 0,
                    missing_artifact: e.is_client_error(),
                    error: Some(e.to_string()),
                }
            }
        };
        report.outcomes.push(outcome);
    }
    report
}

pub async fn import_all<S: ReportStore>(store: &S, data_dir: &Path) -> ImportReport {
    import_categories(store, data_dir, &Category::ALL).await
}
