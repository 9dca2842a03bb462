use std::path::PathBuf;

use crate::category::Category;
use crate::fetch::FetchError;

/// Failure of one category's pipeline run.
///
/// Numeric parse failures and "Total" rows are not represented here: they
/// are coerced or skipped by the classifier.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(#[from] FetchError),

    #[error("artifact for '{category}' not found at {}", path.display())]
    MissingArtifact { category: Category, path: PathBuf },

    #[error("malformed record in '{category}' at row {row}: {reason}")]
    MalformedRecord {
        category: Category,
        row: usize,
        reason: String,
    },

    #[error("invalid {field} '{value}' for '{category}' at row {row}")]
    InvalidCategoryValue {
        category: Category,
        field: &'static str,
        value: String,
        row: usize,
    },

    #[error("failed to insert record into {table}: {record} ({detail})")]
    PersistenceFailure {
        table: &'static str,
        record: String,
        detail: String,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid CSS selector '{css}': {reason}")]
    Selector { css: &'static str, reason: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl PipelineError {
    /// Missing input is the caller's problem (404-class); everything else is ours.
    pub fn is_client_error(&self) -> bool {
        matches!(self, PipelineError::MissingArtifact { .. })
    }
}
