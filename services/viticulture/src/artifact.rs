//! Per-category artifact files under the data directory
//!
//! The collector writes `<category>.json` (an array of row objects). The
//! importer reads that file, or falls back to a raw `<category>.csv` download
//! which is extracted and reshaped on the fly.

use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::category::Category;
use crate::classify::LABEL_KEYS;
use crate::error::PipelineError;
use crate::extract::{extract_csv, Table};
use crate::reshape::reshape;

pub fn json_path(dir: &Path, category: Category) -> PathBuf {
    dir.join(format!("{}.json", category.as_str()))
}

pub fn csv_path(dir: &Path, category: Category) -> PathBuf {
    dir.join(format!("{}.csv", category.as_str()))
}

fn io_error(path: &Path, source: std::io::Error) -> PipelineError {
    PipelineError::Io {
        path: path.to_path_buf(),
        source,
    }
}

async fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>, PipelineError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_error(path, e)),
    }
}

fn parse_json_rows(category: Category, path: &Path, bytes: &[u8]) -> Result<Vec<Value>, PipelineError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|source| PipelineError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    match value {
        Value::Array(rows) => Ok(rows),
        _ => Err(PipelineError::MalformedRecord {
            category,
            row: 0,
            reason: format!("{} does not hold a JSON array", path.display()),
        }),
    }
}

/// Loads the rows of one category's artifact, JSON first, then CSV.
pub async fn read_rows(dir: &Path, category: Category) -> Result<Vec<Value>, PipelineError> {
    let json = json_path(dir, category);
    if let Some(bytes) = read_if_exists(&json).await? {
        let rows = parse_json_rows(category, &json, &bytes)?;
        info!(%category, path = %json.display(), rows = rows.len(), "artifact loaded");
        return Ok(rows);
    }

    let csv = csv_path(dir, category);
    if let Some(bytes) = read_if_exists(&csv).await? {
        let table = reshape(extract_csv(&bytes)?, category);
        let labeled = table
            .columns
            .iter()
            .any(|c| LABEL_KEYS.iter().any(|k| c.eq_ignore_ascii_case(k)));
        if category.needs_label() && !labeled {
            return Err(PipelineError::MalformedRecord {
                category,
                row: 0,
                reason: format!(
                    "{} has no '{}' column; every {} row needs a sub-report label",
                    csv.display(),
                    LABEL_KEYS[0],
                    category
                ),
            });
        }
        info!(%category, path = %csv.display(), rows = table.len(), "artifact loaded");
        return Ok(table.into_records());
    }

    debug!(%category, dir = %dir.display(), "no artifact found");
    Err(PipelineError::MissingArtifact {
        category,
        path: json,
    })
}

/// Writes `<category>.json`, replacing any previous artifact atomically.
pub async fn write_rows(dir: &Path, category: Category, table: Table) -> Result<PathBuf, PipelineError> {
    fs::create_dir_all(dir).await.map_err(|e| io_error(dir, e))?;

    let path = json_path(dir, category);
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_vec_pretty(&table.into_records()).map_err(|source| PipelineError::Json {
        path: path.clone(),
        source,
    })?;

    fs::write(&tmp, &body).await.map_err(|e| io_error(&tmp, e))?;
    fs::rename(&tmp, &path).await.map_err(|e| io_error(&path, e))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_rows(dir.path(), Category::Sales).await.unwrap_err();
        assert!(matches!(err, PipelineError::MissingArtifact { category: Category::Sales, .. }));
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_json_must_be_an_array() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(json_path(dir.path(), Category::Product), r#"{"produto": "x"}"#).unwrap();
        let err = read_rows(dir.path(), Category::Product).await.unwrap_err();
        assert!(matches!(err, PipelineError::MalformedRecord { .. }));
        assert!(!err.is_client_error());
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = Table::new(vec!["produto".to_string(), "ano".to_string()]);
        table.rows.push(vec![json!("Tinto"), json!(2023)]);

        let path = write_rows(dir.path(), Category::Product, table).await.unwrap();
        assert!(path.ends_with("product.json"));
        let rows = read_rows(dir.path(), Category::Product).await.unwrap();
        assert_eq!(rows, vec![json!({"produto": "Tinto", "ano": 2023})]);
    }

    #[tokio::test]
    async fn test_csv_fallback_without_label_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            csv_path(dir.path(), Category::Import),
            "Id;País;2020;2020\n1;Alemanha;800;1200\n2;Chile;50;90\n",
        )
        .unwrap();
        let err = read_rows(dir.path(), Category::Import).await.unwrap_err();
        assert!(matches!(err, PipelineError::MalformedRecord { category: Category::Import, .. }));
        assert!(!err.is_client_error());

        std::fs::write(
            csv_path(dir.path(), Category::Import),
            "Id;País;type;2020;2020\n1;Alemanha;Espumantes;800;1200\n",
        )
        .unwrap();
        let rows = read_rows(dir.path(), Category::Import).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["type"], json!("Espumantes"));
    }

    #[tokio::test]
    async fn test_csv_fallback_is_reshaped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            csv_path(dir.path(), Category::Product),
            "id;control;produto;2020;2021\n1;VINHO DE MESA;VINHO DE MESA;100;200\n",
        )
        .unwrap();
        let rows = read_rows(dir.path(), Category::Product).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["ano"], json!(2021));
        assert_eq!(rows[1]["Quantidade (L.)"], json!("200"));
    }
}
