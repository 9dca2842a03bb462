//! Persisted job runs (`job_runs` table)
//!
//! Every collector run and every background scrape started through the API
//! gets a row here, so its state survives restarts and is visible to any
//! process sharing the database.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::scrape::ScrapeReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Ok,
    Partial,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Ok => "ok",
            JobStatus::Partial => "partial",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "ok" => Some(JobStatus::Ok),
            "partial" => Some(JobStatus::Partial),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, JobStatus::Ok | JobStatus::Partial | JobStatus::Failed)
    }

    pub fn from_report(report: &ScrapeReport) -> Self {
        if report.all_ok() {
            JobStatus::Ok
        } else if report.all_failed() {
            JobStatus::Failed
        } else {
            JobStatus::Partial
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRun {
    pub job_run_id: Uuid,
    pub component: String,
    pub source_id: Option<String>,
    pub status: JobStatus,
    pub detail: serde_json::Value,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

const JOB_COLUMNS: &str =
    "job_run_id, component, source_id, status, detail, error, started_at, finished_at";

fn map_job(row: &PgRow) -> Result<JobRun> {
    let status: String = row.try_get("status")?;
    Ok(JobRun {
        job_run_id: row.try_get("job_run_id")?,
        component: row.try_get("component")?,
        source_id: row.try_get("source_id")?,
        status: JobStatus::parse(&status)
            .ok_or_else(|| anyhow::anyhow!("unknown job status '{}'", status))?,
        detail: row.try_get("detail")?,
        error: row.try_get("error")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}

/// Create a new job run record in `pending` state
pub async fn create_job_run(pool: &PgPool, component: &str, source_id: Option<&str>) -> Result<Uuid> {
    let job_run_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO job_runs (job_run_id, component, source_id, status, detail)
        VALUES ($1, $2, $3, 'pending', '{}')
        "#,
    )
    .bind(job_run_id)
    .bind(component)
    .bind(source_id)
    .execute(pool)
    .await?;

    Ok(job_run_id)
}

pub async fn mark_running(pool: &PgPool, job_run_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE job_runs SET status = 'running' WHERE job_run_id = $1")
        .bind(job_run_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Update job run status
pub async fn finish_job_run(
    pool: &PgPool,
    job_run_id: Uuid,
    status: JobStatus,
    detail: &serde_json::Value,
    error: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE job_runs
        SET finished_at = now(), status = $2, detail = $3, error = $4
        WHERE job_run_id = $1
        "#,
    )
    .bind(job_run_id)
    .bind(status.as_str())
    .bind(detail)
    .bind(error)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_job_run(pool: &PgPool, job_run_id: Uuid) -> Result<Option<JobRun>> {
    let row = sqlx::query(&format!("SELECT {} FROM job_runs WHERE job_run_id = $1", JOB_COLUMNS))
        .bind(job_run_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(map_job).transpose()
}

/// Most recent first.
pub async fn list_job_runs(pool: &PgPool, component: Option<&str>, limit: i64) -> Result<Vec<JobRun>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {}
        FROM job_runs
        WHERE ($1::TEXT IS NULL OR component = $1)
        ORDER BY started_at DESC
        LIMIT $2
        "#,
        JOB_COLUMNS
    ))
    .bind(component)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(map_job).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::Category;
    use crate::scrape::{CategoryOutcome, OutcomeStatus};

    fn outcome(category: Category, status: OutcomeStatus) -> CategoryOutcome {
        CategoryOutcome {
            category,
            status,
            rows: 0,
            path: None,
            sources: Vec::new(),
            error: None,
        }
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Ok,
            JobStatus::Partial,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("sucesso"), None);
        assert!(!JobStatus::Running.is_finished());
    }

    #[test]
    fn test_status_from_report() {
        let mut report = ScrapeReport {
            outcomes: vec![outcome(Category::Product, OutcomeStatus::Ok)],
        };
        assert_eq!(JobStatus::from_report(&report), JobStatus::Ok);

        report.outcomes.push(outcome(Category::Sales, OutcomeStatus::Failed));
        assert_eq!(JobStatus::from_report(&report), JobStatus::Partial);

        report.outcomes.remove(0);
        assert_eq!(JobStatus::from_report(&report), JobStatus::Failed);
    }
}
