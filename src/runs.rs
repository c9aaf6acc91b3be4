//! Harvest run ledger.
//!
//! Each CLI harvest records one row in `harvest_runs`: inserted as `running`
//! when the run starts, then finished as `ok`, `failed` or `cancelled` with
//! the run's counters. `harvester stats` reads the latest row per target.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::harvest::HarvestSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Ok,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Ok => "ok",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

/// One `harvest_runs` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRow {
    pub id: String,
    pub target: String,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub status: String,
    pub identifiers: i64,
    pub contacts_written: i64,
    pub groups_written: i64,
    pub members_written: i64,
    pub skipped: i64,
    pub failed_chunks: i64,
    pub error: Option<String>,
}

/// Insert a `running` row and return its id.
pub async fn start_run(pool: &SqlitePool, target: &str, started_at: i64) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO harvest_runs (id, target, started_at, status) VALUES (?, ?, ?, ?)")
        .bind(&id)
        .bind(target)
        .bind(started_at)
        .bind(RunStatus::Running.as_str())
        .execute(pool)
        .await?;
    Ok(id)
}

pub async fn finish_run(
    pool: &SqlitePool,
    id: &str,
    status: RunStatus,
    summary: Option<&HarvestSummary>,
    error: Option<&str>,
) -> Result<()> {
    let finished_at = chrono::Utc::now().timestamp();
    let default = HarvestSummary::default();
    let s = summary.unwrap_or(&default);

    sqlx::query(
        r#"
        UPDATE harvest_runs SET
            finished_at = ?,
            status = ?,
            pages = ?,
            identifiers = ?,
            contacts_written = ?,
            groups_written = ?,
            members_written = ?,
            skipped = ?,
            failed_chunks = ?,
            error = ?
        WHERE id = ?
        "#,
    )
    .bind(finished_at)
    .bind(status.as_str())
    .bind(s.pages as i64)
    .bind(s.identifiers as i64)
    .bind(s.counts.contacts_written as i64)
    .bind(s.counts.groups_written as i64)
    .bind(s.counts.members_written as i64)
    .bind(s.skipped.len() as i64)
    .bind(s.failed_chunks as i64)
    .bind(error)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

fn run_from_row(row: &sqlx::sqlite::SqliteRow) -> RunRow {
    RunRow {
        id: row.get("id"),
        target: row.get("target"),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
        status: row.get("status"),
        identifiers: row.get("identifiers"),
        contacts_written: row.get("contacts_written"),
        groups_written: row.get("groups_written"),
        members_written: row.get("members_written"),
        skipped: row.get("skipped"),
        failed_chunks: row.get("failed_chunks"),
        error: row.get("error"),
    }
}

/// Most recent run of each target, ordered by target.
pub async fn latest_runs(pool: &SqlitePool) -> Result<Vec<RunRow>> {
    let rows = sqlx::query(
        r#"
        SELECT id, target, started_at, finished_at, status, identifiers, contacts_written,
               groups_written, members_written, skipped, failed_chunks, error
        FROM (
            SELECT *, ROW_NUMBER() OVER (
                PARTITION BY target ORDER BY started_at DESC, rowid DESC
            ) AS rn
            FROM harvest_runs
        )
        WHERE rn = 1
        ORDER BY target ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(run_from_row).collect())
}
