use anyhow::{bail, Result};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Tables a harvest needs before it may start.
pub const REQUIRED_TABLES: &[&str] = &["contacts", "group_members", "harvest_runs"];

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db).await?;
    create_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // Create contacts table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS contacts (
            identifier TEXT PRIMARY KEY,
            display_name TEXT NOT NULL DEFAULT '',
            remark_name TEXT NOT NULL DEFAULT '',
            avatar_url TEXT NOT NULL DEFAULT '',
            alias TEXT NOT NULL DEFAULT '',
            kind TEXT NOT NULL,
            region TEXT NOT NULL DEFAULT '',
            last_updated INTEGER NOT NULL,
            extra_json TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create group_members table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS group_members (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            group_identifier TEXT NOT NULL,
            member_identifier TEXT NOT NULL,
            display_name TEXT NOT NULL DEFAULT '',
            nickname TEXT NOT NULL DEFAULT '',
            province TEXT NOT NULL DEFAULT '',
            city TEXT NOT NULL DEFAULT '',
            signature TEXT NOT NULL DEFAULT '',
            avatar_url TEXT NOT NULL DEFAULT '',
            inviter_identifier TEXT,
            join_time INTEGER,
            last_updated INTEGER NOT NULL,
            extra_json TEXT NOT NULL DEFAULT '{}',
            UNIQUE(group_identifier, member_identifier),
            FOREIGN KEY (group_identifier) REFERENCES contacts(identifier)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create harvest_runs table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS harvest_runs (
            id TEXT PRIMARY KEY,
            target TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            finished_at INTEGER,
            status TEXT NOT NULL,
            pages INTEGER NOT NULL DEFAULT 0,
            identifiers INTEGER NOT NULL DEFAULT 0,
            contacts_written INTEGER NOT NULL DEFAULT 0,
            groups_written INTEGER NOT NULL DEFAULT 0,
            members_written INTEGER NOT NULL DEFAULT 0,
            skipped INTEGER NOT NULL DEFAULT 0,
            failed_chunks INTEGER NOT NULL DEFAULT 0,
            error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_contacts_kind ON contacts(kind)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_contacts_display_name ON contacts(display_name COLLATE NOCASE)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_group_members_group ON group_members(group_identifier)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_harvest_runs_target ON harvest_runs(target, started_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Fail unless every required table exists.
pub async fn verify_schema(pool: &SqlitePool) -> Result<()> {
    let mut missing = Vec::new();
    for table in REQUIRED_TABLES {
        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name = ?",
        )
        .bind(*table)
        .fetch_one(pool)
        .await?;
        if !exists {
            missing.push(*table);
        }
    }

    if !missing.is_empty() {
        bail!(
            "database schema is missing table(s): {}. Run `harvester init` first.",
            missing.join(", ")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;
    use tempfile::TempDir;

    fn db_config(tmp: &TempDir) -> DbConfig {
        DbConfig {
            path: tmp.path().join("data").join("directory.sqlite"),
            busy_timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn verify_fails_before_schema_exists() {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect(&db_config(&tmp)).await.unwrap();
        let err = verify_schema(&pool).await.unwrap_err();
        assert!(err.to_string().contains("harvester init"));
    }

    #[tokio::test]
    async fn schema_creation_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect(&db_config(&tmp)).await.unwrap();
        create_schema(&pool).await.unwrap();
        create_schema(&pool).await.unwrap();
        verify_schema(&pool).await.unwrap();
    }
}
