//! SQLite-backed [`DirectoryStore`] implementation.
//!
//! Each upsert is one `INSERT .. ON CONFLICT .. DO UPDATE` statement, so
//! every row commits on its own. The pool sits behind a lock so that
//! [`DirectoryStore::reconnect`] can replace it after the connection is lost.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tokio::sync::RwLock;
use tracing::info;

use contact_harvest_core::models::{ContactKind, ContactRecord, GroupMemberRecord};
use contact_harvest_core::store::{ContactFilter, DirectoryStore, StoreCounts};

use crate::config::DbConfig;
use crate::db;

/// SQLite implementation of the [`DirectoryStore`] trait.
pub struct SqliteStore {
    db: DbConfig,
    pool: RwLock<SqlitePool>,
}

impl SqliteStore {
    pub async fn connect(db: &DbConfig) -> Result<Self> {
        let pool = db::connect(db).await?;
        Ok(Self::new(pool, db.clone()))
    }

    pub fn new(pool: SqlitePool, db: DbConfig) -> Self {
        Self {
            db,
            pool: RwLock::new(pool),
        }
    }

    /// Handle on the current pool.
    pub async fn pool(&self) -> SqlitePool {
        self.pool.read().await.clone()
    }

    pub async fn close(&self) {
        self.pool.read().await.close().await;
    }
}

fn ts_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

fn parse_extra(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or(serde_json::json!({}))
}

fn contact_from_row(row: &SqliteRow) -> ContactRecord {
    let identifier: String = row.get("identifier");
    let kind = row
        .get::<String, _>("kind")
        .parse()
        .unwrap_or_else(|_| ContactKind::classify(&identifier));

    ContactRecord {
        display_name: row.get("display_name"),
        remark_name: row.get("remark_name"),
        alias: row.get("alias"),
        avatar_url: row.get("avatar_url"),
        kind,
        region: row.get("region"),
        last_updated: ts_to_datetime(row.get("last_updated")),
        extra: parse_extra(&row.get::<String, _>("extra_json")),
        identifier,
    }
}

fn member_from_row(row: &SqliteRow) -> GroupMemberRecord {
    GroupMemberRecord {
        group_identifier: row.get("group_identifier"),
        member_identifier: row.get("member_identifier"),
        display_name: row.get("display_name"),
        nickname: row.get("nickname"),
        province: row.get("province"),
        city: row.get("city"),
        signature: row.get("signature"),
        avatar_url: row.get("avatar_url"),
        inviter_identifier: row.get("inviter_identifier"),
        join_time: row.get("join_time"),
        last_updated: ts_to_datetime(row.get("last_updated")),
        extra: parse_extra(&row.get::<String, _>("extra_json")),
    }
}

const CONTACT_COLUMNS: &str = "identifier, display_name, remark_name, avatar_url, alias, kind, region, last_updated, extra_json";

#[async_trait]
impl DirectoryStore for SqliteStore {
    async fn upsert_contact(&self, contact: &ContactRecord) -> Result<()> {
        let pool = self.pool().await;
        sqlx::query(
            r#"
            INSERT INTO contacts (identifier, display_name, remark_name, avatar_url, alias,
                                  kind, region, last_updated, extra_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(identifier) DO UPDATE SET
                display_name = excluded.display_name,
                remark_name = excluded.remark_name,
                avatar_url = excluded.avatar_url,
                alias = excluded.alias,
                kind = excluded.kind,
                region = excluded.region,
                last_updated = excluded.last_updated,
                extra_json = excluded.extra_json
            "#,
        )
        .bind(&contact.identifier)
        .bind(&contact.display_name)
        .bind(&contact.remark_name)
        .bind(&contact.avatar_url)
        .bind(&contact.alias)
        .bind(contact.kind.as_str())
        .bind(&contact.region)
        .bind(contact.last_updated.timestamp())
        .bind(contact.extra.to_string())
        .execute(&pool)
        .await?;
        Ok(())
    }

    async fn upsert_group_member(&self, member: &GroupMemberRecord) -> Result<()> {
        let pool = self.pool().await;
        sqlx::query(
            r#"
            INSERT INTO group_members (group_identifier, member_identifier, display_name,
                                       nickname, province, city, signature, avatar_url,
                                       inviter_identifier, join_time, last_updated, extra_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(group_identifier, member_identifier) DO UPDATE SET
                display_name = excluded.display_name,
                nickname = excluded.nickname,
                province = excluded.province,
                city = excluded.city,
                signature = excluded.signature,
                avatar_url = excluded.avatar_url,
                inviter_identifier = excluded.inviter_identifier,
                join_time = excluded.join_time,
                last_updated = excluded.last_updated,
                extra_json = excluded.extra_json
            "#,
        )
        .bind(&member.group_identifier)
        .bind(&member.member_identifier)
        .bind(&member.display_name)
        .bind(&member.nickname)
        .bind(&member.province)
        .bind(&member.city)
        .bind(&member.signature)
        .bind(&member.avatar_url)
        .bind(&member.inviter_identifier)
        .bind(member.join_time)
        .bind(member.last_updated.timestamp())
        .bind(member.extra.to_string())
        .execute(&pool)
        .await?;
        Ok(())
    }

    async fn get_contact(&self, identifier: &str) -> Result<Option<ContactRecord>> {
        let pool = self.pool().await;
        let row = sqlx::query(&format!(
            "SELECT {} FROM contacts WHERE identifier = ?",
            CONTACT_COLUMNS
        ))
        .bind(identifier)
        .fetch_optional(&pool)
        .await?;
        Ok(row.as_ref().map(contact_from_row))
    }

    async fn list_contacts(&self, filter: &ContactFilter) -> Result<Vec<ContactRecord>> {
        let pool = self.pool().await;
        let kind = filter.kind.map(|k| k.as_str());
        // SQLite treats a negative LIMIT as "no limit".
        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);

        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM contacts
            WHERE (? IS NULL OR kind = ?)
            ORDER BY display_name COLLATE NOCASE ASC, identifier ASC
            LIMIT ? OFFSET ?
            "#,
            CONTACT_COLUMNS
        ))
        .bind(kind)
        .bind(kind)
        .bind(limit)
        .bind(filter.offset as i64)
        .fetch_all(&pool)
        .await?;

        Ok(rows.iter().map(contact_from_row).collect())
    }

    async fn list_group_members(&self, group_identifier: &str) -> Result<Vec<GroupMemberRecord>> {
        let pool = self.pool().await;
        let rows = sqlx::query(
            r#"
            SELECT group_identifier, member_identifier, display_name, nickname, province, city,
                   signature, avatar_url, inviter_identifier, join_time, last_updated, extra_json
            FROM group_members
            WHERE group_identifier = ?
            ORDER BY member_identifier ASC
            "#,
        )
        .bind(group_identifier)
        .fetch_all(&pool)
        .await?;

        Ok(rows.iter().map(member_from_row).collect())
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let pool = self.pool().await;
        let rows = sqlx::query("SELECT kind, COUNT(*) AS n FROM contacts GROUP BY kind")
            .fetch_all(&pool)
            .await?;

        let mut counts = StoreCounts::default();
        for row in &rows {
            let n = row.get::<i64, _>("n") as u64;
            match row.get::<String, _>("kind").parse::<ContactKind>() {
                Ok(ContactKind::Friend) => counts.friends += n,
                Ok(ContactKind::Group) => counts.groups += n,
                Ok(ContactKind::Official) => counts.officials += n,
                Err(_) => {}
            }
        }

        let members: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM group_members")
            .fetch_one(&pool)
            .await?;
        counts.members = members as u64;
        Ok(counts)
    }

    fn is_disconnect(&self, err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<sqlx::Error>(),
            Some(
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::WorkerCrashed
            )
        )
    }

    async fn reconnect(&self) -> Result<()> {
        let fresh = db::connect(&self.db).await?;
        let stale = {
            let mut pool = self.pool.write().await;
            std::mem::replace(&mut *pool, fresh)
        };
        stale.close().await;
        info!(path = %self.db.path.display(), "database connection re-established");
        Ok(())
    }
}
