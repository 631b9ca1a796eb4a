//! SQLite-backed [`SessionStore`] implementation.
//!
//! Sessions survive restarts of the server. Insert-if-absent is a single
//! `INSERT ... ON CONFLICT DO NOTHING`, so the id check and the insert are
//! atomic at the database level. Pruning opens with a write, so its
//! transaction holds SQLite's write lock before it counts rows.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool};

use dataset_search_core::models::{GroupedResult, ResultsSession};
use dataset_search_core::store::{Retention, SessionStore};

pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    /// Wrap a pool whose schema has been migrated.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

async fn insert_if_absent(conn: &mut SqliteConnection, session: &ResultsSession) -> Result<bool> {
    let grouped_json = serde_json::to_string(&session.grouped_results)?;
    let result = sqlx::query(
        r#"
        INSERT INTO sessions (results_id, query, grouped_json, created_at_ms)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(results_id) DO NOTHING
        "#,
    )
    .bind(&session.results_id)
    .bind(&session.query)
    .bind(&grouped_json)
    .bind(session.created_at.timestamp_millis())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

async fn prune_within(
    conn: &mut SqliteConnection,
    retention: &Retention,
    now: DateTime<Utc>,
) -> Result<usize> {
    // Runs even without a TTL: the first statement must be a write.
    let cutoff = retention
        .ttl
        .map(|ttl| (now - ttl).timestamp_millis())
        .unwrap_or(i64::MIN);
    let mut removed = sqlx::query("DELETE FROM sessions WHERE created_at_ms <= ?")
        .bind(cutoff)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
        .fetch_one(&mut *conn)
        .await?;
    // Leave room for one more insert.
    let excess = count - (retention.max_sessions as i64 - 1);
    if excess > 0 {
        removed += sqlx::query(
            r#"
            DELETE FROM sessions WHERE rowid IN (
                SELECT rowid FROM sessions ORDER BY created_at_ms ASC, rowid ASC LIMIT ?
            )
            "#,
        )
        .bind(excess)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    }

    Ok(removed as usize)
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn put_if_absent(&self, session: &ResultsSession) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        insert_if_absent(&mut conn, session).await
    }

    async fn get(&self, results_id: &str) -> Result<Option<ResultsSession>> {
        let row = sqlx::query(
            "SELECT results_id, query, grouped_json, created_at_ms FROM sessions WHERE results_id = ?",
        )
        .bind(results_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let grouped_json: String = row.get("grouped_json");
        let grouped_results: Vec<GroupedResult> = serde_json::from_str(&grouped_json)
            .with_context(|| format!("corrupt grouped results for session {}", results_id))?;
        let created_at_ms: i64 = row.get("created_at_ms");
        let created_at = DateTime::<Utc>::from_timestamp_millis(created_at_ms)
            .with_context(|| format!("invalid timestamp for session {}", results_id))?;

        Ok(Some(ResultsSession {
            results_id: row.get("results_id"),
            query: row.get("query"),
            grouped_results,
            created_at,
        }))
    }

    async fn delete(&self, results_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE results_id = ?")
            .bind(results_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn prune(&self, retention: &Retention, now: DateTime<Utc>) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let removed = prune_within(&mut tx, retention, now).await?;
        tx.commit().await?;
        Ok(removed)
    }

    async fn prune_and_put(
        &self,
        session: &ResultsSession,
        retention: &Retention,
        now: DateTime<Utc>,
    ) -> Result<Option<usize>> {
        let mut tx = self.pool.begin().await?;
        let pruned = prune_within(&mut tx, retention, now).await?;
        if !insert_if_absent(&mut tx, session).await? {
            // Leave the store as it was; the caller retries with a new id.
            tx.rollback().await?;
            return Ok(None);
        }
        tx.commit().await?;
        Ok(Some(pruned))
    }

    async fn len(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}
