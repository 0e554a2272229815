//! Typed query surface over the miners table.
//!
//! Three mutations matter to the engine: candidate selection, the +0.25
//! hours increment, and the guarded status update. Every mutation carries
//! the maintenance guard in SQL so no code path can reach a row an
//! operator has parked.

use async_trait::async_trait;
use sqlx::{FromRow, PgPool, Row};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// One row of the miners table, as the engine consumes it.
#[derive(Debug, Clone, FromRow)]
pub struct MinerRecord {
    pub id: String,
    pub pool: String,
    pub coin: String,
    pub worker_name: String,
    pub api_key: Option<String>,
    pub secret_key: Option<String>,
    pub status: Option<String>,
    pub total_horas_online: Option<f64>,
}

impl MinerRecord {
    /// Lifecycle status folded for comparison.
    pub fn status_folded(&self) -> String {
        self.status.as_deref().unwrap_or("").trim().to_lowercase()
    }

    pub fn is_maintenance(&self) -> bool {
        self.status_folded() == "maintenance"
    }
}

#[async_trait]
pub trait MinerStore: Send + Sync {
    /// Miners of one pool with usable credentials and a worker name.
    async fn candidates(&self, pool: &str, require_secret: bool)
        -> anyhow::Result<Vec<MinerRecord>>;

    /// Credit one quarter-hour to each id; maintenance rows are untouched.
    /// Returns the number of rows credited.
    async fn increment_hours(&self, ids: &[String]) -> anyhow::Result<u64>;

    /// Set the status where it differs and the row is not in maintenance.
    /// Returns the ids actually changed.
    async fn set_status(&self, ids: &[String], status: &str) -> anyhow::Result<Vec<String>>;

    async fn find(&self, id: &str) -> anyhow::Result<Option<MinerRecord>>;

    async fn find_many(&self, ids: &[String]) -> anyhow::Result<Vec<MinerRecord>>;
}

const SELECT_COLUMNS: &str =
    "id, pool, coin, worker_name, api_key, secret_key, status, total_horas_online";

pub struct PostgresMinerStore {
    pool: PgPool,
    retries: u32,
}

impl PostgresMinerStore {
    pub fn new(pool: PgPool, retries: u32) -> Self {
        Self { pool, retries }
    }

    /// Connect-timeout class failures get a short bounded retry; anything
    /// else propagates to the engine, which logs and moves to the next
    /// group.
    async fn with_retry<T, F, Fut>(&self, what: &str, op: F) -> anyhow::Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.retries && is_transient(&e) => {
                    attempt += 1;
                    warn!(what, attempt, error = %e, "transient database error, retrying");
                    tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
                }
                Err(e) => return Err(anyhow::Error::new(e).context(format!("{what} failed"))),
            }
        }
    }
}

fn is_transient(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::PoolTimedOut | sqlx::Error::Io(_))
}

#[async_trait]
impl MinerStore for PostgresMinerStore {
    async fn candidates(
        &self,
        pool: &str,
        require_secret: bool,
    ) -> anyhow::Result<Vec<MinerRecord>> {
        let sql = format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM miners
            WHERE lower(pool) = lower($1)
              AND coalesce(worker_name, '') <> ''
              AND coalesce(api_key, '') <> ''
              AND ($2 = false OR coalesce(secret_key, '') <> '')
            "#
        );
        self.with_retry("select candidates", || {
            sqlx::query_as::<_, MinerRecord>(&sql)
                .bind(pool)
                .bind(require_secret)
                .fetch_all(&self.pool)
        })
        .await
    }

    async fn increment_hours(&self, ids: &[String]) -> anyhow::Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = self
            .with_retry("increment hours", || {
                sqlx::query(
                    r#"
                    UPDATE miners
                    SET total_horas_online = COALESCE(total_horas_online, 0) + 0.25
                    WHERE id = ANY($1)
                      AND lower(coalesce(status, '')) <> 'maintenance'
                    "#,
                )
                .bind(ids)
                .execute(&self.pool)
            })
            .await?;
        Ok(result.rows_affected())
    }

    async fn set_status(&self, ids: &[String], status: &str) -> anyhow::Result<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .with_retry("set status", || {
                sqlx::query(
                    r#"
                    UPDATE miners
                    SET status = $2
                    WHERE id = ANY($1)
                      AND coalesce(status, '') <> $2
                      AND lower(coalesce(status, '')) <> 'maintenance'
                    RETURNING id
                    "#,
                )
                .bind(ids)
                .bind(status)
                .fetch_all(&self.pool)
            })
            .await?;
        Ok(rows.iter().map(|r| r.get::<String, _>("id")).collect())
    }

    async fn find(&self, id: &str) -> anyhow::Result<Option<MinerRecord>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM miners WHERE id = $1");
        self.with_retry("find miner", || {
            sqlx::query_as::<_, MinerRecord>(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
        })
        .await
    }

    async fn find_many(&self, ids: &[String]) -> anyhow::Result<Vec<MinerRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!("SELECT {SELECT_COLUMNS} FROM miners WHERE id = ANY($1)");
        self.with_retry("find miners", || {
            sqlx::query_as::<_, MinerRecord>(&sql)
                .bind(ids)
                .fetch_all(&self.pool)
        })
        .await
    }
}
