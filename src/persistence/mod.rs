//! Storage surfaces: the miners table (system of record) and the
//! key-value side-state used by the uptime confirmation machinery.

pub mod kv;
pub mod miners;

pub use kv::{KvStore, MemoryKvStore, PostgresKvStore};
pub use miners::{MinerRecord, MinerStore, PostgresMinerStore};

use crate::config::DatabaseConfig;
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::info;

/// Connect a pool with the configured limits.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .connect(&config.url)
        .await
        .context("Failed to connect to Postgres")?;
    Ok(pool)
}

/// Create the tables this service touches when they are absent. The miners
/// table is owned by the wider platform; the IF NOT EXISTS shape keeps
/// fresh environments and test databases bootstrappable.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    info!("Ensuring database schema");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS miners (
            id TEXT PRIMARY KEY,
            pool TEXT NOT NULL,
            coin TEXT NOT NULL,
            worker_name TEXT NOT NULL DEFAULT '',
            api_key TEXT,
            secret_key TEXT,
            status TEXT,
            total_horas_online DOUBLE PRECISION NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create miners table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS uptime_state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            expires_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create uptime_state table")?;

    Ok(())
}
