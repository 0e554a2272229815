//! Key-value side-state store.
//!
//! The uptime machinery keeps its slot locks, last-online markers and
//! offline candidates in a small external key-value namespace with
//! Redis-shaped operations: conditional SET with a TTL, GET, DEL. The
//! trait keeps the engine indifferent to where that namespace lives; the
//! default backing is a table on the service's own Postgres pool, and an
//! in-memory map backs tests and single-process deployments that can
//! afford to lose streak state on restart.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// SET, optionally NX (only when absent) and with a TTL in seconds.
    /// Returns whether the value was written — the NX acquisition verdict.
    async fn set(
        &self,
        key: &str,
        value: &str,
        nx: bool,
        ttl_secs: Option<u64>,
    ) -> anyhow::Result<bool>;

    /// GET honouring expiry.
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    async fn del(&self, key: &str) -> anyhow::Result<()>;
}

/// Side-state table on the main pool. Expiry is enforced at read and at
/// conflicting writes; rows left behind by an expired TTL are overwritten
/// by the next SET on the same key.
pub struct PostgresKvStore {
    pool: PgPool,
}

impl PostgresKvStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn expiry_from_ttl(ttl_secs: Option<u64>) -> Option<DateTime<Utc>> {
    ttl_secs.map(|s| Utc::now() + Duration::seconds(s as i64))
}

#[async_trait]
impl KvStore for PostgresKvStore {
    async fn set(
        &self,
        key: &str,
        value: &str,
        nx: bool,
        ttl_secs: Option<u64>,
    ) -> anyhow::Result<bool> {
        let expires_at = expiry_from_ttl(ttl_secs);
        let query = if nx {
            // NX still wins over a row whose TTL has lapsed.
            r#"
            INSERT INTO uptime_state (key, value, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (key) DO UPDATE
                SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
                WHERE uptime_state.expires_at IS NOT NULL
                  AND uptime_state.expires_at <= now()
            "#
        } else {
            r#"
            INSERT INTO uptime_state (key, value, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (key) DO UPDATE
                SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
            "#
        };

        let result = sqlx::query(query)
            .bind(key)
            .bind(value)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let row = sqlx::query(
            "SELECT value FROM uptime_state WHERE key = $1 AND (expires_at IS NULL OR expires_at > now())",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    async fn del(&self, key: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM uptime_state WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Process-local store: same semantics, no durability.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, (String, Option<DateTime<Utc>>)>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn is_live(expires_at: &Option<DateTime<Utc>>) -> bool {
    expires_at.map(|t| t > Utc::now()).unwrap_or(true)
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn set(
        &self,
        key: &str,
        value: &str,
        nx: bool,
        ttl_secs: Option<u64>,
    ) -> anyhow::Result<bool> {
        let mut entries = self.entries.lock().await;
        if nx {
            if let Some(existing) = entries.get(key) {
                if is_live(&existing.1) {
                    return Ok(false);
                }
            }
        }
        entries.insert(key.to_string(), (value.to_string(), expiry_from_ttl(ttl_secs)));
        Ok(true)
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .filter(|(_, expiry)| is_live(expiry))
            .map(|(value, _)| value.clone()))
    }

    async fn del(&self, key: &str) -> anyhow::Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn nx_set_acquires_once() {
        let kv = MemoryKvStore::new();
        assert!(kv.set("lock", "a", true, Some(60)).await.unwrap());
        assert!(!kv.set("lock", "b", true, Some(60)).await.unwrap());
        assert_eq!(kv.get("lock").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn plain_set_overwrites() {
        let kv = MemoryKvStore::new();
        assert!(kv.set("k", "a", false, None).await.unwrap());
        assert!(kv.set("k", "b", false, None).await.unwrap());
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn del_removes() {
        let kv = MemoryKvStore::new();
        kv.set("k", "v", false, None).await.unwrap();
        kv.del("k").await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let kv = MemoryKvStore::new();
        kv.entries.lock().await.insert(
            "k".to_string(),
            ("v".to_string(), Some(Utc::now() - Duration::seconds(5))),
        );
        assert_eq!(kv.get("k").await.unwrap(), None);
        // and NX can reclaim the key
        assert!(kv.set("k", "w", true, Some(60)).await.unwrap());
    }
}
