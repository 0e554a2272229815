//! On-demand status read service.
//!
//! Answers "what is miner X doing right now" by reusing the pool adapters
//! directly: no slot machinery, no side-state, no grace. A short response
//! cache keeps dashboards from hammering pool APIs, and batch queries fan
//! out under a bounded concurrency limit.

use crate::names;
use crate::persistence::{MinerRecord, MinerStore};
use crate::pools::{AdapterRegistry, FetchOutcome, ObservationIndex, PoolGroup};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Online,
    Offline,
    Maintenance,
}

/// Uniform projection served for one miner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub id: String,
    pub worker_status: WorkerStatus,
    pub hashrate_10min: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,
    pub worker_found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusReport {
    fn offline_error(id: &str, pool: Option<String>, code: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            worker_status: WorkerStatus::Offline,
            hashrate_10min: 0.0,
            pool,
            worker_found: false,
            error: Some(code.into()),
        }
    }
}

struct CacheEntry {
    report: StatusReport,
    stored_at: Instant,
}

pub struct StatusService {
    store: Arc<dyn MinerStore>,
    registry: Arc<AdapterRegistry>,
    cache: RwLock<HashMap<String, CacheEntry>>,
    cache_ttl: Duration,
    concurrency: usize,
}

impl StatusService {
    pub fn new(
        store: Arc<dyn MinerStore>,
        registry: Arc<AdapterRegistry>,
        cache_ttl: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            registry,
            cache: RwLock::new(HashMap::new()),
            cache_ttl,
            concurrency: concurrency.max(1),
        }
    }

    /// Single-miner query; `refresh` bypasses the cache.
    pub async fn get_status(&self, id: &str, refresh: bool) -> StatusReport {
        if !refresh {
            if let Some(cached) = self.cached(id).await {
                return cached;
            }
        }
        let report = self.resolve(id).await;
        self.store_cache(&report).await;
        report
    }

    /// Batch query; results come back in request order. Cached answers are
    /// served as-is, misses fan out with bounded concurrency.
    pub async fn get_status_many(&self, ids: &[String]) -> Vec<StatusReport> {
        let mut resolved: HashMap<String, StatusReport> = HashMap::new();
        let mut misses: Vec<String> = Vec::new();
        for id in ids {
            if resolved.contains_key(id) {
                continue;
            }
            match self.cached(id).await {
                Some(report) => {
                    resolved.insert(id.clone(), report);
                }
                None => misses.push(id.clone()),
            }
        }

        let fresh: Vec<StatusReport> = stream::iter(misses)
            .map(|id| async move { self.resolve(&id).await })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        for report in fresh {
            self.store_cache(&report).await;
            resolved.insert(report.id.clone(), report);
        }

        ids.iter()
            .map(|id| {
                resolved
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| StatusReport::offline_error(id, None, "not_found"))
            })
            .collect()
    }

    async fn cached(&self, id: &str) -> Option<StatusReport> {
        let cache = self.cache.read().await;
        let entry = cache.get(id)?;
        if entry.stored_at.elapsed() < self.cache_ttl {
            Some(entry.report.clone())
        } else {
            None
        }
    }

    /// Database-failure fallbacks are not cached so a recovered database
    /// is visible immediately and cached good answers survive the outage.
    async fn store_cache(&self, report: &StatusReport) {
        if report.error.as_deref() == Some("db_error") {
            return;
        }
        self.cache.write().await.insert(
            report.id.to_string(),
            CacheEntry {
                report: report.clone(),
                stored_at: Instant::now(),
            },
        );
    }

    async fn resolve(&self, id: &str) -> StatusReport {
        let miner = match self.store.find(id).await {
            Ok(Some(miner)) => miner,
            Ok(None) => return StatusReport::offline_error(id, None, "not_found"),
            Err(e) => {
                warn!(id, error = %format!("{e:#}"), "miner lookup failed");
                return StatusReport::offline_error(id, None, "db_error");
            }
        };

        let pool_tag = Some(miner.pool.clone());
        if miner.is_maintenance() {
            return StatusReport {
                id: id.to_string(),
                worker_status: WorkerStatus::Maintenance,
                hashrate_10min: 0.0,
                pool: pool_tag,
                worker_found: false,
                error: None,
            };
        }

        let Some(adapter) = self.registry.resolve(&miner.pool) else {
            return StatusReport::offline_error(id, pool_tag, "unsupported_pool");
        };
        if miner.worker_name.trim().is_empty() {
            return StatusReport::offline_error(id, pool_tag, "missing_worker_name");
        }
        let api_key = miner.api_key.clone().unwrap_or_default();
        if api_key.is_empty() {
            return StatusReport::offline_error(id, pool_tag, "missing_credential:api_key");
        }
        if adapter.needs_secret_key()
            && miner.secret_key.as_deref().unwrap_or("").is_empty()
        {
            return StatusReport::offline_error(id, pool_tag, "missing_credential:secret_key");
        }

        let group = single_miner_group(&miner, api_key);
        let fetch = adapter.list_workers(&group).await;
        match fetch.outcome {
            FetchOutcome::Failed(reason) => {
                debug!(id, reason = %reason.code(), endpoint = %fetch.endpoint, "status fetch failed");
                StatusReport::offline_error(id, pool_tag, reason.code())
            }
            FetchOutcome::Workers(observations) => {
                let index = ObservationIndex::build(observations);
                match index.lookup(&miner.worker_name) {
                    Some(obs) => StatusReport {
                        id: id.to_string(),
                        worker_status: if obs.is_online(Utc::now()) {
                            WorkerStatus::Online
                        } else {
                            WorkerStatus::Offline
                        },
                        hashrate_10min: obs.hashrate,
                        pool: pool_tag,
                        worker_found: true,
                        error: None,
                    },
                    None => StatusReport {
                        id: id.to_string(),
                        worker_status: WorkerStatus::Offline,
                        hashrate_10min: 0.0,
                        pool: pool_tag,
                        worker_found: false,
                        error: None,
                    },
                }
            }
        }
    }
}

fn single_miner_group(miner: &MinerRecord, api_key: String) -> PoolGroup {
    PoolGroup {
        account: names::head(&miner.worker_name),
        coin: miner.coin.trim().to_uppercase(),
        api_key,
        secret_key: miner.secret_key.clone().filter(|s| !s.is_empty()),
        expected_tails: vec![names::tail(&miner.worker_name)],
    }
}
