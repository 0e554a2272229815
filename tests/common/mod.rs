//! Shared fixtures: an in-memory miners table and a scripted adapter.
#![allow(dead_code)]

use async_trait::async_trait;
use poolwatch::pools::GroupBy;
use poolwatch::{
    FailReason, FetchOutcome, MinerRecord, MinerStore, Observation, PoolAdapter, PoolGroup,
    PoolKind, WorkerFetch,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Miners table double with the same guard semantics as the SQL surface.
#[derive(Default)]
pub struct MemoryMinerStore {
    miners: Mutex<HashMap<String, MinerRecord>>,
    /// When set, every read fails — simulates a database outage.
    pub fail_reads: AtomicBool,
}

impl MemoryMinerStore {
    pub fn new(records: Vec<MinerRecord>) -> Self {
        Self {
            miners: Mutex::new(records.into_iter().map(|m| (m.id.clone(), m)).collect()),
            fail_reads: AtomicBool::new(false),
        }
    }

    pub async fn get(&self, id: &str) -> MinerRecord {
        self.miners.lock().await.get(id).cloned().expect("miner exists")
    }

    fn folded(record: &MinerRecord) -> String {
        record.status.as_deref().unwrap_or("").trim().to_lowercase()
    }
}

#[async_trait]
impl MinerStore for MemoryMinerStore {
    async fn candidates(
        &self,
        pool: &str,
        require_secret: bool,
    ) -> anyhow::Result<Vec<MinerRecord>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            anyhow::bail!("connection timed out");
        }
        let miners = self.miners.lock().await;
        Ok(miners
            .values()
            .filter(|m| m.pool.eq_ignore_ascii_case(pool))
            .filter(|m| !m.worker_name.is_empty())
            .filter(|m| m.api_key.as_deref().unwrap_or("") != "")
            .filter(|m| !require_secret || m.secret_key.as_deref().unwrap_or("") != "")
            .cloned()
            .collect())
    }

    async fn increment_hours(&self, ids: &[String]) -> anyhow::Result<u64> {
        let mut miners = self.miners.lock().await;
        let mut credited = 0;
        for id in ids {
            if let Some(m) = miners.get_mut(id) {
                if Self::folded(m) != "maintenance" {
                    m.total_horas_online = Some(m.total_horas_online.unwrap_or(0.0) + 0.25);
                    credited += 1;
                }
            }
        }
        Ok(credited)
    }

    async fn set_status(&self, ids: &[String], status: &str) -> anyhow::Result<Vec<String>> {
        let mut miners = self.miners.lock().await;
        let mut changed = Vec::new();
        for id in ids {
            if let Some(m) = miners.get_mut(id) {
                let folded = Self::folded(m);
                if folded != "maintenance" && m.status.as_deref().unwrap_or("") != status {
                    m.status = Some(status.to_string());
                    changed.push(id.clone());
                }
            }
        }
        Ok(changed)
    }

    async fn find(&self, id: &str) -> anyhow::Result<Option<MinerRecord>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            anyhow::bail!("connection timed out");
        }
        Ok(self.miners.lock().await.get(id).cloned())
    }

    async fn find_many(&self, ids: &[String]) -> anyhow::Result<Vec<MinerRecord>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            anyhow::bail!("connection timed out");
        }
        let miners = self.miners.lock().await;
        Ok(ids.iter().filter_map(|id| miners.get(id).cloned()).collect())
    }
}

/// Adapter whose answers are queued up front.
pub struct ScriptedAdapter {
    kind: PoolKind,
    double_check: bool,
    script: Mutex<VecDeque<WorkerFetch>>,
    pub calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(kind: PoolKind, responses: Vec<WorkerFetch>) -> Self {
        Self {
            kind,
            double_check: false,
            script: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_double_check(mut self) -> Self {
        self.double_check = true;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PoolAdapter for ScriptedAdapter {
    fn kind(&self) -> PoolKind {
        self.kind
    }

    fn group_by(&self) -> GroupBy {
        GroupBy::AccountCoin
    }

    fn double_checks_offline(&self) -> bool {
        self.double_check
    }

    async fn list_workers(&self, _group: &PoolGroup) -> WorkerFetch {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| {
                WorkerFetch::failed(
                    FailReason::Transport,
                    "scripted",
                    Some("script exhausted".to_string()),
                )
            })
    }
}

pub fn miner(id: &str, pool: &str, worker: &str, status: &str) -> MinerRecord {
    MinerRecord {
        id: id.to_string(),
        pool: pool.to_string(),
        coin: "BTC".to_string(),
        worker_name: worker.to_string(),
        api_key: Some("api-key".to_string()),
        secret_key: Some("secret".to_string()),
        status: (!status.is_empty()).then(|| status.to_string()),
        total_horas_online: Some(0.0),
    }
}

pub fn online_obs(name: &str, hashrate: f64) -> Observation {
    Observation {
        name: name.to_string(),
        hashrate,
        status_text: Some("active".to_string()),
        ..Default::default()
    }
}

pub fn offline_obs(name: &str) -> Observation {
    Observation {
        name: name.to_string(),
        hashrate: 0.0,
        status_text: Some("unactive".to_string()),
        ..Default::default()
    }
}

pub fn ok(observations: Vec<Observation>) -> WorkerFetch {
    WorkerFetch {
        outcome: FetchOutcome::Workers(observations),
        endpoint: "scripted".to_string(),
        diag: None,
    }
}

pub fn failed(reason: FailReason) -> WorkerFetch {
    WorkerFetch::failed(reason, "scripted", None)
}
