//! litecoinpool.org adapter.
//!
//! Single-tenant API key: one call lists every worker of the account, so
//! miners group by `api_key` alone.

use super::{FailReason, GroupBy, Observation, PoolAdapter, PoolGroup, PoolKind, WorkerFetch};
use crate::http::{json_num, PoolHttp};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

const ENDPOINT: &str = "https://www.litecoinpool.org/api";
const TIMEOUT: Duration = Duration::from_secs(12);

pub struct LiteCoinPoolAdapter {
    http: PoolHttp,
}

impl LiteCoinPoolAdapter {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            http: PoolHttp::new(TIMEOUT)?,
        })
    }
}

#[async_trait]
impl PoolAdapter for LiteCoinPoolAdapter {
    fn kind(&self) -> PoolKind {
        PoolKind::LiteCoinPool
    }

    fn group_by(&self) -> GroupBy {
        GroupBy::ApiKey
    }

    async fn list_workers(&self, group: &PoolGroup) -> WorkerFetch {
        if group.api_key.is_empty() {
            return WorkerFetch::failed(FailReason::MissingCredential("api_key"), ENDPOINT, None);
        }

        let url = format!("{ENDPOINT}?api_key={}", group.api_key);
        let capture = match self.http.get(&url, &[]).await {
            Ok(c) => c,
            Err(t) => return WorkerFetch::failed(FailReason::Transport, ENDPOINT, Some(t.detail)),
        };

        if !capture.is_success() {
            return WorkerFetch::failed(
                FailReason::from_status(capture.status),
                ENDPOINT,
                Some(capture.body_prefix()),
            );
        }

        let Some(json) = capture.json() else {
            return WorkerFetch::failed(FailReason::Schema, ENDPOINT, Some(capture.body_prefix()));
        };

        match parse_workers(&json) {
            Ok(workers) => WorkerFetch::workers(workers, ENDPOINT),
            Err(reason) => WorkerFetch::failed(reason, ENDPOINT, Some(capture.body_prefix())),
        }
    }
}

/// Envelope: `{workers: {"acct.w1": {connected: bool, hash_rate: kH/s}}}`.
/// `hash_rate` is scaled to H/s so the engine's `> 0` test stays uniform.
fn parse_workers(json: &Value) -> Result<Vec<Observation>, FailReason> {
    let workers = json
        .get("workers")
        .and_then(Value::as_object)
        .ok_or(FailReason::Schema)?;

    let observations = workers
        .iter()
        .map(|(full_name, fields)| {
            // Online iff connected, with hashrate as the fallback signal;
            // a stale `connected: false` beside a positive rate still counts.
            let connected = fields.get("connected").and_then(Value::as_bool);
            Observation {
                name: full_name.clone(),
                hashrate: fields.get("hash_rate").and_then(json_num).unwrap_or(0.0) * 1000.0,
                alive_hint: connected.map(|c| if c { 1.0 } else { 0.0 }),
                ..Default::default()
            }
        })
        .collect();
    Ok(observations)
}
