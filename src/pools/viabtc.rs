//! ViaBTC openapi adapter.

use super::{FailReason, Observation, PoolAdapter, PoolGroup, PoolKind, WorkerFetch};
use crate::http::{json_num, PoolHttp};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

const ENDPOINT: &str = "https://www.viabtc.net/res/openapi/v1/hashrate/worker";
const TIMEOUT: Duration = Duration::from_secs(15);

pub struct ViaBtcAdapter {
    http: PoolHttp,
}

impl ViaBtcAdapter {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            http: PoolHttp::new(TIMEOUT)?,
        })
    }
}

#[async_trait]
impl PoolAdapter for ViaBtcAdapter {
    fn kind(&self) -> PoolKind {
        PoolKind::ViaBtc
    }

    /// The 10-minute hashrate ViaBTC reports flaps to zero around share
    /// gaps; the engine re-polls once before trusting an offline reading.
    fn double_checks_offline(&self) -> bool {
        true
    }

    async fn list_workers(&self, group: &PoolGroup) -> WorkerFetch {
        if group.api_key.is_empty() {
            return WorkerFetch::failed(FailReason::MissingCredential("api_key"), ENDPOINT, None);
        }

        let url = format!("{ENDPOINT}?coin={}", group.coin.to_uppercase());
        let capture = match self
            .http
            .get(&url, &[("X-API-KEY", group.api_key.clone())])
            .await
        {
            Ok(c) => c,
            Err(t) => {
                return WorkerFetch::failed(FailReason::Transport, url, Some(t.detail));
            }
        };

        if !capture.is_success() {
            return WorkerFetch::failed(
                FailReason::from_status(capture.status),
                url,
                Some(capture.body_prefix()),
            );
        }

        let Some(json) = capture.json() else {
            return WorkerFetch::failed(FailReason::Schema, url, Some(capture.body_prefix()));
        };

        match parse_workers(&json) {
            Ok(workers) => WorkerFetch::workers(workers, url),
            Err(reason) => WorkerFetch::failed(reason, url, Some(capture.body_prefix())),
        }
    }
}

/// Expected envelope: `{code: 0, data: {data: [...]}}`. Anything else is a
/// schema or logical failure, never an empty worker list.
fn parse_workers(json: &Value) -> Result<Vec<Observation>, FailReason> {
    match json.get("code").and_then(Value::as_i64) {
        Some(0) => {}
        Some(code) => return Err(FailReason::Logical(code.to_string())),
        None => return Err(FailReason::Schema),
    }

    let entries = json
        .pointer("/data/data")
        .and_then(Value::as_array)
        .ok_or(FailReason::Schema)?;

    let workers = entries
        .iter()
        .filter_map(|entry| {
            let name = entry.get("worker_name")?.as_str()?.to_string();
            Some(Observation {
                name,
                hashrate: entry.get("hashrate_10min").and_then(json_num).unwrap_or(0.0),
                status_text: entry
                    .get("worker_status")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                ..Default::default()
            })
        })
        .collect();
    Ok(workers)
}
