//! Mining-Dutch MPOS adapter.
//!
//! Mining-Dutch hosts one MPOS instance per pool slug and has historically
//! answered the same account under an algorithm slug (`sha256`, `scrypt`)
//! or a coin slug (`bitcoin`, `litecoin`, `dogecoin`). The adapter walks
//! the candidate slugs in order and takes the first parseable answer. The
//! payload itself comes in several vintages, all tolerated below.

use super::{FailReason, Observation, PoolAdapter, PoolGroup, PoolKind, WorkerFetch};
use crate::http::{json_num, PoolHttp};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

const BASE: &str = "https://www.mining-dutch.nl/pools";
const TIMEOUT: Duration = Duration::from_secs(15);

pub struct MiningDutchAdapter {
    http: PoolHttp,
}

impl MiningDutchAdapter {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            http: PoolHttp::new(TIMEOUT)?,
        })
    }
}

fn algo_slug(coin: &str) -> Option<&'static str> {
    match coin.to_uppercase().as_str() {
        "BTC" => Some("sha256"),
        "LTC" | "DOGE" => Some("scrypt"),
        _ => None,
    }
}

fn coin_slug(coin: &str) -> String {
    match coin.to_uppercase().as_str() {
        "BTC" => "bitcoin".to_string(),
        "LTC" => "litecoin".to_string(),
        "DOGE" => "dogecoin".to_string(),
        other => other.to_lowercase(),
    }
}

fn opposite_algo(algo: &str) -> &'static str {
    if algo == "sha256" {
        "scrypt"
    } else {
        "sha256"
    }
}

/// Slug order: algorithm, coin, opposite algorithm.
fn candidate_slugs(coin: &str) -> Vec<String> {
    let mut slugs = Vec::new();
    if let Some(algo) = algo_slug(coin) {
        slugs.push(algo.to_string());
        let coin = coin_slug(coin);
        if !slugs.contains(&coin) {
            slugs.push(coin);
        }
        slugs.push(opposite_algo(algo).to_string());
    } else {
        slugs.push(coin_slug(coin));
    }
    slugs
}

#[async_trait]
impl PoolAdapter for MiningDutchAdapter {
    fn kind(&self) -> PoolKind {
        PoolKind::MiningDutch
    }

    async fn list_workers(&self, group: &PoolGroup) -> WorkerFetch {
        if group.api_key.is_empty() {
            return WorkerFetch::failed(FailReason::MissingCredential("api_key"), BASE, None);
        }

        let mut last: Option<WorkerFetch> = None;
        for slug in candidate_slugs(&group.coin) {
            let url = format!(
                "{BASE}/{slug}.php?page=api&action=getuserworkers&id={}&api_key={}",
                group.account, group.api_key
            );

            let capture = match self.http.get(&url, &[]).await {
                Ok(c) => c,
                Err(t) => {
                    last = Some(WorkerFetch::failed(FailReason::Transport, url, Some(t.detail)));
                    continue;
                }
            };

            if !capture.is_success() {
                last = Some(WorkerFetch::failed(
                    FailReason::from_status(capture.status),
                    url,
                    Some(capture.body_prefix()),
                ));
                continue;
            }

            match capture.json().as_ref().and_then(extract_workers) {
                Some(workers) => return WorkerFetch::workers(workers, url),
                None => {
                    last = Some(WorkerFetch::failed(
                        FailReason::Schema,
                        url,
                        Some(capture.body_prefix()),
                    ));
                }
            }
        }

        last.unwrap_or_else(|| WorkerFetch::failed(FailReason::Schema, BASE, None))
    }
}

/// Pull the worker collection out of any of the envelope vintages:
/// `{getuserworkers:{data:{miners|workers:…}}}`, `{data:{workers:…}}`,
/// `{workers:…}` or `{data:…}` — each either an array or a name-keyed map.
fn extract_workers(json: &Value) -> Option<Vec<Observation>> {
    const PATHS: [&str; 5] = [
        "/getuserworkers/data/miners",
        "/getuserworkers/data/workers",
        "/data/workers",
        "/workers",
        "/data",
    ];
    let collection = PATHS
        .iter()
        .filter_map(|p| json.pointer(p))
        .find(|v| v.is_array() || v.is_object())?;

    let mut observations = Vec::new();
    match collection {
        Value::Array(entries) => {
            for entry in entries {
                if let Some(obs) = observation_from(None, entry) {
                    observations.push(obs);
                }
            }
        }
        Value::Object(map) => {
            for (key, entry) in map {
                if let Some(obs) = observation_from(Some(key.as_str()), entry) {
                    observations.push(obs);
                }
            }
        }
        _ => return None,
    }
    Some(observations)
}

fn observation_from(key: Option<&str>, entry: &Value) -> Option<Observation> {
    let name = entry
        .get("worker")
        .or_else(|| entry.get("name"))
        .or_else(|| entry.get("username"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| key.map(str::to_string))?;

    Some(Observation {
        name,
        hashrate: ["hashrate", "hash_rate", "khs"]
            .iter()
            .filter_map(|f| entry.get(f))
            .find_map(json_num)
            .unwrap_or(0.0),
        alive_hint: ["alive", "active"]
            .iter()
            .filter_map(|f| entry.get(f))
            .find_map(json_num),
        status_text: entry.get("status").and_then(Value::as_str).map(str::to_string),
        ..Default::default()
    })
}
