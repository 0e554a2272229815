//! F2Pool v2 adapter.

use super::{FailReason, Observation, PoolAdapter, PoolGroup, PoolKind, WorkerFetch};
use crate::http::{json_num, PoolHttp};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

const ENDPOINT: &str = "https://api.f2pool.com/v2/hash_rate/worker/list";
const TIMEOUT: Duration = Duration::from_secs(20);
const PAGE_SIZE: u32 = 200;

/// Epoch values below this are seconds, not milliseconds.
const EPOCH_MS_THRESHOLD: i64 = 100_000_000_000;

pub struct F2PoolAdapter {
    http: PoolHttp,
}

impl F2PoolAdapter {
    /// The F2Pool path is the one that breaks behind ambient proxy
    /// variables, so its client is built with proxies disabled.
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            http: PoolHttp::new_no_proxy(TIMEOUT)?,
        })
    }
}

/// Currency slugs F2Pool expects; anything unlisted is the lowered ticker.
fn currency_slug(coin: &str) -> String {
    match coin.to_uppercase().as_str() {
        "BTC" => "bitcoin".to_string(),
        "BCH" => "bitcoin-cash".to_string(),
        "BSV" => "bitcoin-sv".to_string(),
        "LTC" => "litecoin".to_string(),
        "KAS" => "kaspa".to_string(),
        "CFX" => "conflux".to_string(),
        "ETC" => "ethereum-classic".to_string(),
        "DASH" => "dash".to_string(),
        "SC" => "sia".to_string(),
        other => other.to_lowercase(),
    }
}

#[async_trait]
impl PoolAdapter for F2PoolAdapter {
    fn kind(&self) -> PoolKind {
        PoolKind::F2Pool
    }

    async fn list_workers(&self, group: &PoolGroup) -> WorkerFetch {
        if group.api_key.is_empty() {
            return WorkerFetch::failed(FailReason::MissingCredential("api_key"), ENDPOINT, None);
        }

        let body = json!({
            "currency": currency_slug(&group.coin),
            "mining_user_name": group.account,
            "page": 1,
            "size": PAGE_SIZE,
        });

        let capture = match self
            .http
            .post_json(ENDPOINT, &[("F2P-API-SECRET", group.api_key.clone())], &body)
            .await
        {
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

/// `code != 0` is a logical failure even on HTTP 200.
fn parse_workers(json: &Value) -> Result<Vec<Observation>, FailReason> {
    match json.get("code").and_then(Value::as_i64) {
        Some(0) => {}
        Some(code) => return Err(FailReason::Logical(code.to_string())),
        None => return Err(FailReason::Schema),
    }

    let entries = json
        .pointer("/data/workers")
        .or_else(|| json.get("workers"))
        .and_then(Value::as_array)
        .ok_or(FailReason::Schema)?;

    Ok(entries.iter().filter_map(observation_from).collect())
}

fn observation_from(entry: &Value) -> Option<Observation> {
    let info = entry.get("hash_rate_info");
    let name = info
        .and_then(|i| i.get("name"))
        .or_else(|| entry.get("name"))
        .or_else(|| entry.get("worker_name"))
        .and_then(Value::as_str)?
        .to_string();

    let hashrate = info
        .and_then(|i| i.get("hash_rate"))
        .and_then(json_num)
        .unwrap_or(0.0);

    let last_share_ms = entry
        .get("last_share_at")
        .and_then(json_num)
        .map(|raw| {
            let raw = raw as i64;
            if raw < EPOCH_MS_THRESHOLD {
                raw * 1000
            } else {
                raw
            }
        })
        .filter(|ms| *ms > 0);

    // An explicit status code of 1 marks the worker offline, but only when
    // it is not hashing; a live rate wins over a lagging flag.
    let status_text = match entry.get("status").and_then(Value::as_i64) {
        Some(1) if hashrate <= 0.0 => Some("offline".to_string()),
        _ => None,
    };

    Some(Observation {
        name,
        hashrate,
        status_text,
        last_share_ms,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn currency_slugs() {
        assert_eq!(currency_slug("BTC"), "bitcoin");
        assert_eq!(currency_slug("kas"), "kaspa");
        assert_eq!(currency_slug("ETC"), "ethereum-classic");
        assert_eq!(currency_slug("XMR"), "xmr");
    }

    #[test]
    fn parses_worker_list() {
        let now_s = Utc::now().timestamp();
        let payload = json!({
            "code": 0,
            "data": {"workers": [
                {"hash_rate_info": {"name": "worker001", "hash_rate": 9.5e12},
                 "last_share_at": now_s},
                {"hash_rate_info": {"name": "worker002", "hash_rate": 0},
                 "last_share_at": 0, "status": 1}
            ]}
        });
        let workers = parse_workers(&payload).unwrap();
        assert!(workers[0].is_online(Utc::now()));
        assert_eq!(workers[0].last_share_ms, Some(now_s * 1000));
        assert!(!workers[1].is_online(Utc::now()));
    }

    #[test]
    fn recent_share_keeps_idle_worker_online() {
        let ten_min_ago = Utc::now().timestamp() - 600;
        let payload = json!({
            "code": 0,
            "data": {"workers": [
                {"hash_rate_info": {"name": "w1", "hash_rate": 0}, "last_share_at": ten_min_ago}
            ]}
        });
        let workers = parse_workers(&payload).unwrap();
        assert!(workers[0].is_online(Utc::now()));
    }

    #[test]
    fn status_flag_loses_to_live_rate() {
        let payload = json!({
            "code": 0,
            "data": {"workers": [
                {"hash_rate_info": {"name": "w1", "hash_rate": 100.0}, "status": 1}
            ]}
        });
        let workers = parse_workers(&payload).unwrap();
        assert!(workers[0].is_online(Utc::now()));
    }

    #[test]
    fn nonzero_code_fails_even_at_200() {
        let payload = json!({"code": 20001, "msg": "user not exist"});
        assert_eq!(
            parse_workers(&payload),
            Err(FailReason::Logical("20001".to_string()))
        );
    }

    #[test]
    fn millisecond_timestamps_pass_through() {
        let now_ms = Utc::now().timestamp_millis();
        let payload = json!({
            "code": 0,
            "data": {"workers": [
                {"hash_rate_info": {"name": "w1", "hash_rate": 0}, "last_share_at": now_ms}
            ]}
        });
        let workers = parse_workers(&payload).unwrap();
        assert_eq!(workers[0].last_share_ms, Some(now_ms));
    }
}
