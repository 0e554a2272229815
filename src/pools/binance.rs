//! Binance Pool adapter.
//!
//! The only signed-request pool: every mining query carries a millisecond
//! timestamp and an HMAC-SHA-256 signature over the encoded query string.
//! Binance serves several interchangeable API hosts and answers HTTP 451
//! from geoblocked regions, so the adapter probes for a reachable base
//! before its first listing call and remembers the winner.

use super::{FailReason, Observation, PoolAdapter, PoolGroup, PoolKind, WorkerFetch};
use crate::http::{json_num, PoolHttp};
use crate::names;
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

const DEFAULT_BASES: [&str; 4] = [
    "https://api.binance.com",
    "https://api1.binance.com",
    "https://api2.binance.com",
    "https://api3.binance.com",
];
const TIMEOUT: Duration = Duration::from_secs(12);
const PAGE_SIZE: usize = 200;
const RECV_WINDOW_MS: u64 = 30_000;
/// Binance's own code for a request timestamp outside `recvWindow`.
const CODE_CLOCK_SKEW: i64 = -1021;

pub struct BinanceAdapter {
    http: PoolHttp,
    base_override: Option<String>,
    cached_base: RwLock<Option<String>>,
}

/// Internal error for one signed call; folded into [`FailReason`] at the
/// adapter boundary.
enum CallError {
    Transport(String),
    Status(u16, String),
    Logical(String, String),
    Schema(String),
}

impl CallError {
    fn into_fetch(self, endpoint: String) -> WorkerFetch {
        match self {
            CallError::Transport(diag) => {
                WorkerFetch::failed(FailReason::Transport, endpoint, Some(diag))
            }
            CallError::Status(status, diag) => {
                WorkerFetch::failed(FailReason::from_status(status), endpoint, Some(diag))
            }
            CallError::Logical(code, diag) => {
                WorkerFetch::failed(FailReason::Logical(code), endpoint, Some(diag))
            }
            CallError::Schema(diag) => {
                WorkerFetch::failed(FailReason::Schema, endpoint, Some(diag))
            }
        }
    }
}

impl BinanceAdapter {
    pub fn new(base_override: Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            http: PoolHttp::new(TIMEOUT)?,
            base_override,
            cached_base: RwLock::new(None),
        })
    }

    fn base_candidates(&self) -> Vec<String> {
        let mut bases: Vec<String> = Vec::new();
        if let Some(override_base) = &self.base_override {
            bases.push(override_base.trim_end_matches('/').to_string());
        }
        bases.extend(DEFAULT_BASES.iter().map(|b| b.to_string()));
        bases
    }

    /// Probe the candidate hosts with `exchangeInfo`; first 2xx wins.
    /// 451 means this edge is geoblocked — move on. When no candidate
    /// answers, the whole pool is treated as unreachable-by-policy and the
    /// engine must not conclude anything about the miners.
    async fn resolve_base(&self) -> Result<String, FailReason> {
        if let Some(base) = self.cached_base.read().await.clone() {
            return Ok(base);
        }

        for base in self.base_candidates() {
            let url = format!("{base}/api/v3/exchangeInfo");
            match self.http.get(&url, &[]).await {
                Ok(capture) if capture.is_success() => {
                    debug!(base = %base, "selected binance api base");
                    *self.cached_base.write().await = Some(base.clone());
                    return Ok(base);
                }
                Ok(capture) => {
                    debug!(base = %base, status = capture.status, "binance base rejected");
                }
                Err(t) => {
                    debug!(base = %base, error = %t.detail, "binance base unreachable");
                }
            }
        }
        Err(FailReason::Geoblocked)
    }

    /// One signed GET, with a single clock-skew retry: on code −1021 the
    /// server clock is fetched and the timestamp re-based.
    async fn signed_get(
        &self,
        base: &str,
        path: &str,
        params: &[(&str, String)],
        secret: &str,
        api_key: &str,
    ) -> Result<Value, CallError> {
        let mut offset_ms: i64 = 0;
        for attempt in 0..2 {
            let timestamp = Utc::now().timestamp_millis() + offset_ms;
            let mut query = params
                .iter()
                .map(|(k, v)| format!("{k}={}", urlencode(v)))
                .collect::<Vec<_>>()
                .join("&");
            query.push_str(&format!("&timestamp={timestamp}&recvWindow={RECV_WINDOW_MS}"));
            let signature = sign_query(&query, secret);
            let url = format!("{base}{path}?{query}&signature={signature}");

            let capture = self
                .http
                .get(&url, &[("X-MBX-APIKEY", api_key.to_string())])
                .await
                .map_err(|t| CallError::Transport(t.detail))?;

            // The skew code arrives inside an HTTP 400 body, so the payload
            // code is inspected before the status verdict.
            let code = capture
                .json()
                .as_ref()
                .and_then(|j| j.get("code"))
                .and_then(Value::as_i64);
            if code == Some(CODE_CLOCK_SKEW) && attempt == 0 {
                offset_ms = self.server_clock_offset(base).await.unwrap_or(0);
                debug!(offset_ms, "binance clock skew, re-basing timestamp");
                continue;
            }

            if !capture.is_success() {
                return Err(CallError::Status(capture.status, capture.body_prefix()));
            }
            let json = capture
                .json()
                .ok_or_else(|| CallError::Schema(capture.body_prefix()))?;
            return match code {
                Some(c) if c != 0 => {
                    Err(CallError::Logical(c.to_string(), capture.body_prefix()))
                }
                _ => Ok(json),
            };
        }
        unreachable!("signed_get always returns within two attempts")
    }

    async fn server_clock_offset(&self, base: &str) -> Option<i64> {
        let url = format!("{base}/api/v3/time");
        let capture = self.http.get(&url, &[]).await.ok()?;
        let server_ms = capture.json()?.get("serverTime").and_then(Value::as_i64)?;
        Some(server_ms - Utc::now().timestamp_millis())
    }

    /// Per-worker detail fallback for miners the paged listing missed.
    async fn fetch_detail(
        &self,
        base: &str,
        algo: &str,
        group: &PoolGroup,
        worker_tail: &str,
    ) -> Option<Observation> {
        let params = [
            ("algo", algo.to_string()),
            ("userName", group.account.clone()),
            ("workerName", worker_tail.to_string()),
        ];
        let secret = group.secret_key.as_deref()?;
        let json = self
            .signed_get(base, "/sapi/v1/mining/worker/detail", &params, secret, &group.api_key)
            .await
            .ok()?;

        // The detail payload nests the worker under `data`; accept either a
        // bare object or the first element of an array.
        let data = json.get("data")?;
        let entry = match data {
            Value::Array(items) => items.first()?,
            other => other,
        };
        let obs = observation_from(entry)?;
        Some(Observation {
            name: if obs.name.is_empty() {
                worker_tail.to_string()
            } else {
                obs.name
            },
            ..obs
        })
    }
}

fn algo_for(coin: &str) -> Option<&'static str> {
    match coin.to_uppercase().as_str() {
        "BTC" => Some("sha256"),
        "LTC" => Some("scrypt"),
        "KAS" | "KASPA" => Some("kHeavyHash"),
        _ => None,
    }
}

fn sign_query(query: &str, secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(query.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Minimal query-component encoding; worker account names are the only
/// caller-supplied values and stay within the unreserved set in practice.
fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

fn observation_from(entry: &Value) -> Option<Observation> {
    let name = entry
        .get("workerName")
        .or_else(|| entry.get("worker_name"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if name.is_empty() && entry.get("hashRate").is_none() {
        return None;
    }

    let status = entry.get("status").and_then(Value::as_i64);
    Some(Observation {
        name,
        hashrate: entry.get("hashRate").and_then(json_num).unwrap_or(0.0),
        // Status 1 is Binance's "valid" worker state; any other state says
        // nothing on its own, the rate decides.
        alive_hint: match status {
            Some(1) => Some(1.0),
            _ => None,
        },
        ..Default::default()
    })
}

fn parse_page(json: &Value) -> Result<Vec<Observation>, String> {
    let entries = json
        .pointer("/data/workerDatas")
        .or_else(|| json.pointer("/data/workers"))
        .and_then(Value::as_array)
        .ok_or_else(|| "missing data.workerDatas".to_string())?;
    Ok(entries.iter().filter_map(observation_from).collect())
}

#[async_trait]
impl PoolAdapter for BinanceAdapter {
    fn kind(&self) -> PoolKind {
        PoolKind::Binance
    }

    fn needs_secret_key(&self) -> bool {
        true
    }

    async fn list_workers(&self, group: &PoolGroup) -> WorkerFetch {
        if group.api_key.is_empty() {
            return WorkerFetch::failed(FailReason::MissingCredential("api_key"), "", None);
        }
        let Some(secret) = group.secret_key.clone().filter(|s| !s.is_empty()) else {
            return WorkerFetch::failed(FailReason::MissingCredential("secret_key"), "", None);
        };
        let Some(algo) = algo_for(&group.coin) else {
            return WorkerFetch::failed(
                FailReason::Logical(format!("unsupported_coin:{}", group.coin)),
                "",
                None,
            );
        };

        let base = match self.resolve_base().await {
            Ok(base) => base,
            Err(reason) => return WorkerFetch::failed(reason, "", None),
        };
        let endpoint = format!("{base}/sapi/v1/mining/worker/list");

        let mut observations: Vec<Observation> = Vec::new();
        let mut page_index = 1u32;
        loop {
            let params = [
                ("algo", algo.to_string()),
                ("userName", group.account.clone()),
                ("pageIndex", page_index.to_string()),
                ("sort", "0".to_string()),
                ("pageSize", PAGE_SIZE.to_string()),
            ];
            let json = match self
                .signed_get(&base, "/sapi/v1/mining/worker/list", &params, &secret, &group.api_key)
                .await
            {
                Ok(json) => json,
                Err(e) => {
                    // Forget the base on transport trouble so the next tick
                    // re-probes the host list.
                    if matches!(e, CallError::Transport(_)) {
                        *self.cached_base.write().await = None;
                    }
                    return e.into_fetch(endpoint);
                }
            };

            let page = match parse_page(&json) {
                Ok(page) => page,
                Err(diag) => {
                    return WorkerFetch::failed(FailReason::Schema, endpoint, Some(diag))
                }
            };
            let page_len = page.len();
            observations.extend(page);
            if page_len < PAGE_SIZE {
                break;
            }
            page_index += 1;
        }

        // Workers the listing never mentioned (fresh or renamed rigs) are
        // looked up one by one before the engine calls them unmatched.
        let seen: HashSet<String> = observations.iter().map(|o| names::tail(&o.name)).collect();
        let seen_keys: HashSet<String> =
            observations.iter().map(|o| names::tail_key(&o.name)).collect();
        for tail in &group.expected_tails {
            if seen.contains(&names::tail(tail)) || seen_keys.contains(&names::tail_key(tail)) {
                continue;
            }
            if let Some(obs) = self.fetch_detail(&base, algo, group, tail).await {
                observations.push(obs);
            }
        }

        WorkerFetch::workers(observations, endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn algo_mapping() {
        assert_eq!(algo_for("btc"), Some("sha256"));
        assert_eq!(algo_for("LTC"), Some("scrypt"));
        assert_eq!(algo_for("KASPA"), Some("kHeavyHash"));
        assert_eq!(algo_for("ETH"), None);
    }

    #[test]
    fn signature_is_stable_hmac_sha256() {
        // Reference vector produced with the Binance docs example key.
        let signed = sign_query(
            "symbol=LTCBTC&timestamp=1499827319559",
            "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j",
        );
        assert_eq!(signed.len(), 64);
        assert!(signed.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn urlencode_escapes_reserved() {
        assert_eq!(urlencode("acct_01"), "acct_01");
        assert_eq!(urlencode("a b&c"), "a%20b%26c");
    }

    #[test]
    fn page_parse_maps_status_and_rate() {
        let payload = json!({
            "code": 0,
            "data": {"workerDatas": [
                {"workerName": "worker001", "hashRate": 5.0e13, "status": 1},
                {"workerName": "worker002", "hashRate": 0, "status": 2},
                {"workerName": "worker003", "hashRate": 0, "status": 1}
            ], "totalNum": 3}
        });
        let workers = parse_page(&payload).unwrap();
        let now = Utc::now();
        assert!(workers[0].is_online(now));
        assert!(!workers[1].is_online(now));
        // status 1 alone keeps a momentarily idle worker online
        assert!(workers[2].is_online(now));
    }

    #[test]
    fn page_parse_rejects_foreign_shape() {
        assert!(parse_page(&json!({"code": 0, "data": {}})).is_err());
    }
}
