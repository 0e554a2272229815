//! Pool-adapter framework.
//!
//! Every supported pool exposes one operation: list the workers of an
//! account as uniform [`Observation`] values. Adapters never error across
//! this boundary; a [`WorkerFetch`] carries either an authoritative worker
//! list or a typed failure reason, and the reconciliation engine treats the
//! two very differently (a failed fetch must never mark a miner offline).

pub mod binance;
pub mod f2pool;
pub mod litecoinpool;
pub mod miningdutch;
pub mod viabtc;

use crate::names;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Labels pools use for a hashing worker, across the dashboards we consume
/// (including the Portuguese labels MiningDutch tenants configure).
pub const POSITIVE_LABELS: [&str; 11] = [
    "active", "online", "alive", "running", "up", "ok", "connected", "working", "ativo",
    "ligado", "ativa",
];

/// Labels that force a worker offline even when hashrate is unknown.
pub const NEGATIVE_LABELS: [&str; 8] = [
    "unactive", "inactive", "offline", "down", "dead", "parado", "desligado", "inativa",
];

/// A worker that reported a share within this window is considered alive
/// even at zero instantaneous hashrate (F2Pool-style last-share signal).
pub const LAST_SHARE_WINDOW_MIN: i64 = 90;

/// The pools this service knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
    ViaBtc,
    LiteCoinPool,
    MiningDutch,
    F2Pool,
    Binance,
}

impl PoolKind {
    pub const ALL: [PoolKind; 5] = [
        PoolKind::ViaBtc,
        PoolKind::LiteCoinPool,
        PoolKind::MiningDutch,
        PoolKind::F2Pool,
        PoolKind::Binance,
    ];

    /// Case-insensitive exact match on the stored pool tag.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "viabtc" => Some(PoolKind::ViaBtc),
            "litecoinpool" => Some(PoolKind::LiteCoinPool),
            "miningdutch" => Some(PoolKind::MiningDutch),
            "f2pool" => Some(PoolKind::F2Pool),
            "binance" => Some(PoolKind::Binance),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PoolKind::ViaBtc => "viabtc",
            PoolKind::LiteCoinPool => "litecoinpool",
            PoolKind::MiningDutch => "miningdutch",
            PoolKind::F2Pool => "f2pool",
            PoolKind::Binance => "binance",
        }
    }
}

impl std::fmt::Display for PoolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform worker fact normalised out of a pool payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observation {
    /// Pool-reported identifier; bare suffix or fully-qualified.
    pub name: String,
    /// Pool-native units; the engine only ever tests `> 0`.
    pub hashrate: f64,
    /// Optional liveness signal (`alive` fields and the like).
    pub alive_hint: Option<f64>,
    /// Optional free-form status label.
    pub status_text: Option<String>,
    /// Optional epoch-ms of the worker's last accepted share.
    pub last_share_ms: Option<i64>,
}

impl Observation {
    /// The shared online rule: a negative label forces offline; otherwise
    /// any one positive signal is enough.
    pub fn is_online(&self, now: DateTime<Utc>) -> bool {
        if let Some(label) = &self.status_text {
            let folded = label.trim().to_lowercase();
            if NEGATIVE_LABELS.contains(&folded.as_str()) {
                return false;
            }
            if POSITIVE_LABELS.contains(&folded.as_str()) {
                return true;
            }
        }
        if self.hashrate > 0.0 {
            return true;
        }
        if self.alive_hint.unwrap_or(0.0) > 0.0 {
            return true;
        }
        if let Some(ms) = self.last_share_ms {
            if ms > 0 {
                let age_min = (now.timestamp_millis() - ms) / 60_000;
                return age_min < LAST_SHARE_WINDOW_MIN;
            }
        }
        false
    }
}

/// Why a fetch came back without workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailReason {
    /// Connect/abort/timeout after the retry budget.
    Transport,
    /// Non-2xx final status.
    Http(u16),
    /// 2xx envelope carrying a pool-defined error code.
    Logical(String),
    /// Payload did not match any shape the adapter tolerates.
    Schema,
    /// Every Binance base host answered 451.
    Geoblocked,
    /// 401/403 — credentials rejected; never a miner-offline signal.
    Auth,
    /// The group is missing a credential this pool requires.
    MissingCredential(&'static str),
}

impl FailReason {
    pub fn code(&self) -> String {
        match self {
            FailReason::Transport => "transport".to_string(),
            FailReason::Http(status) => format!("http:{status}"),
            FailReason::Logical(code) => format!("logical:{code}"),
            FailReason::Schema => "schema".to_string(),
            FailReason::Geoblocked => "geoblocked".to_string(),
            FailReason::Auth => "auth".to_string(),
            FailReason::MissingCredential(which) => format!("missing_credential:{which}"),
        }
    }

    /// Map a final HTTP status onto the taxonomy.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => FailReason::Auth,
            s => FailReason::Http(s),
        }
    }
}

/// Outcome of one `list_workers` call.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The pool authoritatively reported these workers (possibly none).
    Workers(Vec<Observation>),
    Failed(FailReason),
}

/// What an adapter hands back to the engine.
#[derive(Debug, Clone)]
pub struct WorkerFetch {
    pub outcome: FetchOutcome,
    /// Endpoint the decisive request went to, for logs.
    pub endpoint: String,
    /// Response fragment / transport detail for diagnostics.
    pub diag: Option<String>,
}

impl WorkerFetch {
    pub fn workers(observations: Vec<Observation>, endpoint: impl Into<String>) -> Self {
        Self {
            outcome: FetchOutcome::Workers(observations),
            endpoint: endpoint.into(),
            diag: None,
        }
    }

    pub fn failed(
        reason: FailReason,
        endpoint: impl Into<String>,
        diag: impl Into<Option<String>>,
    ) -> Self {
        Self {
            outcome: FetchOutcome::Failed(reason),
            endpoint: endpoint.into(),
            diag: diag.into(),
        }
    }
}

/// One API call's worth of miners: the grouping tuple of §4.6 plus the
/// worker tails the engine expects, which Binance uses for its
/// worker-detail fallback.
#[derive(Debug, Clone, Default)]
pub struct PoolGroup {
    pub account: String,
    pub coin: String,
    pub api_key: String,
    pub secret_key: Option<String>,
    pub expected_tails: Vec<String>,
}

/// How a pool's miners collapse into API-call groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    /// One call per (api_key, secret_key, account, coin).
    AccountCoin,
    /// Single-tenant key: one call per api_key.
    ApiKey,
}

#[async_trait]
pub trait PoolAdapter: Send + Sync {
    fn kind(&self) -> PoolKind;

    /// Whether this pool signs requests and therefore needs `secret_key`.
    fn needs_secret_key(&self) -> bool {
        false
    }

    fn group_by(&self) -> GroupBy {
        GroupBy::AccountCoin
    }

    /// Pools whose instantaneous listing is noisy enough that the engine
    /// should poll a second time before trusting an offline classification.
    fn double_checks_offline(&self) -> bool {
        false
    }

    async fn list_workers(&self, group: &PoolGroup) -> WorkerFetch;
}

/// Dispatch table from pool tag to adapter.
pub struct AdapterRegistry {
    adapters: HashMap<PoolKind, Arc<dyn PoolAdapter>>,
}

impl AdapterRegistry {
    /// The production set: all five adapters with their native timeouts.
    pub fn standard(binance_base: Option<String>) -> anyhow::Result<Self> {
        let adapters: Vec<Arc<dyn PoolAdapter>> = vec![
            Arc::new(viabtc::ViaBtcAdapter::new()?),
            Arc::new(litecoinpool::LiteCoinPoolAdapter::new()?),
            Arc::new(miningdutch::MiningDutchAdapter::new()?),
            Arc::new(f2pool::F2PoolAdapter::new()?),
            Arc::new(binance::BinanceAdapter::new(binance_base)?),
        ];
        Ok(Self::from_adapters(adapters))
    }

    /// Assemble a registry from explicit adapters (tests inject stubs here).
    pub fn from_adapters(adapters: Vec<Arc<dyn PoolAdapter>>) -> Self {
        Self {
            adapters: adapters.into_iter().map(|a| (a.kind(), a)).collect(),
        }
    }

    pub fn resolve(&self, pool: &str) -> Option<Arc<dyn PoolAdapter>> {
        self.adapters.get(&PoolKind::parse(pool)?).cloned()
    }

    pub fn get(&self, kind: PoolKind) -> Option<Arc<dyn PoolAdapter>> {
        self.adapters.get(&kind).cloned()
    }
}

/// Observation lookup by worker tail, with the folded-zero key as fallback.
pub struct ObservationIndex {
    observations: Vec<Observation>,
    by_tail: HashMap<String, usize>,
    by_key: HashMap<String, usize>,
}

impl ObservationIndex {
    pub fn build(observations: Vec<Observation>) -> Self {
        let mut by_tail = HashMap::new();
        let mut by_key = HashMap::new();
        for (i, obs) in observations.iter().enumerate() {
            by_tail.entry(names::tail(&obs.name)).or_insert(i);
            by_key.entry(names::tail_key(&obs.name)).or_insert(i);
        }
        Self {
            observations,
            by_tail,
            by_key,
        }
    }

    /// Exact tail match first, folded key as tiebreaker.
    pub fn lookup(&self, worker_name: &str) -> Option<&Observation> {
        let idx = self
            .by_tail
            .get(&names::tail(worker_name))
            .or_else(|| self.by_key.get(&names::tail_key(worker_name)))?;
        self.observations.get(*idx)
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}
