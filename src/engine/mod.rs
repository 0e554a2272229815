//! Uptime reconciliation engine.
//!
//! One tick per pool per quarter-hour slot: load the pool's miners, group
//! them into API calls, ask the adapter what each worker is doing, and
//! turn the answers into hours credits and lifecycle transitions.
//!
//! The engine is deliberately asymmetric about failure. Billing is
//! generous: a miner recently seen online keeps its quarter-hour credit
//! through a pool outage (GRACE). Status is strict: flipping a miner to
//! `offline` takes two consecutive slots of live adapter responses saying
//! so, and an adapter failure can never flip anything.

pub mod slot_coordinator;

pub use slot_coordinator::SlotCoordinator;

use crate::config::UptimeConfig;
use crate::names;
use crate::persistence::{KvStore, MinerRecord, MinerStore};
use crate::pools::{
    AdapterRegistry, FetchOutcome, GroupBy, ObservationIndex, PoolAdapter, PoolGroup, PoolKind,
};
use crate::slot::{Slot, SLOT_MINUTES};
use anyhow::{Context, Result};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Side-state (last-online markers, offline candidates) lives a week.
const SIDE_STATE_TTL_SECS: u64 = 7 * 24 * 3600;

fn lock_key(slot: Slot, pool: PoolKind) -> String {
    format!("uptime:{}:{}", slot.iso(), pool)
}

fn last_online_key(pool: PoolKind, id: &str) -> String {
    format!("uptime:lastOnline:{pool}:{id}")
}

fn candidate_key(pool: PoolKind, id: &str) -> String {
    format!("uptime:lastOfflineCandidate:{pool}:{id}")
}

/// What one tick did, for the log line and the `tick` command output.
#[derive(Debug, Serialize)]
pub struct TickReport {
    pub pool: String,
    pub slot: String,
    /// Set when the tick did nothing (lock held elsewhere).
    pub skipped: Option<String>,
    pub groups: usize,
    pub miners: usize,
    pub credited: usize,
    pub marked_online: usize,
    pub marked_offline: usize,
    pub failed_groups: usize,
}

impl TickReport {
    fn skipped(pool: PoolKind, slot: Slot, reason: &str) -> Self {
        Self {
            pool: pool.to_string(),
            slot: slot.iso(),
            skipped: Some(reason.to_string()),
            groups: 0,
            miners: 0,
            credited: 0,
            marked_online: 0,
            marked_offline: 0,
            failed_groups: 0,
        }
    }
}

#[derive(Debug, Default)]
struct GroupOutcome {
    credited: usize,
    marked_online: usize,
    marked_offline: usize,
    failed: bool,
}

pub struct UptimeEngine {
    store: Arc<dyn MinerStore>,
    kv: Arc<dyn KvStore>,
    registry: Arc<AdapterRegistry>,
    coordinator: SlotCoordinator,
    config: UptimeConfig,
}

impl UptimeEngine {
    pub fn new(
        store: Arc<dyn MinerStore>,
        kv: Arc<dyn KvStore>,
        registry: Arc<AdapterRegistry>,
        config: UptimeConfig,
    ) -> Self {
        Self {
            store,
            kv,
            registry,
            coordinator: SlotCoordinator::new(),
            config,
        }
    }

    /// Run one reconciliation pass for the current slot.
    pub async fn run_tick(&self, pool: PoolKind) -> Result<TickReport> {
        self.run_tick_at(pool, Slot::current()).await
    }

    /// Run one reconciliation pass for an explicit slot.
    pub async fn run_tick_at(&self, pool: PoolKind, slot: Slot) -> Result<TickReport> {
        let adapter = self
            .registry
            .get(pool)
            .with_context(|| format!("no adapter registered for pool {pool}"))?;

        let lock_ttl = self.config.lock_ttl_minutes * 60;
        let acquired = self
            .kv
            .set(&lock_key(slot, pool), "1", true, Some(lock_ttl))
            .await
            .context("acquire slot lock")?;
        if !acquired {
            info!(pool = %pool, slot = %slot.iso(), "slot already claimed, skipping tick");
            return Ok(TickReport::skipped(pool, slot, "slot_locked"));
        }

        let mut miners = self
            .store
            .candidates(pool.as_str(), adapter.needs_secret_key())
            .await
            .context("load candidate miners")?;
        // Maintenance rows are invisible to the engine: no mutation, no
        // side-state churn.
        miners.retain(|m| !m.is_maintenance());
        let miner_count = miners.len();

        let groups = group_miners(adapter.as_ref(), miners);
        let group_count = groups.len();
        info!(
            pool = %pool,
            slot = %slot.iso(),
            miners = miner_count,
            groups = group_count,
            "starting uptime tick"
        );

        let outcomes: Vec<GroupOutcome> = stream::iter(groups)
            .map(|(group, members)| {
                let adapter = adapter.clone();
                async move { self.process_group(slot, pool, adapter, group, members).await }
            })
            .buffer_unordered(self.config.group_concurrency.max(1))
            .collect()
            .await;

        let report = TickReport {
            pool: pool.to_string(),
            slot: slot.iso(),
            skipped: None,
            groups: group_count,
            miners: miner_count,
            credited: outcomes.iter().map(|o| o.credited).sum(),
            marked_online: outcomes.iter().map(|o| o.marked_online).sum(),
            marked_offline: outcomes.iter().map(|o| o.marked_offline).sum(),
            failed_groups: outcomes.iter().filter(|o| o.failed).count(),
        };
        info!(
            pool = %pool,
            slot = %report.slot,
            credited = report.credited,
            marked_online = report.marked_online,
            marked_offline = report.marked_offline,
            failed_groups = report.failed_groups,
            "uptime tick finished"
        );
        Ok(report)
    }

    async fn process_group(
        &self,
        slot: Slot,
        pool: PoolKind,
        adapter: Arc<dyn PoolAdapter>,
        group: PoolGroup,
        members: Vec<MinerRecord>,
    ) -> GroupOutcome {
        let verbose = self
            .config
            .debug_pools
            .iter()
            .any(|p| p.eq_ignore_ascii_case(pool.as_str()));

        let fetch = adapter.list_workers(&group).await;
        let result = match fetch.outcome {
            FetchOutcome::Failed(reason) => {
                warn!(
                    pool = %pool,
                    account = %group.account,
                    coin = %group.coin,
                    reason = %reason.code(),
                    endpoint = %fetch.endpoint,
                    "adapter failure, applying billing grace only"
                );
                if let Some(diag) = &fetch.diag {
                    if verbose {
                        info!(pool = %pool, diag = %diag, "adapter diagnostics");
                    } else {
                        debug!(pool = %pool, diag = %diag, "adapter diagnostics");
                    }
                }
                self.api_failure_branch(slot, pool, &members).await
            }
            FetchOutcome::Workers(observations) => {
                debug!(
                    pool = %pool,
                    account = %group.account,
                    workers = observations.len(),
                    "adapter reported workers"
                );
                self.observation_branch(slot, pool, &adapter, &group, &members, observations)
                    .await
            }
        };

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    pool = %pool,
                    account = %group.account,
                    error = %format!("{e:#}"),
                    "group reconciliation failed"
                );
                GroupOutcome {
                    failed: true,
                    ..Default::default()
                }
            }
        }
    }

    /// Live adapter answer: classify each miner and drive the confirmation
    /// state machine.
    async fn observation_branch(
        &self,
        slot: Slot,
        pool: PoolKind,
        adapter: &Arc<dyn PoolAdapter>,
        group: &PoolGroup,
        members: &[MinerRecord],
        observations: Vec<crate::pools::Observation>,
    ) -> Result<GroupOutcome> {
        let now = Utc::now();
        let index = ObservationIndex::build(observations);

        let mut online: Vec<&MinerRecord> = Vec::new();
        let mut offline: Vec<&MinerRecord> = Vec::new();
        let mut unmatched: Vec<&MinerRecord> = Vec::new();
        for m in members {
            match index.lookup(&m.worker_name) {
                Some(obs) if obs.is_online(now) => online.push(m),
                Some(_) => offline.push(m),
                None => unmatched.push(m),
            }
        }

        // Noisy pools get one re-poll before an offline reading sticks;
        // online in either answer counts as online.
        if !offline.is_empty() && adapter.double_checks_offline() {
            let second = adapter.list_workers(group).await;
            if let FetchOutcome::Workers(second_obs) = second.outcome {
                let second_index = ObservationIndex::build(second_obs);
                let (rescued, still_offline): (Vec<_>, Vec<_>) =
                    offline.into_iter().partition(|m| {
                        second_index
                            .lookup(&m.worker_name)
                            .map(|obs| obs.is_online(now))
                            .unwrap_or(false)
                    });
                if !rescued.is_empty() {
                    debug!(pool = %pool, rescued = rescued.len(), "re-poll rescued workers");
                }
                online.extend(rescued);
                offline = still_offline;
            }
        }

        let mut credit: Vec<String> = Vec::new();
        let mut to_online: Vec<String> = Vec::new();
        let mut to_offline: Vec<String> = Vec::new();

        for m in online {
            credit.push(m.id.clone());
            if m.status_folded() != "online" {
                to_online.push(m.id.clone());
            }
            self.kv
                .set(
                    &last_online_key(pool, &m.id),
                    &slot.iso(),
                    false,
                    Some(SIDE_STATE_TTL_SECS),
                )
                .await?;
            self.kv.del(&candidate_key(pool, &m.id)).await?;
        }

        for m in offline {
            if m.status_folded() == "offline" {
                // Nothing to confirm; drop any stale candidate.
                self.kv.del(&candidate_key(pool, &m.id)).await?;
                continue;
            }
            let key = candidate_key(pool, &m.id);
            match self.kv.get(&key).await?.as_deref().and_then(Slot::parse) {
                Some(candidate) if self.confirms_offline(candidate, slot) => {
                    to_offline.push(m.id.clone());
                    self.kv.del(&key).await?;
                    self.kv.del(&last_online_key(pool, &m.id)).await?;
                }
                Some(_) => {
                    // Candidate pending; billing stays on grace.
                    if self.grace_eligible(slot, pool, m).await? {
                        credit.push(m.id.clone());
                    }
                }
                None => {
                    // First offline sighting (or an unreadable marker):
                    // start the confirmation window.
                    self.kv
                        .set(&key, &slot.iso(), false, Some(SIDE_STATE_TTL_SECS))
                        .await?;
                    if self.grace_eligible(slot, pool, m).await? {
                        credit.push(m.id.clone());
                    }
                }
            }
        }

        // The pool not knowing the worker at all is inconclusive: bill
        // under grace, never touch status.
        for m in unmatched {
            if self.grace_eligible(slot, pool, m).await? {
                credit.push(m.id.clone());
            }
        }

        self.apply(slot, credit, to_online, to_offline, false).await
    }

    /// Group-wide API failure: billing grace only, status untouched.
    async fn api_failure_branch(
        &self,
        slot: Slot,
        pool: PoolKind,
        members: &[MinerRecord],
    ) -> Result<GroupOutcome> {
        let mut credit = Vec::new();
        for m in members {
            if self.grace_eligible(slot, pool, m).await? {
                credit.push(m.id.clone());
            }
        }
        self.apply(slot, credit, Vec::new(), Vec::new(), true).await
    }

    fn confirms_offline(&self, candidate: Slot, slot: Slot) -> bool {
        confirms_offline(candidate, slot, self.config.offline_confirm_minutes)
    }

    /// Billing grace: the stored status says online, or the miner was
    /// confirmed online within the grace window.
    async fn grace_eligible(&self, slot: Slot, pool: PoolKind, m: &MinerRecord) -> Result<bool> {
        if m.status_folded() == "online" {
            return Ok(true);
        }
        let Some(iso) = self.kv.get(&last_online_key(pool, &m.id)).await? else {
            return Ok(false);
        };
        let Some(last_online) = Slot::parse(&iso) else {
            return Ok(false);
        };
        Ok(slot.minutes_since(last_online) <= self.config.grace_minutes)
    }

    /// Hours before status, so a miner going offline still collects the
    /// slot in which it first disappeared.
    async fn apply(
        &self,
        slot: Slot,
        credit: Vec<String>,
        to_online: Vec<String>,
        to_offline: Vec<String>,
        failed: bool,
    ) -> Result<GroupOutcome> {
        let claimed = self.coordinator.claim(slot, credit).await;
        let credited = self.store.increment_hours(&claimed).await? as usize;
        let marked_online = self.store.set_status(&to_online, "online").await?.len();
        let marked_offline = self.store.set_status(&to_offline, "offline").await?.len();
        Ok(GroupOutcome {
            credited,
            marked_online,
            marked_offline,
            failed,
        })
    }
}

/// A candidate from an earlier slot confirms once the covered downtime
/// (candidate slot start through the current slot's end) reaches the
/// confirmation window — with 15-minute slots and the 30-minute default
/// that is exactly two consecutive offline slots.
fn confirms_offline(candidate: Slot, slot: Slot, confirm_minutes: i64) -> bool {
    let elapsed = slot.minutes_since(candidate);
    elapsed > 0 && elapsed + SLOT_MINUTES >= confirm_minutes
}

/// Collapse miners into one-API-call groups.
fn group_miners(
    adapter: &dyn PoolAdapter,
    miners: Vec<MinerRecord>,
) -> Vec<(PoolGroup, Vec<MinerRecord>)> {
    let mut buckets: HashMap<(String, String, String, String), Vec<MinerRecord>> = HashMap::new();
    for m in miners {
        let api_key = m.api_key.clone().unwrap_or_default();
        let key = match adapter.group_by() {
            GroupBy::ApiKey => (api_key, String::new(), String::new(), String::new()),
            GroupBy::AccountCoin => (
                api_key,
                m.secret_key.clone().unwrap_or_default(),
                names::head(&m.worker_name),
                m.coin.trim().to_uppercase(),
            ),
        };
        buckets.entry(key).or_default().push(m);
    }

    buckets
        .into_iter()
        .map(|((api_key, secret, account, coin), members)| {
            let group = PoolGroup {
                account,
                coin: if coin.is_empty() {
                    members[0].coin.trim().to_uppercase()
                } else {
                    coin
                },
                api_key,
                secret_key: (!secret.is_empty()).then_some(secret),
                expected_tails: members.iter().map(|m| names::tail(&m.worker_name)).collect(),
            };
            (group, members)
        })
        .collect()
}
