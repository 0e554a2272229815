//! End-to-end reconciliation scenarios against in-memory stores and a
//! scripted adapter: the confirmation state machine, billing grace,
//! maintenance immunity and per-slot deduplication.

mod common;

use chrono::{TimeZone, Utc};
use common::{failed, miner, offline_obs, ok, online_obs, MemoryMinerStore, ScriptedAdapter};
use poolwatch::config::UptimeConfig;
use poolwatch::{
    AdapterRegistry, FailReason, KvStore, MemoryKvStore, PoolKind, Slot, UptimeEngine,
};
use std::sync::Arc;

fn slot_at(h: u32, m: u32) -> Slot {
    Slot::containing(Utc.with_ymd_and_hms(2026, 8, 2, h, m, 0).unwrap())
}

fn engine_with(
    store: Arc<MemoryMinerStore>,
    kv: Arc<MemoryKvStore>,
    adapter: Arc<ScriptedAdapter>,
) -> UptimeEngine {
    UptimeEngine::new(
        store,
        kv,
        Arc::new(AdapterRegistry::from_adapters(vec![adapter])),
        UptimeConfig::default(),
    )
}

#[tokio::test]
async fn happy_path_credits_and_marks_last_online() {
    let store = Arc::new(MemoryMinerStore::new(vec![miner(
        "7", "viabtc", "acct.worker001", "online",
    )]));
    let kv = Arc::new(MemoryKvStore::new());
    let adapter = Arc::new(ScriptedAdapter::new(
        PoolKind::ViaBtc,
        vec![ok(vec![online_obs("acct.worker001", 50.0)])],
    ));
    let engine = engine_with(store.clone(), kv.clone(), adapter.clone());

    let slot = slot_at(10, 0);
    let report = engine.run_tick_at(PoolKind::ViaBtc, slot).await.unwrap();

    assert_eq!(report.credited, 1);
    assert_eq!(report.marked_online, 0);
    assert_eq!(report.marked_offline, 0);
    let m = store.get("7").await;
    assert_eq!(m.total_horas_online, Some(0.25));
    assert_eq!(m.status.as_deref(), Some("online"));
    assert_eq!(
        kv.get("uptime:lastOnline:viabtc:7").await.unwrap().as_deref(),
        Some(slot.iso().as_str())
    );
}

#[tokio::test]
async fn single_offline_blip_is_rescued_by_repoll() {
    let store = Arc::new(MemoryMinerStore::new(vec![miner(
        "7", "viabtc", "acct.worker001", "online",
    )]));
    let kv = Arc::new(MemoryKvStore::new());
    let adapter = Arc::new(
        ScriptedAdapter::new(
            PoolKind::ViaBtc,
            vec![
                ok(vec![offline_obs("acct.worker001")]),
                ok(vec![online_obs("acct.worker001", 40.0)]),
            ],
        )
        .with_double_check(),
    );
    let engine = engine_with(store.clone(), kv.clone(), adapter.clone());

    let report = engine
        .run_tick_at(PoolKind::ViaBtc, slot_at(10, 0))
        .await
        .unwrap();

    assert_eq!(adapter.call_count(), 2);
    assert_eq!(report.credited, 1);
    let m = store.get("7").await;
    assert_eq!(m.total_horas_online, Some(0.25));
    assert_eq!(m.status.as_deref(), Some("online"));
    // rescued: no offline candidate lingers
    assert_eq!(
        kv.get("uptime:lastOfflineCandidate:viabtc:7").await.unwrap(),
        None
    );
}

#[tokio::test]
async fn offline_confirms_only_across_two_slots() {
    let store = Arc::new(MemoryMinerStore::new(vec![miner(
        "7", "viabtc", "acct.worker001", "online",
    )]));
    let kv = Arc::new(MemoryKvStore::new());
    let adapter = Arc::new(ScriptedAdapter::new(
        PoolKind::ViaBtc,
        vec![
            ok(vec![offline_obs("acct.worker001")]), // slot 10:00
            ok(vec![offline_obs("acct.worker001")]), // slot 10:15
            ok(vec![offline_obs("acct.worker001")]), // slot 10:30
        ],
    ));
    let engine = engine_with(store.clone(), kv.clone(), adapter.clone());

    // First offline sighting: candidate set, grace credit, status intact.
    let report = engine
        .run_tick_at(PoolKind::ViaBtc, slot_at(10, 0))
        .await
        .unwrap();
    assert_eq!(report.credited, 1);
    assert_eq!(report.marked_offline, 0);
    let m = store.get("7").await;
    assert_eq!(m.status.as_deref(), Some("online"));
    assert_eq!(m.total_horas_online, Some(0.25));
    assert_eq!(
        kv.get("uptime:lastOfflineCandidate:viabtc:7")
            .await
            .unwrap()
            .as_deref(),
        Some(slot_at(10, 0).iso().as_str())
    );

    // Second consecutive offline slot: status flips, markers clear, and
    // the confirming slot is not credited.
    let report = engine
        .run_tick_at(PoolKind::ViaBtc, slot_at(10, 15))
        .await
        .unwrap();
    assert_eq!(report.marked_offline, 1);
    assert_eq!(report.credited, 0);
    let m = store.get("7").await;
    assert_eq!(m.status.as_deref(), Some("offline"));
    assert_eq!(m.total_horas_online, Some(0.25));
    assert_eq!(
        kv.get("uptime:lastOfflineCandidate:viabtc:7").await.unwrap(),
        None
    );
    assert_eq!(kv.get("uptime:lastOnline:viabtc:7").await.unwrap(), None);

    // Already offline: nothing moves, nothing credited.
    let report = engine
        .run_tick_at(PoolKind::ViaBtc, slot_at(10, 30))
        .await
        .unwrap();
    assert_eq!(report.credited, 0);
    assert_eq!(report.marked_offline, 0);
    assert_eq!(store.get("7").await.total_horas_online, Some(0.25));
}

#[tokio::test]
async fn adapter_failure_applies_grace_and_never_flips_status() {
    let store = Arc::new(MemoryMinerStore::new(vec![
        miner("1", "binance", "acct.w1", "online"),
        miner("2", "binance", "acct.w2", "offline"),
    ]));
    let kv = Arc::new(MemoryKvStore::new());
    // Miner 2 was last confirmed online one slot ago.
    kv.set(
        "uptime:lastOnline:binance:2",
        &slot_at(9, 45).iso(),
        false,
        None,
    )
    .await
    .unwrap();
    let adapter = Arc::new(ScriptedAdapter::new(
        PoolKind::Binance,
        vec![failed(FailReason::Geoblocked)],
    ));
    let engine = engine_with(store.clone(), kv.clone(), adapter.clone());

    let report = engine
        .run_tick_at(PoolKind::Binance, slot_at(10, 0))
        .await
        .unwrap();

    assert_eq!(report.failed_groups, 1);
    assert_eq!(report.marked_offline, 0);
    assert_eq!(report.marked_online, 0);
    // 1 via status=online, 2 via lastOnline within the grace window.
    assert_eq!(report.credited, 2);
    assert_eq!(store.get("1").await.status.as_deref(), Some("online"));
    assert_eq!(store.get("2").await.status.as_deref(), Some("offline"));
}

#[tokio::test]
async fn grace_expires_outside_window() {
    let store = Arc::new(MemoryMinerStore::new(vec![miner(
        "2", "binance", "acct.w2", "offline",
    )]));
    let kv = Arc::new(MemoryKvStore::new());
    // Last confirmed online 45 minutes before the tick: outside grace.
    kv.set(
        "uptime:lastOnline:binance:2",
        &slot_at(9, 15).iso(),
        false,
        None,
    )
    .await
    .unwrap();
    let adapter = Arc::new(ScriptedAdapter::new(
        PoolKind::Binance,
        vec![failed(FailReason::Transport)],
    ));
    let engine = engine_with(store.clone(), kv.clone(), adapter.clone());

    let report = engine
        .run_tick_at(PoolKind::Binance, slot_at(10, 0))
        .await
        .unwrap();
    assert_eq!(report.credited, 0);
    assert_eq!(store.get("2").await.total_horas_online, Some(0.0));
}

#[tokio::test]
async fn maintenance_rows_are_untouchable() {
    let store = Arc::new(MemoryMinerStore::new(vec![miner(
        "5",
        "viabtc",
        "acct.worker005",
        "Maintenance",
    )]));
    let kv = Arc::new(MemoryKvStore::new());
    let adapter = Arc::new(ScriptedAdapter::new(
        PoolKind::ViaBtc,
        vec![ok(vec![online_obs("acct.worker005", 99.0)])],
    ));
    let engine = engine_with(store.clone(), kv.clone(), adapter.clone());

    let report = engine
        .run_tick_at(PoolKind::ViaBtc, slot_at(10, 0))
        .await
        .unwrap();

    // Filtered before grouping: the adapter is never even consulted.
    assert_eq!(adapter.call_count(), 0);
    assert_eq!(report.miners, 0);
    assert_eq!(report.credited, 0);
    let m = store.get("5").await;
    assert_eq!(m.status.as_deref(), Some("Maintenance"));
    assert_eq!(m.total_horas_online, Some(0.0));
}

#[tokio::test]
async fn unmatched_worker_is_inconclusive() {
    let store = Arc::new(MemoryMinerStore::new(vec![miner(
        "7", "viabtc", "acct.worker001", "online",
    )]));
    let kv = Arc::new(MemoryKvStore::new());
    // Authoritative empty answer: the pool has no such worker.
    let adapter = Arc::new(ScriptedAdapter::new(PoolKind::ViaBtc, vec![ok(vec![])]));
    let engine = engine_with(store.clone(), kv.clone(), adapter.clone());

    let report = engine
        .run_tick_at(PoolKind::ViaBtc, slot_at(10, 0))
        .await
        .unwrap();

    // Billing grace (stored status online), status untouched, no candidate.
    assert_eq!(report.credited, 1);
    assert_eq!(report.marked_offline, 0);
    assert_eq!(store.get("7").await.status.as_deref(), Some("online"));
    assert_eq!(
        kv.get("uptime:lastOfflineCandidate:viabtc:7").await.unwrap(),
        None
    );
}

#[tokio::test]
async fn slot_lock_blocks_a_second_pass() {
    let store = Arc::new(MemoryMinerStore::new(vec![miner(
        "7", "viabtc", "acct.worker001", "online",
    )]));
    let kv = Arc::new(MemoryKvStore::new());
    let adapter = Arc::new(ScriptedAdapter::new(
        PoolKind::ViaBtc,
        vec![
            ok(vec![online_obs("acct.worker001", 50.0)]),
            ok(vec![online_obs("acct.worker001", 50.0)]),
        ],
    ));
    let engine = engine_with(store.clone(), kv.clone(), adapter.clone());

    let slot = slot_at(10, 0);
    let first = engine.run_tick_at(PoolKind::ViaBtc, slot).await.unwrap();
    assert!(first.skipped.is_none());

    let second = engine.run_tick_at(PoolKind::ViaBtc, slot).await.unwrap();
    assert_eq!(second.skipped.as_deref(), Some("slot_locked"));
    // hours stayed at a single increment
    assert_eq!(store.get("7").await.total_horas_online, Some(0.25));
}

#[tokio::test]
async fn hours_are_monotone_across_mixed_slots() {
    let store = Arc::new(MemoryMinerStore::new(vec![miner(
        "7", "viabtc", "acct.worker001", "online",
    )]));
    let kv = Arc::new(MemoryKvStore::new());
    let adapter = Arc::new(ScriptedAdapter::new(
        PoolKind::ViaBtc,
        vec![
            ok(vec![online_obs("acct.worker001", 10.0)]),
            failed(FailReason::Http(502)),
            ok(vec![online_obs("acct.worker001", 10.0)]),
        ],
    ));
    let engine = engine_with(store.clone(), kv.clone(), adapter.clone());

    let mut previous = 0.0;
    for minute in [0u32, 15, 30] {
        engine
            .run_tick_at(PoolKind::ViaBtc, slot_at(10, minute))
            .await
            .unwrap();
        let hours = store.get("7").await.total_horas_online.unwrap();
        assert!(hours >= previous);
        previous = hours;
    }
    // online, grace-credited through the 502, online again
    assert_eq!(previous, 0.75);
}
