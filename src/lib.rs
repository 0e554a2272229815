//! # poolwatch
//!
//! Uptime and status aggregator for mining workers registered against
//! heterogeneous pools. Every quarter hour the reconciliation engine asks
//! each pool's native API which workers are hashing, credits billing
//! increments for the ones that are, and maintains each miner's coarse
//! lifecycle status; an HTTP read service answers the same question on
//! demand through the same adapters.

pub mod api;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod names;
pub mod persistence;
pub mod pools;
pub mod scheduler;
pub mod slot;
pub mod status;

pub use cli::{Args, Command};
pub use config::Config;
pub use engine::{SlotCoordinator, TickReport, UptimeEngine};
pub use persistence::{KvStore, MemoryKvStore, MinerRecord, MinerStore};
pub use pools::{
    AdapterRegistry, FailReason, FetchOutcome, Observation, PoolAdapter, PoolGroup, PoolKind,
    WorkerFetch,
};
pub use slot::Slot;
pub use status::{StatusReport, StatusService, WorkerStatus};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
