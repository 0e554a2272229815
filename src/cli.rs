//! Command-line entry points.

use crate::api::ApiHandler;
use crate::config::{Config, KvBackend};
use crate::engine::UptimeEngine;
use crate::persistence::{
    self, KvStore, MemoryKvStore, MinerStore, PostgresKvStore, PostgresMinerStore,
};
use crate::pools::{AdapterRegistry, PoolKind};
use crate::scheduler::UptimeScheduler;
use crate::status::StatusService;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "poolwatch")]
#[command(about = "Uptime and billing reconciler for mining workers across pool APIs")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the status API and the in-process quarter-hour scheduler.
    Serve,
    /// Run one reconciliation tick for a single pool (cron entry point).
    Tick {
        #[arg(long)]
        pool: String,
    },
    /// Query one miner's live status through the read service.
    Status {
        #[arg(long)]
        id: String,
        /// Bypass the response cache.
        #[arg(long)]
        refresh: bool,
    },
    /// Print an example configuration file.
    GenConfig,
}

struct Services {
    engine: Arc<UptimeEngine>,
    status: Arc<StatusService>,
}

async fn build_services(config: &Config) -> Result<Services> {
    let pool = persistence::connect(&config.database).await?;
    persistence::ensure_schema(&pool).await?;

    let store: Arc<dyn MinerStore> = Arc::new(PostgresMinerStore::new(
        pool.clone(),
        config.database.retries,
    ));
    let kv: Arc<dyn KvStore> = match config.kv.backend {
        KvBackend::Postgres => Arc::new(PostgresKvStore::new(pool)),
        KvBackend::Memory => Arc::new(MemoryKvStore::new()),
    };
    let registry = Arc::new(
        AdapterRegistry::standard(config.pools.binance_base.clone())
            .context("Failed to build pool adapters")?,
    );

    let engine = Arc::new(UptimeEngine::new(
        store.clone(),
        kv,
        registry.clone(),
        config.uptime.clone(),
    ));
    let status = Arc::new(StatusService::new(
        store,
        registry,
        config.cache_ttl(),
        config.status.concurrency,
    ));
    Ok(Services { engine, status })
}

impl Args {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Serve => {
                let config = Config::load(self.config)?;
                let services = build_services(&config).await?;
                let api = ApiHandler::new(
                    services.status,
                    format!("{}:{}", config.server.bind, config.server.port),
                );
                let scheduler =
                    UptimeScheduler::new(services.engine, config.uptime.timezone.clone());
                tokio::select! {
                    result = api.start() => result,
                    result = scheduler.run() => result,
                }
            }
            Command::Tick { pool } => {
                let config = Config::load(self.config)?;
                let Some(kind) = PoolKind::parse(&pool) else {
                    bail!("unsupported pool: {pool}");
                };
                let services = build_services(&config).await?;
                let report = services.engine.run_tick(kind).await?;
                println!("{}", serde_json::to_string_pretty(&report)?);
                Ok(())
            }
            Command::Status { id, refresh } => {
                let config = Config::load(self.config)?;
                let services = build_services(&config).await?;
                let report = services.status.get_status(&id, refresh).await;
                println!("{}", serde_json::to_string_pretty(&report)?);
                Ok(())
            }
            Command::GenConfig => {
                print!("{}", Config::generate_example()?);
                Ok(())
            }
        }
    }
}
