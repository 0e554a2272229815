//! Quarter-hour tick loop.
//!
//! The external `*/15 * * * *` cron can drive ticks via the `tick`
//! command; `serve` additionally runs this in-process loop, which sleeps
//! to the next UTC quarter-hour boundary and then reconciles every
//! supported pool. Slot identity is always UTC regardless of the
//! configured cron timezone.

use crate::config::CRON_EXPRESSION;
use crate::engine::UptimeEngine;
use crate::pools::PoolKind;
use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub struct UptimeScheduler {
    engine: Arc<UptimeEngine>,
    timezone: String,
}

impl UptimeScheduler {
    pub fn new(engine: Arc<UptimeEngine>, timezone: String) -> Self {
        Self { engine, timezone }
    }

    /// Loop until shutdown is signalled.
    pub async fn run(&self) -> Result<()> {
        info!(
            cron = CRON_EXPRESSION,
            timezone = %self.timezone,
            "starting uptime scheduler"
        );
        loop {
            let now = Utc::now();
            let boundary = crate::slot::Slot::next_boundary(now);
            let wait = (boundary - now)
                .to_std()
                .unwrap_or(Duration::from_secs(1));
            info!(next_tick = %boundary, "sleeping until next slot boundary");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    self.run_all_pools().await;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received, stopping scheduler");
                    return Ok(());
                }
            }
        }
    }

    /// One tick per pool, concurrently; each pool holds its own slot lock
    /// and a failing pool never stalls the others.
    pub async fn run_all_pools(&self) {
        let ticks = PoolKind::ALL.iter().map(|pool| {
            let engine = self.engine.clone();
            let pool = *pool;
            async move {
                match engine.run_tick(pool).await {
                    Ok(report) => {
                        if let Some(reason) = &report.skipped {
                            info!(pool = %pool, reason = %reason, "tick skipped");
                        }
                    }
                    Err(e) => {
                        error!(pool = %pool, error = %format!("{e:#}"), "tick failed");
                    }
                }
            }
        });
        join_all(ticks).await;
    }
}
