//! # poolwatch
//!
//! Uptime and billing reconciler for mining workers across pool APIs.

use anyhow::Result;
use clap::Parser;
use poolwatch::Args;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    args.run().await
}
