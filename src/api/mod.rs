//! HTTP read surface: health and per-miner status.

pub mod routes;
pub mod types;

use crate::status::StatusService;
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// State shared across handlers.
#[derive(Clone)]
pub struct ApiState {
    pub status: Arc<StatusService>,
}

pub struct ApiHandler {
    state: ApiState,
    bind: String,
}

impl ApiHandler {
    pub fn new(status: Arc<StatusService>, bind: impl Into<String>) -> Self {
        Self {
            state: ApiState { status },
            bind: bind.into(),
        }
    }

    /// Serve until the process exits.
    pub async fn start(&self) -> Result<()> {
        let app = self.create_router();
        let listener = TcpListener::bind(&self.bind).await?;
        info!("Status API listening on {}", self.bind);
        axum::serve(listener, app).await?;
        Ok(())
    }

    fn create_router(&self) -> Router {
        Router::new()
            .route("/health", get(routes::health_check))
            .route("/status/:id", get(routes::get_status))
            .route("/status", get(routes::get_status_many))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }
}
