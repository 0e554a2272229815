//! Handlers for the status read surface.

use crate::api::types::{BatchQuery, HealthResponse, RefreshQuery};
use crate::api::ApiState;
use crate::config::CRON_EXPRESSION;
use crate::error::ApiError;
use crate::status::StatusReport;
use axum::extract::{Path, Query, State};
use axum::Json;

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        service: env!("CARGO_PKG_NAME").to_string(),
        cron: CRON_EXPRESSION.to_string(),
    })
}

pub async fn get_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<RefreshQuery>,
) -> Result<Json<StatusReport>, ApiError> {
    let id = id.trim().to_string();
    if id.is_empty() {
        return Err(ApiError::BadRequest("missing miner id".to_string()));
    }
    let report = state.status.get_status(&id, query.wants_refresh()).await;
    Ok(Json(report))
}

pub async fn get_status_many(
    State(state): State<ApiState>,
    Query(query): Query<BatchQuery>,
) -> Result<Json<Vec<StatusReport>>, ApiError> {
    let ids = query.id_list();
    if ids.is_empty() {
        return Err(ApiError::BadRequest("ids must be a non-empty list".to_string()));
    }
    let reports = state.status.get_status_many(&ids).await;
    Ok(Json(reports))
}
