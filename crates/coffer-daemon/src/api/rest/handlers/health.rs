//! Health and status handlers

use crate::api::rest::state::AppState;
use crate::scheduler::SchedulerStatus;
use axum::{extract::State, Json};
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub storage: String,
    pub scheduler: SchedulerStatus,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
        started_at: state.started_at,
        storage: state.engine.storage().backend_label().to_string(),
        scheduler: state.scheduler.status().await,
    })
}
