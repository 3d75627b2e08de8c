//! Workspace lifecycle and listing handlers

use crate::api::rest::identity::CallerIdentity;
use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use coffer_core::{CapabilityInfo, Identity, Workspace, WorkspaceId, WorkspaceSummary};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct CreateWorkspaceRequest {
    /// Generated when omitted
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
}

/// Capability catalogue for role pickers
pub async fn list_capabilities(State(state): State<AppState>) -> Json<Vec<CapabilityInfo>> {
    Json(state.engine.capabilities())
}

pub async fn create_workspace(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Json(request): Json<CreateWorkspaceRequest>,
) -> ApiResult<(StatusCode, Json<Workspace>)> {
    if request.name.trim().is_empty() {
        return Err(ApiError::BadRequest("workspace name is required".to_string()));
    }
    let id = request
        .id
        .map(WorkspaceId::new)
        .unwrap_or_else(WorkspaceId::generate);
    let workspace = state
        .engine
        .workspaces()
        .create_workspace(&caller, id, request.name)
        .await?;
    Ok((StatusCode::CREATED, Json(workspace)))
}

pub async fn delete_workspace(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<String>,
) -> ApiResult<Json<Workspace>> {
    let workspace = state
        .engine
        .workspaces()
        .delete_workspace(&caller, &WorkspaceId::new(id))
        .await?;
    Ok(Json(workspace))
}

/// Workspaces an identity owns or belongs to
pub async fn identity_workspaces(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> ApiResult<Json<Vec<WorkspaceSummary>>> {
    let summaries = state
        .engine
        .workspaces()
        .user_workspaces(&Identity::new(identity))
        .await?;
    Ok(Json(summaries))
}
