//! Membership and role handlers

use crate::api::rest::identity::CallerIdentity;
use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use coffer_core::{Identity, Membership, RoleGrant, WorkspaceId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct MemberListResponse {
    pub count: usize,
    pub members: Vec<Membership>,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub identity: String,
}

#[derive(Debug, Deserialize)]
pub struct RolesRequest {
    pub roles: Vec<String>,
}

pub async fn list_members(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MemberListResponse>> {
    let members = state.engine.members().members(&WorkspaceId::new(id)).await?;
    Ok(Json(MemberListResponse {
        count: members.len(),
        members,
    }))
}

pub async fn add_member(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<String>,
    Json(request): Json<AddMemberRequest>,
) -> ApiResult<(StatusCode, Json<Membership>)> {
    let membership = state
        .engine
        .members()
        .add_member(&caller, &WorkspaceId::new(id), &Identity::new(request.identity))
        .await?;
    Ok((StatusCode::CREATED, Json(membership)))
}

pub async fn remove_member(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Path((id, identity)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state
        .engine
        .members()
        .remove_member(&caller, &WorkspaceId::new(id), &Identity::new(identity))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_roles(
    State(state): State<AppState>,
    Path((id, identity)): Path<(String, String)>,
) -> ApiResult<Json<Vec<RoleGrant>>> {
    let grants = state
        .engine
        .members()
        .user_roles(&WorkspaceId::new(id), &Identity::new(identity))
        .await?;
    Ok(Json(grants))
}

pub async fn grant_roles(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Path((id, identity)): Path<(String, String)>,
    Json(request): Json<RolesRequest>,
) -> ApiResult<Json<Vec<RoleGrant>>> {
    let grants = state
        .engine
        .members()
        .grant_roles(
            &caller,
            &WorkspaceId::new(id),
            &Identity::new(identity),
            &request.roles,
        )
        .await?;
    Ok(Json(grants))
}

/// Returns the grants left after revocation.
pub async fn revoke_roles(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Path((id, identity)): Path<(String, String)>,
    Json(request): Json<RolesRequest>,
) -> ApiResult<Json<Vec<RoleGrant>>> {
    let remaining = state
        .engine
        .members()
        .revoke_roles(
            &caller,
            &WorkspaceId::new(id),
            &Identity::new(identity),
            &request.roles,
        )
        .await?;
    Ok(Json(remaining))
}
