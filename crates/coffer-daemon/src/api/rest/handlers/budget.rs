//! Budget, history and payout handlers

use super::PageParams;
use crate::api::rest::identity::CallerIdentity;
use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use coffer_core::{
    BudgetStatus, Identity, LedgerEntry, PaymentRecord, PayoutId, WorkspaceId,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct PayoutRequest {
    pub payout_id: String,
    pub amount: u64,
    #[serde(default)]
    pub receiver: Option<String>,
}

pub async fn budget_status(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<String>,
) -> ApiResult<Json<BudgetStatus>> {
    let status = state
        .engine
        .ledger()
        .budget_status(&caller, &WorkspaceId::new(id))
        .await?;
    Ok(Json(status))
}

pub async fn budget_history(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<String>,
    Query(page): Query<PageParams>,
) -> ApiResult<Json<Vec<LedgerEntry>>> {
    let entries = state
        .engine
        .ledger()
        .budget_history(&caller, &WorkspaceId::new(id), page.into())
        .await?;
    Ok(Json(entries))
}

pub async fn payment_history(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<String>,
    Query(page): Query<PageParams>,
) -> ApiResult<Json<Vec<PaymentRecord>>> {
    let records = state
        .engine
        .payments()
        .payment_history(&caller, &WorkspaceId::new(id), page.into())
        .await?;
    Ok(Json(records))
}

/// Debit the workspace for a bounty payout.
pub async fn disburse(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<String>,
    Json(request): Json<PayoutRequest>,
) -> ApiResult<(StatusCode, Json<LedgerEntry>)> {
    let entry = state
        .engine
        .ledger()
        .disburse(
            &caller,
            &WorkspaceId::new(id),
            request.amount,
            PayoutId::new(request.payout_id),
            request.receiver.map(Identity::new),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}
