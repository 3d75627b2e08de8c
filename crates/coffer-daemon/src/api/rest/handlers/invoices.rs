//! Invoice intake and on-demand reconciliation

use crate::api::rest::identity::CallerIdentity;
use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use coffer_core::{
    Identity, Invoice, InvoiceKind, PaymentRequest, ReconcileReport, WorkspaceId,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct RegisterInvoiceRequest {
    pub payment_request: String,
    pub kind: InvoiceKind,
    pub amount: u64,
    /// Funding identity; defaults to the caller.
    #[serde(default)]
    pub payer: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InvoiceCountResponse {
    pub count: usize,
}

pub async fn register_invoice(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<String>,
    Json(request): Json<RegisterInvoiceRequest>,
) -> ApiResult<(StatusCode, Json<Invoice>)> {
    let payer = request
        .payer
        .map(Identity::new)
        .unwrap_or_else(|| caller.clone());
    let invoice = Invoice::new(
        PaymentRequest::new(request.payment_request),
        WorkspaceId::new(id),
        request.kind,
        request.amount,
        Some(payer),
    );
    let invoice = state
        .engine
        .workspaces()
        .register_invoice(&caller, invoice)
        .await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

pub async fn invoice_count(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<String>,
) -> ApiResult<Json<InvoiceCountResponse>> {
    let count = state
        .engine
        .workspaces()
        .pending_invoice_count(&caller, &WorkspaceId::new(id))
        .await?;
    Ok(Json(InvoiceCountResponse { count }))
}

pub async fn poll_invoices(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<String>,
) -> ApiResult<Json<ReconcileReport>> {
    let report = state
        .engine
        .workspaces()
        .poll_workspace_invoices(&caller, &WorkspaceId::new(id))
        .await?;
    Ok(Json(report))
}
