//! Workspace lifecycle, listings and invoice intake.

use crate::error::{CofferError, CofferResult};
use crate::ledger::BudgetLedger;
use crate::reconcile::{InvoiceReconciler, ReconcileReport};
use crate::storage::CofferStorage;
use crate::types::{Identity, Invoice, Workspace, WorkspaceId, WorkspaceSummary};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

/// Largest invoice amount either storage backend can hold.
pub const MAX_INVOICE_AMOUNT: u64 = i64::MAX as u64;

#[derive(Clone)]
pub struct WorkspaceService {
    storage: Arc<dyn CofferStorage>,
    ledger: BudgetLedger,
    reconciler: InvoiceReconciler,
}

impl WorkspaceService {
    pub fn new(
        storage: Arc<dyn CofferStorage>,
        ledger: BudgetLedger,
        reconciler: InvoiceReconciler,
    ) -> Self {
        Self {
            storage,
            ledger,
            reconciler,
        }
    }

    /// Register a workspace owned by `owner`, starting at a zero balance.
    pub async fn create_workspace(
        &self,
        owner: &Identity,
        workspace_id: WorkspaceId,
        name: impl Into<String>,
    ) -> CofferResult<Workspace> {
        if owner.is_anonymous() {
            return Err(CofferError::unauthorized("caller identity is required"));
        }
        if workspace_id.as_str().trim().is_empty() {
            return Err(CofferError::InvalidInput("workspace id is required".to_string()));
        }
        let workspace = Workspace::new(workspace_id, name, owner.clone());
        self.storage.create_workspace(workspace.clone()).await?;
        info!(workspace_id = %workspace.id, owner = %owner, "workspace created");
        Ok(workspace)
    }

    /// Owner-only soft delete. Memberships and grants go; the ledger stays.
    pub async fn delete_workspace(
        &self,
        caller: &Identity,
        workspace_id: &WorkspaceId,
    ) -> CofferResult<Workspace> {
        if caller.is_anonymous() {
            return Err(CofferError::unauthorized("caller identity is required"));
        }
        let workspace = self.get_workspace(workspace_id).await?;
        if !workspace.is_owner(caller) {
            return Err(CofferError::unauthorized(
                "only the owner can delete a workspace",
            ));
        }
        let deleted = self
            .storage
            .soft_delete_workspace(workspace_id, Utc::now())
            .await?;
        info!(workspace_id = %workspace_id, "workspace deleted");
        Ok(deleted)
    }

    /// Live workspace by id. Deleted workspaces read as absent.
    pub async fn get_workspace(&self, workspace_id: &WorkspaceId) -> CofferResult<Workspace> {
        self.storage
            .get_workspace(workspace_id)
            .await?
            .filter(|ws| !ws.deleted)
            .ok_or_else(|| CofferError::not_found(format!("workspace {workspace_id}")))
    }

    /// Workspaces the identity owns or belongs to, with the budget projected
    /// through the report gate.
    pub async fn user_workspaces(&self, identity: &Identity) -> CofferResult<Vec<WorkspaceSummary>> {
        if identity.is_anonymous() {
            return Ok(Vec::new());
        }
        let mut seen = BTreeSet::new();
        let mut workspaces = Vec::new();
        for workspace in self.storage.list_owned_workspaces(identity).await? {
            if seen.insert(workspace.id.clone()) {
                workspaces.push(workspace);
            }
        }
        for membership in self.storage.list_memberships_for(identity).await? {
            if !seen.insert(membership.workspace_id.clone()) {
                continue;
            }
            if let Some(workspace) = self.storage.get_workspace(&membership.workspace_id).await? {
                workspaces.push(workspace);
            }
        }

        let mut summaries = Vec::with_capacity(workspaces.len());
        for workspace in workspaces.into_iter().filter(|ws| !ws.deleted) {
            let budget = self.ledger.visible_balance(identity, &workspace.id).await?;
            summaries.push(WorkspaceSummary { workspace, budget });
        }
        summaries.sort_by(|a, b| a.workspace.created_at.cmp(&b.workspace.created_at));
        Ok(summaries)
    }

    /// Record a newly issued invoice so reconciliation can pick it up.
    pub async fn register_invoice(&self, caller: &Identity, invoice: Invoice) -> CofferResult<Invoice> {
        if caller.is_anonymous() {
            return Err(CofferError::unauthorized("caller identity is required"));
        }
        if invoice.amount == 0 {
            return Err(CofferError::InvalidInput(
                "invoice amount must be greater than zero".to_string(),
            ));
        }
        if invoice.amount > MAX_INVOICE_AMOUNT {
            return Err(CofferError::InvalidInput(format!(
                "invoice amount must not exceed {MAX_INVOICE_AMOUNT}"
            )));
        }
        if invoice.payment_request.as_str().trim().is_empty() {
            return Err(CofferError::InvalidInput("payment request is required".to_string()));
        }
        self.get_workspace(&invoice.workspace_id).await?;
        self.storage.create_invoice(invoice.clone()).await?;
        info!(
            workspace_id = %invoice.workspace_id,
            payment_request = %invoice.payment_request,
            kind = invoice.kind.as_str(),
            amount = invoice.amount,
            "invoice registered"
        );
        Ok(invoice)
    }

    pub async fn pending_invoice_count(
        &self,
        caller: &Identity,
        workspace_id: &WorkspaceId,
    ) -> CofferResult<usize> {
        if caller.is_anonymous() {
            return Err(CofferError::unauthorized("caller identity is required"));
        }
        self.get_workspace(workspace_id).await?;
        Ok(self.storage.count_unconsumed_invoices(workspace_id).await?)
    }

    /// On-demand reconciliation of one workspace.
    pub async fn poll_workspace_invoices(
        &self,
        caller: &Identity,
        workspace_id: &WorkspaceId,
    ) -> CofferResult<ReconcileReport> {
        if caller.is_anonymous() {
            return Err(CofferError::unauthorized("caller identity is required"));
        }
        self.get_workspace(workspace_id).await?;
        self.reconciler.reconcile_workspace(workspace_id).await
    }
}
