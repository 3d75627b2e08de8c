//! Budget ledger operations and capability-gated budget reads.

use crate::access::AccessEvaluator;
use crate::capability::Capability;
use crate::error::{CofferError, CofferResult};
use crate::storage::{CofferStorage, QueryWindow};
use crate::types::{
    EntrySource, Identity, InvoiceKind, LedgerEntry, LedgerPosting, PaymentRequest, PayoutId,
    WorkspaceId,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Point-in-time budget snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub workspace_id: WorkspaceId,
    pub current_balance: u64,
    pub total_credited: u64,
    pub total_debited: u64,
    /// BUDGET invoices registered but not yet credited.
    pub pending_invoice_count: usize,
    pub pending_invoice_amount: u64,
}

#[derive(Clone)]
pub struct BudgetLedger {
    storage: Arc<dyn CofferStorage>,
    access: AccessEvaluator,
}

impl BudgetLedger {
    pub fn new(storage: Arc<dyn CofferStorage>, access: AccessEvaluator) -> Self {
        Self { storage, access }
    }

    /// Credit a workspace for a settled invoice. An invoice credits at most once.
    pub async fn credit(
        &self,
        workspace_id: &WorkspaceId,
        amount: u64,
        source_invoice: PaymentRequest,
    ) -> CofferResult<LedgerEntry> {
        ensure_positive(amount)?;
        let entry = self
            .storage
            .credit(LedgerPosting {
                workspace_id: workspace_id.clone(),
                amount,
                sender: None,
                receiver: None,
                source: EntrySource::Invoice(source_invoice),
                posted_at: Utc::now(),
            })
            .await?;
        info!(workspace_id = %workspace_id, amount, entry_id = %entry.entry_id, "ledger credited");
        Ok(entry)
    }

    /// Debit a workspace for a payout. Rejected before any write when the
    /// balance is short.
    pub async fn debit(
        &self,
        workspace_id: &WorkspaceId,
        amount: u64,
        source_payout: PayoutId,
    ) -> CofferResult<LedgerEntry> {
        self.post_debit(workspace_id, amount, source_payout, None, None)
            .await
    }

    async fn post_debit(
        &self,
        workspace_id: &WorkspaceId,
        amount: u64,
        source_payout: PayoutId,
        sender: Option<Identity>,
        receiver: Option<Identity>,
    ) -> CofferResult<LedgerEntry> {
        ensure_positive(amount)?;
        let result = self
            .storage
            .debit(LedgerPosting {
                workspace_id: workspace_id.clone(),
                amount,
                sender,
                receiver,
                source: EntrySource::Payout(source_payout),
                posted_at: Utc::now(),
            })
            .await;
        match result {
            Ok(entry) => {
                info!(workspace_id = %workspace_id, amount, entry_id = %entry.entry_id, "ledger debited");
                Ok(entry)
            }
            Err(e) => {
                let err = CofferError::from(e);
                if let CofferError::InsufficientBudget { available, .. } = &err {
                    warn!(workspace_id = %workspace_id, requested = amount, available, "debit rejected by budget floor");
                }
                Err(err)
            }
        }
    }

    pub async fn current_balance(&self, workspace_id: &WorkspaceId) -> CofferResult<u64> {
        Ok(self.storage.balance(workspace_id).await?)
    }

    /// Entries newest-first.
    pub async fn history(
        &self,
        workspace_id: &WorkspaceId,
        window: QueryWindow,
    ) -> CofferResult<Vec<LedgerEntry>> {
        Ok(self.storage.list_entries(workspace_id, window).await?)
    }

    /// Balance as seen by `caller`: zero unless the caller holds VIEW REPORT.
    pub async fn visible_balance(
        &self,
        caller: &Identity,
        workspace_id: &WorkspaceId,
    ) -> CofferResult<u64> {
        if !self
            .access
            .has_capability(caller, workspace_id, Capability::ViewReport)
            .await
        {
            return Ok(0);
        }
        self.current_balance(workspace_id).await
    }

    pub async fn budget_status(
        &self,
        caller: &Identity,
        workspace_id: &WorkspaceId,
    ) -> CofferResult<BudgetStatus> {
        self.access
            .authorize(caller, workspace_id, Capability::ViewReport)
            .await?;
        let totals = self.storage.ledger_totals(workspace_id).await?;
        let pending = self
            .storage
            .list_unreconciled_invoices(Some(workspace_id), None)
            .await?
            .into_iter()
            .filter(|inv| inv.kind == InvoiceKind::Budget)
            .collect::<Vec<_>>();
        Ok(BudgetStatus {
            workspace_id: workspace_id.clone(),
            current_balance: totals.balance,
            total_credited: totals.total_credited,
            total_debited: totals.total_debited,
            pending_invoice_count: pending.len(),
            pending_invoice_amount: pending
                .iter()
                .fold(0u64, |acc, inv| acc.saturating_add(inv.amount)),
        })
    }

    /// Audit trail. The owner keeps access after the workspace is deleted.
    pub async fn budget_history(
        &self,
        caller: &Identity,
        workspace_id: &WorkspaceId,
        window: QueryWindow,
    ) -> CofferResult<Vec<LedgerEntry>> {
        self.access
            .authorize(caller, workspace_id, Capability::ViewReport)
            .await?;
        self.history(workspace_id, window).await
    }

    /// Payout entry point for the bounty subsystem.
    pub async fn disburse(
        &self,
        caller: &Identity,
        workspace_id: &WorkspaceId,
        amount: u64,
        payout_id: PayoutId,
        receiver: Option<Identity>,
    ) -> CofferResult<LedgerEntry> {
        let workspace = self
            .access
            .authorize(caller, workspace_id, Capability::PayBounty)
            .await?;
        if workspace.deleted {
            return Err(CofferError::not_found(format!("workspace {workspace_id}")));
        }
        self.post_debit(workspace_id, amount, payout_id, Some(caller.clone()), receiver)
            .await
    }
}

fn ensure_positive(amount: u64) -> CofferResult<()> {
    if amount == 0 {
        return Err(CofferError::InvalidInput(
            "amount must be greater than zero".to_string(),
        ));
    }
    Ok(())
}
