use super::StorageResult;
use crate::capability::Capability;
use crate::types::{
    Identity, Invoice, LedgerEntry, LedgerPosting, Membership, PaymentRequest, RoleGrant,
    Workspace, WorkspaceId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Generic query window for paged reads. A zero limit means "no limit".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryWindow {
    pub limit: usize,
    pub offset: usize,
}

impl QueryWindow {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn page(limit: usize, offset: usize) -> Self {
        Self { limit, offset }
    }

    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.offset);
        if self.limit == 0 {
            iter.collect()
        } else {
            iter.take(self.limit).collect()
        }
    }
}

/// Balance view and the entry sums it must agree with, read in one snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTotals {
    pub balance: u64,
    pub total_credited: u64,
    pub total_debited: u64,
    pub entry_count: usize,
}

impl LedgerTotals {
    /// Balance recomputed from entries, or `None` when debits exceed credits.
    pub fn expected_balance(&self) -> Option<u64> {
        self.total_credited.checked_sub(self.total_debited)
    }

    pub fn is_consistent(&self) -> bool {
        self.expected_balance() == Some(self.balance)
    }
}

#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    /// Register a workspace with an empty ledger.
    async fn create_workspace(&self, workspace: Workspace) -> StorageResult<()>;

    /// Fetch a workspace, including soft-deleted ones.
    async fn get_workspace(&self, id: &WorkspaceId) -> StorageResult<Option<Workspace>>;

    async fn list_workspaces(&self) -> StorageResult<Vec<Workspace>>;

    async fn list_owned_workspaces(&self, owner: &Identity) -> StorageResult<Vec<Workspace>>;

    /// Set the deleted flag and purge every membership and grant of the workspace.
    /// Ledger entries and invoices are retained.
    async fn soft_delete_workspace(
        &self,
        id: &WorkspaceId,
        deleted_at: DateTime<Utc>,
    ) -> StorageResult<Workspace>;
}

#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Insert a baseline membership. Duplicate memberships are a conflict.
    async fn add_member(&self, membership: Membership) -> StorageResult<()>;

    /// Remove a member together with all of its grants. Returns false if absent.
    async fn remove_member(&self, workspace_id: &WorkspaceId, identity: &Identity)
        -> StorageResult<bool>;

    async fn get_member(
        &self,
        workspace_id: &WorkspaceId,
        identity: &Identity,
    ) -> StorageResult<Option<Membership>>;

    async fn list_members(&self, workspace_id: &WorkspaceId) -> StorageResult<Vec<Membership>>;

    async fn list_memberships_for(&self, identity: &Identity) -> StorageResult<Vec<Membership>>;

    /// Grant a batch of capabilities all-or-nothing. Already-held capabilities
    /// keep their original grant time. Fails with `NotFound` for non-members.
    async fn grant_capabilities(
        &self,
        workspace_id: &WorkspaceId,
        identity: &Identity,
        capabilities: &[Capability],
        granted_at: DateTime<Utc>,
    ) -> StorageResult<Vec<RoleGrant>>;

    /// Revoke a batch of capabilities all-or-nothing.
    async fn revoke_capabilities(
        &self,
        workspace_id: &WorkspaceId,
        identity: &Identity,
        capabilities: &[Capability],
    ) -> StorageResult<()>;

    async fn list_grants(
        &self,
        workspace_id: &WorkspaceId,
        identity: &Identity,
    ) -> StorageResult<Vec<RoleGrant>>;

    async fn has_grant(
        &self,
        workspace_id: &WorkspaceId,
        identity: &Identity,
        capability: Capability,
    ) -> StorageResult<bool>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append a credit and raise the balance in one step. A source may be
    /// credited once; repeats fail with `AlreadyConsumed`.
    async fn credit(&self, posting: LedgerPosting) -> StorageResult<LedgerEntry>;

    /// Append a debit and lower the balance in one step, rejecting with
    /// `InsufficientBudget` before any write when the floor would be crossed.
    async fn debit(&self, posting: LedgerPosting) -> StorageResult<LedgerEntry>;

    async fn balance(&self, workspace_id: &WorkspaceId) -> StorageResult<u64>;

    /// Entries newest-first.
    async fn list_entries(
        &self,
        workspace_id: &WorkspaceId,
        window: QueryWindow,
    ) -> StorageResult<Vec<LedgerEntry>>;

    async fn ledger_totals(&self, workspace_id: &WorkspaceId) -> StorageResult<LedgerTotals>;
}

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn create_invoice(&self, invoice: Invoice) -> StorageResult<()>;

    async fn get_invoice(&self, payment_request: &PaymentRequest) -> StorageResult<Option<Invoice>>;

    /// Invoices that still need reconciliation (see `Invoice::needs_reconciliation`),
    /// optionally scoped to one workspace and to invoices created after a cutoff.
    async fn list_unreconciled_invoices(
        &self,
        workspace_id: Option<&WorkspaceId>,
        created_after: Option<DateTime<Utc>>,
    ) -> StorageResult<Vec<Invoice>>;

    async fn count_unconsumed_invoices(&self, workspace_id: &WorkspaceId) -> StorageResult<usize>;

    /// Record gateway-reported settlement. Returns true when the flag changed.
    async fn mark_invoice_settled(
        &self,
        payment_request: &PaymentRequest,
        settled_at: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Atomic claim: flip `consumed` from false to true and write the matching
    /// credit in the same step. Loses with `AlreadyConsumed` if another caller
    /// already claimed the invoice. When the ledger already holds a credit for
    /// the invoice's payment request, the invoice is still marked consumed and
    /// the call returns `AlreadyConsumed` without writing a second entry.
    async fn consume_invoice_and_credit(
        &self,
        payment_request: &PaymentRequest,
        consumed_at: DateTime<Utc>,
    ) -> StorageResult<LedgerEntry>;
}

/// Storage bundle used by the engine.
pub trait CofferStorage:
    WorkspaceStore + MembershipStore + LedgerStore + InvoiceStore + Send + Sync
{
    fn backend_label(&self) -> &'static str;
}
