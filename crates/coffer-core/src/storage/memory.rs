//! In-memory storage backend.
//!
//! Deterministic and test-friendly. Each map sits behind its own lock; when an
//! operation needs two of them it takes them in a fixed order
//! (workspaces before members, invoices before ledgers) and holds both for the
//! duration of the write.

use super::traits::{
    CofferStorage, InvoiceStore, LedgerStore, LedgerTotals, MembershipStore, QueryWindow,
    WorkspaceStore,
};
use super::{StorageError, StorageResult};
use crate::capability::Capability;
use crate::types::{
    EntryDirection, EntrySource, Identity, Invoice, InvoiceKind, LedgerEntry, LedgerPosting,
    Membership, PaymentRequest, RoleGrant, Workspace, WorkspaceId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

#[derive(Debug, Clone)]
struct MemberRecord {
    membership: Membership,
    grants: BTreeMap<Capability, DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct WorkspaceBook {
    balance: u64,
    entries: Vec<LedgerEntry>,
    sources: HashSet<EntrySource>,
}

impl WorkspaceBook {
    fn append_credit(&mut self, posting: LedgerPosting) -> StorageResult<LedgerEntry> {
        if self.sources.contains(&posting.source) {
            return Err(StorageError::AlreadyConsumed(posting.source.id().to_string()));
        }
        let balance = self
            .balance
            .checked_add(posting.amount)
            .ok_or_else(|| StorageError::InvalidInput("balance overflow".to_string()))?;
        let entry = LedgerEntry::from_posting(posting, EntryDirection::Credit);
        self.balance = balance;
        self.sources.insert(entry.source.clone());
        self.entries.push(entry.clone());
        Ok(entry)
    }

    fn append_debit(&mut self, posting: LedgerPosting) -> StorageResult<LedgerEntry> {
        if self.sources.contains(&posting.source) {
            return Err(StorageError::Conflict(format!(
                "{} {} already posted",
                posting.source.kind(),
                posting.source.id()
            )));
        }
        if posting.amount > self.balance {
            return Err(StorageError::InsufficientBudget {
                available: self.balance,
                requested: posting.amount,
            });
        }
        let entry = LedgerEntry::from_posting(posting, EntryDirection::Debit);
        self.balance -= entry.amount;
        self.sources.insert(entry.source.clone());
        self.entries.push(entry.clone());
        Ok(entry)
    }

    fn totals(&self) -> LedgerTotals {
        let mut totals = LedgerTotals {
            balance: self.balance,
            entry_count: self.entries.len(),
            ..LedgerTotals::default()
        };
        for entry in &self.entries {
            match entry.direction {
                EntryDirection::Credit => {
                    totals.total_credited = totals.total_credited.saturating_add(entry.amount)
                }
                EntryDirection::Debit => {
                    totals.total_debited = totals.total_debited.saturating_add(entry.amount)
                }
            }
        }
        totals
    }
}

/// In-memory coffer storage.
#[derive(Default)]
pub struct InMemoryCofferStorage {
    workspaces: RwLock<HashMap<WorkspaceId, Workspace>>,
    members: RwLock<HashMap<WorkspaceId, HashMap<Identity, MemberRecord>>>,
    invoices: RwLock<HashMap<PaymentRequest, Invoice>>,
    ledgers: RwLock<HashMap<WorkspaceId, WorkspaceBook>>,
}

impl InMemoryCofferStorage {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn drop_ledger(&self, workspace_id: &WorkspaceId) {
        if let Ok(mut ledgers) = self.ledgers.write() {
            ledgers.remove(workspace_id);
        }
    }

    #[cfg(test)]
    pub(crate) fn overwrite_balance(&self, workspace_id: &WorkspaceId, balance: u64) {
        if let Ok(mut ledgers) = self.ledgers.write() {
            if let Some(book) = ledgers.get_mut(workspace_id) {
                book.balance = balance;
            }
        }
    }
}

fn poisoned(name: &str) -> StorageError {
    StorageError::Backend(format!("{name} lock poisoned"))
}

fn missing_book(workspace_id: &WorkspaceId) -> StorageError {
    StorageError::NotFound(format!("ledger for workspace {workspace_id} not found"))
}

#[async_trait]
impl WorkspaceStore for InMemoryCofferStorage {
    async fn create_workspace(&self, workspace: Workspace) -> StorageResult<()> {
        let mut workspaces = self.workspaces.write().map_err(|_| poisoned("workspaces"))?;
        if workspaces.contains_key(&workspace.id) {
            return Err(StorageError::Conflict(format!(
                "workspace {} already exists",
                workspace.id
            )));
        }
        let mut ledgers = self.ledgers.write().map_err(|_| poisoned("ledgers"))?;
        ledgers.insert(workspace.id.clone(), WorkspaceBook::default());
        workspaces.insert(workspace.id.clone(), workspace);
        Ok(())
    }

    async fn get_workspace(&self, id: &WorkspaceId) -> StorageResult<Option<Workspace>> {
        let workspaces = self.workspaces.read().map_err(|_| poisoned("workspaces"))?;
        Ok(workspaces.get(id).cloned())
    }

    async fn list_workspaces(&self) -> StorageResult<Vec<Workspace>> {
        let workspaces = self.workspaces.read().map_err(|_| poisoned("workspaces"))?;
        let mut values = workspaces.values().cloned().collect::<Vec<_>>();
        values.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(values)
    }

    async fn list_owned_workspaces(&self, owner: &Identity) -> StorageResult<Vec<Workspace>> {
        let mut values = self.list_workspaces().await?;
        values.retain(|ws| &ws.owner == owner);
        Ok(values)
    }

    async fn soft_delete_workspace(
        &self,
        id: &WorkspaceId,
        deleted_at: DateTime<Utc>,
    ) -> StorageResult<Workspace> {
        let mut workspaces = self.workspaces.write().map_err(|_| poisoned("workspaces"))?;
        let mut members = self.members.write().map_err(|_| poisoned("members"))?;
        let workspace = workspaces
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("workspace {id} not found")))?;
        workspace.deleted = true;
        workspace.updated_at = deleted_at;
        members.remove(id);
        Ok(workspace.clone())
    }
}

#[async_trait]
impl MembershipStore for InMemoryCofferStorage {
    async fn add_member(&self, membership: Membership) -> StorageResult<()> {
        let mut members = self.members.write().map_err(|_| poisoned("members"))?;
        let roster = members.entry(membership.workspace_id.clone()).or_default();
        if roster.contains_key(&membership.identity) {
            return Err(StorageError::Conflict(format!(
                "{} is already a member of {}",
                membership.identity, membership.workspace_id
            )));
        }
        roster.insert(
            membership.identity.clone(),
            MemberRecord {
                membership,
                grants: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn remove_member(
        &self,
        workspace_id: &WorkspaceId,
        identity: &Identity,
    ) -> StorageResult<bool> {
        let mut members = self.members.write().map_err(|_| poisoned("members"))?;
        Ok(members
            .get_mut(workspace_id)
            .and_then(|roster| roster.remove(identity))
            .is_some())
    }

    async fn get_member(
        &self,
        workspace_id: &WorkspaceId,
        identity: &Identity,
    ) -> StorageResult<Option<Membership>> {
        let members = self.members.read().map_err(|_| poisoned("members"))?;
        Ok(members
            .get(workspace_id)
            .and_then(|roster| roster.get(identity))
            .map(|record| record.membership.clone()))
    }

    async fn list_members(&self, workspace_id: &WorkspaceId) -> StorageResult<Vec<Membership>> {
        let members = self.members.read().map_err(|_| poisoned("members"))?;
        let mut values = members
            .get(workspace_id)
            .map(|roster| {
                roster
                    .values()
                    .map(|record| record.membership.clone())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        values.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then(a.identity.cmp(&b.identity)));
        Ok(values)
    }

    async fn list_memberships_for(&self, identity: &Identity) -> StorageResult<Vec<Membership>> {
        let members = self.members.read().map_err(|_| poisoned("members"))?;
        Ok(members
            .values()
            .filter_map(|roster| roster.get(identity))
            .map(|record| record.membership.clone())
            .collect())
    }

    async fn grant_capabilities(
        &self,
        workspace_id: &WorkspaceId,
        identity: &Identity,
        capabilities: &[Capability],
        granted_at: DateTime<Utc>,
    ) -> StorageResult<Vec<RoleGrant>> {
        let mut members = self.members.write().map_err(|_| poisoned("members"))?;
        let record = members
            .get_mut(workspace_id)
            .and_then(|roster| roster.get_mut(identity))
            .ok_or_else(|| {
                StorageError::NotFound(format!("{identity} is not a member of {workspace_id}"))
            })?;
        for capability in capabilities {
            record.grants.entry(*capability).or_insert(granted_at);
        }
        Ok(grants_of(record))
    }

    async fn revoke_capabilities(
        &self,
        workspace_id: &WorkspaceId,
        identity: &Identity,
        capabilities: &[Capability],
    ) -> StorageResult<()> {
        let mut members = self.members.write().map_err(|_| poisoned("members"))?;
        let record = members
            .get_mut(workspace_id)
            .and_then(|roster| roster.get_mut(identity))
            .ok_or_else(|| {
                StorageError::NotFound(format!("{identity} is not a member of {workspace_id}"))
            })?;
        for capability in capabilities {
            record.grants.remove(capability);
        }
        Ok(())
    }

    async fn list_grants(
        &self,
        workspace_id: &WorkspaceId,
        identity: &Identity,
    ) -> StorageResult<Vec<RoleGrant>> {
        let members = self.members.read().map_err(|_| poisoned("members"))?;
        Ok(members
            .get(workspace_id)
            .and_then(|roster| roster.get(identity))
            .map(grants_of)
            .unwrap_or_default())
    }

    async fn has_grant(
        &self,
        workspace_id: &WorkspaceId,
        identity: &Identity,
        capability: Capability,
    ) -> StorageResult<bool> {
        let members = self.members.read().map_err(|_| poisoned("members"))?;
        Ok(members
            .get(workspace_id)
            .and_then(|roster| roster.get(identity))
            .is_some_and(|record| record.grants.contains_key(&capability)))
    }
}

fn grants_of(record: &MemberRecord) -> Vec<RoleGrant> {
    record
        .grants
        .iter()
        .map(|(capability, granted_at)| RoleGrant {
            workspace_id: record.membership.workspace_id.clone(),
            identity: record.membership.identity.clone(),
            capability: *capability,
            granted_at: *granted_at,
        })
        .collect()
}

#[async_trait]
impl LedgerStore for InMemoryCofferStorage {
    async fn credit(&self, posting: LedgerPosting) -> StorageResult<LedgerEntry> {
        let mut ledgers = self.ledgers.write().map_err(|_| poisoned("ledgers"))?;
        let book = ledgers
            .get_mut(&posting.workspace_id)
            .ok_or_else(|| missing_book(&posting.workspace_id))?;
        book.append_credit(posting)
    }

    async fn debit(&self, posting: LedgerPosting) -> StorageResult<LedgerEntry> {
        let mut ledgers = self.ledgers.write().map_err(|_| poisoned("ledgers"))?;
        let book = ledgers
            .get_mut(&posting.workspace_id)
            .ok_or_else(|| missing_book(&posting.workspace_id))?;
        book.append_debit(posting)
    }

    async fn balance(&self, workspace_id: &WorkspaceId) -> StorageResult<u64> {
        let ledgers = self.ledgers.read().map_err(|_| poisoned("ledgers"))?;
        ledgers
            .get(workspace_id)
            .map(|book| book.balance)
            .ok_or_else(|| missing_book(workspace_id))
    }

    async fn list_entries(
        &self,
        workspace_id: &WorkspaceId,
        window: QueryWindow,
    ) -> StorageResult<Vec<LedgerEntry>> {
        let ledgers = self.ledgers.read().map_err(|_| poisoned("ledgers"))?;
        let book = ledgers
            .get(workspace_id)
            .ok_or_else(|| missing_book(workspace_id))?;
        let newest_first = book.entries.iter().rev().cloned().collect::<Vec<_>>();
        Ok(window.apply(newest_first))
    }

    async fn ledger_totals(&self, workspace_id: &WorkspaceId) -> StorageResult<LedgerTotals> {
        let ledgers = self.ledgers.read().map_err(|_| poisoned("ledgers"))?;
        ledgers
            .get(workspace_id)
            .map(WorkspaceBook::totals)
            .ok_or_else(|| missing_book(workspace_id))
    }
}

#[async_trait]
impl InvoiceStore for InMemoryCofferStorage {
    async fn create_invoice(&self, invoice: Invoice) -> StorageResult<()> {
        let mut invoices = self.invoices.write().map_err(|_| poisoned("invoices"))?;
        if invoices.contains_key(&invoice.payment_request) {
            return Err(StorageError::Conflict(format!(
                "invoice {} already registered",
                invoice.payment_request
            )));
        }
        invoices.insert(invoice.payment_request.clone(), invoice);
        Ok(())
    }

    async fn get_invoice(&self, payment_request: &PaymentRequest) -> StorageResult<Option<Invoice>> {
        let invoices = self.invoices.read().map_err(|_| poisoned("invoices"))?;
        Ok(invoices.get(payment_request).cloned())
    }

    async fn list_unreconciled_invoices(
        &self,
        workspace_id: Option<&WorkspaceId>,
        created_after: Option<DateTime<Utc>>,
    ) -> StorageResult<Vec<Invoice>> {
        let invoices = self.invoices.read().map_err(|_| poisoned("invoices"))?;
        let mut values = invoices
            .values()
            .filter(|inv| inv.needs_reconciliation())
            .filter(|inv| workspace_id.map_or(true, |ws| &inv.workspace_id == ws))
            .filter(|inv| created_after.map_or(true, |cutoff| inv.created_at >= cutoff))
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.payment_request.cmp(&b.payment_request))
        });
        Ok(values)
    }

    async fn count_unconsumed_invoices(&self, workspace_id: &WorkspaceId) -> StorageResult<usize> {
        let invoices = self.invoices.read().map_err(|_| poisoned("invoices"))?;
        Ok(invoices
            .values()
            .filter(|inv| &inv.workspace_id == workspace_id && !inv.consumed)
            .count())
    }

    async fn mark_invoice_settled(
        &self,
        payment_request: &PaymentRequest,
        settled_at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let mut invoices = self.invoices.write().map_err(|_| poisoned("invoices"))?;
        let invoice = invoices
            .get_mut(payment_request)
            .ok_or_else(|| StorageError::NotFound(format!("invoice {payment_request} not found")))?;
        if invoice.settled {
            return Ok(false);
        }
        invoice.settled = true;
        invoice.settled_at = Some(settled_at);
        Ok(true)
    }

    async fn consume_invoice_and_credit(
        &self,
        payment_request: &PaymentRequest,
        consumed_at: DateTime<Utc>,
    ) -> StorageResult<LedgerEntry> {
        let mut invoices = self.invoices.write().map_err(|_| poisoned("invoices"))?;
        let invoice = invoices
            .get_mut(payment_request)
            .ok_or_else(|| StorageError::NotFound(format!("invoice {payment_request} not found")))?;
        if invoice.consumed {
            return Err(StorageError::AlreadyConsumed(payment_request.to_string()));
        }
        if !invoice.settled {
            return Err(StorageError::InvalidInput(format!(
                "invoice {payment_request} is not settled"
            )));
        }
        if invoice.kind != InvoiceKind::Budget {
            return Err(StorageError::InvalidInput(format!(
                "invoice {payment_request} is {}, not BUDGET",
                invoice.kind.as_str()
            )));
        }

        let mut ledgers = self.ledgers.write().map_err(|_| poisoned("ledgers"))?;
        let book = ledgers
            .get_mut(&invoice.workspace_id)
            .ok_or_else(|| missing_book(&invoice.workspace_id))?;
        let source = EntrySource::Invoice(payment_request.clone());
        if book.sources.contains(&source) {
            // Credited through another path; retire the invoice so it stops being polled.
            invoice.consumed = true;
            invoice.consumed_at = Some(consumed_at);
            return Err(StorageError::AlreadyConsumed(payment_request.to_string()));
        }
        let entry = book.append_credit(LedgerPosting {
            workspace_id: invoice.workspace_id.clone(),
            amount: invoice.amount,
            sender: invoice.payer.clone(),
            receiver: None,
            source,
            posted_at: consumed_at,
        })?;
        invoice.consumed = true;
        invoice.consumed_at = Some(consumed_at);
        Ok(entry)
    }
}

impl CofferStorage for InMemoryCofferStorage {
    fn backend_label(&self) -> &'static str {
        "memory"
    }
}
