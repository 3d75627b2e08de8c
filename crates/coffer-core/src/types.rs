use crate::capability::Capability;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Workspace identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(pub String);

impl WorkspaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Caller or member identity (a node public key).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(pub String);

impl Identity {
    pub fn new(pubkey: impl Into<String>) -> Self {
        Self(pubkey.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An empty identity means the transport could not authenticate the caller.
    pub fn is_anonymous(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lightning payment request; the natural key of an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentRequest(pub String);

impl PaymentRequest {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaymentRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier assigned by the bounty payout subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayoutId(pub String);

impl PayoutId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PayoutId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Workspace record. The spendable balance lives with the ledger, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    pub owner: Identity,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workspace {
    pub fn new(id: WorkspaceId, name: impl Into<String>, owner: Identity) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            owner,
            deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owner(&self, identity: &Identity) -> bool {
        !identity.is_anonymous() && &self.owner == identity
    }
}

/// Workspace listing row with its balance projected through the report gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceSummary {
    #[serde(flatten)]
    pub workspace: Workspace,
    pub budget: u64,
}

/// Baseline membership record. Grants hang off it and are purged with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub workspace_id: WorkspaceId,
    pub identity: Identity,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub workspace_id: WorkspaceId,
    pub identity: Identity,
    pub capability: Capability,
    pub granted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryDirection {
    Credit,
    Debit,
}

impl EntryDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credit => "credit",
            Self::Debit => "debit",
        }
    }
}

/// What caused a ledger entry. At most one entry exists per source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum EntrySource {
    Invoice(PaymentRequest),
    Payout(PayoutId),
}

impl EntrySource {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Invoice(_) => "invoice",
            Self::Payout(_) => "payout",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Invoice(pr) => pr.as_str(),
            Self::Payout(id) => id.as_str(),
        }
    }
}

/// Append-only ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: String,
    pub workspace_id: WorkspaceId,
    pub direction: EntryDirection,
    pub amount: u64,
    pub sender: Option<Identity>,
    pub receiver: Option<Identity>,
    pub source: EntrySource,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn from_posting(posting: LedgerPosting, direction: EntryDirection) -> Self {
        Self {
            entry_id: format!("entry-{}", Uuid::new_v4()),
            workspace_id: posting.workspace_id,
            direction,
            amount: posting.amount,
            sender: posting.sender,
            receiver: posting.receiver,
            source: posting.source,
            created_at: posting.posted_at,
        }
    }
}

/// Ledger write request. Entry ids and direction are assigned by storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerPosting {
    pub workspace_id: WorkspaceId,
    pub amount: u64,
    pub sender: Option<Identity>,
    pub receiver: Option<Identity>,
    pub source: EntrySource,
    pub posted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceKind {
    Budget,
    Keysend,
    #[serde(other)]
    Other,
}

impl InvoiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Budget => "BUDGET",
            Self::Keysend => "KEYSEND",
            Self::Other => "OTHER",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "BUDGET" => Self::Budget,
            "KEYSEND" => Self::Keysend,
            _ => Self::Other,
        }
    }
}

/// Reconciliation state derived from the settled/consumed flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceState {
    Pending,
    SettledUnconsumed,
    SettledConsumed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub payment_request: PaymentRequest,
    pub workspace_id: WorkspaceId,
    pub kind: InvoiceKind,
    pub amount: u64,
    /// Identity that funds the invoice, recorded as the credit's sender.
    pub payer: Option<Identity>,
    pub settled: bool,
    pub consumed: bool,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl Invoice {
    pub fn new(
        payment_request: PaymentRequest,
        workspace_id: WorkspaceId,
        kind: InvoiceKind,
        amount: u64,
        payer: Option<Identity>,
    ) -> Self {
        Self {
            payment_request,
            workspace_id,
            kind,
            amount,
            payer,
            settled: false,
            consumed: false,
            created_at: Utc::now(),
            settled_at: None,
            consumed_at: None,
        }
    }

    pub fn state(&self) -> InvoiceState {
        match (self.settled, self.consumed) {
            (_, true) => InvoiceState::SettledConsumed,
            (true, false) => InvoiceState::SettledUnconsumed,
            (false, false) => InvoiceState::Pending,
        }
    }

    /// Whether reconciliation still has work to do for this invoice.
    ///
    /// Settled invoices of other kinds are handled elsewhere and drop out once
    /// their settlement has been observed.
    pub fn needs_reconciliation(&self) -> bool {
        !self.consumed && (!self.settled || self.kind == InvoiceKind::Budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoice(kind: InvoiceKind) -> Invoice {
        Invoice::new(
            PaymentRequest::new("lnbc1"),
            WorkspaceId::new("ws"),
            kind,
            500,
            None,
        )
    }

    #[test]
    fn invoice_state_follows_flags() {
        let mut inv = invoice(InvoiceKind::Budget);
        assert_eq!(inv.state(), InvoiceState::Pending);
        inv.settled = true;
        assert_eq!(inv.state(), InvoiceState::SettledUnconsumed);
        inv.consumed = true;
        assert_eq!(inv.state(), InvoiceState::SettledConsumed);
    }

    #[test]
    fn settled_non_budget_invoices_leave_the_work_queue() {
        let mut keysend = invoice(InvoiceKind::Keysend);
        assert!(keysend.needs_reconciliation());
        keysend.settled = true;
        assert!(!keysend.needs_reconciliation());

        let mut budget = invoice(InvoiceKind::Budget);
        budget.settled = true;
        assert!(budget.needs_reconciliation());
        budget.consumed = true;
        assert!(!budget.needs_reconciliation());
    }

    #[test]
    fn unknown_invoice_kinds_deserialize_as_other() {
        let kind: InvoiceKind = serde_json::from_str("\"BOUNTY_ESCROW\"").unwrap();
        assert_eq!(kind, InvoiceKind::Other);
        assert_eq!(InvoiceKind::parse("BUDGET"), InvoiceKind::Budget);
    }

    #[test]
    fn anonymous_identity_is_never_owner() {
        let ws = Workspace::new(WorkspaceId::new("ws"), "alpha", Identity::new(""));
        assert!(!ws.is_owner(&Identity::new("")));
    }
}
