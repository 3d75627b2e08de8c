//! Coffer core: role-gated workspace budgets.
//!
//! This crate owns the pieces that carry invariants:
//! - a fixed capability registry and the access evaluator consulted before
//!   every mutating or sensitive read operation
//! - membership and role-grant mutation with self-action and delegation rules
//! - the budget ledger, whose balance always equals settled credits minus debits
//! - invoice reconciliation, which credits a settled budget invoice exactly once
//!   even when passes overlap
//! - the payment history view, enriched with identity display metadata
//!
//! Transport, scheduling, and gateway wire formats live in sibling crates.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod access;
pub mod capability;
pub mod directory;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod history;
pub mod ledger;
pub mod membership;
pub mod reconcile;
pub mod storage;
pub mod types;
pub mod workspace;

pub use access::AccessEvaluator;
pub use capability::{Capability, CapabilityInfo, CapabilityRegistry};
pub use directory::{DirectoryError, IdentityDirectory, IdentityProfile};
pub use engine::{CofferEngine, EngineConfig};
pub use error::{CofferError, CofferResult};
pub use gateway::{GatewayError, SettlementGateway, SettlementStatus};
pub use history::{PaymentHistoryView, PaymentRecord};
pub use ledger::{BudgetLedger, BudgetStatus};
pub use membership::MembershipService;
pub use reconcile::{
    BalanceDiscrepancy, InvoiceOutcome, InvoiceReconciler, PassScope, ReconcileReport,
    ReconcilerConfig,
};
pub use storage::{
    CofferStorage, InMemoryCofferStorage, InvoiceStore, LedgerStore, LedgerTotals,
    MembershipStore, QueryWindow, StorageError, StorageResult, WorkspaceStore,
};
#[cfg(feature = "postgres")]
pub use storage::PostgresCofferStorage;
pub use types::{
    EntryDirection, EntrySource, Identity, Invoice, InvoiceKind, InvoiceState, LedgerEntry,
    LedgerPosting, Membership, PaymentRequest, PayoutId, RoleGrant, Workspace, WorkspaceId,
    WorkspaceSummary,
};
pub use workspace::{WorkspaceService, MAX_INVOICE_AMOUNT};
