//! Storage contracts and backends.
//!
//! Backends own the atomicity guarantees: a balance change and its ledger entry
//! are applied together, the debit floor is checked in the same critical
//! section as the write, and an invoice's consumed flag flips only alongside
//! its credit.

mod error;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod traits;

pub use error::{StorageError, StorageResult};
pub use memory::InMemoryCofferStorage;
#[cfg(feature = "postgres")]
pub use postgres::PostgresCofferStorage;
pub use traits::{
    CofferStorage, InvoiceStore, LedgerStore, LedgerTotals, MembershipStore, QueryWindow,
    WorkspaceStore,
};
