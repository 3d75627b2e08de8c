//! Coffer daemon library
//!
//! Components behind `cofferd`:
//! - layered configuration
//! - the two-cadence reconciliation scheduler
//! - the REST transport over the coffer engine
//! - server lifecycle management

pub mod api;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod server;

pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError, DaemonResult};
pub use scheduler::{Cadence, Scheduler};
pub use server::Server;
