//! External collaborators for coffer: the settlement gateway and the identity
//! directory, over HTTP, plus in-process doubles for tests and local runs.

#![deny(unsafe_code)]

mod directory;
mod gateway;

pub use directory::{HttpIdentityDirectory, StaticIdentityDirectory};
pub use gateway::{FlakySettlementGateway, HttpSettlementGateway, StaticSettlementGateway};

use std::time::Duration;

/// Shared client construction: every outbound call is bounded by `timeout`.
fn build_http_client(timeout: Duration) -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| format!("failed to build HTTP client: {e}"))
}
