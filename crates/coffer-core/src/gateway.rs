//! Settlement gateway boundary.

use crate::types::PaymentRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Settlement state reported by the gateway for one payment request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementStatus {
    pub settled: bool,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway timed out after {0}ms")]
    Timeout(u64),

    #[error("gateway transport error: {0}")]
    Transport(String),

    #[error("gateway rejected request: {0}")]
    Rejected(String),
}

/// External payment node that reports whether an invoice has been paid.
///
/// Implementations must be idempotent for a given payment request; the
/// reconciler may ask about the same invoice many times.
#[async_trait]
pub trait SettlementGateway: Send + Sync {
    fn name(&self) -> &str;

    async fn query_settlement(
        &self,
        payment_request: &PaymentRequest,
    ) -> Result<SettlementStatus, GatewayError>;
}
