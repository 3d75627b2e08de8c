use crate::storage::StorageError;
use thiserror::Error;

/// Result alias for engine operations.
pub type CofferResult<T> = Result<T, CofferError>;

/// Caller-visible error taxonomy.
///
/// Authorization and validation failures are raised before any write, so a
/// returned error never leaves partial state behind.
#[derive(Debug, Error)]
pub enum CofferError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid capability '{0}'")]
    InvalidCapability(String),

    #[error("insufficient budget: requested {requested}, available {available}")]
    InsufficientBudget { available: u64, requested: u64 },

    #[error("settlement gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("identity directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// A concurrent pass already consumed the invoice. Never surfaced to callers.
    #[error("invoice '{0}' already consumed")]
    AlreadyConsumed(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl CofferError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}

impl From<StorageError> for CofferError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(message) => Self::NotFound(message),
            StorageError::Conflict(message) => Self::Conflict(message),
            StorageError::AlreadyConsumed(payment_request) => Self::AlreadyConsumed(payment_request),
            StorageError::InsufficientBudget {
                available,
                requested,
            } => Self::InsufficientBudget {
                available,
                requested,
            },
            StorageError::InvalidInput(message) => Self::InvalidInput(message),
            StorageError::Serialization(message) | StorageError::Backend(message) => {
                Self::Storage(message)
            }
        }
    }
}
