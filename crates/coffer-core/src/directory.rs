//! Identity directory boundary.

use crate::types::Identity;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Display metadata for an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityProfile {
    pub identity: Identity,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory timed out after {0}ms")]
    Timeout(u64),

    #[error("directory transport error: {0}")]
    Transport(String),
}

/// Lookup of identities known to the wider platform.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// `Ok(None)` means the identity is unknown.
    async fn lookup_identity(
        &self,
        identity: &Identity,
    ) -> Result<Option<IdentityProfile>, DirectoryError>;
}
