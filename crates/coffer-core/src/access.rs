//! Capability evaluation.

use crate::capability::Capability;
use crate::error::{CofferError, CofferResult};
use crate::storage::CofferStorage;
use crate::types::{Identity, Workspace, WorkspaceId};
use std::sync::Arc;
use tracing::warn;

/// Answers whether an identity holds a capability in a workspace.
///
/// The owner implicitly holds every capability, including on a soft-deleted
/// workspace; everyone else needs an explicit grant, and grants are purged
/// when a workspace is deleted. Anonymous callers hold nothing.
#[derive(Clone)]
pub struct AccessEvaluator {
    storage: Arc<dyn CofferStorage>,
}

impl AccessEvaluator {
    pub fn new(storage: Arc<dyn CofferStorage>) -> Self {
        Self { storage }
    }

    /// Evaluate without raising. Storage failures evaluate to `false`.
    pub async fn has_capability(
        &self,
        identity: &Identity,
        workspace_id: &WorkspaceId,
        capability: Capability,
    ) -> bool {
        if identity.is_anonymous() {
            return false;
        }
        match self.evaluate(identity, workspace_id, capability).await {
            Ok((_, allowed)) => allowed,
            Err(e) => {
                warn!(
                    error = %e,
                    workspace_id = %workspace_id,
                    capability = %capability,
                    "capability check failed closed"
                );
                false
            }
        }
    }

    /// Require a capability and return the workspace it was checked against.
    pub async fn authorize(
        &self,
        identity: &Identity,
        workspace_id: &WorkspaceId,
        capability: Capability,
    ) -> CofferResult<Workspace> {
        if identity.is_anonymous() {
            return Err(CofferError::unauthorized("caller identity is required"));
        }
        let (workspace, allowed) = self.evaluate(identity, workspace_id, capability).await?;
        let workspace = workspace
            .ok_or_else(|| CofferError::not_found(format!("workspace {workspace_id}")))?;
        if !allowed {
            return Err(CofferError::Unauthorized(format!(
                "{capability} required in workspace {workspace_id}"
            )));
        }
        Ok(workspace)
    }

    async fn evaluate(
        &self,
        identity: &Identity,
        workspace_id: &WorkspaceId,
        capability: Capability,
    ) -> CofferResult<(Option<Workspace>, bool)> {
        let Some(workspace) = self.storage.get_workspace(workspace_id).await? else {
            return Ok((None, false));
        };
        if workspace.is_owner(identity) {
            return Ok((Some(workspace), true));
        }
        if workspace.deleted {
            return Ok((Some(workspace), false));
        }
        let granted = self
            .storage
            .has_grant(workspace_id, identity, capability)
            .await?;
        Ok((Some(workspace), granted))
    }
}
