//! Membership and role-grant mutation.

use crate::access::AccessEvaluator;
use crate::capability::{Capability, CapabilityRegistry};
use crate::directory::IdentityDirectory;
use crate::error::{CofferError, CofferResult};
use crate::storage::CofferStorage;
use crate::types::{Identity, Membership, RoleGrant, Workspace, WorkspaceId};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

/// Applies the self-action, delegation and directory rules around
/// membership and role changes.
#[derive(Clone)]
pub struct MembershipService {
    storage: Arc<dyn CofferStorage>,
    access: AccessEvaluator,
    registry: Arc<CapabilityRegistry>,
    directory: Arc<dyn IdentityDirectory>,
}

impl MembershipService {
    pub fn new(
        storage: Arc<dyn CofferStorage>,
        access: AccessEvaluator,
        registry: Arc<CapabilityRegistry>,
        directory: Arc<dyn IdentityDirectory>,
    ) -> Self {
        Self {
            storage,
            access,
            registry,
            directory,
        }
    }

    /// Grant a batch of roles to a member. All-or-nothing.
    pub async fn grant_roles<S: AsRef<str>>(
        &self,
        caller: &Identity,
        workspace_id: &WorkspaceId,
        target: &Identity,
        roles: &[S],
    ) -> CofferResult<Vec<RoleGrant>> {
        let capabilities = self
            .check_role_change(caller, workspace_id, target, roles)
            .await?;
        let grants = self
            .storage
            .grant_capabilities(workspace_id, target, &capabilities, Utc::now())
            .await?;
        info!(
            workspace_id = %workspace_id,
            caller = %caller,
            target = %target,
            granted = capabilities.len(),
            "roles granted"
        );
        Ok(grants)
    }

    /// Revoke a batch of roles from a member. All-or-nothing.
    pub async fn revoke_roles<S: AsRef<str>>(
        &self,
        caller: &Identity,
        workspace_id: &WorkspaceId,
        target: &Identity,
        roles: &[S],
    ) -> CofferResult<Vec<RoleGrant>> {
        let capabilities = self
            .check_role_change(caller, workspace_id, target, roles)
            .await?;
        self.storage
            .revoke_capabilities(workspace_id, target, &capabilities)
            .await?;
        info!(
            workspace_id = %workspace_id,
            caller = %caller,
            target = %target,
            revoked = capabilities.len(),
            "roles revoked"
        );
        Ok(self.storage.list_grants(workspace_id, target).await?)
    }

    async fn check_role_change<S: AsRef<str>>(
        &self,
        caller: &Identity,
        workspace_id: &WorkspaceId,
        target: &Identity,
        roles: &[S],
    ) -> CofferResult<Vec<Capability>> {
        if caller.is_anonymous() {
            return Err(CofferError::unauthorized("caller identity is required"));
        }
        if target == caller {
            return Err(CofferError::unauthorized("cannot modify own roles"));
        }
        let mut capabilities = self.registry.resolve_all(roles)?;
        capabilities.sort();
        capabilities.dedup();
        if capabilities.is_empty() {
            return Err(CofferError::InvalidInput("no roles requested".to_string()));
        }

        let workspace = self
            .access
            .authorize(caller, workspace_id, Capability::AddRoles)
            .await?;
        for capability in &capabilities {
            if !self
                .access
                .has_capability(caller, workspace_id, *capability)
                .await
            {
                return Err(CofferError::Unauthorized(format!(
                    "cannot delegate {capability} without holding it"
                )));
            }
        }

        ensure_live(&workspace)?;
        if self
            .storage
            .get_member(workspace_id, target)
            .await?
            .is_none()
        {
            return Err(CofferError::NotFound(format!(
                "{target} is not a member of {workspace_id}"
            )));
        }
        Ok(capabilities)
    }

    /// Add a known identity as a baseline member.
    pub async fn add_member(
        &self,
        caller: &Identity,
        workspace_id: &WorkspaceId,
        target: &Identity,
    ) -> CofferResult<Membership> {
        let workspace = self
            .check_member_change(caller, workspace_id, target, Capability::AddUser)
            .await?;

        let profile = self
            .directory
            .lookup_identity(target)
            .await
            .map_err(|e| CofferError::DirectoryUnavailable(e.to_string()))?;
        if profile.is_none() {
            return Err(CofferError::NotFound(format!("identity {target}")));
        }

        let membership = Membership {
            workspace_id: workspace.id.clone(),
            identity: target.clone(),
            joined_at: Utc::now(),
        };
        self.storage
            .add_member(membership.clone())
            .await
            .map_err(|e| match CofferError::from(e) {
                CofferError::Conflict(_) => CofferError::Conflict(format!(
                    "{target} is already a member of {workspace_id}"
                )),
                other => other,
            })?;
        info!(workspace_id = %workspace_id, caller = %caller, member = %target, "member added");
        Ok(membership)
    }

    /// Remove a member and purge all of its grants in the workspace.
    pub async fn remove_member(
        &self,
        caller: &Identity,
        workspace_id: &WorkspaceId,
        target: &Identity,
    ) -> CofferResult<()> {
        self.check_member_change(caller, workspace_id, target, Capability::DeleteUser)
            .await?;
        if !self.storage.remove_member(workspace_id, target).await? {
            return Err(CofferError::NotFound(format!(
                "{target} is not a member of {workspace_id}"
            )));
        }
        info!(workspace_id = %workspace_id, caller = %caller, member = %target, "member removed");
        Ok(())
    }

    async fn check_member_change(
        &self,
        caller: &Identity,
        workspace_id: &WorkspaceId,
        target: &Identity,
        required: Capability,
    ) -> CofferResult<Workspace> {
        if caller.is_anonymous() {
            return Err(CofferError::unauthorized("caller identity is required"));
        }
        if target.is_anonymous() {
            return Err(CofferError::InvalidInput("member identity is required".to_string()));
        }
        let workspace = self
            .storage
            .get_workspace(workspace_id)
            .await?
            .filter(|ws| !ws.deleted)
            .ok_or_else(|| CofferError::not_found(format!("workspace {workspace_id}")))?;
        if &workspace.owner == target {
            return Err(CofferError::unauthorized(
                "the workspace owner cannot be managed as a member",
            ));
        }
        if target == caller {
            return Err(CofferError::unauthorized("cannot add or remove yourself"));
        }
        if !self.access.has_capability(caller, workspace_id, required).await {
            debug!(workspace_id = %workspace_id, caller = %caller, capability = %required, "member change denied");
            return Err(CofferError::Unauthorized(format!(
                "{required} required in workspace {workspace_id}"
            )));
        }
        Ok(workspace)
    }

    pub async fn members(&self, workspace_id: &WorkspaceId) -> CofferResult<Vec<Membership>> {
        self.live_workspace(workspace_id).await?;
        Ok(self.storage.list_members(workspace_id).await?)
    }

    pub async fn member_count(&self, workspace_id: &WorkspaceId) -> CofferResult<usize> {
        Ok(self.members(workspace_id).await?.len())
    }

    /// The caller's own membership record.
    pub async fn membership(
        &self,
        identity: &Identity,
        workspace_id: &WorkspaceId,
    ) -> CofferResult<Membership> {
        self.live_workspace(workspace_id).await?;
        self.storage
            .get_member(workspace_id, identity)
            .await?
            .ok_or_else(|| {
                CofferError::NotFound(format!("{identity} is not a member of {workspace_id}"))
            })
    }

    pub async fn user_roles(
        &self,
        workspace_id: &WorkspaceId,
        identity: &Identity,
    ) -> CofferResult<Vec<RoleGrant>> {
        self.live_workspace(workspace_id).await?;
        Ok(self.storage.list_grants(workspace_id, identity).await?)
    }

    async fn live_workspace(&self, workspace_id: &WorkspaceId) -> CofferResult<Workspace> {
        let workspace = self
            .storage
            .get_workspace(workspace_id)
            .await?
            .ok_or_else(|| CofferError::not_found(format!("workspace {workspace_id}")))?;
        ensure_live(&workspace)?;
        Ok(workspace)
    }
}

fn ensure_live(workspace: &Workspace) -> CofferResult<()> {
    if workspace.deleted {
        return Err(CofferError::not_found(format!("workspace {}", workspace.id)));
    }
    Ok(())
}
