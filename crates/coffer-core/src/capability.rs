//! Fixed capability catalogue.
//!
//! Capabilities are not user-creatable. The registry is built once at startup
//! and shared by reference; nothing mutates it afterwards.

use crate::error::{CofferError, CofferResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Permission tag evaluated within a single workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    #[serde(rename = "ADD BOUNTY")]
    AddBounty,
    #[serde(rename = "UPDATE BOUNTY")]
    UpdateBounty,
    #[serde(rename = "DELETE BOUNTY")]
    DeleteBounty,
    #[serde(rename = "PAY BOUNTY")]
    PayBounty,
    #[serde(rename = "ADD USER")]
    AddUser,
    #[serde(rename = "UPDATE USER")]
    UpdateUser,
    #[serde(rename = "DELETE USER")]
    DeleteUser,
    #[serde(rename = "ADD ROLES")]
    AddRoles,
    #[serde(rename = "ADD BUDGET")]
    AddBudget,
    #[serde(rename = "WITHDRAW BUDGET")]
    WithdrawBudget,
    #[serde(rename = "VIEW REPORT")]
    ViewReport,
    #[serde(rename = "EDIT ORGANIZATION")]
    EditOrganization,
}

impl Capability {
    pub const ALL: [Capability; 12] = [
        Capability::AddBounty,
        Capability::UpdateBounty,
        Capability::DeleteBounty,
        Capability::PayBounty,
        Capability::AddUser,
        Capability::UpdateUser,
        Capability::DeleteUser,
        Capability::AddRoles,
        Capability::AddBudget,
        Capability::WithdrawBudget,
        Capability::ViewReport,
        Capability::EditOrganization,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddBounty => "ADD BOUNTY",
            Self::UpdateBounty => "UPDATE BOUNTY",
            Self::DeleteBounty => "DELETE BOUNTY",
            Self::PayBounty => "PAY BOUNTY",
            Self::AddUser => "ADD USER",
            Self::UpdateUser => "UPDATE USER",
            Self::DeleteUser => "DELETE USER",
            Self::AddRoles => "ADD ROLES",
            Self::AddBudget => "ADD BUDGET",
            Self::WithdrawBudget => "WITHDRAW BUDGET",
            Self::ViewReport => "VIEW REPORT",
            Self::EditOrganization => "EDIT ORGANIZATION",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Self::AddBounty => "Create bounties funded by the workspace",
            Self::UpdateBounty => "Edit workspace bounties",
            Self::DeleteBounty => "Delete workspace bounties",
            Self::PayBounty => "Disburse bounty payouts from the workspace budget",
            Self::AddUser => "Add members to the workspace",
            Self::UpdateUser => "Update member details",
            Self::DeleteUser => "Remove members from the workspace",
            Self::AddRoles => "Grant and revoke member roles",
            Self::AddBudget => "Issue budget invoices for the workspace",
            Self::WithdrawBudget => "Withdraw funds from the workspace budget",
            Self::ViewReport => "View budget balance, history, and payments",
            Self::EditOrganization => "Edit workspace settings",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Catalogue entry returned to clients rendering role pickers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityInfo {
    pub name: String,
    pub capability: Capability,
    pub description: String,
}

/// Immutable name → capability map.
#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    entries: BTreeMap<&'static str, Capability>,
}

impl CapabilityRegistry {
    /// Registry carrying every known capability.
    pub fn standard() -> Self {
        Self::with_capabilities(&Capability::ALL)
    }

    /// Registry restricted to a subset, for deployments that disable roles.
    pub fn with_capabilities(capabilities: &[Capability]) -> Self {
        Self {
            entries: capabilities.iter().map(|c| (c.as_str(), *c)).collect(),
        }
    }

    pub fn resolve(&self, name: &str) -> Option<Capability> {
        self.entries.get(name.trim()).copied()
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.entries.contains_key(capability.as_str())
    }

    /// Resolve a batch of role names, failing on the first unknown name.
    pub fn resolve_all<S: AsRef<str>>(&self, names: &[S]) -> CofferResult<Vec<Capability>> {
        names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                self.resolve(name)
                    .ok_or_else(|| CofferError::InvalidCapability(name.to_string()))
            })
            .collect()
    }

    pub fn list(&self) -> Vec<CapabilityInfo> {
        self.entries
            .iter()
            .map(|(name, capability)| CapabilityInfo {
                name: (*name).to_string(),
                capability: *capability,
                description: capability.description().to_string(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
