//! Payment history with display metadata resolved at read time.

use crate::access::AccessEvaluator;
use crate::capability::Capability;
use crate::directory::{IdentityDirectory, IdentityProfile};
use crate::error::CofferResult;
use crate::storage::{CofferStorage, QueryWindow};
use crate::types::{Identity, LedgerEntry, WorkspaceId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Ledger entry plus counterparty display fields. Empty fields mean the
/// directory could not resolve the identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    #[serde(flatten)]
    pub entry: LedgerEntry,
    pub sender_name: String,
    pub sender_avatar: String,
    pub receiver_name: String,
    pub receiver_avatar: String,
}

#[derive(Clone)]
pub struct PaymentHistoryView {
    storage: Arc<dyn CofferStorage>,
    access: AccessEvaluator,
    directory: Arc<dyn IdentityDirectory>,
}

impl PaymentHistoryView {
    pub fn new(
        storage: Arc<dyn CofferStorage>,
        access: AccessEvaluator,
        directory: Arc<dyn IdentityDirectory>,
    ) -> Self {
        Self {
            storage,
            access,
            directory,
        }
    }

    pub async fn payment_history(
        &self,
        caller: &Identity,
        workspace_id: &WorkspaceId,
        window: QueryWindow,
    ) -> CofferResult<Vec<PaymentRecord>> {
        self.access
            .authorize(caller, workspace_id, Capability::ViewReport)
            .await?;
        let entries = self.storage.list_entries(workspace_id, window).await?;

        let mut profiles: HashMap<Identity, Option<IdentityProfile>> = HashMap::new();
        let mut records = Vec::with_capacity(entries.len());
        for entry in entries {
            let sender = self.resolve(entry.sender.as_ref(), &mut profiles).await;
            let receiver = self.resolve(entry.receiver.as_ref(), &mut profiles).await;
            let (sender_name, sender_avatar) = display_fields(sender);
            let (receiver_name, receiver_avatar) = display_fields(receiver);
            records.push(PaymentRecord {
                entry,
                sender_name,
                sender_avatar,
                receiver_name,
                receiver_avatar,
            });
        }
        Ok(records)
    }

    async fn resolve(
        &self,
        identity: Option<&Identity>,
        cache: &mut HashMap<Identity, Option<IdentityProfile>>,
    ) -> Option<IdentityProfile> {
        let identity = identity.filter(|id| !id.is_anonymous())?;
        if let Some(cached) = cache.get(identity) {
            return cached.clone();
        }
        let profile = match self.directory.lookup_identity(identity).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(identity = %identity, error = %e, "identity lookup failed; display fields left empty");
                None
            }
        };
        cache.insert(identity.clone(), profile.clone());
        profile
    }
}

fn display_fields(profile: Option<IdentityProfile>) -> (String, String) {
    match profile {
        Some(profile) => (profile.display_name, profile.avatar_url.unwrap_or_default()),
        None => (String::new(), String::new()),
    }
}
