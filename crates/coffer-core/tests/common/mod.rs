#![allow(dead_code)]

use async_trait::async_trait;
use coffer_core::{
    CofferEngine, CofferStorage, DirectoryError, EngineConfig, GatewayError, Identity,
    IdentityDirectory, IdentityProfile, InMemoryCofferStorage, Invoice, InvoiceKind,
    PaymentRequest, SettlementGateway, SettlementStatus, WorkspaceId,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const OWNER: &str = "02owner";

/// Gateway whose answers tests set per payment request. Unknown requests are unpaid.
#[derive(Default)]
pub struct ScriptedGateway {
    settled: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<String>>,
    pub calls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn settle(&self, pr: &str) {
        self.settled.lock().unwrap().insert(pr.to_string());
    }

    pub fn fail(&self, pr: &str) {
        self.failing.lock().unwrap().insert(pr.to_string());
    }

    pub fn recover(&self, pr: &str) {
        self.failing.lock().unwrap().remove(pr);
    }
}

#[async_trait]
impl SettlementGateway for ScriptedGateway {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn query_settlement(
        &self,
        payment_request: &PaymentRequest,
    ) -> Result<SettlementStatus, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.failing.lock().unwrap().contains(payment_request.as_str()) {
            return Err(GatewayError::Transport("connection reset".to_string()));
        }
        Ok(SettlementStatus {
            settled: self.settled.lock().unwrap().contains(payment_request.as_str()),
        })
    }
}

#[derive(Default)]
pub struct Directory {
    known: Mutex<HashMap<String, IdentityProfile>>,
    pub broken: Mutex<bool>,
}

impl Directory {
    pub fn know(&self, identity: &str, name: &str) {
        self.known.lock().unwrap().insert(
            identity.to_string(),
            IdentityProfile {
                identity: Identity::new(identity),
                display_name: name.to_string(),
                avatar_url: Some(format!("https://img.example/{name}.png")),
            },
        );
    }
}

#[async_trait]
impl IdentityDirectory for Directory {
    async fn lookup_identity(
        &self,
        identity: &Identity,
    ) -> Result<Option<IdentityProfile>, DirectoryError> {
        if *self.broken.lock().unwrap() {
            return Err(DirectoryError::Transport("directory offline".to_string()));
        }
        Ok(self.known.lock().unwrap().get(identity.as_str()).cloned())
    }
}

pub struct Harness {
    pub engine: CofferEngine,
    pub storage: Arc<InMemoryCofferStorage>,
    pub gateway: Arc<ScriptedGateway>,
    pub directory: Arc<Directory>,
    pub workspace: WorkspaceId,
}

impl Harness {
    pub async fn new() -> Self {
        let storage = Arc::new(InMemoryCofferStorage::new());
        let gateway = Arc::new(ScriptedGateway::default());
        let directory = Arc::new(Directory::default());
        let dyn_storage: Arc<dyn CofferStorage> = storage.clone();
        let engine = CofferEngine::new(
            dyn_storage,
            gateway.clone(),
            directory.clone(),
            EngineConfig::default(),
        );
        let workspace = engine
            .workspaces()
            .create_workspace(&owner(), WorkspaceId::new("ws-alpha"), "alpha")
            .await
            .unwrap()
            .id;
        Self {
            engine,
            storage,
            gateway,
            directory,
            workspace,
        }
    }

    /// Adds `identity` as a plain member, registering it in the directory first.
    pub async fn member(&self, identity: &str) -> Identity {
        self.directory.know(identity, identity);
        let id = Identity::new(identity);
        self.engine
            .members()
            .add_member(&owner(), &self.workspace, &id)
            .await
            .unwrap();
        id
    }

    pub async fn grant(&self, identity: &Identity, roles: &[&str]) {
        self.engine
            .members()
            .grant_roles(&owner(), &self.workspace, identity, roles)
            .await
            .unwrap();
    }

    pub async fn budget_invoice(&self, pr: &str, amount: u64) -> Invoice {
        self.engine
            .workspaces()
            .register_invoice(
                &owner(),
                Invoice::new(
                    PaymentRequest::new(pr),
                    self.workspace.clone(),
                    InvoiceKind::Budget,
                    amount,
                    Some(owner()),
                ),
            )
            .await
            .unwrap()
    }
}

pub fn owner() -> Identity {
    Identity::new(OWNER)
}
