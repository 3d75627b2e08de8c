//! Engine facade wiring storage, collaborators and services together.

use crate::access::AccessEvaluator;
use crate::capability::{CapabilityInfo, CapabilityRegistry};
use crate::directory::IdentityDirectory;
use crate::gateway::SettlementGateway;
use crate::history::PaymentHistoryView;
use crate::ledger::BudgetLedger;
use crate::membership::MembershipService;
use crate::reconcile::{InvoiceReconciler, ReconcilerConfig};
use crate::storage::CofferStorage;
use crate::workspace::WorkspaceService;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub reconciler: ReconcilerConfig,
    /// Defaults to the full capability set.
    pub registry: Option<CapabilityRegistry>,
}

/// Shared handle to every coffer service. Cheap to clone.
#[derive(Clone)]
pub struct CofferEngine {
    storage: Arc<dyn CofferStorage>,
    registry: Arc<CapabilityRegistry>,
    access: AccessEvaluator,
    members: MembershipService,
    ledger: BudgetLedger,
    reconciler: InvoiceReconciler,
    payments: PaymentHistoryView,
    workspaces: WorkspaceService,
}

impl CofferEngine {
    pub fn new(
        storage: Arc<dyn CofferStorage>,
        gateway: Arc<dyn SettlementGateway>,
        directory: Arc<dyn IdentityDirectory>,
        config: EngineConfig,
    ) -> Self {
        let registry = Arc::new(config.registry.unwrap_or_default());
        let access = AccessEvaluator::new(storage.clone());
        let members = MembershipService::new(
            storage.clone(),
            access.clone(),
            registry.clone(),
            directory.clone(),
        );
        let ledger = BudgetLedger::new(storage.clone(), access.clone());
        let reconciler = InvoiceReconciler::new(storage.clone(), gateway, config.reconciler);
        let payments = PaymentHistoryView::new(storage.clone(), access.clone(), directory);
        let workspaces = WorkspaceService::new(storage.clone(), ledger.clone(), reconciler.clone());

        Self {
            storage,
            registry,
            access,
            members,
            ledger,
            reconciler,
            payments,
            workspaces,
        }
    }

    pub fn storage(&self) -> &Arc<dyn CofferStorage> {
        &self.storage
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn capabilities(&self) -> Vec<CapabilityInfo> {
        self.registry.list()
    }

    pub fn access(&self) -> &AccessEvaluator {
        &self.access
    }

    pub fn members(&self) -> &MembershipService {
        &self.members
    }

    pub fn ledger(&self) -> &BudgetLedger {
        &self.ledger
    }

    pub fn reconciler(&self) -> &InvoiceReconciler {
        &self.reconciler
    }

    pub fn payments(&self) -> &PaymentHistoryView {
        &self.payments
    }

    pub fn workspaces(&self) -> &WorkspaceService {
        &self.workspaces
    }
}
