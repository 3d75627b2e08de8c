//! Invoice reconciliation.
//!
//! An invoice moves `Pending -> SettledUnconsumed -> SettledConsumed`. The first
//! step only records what the gateway reported. The second step is the storage
//! claim that flips `consumed` and writes the credit together; a pass that
//! loses the claim sees `AlreadyConsumed` and writes nothing. Passes may
//! therefore overlap freely, both within one cadence and across cadences.

use crate::error::{CofferError, CofferResult};
use crate::gateway::SettlementGateway;
use crate::storage::{CofferStorage, StorageError};
use crate::types::{Invoice, InvoiceKind, WorkspaceId};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Upper bound on a single settlement query.
    pub gateway_timeout: Duration,
    pub max_concurrent_workspaces: usize,
    /// How far back the frequent pass looks for open invoices.
    pub recent_window: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            gateway_timeout: Duration::from_secs(5),
            max_concurrent_workspaces: 8,
            recent_window: Duration::from_secs(86_400),
        }
    }
}

/// Which invoices a pass covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassScope {
    /// Open invoices created within the recent window.
    Recent,
    /// Every open invoice, including those of deleted workspaces.
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum InvoiceOutcome {
    Credited { amount: u64 },
    /// Settled, but not a BUDGET invoice; nothing to credit.
    SettlementObserved,
    StillPending,
    /// Another pass won the claim.
    AlreadyConsumed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub workspaces: usize,
    pub examined: usize,
    pub credited: usize,
    pub credited_amount: u64,
    pub settlement_observed: usize,
    pub still_pending: usize,
    pub already_consumed: usize,
    pub gateway_failures: usize,
    pub errors: usize,
}

impl ReconcileReport {
    fn record(&mut self, outcome: InvoiceOutcome) {
        match outcome {
            InvoiceOutcome::Credited { amount } => {
                self.credited += 1;
                self.credited_amount = self.credited_amount.saturating_add(amount);
            }
            InvoiceOutcome::SettlementObserved => self.settlement_observed += 1,
            InvoiceOutcome::StillPending => self.still_pending += 1,
            InvoiceOutcome::AlreadyConsumed => self.already_consumed += 1,
        }
    }

    pub fn merge(&mut self, other: &ReconcileReport) {
        self.workspaces += other.workspaces;
        self.examined += other.examined;
        self.credited += other.credited;
        self.credited_amount = self.credited_amount.saturating_add(other.credited_amount);
        self.settlement_observed += other.settlement_observed;
        self.still_pending += other.still_pending;
        self.already_consumed += other.already_consumed;
        self.gateway_failures += other.gateway_failures;
        self.errors += other.errors;
    }
}

/// A workspace whose stored balance disagrees with its entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDiscrepancy {
    pub workspace_id: WorkspaceId,
    pub stored_balance: u64,
    pub total_credited: u64,
    pub total_debited: u64,
}

#[derive(Clone)]
pub struct InvoiceReconciler {
    storage: Arc<dyn CofferStorage>,
    gateway: Arc<dyn SettlementGateway>,
    config: ReconcilerConfig,
}

impl InvoiceReconciler {
    pub fn new(
        storage: Arc<dyn CofferStorage>,
        gateway: Arc<dyn SettlementGateway>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            storage,
            gateway,
            config,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Advance one invoice as far as the gateway allows.
    ///
    /// A gateway failure or timeout returns `GatewayUnavailable` and leaves the
    /// invoice untouched.
    pub async fn reconcile_invoice(&self, invoice: &Invoice) -> CofferResult<InvoiceOutcome> {
        if invoice.consumed {
            return Ok(InvoiceOutcome::AlreadyConsumed);
        }

        if !invoice.settled {
            let timeout_ms = self.config.gateway_timeout.as_millis();
            let status = tokio::time::timeout(
                self.config.gateway_timeout,
                self.gateway.query_settlement(&invoice.payment_request),
            )
            .await
            .map_err(|_| {
                CofferError::GatewayUnavailable(format!(
                    "{} timed out after {timeout_ms}ms",
                    self.gateway.name()
                ))
            })?
            .map_err(|e| CofferError::GatewayUnavailable(e.to_string()))?;

            if !status.settled {
                return Ok(InvoiceOutcome::StillPending);
            }
            self.storage
                .mark_invoice_settled(&invoice.payment_request, Utc::now())
                .await?;
            debug!(
                payment_request = %invoice.payment_request,
                workspace_id = %invoice.workspace_id,
                "invoice settlement observed"
            );
        }

        if invoice.kind != InvoiceKind::Budget {
            return Ok(InvoiceOutcome::SettlementObserved);
        }

        match self
            .storage
            .consume_invoice_and_credit(&invoice.payment_request, Utc::now())
            .await
        {
            Ok(entry) => {
                info!(
                    payment_request = %invoice.payment_request,
                    workspace_id = %entry.workspace_id,
                    amount = entry.amount,
                    "budget invoice credited"
                );
                Ok(InvoiceOutcome::Credited {
                    amount: entry.amount,
                })
            }
            Err(StorageError::AlreadyConsumed(_)) => {
                debug!(
                    payment_request = %invoice.payment_request,
                    "invoice already claimed or credited"
                );
                Ok(InvoiceOutcome::AlreadyConsumed)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Reconcile every open invoice of one workspace.
    pub async fn reconcile_workspace(
        &self,
        workspace_id: &WorkspaceId,
    ) -> CofferResult<ReconcileReport> {
        let invoices = self
            .storage
            .list_unreconciled_invoices(Some(workspace_id), None)
            .await?;
        Ok(self.reconcile_invoices(workspace_id, invoices).await)
    }

    async fn reconcile_invoices(
        &self,
        workspace_id: &WorkspaceId,
        invoices: Vec<Invoice>,
    ) -> ReconcileReport {
        let mut report = ReconcileReport {
            workspaces: 1,
            ..ReconcileReport::default()
        };
        for invoice in &invoices {
            report.examined += 1;
            match self.reconcile_invoice(invoice).await {
                Ok(outcome) => report.record(outcome),
                Err(CofferError::GatewayUnavailable(reason)) => {
                    report.gateway_failures += 1;
                    warn!(
                        workspace_id = %workspace_id,
                        payment_request = %invoice.payment_request,
                        error = %reason,
                        "settlement query failed; invoice left for the next tick"
                    );
                }
                Err(e) => {
                    report.errors += 1;
                    error!(
                        workspace_id = %workspace_id,
                        payment_request = %invoice.payment_request,
                        error = %e,
                        "invoice reconciliation failed"
                    );
                }
            }
        }
        report
    }

    /// Run one pass over every workspace with open invoices in scope.
    /// Workspaces are processed concurrently up to the configured limit.
    pub async fn reconcile_pass(&self, scope: PassScope) -> CofferResult<ReconcileReport> {
        let created_after = match scope {
            PassScope::Recent => chrono::Duration::from_std(self.config.recent_window)
                .ok()
                .and_then(|window| Utc::now().checked_sub_signed(window)),
            PassScope::Full => None,
        };
        let invoices = self
            .storage
            .list_unreconciled_invoices(None, created_after)
            .await?;

        let mut by_workspace: BTreeMap<WorkspaceId, Vec<Invoice>> = BTreeMap::new();
        for invoice in invoices {
            by_workspace
                .entry(invoice.workspace_id.clone())
                .or_default()
                .push(invoice);
        }

        let reports = stream::iter(by_workspace)
            .map(|(workspace_id, invoices)| async move {
                self.reconcile_invoices(&workspace_id, invoices).await
            })
            .buffer_unordered(self.config.max_concurrent_workspaces.max(1))
            .collect::<Vec<_>>()
            .await;

        let mut total = ReconcileReport::default();
        for report in &reports {
            total.merge(report);
        }
        Ok(total)
    }

    /// Compare every workspace's stored balance with the sum of its entries.
    /// Mismatches are logged and returned; nothing is corrected. A workspace
    /// whose totals cannot be read is logged and skipped.
    pub async fn audit_balances(&self) -> CofferResult<Vec<BalanceDiscrepancy>> {
        let mut discrepancies = Vec::new();
        for workspace in self.storage.list_workspaces().await? {
            let totals = match self.storage.ledger_totals(&workspace.id).await {
                Ok(totals) => totals,
                Err(e) => {
                    error!(
                        workspace_id = %workspace.id,
                        error = %e,
                        "balance audit could not read ledger totals"
                    );
                    continue;
                }
            };
            if totals.is_consistent() {
                continue;
            }
            error!(
                workspace_id = %workspace.id,
                stored_balance = totals.balance,
                total_credited = totals.total_credited,
                total_debited = totals.total_debited,
                "ledger balance does not match its entries"
            );
            discrepancies.push(BalanceDiscrepancy {
                workspace_id: workspace.id,
                stored_balance: totals.balance,
                total_credited: totals.total_credited,
                total_debited: totals.total_debited,
            });
        }
        Ok(discrepancies)
    }
}
