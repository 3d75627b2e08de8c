//! Two-cadence reconciliation scheduler.
//!
//! The invoice poll runs often and only looks at recently issued invoices.
//! The sweep runs rarely, covers every open invoice and audits balances.
//! A cadence never overlaps itself; the two cadences may overlap each other,
//! which the engine's atomic invoice claim makes safe.

use crate::config::SchedulerConfig;
use chrono::{DateTime, Utc};
use coffer_core::{InvoiceReconciler, PassScope, ReconcileReport};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::time::{interval, Duration, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    InvoicePoll,
    Sweep,
}

impl Cadence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvoicePoll => "invoice_poll",
            Self::Sweep => "sweep",
        }
    }
}

/// Outcome of one completed tick.
#[derive(Debug, Clone, Serialize)]
pub struct CadenceRun {
    pub cadence: Cadence,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub report: Option<ReconcileReport>,
    pub discrepancies: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub running: bool,
    pub skipped_ticks: u64,
    pub last_invoice_poll: Option<CadenceRun>,
    pub last_sweep: Option<CadenceRun>,
}

/// Scheduler state
pub struct Scheduler {
    config: SchedulerConfig,
    reconciler: InvoiceReconciler,
    running: AtomicBool,
    poll_busy: AtomicBool,
    sweep_busy: AtomicBool,
    skipped_ticks: AtomicU64,
    last_poll: RwLock<Option<CadenceRun>>,
    last_sweep: RwLock<Option<CadenceRun>>,
    shutdown_tx: watch::Sender<bool>,
}

/// Clears a cadence's busy flag when the tick ends, even on panic.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, reconciler: InvoiceReconciler) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            config,
            reconciler,
            running: AtomicBool::new(false),
            poll_busy: AtomicBool::new(false),
            sweep_busy: AtomicBool::new(false),
            skipped_ticks: AtomicU64::new(0),
            last_poll: RwLock::new(None),
            last_sweep: RwLock::new(None),
            shutdown_tx,
        })
    }

    /// Run both cadences until [`Scheduler::stop`] is called.
    pub async fn start(self: Arc<Self>) {
        if !self.config.enabled {
            tracing::info!("Scheduler disabled; reconciliation runs on demand only");
            return;
        }
        self.running.store(true, Ordering::Release);
        tracing::info!(
            invoice_poll_secs = self.config.invoice_poll_interval_secs,
            sweep_secs = self.config.sweep_interval_secs,
            "Scheduler started"
        );

        let poll = tokio::spawn(self.clone().run_loop(
            Cadence::InvoicePoll,
            self.config.invoice_poll_interval_secs,
        ));
        let sweep = tokio::spawn(
            self.clone()
                .run_loop(Cadence::Sweep, self.config.sweep_interval_secs),
        );

        let (poll, sweep) = tokio::join!(poll, sweep);
        for result in [poll, sweep] {
            if let Err(e) = result {
                tracing::error!(error = %e, "Scheduler loop aborted");
            }
        }

        self.running.store(false, Ordering::Release);
        tracing::info!("Scheduler stopped");
    }

    /// Ask both loops to exit. An in-flight tick finishes first.
    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);
    }

    async fn run_loop(self: Arc<Self>, cadence: Cadence, period_secs: u64) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow() {
            return;
        }
        let mut ticker = interval(Duration::from_secs(period_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cadence(cadence).await;
                }
                _ = shutdown_rx.changed() => break,
            }
        }
        tracing::debug!(cadence = cadence.as_str(), "Cadence loop exited");
    }

    /// Run one tick of `cadence` now. Returns `None` when the previous tick of
    /// the same cadence is still running.
    pub async fn run_cadence(&self, cadence: Cadence) -> Option<CadenceRun> {
        let busy = self.busy_flag(cadence);
        if busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.skipped_ticks.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                cadence = cadence.as_str(),
                "Previous tick still running; skipping"
            );
            return None;
        }
        let _guard = BusyGuard(busy);

        let started_at = Utc::now();
        let mut run = CadenceRun {
            cadence,
            started_at,
            finished_at: started_at,
            report: None,
            discrepancies: 0,
            error: None,
        };

        let scope = match cadence {
            Cadence::InvoicePoll => PassScope::Recent,
            Cadence::Sweep => PassScope::Full,
        };
        match self.reconciler.reconcile_pass(scope).await {
            Ok(report) => {
                if report.examined > 0 {
                    tracing::info!(
                        cadence = cadence.as_str(),
                        workspaces = report.workspaces,
                        examined = report.examined,
                        credited = report.credited,
                        credited_amount = report.credited_amount,
                        gateway_failures = report.gateway_failures,
                        "Reconciliation tick finished"
                    );
                } else {
                    tracing::debug!(cadence = cadence.as_str(), "No open invoices");
                }
                run.report = Some(report);
            }
            Err(e) => {
                tracing::error!(cadence = cadence.as_str(), error = %e, "Reconciliation tick failed");
                run.error = Some(e.to_string());
            }
        }

        if cadence == Cadence::Sweep {
            match self.reconciler.audit_balances().await {
                Ok(discrepancies) => run.discrepancies = discrepancies.len(),
                Err(e) => {
                    tracing::error!(error = %e, "Balance audit failed");
                    run.error.get_or_insert_with(|| e.to_string());
                }
            }
        }

        run.finished_at = Utc::now();
        *self.last_run_slot(cadence).write().await = Some(run.clone());
        Some(run)
    }

    pub fn is_busy(&self, cadence: Cadence) -> bool {
        self.busy_flag(cadence).load(Ordering::Acquire)
    }

    pub async fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            enabled: self.config.enabled,
            running: self.running.load(Ordering::Acquire),
            skipped_ticks: self.skipped_ticks.load(Ordering::Relaxed),
            last_invoice_poll: self.last_poll.read().await.clone(),
            last_sweep: self.last_sweep.read().await.clone(),
        }
    }

    fn busy_flag(&self, cadence: Cadence) -> &AtomicBool {
        match cadence {
            Cadence::InvoicePoll => &self.poll_busy,
            Cadence::Sweep => &self.sweep_busy,
        }
    }

    fn last_run_slot(&self, cadence: Cadence) -> &RwLock<Option<CadenceRun>> {
        match cadence {
            Cadence::InvoicePoll => &self.last_poll,
            Cadence::Sweep => &self.last_sweep,
        }
    }
}
