mod common;

use chrono::{Duration, Utc};
use coffer_core::{
    CofferError, Identity, Invoice, InvoiceKind, InvoiceStore, LedgerStore, PassScope,
    PaymentRequest, PayoutId, QueryWindow, WorkspaceId, MAX_INVOICE_AMOUNT,
};
use common::{owner, Harness};
use std::sync::atomic::Ordering;

#[tokio::test]
async fn settled_budget_invoice_credits_once() {
    let h = Harness::new().await;
    h.budget_invoice("lnbc5000", 5000).await;
    h.gateway.settle("lnbc5000");

    let first = h
        .engine
        .reconciler()
        .reconcile_pass(PassScope::Recent)
        .await
        .unwrap();
    assert_eq!(first.credited, 1);
    assert_eq!(first.credited_amount, 5000);
    assert_eq!(h.engine.ledger().current_balance(&h.workspace).await.unwrap(), 5000);

    let invoice = h
        .storage
        .get_invoice(&PaymentRequest::new("lnbc5000"))
        .await
        .unwrap()
        .unwrap();
    assert!(invoice.settled && invoice.consumed);

    let second = h
        .engine
        .reconciler()
        .reconcile_pass(PassScope::Recent)
        .await
        .unwrap();
    assert_eq!(second.examined, 0);
    let third = h
        .engine
        .reconciler()
        .reconcile_pass(PassScope::Full)
        .await
        .unwrap();
    assert_eq!(third.examined, 0);
    assert_eq!(h.engine.ledger().current_balance(&h.workspace).await.unwrap(), 5000);
}

#[tokio::test]
async fn gateway_failure_leaves_invoice_for_a_later_tick() {
    let h = Harness::new().await;
    h.budget_invoice("lnbc-x", 300).await;
    h.budget_invoice("lnbc-y", 200).await;
    h.gateway.settle("lnbc-x");
    h.gateway.settle("lnbc-y");
    h.gateway.fail("lnbc-x");

    let report = h
        .engine
        .workspaces()
        .poll_workspace_invoices(&owner(), &h.workspace)
        .await
        .unwrap();
    assert_eq!(report.gateway_failures, 1);
    assert_eq!(report.credited, 1);
    assert_eq!(h.engine.ledger().current_balance(&h.workspace).await.unwrap(), 200);
    let x = h
        .storage
        .get_invoice(&PaymentRequest::new("lnbc-x"))
        .await
        .unwrap()
        .unwrap();
    assert!(!x.consumed);

    h.gateway.recover("lnbc-x");
    let report = h
        .engine
        .workspaces()
        .poll_workspace_invoices(&owner(), &h.workspace)
        .await
        .unwrap();
    assert_eq!(report.credited, 1);
    assert_eq!(h.engine.ledger().current_balance(&h.workspace).await.unwrap(), 500);
}

#[tokio::test]
async fn unpaid_invoices_stay_pending() {
    let h = Harness::new().await;
    h.budget_invoice("lnbc-unpaid", 900).await;
    let report = h
        .engine
        .reconciler()
        .reconcile_pass(PassScope::Full)
        .await
        .unwrap();
    assert_eq!(report.still_pending, 1);
    assert_eq!(
        h.engine
            .workspaces()
            .pending_invoice_count(&owner(), &h.workspace)
            .await
            .unwrap(),
        1
    );
    let status = h
        .engine
        .ledger()
        .budget_status(&owner(), &h.workspace)
        .await
        .unwrap();
    assert_eq!(status.pending_invoice_count, 1);
    assert_eq!(status.pending_invoice_amount, 900);
    assert_eq!(status.current_balance, 0);
}

#[tokio::test]
async fn invoice_registration_validates_input() {
    let h = Harness::new().await;
    h.budget_invoice("lnbc-dup", 10).await;
    let dup = Invoice::new(
        PaymentRequest::new("lnbc-dup"),
        h.workspace.clone(),
        InvoiceKind::Budget,
        10,
        None,
    );
    let err = h
        .engine
        .workspaces()
        .register_invoice(&owner(), dup)
        .await
        .unwrap_err();
    assert!(matches!(err, CofferError::Conflict(_)));

    let zero = Invoice::new(
        PaymentRequest::new("lnbc-zero"),
        h.workspace.clone(),
        InvoiceKind::Budget,
        0,
        None,
    );
    let err = h
        .engine
        .workspaces()
        .register_invoice(&owner(), zero)
        .await
        .unwrap_err();
    assert!(matches!(err, CofferError::InvalidInput(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_passes_never_double_credit() {
    let h = Harness::new().await;
    for i in 0..20 {
        let pr = format!("lnbc-{i}");
        h.budget_invoice(&pr, 100).await;
        h.gateway.settle(&pr);
    }

    let mut handles = Vec::new();
    for i in 0..6 {
        let reconciler = h.engine.reconciler().clone();
        let scope = if i % 2 == 0 {
            PassScope::Recent
        } else {
            PassScope::Full
        };
        handles.push(tokio::spawn(async move {
            reconciler.reconcile_pass(scope).await.unwrap()
        }));
    }

    let mut credited = 0;
    for handle in handles {
        let report = handle.await.unwrap();
        assert_eq!(report.errors, 0);
        credited += report.credited;
    }
    assert_eq!(credited, 20);
    assert!(h.gateway.calls.load(Ordering::SeqCst) >= 20);

    let totals = h.storage.ledger_totals(&h.workspace).await.unwrap();
    assert_eq!(totals.balance, 2000);
    assert_eq!(totals.entry_count, 20);
    assert!(totals.is_consistent());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_payouts_respect_the_floor() {
    let h = Harness::new().await;
    h.engine
        .ledger()
        .credit(&h.workspace, 1000, PaymentRequest::new("lnbc-seed"))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..25 {
        let ledger = h.engine.ledger().clone();
        let ws = h.workspace.clone();
        handles.push(tokio::spawn(async move {
            ledger
                .disburse(&owner(), &ws, 100, PayoutId::new(format!("p-{i}")), Some(Identity::new("hunter")))
                .await
        }));
    }

    let mut paid = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => paid += 1,
            Err(CofferError::InsufficientBudget { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(paid, 10);
    assert_eq!(h.engine.ledger().current_balance(&h.workspace).await.unwrap(), 0);
}

#[tokio::test]
async fn payment_history_enriches_and_tolerates_directory_gaps() {
    let h = Harness::new().await;
    h.directory.know(common::OWNER, "Olive");
    h.budget_invoice("lnbc-hist", 400).await;
    h.gateway.settle("lnbc-hist");
    h.engine
        .reconciler()
        .reconcile_pass(PassScope::Recent)
        .await
        .unwrap();
    h.engine
        .ledger()
        .disburse(&owner(), &h.workspace, 150, PayoutId::new("p-1"), Some(Identity::new("stranger")))
        .await
        .unwrap();

    let records = h
        .engine
        .payments()
        .payment_history(&owner(), &h.workspace, QueryWindow::all())
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
    // newest first
    assert_eq!(records[0].entry.amount, 150);
    assert_eq!(records[0].sender_name, "Olive");
    assert_eq!(records[0].receiver_name, "");
    assert_eq!(records[1].sender_name, "Olive");

    *h.directory.broken.lock().unwrap() = true;
    let records = h
        .engine
        .payments()
        .payment_history(&owner(), &h.workspace, QueryWindow::page(1, 0))
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].sender_name, "");
    assert_eq!(records[0].sender_avatar, "");

    let err = h
        .engine
        .payments()
        .payment_history(&Identity::new("stranger"), &h.workspace, QueryWindow::all())
        .await
        .unwrap_err();
    assert!(matches!(err, CofferError::Unauthorized(_)));
}

#[tokio::test]
async fn duplicate_payout_ids_are_conflicts() {
    let h = Harness::new().await;
    h.engine
        .ledger()
        .credit(&h.workspace, 500, PaymentRequest::new("lnbc-500"))
        .await
        .unwrap();
    h.engine
        .ledger()
        .disburse(&owner(), &h.workspace, 100, PayoutId::new("p-7"), None)
        .await
        .unwrap();
    let err = h
        .engine
        .ledger()
        .disburse(&owner(), &h.workspace, 100, PayoutId::new("p-7"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CofferError::Conflict(_)));
    assert_eq!(h.engine.ledger().current_balance(&h.workspace).await.unwrap(), 400);
}

#[tokio::test]
async fn pass_totals_saturate_instead_of_wrapping() {
    let h = Harness::new().await;
    let beta = h
        .engine
        .workspaces()
        .create_workspace(&owner(), WorkspaceId::new("ws-beta"), "beta")
        .await
        .unwrap()
        .id;
    let half = u64::MAX / 2 + 1;
    for (pr, ws) in [("lnbc-big-a", &h.workspace), ("lnbc-big-b", &beta)] {
        h.storage
            .create_invoice(Invoice::new(
                PaymentRequest::new(pr),
                ws.clone(),
                InvoiceKind::Budget,
                half,
                None,
            ))
            .await
            .unwrap();
        h.gateway.settle(pr);
    }

    let report = h
        .engine
        .reconciler()
        .reconcile_pass(PassScope::Full)
        .await
        .unwrap();
    assert_eq!(report.credited, 2);
    assert_eq!(report.credited_amount, u64::MAX);
    assert_eq!(h.engine.ledger().current_balance(&beta).await.unwrap(), half);
}

#[tokio::test]
async fn oversized_invoices_are_rejected_and_pending_sum_saturates() {
    let h = Harness::new().await;
    let huge = Invoice::new(
        PaymentRequest::new("lnbc-huge"),
        h.workspace.clone(),
        InvoiceKind::Budget,
        u64::MAX,
        None,
    );
    let err = h
        .engine
        .workspaces()
        .register_invoice(&owner(), huge)
        .await
        .unwrap_err();
    assert!(matches!(err, CofferError::InvalidInput(_)));

    for pr in ["lnbc-max-1", "lnbc-max-2", "lnbc-max-3"] {
        h.budget_invoice(pr, MAX_INVOICE_AMOUNT).await;
    }
    let status = h
        .engine
        .ledger()
        .budget_status(&owner(), &h.workspace)
        .await
        .unwrap();
    assert_eq!(status.pending_invoice_count, 3);
    assert_eq!(status.pending_invoice_amount, u64::MAX);
}

#[tokio::test]
async fn invoice_credited_out_of_band_is_retired() {
    let h = Harness::new().await;
    h.budget_invoice("lnbc-pre", 100).await;
    h.engine
        .ledger()
        .credit(&h.workspace, 100, PaymentRequest::new("lnbc-pre"))
        .await
        .unwrap();
    h.gateway.settle("lnbc-pre");

    let first = h
        .engine
        .reconciler()
        .reconcile_pass(PassScope::Full)
        .await
        .unwrap();
    assert_eq!(first.examined, 1);
    assert_eq!(first.already_consumed, 1);
    assert_eq!(first.credited, 0);

    let invoice = h
        .storage
        .get_invoice(&PaymentRequest::new("lnbc-pre"))
        .await
        .unwrap()
        .unwrap();
    assert!(invoice.settled && invoice.consumed);
    assert!(invoice.consumed_at.is_some());
    let status = h
        .engine
        .ledger()
        .budget_status(&owner(), &h.workspace)
        .await
        .unwrap();
    assert_eq!(status.pending_invoice_count, 0);
    assert_eq!(status.current_balance, 100);
    assert_eq!(status.total_credited, 100);

    let second = h
        .engine
        .reconciler()
        .reconcile_pass(PassScope::Full)
        .await
        .unwrap();
    assert_eq!(second.examined, 0);
    assert_eq!(h.gateway.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn payout_ids_are_scoped_to_their_workspace() {
    let h = Harness::new().await;
    let beta = h
        .engine
        .workspaces()
        .create_workspace(&owner(), WorkspaceId::new("ws-beta"), "beta")
        .await
        .unwrap()
        .id;
    for (ws, pr) in [(&h.workspace, "lnbc-a"), (&beta, "lnbc-b")] {
        h.engine
            .ledger()
            .credit(ws, 50, PaymentRequest::new(pr))
            .await
            .unwrap();
        h.engine
            .ledger()
            .disburse(&owner(), ws, 20, PayoutId::new("p-shared"), None)
            .await
            .unwrap();
        assert_eq!(h.engine.ledger().current_balance(ws).await.unwrap(), 30);
    }
}

#[tokio::test]
async fn recent_pass_skips_old_invoices_until_a_full_sweep() {
    let h = Harness::new().await;
    let mut old = Invoice::new(
        PaymentRequest::new("lnbc-old"),
        h.workspace.clone(),
        InvoiceKind::Budget,
        700,
        None,
    );
    old.created_at = Utc::now() - Duration::days(2);
    h.storage.create_invoice(old).await.unwrap();
    h.gateway.settle("lnbc-old");

    let recent = h
        .engine
        .reconciler()
        .reconcile_pass(PassScope::Recent)
        .await
        .unwrap();
    assert_eq!(recent.examined, 0);
    assert_eq!(h.gateway.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.engine.ledger().current_balance(&h.workspace).await.unwrap(), 0);

    let full = h
        .engine
        .reconciler()
        .reconcile_pass(PassScope::Full)
        .await
        .unwrap();
    assert_eq!(full.examined, 1);
    assert_eq!(full.credited, 1);
    assert_eq!(h.engine.ledger().current_balance(&h.workspace).await.unwrap(), 700);
}
