//! Property tests: the stored balance always equals credits minus debits.

use coffer_core::{
    AccessEvaluator, BudgetLedger, CofferError, CofferStorage, Identity, InMemoryCofferStorage,
    LedgerStore, PaymentRequest, PayoutId, Workspace, WorkspaceId, WorkspaceStore,
};
use proptest::prelude::*;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Op {
    Credit(u64),
    Debit(u64),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u64..10_000).prop_map(Op::Credit),
        (1u64..15_000).prop_map(Op::Debit),
    ]
}

async fn fresh_ledger() -> (BudgetLedger, Arc<InMemoryCofferStorage>, WorkspaceId) {
    let storage = Arc::new(InMemoryCofferStorage::new());
    let ws = Workspace::new(WorkspaceId::new("ws"), "prop", Identity::new("owner"));
    let id = ws.id.clone();
    storage.create_workspace(ws).await.unwrap();
    let dyn_storage: Arc<dyn CofferStorage> = storage.clone();
    let ledger = BudgetLedger::new(dyn_storage.clone(), AccessEvaluator::new(dyn_storage));
    (ledger, storage, id)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn balance_matches_entry_sums(ops in prop::collection::vec(arb_op(), 1..40)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (ledger, storage, ws) = fresh_ledger().await;
            let mut model: u64 = 0;
            for (i, op) in ops.iter().enumerate() {
                match op {
                    Op::Credit(amount) => {
                        ledger
                            .credit(&ws, *amount, PaymentRequest::new(format!("lnbc-{i}")))
                            .await
                            .unwrap();
                        model += amount;
                    }
                    Op::Debit(amount) => {
                        let result = ledger.debit(&ws, *amount, PayoutId::new(format!("p-{i}"))).await;
                        if *amount > model {
                            let rejected = matches!(result, Err(CofferError::InsufficientBudget { .. }));
                            prop_assert!(rejected);
                        } else {
                            prop_assert!(result.is_ok());
                            model -= amount;
                        }
                    }
                }
                let totals = storage.ledger_totals(&ws).await.unwrap();
                prop_assert!(totals.is_consistent());
                prop_assert_eq!(totals.balance, model);
            }
            Ok(())
        })?;
    }

    #[test]
    fn concurrent_debits_never_overdraw(amounts in prop::collection::vec(1u64..500, 2..24), seed in 100u64..3_000) {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let (ledger, storage, ws) = fresh_ledger().await;
            ledger.credit(&ws, seed, PaymentRequest::new("lnbc-seed")).await.unwrap();

            let handles = amounts
                .iter()
                .enumerate()
                .map(|(i, amount)| {
                    let ledger = ledger.clone();
                    let ws = ws.clone();
                    let amount = *amount;
                    tokio::spawn(async move {
                        ledger.debit(&ws, amount, PayoutId::new(format!("p-{i}"))).await.map(|_| amount)
                    })
                })
                .collect::<Vec<_>>();

            let mut spent = 0;
            for handle in handles {
                if let Ok(amount) = handle.await.unwrap() {
                    spent += amount;
                }
            }
            let totals = storage.ledger_totals(&ws).await.unwrap();
            prop_assert!(spent <= seed);
            prop_assert_eq!(totals.balance, seed - spent);
            prop_assert!(totals.is_consistent());
            Ok(())
        })?;
    }
}
