//! Integration tests for sequential token merging
//!
//! Tests cover:
//! - Fold order (largest first, ties in ledger order)
//! - Trivial folds (no holdings, single holding)
//! - Abort on the first failed exercise
//! - No overlapping exercises within one fold
//! - Independent folds across symbols

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use swap_ledger_sdk::ledger::Choice;
use swap_ledger_sdk::sandbox_ledger::InMemoryLedger;
use swap_ledger_sdk::token_merge::{MergeOutcome, SequentialMergeCoordinator};

async fn seed(ledger: &InMemoryLedger, owner: &str, symbol: &str, amounts: &[i64]) -> Vec<swap_ledger_sdk::ContractId> {
    let mut ids = Vec::with_capacity(amounts.len());
    for amount in amounts {
        ids.push(
            ledger
                .seed_token("issuer", owner, symbol, Decimal::new(*amount, 0))
                .await,
        );
    }
    ids
}

/// Test that holdings fold largest first with ties kept in query order
#[tokio::test]
async fn test_fold_order_and_exercise_count() {
    let ledger = Arc::new(InMemoryLedger::new());
    let ids = seed(&ledger, "alice", "ETH", &[5, 20, 3, 20]).await;
    let (c5, c20_first, c3, c20_second) = (&ids[0], &ids[1], &ids[2], &ids[3]);

    let coordinator = SequentialMergeCoordinator::new(ledger.clone());
    let outcome = coordinator.merge_all("alice", "ETH").await;

    let log = ledger.exercise_log().await;
    assert_eq!(log.len(), 3, "N holdings take N-1 exercises");
    assert!(log.iter().all(|r| r.succeeded));

    assert_eq!(&log[0].contract_id, c20_first);
    assert_eq!(log[0].choice, Choice::Merge { other: c20_second.clone() });
    assert_eq!(log[1].choice, Choice::Merge { other: c5.clone() });
    assert_eq!(log[2].choice, Choice::Merge { other: c3.clone() });

    // Each step exercises the successor of the previous one
    assert_ne!(&log[1].contract_id, c20_first);
    assert_ne!(log[1].contract_id, log[2].contract_id);

    let holdings = ledger.tokens_of("alice", "ETH").await;
    assert_eq!(holdings.len(), 1);
    assert_eq!(holdings[0].amount, Decimal::new(48, 0));
    assert_eq!(
        outcome,
        MergeOutcome::Merged {
            contract_id: holdings[0].contract_id.clone(),
            folded: 4,
        }
    );

    // Command ids are unique per exercise
    let mut command_ids: Vec<_> = log.iter().map(|r| r.command_id.clone()).collect();
    command_ids.sort();
    command_ids.dedup();
    assert_eq!(command_ids.len(), 3);
}

/// Test that no holdings means no ledger mutation
#[tokio::test]
async fn test_no_holdings() {
    let ledger = Arc::new(InMemoryLedger::new());
    seed(&ledger, "bob", "ETH", &[1, 2]).await;

    let outcome = SequentialMergeCoordinator::new(ledger.clone())
        .merge_all("alice", "ETH")
        .await;

    assert_eq!(outcome, MergeOutcome::NoHoldings);
    assert!(outcome.contract_id().is_none());
    assert_eq!(ledger.exercise_calls(), 0);
}

/// Test that a single holding is returned untouched
#[tokio::test]
async fn test_single_holding_unchanged() {
    let ledger = Arc::new(InMemoryLedger::new());
    let ids = seed(&ledger, "alice", "USDC", &[700]).await;

    let outcome = SequentialMergeCoordinator::new(ledger.clone())
        .merge_all("alice", "USDC")
        .await;

    assert_eq!(outcome, MergeOutcome::Unchanged(ids[0].clone()));
    assert_eq!(outcome.contract_id(), Some(&ids[0]));
    assert_eq!(ledger.exercise_calls(), 0);
    assert!(ledger.is_active(&ids[0]).await);
}

/// Test that a failed exercise aborts the rest of the fold
#[tokio::test]
async fn test_failure_aborts_remaining_exercises() {
    let ledger = Arc::new(InMemoryLedger::new());
    seed(&ledger, "alice", "ETH", &[4, 3, 2, 1]).await;
    ledger.fail_exercise_at(2);

    let outcome = SequentialMergeCoordinator::new(ledger.clone())
        .merge_all("alice", "ETH")
        .await;

    assert!(outcome.is_failure());
    assert!(outcome.contract_id().is_none());
    match &outcome {
        MergeOutcome::Failed {
            completed_exercises,
            last_contract_id,
            ..
        } => {
            assert_eq!(*completed_exercises, 1);
            assert!(last_contract_id.is_some());
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    assert_eq!(ledger.exercise_calls(), 2, "third exercise must not be attempted");
    let log = ledger.exercise_log().await;
    assert_eq!(log.iter().filter(|r| r.succeeded).count(), 1);

    // 4 + 3 merged, 2 and 1 left alone
    let mut amounts: Vec<_> = ledger
        .tokens_of("alice", "ETH")
        .await
        .into_iter()
        .map(|t| t.amount)
        .collect();
    amounts.sort();
    assert_eq!(
        amounts,
        vec![Decimal::new(1, 0), Decimal::new(2, 0), Decimal::new(7, 0)]
    );
}

/// Test that one fold never has two exercises in flight
#[tokio::test]
async fn test_exercises_never_overlap_within_fold() {
    let ledger = Arc::new(InMemoryLedger::new().with_exercise_delay(Duration::from_millis(10)));
    seed(&ledger, "alice", "ETH", &[1, 2, 3, 4, 5]).await;

    let outcome = SequentialMergeCoordinator::new(ledger.clone())
        .merge_all("alice", "ETH")
        .await;

    assert!(matches!(outcome, MergeOutcome::Merged { folded: 5, .. }));
    assert_eq!(ledger.exercise_calls(), 4);
    assert_eq!(ledger.max_concurrent_exercises(), 1);
}

/// Test that folds for different symbols run independently
#[tokio::test]
async fn test_merge_symbols_runs_folds_concurrently() {
    let ledger = Arc::new(InMemoryLedger::new().with_exercise_delay(Duration::from_millis(50)));
    seed(&ledger, "alice", "ETH", &[1, 2, 3]).await;
    seed(&ledger, "alice", "USDC", &[10, 20, 30]).await;

    let coordinator = SequentialMergeCoordinator::new(ledger.clone());
    let outcomes = coordinator
        .merge_symbols("alice", &["ETH", "USDC", "ETH", "BTC"])
        .await;

    let symbols: Vec<_> = outcomes.iter().map(|(s, _)| s.as_str()).collect();
    assert_eq!(symbols, vec!["ETH", "USDC", "BTC"]);
    assert!(matches!(outcomes[0].1, MergeOutcome::Merged { folded: 3, .. }));
    assert!(matches!(outcomes[1].1, MergeOutcome::Merged { folded: 3, .. }));
    assert_eq!(outcomes[2].1, MergeOutcome::NoHoldings);

    assert_eq!(ledger.tokens_of("alice", "ETH").await.len(), 1);
    assert_eq!(ledger.tokens_of("alice", "USDC").await[0].amount, Decimal::new(60, 0));
    assert_eq!(ledger.max_concurrent_exercises(), 2);
}
