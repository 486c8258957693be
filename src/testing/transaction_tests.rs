//! Logical transactions over a router.

use super::{Call, MockConnection, TestShards};
use crate::context::{ExecContext, TxContext, TxStrategy};
use crate::datasource::{DataSource, ReplicaAwareConnection, Router};
use crate::error::{Error, TargetFailure};
use crate::types::Query;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn tx_ctx(strategy: TxStrategy) -> ExecContext {
    ExecContext::new().with_transaction(TxContext::new(strategy))
}

fn on(shards: &TestShards, index: usize) -> Query {
    Query::new("UPDATE orders SET paid = 1")
        .in_group(shards.group.clone())
        .on_db(TestShards::db(index))
}

#[tokio::test]
async fn test_non_sharded_transaction() {
    let primary = Arc::new(MockConnection::new("main"));
    let leaf: Arc<dyn DataSource> = Arc::new(ReplicaAwareConnection::new("main", primary.clone()));
    let router = Router::new(HashMap::from([("main".to_string(), leaf)]));

    let ctx = tx_ctx(TxStrategy::Single);
    let tx = router.begin_tx(&ctx).await.unwrap();
    tx.exec(&ctx, &Query::new("INSERT INTO t VALUES (1)")).await.unwrap();
    tx.commit(&ctx).await.unwrap();

    assert_eq!(
        primary.calls(),
        vec![
            Call::Begin,
            Call::TxExec("INSERT INTO t VALUES (1)".to_string()),
            Call::Commit
        ]
    );
    let snapshot = router.metrics().snapshot();
    assert_eq!(snapshot.tx_begun, 1);
    assert_eq!(snapshot.tx_committed, 1);
    assert_eq!(snapshot.native_tx_opened, 1);
}

#[tokio::test]
async fn test_delay_commit_reports_failed_target_only() {
    let shards = TestShards::new("orders", 2);
    shards.primaries[1].plan().fail_commit = Some(Error::driver("connection reset"));

    let ctx = tx_ctx(TxStrategy::Delay);
    let tx = shards.router.begin_tx(&ctx).await.unwrap();
    tx.exec(&ctx, &on(&shards, 0)).await.unwrap();
    tx.exec(&ctx, &on(&shards, 1)).await.unwrap();

    let err = tx.commit(&ctx).await.unwrap_err();
    assert_eq!(
        err,
        Error::PartialFailure {
            op: "commit",
            failures: vec![TargetFailure::new(
                shards.target(1),
                Error::driver("connection reset")
            )],
        }
    );
    // The first target stays committed.
    assert_eq!(shards.primaries[0].calls().last(), Some(&Call::Commit));
    assert!(!shards.primaries[0].calls().contains(&Call::Rollback));

    let metrics = shards.router.metrics();
    assert_eq!(metrics.snapshot().partial_failures, 1);
    assert_eq!(metrics.target_failures.get(&shards.target(1)), 1);
    assert_eq!(tx.rollback(&ctx).await, Err(Error::TransactionFinished));
}

#[tokio::test]
async fn test_single_rejects_second_target() {
    let shards = TestShards::new("orders", 2);
    let ctx = tx_ctx(TxStrategy::Single);
    let tx = shards.router.begin_tx(&ctx).await.unwrap();

    tx.exec(&ctx, &on(&shards, 0)).await.unwrap();
    let err = tx.exec(&ctx, &on(&shards, 1)).await.unwrap_err();
    assert_eq!(
        err,
        Error::CrossTargetTransaction {
            first: shards.target(0),
            attempted: shards.target(1),
        }
    );
    assert!(shards.primaries[1].calls().is_empty());

    // The open transaction on the first target is unaffected.
    tx.exec(&ctx, &on(&shards, 0)).await.unwrap();
    tx.commit(&ctx).await.unwrap();
    let calls = shards.primaries[0].calls();
    assert_eq!(calls.iter().filter(|c| **c == Call::Begin).count(), 1);
    assert_eq!(calls.last(), Some(&Call::Commit));
}

#[tokio::test]
async fn test_delay_rollback_without_statements() {
    let shards = TestShards::new("orders", 2);
    let ctx = tx_ctx(TxStrategy::Delay);
    let tx = shards.router.begin_tx(&ctx).await.unwrap();
    tx.rollback(&ctx).await.unwrap();
    assert!(shards.primaries.iter().all(|m| m.calls().is_empty()));
    assert_eq!(shards.router.metrics().snapshot().tx_rolled_back, 1);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_bounds_slow_commit() {
    let shards = TestShards::new("orders", 1);
    let ctx = tx_ctx(TxStrategy::Single);
    let tx = shards.router.begin_tx(&ctx).await.unwrap();
    tx.exec(&ctx, &on(&shards, 0)).await.unwrap();

    shards.primaries[0].plan().latency = Some(Duration::from_secs(10));
    let bounded = ctx.clone().with_timeout(Duration::from_millis(100));
    assert_eq!(tx.commit(&bounded).await, Err(Error::DeadlineExceeded));
}

#[tokio::test]
async fn test_cancelled_context_refuses_begin() {
    let shards = TestShards::new("orders", 1);
    let ctx = tx_ctx(TxStrategy::Delay);
    ctx.cancel.cancel();
    assert_eq!(shards.router.begin_tx(&ctx).await.err(), Some(Error::Cancelled));
    assert_eq!(shards.router.metrics().snapshot().tx_begun, 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_first_touches_open_one_native_tx() {
    let shards = TestShards::new("orders", 1);
    shards.primaries[0].plan().latency = Some(Duration::from_millis(50));
    let ctx = tx_ctx(TxStrategy::Delay);
    let tx = shards.router.begin_tx(&ctx).await.unwrap();

    let query = on(&shards, 0);
    let (first, second) = tokio::join!(tx.exec(&ctx, &query), tx.exec(&ctx, &query));
    first.unwrap();
    second.unwrap();
    tx.commit(&ctx).await.unwrap();

    let calls = shards.primaries[0].calls();
    assert_eq!(calls.iter().filter(|c| **c == Call::Begin).count(), 1);
    assert_eq!(shards.router.metrics().snapshot().native_tx_opened, 1);
}

#[tokio::test]
async fn test_delay_separates_groups_with_same_leaf_name() {
    let east = Arc::new(MockConnection::new("primary"));
    let west = Arc::new(MockConnection::new("primary"));
    let sources: HashMap<String, Arc<dyn DataSource>> = HashMap::from([
        (
            "east".to_string(),
            Arc::new(ReplicaAwareConnection::new("primary", east.clone())) as Arc<dyn DataSource>,
        ),
        (
            "west".to_string(),
            Arc::new(ReplicaAwareConnection::new("primary", west.clone())) as Arc<dyn DataSource>,
        ),
    ]);
    let router = Router::new(sources);

    let ctx = tx_ctx(TxStrategy::Delay);
    let tx = router.begin_tx(&ctx).await.unwrap();
    for group in ["east", "west"] {
        let q = Query::new("UPDATE t SET a = 1").in_group(group);
        tx.exec(&ctx, &q).await.unwrap();
    }
    tx.commit(&ctx).await.unwrap();

    for mock in [&east, &west] {
        assert_eq!(
            mock.calls(),
            vec![
                Call::Begin,
                Call::TxExec("UPDATE t SET a = 1".to_string()),
                Call::Commit
            ]
        );
    }
    assert_eq!(router.metrics().snapshot().native_tx_opened, 2);
}

#[tokio::test]
async fn test_commit_with_ended_context_can_still_roll_back() {
    let shards = TestShards::new("orders", 2);
    let ctx = tx_ctx(TxStrategy::Delay);
    let tx = shards.router.begin_tx(&ctx).await.unwrap();
    tx.exec(&ctx, &on(&shards, 0)).await.unwrap();
    tx.exec(&ctx, &on(&shards, 1)).await.unwrap();

    let ended = ctx.clone();
    ended.cancel.cancel();
    assert_eq!(tx.commit(&ended).await, Err(Error::Cancelled));

    let fresh = tx_ctx(TxStrategy::Delay);
    tx.rollback(&fresh).await.unwrap();
    for mock in &shards.primaries {
        assert_eq!(mock.calls().last(), Some(&Call::Rollback));
    }
    let snapshot = shards.router.metrics().snapshot();
    assert_eq!(snapshot.tx_committed, 0);
    assert_eq!(snapshot.tx_rolled_back, 1);
}
