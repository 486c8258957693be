//! Sharded example: scatter-gather reads and a multi-shard transaction.
//!
//! Run with:
//!   RUST_LOG=shardkit=debug,info cargo run --example sharded

use shardkit::testing::MockConnection;
use shardkit::{
    collect, AggregateMerger, Aggregator, BoxRows, Column, ColumnType, DataSource, Destination,
    Dispatcher, Error, ExecContext, MemoryRows, Paging, Query, ReplicaAwareConnection, Result, Router, Row,
    ShardMap, ShardingAlgorithm, SortColumn, SortMerger, TxContext, TxStrategy, Value,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const SHARDS: i64 = 4;

/// `user_id mod 4` picks the logical database.
struct ModShard;

impl ShardingAlgorithm for ModShard {
    fn sharding(&self, keys: &[Value]) -> Result<Vec<Destination>> {
        let mut out: Vec<Destination> = Vec::new();
        for key in keys {
            let Value::Int(id) = key else {
                return Err(Error::Config(format!("user_id must be an integer, got {}", key)));
            };
            let dest = Destination::new("orders", format!("orders_{}", id.rem_euclid(SHARDS)), "orders");
            if !out.contains(&dest) {
                out.push(dest);
            }
        }
        Ok(out)
    }

    fn broadcast(&self) -> Vec<Destination> {
        (0..SHARDS)
            .map(|i| Destination::new("orders", format!("orders_{}", i), "orders"))
            .collect()
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let columns = vec![
        Column::new("id", ColumnType::Int),
        Column::new("amount", ColumnType::Int),
    ];
    let mut shards = HashMap::new();
    for i in 0..SHARDS {
        let db = format!("orders_{}", i);
        let rows = (0..3)
            .map(|n| Row::new(vec![Value::Int(n * SHARDS + i), Value::Int(10 * (n + 1))]))
            .collect();
        let primary = Arc::new(MockConnection::new(db.clone()).with_rows(columns.clone(), rows));
        shards.insert(db.clone(), ReplicaAwareConnection::new(db, primary));
    }
    let orders: Arc<dyn DataSource> = Arc::new(ShardMap::new("orders", shards));
    let router = Router::new(HashMap::from([("orders".to_string(), orders)]));
    let dispatcher = Dispatcher::new(Arc::new(router.clone()));

    println!("--- ORDER BY id LIMIT 5 OFFSET 2 across every shard ---");
    let ctx = ExecContext::new().with_master();
    let select = Query::new("SELECT id, amount FROM orders ORDER BY id");
    let queries = Dispatcher::plan(&ModShard, &select, &[])?;
    let cursors = dispatcher.query_all(&ctx, &queries).await?;
    let sorted = SortMerger::new(ctx.clone(), cursors, vec![SortColumn::asc("id")]).await?;
    let page = Paging::new(ctx.clone(), Box::new(sorted), 2, 5).await?;
    for row in collect(&page).await? {
        println!("  id={} amount={}", row.get::<i64>(0)?, row.get::<i64>(1)?);
    }

    println!("--- SUM(amount) from per-shard partial sums ---");
    let partials: Vec<BoxRows> = (0..SHARDS)
        .map(|i| {
            Box::new(MemoryRows::new(
                vec![Column::nullable("SUM(amount)", ColumnType::Int)],
                vec![Row::new(vec![Value::Int(60 + i)])],
            )) as BoxRows
        })
        .collect();
    let total = AggregateMerger::new(
        ctx.clone(),
        partials,
        vec![Aggregator::sum("SUM(amount)").with_alias("total")],
    )
    .await?;
    for row in collect(&total).await? {
        println!("  total={}", row.get::<i64>(0)?);
    }

    println!("--- Delay transaction over users 1 and 2 ---");
    let ctx = ExecContext::new().with_transaction(TxContext::new(TxStrategy::Delay));
    let tx = router.begin_tx(&ctx).await?;
    let update = Query::new("UPDATE orders SET paid = 1 WHERE user_id = ?");
    for user_id in [1i64, 2] {
        for routed in Dispatcher::plan(&ModShard, &update, &[Value::Int(user_id)])? {
            tx.exec(&ctx, &routed.with_args(vec![Value::Int(user_id)])).await?;
        }
    }
    match tx.commit(&ctx).await {
        Ok(()) => println!("  committed"),
        Err(e) => println!("  commit failed: {}", e),
    }

    let snapshot = router.metrics().snapshot();
    println!("\nTransactions begun: {}", snapshot.tx_begun);
    println!("Native transactions opened: {}", snapshot.native_tx_opened);

    router.close().await?;
    Ok(())
}
