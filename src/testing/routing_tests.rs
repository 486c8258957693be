//! End-to-end routing through the data source tree.

use super::{MockConnection, MockConnector, StaticResolver, TestShards};
use crate::config::DnsPoolConfig;
use crate::context::ExecContext;
use crate::datasource::{DataSource, Dispatcher, DnsReplicaPool, ReplicaAwareConnection, Router};
use crate::error::Error;
use crate::merger::{SortColumn, SortMerger};
use crate::metrics::AccessMetrics;
use crate::rows::{collect, BoxRows};
use crate::types::Query;
use crate::value::{Column, ColumnType, Row, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

#[tokio::test]
async fn test_dns_replicas_behind_router() {
    let metrics = Arc::new(AccessMetrics::new());
    let resolver = Arc::new(StaticResolver::new(vec![
        addr("10.0.0.1:3306"),
        addr("10.0.0.2:3306"),
    ]));
    let connector = Arc::new(MockConnector::new());
    let pool = DnsReplicaPool::start(
        "users",
        DnsPoolConfig::new("replicas.users", 3306),
        resolver.clone(),
        connector.clone(),
        metrics.clone(),
    )
    .await
    .unwrap();

    let primary = Arc::new(MockConnection::new("primary"));
    let leaf: Arc<dyn DataSource> = Arc::new(
        ReplicaAwareConnection::new("users", primary.clone())
            .with_pool(Arc::new(pool))
            .with_metrics(metrics.clone()),
    );
    let router =
        Router::new(HashMap::from([("users".to_string(), leaf)])).with_metrics(metrics.clone());

    let ctx = ExecContext::new();
    for _ in 0..4 {
        router.query(&ctx, &Query::new("SELECT * FROM users")).await.unwrap();
    }
    router
        .exec(&ctx, &Query::new("UPDATE users SET seen = 1"))
        .await
        .unwrap();

    let first = connector.connection(addr("10.0.0.1:3306")).unwrap();
    let second = connector.connection(addr("10.0.0.2:3306")).unwrap();
    assert_eq!(first.calls().len(), 2);
    assert_eq!(second.calls().len(), 2);
    assert_eq!(primary.calls().len(), 1);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.replica_reads, 4);
    assert_eq!(snapshot.writes, 1);
    assert_eq!(snapshot.replicas, 2);

    router.close().await.unwrap();
    assert!(primary.is_closed());
    assert!(first.is_closed());
    assert!(second.is_closed());
}

#[tokio::test]
async fn test_scatter_gather_sorted() {
    let shards = TestShards::new("orders", 3);
    let columns = vec![Column::new("id", ColumnType::Int)];
    let data: [&[i64]; 3] = [&[1, 4, 9], &[2, 3], &[5, 6, 7, 8]];
    for (mock, ids) in shards.primaries.iter().zip(data) {
        mock.set_rows(
            columns.clone(),
            ids.iter().map(|&i| Row::new(vec![Value::Int(i)])).collect(),
        );
    }

    let dispatcher = Dispatcher::new(Arc::new(shards.router.clone()));
    let queries: Vec<Query> = (0..3)
        .map(|i| {
            Query::new("SELECT id FROM orders ORDER BY id")
                .in_group("orders")
                .on_db(TestShards::db(i))
        })
        .collect();
    let ctx = ExecContext::new().with_master();
    let cursors: Vec<BoxRows> = dispatcher.query_all(&ctx, &queries).await.unwrap();
    let merger = SortMerger::new(ctx, cursors, vec![SortColumn::asc("id")])
        .await
        .unwrap();

    let ids: Vec<i64> = collect(&merger)
        .await
        .unwrap()
        .iter()
        .map(|r| r.get::<i64>(0).unwrap())
        .collect();
    assert_eq!(ids, (1..=9).collect::<Vec<_>>());
    assert!(shards.primaries.iter().all(|m| m.open_cursors() == 0));
}

#[tokio::test]
async fn test_unknown_logical_db_does_no_io() {
    let shards = TestShards::new("orders", 2);
    let q = Query::new("SELECT 1").in_group("orders").on_db("db_9");
    let err = shards.router.query(&ExecContext::new(), &q).await.err();
    assert_eq!(
        err,
        Some(Error::TargetNotFound {
            name: "orders/db_9".to_string()
        })
    );
    assert!(shards.primaries.iter().all(|m| m.calls().is_empty()));
}
