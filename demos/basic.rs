//! Basic example: read/write splitting over a DNS-discovered replica pool.
//!
//! Run with:
//!   RUST_LOG=shardkit=debug,info cargo run --example basic

use shardkit::testing::{MockConnection, MockConnector, StaticResolver};
use shardkit::{
    AccessMetrics, DataSource, DnsPoolConfig, DnsReplicaPool, ExecContext, Query,
    ReplicaAwareConnection, Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let metrics = Arc::new(AccessMetrics::new());

    // Replicas are discovered through DNS; the resolver and connector are
    // in-memory stand-ins here.
    let resolver = Arc::new(StaticResolver::new(vec![
        "10.0.0.1:3306".parse()?,
        "10.0.0.2:3306".parse()?,
    ]));
    let pool = DnsReplicaPool::start(
        "users",
        DnsPoolConfig::new("replicas.users.internal", 3306)
            .with_refresh_interval(Duration::from_millis(200)),
        resolver.clone(),
        Arc::new(MockConnector::new()),
        metrics.clone(),
    )
    .await?;

    let primary = Arc::new(MockConnection::new("users-primary"));
    let users: Arc<dyn DataSource> = Arc::new(
        ReplicaAwareConnection::new("users", primary.clone())
            .with_pool(Arc::new(pool))
            .with_metrics(metrics.clone()),
    );
    let router = Router::new(HashMap::from([("users".to_string(), users)]))
        .with_metrics(metrics.clone());

    println!("--- Reads go to replicas ---");
    let ctx = ExecContext::new().with_timeout(Duration::from_secs(1));
    for _ in 0..4 {
        router.query(&ctx, &Query::new("SELECT * FROM users")).await?;
    }

    println!("--- Writes and use_master reads go to the primary ---");
    router
        .exec(&ctx, &Query::new("UPDATE users SET name = 'ann' WHERE id = 1"))
        .await?;
    router
        .query(&ctx.clone().with_master(), &Query::new("SELECT * FROM users WHERE id = 1"))
        .await?;
    println!("Primary calls: {:?}", primary.calls());

    println!("--- Replica set changes are picked up by the refresh loop ---");
    resolver.set(vec!["10.0.0.3:3306".parse()?]);
    tokio::time::sleep(Duration::from_millis(500)).await;
    router.query(&ctx, &Query::new("SELECT * FROM users")).await?;

    let snapshot = metrics.snapshot();
    println!("\nMetrics:");
    println!("  Replica reads: {}", snapshot.replica_reads);
    println!("  Primary reads: {}", snapshot.primary_reads);
    println!("  Writes: {}", snapshot.writes);
    println!("  Replicas: {}", snapshot.replicas);
    println!("  Replica read ratio: {:.2}", snapshot.replica_read_ratio());
    println!("\n{}", metrics.to_prometheus());

    router.close().await?;
    Ok(())
}
