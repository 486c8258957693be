//! Replica pools: the read-only copies behind a primary.
//!
//! A pool hands out replicas in round-robin order. The static variant is
//! configured once; the DNS variant re-resolves a domain on a fixed interval
//! and swaps the whole replica list on every successful resolution.

mod dns;
mod roundrobin;

pub use dns::DnsReplicaPool;
pub use roundrobin::RoundRobinPool;

use super::Connection;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;

/// A named read-only connection.
#[derive(Clone)]
pub struct Replica {
    pub name: String,
    pub connection: Arc<dyn Connection>,
}

impl Replica {
    pub fn new(name: impl Into<String>, connection: Arc<dyn Connection>) -> Self {
        Self {
            name: name.into(),
            connection,
        }
    }
}

impl std::fmt::Debug for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica").field("name", &self.name).finish()
    }
}

/// Source of replicas for read traffic.
#[async_trait]
pub trait ReplicaPool: Send + Sync {
    fn name(&self) -> &str;

    /// The next replica in rotation, or [`Error::NoReplicaAvailable`] if the
    /// pool is empty.
    fn next(&self) -> Result<Replica>;

    /// Current replicas, in rotation order.
    fn replicas(&self) -> Vec<Replica>;

    async fn close(&self) -> Result<()>;
}

/// Pick the replica of `list[counter % len]`.
pub(crate) fn pick<T>(
    name: &str,
    list: &[T],
    counter: usize,
    replica: impl Fn(&T) -> &Replica,
) -> Result<Replica> {
    if list.is_empty() {
        return Err(Error::NoReplicaAvailable {
            target: name.to_string(),
        });
    }
    Ok(replica(&list[counter % list.len()]).clone())
}

/// Close every replica, collecting all failures.
pub(crate) async fn close_replicas(replicas: &[Replica]) -> Result<()> {
    let mut errors = Vec::new();
    for replica in replicas {
        if let Err(e) = replica.connection.close().await {
            tracing::warn!(replica = %replica.name, error = %e, "Failed to close replica");
            errors.push(e);
        }
    }
    match Error::combine(errors) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Resolves a `host:port` to socket addresses.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn lookup(&self, target: &str) -> Result<Vec<SocketAddr>>;
}

/// Resolver backed by the system resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn lookup(&self, target: &str) -> Result<Vec<SocketAddr>> {
        let addrs = tokio::net::lookup_host(target)
            .await
            .map_err(|e| Error::Resolve(format!("{}: {}", target, e)))?;
        Ok(addrs.collect())
    }
}

/// Opens a connection to a resolved replica address.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, addr: SocketAddr) -> Result<Arc<dyn Connection>>;
}
