//! Replica pool backed by DNS resolution.
//!
//! ```text
//!   start ─► refresh ─► spawn loop ──tick──► refresh ──┐
//!                                      ▲               │
//!                                      └───────────────┘
//!   refresh: lookup ─► reuse / connect ─► swap list ─► close removed
//! ```
//!
//! Refreshes are serialized, so an address is connected at most once per
//! change and every connection either enters the list or is closed.

use super::{close_replicas, pick, Connector, Replica, ReplicaPool, Resolver};
use crate::config::DnsPoolConfig;
use crate::error::{Error, Result};
use crate::metrics::AccessMetrics;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct Inner {
    name: String,
    config: DnsPoolConfig,
    resolver: Arc<dyn Resolver>,
    connector: Arc<dyn Connector>,
    replicas: RwLock<Vec<(SocketAddr, Replica)>>,
    counter: AtomicUsize,
    metrics: Arc<AccessMetrics>,
    /// Held for a whole refresh and by `close` while draining.
    refresh_lock: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

/// Replica pool whose members come from resolving a domain.
///
/// A background task re-resolves on `refresh_interval`. A successful
/// resolution replaces the whole list: addresses still present keep their
/// connection, new addresses are connected, and replicas whose address
/// disappeared are closed after the swap. A failed resolution is logged
/// and the previous list stays in service.
pub struct DnsReplicaPool {
    inner: Arc<Inner>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DnsReplicaPool {
    /// Resolve once, then start the refresh loop.
    ///
    /// Fails if the configuration is invalid or the first resolution fails.
    pub async fn start(
        name: impl Into<String>,
        config: DnsPoolConfig,
        resolver: Arc<dyn Resolver>,
        connector: Arc<dyn Connector>,
        metrics: Arc<AccessMetrics>,
    ) -> Result<Self> {
        config.validate()?;
        let inner = Arc::new(Inner {
            name: name.into(),
            config,
            resolver,
            connector,
            replicas: RwLock::new(Vec::new()),
            counter: AtomicUsize::new(0),
            metrics,
            refresh_lock: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
        });
        inner.refresh().await?;

        let cancel = CancellationToken::new();
        let task = spawn_refresh_loop(inner.clone(), cancel.clone());
        info!(
            pool = %inner.name,
            domain = %inner.config.domain,
            interval_ms = inner.config.refresh_interval.as_millis() as u64,
            "Started DNS replica pool"
        );

        Ok(Self {
            inner,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    /// Re-resolve now instead of waiting for the next tick.
    pub async fn refresh(&self) -> Result<()> {
        self.inner.refresh().await
    }

    /// Addresses currently in rotation.
    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.inner.replicas.read().iter().map(|(a, _)| *a).collect()
    }
}

fn spawn_refresh_loop(inner: Arc<Inner>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(inner.config.refresh_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately and the pool was just resolved.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(pool = %inner.name, "Replica refresh loop shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = inner.refresh().await {
                        warn!(pool = %inner.name, error = %e, "Replica refresh failed, keeping previous replicas");
                    }
                }
            }
        }
    })
}

impl Inner {
    async fn refresh(&self) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::PoolClosed(self.name.clone()));
        }
        let target = self.config.lookup_target();
        let lookup = tokio::time::timeout(self.config.lookup_timeout, self.resolver.lookup(&target))
            .await
            .map_err(|_| Error::Resolve(format!("{}: lookup timed out", target)))
            .and_then(|res| res);
        let resolved: BTreeSet<SocketAddr> = match lookup {
            Ok(addrs) => addrs.into_iter().collect(),
            Err(e) => {
                self.metrics.record_refresh_failure();
                return Err(e);
            }
        };

        let current: Vec<(SocketAddr, Replica)> = self.replicas.read().clone();
        let mut next = Vec::with_capacity(resolved.len());
        let mut added = 0usize;
        for addr in &resolved {
            if let Some((_, replica)) = current.iter().find(|(a, _)| a == addr) {
                next.push((*addr, replica.clone()));
                continue;
            }
            match self.connector.connect(*addr).await {
                Ok(connection) => {
                    let name = format!("{}-{}", self.config.name_prefix, addr);
                    next.push((*addr, Replica::new(name, connection)));
                    added += 1;
                }
                Err(e) => {
                    warn!(pool = %self.name, addr = %addr, error = %e, "Failed to connect to replica");
                }
            }
        }

        let removed: Vec<Replica> = current
            .into_iter()
            .filter(|(a, _)| !resolved.contains(a))
            .map(|(_, r)| r)
            .collect();
        let count = next.len();
        *self.replicas.write() = next;
        self.metrics.record_refresh(count);

        if added > 0 || !removed.is_empty() {
            info!(
                pool = %self.name,
                replicas = count,
                added,
                removed = removed.len(),
                "Replica set changed"
            );
        }
        // Removed replicas are closed only once they are out of rotation.
        let _ = close_replicas(&removed).await;
        Ok(())
    }
}

#[async_trait]
impl ReplicaPool for DnsReplicaPool {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn next(&self) -> Result<Replica> {
        pick(
            &self.inner.name,
            self.inner.replicas.read().as_slice(),
            self.inner.counter.fetch_add(1, Ordering::Relaxed),
            |(_, r)| r,
        )
    }

    fn replicas(&self) -> Vec<Replica> {
        self.inner
            .replicas
            .read()
            .iter()
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Stop the refresh loop and close every replica.
    async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
            info!(pool = %self.inner.name, "Stopped DNS replica pool");
        }
        let _guard = self.inner.refresh_lock.lock().await;
        self.inner.closed.store(true, Ordering::Release);
        let replicas: Vec<Replica> = std::mem::take(&mut *self.inner.replicas.write())
            .into_iter()
            .map(|(_, r)| r)
            .collect();
        close_replicas(&replicas).await
    }
}

impl Drop for DnsReplicaPool {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
