//! Access-layer metrics.
//!
//! One [`AccessMetrics`] instance is shared through an `Arc` by the router,
//! the replica pools and the transaction coordinator.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        AccessMetrics                         │
//! │  ┌──────────────┐  ┌───────────────┐  ┌───────────────────┐  │
//! │  │   Routing    │  │ Transactions  │  │  Replica pools    │  │
//! │  │ - reads      │  │ - begun       │  │ - refreshes       │  │
//! │  │ - writes     │  │ - committed   │  │ - refresh errors  │  │
//! │  │ - failures   │  │ - rolled back │  │ - replica count   │  │
//! │  │              │  │ - by target   │  │                   │  │
//! │  └──────────────┘  └───────────────┘  └───────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use shardkit::metrics::AccessMetrics;
//!
//! let metrics = AccessMetrics::new();
//! metrics.record_read(false);
//! let snapshot = metrics.snapshot();
//! println!("replica share: {:.2}", snapshot.replica_read_ratio());
//! ```

mod instruments;

pub use instruments::{Counter, Gauge, TargetCounter};

use std::fmt::Write;

/// Counters for routing, transactions and replica refresh.
#[derive(Debug)]
pub struct AccessMetrics {
    /// Reads served by a primary.
    pub primary_reads: Counter,
    /// Reads served by a replica.
    pub replica_reads: Counter,
    /// Writes, always on a primary.
    pub writes: Counter,
    /// Queries that failed to resolve a target.
    pub routing_failures: Counter,

    /// Logical transactions begun.
    pub tx_begun: Counter,
    /// Logical transactions committed without failure.
    pub tx_committed: Counter,
    /// Logical transactions rolled back without failure.
    pub tx_rolled_back: Counter,
    /// Native transactions opened.
    pub native_tx_opened: Counter,
    /// Commit or rollback calls with at least one failing target.
    pub partial_failures: Counter,
    /// Failing targets of commit or rollback.
    pub target_failures: TargetCounter,

    /// Successful replica refreshes.
    pub replica_refreshes: Counter,
    /// Failed replica refreshes.
    pub replica_refresh_failures: Counter,
    /// Replicas after the last refresh.
    pub replicas: Gauge,
}

impl Default for AccessMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessMetrics {
    pub fn new() -> Self {
        Self {
            primary_reads: Counter::new("shardkit_primary_reads_total", "Reads served by a primary"),
            replica_reads: Counter::new("shardkit_replica_reads_total", "Reads served by a replica"),
            writes: Counter::new("shardkit_writes_total", "Writes routed to a primary"),
            routing_failures: Counter::new(
                "shardkit_routing_failures_total",
                "Queries whose target could not be resolved",
            ),
            tx_begun: Counter::new("shardkit_tx_begun_total", "Logical transactions begun"),
            tx_committed: Counter::new("shardkit_tx_committed_total", "Logical transactions committed"),
            tx_rolled_back: Counter::new(
                "shardkit_tx_rolled_back_total",
                "Logical transactions rolled back",
            ),
            native_tx_opened: Counter::new(
                "shardkit_native_tx_opened_total",
                "Native transactions opened on targets",
            ),
            partial_failures: Counter::new(
                "shardkit_tx_partial_failures_total",
                "Commit or rollback calls with failing targets",
            ),
            target_failures: TargetCounter::new(
                "shardkit_tx_target_failures_total",
                "Failing commit or rollback by target",
            ),
            replica_refreshes: Counter::new(
                "shardkit_replica_refreshes_total",
                "Successful replica set refreshes",
            ),
            replica_refresh_failures: Counter::new(
                "shardkit_replica_refresh_failures_total",
                "Failed replica set refreshes",
            ),
            replicas: Gauge::new("shardkit_replicas", "Replicas after the last refresh"),
        }
    }

    pub fn record_read(&self, on_primary: bool) {
        if on_primary {
            self.primary_reads.inc();
        } else {
            self.replica_reads.inc();
        }
    }

    pub fn record_write(&self) {
        self.writes.inc();
    }

    pub fn record_routing_failure(&self) {
        self.routing_failures.inc();
    }

    pub fn record_refresh(&self, replicas: usize) {
        self.replica_refreshes.inc();
        self.replicas.set(replicas as i64);
    }

    pub fn record_refresh_failure(&self) {
        self.replica_refresh_failures.inc();
    }

    /// Record the outcome of a commit or rollback.
    pub fn record_tx_end(&self, committed: bool, failed_targets: &[String]) {
        if failed_targets.is_empty() {
            if committed {
                self.tx_committed.inc();
            } else {
                self.tx_rolled_back.inc();
            }
            return;
        }
        self.partial_failures.inc();
        for target in failed_targets {
            self.target_failures.inc(target);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            primary_reads: self.primary_reads.get(),
            replica_reads: self.replica_reads.get(),
            writes: self.writes.get(),
            routing_failures: self.routing_failures.get(),
            tx_begun: self.tx_begun.get(),
            tx_committed: self.tx_committed.get(),
            tx_rolled_back: self.tx_rolled_back.get(),
            native_tx_opened: self.native_tx_opened.get(),
            partial_failures: self.partial_failures.get(),
            replica_refreshes: self.replica_refreshes.get(),
            replica_refresh_failures: self.replica_refresh_failures.get(),
            replicas: self.replicas.get(),
        }
    }

    /// Format metrics in Prometheus exposition format.
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();
        let counters = [
            &self.primary_reads,
            &self.replica_reads,
            &self.writes,
            &self.routing_failures,
            &self.tx_begun,
            &self.tx_committed,
            &self.tx_rolled_back,
            &self.native_tx_opened,
            &self.partial_failures,
            &self.replica_refreshes,
            &self.replica_refresh_failures,
        ];
        for c in counters {
            let _ = writeln!(
                out,
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}",
                name = c.name(),
                help = c.help(),
                value = c.get()
            );
        }
        let _ = writeln!(
            out,
            "# HELP {name} {help}\n# TYPE {name} gauge\n{name} {value}",
            name = self.replicas.name(),
            help = self.replicas.help(),
            value = self.replicas.get()
        );
        let failures = &self.target_failures;
        let _ = writeln!(
            out,
            "# HELP {name} {help}\n# TYPE {name} counter",
            name = failures.name(),
            help = failures.help()
        );
        for (target, value) in failures.get_all() {
            let _ = writeln!(out, "{}{{target=\"{}\"}} {}", failures.name(), target, value);
        }
        out
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub primary_reads: u64,
    pub replica_reads: u64,
    pub writes: u64,
    pub routing_failures: u64,
    pub tx_begun: u64,
    pub tx_committed: u64,
    pub tx_rolled_back: u64,
    pub native_tx_opened: u64,
    pub partial_failures: u64,
    pub replica_refreshes: u64,
    pub replica_refresh_failures: u64,
    pub replicas: i64,
}

impl MetricsSnapshot {
    /// Share of reads served by replicas.
    pub fn replica_read_ratio(&self) -> f64 {
        let total = self.primary_reads + self.replica_reads;
        if total == 0 {
            0.0
        } else {
            self.replica_reads as f64 / total as f64
        }
    }
}
