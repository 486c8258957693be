//! Static replica list served in round-robin order.

use super::{close_replicas, pick, Replica, ReplicaPool};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A fixed list of replicas served in rotation.
#[derive(Debug)]
pub struct RoundRobinPool {
    name: String,
    replicas: Vec<Replica>,
    counter: AtomicUsize,
}

impl RoundRobinPool {
    pub fn new(name: impl Into<String>, replicas: Vec<Replica>) -> Self {
        Self {
            name: name.into(),
            replicas,
            counter: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ReplicaPool for RoundRobinPool {
    fn name(&self) -> &str {
        &self.name
    }

    fn next(&self) -> Result<Replica> {
        pick(
            &self.name,
            &self.replicas,
            self.counter.fetch_add(1, Ordering::Relaxed),
            |r| r,
        )
    }

    fn replicas(&self) -> Vec<Replica> {
        self.replicas.clone()
    }

    async fn close(&self) -> Result<()> {
        close_replicas(&self.replicas).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::testing::MockConnection;
    use std::sync::Arc;

    fn replica(name: &str) -> Replica {
        Replica::new(name, Arc::new(MockConnection::new(name)))
    }

    #[test]
    fn test_rotates_through_replicas() {
        let pool = RoundRobinPool::new("users", vec![replica("r0"), replica("r1"), replica("r2")]);
        let names: Vec<String> = (0..7).map(|_| pool.next().unwrap().name).collect();
        assert_eq!(names, vec!["r0", "r1", "r2", "r0", "r1", "r2", "r0"]);
    }

    #[test]
    fn test_empty_pool_is_an_error() {
        let pool = RoundRobinPool::new("users", Vec::new());
        assert_eq!(
            pool.next().unwrap_err(),
            Error::NoReplicaAvailable {
                target: "users".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_close_reports_every_failure() {
        let ok = MockConnection::new("r0");
        let bad = MockConnection::new("r1");
        bad.plan().fail_close = Some(Error::driver("socket gone"));
        let ok = Arc::new(ok);
        let pool = RoundRobinPool::new(
            "users",
            vec![Replica::new("r0", ok.clone()), Replica::new("r1", Arc::new(bad))],
        );
        assert_eq!(pool.close().await, Err(Error::driver("socket gone")));
        assert!(ok.is_closed());
    }
}
