//! Atomic metric instruments.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug)]
pub struct Counter {
    name: &'static str,
    help: &'static str,
    value: AtomicU64,
}

impl Counter {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            value: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn help(&self) -> &'static str {
        self.help
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A value that moves both ways, e.g. the size of a replica set.
#[derive(Debug)]
pub struct Gauge {
    name: &'static str,
    help: &'static str,
    value: AtomicI64,
}

impl Gauge {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            value: AtomicI64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn help(&self) -> &'static str {
        self.help
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Counter broken down by physical target name.
#[derive(Debug)]
pub struct TargetCounter {
    name: &'static str,
    help: &'static str,
    by_target: RwLock<BTreeMap<String, AtomicU64>>,
}

impl TargetCounter {
    pub fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            by_target: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn help(&self) -> &'static str {
        self.help
    }

    pub fn inc(&self, target: &str) {
        if let Some(counter) = self.by_target.read().get(target) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.by_target
            .write()
            .entry(target.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, target: &str) -> u64 {
        self.by_target
            .read()
            .get(target)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Every target with its count, ordered by name.
    pub fn get_all(&self) -> Vec<(String, u64)> {
        self.by_target
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_and_gauge() {
        let counter = Counter::new("reads_total", "Reads");
        counter.inc();
        counter.inc();
        assert_eq!(counter.get(), 2);

        let gauge = Gauge::new("replicas", "Replicas");
        gauge.set(3);
        gauge.set(1);
        assert_eq!(gauge.get(), 1);
    }

    #[test]
    fn test_target_counter() {
        let counter = TargetCounter::new("commit_failures_total", "Commit failures");
        counter.inc("orders/db_1");
        counter.inc("orders/db_1");
        counter.inc("orders/db_0");
        assert_eq!(counter.get("orders/db_1"), 2);
        assert_eq!(counter.get("users"), 0);
        assert_eq!(
            counter.get_all(),
            vec![("orders/db_0".to_string(), 1), ("orders/db_1".to_string(), 2)]
        );
    }
}
