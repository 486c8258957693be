//! Configuration types for the access layer.

use crate::error::{Error, Result};
use std::time::Duration;

/// Configuration for a DNS-refreshed replica pool.
#[derive(Debug, Clone)]
pub struct DnsPoolConfig {
    /// Domain resolved to the replica addresses.
    pub domain: String,

    /// Port every replica listens on.
    pub port: u16,

    /// Interval between re-resolutions.
    pub refresh_interval: Duration,

    /// Timeout for a single lookup.
    pub lookup_timeout: Duration,

    /// Prefix of replica names; the resolved address is appended.
    pub name_prefix: String,
}

impl Default for DnsPoolConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            port: 3306,
            refresh_interval: Duration::from_secs(1),
            lookup_timeout: Duration::from_secs(1),
            name_prefix: "replica".to_string(),
        }
    }
}

impl DnsPoolConfig {
    /// Create a configuration for `domain:port`.
    pub fn new(domain: impl Into<String>, port: u16) -> Self {
        Self {
            domain: domain.into(),
            port,
            ..Default::default()
        }
    }

    /// Set the refresh interval.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Set the lookup timeout.
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Set the replica name prefix.
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// `host:port` passed to the resolver.
    pub fn lookup_target(&self) -> String {
        format!("{}:{}", self.domain, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.domain.trim().is_empty() {
            return Err(Error::Config("dns pool domain is empty".to_string()));
        }
        if self.refresh_interval.is_zero() {
            return Err(Error::Config("refresh interval must be positive".to_string()));
        }
        if self.lookup_timeout.is_zero() {
            return Err(Error::Config("lookup timeout must be positive".to_string()));
        }
        Ok(())
    }
}

/// Router configuration.
#[derive(Debug, Clone, Default)]
pub struct RouterConfig {
    /// Group used for queries that name no shard group. When unset, such
    /// queries only resolve if exactly one group is registered.
    pub default_group: Option<String>,
}

impl RouterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fallback shard group.
    pub fn with_default_group(mut self, group: impl Into<String>) -> Self {
        self.default_group = Some(group.into());
        self
    }
}
