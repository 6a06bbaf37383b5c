//! Typed views over the numeric limits carried by [`Config`].

use std::time::Duration;

use crate::Config;

/// Admission, framing and housekeeping limits for the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerLimits {
    /// Requests allowed to execute concurrently.
    pub max_concurrent_requests: usize,
    /// Admissions allowed per rolling minute.
    pub max_requests_per_minute: usize,
    /// Resident memory ceiling in MiB.
    pub max_memory_mb: u64,
    /// CPU warning threshold in percent.
    pub max_cpu_percent: u32,
    /// Largest accepted request frame in bytes.
    pub max_request_bytes: usize,
    /// Idle lifetime of a handle.
    pub idle_timeout: Duration,
    /// Interval between maintenance passes.
    pub cleanup_interval: Duration,
    /// Read timeout for idle keep-alive connections.
    pub connection_idle: Duration,
}

impl BrokerLimits {
    pub(crate) fn from_config(config: &Config) -> Self {
        Self {
            max_concurrent_requests: config.max_concurrent_requests,
            max_requests_per_minute: config.max_requests_per_minute,
            max_memory_mb: config.max_memory_mb,
            max_cpu_percent: config.max_cpu_percent,
            max_request_bytes: config.max_request_bytes,
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            cleanup_interval: Duration::from_secs(config.cleanup_interval_secs.max(1)),
            connection_idle: Duration::from_secs(config.connection_idle_secs.max(1)),
        }
    }
}

impl Default for BrokerLimits {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Settings for the connection cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    /// Lifetime of a cache entry.
    pub ttl: Duration,
    /// Whether passwords participate in the fingerprint.
    pub include_secrets: bool,
}

impl CacheSettings {
    pub(crate) fn from_config(config: &Config) -> Self {
        Self {
            ttl: Duration::from_secs(config.cache_ttl_secs),
            include_secrets: config.cache_include_secrets,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_intervals_are_clamped() {
        let config = Config {
            cleanup_interval_secs: 0,
            connection_idle_secs: 0,
            ..Config::default()
        };
        let limits = config.limits();
        assert_eq!(limits.cleanup_interval, Duration::from_secs(1));
        assert_eq!(limits.connection_idle, Duration::from_secs(1));
    }

    #[test]
    fn defaults_match_documented_values() {
        let limits = BrokerLimits::default();
        assert_eq!(limits.max_concurrent_requests, 100);
        assert_eq!(limits.max_requests_per_minute, 1000);
        assert_eq!(limits.max_request_bytes, 10 * 1024 * 1024);
        assert_eq!(limits.idle_timeout, Duration::from_secs(1800));
        assert!(!CacheSettings::default().include_secrets);
    }
}
