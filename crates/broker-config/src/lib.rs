//! Shared configuration for the broker daemon and its clients.
//!
//! Values are layered by `ortho_config`: built-in defaults, then an optional
//! TOML file (`--config-path` or `BROKER_CONFIG_PATH`), then `BROKER_*`
//! environment variables, and finally command-line flags.

mod defaults;
mod limits;
mod logging;
mod runtime;
mod socket;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_CACHE_TTL_SECS, DEFAULT_CLEANUP_INTERVAL_SECS, DEFAULT_CONNECTION_IDLE_SECS,
    DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_LOG_FILTER, DEFAULT_MAX_CONCURRENT_REQUESTS,
    DEFAULT_MAX_CPU_PERCENT, DEFAULT_MAX_MEMORY_MB, DEFAULT_MAX_REQUEST_BYTES,
    DEFAULT_MAX_REQUESTS_PER_MINUTE, DEFAULT_TCP_PORT, default_log_filter,
    default_log_filter_string, default_log_format, default_socket_endpoint,
};
pub use limits::{BrokerLimits, CacheSettings};
pub use logging::{LogFormat, LogFormatParseError};
pub use runtime::{RuntimePaths, RuntimePathsError};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

/// Resolved broker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "BROKER")]
pub struct Config {
    /// Endpoint the daemon listens on.
    #[serde(default = "default_socket_endpoint")]
    #[ortho_config(default = default_socket_endpoint())]
    pub daemon_socket: SocketEndpoint,
    /// `tracing-subscriber` filter expression.
    #[serde(default = "default_log_filter_string")]
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Log output format.
    #[serde(default = "default_log_format")]
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Requests allowed to execute at the same time.
    #[serde(default = "defaults::max_concurrent_requests")]
    #[ortho_config(default = DEFAULT_MAX_CONCURRENT_REQUESTS)]
    pub max_concurrent_requests: usize,
    /// Admissions allowed within any sixty second window.
    #[serde(default = "defaults::max_requests_per_minute")]
    #[ortho_config(default = DEFAULT_MAX_REQUESTS_PER_MINUTE)]
    pub max_requests_per_minute: usize,
    /// Resident memory ceiling for the daemon process.
    #[serde(default = "defaults::max_memory_mb")]
    #[ortho_config(default = DEFAULT_MAX_MEMORY_MB)]
    pub max_memory_mb: u64,
    /// CPU usage above which warnings are recorded.
    #[serde(default = "defaults::max_cpu_percent")]
    #[ortho_config(default = DEFAULT_MAX_CPU_PERCENT)]
    pub max_cpu_percent: u32,
    /// Idle time after which handles are swept.
    #[serde(default = "defaults::idle_timeout_secs")]
    #[ortho_config(default = DEFAULT_IDLE_TIMEOUT_SECS)]
    pub idle_timeout_secs: u64,
    /// Lifetime of cached connections.
    #[serde(default = "defaults::cache_ttl_secs")]
    #[ortho_config(default = DEFAULT_CACHE_TTL_SECS)]
    pub cache_ttl_secs: u64,
    /// Interval between maintenance passes.
    #[serde(default = "defaults::cleanup_interval_secs")]
    #[ortho_config(default = DEFAULT_CLEANUP_INTERVAL_SECS)]
    pub cleanup_interval_secs: u64,
    /// Largest request frame accepted from a client.
    #[serde(default = "defaults::max_request_bytes")]
    #[ortho_config(default = DEFAULT_MAX_REQUEST_BYTES)]
    pub max_request_bytes: usize,
    /// Seconds a keep-alive connection may sit idle between requests.
    #[serde(default = "defaults::connection_idle_secs")]
    #[ortho_config(default = DEFAULT_CONNECTION_IDLE_SECS)]
    pub connection_idle_secs: u64,
    /// Includes secrets such as passwords in connection fingerprints.
    #[serde(default)]
    #[ortho_config(default = false)]
    pub cache_include_secrets: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon_socket: default_socket_endpoint(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            max_requests_per_minute: DEFAULT_MAX_REQUESTS_PER_MINUTE,
            max_memory_mb: DEFAULT_MAX_MEMORY_MB,
            max_cpu_percent: DEFAULT_MAX_CPU_PERCENT,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            connection_idle_secs: DEFAULT_CONNECTION_IDLE_SECS,
            cache_include_secrets: false,
        }
    }
}

impl Config {
    /// Endpoint the daemon binds.
    #[must_use]
    pub fn daemon_socket(&self) -> &SocketEndpoint {
        &self.daemon_socket
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Admission and framing limits derived from the configuration.
    #[must_use]
    pub fn limits(&self) -> BrokerLimits {
        BrokerLimits::from_config(self)
    }

    /// Connection cache settings.
    #[must_use]
    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings::from_config(self)
    }
}
