use camino::Utf8PathBuf;
use std::env;

#[cfg(unix)]
use libc::geteuid;

#[cfg(unix)]
use dirs::runtime_dir;

use crate::socket::SocketEndpoint;

/// Default TCP port used when Unix domain sockets are not available.
pub const DEFAULT_TCP_PORT: u16 = 9781;

/// Default log filter expression used by the daemon.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default number of requests executing at once.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Default admissions per rolling minute.
pub const DEFAULT_MAX_REQUESTS_PER_MINUTE: usize = 1000;

/// Default resident memory ceiling in MiB.
pub const DEFAULT_MAX_MEMORY_MB: u64 = 1024;

/// Default CPU warning threshold in percent.
pub const DEFAULT_MAX_CPU_PERCENT: u32 = 90;

/// Default idle lifetime of a handle before the sweeper evicts it.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 1800;

/// Default lifetime of a cached connection.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

/// Default interval between maintenance passes.
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300;

/// Default maximum request frame size (10 MiB).
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 10 * 1024 * 1024;

/// Default idle read timeout for keep-alive connections.
pub const DEFAULT_CONNECTION_IDLE_SECS: u64 = 60;

/// Default log filter expression used by the daemon.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

/// Default logging format.
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}

pub(crate) fn max_concurrent_requests() -> usize {
    DEFAULT_MAX_CONCURRENT_REQUESTS
}

pub(crate) fn max_requests_per_minute() -> usize {
    DEFAULT_MAX_REQUESTS_PER_MINUTE
}

pub(crate) fn max_memory_mb() -> u64 {
    DEFAULT_MAX_MEMORY_MB
}

pub(crate) fn max_cpu_percent() -> u32 {
    DEFAULT_MAX_CPU_PERCENT
}

pub(crate) fn idle_timeout_secs() -> u64 {
    DEFAULT_IDLE_TIMEOUT_SECS
}

pub(crate) fn cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

pub(crate) fn cleanup_interval_secs() -> u64 {
    DEFAULT_CLEANUP_INTERVAL_SECS
}

pub(crate) fn max_request_bytes() -> usize {
    DEFAULT_MAX_REQUEST_BYTES
}

pub(crate) fn connection_idle_secs() -> u64 {
    DEFAULT_CONNECTION_IDLE_SECS
}

/// Computes the default socket endpoint for the daemon.
pub fn default_socket_endpoint() -> SocketEndpoint {
    default_socket_endpoint_inner()
}

#[cfg(unix)]
fn default_socket_endpoint_inner() -> SocketEndpoint {
    SocketEndpoint::unix(broker_home().join("brokerd.sock"))
}

/// Per-user directory holding the default socket and, for TCP endpoints,
/// the broker's runtime files.
///
/// `$XDG_RUNTIME_DIR/broker` when the platform provides a runtime directory,
/// otherwise `<tmp>/broker/uid-<euid>` so that users do not collide.
pub(crate) fn broker_home() -> Utf8PathBuf {
    #[cfg(unix)]
    if let Some(mut dir) = runtime_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok()) {
        dir.push("broker");
        return dir;
    }
    let mut dir = temp_base();
    dir.push("broker");
    #[cfg(unix)]
    dir.push(user_namespace());
    dir
}

fn temp_base() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(env::temp_dir()).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(unix)]
fn user_namespace() -> String {
    // SAFETY: geteuid has no preconditions and cannot fail.
    let uid = unsafe { geteuid() };
    format!("uid-{uid}")
}

#[cfg(not(unix))]
fn default_socket_endpoint_inner() -> SocketEndpoint {
    SocketEndpoint::tcp("127.0.0.1", DEFAULT_TCP_PORT)
}
