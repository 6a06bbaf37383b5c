//! Failures binding the broker endpoint or running its accept loop.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Errors raised by [`super::SocketListener`] and its handle.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The configured host name did not resolve.
    #[error("cannot resolve broker address {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    /// Resolution succeeded but produced no addresses.
    #[error("broker address {host}:{port} resolved to nothing")]
    ResolveEmpty { host: String, port: u16 },
    /// The TCP port could not be bound, usually because it is taken.
    #[error("cannot bind broker to {addr}: {source}")]
    BindTcp {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("cannot switch broker socket to non-blocking mode: {source}")]
    NonBlocking {
        #[source]
        source: io::Error,
    },
    /// The accept thread could not be created.
    #[error("cannot spawn the broker accept thread: {source}")]
    Spawn {
        #[source]
        source: io::Error,
    },
    #[cfg(not(unix))]
    #[error("endpoint {endpoint} needs unix domain sockets, which this platform lacks")]
    UnsupportedUnix { endpoint: String },
    #[cfg(unix)]
    #[error("cannot bind broker socket file {path}: {source}")]
    BindUnix {
        path: String,
        #[source]
        source: io::Error,
    },
    /// Setting mode 0600 on the socket file failed.
    #[cfg(unix)]
    #[error("cannot restrict access to broker socket {path}: {source}")]
    UnixPermissions {
        path: String,
        #[source]
        source: io::Error,
    },
    /// Another process is accepting on the socket file.
    #[cfg(unix)]
    #[error("broker socket {path} is owned by a running process")]
    UnixInUse { path: String },
    /// The socket path is occupied by something other than a socket.
    #[cfg(unix)]
    #[error("{path} exists and is not a socket")]
    UnixNotSocket { path: String },
    #[cfg(unix)]
    #[error("cannot inspect broker socket {path}: {source}")]
    UnixMetadata {
        path: String,
        #[source]
        source: io::Error,
    },
    /// Probing an existing socket file failed for a reason other than a
    /// refused connection.
    #[cfg(unix)]
    #[error("cannot probe existing broker socket {path}: {source}")]
    UnixConnect {
        path: String,
        #[source]
        source: io::Error,
    },
    #[cfg(unix)]
    #[error("cannot remove stale broker socket {path}: {source}")]
    UnixCleanup {
        path: String,
        #[source]
        source: io::Error,
    },
    /// The accept thread panicked before it could be joined.
    #[error("broker accept thread panicked")]
    ThreadPanic,
}
