//! Everything that can stop `brokerd` from starting or shutting down cleanly.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTimeError;

use nix::errno::Errno;
use thiserror::Error;

use ortho_config::OrthoError;

use broker_config::{RuntimePathsError, SocketPreparationError};

use crate::bootstrap::BootstrapError;
use crate::transport::ListenerError;

use super::shutdown::ShutdownError;

/// Errors returned by [`super::run_daemon`] and its variants.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Layered configuration was invalid.
    #[error("cannot load broker configuration: {source}")]
    Config {
        #[source]
        source: Arc<OrthoError>,
    },
    /// Preparing the socket filesystem failed.
    #[error("cannot prepare the broker socket directory: {source}")]
    Socket {
        #[source]
        source: SocketPreparationError,
    },
    #[error("cannot create runtime directory '{path}': {source}")]
    RuntimeDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The socket path lacked a parent directory.
    #[error("unix socket '{path}' is not inside a directory")]
    MissingSocketParent {
        /// Configured socket path.
        path: String,
    },
    /// Lock file creation failed.
    #[error("cannot take broker lock '{path}': {source}")]
    LockCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// A running broker already holds the lock.
    #[error("another broker (pid {pid}) owns this runtime directory")]
    AlreadyRunning {
        /// Owner read from the pid file.
        pid: u32,
    },
    /// Files left by a dead broker could not be removed.
    #[error("cannot clear leftover runtime file '{path}': {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Writing the PID file failed.
    #[error("cannot record broker pid in '{path}': {source}")]
    PidWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot update health file '{path}': {source}")]
    HealthWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Serialising the health snapshot failed.
    #[error("cannot encode health snapshot: {source}")]
    HealthSerialise {
        #[from]
        source: serde_json::Error,
    },
    #[error("system clock is before the unix epoch: {source}")]
    Clock {
        #[source]
        source: SystemTimeError,
    },
    /// Attempting to probe an existing PID failed.
    #[error("cannot probe recorded broker pid {pid}: {source}")]
    CheckProcess {
        pid: u32,
        source: Errno,
    },
    /// Health updates were attempted before writing the PID file.
    #[error("health state written before the pid file")]
    MissingPid,
    /// Installing the shutdown signal handlers failed.
    #[error("cannot install shutdown signal handling: {source}")]
    Shutdown {
        #[source]
        source: ShutdownError,
    },
    /// Bootstrapping the broker failed.
    #[error("broker bootstrap failed: {source}")]
    Bootstrap {
        #[source]
        source: BootstrapError,
    },
    /// Socket listener startup failed.
    #[error("broker listener failed: {source}")]
    Listener {
        #[source]
        source: ListenerError,
    },
    /// The maintenance thread could not be spawned.
    #[error("cannot start the maintenance thread: {source}")]
    Maintenance {
        #[source]
        source: io::Error,
    },
}

impl From<Arc<OrthoError>> for LaunchError {
    fn from(source: Arc<OrthoError>) -> Self {
        Self::Config { source }
    }
}

impl From<SocketPreparationError> for LaunchError {
    fn from(source: SocketPreparationError) -> Self {
        Self::Socket { source }
    }
}

impl From<RuntimePathsError> for LaunchError {
    fn from(source: RuntimePathsError) -> Self {
        match source {
            RuntimePathsError::MissingSocketParent { path } => Self::MissingSocketParent { path },
            RuntimePathsError::RuntimeDirectory { path, source } => {
                Self::RuntimeDirectory { path, source }
            }
        }
    }
}

impl From<ShutdownError> for LaunchError {
    fn from(source: ShutdownError) -> Self {
        Self::Shutdown { source }
    }
}

impl From<BootstrapError> for LaunchError {
    fn from(source: BootstrapError) -> Self {
        Self::Bootstrap { source }
    }
}

impl From<ListenerError> for LaunchError {
    fn from(source: ListenerError) -> Self {
        Self::Listener { source }
    }
}
