//! Where a running broker keeps its lock, pid and health files.
//!
//! A Unix socket's parent directory hosts the files, so anything that can
//! reach the socket can also inspect its owner. TCP endpoints fall back to
//! the per-user broker directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::defaults::broker_home;
use crate::{Config, SocketEndpoint};

const LOCK_FILE: &str = "brokerd.lock";
const PID_FILE: &str = "brokerd.pid";
const HEALTH_FILE: &str = "brokerd.health";

/// Resolved locations of the broker's runtime files.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    dir: PathBuf,
    lock: PathBuf,
    pid: PathBuf,
    health: PathBuf,
}

impl RuntimePaths {
    /// Resolves the runtime directory for `config` and creates it.
    ///
    /// # Errors
    ///
    /// Fails when a Unix socket path has no parent or the directory cannot
    /// be created.
    pub fn from_config(config: &Config) -> Result<Self, RuntimePathsError> {
        let dir = match config.daemon_socket() {
            SocketEndpoint::Unix { path } => path
                .parent()
                .filter(|parent| !parent.as_str().is_empty())
                .map(|parent| parent.as_std_path().to_path_buf())
                .ok_or_else(|| RuntimePathsError::MissingSocketParent {
                    path: path.to_string(),
                })?,
            SocketEndpoint::Tcp { .. } => broker_home().into_std_path_buf(),
        };
        Self::in_directory(dir)
    }

    fn in_directory(dir: PathBuf) -> Result<Self, RuntimePathsError> {
        if let Err(source) = fs::create_dir_all(&dir) {
            return Err(RuntimePathsError::RuntimeDirectory { path: dir, source });
        }
        Ok(Self {
            lock: dir.join(LOCK_FILE),
            pid: dir.join(PID_FILE),
            health: dir.join(HEALTH_FILE),
            dir,
        })
    }

    pub fn runtime_dir(&self) -> &Path {
        &self.dir
    }

    /// Exclusive-create lock marking a live broker.
    pub fn lock_path(&self) -> &Path {
        &self.lock
    }

    pub fn pid_path(&self) -> &Path {
        &self.pid
    }

    /// JSON lifecycle snapshot, rewritten on every state change.
    pub fn health_path(&self) -> &Path {
        &self.health
    }
}

/// Failures resolving or creating the runtime directory.
#[derive(Debug, Error)]
pub enum RuntimePathsError {
    #[error("unix socket '{path}' is not inside a directory")]
    MissingSocketParent { path: String },
    #[error("cannot create broker runtime directory '{path}': {source}")]
    RuntimeDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
