//! Test configuration loaders for scenarios covering success and failure paths.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use tempfile::TempDir;

use broker_config::{Config, SocketEndpoint};

use crate::bootstrap::ConfigLoader;

/// Loader that provisions a Unix socket path under a temporary directory.
///
/// Clones share the directory, which lives until the last clone is dropped.
#[derive(Clone)]
pub struct TestConfigLoader {
    dir: Arc<TempDir>,
    overrides: Config,
}

impl TestConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Uses `overrides` for everything except the socket.
    #[must_use]
    pub fn with_config(overrides: Config) -> Self {
        let dir = TempDir::new().expect("failed to create temporary directory for socket");
        Self {
            dir: Arc::new(dir),
            overrides,
        }
    }

    pub fn runtime_dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn socket_path(&self) -> PathBuf {
        self.dir.path().join("brokerd.sock")
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let socket = self.socket_path();
        let socket = socket
            .to_str()
            .expect("temporary socket path was not valid UTF-8");
        Ok(Config {
            daemon_socket: SocketEndpoint::unix(socket),
            ..self.overrides.clone()
        })
    }
}

/// Loader that intentionally fails by passing invalid CLI arguments.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("brokerd"),
            OsString::from("--daemon-socket"),
            OsString::from("invalid://socket"),
        ];
        Config::load_from_iter(args)
    }
}
