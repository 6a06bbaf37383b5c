//! Single-instance guard over the broker's runtime files.
//!
//! The lock file is created with `O_EXCL`; a second broker finding it checks
//! whether the recorded pid is still alive before deciding between refusing
//! to start and reclaiming the files.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::Serialize;
use tracing::{debug, info, warn};

use broker_config::RuntimePaths;

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::files::atomic_write;

#[cfg(unix)]
const RUNTIME_FILE_MODE: u32 = 0o600;

/// Holds the lock for as long as the broker runs and removes every runtime
/// file on drop.
#[derive(Debug)]
pub(super) struct ProcessGuard {
    paths: RuntimePaths,
    _lock: File,
    pid: Option<u32>,
}

/// Lifecycle stage published in the health file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(super) enum HealthState {
    Starting,
    Ready,
    Stopping,
}

#[derive(Serialize)]
struct HealthSnapshot {
    status: HealthState,
    pid: u32,
    timestamp: u64,
}

enum Owner {
    Alive(u32),
    Gone,
}

impl ProcessGuard {
    pub(super) fn acquire(paths: RuntimePaths) -> Result<Self, LaunchError> {
        let lock = match create_lock(&paths) {
            Ok(lock) => lock,
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                match recorded_owner(paths.pid_path())? {
                    Owner::Alive(pid) => {
                        info!(target: PROCESS_TARGET, pid, "broker already running");
                        return Err(LaunchError::AlreadyRunning { pid });
                    }
                    Owner::Gone => {
                        warn!(
                            target: PROCESS_TARGET,
                            dir = %paths.runtime_dir().display(),
                            "reclaiming runtime files from a dead broker"
                        );
                        discard(paths.lock_path())?;
                        discard(paths.pid_path())?;
                        create_lock(&paths).map_err(|source| lock_error(&paths, source))?
                    }
                }
            }
            Err(source) => return Err(lock_error(&paths, source)),
        };
        debug!(
            target: PROCESS_TARGET,
            file = %paths.lock_path().display(),
            "broker lock taken"
        );
        Ok(Self {
            paths,
            _lock: lock,
            pid: None,
        })
    }

    pub(super) fn write_pid(&mut self, pid: u32) -> Result<(), LaunchError> {
        let path = self.paths.pid_path();
        atomic_write(path, format!("{pid}\n").as_bytes()).map_err(|source| {
            LaunchError::PidWrite {
                path: path.to_path_buf(),
                source,
            }
        })?;
        self.pid = Some(pid);
        info!(target: PROCESS_TARGET, pid, file = %path.display(), "pid recorded");
        Ok(())
    }

    /// Publishes `status`. The pid must have been written first.
    pub(super) fn write_health(&self, status: HealthState) -> Result<(), LaunchError> {
        let pid = self.pid.ok_or(LaunchError::MissingPid)?;
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|source| LaunchError::Clock { source })?
            .as_secs();
        let mut payload = serde_json::to_vec(&HealthSnapshot {
            status,
            pid,
            timestamp,
        })?;
        payload.push(b'\n');

        let path = self.paths.health_path();
        atomic_write(path, &payload).map_err(|source| LaunchError::HealthWrite {
            path: path.to_path_buf(),
            source,
        })?;
        info!(target: PROCESS_TARGET, status = ?status, "health updated");
        Ok(())
    }

    #[cfg(test)]
    pub(super) fn paths(&self) -> &RuntimePaths {
        &self.paths
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        let files = [
            self.paths.health_path(),
            self.paths.pid_path(),
            self.paths.lock_path(),
        ];
        for path in files {
            if let Err(error) = discard(path) {
                warn!(target: PROCESS_TARGET, error = %error, "runtime file left behind");
            }
        }
    }
}

fn create_lock(paths: &RuntimePaths) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(RUNTIME_FILE_MODE);
    }
    options.open(paths.lock_path())
}

fn lock_error(paths: &RuntimePaths, source: io::Error) -> LaunchError {
    LaunchError::LockCreate {
        path: paths.lock_path().to_path_buf(),
        source,
    }
}

/// Decides whether the pid recorded next to an existing lock still runs.
/// A missing or unreadable pid file means the owner died mid-startup.
fn recorded_owner(pid_path: &Path) -> Result<Owner, LaunchError> {
    let Some(pid) = fs::read_to_string(pid_path)
        .ok()
        .and_then(|raw| raw.trim().parse::<u32>().ok())
        .filter(|pid| *pid != 0)
    else {
        return Ok(Owner::Gone);
    };
    let Ok(raw) = i32::try_from(pid) else {
        return Ok(Owner::Gone);
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => Ok(Owner::Alive(pid)),
        Err(Errno::ESRCH) => Ok(Owner::Gone),
        Err(source) => Err(LaunchError::CheckProcess { pid, source }),
    }
}

fn discard(path: &Path) -> Result<(), LaunchError> {
    match fs::remove_file(path) {
        Err(error) if error.kind() != io::ErrorKind::NotFound => Err(LaunchError::Cleanup {
            path: path.to_path_buf(),
            source: error,
        }),
        _ => Ok(()),
    }
}
