//! Advisory lock files in the style of `LockFile::Simple`.
//!
//! `make` creates a manager holding the staleness policy; `trylock` creates
//! the lock file exclusively and records the broker's PID in it. Lock files
//! older than the manager's `hold` are treated as abandoned and replaced.
//! Locks are removed by `release`, by `cleanup_manager`, or when their
//! handle is destroyed.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::dispatch::{HandlerError, HandlerTable, parse_params};
use crate::expiry::Expiry;
use crate::registry::{HandleId, HandleKind, RegistryError};
use crate::services::BrokerServices;

use super::HANDLERS_TARGET;

const MODULE: &str = "lockfile";
/// Staleness threshold used when `make` is given none.
pub const DEFAULT_HOLD_SECS: u64 = 90;
const FILENAME_TOKEN: &str = "%F";

/// Registers the `lockfile` module.
pub fn register(table: &mut HandlerTable) {
    table
        .register(MODULE, "make", make)
        .register(MODULE, "trylock", trylock)
        .register(MODULE, "release", release)
        .register(MODULE, "cleanup_manager", cleanup_manager);
}

#[derive(Debug)]
struct LockManager {
    nfs: bool,
    hold: Expiry,
    locks: Vec<HandleId>,
}

/// A lock file owned by the broker. Dropping it removes the file.
#[derive(Debug)]
struct HeldLock {
    manager_id: HandleId,
    path: PathBuf,
    released: bool,
}

impl HeldLock {
    fn release(mut self) -> io::Result<()> {
        self.released = true;
        remove_if_present(&self.path)
    }
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(error) = remove_if_present(&self.path) {
            warn!(
                target: HANDLERS_TARGET,
                file = %self.path.display(),
                %error,
                "failed to remove abandoned lock file"
            );
        }
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(error) if error.kind() != io::ErrorKind::NotFound => Err(error),
        _ => Ok(()),
    }
}

#[derive(Debug, Deserialize)]
struct MakeParams {
    #[serde(default)]
    nfs: bool,
    #[serde(default)]
    hold: Option<u64>,
    /// Older spelling of `hold`; wins when both are given.
    #[serde(default)]
    max_age: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TrylockParams {
    manager_id: HandleId,
    filename: String,
    #[serde(default)]
    lockfile_pattern: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReleaseParams {
    lock_id: HandleId,
}

#[derive(Debug, Deserialize)]
struct ManagerParams {
    manager_id: HandleId,
}

fn make(services: &BrokerServices, params: &Value) -> Result<Value, HandlerError> {
    let MakeParams { nfs, hold, max_age } = parse_params(params)?;
    let hold = max_age.or(hold).unwrap_or(DEFAULT_HOLD_SECS);
    let manager_id = services.registry().create(
        HandleKind::LockManager,
        LockManager {
            nfs,
            hold: Expiry::new(Duration::from_secs(hold)),
            locks: Vec::new(),
        },
    );
    Ok(json!({"manager_id": manager_id, "nfs": nfs, "hold": hold}))
}

/// Lock file path for `filename`: the pattern with `%F` replaced, or
/// `<filename>.lock`.
fn lockfile_path(filename: &str, pattern: Option<&str>) -> PathBuf {
    match pattern {
        Some(pattern) if !pattern.is_empty() => {
            PathBuf::from(pattern.replace(FILENAME_TOKEN, filename))
        }
        _ => PathBuf::from(format!("{filename}.lock")),
    }
}

fn is_stale(path: &Path, hold: Expiry) -> bool {
    fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .is_ok_and(|modified| hold.is_expired_at(modified, SystemTime::now()))
}

fn create_exclusive(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    write!(file, "{}", std::process::id())?;
    file.sync_all()
}

fn acquire(path: &Path, hold: Expiry) -> io::Result<()> {
    match create_exclusive(path) {
        Err(error) if error.kind() == io::ErrorKind::AlreadyExists && is_stale(path, hold) => {
            debug!(
                target: HANDLERS_TARGET,
                file = %path.display(),
                "replacing stale lock file"
            );
            remove_if_present(path)?;
            create_exclusive(path)
        }
        other => other,
    }
}

fn trylock(services: &BrokerServices, params: &Value) -> Result<Value, HandlerError> {
    let TrylockParams {
        manager_id,
        filename,
        lockfile_pattern,
    } = parse_params(params)?;
    let hold = services.registry().with_handle(
        &manager_id,
        HandleKind::LockManager,
        |manager: &mut LockManager| manager.hold,
    )?;
    let path = lockfile_path(&filename, lockfile_pattern.as_deref());
    acquire(&path, hold).map_err(|error| {
        HandlerError::failed(format!("could not acquire lock on {filename}: {error}"))
    })?;

    let lock_id = services.registry().create(
        HandleKind::Lock,
        HeldLock {
            manager_id: manager_id.clone(),
            path: path.clone(),
            released: false,
        },
    );
    let tracked = services.registry().with_handle(
        &manager_id,
        HandleKind::LockManager,
        |manager: &mut LockManager| manager.locks.push(lock_id.clone()),
    );
    if let Err(error) = tracked {
        // The manager vanished meanwhile; dropping the lock removes the file.
        services.registry().destroy(&lock_id);
        return Err(error.into());
    }
    Ok(json!({
        "lock_id": lock_id,
        "filename": filename,
        "lockfile": path.display().to_string(),
    }))
}

fn release(services: &BrokerServices, params: &Value) -> Result<Value, HandlerError> {
    let ReleaseParams { lock_id } = parse_params(params)?;
    let lock: HeldLock = services.registry().take(&lock_id, HandleKind::Lock)?;
    let manager_id = lock.manager_id.clone();
    let path = lock.path.clone();
    lock.release().map_err(|error| {
        HandlerError::failed(format!(
            "failed to release lock {}: {error}",
            path.display()
        ))
    })?;
    let detached = services.registry().with_handle(
        &manager_id,
        HandleKind::LockManager,
        |manager: &mut LockManager| manager.locks.retain(|id| id != &lock_id),
    );
    match detached {
        Ok(()) | Err(RegistryError::NotFound { .. }) => {}
        Err(error) => warn!(
            target: HANDLERS_TARGET,
            lock = %lock_id,
            manager = %manager_id,
            %error,
            "released lock not detached from its manager"
        ),
    }
    Ok(json!({"lock_id": lock_id, "released": true}))
}

fn cleanup_manager(services: &BrokerServices, params: &Value) -> Result<Value, HandlerError> {
    let ManagerParams { manager_id } = parse_params(params)?;
    let manager = match services
        .registry()
        .take::<LockManager>(&manager_id, HandleKind::LockManager)
    {
        Ok(manager) => manager,
        Err(RegistryError::NotFound { .. }) => {
            return Ok(json!({"manager_id": manager_id, "cleaned_up": true, "released": 0}));
        }
        Err(error) => return Err(error.into()),
    };
    let mut released = 0;
    for lock_id in &manager.locks {
        let Ok(lock) = services.registry().take::<HeldLock>(lock_id, HandleKind::Lock) else {
            continue;
        };
        let path = lock.path.clone();
        match lock.release() {
            Ok(()) => released += 1,
            Err(error) => warn!(
                target: HANDLERS_TARGET,
                file = %path.display(),
                %error,
                "failed to remove lock file during cleanup"
            ),
        }
    }
    debug!(
        target: HANDLERS_TARGET,
        manager = %manager_id,
        nfs = manager.nfs,
        released,
        "lock manager cleaned up"
    );
    Ok(json!({"manager_id": manager_id, "cleaned_up": true, "released": released}))
}
