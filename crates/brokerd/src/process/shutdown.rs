//! Shutdown coordination: a shared trigger fired by signals or by the
//! `system.shutdown` request.

use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use thiserror::Error;
use tracing::info;

use super::PROCESS_TARGET;

/// One-shot latch shared by everything that may start or await shutdown.
#[derive(Debug, Clone, Default)]
pub struct ShutdownTrigger {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownTrigger {
    /// Creates an unfired trigger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the trigger. Returns `true` for the first caller only.
    pub fn fire(&self) -> bool {
        let (flag, condvar) = &*self.state;
        let mut fired = lock(flag);
        if *fired {
            return false;
        }
        *fired = true;
        condvar.notify_all();
        true
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        *lock(&self.state.0)
    }

    /// Blocks until the trigger fires.
    pub fn wait(&self) {
        let (flag, condvar) = &*self.state;
        let mut fired = lock(flag);
        while !*fired {
            fired = condvar.wait(fired).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks until the trigger fires or `timeout` passes. Returns whether
    /// it fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (flag, condvar) = &*self.state;
        let mut fired = lock(flag);
        while !*fired {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            fired = condvar
                .wait_timeout(fired, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *fired
    }
}

// A bool cannot be left half-written.
fn lock(flag: &Mutex<bool>) -> MutexGuard<'_, bool> {
    flag.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Source of external shutdown requests.
pub trait ShutdownSignal: Send + Sync {
    /// Arranges for `trigger` to fire when shutdown is requested externally.
    fn watch(&self, trigger: ShutdownTrigger) -> Result<(), ShutdownError>;
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Spawning the signal watcher thread failed.
    #[error("failed to spawn signal watcher: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Fires the trigger on SIGTERM, SIGINT, SIGQUIT or SIGHUP.
#[derive(Debug)]
pub struct SystemShutdownSignal {
    timeout: Duration,
    handle: Mutex<Option<Handle>>,
}

impl SystemShutdownSignal {
    /// Builds a signal listener with the configured drain budget.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            handle: Mutex::new(None),
        }
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn watch(&self, trigger: ShutdownTrigger) -> Result<(), ShutdownError> {
        let mut signals = Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP])
            .map_err(|source| ShutdownError::Install { source })?;
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(signals.handle());
        let timeout = self.timeout;
        thread::Builder::new()
            .name(String::from("brokerd-signals"))
            .spawn(move || {
                if let Some(signal) = signals.forever().next() {
                    info!(
                        target: PROCESS_TARGET,
                        signal,
                        timeout_ms = timeout.as_millis(),
                        "shutdown signal received"
                    );
                    trigger.fire();
                }
            })
            .map_err(|source| ShutdownError::Spawn { source })?;
        Ok(())
    }
}

impl Drop for SystemShutdownSignal {
    fn drop(&mut self) {
        if let Some(handle) = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.close();
        }
    }
}
