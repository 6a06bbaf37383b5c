//! Process lifecycle: runtime files, signal handling and the launch sequence.

use std::time::Duration;

mod errors;
mod files;
mod guard;
pub(crate) mod launch;
pub(crate) mod shutdown;

pub use errors::LaunchError;
pub use launch::{run_daemon, run_daemon_with_components};
pub use shutdown::{ShutdownError, ShutdownSignal, ShutdownTrigger, SystemShutdownSignal};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
/// Upper bound on the wait for in-flight requests during shutdown.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
