//! Periodic housekeeping: idle handle sweeps, cache purges and a health line.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;

use crate::governor::RequestTotals;
use crate::health::HealthReporter;
use crate::services::BrokerServices;

/// Result of one maintenance pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaintenanceReport {
    /// Idle handles evicted.
    pub swept: usize,
    /// Cache entries dropped.
    pub purged: usize,
    /// Handles still live afterwards.
    pub live_handles: usize,
    /// Seconds since startup.
    pub uptime_secs: u64,
    /// Request counters at the time of the pass.
    pub totals: RequestTotals,
}

/// Runs one pass over `services`.
///
/// The cache is purged first so that expired cached connections are closed
/// as cache evictions rather than idle sweeps.
pub fn run_pass(services: &BrokerServices) -> MaintenanceReport {
    let purged = services.cache().purge_expired();
    let swept = services.registry().sweep(services.limits().idle_timeout);
    MaintenanceReport {
        swept,
        purged,
        live_handles: services.registry().len(),
        uptime_secs: services.uptime().as_secs(),
        totals: services.governor().totals(),
    }
}

/// Background thread running [`run_pass`] every cleanup interval until
/// shutdown is triggered.
#[derive(Debug)]
pub struct MaintenanceWorker {
    handle: JoinHandle<()>,
}

impl MaintenanceWorker {
    /// Starts the worker.
    ///
    /// # Errors
    ///
    /// Returns the spawn error when the thread cannot be created.
    pub fn start(
        services: Arc<BrokerServices>,
        reporter: Arc<dyn HealthReporter>,
    ) -> io::Result<Self> {
        Self::start_with_interval(services.limits().cleanup_interval, services, reporter)
    }

    fn start_with_interval(
        interval: Duration,
        services: Arc<BrokerServices>,
        reporter: Arc<dyn HealthReporter>,
    ) -> io::Result<Self> {
        let handle = thread::Builder::new()
            .name(String::from("brokerd-maintenance"))
            .spawn(move || {
                let shutdown = services.shutdown().clone();
                while !shutdown.wait_timeout(interval) {
                    reporter.maintenance_completed(&run_pass(&services));
                }
            })?;
        Ok(Self { handle })
    }

    /// Waits for the worker to observe shutdown and exit.
    pub fn join(self) -> bool {
        self.handle.join().is_ok()
    }
}
