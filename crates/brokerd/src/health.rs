//! Structured health reporting for broker lifecycle events.

use std::sync::Arc;

use broker_config::{Config, SocketEndpoint};

use crate::bootstrap::BootstrapError;
use crate::maintenance::MaintenanceReport;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
#[cfg_attr(test, mockall::automock)]
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked once the listener accepts connections.
    fn listener_ready(&self, endpoint: &SocketEndpoint);

    /// Invoked when graceful shutdown begins.
    fn shutdown_started(&self, in_flight: usize);

    /// Invoked after in-flight requests drained and handles were closed.
    fn shutdown_completed(&self, abandoned: usize, handles_closed: usize);

    /// Invoked after each maintenance pass.
    fn maintenance_completed(&self, report: &MaintenanceReport);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn listener_ready(&self, endpoint: &SocketEndpoint) {
        (**self).listener_ready(endpoint);
    }

    fn shutdown_started(&self, in_flight: usize) {
        (**self).shutdown_started(in_flight);
    }

    fn shutdown_completed(&self, abandoned: usize, handles_closed: usize) {
        (**self).shutdown_completed(abandoned, handles_closed);
    }

    fn maintenance_completed(&self, report: &MaintenanceReport) {
        (**self).maintenance_completed(report);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting broker bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            socket = %config.daemon_socket(),
            log_filter = %config.log_filter(),
            log_format = ?config.log_format(),
            max_concurrent_requests = config.max_concurrent_requests,
            max_requests_per_minute = config.max_requests_per_minute,
            "broker bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "broker bootstrap failed"
        );
    }

    fn listener_ready(&self, endpoint: &SocketEndpoint) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "listener_ready",
            socket = %endpoint,
            "broker accepting connections"
        );
    }

    fn shutdown_started(&self, in_flight: usize) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "shutdown_started",
            in_flight,
            "draining in-flight requests"
        );
    }

    fn shutdown_completed(&self, abandoned: usize, handles_closed: usize) {
        if abandoned > 0 {
            tracing::warn!(
                target: HEALTH_TARGET,
                event = "shutdown_completed",
                abandoned,
                handles_closed,
                "shutdown timed out with requests still running"
            );
        } else {
            tracing::info!(
                target: HEALTH_TARGET,
                event = "shutdown_completed",
                handles_closed,
                "broker stopped"
            );
        }
    }

    fn maintenance_completed(&self, report: &MaintenanceReport) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "maintenance_completed",
            swept = report.swept,
            purged = report.purged,
            live_handles = report.live_handles,
            uptime_secs = report.uptime_secs,
            received = report.totals.received,
            completed = report.totals.completed,
            failed = report.totals.failed,
            rejected = report.totals.rejected,
            "maintenance pass"
        );
    }
}
