//! Supervises broker launch sequencing and runtime orchestration.

use std::sync::Arc;

use tracing::{info, warn};

use broker_config::RuntimePaths;

use crate::bootstrap::{
    BrokerComponents, ConfigLoader, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::maintenance::MaintenanceWorker;
use crate::transport::SocketListener;

use super::errors::LaunchError;
use super::guard::{HealthState, ProcessGuard};
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};
use super::{PROCESS_TARGET, SHUTDOWN_TIMEOUT};

/// Process-level collaborators needed to control the broker lifecycle.
pub(crate) struct ProcessControl<S> {
    pub(crate) shutdown: S,
}

/// Service dependencies required to construct the broker runtime.
pub(crate) struct ServiceDeps<L> {
    pub(crate) loader: L,
    pub(crate) reporter: Arc<dyn HealthReporter>,
    pub(crate) components: BrokerComponents,
}

/// Collaborators required to launch the broker runtime.
pub(crate) struct LaunchPlan<L, S> {
    pub(crate) process: ProcessControl<S>,
    pub(crate) services: ServiceDeps<L>,
}

/// Runs the broker with the production collaborators and the default
/// handler modules.
///
/// # Errors
///
/// Returns [`LaunchError`] when configuration, runtime files, bootstrap or
/// the listener fail. Once the broker is serving, the call blocks until a
/// shutdown signal or a `system.shutdown` request.
pub fn run_daemon() -> Result<(), LaunchError> {
    run_daemon_with_components(BrokerComponents::new())
}

/// Runs the broker with production collaborators and embedder-supplied
/// components, such as a database driver.
///
/// # Errors
///
/// See [`run_daemon`].
pub fn run_daemon_with_components(components: BrokerComponents) -> Result<(), LaunchError> {
    let plan = LaunchPlan {
        process: ProcessControl {
            shutdown: SystemShutdownSignal::new(SHUTDOWN_TIMEOUT),
        },
        services: ServiceDeps {
            loader: SystemConfigLoader,
            reporter: Arc::new(StructuredHealthReporter::new()),
            components,
        },
    };
    run_daemon_with(plan)
}

/// Runs the broker with injected collaborators.
pub(crate) fn run_daemon_with<L, S>(plan: LaunchPlan<L, S>) -> Result<(), LaunchError>
where
    L: ConfigLoader,
    S: ShutdownSignal,
{
    let LaunchPlan { process, services } = plan;
    let ProcessControl { shutdown } = process;
    let ServiceDeps {
        loader,
        reporter,
        components,
    } = services;

    info!(target: PROCESS_TARGET, "starting broker runtime");
    let config = loader.load()?;
    config.daemon_socket().prepare_filesystem()?;
    let runtime_paths = RuntimePaths::from_config(&config)?;
    let mut guard = ProcessGuard::acquire(runtime_paths)?;
    guard.write_pid(std::process::id())?;
    guard.write_health(HealthState::Starting)?;

    let static_loader = StaticConfigLoader::new(config.clone());
    let broker = bootstrap_with(&static_loader, Arc::clone(&reporter), components)?;
    let services = Arc::clone(broker.services());
    let trigger = services.shutdown().clone();
    shutdown.watch(trigger.clone())?;

    let listener = SocketListener::bind(config.daemon_socket())?;
    let listener_handle = listener.start(Arc::new(broker.connection_handler()))?;
    let maintenance = MaintenanceWorker::start(Arc::clone(&services), Arc::clone(&reporter))
        .map_err(|source| LaunchError::Maintenance { source })?;
    reporter.listener_ready(config.daemon_socket());
    guard.write_health(HealthState::Ready)?;

    trigger.wait();

    guard.write_health(HealthState::Stopping)?;
    reporter.shutdown_started(services.governor().in_flight());
    listener_handle.shutdown();
    info!(
        target: PROCESS_TARGET,
        open_connections = listener_handle.open_connections(),
        "listener closed to new connections"
    );
    listener_handle.join()?;
    let abandoned = services.governor().drain(SHUTDOWN_TIMEOUT);
    let handles_closed = services.registry().clear();
    if !maintenance.join() {
        warn!(target: PROCESS_TARGET, "maintenance worker panicked");
    }
    reporter.shutdown_completed(abandoned, handles_closed);
    info!(
        target: PROCESS_TARGET,
        "shutdown sequence completed"
    );
    Ok(())
}
