//! Broker bootstrap orchestration.

use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use broker_config::{Config, SocketPreparationError};

use crate::dispatch::{BrokerConnectionHandler, Dispatcher, HandlerTable};
use crate::governor::{ResourceSampler, SysinfoSampler};
use crate::handlers::database::DatabaseDriver;
use crate::handlers::{admin, database, lockfile};
use crate::health::HealthReporter;
use crate::process::ShutdownTrigger;
use crate::services::BrokerServices;
use crate::telemetry::{self, TelemetryError, TelemetryHandle};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the broker configuration.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader returning a configuration resolved earlier.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps `config`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// Socket preparation failed.
    #[error("failed to prepare broker socket: {source}")]
    Socket {
        /// Filesystem error reported while preparing the socket directory.
        #[source]
        source: SocketPreparationError,
    },
}

type Registration = Box<dyn FnOnce(&mut HandlerTable) + Send>;

/// Collaborators assembled into a [`Broker`].
///
/// The defaults sample the running process with `sysinfo`, register the
/// administrative and lockfile modules, and leave the database module out.
///
/// ```rust
/// use brokerd::{BrokerComponents, BrokerServices, HandlerError, HandlerTable};
/// use serde_json::json;
///
/// let components = BrokerComponents::new().with_handlers(|table: &mut HandlerTable| {
///     table.register("demo", "hello", |_: &BrokerServices, _: &serde_json::Value| {
///         Ok::<_, HandlerError>(json!({"greeting": "hi"}))
///     });
/// });
/// drop(components);
/// ```
pub struct BrokerComponents {
    sampler: Box<dyn ResourceSampler>,
    driver: Option<Arc<dyn DatabaseDriver>>,
    registrations: Vec<Registration>,
    shutdown: ShutdownTrigger,
}

impl BrokerComponents {
    /// Builds the production defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sampler: Box::new(SysinfoSampler::for_current_process()),
            driver: None,
            registrations: Vec::new(),
            shutdown: ShutdownTrigger::new(),
        }
    }

    /// Replaces the resource sampler.
    #[must_use]
    pub fn with_sampler(mut self, sampler: Box<dyn ResourceSampler>) -> Self {
        self.sampler = sampler;
        self
    }

    /// Enables the `database` module over `driver`.
    #[must_use]
    pub fn with_database_driver(mut self, driver: Arc<dyn DatabaseDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Adds embedder handlers. Everything registered here is whitelisted.
    #[must_use]
    pub fn with_handlers<F>(mut self, register: F) -> Self
    where
        F: FnOnce(&mut HandlerTable) + Send + 'static,
    {
        self.registrations.push(Box::new(register));
        self
    }

    /// Shares an existing shutdown trigger with the broker.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: ShutdownTrigger) -> Self {
        self.shutdown = shutdown;
        self
    }

    fn handler_table(&mut self) -> HandlerTable {
        let mut table = HandlerTable::new();
        admin::register(&mut table);
        lockfile::register(&mut table);
        if let Some(driver) = self.driver.take() {
            database::register(&mut table, driver);
        }
        for register in self.registrations.drain(..) {
            register(&mut table);
        }
        table
    }
}

impl Default for BrokerComponents {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BrokerComponents {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("BrokerComponents")
            .field("database", &self.driver.is_some())
            .field("registrations", &self.registrations.len())
            .finish_non_exhaustive()
    }
}

/// Result of a successful bootstrap invocation.
#[derive(Debug)]
pub struct Broker {
    config: Config,
    telemetry: TelemetryHandle,
    dispatcher: Arc<Dispatcher>,
}

impl Broker {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Shared broker state.
    #[must_use]
    pub fn services(&self) -> &Arc<BrokerServices> {
        self.dispatcher.services()
    }

    /// Request pipeline.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Per-connection request loop over this broker's dispatcher.
    #[must_use]
    pub fn connection_handler(&self) -> BrokerConnectionHandler {
        BrokerConnectionHandler::new(Arc::clone(&self.dispatcher), self.services().limits())
    }
}

/// Bootstraps the broker using the supplied collaborators.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    mut components: BrokerComponents,
) -> Result<Broker, BootstrapError> {
    reporter.bootstrap_starting();

    let config = match loader.load() {
        Ok(config) => config,
        Err(source) => {
            let error = BootstrapError::Configuration { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    let telemetry = match telemetry::initialise(&config) {
        Ok(handle) => handle,
        Err(source) => {
            let error = BootstrapError::Telemetry { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    if let Err(source) = config.daemon_socket().prepare_filesystem() {
        let error = BootstrapError::Socket { source };
        reporter.bootstrap_failed(&error);
        return Err(error);
    }

    let table = components.handler_table();
    let services = BrokerServices::new(
        &config,
        &table,
        components.sampler,
        components.shutdown,
    );
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(services), Arc::new(table)));
    reporter.bootstrap_succeeded(&config);

    Ok(Broker {
        config,
        telemetry,
        dispatcher,
    })
}
