//! Local RPC broker daemon.
//!
//! `brokerd` keeps expensive, stateful resources (database connections,
//! lock managers and similar) alive on behalf of short-lived client
//! processes. Clients connect over a Unix domain socket or TCP, send one
//! JSON request per line and receive one JSON response per line. Requests
//! name a `module` and a `function`; resources created by a handler stay in
//! the broker and are referred to by opaque handle IDs in later requests.
//!
//! Each request passes through a fixed pipeline:
//!
//! 1. The [`SecurityGate`](security::SecurityGate) checks the function
//!    against the registered whitelist and screens the parameters for
//!    injection patterns and structural limits.
//! 2. The [`ResourceGovernor`](governor::ResourceGovernor) admits it against
//!    memory, rate and concurrency limits.
//! 3. The [`Dispatcher`] runs the registered [`Handler`], which can reach the
//!    [`HandleRegistry`](registry::HandleRegistry) and the
//!    [`ConnectionCache`](cache::ConnectionCache) through
//!    [`BrokerServices`].
//!
//! [`run_daemon`] wires this together with configuration from
//! [`broker_config`], structured telemetry, runtime lock/PID/health files, a
//! background maintenance worker and graceful shutdown on signals or a
//! `system.shutdown` request. Embedders that need extra handler modules or a
//! database driver use [`BrokerComponents`] with
//! [`run_daemon_with_components`] or [`bootstrap_with`].

mod bootstrap;
pub mod cache;
pub mod dispatch;
mod expiry;
pub mod governor;
pub mod handlers;
mod health;
pub mod maintenance;
mod process;
pub mod registry;
pub mod security;
mod services;
pub mod telemetry;
mod transport;

pub use bootstrap::{
    BootstrapError, Broker, BrokerComponents, ConfigLoader, StaticConfigLoader,
    SystemConfigLoader, bootstrap_with,
};
pub use dispatch::{
    BrokerConnectionHandler, BrokerError, BrokerResponse, Dispatched, Dispatcher, ErrorKind,
    Handler, HandlerError, HandlerTable, RequestState, parse_params,
};
pub use expiry::Expiry;
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{
    LaunchError, SHUTDOWN_TIMEOUT, ShutdownError, ShutdownSignal, ShutdownTrigger,
    SystemShutdownSignal, run_daemon, run_daemon_with_components,
};
pub use services::BrokerServices;
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
