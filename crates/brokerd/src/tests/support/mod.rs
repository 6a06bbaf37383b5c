//! Test harness utilities shared by the behavioural suites.

mod client;
mod config_loader;
mod reporter;

pub use client::{BrokerClient, request_once};
pub use config_loader::{FailingConfigLoader, TestConfigLoader};
pub use reporter::{HealthEvent, RecordingHealthReporter};
