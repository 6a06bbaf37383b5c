//! Process-wide `tracing` subscriber for the broker.
//!
//! Logs go to stderr. JSON output flattens event fields so that request
//! identifiers, modules and error kinds land as top-level keys.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, time::UtcTime};

use broker_config::{Config, LogFormat};

static INSTALLED: OnceCell<LogFormat> = OnceCell::new();

/// Proof that the global subscriber is in place.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// `log_filter` is not a valid `EnvFilter` directive list.
    #[error("log filter '{filter}' is invalid: {reason}")]
    Filter { filter: String, reason: String },
    /// Something else already installed a global subscriber.
    #[error("cannot install the broker log subscriber: {0}")]
    Subscriber(#[from] SetGlobalDefaultError),
}

/// Installs the broker's subscriber on first use.
///
/// Later calls return immediately, even with a different configuration, so
/// embedders and tests may bootstrap several brokers in one process.
///
/// ```rust
/// use broker_config::Config;
/// use brokerd::telemetry;
///
/// # fn main() -> Result<(), brokerd::telemetry::TelemetryError> {
/// let config = Config::default();
/// telemetry::initialise(&config)?;
/// telemetry::initialise(&config)?;
/// # Ok(())
/// # }
/// ```
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    INSTALLED.get_or_try_init(|| install(config))?;
    Ok(TelemetryHandle)
}

fn filter_for(config: &Config) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(config.log_filter()).map_err(|error| TelemetryError::Filter {
        filter: config.log_filter().to_owned(),
        reason: error.to_string(),
    })
}

fn install(config: &Config) -> Result<LogFormat, TelemetryError> {
    let filter = filter_for(config)?;
    let format = config.log_format();
    let base = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_thread_names(true);

    match format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            base.json()
                .flatten_event(true)
                .with_current_span(false)
                .finish(),
        )?,
        LogFormat::Compact => tracing::subscriber::set_global_default(
            base.compact()
                .with_ansi(io::stderr().is_terminal())
                .finish(),
        )?,
    }
    Ok(format)
}
