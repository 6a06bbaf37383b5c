//! Error taxonomy surfaced to clients.
//!
//! Every failed response carries the display form of a [`BrokerError`] plus
//! its [`ErrorKind`], so clients can branch (for example, back off on
//! `throttle`) without matching on message text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::governor::ThrottleError;
use crate::registry::RegistryError;
use crate::security::ValidationError;

/// Coarse category of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Rejected by the security gate.
    Validation,
    /// Rejected by admission control.
    Throttle,
    /// The handler failed.
    Handler,
    /// A handle ID was missing or of the wrong kind.
    NotFound,
    /// Framing, serialisation or broker fault.
    Internal,
}

/// Failure produced by a handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Domain operation failed.
    #[error("{message}")]
    Failed { message: String },

    /// Parameters did not have the expected shape.
    #[error("invalid parameters: {message}")]
    InvalidParams { message: String },

    /// A referenced handle does not exist.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl HandlerError {
    /// Creates a domain failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Creates a parameter error.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            Self::Registry(RegistryError::NotFound { .. }) => ErrorKind::NotFound,
            Self::Registry(RegistryError::Poisoned { .. }) => ErrorKind::Internal,
            Self::Failed { .. } | Self::InvalidParams { .. } => ErrorKind::Handler,
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(source: serde_json::Error) -> Self {
        Self::invalid_params(source.to_string())
    }
}

/// Any reason a request did not succeed.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Security gate rejection.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Admission rejection; the message contains `throttled`.
    #[error(transparent)]
    Throttled(#[from] ThrottleError),

    /// Handler failure, prefixed with the method that failed.
    #[error("{method} failed: {source}")]
    Handler {
        method: String,
        #[source]
        source: HandlerError,
    },

    /// Handler panicked.
    #[error("{method} failed: handler panicked: {message}")]
    Panicked { method: String, message: String },

    /// Arrived after shutdown was requested.
    #[error("{method} refused: broker is shutting down")]
    ShuttingDown { method: String },

    /// Broker-side fault.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl BrokerError {
    /// Wraps a handler failure for `module.function`.
    pub fn handler(module: &str, function: &str, source: HandlerError) -> Self {
        Self::Handler {
            method: format!("{module}.{function}"),
            source,
        }
    }

    /// Creates a broker-side fault.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Category reported alongside the message.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Throttled(_) => ErrorKind::Throttle,
            Self::Handler { source, .. } => source.kind(),
            Self::Panicked { .. } => ErrorKind::Handler,
            Self::ShuttingDown { .. } | Self::Internal { .. } => ErrorKind::Internal,
        }
    }
}
