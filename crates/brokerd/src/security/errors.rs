//! Gate rejection errors.

use thiserror::Error;

use super::events::SecurityEventKind;

/// Reason a request failed validation.
///
/// Messages name the offending field or location but never echo the
/// offending value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Required field absent, empty, or not a string.
    #[error("missing or invalid field: {field}")]
    MissingField { field: &'static str },

    /// Name contains characters outside `[A-Za-z0-9_]`.
    #[error("invalid {field} name format")]
    InvalidName { field: &'static str },

    /// No handler is registered for the pair.
    #[error("function not allowed: {module}.{function}")]
    NotWhitelisted { module: String, function: String },

    /// Function name matches the denylist.
    #[error("potentially dangerous function name: {function}")]
    DeniedFunction { function: String },

    /// Parameters exceed a structural bound.
    #[error("parameters exceed limits: {message}")]
    StructureLimit { message: String },

    /// A string matched a content signature.
    #[error("suspicious content ({kind}) at {location}")]
    SuspiciousContent {
        kind: SecurityEventKind,
        location: String,
    },
}

impl ValidationError {
    /// Event category recorded for this rejection.
    #[must_use]
    pub fn kind(&self) -> SecurityEventKind {
        match self {
            Self::MissingField { .. } => SecurityEventKind::MissingField,
            Self::InvalidName { .. } => SecurityEventKind::InvalidName,
            Self::NotWhitelisted { .. } => SecurityEventKind::NotWhitelisted,
            Self::DeniedFunction { .. } => SecurityEventKind::DeniedFunction,
            Self::StructureLimit { .. } => SecurityEventKind::StructureLimit,
            Self::SuspiciousContent { kind, .. } => *kind,
        }
    }

    pub(crate) fn structure(message: impl Into<String>) -> Self {
        Self::StructureLimit {
            message: message.into(),
        }
    }
}
