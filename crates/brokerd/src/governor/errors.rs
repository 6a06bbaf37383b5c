//! Throttling errors.

use thiserror::Error;

/// Limit that caused a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleReason {
    /// Too many requests in flight.
    Concurrency { current: usize, limit: usize },
    /// Too many admissions in the last minute.
    Rate { current: usize, limit: usize },
    /// Process memory at or above the limit.
    Memory { current_mb: u64, limit_mb: u64 },
}

impl std::fmt::Display for ThrottleReason {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Concurrency { current, limit } => {
                write!(formatter, "too many concurrent requests ({current}/{limit})")
            }
            Self::Rate { current, limit } => {
                write!(formatter, "request rate limit exceeded ({current}/{limit} per minute)")
            }
            Self::Memory {
                current_mb,
                limit_mb,
            } => write!(formatter, "memory limit exceeded ({current_mb}/{limit_mb} MB)"),
        }
    }
}

/// Admission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("request throttled: {reason}")]
pub struct ThrottleError {
    /// Limit that was hit.
    pub reason: ThrottleReason,
}
