//! Time-to-live arithmetic shared by handle sweeping, cached connections and
//! stale lock files.

use std::time::{Duration, Instant, SystemTime};

/// A fixed lifetime measured from a starting point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiry {
    ttl: Duration,
}

impl Expiry {
    /// Builds an expiry policy with the given lifetime.
    #[must_use]
    pub const fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    /// Whether something last touched at `since` has outlived the TTL at `now`.
    #[must_use]
    pub fn is_expired(self, since: Instant, now: Instant) -> bool {
        now.saturating_duration_since(since) > self.ttl
    }

    /// Wall-clock variant used for file modification times.
    ///
    /// Timestamps in the future are treated as fresh.
    #[must_use]
    pub fn is_expired_at(self, since: SystemTime, now: SystemTime) -> bool {
        now.duration_since(since)
            .map(|age| age > self.ttl)
            .unwrap_or(false)
    }
}
