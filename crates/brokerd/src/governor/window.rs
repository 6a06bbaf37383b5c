//! Rolling one-minute request window.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Width of the rate window.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Admission instants within the last [`RATE_WINDOW`].
#[derive(Debug, Default)]
pub(crate) struct RateWindow {
    instants: VecDeque<Instant>,
}

impl RateWindow {
    /// Drops instants older than the window and returns the remaining count.
    pub(crate) fn count(&mut self, now: Instant) -> usize {
        while let Some(oldest) = self.instants.front() {
            if now.saturating_duration_since(*oldest) < RATE_WINDOW {
                break;
            }
            self.instants.pop_front();
        }
        self.instants.len()
    }

    pub(crate) fn record(&mut self, now: Instant) {
        self.instants.push_back(now);
    }
}
