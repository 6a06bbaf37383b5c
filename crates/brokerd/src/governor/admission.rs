//! RAII admission permits.

use std::time::Instant;

use super::ResourceGovernor;

/// How an admitted request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The handler returned a result.
    Completed,
    /// The handler failed or panicked.
    Failed,
}

/// Proof of admission. Dropping it releases the concurrency slot exactly
/// once; a permit dropped without [`AdmissionPermit::finish`] counts as a
/// failure.
#[derive(Debug)]
#[must_use = "dropping the permit releases the slot immediately"]
pub struct AdmissionPermit<'a> {
    governor: &'a ResourceGovernor,
    started: Instant,
    outcome: Option<Outcome>,
}

impl<'a> AdmissionPermit<'a> {
    pub(super) fn new(governor: &'a ResourceGovernor) -> Self {
        Self {
            governor,
            started: Instant::now(),
            outcome: None,
        }
    }

    /// Instant the request was admitted.
    #[must_use]
    pub fn started(&self) -> Instant {
        self.started
    }

    /// Records the outcome and releases the slot.
    pub fn finish(mut self, outcome: Outcome) {
        self.outcome = Some(outcome);
    }
}

impl Drop for AdmissionPermit<'_> {
    fn drop(&mut self) {
        let outcome = self.outcome.unwrap_or(Outcome::Failed);
        self.governor.release(self.started.elapsed(), outcome);
    }
}
