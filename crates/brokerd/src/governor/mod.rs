//! Admission control.
//!
//! The [`ResourceGovernor`] decides, per request, whether the broker has
//! capacity: concurrency, rolling request rate and process memory are each
//! checked against a hard limit (reject) and a warning threshold at 80 % of
//! that limit (log only). CPU over its limit only warns. Every admission
//! hands out an [`AdmissionPermit`] whose drop releases the slot, so a
//! panicking handler cannot leak capacity.

mod admission;
mod errors;
mod latency;
mod sampler;
mod window;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use broker_config::BrokerLimits;
use serde::Serialize;
use tracing::{debug, warn};

use self::latency::LatencyWindow;
use self::window::RateWindow;

pub use self::admission::{AdmissionPermit, Outcome};
pub use self::errors::{ThrottleError, ThrottleReason};
pub use self::latency::{LATENCY_WINDOW_SIZE, LatencySummary};
pub use self::sampler::{ResourceSample, ResourceSampler, SysinfoSampler};
pub use self::window::RATE_WINDOW;

#[cfg(test)]
pub use self::sampler::MockResourceSampler;

pub(crate) const GOVERNOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::governor");

/// Minimum spacing between memory/CPU samples.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);
/// Share of a limit at which a warning is raised.
pub const WARNING_PERCENT: u64 = 80;
/// Warnings and violations retained for snapshots.
pub const NOTICE_CAPACITY: usize = 50;

/// Hard limits enforced at admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResourceLimits {
    /// Requests in flight at once.
    pub max_concurrent_requests: usize,
    /// Admissions per rolling minute.
    pub max_requests_per_minute: usize,
    /// Resident memory in MiB.
    pub max_memory_mb: u64,
    /// CPU percent; exceeding it only warns.
    pub max_cpu_percent: u32,
}

impl From<&BrokerLimits> for ResourceLimits {
    fn from(limits: &BrokerLimits) -> Self {
        Self {
            max_concurrent_requests: limits.max_concurrent_requests,
            max_requests_per_minute: limits.max_requests_per_minute,
            max_memory_mb: limits.max_memory_mb,
            max_cpu_percent: limits.max_cpu_percent,
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::from(&BrokerLimits::default())
    }
}

/// Live resource view.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourceSnapshot {
    /// Latest memory sample in MiB.
    pub memory_mb: u64,
    /// Latest CPU sample.
    pub cpu_percent: f32,
    /// Requests in flight.
    pub concurrent_requests: usize,
    /// Highest in-flight count seen.
    pub peak_concurrent_requests: usize,
    /// Admissions in the last minute.
    pub requests_per_minute: usize,
    /// Highest memory sample seen.
    pub peak_memory_mb: u64,
    /// Highest CPU sample seen.
    pub peak_cpu_percent: f32,
    /// Recent threshold warnings, oldest first.
    pub warnings: Vec<String>,
    /// Recent rejections, oldest first.
    pub violations: Vec<String>,
}

/// Cumulative request counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RequestTotals {
    /// Requests that reached admission.
    pub received: u64,
    /// Requests admitted.
    pub admitted: u64,
    /// Requests throttled.
    pub rejected: u64,
    /// Admitted requests that succeeded.
    pub completed: u64,
    /// Admitted requests that failed.
    pub failed: u64,
}

/// Everything the admin surface reports about the governor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GovernorSnapshot {
    /// Live and peak resource use.
    pub resources: ResourceSnapshot,
    /// Cumulative counters.
    pub totals: RequestTotals,
    /// Latency percentiles.
    pub latency: LatencySummary,
    /// Configured limits.
    pub limits: ResourceLimits,
}

#[derive(Debug, Default)]
struct GovernorState {
    window: RateWindow,
    latencies: LatencyWindow,
    sample: ResourceSample,
    sampled_at: Option<Instant>,
    peak_memory_mb: u64,
    peak_cpu_percent: f32,
    warnings: VecDeque<String>,
    violations: VecDeque<String>,
}

impl GovernorState {
    fn refresh(&mut self, sampler: &dyn ResourceSampler, now: Instant) {
        let due = self
            .sampled_at
            .is_none_or(|at| now.saturating_duration_since(at) >= SAMPLE_INTERVAL);
        if !due {
            return;
        }
        self.sampled_at = Some(now);
        if let Some(sample) = sampler.sample() {
            self.sample = sample;
            self.peak_memory_mb = self.peak_memory_mb.max(sample.memory_mb);
            self.peak_cpu_percent = self.peak_cpu_percent.max(sample.cpu_percent);
        }
    }

    fn warn(&mut self, message: String) {
        warn!(target: GOVERNOR_TARGET, event = "threshold_warning", %message, "resource warning");
        push_bounded(&mut self.warnings, message);
    }
}

/// Tracks load and admits or throttles requests.
pub struct ResourceGovernor {
    limits: ResourceLimits,
    sampler: Box<dyn ResourceSampler>,
    concurrent: AtomicUsize,
    peak_concurrent: AtomicUsize,
    received: AtomicU64,
    admitted: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    state: Mutex<GovernorState>,
}

impl std::fmt::Debug for ResourceGovernor {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ResourceGovernor")
            .field("limits", &self.limits)
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

impl ResourceGovernor {
    /// Creates a governor sampling through `sampler`.
    #[must_use]
    pub fn new(limits: ResourceLimits, sampler: Box<dyn ResourceSampler>) -> Self {
        Self {
            limits,
            sampler,
            concurrent: AtomicUsize::new(0),
            peak_concurrent: AtomicUsize::new(0),
            received: AtomicU64::new(0),
            admitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            state: Mutex::new(GovernorState::default()),
        }
    }

    /// Configured limits.
    #[must_use]
    pub fn limits(&self) -> ResourceLimits {
        self.limits
    }

    /// Requests currently holding a permit.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.concurrent.load(Ordering::Acquire)
    }

    /// Admits one request or explains why not.
    ///
    /// # Errors
    ///
    /// Returns [`ThrottleError`] when memory, rate or concurrency is at its
    /// limit. Rejections are counted and recorded as violations.
    pub fn admit(&self) -> Result<AdmissionPermit<'_>, ThrottleError> {
        self.received.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut state = self.lock_state();
        state.refresh(self.sampler.as_ref(), now);

        let memory_mb = state.sample.memory_mb;
        if memory_mb >= self.limits.max_memory_mb {
            return Err(self.reject(
                &mut state,
                ThrottleReason::Memory {
                    current_mb: memory_mb,
                    limit_mb: self.limits.max_memory_mb,
                },
            ));
        }
        if reaches_warning(memory_mb, self.limits.max_memory_mb) {
            state.warn(format!(
                "memory at {memory_mb} MB of {} MB",
                self.limits.max_memory_mb
            ));
        }

        let cpu = state.sample.cpu_percent;
        if cpu > self.limits.max_cpu_percent as f32 {
            state.warn(format!(
                "cpu at {cpu:.1}% exceeds {}%",
                self.limits.max_cpu_percent
            ));
        }

        let rate = state.window.count(now);
        if rate >= self.limits.max_requests_per_minute {
            return Err(self.reject(
                &mut state,
                ThrottleReason::Rate {
                    current: rate,
                    limit: self.limits.max_requests_per_minute,
                },
            ));
        }
        if reaches_warning(widen(rate + 1), widen(self.limits.max_requests_per_minute)) {
            state.warn(format!(
                "request rate at {} of {} per minute",
                rate + 1,
                self.limits.max_requests_per_minute
            ));
        }

        let in_flight = match self.reserve_slot() {
            Ok(in_flight) => in_flight,
            Err(current) => {
                return Err(self.reject(
                    &mut state,
                    ThrottleReason::Concurrency {
                        current,
                        limit: self.limits.max_concurrent_requests,
                    },
                ));
            }
        };
        if reaches_warning(widen(in_flight), widen(self.limits.max_concurrent_requests)) {
            state.warn(format!(
                "{in_flight} of {} concurrent requests in flight",
                self.limits.max_concurrent_requests
            ));
        }

        state.window.record(now);
        drop(state);
        self.admitted.fetch_add(1, Ordering::Relaxed);
        self.peak_concurrent.fetch_max(in_flight, Ordering::Relaxed);
        debug!(target: GOVERNOR_TARGET, in_flight, "request admitted");
        Ok(AdmissionPermit::new(self))
    }

    /// Point-in-time view of load, totals and latency.
    #[must_use]
    pub fn snapshot(&self) -> GovernorSnapshot {
        let mut state = self.lock_state();
        let now = Instant::now();
        state.refresh(self.sampler.as_ref(), now);
        let resources = ResourceSnapshot {
            memory_mb: state.sample.memory_mb,
            cpu_percent: state.sample.cpu_percent,
            concurrent_requests: self.in_flight(),
            peak_concurrent_requests: self.peak_concurrent.load(Ordering::Relaxed),
            requests_per_minute: state.window.count(now),
            peak_memory_mb: state.peak_memory_mb,
            peak_cpu_percent: state.peak_cpu_percent,
            warnings: state.warnings.iter().cloned().collect(),
            violations: state.violations.iter().cloned().collect(),
        };
        GovernorSnapshot {
            resources,
            totals: self.totals(),
            latency: state.latencies.summary(),
            limits: self.limits,
        }
    }

    /// Cumulative counters.
    #[must_use]
    pub fn totals(&self) -> RequestTotals {
        RequestTotals {
            received: self.received.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Blocks until no request holds a permit or `timeout` elapses. Returns
    /// the number still in flight.
    pub fn drain(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            let in_flight = self.in_flight();
            if in_flight == 0 || Instant::now() >= deadline {
                return in_flight;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    pub(crate) fn release(&self, elapsed: Duration, outcome: Outcome) {
        self.concurrent.fetch_sub(1, Ordering::AcqRel);
        match outcome {
            Outcome::Completed => self.completed.fetch_add(1, Ordering::Relaxed),
            Outcome::Failed => self.failed.fetch_add(1, Ordering::Relaxed),
        };
        self.lock_state().latencies.record(elapsed);
    }

    // Returns the new in-flight count, or the count that blocked admission.
    fn reserve_slot(&self) -> Result<usize, usize> {
        let limit = self.limits.max_concurrent_requests;
        self.concurrent
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < limit).then_some(current + 1)
            })
            .map(|previous| previous + 1)
    }

    fn reject(&self, state: &mut GovernorState, reason: ThrottleReason) -> ThrottleError {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        let error = ThrottleError { reason };
        warn!(target: GOVERNOR_TARGET, event = "request_throttled", %reason, "request throttled");
        push_bounded(&mut state.violations, error.to_string());
        error
    }

    // Counters and windows stay meaningful after a panic elsewhere.
    fn lock_state(&self) -> MutexGuard<'_, GovernorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn reaches_warning(current: u64, limit: u64) -> bool {
    limit > 0 && current.saturating_mul(100) >= limit.saturating_mul(WARNING_PERCENT)
}

fn widen(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

fn push_bounded(notices: &mut VecDeque<String>, message: String) {
    if notices.len() == NOTICE_CAPACITY {
        notices.pop_front();
    }
    notices.push_back(message);
}
