//! Bounded latency history with percentile summaries.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;

/// Durations retained for percentile calculation.
pub const LATENCY_WINDOW_SIZE: usize = 1000;

/// Percentiles over the most recent requests, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    /// Samples in the window.
    pub count: usize,
    /// Mean duration.
    pub avg_ms: f64,
    /// Median duration.
    pub p50_ms: f64,
    /// 95th percentile.
    pub p95_ms: f64,
    /// 99th percentile.
    pub p99_ms: f64,
}

#[derive(Debug, Default)]
pub(crate) struct LatencyWindow {
    samples: VecDeque<Duration>,
}

impl LatencyWindow {
    pub(crate) fn record(&mut self, duration: Duration) {
        if self.samples.len() == LATENCY_WINDOW_SIZE {
            self.samples.pop_front();
        }
        self.samples.push_back(duration);
    }

    pub(crate) fn summary(&self) -> LatencySummary {
        if self.samples.is_empty() {
            return LatencySummary::default();
        }
        let mut sorted: Vec<Duration> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        let len = sorted.len();
        let at = |percentile: usize| {
            let index = (len * percentile / 100).min(len - 1);
            millis(sorted[index])
        };
        let total: Duration = sorted.iter().sum();
        LatencySummary {
            count: len,
            avg_ms: millis(total) / len as f64,
            p50_ms: at(50),
            p95_ms: at(95),
            p99_ms: at(99),
        }
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
