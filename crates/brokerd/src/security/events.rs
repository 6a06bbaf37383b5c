//! Security event accounting.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::warn;

use super::SECURITY_TARGET;

/// Recent events retained for the admin surface.
pub const RECENT_EVENT_CAPACITY: usize = 100;

/// Category of a gate rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    /// `module` or `function` absent or not a string.
    MissingField,
    /// Name outside `[A-Za-z0-9_]+`.
    InvalidName,
    /// Module/function pair not registered.
    NotWhitelisted,
    /// Function name on the denylist.
    DeniedFunction,
    /// Parameters exceed a structural bound.
    StructureLimit,
    /// Script injection signature.
    Script,
    /// SQL injection signature.
    SqlInjection,
    /// Path traversal signature.
    PathTraversal,
}

impl SecurityEventKind {
    /// Snake-case label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingField => "missing_field",
            Self::InvalidName => "invalid_name",
            Self::NotWhitelisted => "not_whitelisted",
            Self::DeniedFunction => "denied_function",
            Self::StructureLimit => "structure_limit",
            Self::Script => "script",
            Self::SqlInjection => "sql_injection",
            Self::PathTraversal => "path_traversal",
        }
    }
}

impl fmt::Display for SecurityEventKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// One recorded rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityEvent {
    /// Rejection category.
    pub kind: SecurityEventKind,
    /// Human-readable detail; never contains the offending value.
    pub detail: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

/// Serialisable view of the monitor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SecuritySnapshot {
    /// Total gate rejections.
    pub validation_failures: u64,
    /// Rejections per category.
    pub by_kind: BTreeMap<SecurityEventKind, u64>,
    /// Most recent events, oldest first.
    pub recent: Vec<SecurityEvent>,
}

#[derive(Debug, Default)]
struct EventLog {
    by_kind: BTreeMap<SecurityEventKind, u64>,
    recent: VecDeque<SecurityEvent>,
}

/// Counters and a bounded history of gate rejections.
#[derive(Debug, Default)]
pub struct SecurityMonitor {
    validation_failures: AtomicU64,
    log: Mutex<EventLog>,
}

impl SecurityMonitor {
    /// Creates an empty monitor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one rejection.
    pub fn record(&self, kind: SecurityEventKind, detail: impl Into<String>) {
        let event = SecurityEvent {
            kind,
            detail: detail.into(),
            timestamp_ms: now_ms(),
        };
        warn!(
            target: SECURITY_TARGET,
            event = "request_rejected",
            kind = kind.as_str(),
            detail = %event.detail,
            "security gate rejected request"
        );
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        *log.by_kind.entry(kind).or_insert(0) += 1;
        if log.recent.len() == RECENT_EVENT_CAPACITY {
            log.recent.pop_front();
        }
        log.recent.push_back(event);
    }

    /// Total rejections since startup.
    #[must_use]
    pub fn validation_failures(&self) -> u64 {
        self.validation_failures.load(Ordering::Relaxed)
    }

    /// Rejections recorded for `kind`.
    #[must_use]
    pub fn count(&self, kind: SecurityEventKind) -> u64 {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_kind
            .get(&kind)
            .copied()
            .unwrap_or(0)
    }

    /// Point-in-time copy of the counters and history.
    #[must_use]
    pub fn snapshot(&self) -> SecuritySnapshot {
        let log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        SecuritySnapshot {
            validation_failures: self.validation_failures(),
            by_kind: log.by_kind.clone(),
            recent: log.recent.iter().cloned().collect(),
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_bounded() {
        let monitor = SecurityMonitor::new();
        for index in 0..(RECENT_EVENT_CAPACITY + 5) {
            monitor.record(SecurityEventKind::Script, format!("event {index}"));
        }
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.recent.len(), RECENT_EVENT_CAPACITY);
        assert_eq!(snapshot.recent[0].detail, "event 5");
        assert_eq!(
            snapshot.validation_failures,
            u64::try_from(RECENT_EVENT_CAPACITY + 5).expect("fits")
        );
    }

    #[test]
    fn counts_are_kept_per_kind() {
        let monitor = SecurityMonitor::new();
        monitor.record(SecurityEventKind::PathTraversal, "params.path");
        monitor.record(SecurityEventKind::PathTraversal, "params.dir");
        monitor.record(SecurityEventKind::DeniedFunction, "eval");
        assert_eq!(monitor.count(SecurityEventKind::PathTraversal), 2);
        assert_eq!(monitor.count(SecurityEventKind::Script), 0);
        assert_eq!(monitor.validation_failures(), 3);
    }
}
