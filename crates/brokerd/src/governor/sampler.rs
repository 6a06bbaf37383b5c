//! Process memory and CPU sampling.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Memory and CPU use of the broker process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ResourceSample {
    /// Resident memory in MiB.
    pub memory_mb: u64,
    /// CPU use in percent of one core.
    pub cpu_percent: f32,
}

/// Source of [`ResourceSample`]s.
#[cfg_attr(test, mockall::automock)]
pub trait ResourceSampler: Send + Sync {
    /// Takes a fresh sample; `None` when the platform cannot report one.
    fn sample(&self) -> Option<ResourceSample>;
}

/// Samples the current process through `sysinfo`.
pub struct SysinfoSampler {
    pid: Pid,
    system: Mutex<System>,
}

impl SysinfoSampler {
    /// Creates a sampler for the running process.
    #[must_use]
    pub fn for_current_process() -> Self {
        Self {
            pid: Pid::from_u32(std::process::id()),
            system: Mutex::new(System::new()),
        }
    }
}

impl std::fmt::Debug for SysinfoSampler {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SysinfoSampler")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl ResourceSampler for SysinfoSampler {
    fn sample(&self) -> Option<ResourceSample> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::new().with_cpu().with_memory(),
        );
        let process = system.process(self.pid)?;
        Some(ResourceSample {
            memory_mb: process.memory() / BYTES_PER_MB,
            cpu_percent: process.cpu_usage(),
        })
    }
}
