//! Progress reporting seam between the composition pipeline and its host.
//!
//! The pipeline runs inside `spawn_blocking`, so sink implementations must
//! be non-blocking; a broadcast send or an atomic store qualifies, awaiting
//! does not.

use sheet_protocol::{JobStage, PerfCounters};
use sysinfo::{get_current_pid, Pid, ProcessesToUpdate, System};

/// One progress snapshot produced by the worker. The host stamps job
/// identity and wall-clock time before fanning it out.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub stage: JobStage,
    pub current_page: usize,
    pub total_pages: usize,
    pub percent_complete: f32,
    pub pages_per_second: f32,
    pub eta_seconds: f32,
    pub elapsed_seconds: f32,
    pub operation: String,
    pub perf: PerfCounters,
}

/// Receives stage transitions and progress snapshots from a running
/// composition.
pub trait ProgressSink: Send + Sync {
    fn stage(&self, stage: JobStage, operation: &str);
    fn progress(&self, update: ProgressUpdate);
}

/// Discards everything. For tests and the synchronous endpoint.
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn stage(&self, _stage: JobStage, _operation: &str) {}
    fn progress(&self, _update: ProgressUpdate) {}
}

/// Samples this process's resident memory for the perf counters.
pub struct MemorySampler {
    system: System,
    pid: Option<Pid>,
}

impl MemorySampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: get_current_pid().ok(),
        }
    }

    /// Resident set size in megabytes, or 0 when the process cannot be
    /// inspected on this platform.
    pub fn sample_mb(&mut self) -> f64 {
        let Some(pid) = self.pid else { return 0.0 };
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        self.system
            .process(pid)
            .map(|p| p.memory() as f64 / 1_048_576.0)
            .unwrap_or(0.0)
    }
}

impl Default for MemorySampler {
    fn default() -> Self {
        Self::new()
    }
}
