//! Progress events streamed to subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle stage of a composition job.
///
/// Stages advance strictly forward; any non-terminal stage may fall to
/// `Failed`. `Completed` and `Failed` are write-once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStage {
    Initializing,
    PreparingDimensions,
    ProcessingPages,
    OptimizingOutput,
    Finalizing,
    Completed,
    Failed,
}

impl JobStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStage::Completed | JobStage::Failed)
    }

    /// Position in the forward progression, used to reject backwards
    /// transitions. `Failed` is reachable from anywhere non-terminal.
    pub fn rank(self) -> u8 {
        match self {
            JobStage::Initializing => 0,
            JobStage::PreparingDimensions => 1,
            JobStage::ProcessingPages => 2,
            JobStage::OptimizingOutput => 3,
            JobStage::Finalizing => 4,
            JobStage::Completed => 5,
            JobStage::Failed => 6,
        }
    }
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStage::Initializing => "Initializing",
            JobStage::PreparingDimensions => "PreparingDimensions",
            JobStage::ProcessingPages => "ProcessingPages",
            JobStage::OptimizingOutput => "OptimizingOutput",
            JobStage::Finalizing => "Finalizing",
            JobStage::Completed => "Completed",
            JobStage::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Worker-side performance counters carried on every event so operators
/// can tune the form-object cache capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerfCounters {
    #[serde(rename = "memoryMB")]
    pub memory_mb: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_ratio: f64,
    pub cached_objects: usize,
    pub sheets_generated: usize,
}

impl PerfCounters {
    /// Recompute the hit ratio from the raw counters.
    pub fn with_ratio(mut self) -> Self {
        let total = self.cache_hits + self.cache_misses;
        self.cache_hit_ratio = if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        };
        self
    }
}

/// One snapshot of a job's progress. Every event carries the full current
/// state, so subscribers that miss intermediate events lose nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub job_id: String,
    pub stage: JobStage,
    pub current_page: usize,
    pub total_pages: usize,
    pub percent_complete: f32,
    pub pages_per_second: f32,
    pub eta_seconds: f32,
    pub elapsed_seconds: f32,
    /// Human-readable description of the current operation.
    pub operation: String,
    pub perf: PerfCounters,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// Minimal event for a stage change with no page-level detail yet.
    pub fn stage_change(job_id: &str, stage: JobStage, operation: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            stage,
            current_page: 0,
            total_pages: 0,
            percent_complete: 0.0,
            pages_per_second: 0.0,
            eta_seconds: 0.0,
            elapsed_seconds: 0.0,
            operation: operation.to_string(),
            perf: PerfCounters::default(),
            timestamp: Utc::now(),
        }
    }
}
