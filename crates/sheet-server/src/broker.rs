//! Progress broker: sole owner of job records and the fan-out of
//! progress events to subscribers.
//!
//! Each job carries a broadcast channel; publishing never blocks, and a
//! subscriber that falls behind skips ahead to newer events, which is
//! safe because every event carries the job's full current state. The
//! terminal event is always the last one sent, so even a lagged
//! subscriber observes completion.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use sheet_protocol::{JobStage, ProcessResult, ProgressEvent};

/// Job ids are 12 lowercase hex chars: collision-resistant for an
/// in-memory population while keeping URLs short.
const JOB_ID_LEN: usize = 12;

/// Events buffered per subscriber before laggards skip ahead.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Terminal records are reaped this long after ending.
const TERMINAL_RETENTION: i64 = 2 * 60 * 60;

/// Non-terminal records older than this are presumed stuck and reaped.
const STUCK_RETENTION: i64 = 30 * 60;

struct JobRecord {
    job_id: String,
    stage: JobStage,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    last_progress: Option<ProgressEvent>,
    result: Option<ProcessResult>,
    error: Option<String>,
    tx: broadcast::Sender<ProgressEvent>,
}

impl JobRecord {
    fn new(job_id: &str) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            job_id: job_id.to_string(),
            stage: JobStage::Initializing,
            started_at: Utc::now(),
            ended_at: None,
            last_progress: None,
            result: None,
            error: None,
            tx,
        }
    }

    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.job_id.clone(),
            stage: self.stage,
            started_at: self.started_at,
            ended_at: self.ended_at,
            last_progress: self.last_progress.clone(),
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }
}

/// Point-in-time copy of a job record for status reads.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub job_id: String,
    pub stage: JobStage,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_progress: Option<ProgressEvent>,
    pub result: Option<ProcessResult>,
    pub error: Option<String>,
}

pub struct ProgressBroker {
    jobs: DashMap<String, JobRecord>,
}

impl ProgressBroker {
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
        }
    }

    pub fn create_job(&self) -> String {
        loop {
            let id = Uuid::new_v4().simple().to_string()[..JOB_ID_LEN].to_string();
            match self.jobs.entry(id.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(JobRecord::new(&id));
                    return id;
                }
                Entry::Occupied(_) => continue,
            }
        }
    }

    /// Record and fan out a progress event. The event's job id is stamped
    /// here, stage regressions are clamped to the record's stage, and
    /// percent/page counters are made monotone per job.
    pub fn update_progress(&self, job_id: &str, mut event: ProgressEvent) {
        let Some(mut record) = self.jobs.get_mut(job_id) else {
            log::debug!("progress for unknown job {job_id} dropped");
            return;
        };
        if record.stage.is_terminal() {
            return;
        }

        event.job_id = job_id.to_string();
        if !event.stage.is_terminal() && event.stage.rank() >= record.stage.rank() {
            record.stage = event.stage;
        } else {
            event.stage = record.stage;
        }
        if let Some(last) = &record.last_progress {
            event.percent_complete = event.percent_complete.max(last.percent_complete);
            event.current_page = event.current_page.max(last.current_page);
        }

        record.last_progress = Some(event.clone());
        // No receivers is fine; delivery failures never destabilize a job.
        let _ = record.tx.send(event);
    }

    /// Transition the stage and emit a synthesized event carrying the
    /// change. Backwards or terminal transitions are silently ignored;
    /// terminal states only arrive through `complete_job`/`fail_job`.
    pub fn update_stage(&self, job_id: &str, stage: JobStage, operation: &str) {
        let Some(mut record) = self.jobs.get_mut(job_id) else {
            return;
        };
        if record.stage.is_terminal() || stage.is_terminal() || stage.rank() < record.stage.rank()
        {
            return;
        }

        record.stage = stage;
        let mut event = ProgressEvent::stage_change(job_id, stage, operation);
        if let Some(last) = &record.last_progress {
            event.percent_complete = last.percent_complete;
            event.current_page = last.current_page;
            event.total_pages = last.total_pages;
            event.perf = last.perf;
        }
        record.last_progress = Some(event.clone());
        let _ = record.tx.send(event);
    }

    /// Terminal success; write-once, a second call is a no-op.
    pub fn complete_job(&self, job_id: &str, result: ProcessResult) {
        self.finish(job_id, JobStage::Completed, Some(result), None);
    }

    /// Terminal failure; write-once.
    pub fn fail_job(&self, job_id: &str, error: &str) {
        self.finish(job_id, JobStage::Failed, None, Some(error.to_string()));
    }

    fn finish(
        &self,
        job_id: &str,
        stage: JobStage,
        result: Option<ProcessResult>,
        error: Option<String>,
    ) {
        let Some(mut record) = self.jobs.get_mut(job_id) else {
            log::warn!("terminal report for unknown job {job_id} dropped");
            return;
        };
        if record.stage.is_terminal() {
            return;
        }

        record.stage = stage;
        record.ended_at = Some(Utc::now());
        record.result = result;
        record.error = error.clone();

        let operation = match stage {
            JobStage::Completed => "Processing completed successfully".to_string(),
            _ => error.unwrap_or_else(|| "Processing failed".to_string()),
        };
        let mut event = ProgressEvent::stage_change(job_id, stage, &operation);
        if let Some(last) = &record.last_progress {
            event.total_pages = last.total_pages;
            event.current_page = last.current_page;
            event.elapsed_seconds = last.elapsed_seconds;
            event.perf = last.perf;
            event.percent_complete = last.percent_complete;
        }
        if stage == JobStage::Completed {
            event.percent_complete = 100.0;
        }
        record.last_progress = Some(event.clone());
        let _ = record.tx.send(event);
    }

    pub fn get_status(&self, job_id: &str) -> Option<JobSnapshot> {
        self.jobs.get(job_id).map(|record| record.snapshot())
    }

    /// Attach a subscriber: a snapshot for the already-terminal case plus
    /// a receiver for everything published after this call.
    pub fn subscribe(
        &self,
        job_id: &str,
    ) -> Option<(JobSnapshot, broadcast::Receiver<ProgressEvent>)> {
        self.jobs
            .get(job_id)
            .map(|record| (record.snapshot(), record.tx.subscribe()))
    }

    /// Drop records 2h past their terminal transition, or 30min past
    /// creation without ever finishing (presumed stuck).
    pub fn reap_stale(&self) -> usize {
        let now = Utc::now();
        let before = self.jobs.len();
        self.jobs.retain(|_, record| match record.ended_at {
            Some(ended) => now - ended < Duration::seconds(TERMINAL_RETENTION),
            None => now - record.started_at < Duration::seconds(STUCK_RETENTION),
        });
        before - self.jobs.len()
    }
}

impl Default for ProgressBroker {
    fn default() -> Self {
        Self::new()
    }
}
