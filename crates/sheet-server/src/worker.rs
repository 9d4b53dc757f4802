//! Background composition task: bridges the compose pipeline's progress
//! sink onto the broker and reports terminal state to broker and registry.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

use sheet_compose::{compose, ComposeOutcome, ComposeRequest, ProgressSink, ProgressUpdate};
use sheet_protocol::{Fingerprint, JobStage, ProcessResult, ProgressEvent};

use crate::state::AppState;

/// Characters escaped in the download path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'/')
    .add(b'\\');

pub fn download_path_for(output_file_name: &str) -> String {
    format!(
        "/api/pdf/download/{}",
        utf8_percent_encode(output_file_name, PATH_SEGMENT)
    )
}

pub fn build_result(output_file_name: &str, outcome: &ComposeOutcome) -> ProcessResult {
    ProcessResult {
        success: true,
        message: "Processing completed successfully".to_string(),
        output_file_name: output_file_name.to_string(),
        download_path: download_path_for(output_file_name),
        processing_time_millis: outcome.elapsed.as_millis() as u64,
        input_pages: outcome.input_pages,
        output_pages: outcome.output_pages,
    }
}

/// Adapts the pipeline's sink calls into broker updates.
struct BrokerSink {
    state: Arc<AppState>,
    job_id: String,
}

impl ProgressSink for BrokerSink {
    fn stage(&self, stage: JobStage, operation: &str) {
        self.state.broker.update_stage(&self.job_id, stage, operation);
    }

    fn progress(&self, update: ProgressUpdate) {
        let event = ProgressEvent {
            job_id: self.job_id.clone(),
            stage: update.stage,
            current_page: update.current_page,
            total_pages: update.total_pages,
            percent_complete: update.percent_complete,
            pages_per_second: update.pages_per_second,
            eta_seconds: update.eta_seconds,
            elapsed_seconds: update.elapsed_seconds,
            operation: update.operation,
            perf: update.perf,
            timestamp: Utc::now(),
        };
        self.state.broker.update_progress(&self.job_id, event);
    }
}

/// Spawn the composition task for a freshly registered submission.
///
/// On success the broker learns of completion before the registry, so a
/// subscriber observing `Completed` may briefly race a duplicate
/// submission into `DuplicateActive`; the duplicate still lands on the
/// same finished job. Errors surface only through `fail_job`, never on
/// the submission response, which has already returned the job id.
pub fn spawn_composition(
    state: Arc<AppState>,
    job_id: String,
    fingerprint: Fingerprint,
    request: ComposeRequest,
    output_file_name: String,
) {
    state.compositions_started.fetch_add(1, Ordering::SeqCst);

    tokio::spawn(async move {
        let sink: Arc<dyn ProgressSink> = Arc::new(BrokerSink {
            state: Arc::clone(&state),
            job_id: job_id.clone(),
        });

        match compose(request, sink).await {
            Ok(outcome) => {
                let result = build_result(&output_file_name, &outcome);
                state.broker.complete_job(&job_id, result.clone());
                state.registry.mark_completed(&fingerprint, &job_id, &result);
                log::info!(
                    "job {job_id} completed: {} pages onto {} sheets in {}ms",
                    result.input_pages,
                    result.output_pages,
                    result.processing_time_millis
                );
            }
            Err(e) => {
                log::error!("job {job_id} failed: {e}");
                state.broker.fail_job(&job_id, &e.to_string());
                state.registry.mark_failed(&fingerprint, &job_id);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_path_escapes_reserved_characters() {
        assert_eq!(
            download_path_for("a b#c.pdf"),
            "/api/pdf/download/a%20b%23c.pdf"
        );
        assert_eq!(
            download_path_for("plain_A180_REV.pdf"),
            "/api/pdf/download/plain_A180_REV.pdf"
        );
    }

    #[test]
    fn build_result_carries_outcome_numbers() {
        let outcome = ComposeOutcome {
            input_pages: 12,
            output_pages: 4,
            elapsed: std::time::Duration::from_millis(1500),
        };
        let result = build_result("x_A0_NORM.pdf", &outcome);
        assert!(result.success);
        assert_eq!(result.input_pages, 12);
        assert_eq!(result.output_pages, 4);
        assert_eq!(result.processing_time_millis, 1500);
        assert_eq!(result.download_path, "/api/pdf/download/x_A0_NORM.pdf");
    }
}
