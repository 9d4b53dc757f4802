//! Submission client with reattachment.
//!
//! A submit call first consults the job store: a fresh entry pointing at
//! a live job is reattached to instead of re-uploading. Progress is
//! consumed over the server-sent stream, and any stream failure switches
//! to status polling; an upload error is never answered with a second
//! upload. Concurrent submits of the same fingerprint coalesce onto one
//! network operation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};

use sheet_protocol::{
    Fingerprint, JobStage, PageOrder, ProcessResult, ProgressEvent, StatusResponse, SubmitResponse,
};

use crate::store::{store_key, JobStore, StoredJob, StoredStatus};

/// Fallback polling cadence once the event stream is gone.
const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Store entries older than this are stale and purged on access.
const ENTRY_TTL_SECS: i64 = 60 * 60;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("submission rejected: {0}")]
    Rejected(String),
    #[error("processing failed: {0}")]
    JobFailed(String),
    #[error("{0}")]
    Protocol(String),
}

/// One upload the user wants composed.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub rotation: i32,
    pub order: PageOrder,
}

impl UploadRequest {
    pub async fn from_file(
        path: impl AsRef<std::path::Path>,
        rotation: i32,
        order: PageOrder,
    ) -> std::io::Result<Self> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.pdf")
            .to_string();
        let bytes = tokio::fs::read(path).await?;
        Ok(Self {
            file_name,
            bytes,
            rotation,
            order,
        })
    }

    /// Fingerprint computed locally from metadata, before any network IO.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(
            &self.file_name,
            self.bytes.len() as i64,
            self.rotation,
            self.order,
        )
    }
}

/// Result shared with coalesced waiters; errors degrade to their message
/// so the payload stays cloneable.
type SharedOutcome = Result<ProcessResult, String>;

pub struct SheetClient {
    http: reqwest::Client,
    base_url: String,
    store: Arc<dyn JobStore>,
    inflight: Mutex<HashMap<String, broadcast::Sender<SharedOutcome>>>,
}

impl SheetClient {
    pub fn new(base_url: impl Into<String>, store: Arc<dyn JobStore>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            store,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Submit an upload, reusing a persisted or in-flight job when one
    /// exists, and resolve to the final result.
    pub async fn submit(&self, upload: UploadRequest) -> Result<ProcessResult, ClientError> {
        let fingerprint = upload.fingerprint();
        let digest = fingerprint.digest();

        // Coalesce: the first caller per fingerprint does the work, the
        // rest await its broadcast.
        let waiter = {
            let mut inflight = self.inflight.lock().await;
            match inflight.get(&digest) {
                Some(tx) => Some(tx.subscribe()),
                None => {
                    let (tx, _) = broadcast::channel(1);
                    inflight.insert(digest.clone(), tx);
                    None
                }
            }
        };
        if let Some(mut rx) = waiter {
            return match rx.recv().await {
                Ok(Ok(result)) => Ok(result),
                Ok(Err(message)) => Err(ClientError::JobFailed(message)),
                Err(_) => Err(ClientError::Protocol(
                    "coalesced submission was dropped".into(),
                )),
            };
        }

        let outcome = self.submit_inner(&fingerprint, upload).await;

        let mut inflight = self.inflight.lock().await;
        if let Some(tx) = inflight.remove(&digest) {
            let shared = match &outcome {
                Ok(result) => Ok(result.clone()),
                Err(e) => Err(e.to_string()),
            };
            let _ = tx.send(shared);
        }
        outcome
    }

    async fn submit_inner(
        &self,
        fingerprint: &Fingerprint,
        upload: UploadRequest,
    ) -> Result<ProcessResult, ClientError> {
        let key = store_key(fingerprint);

        if let Some(entry) = self.fresh_entry(&key) {
            match self.fetch_status(&entry.job_id).await? {
                Some(status) => match status.stage {
                    JobStage::Completed => {
                        if let Some(result) = status.result {
                            self.mark_completed(&key, &entry.job_id);
                            return Ok(result);
                        }
                        self.store.remove(&key);
                    }
                    JobStage::Failed => {
                        self.store.remove(&key);
                    }
                    _ => {
                        log::info!("reattached to in-flight job {}", entry.job_id);
                        let result = self.await_completion(&entry.job_id).await?;
                        self.mark_completed(&key, &entry.job_id);
                        return Ok(result);
                    }
                },
                // Unknown job id: the server restarted. Invalidate local
                // state and fall through to a fresh upload.
                None => self.store.remove(&key),
            }
        }

        let submit = self.post_submission(&upload).await?;
        if let Some(result) = submit.result {
            self.mark_completed(&key, &submit.job_id);
            return Ok(result);
        }
        self.store.put(
            &key,
            StoredJob {
                job_id: submit.job_id.clone(),
                status: StoredStatus::Processing,
                updated_at: Utc::now(),
            },
        );

        let result = self.await_completion(&submit.job_id).await?;
        self.mark_completed(&key, &submit.job_id);
        Ok(result)
    }

    fn fresh_entry(&self, key: &str) -> Option<StoredJob> {
        let entry = self.store.get(key)?;
        if (Utc::now() - entry.updated_at).num_seconds() > ENTRY_TTL_SECS {
            self.store.remove(key);
            return None;
        }
        Some(entry)
    }

    fn mark_completed(&self, key: &str, job_id: &str) {
        self.store.put(
            key,
            StoredJob {
                job_id: job_id.to_string(),
                status: StoredStatus::Completed,
                updated_at: Utc::now(),
            },
        );
    }

    async fn post_submission(&self, upload: &UploadRequest) -> Result<SubmitResponse, ClientError> {
        let part = reqwest::multipart::Part::bytes(upload.bytes.clone())
            .file_name(upload.file_name.clone())
            .mime_str("application/pdf")?;
        let form = reqwest::multipart::Form::new()
            .part("pdfFile", part)
            .text("rotationAngle", upload.rotation.to_string())
            .text("order", upload.order.token());

        let resp = self
            .http
            .post(format!("{}/api/pdf/process-with-progress", self.base_url))
            .multipart(form)
            .send()
            .await?;
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ClientError::Rejected(message));
        }
        Ok(resp.json().await?)
    }

    async fn fetch_status(&self, job_id: &str) -> Result<Option<StatusResponse>, ClientError> {
        let resp = self
            .http
            .get(format!("{}/api/pdf/status/{job_id}", self.base_url))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp.error_for_status()?;
        Ok(Some(resp.json().await?))
    }

    /// Follow the job to its terminal state: stream first, polling as the
    /// fallback. Stream trouble of any kind downgrades to polling; it is
    /// never an error and never triggers a re-upload.
    async fn await_completion(&self, job_id: &str) -> Result<ProcessResult, ClientError> {
        match self.stream_until_terminal(job_id).await {
            Ok(true) => self.read_terminal(job_id).await,
            Ok(false) | Err(_) => {
                log::debug!("progress stream unavailable for {job_id}; polling");
                self.poll_until_terminal(job_id).await
            }
        }
    }

    /// Consume the SSE stream; `Ok(true)` when a terminal event arrived,
    /// `Ok(false)` when the stream ended, failed, or produced an
    /// unparseable event.
    async fn stream_until_terminal(&self, job_id: &str) -> Result<bool, ClientError> {
        let resp = self
            .http
            .get(format!("{}/api/pdf/progress/{job_id}", self.base_url))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Ok(false);
        }

        let mut stream = resp.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        while let Some(chunk) = stream.next().await {
            let Ok(chunk) = chunk else { return Ok(false) };
            buffer.extend_from_slice(&chunk);

            while let Some(frame_len) = frame_boundary(&buffer) {
                let frame: Vec<u8> = buffer.drain(..frame_len).collect();
                match parse_sse_frame(&frame) {
                    SseFrame::Event(event) => {
                        log::debug!(
                            "job {job_id}: {} {:.1}%",
                            event.stage,
                            event.percent_complete
                        );
                        if event.stage.is_terminal() {
                            return Ok(true);
                        }
                    }
                    SseFrame::Empty => {}
                    SseFrame::Unparseable => return Ok(false),
                }
            }
        }
        Ok(false)
    }

    async fn read_terminal(&self, job_id: &str) -> Result<ProcessResult, ClientError> {
        match self.fetch_status(job_id).await? {
            Some(status) => terminal_result(status),
            None => Err(ClientError::Protocol(
                "job disappeared before its result was read".into(),
            )),
        }
    }

    async fn poll_until_terminal(&self, job_id: &str) -> Result<ProcessResult, ClientError> {
        loop {
            match self.fetch_status(job_id).await? {
                None => {
                    return Err(ClientError::Protocol(
                        "job no longer known to the server".into(),
                    ))
                }
                Some(status) if status.stage.is_terminal() => return terminal_result(status),
                Some(_) => tokio::time::sleep(POLL_INTERVAL).await,
            }
        }
    }
}

fn terminal_result(status: StatusResponse) -> Result<ProcessResult, ClientError> {
    match status.stage {
        JobStage::Completed => status
            .result
            .ok_or_else(|| ClientError::Protocol("completed job carries no result".into())),
        JobStage::Failed => Err(ClientError::JobFailed(
            status
                .error
                .unwrap_or_else(|| "processing failed".to_string()),
        )),
        other => Err(ClientError::Protocol(format!(
            "expected a terminal stage, got {other}"
        ))),
    }
}

enum SseFrame {
    Event(ProgressEvent),
    /// Comment or keep-alive frame; skip it.
    Empty,
    Unparseable,
}

/// Length of the first complete `\n\n`-terminated frame, if any.
fn frame_boundary(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n").map(|p| p + 2)
}

fn parse_sse_frame(frame: &[u8]) -> SseFrame {
    let Ok(text) = std::str::from_utf8(frame) else {
        return SseFrame::Unparseable;
    };
    for line in text.lines() {
        if let Some(data) = line.strip_prefix("data: ") {
            return match serde_json::from_str(data) {
                Ok(event) => SseFrame::Event(event),
                Err(_) => SseFrame::Unparseable,
            };
        }
    }
    SseFrame::Empty
}
