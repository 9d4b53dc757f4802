//! Submission endpoints: the asynchronous progress-tracked path and the
//! size-gated synchronous path.

use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::TryStreamExt;
use tokio::io::AsyncWriteExt;

use sheet_compose::{ComposeRequest, NoopSink};
use sheet_protocol::{Fingerprint, LegacyRejection, PageOrder, SubmitResponse};

use crate::error::ApiError;
use crate::registry::SubmissionOutcome;
use crate::state::AppState;
use crate::storage::UploadStore;
use crate::worker;

pub(crate) struct Submission {
    pub staged_path: std::path::PathBuf,
    pub original_name: String,
    pub size_bytes: i64,
    pub rotation: i32,
    pub order: PageOrder,
}

impl Submission {
    fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(
            &self.original_name,
            self.size_bytes,
            self.rotation,
            self.order,
        )
    }

    fn compose_request(&self, state: &AppState, output_name: &str) -> ComposeRequest {
        ComposeRequest {
            source_path: self.staged_path.clone(),
            rotation_degrees: self.rotation,
            order: self.order,
            output_path: state.store.output_path(output_name),
        }
    }

    fn output_name(&self) -> String {
        UploadStore::output_name(&self.staged_path, self.rotation, self.order)
    }
}

/// Stream the multipart body to the staging directory and collect the
/// form fields. Validation failures discard the staged file and never
/// create a job.
pub(crate) async fn read_submission(
    state: &AppState,
    mut payload: Multipart,
) -> Result<Submission, ApiError> {
    let mut staged: Option<(std::path::PathBuf, String, i64)> = None;
    let mut rotation: i32 = 0;
    let mut order = PageOrder::Norm;

    let received = async {
        while let Some(mut field) = payload.try_next().await? {
            let name = field.name().unwrap_or("").to_string();
            match name.as_str() {
                "pdfFile" => {
                    if let Some(mime) = field.content_type() {
                        if mime.essence_str() != "application/pdf" {
                            return Err(ApiError::Validation(format!(
                                "pdfFile must be application/pdf, got {mime}"
                            )));
                        }
                    }
                    let original = field
                        .content_disposition()
                        .and_then(|cd| cd.get_filename())
                        .map(str::to_string)
                        .filter(|n| !n.trim().is_empty())
                        .ok_or_else(|| {
                            ApiError::Validation("pdfFile field carries no filename".into())
                        })?;

                    let path = state.store.staging_path(&original);
                    let mut file = tokio::fs::File::create(&path).await?;
                    let mut written: i64 = 0;
                    // Record the path before writing so a failed write
                    // still gets cleaned up by the caller below.
                    staged = Some((path, original, 0));
                    while let Some(chunk) = field.try_next().await? {
                        written += chunk.len() as i64;
                        file.write_all(&chunk).await?;
                    }
                    file.flush().await?;
                    if let Some(entry) = staged.as_mut() {
                        entry.2 = written;
                    }
                }
                "rotationAngle" => {
                    let text = read_text_field(&mut field).await?;
                    rotation = text.trim().parse().map_err(|_| {
                        ApiError::Validation(format!("rotationAngle must be an integer: {text:?}"))
                    })?;
                }
                "order" => {
                    let text = read_text_field(&mut field).await?;
                    order = text
                        .parse()
                        .map_err(|e: sheet_protocol::ParseOrderError| {
                            ApiError::Validation(e.to_string())
                        })?;
                }
                _ => {
                    // Unknown fields are drained and ignored.
                    while field.try_next().await?.is_some() {}
                }
            }
        }
        Ok::<(), ApiError>(())
    }
    .await;

    if let Err(e) = received {
        if let Some((path, _, _)) = staged {
            discard_upload(&path).await;
        }
        return Err(e);
    }

    let (staged_path, original_name, size_bytes) =
        staged.ok_or_else(|| ApiError::Validation("missing pdfFile field".into()))?;

    let validation = if size_bytes == 0 {
        Some("uploaded file is empty")
    } else if !(0..=360).contains(&rotation) {
        Some("rotationAngle must be within 0..=360")
    } else {
        None
    };
    if let Some(message) = validation {
        discard_upload(&staged_path).await;
        return Err(ApiError::Validation(message.into()));
    }

    Ok(Submission {
        staged_path,
        original_name,
        size_bytes,
        rotation,
        order,
    })
}

async fn read_text_field(field: &mut actix_multipart::Field) -> Result<String, ApiError> {
    let mut data = Vec::new();
    while let Some(chunk) = field.try_next().await? {
        data.extend_from_slice(&chunk);
    }
    String::from_utf8(data).map_err(|_| ApiError::Validation("form field is not UTF-8".into()))
}

pub(crate) async fn discard_upload(path: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("failed to discard upload {}: {e}", path.display());
        }
    }
}

/// Asynchronous submission: registers the fingerprint, spawns at most one
/// composition task per equivalent upload, and returns the job id
/// immediately.
#[actix_web::post("/process-with-progress")]
pub async fn process_with_progress(
    state: web::Data<AppState>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let submission = read_submission(&state, payload).await?;
    let fingerprint = submission.fingerprint();

    // Two passes at most: a cached completion whose output file vanished
    // is invalidated, then the retry registers fresh.
    for _ in 0..2 {
        let outcome = state
            .registry
            .register_or_resolve(&fingerprint, || state.broker.create_job());

        match outcome {
            SubmissionOutcome::Registered { job_id } => {
                let output_name = submission.output_name();
                let request = submission.compose_request(&state, &output_name);
                worker::spawn_composition(
                    state.clone().into_inner(),
                    job_id.clone(),
                    fingerprint.clone(),
                    request,
                    output_name,
                );
                return Ok(HttpResponse::Ok().json(SubmitResponse {
                    success: true,
                    job_id,
                    duplicate_of: None,
                    result: None,
                }));
            }
            SubmissionOutcome::DuplicateActive { job_id } => {
                log::info!("duplicate submission attached to running job {job_id}");
                discard_upload(&submission.staged_path).await;
                return Ok(HttpResponse::Ok().json(SubmitResponse {
                    success: true,
                    job_id,
                    duplicate_of: Some(true),
                    result: None,
                }));
            }
            SubmissionOutcome::DuplicateCompleted { job_id, result } => {
                if state.store.output_exists(&result.output_file_name) {
                    log::info!("duplicate submission served from completed job {job_id}");
                    discard_upload(&submission.staged_path).await;
                    return Ok(HttpResponse::Ok().json(SubmitResponse {
                        success: true,
                        job_id,
                        duplicate_of: Some(true),
                        result: Some(result),
                    }));
                }
                // The cached result's file was deleted (download cleanup
                // or age sweep); the entry can no longer be served.
                state.registry.invalidate_completed(&fingerprint);
            }
        }
    }

    discard_upload(&submission.staged_path).await;
    Err(ApiError::Processing(
        "submission could not be resolved; retry".into(),
    ))
}

/// Synchronous path, gated for large uploads: rejected submissions get a
/// 409 pointing at the asynchronous endpoint.
#[actix_web::post("/process")]
pub async fn process_sync(
    state: web::Data<AppState>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let submission = read_submission(&state, payload).await?;

    if state.registry.should_block_legacy(submission.size_bytes) {
        discard_upload(&submission.staged_path).await;
        return Ok(HttpResponse::Conflict().json(LegacyRejection::oversize(
            submission.size_bytes,
            state.config.large_file_threshold_mb,
        )));
    }

    let output_name = submission.output_name();
    let request = submission.compose_request(&state, &output_name);
    let outcome = sheet_compose::compose(request, Arc::new(NoopSink))
        .await
        .map_err(|e| ApiError::Processing(e.to_string()))?;

    Ok(HttpResponse::Ok().json(worker::build_result(&output_name, &outcome)))
}
