//! Point-in-time job status for polling clients and reattachment.

use actix_web::web;

use sheet_protocol::StatusResponse;

use crate::error::ApiError;
use crate::state::AppState;

#[actix_web::get("/status/{job_id}")]
pub async fn job_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<web::Json<StatusResponse>, ApiError> {
    let snapshot = state
        .broker
        .get_status(&path.into_inner())
        .ok_or(ApiError::NotFound)?;

    Ok(web::Json(StatusResponse {
        success: true,
        job_id: snapshot.job_id,
        stage: snapshot.stage,
        start_time: snapshot.started_at,
        end_time: snapshot.ended_at,
        progress: snapshot.last_progress,
        result: snapshot.result,
        error: snapshot.error,
    }))
}
