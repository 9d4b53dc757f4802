//! Output file download with Range support.

use actix_files::NamedFile;
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::web;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadQuery {
    #[serde(default)]
    pub delete_after_download: bool,
}

#[actix_web::get("/download/{filename}")]
pub async fn download(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<DownloadQuery>,
) -> Result<NamedFile, ApiError> {
    let requested = path.into_inner();
    let resolved = state
        .store
        .resolve_download(&requested)
        .await
        .ok_or(ApiError::NotFound)?;

    let file = NamedFile::open_async(&resolved)
        .await
        .map_err(|_| ApiError::NotFound)?;

    let download_name = resolved
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("output.pdf")
        .to_string();
    let file = file.set_content_disposition(ContentDisposition {
        disposition: DispositionType::Attachment,
        parameters: vec![DispositionParam::Filename(download_name)],
    });

    if query.delete_after_download {
        // Unlink immediately; the already-open handle keeps serving this
        // response, and cached results pointing here get invalidated on
        // their next registry lookup.
        if let Err(e) = tokio::fs::remove_file(&resolved).await {
            log::warn!("delete-after-download failed for {}: {e}", resolved.display());
        }
    }

    Ok(file)
}
