//! HTTP request/response bodies shared by server and client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{JobStage, ProgressEvent};

/// Final outcome of one composition job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResult {
    pub success: bool,
    pub message: String,
    pub output_file_name: String,
    pub download_path: String,
    pub processing_time_millis: u64,
    pub input_pages: usize,
    pub output_pages: usize,
}

/// Body of `POST /api/pdf/process-with-progress`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub success: bool,
    pub job_id: String,
    /// Set when the submission matched a running or recently completed job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<bool>,
    /// Cached result, present when the duplicate already completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ProcessResult>,
}

/// Body of `GET /api/pdf/status/{jobId}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub success: bool,
    pub job_id: String,
    pub stage: JobStage,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub progress: Option<ProgressEvent>,
    pub result: Option<ProcessResult>,
    pub error: Option<String>,
}

/// 409 body steering oversize uploads to the asynchronous endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyRejection {
    pub success: bool,
    pub message: String,
    pub required_endpoint: String,
}

impl LegacyRejection {
    pub fn oversize(size_bytes: i64, threshold_mb: u64) -> Self {
        Self {
            success: false,
            message: format!(
                "File of {} bytes exceeds the {} MB synchronous limit; use the progress endpoint",
                size_bytes, threshold_mb
            ),
            required_endpoint: "/api/pdf/process-with-progress".to_string(),
        }
    }
}

/// Body of `GET /api/pdf/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub service: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_response_omits_empty_options() {
        let fresh = SubmitResponse {
            success: true,
            job_id: "a1b2c3d4e5f6".into(),
            duplicate_of: None,
            result: None,
        };
        let json = serde_json::to_string(&fresh).unwrap();
        assert!(!json.contains("duplicateOf"));
        assert!(!json.contains("result"));

        let dup = SubmitResponse {
            duplicate_of: Some(true),
            ..fresh
        };
        let json = serde_json::to_string(&dup).unwrap();
        assert!(json.contains("\"duplicateOf\":true"));
    }

    #[test]
    fn rejection_names_the_progress_endpoint() {
        let body = LegacyRejection::oversize(314_572_800, 200);
        assert!(!body.success);
        assert_eq!(body.required_endpoint, "/api/pdf/process-with-progress");
    }
}
