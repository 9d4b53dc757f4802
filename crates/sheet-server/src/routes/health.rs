use actix_web::web;
use chrono::Utc;

use sheet_protocol::HealthResponse;

#[actix_web::get("/health")]
pub async fn health() -> web::Json<HealthResponse> {
    web::Json(HealthResponse {
        status: "Healthy".to_string(),
        timestamp: Utc::now(),
        service: "sheet-server".to_string(),
    })
}
