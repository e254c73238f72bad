use crate::core::{DecodeError, EngineError};
use crate::models::ErrorResponse;
use actix_web::{error, http::StatusCode, web, HttpRequest, HttpResponse};
use thiserror::Error;

/// Failures surfaced at the endpoint boundary
///
/// Every variant is reported as `500 {"error": message}`; a batch either
/// succeeds entirely or yields this body.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Multipart error: {0}")]
    Multipart(String),

    #[error("Field {0} exceeds the payload limit")]
    PayloadTooLarge(String),

    #[error("Worker failed: {0}")]
    Blocking(String),
}

impl error::ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}

/// Handle JSON payload errors
pub fn handle_json_payload_error(err: error::JsonPayloadError, req: &HttpRequest) -> actix_web::Error {
    tracing::info!("JSON payload error on {}: {}", req.path(), err);
    ApiError::InvalidRequest(format!("Invalid JSON: {}", err)).into()
}

/// JSON extractor configuration shared by the server and tests
pub fn json_config(limit: usize) -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(limit)
        .error_handler(handle_json_payload_error)
}
