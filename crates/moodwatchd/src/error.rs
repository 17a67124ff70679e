//! HTTP error mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::engine::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing, empty or undecodable frame.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// Model failure, timeout or engine shutdown.
    #[error("classifier unavailable: {0}")]
    ClassifierUnavailable(String),

    /// Upload larger than the configured frame limit.
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    /// Permission body that is not a `{label: bool}` object.
    #[error("malformed permission payload: {0}")]
    MalformedPermissionPayload(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidImage(e) => ApiError::InvalidImage(e.to_string()),
            EngineError::Spawn(e) => ApiError::Internal(e.to_string()),
            other => ApiError::ClassifierUnavailable(other.to_string()),
        }
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::InvalidImage(_) => (StatusCode::BAD_REQUEST, "INVALID_IMAGE"),
            ApiError::PayloadTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE"),
            ApiError::ClassifierUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "CLASSIFIER_UNAVAILABLE")
            }
            ApiError::MalformedPermissionPayload(_) => {
                (StatusCode::BAD_REQUEST, "MALFORMED_PERMISSION_PAYLOAD")
            }
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.parts();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(status = %status, error_code, message = %message, "request failed");
        } else {
            tracing::warn!(status = %status, error_code, message = %message, "request rejected");
        }

        let body = Json(json!({
            "error_code": error_code,
            "message": message,
        }));

        (status, body).into_response()
    }
}
