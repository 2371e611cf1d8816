/// JSON envelopes shared by every endpoint
///
/// Success: `{ "success": true, "data": ... }`. Failure: `{ "success": false, "error": "..." }`
/// with the matching status code.

use crate::flow::FlowError;
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::{json, Value};

pub type ApiResult = Result<Json<Value>, ApiError>;

/// Wrap `data` in a success envelope
pub fn ok<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

/// Error response carrying a status and a message
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "success": false, "error": self.message }))).into_response()
    }
}

/// Unexpected failures are logged in full and reported as 500
impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("❌ Request failed: {:?}", error);
        Self::internal(format!("{:#}", error))
    }
}

/// Structural flow problems are the caller's fault
impl From<FlowError> for ApiError {
    fn from(error: FlowError) -> Self {
        Self::bad_request(error.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_errors_map_to_bad_request() {
        let error: ApiError = FlowError::Empty("intake".to_string()).into();
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert!(error.message.contains("intake"));
    }

    #[test]
    fn unexpected_errors_map_to_internal() {
        let error: ApiError = anyhow::anyhow!("disk full").into();
        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.message, "disk full");
    }
}
