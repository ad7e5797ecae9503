//! Vigil API Errors
//!
//! Maps the shared error taxonomy onto HTTP responses with a JSON body of
//! the form `{"error": <kind>, "message": <text>}`.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use vigil_common::VigilError;

/// Error returned by every fallible handler.
#[derive(Debug)]
pub struct ApiError(pub VigilError);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            VigilError::NotFound { .. } => StatusCode::NOT_FOUND,
            VigilError::Conflict(_) => StatusCode::CONFLICT,
            VigilError::Validation(_) | VigilError::ResolutionMiss(_) => StatusCode::BAD_REQUEST,
            VigilError::TransientStorage(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<VigilError> for ApiError {
    fn from(err: VigilError) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(VigilError::Validation(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError(VigilError::Validation(rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError(VigilError::Validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.0.kind(), error = %self.0, "Request failed");
        } else {
            tracing::debug!(kind = self.0.kind(), error = %self.0, "Request rejected");
        }

        let body = json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Tests
// =============================================================================
