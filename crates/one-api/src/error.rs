//! Error responses and the lifecycle error → HTTP status mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use one_lifecycle::LifecycleError;
use tracing::{debug, error};

use crate::handlers::ApiResponse;

/// HTTP status for a lifecycle error.
pub fn status_for(e: &LifecycleError) -> StatusCode {
    match e {
        LifecycleError::InvalidRequest(_) | LifecycleError::NotFound(_) => StatusCode::BAD_REQUEST,
        LifecycleError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        LifecycleError::Conflict(_) => StatusCode::CONFLICT,
        LifecycleError::AdmissionDenied(_) | LifecycleError::Configuration(_) => {
            StatusCode::PRECONDITION_FAILED
        }
        LifecycleError::Upstream { .. } => StatusCode::BAD_GATEWAY,
        LifecycleError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// An error rendered in the standard envelope.
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
}

impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        let status = status_for(&e);
        if status.is_server_error() {
            error!(error = %e, %status, "request failed");
        } else {
            debug!(error = %e, %status, "request rejected");
        }
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiResponse::<()>::err(self.message))).into_response()
    }
}
