//! HTTP error mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use router::RouterError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Errors surfaced by route handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Router(#[from] RouterError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    fn is_backend(&self) -> bool {
        matches!(self, ApiError::Router(RouterError::Storage(e)) if e.is_backend())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::UnknownOperation(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Router(RouterError::UnknownOperation(_)) => StatusCode::NOT_FOUND,
            ApiError::Router(RouterError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
            ApiError::Router(RouterError::Closed) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Router(RouterError::Storage(e)) if e.is_backend() => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Router(RouterError::Storage(_)) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Backend storage failures are already logged by the repository.
        if status.is_server_error() && !self.is_backend() {
            error!("Request failed: {}", self);
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
