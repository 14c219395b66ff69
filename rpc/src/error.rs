//! HTTP error mapping.
//!
//! Every failure is returned as `{"code": ..., "message": ...}` with a
//! status chosen from the error's category, so clients can branch on the
//! stable code and present policy rejections distinctly.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use baton_relay::{ErrorCategory, RelayError};
use baton_types::TypesError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("metrics endpoint is disabled")]
    MetricsDisabled,

    #[error("server error: {0}")]
    Server(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<TypesError> for RpcError {
    fn from(e: TypesError) -> Self {
        RpcError::InvalidRequest(e.to_string())
    }
}

/// Body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl RpcError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Relay(e) => e.code(),
            Self::Unauthenticated(_) => "UNAUTHENTICATED",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::MetricsDisabled => "NOT_FOUND",
            Self::Server(_) | Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Relay(e) => relay_status(e),
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::MetricsDisabled => StatusCode::NOT_FOUND,
            Self::Server(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn relay_status(e: &RelayError) -> StatusCode {
    match e {
        RelayError::VersionConflict => StatusCode::CONFLICT,
        RelayError::SessionEnded => StatusCode::CONFLICT,
        RelayError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        _ => match e.category() {
            ErrorCategory::NotFound => StatusCode::NOT_FOUND,
            ErrorCategory::ExpiredOrUsed => StatusCode::GONE,
            ErrorCategory::ProtocolViolation => StatusCode::BAD_REQUEST,
            ErrorCategory::Policy | ErrorCategory::Authorization => StatusCode::FORBIDDEN,
            ErrorCategory::Capacity => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        }
        let body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
