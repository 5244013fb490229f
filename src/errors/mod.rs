/// Unified error handling module
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Unified error response format
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("External API error: {0}")]
    ExternalApi(#[from] reqwest::Error),
    /// Upstream answered with a non-2xx status.
    #[error("Upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ApiError {
    /// Failures that come from the remote API rather than from us.
    pub fn is_upstream(&self) -> bool {
        matches!(self, ApiError::Upstream { .. } | ApiError::ExternalApi(_))
    }

    fn upstream_code(status: u16) -> &'static str {
        match status {
            403 => "UPSTREAM_403",
            404 => "UPSTREAM_404",
            429 => "UPSTREAM_429",
            500..=599 => "UPSTREAM_5XX",
            _ => "UPSTREAM_ERROR",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Database(_) | ApiError::Serialization(_) => "DATABASE_ERROR",
            ApiError::ExternalApi(e) => e
                .status()
                .map(|s| Self::upstream_code(s.as_u16()))
                .unwrap_or("UPSTREAM_ERROR"),
            ApiError::Upstream { status, .. } => Self::upstream_code(*status),
            ApiError::Config(_) => "CONFIG_ERROR",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::InvalidInput(_) => "INVALID_INPUT",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_response = ErrorResponse {
            ok: false,
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
            },
        };

        // Always return HTTP 200 with ok=false, the dashboard reads the envelope
        (StatusCode::OK, Json(error_response)).into_response()
    }
}

/// Type alias for API results
pub type ApiResult<T> = Result<T, ApiError>;
