use axum::{http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

use crate::security::moderation::RejectCategory;

pub type AppResult<T> = Result<T, AppError>;

/// Application error type.
///
/// Covers every failure a request can surface. The wire mapping is fixed:
/// rate limits never reveal which window triggered, content rejections carry
/// only a stable category token, and store failures fail closed with 503.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("rate limited, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("content rejected: {category}")]
    ContentRejected { category: RejectCategory },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no contact information available")]
    NoContact,

    #[error("store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::ContentRejected { .. } => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) | AppError::NoContact => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Json(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable error token for programmatic handling
    pub fn error_token(&self) -> &'static str {
        match self {
            AppError::RateLimited { .. } => "rate_limited",
            AppError::ContentRejected { .. } => "content_rejected",
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::NoContact => "no_contact",
            AppError::Store(_) => "service_unavailable",
            AppError::Json(_) | AppError::Internal(_) => "internal_error",
        }
    }

    /// Log this error with appropriate level and context
    pub fn log(&self) {
        let status = self.status_code();
        let token = self.error_token();

        if status.is_server_error() {
            tracing::error!(
                error = %self,
                error_token = %token,
                status = %status.as_u16(),
                "Server error occurred"
            );
        } else {
            tracing::debug!(
                error = %self,
                error_token = %token,
                "Client error occurred"
            );
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        self.log();

        let status = self.status_code();

        let body = match &self {
            AppError::RateLimited {
                retry_after_seconds,
            } => json!({
                "error": "rate_limited",
                "message": format!(
                    "Too many requests. Please wait {} seconds before trying again",
                    retry_after_seconds
                ),
                "retry_after_seconds": retry_after_seconds,
            }),
            AppError::ContentRejected { category } => json!({
                "error": "content_rejected",
                "reason": category.as_str(),
                "message": "Message violates the content policy",
            }),
            AppError::BadRequest(msg) => json!({
                "error": "bad_request",
                "message": msg,
            }),
            AppError::NotFound(what) => json!({
                "error": "not_found",
                "message": format!("{} not found", what),
            }),
            AppError::NoContact => json!({
                "error": "no_contact",
                "message": "No contact information available",
            }),
            // Server-side failures never expose internal details
            AppError::Store(_) => json!({
                "error": "service_unavailable",
                "message": "Service temporarily unavailable",
            }),
            AppError::Json(_) | AppError::Internal(_) => json!({
                "error": "internal_error",
                "message": "Internal server error",
            }),
        };

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            AppError::RateLimited {
                retry_after_seconds: 30
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::ContentRejected {
                category: RejectCategory::ScamUrl
            }
            .status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(AppError::NoContact.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::NotFound("message".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn rate_limit_token_never_names_the_window() {
        let err = AppError::RateLimited {
            retry_after_seconds: 42,
        };
        assert_eq!(err.error_token(), "rate_limited");
    }
}
