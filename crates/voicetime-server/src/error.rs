//! Voicetime server error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use voicetime_core::error::DomainError;

/// Startup and runtime errors for the server.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required environment variable is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Loading or preparing storage failed.
    #[error("storage error: {0}")]
    Domain(#[from] DomainError),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Network binding or I/O error.
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

/// JSON body returned for error responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub error: &'static str,
    /// Human-readable error message.
    pub message: String,
}

/// HTTP-layer wrapper around `DomainError` that implements `IntoResponse`.
#[derive(Debug)]
pub struct ApiError(pub DomainError);

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self.0 {
            DomainError::GuildNotFound(_) => (StatusCode::NOT_FOUND, "guild_not_found"),
            DomainError::UserNotFound { .. } => (StatusCode::NOT_FOUND, "user_not_found"),
            DomainError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            DomainError::MalformedStore(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "malformed_store")
            }
            DomainError::Platform(_) => (StatusCode::BAD_GATEWAY, "platform_error"),
            DomainError::Infrastructure(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "infrastructure_error")
            }
        };

        let body = ErrorBody {
            error: error_code,
            message: self.0.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicetime_core::ids::{GuildId, UserId};

    fn status_of(err: DomainError) -> StatusCode {
        let response = ApiError(err).into_response();
        response.status()
    }

    #[test]
    fn test_not_found_errors_map_to_404() {
        assert_eq!(
            status_of(DomainError::GuildNotFound(GuildId(1))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(DomainError::UserNotFound {
                guild_id: GuildId(1),
                user_id: UserId(2),
            }),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_validation_maps_to_400() {
        assert_eq!(
            status_of(DomainError::Validation("bad input".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_platform_maps_to_502() {
        assert_eq!(
            status_of(DomainError::Platform("timed out".into())),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_storage_errors_map_to_500() {
        assert_eq!(
            status_of(DomainError::Infrastructure("disk full".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(DomainError::MalformedStore("not an array".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
