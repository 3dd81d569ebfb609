//! Error types shared by the PubTrack binaries
//!
//! [`AppError`] is what handlers return; it renders as
//! `{"error": {"code": "...", "message": "..."}}` with a matching HTTP
//! status. Library crates keep their own error enums and convert at the
//! edge.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

/// Machine-readable error identifier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    AuthorNotFound,
    PublicationNotFound,
    SourceNotFound,
    JobAlreadyRunning,
    DatabaseError,
    ConnectionError,
    UpstreamError,
    RateLimited,
    InternalError,
}

impl ErrorCode {
    /// Numeric form; the thousands digit groups the family
    /// (1 request, 4 lookup, 5 conflict, 7 storage, 8 upstream, 9 internal).
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::AuthorNotFound => 4002,
            ErrorCode::PublicationNotFound => 4003,
            ErrorCode::SourceNotFound => 4004,
            ErrorCode::JobAlreadyRunning => 5002,
            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,
            ErrorCode::UpstreamError => 8001,
            ErrorCode::RateLimited => 8002,
            ErrorCode::InternalError => 9001,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::AuthorNotFound
            | ErrorCode::PublicationNotFound
            | ErrorCode::SourceNotFound => StatusCode::NOT_FOUND,
            ErrorCode::JobAlreadyRunning => StatusCode::CONFLICT,
            ErrorCode::UpstreamError | ErrorCode::RateLimited => StatusCode::BAD_GATEWAY,
            ErrorCode::DatabaseError | ErrorCode::ConnectionError | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Author not found: {id}")]
    AuthorNotFound { id: String },

    #[error("Publication not found: {key}")]
    PublicationNotFound { key: String },

    #[error("Source not found: {path}")]
    SourceNotFound { path: String },

    #[error("{kind} job is already running")]
    JobAlreadyRunning { kind: String },

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    #[error("Upstream error: {message}")]
    Upstream { message: String },

    #[error("Rate limited by upstream after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::AuthorNotFound { .. } => ErrorCode::AuthorNotFound,
            AppError::PublicationNotFound { .. } => ErrorCode::PublicationNotFound,
            AppError::SourceNotFound { .. } => ErrorCode::SourceNotFound,
            AppError::JobAlreadyRunning { .. } => ErrorCode::JobAlreadyRunning,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::Upstream { .. } => ErrorCode::UpstreamError,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::Internal { .. } => ErrorCode::InternalError,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.code().status()
    }

    /// Offending request field, if the error names one
    pub fn field(&self) -> Option<&str> {
        match self {
            AppError::Validation { field, .. } => field.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl From<&AppError> for ErrorResponse {
    fn from(err: &AppError) -> Self {
        Self {
            error: ErrorDetails {
                code: err.code(),
                message: err.to_string(),
                field: err.field().map(str::to_string),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse::from(&self);

        if status.is_server_error() {
            tracing::error!(error = %body.error.message, code = ?body.error.code, "Request failed");
        } else {
            tracing::warn!(error = %body.error.message, code = ?body.error.code, "Request rejected");
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_errors_are_not_found() {
        let err = AppError::AuthorNotFound { id: "42".into() };
        assert_eq!(err.code(), ErrorCode::AuthorNotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::PublicationNotFound { key: "k".into() }.status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_job_conflict() {
        let err = AppError::JobAlreadyRunning { kind: "ingest".into() };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.code().as_code(), 5002);
        assert_eq!(err.to_string(), "ingest job is already running");
    }

    #[test]
    fn test_body_carries_code_and_field() {
        let err = AppError::Validation {
            message: "key: length".into(),
            field: Some("key".into()),
        };
        let body = serde_json::to_value(ErrorResponse::from(&err)).unwrap();
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(body["error"]["field"], "key");

        let bare = serde_json::to_value(ErrorResponse::from(&AppError::Internal {
            message: "boom".into(),
        }))
        .unwrap();
        assert!(bare["error"].get("field").is_none());
    }
}
