//! Ingestion service error types

use pubtrack_common::errors::AppError;
use sea_orm::DbErr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Source directory unreadable: {path}: {message}")]
    SourceUnreadable { path: String, message: String },

    #[error("No .bib files found in {0}")]
    NoSourceFiles(String),

    #[error("Faculty roster not found: {0}")]
    RosterNotFound(String),

    #[error("Faculty roster invalid: {0}")]
    RosterInvalid(String),

    #[error("Malformed entry {key}: {message}")]
    MalformedEntry { key: String, message: String },

    #[error("Parse task failed: {0}")]
    ParseTask(String),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("{0}")]
    App(#[from] AppError),

    #[error("Cannot read {path}: {source}")]
    FileUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl IngestionError {
    /// Errors raised before any write that abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IngestionError::SourceUnreadable { .. }
                | IngestionError::NoSourceFiles(_)
                | IngestionError::RosterNotFound(_)
                | IngestionError::RosterInvalid(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Rate limited by {url} after {attempts} attempts")]
    RateLimited { url: String, attempts: u32 },

    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid fetcher configuration: {0}")]
    Config(String),

    #[error("Faculty roster unusable: {0}")]
    Roster(String),

    #[error("{0}")]
    App(#[from] AppError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl FetchError {
    /// Worth retrying after a backoff delay
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::RateLimited { .. } => true,
            FetchError::Status { status, .. } => *status >= 500,
            FetchError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            FetchError::Config(_)
            | FetchError::Roster(_)
            | FetchError::App(_)
            | FetchError::IoError(_) => false,
        }
    }
}

impl From<FetchError> for AppError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::RateLimited { attempts, .. } => AppError::RateLimited { attempts },
            FetchError::App(inner) => inner,
            FetchError::Config(message) => AppError::Internal { message },
            other => AppError::Upstream {
                message: other.to_string(),
            },
        }
    }
}

impl From<IngestionError> for AppError {
    fn from(e: IngestionError) -> Self {
        match e {
            IngestionError::App(inner) => inner,
            IngestionError::Database(inner) => AppError::Database(inner),
            IngestionError::SourceUnreadable { path, .. } | IngestionError::NoSourceFiles(path) => {
                AppError::SourceNotFound { path }
            }
            IngestionError::RosterNotFound(path) => AppError::SourceNotFound { path },
            other => AppError::Internal {
                message: other.to_string(),
            },
        }
    }
}
