//! PubTrack Common Library
//!
//! Shared code for the PubTrack ingestion service and gateway:
//! - Database entities, schema bootstrap and repository
//! - Error types and handling
//! - Configuration management
//! - Background job state store
//! - Metrics and tracing setup

pub mod config;
pub mod db;
pub mod errors;
pub mod jobs;
pub mod metrics;
pub mod telemetry;

// Re-export commonly used types
pub use errors::{AppError, Result};
pub use config::AppConfig;
pub use db::{DbPool, Repository};
pub use jobs::{InMemoryJobStore, JobKind, JobStatus, JobStore};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the data source row updated after each ingestion run
pub const DEFAULT_SOURCE_NAME: &str = "DBLP";
