//! Configuration management for PubTrack services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Ingestion pipeline configuration
    #[serde(default)]
    pub ingestion: IngestionConfig,

    /// DBLP fetcher configuration
    #[serde(default)]
    pub dblp: DblpConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL (postgres://... or sqlite://...)
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Create missing tables on startup
    #[serde(default = "default_true")]
    pub auto_create_schema: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestionConfig {
    /// Directory holding the `.bib` source files
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,

    /// Faculty roster JSON file
    #[serde(default = "default_roster_path")]
    pub roster_path: PathBuf,

    /// Commit the unit of work after this many entries
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: usize,

    /// Number of files parsed concurrently
    #[serde(default = "default_parse_concurrency")]
    pub parse_concurrency: usize,

    /// Name recorded in the data source sync table
    #[serde(default = "default_source_name")]
    pub source_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DblpConfig {
    /// Base URL of the person bibliography endpoint
    #[serde(default = "default_dblp_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_dblp_timeout")]
    pub timeout_secs: u64,

    /// Minimum spacing between requests in milliseconds
    #[serde(default = "default_request_interval")]
    pub request_interval_ms: u64,

    /// First retry delay in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound for a single retry delay in seconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Give up retrying a single person after this many seconds
    #[serde(default = "default_max_elapsed")]
    pub max_elapsed_secs: u64,

    /// Where fetched `.bib` files are written
    #[serde(default = "default_source_dir")]
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error) or a full EnvFilter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_database_url() -> String { "postgres://localhost/pubtrack".to_string() }
fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 1 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_true() -> bool { true }
fn default_source_dir() -> PathBuf { PathBuf::from("dataset/dblp") }
fn default_roster_path() -> PathBuf { PathBuf::from("references/faculty_dblp_matched.json") }
fn default_checkpoint_every() -> usize { 100 }
fn default_parse_concurrency() -> usize { 4 }
fn default_source_name() -> String { crate::DEFAULT_SOURCE_NAME.to_string() }
fn default_dblp_base_url() -> String { "https://dblp.org/pid".to_string() }
fn default_dblp_timeout() -> u64 { 30 }
fn default_request_interval() -> u64 { 1000 }
fn default_initial_backoff() -> u64 { 5000 }
fn default_max_backoff() -> u64 { 30 }
fn default_max_elapsed() -> u64 { 120 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { false }
fn default_metrics_port() -> u16 { 0 }
fn default_service_name() -> String { "pubtrack".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__INGESTION__CHECKPOINT_EVERY=50
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }
}

impl DblpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            auto_create_schema: default_true(),
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            source_dir: default_source_dir(),
            roster_path: default_roster_path(),
            checkpoint_every: default_checkpoint_every(),
            parse_concurrency: default_parse_concurrency(),
            source_name: default_source_name(),
        }
    }
}

impl Default for DblpConfig {
    fn default() -> Self {
        Self {
            base_url: default_dblp_base_url(),
            timeout_secs: default_dblp_timeout(),
            request_interval_ms: default_request_interval(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            max_elapsed_secs: default_max_elapsed(),
            output_dir: default_source_dir(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            ingestion: IngestionConfig::default(),
            dblp: DblpConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.ingestion.checkpoint_every, 100);
        assert_eq!(config.ingestion.source_name, "DBLP");
    }

    #[test]
    fn test_dblp_durations() {
        let config = DblpConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.request_interval(), Duration::from_millis(1000));
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{ "ingestion": { "checkpoint_every": 25 } }"#,
        )
        .unwrap();
        assert_eq!(config.ingestion.checkpoint_every, 25);
        assert_eq!(config.ingestion.parse_concurrency, 4);
        assert_eq!(config.database.url, "postgres://localhost/pubtrack");
    }
}
