//! Error types for the agent binary.
//!
//! Library errors from the HTTP and data layers pass through unchanged so
//! the log line at exit carries the original cause.

use mapsearch_db::DbError;
use mapsearch_http::DomainApiError;

use crate::config::ConfigError;

/// Errors that end a command.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Configuration is invalid or missing.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// A database or graph operation failed.
    #[error(transparent)]
    Db(#[from] DbError),

    /// An external service call failed.
    #[error(transparent)]
    DomainApi(#[from] DomainApiError),

    /// The shared HTTP connection pool could not be built.
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// A command needs a service that is not configured.
    #[error("{command} requires {variable} to be set")]
    NotConfigured {
        /// Command that was run.
        command: &'static str,
        /// Environment variable that enables the service.
        variable: &'static str,
    },

    /// Result output could not be rendered.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}
