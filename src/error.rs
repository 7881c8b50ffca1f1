//! Error types for the router.
//!
//! Only configuration-level faults are errors. Per-file problems (malformed
//! names, whitelist misses, vanished sources, failed moves) are outcomes and
//! travel through the run summary instead.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;
use crate::telemetry::TelemetryError;

/// Result type alias using the router error type.
pub type Result<T> = std::result::Result<T, RouterError>;

/// Fatal errors that stop a run before or between stages.
#[derive(Error, Debug)]
pub enum RouterError {
    /// Invalid or missing configuration values
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The domain reference file could not be opened or read
    #[error("domain reference file {} is unavailable: {source}", path.display())]
    DomainUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The source directory could not be listed
    #[error("source directory {} cannot be listed: {source}", path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The destination root the tree hangs off does not exist
    #[error("destination root does not exist: {}", .0.display())]
    DestinationRootMissing(PathBuf),

    /// Logging could not be initialised
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    /// A blocking stage task panicked or was cancelled
    #[error("stage task failed: {0}")]
    Stage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<tokio::task::JoinError> for RouterError {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::Stage(value.to_string())
    }
}
