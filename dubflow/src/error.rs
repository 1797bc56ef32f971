//! Application-wide error types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Upload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("{provider} failed: {message}")]
    Provider { provider: String, message: String },

    #[error("Timed out after {waited:?} waiting for {operation}")]
    Timeout { operation: String, waited: Duration },

    #[error("Corrupt {field} stored on {entity} {id}: {source}")]
    CorruptData {
        entity: String,
        id: String,
        field: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Stage {stage} failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error while {op} {}: {source}", .path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, waited: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            waited,
        }
    }

    /// Wrap an error with the name of the pipeline stage it escaped from.
    pub fn in_stage(self, stage: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            source: Box::new(self),
        }
    }

    /// Whether the queue should schedule another attempt for a job that failed with this error.
    ///
    /// Boundary errors (validation, not-found, bad state) are caller mistakes and repeat
    /// identically; everything that touches a provider, the network or disk may succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Stage { source, .. } => source.is_retryable(),
            Self::Validation(_)
            | Self::PayloadTooLarge { .. }
            | Self::NotFound { .. }
            | Self::InvalidStateTransition { .. }
            | Self::Configuration(_) => false,
            _ => true,
        }
    }

    /// The stage name if this error was raised inside the pipeline.
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::Stage { stage, .. } => Some(stage),
            _ => None,
        }
    }
}
