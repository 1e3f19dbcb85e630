//! Error types for the ingestion engine

use std::time::Duration;
use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The warehouse refused the data itself, as opposed to failing to reach it
    #[error("Warehouse rejected documents: {0}")]
    Rejected(String),

    #[error("Object storage error: {0}")]
    Storage(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("{operation} timed out after {}s", .limit.as_secs())]
    Timeout {
        operation: String,
        limit: Duration,
    },

    #[error("External process '{program}' failed: {message}")]
    Process { program: String, message: String },

    #[error("Invalid entity id: {0}")]
    InvalidEntityId(String),

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Generator output invalid: {0}")]
    GeneratorOutput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Common(#[from] synthflow_common::SynthflowError),
}

impl IngestError {
    pub fn storage(message: impl std::fmt::Display) -> Self {
        IngestError::Storage(message.to_string())
    }

    /// Remote-call failures that a later scheduled run may clear on its own
    pub fn is_transient(&self) -> bool {
        match self {
            IngestError::Timeout { .. } | IngestError::Storage(_) => true,
            IngestError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message() {
        let err = IngestError::Timeout {
            operation: "put raw/patients/a/b.json".to_string(),
            limit: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "put raw/patients/a/b.json timed out after 30s");
        assert!(err.is_transient());
    }

    #[test]
    fn test_rejected_data_is_not_transient() {
        assert!(!IngestError::Rejected("unsupported Unicode escape sequence".into()).is_transient());
    }

    #[test]
    fn test_config_errors_are_not_transient() {
        assert!(!IngestError::Config("bad".into()).is_transient());
        assert!(!IngestError::GeneratorOutput("none".into()).is_transient());
    }
}
