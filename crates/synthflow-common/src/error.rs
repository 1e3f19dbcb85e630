//! Error types shared by synthflow crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, SynthflowError>;

/// Errors raised by the shared utilities
#[derive(Error, Debug)]
pub enum SynthflowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}
