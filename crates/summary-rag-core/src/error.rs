//! Error taxonomy shared by every layer of the knowledge base.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, KbError>;

#[derive(Debug, Error)]
pub enum KbError {
    /// Missing credentials or a malformed configuration value.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Summaries directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("No summary files found under {}", .0.display())]
    NoSummariesFound(PathBuf),

    /// Remote embedding/completion failure. `retryable` marks transient
    /// conditions (rate limits, server errors, transport, timeouts).
    #[error("Provider error: {message}")]
    Provider { message: String, retryable: bool },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },

    #[error("Corrupt cache entry {key}: {reason}")]
    CacheCorruption { key: String, reason: String },

    /// Persisted state that cannot be read back consistently.
    #[error("State error: {0}")]
    State(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl KbError {
    /// A transient provider failure, eligible for retry.
    pub fn transient(message: impl Into<String>) -> Self {
        KbError::Provider {
            message: message.into(),
            retryable: true,
        }
    }

    /// A provider failure that retrying cannot fix (bad request, bad payload).
    pub fn permanent(message: impl Into<String>) -> Self {
        KbError::Provider {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KbError::Provider {
                retryable: true,
                ..
            }
        )
    }
}
