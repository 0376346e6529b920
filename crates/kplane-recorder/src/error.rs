//! Error types for the decision recorder.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for recorder operations.
pub type RecorderResult<T> = Result<T, RecorderError>;

#[derive(Debug, Clone, Error)]
pub enum RecorderError {
    #[error("failed to open history database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("history write timed out after {0:?}")]
    Timeout(Duration),

    #[error("storage task failed: {0}")]
    Join(String),
}
