use cogito_llm::provider::LlmError;

use crate::types::TaskId;

/// Errors surfaced at the pipeline boundary.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("unknown task: {0}")]
    UnknownTask(TaskId),
    #[error("invalid event: {0}")]
    InvalidEvent(String),
    #[error("event channel closed")]
    ChannelClosed,
    #[error("snapshot error: {0}")]
    Snapshot(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Why a worker produced no proposal. Never fatal to the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("backend unavailable: {0}")]
    Backend(#[from] LlmError),
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("malformed proposal: {0}")]
    Malformed(String),
    #[error("worker task failed: {0}")]
    Crashed(String),
}
