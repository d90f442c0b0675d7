/// Shared error type used across all engine crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("validation: {0}")]
    Validation(String),

    #[error("write conflict on task {0}")]
    Conflict(String),

    #[error("branch already in use: {0}")]
    BranchInUse(String),

    #[error("workspace reclaim blocked: {0}")]
    ReclaimBlocked(String),

    #[error("failed to spawn assistant subprocess: {0}")]
    SubprocessSpawnFailed(String),

    #[error("assistant timed out waiting for output")]
    AssistantTimeout,

    #[error("assistant: {0}")]
    Assistant(String),

    #[error("persistence unavailable: {0}")]
    StorageUnavailable(String),

    #[error("task not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
