use thiserror::Error;

/// Errors surfaced by the chat engine to its callers.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("caller does not own this session")]
    Forbidden,

    #[error("session store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("stream failed: {0}")]
    StreamFailed(String),

    #[error("usage limit reached; generation not allowed")]
    UsageDenied,

    #[error("a response is already being generated for this session")]
    SessionBusy,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors from repository operations (used by trait definitions in colloquy-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<RepositoryError> for ChatError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound => ChatError::NotFound("session"),
            RepositoryError::Conflict(msg) => ChatError::Conflict(msg),
            RepositoryError::Connection => {
                ChatError::StoreUnavailable("database connection error".to_string())
            }
            RepositoryError::Query(msg) => ChatError::StoreUnavailable(msg),
        }
    }
}
