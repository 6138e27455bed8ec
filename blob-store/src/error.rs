use thiserror::Error;

/// Failures reported by an object container backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The named object does not exist (or is only present as a tombstone).
    #[error("object '{0}' not found")]
    NotFound(String),

    /// The container itself cannot be reached.
    #[error("container unavailable: {0}")]
    Unavailable(String),

    /// The caller asked for something the backend cannot serve.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
