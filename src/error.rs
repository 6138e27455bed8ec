// ABOUTME: Error taxonomy for the container stream source
// ABOUTME: Separates open-time failures from pump failures and the intentional stop signal

use blob_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the source and its iterators.
///
/// "No data yet" is deliberately absent: it is reported as `Ok(None)` from
/// [`crate::Source::read`] or `false` from `has_next`, never as an error.
#[derive(Error, Debug)]
pub enum SourceError {
    /// Bad or missing settings, rejected before any producer starts.
    #[error("configuration error: {0}")]
    Config(String),

    /// The container could not be reached when opening the source.
    #[error("could not establish a connection: {0}")]
    Connection(#[source] StoreError),

    /// The resume position bytes are not a valid encoded position.
    #[error("invalid or unsupported position: {0}")]
    CorruptPosition(#[source] serde_json::Error),

    /// A position could not be serialized for the host.
    #[error("failed to encode position: {0}")]
    EncodePosition(#[source] serde_json::Error),

    /// The resume position names a phase this source does not know.
    #[error("invalid position phase ({0})")]
    InvalidPositionPhase(u8),

    /// Listing the container failed while a producer was running.
    #[error("failed to list container: {0}")]
    List(#[source] StoreError),

    /// Downloading an object body failed while a producer was running.
    #[error("failed to download '{key}': {source}")]
    Download {
        key: String,
        #[source]
        source: StoreError,
    },

    /// The producer was stopped, exhausted, or already reported its failure.
    #[error("{0} iterator is stopped")]
    Stopped(&'static str),

    /// `read` was called before `open` or after `teardown`.
    #[error("source is not open")]
    NotOpen,
}

impl SourceError {
    pub fn is_stopped(&self) -> bool {
        matches!(self, SourceError::Stopped(_))
    }
}

pub type Result<T, E = SourceError> = std::result::Result<T, E>;
