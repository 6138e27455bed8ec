// ABOUTME: Record iterators over an object container
// ABOUTME: Snapshot enumeration, change polling, and the orchestrator that chains them

mod change;
mod combined;
mod lister;
mod pump;
mod snapshot;

use async_trait::async_trait;
use blob_store::{ObjectEntry, ObjectStore};

use crate::error::{Result, SourceError};
use crate::position::Phase;
use crate::record::{Record, DEFAULT_CONTENT_TYPE};

pub use change::ChangeIterator;
pub use combined::{CombinedIterator, IteratorSettings};
pub use snapshot::SnapshotIterator;

/// Pull-based record stream shared by both producers and the orchestrator.
#[async_trait]
pub trait RecordIterator: Send {
    /// Whether `next` has something to hand out: a record, or a terminal
    /// error for a dead producer. `false` means "no data right now".
    async fn has_next(&mut self) -> bool;

    /// Returns the next record, or the error that ended the producer.
    async fn next(&mut self) -> Result<Record>;

    /// Stops background work. Later `next` calls fail with `Stopped`.
    async fn stop(&mut self);

    /// The phase currently driving the stream, if any.
    fn phase(&self) -> Option<Phase> {
        None
    }
}

/// Downloads an object body and resolves its content type.
async fn download_object(store: &dyn ObjectStore, entry: &ObjectEntry) -> Result<(Vec<u8>, String)> {
    let download_err = |source| SourceError::Download {
        key: entry.name.clone(),
        source,
    };

    let download = store.download(&entry.name).await.map_err(download_err)?;
    let content_type = download
        .content_type
        .clone()
        .or_else(|| entry.content_type.clone())
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
    let body = download.read_all().await.map_err(download_err)?;

    Ok((body, content_type))
}
