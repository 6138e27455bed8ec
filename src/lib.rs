// ABOUTME: Library root for container-stream
// ABOUTME: Streams an object container as a resumable snapshot followed by change detection

pub mod config;
pub mod error;
pub mod iterator;
pub mod position;
pub mod record;
pub mod source;

pub use blob_store;

pub use config::{Config, PageSize};
pub use error::{Result, SourceError};
pub use iterator::{ChangeIterator, CombinedIterator, IteratorSettings, RecordIterator, SnapshotIterator};
pub use position::{Phase, Position};
pub use record::{Action, Record};
pub use source::Source;
