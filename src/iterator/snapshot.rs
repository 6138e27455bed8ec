// ABOUTME: Snapshot producer - enumerates every object in the container exactly once
// ABOUTME: Tracks the newest modification time seen so change detection can start after it

use std::sync::Arc;

use async_trait::async_trait;
use blob_store::ObjectStore;
use chrono::{DateTime, Utc};
use tracing::info;

use super::lister::ObjectLister;
use super::pump::{Pump, Readiness, RecordSink};
use super::{download_object, RecordIterator};
use crate::config::PageSize;
use crate::error::{Result, SourceError};
use crate::position::{Phase, Position};
use crate::record::{Action, Record};

/// Finite, non-restartable enumeration of the container in listing order.
///
/// Every record's position carries the running maximum of last-modified
/// times, so once the last record has been consumed [`Self::max_modified`]
/// holds the watermark for the change phase.
pub struct SnapshotIterator {
    pump: Pump,
    max_modified: Option<DateTime<Utc>>,
}

impl SnapshotIterator {
    /// Starts enumerating in the background.
    pub fn start(store: Arc<dyn ObjectStore>, page_size: PageSize) -> Self {
        let worker = SnapshotWorker {
            lister: ObjectLister::new(store.clone(), page_size, false),
            store,
            max_modified: None,
            emitted: 0,
        };
        Self {
            pump: Pump::spawn("snapshot", move |sink| worker.run(sink)),
            max_modified: None,
        }
    }

    /// Greatest last-modified time among the records consumed so far;
    /// `None` if nothing has been consumed (e.g. the container is empty).
    pub fn max_modified(&self) -> Option<DateTime<Utc>> {
        self.max_modified
    }
}

#[async_trait]
impl RecordIterator for SnapshotIterator {
    /// Waits until the producer has either buffered the next object or
    /// finished the listing, so `false` always means "snapshot complete".
    async fn has_next(&mut self) -> bool {
        matches!(self.pump.fill().await, Readiness::Ready | Readiness::Failed)
    }

    async fn next(&mut self) -> Result<Record> {
        let record = self.pump.next().await?;
        let seen = record.position.timestamp;
        if self.max_modified.map_or(true, |max| max < seen) {
            self.max_modified = Some(seen);
        }
        Ok(record)
    }

    async fn stop(&mut self) {
        self.pump.stop().await;
    }

    fn phase(&self) -> Option<Phase> {
        Some(Phase::Snapshot)
    }
}

struct SnapshotWorker {
    store: Arc<dyn ObjectStore>,
    lister: ObjectLister,
    max_modified: Option<DateTime<Utc>>,
    emitted: u64,
}

impl SnapshotWorker {
    async fn run(mut self, sink: RecordSink) -> Result<()> {
        info!("snapshot started");

        loop {
            let page = match sink.guard(self.lister.next_page()).await {
                Some(page) => page.map_err(SourceError::List)?,
                None => return Ok(()),
            };
            let Some(entries) = page else {
                break;
            };

            for entry in entries {
                let max_modified = match self.max_modified {
                    Some(max) if max >= entry.last_modified => max,
                    _ => entry.last_modified,
                };
                self.max_modified = Some(max_modified);

                let (body, content_type) =
                    match sink.guard(download_object(self.store.as_ref(), &entry)).await {
                        Some(downloaded) => downloaded?,
                        None => return Ok(()),
                    };

                let record = Record::upsert(
                    Action::Insert,
                    entry.name.clone(),
                    body,
                    content_type,
                    Position::snapshot(entry.name, max_modified),
                    entry.created_at,
                );
                if !sink.emit(record).await {
                    return Ok(());
                }
                self.emitted += 1;
            }
        }

        info!(
            objects = self.emitted,
            max_modified = ?self.max_modified,
            "snapshot exhausted"
        );
        Ok(())
    }
}
