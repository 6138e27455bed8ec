// ABOUTME: Change producer - polls the container for objects modified at or after a watermark
// ABOUTME: Emits upsert and delete records and bumps the watermark past each processed batch

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use blob_store::{ObjectEntry, ObjectStore};
use chrono::{DateTime, Utc};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace};

use super::lister::ObjectLister;
use super::pump::{Pump, Readiness, RecordSink};
use super::{download_object, RecordIterator};
use crate::config::PageSize;
use crate::error::{Result, SourceError};
use crate::position::{minimal_increment, Phase, Position};
use crate::record::{Action, Record};

/// Infinite, lazily-polled change stream.
///
/// `has_next` never waits: `false` means the last tick found nothing new,
/// while a dead producer reports `true` so that `next` can hand out the
/// error that ended it.
pub struct ChangeIterator {
    pump: Pump,
}

impl ChangeIterator {
    /// Starts polling every `polling_period`, first tick one period from now.
    /// Objects last modified before `from` are never emitted.
    pub fn start(
        store: Arc<dyn ObjectStore>,
        page_size: PageSize,
        polling_period: Duration,
        from: DateTime<Utc>,
    ) -> Self {
        Self::spawn(store, page_size, polling_period, from, None)
    }

    /// Continues after a delivered change position. Objects sharing the
    /// position's timestamp are emitted only if they sort after its key.
    pub fn resume(
        store: Arc<dyn ObjectStore>,
        page_size: PageSize,
        polling_period: Duration,
        position: &Position,
    ) -> Self {
        let boundary = Boundary {
            timestamp: position.timestamp,
            key: position.key.clone(),
        };
        Self::spawn(store, page_size, polling_period, position.timestamp, Some(boundary))
    }

    fn spawn(
        store: Arc<dyn ObjectStore>,
        page_size: PageSize,
        polling_period: Duration,
        watermark: DateTime<Utc>,
        boundary: Option<Boundary>,
    ) -> Self {
        let worker = ChangeWorker {
            store,
            page_size,
            polling_period,
            watermark,
            boundary,
        };
        Self {
            pump: Pump::spawn("change", move |sink| worker.run(sink)),
        }
    }
}

#[async_trait]
impl RecordIterator for ChangeIterator {
    async fn has_next(&mut self) -> bool {
        !matches!(self.pump.try_fill(), Readiness::Idle)
    }

    async fn next(&mut self) -> Result<Record> {
        self.pump.next().await
    }

    async fn stop(&mut self) {
        self.pump.stop().await;
    }

    fn phase(&self) -> Option<Phase> {
        Some(Phase::Change)
    }
}

/// Last delivered entry in (last-modified, name) order.
struct Boundary {
    timestamp: DateTime<Utc>,
    key: String,
}

impl Boundary {
    fn covers(&self, entry: &ObjectEntry) -> bool {
        entry.last_modified == self.timestamp && entry.name <= self.key
    }
}

struct ChangeWorker {
    store: Arc<dyn ObjectStore>,
    page_size: PageSize,
    polling_period: Duration,
    /// Lowest last-modified time that has not been processed yet.
    watermark: DateTime<Utc>,
    /// Entries at the watermark that were delivered before a resume.
    boundary: Option<Boundary>,
}

impl ChangeWorker {
    fn is_pending(&self, entry: &ObjectEntry) -> bool {
        entry.last_modified >= self.watermark
            && !self
                .boundary
                .as_ref()
                .is_some_and(|boundary| boundary.covers(entry))
    }

    async fn run(mut self, sink: RecordSink) -> Result<()> {
        let mut ticker = interval_at(Instant::now() + self.polling_period, self.polling_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            watermark = %self.watermark,
            polling_period = ?self.polling_period,
            "change detection started"
        );

        loop {
            if sink.guard(ticker.tick()).await.is_none() {
                return Ok(());
            }
            if !self.poll(&sink).await? {
                return Ok(());
            }
        }
    }

    /// One tick: collect every entry at or past the watermark, emit them
    /// oldest first, then move the watermark past the newest one.
    /// Returns `Ok(false)` when a stop interrupted the tick.
    async fn poll(&mut self, sink: &RecordSink) -> Result<bool> {
        let mut lister = ObjectLister::new(self.store.clone(), self.page_size, true);
        let mut changed: Vec<ObjectEntry> = Vec::new();

        loop {
            let page = match sink.guard(lister.next_page()).await {
                Some(page) => page.map_err(SourceError::List)?,
                None => return Ok(false),
            };
            let Some(entries) = page else {
                break;
            };
            changed.extend(entries.into_iter().filter(|entry| self.is_pending(entry)));
        }

        if changed.is_empty() {
            trace!(watermark = %self.watermark, "no changes");
            return Ok(true);
        }

        changed.sort_by(|a, b| {
            a.last_modified
                .cmp(&b.last_modified)
                .then_with(|| a.name.cmp(&b.name))
        });

        let total = changed.len();
        let mut newest = None;
        let mut result = Ok(true);
        for entry in changed {
            let last_modified = entry.last_modified;
            match self.to_record(sink, entry).await {
                Ok(Some(record)) => {
                    if !sink.emit(record).await {
                        result = Ok(false);
                        break;
                    }
                    newest = Some(last_modified);
                }
                Ok(None) => {
                    result = Ok(false);
                    break;
                }
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }

        if let Some(newest) = newest {
            let next = newest + minimal_increment();
            if next > self.watermark {
                self.watermark = next;
                self.boundary = None;
            }
        }
        debug!(changes = total, watermark = %self.watermark, "change tick processed");

        result
    }

    /// Builds the record for one changed entry; `None` if stopped mid-download.
    async fn to_record(&self, sink: &RecordSink, entry: ObjectEntry) -> Result<Option<Record>> {
        let position = Position::change(entry.name.clone(), entry.last_modified);

        if entry.deleted {
            return Ok(Some(Record::delete(entry.name, position, entry.last_modified)));
        }

        let (body, content_type) = match sink.guard(download_object(self.store.as_ref(), &entry)).await {
            Some(downloaded) => downloaded?,
            None => return Ok(None),
        };

        Ok(Some(Record::upsert(
            Action::detect(entry.created_at, entry.last_modified),
            entry.name,
            body,
            content_type,
            position,
            entry.last_modified,
        )))
    }
}
