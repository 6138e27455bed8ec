// ABOUTME: Orchestrator that runs the snapshot producer and then hands over to change detection
// ABOUTME: Decides the starting phase from a resume position and rewrites the last snapshot position

use std::mem;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use blob_store::ObjectStore;
use chrono::Utc;
use tracing::{info, warn};

use super::{ChangeIterator, RecordIterator, SnapshotIterator};
use crate::config::{Config, PageSize};
use crate::error::{Result, SourceError};
use crate::position::{minimal_increment, Phase, Position};
use crate::record::Record;

/// Knobs shared by both producers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IteratorSettings {
    pub polling_period: Duration,
    pub page_size: PageSize,
}

impl From<&Config> for IteratorSettings {
    fn from(config: &Config) -> Self {
        Self {
            polling_period: config.polling_period,
            page_size: config.max_results,
        }
    }
}

enum Active {
    Snapshot(SnapshotIterator),
    Change(ChangeIterator),
    Stopped,
}

/// Owns exactly one producer at a time and switches from the snapshot to
/// change detection the first time the snapshot reports it is exhausted.
pub struct CombinedIterator {
    store: Arc<dyn ObjectStore>,
    settings: IteratorSettings,
    active: Active,
    /// Snapshot record taken from the producer but not yet returned, kept
    /// here so a cancelled `next` does not lose it.
    lookahead: Option<Record>,
}

impl CombinedIterator {
    pub fn new(store: Arc<dyn ObjectStore>, settings: IteratorSettings, position: Position) -> Self {
        let active = match position.phase {
            Phase::Change => {
                info!(
                    key = %position.key,
                    timestamp = %position.timestamp,
                    "resuming change detection"
                );
                Active::Change(ChangeIterator::resume(
                    store.clone(),
                    settings.page_size,
                    settings.polling_period,
                    &position,
                ))
            }
            Phase::Snapshot => {
                if !position.is_default_snapshot() {
                    warn!(
                        key = %position.key,
                        timestamp = %position.timestamp,
                        "ignoring snapshot position, restarting snapshot from the beginning"
                    );
                }
                Active::Snapshot(SnapshotIterator::start(store.clone(), settings.page_size))
            }
        };

        Self {
            store,
            settings,
            active,
            lookahead: None,
        }
    }

    /// Decodes a host-supplied resume position and starts the matching phase.
    pub fn from_position_bytes(
        store: Arc<dyn ObjectStore>,
        settings: IteratorSettings,
        position: Option<&[u8]>,
    ) -> Result<Self> {
        let position = Position::decode_optional(position)?;
        Ok(Self::new(store, settings, position))
    }

    /// Stops the exhausted snapshot and starts change detection just past
    /// the newest object it delivered, or just past now for an empty container.
    async fn switch_to_change(&mut self) {
        let mut snapshot = match mem::replace(&mut self.active, Active::Stopped) {
            Active::Snapshot(snapshot) => snapshot,
            other => {
                self.active = other;
                return;
            }
        };
        snapshot.stop().await;

        let watermark = snapshot.max_modified().unwrap_or_else(Utc::now) + minimal_increment();
        info!(watermark = %watermark, "snapshot complete, switching to change detection");

        self.active = Active::Change(ChangeIterator::start(
            self.store.clone(),
            self.settings.page_size,
            self.settings.polling_period,
            watermark,
        ));
    }
}

#[async_trait]
impl RecordIterator for CombinedIterator {
    async fn has_next(&mut self) -> bool {
        if self.lookahead.is_some() {
            return true;
        }
        loop {
            match &mut self.active {
                Active::Snapshot(snapshot) => {
                    if snapshot.has_next().await {
                        return true;
                    }
                    self.switch_to_change().await;
                }
                Active::Change(changes) => return changes.has_next().await,
                Active::Stopped => return false,
            }
        }
    }

    async fn next(&mut self) -> Result<Record> {
        loop {
            match &mut self.active {
                Active::Snapshot(snapshot) => {
                    if self.lookahead.is_none() {
                        if !snapshot.has_next().await {
                            self.switch_to_change().await;
                            continue;
                        }
                        self.lookahead = Some(snapshot.next().await?);
                    }
                    let last = !snapshot.has_next().await;
                    let Some(mut record) = self.lookahead.take() else {
                        continue;
                    };
                    // The final snapshot record doubles as the first change checkpoint.
                    if last {
                        record.position = record.position.into_change();
                    }
                    return Ok(record);
                }
                Active::Change(changes) => return changes.next().await,
                Active::Stopped => return Err(SourceError::Stopped("combined")),
            }
        }
    }

    async fn stop(&mut self) {
        self.lookahead = None;
        match mem::replace(&mut self.active, Active::Stopped) {
            Active::Snapshot(mut snapshot) => snapshot.stop().await,
            Active::Change(mut changes) => changes.stop().await,
            Active::Stopped => {}
        }
    }

    fn phase(&self) -> Option<Phase> {
        match &self.active {
            Active::Snapshot(_) => Some(Phase::Snapshot),
            Active::Change(_) => Some(Phase::Change),
            Active::Stopped => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blob_store::{Download, ListPage, ListRequest, MemoryStore, StoreError};
    use chrono::Duration as TimeDelta;

    fn settings() -> IteratorSettings {
        IteratorSettings {
            polling_period: Duration::from_millis(50),
            page_size: PageSize::new(1).unwrap(),
        }
    }

    fn combined(store: &MemoryStore, position: Position) -> CombinedIterator {
        CombinedIterator::new(Arc::new(store.clone()), settings(), position)
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::new("bucket");
        config.polling_period = Duration::from_millis(250);
        config.max_results = PageSize::new(10).unwrap();
        let settings = IteratorSettings::from(&config);
        assert_eq!(settings.polling_period, Duration::from_millis(250));
        assert_eq!(settings.page_size.get(), 10);
    }

    #[tokio::test]
    async fn test_default_position_starts_in_snapshot() {
        let mut iterator = combined(&MemoryStore::new(), Position::default());
        assert_eq!(iterator.phase(), Some(Phase::Snapshot));
        iterator.stop().await;
        assert_eq!(iterator.phase(), None);
    }

    #[tokio::test]
    async fn test_change_position_starts_in_change() {
        let mut iterator = combined(&MemoryStore::new(), Position::change("a.txt", Utc::now()));
        assert_eq!(iterator.phase(), Some(Phase::Change));
        iterator.stop().await;
    }

    #[tokio::test]
    async fn test_snapshot_position_with_key_restarts_snapshot() {
        let store = MemoryStore::new();
        store.put("a.txt", "A", "text/plain");
        let mut iterator = combined(&store, Position::snapshot("zzz.txt", Utc::now()));
        assert!(iterator.has_next().await);
        assert_eq!(iterator.next().await.unwrap().key, "a.txt");
        iterator.stop().await;
    }

    #[tokio::test]
    async fn test_last_snapshot_record_carries_change_position() {
        let store = MemoryStore::new();
        let base = Utc::now() - TimeDelta::minutes(10);
        store.put_at("a.txt", "A", "text/plain", base, base);
        store.put_at("b.txt", "B", "text/plain", base, base + TimeDelta::seconds(1));

        let mut iterator = combined(&store, Position::default());
        let first = iterator.next().await.unwrap();
        assert_eq!(first.position, Position::snapshot("a.txt", base));
        let last = iterator.next().await.unwrap();
        assert_eq!(
            last.position,
            Position::change("b.txt", base + TimeDelta::seconds(1))
        );

        assert!(!iterator.has_next().await);
        assert_eq!(iterator.phase(), Some(Phase::Change));
        iterator.stop().await;
    }

    #[tokio::test]
    async fn test_snapshot_failure_is_not_a_transition() {
        let store = MemoryStore::new();
        store.put("a.txt", "A", "text/plain");
        store.fail_next_list("boom");

        let mut iterator = combined(&store, Position::default());
        assert!(iterator.has_next().await);
        assert!(matches!(iterator.next().await, Err(SourceError::List(_))));
        assert!(iterator.has_next().await);
        assert!(iterator.next().await.unwrap_err().is_stopped());
        assert_eq!(iterator.phase(), Some(Phase::Snapshot));
        iterator.stop().await;
    }

    /// Delegates to a memory store, holding back one object's download.
    struct SlowDownloadStore {
        inner: MemoryStore,
        slow_key: &'static str,
        delay: Duration,
    }

    #[async_trait]
    impl ObjectStore for SlowDownloadStore {
        async fn check_container(&self) -> std::result::Result<(), StoreError> {
            self.inner.check_container().await
        }

        async fn list_page(&self, request: ListRequest) -> std::result::Result<ListPage, StoreError> {
            self.inner.list_page(request).await
        }

        async fn download(&self, name: &str) -> std::result::Result<Download, StoreError> {
            if name == self.slow_key {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.download(name).await
        }
    }

    #[tokio::test]
    async fn test_cancelled_next_keeps_the_record() {
        let inner = MemoryStore::new();
        inner.put("a.txt", "A", "text/plain");
        inner.put("b.txt", "B", "text/plain");
        let store = SlowDownloadStore {
            inner,
            slow_key: "b.txt",
            delay: Duration::from_millis(500),
        };
        let mut iterator = CombinedIterator::new(Arc::new(store), settings(), Position::default());

        let early = tokio::time::timeout(Duration::from_millis(200), iterator.next()).await;
        assert!(early.is_err());
        assert!(iterator.has_next().await);

        let first = iterator.next().await.unwrap();
        assert_eq!(first.key, "a.txt");
        assert_eq!(first.position.phase, Phase::Snapshot);
        let second = iterator.next().await.unwrap();
        assert_eq!(second.key, "b.txt");
        assert_eq!(second.position.phase, Phase::Change);
        iterator.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let mut iterator = combined(&MemoryStore::new(), Position::default());
        iterator.stop().await;
        iterator.stop().await;
        assert!(!iterator.has_next().await);
        let err = iterator.next().await.unwrap_err();
        assert_eq!(err.to_string(), "combined iterator is stopped");
    }

    #[tokio::test]
    async fn test_invalid_position_bytes_rejected() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        let result = CombinedIterator::from_position_bytes(store, settings(), Some(&b"garbage"[..]));
        assert!(matches!(result, Err(SourceError::CorruptPosition(_))));
    }
}
