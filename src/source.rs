// ABOUTME: Host-facing source lifecycle - configure, open, read, ack, teardown
// ABOUTME: Wraps the combined iterator and turns "no data yet" into Ok(None)

use std::collections::HashMap;
use std::sync::Arc;

use blob_store::ObjectStore;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Result, SourceError};
use crate::iterator::{CombinedIterator, IteratorSettings, RecordIterator};
use crate::position::{Phase, Position};
use crate::record::Record;

/// A container exposed as a resumable record stream.
///
/// Typical lifecycle:
///
/// ```text
/// configure -> open -> (read | ack)* -> teardown
/// ```
#[derive(Default)]
pub struct Source {
    config: Option<Config>,
    iterator: Option<Box<dyn RecordIterator>>,
}

impl Source {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and stores the raw settings. Nothing touches the store yet.
    pub fn configure(&mut self, raw: &HashMap<String, String>) -> Result<()> {
        let config = Config::from_map(raw)?;
        self.set_config(config);
        Ok(())
    }

    /// Uses an already validated configuration.
    pub fn set_config(&mut self, config: Config) {
        debug!(
            container = %config.container,
            polling_period = ?config.polling_period,
            max_results = config.max_results.get(),
            "source configured"
        );
        self.config = Some(config);
    }

    pub fn config(&self) -> Option<&Config> {
        self.config.as_ref()
    }

    /// Checks the container is reachable, then starts streaming from the
    /// given resume position (`None` or empty starts a fresh snapshot).
    pub async fn open(&mut self, store: Arc<dyn ObjectStore>, position: Option<&[u8]>) -> Result<()> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| SourceError::Config("source must be configured before open".to_string()))?;
        let settings = IteratorSettings::from(config);
        let container = config.container.clone();

        store
            .check_container()
            .await
            .map_err(SourceError::Connection)?;

        let iterator = CombinedIterator::from_position_bytes(store, settings, position)?;

        // Reopening replaces whatever was running before.
        if let Some(mut previous) = self.iterator.take() {
            previous.stop().await;
        }
        info!(container = %container, phase = ?iterator.phase(), "source opened");
        self.iterator = Some(Box::new(iterator));
        Ok(())
    }

    /// Returns the next record, or `Ok(None)` when nothing is available right
    /// now and the caller should back off before trying again.
    pub async fn read(&mut self) -> Result<Option<Record>> {
        let iterator = self.iterator.as_mut().ok_or(SourceError::NotOpen)?;
        if !iterator.has_next().await {
            return Ok(None);
        }
        iterator.next().await.map(Some)
    }

    /// Acknowledges a delivered position. Positions carry all resume state,
    /// so there is nothing to release.
    pub fn ack(&self, position: &[u8]) -> Result<()> {
        match Position::decode(position) {
            Ok(position) => debug!(
                key = %position.key,
                phase = position.phase.as_str(),
                "position acknowledged"
            ),
            Err(err) => debug!(error = %err, "acknowledged an undecodable position"),
        }
        Ok(())
    }

    /// Stops background work. Safe to call more than once, or without `open`.
    pub async fn teardown(&mut self) {
        if let Some(mut iterator) = self.iterator.take() {
            iterator.stop().await;
            info!("source torn down");
        }
    }

    /// The phase currently driving the stream; `None` when not open.
    pub fn phase(&self) -> Option<Phase> {
        self.iterator.as_ref().and_then(|iterator| iterator.phase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Hands out a fixed script, reporting "no data" for `None` steps.
    struct ScriptedIterator {
        steps: VecDeque<Option<Result<Record>>>,
        stopped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl RecordIterator for ScriptedIterator {
        async fn has_next(&mut self) -> bool {
            match self.steps.front() {
                Some(Some(_)) => true,
                Some(None) => {
                    self.steps.pop_front();
                    false
                }
                None => false,
            }
        }

        async fn next(&mut self) -> Result<Record> {
            match self.steps.pop_front() {
                Some(Some(item)) => item,
                _ => Err(SourceError::Stopped("scripted")),
            }
        }

        async fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    fn record(key: &str) -> Record {
        Record::delete(key.to_string(), Position::change(key, Utc::now()), Utc::now())
    }

    fn scripted(steps: Vec<Option<Result<Record>>>) -> (Source, Arc<AtomicBool>) {
        let stopped = Arc::new(AtomicBool::new(false));
        let source = Source {
            config: Some(Config::new("bucket")),
            iterator: Some(Box::new(ScriptedIterator {
                steps: steps.into(),
                stopped: stopped.clone(),
            })),
        };
        (source, stopped)
    }

    #[tokio::test]
    async fn test_read_maps_no_data_to_none() {
        let (mut source, _) = scripted(vec![
            Some(Ok(record("a"))),
            None,
            Some(Ok(record("b"))),
        ]);
        assert_eq!(source.read().await.unwrap().unwrap().key, "a");
        assert!(source.read().await.unwrap().is_none());
        assert_eq!(source.read().await.unwrap().unwrap().key, "b");
    }

    #[tokio::test]
    async fn test_read_propagates_iterator_errors() {
        let (mut source, _) = scripted(vec![Some(Err(SourceError::Config("x".into())))]);
        assert!(matches!(source.read().await, Err(SourceError::Config(_))));
    }

    #[tokio::test]
    async fn test_teardown_stops_iterator_once() {
        let (mut source, stopped) = scripted(vec![]);
        source.teardown().await;
        assert!(stopped.load(Ordering::SeqCst));
        source.teardown().await;
        assert!(matches!(source.read().await, Err(SourceError::NotOpen)));
    }

    #[tokio::test]
    async fn test_read_before_open() {
        let mut source = Source::new();
        assert!(matches!(source.read().await, Err(SourceError::NotOpen)));
        assert_eq!(source.phase(), None);
    }

    #[test]
    fn test_ack_accepts_any_bytes() {
        let source = Source::new();
        assert!(source.ack(&Position::change("a", Utc::now()).encode().unwrap()).is_ok());
        assert!(source.ack(b"not a position").is_ok());
    }

    #[test]
    fn test_configure_rejects_bad_settings() {
        let mut source = Source::new();
        let raw = HashMap::from([("pollingPeriod".to_string(), "1s".to_string())]);
        assert!(matches!(source.configure(&raw), Err(SourceError::Config(_))));
        assert!(source.config().is_none());
    }
}
