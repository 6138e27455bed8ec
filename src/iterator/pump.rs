// ABOUTME: Background pump shared by the snapshot and change producers
// ABOUTME: Runs a producer task behind a single-slot channel with cooperative cancellation

use std::future::Future;

use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, SourceError};
use crate::record::Record;

type PumpItem = Result<Record>;

/// Producer side of a pump, moved into the background task.
#[derive(Clone)]
pub(crate) struct RecordSink {
    tx: mpsc::Sender<PumpItem>,
    cancel: CancellationToken,
}

impl RecordSink {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Runs `fut` to completion unless a stop is requested first.
    pub async fn guard<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            out = fut => Some(out),
        }
    }

    /// Hands a record to the consumer, waiting for the slot to free up.
    /// Returns false once the pump is stopped or the consumer is gone.
    pub async fn emit(&self, record: Record) -> bool {
        self.push(Ok(record)).await
    }

    async fn push(&self, item: PumpItem) -> bool {
        matches!(self.guard(self.tx.send(item)).await, Some(Ok(())))
    }
}

/// Where the consumer stands with respect to the pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Readiness {
    /// A record or a failure is waiting to be read.
    Ready,
    /// Still running, nothing buffered yet.
    Idle,
    /// The producer finished on its own.
    Drained,
    /// The producer's failure has already been handed out.
    Failed,
    /// `stop` was called.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpState {
    Running,
    Drained,
    Failed,
    Stopped,
}

/// Consumer side of a producer task.
pub(crate) struct Pump {
    name: &'static str,
    rx: mpsc::Receiver<PumpItem>,
    pending: Option<PumpItem>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    state: PumpState,
}

impl Pump {
    /// Spawns `producer` on the runtime. A producer error is delivered to the
    /// consumer as the final item; a producer that returns `Ok` simply drains.
    pub fn spawn<F, Fut>(name: &'static str, producer: F) -> Self
    where
        F: FnOnce(RecordSink) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let sink = RecordSink {
            tx,
            cancel: cancel.clone(),
        };

        let task = tokio::spawn(async move {
            let reporter = sink.clone();
            match producer(sink).await {
                Ok(()) if reporter.is_cancelled() => debug!(producer = name, "pump stopped"),
                Ok(()) => debug!(producer = name, "pump finished"),
                Err(err) => {
                    warn!(producer = name, error = %err, "pump failed");
                    reporter.push(Err(err)).await;
                }
            }
        });

        Self {
            name,
            rx,
            pending: None,
            cancel,
            task: Some(task),
            state: PumpState::Running,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == PumpState::Running
    }

    fn readiness(&self) -> Readiness {
        if self.pending.is_some() {
            return Readiness::Ready;
        }
        match self.state {
            PumpState::Running => Readiness::Idle,
            PumpState::Drained => Readiness::Drained,
            PumpState::Failed => Readiness::Failed,
            PumpState::Stopped => Readiness::Stopped,
        }
    }

    /// Buffers the next item if one is already available, without waiting.
    pub fn try_fill(&mut self) -> Readiness {
        if self.pending.is_none() && self.is_running() {
            match self.rx.try_recv() {
                Ok(item) => self.pending = Some(item),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => self.state = PumpState::Drained,
            }
        }
        self.readiness()
    }

    /// Waits until an item is buffered or the producer has finished.
    pub async fn fill(&mut self) -> Readiness {
        if self.pending.is_none() && self.is_running() {
            match self.rx.recv().await {
                Some(item) => self.pending = Some(item),
                None => self.state = PumpState::Drained,
            }
        }
        self.readiness()
    }

    /// Takes the next record, waiting for the producer if needed. Safe to
    /// cancel: dropping this future never loses a record or stops the pump.
    pub async fn next(&mut self) -> Result<Record> {
        let item = match self.pending.take() {
            Some(item) => item,
            None if self.is_running() => match self.rx.recv().await {
                Some(item) => item,
                None => {
                    self.state = PumpState::Drained;
                    return Err(SourceError::Stopped(self.name));
                }
            },
            None => return Err(SourceError::Stopped(self.name)),
        };
        if item.is_err() {
            self.state = PumpState::Failed;
        }
        item
    }

    /// Requests cancellation and waits for the task to wind down.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        self.rx.close();
        self.pending = None;
        self.state = PumpState::Stopped;
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(producer = self.name, error = %err, "pump task did not exit cleanly");
            }
        }
    }
}

impl Drop for Pump {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
