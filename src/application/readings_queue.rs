// Readings queues - hand-off between recorders and their consumers
use crate::domain::reading::Reading;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

/// What a publisher does when the queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Wait for the consumer to make room. Nothing is ever dropped.
    Block,
    /// Discard the reading being published and count the drop.
    DropNewest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("readings queue '{0}' is closed")]
pub struct QueueClosed(pub &'static str);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Published {
    Queued,
    Dropped,
}

#[derive(Debug)]
pub enum Pop {
    Reading(Reading),
    TimedOut,
    /// Every publisher is gone and the queue is empty.
    Disconnected,
}

/// Creates a bounded multi-producer, single-consumer readings queue.
pub fn readings_queue(
    name: &'static str,
    capacity: usize,
    policy: OverflowPolicy,
) -> (ReadingsPublisher, ReadingsConsumer) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ReadingsPublisher {
            name,
            tx,
            policy,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        ReadingsConsumer { name, rx },
    )
}

#[derive(Debug, Clone)]
pub struct ReadingsPublisher {
    name: &'static str,
    tx: mpsc::Sender<Reading>,
    policy: OverflowPolicy,
    dropped: Arc<AtomicU64>,
}

impl ReadingsPublisher {
    pub async fn publish(&self, reading: Reading) -> Result<Published, QueueClosed> {
        match self.policy {
            OverflowPolicy::Block => self
                .tx
                .send(reading)
                .await
                .map(|_| Published::Queued)
                .map_err(|_| QueueClosed(self.name)),
            OverflowPolicy::DropNewest => match self.tx.try_send(reading) {
                Ok(()) => Ok(Published::Queued),
                Err(TrySendError::Full(reading)) => {
                    let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::warn!(
                        queue = self.name,
                        method = %reading.method(),
                        dropped,
                        "readings queue full, dropping newest reading"
                    );
                    Ok(Published::Dropped)
                }
                Err(TrySendError::Closed(_)) => Err(QueueClosed(self.name)),
            },
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// The single consuming end of a readings queue.
#[derive(Debug)]
pub struct ReadingsConsumer {
    name: &'static str,
    rx: mpsc::Receiver<Reading>,
}

impl ReadingsConsumer {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn try_pop(&mut self) -> Option<Reading> {
        match self.rx.try_recv() {
            Ok(reading) => Some(reading),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Waits at most `timeout` for the next reading.
    pub async fn pop_timeout(&mut self, timeout: Duration) -> Pop {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(reading)) => Pop::Reading(reading),
            Ok(None) => Pop::Disconnected,
            Err(_) => Pop::TimedOut,
        }
    }

    /// Takes everything currently buffered without waiting.
    pub fn drain(&mut self) -> Vec<Reading> {
        std::iter::from_fn(|| self.try_pop()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("a live readings queue is already attached")]
pub struct TapOccupied;

/// Slot for the display-only queue of an open graph session. Publishing is a
/// no-op while nothing is attached.
#[derive(Debug, Clone, Default)]
pub struct LiveTap {
    slot: Arc<RwLock<Option<ReadingsPublisher>>>,
}

impl LiveTap {
    /// A publisher whose consumer has gone away can be replaced.
    pub fn attach(&self, publisher: ReadingsPublisher) -> Result<(), TapOccupied> {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|current| !current.is_closed()) {
            return Err(TapOccupied);
        }
        *slot = Some(publisher);
        Ok(())
    }

    pub fn detach(&self) -> Option<ReadingsPublisher> {
        self.slot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    #[cfg(test)]
    pub fn is_attached(&self) -> bool {
        self.current().is_some()
    }

    pub fn dropped(&self) -> u64 {
        self.current().map(|p| p.dropped()).unwrap_or(0)
    }

    pub async fn publish(&self, reading: Reading) {
        let Some(publisher) = self.current() else {
            return;
        };
        if publisher.publish(reading).await.is_err() {
            tracing::debug!("live readings queue closed, skipping");
        }
    }

    fn current(&self) -> Option<ReadingsPublisher> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Everything a recorder publishes to: the results queue that feeds the
/// writer, plus the live tap.
#[derive(Debug, Clone)]
pub struct ReadingsSink {
    results: ReadingsPublisher,
    live: LiveTap,
}

impl ReadingsSink {
    pub fn new(results: ReadingsPublisher, live: LiveTap) -> Self {
        Self { results, live }
    }

    pub async fn publish(&self, reading: Reading) -> Result<(), QueueClosed> {
        self.results.publish(reading.clone()).await?;
        self.live.publish(reading).await;
        Ok(())
    }
}
