//! Fixed-capacity result sink.
//!
//! Sized once to the root plan's leaf count, so a leaf write never waits.
//! Any number of branches post concurrently; a single reader drains it after
//! every branch has joined.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Semaphore;

/// A dispatch result tagged with its leaf's declaration index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posted<T> {
    pub index: usize,
    pub value: T,
}

impl<T> Posted<T> {
    /// Sort drained entries by declaration index and strip the tags.
    pub fn into_declaration_order(mut posted: Vec<Posted<T>>) -> Vec<T> {
        posted.sort_by_key(|p| p.index);
        posted.into_iter().map(|p| p.value).collect()
    }

    /// Strip the tags, keeping receipt order.
    pub fn into_receipt_order(posted: Vec<Posted<T>>) -> Vec<T> {
        posted.into_iter().map(|p| p.value).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("sink full: capacity {capacity} exhausted")]
    Full { capacity: usize },
    #[error("sink closed")]
    Closed,
}

/// Many-writer, single-reader bounded collector.
pub struct Sink<T> {
    capacity: usize,
    tx: mpsc::Sender<Posted<T>>,
    rx: mpsc::Receiver<Posted<T>>,
}

impl<T> Sink<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        // tokio rejects zero-capacity channels and anything above its permit
        // limit; an empty sink still drains to nothing
        let (tx, rx) = mpsc::channel(capacity.clamp(1, Semaphore::MAX_PERMITS));
        Self { capacity, tx, rx }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Post one result without waiting.
    pub fn post(&self, index: usize, value: T) -> Result<(), SinkError> {
        if self.capacity == 0 {
            return Err(SinkError::Full { capacity: 0 });
        }
        self.tx
            .try_send(Posted { index, value })
            .map_err(|e| match e {
                TrySendError::Full(_) => SinkError::Full {
                    capacity: self.capacity,
                },
                TrySendError::Closed(_) => SinkError::Closed,
            })
    }

    /// Consume the sink and return every posted entry in receipt order.
    pub fn drain(self) -> Vec<Posted<T>> {
        let Sink { tx, mut rx, .. } = self;
        drop(tx);
        let mut out = Vec::new();
        while let Ok(posted) = rx.try_recv() {
            out.push(posted);
        }
        out
    }
}
