//! Bounded record queue between the log calls and the worker.
//!
//! One [`QueueProducer`] lives in the facade and one [`QueueConsumer`] in the
//! worker. Enqueueing never waits: when the queue is full the incoming record
//! is dropped and everything already queued stays put.

use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};

use thermostat_types::Record;

use crate::error::{Error, Result};

/// One queue slot.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueItem {
    Record(Record),
    /// Shutdown marker. Never a real record.
    Poison,
}

/// What a bounded dequeue produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Dequeued {
    Record(Record),
    /// The poison value, or the producer side went away.
    Poison,
    /// Nothing arrived within the timeout.
    TimedOut,
}

/// Constructor for the producer/consumer pair.
#[derive(Debug)]
pub struct RecordQueue;

impl RecordQueue {
    /// Create a queue holding at most `capacity` items.
    ///
    /// `capacity` is clamped to at least one.
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use thermostat_db::{Dequeued, RecordQueue};
    /// use thermostat_types::{EventRecord, Record};
    ///
    /// # #[tokio::main] async fn main() {
    /// let (producer, mut consumer) = RecordQueue::new(1);
    /// assert!(producer.try_enqueue(EventRecord::new("boot").into()));
    /// assert!(!producer.try_enqueue(EventRecord::new("dropped").into()));
    ///
    /// let Dequeued::Record(Record::Event(event)) = consumer.dequeue(Duration::from_secs(1)).await else {
    ///     panic!("expected the first record");
    /// };
    /// assert_eq!(event.description, "boot");
    /// # }
    /// ```
    #[allow(clippy::new_ret_no_self)]
    pub fn new(capacity: usize) -> (QueueProducer, QueueConsumer) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        (QueueProducer { tx, capacity }, QueueConsumer { rx })
    }
}

/// Sending half. Only the facade holds one.
#[derive(Debug)]
pub struct QueueProducer {
    tx: mpsc::Sender<QueueItem>,
    capacity: usize,
}

impl QueueProducer {
    /// Enqueue without waiting. Returns false if the record was dropped.
    pub fn try_enqueue(&self, record: Record) -> bool {
        self.push(record).is_ok()
    }

    /// Enqueue without waiting, naming why a record was dropped.
    pub fn push(&self, record: Record) -> Result<()> {
        match self.tx.try_send(QueueItem::Record(record)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::QueueFull {
                capacity: self.capacity,
            }),
            Err(TrySendError::Closed(_)) => Err(Error::Closed),
        }
    }

    /// Queue the poison value behind any pending records.
    ///
    /// Waits up to `timeout` for a free slot. Returns false if the consumer
    /// is gone or the queue stayed full.
    pub async fn enqueue_poison(&self, timeout: Duration) -> bool {
        self.tx.send_timeout(QueueItem::Poison, timeout).await.is_ok()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of items waiting.
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the consumer has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half. Only the worker holds one.
#[derive(Debug)]
pub struct QueueConsumer {
    rx: mpsc::Receiver<QueueItem>,
}

impl QueueConsumer {
    /// Wait up to `timeout` for the next item.
    pub async fn dequeue(&mut self, timeout: Duration) -> Dequeued {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(QueueItem::Record(record))) => Dequeued::Record(record),
            Ok(Some(QueueItem::Poison)) | Ok(None) => Dequeued::Poison,
            Err(_) => Dequeued::TimedOut,
        }
    }
}
