//! Background persistence worker.
//!
//! A single tokio task drains the [`RecordQueue`](crate::RecordQueue) and
//! writes each record at most once:
//!
//! - disconnected: the record is dropped
//! - insert succeeds: the record is done
//! - insert fails: the record is dropped, the supervisor is marked
//!   disconnected and a reconnect is attempted before the next record
//!
//! Store errors never end the loop. It ends on the poison value, when the
//! producer side is dropped, or when a dequeue times out after shutdown was
//! requested.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use thermostat_types::Record;

use crate::error::{Error, Result};
use crate::metrics::DbMetrics;
use crate::queue::{Dequeued, QueueConsumer, QueueProducer};
use crate::sink::Diagnostics;
use crate::supervisor::ConnectionSupervisor;

/// Lifecycle of the worker task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Built but not started.
    Stopped,
    /// Draining the queue.
    Running,
    /// Shutdown requested, still draining.
    Stopping,
    /// Task has exited. Terminal.
    Finished,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Stopped,
            1 => WorkerState::Running,
            2 => WorkerState::Stopping,
            _ => WorkerState::Finished,
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Stopped => write!(f, "stopped"),
            WorkerState::Running => write!(f, "running"),
            WorkerState::Stopping => write!(f, "stopping"),
            WorkerState::Finished => write!(f, "finished"),
        }
    }
}

#[derive(Debug, Clone)]
struct SharedState(Arc<AtomicU8>);

impl SharedState {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(WorkerState::Stopped as u8)))
    }

    fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn set(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

/// The single consumer of the record queue.
pub struct PersistenceWorker {
    consumer: QueueConsumer,
    supervisor: Arc<ConnectionSupervisor>,
    metrics: Arc<DbMetrics>,
    diagnostics: Diagnostics,
    dequeue_timeout: Duration,
    running: CancellationToken,
    state: SharedState,
}

impl fmt::Debug for PersistenceWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceWorker")
            .field("state", &self.state.get())
            .field("dequeue_timeout", &self.dequeue_timeout)
            .finish()
    }
}

impl PersistenceWorker {
    pub fn new(
        consumer: QueueConsumer,
        supervisor: Arc<ConnectionSupervisor>,
        metrics: Arc<DbMetrics>,
        diagnostics: Diagnostics,
        dequeue_timeout: Duration,
    ) -> Self {
        Self {
            consumer,
            supervisor,
            metrics,
            diagnostics,
            dequeue_timeout,
            running: CancellationToken::new(),
            state: SharedState::new(),
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    /// Spawn the worker onto the current tokio runtime.
    pub fn start(self) -> WorkerHandle {
        let running = self.running.clone();
        let state = self.state.clone();
        state.set(WorkerState::Running);
        debug!(target: "thermostat_db", "Persistence worker started");

        let task = tokio::spawn(self.run());
        WorkerHandle {
            task: Some(task),
            running,
            state,
        }
    }

    async fn run(mut self) {
        loop {
            match self.consumer.dequeue(self.dequeue_timeout).await {
                Dequeued::Record(record) => self.persist(record).await,
                Dequeued::Poison => break,
                Dequeued::TimedOut => {
                    if self.running.is_cancelled() {
                        break;
                    }
                }
            }
        }
        self.state.set(WorkerState::Finished);
        debug!(target: "thermostat_db", "Persistence worker finished");
    }

    async fn persist(&self, record: Record) {
        let kind = record_kind(&record);
        let Some(handle) = self.supervisor.handle().await else {
            self.metrics.record_dropped_disconnected();
            debug!(target: "thermostat_db", "Dropped {} record while disconnected", kind);
            return;
        };

        let doc = record.to_document();
        match self
            .supervisor
            .call("insert_one", handle.insert_one(&doc))
            .await
        {
            Ok(()) => {
                self.metrics.record_inserted();
                self.diagnostics.emit(format_args!("Inserted {} record", kind));
            }
            Err(e) => {
                let err = Error::from_write(e);
                self.metrics.record_failed_insert();
                self.diagnostics
                    .emit(format_args!("Insert of {} record failed: {}", kind, err));
                self.supervisor.mark_disconnected(&err);

                self.metrics.record_reconnect_attempt();
                if self.supervisor.connect().await {
                    info!(target: "thermostat_db", "Reconnected to {}", self.supervisor.target());
                }
            }
        }
    }
}

fn record_kind(record: &Record) -> &'static str {
    match record {
        Record::State(_) => "state",
        Record::Event(_) => "event",
    }
}

/// Owned handle to a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    task: Option<JoinHandle<()>>,
    running: CancellationToken,
    state: SharedState,
}

impl WorkerHandle {
    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|task| task.is_finished())
    }

    /// Stop the worker and wait for it, bounded by `timeout`.
    ///
    /// Records queued before the call are still written. On timeout the
    /// task is aborted and [`Error::ShutdownTimeout`] is returned. Calling
    /// this again after it returned is a no-op.
    pub async fn stop(&mut self, producer: &QueueProducer, timeout: Duration) -> Result<()> {
        let Some(mut task) = self.task.take() else {
            return Ok(());
        };

        let deadline = Instant::now() + timeout;
        if self.state.get() != WorkerState::Finished {
            self.state.set(WorkerState::Stopping);
        }
        self.running.cancel();

        if !producer.enqueue_poison(timeout).await {
            debug!(target: "thermostat_db", "Queue did not take the poison value, relying on the running flag");
        }

        match tokio::time::timeout_at(deadline, &mut task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(target: "thermostat_db", "Persistence worker ended abnormally: {}", e);
                self.state.set(WorkerState::Finished);
                Ok(())
            }
            Err(_) => {
                task.abort();
                self.state.set(WorkerState::Finished);
                Err(Error::ShutdownTimeout(timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::RecordQueue;
    use crate::sink::MemorySink;
    use thermostat_store::MemoryStore;
    use thermostat_types::{EventRecord, EventType, HvacState, StateRecord, keys};

    struct Fixture {
        store: MemoryStore,
        supervisor: Arc<ConnectionSupervisor>,
        metrics: Arc<DbMetrics>,
        sink: MemorySink,
        producer: QueueProducer,
        worker: Option<PersistenceWorker>,
    }

    async fn fixture(capacity: usize) -> Fixture {
        let store = MemoryStore::new();
        let sink = MemorySink::new();
        let diagnostics = Diagnostics::with_sink(true, Arc::new(sink.clone()));
        let supervisor = Arc::new(ConnectionSupervisor::new(
            Arc::new(store.clone()),
            Duration::from_secs(1),
            diagnostics.clone(),
        ));
        supervisor.connect().await;
        let metrics = Arc::new(DbMetrics::new());
        let (producer, consumer) = RecordQueue::new(capacity);
        let worker = PersistenceWorker::new(
            consumer,
            supervisor.clone(),
            metrics.clone(),
            diagnostics,
            Duration::from_millis(50),
        );
        Fixture {
            store,
            supervisor,
            metrics,
            sink,
            producer,
            worker: Some(worker),
        }
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let mut fx = fixture(4).await;
        let worker = fx.worker.take().unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);

        let mut handle = worker.start();
        assert_eq!(handle.state(), WorkerState::Running);

        handle.stop(&fx.producer, Duration::from_secs(2)).await.unwrap();
        assert_eq!(handle.state(), WorkerState::Finished);
        assert!(handle.is_finished());

        handle.stop(&fx.producer, Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_pending_records_written_before_stop() {
        let mut fx = fixture(8).await;
        for n in 0..5 {
            assert!(fx.producer.try_enqueue(EventRecord::new(format!("e{}", n)).into()));
        }

        let mut handle = fx.worker.take().unwrap().start();
        handle.stop(&fx.producer, Duration::from_secs(2)).await.unwrap();

        let events: Vec<String> = fx
            .store
            .documents()
            .await
            .iter()
            .map(|d| d.get(keys::EVENT).and_then(|v| v.as_str()).unwrap().to_string())
            .collect();
        assert_eq!(events, vec!["e0", "e1", "e2", "e3", "e4"]);
        assert_eq!(fx.metrics.snapshot().inserted, 5);
    }

    #[tokio::test]
    async fn test_disconnected_records_are_dropped() {
        let mut fx = fixture(4).await;
        fx.supervisor.mark_disconnected("test");
        fx.store.set_available(false);

        fx.producer
            .try_enqueue(StateRecord::new(HvacState::Off, 65.0, 64, EventType::Periodic).into());
        let mut handle = fx.worker.take().unwrap().start();
        handle.stop(&fx.producer, Duration::from_secs(2)).await.unwrap();

        assert_eq!(fx.store.insert_attempts(), 0);
        assert_eq!(fx.metrics.snapshot().dropped_disconnected, 1);
    }

    #[tokio::test]
    async fn test_failed_insert_marks_disconnected_and_reconnects() {
        let mut fx = fixture(4).await;
        fx.store.set_reject_inserts(true);

        fx.producer.try_enqueue(EventRecord::new("rejected").into());
        let mut handle = fx.worker.take().unwrap().start();
        handle.stop(&fx.producer, Duration::from_secs(2)).await.unwrap();

        let stats = fx.metrics.snapshot();
        assert_eq!(stats.failed_inserts, 1);
        assert_eq!(stats.reconnect_attempts, 1);
        assert_eq!(fx.store.connect_attempts(), 2);
        // Ping still works, so the reconnect succeeds.
        assert!(fx.supervisor.is_connected());
        assert!(fx.sink.contains("insert of event record failed"));
        assert!(fx.store.documents().await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_waits_for_room_in_full_queue() {
        let mut fx = fixture(1).await;
        fx.store.set_insert_latency(Duration::from_millis(100));
        let mut handle = fx.worker.take().unwrap().start();

        // Worker is busy with the first record, the second fills the queue.
        fx.producer.try_enqueue(EventRecord::new("a").into());
        while fx.store.inserts_in_flight() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        fx.producer.try_enqueue(EventRecord::new("b").into());

        handle.stop(&fx.producer, Duration::from_secs(2)).await.unwrap();
        assert_eq!(handle.state(), WorkerState::Finished);
        assert_eq!(fx.store.documents().await.len(), 2);
    }

    #[tokio::test]
    async fn test_stop_times_out_and_aborts() {
        let mut fx = fixture(4).await;
        fx.store.set_insert_latency(Duration::from_millis(800));
        let mut handle = fx.worker.take().unwrap().start();

        fx.producer.try_enqueue(EventRecord::new("slow").into());
        while fx.store.inserts_in_flight() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let err = handle
            .stop(&fx.producer, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ShutdownTimeout(_)));
        assert_eq!(handle.state(), WorkerState::Finished);

        assert!(handle.is_finished());
        handle.stop(&fx.producer, Duration::from_millis(100)).await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_producer_ends_worker() {
        let mut fx = fixture(4).await;
        let handle = fx.worker.take().unwrap().start();
        drop(fx.producer);

        for _ in 0..100 {
            if handle.state() == WorkerState::Finished {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(handle.state(), WorkerState::Finished);
    }
}
