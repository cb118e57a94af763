//! The `ThermostatDb` facade.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use thermostat_store::{Accumulator, Connector, Filter, Group, Pipeline};
use thermostat_types::{
    EventRecord, EventType, HvacState, Record, StateRecord, Statistics, Value, keys,
};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::metrics::{DbMetrics, DbStats};
use crate::queue::{QueueProducer, RecordQueue};
use crate::sink::{Diagnostics, TraceSink};
use crate::supervisor::{ConnectionState, ConnectionSupervisor};
use crate::worker::{PersistenceWorker, WorkerHandle, WorkerState};

/// Default number of records returned by [`ThermostatDb::recent_history`].
pub const DEFAULT_HISTORY_LIMIT: u32 = 100;

/// Default statistics window in hours.
pub const DEFAULT_STATISTICS_HOURS: u32 = 24;

/// What happened to a logged record.
///
/// Only `Queued` records can reach the store. The others were dropped
/// without blocking the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOutcome {
    /// Handed to the worker.
    Queued,
    /// Dropped: the store is disconnected.
    Disconnected,
    /// Dropped: the queue is at capacity.
    QueueFull,
    /// Dropped: the database was closed.
    Closed,
}

impl LogOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, LogOutcome::Queued)
    }
}

/// Non-blocking history logging for a thermostat control loop.
///
/// Writes are fire-and-forget: `log_*` queue a record and return at once.
/// A background worker writes queued records while the store is connected
/// and drops them while it is not. Reads go straight to the store and
/// degrade to empty results instead of failing.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use thermostat_db::{Config, LogOutcome, ThermostatDb};
/// use thermostat_store::MemoryStore;
/// use thermostat_types::{EventType, HvacState};
///
/// # #[tokio::main] async fn main() -> thermostat_db::Result<()> {
/// let store = MemoryStore::new();
/// let db = ThermostatDb::with_connector(Config::default(), Arc::new(store.clone())).await?;
///
/// let outcome = db.log_state(HvacState::Heat, 68.5, 70, EventType::StateChange)?;
/// assert_eq!(outcome, LogOutcome::Queued);
///
/// db.close().await;
/// assert_eq!(store.documents().await.len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct ThermostatDb {
    supervisor: Arc<ConnectionSupervisor>,
    producer: QueueProducer,
    worker: Mutex<WorkerHandle>,
    metrics: Arc<DbMetrics>,
    diagnostics: Diagnostics,
    shutdown_timeout: Duration,
    closed: AtomicBool,
}

impl fmt::Debug for ThermostatDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThermostatDb")
            .field("supervisor", &self.supervisor)
            .field("pending", &self.producer.len())
            .field("capacity", &self.producer.capacity())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ThermostatDb {
    /// Open the store described by `config`.
    ///
    /// The initial connection may fail; the database then starts
    /// disconnected and [`reconnect`](Self::reconnect) can recover later.
    /// Only invalid configuration is an error.
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let connector = config.build_connector()?;
        Self::with_connector(config, Arc::new(connector)).await
    }

    /// Open any store through `connector`, using the rest of `config`.
    ///
    /// Trace lines go to `tracing` when `config.debug` is set.
    pub async fn with_connector(config: Config, connector: Arc<dyn Connector>) -> Result<Self> {
        let diagnostics = Diagnostics::new(config.debug);
        Self::build(config, connector, diagnostics).await
    }

    /// Like [`with_connector`](Self::with_connector) with a custom trace sink.
    pub async fn with_sink(
        config: Config,
        connector: Arc<dyn Connector>,
        sink: Arc<dyn TraceSink>,
    ) -> Result<Self> {
        let diagnostics = Diagnostics::with_sink(config.debug, sink);
        Self::build(config, connector, diagnostics).await
    }

    async fn build(
        config: Config,
        connector: Arc<dyn Connector>,
        diagnostics: Diagnostics,
    ) -> Result<Self> {
        config.validate()?;

        let supervisor = Arc::new(ConnectionSupervisor::new(
            connector,
            config.store.connect_timeout(),
            diagnostics.clone(),
        ));
        if supervisor.connect().await {
            info!(target: "thermostat_db", "Connected to {}", supervisor.target());
        } else {
            warn!(
                target: "thermostat_db",
                "Store {} unavailable, starting disconnected",
                supervisor.target()
            );
        }

        let metrics = Arc::new(DbMetrics::new());
        let (producer, consumer) = RecordQueue::new(config.queue.capacity);
        let worker = PersistenceWorker::new(
            consumer,
            supervisor.clone(),
            metrics.clone(),
            diagnostics.clone(),
            config.queue.dequeue_timeout(),
        )
        .start();

        Ok(Self {
            supervisor,
            producer,
            worker: Mutex::new(worker),
            metrics,
            diagnostics,
            shutdown_timeout: config.worker.shutdown_timeout(),
            closed: AtomicBool::new(false),
        })
    }

    /// Queue a state sample stamped with the current time.
    ///
    /// Never blocks. Returns an error only for a non-finite temperature.
    pub fn log_state(
        &self,
        state: HvacState,
        temperature: f64,
        setpoint: i32,
        event_type: EventType,
    ) -> Result<LogOutcome> {
        if !temperature.is_finite() {
            return Err(Error::InvalidArgument(format!(
                "temperature must be finite, got {}",
                temperature
            )));
        }
        let record = StateRecord::new(state, temperature, setpoint, event_type);
        Ok(self.enqueue(record.into()))
    }

    /// [`log_state`](Self::log_state) with the state and event type given
    /// as strings, e.g. `"heat"` and `"state_change"`.
    ///
    /// An unknown state or event type is an [`Error::Parse`].
    pub fn log_state_str(
        &self,
        state: &str,
        temperature: f64,
        setpoint: i32,
        event_type: &str,
    ) -> Result<LogOutcome> {
        let state: HvacState = state.parse()?;
        let event_type: EventType = event_type.parse()?;
        self.log_state(state, temperature, setpoint, event_type)
    }

    /// Queue an event record.
    ///
    /// Never blocks. Returns an error for a blank description or a
    /// non-finite float field.
    pub fn log_event(&self, event: EventRecord) -> Result<LogOutcome> {
        if event.description.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "event description cannot be empty".to_string(),
            ));
        }
        // Non-finite floats have no JSON form.
        if let Some((key, _)) = event
            .fields
            .iter()
            .find(|(_, v)| matches!(v, Value::Float(f) if !f.is_finite()))
        {
            return Err(Error::InvalidArgument(format!(
                "event field '{}' must be finite",
                key
            )));
        }
        Ok(self.enqueue(event.into()))
    }

    fn enqueue(&self, record: Record) -> LogOutcome {
        if self.is_closed() {
            return LogOutcome::Closed;
        }
        // Checked before queueing so an outage does not fill the queue.
        if !self.supervisor.is_connected() {
            self.metrics.record_dropped_disconnected();
            debug!(target: "thermostat_db", "Dropped record while disconnected");
            return LogOutcome::Disconnected;
        }

        match self.producer.push(record) {
            Ok(()) => {
                self.metrics.record_queued();
                LogOutcome::Queued
            }
            Err(Error::QueueFull { capacity }) => {
                self.metrics.record_dropped_queue_full();
                self.diagnostics.emit(format_args!(
                    "Queue full ({} records), dropping record",
                    capacity
                ));
                LogOutcome::QueueFull
            }
            Err(_) => LogOutcome::Closed,
        }
    }

    /// Up to `limit` records, newest first.
    ///
    /// Empty when disconnected or when the query fails. Documents that are
    /// not thermostat records are skipped.
    pub async fn recent_history(&self, limit: u32) -> Vec<Record> {
        let Some(handle) = self.supervisor.handle().await else {
            return Vec::new();
        };

        let docs = match self
            .supervisor
            .call(
                "find_recent_sorted",
                handle.find_recent_sorted(keys::TIMESTAMP, limit),
            )
            .await
        {
            Ok(docs) => docs,
            Err(e) => {
                self.diagnostics
                    .emit(format_args!("History query failed: {}", Error::Read(e)));
                return Vec::new();
            }
        };

        docs.iter()
            .filter_map(|doc| match Record::from_document(doc) {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!(target: "thermostat_db", "Skipping document in history: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Temperature statistics over the last `hours` hours.
    ///
    /// `None` when disconnected, when the aggregation fails, or when no
    /// document falls in the window.
    pub async fn statistics(&self, hours: u32) -> Option<Statistics> {
        let handle = self.supervisor.handle().await?;

        let since = OffsetDateTime::now_utc()
            .checked_sub(time::Duration::hours(i64::from(hours)))
            .unwrap_or_else(|| time::PrimitiveDateTime::MIN.assume_utc());
        let pipeline = Pipeline::new()
            .match_stage(Filter::gte(keys::TIMESTAMP, since))
            .group(
                Group::all()
                    .accumulate(keys::AVG_TEMP, Accumulator::avg(keys::TEMPERATURE))
                    .accumulate(keys::MIN_TEMP, Accumulator::min(keys::TEMPERATURE))
                    .accumulate(keys::MAX_TEMP, Accumulator::max(keys::TEMPERATURE))
                    .accumulate(keys::COUNT, Accumulator::count()),
            );

        let docs = match self
            .supervisor
            .call("aggregate", handle.aggregate(&pipeline))
            .await
        {
            Ok(docs) => docs,
            Err(e) => {
                self.diagnostics
                    .emit(format_args!("Statistics query failed: {}", Error::Read(e)));
                return None;
            }
        };

        let doc = docs.first()?;
        match Statistics::from_document(doc) {
            Ok(stats) if stats.count > 0 => Some(stats),
            Ok(_) => None,
            Err(e) => {
                debug!(target: "thermostat_db", "Unexpected statistics result: {}", e);
                None
            }
        }
    }

    /// Attempt a connection now. Returns whether the store is connected.
    pub async fn reconnect(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.metrics.record_reconnect_attempt();
        self.supervisor.connect().await
    }

    pub fn is_connected(&self) -> bool {
        self.supervisor.is_connected()
    }

    /// Human-readable description of the store.
    pub fn target(&self) -> String {
        self.supervisor.target()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    /// Snapshot of the write path counters.
    pub fn stats(&self) -> DbStats {
        self.metrics.snapshot()
    }

    /// Records waiting for the worker.
    pub fn pending(&self) -> usize {
        self.producer.len()
    }

    pub fn capacity(&self) -> usize {
        self.producer.capacity()
    }

    pub async fn worker_state(&self) -> WorkerState {
        self.worker.lock().await.state()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop the worker and release the store.
    ///
    /// Records already queued are written first, within the shutdown
    /// timeout. A worker that does not finish in time is aborted. Safe to
    /// call more than once.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);

        let mut worker = self.worker.lock().await;
        if let Err(e) = worker.stop(&self.producer, self.shutdown_timeout).await {
            self.diagnostics.emit(format_args!("{}, worker aborted", e));
        }
        self.supervisor.disconnect().await;
    }
}

impl Drop for ThermostatDb {
    fn drop(&mut self) {
        if !self.is_closed() {
            debug!(target: "thermostat_db", "ThermostatDb dropped without close, worker exits when the queue drains");
        }
    }
}
