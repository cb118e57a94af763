//! Non-blocking, outage-tolerant history logging for a thermostat.
//!
//! The control loop calls [`ThermostatDb::log_state`] and
//! [`ThermostatDb::log_event`]; these only push onto a bounded queue and
//! never wait on the store. A single background worker drains the queue and
//! writes each record once. When the store goes away records are dropped,
//! reads come back empty, and nothing is raised to the caller.
//!
//! # Components
//!
//! - [`ConnectionSupervisor`]: connected/disconnected state and the store handle
//! - [`RecordQueue`]: bounded FIFO, drop-newest when full
//! - [`PersistenceWorker`]: the single consumer, reconnects after a failed write
//! - [`ThermostatDb`]: the facade
//! - [`Config`]: TOML configuration
//! - [`TraceSink`]: optional debug trace lines
//!
//! # Example
//!
//! ```no_run
//! use thermostat_db::{Config, ThermostatDb};
//! use thermostat_types::{EventRecord, EventType, HvacState};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = ThermostatDb::open(Config::load_default()?).await?;
//!
//!     db.log_state(HvacState::Heat, 68.5, 70, EventType::StateChange)?;
//!     db.log_event(EventRecord::new("filter replaced").field("zone", "upstairs"))?;
//!
//!     for record in db.recent_history(5).await {
//!         println!("{:?}", record);
//!     }
//!     if let Some(stats) = db.statistics(24).await {
//!         println!("avg {:?} over {} samples", stats.avg_temp, stats.count);
//!     }
//!
//!     db.close().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod sink;
pub mod supervisor;
pub mod worker;

pub use config::{
    Config, ConfigError, MAX_QUEUE_CAPACITY, QueueConfig, StoreConfig, ValidationError,
    WorkerConfig, default_config_path,
};
pub use db::{DEFAULT_HISTORY_LIMIT, DEFAULT_STATISTICS_HOURS, LogOutcome, ThermostatDb};
pub use error::{Error, Result};
pub use metrics::{DbMetrics, DbStats};
pub use queue::{Dequeued, QueueConsumer, QueueItem, QueueProducer, RecordQueue};
pub use sink::{Diagnostics, MemorySink, TraceSink, TracingSink};
pub use supervisor::{ConnectionState, ConnectionSupervisor};
pub use worker::{PersistenceWorker, WorkerHandle, WorkerState};

// Re-export the data model and store boundary for convenience.
pub use thermostat_store::{Connector, DocumentStore, MemoryStore, SqliteConnector, StoreError};
pub use thermostat_types::{EventRecord, EventType, HvacState, Record, StateRecord, Statistics};
