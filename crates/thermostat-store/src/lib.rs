//! Document store adapters for thermostat history logging.
//!
//! This crate defines the boundary between the buffering layer and whatever
//! actually persists thermostat history:
//!
//! - [`DocumentStore`]: one open connection (ping, insert, sorted find, aggregate)
//! - [`Connector`]: opens connections, used for initial connect and reconnects
//! - [`Pipeline`]: typed `$match`/`$group` aggregation with a reference evaluator
//!
//! Two backends are provided:
//!
//! - [`SqliteConnector`]/[`SqliteStore`]: JSON documents in SQLite tables
//! - [`MemoryStore`]: shared in-memory collection with outage simulation
//!
//! # Example
//!
//! ```
//! use thermostat_store::{Accumulator, Connector, DocumentStore, Filter, Group, MemoryStore, Pipeline};
//! use thermostat_types::{Document, Value};
//!
//! # async fn example() -> thermostat_store::Result<()> {
//! let store = MemoryStore::new().connect().await?;
//! store.insert_one(&Document::new().with("temperature", 68.5)).await?;
//!
//! let pipeline = Pipeline::new()
//!     .match_stage(Filter::gte("temperature", 60.0))
//!     .group(Group::all().accumulate("count", Accumulator::count()));
//! let out = store.aggregate(&pipeline).await?;
//! assert_eq!(out[0].get("count"), Some(&Value::Int(1)));
//! # Ok(())
//! # }
//! ```

mod error;
mod memory;
mod pipeline;
mod schema;
mod sqlite;
mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use pipeline::{
    Accumulator, Comparison, Filter, GROUP_ID, Group, Pipeline, Stage, SumOperand,
    evaluate_stages,
};
pub use sqlite::{SqliteConnector, SqliteStore, SqliteTarget};
pub use traits::{Connector, DocumentStore};

/// Default directory for SQLite document stores, following platform conventions.
///
/// - Linux: `~/.local/share/thermostat`
/// - macOS: `~/Library/Application Support/thermostat`
/// - Windows: `C:\Users\<user>\AppData\Local\thermostat`
pub fn default_data_dir() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("thermostat")
}
