//! Trait abstractions over a document store.
//!
//! [`DocumentStore`] is one open connection; [`Connector`] knows how to open
//! one. The buffering layer only ever talks to these two traits, so any
//! backend offering the four primitives (liveness probe, single insert,
//! sorted-limited find, aggregation) can sit behind it.

use std::sync::Arc;

use async_trait::async_trait;

use thermostat_types::Document;

use crate::error::Result;
use crate::pipeline::Pipeline;

/// An open connection to a document collection.
///
/// Implementations perform no retries; reconnect policy belongs to the caller.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Cheap liveness probe.
    async fn ping(&self) -> Result<()>;

    /// Insert a single document.
    async fn insert_one(&self, doc: &Document) -> Result<()>;

    /// Return up to `limit` documents ordered by `field`, highest first.
    async fn find_recent_sorted(&self, field: &str, limit: u32) -> Result<Vec<Document>>;

    /// Run an aggregation pipeline over the collection.
    async fn aggregate(&self, pipeline: &Pipeline) -> Result<Vec<Document>>;

    /// Release the connection. Further calls fail with [`StoreError::Closed`](crate::StoreError::Closed).
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Opens connections to a document store.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new connection.
    ///
    /// Implementations should not ping; the caller probes liveness itself.
    async fn connect(&self) -> Result<Arc<dyn DocumentStore>>;

    /// Human-readable description of the target, used in traces.
    fn describe(&self) -> String;
}
