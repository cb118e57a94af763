//! In-memory document store for testing.
//!
//! [`MemoryStore`] is both a [`Connector`] and a [`DocumentStore`]. Clones
//! share the same documents and switches, so a test can hand one clone to the
//! code under test and keep another to simulate outages and inspect writes.
//!
//! # Features
//!
//! - **Outage simulation**: `set_available(false)` fails connect, ping, reads and writes
//! - **Write rejection**: `set_reject_inserts(true)` fails only inserts
//! - **Latency simulation**: slow down inserts to hold the writer inside a call
//! - **Counters**: connect attempts, insert attempts, inserts in flight

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use thermostat_types::{Document, Value};

use crate::error::{Result, StoreError};
use crate::pipeline::Pipeline;
use crate::traits::{Connector, DocumentStore};

#[derive(Debug)]
struct Inner {
    documents: RwLock<Vec<Document>>,
    available: AtomicBool,
    reject_inserts: AtomicBool,
    insert_latency_ms: AtomicU64,
    connect_attempts: AtomicU64,
    insert_attempts: AtomicU64,
    inserts_in_flight: AtomicU32,
}

/// A shared in-memory document collection.
///
/// # Example
///
/// ```
/// use thermostat_store::{Connector, DocumentStore, MemoryStore};
/// use thermostat_types::Document;
///
/// #[tokio::main]
/// async fn main() {
///     let store = MemoryStore::new();
///     let handle = store.connect().await.unwrap();
///     handle.insert_one(&Document::new().with("event", "boot")).await.unwrap();
///
///     store.set_available(false);
///     assert!(handle.ping().await.is_err());
///     assert_eq!(store.documents().await.len(), 1);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty, available store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                documents: RwLock::new(Vec::new()),
                available: AtomicBool::new(true),
                reject_inserts: AtomicBool::new(false),
                insert_latency_ms: AtomicU64::new(0),
                connect_attempts: AtomicU64::new(0),
                insert_attempts: AtomicU64::new(0),
                inserts_in_flight: AtomicU32::new(0),
            }),
        }
    }

    /// Take the store down or bring it back.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Whether the store is up.
    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    /// Reject inserts while leaving ping and reads working.
    pub fn set_reject_inserts(&self, reject: bool) {
        self.inner.reject_inserts.store(reject, Ordering::SeqCst);
    }

    /// Delay every insert by this much.
    pub fn set_insert_latency(&self, latency: Duration) {
        self.inner
            .insert_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Add documents directly, bypassing availability checks.
    pub async fn seed(&self, docs: impl IntoIterator<Item = Document>) {
        self.inner.documents.write().await.extend(docs);
    }

    /// Snapshot of stored documents in insertion order.
    pub async fn documents(&self) -> Vec<Document> {
        self.inner.documents.read().await.clone()
    }

    /// Number of connect attempts so far.
    pub fn connect_attempts(&self) -> u64 {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    /// Number of insert attempts so far, successful or not.
    pub fn insert_attempts(&self) -> u64 {
        self.inner.insert_attempts.load(Ordering::SeqCst)
    }

    /// Number of inserts currently executing.
    pub fn inserts_in_flight(&self) -> u32 {
        self.inner.inserts_in_flight.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::Connectivity("memory store is down".to_string()))
        }
    }
}

struct InFlight<'a>(&'a AtomicU32);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MemoryStore {
    async fn connect(&self) -> Result<Arc<dyn DocumentStore>> {
        self.inner.connect_attempts.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(Arc::new(self.clone()))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        self.check_available()
    }

    async fn insert_one(&self, doc: &Document) -> Result<()> {
        self.inner.insert_attempts.fetch_add(1, Ordering::SeqCst);
        self.inner.inserts_in_flight.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight(&self.inner.inserts_in_flight);

        let latency = self.inner.insert_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        self.check_available()?;
        if self.inner.reject_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("memory store rejects inserts".to_string()));
        }

        self.inner.documents.write().await.push(doc.clone());
        Ok(())
    }

    async fn find_recent_sorted(&self, field: &str, limit: u32) -> Result<Vec<Document>> {
        self.check_available()?;

        let mut docs = self.inner.documents.read().await.clone();
        docs.reverse();
        let null = Value::Null;
        docs.sort_by(|a, b| {
            let a = a.get(field).unwrap_or(&null);
            let b = b.get(field).unwrap_or(&null);
            b.sort_cmp(a)
        });
        docs.truncate(limit as usize);
        Ok(docs)
    }

    async fn aggregate(&self, pipeline: &Pipeline) -> Result<Vec<Document>> {
        self.check_available()?;
        let docs = self.inner.documents.read().await.clone();
        Ok(pipeline.evaluate(docs))
    }
}
