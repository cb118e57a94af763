//! Counters for the write path.
//!
//! Every silently dropped record is counted here, so an outage that is
//! invisible to the control loop is still visible in [`DbStats`].

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time copy of the write path counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbStats {
    /// Records accepted into the queue.
    pub queued: u64,
    /// Records dropped because the store was disconnected, either at log
    /// time or when the worker picked them up.
    pub dropped_disconnected: u64,
    /// Records dropped because the queue was at capacity.
    pub dropped_queue_full: u64,
    /// Records written to the store.
    pub inserted: u64,
    /// Inserts that failed while connected.
    pub failed_inserts: u64,
    /// Connection attempts after the initial one.
    pub reconnect_attempts: u64,
}

impl DbStats {
    /// Records that never reached the store for any reason.
    pub fn dropped(&self) -> u64 {
        self.dropped_disconnected + self.dropped_queue_full + self.failed_inserts
    }
}

/// Shared atomic counters behind [`DbStats`].
#[derive(Debug, Default)]
pub struct DbMetrics {
    queued: AtomicU64,
    dropped_disconnected: AtomicU64,
    dropped_queue_full: AtomicU64,
    inserted: AtomicU64,
    failed_inserts: AtomicU64,
    reconnect_attempts: AtomicU64,
}

impl DbMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_disconnected(&self) {
        self.dropped_disconnected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_queue_full(&self) {
        self.dropped_queue_full.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inserted(&self) {
        self.inserted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_insert(&self) {
        self.failed_inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of the current counters.
    pub fn snapshot(&self) -> DbStats {
        DbStats {
            queued: self.queued.load(Ordering::Relaxed),
            dropped_disconnected: self.dropped_disconnected.load(Ordering::Relaxed),
            dropped_queue_full: self.dropped_queue_full.load(Ordering::Relaxed),
            inserted: self.inserted.load(Ordering::Relaxed),
            failed_inserts: self.failed_inserts.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
        }
    }
}
