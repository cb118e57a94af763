//! Connection health tracking.
//!
//! [`ConnectionSupervisor`] owns the store handle and the connected flag.
//! The flag is an atomic so the log path can check it without waiting. The
//! handle sits behind an async mutex that also serializes every transition,
//! so a caller running a query and the worker reconnecting after a failed
//! write never race on the handle.
//!
//! There is no reconnect timer. A connection is attempted at construction,
//! after a failed write, and when the owner asks for one.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use thermostat_store::{Connector, DocumentStore, StoreError};

use crate::sink::Diagnostics;

/// Whether the store is currently usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Writes are dropped and reads return nothing.
    Disconnected,
    /// Writes and reads go to the store.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Owns the store connection and its connected/disconnected state.
pub struct ConnectionSupervisor {
    connector: Arc<dyn Connector>,
    handle: Mutex<Option<Arc<dyn DocumentStore>>>,
    connected: AtomicBool,
    timeout: Duration,
    diagnostics: Diagnostics,
}

impl fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("target", &self.connector.describe())
            .field("state", &self.state())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ConnectionSupervisor {
    /// Create a supervisor in the disconnected state.
    ///
    /// `timeout` bounds connect plus ping and every later store call made
    /// through [`call`](Self::call), but only at await points. See `call`.
    pub fn new(connector: Arc<dyn Connector>, timeout: Duration, diagnostics: Diagnostics) -> Self {
        Self {
            connector,
            handle: Mutex::new(None),
            connected: AtomicBool::new(false),
            timeout,
            diagnostics,
        }
    }

    /// Open a fresh connection and probe it.
    ///
    /// Any previous handle is released first. Failures are traced and
    /// leave the supervisor disconnected; they never propagate. Returns
    /// whether the supervisor is now connected.
    pub async fn connect(&self) -> bool {
        let mut handle = self.handle.lock().await;
        self.connected.store(false, Ordering::SeqCst);

        if let Some(old) = handle.take()
            && let Err(e) = old.close().await
        {
            warn!(target: "thermostat_db", "Failed to release previous store handle: {}", e);
        }

        let target = self.connector.describe();
        match tokio::time::timeout(self.timeout, self.open()).await {
            Ok(Ok(opened)) => {
                *handle = Some(opened);
                self.connected.store(true, Ordering::SeqCst);
                self.diagnostics.emit(format_args!("Connected to {}", target));
                true
            }
            Ok(Err(e)) => {
                self.diagnostics
                    .emit(format_args!("Connection to {} failed: {}", target, e));
                false
            }
            Err(_) => {
                self.diagnostics.emit(format_args!(
                    "Connection to {} timed out after {:?}",
                    target, self.timeout
                ));
                false
            }
        }
    }

    async fn open(&self) -> Result<Arc<dyn DocumentStore>, StoreError> {
        let handle = self.connector.connect().await?;
        handle.ping().await?;
        Ok(handle)
    }

    /// Cheap read of the connected flag.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ConnectionState {
        if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// The current handle, if connected.
    pub async fn handle(&self) -> Option<Arc<dyn DocumentStore>> {
        let handle = self.handle.lock().await;
        if self.is_connected() {
            handle.clone()
        } else {
            None
        }
    }

    /// Run one store call with the supervisor's timeout.
    ///
    /// The timeout fires only when `fut` yields. A backend that does its work
    /// synchronously inside the future, like SQLite, is not interrupted; its
    /// calls are bounded by the backend's own busy timeout instead.
    pub async fn call<T, F>(&self, operation: &str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                operation: operation.to_string(),
            }),
        }
    }

    /// Record that the store stopped answering.
    pub fn mark_disconnected(&self, reason: impl fmt::Display) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.diagnostics.emit(format_args!(
                "Disconnected from {}: {}",
                self.connector.describe(),
                reason
            ));
        }
    }

    /// Release the handle and go to the disconnected state.
    pub async fn disconnect(&self) {
        let mut handle = self.handle.lock().await;
        self.connected.store(false, Ordering::SeqCst);
        if let Some(old) = handle.take() {
            if let Err(e) = old.close().await {
                warn!(target: "thermostat_db", "Failed to close store handle: {}", e);
            }
            self.diagnostics
                .emit(format_args!("Closed connection to {}", self.connector.describe()));
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn target(&self) -> String {
        self.connector.describe()
    }
}
