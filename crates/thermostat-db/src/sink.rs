//! Debug trace sink.
//!
//! Connect and disconnect transitions, insert outcomes and queue-full drops
//! produce one human-readable line each. Lines always go to `tracing` at
//! debug level. When the debug toggle is on they also go to a [`TraceSink`].
//! Nothing here can fail or affect control flow.

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

/// Receiver for debug trace lines.
pub trait TraceSink: Send + Sync + fmt::Debug {
    /// Accept one line.
    fn trace(&self, line: &str);
}

/// Forwards lines to `tracing` at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn trace(&self, line: &str) {
        info!(target: "thermostat_db", "{}", line);
    }
}

/// Keeps lines in memory.
///
/// # Example
///
/// ```
/// use thermostat_db::{MemorySink, TraceSink};
///
/// let sink = MemorySink::new();
/// sink.trace("Queue full");
/// assert!(sink.contains("queue full"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All lines received so far.
    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Whether any line contains `needle`, ignoring ASCII case.
    pub fn contains(&self, needle: &str) -> bool {
        let needle = needle.to_ascii_lowercase();
        self.lines()
            .iter()
            .any(|line| line.to_ascii_lowercase().contains(&needle))
    }
}

impl TraceSink for MemorySink {
    fn trace(&self, line: &str) {
        let mut lines = match self.lines.lock() {
            Ok(lines) => lines,
            Err(poisoned) => poisoned.into_inner(),
        };
        lines.push(line.to_string());
    }
}

/// The debug toggle together with its sink.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    enabled: bool,
    sink: Arc<dyn TraceSink>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Diagnostics {
    /// Use the [`TracingSink`].
    pub fn new(enabled: bool) -> Self {
        Self::with_sink(enabled, Arc::new(TracingSink))
    }

    pub fn with_sink(enabled: bool, sink: Arc<dyn TraceSink>) -> Self {
        Self { enabled, sink }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Emit one trace line.
    pub fn emit(&self, line: impl fmt::Display) {
        let line = line.to_string();
        debug!(target: "thermostat_db", "{}", line);
        if self.enabled {
            self.sink.trace(&line);
        }
    }
}
