//! Error types for thermostat-db.
//!
//! # Propagation Policy
//!
//! Most of these errors never reach the caller of [`ThermostatDb`](crate::ThermostatDb).
//! They exist so the internals can name what went wrong in traces and stats.
//!
//! | Error | Raised by | What the facade does |
//! |-------|-----------|----------------------|
//! | [`Error::Connectivity`] | connect, ping, any store call | trace, mark disconnected |
//! | [`Error::Write`] | insert while connected | trace, drop record, reconnect |
//! | [`Error::Read`] | history/statistics queries | trace, return empty/absent |
//! | [`Error::QueueFull`] | enqueue | trace, drop record |
//! | [`Error::Closed`] | enqueue after close | drop record |
//! | [`Error::ShutdownTimeout`] | close | trace, abort worker |
//! | [`Error::InvalidArgument`] | log calls | returned to caller |
//! | [`Error::Parse`] | parsing states/event types | returned to caller |
//! | [`Error::Config`] | opening from configuration | returned to caller |

use std::time::Duration;

use thermostat_store::StoreError;
use thermostat_types::ParseError;

use crate::config::ConfigError;

/// Result type for thermostat-db operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in thermostat-db.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The store could not be reached.
    #[error("Connectivity error: {0}")]
    Connectivity(#[source] StoreError),

    /// The store refused a write while connected.
    #[error("Write failed: {0}")]
    Write(#[source] StoreError),

    /// A query or aggregation failed.
    #[error("Read failed: {0}")]
    Read(#[source] StoreError),

    /// The record queue is at capacity.
    #[error("Record queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// The database was closed or its worker is gone.
    #[error("Database is closed")]
    Closed,

    /// The worker did not stop in time.
    #[error("Worker did not stop within {0:?}")]
    ShutdownTimeout(Duration),

    /// Caller passed an argument that can never be valid.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Failed to parse a state or event type.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Invalid or unreadable configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// Classify a failed insert.
    pub(crate) fn from_write(err: StoreError) -> Self {
        if err.is_connectivity() {
            Error::Connectivity(err)
        } else {
            Error::Write(err)
        }
    }

    /// Whether this error is the caller's fault rather than the store's.
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidArgument(_) | Error::Parse(_) | Error::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_classification() {
        let err = Error::from_write(StoreError::Connectivity("down".into()));
        assert!(matches!(err, Error::Connectivity(_)));

        let err = Error::from_write(StoreError::Rejected("schema".into()));
        assert!(matches!(err, Error::Write(_)));
        assert!(!err.is_programmer_error());
    }

    #[test]
    fn test_programmer_errors() {
        assert!(Error::InvalidArgument("nan".into()).is_programmer_error());
        assert!(Error::Parse(ParseError::InvalidState("fan".into())).is_programmer_error());
        assert!(!Error::QueueFull { capacity: 1 }.is_programmer_error());
    }
}
