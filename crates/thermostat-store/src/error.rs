//! Error types for thermostat-store.

use std::path::PathBuf;

/// Result type for thermostat-store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors a document store can report.
///
/// | Variant | Meaning |
/// |---------|---------|
/// | [`StoreError::Connectivity`] | Store unreachable or handle unusable |
/// | [`StoreError::Timeout`] | Store did not answer in time |
/// | [`StoreError::Closed`] | Handle was closed locally |
/// | [`StoreError::Rejected`] | Store is reachable but refused the write |
/// | [`StoreError::Protocol`] | Unexpected response or internal failure |
/// | [`StoreError::InvalidQuery`] | Caller asked for something the store cannot express |
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Store is unreachable.
    #[error("Store unreachable: {0}")]
    Connectivity(String),

    /// Store did not respond within the allotted time.
    #[error("Store operation '{operation}' timed out")]
    Timeout { operation: String },

    /// The handle was closed.
    #[error("Store handle is closed")]
    Closed,

    /// Write refused while connected.
    #[error("Write rejected: {0}")]
    Rejected(String),

    /// Protocol-level failure.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Unsupported field or collection name.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Failed to create the database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Document (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether the error means the connection itself is unusable.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            StoreError::Connectivity(_)
                | StoreError::Timeout { .. }
                | StoreError::Closed
                | StoreError::CreateDirectory { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_classification() {
        assert!(StoreError::Connectivity("down".into()).is_connectivity());
        assert!(
            StoreError::Timeout {
                operation: "ping".into()
            }
            .is_connectivity()
        );
        assert!(StoreError::Closed.is_connectivity());
        assert!(!StoreError::Rejected("duplicate".into()).is_connectivity());
        assert!(!StoreError::InvalidQuery("bad field".into()).is_connectivity());
    }
}
