//! Error types for parsing thermostat records.

use thiserror::Error;

/// Errors that can occur when converting between records, documents and
/// their textual forms.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// Unknown HVAC state name.
    #[error("Invalid HVAC state '{0}': expected off, heat or cool")]
    InvalidState(String),

    /// Unknown event type name.
    #[error("Invalid event type '{0}': expected periodic, state_change or setpoint_change")]
    InvalidEventType(String),

    /// A document that is neither a state nor an event record.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
}

/// Result type alias using thermostat-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
