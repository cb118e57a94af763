//! Record and document types for thermostat history logging.
//!
//! This crate holds the data model shared by the store adapters
//! (thermostat-store) and the buffering layer (thermostat-db):
//!
//! - [`StateRecord`] and [`EventRecord`], the two shapes a control loop logs
//! - [`Document`] and [`Value`], the schemaless form records take in a store
//! - [`Statistics`], the result of a time-windowed temperature aggregation
//!
//! # Example
//!
//! ```
//! use thermostat_types::{EventType, HvacState, Record, StateRecord};
//!
//! let record = StateRecord::new(HvacState::Heat, 68.5, 70, EventType::StateChange);
//! let document = Record::from(record).to_document();
//! assert_eq!(document.get("state").and_then(|v| v.as_str()), Some("heat"));
//! ```

pub mod error;
pub mod records;
pub mod value;

pub use error::{ParseError, ParseResult};
pub use records::{EventRecord, EventType, HvacState, Record, StateRecord, Statistics, keys};
pub use value::{Document, Value};
