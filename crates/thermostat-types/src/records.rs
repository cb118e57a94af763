//! Thermostat records and aggregation results.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{ParseError, ParseResult};
use crate::value::{Document, Value};

/// Field names used in stored documents.
pub mod keys {
    /// When the record was produced.
    pub const TIMESTAMP: &str = "timestamp";
    /// HVAC state of a state record.
    pub const STATE: &str = "state";
    /// Measured temperature of a state record.
    pub const TEMPERATURE: &str = "temperature";
    /// Target temperature of a state record.
    pub const SETPOINT: &str = "setpoint";
    /// Why a state record was logged.
    pub const EVENT_TYPE: &str = "event_type";
    /// Description of an event record.
    pub const EVENT: &str = "event";
    /// Average temperature in a statistics result.
    pub const AVG_TEMP: &str = "avg_temp";
    /// Minimum temperature in a statistics result.
    pub const MIN_TEMP: &str = "min_temp";
    /// Maximum temperature in a statistics result.
    pub const MAX_TEMP: &str = "max_temp";
    /// Number of documents in a statistics result.
    pub const COUNT: &str = "count";
}

/// HVAC operating state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HvacState {
    /// Neither heating nor cooling.
    Off,
    /// Heating.
    Heat,
    /// Cooling.
    Cool,
}

impl HvacState {
    /// Name used in stored documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            HvacState::Off => "off",
            HvacState::Heat => "heat",
            HvacState::Cool => "cool",
        }
    }
}

impl fmt::Display for HvacState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HvacState {
    type Err = ParseError;

    fn from_str(s: &str) -> ParseResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(HvacState::Off),
            "heat" => Ok(HvacState::Heat),
            "cool" => Ok(HvacState::Cool),
            _ => Err(ParseError::InvalidState(s.to_string())),
        }
    }
}

/// Reason a state record was logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Regular sample taken on a timer.
    #[default]
    Periodic,
    /// The HVAC state changed.
    StateChange,
    /// The setpoint was changed.
    SetpointChange,
}

impl EventType {
    /// Name used in stored documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Periodic => "periodic",
            EventType::StateChange => "state_change",
            EventType::SetpointChange => "setpoint_change",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ParseError;

    fn from_str(s: &str) -> ParseResult<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "periodic" => Ok(EventType::Periodic),
            "state_change" => Ok(EventType::StateChange),
            "setpoint_change" => Ok(EventType::SetpointChange),
            _ => Err(ParseError::InvalidEventType(s.to_string())),
        }
    }
}

/// A sample of the thermostat's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// When the sample was taken.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// HVAC state.
    pub state: HvacState,
    /// Measured temperature.
    pub temperature: f64,
    /// Target temperature.
    pub setpoint: i32,
    /// Why the sample was logged.
    pub event_type: EventType,
}

impl StateRecord {
    /// Create a state record stamped with the current time.
    pub fn new(state: HvacState, temperature: f64, setpoint: i32, event_type: EventType) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc(),
            state,
            temperature,
            setpoint,
            event_type,
        }
    }
}

/// A free-form event with optional extra fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// When the event happened.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Human-readable description.
    pub description: String,
    /// Extra key/value pairs stored alongside the description.
    pub fields: BTreeMap<String, Value>,
}

impl EventRecord {
    /// Create an event record stamped with the current time.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc(),
            description: description.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Attach an extra field.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Any record the control loop can log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    /// State sample.
    State(StateRecord),
    /// Free-form event.
    Event(EventRecord),
}

impl Record {
    /// When the record was produced.
    pub fn timestamp(&self) -> OffsetDateTime {
        match self {
            Record::State(r) => r.timestamp,
            Record::Event(r) => r.timestamp,
        }
    }

    /// Convert to the document shape written to a store.
    ///
    /// Event fields named `timestamp` or `event` are dropped; the record's
    /// own values always win.
    pub fn to_document(&self) -> Document {
        match self {
            Record::State(r) => Document::new()
                .with(keys::TIMESTAMP, r.timestamp)
                .with(keys::STATE, r.state.as_str())
                .with(keys::TEMPERATURE, r.temperature)
                .with(keys::SETPOINT, r.setpoint)
                .with(keys::EVENT_TYPE, r.event_type.as_str()),
            Record::Event(r) => {
                let mut doc: Document = r
                    .fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                doc.insert(keys::TIMESTAMP, r.timestamp);
                doc.insert(keys::EVENT, r.description.as_str());
                doc
            }
        }
    }

    /// Rebuild a record from a stored document.
    ///
    /// A document with an `event` key is an event record whatever its other
    /// fields; otherwise a `state` key makes it a state record.
    pub fn from_document(doc: &Document) -> ParseResult<Self> {
        let timestamp = doc
            .get(keys::TIMESTAMP)
            .and_then(Value::as_timestamp)
            .ok_or_else(|| ParseError::InvalidDocument("missing timestamp".to_string()))?;

        if let Some(description) = doc.get(keys::EVENT).and_then(Value::as_str) {
            let fields = doc
                .iter()
                .filter(|(k, _)| k.as_str() != keys::TIMESTAMP && k.as_str() != keys::EVENT)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            return Ok(Record::Event(EventRecord {
                timestamp,
                description: description.to_string(),
                fields,
            }));
        }

        if let Some(state) = doc.get(keys::STATE).and_then(Value::as_str) {
            let temperature = doc
                .get(keys::TEMPERATURE)
                .and_then(Value::as_f64)
                .ok_or_else(|| ParseError::InvalidDocument("missing temperature".to_string()))?;
            let setpoint = doc
                .get(keys::SETPOINT)
                .and_then(Value::as_i64)
                .and_then(|v| i32::try_from(v).ok())
                .ok_or_else(|| ParseError::InvalidDocument("missing setpoint".to_string()))?;
            let event_type = match doc.get(keys::EVENT_TYPE).and_then(Value::as_str) {
                Some(s) => s.parse()?,
                None => EventType::default(),
            };

            return Ok(Record::State(StateRecord {
                timestamp,
                state: state.parse()?,
                temperature,
                setpoint,
                event_type,
            }));
        }

        Err(ParseError::InvalidDocument(
            "neither a state nor an event record".to_string(),
        ))
    }
}

impl From<StateRecord> for Record {
    fn from(r: StateRecord) -> Self {
        Record::State(r)
    }
}

impl From<EventRecord> for Record {
    fn from(r: EventRecord) -> Self {
        Record::Event(r)
    }
}

/// Temperature statistics over a time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    /// Mean temperature, if any document carried one.
    pub avg_temp: Option<f64>,
    /// Lowest temperature.
    pub min_temp: Option<f64>,
    /// Highest temperature.
    pub max_temp: Option<f64>,
    /// Number of documents in the window.
    pub count: u64,
}

impl Statistics {
    /// Read statistics from an aggregation result document.
    pub fn from_document(doc: &Document) -> ParseResult<Self> {
        let count = doc
            .get(keys::COUNT)
            .and_then(Value::as_i64)
            .and_then(|v| u64::try_from(v).ok())
            .ok_or_else(|| ParseError::InvalidDocument("missing count".to_string()))?;

        Ok(Self {
            avg_temp: doc.get(keys::AVG_TEMP).and_then(Value::as_f64),
            min_temp: doc.get(keys::MIN_TEMP).and_then(Value::as_f64),
            max_temp: doc.get(keys::MAX_TEMP).and_then(Value::as_f64),
            count,
        })
    }
}
