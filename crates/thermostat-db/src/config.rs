//! Configuration.
//!
//! A TOML file with three sections and a debug toggle:
//!
//! ```toml
//! debug = false
//!
//! [store]
//! connection_string = "sqlite:///var/lib/thermostat"
//! database = "ThermostatDB"
//! collection = "History"
//! connect_timeout_ms = 2000
//!
//! [queue]
//! capacity = 1000
//! dequeue_timeout_ms = 1000
//!
//! [worker]
//! shutdown_timeout_ms = 2000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thermostat_store::{SqliteConnector, StoreError};

/// Largest accepted queue capacity.
pub const MAX_QUEUE_CAPACITY: usize = 1_000_000;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Send trace lines to the debug sink.
    pub debug: bool,
    /// Store settings.
    pub store: StoreConfig,
    /// Queue settings.
    pub queue: QueueConfig,
    /// Worker settings.
    pub worker: WorkerConfig,
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// A missing file yields the defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return every problem found.
    ///
    /// # Example
    ///
    /// ```
    /// use thermostat_db::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.store.validate());
        errors.extend(self.queue.validate());
        errors.extend(self.worker.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Build the store connector described by `[store]`.
    pub fn build_connector(&self) -> Result<SqliteConnector, ConfigError> {
        SqliteConnector::new(
            &self.store.connection_string,
            &self.store.database,
            &self.store.collection,
            self.store.connect_timeout(),
        )
        .map_err(ConfigError::Connector)
    }
}

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// `sqlite://<dir>` or `sqlite::memory:`.
    pub connection_string: String,
    /// Database name.
    pub database: String,
    /// Collection name.
    pub collection: String,
    /// Bound on connect plus ping, in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            connection_string: format!(
                "sqlite://{}",
                thermostat_store::default_data_dir().display()
            ),
            database: "ThermostatDB".to_string(),
            collection: "History".to_string(),
            connect_timeout_ms: 2000,
        }
    }
}

impl StoreConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Validate store configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.connection_string.trim().is_empty() {
            errors.push(ValidationError {
                field: "store.connection_string".to_string(),
                message: "connection string cannot be empty".to_string(),
            });
        }
        if self.database.is_empty() || self.database.contains(['/', '\\']) {
            errors.push(ValidationError {
                field: "store.database".to_string(),
                message: format!("'{}' is not a valid database name", self.database),
            });
        }
        if !is_identifier(&self.collection) {
            errors.push(ValidationError {
                field: "store.collection".to_string(),
                message: format!(
                    "'{}' must start with a letter or underscore and contain only letters, digits and underscores",
                    self.collection
                ),
            });
        }
        if !(100..=60_000).contains(&self.connect_timeout_ms) {
            errors.push(ValidationError {
                field: "store.connect_timeout_ms".to_string(),
                message: format!(
                    "connect timeout must be between 100 and 60000 ms, got {}",
                    self.connect_timeout_ms
                ),
            });
        }

        errors
    }
}

/// Queue configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of records waiting for the worker.
    pub capacity: usize,
    /// How long the worker waits for a record before re-checking shutdown.
    pub dequeue_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            dequeue_timeout_ms: 1000,
        }
    }
}

impl QueueConfig {
    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    /// Validate queue configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !(1..=MAX_QUEUE_CAPACITY).contains(&self.capacity) {
            errors.push(ValidationError {
                field: "queue.capacity".to_string(),
                message: format!(
                    "capacity must be between 1 and {}, got {}",
                    MAX_QUEUE_CAPACITY, self.capacity
                ),
            });
        }
        if !(10..=60_000).contains(&self.dequeue_timeout_ms) {
            errors.push(ValidationError {
                field: "queue.dequeue_timeout_ms".to_string(),
                message: format!(
                    "dequeue timeout must be between 10 and 60000 ms, got {}",
                    self.dequeue_timeout_ms
                ),
            });
        }

        errors
    }
}

/// Worker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Bound on joining the worker during close.
    pub shutdown_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_ms: 2000,
        }
    }
}

impl WorkerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Validate worker configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !(10..=60_000).contains(&self.shutdown_timeout_ms) {
            errors.push(ValidationError {
                field: "worker.shutdown_timeout_ms".to_string(),
                message: format!(
                    "shutdown timeout must be between 10 and 60000 ms, got {}",
                    self.shutdown_timeout_ms
                ),
            });
        }

        errors
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
    #[error("Invalid store settings: {0}")]
    Connector(#[source] StoreError),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path (e.g., `queue.capacity`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("thermostat")
        .join("db.toml")
}
