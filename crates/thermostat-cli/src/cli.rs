//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use thermostat_types::{EventType, HvacState, Value};

/// Log thermostat history and query it back.
#[derive(Debug, Parser)]
#[command(name = "thermostat-db")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Options shared by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct GlobalArgs {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Store connection string, `sqlite://<dir>` or `sqlite::memory:` (overrides config)
    #[arg(long, global = true)]
    pub connection: Option<String>,

    /// Database name (overrides config)
    #[arg(long, global = true)]
    pub database: Option<String>,

    /// Collection name (overrides config)
    #[arg(long, global = true)]
    pub collection: Option<String>,

    /// Print debug trace lines
    #[arg(long, global = true)]
    pub debug: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    #[command(flatten)]
    Db(DbCommand),

    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Commands that open the store.
#[derive(Debug, Subcommand)]
pub enum DbCommand {
    /// Connect to the store and report whether it answered
    Ping,

    /// Show the most recent records, newest first
    History {
        /// Maximum number of records
        #[arg(short, long, default_value_t = thermostat_db::DEFAULT_HISTORY_LIMIT)]
        limit: u32,
    },

    /// Show temperature statistics for a time window
    Stats {
        /// Window size in hours
        #[arg(long, default_value_t = thermostat_db::DEFAULT_STATISTICS_HOURS)]
        hours: u32,
    },

    /// Log one state sample
    LogState {
        /// HVAC state (off, heat, cool)
        state: HvacState,

        /// Measured temperature
        #[arg(allow_negative_numbers = true)]
        temperature: f64,

        /// Target temperature
        #[arg(allow_negative_numbers = true)]
        setpoint: i32,

        /// Why the sample was logged (periodic, state_change, setpoint_change)
        #[arg(short, long, default_value = "periodic")]
        event_type: EventType,
    },

    /// Log one event
    LogEvent {
        /// Event description
        description: String,

        /// Extra field as key=value, repeatable
        #[arg(short, long = "field", value_parser = parse_field)]
        fields: Vec<(String, Value)>,
    },
}

/// Parse `key=value`, guessing the value type.
///
/// `true`/`false` become booleans, integers and floats become numbers,
/// anything else stays a string.
pub fn parse_field(s: &str) -> Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }

    let value = if let Ok(b) = raw.parse::<bool>() {
        Value::Bool(b)
    } else if let Ok(i) = raw.parse::<i64>() {
        Value::Int(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        Value::Float(f)
    } else {
        Value::String(raw.to_string())
    };
    Ok((key.to_string(), value))
}
