//! thermostat-db command-line front end.
//!
//! Run with: `cargo run -p thermostat-cli -- <command>`

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use thermostat_db::{Config, ThermostatDb, default_config_path};
use thermostat_types::EventRecord;

mod cli;

use cli::{Cli, Command, DbCommand, GlobalArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let Cli { command, global } = Cli::parse();

    let filter = if global.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    // stdout carries the JSON output.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match command {
        Command::InitConfig { force } => init_config(global.config, force),
        Command::Db(command) => run(command, &global).await,
    }
}

async fn run(command: DbCommand, global: &GlobalArgs) -> Result<()> {
    let config = load_config(global)?;
    let db = ThermostatDb::open(config)
        .await
        .context("Failed to open thermostat database")?;

    let output = match command {
        DbCommand::Ping => json!({
            "target": db.target(),
            "state": db.connection_state(),
        }),
        DbCommand::History { limit } => json!(db.recent_history(limit).await),
        DbCommand::Stats { hours } => json!(db.statistics(hours).await),
        DbCommand::LogState {
            state,
            temperature,
            setpoint,
            event_type,
        } => {
            let outcome = db.log_state(state, temperature, setpoint, event_type)?;
            // Wait for the worker so the counters include the write.
            db.close().await;
            json!({ "outcome": outcome, "stats": db.stats() })
        }
        DbCommand::LogEvent {
            description,
            fields,
        } => {
            let event = fields
                .into_iter()
                .fold(EventRecord::new(description), |event, (key, value)| {
                    event.field(key, value)
                });
            let outcome = db.log_event(event)?;
            db.close().await;
            json!({ "outcome": outcome, "stats": db.stats() })
        }
    };

    db.close().await;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn load_config(global: &GlobalArgs) -> Result<Config> {
    let mut config = match &global.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    if let Some(connection) = &global.connection {
        config.store.connection_string = connection.clone();
    }
    if let Some(database) = &global.database {
        config.store.database = database.clone();
    }
    if let Some(collection) = &global.collection {
        config.store.collection = collection.clone();
    }
    if global.debug {
        config.debug = true;
    }

    config.validate()?;
    Ok(config)
}

fn init_config(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = path.unwrap_or_else(default_config_path);
    if path.exists() && !force {
        bail!("{} already exists, pass --force to overwrite", path.display());
    }
    Config::default().save(&path)?;
    println!("{}", json!({ "written": path }));
    Ok(())
}
