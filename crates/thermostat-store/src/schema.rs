//! Database schema and migrations for the SQLite backend.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database-wide schema.
pub fn initialize(conn: &Connection) -> Result<()> {
    let version = get_schema_version(conn)?;

    if version == 0 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );",
        )?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if version > SCHEMA_VERSION {
        return Err(StoreError::Protocol(format!(
            "database schema version {} is newer than supported version {}",
            version, SCHEMA_VERSION
        )));
    }

    Ok(())
}

/// Create the table backing a collection if it does not exist.
///
/// The `timestamp` column mirrors the document's `timestamp` field in unix
/// milliseconds so that recency queries and time windows can use an index.
pub fn ensure_collection(conn: &Connection, table: &str) -> Result<()> {
    validate_identifier(table)?;

    conn.execute_batch(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS "{table}" (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER,
            inserted_at INTEGER NOT NULL,
            body TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS "idx_{table}_timestamp" ON "{table}"(timestamp);
        "#
    ))?;

    Ok(())
}

/// Check that a name can be used unescaped as a table or field name.
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(StoreError::InvalidQuery(format!(
            "'{}' is not a valid identifier",
            name
        )))
    }
}

fn get_schema_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 =
        conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))?;

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?)",
        [version],
    )?;
    Ok(())
}
