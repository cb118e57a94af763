//! SQLite-backed document store.
//!
//! Documents are stored as JSON, one table per collection, one database file
//! per database name. The connection string selects where those files live:
//!
//! | Connection string | Target |
//! |-------------------|--------|
//! | `sqlite://<dir>` | `<dir>/<database>.db` |
//! | `sqlite::memory:` | private in-memory database per connection |
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use thermostat_store::{Connector, DocumentStore, SqliteConnector};
//!
//! # async fn example() -> thermostat_store::Result<()> {
//! let connector = SqliteConnector::new(
//!     "sqlite::memory:",
//!     "ThermostatDB",
//!     "History",
//!     Duration::from_secs(2),
//! )?;
//! let store = connector.connect().await?;
//! store.ping().await?;
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{Connection, ErrorCode};
use time::OffsetDateTime;
use tracing::{debug, info};

use thermostat_types::{Document, Value, keys};

use crate::error::{Result, StoreError};
use crate::pipeline::{Comparison, Pipeline, Stage, evaluate_stages};
use crate::schema;
use crate::traits::{Connector, DocumentStore};

const SCHEME: &str = "sqlite://";
const MEMORY: &str = "sqlite::memory:";

/// Where a [`SqliteConnector`] opens its database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteTarget {
    /// A private in-memory database.
    Memory,
    /// A database file.
    File(PathBuf),
}

/// Opens [`SqliteStore`] connections.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    target: SqliteTarget,
    table: String,
    busy_timeout: Duration,
}

impl SqliteConnector {
    /// Parse a connection string and select a database and collection.
    pub fn new(
        connection_string: &str,
        database: &str,
        collection: &str,
        busy_timeout: Duration,
    ) -> Result<Self> {
        schema::validate_identifier(collection)?;

        let target = if connection_string == MEMORY {
            SqliteTarget::Memory
        } else if let Some(dir) = connection_string.strip_prefix(SCHEME) {
            if dir.is_empty() {
                return Err(StoreError::InvalidQuery(
                    "connection string has no directory".to_string(),
                ));
            }
            if database.is_empty() || database.contains(['/', '\\']) {
                return Err(StoreError::InvalidQuery(format!(
                    "'{}' is not a valid database name",
                    database
                )));
            }
            SqliteTarget::File(PathBuf::from(dir).join(format!("{}.db", database)))
        } else {
            return Err(StoreError::InvalidQuery(format!(
                "unsupported connection string '{}': expected '{}<dir>' or '{}'",
                connection_string, SCHEME, MEMORY
            )));
        };

        Ok(Self {
            target,
            table: collection.to_string(),
            busy_timeout,
        })
    }

    /// The database this connector opens.
    pub fn target(&self) -> &SqliteTarget {
        &self.target
    }

    fn open(&self) -> Result<Connection> {
        let conn = match &self.target {
            SqliteTarget::Memory => Connection::open_in_memory().map_err(classify)?,
            SqliteTarget::File(path) => {
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                    && !parent.exists()
                {
                    std::fs::create_dir_all(parent).map_err(|e| StoreError::CreateDirectory {
                        path: parent.to_path_buf(),
                        source: e,
                    })?;
                }
                info!("Opening document store at {}", path.display());
                let conn = Connection::open(path).map_err(classify)?;
                conn.execute_batch(
                    "PRAGMA journal_mode = WAL;
                     PRAGMA synchronous = NORMAL;",
                )
                .map_err(classify)?;
                conn
            }
        };

        conn.busy_timeout(self.busy_timeout).map_err(classify)?;
        schema::initialize(&conn)?;
        schema::ensure_collection(&conn, &self.table)?;
        Ok(conn)
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    async fn connect(&self) -> Result<Arc<dyn DocumentStore>> {
        let conn = self.open()?;
        Ok(Arc::new(SqliteStore {
            conn: Mutex::new(Some(conn)),
            table: self.table.clone(),
        }))
    }

    fn describe(&self) -> String {
        match &self.target {
            SqliteTarget::Memory => format!("{}{}", MEMORY, self.table),
            SqliteTarget::File(path) => format!("{}.{}", path.display(), self.table),
        }
    }
}

/// One open SQLite connection to a collection.
pub struct SqliteStore {
    conn: Mutex<Option<Connection>>,
    table: String,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("table", &self.table)
            .finish()
    }
}

impl SqliteStore {
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self
            .conn
            .lock()
            .map_err(|_| StoreError::Protocol("connection lock poisoned".to_string()))?;
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        f(conn)
    }

    fn load_bodies(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Document>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql).map_err(classify)?;
            let bodies = stmt
                .query_map(params, |row| row.get::<_, String>(0))
                .map_err(classify)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(classify)?;

            // One bad row must not hide the rest of the collection.
            Ok(bodies
                .iter()
                .filter_map(|body| match serde_json::from_str(body) {
                    Ok(doc) => Some(doc),
                    Err(e) => {
                        debug!("Skipping unreadable document: {}", e);
                        None
                    }
                })
                .collect())
        })
    }
}

fn unix_millis(ts: OffsetDateTime) -> i64 {
    (ts.unix_timestamp_nanos() / 1_000_000) as i64
}

/// Map SQLite failures onto the store's error taxonomy.
fn classify(err: rusqlite::Error) -> StoreError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => StoreError::Timeout {
            operation: err.to_string(),
        },
        Some(ErrorCode::CannotOpen) | Some(ErrorCode::SystemIoFailure) => {
            StoreError::Connectivity(err.to_string())
        }
        Some(ErrorCode::ConstraintViolation) | Some(ErrorCode::ReadOnly) => {
            StoreError::Rejected(err.to_string())
        }
        _ => StoreError::Database(err),
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn ping(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(classify)?;
            Ok(())
        })
    }

    async fn insert_one(&self, doc: &Document) -> Result<()> {
        if let Some((key, _)) = doc
            .iter()
            .find(|(_, v)| matches!(v, Value::Float(f) if !f.is_finite()))
        {
            return Err(StoreError::Rejected(format!(
                "field '{}' is not a finite number",
                key
            )));
        }
        let body = serde_json::to_string(doc)?;
        let timestamp = doc
            .get(keys::TIMESTAMP)
            .and_then(Value::as_timestamp)
            .map(unix_millis);
        let inserted_at = unix_millis(OffsetDateTime::now_utc());

        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    r#"INSERT INTO "{}" (timestamp, inserted_at, body) VALUES (?1, ?2, ?3)"#,
                    self.table
                ),
                rusqlite::params![timestamp, inserted_at, body],
            )
            .map_err(classify)?;
            Ok(())
        })
    }

    async fn find_recent_sorted(&self, field: &str, limit: u32) -> Result<Vec<Document>> {
        if field == keys::TIMESTAMP {
            let sql = format!(
                r#"SELECT body FROM "{}" ORDER BY timestamp DESC, id DESC LIMIT ?1"#,
                self.table
            );
            return self.load_bodies(&sql, &[&limit]);
        }

        schema::validate_identifier(field)?;
        let sql = format!(r#"SELECT body FROM "{}" ORDER BY id DESC"#, self.table);
        let mut docs = self.load_bodies(&sql, &[])?;
        let null = Value::Null;
        docs.sort_by(|a, b| {
            let a = a.get(field).unwrap_or(&null);
            let b = b.get(field).unwrap_or(&null);
            b.sort_cmp(a)
        });
        docs.truncate(limit as usize);
        Ok(docs)
    }

    async fn aggregate(&self, pipeline: &Pipeline) -> Result<Vec<Document>> {
        let stages = pipeline.stages();

        // Time windows are pushed down to the indexed timestamp column.
        let pushdown = match stages.first() {
            Some(Stage::Match(filter))
                if filter.field == keys::TIMESTAMP && filter.op != Comparison::Eq =>
            {
                filter
                    .value
                    .as_timestamp()
                    .map(|ts| (filter.op.as_sql(), unix_millis(ts)))
            }
            _ => None,
        };

        let (docs, rest) = match pushdown {
            Some((op, bound)) => {
                debug!("Pushing down timestamp {} {} to SQL", op, bound);
                let sql = format!(
                    r#"SELECT body FROM "{}" WHERE timestamp {} ?1 ORDER BY id"#,
                    self.table, op
                );
                (self.load_bodies(&sql, &[&bound])?, &stages[1..])
            }
            None => {
                let sql = format!(r#"SELECT body FROM "{}" ORDER BY id"#, self.table);
                (self.load_bodies(&sql, &[])?, stages)
            }
        };

        Ok(evaluate_stages(rest, docs))
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| StoreError::Protocol("connection lock poisoned".to_string()))?;
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| classify(e))?;
            debug!("Closed connection to {}", self.table);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Accumulator, Filter, Group};
    use time::Duration as TimeDuration;

    fn memory_connector() -> SqliteConnector {
        SqliteConnector::new(MEMORY, "ThermostatDB", "History", Duration::from_secs(2)).unwrap()
    }

    fn reading(ts: OffsetDateTime, temp: f64) -> Document {
        Document::new()
            .with(keys::TIMESTAMP, ts)
            .with(keys::STATE, "heat")
            .with(keys::TEMPERATURE, temp)
            .with(keys::SETPOINT, 70i64)
            .with(keys::EVENT_TYPE, "periodic")
    }

    #[test]
    fn test_connection_string_parsing() {
        let c = SqliteConnector::new("sqlite:///var/lib/thermo", "ThermostatDB", "History", Duration::from_secs(2))
            .unwrap();
        assert_eq!(
            c.target(),
            &SqliteTarget::File(PathBuf::from("/var/lib/thermo/ThermostatDB.db"))
        );

        assert!(matches!(memory_connector().target(), SqliteTarget::Memory));
        assert!(
            SqliteConnector::new("mongodb://localhost:27017/", "db", "History", Duration::from_secs(2))
                .is_err()
        );
        assert!(SqliteConnector::new(MEMORY, "db", "bad name", Duration::from_secs(2)).is_err());
    }

    #[tokio::test]
    async fn test_insert_and_find_recent() {
        let store = memory_connector().connect().await.unwrap();
        store.ping().await.unwrap();

        let base = OffsetDateTime::now_utc();
        for i in 0..10 {
            store
                .insert_one(&reading(base + TimeDuration::seconds(i), 60.0 + i as f64))
                .await
                .unwrap();
        }

        let recent = store.find_recent_sorted(keys::TIMESTAMP, 3).await.unwrap();
        let temps: Vec<f64> = recent
            .iter()
            .map(|d| d.get(keys::TEMPERATURE).and_then(Value::as_f64).unwrap())
            .collect();
        assert_eq!(temps, vec![69.0, 68.0, 67.0]);
    }

    #[tokio::test]
    async fn test_find_sorted_by_other_field() {
        let store = memory_connector().connect().await.unwrap();
        let now = OffsetDateTime::now_utc();
        for temp in [65.0, 72.0, 68.0] {
            store.insert_one(&reading(now, temp)).await.unwrap();
        }

        let recent = store.find_recent_sorted(keys::TEMPERATURE, 2).await.unwrap();
        assert_eq!(recent[0].get(keys::TEMPERATURE), Some(&Value::Float(72.0)));
        assert_eq!(recent[1].get(keys::TEMPERATURE), Some(&Value::Float(68.0)));

        assert!(matches!(
            store.find_recent_sorted("temp; --", 2).await,
            Err(StoreError::InvalidQuery(_))
        ));
    }

    #[tokio::test]
    async fn test_aggregate_time_window() {
        let store = memory_connector().connect().await.unwrap();
        let now = OffsetDateTime::now_utc();
        store
            .insert_one(&reading(now - TimeDuration::hours(48), 50.0))
            .await
            .unwrap();
        store.insert_one(&reading(now, 66.0)).await.unwrap();
        store.insert_one(&reading(now, 70.0)).await.unwrap();

        let pipeline = Pipeline::new()
            .match_stage(Filter::gte(keys::TIMESTAMP, now - TimeDuration::hours(24)))
            .group(
                Group::all()
                    .accumulate(keys::AVG_TEMP, Accumulator::avg(keys::TEMPERATURE))
                    .accumulate(keys::MIN_TEMP, Accumulator::min(keys::TEMPERATURE))
                    .accumulate(keys::COUNT, Accumulator::count()),
            );

        let out = store.aggregate(&pipeline).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get(keys::AVG_TEMP), Some(&Value::Float(68.0)));
        assert_eq!(out[0].get(keys::MIN_TEMP), Some(&Value::Float(66.0)));
        assert_eq!(out[0].get(keys::COUNT), Some(&Value::Int(2)));
    }

    #[tokio::test]
    async fn test_non_finite_float_rejected() {
        let store = memory_connector().connect().await.unwrap();
        let doc = reading(OffsetDateTime::now_utc(), 70.0).with("reading", f64::NAN);
        assert!(matches!(
            store.insert_one(&doc).await,
            Err(StoreError::Rejected(_))
        ));
        assert!(store.find_recent_sorted(keys::TIMESTAMP, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_rows_are_skipped() {
        let connector = memory_connector();
        let store = SqliteStore {
            conn: Mutex::new(Some(connector.open().unwrap())),
            table: connector.table.clone(),
        };
        let now = OffsetDateTime::now_utc();
        store.insert_one(&reading(now, 66.0)).await.unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    r#"INSERT INTO "History" (timestamp, inserted_at, body) VALUES (?1, ?1, ?2)"#,
                    rusqlite::params![
                        unix_millis(now),
                        r#"{"timestamp":{"type":"float","value":null}}"#
                    ],
                )
                .map_err(classify)
            })
            .unwrap();
        store.insert_one(&reading(now, 70.0)).await.unwrap();

        let docs = store.find_recent_sorted(keys::TIMESTAMP, 10).await.unwrap();
        assert_eq!(docs.len(), 2);

        let pipeline = Pipeline::new()
            .match_stage(Filter::gte(keys::TIMESTAMP, now - TimeDuration::hours(1)))
            .group(Group::all().accumulate(keys::COUNT, Accumulator::count()));
        let out = store.aggregate(&pipeline).await.unwrap();
        assert_eq!(out[0].get(keys::COUNT), Some(&Value::Int(2)));
    }

    #[tokio::test]
    async fn test_closed_handle_fails() {
        let store = memory_connector().connect().await.unwrap();
        store.close().await.unwrap();
        store.close().await.unwrap();
        assert!(matches!(store.ping().await, Err(StoreError::Closed)));
    }

    #[tokio::test]
    async fn test_file_store_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let conn_str = format!("sqlite://{}", dir.path().join("nested").display());
        let connector =
            SqliteConnector::new(&conn_str, "ThermostatDB", "History", Duration::from_secs(2))
                .unwrap();

        {
            let store = connector.connect().await.unwrap();
            store
                .insert_one(&reading(OffsetDateTime::now_utc(), 71.0))
                .await
                .unwrap();
            store.close().await.unwrap();
        }

        let store = connector.connect().await.unwrap();
        let docs = store.find_recent_sorted(keys::TIMESTAMP, 10).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert!(dir.path().join("nested").join("ThermostatDB.db").exists());
    }
}
