//! End-to-end tests for the buffering layer.
//!
//! Most tests run against `MemoryStore`, which can be taken down and brought
//! back to simulate outages. One test runs against a SQLite file store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;
use time::OffsetDateTime;

use thermostat_db::{
    Config, ConnectionState, LogOutcome, MemorySink, QueueConfig, StoreConfig, ThermostatDb,
    WorkerState,
};
use thermostat_store::{Connector, DocumentStore, MemoryStore, StoreError};
use thermostat_types::{
    Document, EventRecord, EventType, HvacState, Record, StateRecord, Value, keys,
};

fn config(capacity: usize) -> Config {
    Config {
        debug: true,
        queue: QueueConfig {
            capacity,
            dequeue_timeout_ms: 50,
        },
        ..Config::default()
    }
}

async fn open(store: &MemoryStore, capacity: usize) -> (ThermostatDb, MemorySink) {
    let sink = MemorySink::new();
    let db = ThermostatDb::with_sink(
        config(capacity),
        Arc::new(store.clone()),
        Arc::new(sink.clone()),
    )
    .await
    .unwrap();
    (db, sink)
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}

fn label(doc: &Document) -> String {
    match doc.get(keys::EVENT).and_then(Value::as_str) {
        Some(event) => event.to_string(),
        None => format!(
            "s{}",
            doc.get(keys::TEMPERATURE).and_then(Value::as_f64).unwrap() as i64
        ),
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_disconnected_logs_never_insert(ops in prop::collection::vec(any::<bool>(), 0..40)) {
        let (outcomes, attempts) = runtime().block_on(async {
            let store = MemoryStore::new();
            store.set_available(false);
            let (db, _) = open(&store, 8).await;

            let mut outcomes = Vec::new();
            for (i, is_state) in ops.iter().enumerate() {
                let outcome = if *is_state {
                    db.log_state(HvacState::Cool, i as f64, 72, EventType::Periodic)
                } else {
                    db.log_event(EventRecord::new(format!("e{}", i)))
                };
                outcomes.push(outcome.unwrap());
            }
            db.close().await;
            (outcomes, store.insert_attempts())
        });

        prop_assert_eq!(attempts, 0);
        prop_assert!(outcomes.iter().all(|o| *o == LogOutcome::Disconnected));
    }

    #[test]
    fn prop_records_reach_store_in_log_order(ops in prop::collection::vec(any::<bool>(), 1..40)) {
        let (expected, stored) = runtime().block_on(async {
            let store = MemoryStore::new();
            let (db, _) = open(&store, 64).await;

            let mut expected = Vec::new();
            for (i, is_state) in ops.iter().enumerate() {
                let outcome = if *is_state {
                    expected.push(format!("s{}", i));
                    db.log_state(HvacState::Heat, i as f64, 70, EventType::Periodic)
                } else {
                    expected.push(format!("e{}", i));
                    db.log_event(EventRecord::new(format!("e{}", i)))
                };
                assert_eq!(outcome.unwrap(), LogOutcome::Queued);
            }
            db.close().await;

            let stored: Vec<String> = store.documents().await.iter().map(label).collect();
            (expected, stored)
        });

        prop_assert_eq!(expected, stored);
    }
}

#[tokio::test]
async fn test_connected_enqueue_always_succeeds() {
    let store = MemoryStore::new();
    let (db, _) = open(&store, 1000).await;
    assert_eq!(db.connection_state(), ConnectionState::Connected);

    for i in 0..200 {
        let outcome = db
            .log_state(HvacState::Off, 60.0 + f64::from(i % 10), 65, EventType::Periodic)
            .unwrap();
        assert_eq!(outcome, LogOutcome::Queued);
    }
    db.close().await;

    let stats = db.stats();
    assert_eq!(stats.queued, 200);
    assert_eq!(stats.inserted, 200);
    assert_eq!(stats.dropped(), 0);
}

#[tokio::test]
async fn test_state_change_scenario() {
    let store = MemoryStore::new();
    let (db, _) = open(&store, 16).await;

    let before = OffsetDateTime::now_utc();
    db.log_state(HvacState::Heat, 68.5, 70, EventType::StateChange)
        .unwrap();
    db.close().await;

    let docs = store.documents().await;
    assert_eq!(docs.len(), 1);
    let doc = &docs[0];
    assert_eq!(doc.len(), 5);
    assert_eq!(doc.get(keys::STATE), Some(&Value::from("heat")));
    assert_eq!(doc.get(keys::TEMPERATURE), Some(&Value::Float(68.5)));
    assert_eq!(doc.get(keys::SETPOINT), Some(&Value::Int(70)));
    assert_eq!(doc.get(keys::EVENT_TYPE), Some(&Value::from("state_change")));
    let ts = doc.get(keys::TIMESTAMP).and_then(Value::as_timestamp).unwrap();
    assert!(ts >= before);
}

#[tokio::test]
async fn test_full_queue_drops_newest() {
    let store = MemoryStore::new();
    store.set_insert_latency(Duration::from_millis(200));
    let (db, sink) = open(&store, 1).await;

    // The worker takes the first record and sits in the insert.
    assert!(db.log_event(EventRecord::new("first")).unwrap().is_queued());
    wait_for(|| store.inserts_in_flight() > 0).await;

    assert!(db.log_event(EventRecord::new("second")).unwrap().is_queued());
    let started = std::time::Instant::now();
    let outcome = db.log_event(EventRecord::new("third")).unwrap();
    assert!(started.elapsed() < Duration::from_millis(50));
    assert_eq!(outcome, LogOutcome::QueueFull);
    assert!(sink.contains("queue full"));

    db.close().await;
    let stored: Vec<String> = store.documents().await.iter().map(label).collect();
    assert_eq!(stored, vec!["first", "second"]);
    assert_eq!(db.stats().dropped_queue_full, 1);
}

#[tokio::test]
async fn test_write_failure_then_recovery() {
    let store = MemoryStore::new();
    let (db, sink) = open(&store, 16).await;
    assert!(db.is_connected());

    store.set_available(false);
    // The facade has not noticed yet, so the record is queued and fails in the worker.
    assert!(db.log_event(EventRecord::new("lost")).unwrap().is_queued());
    wait_for(|| !db.is_connected()).await;
    assert_eq!(db.connection_state(), ConnectionState::Disconnected);
    assert!(sink.contains("insert of event record failed"));

    assert_eq!(
        db.log_event(EventRecord::new("dropped")).unwrap(),
        LogOutcome::Disconnected
    );

    store.set_available(true);
    assert!(db.reconnect().await);
    assert_eq!(db.connection_state(), ConnectionState::Connected);

    assert!(db.log_event(EventRecord::new("kept")).unwrap().is_queued());
    db.close().await;

    let stored: Vec<String> = store.documents().await.iter().map(label).collect();
    assert_eq!(stored, vec!["kept"]);

    let stats = db.stats();
    assert_eq!(stats.failed_inserts, 1);
    assert_eq!(stats.dropped_disconnected, 1);
    assert_eq!(stats.inserted, 1);
    assert_eq!(stats.reconnect_attempts, 2);
}

#[tokio::test]
async fn test_close_twice() {
    let store = MemoryStore::new();
    let (db, sink) = open(&store, 16).await;

    db.close().await;
    assert_eq!(db.worker_state().await, WorkerState::Finished);
    db.close().await;
    assert_eq!(db.worker_state().await, WorkerState::Finished);
    assert!(db.is_closed());

    let closes = sink
        .lines()
        .iter()
        .filter(|l| l.starts_with("Closed connection"))
        .count();
    assert_eq!(closes, 1);
}

#[tokio::test]
async fn test_statistics_absent_when_store_down() {
    let store = MemoryStore::new();
    store
        .seed([Record::from(StateRecord::new(HvacState::Heat, 68.0, 70, EventType::Periodic))
            .to_document()])
        .await;
    let (db, _) = open(&store, 16).await;
    assert!(db.statistics(24).await.is_some());

    store.set_available(false);
    assert!(db.statistics(24).await.is_none());
    db.close().await;

    let (db, _) = open(&store, 16).await;
    assert_eq!(db.connection_state(), ConnectionState::Disconnected);
    assert!(db.statistics(24).await.is_none());
    assert!(db.recent_history(5).await.is_empty());
    db.close().await;
}

#[tokio::test]
async fn test_history_after_reconnect() {
    let store = MemoryStore::new();
    let base = OffsetDateTime::now_utc() - time::Duration::hours(1);
    // Seeded out of order so the result order comes from the sort.
    let docs = [3, 7, 0, 9, 5, 1, 8, 2, 6, 4].map(|minute| {
        Record::from(StateRecord {
            timestamp: base + time::Duration::minutes(minute),
            state: HvacState::Heat,
            temperature: minute as f64,
            setpoint: 70,
            event_type: EventType::Periodic,
        })
        .to_document()
    });
    store.seed(docs).await;

    store.set_available(false);
    let (db, _) = open(&store, 16).await;
    assert!(db.recent_history(5).await.is_empty());

    store.set_available(true);
    assert!(db.reconnect().await);

    let history = db.recent_history(5).await;
    let temperatures: Vec<f64> = history
        .iter()
        .map(|record| match record {
            Record::State(state) => state.temperature,
            Record::Event(_) => panic!("unexpected event"),
        })
        .collect();
    assert_eq!(temperatures, vec![9.0, 8.0, 7.0, 6.0, 5.0]);
    assert!(history.windows(2).all(|w| w[0].timestamp() > w[1].timestamp()));
    db.close().await;
}

#[tokio::test]
async fn test_drop_without_close_drains_queue() {
    let store = MemoryStore::new();
    let (db, _) = open(&store, 16).await;
    for i in 0..3 {
        db.log_event(EventRecord::new(format!("e{}", i))).unwrap();
    }
    drop(db);

    for _ in 0..200 {
        if store.documents().await.len() == 3 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("queued records were not written after drop");
}

#[derive(Debug)]
struct HangingConnector;

#[async_trait]
impl Connector for HangingConnector {
    async fn connect(&self) -> thermostat_store::Result<Arc<dyn DocumentStore>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(StoreError::Connectivity("never answers".to_string()))
    }

    fn describe(&self) -> String {
        "hanging".to_string()
    }
}

#[tokio::test]
async fn test_connect_timeout_starts_disconnected() {
    let mut config = config(16);
    config.store.connect_timeout_ms = 100;
    let sink = MemorySink::new();

    let started = std::time::Instant::now();
    let db = ThermostatDb::with_sink(config, Arc::new(HangingConnector), Arc::new(sink.clone()))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(db.connection_state(), ConnectionState::Disconnected);
    assert!(sink.contains("timed out"));

    assert_eq!(
        db.log_state(HvacState::Off, 70.0, 70, EventType::Periodic)
            .unwrap(),
        LogOutcome::Disconnected
    );
    db.close().await;
}

fn sqlite_config(dir: &tempfile::TempDir) -> Config {
    Config {
        store: StoreConfig {
            connection_string: format!("sqlite://{}", dir.path().display()),
            ..StoreConfig::default()
        },
        ..Config::default()
    }
}

#[tokio::test]
async fn test_sqlite_file_store_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let config = sqlite_config(&dir);

    let db = ThermostatDb::open(config.clone()).await.unwrap();
    assert!(db.is_connected());
    db.log_state(HvacState::Heat, 66.0, 70, EventType::Periodic)
        .unwrap();
    db.log_state(HvacState::Heat, 70.0, 70, EventType::SetpointChange)
        .unwrap();
    db.log_event(EventRecord::new("window opened").field("room", "kitchen"))
        .unwrap();
    db.close().await;
    assert!(dir.path().join("ThermostatDB.db").exists());

    let db = ThermostatDb::open(config).await.unwrap();
    let history = db.recent_history(10).await;
    assert_eq!(history.len(), 3);

    let stats = db.statistics(24).await.unwrap();
    assert_eq!(stats.count, 3);
    assert_eq!(stats.avg_temp, Some(68.0));
    assert_eq!(stats.min_temp, Some(66.0));
    assert_eq!(stats.max_temp, Some(70.0));
    db.close().await;
}

#[tokio::test]
async fn test_sqlite_history_survives_non_finite_event_field() {
    let dir = tempfile::tempdir().unwrap();
    let config = sqlite_config(&dir);

    let db = ThermostatDb::open(config.clone()).await.unwrap();
    db.log_state(HvacState::Heat, 68.0, 70, EventType::Periodic)
        .unwrap();
    assert!(
        db.log_event(EventRecord::new("sensor glitch").field("reading", f64::NAN))
            .is_err()
    );
    db.log_event(EventRecord::new("sensor glitch").field("reading", "nan"))
        .unwrap();
    db.close().await;

    let db = ThermostatDb::open(config).await.unwrap();
    let history = db.recent_history(10).await;
    assert_eq!(history.len(), 2);

    let stats = db.statistics(24).await.unwrap();
    assert_eq!(stats.avg_temp, Some(68.0));
    db.close().await;
}

#[tokio::test]
async fn test_sqlite_event_with_state_field_in_history() {
    let dir = tempfile::tempdir().unwrap();
    let config = sqlite_config(&dir);

    let db = ThermostatDb::open(config.clone()).await.unwrap();
    db.log_event(EventRecord::new("mode changed").field("state", "heat"))
        .unwrap();
    db.close().await;

    let db = ThermostatDb::open(config).await.unwrap();
    let history = db.recent_history(10).await;
    assert_eq!(history.len(), 1);
    match &history[0] {
        Record::Event(event) => {
            assert_eq!(event.description, "mode changed");
            assert_eq!(event.fields.get("state"), Some(&Value::from("heat")));
        }
        other => panic!("expected event record, got {:?}", other),
    }
    db.close().await;
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let mut config = Config::default();
    config.queue.capacity = 0;
    let err = ThermostatDb::open(config).await.unwrap_err();
    assert!(err.is_programmer_error());
}
