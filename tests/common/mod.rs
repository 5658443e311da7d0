#![allow(dead_code)]

pub mod fault_injection;
pub mod tracing_capture;

use orderflow::event_log::{InMemoryEventLog, LogRecord};
use orderflow::runtime::{ShutdownSignal, StatusTracker, TrackerMetrics, TrackerOptions};
use orderflow::stores::in_memory::InMemoryStateStore;
use orderflow::stores::sqlite::SqliteStateStore;
use orderflow::stores::{NewOrder, StateStore, StoreOptions};
use orderflow::{OrderStatus, StatusCodes};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub const STATUS_TOPIC: &str = "pizza-status";
pub const GROUP: &str = "status-tracker";

pub async fn memory_store(options: StoreOptions) -> Arc<dyn StateStore> {
    let store = Arc::new(InMemoryStateStore::initialized(options));
    store as Arc<dyn StateStore>
}

/// File-backed SQLite store with every table created. Keep the `TempDir` alive.
pub async fn create_sqlite_store_disk(options: StoreOptions) -> (Arc<dyn StateStore>, TempDir) {
    let td = tempfile::tempdir().unwrap();
    let db_url = format!("sqlite:{}", td.path().join("orders.db").display());
    let store = SqliteStateStore::new(&db_url, options).await.unwrap();
    store.create_order_table().await.unwrap();
    store.create_customer_table().await.unwrap();
    store.create_status_table().await.unwrap();
    (Arc::new(store) as Arc<dyn StateStore>, td)
}

/// Insert an order and record `status` for it, including its working-set entry.
pub async fn seed_order(store: &dyn StateStore, order_id: &str, status: OrderStatus) {
    store
        .add_order(NewOrder::new(order_id).with_customer("cust-1"))
        .await
        .unwrap();
    assert!(store.apply_status_transition(order_id, status).await.unwrap());
}

pub fn tracker_with(store: Arc<dyn StateStore>, options: TrackerOptions) -> (StatusTracker, Arc<TrackerMetrics>, ShutdownSignal) {
    let metrics = Arc::new(TrackerMetrics::new());
    let shutdown = ShutdownSignal::new();
    let tracker = StatusTracker::new(store, StatusCodes::default(), options, metrics.clone(), shutdown.clone());
    (tracker, metrics, shutdown)
}

pub fn fast_tracker_options() -> TrackerOptions {
    TrackerOptions {
        poll_timeout: Duration::from_millis(20),
        max_store_backoff: Duration::from_millis(40),
        ..TrackerOptions::default()
    }
}

/// A record as it would arrive from the status topic.
pub fn record(order_id: Option<&str>, payload: &[u8]) -> LogRecord {
    LogRecord {
        topic: STATUS_TOPIC.to_string(),
        partition: 0,
        offset: 0,
        key: order_id.map(|k| k.as_bytes().to_vec()),
        payload: Some(payload.to_vec()),
        timestamp: None,
    }
}

pub fn status_payload(status: OrderStatus) -> Vec<u8> {
    let code = StatusCodes::default().code_of(status);
    serde_json::json!({"status": code, "timestamp": 1_700_000_000_000_i64})
        .to_string()
        .into_bytes()
}

pub fn publish(log: &InMemoryEventLog, order_id: &str, status: OrderStatus) {
    let code = StatusCodes::default().code_of(status);
    log.produce_json(
        STATUS_TOPIC,
        order_id,
        &serde_json::json!({"status": code, "timestamp": chrono::Utc::now().timestamp_millis()}),
    );
}

/// Poll `check` until it returns true or `timeout_ms` elapses.
pub async fn wait_until<F, Fut>(timeout_ms: u64, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if check().await {
            return true;
        }
        if Instant::now() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn status_of(store: &dyn StateStore, order_id: &str) -> Option<OrderStatus> {
    store.get_order_id(order_id).await.unwrap().map(|o| o.status)
}
