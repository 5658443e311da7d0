//! State store abstraction: the `orders` table, the `customers` links and the
//! `status_events` working set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::OrderStatus;

pub mod error;
pub mod in_memory;
pub mod registry;
pub mod sqlite;

pub use error::StoreError;
pub use registry::{StoreFactoryFn, StoreRegistry, StoreRegistryBuilder};

/// Authoritative state of one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub customer_id: Option<String>,
    pub order_details: serde_json::Value,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Order as handed over by the ordering stage.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub order_id: String,
    pub customer_id: Option<String>,
    pub order_details: serde_json::Value,
    pub status: OrderStatus,
}

impl NewOrder {
    pub fn new(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            customer_id: None,
            order_details: serde_json::Value::Object(Default::default()),
            status: OrderStatus::Ordered,
        }
    }

    pub fn with_customer(mut self, customer_id: impl Into<String>) -> Self {
        self.customer_id = Some(customer_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.order_details = details;
        self
    }

    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = status;
        self
    }
}

/// Working-set entry for an in-flight order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub status: OrderStatus,
    /// Start of the current in-flight episode. Never moved by later upserts.
    pub first_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Logical tables held by a state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Orders,
    Customers,
    StatusEvents,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Orders => "orders",
            Table::Customers => "customers",
            Table::StatusEvents => "status_events",
        }
    }

    /// Columns usable with `delete_past_timestamp`.
    pub fn timestamp_fields(&self) -> &'static [&'static str] {
        match self {
            Table::Orders => &["created_at", "updated_at"],
            Table::Customers => &["created_at"],
            Table::StatusEvents => &["first_seen_at", "updated_at"],
        }
    }

    pub fn default_timestamp_field(&self) -> &'static str {
        match self {
            Table::Orders | Table::Customers => "created_at",
            Table::StatusEvents => "first_seen_at",
        }
    }

    pub(crate) fn check_timestamp_field(&self, field: &str) -> Result<(), StoreError> {
        if self.timestamp_fields().contains(&field) {
            Ok(())
        } else {
            Err(StoreError::permanent(
                "delete_past_timestamp",
                format!("'{field}' is not a timestamp column of {}", self.name()),
            ))
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Backend-independent store options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Minimum working-set age reported by `check_status_stuck`.
    pub stuck_after: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            stuck_after: Duration::from_secs(60 * 60),
        }
    }
}

/// Persistence contract shared by every backend.
///
/// The status tracker and the liveness watchdog are the only writers of order status
/// and of the working set. Both go through [`StateStore::apply_status_transition`] and
/// [`StateStore::mark_stuck_if_present`], which backends implement atomically so that
/// no reader observes a terminal order that still has a working-set entry.
#[async_trait::async_trait]
pub trait StateStore: Send + Sync {
    /// Backend name, for logs.
    fn name(&self) -> &str;

    /// Idempotent creation of the `orders` table.
    async fn create_order_table(&self) -> Result<(), StoreError>;

    /// Idempotent creation of the `customers` table.
    async fn create_customer_table(&self) -> Result<(), StoreError>;

    /// Idempotent creation of the `status_events` table.
    async fn create_status_table(&self) -> Result<(), StoreError>;

    /// Purge rows whose `field` is more than `hours` old. Returns the number removed.
    async fn delete_past_timestamp(&self, table: Table, field: &str, hours: u64) -> Result<u64, StoreError>;

    /// Point lookup. `Ok(None)` means the order is unknown to the system.
    async fn get_order_id(&self, order_id: &str) -> Result<Option<Order>, StoreError>;

    /// Point lookup restricted to one customer: `Ok(None)` unless the order exists and
    /// belongs to `customer_id`.
    ///
    /// An order belongs to a customer when it carries that `customer_id` or
    /// [`StateStore::add_customer`] linked the two.
    async fn get_order_for_customer(&self, order_id: &str, customer_id: &str) -> Result<Option<Order>, StoreError>;

    /// All orders of one customer, oldest first.
    async fn get_orders(&self, customer_id: &str) -> Result<Vec<Order>, StoreError>;

    /// Insert a new order. A duplicate `order_id` is a permanent error.
    async fn add_order(&self, order: NewOrder) -> Result<(), StoreError>;

    /// Attach a customer to an order. Returns `false` if the order is unknown.
    async fn update_customer(&self, order_id: &str, customer_id: &str) -> Result<bool, StoreError>;

    /// Link a customer to an order in the `customers` table. The order need not exist
    /// yet. Returns `false` if the link was already recorded.
    async fn add_customer(&self, order_id: &str, customer_id: &str) -> Result<bool, StoreError>;

    /// Set `status` and refresh `updated_at`. Last write wins; no transition validation.
    async fn update_order_status(&self, order_id: &str, status: OrderStatus) -> Result<(), StoreError>;

    /// Insert the working-set row, or update its status while preserving `first_seen_at`.
    async fn upsert_status(&self, order_id: &str, status: OrderStatus) -> Result<(), StoreError>;

    /// Remove the working-set row. Returns whether a row was removed.
    async fn delete_stuck_status(&self, order_id: &str) -> Result<bool, StoreError>;

    /// Working-set entries at least `stuck_after` old.
    async fn check_status_stuck(&self) -> Result<BTreeMap<String, StatusEntry>, StoreError>;

    /// Working-set lookup.
    async fn get_status_entry(&self, order_id: &str) -> Result<Option<StatusEntry>, StoreError>;

    /// Record `status` for an existing order: update the order, upsert the working set,
    /// and retire the working-set entry when `status` is terminal.
    ///
    /// Returns `false` without touching either table if the order does not exist.
    ///
    /// The default implementation composes the primitive operations and is not atomic;
    /// backends override it.
    async fn apply_status_transition(&self, order_id: &str, status: OrderStatus) -> Result<bool, StoreError> {
        if self.get_order_id(order_id).await?.is_none() {
            return Ok(false);
        }
        self.update_order_status(order_id, status).await?;
        self.upsert_status(order_id, status).await?;
        if status.is_terminal() {
            self.delete_stuck_status(order_id).await?;
        }
        Ok(true)
    }

    /// Delete the working-set entry only if it still exists with `observed_first_seen_at`,
    /// and only then mark the order `stuck`. Returns whether the order was marked, which
    /// is `false` for an entry whose order row is already gone.
    ///
    /// The default implementation is not atomic; backends override it.
    async fn mark_stuck_if_present(
        &self,
        order_id: &str,
        observed_first_seen_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        match self.get_status_entry(order_id).await? {
            Some(entry) if entry.first_seen_at == observed_first_seen_at => {
                if !self.delete_stuck_status(order_id).await? {
                    return Ok(false);
                }
                if self.get_order_id(order_id).await?.is_none() {
                    return Ok(false);
                }
                self.update_order_status(order_id, OrderStatus::Stuck).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Wall clock in the millisecond resolution every backend persists.
pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}

pub(crate) fn hours_ago_millis(hours: u64) -> i64 {
    let span = i64::try_from(hours.saturating_mul(3_600_000)).unwrap_or(i64::MAX);
    now_millis().saturating_sub(span)
}

pub(crate) fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
