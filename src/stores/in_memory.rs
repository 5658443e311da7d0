use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

use super::{
    duration_millis, hours_ago_millis, millis_to_datetime, now_millis, NewOrder, Order, StateStore, StatusEntry,
    StoreError, StoreOptions, Table,
};
use crate::OrderStatus;

#[derive(Debug, Clone)]
struct OrderRow {
    customer_id: Option<String>,
    order_details: serde_json::Value,
    status: OrderStatus,
    created_at: i64,
    updated_at: i64,
}

#[derive(Debug, Clone, Copy)]
struct StatusRow {
    status: OrderStatus,
    first_seen_at: i64,
    updated_at: i64,
}

#[derive(Default)]
struct Tables {
    orders_created: bool,
    customers_created: bool,
    status_created: bool,
    orders: HashMap<String, OrderRow>,
    /// (customer_id, order_id) -> created_at
    customers: HashMap<(String, String), i64>,
    status_events: HashMap<String, StatusRow>,
}

impl Tables {
    fn order(&self, order_id: &str) -> Option<Order> {
        self.orders.get(order_id).map(|row| to_order(order_id, row))
    }

    fn belongs_to(&self, order_id: &str, row: &OrderRow, customer_id: &str) -> bool {
        row.customer_id.as_deref() == Some(customer_id)
            || self
                .customers
                .contains_key(&(customer_id.to_string(), order_id.to_string()))
    }

    fn set_status(&mut self, order_id: &str, status: OrderStatus, now: i64) -> bool {
        match self.orders.get_mut(order_id) {
            Some(row) => {
                row.status = status;
                row.updated_at = now;
                true
            }
            None => false,
        }
    }

    fn upsert(&mut self, order_id: &str, status: OrderStatus, now: i64) {
        self.status_events
            .entry(order_id.to_string())
            .and_modify(|row| {
                row.status = status;
                row.updated_at = now;
            })
            .or_insert(StatusRow {
                status,
                first_seen_at: now,
                updated_at: now,
            });
    }
}

fn to_order(order_id: &str, row: &OrderRow) -> Order {
    Order {
        order_id: order_id.to_string(),
        customer_id: row.customer_id.clone(),
        order_details: row.order_details.clone(),
        status: row.status,
        created_at: millis_to_datetime(row.created_at),
        updated_at: millis_to_datetime(row.updated_at),
    }
}

fn to_entry(row: &StatusRow) -> StatusEntry {
    StatusEntry {
        status: row.status,
        first_seen_at: millis_to_datetime(row.first_seen_at),
        updated_at: millis_to_datetime(row.updated_at),
    }
}

/// Process-local state store.
///
/// All tables live behind one mutex, so each composite operation is a single
/// critical section. Table creation is tracked only to report use-before-init.
pub struct InMemoryStateStore {
    inner: Mutex<Tables>,
    options: StoreOptions,
}

impl InMemoryStateStore {
    pub fn new(options: StoreOptions) -> Self {
        Self {
            inner: Mutex::new(Tables::default()),
            options,
        }
    }

    /// Store with every table already created.
    pub fn initialized(options: StoreOptions) -> Self {
        Self {
            inner: Mutex::new(Tables {
                orders_created: true,
                customers_created: true,
                status_created: true,
                ..Tables::default()
            }),
            options,
        }
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    fn ensure(created: bool, operation: &str, table: Table) -> Result<(), StoreError> {
        if created {
            Ok(())
        } else {
            Err(StoreError::permanent(operation, format!("table {table} does not exist")))
        }
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new(StoreOptions::default())
    }
}

#[async_trait::async_trait]
impl StateStore for InMemoryStateStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create_order_table(&self) -> Result<(), StoreError> {
        self.inner.lock().await.orders_created = true;
        Ok(())
    }

    async fn create_customer_table(&self) -> Result<(), StoreError> {
        self.inner.lock().await.customers_created = true;
        Ok(())
    }

    async fn create_status_table(&self) -> Result<(), StoreError> {
        self.inner.lock().await.status_created = true;
        Ok(())
    }

    async fn delete_past_timestamp(&self, table: Table, field: &str, hours: u64) -> Result<u64, StoreError> {
        table.check_timestamp_field(field)?;
        let cutoff = hours_ago_millis(hours);
        let mut g = self.inner.lock().await;
        let removed = match table {
            Table::Orders => {
                Self::ensure(g.orders_created, "delete_past_timestamp", table)?;
                let before = g.orders.len();
                g.orders.retain(|_, row| {
                    let ts = if field == "created_at" { row.created_at } else { row.updated_at };
                    ts >= cutoff
                });
                before - g.orders.len()
            }
            Table::Customers => {
                Self::ensure(g.customers_created, "delete_past_timestamp", table)?;
                let before = g.customers.len();
                g.customers.retain(|_, created_at| *created_at >= cutoff);
                before - g.customers.len()
            }
            Table::StatusEvents => {
                Self::ensure(g.status_created, "delete_past_timestamp", table)?;
                let before = g.status_events.len();
                g.status_events.retain(|_, row| {
                    let ts = if field == "first_seen_at" { row.first_seen_at } else { row.updated_at };
                    ts >= cutoff
                });
                before - g.status_events.len()
            }
        };
        Ok(removed as u64)
    }

    async fn get_order_id(&self, order_id: &str) -> Result<Option<Order>, StoreError> {
        let g = self.inner.lock().await;
        Self::ensure(g.orders_created, "get_order_id", Table::Orders)?;
        Ok(g.order(order_id))
    }

    async fn get_order_for_customer(&self, order_id: &str, customer_id: &str) -> Result<Option<Order>, StoreError> {
        let g = self.inner.lock().await;
        Self::ensure(g.orders_created, "get_order_for_customer", Table::Orders)?;
        Self::ensure(g.customers_created, "get_order_for_customer", Table::Customers)?;
        Ok(g.orders
            .get(order_id)
            .filter(|row| g.belongs_to(order_id, row, customer_id))
            .map(|row| to_order(order_id, row)))
    }

    async fn get_orders(&self, customer_id: &str) -> Result<Vec<Order>, StoreError> {
        let g = self.inner.lock().await;
        Self::ensure(g.orders_created, "get_orders", Table::Orders)?;
        Self::ensure(g.customers_created, "get_orders", Table::Customers)?;
        let mut orders: Vec<Order> = g
            .orders
            .iter()
            .filter(|(id, row)| g.belongs_to(id, row, customer_id))
            .map(|(id, row)| to_order(id, row))
            .collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.order_id.cmp(&b.order_id)));
        Ok(orders)
    }

    async fn add_order(&self, order: NewOrder) -> Result<(), StoreError> {
        let mut g = self.inner.lock().await;
        Self::ensure(g.orders_created, "add_order", Table::Orders)?;
        if g.orders.contains_key(&order.order_id) {
            return Err(StoreError::permanent(
                "add_order",
                format!("order already exists: {}", order.order_id),
            ));
        }
        let now = now_millis();
        g.orders.insert(
            order.order_id,
            OrderRow {
                customer_id: order.customer_id,
                order_details: order.order_details,
                status: order.status,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn update_customer(&self, order_id: &str, customer_id: &str) -> Result<bool, StoreError> {
        let mut g = self.inner.lock().await;
        Self::ensure(g.orders_created, "update_customer", Table::Orders)?;
        match g.orders.get_mut(order_id) {
            Some(row) => {
                row.customer_id = Some(customer_id.to_string());
                row.updated_at = now_millis();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn add_customer(&self, order_id: &str, customer_id: &str) -> Result<bool, StoreError> {
        let mut g = self.inner.lock().await;
        Self::ensure(g.customers_created, "add_customer", Table::Customers)?;
        let key = (customer_id.to_string(), order_id.to_string());
        if g.customers.contains_key(&key) {
            return Ok(false);
        }
        g.customers.insert(key, now_millis());
        Ok(true)
    }

    async fn update_order_status(&self, order_id: &str, status: OrderStatus) -> Result<(), StoreError> {
        let mut g = self.inner.lock().await;
        Self::ensure(g.orders_created, "update_order_status", Table::Orders)?;
        g.set_status(order_id, status, now_millis());
        Ok(())
    }

    async fn upsert_status(&self, order_id: &str, status: OrderStatus) -> Result<(), StoreError> {
        let mut g = self.inner.lock().await;
        Self::ensure(g.status_created, "upsert_status", Table::StatusEvents)?;
        g.upsert(order_id, status, now_millis());
        Ok(())
    }

    async fn delete_stuck_status(&self, order_id: &str) -> Result<bool, StoreError> {
        let mut g = self.inner.lock().await;
        Self::ensure(g.status_created, "delete_stuck_status", Table::StatusEvents)?;
        Ok(g.status_events.remove(order_id).is_some())
    }

    async fn check_status_stuck(&self) -> Result<BTreeMap<String, StatusEntry>, StoreError> {
        let g = self.inner.lock().await;
        Self::ensure(g.status_created, "check_status_stuck", Table::StatusEvents)?;
        let cutoff = now_millis().saturating_sub(duration_millis(self.options.stuck_after));
        Ok(g
            .status_events
            .iter()
            .filter(|(_, row)| row.first_seen_at <= cutoff)
            .map(|(id, row)| (id.clone(), to_entry(row)))
            .collect())
    }

    async fn get_status_entry(&self, order_id: &str) -> Result<Option<StatusEntry>, StoreError> {
        let g = self.inner.lock().await;
        Self::ensure(g.status_created, "get_status_entry", Table::StatusEvents)?;
        Ok(g.status_events.get(order_id).map(to_entry))
    }

    async fn apply_status_transition(&self, order_id: &str, status: OrderStatus) -> Result<bool, StoreError> {
        let mut g = self.inner.lock().await;
        Self::ensure(g.orders_created, "apply_status_transition", Table::Orders)?;
        Self::ensure(g.status_created, "apply_status_transition", Table::StatusEvents)?;
        let now = now_millis();
        if !g.set_status(order_id, status, now) {
            return Ok(false);
        }
        if status.is_terminal() {
            g.status_events.remove(order_id);
        } else {
            g.upsert(order_id, status, now);
        }
        Ok(true)
    }

    async fn mark_stuck_if_present(
        &self,
        order_id: &str,
        observed_first_seen_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut g = self.inner.lock().await;
        Self::ensure(g.orders_created, "mark_stuck_if_present", Table::Orders)?;
        Self::ensure(g.status_created, "mark_stuck_if_present", Table::StatusEvents)?;
        let observed = observed_first_seen_at.timestamp_millis();
        match g.status_events.get(order_id) {
            Some(row) if row.first_seen_at == observed => {
                g.status_events.remove(order_id);
            }
            _ => return Ok(false),
        }
        // false when retention already purged the order
        Ok(g.set_status(order_id, OrderStatus::Stuck, now_millis()))
    }
}
