//! Fault-injecting state store for testing the tracker's unavailable-store handling.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orderflow::stores::{NewOrder, Order, StateStore, StatusEntry, StoreError, Table};
use orderflow::OrderStatus;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Wraps a store and fails operations on demand.
///
/// While an outage is active every call returns a retryable error. `fail_next(n)`
/// fails only the next `n` calls. `permanent_failures` switches injected errors to
/// permanent ones. `deliver_after_scan` interleaves a terminal transition between the
/// watchdog's read and its write.
pub struct FlakyStore {
    inner: Arc<dyn StateStore>,
    outage: AtomicBool,
    fail_next: AtomicU32,
    permanent_failures: AtomicBool,
    injected: AtomicU32,
    deliver_after_scan: Mutex<Vec<String>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn StateStore>) -> Self {
        Self {
            inner,
            outage: AtomicBool::new(false),
            fail_next: AtomicU32::new(0),
            permanent_failures: AtomicBool::new(false),
            injected: AtomicU32::new(0),
            deliver_after_scan: Mutex::new(Vec::new()),
        }
    }

    pub fn start_outage(&self) {
        self.outage.store(true, Ordering::SeqCst);
    }

    pub fn end_outage(&self) {
        self.outage.store(false, Ordering::SeqCst);
    }

    pub fn fail_next(&self, calls: u32) {
        self.fail_next.store(calls, Ordering::SeqCst);
    }

    pub fn set_permanent_failures(&self, permanent: bool) {
        self.permanent_failures.store(permanent, Ordering::SeqCst);
    }

    /// Deliver `order_id` right after the next stale-entry scan returns, as a tracker
    /// racing the watchdog would.
    pub fn deliver_after_scan(&self, order_id: &str) {
        self.deliver_after_scan.lock().unwrap().push(order_id.to_string());
    }

    /// Number of calls that were failed on purpose.
    pub fn injected_failures(&self) -> u32 {
        self.injected.load(Ordering::SeqCst)
    }

    fn check(&self, operation: &str) -> Result<(), StoreError> {
        let scheduled = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !scheduled && !self.outage.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.injected.fetch_add(1, Ordering::SeqCst);
        if self.permanent_failures.load(Ordering::SeqCst) {
            Err(StoreError::permanent(operation, "injected permanent failure"))
        } else {
            Err(StoreError::retryable(operation, "injected outage: database is locked"))
        }
    }
}

#[async_trait]
impl StateStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn create_order_table(&self) -> Result<(), StoreError> {
        self.check("create_order_table")?;
        self.inner.create_order_table().await
    }

    async fn create_customer_table(&self) -> Result<(), StoreError> {
        self.check("create_customer_table")?;
        self.inner.create_customer_table().await
    }

    async fn create_status_table(&self) -> Result<(), StoreError> {
        self.check("create_status_table")?;
        self.inner.create_status_table().await
    }

    async fn delete_past_timestamp(&self, table: Table, field: &str, hours: u64) -> Result<u64, StoreError> {
        self.check("delete_past_timestamp")?;
        self.inner.delete_past_timestamp(table, field, hours).await
    }

    async fn get_order_id(&self, order_id: &str) -> Result<Option<Order>, StoreError> {
        self.check("get_order_id")?;
        self.inner.get_order_id(order_id).await
    }

    async fn get_order_for_customer(&self, order_id: &str, customer_id: &str) -> Result<Option<Order>, StoreError> {
        self.check("get_order_for_customer")?;
        self.inner.get_order_for_customer(order_id, customer_id).await
    }

    async fn get_orders(&self, customer_id: &str) -> Result<Vec<Order>, StoreError> {
        self.check("get_orders")?;
        self.inner.get_orders(customer_id).await
    }

    async fn add_order(&self, order: NewOrder) -> Result<(), StoreError> {
        self.check("add_order")?;
        self.inner.add_order(order).await
    }

    async fn update_customer(&self, order_id: &str, customer_id: &str) -> Result<bool, StoreError> {
        self.check("update_customer")?;
        self.inner.update_customer(order_id, customer_id).await
    }

    async fn add_customer(&self, order_id: &str, customer_id: &str) -> Result<bool, StoreError> {
        self.check("add_customer")?;
        self.inner.add_customer(order_id, customer_id).await
    }

    async fn update_order_status(&self, order_id: &str, status: OrderStatus) -> Result<(), StoreError> {
        self.check("update_order_status")?;
        self.inner.update_order_status(order_id, status).await
    }

    async fn upsert_status(&self, order_id: &str, status: OrderStatus) -> Result<(), StoreError> {
        self.check("upsert_status")?;
        self.inner.upsert_status(order_id, status).await
    }

    async fn delete_stuck_status(&self, order_id: &str) -> Result<bool, StoreError> {
        self.check("delete_stuck_status")?;
        self.inner.delete_stuck_status(order_id).await
    }

    async fn check_status_stuck(&self) -> Result<BTreeMap<String, StatusEntry>, StoreError> {
        self.check("check_status_stuck")?;
        let stale = self.inner.check_status_stuck().await?;
        let racing: Vec<String> = self.deliver_after_scan.lock().unwrap().drain(..).collect();
        for order_id in racing {
            self.inner
                .apply_status_transition(&order_id, OrderStatus::Delivered)
                .await?;
        }
        Ok(stale)
    }

    async fn get_status_entry(&self, order_id: &str) -> Result<Option<StatusEntry>, StoreError> {
        self.check("get_status_entry")?;
        self.inner.get_status_entry(order_id).await
    }

    async fn apply_status_transition(&self, order_id: &str, status: OrderStatus) -> Result<bool, StoreError> {
        self.check("apply_status_transition")?;
        self.inner.apply_status_transition(order_id, status).await
    }

    async fn mark_stuck_if_present(
        &self,
        order_id: &str,
        observed_first_seen_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.check("mark_stuck_if_present")?;
        self.inner.mark_stuck_if_present(order_id, observed_first_seen_at).await
    }
}
