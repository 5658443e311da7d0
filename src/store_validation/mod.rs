//! State Store Validation Tests
//!
//! Backend-agnostic checks, driven through the `StoreFactory` trait.

pub mod atomicity;
pub mod orders;
pub mod retention;
pub mod working_set;

use crate::stores::{NewOrder, StateStore, StoreOptions};
use std::time::Duration;

/// Options under which every working-set entry already counts as stale.
pub(crate) fn immediately_stale() -> StoreOptions {
    StoreOptions {
        stuck_after: Duration::ZERO,
    }
}

/// Insert an order in `ordered` status and give it a working-set entry.
pub(crate) async fn seed_in_flight(store: &dyn StateStore, order_id: &str) {
    store
        .add_order(NewOrder::new(order_id))
        .await
        .expect("add_order should succeed");
    assert!(
        store
            .apply_status_transition(order_id, crate::OrderStatus::Ordered)
            .await
            .expect("apply_status_transition should succeed"),
        "seeded order must exist"
    );
}

/// Let the wall clock move past timestamps written so far.
pub(crate) async fn tick() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}
