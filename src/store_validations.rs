//! State Store Validation Infrastructure
//!
//! Reusable checks that any [`StateStore`] backend must pass. The crate runs them
//! against both bundled backends; third-party backends can run them the same way.
//!
//! # Example
//!
//! ```rust,ignore
//! use orderflow::stores::{StateStore, StoreOptions};
//! use orderflow::store_validations::StoreFactory;
//! use std::sync::Arc;
//!
//! struct MyStoreFactory;
//!
//! #[async_trait::async_trait]
//! impl StoreFactory for MyStoreFactory {
//!     async fn create_store(&self, options: StoreOptions) -> Arc<dyn StateStore> {
//!         let store = Arc::new(MyStore::connect(options).await.unwrap());
//!         store.create_order_table().await.unwrap();
//!         store.create_customer_table().await.unwrap();
//!         store.create_status_table().await.unwrap();
//!         store
//!     }
//! }
//!
//! #[tokio::test]
//! async fn my_store_passes_validation() {
//!     orderflow::store_validations::run_all(&MyStoreFactory).await;
//! }
//! ```

use crate::stores::{StateStore, StoreOptions};
use std::sync::Arc;

/// Creates stores for validation runs.
#[async_trait::async_trait]
pub trait StoreFactory: Send + Sync {
    /// Return a fresh, isolated store with every table already created.
    async fn create_store(&self, options: StoreOptions) -> Arc<dyn StateStore>;
}

/// Available test functions:
///
/// **Order Tests:**
/// - `test_schema_init_is_idempotent` - Verify repeated table creation keeps data
/// - `test_unknown_order_lookup_returns_none` - Verify a miss is `None`, not an error
/// - `test_add_order_round_trip` - Verify customer, details, default status and timestamps
/// - `test_duplicate_order_rejected` - Verify a second insert is a permanent error
/// - `test_orders_by_customer` - Verify `get_orders` filters and orders by creation
/// - `test_update_customer` - Verify customer attachment and unknown-order result
/// - `test_add_customer_links_order` - Verify links are idempotent and widen customer lookups
/// - `test_order_lookup_filtered_by_customer` - Verify the filtered lookup hides other customers' orders
/// - `test_update_order_status_last_write_wins` - Verify no transition validation
/// - `test_status_update_for_unknown_order_creates_nothing` - Verify no implicit insert
///
/// **Working Set Tests:**
/// - `test_upsert_preserves_first_seen_at` - Verify episode start survives updates
/// - `test_delete_stuck_status_reports_presence` - Verify delete is a reported no-op when absent
/// - `test_check_status_stuck_respects_threshold` - Verify only aged entries are returned
///
/// **Retention Tests:**
/// - `test_delete_past_timestamp_purges_old_rows` - Verify rows past the horizon are removed
/// - `test_delete_past_timestamp_rejects_unknown_field` - Verify column whitelist
///
/// **Atomicity Tests:**
/// - `test_transition_for_unknown_order_mutates_nothing`
/// - `test_transition_in_flight_then_terminal`
/// - `test_transition_is_idempotent`
/// - `test_mark_stuck_compares_episode`
/// - `test_mark_stuck_skips_retired_entry`
/// - `test_mark_stuck_on_purged_order`
/// - `test_concurrent_terminal_transition_and_mark_stuck`
pub use crate::store_validation::orders::{
    test_add_customer_links_order, test_add_order_round_trip, test_duplicate_order_rejected,
    test_order_lookup_filtered_by_customer, test_orders_by_customer, test_schema_init_is_idempotent,
    test_status_update_for_unknown_order_creates_nothing, test_unknown_order_lookup_returns_none,
    test_update_customer, test_update_order_status_last_write_wins,
};

pub use crate::store_validation::working_set::{
    test_check_status_stuck_respects_threshold, test_delete_stuck_status_reports_presence,
    test_upsert_preserves_first_seen_at,
};

pub use crate::store_validation::retention::{
    test_delete_past_timestamp_purges_old_rows, test_delete_past_timestamp_rejects_unknown_field,
};

pub use crate::store_validation::atomicity::{
    test_concurrent_terminal_transition_and_mark_stuck, test_mark_stuck_compares_episode,
    test_mark_stuck_on_purged_order, test_mark_stuck_skips_retired_entry, test_transition_for_unknown_order_mutates_nothing,
    test_transition_in_flight_then_terminal, test_transition_is_idempotent,
};

/// Run every validation against stores from `factory`.
pub async fn run_all<F: StoreFactory>(factory: &F) {
    test_schema_init_is_idempotent(factory).await;
    test_unknown_order_lookup_returns_none(factory).await;
    test_add_order_round_trip(factory).await;
    test_duplicate_order_rejected(factory).await;
    test_orders_by_customer(factory).await;
    test_update_customer(factory).await;
    test_add_customer_links_order(factory).await;
    test_order_lookup_filtered_by_customer(factory).await;
    test_update_order_status_last_write_wins(factory).await;
    test_status_update_for_unknown_order_creates_nothing(factory).await;

    test_upsert_preserves_first_seen_at(factory).await;
    test_delete_stuck_status_reports_presence(factory).await;
    test_check_status_stuck_respects_threshold(factory).await;

    test_delete_past_timestamp_purges_old_rows(factory).await;
    test_delete_past_timestamp_rejects_unknown_field(factory).await;

    test_transition_for_unknown_order_mutates_nothing(factory).await;
    test_transition_in_flight_then_terminal(factory).await;
    test_transition_is_idempotent(factory).await;
    test_mark_stuck_compares_episode(factory).await;
    test_mark_stuck_skips_retired_entry(factory).await;
    test_mark_stuck_on_purged_order(factory).await;
    test_concurrent_terminal_transition_and_mark_stuck(factory).await;
}
