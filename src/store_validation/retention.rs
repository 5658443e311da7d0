use crate::store_validation::{seed_in_flight, tick};
use crate::store_validations::StoreFactory;
use crate::stores::{StoreOptions, Table};

/// Goal: rows older than the horizon go, younger rows stay.
pub async fn test_delete_past_timestamp_purges_old_rows<F: StoreFactory>(factory: &F) {
    tracing::info!("→ Testing delete_past_timestamp purges by horizon");
    let store = factory.create_store(StoreOptions::default()).await;
    seed_in_flight(store.as_ref(), "ord-1").await;
    seed_in_flight(store.as_ref(), "ord-2").await;
    store.add_customer("ord-1", "cust-1").await.unwrap();
    tick().await;

    assert_eq!(store.delete_past_timestamp(Table::Orders, "created_at", 24).await.unwrap(), 0);
    assert_eq!(
        store
            .delete_past_timestamp(Table::StatusEvents, "first_seen_at", 24)
            .await
            .unwrap(),
        0
    );
    assert!(store.get_order_id("ord-1").await.unwrap().is_some());

    // a zero-hour horizon removes everything written before now
    assert_eq!(store.delete_past_timestamp(Table::StatusEvents, "updated_at", 0).await.unwrap(), 2);
    assert_eq!(store.get_status_entry("ord-1").await.unwrap(), None);
    assert_eq!(store.delete_past_timestamp(Table::Orders, "updated_at", 0).await.unwrap(), 2);
    assert_eq!(store.get_order_id("ord-2").await.unwrap(), None);
    assert_eq!(store.delete_past_timestamp(Table::Customers, "created_at", 24).await.unwrap(), 0);
    assert_eq!(store.delete_past_timestamp(Table::Customers, "created_at", 0).await.unwrap(), 1);
    assert!(store.add_customer("ord-1", "cust-1").await.unwrap(), "purged link can be recorded again");
    tracing::info!("✓ Test passed: retention purge");
}

pub async fn test_delete_past_timestamp_rejects_unknown_field<F: StoreFactory>(factory: &F) {
    tracing::info!("→ Testing delete_past_timestamp validates the column");
    let store = factory.create_store(StoreOptions::default()).await;
    seed_in_flight(store.as_ref(), "ord-1").await;

    for (table, field) in [
        (Table::Orders, "first_seen_at"),
        (Table::StatusEvents, "created_at"),
        (Table::Customers, "updated_at"),
        (Table::Orders, "status; DROP TABLE orders"),
    ] {
        let err = store.delete_past_timestamp(table, field, 0).await.unwrap_err();
        assert!(!err.is_retryable(), "{err}");
    }
    assert!(store.get_order_id("ord-1").await.unwrap().is_some());
    tracing::info!("✓ Test passed: unknown retention column rejected");
}
