use std::time::Duration;

use crate::store_validation::{immediately_stale, seed_in_flight, tick};
use crate::store_validations::StoreFactory;
use crate::stores::{NewOrder, StoreOptions};
use crate::OrderStatus;

/// Goal: later upserts change status and `updated_at` but keep `first_seen_at`.
pub async fn test_upsert_preserves_first_seen_at<F: StoreFactory>(factory: &F) {
    tracing::info!("→ Testing upsert_status preserves first_seen_at");
    let store = factory.create_store(StoreOptions::default()).await;
    store.add_order(NewOrder::new("ord-1")).await.unwrap();

    store.upsert_status("ord-1", OrderStatus::Ordered).await.unwrap();
    let first = store.get_status_entry("ord-1").await.unwrap().unwrap();
    assert_eq!(first.status, OrderStatus::Ordered);
    assert_eq!(first.first_seen_at, first.updated_at);

    tick().await;
    store.upsert_status("ord-1", OrderStatus::Assembled).await.unwrap();
    let second = store.get_status_entry("ord-1").await.unwrap().unwrap();
    assert_eq!(second.status, OrderStatus::Assembled);
    assert_eq!(second.first_seen_at, first.first_seen_at);
    assert!(second.updated_at > first.updated_at);

    // a new episode starts after the entry is removed
    assert!(store.delete_stuck_status("ord-1").await.unwrap());
    tick().await;
    store.upsert_status("ord-1", OrderStatus::Ordered).await.unwrap();
    let third = store.get_status_entry("ord-1").await.unwrap().unwrap();
    assert!(third.first_seen_at > first.first_seen_at);
    tracing::info!("✓ Test passed: first_seen_at preserved");
}

pub async fn test_delete_stuck_status_reports_presence<F: StoreFactory>(factory: &F) {
    tracing::info!("→ Testing delete_stuck_status on present and absent entries");
    let store = factory.create_store(StoreOptions::default()).await;
    seed_in_flight(store.as_ref(), "ord-1").await;

    assert!(store.delete_stuck_status("ord-1").await.unwrap());
    assert!(!store.delete_stuck_status("ord-1").await.unwrap());
    assert!(!store.delete_stuck_status("ord-404").await.unwrap());

    // the order itself is untouched
    let order = store.get_order_id("ord-1").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Ordered);
    tracing::info!("✓ Test passed: delete_stuck_status");
}

/// Goal: only entries at least `stuck_after` old are reported.
pub async fn test_check_status_stuck_respects_threshold<F: StoreFactory>(factory: &F) {
    tracing::info!("→ Testing check_status_stuck threshold");

    let patient = factory
        .create_store(StoreOptions {
            stuck_after: Duration::from_secs(3600),
        })
        .await;
    seed_in_flight(patient.as_ref(), "ord-1").await;
    assert!(patient.check_status_stuck().await.unwrap().is_empty());

    let eager = factory.create_store(immediately_stale()).await;
    seed_in_flight(eager.as_ref(), "ord-1").await;
    seed_in_flight(eager.as_ref(), "ord-2").await;
    eager.apply_status_transition("ord-2", OrderStatus::Baked).await.unwrap();
    seed_in_flight(eager.as_ref(), "ord-3").await;
    eager.apply_status_transition("ord-3", OrderStatus::Delivered).await.unwrap();

    let stale = eager.check_status_stuck().await.unwrap();
    let ids: Vec<&str> = stale.keys().map(String::as_str).collect();
    assert_eq!(ids, vec!["ord-1", "ord-2"]);
    assert_eq!(stale["ord-2"].status, OrderStatus::Baked);
    tracing::info!("✓ Test passed: stuck threshold respected");
}
