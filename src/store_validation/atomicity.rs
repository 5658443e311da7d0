use std::sync::Arc;

use crate::store_validation::{immediately_stale, seed_in_flight, tick};
use crate::store_validations::StoreFactory;
use crate::stores::{NewOrder, StoreOptions, Table};
use crate::OrderStatus;

/// Goal: a transition for an unknown order returns false and writes nothing.
pub async fn test_transition_for_unknown_order_mutates_nothing<F: StoreFactory>(factory: &F) {
    tracing::info!("→ Testing apply_status_transition on an unknown order");
    let store = factory.create_store(StoreOptions::default()).await;

    for status in [OrderStatus::Assembled, OrderStatus::Delivered, OrderStatus::SomethingWrong] {
        assert!(!store.apply_status_transition("ord-404", status).await.unwrap());
    }
    assert_eq!(store.get_order_id("ord-404").await.unwrap(), None);
    assert_eq!(store.get_status_entry("ord-404").await.unwrap(), None);
    tracing::info!("✓ Test passed: unknown order untouched");
}

/// Goal: in-flight transitions keep one entry with a stable episode start; a terminal
/// transition removes it in the same step as the status update.
pub async fn test_transition_in_flight_then_terminal<F: StoreFactory>(factory: &F) {
    tracing::info!("→ Testing in-flight transitions followed by a terminal one");
    let store = factory.create_store(StoreOptions::default()).await;
    store.add_order(NewOrder::new("ord-1")).await.unwrap();

    assert!(store.apply_status_transition("ord-1", OrderStatus::Ordered).await.unwrap());
    let first = store.get_status_entry("ord-1").await.unwrap().unwrap();
    tick().await;

    for status in [OrderStatus::Assembled, OrderStatus::Baked] {
        assert!(store.apply_status_transition("ord-1", status).await.unwrap());
        let order = store.get_order_id("ord-1").await.unwrap().unwrap();
        let entry = store.get_status_entry("ord-1").await.unwrap().unwrap();
        assert_eq!(order.status, status);
        assert_eq!(entry.status, status);
        assert_eq!(entry.first_seen_at, first.first_seen_at);
    }

    assert!(store.apply_status_transition("ord-1", OrderStatus::Delivered).await.unwrap());
    let order = store.get_order_id("ord-1").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Delivered);
    assert_eq!(store.get_status_entry("ord-1").await.unwrap(), None);
    tracing::info!("✓ Test passed: terminal transition retires entry");
}

/// Goal: applying the same status twice leaves the same state.
pub async fn test_transition_is_idempotent<F: StoreFactory>(factory: &F) {
    tracing::info!("→ Testing apply_status_transition idempotence");
    let store = factory.create_store(StoreOptions::default()).await;
    store.add_order(NewOrder::new("ord-1")).await.unwrap();

    store.apply_status_transition("ord-1", OrderStatus::Baked).await.unwrap();
    let entry = store.get_status_entry("ord-1").await.unwrap().unwrap();
    store.apply_status_transition("ord-1", OrderStatus::Baked).await.unwrap();
    let again = store.get_status_entry("ord-1").await.unwrap().unwrap();
    assert_eq!(again.status, entry.status);
    assert_eq!(again.first_seen_at, entry.first_seen_at);

    store.apply_status_transition("ord-1", OrderStatus::Cancelled).await.unwrap();
    store.apply_status_transition("ord-1", OrderStatus::Cancelled).await.unwrap();
    assert_eq!(
        store.get_order_id("ord-1").await.unwrap().unwrap().status,
        OrderStatus::Cancelled
    );
    assert_eq!(store.get_status_entry("ord-1").await.unwrap(), None);
    tracing::info!("✓ Test passed: transitions are idempotent");
}

/// Goal: mark_stuck_if_present only acts on the episode it observed.
pub async fn test_mark_stuck_compares_episode<F: StoreFactory>(factory: &F) {
    tracing::info!("→ Testing mark_stuck_if_present compare-and-delete");
    let store = factory.create_store(immediately_stale()).await;
    seed_in_flight(store.as_ref(), "ord-2").await;

    let observed = store.check_status_stuck().await.unwrap()["ord-2"].clone();

    // the entry was retired and a new episode started after the read
    store.apply_status_transition("ord-2", OrderStatus::Cancelled).await.unwrap();
    tick().await;
    store.apply_status_transition("ord-2", OrderStatus::Ordered).await.unwrap();

    assert!(!store.mark_stuck_if_present("ord-2", observed.first_seen_at).await.unwrap());
    let order = store.get_order_id("ord-2").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Ordered);
    assert!(store.get_status_entry("ord-2").await.unwrap().is_some());

    let current = store.get_status_entry("ord-2").await.unwrap().unwrap();
    assert!(store.mark_stuck_if_present("ord-2", current.first_seen_at).await.unwrap());
    assert_eq!(
        store.get_order_id("ord-2").await.unwrap().unwrap().status,
        OrderStatus::Stuck
    );
    assert_eq!(store.get_status_entry("ord-2").await.unwrap(), None);

    // second attempt finds nothing
    assert!(!store.mark_stuck_if_present("ord-2", current.first_seen_at).await.unwrap());
    tracing::info!("✓ Test passed: mark_stuck compares episode");
}

/// Goal: an entry retired by a terminal event keeps the terminal status.
pub async fn test_mark_stuck_skips_retired_entry<F: StoreFactory>(factory: &F) {
    tracing::info!("→ Testing mark_stuck_if_present after the tracker retired the entry");
    let store = factory.create_store(immediately_stale()).await;
    seed_in_flight(store.as_ref(), "ord-1").await;

    let stale = store.check_status_stuck().await.unwrap();
    store.apply_status_transition("ord-1", OrderStatus::Delivered).await.unwrap();

    assert!(!store.mark_stuck_if_present("ord-1", stale["ord-1"].first_seen_at).await.unwrap());
    assert_eq!(
        store.get_order_id("ord-1").await.unwrap().unwrap().status,
        OrderStatus::Delivered
    );
    tracing::info!("✓ Test passed: retired entry not marked stuck");
}

/// Goal: an entry whose order retention already purged is dropped, not counted as marked.
pub async fn test_mark_stuck_on_purged_order<F: StoreFactory>(factory: &F) {
    tracing::info!("→ Testing mark_stuck_if_present after the order was purged");
    let store = factory.create_store(immediately_stale()).await;
    seed_in_flight(store.as_ref(), "ord-1").await;
    let stale = store.check_status_stuck().await.unwrap();
    tick().await;
    assert_eq!(store.delete_past_timestamp(Table::Orders, "created_at", 0).await.unwrap(), 1);

    assert!(!store.mark_stuck_if_present("ord-1", stale["ord-1"].first_seen_at).await.unwrap());
    assert_eq!(store.get_order_id("ord-1").await.unwrap(), None);
    assert_eq!(store.get_status_entry("ord-1").await.unwrap(), None);
    tracing::info!("✓ Test passed: purged order not marked stuck");
}

/// Goal: racing a terminal transition against stuck marking always ends terminal with
/// no working-set entry, whichever runs first.
pub async fn test_concurrent_terminal_transition_and_mark_stuck<F: StoreFactory>(factory: &F) {
    tracing::info!("→ Testing concurrent delivered event and stuck marking");
    let store = factory.create_store(immediately_stale()).await;

    let ids: Vec<String> = (0..20).map(|i| format!("ord-{i}")).collect();
    for id in &ids {
        seed_in_flight(store.as_ref(), id).await;
    }
    let stale = Arc::new(store.check_status_stuck().await.unwrap());
    assert_eq!(stale.len(), ids.len());

    let mut handles = Vec::new();
    for id in &ids {
        let tracker_store = store.clone();
        let tracker_id = id.clone();
        handles.push(tokio::spawn(async move {
            tracker_store
                .apply_status_transition(&tracker_id, OrderStatus::Delivered)
                .await
                .unwrap();
        }));

        let watchdog_store = store.clone();
        let watchdog_id = id.clone();
        let stale = stale.clone();
        handles.push(tokio::spawn(async move {
            let observed = stale[&watchdog_id].first_seen_at;
            watchdog_store
                .mark_stuck_if_present(&watchdog_id, observed)
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for id in &ids {
        let order = store.get_order_id(id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Delivered, "{id}");
        assert_eq!(store.get_status_entry(id).await.unwrap(), None, "{id}");
    }
    tracing::info!("✓ Test passed: race resolves to terminal status");
}
