mod common;

use common::fault_injection::FlakyStore;
use common::tracing_capture::install_tracing_capture;
use common::*;
use orderflow::event_log::InMemoryEventLog;
use orderflow::runtime::{EventOutcome, SkipReason, TrackerOptions, TransitionPolicy};
use orderflow::stores::sqlite::SqliteStateStore;
use orderflow::stores::{StateStore, StoreOptions};
use orderflow::OrderStatus;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;

#[tokio::test]
async fn in_flight_event_updates_order_and_creates_entry() {
    let store = memory_store(StoreOptions::default()).await;
    store
        .add_order(orderflow::stores::NewOrder::new("ord-1"))
        .await
        .unwrap();
    let (tracker, metrics, _) = tracker_with(store.clone(), TrackerOptions::default());

    let outcome = tracker
        .handle_record(&record(Some("ord-1"), &status_payload(OrderStatus::Assembled)))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        EventOutcome::Applied {
            order_id: "ord-1".to_string(),
            status: OrderStatus::Assembled,
            decode_failed: false,
        }
    );
    assert_eq!(status_of(store.as_ref(), "ord-1").await, Some(OrderStatus::Assembled));
    let entry = store.get_status_entry("ord-1").await.unwrap().unwrap();
    assert_eq!(entry.status, OrderStatus::Assembled);
    assert_eq!(metrics.snapshot().events_applied, 1);
}

#[tokio::test]
async fn in_flight_event_preserves_existing_first_seen_at() {
    let store = memory_store(StoreOptions::default()).await;
    seed_order(store.as_ref(), "ord-1", OrderStatus::Ordered).await;
    let first_seen = store.get_status_entry("ord-1").await.unwrap().unwrap().first_seen_at;
    tokio::time::sleep(Duration::from_millis(5)).await;

    let (tracker, _, _) = tracker_with(store.clone(), TrackerOptions::default());
    tracker
        .handle_record(&record(Some("ord-1"), &status_payload(OrderStatus::Assembled)))
        .await
        .unwrap();

    let entry = store.get_status_entry("ord-1").await.unwrap().unwrap();
    assert_eq!(entry.status, OrderStatus::Assembled);
    assert_eq!(entry.first_seen_at, first_seen);
    assert!(entry.updated_at >= first_seen);
}

#[tokio::test]
async fn terminal_event_retires_working_set_entry() {
    let store = memory_store(StoreOptions::default()).await;
    seed_order(store.as_ref(), "ord-1", OrderStatus::Assembled).await;
    let (tracker, _, _) = tracker_with(store.clone(), TrackerOptions::default());

    let outcome = tracker
        .handle_record(&record(Some("ord-1"), &status_payload(OrderStatus::Delivered)))
        .await
        .unwrap();

    assert!(outcome.is_applied());
    assert_eq!(status_of(store.as_ref(), "ord-1").await, Some(OrderStatus::Delivered));
    assert!(store.get_status_entry("ord-1").await.unwrap().is_none());
}

#[tokio::test]
async fn cancelled_is_terminal_too() {
    let store = memory_store(StoreOptions::default()).await;
    seed_order(store.as_ref(), "ord-1", OrderStatus::Baked).await;
    let (tracker, _, _) = tracker_with(store.clone(), TrackerOptions::default());

    tracker
        .handle_record(&record(Some("ord-1"), &status_payload(OrderStatus::Cancelled)))
        .await
        .unwrap();

    assert_eq!(status_of(store.as_ref(), "ord-1").await, Some(OrderStatus::Cancelled));
    assert!(store.get_status_entry("ord-1").await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_order_is_logged_and_mutates_nothing() {
    let (logs, _guard) = install_tracing_capture();
    let store = memory_store(StoreOptions::default()).await;
    let (tracker, metrics, _) = tracker_with(store.clone(), TrackerOptions::default());

    let outcome = tracker
        .handle_record(&record(Some("ord-404"), &status_payload(OrderStatus::Baked)))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        EventOutcome::Skipped {
            order_id: Some("ord-404".to_string()),
            reason: SkipReason::UnknownOrder,
        }
    );
    assert!(store.get_order_id("ord-404").await.unwrap().is_none());
    assert!(store.get_status_entry("ord-404").await.unwrap().is_none());
    assert!(logs.contains(Level::ERROR, "Order 'ord-404' not found"));
    assert_eq!(metrics.snapshot().skipped_unknown_order, 1);
}

#[tokio::test]
async fn undecodable_payload_records_something_wrong() {
    let (logs, _guard) = install_tracing_capture();
    let store = memory_store(StoreOptions::default()).await;
    seed_order(store.as_ref(), "ord-1", OrderStatus::Assembled).await;
    let (tracker, metrics, _) = tracker_with(store.clone(), TrackerOptions::default());

    let outcome = tracker
        .handle_record(&record(Some("ord-1"), b"{not json"))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        EventOutcome::Applied {
            order_id: "ord-1".to_string(),
            status: OrderStatus::SomethingWrong,
            decode_failed: true,
        }
    );
    assert_eq!(status_of(store.as_ref(), "ord-1").await, Some(OrderStatus::SomethingWrong));
    // something_wrong is terminal, so the order leaves the working set
    assert!(store.get_status_entry("ord-1").await.unwrap().is_none());
    assert!(logs.contains(Level::ERROR, "Unable to decode status event"));
    assert_eq!(metrics.snapshot().payload_decode_failures, 1);
}

#[tokio::test]
async fn unmapped_status_code_records_something_wrong() {
    let store = memory_store(StoreOptions::default()).await;
    seed_order(store.as_ref(), "ord-1", OrderStatus::Ordered).await;
    let (tracker, _, _) = tracker_with(store.clone(), TrackerOptions::default());

    tracker
        .handle_record(&record(Some("ord-1"), br#"{"status": 12345}"#))
        .await
        .unwrap();

    assert_eq!(status_of(store.as_ref(), "ord-1").await, Some(OrderStatus::SomethingWrong));
}

#[tokio::test]
async fn missing_status_field_records_unknown() {
    let store = memory_store(StoreOptions::default()).await;
    seed_order(store.as_ref(), "ord-1", OrderStatus::Ordered).await;
    let (tracker, _, _) = tracker_with(store.clone(), TrackerOptions::default());

    let outcome = tracker
        .handle_record(&record(Some("ord-1"), br#"{"timestamp": 1700000000000}"#))
        .await
        .unwrap();

    assert!(outcome.is_applied());
    assert_eq!(status_of(store.as_ref(), "ord-1").await, Some(OrderStatus::Unknown));
    assert!(store.get_status_entry("ord-1").await.unwrap().is_none());
}

#[tokio::test]
async fn undecodable_key_is_skipped() {
    let (logs, _guard) = install_tracing_capture();
    let store = memory_store(StoreOptions::default()).await;
    seed_order(store.as_ref(), "ord-1", OrderStatus::Ordered).await;
    let (tracker, metrics, _) = tracker_with(store.clone(), TrackerOptions::default());

    let missing = tracker
        .handle_record(&record(None, &status_payload(OrderStatus::Baked)))
        .await
        .unwrap();
    let mut invalid = record(None, &status_payload(OrderStatus::Baked));
    invalid.key = Some(vec![0xff, 0xfe, 0xfd]);
    let not_utf8 = tracker.handle_record(&invalid).await.unwrap();

    for outcome in [missing, not_utf8] {
        assert_eq!(
            outcome,
            EventOutcome::Skipped {
                order_id: None,
                reason: SkipReason::UndecodableKey,
            }
        );
    }
    assert_eq!(status_of(store.as_ref(), "ord-1").await, Some(OrderStatus::Ordered));
    assert!(logs.contains(Level::ERROR, "Unable to decode order id"));
    assert_eq!(metrics.snapshot().skipped_bad_key, 2);
}

#[tokio::test]
async fn order_id_key_is_used_verbatim() {
    let store = memory_store(StoreOptions::default()).await;
    seed_order(store.as_ref(), "ord-1 ", OrderStatus::Ordered).await;
    seed_order(store.as_ref(), "ord-1", OrderStatus::Ordered).await;
    let (tracker, _, _) = tracker_with(store.clone(), TrackerOptions::default());

    let outcome = tracker
        .handle_record(&record(Some("ord-1 "), &status_payload(OrderStatus::Assembled)))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        EventOutcome::Applied {
            order_id: "ord-1 ".to_string(),
            status: OrderStatus::Assembled,
            decode_failed: false,
        }
    );
    assert_eq!(status_of(store.as_ref(), "ord-1 ").await, Some(OrderStatus::Assembled));
    assert_eq!(status_of(store.as_ref(), "ord-1").await, Some(OrderStatus::Ordered));

    // a padded key for an id that only exists unpadded is an unknown order
    let outcome = tracker
        .handle_record(&record(Some(" ord-1"), &status_payload(OrderStatus::Baked)))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        EventOutcome::Skipped {
            order_id: Some(" ord-1".to_string()),
            reason: SkipReason::UnknownOrder,
        }
    );
    assert_eq!(status_of(store.as_ref(), "ord-1").await, Some(OrderStatus::Ordered));
}

#[tokio::test]
async fn redelivered_event_is_idempotent() {
    let store = memory_store(StoreOptions::default()).await;
    seed_order(store.as_ref(), "ord-1", OrderStatus::Ordered).await;
    let (tracker, _, _) = tracker_with(store.clone(), TrackerOptions::default());
    let event = record(Some("ord-1"), &status_payload(OrderStatus::Baked));

    tracker.handle_record(&event).await.unwrap();
    let after_first = store.get_status_entry("ord-1").await.unwrap().unwrap();
    tracker.handle_record(&event).await.unwrap();
    let after_second = store.get_status_entry("ord-1").await.unwrap().unwrap();

    assert_eq!(status_of(store.as_ref(), "ord-1").await, Some(OrderStatus::Baked));
    assert_eq!(after_first.status, after_second.status);
    assert_eq!(after_first.first_seen_at, after_second.first_seen_at);
}

#[tokio::test]
async fn permissive_policy_applies_regressions() {
    let store = memory_store(StoreOptions::default()).await;
    seed_order(store.as_ref(), "ord-1", OrderStatus::Delivered).await;
    let (tracker, _, _) = tracker_with(store.clone(), TrackerOptions::default());

    let outcome = tracker
        .handle_record(&record(Some("ord-1"), &status_payload(OrderStatus::Ordered)))
        .await
        .unwrap();

    assert!(outcome.is_applied());
    assert_eq!(status_of(store.as_ref(), "ord-1").await, Some(OrderStatus::Ordered));
    assert!(store.get_status_entry("ord-1").await.unwrap().is_some());
}

#[tokio::test]
async fn reject_regressions_policy_skips_backwards_moves() {
    let store = memory_store(StoreOptions::default()).await;
    seed_order(store.as_ref(), "ord-1", OrderStatus::Baked).await;
    seed_order(store.as_ref(), "ord-2", OrderStatus::Delivered).await;
    let options = TrackerOptions {
        transition_policy: TransitionPolicy::RejectRegressions,
        ..TrackerOptions::default()
    };
    let (tracker, metrics, _) = tracker_with(store.clone(), options);

    let backwards = tracker
        .handle_record(&record(Some("ord-1"), &status_payload(OrderStatus::Assembled)))
        .await
        .unwrap();
    let reopened = tracker
        .handle_record(&record(Some("ord-2"), &status_payload(OrderStatus::Ordered)))
        .await
        .unwrap();
    let forwards = tracker
        .handle_record(&record(Some("ord-1"), &status_payload(OrderStatus::Delivered)))
        .await
        .unwrap();

    assert_eq!(
        backwards,
        EventOutcome::Skipped {
            order_id: Some("ord-1".to_string()),
            reason: SkipReason::RejectedTransition {
                from: OrderStatus::Baked,
                to: OrderStatus::Assembled,
            },
        }
    );
    assert!(matches!(
        reopened,
        EventOutcome::Skipped {
            reason: SkipReason::RejectedTransition { .. },
            ..
        }
    ));
    assert!(forwards.is_applied());
    assert_eq!(status_of(store.as_ref(), "ord-1").await, Some(OrderStatus::Delivered));
    assert_eq!(status_of(store.as_ref(), "ord-2").await, Some(OrderStatus::Delivered));
    assert!(store.get_status_entry("ord-2").await.unwrap().is_none());
    assert_eq!(metrics.snapshot().skipped_rejected_transition, 2);
}

#[tokio::test]
async fn unavailable_store_is_reported_as_error() {
    let inner = memory_store(StoreOptions::default()).await;
    seed_order(inner.as_ref(), "ord-1", OrderStatus::Ordered).await;
    let flaky = Arc::new(FlakyStore::new(inner.clone()));
    flaky.start_outage();
    let (tracker, _, _) = tracker_with(flaky.clone(), TrackerOptions::default());

    let err = tracker
        .handle_record(&record(Some("ord-1"), &status_payload(OrderStatus::Baked)))
        .await
        .unwrap_err();

    assert!(err.is_unavailable());
    assert_eq!(status_of(inner.as_ref(), "ord-1").await, Some(OrderStatus::Ordered));
}

#[tokio::test]
async fn permanent_store_error_is_skipped() {
    let inner = memory_store(StoreOptions::default()).await;
    seed_order(inner.as_ref(), "ord-1", OrderStatus::Ordered).await;
    let flaky = Arc::new(FlakyStore::new(inner.clone()));
    flaky.set_permanent_failures(true);
    flaky.fail_next(1);
    let (tracker, metrics, _) = tracker_with(flaky.clone(), TrackerOptions::default());

    let outcome = tracker
        .handle_record(&record(Some("ord-1"), &status_payload(OrderStatus::Baked)))
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        EventOutcome::Skipped {
            reason: SkipReason::StoreError(_),
            ..
        }
    ));
    assert_eq!(metrics.snapshot().skipped_store_error, 1);
}

#[tokio::test]
async fn missing_table_is_skipped_not_retried() {
    let sqlite = SqliteStateStore::new_in_memory(StoreOptions::default()).await.unwrap();
    sqlite.create_order_table().await.unwrap();
    let store: Arc<dyn StateStore> = Arc::new(sqlite);
    store.add_order(orderflow::stores::NewOrder::new("ord-1")).await.unwrap();
    let (tracker, metrics, _) = tracker_with(store.clone(), TrackerOptions::default());

    let outcome = tracker
        .handle_record(&record(Some("ord-1"), &status_payload(OrderStatus::Assembled)))
        .await
        .unwrap();

    match outcome {
        EventOutcome::Skipped {
            order_id,
            reason: SkipReason::StoreError(message),
        } => {
            assert_eq!(order_id.as_deref(), Some("ord-1"));
            assert!(message.contains("no such table"), "{message}");
        }
        other => panic!("expected a store error skip, got {other:?}"),
    }
    assert_eq!(metrics.snapshot().skipped_store_error, 1);
    assert_eq!(status_of(store.as_ref(), "ord-1").await, Some(OrderStatus::Ordered));
}

#[tokio::test]
async fn handle_with_retry_waits_out_transient_failures() {
    let inner = memory_store(StoreOptions::default()).await;
    seed_order(inner.as_ref(), "ord-1", OrderStatus::Ordered).await;
    let flaky = Arc::new(FlakyStore::new(inner.clone()));
    flaky.fail_next(3);
    let (tracker, metrics, _) = tracker_with(flaky.clone(), fast_tracker_options());

    let outcome = tracker
        .handle_with_retry(&record(Some("ord-1"), &status_payload(OrderStatus::Baked)))
        .await
        .expect("no shutdown requested");

    assert!(outcome.is_applied());
    assert_eq!(flaky.injected_failures(), 3);
    assert_eq!(metrics.snapshot().store_retries, 3);
    assert_eq!(status_of(inner.as_ref(), "ord-1").await, Some(OrderStatus::Baked));
}

#[tokio::test]
async fn handle_with_retry_gives_up_on_shutdown() {
    let inner = memory_store(StoreOptions::default()).await;
    seed_order(inner.as_ref(), "ord-1", OrderStatus::Ordered).await;
    let flaky = Arc::new(FlakyStore::new(inner.clone()));
    flaky.start_outage();
    let (tracker, _, shutdown) = tracker_with(flaky.clone(), fast_tracker_options());

    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.trigger();
    });
    let outcome = tracker
        .handle_with_retry(&record(Some("ord-1"), &status_payload(OrderStatus::Baked)))
        .await;
    trigger.await.unwrap();

    assert!(outcome.is_none());
    assert_eq!(status_of(inner.as_ref(), "ord-1").await, Some(OrderStatus::Ordered));
}

#[tokio::test]
async fn run_loop_commits_after_handling_and_survives_transport_errors() {
    let store = memory_store(StoreOptions::default()).await;
    seed_order(store.as_ref(), "ord-1", OrderStatus::Ordered).await;
    let log = InMemoryEventLog::new(1);
    let mut consumer = log.subscribe(GROUP, &[STATUS_TOPIC]);
    log.fail_next_poll(GROUP, "broker transport failure");
    publish(&log, "ord-1", OrderStatus::Assembled);
    publish(&log, "ord-404", OrderStatus::Assembled);
    publish(&log, "ord-1", OrderStatus::Baked);

    let (tracker, metrics, shutdown) = tracker_with(store.clone(), fast_tracker_options());
    let run = async {
        tracker.run(&mut consumer).await;
    };
    let stop = async {
        let log = &log;
        let drained = wait_until(2_000, move || async move { log.lag(GROUP, STATUS_TOPIC) == 0 }).await;
        shutdown.trigger();
        drained
    };
    let ((), drained) = tokio::join!(run, stop);

    assert!(drained);
    assert_eq!(status_of(store.as_ref(), "ord-1").await, Some(OrderStatus::Baked));
    assert!(store.get_order_id("ord-404").await.unwrap().is_none());
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.transport_errors, 1);
    assert_eq!(snapshot.events_received, 3);
    assert_eq!(snapshot.events_applied, 2);
    assert_eq!(snapshot.skipped_unknown_order, 1);
    assert_eq!(snapshot.commits, 3);
}
