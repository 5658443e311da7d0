use crate::store_validation::tick;
use crate::store_validations::StoreFactory;
use crate::stores::{NewOrder, StoreOptions};
use crate::OrderStatus;

/// Goal: creating tables again neither fails nor drops data.
pub async fn test_schema_init_is_idempotent<F: StoreFactory>(factory: &F) {
    tracing::info!("→ Testing schema init: repeated creation keeps existing rows");
    let store = factory.create_store(StoreOptions::default()).await;

    store.add_order(NewOrder::new("ord-1")).await.unwrap();
    store.add_customer("ord-1", "cust-1").await.unwrap();
    store.create_order_table().await.unwrap();
    store.create_customer_table().await.unwrap();
    store.create_status_table().await.unwrap();
    store.create_order_table().await.unwrap();

    assert!(store.get_order_id("ord-1").await.unwrap().is_some());
    assert_eq!(store.get_orders("cust-1").await.unwrap().len(), 1);
    tracing::info!("✓ Test passed: schema init is idempotent");
}

/// Goal: an unknown order is `Ok(None)`, never an error.
pub async fn test_unknown_order_lookup_returns_none<F: StoreFactory>(factory: &F) {
    tracing::info!("→ Testing lookup of an order that was never created");
    let store = factory.create_store(StoreOptions::default()).await;

    assert_eq!(store.get_order_id("ord-404").await.unwrap(), None);
    assert_eq!(store.get_status_entry("ord-404").await.unwrap(), None);
    assert!(store.get_orders("nobody").await.unwrap().is_empty());
    assert_eq!(store.get_order_for_customer("ord-404", "nobody").await.unwrap(), None);
    tracing::info!("✓ Test passed: unknown order is None");
}

pub async fn test_add_order_round_trip<F: StoreFactory>(factory: &F) {
    tracing::info!("→ Testing add_order stores every attribute");
    let store = factory.create_store(StoreOptions::default()).await;

    let details = serde_json::json!({"sauce": "tomato", "cheese": "mozzarella", "extra_toppings": ["basil"]});
    store
        .add_order(
            NewOrder::new("ord-1")
                .with_customer("cust-1")
                .with_details(details.clone()),
        )
        .await
        .unwrap();
    store.add_order(NewOrder::new("ord-2")).await.unwrap();

    let order = store.get_order_id("ord-1").await.unwrap().unwrap();
    assert_eq!(order.order_id, "ord-1");
    assert_eq!(order.customer_id.as_deref(), Some("cust-1"));
    assert_eq!(order.order_details, details);
    assert_eq!(order.status, OrderStatus::Ordered);
    assert_eq!(order.created_at, order.updated_at);

    let bare = store.get_order_id("ord-2").await.unwrap().unwrap();
    assert_eq!(bare.customer_id, None);
    assert_eq!(bare.order_details, serde_json::json!({}));

    // adding an order does not put it in the working set
    assert_eq!(store.get_status_entry("ord-1").await.unwrap(), None);
    tracing::info!("✓ Test passed: add_order round trip");
}

pub async fn test_duplicate_order_rejected<F: StoreFactory>(factory: &F) {
    tracing::info!("→ Testing duplicate order ids are rejected");
    let store = factory.create_store(StoreOptions::default()).await;

    store.add_order(NewOrder::new("ord-1")).await.unwrap();
    let err = store
        .add_order(NewOrder::new("ord-1").with_status(OrderStatus::Baked))
        .await
        .unwrap_err();
    assert!(!err.is_retryable(), "duplicate insert must be permanent: {err}");

    let order = store.get_order_id("ord-1").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Ordered, "first insert must survive");
    tracing::info!("✓ Test passed: duplicate order rejected");
}

pub async fn test_orders_by_customer<F: StoreFactory>(factory: &F) {
    tracing::info!("→ Testing get_orders filters by customer, oldest first");
    let store = factory.create_store(StoreOptions::default()).await;

    store.add_order(NewOrder::new("ord-b").with_customer("alice")).await.unwrap();
    tick().await;
    store.add_order(NewOrder::new("ord-a").with_customer("alice")).await.unwrap();
    store.add_order(NewOrder::new("ord-c").with_customer("bob")).await.unwrap();
    store.add_order(NewOrder::new("ord-d")).await.unwrap();

    let ids: Vec<String> = store
        .get_orders("alice")
        .await
        .unwrap()
        .into_iter()
        .map(|o| o.order_id)
        .collect();
    assert_eq!(ids, vec!["ord-b".to_string(), "ord-a".to_string()]);
    assert_eq!(store.get_orders("bob").await.unwrap().len(), 1);
    tracing::info!("✓ Test passed: orders by customer");
}

pub async fn test_update_customer<F: StoreFactory>(factory: &F) {
    tracing::info!("→ Testing update_customer");
    let store = factory.create_store(StoreOptions::default()).await;

    store.add_order(NewOrder::new("ord-1")).await.unwrap();
    assert!(store.update_customer("ord-1", "cust-9").await.unwrap());
    assert!(!store.update_customer("ord-404", "cust-9").await.unwrap());

    let order = store.get_order_id("ord-1").await.unwrap().unwrap();
    assert_eq!(order.customer_id.as_deref(), Some("cust-9"));
    assert_eq!(store.get_orders("cust-9").await.unwrap().len(), 1);
    assert_eq!(store.get_order_id("ord-404").await.unwrap(), None);
    tracing::info!("✓ Test passed: update_customer");
}

/// Goal: a link is recorded once, may precede its order, and makes the order visible
/// to the customer's lookups without touching the order row.
pub async fn test_add_customer_links_order<F: StoreFactory>(factory: &F) {
    tracing::info!("→ Testing add_customer");
    let store = factory.create_store(StoreOptions::default()).await;

    assert!(store.add_customer("ord-1", "alice").await.unwrap());
    assert!(!store.add_customer("ord-1", "alice").await.unwrap());
    assert!(store.get_orders("alice").await.unwrap().is_empty());

    store.add_order(NewOrder::new("ord-1").with_customer("bob")).await.unwrap();
    store.add_order(NewOrder::new("ord-2").with_customer("alice")).await.unwrap();

    let ids: Vec<String> = store
        .get_orders("alice")
        .await
        .unwrap()
        .into_iter()
        .map(|o| o.order_id)
        .collect();
    assert_eq!(ids, vec!["ord-1".to_string(), "ord-2".to_string()]);
    assert_eq!(store.get_orders("bob").await.unwrap().len(), 1);

    let order = store.get_order_id("ord-1").await.unwrap().unwrap();
    assert_eq!(order.customer_id.as_deref(), Some("bob"), "links leave the order row alone");
    tracing::info!("✓ Test passed: add_customer");
}

/// Goal: the customer-filtered lookup returns the order only to a customer it belongs to.
pub async fn test_order_lookup_filtered_by_customer<F: StoreFactory>(factory: &F) {
    tracing::info!("→ Testing get_order_for_customer");
    let store = factory.create_store(StoreOptions::default()).await;

    store.add_order(NewOrder::new("ord-1").with_customer("alice")).await.unwrap();
    store.add_order(NewOrder::new("ord-2")).await.unwrap();

    let order = store.get_order_for_customer("ord-1", "alice").await.unwrap().unwrap();
    assert_eq!(order.order_id, "ord-1");
    assert_eq!(store.get_order_for_customer("ord-1", "bob").await.unwrap(), None);
    assert_eq!(store.get_order_for_customer("ord-2", "bob").await.unwrap(), None);
    assert_eq!(store.get_order_for_customer("ord-404", "alice").await.unwrap(), None);

    store.add_customer("ord-2", "bob").await.unwrap();
    let order = store.get_order_for_customer("ord-2", "bob").await.unwrap().unwrap();
    assert_eq!(order.customer_id, None);
    assert_eq!(store.get_order_for_customer("ord-1", "bob").await.unwrap(), None);
    tracing::info!("✓ Test passed: customer-filtered lookup");
}

/// Goal: `update_order_status` is last-write-wins with no transition checks.
pub async fn test_update_order_status_last_write_wins<F: StoreFactory>(factory: &F) {
    tracing::info!("→ Testing update_order_status overwrites unconditionally");
    let store = factory.create_store(StoreOptions::default()).await;

    store.add_order(NewOrder::new("ord-1")).await.unwrap();
    let created = store.get_order_id("ord-1").await.unwrap().unwrap();
    tick().await;

    store.update_order_status("ord-1", OrderStatus::Delivered).await.unwrap();
    store.update_order_status("ord-1", OrderStatus::Assembled).await.unwrap();

    let order = store.get_order_id("ord-1").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Assembled);
    assert_eq!(order.created_at, created.created_at);
    assert!(order.updated_at > created.updated_at, "updated_at must be refreshed");
    tracing::info!("✓ Test passed: last write wins");
}

/// Goal: status writes never create an order row.
pub async fn test_status_update_for_unknown_order_creates_nothing<F: StoreFactory>(factory: &F) {
    tracing::info!("→ Testing status updates for unknown orders");
    let store = factory.create_store(StoreOptions::default()).await;

    store.update_order_status("ord-404", OrderStatus::Baked).await.unwrap();
    assert!(!store.apply_status_transition("ord-404", OrderStatus::Baked).await.unwrap());

    assert_eq!(store.get_order_id("ord-404").await.unwrap(), None);
    assert_eq!(store.get_status_entry("ord-404").await.unwrap(), None);
    tracing::info!("✓ Test passed: no implicit order creation");
}
