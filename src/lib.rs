//! # orderflow
//!
//! Order status tracking and liveness detection for a multi-stage fulfillment
//! pipeline (ordered → assembled → baked → delivered) whose stages talk only
//! through an event log.
//!
//! The [`runtime::StatusService`] consumes the unified status topic, resolves each
//! event against a [`stores::StateStore`], and keeps a working set of in-flight
//! orders. A background watchdog marks orders `stuck` when they stay in the
//! working set longer than the configured threshold.
//!
//! ```rust,no_run
//! use orderflow::event_log::InMemoryEventLog;
//! use orderflow::runtime::{ServiceOptions, StatusService};
//! use orderflow::stores::{in_memory::InMemoryStateStore, NewOrder, StateStore, StoreOptions};
//! use orderflow::StatusCodes;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new(StoreOptions::default()));
//! let log = InMemoryEventLog::new(3);
//! let consumer = Box::new(log.subscribe("status-tracker", &["pizza-status"]));
//!
//! let service = StatusService::start(store.clone(), StatusCodes::default(), consumer, ServiceOptions::default()).await?;
//! store.add_order(NewOrder::new("ord-1")).await?;
//! log.produce_json("pizza-status", "ord-1", &serde_json::json!({"status": 200}));
//!
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod event;
pub mod event_log;
pub mod runtime;
pub mod status;
pub mod store_validation;
pub mod store_validations;
pub mod stores;

pub use config::{ConfigError, SystemConfig};
pub use event::{DecodeError, StatusEvent};
pub use status::{OrderStatus, StatusCodes};
pub use stores::{StateStore, StoreError};
