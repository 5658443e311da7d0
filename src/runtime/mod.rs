//! Status service runtime
//!
//! [`StatusService`] owns the two background loops that share one state store:
//!
//! - the [`StatusTracker`], consuming the unified status topic and applying each
//!   event to the order and its working-set entry
//! - the [`LivenessWatchdog`], sweeping the working set for orders that stopped
//!   making progress
//!
//! Lifecycle is `initialize` (schema + retention purge) → `start` (spawn loops) →
//! `shutdown` (signal, then wait for both loops to finish their current step).

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::SystemConfig;
use crate::event_log::EventConsumer;
use crate::stores::{StateStore, StoreError, Table};
use crate::StatusCodes;

pub mod observability;
pub mod shutdown;
pub mod tracker;
pub mod watchdog;

pub use observability::{init_logging, LogFormat, MetricsSnapshot, ObservabilityConfig, TrackerMetrics};
pub use shutdown::ShutdownSignal;
pub use tracker::{EventOutcome, SkipReason, StatusTracker};
pub use watchdog::{LivenessWatchdog, SweepReport};

/// How the tracker treats events that move an order backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPolicy {
    /// Last write wins; every decoded event is applied.
    #[default]
    Permissive,
    /// Skip events that lower the pipeline rank or reopen a terminal order.
    ///
    /// Judged against the status read before the write, not inside it: a watchdog
    /// `stuck` landing in between is not seen, and that one event is applied.
    RejectRegressions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerOptions {
    /// Longest a single poll blocks before the loop re-checks shutdown.
    pub poll_timeout: Duration,
    /// Upper bound for the backoff between retries of an event while the store is unavailable.
    pub max_store_backoff: Duration,
    pub transition_policy: TransitionPolicy,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            max_store_backoff: Duration::from_secs(5),
            transition_policy: TransitionPolicy::Permissive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogOptions {
    /// When false the service does not spawn the watchdog; `sweep()` can still be driven manually.
    pub enabled: bool,
    pub interval: Duration,
}

impl Default for WatchdogOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
        }
    }
}

/// Startup purge horizons in hours. `None` keeps every row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub orders_hours: Option<u64>,
    pub status_events_hours: Option<u64>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            orders_hours: Some(48),
            status_events_hours: Some(48),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceOptions {
    pub tracker: TrackerOptions,
    pub watchdog: WatchdogOptions,
    pub retention: RetentionPolicy,
}

impl ServiceOptions {
    pub fn from_config(config: &SystemConfig) -> Self {
        let store = &config.state_store;
        Self {
            tracker: TrackerOptions {
                poll_timeout: Duration::from_millis(config.tracker.poll_timeout_ms),
                max_store_backoff: Duration::from_millis(config.tracker.max_store_backoff_ms),
                transition_policy: config.tracker.transition_policy,
            },
            watchdog: WatchdogOptions {
                enabled: true,
                interval: Duration::from_secs(store.status_watchdog_interval_secs),
            },
            retention: RetentionPolicy {
                orders_hours: Some(store.table_orders_retention_hours),
                status_events_hours: Some(store.table_status_retention_hours),
            },
        }
    }
}

/// Running tracker and watchdog over one state store.
pub struct StatusService {
    store: Arc<dyn StateStore>,
    metrics: Arc<TrackerMetrics>,
    shutdown: ShutdownSignal,
    joins: Mutex<Vec<JoinHandle<()>>>,
}

impl StatusService {
    /// Create every table and purge rows past their retention horizon.
    ///
    /// Customer links share the orders horizon.
    ///
    /// # Errors
    ///
    /// Any store error here is a startup failure.
    pub async fn initialize(store: &dyn StateStore, retention: &RetentionPolicy) -> Result<(), StoreError> {
        store.create_order_table().await?;
        store.create_customer_table().await?;
        if let Some(hours) = retention.orders_hours {
            Self::purge(store, Table::Orders, hours).await?;
            Self::purge(store, Table::Customers, hours).await?;
        }
        store.create_status_table().await?;
        if let Some(hours) = retention.status_events_hours {
            Self::purge(store, Table::StatusEvents, hours).await?;
        }
        Ok(())
    }

    async fn purge(store: &dyn StateStore, table: Table, hours: u64) -> Result<(), StoreError> {
        let field = table.default_timestamp_field();
        let removed = store.delete_past_timestamp(table, field, hours).await?;
        info!(
            target: "orderflow::runtime",
            table = %table,
            field = %field,
            hours = hours,
            removed = removed,
            "Purged rows past retention"
        );
        Ok(())
    }

    /// Initialize the store and spawn the tracker (and, if enabled, the watchdog).
    pub async fn start(
        store: Arc<dyn StateStore>,
        codes: StatusCodes,
        consumer: Box<dyn EventConsumer>,
        options: ServiceOptions,
    ) -> Result<Arc<Self>, StoreError> {
        Self::initialize(store.as_ref(), &options.retention).await?;

        let service = Arc::new(Self {
            store: store.clone(),
            metrics: Arc::new(TrackerMetrics::new()),
            shutdown: ShutdownSignal::new(),
            joins: Mutex::new(Vec::new()),
        });

        let tracker = StatusTracker::new(
            store.clone(),
            codes,
            options.tracker,
            service.metrics.clone(),
            service.shutdown.clone(),
        );
        let tracker_handle = tokio::spawn(async move {
            let mut consumer = consumer;
            tracker.run(consumer.as_mut()).await;
        });
        service.joins.lock().await.push(tracker_handle);

        if options.watchdog.enabled {
            let watchdog = LivenessWatchdog::new(
                store,
                options.watchdog,
                service.metrics.clone(),
                service.shutdown.clone(),
            );
            let watchdog_handle = tokio::spawn(async move { watchdog.run().await });
            service.joins.lock().await.push(watchdog_handle);
        }

        info!(target: "orderflow::runtime", store = %service.store.name(), "Status service started");
        Ok(service)
    }

    pub fn store(&self) -> Arc<dyn StateStore> {
        self.store.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Request shutdown and wait for both loops to exit.
    ///
    /// Store writes in progress complete; an event whose handling has not finished is
    /// left uncommitted.
    pub async fn shutdown(self: Arc<Self>) {
        self.shutdown.trigger();
        let joins: Vec<JoinHandle<()>> = self.joins.lock().await.drain(..).collect();
        for join in joins {
            if let Err(e) = join.await {
                error!(target: "orderflow::runtime", error = %e, "Background task ended abnormally");
            }
        }
        info!(target: "orderflow::runtime", "Status service stopped");
    }
}
