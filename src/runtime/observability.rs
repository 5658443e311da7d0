//! Structured logging setup and in-process counters for the tracker and watchdog.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log format options for structured logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Structured JSON output for log aggregators
    Json,
    /// Human-readable multi-line format for development
    Pretty,
    /// Compact format: timestamp level target message fields
    #[default]
    Compact,
}

/// Logging configuration, the `logging` section of the system config.
///
/// # Example
///
/// ```rust,no_run
/// # use orderflow::runtime::{ObservabilityConfig, LogFormat};
/// let config = ObservabilityConfig {
///     log_format: LogFormat::Json,
///     log_level: "debug".to_string(),
/// };
/// orderflow::runtime::init_logging(&config).ok();
/// ```
///
/// `RUST_LOG`, when set, replaces the filter derived from `log_level`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    #[serde(rename = "format")]
    pub log_format: LogFormat,
    #[serde(rename = "level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Compact,
            log_level: "info".to_string(),
        }
    }
}

fn default_filter_expression(level: &str) -> String {
    format!("warn,orderflow={level},orderflow_status={level}")
}

/// Install the global subscriber.
///
/// # Errors
///
/// Fails if a global subscriber is already installed; callers that may initialize twice
/// (tests, embedding applications) can ignore the error.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), String> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter_expression(&config.log_level)));

    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| format!("Failed to initialize JSON logging: {e}")),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .map_err(|e| format!("Failed to initialize pretty logging: {e}")),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()
            .map_err(|e| format!("Failed to initialize compact logging: {e}")),
    }
}

/// Counters shared by the status tracker and the liveness watchdog.
#[derive(Debug, Default)]
pub struct TrackerMetrics {
    events_received: AtomicU64,
    events_applied: AtomicU64,
    skipped_bad_key: AtomicU64,
    skipped_unknown_order: AtomicU64,
    skipped_rejected_transition: AtomicU64,
    skipped_store_error: AtomicU64,
    payload_decode_failures: AtomicU64,
    transport_errors: AtomicU64,
    store_retries: AtomicU64,
    commits: AtomicU64,
    commit_failures: AtomicU64,
    sweeps: AtomicU64,
    orders_marked_stuck: AtomicU64,
    entries_already_retired: AtomicU64,
}

/// Snapshot of the counters for tests and diagnostics.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub events_received: u64,
    pub events_applied: u64,
    pub skipped_bad_key: u64,
    pub skipped_unknown_order: u64,
    pub skipped_rejected_transition: u64,
    pub skipped_store_error: u64,
    pub payload_decode_failures: u64,
    pub transport_errors: u64,
    pub store_retries: u64,
    pub commits: u64,
    pub commit_failures: u64,
    pub sweeps: u64,
    pub orders_marked_stuck: u64,
    pub entries_already_retired: u64,
}

impl MetricsSnapshot {
    pub fn events_skipped(&self) -> u64 {
        self.skipped_bad_key + self.skipped_unknown_order + self.skipped_rejected_transition + self.skipped_store_error
    }
}

impl TrackerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_applied(&self) {
        self.events_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bad_key(&self) {
        self.skipped_bad_key.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unknown_order(&self) {
        self.skipped_unknown_order.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected_transition(&self) {
        self.skipped_rejected_transition.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_error_skip(&self) {
        self.skipped_store_error.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_payload_decode_failure(&self) {
        self.payload_decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_retry(&self) {
        self.store_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit_failure(&self) {
        self.commit_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sweep(&self, marked_stuck: u64, already_retired: u64) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        self.orders_marked_stuck.fetch_add(marked_stuck, Ordering::Relaxed);
        self.entries_already_retired.fetch_add(already_retired, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_applied: self.events_applied.load(Ordering::Relaxed),
            skipped_bad_key: self.skipped_bad_key.load(Ordering::Relaxed),
            skipped_unknown_order: self.skipped_unknown_order.load(Ordering::Relaxed),
            skipped_rejected_transition: self.skipped_rejected_transition.load(Ordering::Relaxed),
            skipped_store_error: self.skipped_store_error.load(Ordering::Relaxed),
            payload_decode_failures: self.payload_decode_failures.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            store_retries: self.store_retries.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            commit_failures: self.commit_failures.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
            orders_marked_stuck: self.orders_marked_stuck.load(Ordering::Relaxed),
            entries_already_retired: self.entries_already_retired.load(Ordering::Relaxed),
        }
    }
}
