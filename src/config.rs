//! System configuration loaded from YAML.
//!
//! ```yaml
//! kafka:
//!   bootstrap.servers: localhost:9092
//! topics:
//!   status: pizza-status
//! consumer:
//!   group_id: pizza-status-tracker
//!   client_id: orderflow-status
//! state_store:
//!   backend: sqlite
//!   url: sqlite:orders.db
//!   status_stuck_threshold_secs: 1800
//! tracker:
//!   transition_policy: reject_regressions
//! logging:
//!   format: json
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::runtime::{ObservabilityConfig, TransitionPolicy};
use crate::status::StatusCodes;
use crate::stores::StoreOptions;

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(String),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => write!(f, "failed to read config {}: {source}", path.display()),
            ConfigError::Parse(msg) => write!(f, "failed to parse config: {msg}"),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    /// librdkafka settings, passed through as strings.
    #[serde(default)]
    pub kafka: BTreeMap<String, serde_yaml::Value>,
    pub topics: TopicsConfig,
    pub consumer: ConsumerConfig,
    #[serde(default = "StatusCodes::default_labels")]
    pub status_codes: BTreeMap<String, i64>,
    #[serde(default)]
    pub state_store: StateStoreConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub logging: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopicsConfig {
    /// Unified status topic every stage publishes to.
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    pub group_id: String,
    pub client_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StateStoreConfig {
    /// Registry key of the backend (`memory`, `sqlite`).
    pub backend: String,
    pub url: Option<String>,
    pub table_orders_retention_hours: u64,
    pub table_status_retention_hours: u64,
    pub status_watchdog_interval_secs: u64,
    pub status_stuck_threshold_secs: u64,
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            url: Some("sqlite:orderflow.db".to_string()),
            table_orders_retention_hours: 48,
            table_status_retention_hours: 48,
            status_watchdog_interval_secs: 60,
            status_stuck_threshold_secs: 3600,
        }
    }
}

impl StoreOptions {
    pub fn from_config(config: &StateStoreConfig) -> Self {
        Self {
            stuck_after: std::time::Duration::from_secs(config.status_stuck_threshold_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub poll_timeout_ms: u64,
    pub max_store_backoff_ms: u64,
    pub transition_policy: TransitionPolicy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 1000,
            max_store_backoff_ms: 5000,
            transition_policy: TransitionPolicy::default(),
        }
    }
}

impl SystemConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: SystemConfig = serde_yaml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_not_empty(&self.topics.status, "topics.status")?;
        ensure_not_empty(&self.consumer.group_id, "consumer.group_id")?;
        ensure_not_empty(&self.consumer.client_id, "consumer.client_id")?;
        ensure_not_empty(&self.state_store.backend, "state_store.backend")?;

        StatusCodes::from_labels(&self.status_codes).map_err(|e| ConfigError::Invalid(format!("status_codes: {e}")))?;

        if self.state_store.status_watchdog_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "state_store.status_watchdog_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.tracker.poll_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "tracker.poll_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.tracker.max_store_backoff_ms == 0 {
            return Err(ConfigError::Invalid(
                "tracker.max_store_backoff_ms must be greater than 0".to_string(),
            ));
        }
        for (key, value) in &self.kafka {
            if scalar_to_string(value).is_none() {
                return Err(ConfigError::Invalid(format!("kafka.{key} must be a scalar value")));
            }
        }
        Ok(())
    }

    /// Validated status code table.
    pub fn status_codes(&self) -> Result<StatusCodes, ConfigError> {
        StatusCodes::from_labels(&self.status_codes).map_err(|e| ConfigError::Invalid(format!("status_codes: {e}")))
    }

    /// Kafka settings rendered as librdkafka string properties.
    pub fn kafka_settings(&self) -> BTreeMap<String, String> {
        self.kafka
            .iter()
            .filter_map(|(k, v)| scalar_to_string(v).map(|v| (k.clone(), v)))
            .collect()
    }
}

fn ensure_not_empty(value: &str, field: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must not be empty")));
    }
    Ok(())
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
