//! Event log consumption: the seam between the status tracker and the broker.
//!
//! The tracker receives one record at a time with a bounded wait and commits its offset
//! only after the record has been handled.

use std::fmt;
use std::time::Duration;

pub mod in_memory;
#[cfg(feature = "kafka")]
pub mod kafka;

pub use in_memory::{InMemoryConsumer, InMemoryEventLog};
#[cfg(feature = "kafka")]
pub use kafka::KafkaEventConsumer;

/// One record read from a topic partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    /// Broker timestamp in Unix milliseconds, when available.
    pub timestamp: Option<i64>,
}

impl LogRecord {
    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }
}

/// Failure talking to the event log. Never fatal to the consume loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event log transport error: {}", self.message)
    }
}

impl std::error::Error for TransportError {}

/// Consumer-group member with manual offset commit.
#[async_trait::async_trait]
pub trait EventConsumer: Send {
    /// Wait up to `timeout` for the next record. `None` means nothing arrived in time.
    async fn poll(&mut self, timeout: Duration) -> Option<Result<LogRecord, TransportError>>;

    /// Synchronously commit `record` as processed: the group resumes after it.
    async fn commit(&mut self, record: &LogRecord) -> Result<(), TransportError>;
}
