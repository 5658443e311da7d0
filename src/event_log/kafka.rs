//! Kafka-backed [`EventConsumer`] built on rdkafka's `StreamConsumer`.

use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use std::collections::BTreeMap;
use std::time::Duration;

use super::{EventConsumer, LogRecord, TransportError};

pub struct KafkaEventConsumer {
    consumer: StreamConsumer,
    group_id: String,
}

impl KafkaEventConsumer {
    /// Create a consumer and subscribe it to `topics`.
    ///
    /// `settings` are passed to librdkafka verbatim. Auto-commit is always disabled:
    /// offsets are committed only after an event has been handled.
    pub fn new(
        settings: &BTreeMap<String, String>,
        group_id: &str,
        client_id: &str,
        topics: &[&str],
    ) -> Result<Self, TransportError> {
        let mut config = ClientConfig::new();
        for (key, value) in settings {
            config.set(key, value);
        }
        config
            .set("group.id", group_id)
            .set("client.id", client_id)
            .set("enable.auto.commit", "false")
            .set_if_absent("auto.offset.reset", "earliest");

        let consumer: StreamConsumer = config
            .create()
            .map_err(|e| TransportError::new(format!("failed to create consumer: {e}")))?;
        consumer
            .subscribe(topics)
            .map_err(|e| TransportError::new(format!("failed to subscribe to {topics:?}: {e}")))?;

        tracing::info!(
            target: "orderflow::event_log",
            group_id = %group_id,
            client_id = %client_id,
            topics = ?topics,
            "Subscribed to Kafka topics"
        );
        Ok(Self {
            consumer,
            group_id: group_id.to_string(),
        })
    }
}

trait SetIfAbsent {
    fn set_if_absent(&mut self, key: &str, value: &str) -> &mut Self;
}

impl SetIfAbsent for ClientConfig {
    fn set_if_absent(&mut self, key: &str, value: &str) -> &mut Self {
        if self.get(key).is_none() {
            self.set(key, value);
        }
        self
    }
}

#[async_trait::async_trait]
impl EventConsumer for KafkaEventConsumer {
    async fn poll(&mut self, timeout: Duration) -> Option<Result<LogRecord, TransportError>> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_elapsed) => None,
            Ok(Err(e)) => Some(Err(TransportError::new(e.to_string()))),
            Ok(Ok(msg)) => Some(Ok(LogRecord {
                topic: msg.topic().to_string(),
                partition: msg.partition(),
                offset: msg.offset(),
                key: msg.key().map(<[u8]>::to_vec),
                payload: msg.payload().map(<[u8]>::to_vec),
                timestamp: msg.timestamp().to_millis(),
            })),
        }
    }

    async fn commit(&mut self, record: &LogRecord) -> Result<(), TransportError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&record.topic, record.partition, Offset::Offset(record.offset + 1))
            .map_err(|e| TransportError::new(format!("invalid commit position: {e}")))?;
        self.consumer.commit(&tpl, CommitMode::Sync).map_err(|e| {
            TransportError::new(format!(
                "commit failed for group {} at {}[{}]@{}: {e}",
                self.group_id, record.topic, record.partition, record.offset
            ))
        })
    }
}
