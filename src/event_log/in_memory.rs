use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{EventConsumer, LogRecord, TransportError};

type TopicPartition = (String, i32);

#[derive(Default)]
struct GroupState {
    committed: HashMap<TopicPartition, i64>,
    injected_failures: VecDeque<String>,
}

#[derive(Default)]
struct LogState {
    topics: HashMap<String, Vec<Vec<LogRecord>>>,
    groups: HashMap<String, GroupState>,
}

struct Shared {
    partitions: i32,
    state: Mutex<LogState>,
    arrivals: Notify,
}

/// In-process partitioned event log with consumer groups and manual commit.
///
/// Records with the same key land in the same partition, preserving per-key order.
/// A consumer starts from its group's committed offsets, so records that were
/// received but never committed are delivered again to the next consumer of the
/// group. Consumers do not split partitions between them; every member of a group
/// reads all partitions of its topics.
#[derive(Clone)]
pub struct InMemoryEventLog {
    shared: Arc<Shared>,
}

impl InMemoryEventLog {
    pub fn new(partitions: i32) -> Self {
        Self {
            shared: Arc::new(Shared {
                partitions: partitions.max(1),
                state: Mutex::new(LogState::default()),
                arrivals: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogState> {
        // Mutex lock should never fail in normal operation - if poisoned, it indicates a serious bug
        self.shared.state.lock().expect("Mutex should not be poisoned")
    }

    pub fn partition_for(&self, key: Option<&[u8]>) -> i32 {
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % self.shared.partitions as u64) as i32
            }
            None => 0,
        }
    }

    /// Append a record and return its `(partition, offset)`.
    pub fn produce(&self, topic: &str, key: Option<&[u8]>, payload: Option<&[u8]>) -> (i32, i64) {
        let partition = self.partition_for(key);
        let position = {
            let mut state = self.lock();
            let partitions = state
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| vec![Vec::new(); self.shared.partitions as usize]);
            let log = &mut partitions[partition as usize];
            let offset = log.len() as i64;
            log.push(LogRecord {
                topic: topic.to_string(),
                partition,
                offset,
                key: key.map(<[u8]>::to_vec),
                payload: payload.map(<[u8]>::to_vec),
                timestamp: Some(chrono::Utc::now().timestamp_millis()),
            });
            (partition, offset)
        };
        self.shared.arrivals.notify_waiters();
        position
    }

    /// Append a JSON value keyed by `key`.
    pub fn produce_json(&self, topic: &str, key: &str, value: &serde_json::Value) -> (i32, i64) {
        let payload = value.to_string();
        self.produce(topic, Some(key.as_bytes()), Some(payload.as_bytes()))
    }

    pub fn subscribe(&self, group_id: &str, topics: &[&str]) -> InMemoryConsumer {
        self.lock().groups.entry(group_id.to_string()).or_default();
        InMemoryConsumer {
            log: self.clone(),
            group_id: group_id.to_string(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            positions: HashMap::new(),
        }
    }

    /// Next offset the group will read on `topic`/`partition`, if it ever committed there.
    pub fn committed_offset(&self, group_id: &str, topic: &str, partition: i32) -> Option<i64> {
        self.lock()
            .groups
            .get(group_id)
            .and_then(|g| g.committed.get(&(topic.to_string(), partition)).copied())
    }

    /// Records on `topic` not yet committed by the group.
    pub fn lag(&self, group_id: &str, topic: &str) -> i64 {
        let state = self.lock();
        let Some(partitions) = state.topics.get(topic) else {
            return 0;
        };
        let group = state.groups.get(group_id);
        partitions
            .iter()
            .enumerate()
            .map(|(p, log)| {
                let committed = group
                    .and_then(|g| g.committed.get(&(topic.to_string(), p as i32)).copied())
                    .unwrap_or(0);
                log.len() as i64 - committed
            })
            .sum()
    }

    /// Make the next poll of any consumer in the group fail with a transport error.
    pub fn fail_next_poll(&self, group_id: &str, message: impl Into<String>) {
        self.lock()
            .groups
            .entry(group_id.to_string())
            .or_default()
            .injected_failures
            .push_back(message.into());
        self.shared.arrivals.notify_waiters();
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Consumer handle returned by [`InMemoryEventLog::subscribe`].
pub struct InMemoryConsumer {
    log: InMemoryEventLog,
    group_id: String,
    topics: Vec<String>,
    positions: HashMap<TopicPartition, i64>,
}

impl InMemoryConsumer {
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    fn try_next(&mut self) -> Option<Result<LogRecord, TransportError>> {
        let mut state = self.log.lock();
        let group = state.groups.entry(self.group_id.clone()).or_default();
        if let Some(message) = group.injected_failures.pop_front() {
            return Some(Err(TransportError::new(message)));
        }
        let committed = group.committed.clone();

        for topic in &self.topics {
            let Some(partitions) = state.topics.get(topic) else {
                continue;
            };
            for (p, log) in partitions.iter().enumerate() {
                let tp = (topic.clone(), p as i32);
                let position = *self
                    .positions
                    .entry(tp.clone())
                    .or_insert_with(|| committed.get(&tp).copied().unwrap_or(0));
                if let Some(record) = log.get(position as usize) {
                    self.positions.insert(tp, position + 1);
                    return Some(Ok(record.clone()));
                }
            }
        }
        None
    }
}

#[async_trait::async_trait]
impl EventConsumer for InMemoryConsumer {
    async fn poll(&mut self, timeout: Duration) -> Option<Result<LogRecord, TransportError>> {
        let deadline = Instant::now() + timeout;
        let shared = Arc::clone(&self.log.shared);
        loop {
            let notified = shared.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(next) = self.try_next() {
                return Some(next);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    async fn commit(&mut self, record: &LogRecord) -> Result<(), TransportError> {
        let mut state = self.log.lock();
        let group = state.groups.entry(self.group_id.clone()).or_default();
        group
            .committed
            .insert((record.topic.clone(), record.partition), record.offset + 1);
        Ok(())
    }
}
