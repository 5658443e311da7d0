//! Status tracker: the consume loop over the unified status topic.
//!
//! Each record is handled to completion (decode, look up, apply) before its offset
//! is committed. Records are never committed while the store is unavailable, so a
//! crash or shutdown at any point leads to redelivery rather than loss.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::observability::TrackerMetrics;
use super::shutdown::ShutdownSignal;
use super::{TrackerOptions, TransitionPolicy};
use crate::event::{decode_order_id, decode_status_event, lossy};
use crate::event_log::{EventConsumer, LogRecord};
use crate::stores::{StateStore, StoreError};
use crate::{OrderStatus, StatusCodes};

/// Why a record was committed without changing any order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Key missing, empty or not UTF-8.
    UndecodableKey,
    UnknownOrder,
    /// Refused by [`TransitionPolicy::RejectRegressions`].
    RejectedTransition { from: OrderStatus, to: OrderStatus },
    /// The store rejected the operation permanently.
    StoreError(String),
}

/// Result of handling one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Applied {
        order_id: String,
        status: OrderStatus,
        /// The payload could not be decoded and `something_wrong` was recorded instead.
        decode_failed: bool,
    },
    Skipped {
        order_id: Option<String>,
        reason: SkipReason,
    },
}

impl EventOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, EventOutcome::Applied { .. })
    }
}

impl TransitionPolicy {
    /// Whether an order currently in `from` may move to `to`.
    pub fn allows(&self, from: OrderStatus, to: OrderStatus) -> bool {
        match self {
            TransitionPolicy::Permissive => true,
            TransitionPolicy::RejectRegressions => {
                if from == to {
                    return true;
                }
                if from.is_terminal() && to.is_in_flight() {
                    return false;
                }
                match (from.pipeline_rank(), to.pipeline_rank()) {
                    (Some(current), Some(next)) => next >= current,
                    _ => true,
                }
            }
        }
    }
}

pub struct StatusTracker {
    store: Arc<dyn StateStore>,
    codes: StatusCodes,
    options: TrackerOptions,
    metrics: Arc<TrackerMetrics>,
    shutdown: ShutdownSignal,
}

impl StatusTracker {
    pub fn new(
        store: Arc<dyn StateStore>,
        codes: StatusCodes,
        options: TrackerOptions,
        metrics: Arc<TrackerMetrics>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            store,
            codes,
            options,
            metrics,
            shutdown,
        }
    }

    /// Poll, handle and commit until shutdown is requested.
    pub async fn run(&self, consumer: &mut dyn EventConsumer) {
        info!(
            target: "orderflow::tracker",
            store = %self.store.name(),
            policy = ?self.options.transition_policy,
            "Status tracker started"
        );

        loop {
            if self.shutdown.is_triggered() {
                break;
            }

            let polled = tokio::select! {
                polled = consumer.poll(self.options.poll_timeout) => polled,
                _ = self.shutdown.wait() => break,
            };

            let record = match polled {
                None => continue,
                Some(Err(e)) => {
                    self.metrics.record_transport_error();
                    warn!(target: "orderflow::tracker", error = %e, "Failed to receive status event");
                    continue;
                }
                Some(Ok(record)) => record,
            };
            self.metrics.record_received();

            let Some(outcome) = self.handle_with_retry(&record).await else {
                info!(
                    target: "orderflow::tracker",
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    "Shutdown while store unavailable, leaving event uncommitted"
                );
                break;
            };
            debug!(target: "orderflow::tracker", offset = record.offset, outcome = ?outcome, "Event handled");

            match consumer.commit(&record).await {
                Ok(()) => self.metrics.record_commit(),
                Err(e) => {
                    self.metrics.record_commit_failure();
                    error!(
                        target: "orderflow::tracker",
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        error = %e,
                        "Failed to commit offset"
                    );
                }
            }
        }

        info!(target: "orderflow::tracker", "Status tracker stopped");
    }

    /// Handle a record, retrying while the store is unavailable.
    ///
    /// Returns `None` if shutdown was requested before the store recovered.
    pub async fn handle_with_retry(&self, record: &LogRecord) -> Option<EventOutcome> {
        let mut attempt: u32 = 0;
        loop {
            match self.handle_record(record).await {
                Ok(outcome) => return Some(outcome),
                Err(e) => {
                    self.metrics.record_store_retry();
                    let backoff = self.backoff(attempt);
                    warn!(
                        target: "orderflow::tracker",
                        offset = record.offset,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "State store unavailable, retrying event"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = self.shutdown.wait() => return None,
                    }
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        // 10ms, 20ms, 40ms, ... capped
        let ms = 10u64.saturating_mul(1u64 << attempt.min(20));
        Duration::from_millis(ms).min(self.options.max_store_backoff)
    }

    /// Handle one record without committing it.
    ///
    /// # Errors
    ///
    /// Only a retryable (unavailable) [`StoreError`] is returned; the caller must not
    /// commit the record. Every other failure is logged and reported as a skip.
    pub async fn handle_record(&self, record: &LogRecord) -> Result<EventOutcome, StoreError> {
        let order_id = match decode_order_id(record.key()) {
            Ok(id) => id,
            Err(e) => {
                self.metrics.record_bad_key();
                error!(
                    target: "orderflow::tracker",
                    error = %e,
                    payload = %lossy(record.payload()),
                    "Unable to decode order id, skipping event"
                );
                return Ok(EventOutcome::Skipped {
                    order_id: None,
                    reason: SkipReason::UndecodableKey,
                });
            }
        };

        let current = match self.store.get_order_id(&order_id).await {
            Ok(Some(order)) => order,
            Ok(None) => return Ok(self.unknown_order(order_id)),
            Err(e) => return self.store_failure(order_id, e),
        };

        let (status, decode_failed) = match decode_status_event(record.payload(), &self.codes) {
            Ok(event) => {
                debug!(
                    target: "orderflow::tracker",
                    order_id = %order_id,
                    code = ?event.code,
                    timestamp = ?event.timestamp,
                    extra = %serde_json::Value::Object(event.extra.clone()),
                    "Decoded status event"
                );
                (event.status, false)
            }
            Err(e) => {
                self.metrics.record_payload_decode_failure();
                error!(
                    target: "orderflow::tracker",
                    order_id = %order_id,
                    error = %e,
                    payload = %lossy(record.payload()),
                    "Unable to decode status event"
                );
                (OrderStatus::SomethingWrong, true)
            }
        };

        // checked against the earlier read; see TransitionPolicy::RejectRegressions
        if !self.options.transition_policy.allows(current.status, status) {
            self.metrics.record_rejected_transition();
            warn!(
                target: "orderflow::tracker",
                order_id = %order_id,
                from = %current.status,
                to = %status,
                "Rejected status regression"
            );
            return Ok(EventOutcome::Skipped {
                order_id: Some(order_id),
                reason: SkipReason::RejectedTransition {
                    from: current.status,
                    to: status,
                },
            });
        }

        match self.store.apply_status_transition(&order_id, status).await {
            Ok(true) => {}
            // removed between lookup and update
            Ok(false) => return Ok(self.unknown_order(order_id)),
            Err(e) => return self.store_failure(order_id, e),
        }

        self.metrics.record_applied();
        info!(
            target: "orderflow::tracker",
            order_id = %order_id,
            status = %status,
            "Order '{}' status updated: {} ({})",
            order_id,
            status,
            self.codes.code_of(status)
        );
        Ok(EventOutcome::Applied {
            order_id,
            status,
            decode_failed,
        })
    }

    fn unknown_order(&self, order_id: String) -> EventOutcome {
        self.metrics.record_unknown_order();
        error!(target: "orderflow::tracker", order_id = %order_id, "Order '{}' not found", order_id);
        EventOutcome::Skipped {
            order_id: Some(order_id),
            reason: SkipReason::UnknownOrder,
        }
    }

    fn store_failure(&self, order_id: String, e: StoreError) -> Result<EventOutcome, StoreError> {
        if e.is_unavailable() {
            return Err(e);
        }
        self.metrics.record_store_error_skip();
        error!(
            target: "orderflow::tracker",
            order_id = %order_id,
            error = %e,
            "State store rejected event, skipping"
        );
        Ok(EventOutcome::Skipped {
            order_id: Some(order_id),
            reason: SkipReason::StoreError(e.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permissive_policy_allows_everything() {
        for from in OrderStatus::ALL {
            for to in OrderStatus::ALL {
                assert!(TransitionPolicy::Permissive.allows(from, to));
            }
        }
    }

    #[test]
    fn reject_regressions_policy() {
        let policy = TransitionPolicy::RejectRegressions;
        assert!(policy.allows(OrderStatus::Ordered, OrderStatus::Assembled));
        assert!(policy.allows(OrderStatus::Assembled, OrderStatus::Assembled));
        assert!(policy.allows(OrderStatus::Baked, OrderStatus::Cancelled));
        assert!(policy.allows(OrderStatus::Baked, OrderStatus::SomethingWrong));
        assert!(policy.allows(OrderStatus::Stuck, OrderStatus::Delivered));

        assert!(!policy.allows(OrderStatus::Baked, OrderStatus::Assembled));
        assert!(!policy.allows(OrderStatus::Delivered, OrderStatus::Baked));
        assert!(!policy.allows(OrderStatus::Stuck, OrderStatus::Ordered));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let store: Arc<dyn StateStore> = Arc::new(crate::stores::in_memory::InMemoryStateStore::default());
        let tracker = StatusTracker::new(
            store,
            StatusCodes::default(),
            TrackerOptions {
                max_store_backoff: Duration::from_millis(50),
                ..TrackerOptions::default()
            },
            Arc::new(TrackerMetrics::new()),
            ShutdownSignal::new(),
        );
        assert_eq!(tracker.backoff(0), Duration::from_millis(10));
        assert_eq!(tracker.backoff(1), Duration::from_millis(20));
        assert_eq!(tracker.backoff(2), Duration::from_millis(40));
        assert_eq!(tracker.backoff(3), Duration::from_millis(50));
        assert_eq!(tracker.backoff(u32::MAX), Duration::from_millis(50));
    }
}
