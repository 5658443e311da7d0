//! Liveness watchdog: periodically marks stalled in-flight orders `stuck`.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::observability::TrackerMetrics;
use super::shutdown::ShutdownSignal;
use super::WatchdogOptions;
use crate::stores::{StateStore, StoreError};

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Stale working-set entries returned by the store.
    pub examined: u64,
    pub marked_stuck: u64,
    /// Entries retired between the read and the write, by the tracker or by retention
    /// having already purged the order.
    pub already_retired: u64,
    /// Entries whose update failed; they are picked up again next sweep.
    pub failed: u64,
}

pub struct LivenessWatchdog {
    store: Arc<dyn StateStore>,
    options: WatchdogOptions,
    metrics: Arc<TrackerMetrics>,
    shutdown: ShutdownSignal,
}

impl LivenessWatchdog {
    pub fn new(
        store: Arc<dyn StateStore>,
        options: WatchdogOptions,
        metrics: Arc<TrackerMetrics>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            store,
            options,
            metrics,
            shutdown,
        }
    }

    /// Sweep now, then every `interval`, until shutdown.
    pub async fn run(&self) {
        info!(
            target: "orderflow::watchdog",
            interval_ms = self.options.interval.as_millis() as u64,
            "Liveness watchdog started"
        );
        loop {
            if self.shutdown.is_triggered() {
                break;
            }
            if let Err(e) = self.sweep().await {
                warn!(target: "orderflow::watchdog", error = %e, "Liveness sweep failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(self.options.interval) => {}
                _ = self.shutdown.wait() => break,
            }
        }
        info!(target: "orderflow::watchdog", "Liveness watchdog stopped");
    }

    /// One pass over the stale working-set entries.
    ///
    /// # Errors
    ///
    /// Fails only if the stale entries cannot be read. Per-entry failures are logged and
    /// counted in [`SweepReport::failed`].
    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        let stale = self.store.check_status_stuck().await?;
        let mut report = SweepReport::default();

        for (order_id, entry) in stale {
            report.examined += 1;
            match self.store.mark_stuck_if_present(&order_id, entry.first_seen_at).await {
                Ok(true) => {
                    report.marked_stuck += 1;
                    warn!(
                        target: "orderflow::watchdog",
                        order_id = %order_id,
                        last_status = %entry.status,
                        first_seen_at = %entry.first_seen_at,
                        "Order {} is stuck",
                        order_id
                    );
                }
                Ok(false) => {
                    report.already_retired += 1;
                    debug!(target: "orderflow::watchdog", order_id = %order_id, "Entry retired before it could be marked");
                }
                Err(e) => {
                    report.failed += 1;
                    error!(
                        target: "orderflow::watchdog",
                        order_id = %order_id,
                        error = %e,
                        "Failed to mark order stuck"
                    );
                }
            }
        }

        self.metrics.record_sweep(report.marked_stuck, report.already_retired);
        if report.examined > 0 {
            info!(
                target: "orderflow::watchdog",
                examined = report.examined,
                marked_stuck = report.marked_stuck,
                already_retired = report.already_retired,
                failed = report.failed,
                "Liveness sweep finished"
            );
        }
        Ok(report)
    }
}
