//! Constant-interval snapshot polling used once live reconnects are exhausted

use crate::polling::source::SnapshotSource;
use livelink_shared::backoff::saturating_millis;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Shortest period the loop accepts; `tokio::time::interval` panics on zero
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Handle to a running polling loop; the loop stops when this is dropped
pub struct PollingFallback {
    task: JoinHandle<()>,
    interval: Duration,
}

impl PollingFallback {
    /// Start polling immediately and then every `period`
    ///
    /// Failed polls are logged and retried on the next tick; the loop never
    /// ends on its own.
    pub fn start<F>(source: Arc<dyn SnapshotSource>, period: Duration, on_snapshot: F) -> Self
    where
        F: Fn(Map<String, Value>) + Send + 'static,
    {
        let period = if period < MIN_PERIOD {
            warn!(requested_ms = saturating_millis(period), "Polling interval too short; clamping");
            MIN_PERIOD
        } else {
            period
        };
        info!(interval_ms = saturating_millis(period), "Snapshot polling started");

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut cycle: u64 = 0;

            loop {
                ticker.tick().await;
                cycle += 1;

                match source.fetch().await {
                    Ok(snapshot) => {
                        debug!(cycle, keys = snapshot.len(), "Snapshot poll succeeded");
                        on_snapshot(snapshot);
                    }
                    Err(e) => {
                        warn!(cycle, error = %e, "Snapshot poll failed; retrying next tick");
                    }
                }
            }
        });

        Self {
            task,
            interval: period,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn stop(self) {
        // Drop does the work
    }
}

impl Drop for PollingFallback {
    fn drop(&mut self) {
        self.task.abort();
        info!("Snapshot polling stopped");
    }
}
