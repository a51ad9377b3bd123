//! Background sweep that returns timed-out messages to their queues

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::store::QueueStore;

/// Sweep cadence when none is configured
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Totals for one pass over every queue
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub queues: usize,
    pub returned: usize,
    pub released: usize,
    pub expired: usize,
}

#[derive(Debug, Clone)]
pub struct VisibilityScheduler {
    store: Arc<QueueStore>,
    interval: Duration,
}

impl VisibilityScheduler {
    pub fn new(store: Arc<QueueStore>, interval: Duration) -> Self {
        Self {
            store,
            interval: interval.max(MIN_SWEEP_INTERVAL),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Reap every queue once. Each ledger is locked on its own, never two at a time.
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        for queue in self.store.queues() {
            let reaped = queue.ledger().reap();
            report.queues += 1;
            report.returned += reaped.returned;
            report.released += reaped.released;
            report.expired += reaped.expired;
        }

        if report.returned + report.released + report.expired > 0 {
            debug!(
                queues = report.queues,
                returned = report.returned,
                released = report.released,
                expired = report.expired,
                "Visibility sweep"
            );
        }
        report
    }

    /// Run [`sweep`](Self::sweep) on every tick until `shutdown` resolves
    pub fn spawn<F>(self, shutdown: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            info!(interval_ms = self.interval.as_millis() as u64, "Starting visibility scheduler");

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tokio::pin!(shutdown);

            loop {
                tokio::select! {
                    () = &mut shutdown => break,
                    _ = ticker.tick() => {
                        self.sweep();
                    }
                }
            }

            info!("Visibility scheduler stopped");
        })
    }
}
