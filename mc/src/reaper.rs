//! Timeout reaper
//!
//! Periodically sweeps the aggregator for groups past their deadline and
//! routes them to the discard path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::aggregator::{Aggregator, Group};

/// Destination for groups that expired before release
pub trait DiscardSink: Send + Sync {
    fn discard(&self, group: Group);
}

/// Background sweeper evicting overdue groups
pub struct Reaper {
    aggregator: Arc<Aggregator>,
    sink: Arc<dyn DiscardSink>,
    interval: Duration,
}

impl Reaper {
    pub fn new(aggregator: Arc<Aggregator>, sink: Arc<dyn DiscardSink>, interval: Duration) -> Self {
        debug!(?interval, "Reaper::new: called");
        Self {
            aggregator,
            sink,
            interval,
        }
    }

    /// Sweep once, returning how many groups were discarded
    pub fn sweep(&self, now: Instant) -> usize {
        let expired = self.aggregator.expire(now);
        let count = expired.len();
        for group in expired {
            self.sink.discard(group);
        }
        if count > 0 {
            debug!(count, "sweep: discarded expired groups");
        }
        count
    }

    /// Spawn the sweep loop on the tokio runtime
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Run until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_ms = self.interval.as_millis() as u64, "Reaper started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep(Instant::now());
                }
            }
        }
        info!("Reaper stopped");
    }
}
