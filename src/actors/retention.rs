//! Retention cleanup - deletes samples older than the retention period
//!
//! Runs once at startup and then every `cleanup_interval`. A failed cleanup
//! is logged and retried on the next interval.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace};

use crate::storage::PersistenceSink;

/// Periodically trims old samples from a sink
pub struct RetentionTask {
    sink: Arc<dyn PersistenceSink>,
    retention: chrono::Duration,
    cleanup_interval: Duration,
    total_deleted: u64,
}

impl RetentionTask {
    pub fn new(sink: Arc<dyn PersistenceSink>, retention_days: u32, cleanup_interval: Duration) -> Self {
        Self {
            sink,
            retention: chrono::Duration::days(i64::from(retention_days)),
            cleanup_interval,
            total_deleted: 0,
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    #[instrument(skip_all, fields(retention_days = self.retention.num_days()))]
    pub async fn run(mut self, cancel: CancellationToken) {
        debug!("starting retention task");

        let mut ticker = interval(self.cleanup_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.cleanup().await;
                }
            }
        }

        debug!("retention task stopped ({} samples deleted in total)", self.total_deleted);
    }

    /// Delete everything older than the retention period; returns the count
    pub async fn cleanup(&mut self) -> usize {
        let cutoff = Utc::now() - self.retention;
        debug!("running retention cleanup (deleting data before {})", cutoff);

        match self.sink.delete_old_records(cutoff).await {
            Ok(deleted) => {
                self.total_deleted += deleted as u64;
                if deleted > 0 {
                    info!(
                        "retention cleanup complete: deleted {} old samples (total: {})",
                        deleted, self.total_deleted
                    );
                } else {
                    trace!("retention cleanup: no old samples to delete");
                }
                deleted
            }
            Err(e) => {
                error!("failed to cleanup old samples: {}", e);
                0
            }
        }
    }
}
