//! In-memory persistence sink (no durability)
//!
//! Used when storage is disabled in the configuration, and by tests to
//! observe exactly which batches were written.
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart
//! - **Limited capacity**: Oldest batches are evicted past `max_samples`

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::MetricsSample;

use super::backend::{HealthStatus, PersistenceSink};
use super::error::StorageResult;

/// Default number of samples kept before eviction
const DEFAULT_MAX_SAMPLES: usize = 10_000;

/// In-memory sink keeping whole batches in write order
pub struct MemorySink {
    batches: RwLock<VecDeque<Vec<MetricsSample>>>,
    max_samples: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_SAMPLES)
    }

    pub fn with_capacity(max_samples: usize) -> Self {
        Self {
            batches: RwLock::new(VecDeque::new()),
            max_samples: max_samples.max(1),
        }
    }

    /// Snapshot of all stored batches, oldest first
    pub async fn batches(&self) -> Vec<Vec<MetricsSample>> {
        self.batches.read().await.iter().cloned().collect()
    }

    /// Number of stored samples across all batches
    pub async fn sample_count(&self) -> usize {
        self.batches.read().await.iter().map(Vec::len).sum()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceSink for MemorySink {
    async fn create_batch(&self, samples: Vec<MetricsSample>) -> StorageResult<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let mut batches = self.batches.write().await;
        trace!("in-memory sink: storing batch of {}", samples.len());
        batches.push_back(samples);

        let mut total: usize = batches.iter().map(Vec::len).sum();
        while total > self.max_samples && batches.len() > 1 {
            if let Some(evicted) = batches.pop_front() {
                total -= evicted.len();
            }
        }

        Ok(())
    }

    async fn delete_old_records(&self, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        let mut batches = self.batches.write().await;
        let mut deleted = 0;

        for batch in batches.iter_mut() {
            let before = batch.len();
            batch.retain(|sample| sample.timestamp >= cutoff);
            deleted += before - batch.len();
        }
        batches.retain(|batch| !batch.is_empty());

        debug!("in-memory sink: deleted {} samples before {}", deleted, cutoff);
        Ok(deleted)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let count = self.sample_count().await;
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory sink operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("samples".to_string(), count.to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory sink (no-op)");
        Ok(())
    }
}
