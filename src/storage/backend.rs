//! Persistence sink trait definition
//!
//! This module defines the `PersistenceSink` trait that every durable
//! store of samples implements.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::MetricsSample;

use super::error::StorageResult;

/// Health status of a persistence sink
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the sink operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional sink-specific metadata
    pub metadata: std::collections::HashMap<String, String>,
}

/// Durable destination for batches of samples
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync`: the batch accumulator writes from
/// spawned tasks while the retention task deletes concurrently.
///
/// ## Error Handling
///
/// A failed `create_batch` is not retried by the caller. The batch is
/// dropped, so implementations should make the write atomic (all or
/// nothing).
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Persist one batch of samples in order
    async fn create_batch(&self, samples: Vec<MetricsSample>) -> StorageResult<()>;

    /// Delete samples taken before `cutoff`
    ///
    /// Returns the number of samples deleted.
    async fn delete_old_records(&self, cutoff: DateTime<Utc>) -> StorageResult<usize>;

    /// Check sink health
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the sink and release resources
    async fn close(&self) -> StorageResult<()>;
}
