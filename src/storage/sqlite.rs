//! SQLite persistence sink
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers are not blocked while a batch is written
//! - **Connection pooling**: Batch writes and retention deletes can overlap
//! - **One transaction per batch**: A batch is stored completely or not at all

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use crate::MetricsSample;

use super::backend::{HealthStatus, PersistenceSink};
use super::error::{StorageError, StorageResult};
use super::schema::{CREATE_SAMPLES_INDEX, CREATE_SAMPLES_TABLE, SampleRow};

/// SQLite persistence sink
pub struct SqliteSink {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteSink {
    /// Open (or create) the database and make sure the sample table exists
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite sink at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        for statement in [CREATE_SAMPLES_TABLE, CREATE_SAMPLES_INDEX] {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|e| StorageError::SchemaFailed(e.to_string()))?;
        }

        debug!("sample table ready");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    /// The `limit` most recent samples of a host, oldest first
    #[instrument(skip(self))]
    pub async fn query_latest(&self, host_id: &str, limit: usize) -> StorageResult<Vec<MetricsSample>> {
        let rows = sqlx::query(
            r#"
            SELECT sample FROM samples
            WHERE host_id = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(host_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut samples = rows
            .into_iter()
            .map(|row| {
                let json: String = row.get("sample");
                serde_json::from_str::<MetricsSample>(&json).map_err(StorageError::from)
            })
            .collect::<StorageResult<Vec<_>>>()?;

        samples.reverse();
        Ok(samples)
    }

    /// Total number of stored samples
    pub async fn count(&self) -> StorageResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM samples")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}

#[async_trait]
impl PersistenceSink for SqliteSink {
    #[instrument(skip(self, samples), fields(count = samples.len()))]
    async fn create_batch(&self, samples: Vec<MetricsSample>) -> StorageResult<()> {
        if samples.is_empty() {
            return Ok(());
        }

        debug!("inserting {} samples into SQLite", samples.len());

        let mut tx = self.pool.begin().await?;

        for sample in samples {
            let row = SampleRow::from(sample);
            let json = serde_json::to_string(&row.sample)?;

            sqlx::query(
                r#"
                INSERT INTO samples (
                    host_id, timestamp, cpu_usage, memory_used, memory_total,
                    disk_used, disk_total, network_rx, network_tx, process_count, sample
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&row.host_id)
            .bind(row.timestamp.timestamp_millis())
            .bind(row.cpu_usage)
            .bind(row.memory_used as i64)
            .bind(row.memory_total as i64)
            .bind(row.disk_used as i64)
            .bind(row.disk_total as i64)
            .bind(row.network_rx as i64)
            .bind(row.network_tx as i64)
            .bind(row.process_count as i64)
            .bind(json)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!("batch insert complete");
        Ok(())
    }

    #[instrument(skip(self), fields(cutoff = %cutoff))]
    async fn delete_old_records(&self, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        let result = sqlx::query("DELETE FROM samples WHERE timestamp < ?")
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() as usize;
        debug!("deleted {} old samples", deleted);

        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => Ok(HealthStatus {
                healthy: true,
                message: "SQLite sink operational".to_string(),
                metadata: HashMap::from([
                    ("backend".to_string(), "sqlite".to_string()),
                    ("db_path".to_string(), self.db_path.clone()),
                ]),
            }),
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite sink");
        self.pool.close().await;
        Ok(())
    }
}
