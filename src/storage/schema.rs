//! Row layout of persisted samples
//!
//! ## Design Philosophy
//!
//! We use a **hybrid approach** to balance queryability with flexibility:
//!
//! ### Aggregate Metrics (Columns)
//! High-level aggregates are typed columns for efficient range scans:
//! `cpu_usage`, `memory_used`, `memory_total`, `disk_used`, `disk_total`,
//! `network_rx`, `network_tx`, `process_count`.
//!
//! ### Detailed Metrics (JSON)
//! The complete sample (per-partition and per-interface breakdowns, load
//! averages) is stored as JSON so new fields need no schema change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::MetricsSample;

/// DDL for the sample table, applied on startup
pub const CREATE_SAMPLES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS samples (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    host_id       TEXT    NOT NULL,
    timestamp     INTEGER NOT NULL,
    cpu_usage     REAL    NOT NULL,
    memory_used   INTEGER NOT NULL,
    memory_total  INTEGER NOT NULL,
    disk_used     INTEGER NOT NULL,
    disk_total    INTEGER NOT NULL,
    network_rx    INTEGER NOT NULL,
    network_tx    INTEGER NOT NULL,
    process_count INTEGER NOT NULL,
    sample        TEXT    NOT NULL
)
"#;

pub const CREATE_SAMPLES_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_samples_host_time ON samples (host_id, timestamp)";

/// A single sample as stored in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRow {
    /// When the sample was taken (always UTC)
    pub timestamp: DateTime<Utc>,

    pub host_id: String,

    // === Aggregate metrics (frequently queried) ===
    pub cpu_usage: f32,
    pub memory_used: u64,
    pub memory_total: u64,
    pub disk_used: u64,
    pub disk_total: u64,
    pub network_rx: u64,
    pub network_tx: u64,
    pub process_count: usize,

    // === Detailed metrics ===
    /// Complete sample, serialized to JSON only when written
    pub sample: MetricsSample,
}

impl From<MetricsSample> for SampleRow {
    fn from(sample: MetricsSample) -> Self {
        Self {
            timestamp: sample.timestamp,
            host_id: sample.host_id.clone(),
            cpu_usage: sample.cpu.usage_percent,
            memory_used: sample.memory.used,
            memory_total: sample.memory.total,
            disk_used: sample.disk.used,
            disk_total: sample.disk.total,
            network_rx: sample.network.bytes_received,
            network_tx: sample.network.bytes_sent,
            process_count: sample.processes.total,
            sample,
        }
    }
}
