use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{trace, warn};

use crate::sampler::DEFAULT_FATAL_THRESHOLD;

/// Top-level configuration file
///
/// Every section has defaults, so an empty JSON object is a valid config.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host identifier stamped on every sample (defaults to the hostname)
    pub host_id: Option<String>,
    pub sampling: SamplingConfig,
    pub batching: BatchConfig,
    pub storage: StorageConfig,
    pub api: ApiConfig,
    pub sessions: SessionConfig,
    pub alerts: AlertsConfig,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub interval_secs: u64,
    /// Capacity of the scheduler's output channel
    pub channel_capacity: usize,
    /// Failed subsystems (out of 4) that drop the whole sample
    pub fatal_failure_threshold: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            channel_capacity: 16,
            fatal_failure_threshold: DEFAULT_FATAL_THRESHOLD,
        }
    }
}

impl SamplingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub flush_interval_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval_secs: 30,
        }
    }
}

impl BatchConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }
}

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Samples are kept in process memory only
    #[serde(rename = "none")]
    None,

    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Retention period in days (samples older than this are deleted)
        #[serde(default = "default_retention_days")]
        retention_days: u32,

        /// Hours between retention cleanups
        #[serde(default = "default_cleanup_interval_hours")]
        cleanup_interval_hours: u32,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retention_days: default_retention_days(),
            cleanup_interval_hours: default_cleanup_interval_hours(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./pulsewatch.db")
}

fn default_retention_days() -> u32 {
    30
}

fn default_cleanup_interval_hours() -> u32 {
    24
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:8080")
    pub bind_addr: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }
}

/// Viewer session tuning
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Messages a viewer may have queued before it is dropped as too slow
    pub outbound_capacity: usize,
    pub ping_interval_secs: u64,
    /// Read deadline; a viewer silent for longer than this is disconnected
    pub pong_timeout_secs: u64,
    /// Cadence of `system_status` broadcasts, 0 disables them
    pub status_interval_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            ping_interval_secs: 54,
            pong_timeout_secs: 60,
            status_interval_secs: 30,
            shutdown_grace_secs: 5,
        }
    }
}

impl SessionConfig {
    /// Always shorter than the pong timeout, so an idle but healthy viewer
    /// is pinged before its read deadline passes
    pub fn ping_interval(&self) -> Duration {
        let configured = Duration::from_secs(self.ping_interval_secs.max(1));
        configured.min(self.pong_timeout() * 9 / 10)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs.max(1))
    }

    pub fn status_interval(&self) -> Option<Duration> {
        (self.status_interval_secs > 0).then(|| Duration::from_secs(self.status_interval_secs))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Samples waiting for the evaluator before new ones are dropped
    pub queue_capacity: usize,
    pub rules: Vec<AlertRule>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            rules: Vec::new(),
        }
    }
}

/// A threshold rule evaluated against every sample
#[derive(Debug, Clone, serde::Deserialize)]
pub struct AlertRule {
    pub name: String,
    pub metric: AlertMetric,
    /// Fires when the metric is strictly above this value
    pub threshold: f64,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    pub webhook: Option<Webhook>,
}

impl AlertRule {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMetric {
    CpuUsage,
    MemoryUsage,
    DiskUsage,
    /// One-minute load average
    LoadAverage,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Webhook {
    pub url: String,
}

fn default_cooldown_secs() -> u64 {
    300
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    parse_config(&file_content)
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    serde_json::from_str::<Config>(content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
        .inspect(|config| {
            let sessions = &config.sessions;
            if sessions.ping_interval_secs >= sessions.pong_timeout_secs {
                warn!(
                    "ping_interval_secs ({}) is not below pong_timeout_secs ({}), pinging every {:?} instead",
                    sessions.ping_interval_secs,
                    sessions.pong_timeout_secs,
                    sessions.ping_interval()
                );
            }
        })
}
