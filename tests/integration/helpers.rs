//! Helper functions for integration tests

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulsewatch::{
    CpuMetrics, DiskMetrics, InterfaceMetrics, LoadAverage, MemoryMetrics, MetricsSample,
    NetworkMetrics, PartitionMetrics, ProcessCounts,
    actors::alert::AlertHook,
    config::{Config, StorageConfig},
    sampler::{MetricSource, Sampler, Subsystem},
    storage::{HealthStatus, PersistenceSink, StorageError, StorageResult},
};

/// Source whose CPU reading counts up by one per sample, so tests can check
/// ordering
pub struct CountingSource {
    pub failing: Vec<Subsystem>,
    next_cpu: f32,
}

impl CountingSource {
    pub fn new() -> Self {
        Self {
            failing: Vec::new(),
            next_cpu: 1.0,
        }
    }

    pub fn failing(failing: Vec<Subsystem>) -> Self {
        Self {
            failing,
            next_cpu: 1.0,
        }
    }

    fn check(&self, subsystem: Subsystem) -> anyhow::Result<()> {
        if self.failing.contains(&subsystem) {
            Err(anyhow!("{subsystem} unavailable"))
        } else {
            Ok(())
        }
    }
}

impl MetricSource for CountingSource {
    fn cpu(&mut self) -> anyhow::Result<CpuMetrics> {
        self.check(Subsystem::Cpu)?;
        let usage_percent = self.next_cpu;
        self.next_cpu = (self.next_cpu + 1.0).min(100.0);
        Ok(CpuMetrics {
            usage_percent,
            cores: 4,
            load_average: LoadAverage {
                one: 0.5,
                five: 0.25,
                fifteen: 0.1,
            },
        })
    }

    fn memory(&mut self) -> anyhow::Result<MemoryMetrics> {
        self.check(Subsystem::Memory)?;
        Ok(MemoryMetrics::new(8_000, 2_000, 6_000))
    }

    fn disk(&mut self) -> anyhow::Result<DiskMetrics> {
        self.check(Subsystem::Disk)?;
        Ok(DiskMetrics::from_partitions(vec![PartitionMetrics::new(
            "nvme0n1p1", "/", "ext4", 500, 100,
        )]))
    }

    fn network(&mut self) -> anyhow::Result<NetworkMetrics> {
        self.check(Subsystem::Network)?;
        Ok(NetworkMetrics::from_interfaces(vec![InterfaceMetrics {
            name: "eth0".to_string(),
            bytes_received: 2_048,
            bytes_sent: 1_024,
            packets_received: 16,
            packets_sent: 8,
        }]))
    }

    fn processes(&mut self) -> ProcessCounts {
        ProcessCounts {
            total: 64,
            running: 2,
        }
    }
}

pub fn test_sampler(host_id: &str) -> Sampler {
    Sampler::new(Box::new(CountingSource::new()), host_id, 3)
}

/// Config for pipeline tests: only the immediate first sample is taken
/// automatically, everything else is driven through `sample_now`
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.sampling.interval_secs = 3600;
    config.batching.batch_size = 100;
    config.batching.flush_interval_secs = 3600;
    config.storage = StorageConfig::None;
    config.sessions.status_interval_secs = 0;
    config.sessions.shutdown_grace_secs = 1;
    config
}

pub fn sample_at(host_id: &str, timestamp: DateTime<Utc>) -> MetricsSample {
    MetricsSample {
        host_id: host_id.to_string(),
        timestamp,
        cpu: CpuMetrics::default(),
        memory: MemoryMetrics::default(),
        disk: DiskMetrics::default(),
        network: NetworkMetrics::default(),
        processes: ProcessCounts::default(),
    }
}

/// Sink failing the first `failures` batches, then storing in memory
pub struct FlakySink {
    failures: AtomicUsize,
    pub stored: Mutex<Vec<Vec<MetricsSample>>>,
}

impl FlakySink {
    pub fn new(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            stored: Mutex::new(Vec::new()),
        }
    }

    pub fn stored_count(&self) -> usize {
        self.stored.lock().unwrap().iter().map(Vec::len).sum()
    }
}

#[async_trait]
impl PersistenceSink for FlakySink {
    async fn create_batch(&self, samples: Vec<MetricsSample>) -> StorageResult<()> {
        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(StorageError::QueryFailed("database is locked".to_string()));
        }
        self.stored.lock().unwrap().push(samples);
        Ok(())
    }

    async fn delete_old_records(&self, _cutoff: DateTime<Utc>) -> StorageResult<usize> {
        Ok(0)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        Ok(HealthStatus {
            healthy: true,
            message: "flaky sink".to_string(),
            metadata: Default::default(),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Alert hook remembering the CPU reading of every sample it saw
#[derive(Default)]
pub struct RecordingHook {
    pub seen: Mutex<Vec<f32>>,
}

#[async_trait]
impl AlertHook for RecordingHook {
    async fn on_sample(&self, sample: Arc<MetricsSample>) {
        self.seen.lock().unwrap().push(sample.cpu.usage_percent);
    }
}

/// Poll `condition` every 10ms until it holds or two seconds pass
pub async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let wait = async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(2), wait)
        .await
        .expect("condition not met within 2s");
}
