pub mod actors;
pub mod alerts;
pub mod api;
pub mod config;
pub mod pipeline;
pub mod sampler;
pub mod session;
pub mod storage;
pub mod util;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One point-in-time snapshot of every monitored subsystem on a host.
///
/// Samples are immutable once built by the [`sampler::Sampler`]; the pipeline
/// shares them behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSample {
    pub host_id: String,
    pub timestamp: DateTime<Utc>,
    pub cpu: CpuMetrics,
    pub memory: MemoryMetrics,
    pub disk: DiskMetrics,
    pub network: NetworkMetrics,
    pub processes: ProcessCounts,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuMetrics {
    /// Global usage in percent, 0-100
    pub usage_percent: f32,
    pub cores: usize,
    pub load_average: LoadAverage,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetrics {
    pub total: u64,
    pub used: u64,
    pub available: u64,
    pub usage_percent: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskMetrics {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub usage_percent: f32,
    pub partitions: Vec<PartitionMetrics>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionMetrics {
    pub name: String,
    pub mount_point: String,
    pub file_system: String,
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub usage_percent: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkMetrics {
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub packets_sent: u64,
    pub interfaces: Vec<InterfaceMetrics>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceMetrics {
    pub name: String,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub packets_sent: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessCounts {
    pub total: usize,
    pub running: usize,
}

/// Percentage of `part` in `whole`, clamped to 0-100. An empty `whole` yields 0.
pub fn percent(part: u64, whole: u64) -> f32 {
    if whole == 0 {
        return 0.0;
    }
    clamp_percent((part as f64 / whole as f64 * 100.0) as f32)
}

/// Clamp a raw percentage reading into 0-100; NaN becomes 0.
pub fn clamp_percent(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

impl CpuMetrics {
    pub(crate) fn normalized(mut self) -> Self {
        self.usage_percent = clamp_percent(self.usage_percent);
        self.load_average.one = self.load_average.one.max(0.0);
        self.load_average.five = self.load_average.five.max(0.0);
        self.load_average.fifteen = self.load_average.fifteen.max(0.0);
        self
    }
}

impl MemoryMetrics {
    pub fn new(total: u64, used: u64, available: u64) -> Self {
        let used = used.min(total);
        Self {
            total,
            used,
            available: available.min(total),
            usage_percent: percent(used, total),
        }
    }
}

impl PartitionMetrics {
    pub fn new(
        name: impl Into<String>,
        mount_point: impl Into<String>,
        file_system: impl Into<String>,
        total: u64,
        free: u64,
    ) -> Self {
        let free = free.min(total);
        let used = total - free;
        Self {
            name: name.into(),
            mount_point: mount_point.into(),
            file_system: file_system.into(),
            total,
            used,
            free,
            usage_percent: percent(used, total),
        }
    }
}

impl DiskMetrics {
    /// Aggregate totals over the given partitions.
    pub fn from_partitions(partitions: Vec<PartitionMetrics>) -> Self {
        let total = partitions.iter().map(|p| p.total).sum::<u64>();
        let free = partitions.iter().map(|p| p.free).sum::<u64>().min(total);
        let used = total - free;
        Self {
            total,
            used,
            free,
            usage_percent: percent(used, total),
            partitions,
        }
    }
}

impl NetworkMetrics {
    pub fn from_interfaces(interfaces: Vec<InterfaceMetrics>) -> Self {
        Self {
            bytes_received: interfaces.iter().map(|i| i.bytes_received).sum(),
            bytes_sent: interfaces.iter().map(|i| i.bytes_sent).sum(),
            packets_received: interfaces.iter().map(|i| i.packets_received).sum(),
            packets_sent: interfaces.iter().map(|i| i.packets_sent).sum(),
            interfaces,
        }
    }
}

/// Flat wire representation of a sample, carried as the `data` of a `metrics`
/// message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsPayload {
    pub host_id: String,
    pub timestamp: DateTime<Utc>,
    pub cpu_usage: f32,
    pub cpu_cores: usize,
    pub load_avg_1: f64,
    pub load_avg_5: f64,
    pub load_avg_15: f64,
    pub memory_total: u64,
    pub memory_used: u64,
    pub memory_available: u64,
    pub memory_usage: f32,
    pub disk_total: u64,
    pub disk_used: u64,
    pub disk_free: u64,
    pub disk_usage: f32,
    pub partitions: Vec<PartitionMetrics>,
    pub network_bytes_received: u64,
    pub network_bytes_sent: u64,
    pub network_packets_received: u64,
    pub network_packets_sent: u64,
    pub interfaces: Vec<InterfaceMetrics>,
    pub process_count: usize,
    pub process_running: usize,
}

impl From<&MetricsSample> for MetricsPayload {
    fn from(sample: &MetricsSample) -> Self {
        Self {
            host_id: sample.host_id.clone(),
            timestamp: sample.timestamp,
            cpu_usage: sample.cpu.usage_percent,
            cpu_cores: sample.cpu.cores,
            load_avg_1: sample.cpu.load_average.one,
            load_avg_5: sample.cpu.load_average.five,
            load_avg_15: sample.cpu.load_average.fifteen,
            memory_total: sample.memory.total,
            memory_used: sample.memory.used,
            memory_available: sample.memory.available,
            memory_usage: sample.memory.usage_percent,
            disk_total: sample.disk.total,
            disk_used: sample.disk.used,
            disk_free: sample.disk.free,
            disk_usage: sample.disk.usage_percent,
            partitions: sample.disk.partitions.clone(),
            network_bytes_received: sample.network.bytes_received,
            network_bytes_sent: sample.network.bytes_sent,
            network_packets_received: sample.network.packets_received,
            network_packets_sent: sample.network.packets_sent,
            interfaces: sample.network.interfaces.clone(),
            process_count: sample.processes.total,
            process_running: sample.processes.running,
        }
    }
}
