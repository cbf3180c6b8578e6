//! Host metric sampling
//!
//! A [`Sampler`] asks a [`MetricSource`] for each subsystem independently.
//! A failing subsystem is replaced by its default value (all counters zero,
//! empty breakdowns) and reported as a [`SubsystemError`]; the sample as a
//! whole only fails once the number of failed subsystems reaches the
//! configured fatal threshold.
//!
//! ```text
//! cpu ─┐
//! mem ─┼─> Sampler ─> (MetricsSample, [SubsystemError])
//! disk ┤        └───> SampleError (failed >= threshold)
//! net ─┘
//! ```

pub mod system;

use std::fmt;

use chrono::Utc;
use tracing::{trace, warn};

use crate::{CpuMetrics, DiskMetrics, MemoryMetrics, MetricsSample, NetworkMetrics, ProcessCounts};

pub use system::SystemSource;

/// Number of independently sampled subsystems
pub const SUBSYSTEM_COUNT: usize = 4;

/// Default number of failed subsystems that makes a whole sample fail
pub const DEFAULT_FATAL_THRESHOLD: usize = 3;

/// The independently sampled metric subsystems
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    Cpu,
    Memory,
    Disk,
    Network,
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Subsystem::Cpu => "cpu",
            Subsystem::Memory => "memory",
            Subsystem::Disk => "disk",
            Subsystem::Network => "network",
        };
        f.write_str(name)
    }
}

/// A non-fatal failure of one subsystem
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{subsystem} collection failed: {message}")]
pub struct SubsystemError {
    pub subsystem: Subsystem,
    pub message: String,
}

/// Systemic collection failure; the sample is dropped
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} of {} subsystems failed (threshold {threshold})", .errors.len(), SUBSYSTEM_COUNT)]
pub struct SampleError {
    pub threshold: usize,
    pub errors: Vec<SubsystemError>,
}

/// OS-level provider of raw metrics
///
/// Each method is called once per sample. Implementations may keep state
/// between calls (e.g. for CPU usage deltas).
pub trait MetricSource: Send {
    fn cpu(&mut self) -> anyhow::Result<CpuMetrics>;

    fn memory(&mut self) -> anyhow::Result<MemoryMetrics>;

    fn disk(&mut self) -> anyhow::Result<DiskMetrics>;

    fn network(&mut self) -> anyhow::Result<NetworkMetrics>;

    /// Process counts are best-effort and never fail a sample
    fn processes(&mut self) -> ProcessCounts;
}

/// Builds one [`MetricsSample`] per call from a [`MetricSource`]
pub struct Sampler {
    source: Box<dyn MetricSource>,
    host_id: String,
    fatal_threshold: usize,
}

impl Sampler {
    /// Create a sampler. The fatal threshold is clamped to `1..=SUBSYSTEM_COUNT`.
    pub fn new(source: Box<dyn MetricSource>, host_id: impl Into<String>, fatal_threshold: usize) -> Self {
        Self {
            source,
            host_id: host_id.into(),
            fatal_threshold: fatal_threshold.clamp(1, SUBSYSTEM_COUNT),
        }
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn fatal_threshold(&self) -> usize {
        self.fatal_threshold
    }

    /// Take one sample.
    ///
    /// Returns the sample together with the non-fatal subsystem errors that
    /// were substituted with defaults.
    pub fn sample(&mut self) -> Result<(MetricsSample, Vec<SubsystemError>), SampleError> {
        let timestamp = Utc::now();
        let mut errors = Vec::new();

        let cpu = collect(Subsystem::Cpu, self.source.cpu(), &mut errors).normalized();
        let memory = collect(Subsystem::Memory, self.source.memory(), &mut errors);
        let disk = collect(Subsystem::Disk, self.source.disk(), &mut errors);
        let network = collect(Subsystem::Network, self.source.network(), &mut errors);

        if errors.len() >= self.fatal_threshold {
            return Err(SampleError {
                threshold: self.fatal_threshold,
                errors,
            });
        }

        let processes = self.source.processes();

        let sample = MetricsSample {
            host_id: self.host_id.clone(),
            timestamp,
            cpu,
            memory: MemoryMetrics::new(memory.total, memory.used, memory.available),
            disk: DiskMetrics::from_partitions(disk.partitions).or_totals(disk.total, disk.free),
            network,
            processes,
        };

        trace!(
            "sampled host {}: cpu {:.1}%, memory {:.1}%, {} subsystem errors",
            sample.host_id,
            sample.cpu.usage_percent,
            sample.memory.usage_percent,
            errors.len()
        );

        Ok((sample, errors))
    }
}

fn collect<T: Default>(
    subsystem: Subsystem,
    result: anyhow::Result<T>,
    errors: &mut Vec<SubsystemError>,
) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!("{subsystem} collection failed, using defaults: {e:#}");
            errors.push(SubsystemError {
                subsystem,
                message: format!("{e:#}"),
            });
            T::default()
        }
    }
}

impl DiskMetrics {
    /// Sources that report only totals (no partitions) keep their totals,
    /// re-clamped so that `used <= total`.
    fn or_totals(self, total: u64, free: u64) -> Self {
        if !self.partitions.is_empty() || total == 0 {
            return self;
        }
        let free = free.min(total);
        let used = total - free;
        Self {
            total,
            used,
            free,
            usage_percent: crate::percent(used, total),
            partitions: Vec::new(),
        }
    }
}
