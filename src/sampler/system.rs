//! `sysinfo`-backed metric source

use anyhow::bail;
use sysinfo::{Disks, Networks, ProcessStatus, ProcessesToUpdate, System};
use tracing::trace;

use crate::{
    CpuMetrics, DiskMetrics, InterfaceMetrics, LoadAverage, MemoryMetrics, NetworkMetrics,
    PartitionMetrics, ProcessCounts,
};

use super::MetricSource;

/// Reads metrics of the local host through `sysinfo`
///
/// The `System` handle is kept between samples so CPU usage is computed over
/// the time since the previous sample.
pub struct SystemSource {
    system: System,
    cpu_primed: bool,
}

impl SystemSource {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();

        Self {
            system,
            cpu_primed: false,
        }
    }
}

impl Default for SystemSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSource for SystemSource {
    fn cpu(&mut self) -> anyhow::Result<CpuMetrics> {
        if !self.cpu_primed {
            // usage needs two refreshes at least this far apart
            std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
            self.cpu_primed = true;
        }
        self.system.refresh_cpu_usage();

        let cores = self.system.cpus().len();
        if cores == 0 {
            bail!("no CPUs reported");
        }

        let load = System::load_average();

        Ok(CpuMetrics {
            usage_percent: self.system.global_cpu_usage(),
            cores,
            load_average: LoadAverage {
                one: load.one,
                five: load.five,
                fifteen: load.fifteen,
            },
        })
    }

    fn memory(&mut self) -> anyhow::Result<MemoryMetrics> {
        self.system.refresh_memory();

        let total = self.system.total_memory();
        if total == 0 {
            bail!("total memory reported as zero");
        }

        Ok(MemoryMetrics::new(
            total,
            self.system.used_memory(),
            self.system.available_memory(),
        ))
    }

    fn disk(&mut self) -> anyhow::Result<DiskMetrics> {
        let disks = Disks::new_with_refreshed_list();

        let partitions: Vec<PartitionMetrics> = disks
            .list()
            .iter()
            .map(|disk| {
                PartitionMetrics::new(
                    disk.name().to_string_lossy(),
                    disk.mount_point().to_string_lossy(),
                    disk.file_system().to_string_lossy(),
                    disk.total_space(),
                    disk.available_space(),
                )
            })
            .collect();

        if partitions.is_empty() {
            bail!("no disks reported");
        }

        trace!("read {} partitions", partitions.len());
        Ok(DiskMetrics::from_partitions(partitions))
    }

    fn network(&mut self) -> anyhow::Result<NetworkMetrics> {
        let networks = Networks::new_with_refreshed_list();

        let mut interfaces: Vec<InterfaceMetrics> = networks
            .list()
            .iter()
            .map(|(name, data)| InterfaceMetrics {
                name: name.clone(),
                bytes_received: data.total_received(),
                bytes_sent: data.total_transmitted(),
                packets_received: data.total_packets_received(),
                packets_sent: data.total_packets_transmitted(),
            })
            .collect();

        if interfaces.is_empty() {
            bail!("no network interfaces reported");
        }

        interfaces.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(NetworkMetrics::from_interfaces(interfaces))
    }

    fn processes(&mut self) -> ProcessCounts {
        self.system.refresh_processes(ProcessesToUpdate::All, true);

        let processes = self.system.processes();
        ProcessCounts {
            total: processes.len(),
            running: processes
                .values()
                .filter(|process| process.status() == ProcessStatus::Run)
                .count(),
        }
    }
}
