//! Worker resource snapshots
//!
//! Used only when the watchdog has to pick a specific worker to terminate.

use serde::Serialize;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Point-in-time resource usage of one worker process
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSnapshot {
    pub pid: u32,
    /// Fraction of total machine CPU, 0.0..=1.0
    pub cpu_share: f64,
    /// Fraction of total machine memory, 0.0..=1.0
    pub memory_share: f64,
    pub status: String,
    pub owner: Option<String>,
}

pub struct ResourceSampler {
    system: System,
    cpus: usize,
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            cpus: num_cpus::get().max(1),
        }
    }

    /// Snapshot every pid that still exists.
    ///
    /// CPU usage is measured between consecutive calls, so the first sample
    /// of a process reports zero.
    pub fn sample(&mut self, pids: &[u32]) -> Vec<ResourceSnapshot> {
        let targets: Vec<Pid> = pids.iter().copied().map(Pid::from_u32).collect();
        self.system.refresh_memory();
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&targets), true);

        let total_memory = self.system.total_memory().max(1) as f64;
        let cpu_capacity = (self.cpus * 100) as f64;

        targets
            .iter()
            .filter_map(|pid| {
                self.system.process(*pid).map(|process| ResourceSnapshot {
                    pid: pid.as_u32(),
                    cpu_share: f64::from(process.cpu_usage()) / cpu_capacity,
                    memory_share: process.memory() as f64 / total_memory,
                    status: process.status().to_string(),
                    owner: process.user_id().map(|uid| format!("{:?}", uid)),
                })
            })
            .collect()
    }
}

/// Index of the least busy snapshot: lowest CPU share, then lowest memory share
pub fn select_idlest(snapshots: &[ResourceSnapshot]) -> Option<usize> {
    snapshots
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            a.cpu_share
                .total_cmp(&b.cpu_share)
                .then(a.memory_share.total_cmp(&b.memory_share))
        })
        .map(|(index, _)| index)
}
