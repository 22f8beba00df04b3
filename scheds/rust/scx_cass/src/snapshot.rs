// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Read-only views of scheduler state consumed by the CPU selector.
//!
//! The selector never measures anything itself. Per-CPU averages, thermal
//! pressure and idle state are maintained elsewhere and updated concurrently
//! with selection; the selector copies what it needs for one CPU into a
//! `CpuSnapshot` and works on that copy. Snapshots of different CPUs taken
//! during one selection are not required to be mutually consistent.

use std::collections::BTreeMap;

use anyhow::bail;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;

use crate::Cpumask;
use crate::Topology;

/// Point-in-time copy of one CPU's runqueue metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuSnapshot {
    /// Capacity lost to thermal throttling.
    pub thermal_load: u64,
    /// Fair-class utilization running average.
    pub util_avg: u64,
    /// Utilization estimate of the enqueued fair tasks.
    pub util_est: u64,
    pub util_rt: u64,
    pub util_dl: u64,
    pub util_irq: u64,
    pub nr_running: u32,
    /// Idle with no pending wakeup.
    pub idle: bool,
    /// Only SCHED_IDLE tasks are runnable.
    pub sched_idle: bool,
    /// Exit latency of the idle state the CPU sits in, in microseconds.
    pub exit_latency: Option<u32>,
}

impl CpuSnapshot {
    /// Utilization imposed by RT, DL and IRQ work.
    pub fn hard_util(&self) -> u64 {
        self.util_rt
            .saturating_add(self.util_dl)
            .saturating_add(self.util_irq)
    }
}

/// The collaborator surface the selector reads from.
///
/// Implementations must be cheap and must not block: the selector runs on
/// the wakeup path.
pub trait SchedState {
    /// One past the highest possible CPU ID.
    fn nr_cpu_ids(&self) -> usize;

    /// CPUs currently able to run tasks.
    fn active_cpus(&self) -> &Cpumask;

    /// Architectural capacity of `cpu` at its highest frequency.
    fn capacity(&self, cpu: usize) -> u64;

    /// Copy out the current metrics of `cpu`.
    fn cpu_snapshot(&self, cpu: usize) -> CpuSnapshot;

    fn shares_cache(&self, a: usize, b: usize) -> bool;

    /// The CPU reserved for bursty single-thread demand, if any.
    fn prime_cpu(&self) -> Option<usize>;
}

/// An owned, frozen SchedState: a topology plus one snapshot per CPU.
#[derive(Debug, Clone)]
pub struct SystemSnapshot {
    topo: Topology,
    active: Cpumask,
    cpus: BTreeMap<usize, CpuSnapshot>,
}

impl SystemSnapshot {
    /// All topology CPUs start active and fully idle.
    pub fn new(topo: Topology) -> Self {
        let active = topo.span().clone();
        let cpus = topo
            .cpus()
            .keys()
            .map(|&cpu| {
                (
                    cpu,
                    CpuSnapshot {
                        idle: true,
                        ..Default::default()
                    },
                )
            })
            .collect();

        SystemSnapshot { topo, active, cpus }
    }

    pub fn set_cpu(&mut self, cpu: usize, snap: CpuSnapshot) -> Result<()> {
        if !self.topo.cpus().contains_key(&cpu) {
            bail!("CPU {} is not in the topology", cpu);
        }
        self.cpus.insert(cpu, snap);
        Ok(())
    }

    /// Restrict the active CPUs. Every CPU must be in the topology.
    pub fn set_active(&mut self, active: Cpumask) -> Result<()> {
        for cpu in active.iter() {
            if !self.topo.cpus().contains_key(&cpu) {
                bail!("Active CPU {} is not in the topology", cpu);
            }
        }
        self.active = active;
        Ok(())
    }
}

impl SchedState for SystemSnapshot {
    fn nr_cpu_ids(&self) -> usize {
        self.topo.nr_cpu_ids()
    }

    fn active_cpus(&self) -> &Cpumask {
        &self.active
    }

    fn capacity(&self, cpu: usize) -> u64 {
        self.topo.capacity(cpu)
    }

    fn cpu_snapshot(&self, cpu: usize) -> CpuSnapshot {
        self.cpus.get(&cpu).copied().unwrap_or_default()
    }

    fn shares_cache(&self, a: usize, b: usize) -> bool {
        self.topo.shares_cache(a, b)
    }

    fn prime_cpu(&self) -> Option<usize> {
        self.topo.prime_cpu()
    }
}
