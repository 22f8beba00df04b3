// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # CASS Topology
//!
//! The static shape of the system the selector places tasks on: which CPU IDs
//! exist, the architectural capacity of each one, and which CPUs share a
//! last-level cache.
//!
//! CASS only needs a flat view of the hierarchy. Each Cpu records the ID of
//! the highest cache level it belongs to, and two CPUs share cache when those
//! IDs match:
//!
//!```text
//!      Topology  nr_cpu_ids 8, span 0-7, prime 7
//!         |
//!         o-- Cpu 0  capacity  512  llc 0
//!         o-- ...
//!         o-- Cpu 6  capacity  870  llc 0
//!         o-- Cpu 7  capacity 1024  llc 0   <- differs from cpu 6: prime
//!```
//!
//! Creating Topology
//! -----------------
//!
//! The host topology is read from sysfs:
//!
//!```no_run
//!     use scx_cass::Topology;
//!     let top = Topology::new().unwrap();
//!```
//!
//! Modeled systems are built from a list of Cpu objects with
//! `Topology::from_cpus()`. All objects are read-only once created; if the
//! host topology changes (e.g. hotplug), build a new Topology.

use crate::Cpumask;
use crate::SCHED_CAPACITY_SCALE;
use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use glob::glob;
use log::debug;
use serde::Deserialize;
use serde::Serialize;
use sscanf::sscanf;
use std::collections::BTreeMap;
use std::path::Path;

const SYSFS_CPU_ROOT: &str = "/sys/devices/system/cpu";

fn default_capacity() -> u64 {
    SCHED_CAPACITY_SCALE
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cpu {
    pub id: usize,
    /// Architectural capacity at the highest frequency, in
    /// [1, SCHED_CAPACITY_SCALE].
    #[serde(default = "default_capacity")]
    pub capacity: u64,
    /// ID of the last-level cache domain.
    #[serde(default)]
    pub llc_id: usize,
}

impl Cpu {
    pub fn new(id: usize, capacity: u64, llc_id: usize) -> Self {
        Cpu {
            id,
            capacity,
            llc_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Topology {
    cpus: BTreeMap<usize, Cpu>,
    nr_cpu_ids: usize,
    span: Cpumask,
    prime_cpu: Option<usize>,
}

impl Topology {
    /// Build the host Topology from sysfs.
    pub fn new() -> Result<Topology> {
        Self::from_sysfs(Path::new(SYSFS_CPU_ROOT))
    }

    /// Build a Topology from a sysfs-shaped CPU directory rooted at `root`
    /// (normally /sys/devices/system/cpu).
    pub fn from_sysfs(root: &Path) -> Result<Topology> {
        let online_path = root.join("online");
        let online = std::fs::read_to_string(&online_path)
            .with_context(|| format!("Failed to read {:?}", online_path))?;
        let online = crate::cpumask::read_cpulist(&online)?;

        let mut cpus = BTreeMap::new();
        let cpu_pattern = root.join("cpu[0-9]*");
        for cpu_path in glob(cpu_pattern.to_string_lossy().as_ref())?.filter_map(Result::ok) {
            let name = match cpu_path.file_name() {
                Some(name) => name.to_string_lossy().to_string(),
                None => continue,
            };
            let id = match sscanf!(name.as_str(), "cpu{usize}") {
                Ok(id) => id,
                Err(_) => continue,
            };

            // Kernels without asymmetric capacity don't expose cpu_capacity,
            // every CPU is then full capacity.
            let capacity = read_file_u64(&cpu_path.join("cpu_capacity"))
                .unwrap_or(SCHED_CAPACITY_SCALE)
                .clamp(1, SCHED_CAPACITY_SCALE);
            let llc_id = read_llc_id(&cpu_path).unwrap_or(0);

            cpus.insert(id, Cpu::new(id, capacity, llc_id));
        }

        for cpu in online.iter() {
            if !cpus.contains_key(cpu) {
                bail!("Online CPU {} has no directory under {:?}", cpu, root);
            }
        }

        let mut top = Self::from_cpus(cpus.into_values())?;
        top.span = Cpumask::from_cpus(online, top.nr_cpu_ids)?;
        debug!("{:#?}", top);
        Ok(top)
    }

    /// Build a Topology from an explicit list of CPUs. All listed CPUs are
    /// online, and nr_cpu_ids is one past the highest CPU ID.
    pub fn from_cpus(cpus: impl IntoIterator<Item = Cpu>) -> Result<Topology> {
        let mut map = BTreeMap::new();
        for cpu in cpus {
            if cpu.capacity == 0 {
                bail!("CPU {} has zero capacity", cpu.id);
            }
            let id = cpu.id;
            if map.insert(id, cpu).is_some() {
                bail!("Found duplicate CPU ID {}", id);
            }
        }

        let nr_cpu_ids = match map.keys().next_back() {
            Some(last) => last + 1,
            None => bail!("Topology has no CPUs"),
        };
        let span = Cpumask::from_cpus(map.keys().copied(), nr_cpu_ids)?;
        let prime_cpu = find_prime_cpu(&map, nr_cpu_ids);

        Ok(Topology {
            cpus: map,
            nr_cpu_ids,
            span,
            prime_cpu,
        })
    }

    /// Get the map of <CPU ID, Cpu> for all known CPUs.
    pub fn cpus(&self) -> &BTreeMap<usize, Cpu> {
        &self.cpus
    }

    /// One past the highest possible CPU ID.
    pub fn nr_cpu_ids(&self) -> usize {
        self.nr_cpu_ids
    }

    /// Get a cpumask of all the online CPUs.
    pub fn span(&self) -> &Cpumask {
        &self.span
    }

    /// Architectural capacity of `cpu`, 0 if the CPU is unknown.
    pub fn capacity(&self, cpu: usize) -> u64 {
        self.cpus.get(&cpu).map_or(0, |c| c.capacity)
    }

    /// Whether `a` and `b` share a last-level cache. A CPU always shares
    /// cache with itself.
    pub fn shares_cache(&self, a: usize, b: usize) -> bool {
        if a == b {
            return true;
        }
        match (self.cpus.get(&a), self.cpus.get(&b)) {
            (Some(a), Some(b)) => a.llc_id == b.llc_id,
            _ => false,
        }
    }

    /// The last CPU of an asymmetric system whose capacity differs from its
    /// neighbor's, if any.
    pub fn prime_cpu(&self) -> Option<usize> {
        self.prime_cpu
    }
}

fn find_prime_cpu(cpus: &BTreeMap<usize, Cpu>, nr_cpu_ids: usize) -> Option<usize> {
    if nr_cpu_ids < 2 {
        return None;
    }

    let last = nr_cpu_ids - 1;
    match (cpus.get(&last), cpus.get(&(last - 1))) {
        (Some(last_cpu), Some(prev_cpu)) if last_cpu.capacity != prev_cpu.capacity => Some(last),
        _ => None,
    }
}

/**********************************************
 * Helper functions for reading sysfs         *
 **********************************************/

fn read_file_u64(path: &Path) -> Result<u64> {
    let val = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to open or read file {:?}", path))?;

    match val.trim().parse::<u64>() {
        Ok(parsed) => Ok(parsed),
        Err(_) => {
            bail!("Failed to parse {}", val);
        }
    }
}

/// Find the ID of the highest cache level of a CPU. When the index directory
/// has no id file, fall back to the first CPU sharing that cache.
fn read_llc_id(cpu_path: &Path) -> Result<usize> {
    let pattern = cpu_path.join("cache").join("index[0-9]*");
    let mut llc: Option<(u64, std::path::PathBuf)> = None;
    for index_path in glob(pattern.to_string_lossy().as_ref())?.filter_map(Result::ok) {
        let level = match read_file_u64(&index_path.join("level")) {
            Ok(level) => level,
            Err(_) => continue,
        };
        if llc.as_ref().map_or(true, |(max, _)| level > *max) {
            llc = Some((level, index_path));
        }
    }

    let (_, index_path) = match llc {
        Some(llc) => llc,
        None => bail!("No cache information under {:?}", cpu_path),
    };
    if let Ok(id) = read_file_u64(&index_path.join("id")) {
        return Ok(id as usize);
    }

    let shared = std::fs::read_to_string(index_path.join("shared_cpu_list"))?;
    match crate::cpumask::read_cpulist(&shared)?.first() {
        Some(first) => Ok(*first),
        None => bail!("Empty shared_cpu_list under {:?}", index_path),
    }
}
