// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Replayable wakeup scenarios.
//!
//! A scenario describes a frozen system and a list of wakeups to place on
//! it. It is JSON, passed either inline or as `file:<path>` (`f:<path>`):
//!
//! ```json
//! {
//!   "topology": [
//!     { "id": 0, "capacity": 512, "llc_id": 0 },
//!     { "id": 1, "capacity": 1024, "llc_id": 1 }
//!   ],
//!   "active": "0-1",
//!   "cpus": {
//!     "0": { "util_avg": 200, "nr_running": 1 },
//!     "1": { "idle": true, "exit_latency": 20 }
//!   },
//!   "config": { "util_est": true },
//!   "wakeups": [
//!     { "name": "render", "util_est": 100, "cpu": 0, "sync": false }
//!   ]
//! }
//! ```
//!
//! CPUs of the topology without an entry in `cpus` are fully idle.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;

use crate::topology::Cpu;
use crate::CassConfig;
use crate::CpuSnapshot;
use crate::Cpumask;
use crate::SystemSnapshot;
use crate::TaskCtx;
use crate::Topology;
use crate::Waker;
use crate::Wakeup;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WakeupSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub util_est: u64,
    #[serde(default)]
    pub uclamp_min: u64,
    /// CPU the task is currently assigned to.
    pub cpu: usize,
    /// Defaults to `cpu`.
    #[serde(default)]
    pub prev_cpu: Option<usize>,
    /// Allowed CPUs as a cpulist. Defaults to all.
    #[serde(default)]
    pub allowed: Option<String>,
    #[serde(default)]
    pub sync: bool,
    #[serde(default)]
    pub waker: Waker,
    /// Place as a real-time task.
    #[serde(default)]
    pub rt: bool,
}

impl WakeupSpec {
    pub fn task(&self, nr_cpu_ids: usize) -> Result<TaskCtx> {
        let cpus_allowed = match &self.allowed {
            Some(list) => Cpumask::from_cpulist(list, nr_cpu_ids)
                .with_context(|| format!("Invalid allowed CPUs of wakeup \"{}\"", self.name))?,
            None => Cpumask::full(nr_cpu_ids),
        };

        Ok(TaskCtx {
            util_est: self.util_est,
            uclamp_min: self.uclamp_min,
            cpu: self.cpu,
            cpus_allowed,
        })
    }

    pub fn wakeup<'a>(&self, task: &'a TaskCtx) -> Wakeup<'a> {
        Wakeup {
            task,
            prev_cpu: self.prev_cpu.unwrap_or(self.cpu),
            sync: self.sync,
            waker: self.waker,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub topology: Vec<Cpu>,
    /// Active CPUs as a cpulist. Defaults to the whole topology.
    #[serde(default)]
    pub active: Option<String>,
    #[serde(default)]
    pub cpus: BTreeMap<usize, CpuSnapshot>,
    #[serde(default)]
    pub config: CassConfig,
    #[serde(default)]
    pub wakeups: Vec<WakeupSpec>,
}

impl Scenario {
    pub fn parse(input: &str) -> Result<Self> {
        let scenario: Scenario = if input.starts_with("f:") || input.starts_with("file:") {
            let path = match input.split_once(':') {
                Some((_, path)) => path,
                None => bail!("Invalid scenario path {}", input),
            };
            let mut f = fs::OpenOptions::new()
                .read(true)
                .open(path)
                .with_context(|| format!("Failed to open scenario {}", path))?;
            let mut content = String::new();
            f.read_to_string(&mut content)?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse scenario {}", path))?
        } else {
            serde_json::from_str(input).context("Failed to parse inline scenario")?
        };
        Ok(scenario)
    }

    /// Build the frozen system described by the scenario's own topology.
    pub fn system(&self) -> Result<SystemSnapshot> {
        let topo = Topology::from_cpus(self.topology.iter().cloned())?;
        self.system_on(topo)
    }

    /// Build the frozen system on top of `topo`, e.g. the host's.
    pub fn system_on(&self, topo: Topology) -> Result<SystemSnapshot> {
        let nr_cpu_ids = topo.nr_cpu_ids();
        let mut sys = SystemSnapshot::new(topo);

        for (&cpu, snap) in self.cpus.iter() {
            sys.set_cpu(cpu, *snap)
                .with_context(|| format!("Invalid snapshot for CPU {}", cpu))?;
        }

        if let Some(active) = &self.active {
            let mask = Cpumask::from_cpulist(active, nr_cpu_ids)
                .with_context(|| format!("Invalid active CPUs \"{}\"", active))?;
            sys.set_active(mask)?;
        }

        Ok(sys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SchedState;
    use std::io::Write;

    const SCENARIO: &str = r#"{
        "topology": [
            { "id": 0, "capacity": 512 },
            { "id": 1, "capacity": 512 },
            { "id": 2, "capacity": 1024, "llc_id": 1 }
        ],
        "active": "0,2",
        "cpus": {
            "0": { "util_avg": 200, "nr_running": 1 }
        },
        "wakeups": [
            { "name": "a", "util_est": 100, "cpu": 0 },
            { "name": "b", "cpu": 1, "prev_cpu": 2, "allowed": "1-2", "rt": true,
              "sync": true, "waker": { "cpu": 2, "util": 30 } }
        ]
    }"#;

    #[test]
    fn test_parse_inline() {
        let scenario = Scenario::parse(SCENARIO).unwrap();
        assert_eq!(scenario.config, CassConfig::default());
        assert_eq!(scenario.wakeups.len(), 2);

        let sys = scenario.system().unwrap();
        assert_eq!(sys.active_cpus().to_cpulist(), "0,2");
        assert_eq!(sys.cpu_snapshot(0).util_avg, 200);
        assert!(sys.cpu_snapshot(1).idle);
        assert_eq!(sys.prime_cpu(), Some(2));
        assert!(!sys.shares_cache(0, 2));

        let spec = &scenario.wakeups[1];
        let task = spec.task(sys.nr_cpu_ids()).unwrap();
        let wakeup = spec.wakeup(&task);
        assert_eq!(task.cpus_allowed.to_cpulist(), "1-2");
        assert_eq!(wakeup.prev_cpu, 2);
        assert_eq!(wakeup.waker.util, 30);
        assert!(!wakeup.waker.rt);
        assert!(spec.rt);

        let task = scenario.wakeups[0].task(3).unwrap();
        assert_eq!(task.cpus_allowed.weight(), 3);
        assert_eq!(scenario.wakeups[0].wakeup(&task).prev_cpu, 0);
    }

    #[test]
    fn test_parse_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SCENARIO.as_bytes()).unwrap();
        let path = file.path().to_str().unwrap();

        let scenario = Scenario::parse(&format!("file:{}", path)).unwrap();
        assert_eq!(scenario.topology.len(), 3);
        let scenario = Scenario::parse(&format!("f:{}", path)).unwrap();
        assert_eq!(scenario.wakeups[0].name, "a");

        assert!(Scenario::parse("f:/nonexistent/scenario.json").is_err());
    }

    #[test]
    fn test_invalid_scenarios() {
        assert!(Scenario::parse("{ not json").is_err());

        let bad_cpu = Scenario::parse(
            r#"{ "topology": [{ "id": 0 }], "cpus": { "3": { "idle": true } } }"#,
        )
        .unwrap();
        assert!(bad_cpu.system().is_err());

        let bad_active =
            Scenario::parse(r#"{ "topology": [{ "id": 0 }], "active": "0-4" }"#).unwrap();
        assert!(bad_active.system().is_err());

        let empty = Scenario::parse("{}").unwrap();
        assert!(empty.system().is_err());
    }
}
