// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Capacity Aware Superset Scheduler CPU selection
//!
//! CASS picks the CPU a task is placed on when it wakes up. It targets
//! heterogeneous systems where CPUs differ in capacity, and treats every CPU
//! the task may run on as a candidate instead of first narrowing the search
//! to one cluster.
//!
//! For each candidate it derives the capacity left after thermal throttling
//! and RT, DL and IRQ pressure, and projects the utilization the CPU would
//! have with the task placed on it. Candidates are then compared pairwise
//! through a fixed hierarchy: relative load, capacity fit, keeping the prime
//! CPU free, utilization, idleness, sync wakeups, capacity, idle exit
//! latency, and finally the previous CPU and its cache.
//!
//! The selector does not measure anything. All inputs are read through the
//! [`SchedState`] trait as point-in-time [`CpuSnapshot`]s; [`SystemSnapshot`]
//! is an owned implementation for frozen systems, such as the scenarios
//! replayed by the `scx_cass` binary.
//!
//!```
//!     use scx_cass::*;
//!
//!     let topo = Topology::from_cpus(vec![
//!         topology::Cpu::new(0, 1024, 0),
//!         topology::Cpu::new(1, 1024, 0),
//!     ]).unwrap();
//!     let mut sys = SystemSnapshot::new(topo);
//!     sys.set_cpu(0, CpuSnapshot { util_avg: 200, nr_running: 1, ..Default::default() }).unwrap();
//!     sys.set_cpu(1, CpuSnapshot { util_avg: 800, nr_running: 1, ..Default::default() }).unwrap();
//!
//!     let task = TaskCtx { util_est: 100, uclamp_min: 0, cpu: 0, cpus_allowed: Cpumask::full(2) };
//!     let wakeup = Wakeup { task: &task, prev_cpu: 0, sync: false, waker: Waker::default() };
//!     assert_eq!(Cass::default().select_cpu_fair(&sys, &wakeup), 0);
//!```

use static_assertions::const_assert;

/// Capacity of the biggest CPU at its highest frequency. Capacities and
/// utilizations are expressed against it.
pub const SCHED_CAPACITY_SCALE: u64 = 1024;

const_assert!(SCHED_CAPACITY_SCALE.is_power_of_two());
const_assert!(config::DFL_CAPACITY_MARGIN > SCHED_CAPACITY_SCALE);

pub mod cpumask;
pub use cpumask::Cpumask;

pub mod topology;
pub use topology::Topology;

mod snapshot;
pub use snapshot::CpuSnapshot;
pub use snapshot::SchedState;
pub use snapshot::SystemSnapshot;

mod config;
pub use config::CassConfig;
pub use config::DFL_CAPACITY_MARGIN;

mod task;
pub use task::TaskCtx;
pub use task::WakeCtx;
pub use task::Waker;
pub use task::Wakeup;

pub mod cand;
pub use cand::CpuCand;

pub mod compare;
pub use compare::Criterion;
pub use compare::Verdict;

mod select;
pub use select::Cass;
pub use select::DecidedBy;
pub use select::SelectKind;
pub use select::Selection;

mod stats;
pub use stats::SelectStats;

pub mod scenario;
pub use scenario::Scenario;
