// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Per-CPU candidates.
//!
//! A candidate carries everything the comparator looks at for one CPU. It
//! lives for one selection only. Capacities are derived first, since the
//! selection loop may drop the CPU on capacity alone; utilization is filled
//! in only for CPUs that survive.
//!
//! All fields are in SCHED_CAPACITY_SCALE units. No field ever goes
//! negative, and every capacity is at least 1 so it can be used as a divisor.

use std::cmp::max;
use std::cmp::min;

use crate::snapshot::CpuSnapshot;
use crate::task::WakeCtx;
use crate::CassConfig;
use crate::SCHED_CAPACITY_SCALE;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuCand {
    pub cpu: usize,
    /// 0 when busy, otherwise 1 + the idle state's exit latency.
    pub exit_lat: u32,
    /// cap_max minus the RT, DL and IRQ pressure.
    pub cap: u64,
    /// cap_orig minus thermal pressure.
    pub cap_max: u64,
    /// cap_orig minus the RT, DL and IRQ pressure, ignoring thermal pressure.
    pub cap_no_therm: u64,
    /// Architectural capacity.
    pub cap_orig: u64,
    /// Total demand on the CPU if the task is placed there.
    pub eff_util: u64,
    pub hard_util: u64,
    /// Fair utilization with the task placed there, relative to
    /// cap_no_therm.
    pub util: u64,
}

impl CpuCand {
    /// Start a candidate from the CPU's architectural capacity and thermal
    /// pressure.
    pub fn new(cpu: usize, capacity: u64, snap: &CpuSnapshot) -> Self {
        let cap_orig = max(capacity, 1);

        CpuCand {
            cpu,
            cap_orig,
            cap_max: cap_orig - min(snap.thermal_load, cap_orig - 1),
            ..Default::default()
        }
    }

    pub fn is_idle(&self) -> bool {
        self.exit_lat != 0
    }

    pub fn set_busy(&mut self) {
        self.exit_lat = 0;
    }

    /// A reported latency of 0 still marks the CPU idle.
    pub fn set_idle(&mut self, exit_latency: Option<u32>) {
        self.exit_lat = exit_latency.unwrap_or(0).saturating_add(1);
    }

    /// Whether the task hard-floored to `eff_util` overloads the CPU.
    pub fn overloaded(&self) -> bool {
        self.eff_util > self.cap_max
    }

    /// Compute utilization and the capacity left under RT, DL and IRQ
    /// pressure, as if the task were placed on this CPU.
    pub fn fill_util(&mut self, snap: &CpuSnapshot, ctx: &WakeCtx, cfg: &CassConfig) {
        let mut sync = ctx.sync;

        // The running average decays while tasks sleep. Trust the estimate
        // when it is larger; it already excludes the blocking waker.
        self.util = snap.util_avg;
        if cfg.util_est && snap.util_est > self.util {
            sync = false;
            self.util = snap.util_est;
        }

        // The waker is about to block, its utilization leaves this CPU.
        if sync && self.cpu == ctx.waker.cpu && !ctx.waker.rt {
            self.util -= min(self.util, ctx.waker.util);
        }

        self.hard_util = snap.hard_util();
        self.cap = self.cap_max - min(self.hard_util, self.cap_max - 1);
        self.cap_no_therm = self.cap_orig - min(self.hard_util, self.cap_orig - 1);

        // The task's own utilization is already accounted on its CPU.
        if self.cpu != ctx.task_cpu {
            self.util = self.util.saturating_add(ctx.p_util);
        }

        self.eff_util = max(self.util.saturating_add(self.hard_util), ctx.uclamp_min);
        self.util = max(
            self.util.saturating_mul(SCHED_CAPACITY_SCALE) / self.cap_no_therm,
            ctx.uclamp_min,
        );
    }
}

/// Whether the CPU counts as idle for this wakeup. A sync waker alone on its
/// CPU is about to leave it idle.
pub fn cpu_is_idle(cpu: usize, snap: &CpuSnapshot, ctx: &WakeCtx) -> bool {
    (ctx.sync && cpu == ctx.waker.cpu && snap.nr_running == 1) || snap.idle || snap.sched_idle
}
