// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.
use serde::Deserialize;
use serde::Serialize;

use crate::Cpumask;

/// What the selector knows about the task being woken.
#[derive(Debug, Clone)]
pub struct TaskCtx {
    /// Predicted utilization of the task.
    pub util_est: u64,
    /// Effective minimum utilization clamp: the capacity the task must get.
    pub uclamp_min: u64,
    /// CPU the task is currently assigned to.
    pub cpu: usize,
    pub cpus_allowed: Cpumask,
}

/// The task running on the CPU that performs the wakeup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Waker {
    pub cpu: usize,
    /// Current utilization of the waking task.
    pub util: u64,
    pub rt: bool,
}

/// A wakeup placement request.
#[derive(Debug, Clone)]
pub struct Wakeup<'a> {
    pub task: &'a TaskCtx,
    /// CPU the task last ran on.
    pub prev_cpu: usize,
    /// The waker is expected to block right after the wakeup.
    pub sync: bool,
    pub waker: Waker,
}

/// Per-selection inputs shared by the candidate builder and the comparator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeCtx {
    /// Utilization the task adds to a CPU it moves to; 0 for RT tasks.
    pub p_util: u64,
    pub uclamp_min: u64,
    pub task_cpu: usize,
    pub prev_cpu: usize,
    pub sync: bool,
    pub waker: Waker,
    pub prime_cpu: Option<usize>,
}

impl WakeCtx {
    pub fn new(wakeup: &Wakeup, rt: bool, prime_cpu: Option<usize>) -> Self {
        WakeCtx {
            p_util: if rt { 0 } else { wakeup.task.util_est },
            uclamp_min: wakeup.task.uclamp_min,
            task_cpu: wakeup.task.cpu,
            prev_cpu: wakeup.prev_cpu,
            sync: wakeup.sync,
            waker: wakeup.waker,
            prime_cpu,
        }
    }

    pub fn is_prime(&self, cpu: usize) -> bool {
        self.prime_cpu == Some(cpu)
    }
}
