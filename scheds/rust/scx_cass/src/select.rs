// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # CASS CPU selection
//!
//! The selector visits every CPU the task may run on that is also active,
//! builds a candidate for it and compares it against the running best. The
//! CPU left holding the best slot at the end of the walk is returned.
//!
//! Two shortcuts skip the comparator:
//!
//! - A CPU whose thermally derated capacity is below the task's minimum
//!   utilization clamp, and below the capacity of the current best, is
//!   pruned before its utilization is computed.
//!
//! - When the task has no minimum clamp, the first idle CPU other than the
//!   prime CPU takes the best slot outright. From then on busy CPUs are not
//!   considered at all, while further idle CPUs are compared as usual.
//!
//! The walk holds no state across calls. Everything it reads comes from the
//! SchedState it is handed.

use anyhow::Result;
use log::debug;
use log::trace;
use log::warn;
use serde::Serialize;

use crate::cand::cpu_is_idle;
use crate::cand::CpuCand;
use crate::compare::compare;
use crate::compare::Verdict;
use crate::task::WakeCtx;
use crate::task::Wakeup;
use crate::CassConfig;
use crate::Cpumask;
use crate::Criterion;
use crate::SchedState;

/// How the selector reached its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectKind {
    /// No CPU was eligible. The returned CPU is the previous CPU and carries
    /// no meaning.
    NoCandidate,
    /// Exactly one CPU was eligible.
    SoleCpu,
    /// Candidates were built and compared.
    Compared,
}

/// What put the winner into the best slot the last time it changed hands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecidedBy {
    /// The first candidate built, never displaced.
    First,
    /// The first unclamped, non-prime idle CPU.
    Idle,
    Criterion(Criterion),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Selection {
    pub cpu: usize,
    pub kind: SelectKind,
    pub decided_by: Option<DecidedBy>,
    pub nr_visited: usize,
    pub nr_pruned: usize,
    pub nr_skipped: usize,
}

impl Selection {
    fn new(cpu: usize, kind: SelectKind) -> Self {
        Selection {
            cpu,
            kind,
            decided_by: None,
            nr_visited: 0,
            nr_pruned: 0,
            nr_skipped: 0,
        }
    }
}

/// The Capacity Aware Superset Scheduler CPU selector.
#[derive(Debug, Clone, Default)]
pub struct Cass {
    cfg: CassConfig,
}

impl Cass {
    pub fn new(cfg: CassConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Cass { cfg })
    }

    pub fn config(&self) -> &CassConfig {
        &self.cfg
    }

    /// Pick a CPU for a waking fair-class task.
    pub fn select_cpu_fair<S: SchedState>(&self, state: &S, wakeup: &Wakeup) -> usize {
        self.best_cpu(state, wakeup, false).cpu
    }

    /// Pick a CPU for a waking real-time task. The task's own utilization is
    /// not projected onto the candidates.
    pub fn select_cpu_rt<S: SchedState>(&self, state: &S, wakeup: &Wakeup) -> usize {
        self.best_cpu(state, wakeup, true).cpu
    }

    /// CPUs the task may be placed on right now.
    pub fn eligible_cpus<S: SchedState>(state: &S, wakeup: &Wakeup) -> Cpumask {
        wakeup.task.cpus_allowed.and(state.active_cpus())
    }

    /// Run the selector and report how it decided.
    ///
    /// Callers must guarantee that the task's allowed CPUs intersect the
    /// active CPUs. An empty eligible set is a precondition violation, not
    /// supported input: the selector only avoids panicking on it, logs a
    /// warning and reports `SelectKind::NoCandidate`. The CPU returned then
    /// is meaningless and must not be relied upon.
    pub fn best_cpu<S: SchedState>(&self, state: &S, wakeup: &Wakeup, rt: bool) -> Selection {
        let eligible = Self::eligible_cpus(state, wakeup);
        let ctx = WakeCtx::new(wakeup, rt, state.prime_cpu());

        match eligible.weight() {
            0 => {
                warn!(
                    "No eligible CPU (allowed={} active={}), returning prev_cpu {}",
                    wakeup.task.cpus_allowed.to_cpulist(),
                    state.active_cpus().to_cpulist(),
                    wakeup.prev_cpu
                );
                Selection::new(wakeup.prev_cpu, SelectKind::NoCandidate)
            }
            1 => {
                let mut sel = Selection::new(wakeup.prev_cpu, SelectKind::SoleCpu);
                if let Some(cpu) = eligible.first() {
                    sel.cpu = cpu;
                }
                debug!("Sole eligible CPU {}", sel.cpu);
                sel
            }
            _ => self.best_cpu_in(state, eligible.iter(), &ctx),
        }
    }

    /// Walk `cpus` in the given order. Normally this is the eligible set in
    /// ascending order; other orders are accepted to study how the
    /// visitation order affects the result.
    pub fn best_cpu_in<S, I>(&self, state: &S, cpus: I, ctx: &WakeCtx) -> Selection
    where
        S: SchedState,
        I: IntoIterator<Item = usize>,
    {
        let mut sel = Selection::new(ctx.prev_cpu, SelectKind::NoCandidate);
        let mut best: Option<CpuCand> = None;
        let mut has_idle = false;

        for cpu in cpus {
            sel.nr_visited += 1;

            let snap = state.cpu_snapshot(cpu);
            let mut curr = CpuCand::new(cpu, state.capacity(cpu), &snap);

            if let Some(best) = &best {
                if curr.cap_max < ctx.uclamp_min && curr.cap_max < best.cap_max {
                    trace!(
                        "CPU {} pruned: cap_max={} uclamp_min={} best.cap_max={}",
                        cpu,
                        curr.cap_max,
                        ctx.uclamp_min,
                        best.cap_max
                    );
                    sel.nr_pruned += 1;
                    continue;
                }
            }

            let mut force = false;
            if cpu_is_idle(cpu, &snap, ctx) {
                if ctx.uclamp_min == 0 && !ctx.is_prime(cpu) {
                    force = !has_idle;
                    has_idle = true;
                }
                curr.set_idle(snap.exit_latency);
            } else {
                if has_idle {
                    trace!("CPU {} skipped: busy with an idle CPU found", cpu);
                    sel.nr_skipped += 1;
                    continue;
                }
                curr.set_busy();
            }

            curr.fill_util(&snap, ctx, &self.cfg);

            let decided_by = match &best {
                None => Some(DecidedBy::First),
                Some(_) if force => Some(DecidedBy::Idle),
                Some(best) => match compare(state, &curr, best, ctx, &self.cfg) {
                    Verdict::Better(crit) => Some(DecidedBy::Criterion(crit)),
                    Verdict::Worse(_) | Verdict::Tie => None,
                },
            };

            if let Some(decided_by) = decided_by {
                trace!("CPU {} takes best ({:?}): {:?}", cpu, decided_by, curr);
                best = Some(curr);
                sel.decided_by = Some(decided_by);
            }
        }

        if let Some(best) = best {
            sel.cpu = best.cpu;
            sel.kind = SelectKind::Compared;
        }

        sel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskCtx;
    use crate::task::Waker;
    use crate::topology::Cpu;
    use crate::CpuSnapshot;
    use crate::SystemSnapshot;
    use crate::Topology;

    fn busy(util_avg: u64) -> CpuSnapshot {
        CpuSnapshot {
            util_avg,
            nr_running: 1,
            ..Default::default()
        }
    }

    fn idle(exit_latency: u32) -> CpuSnapshot {
        CpuSnapshot {
            idle: true,
            exit_latency: Some(exit_latency),
            ..Default::default()
        }
    }

    fn system(cpus: Vec<(u64, CpuSnapshot)>) -> SystemSnapshot {
        let topo = Topology::from_cpus(
            cpus.iter()
                .enumerate()
                .map(|(id, (cap, _))| Cpu::new(id, *cap, 0)),
        )
        .unwrap();
        let mut sys = SystemSnapshot::new(topo);
        for (id, (_, snap)) in cpus.into_iter().enumerate() {
            sys.set_cpu(id, snap).unwrap();
        }
        sys
    }

    fn task(nr_cpus: usize, util_est: u64, uclamp_min: u64) -> TaskCtx {
        TaskCtx {
            util_est,
            uclamp_min,
            cpu: 0,
            cpus_allowed: Cpumask::full(nr_cpus),
        }
    }

    fn wakeup(task: &TaskCtx) -> Wakeup<'_> {
        Wakeup {
            task,
            prev_cpu: task.cpu,
            sync: false,
            waker: Waker::default(),
        }
    }

    #[test]
    fn test_lower_load_wins() {
        let sys = system(vec![(1024, busy(200)), (1024, busy(800))]);
        let task = task(2, 100, 0);
        let sel = Cass::default().best_cpu(&sys, &wakeup(&task), false);
        assert_eq!(sel.cpu, 0);
        assert_eq!(sel.kind, SelectKind::Compared);
        assert_eq!(sel.decided_by, Some(DecidedBy::First));
        assert_eq!(sel.nr_visited, 2);
    }

    #[test]
    fn test_first_idle_forced_then_busy_skipped() {
        let sys = system(vec![
            (1024, busy(500)),
            (1024, idle(10)),
            (1024, busy(0)),
            (1024, idle(10)),
        ]);
        let task = task(4, 100, 0);
        let sel = Cass::default().best_cpu(&sys, &wakeup(&task), false);
        assert_eq!(sel.cpu, 1);
        assert_eq!(sel.decided_by, Some(DecidedBy::Idle));
        assert_eq!(sel.nr_skipped, 1);
        assert_eq!(sel.nr_visited, 4);
    }

    #[test]
    fn test_clamped_task_compares_idle_and_busy() {
        let mut loaded_idle = idle(0);
        loaded_idle.util_avg = 500;
        let sys = system(vec![(1024, loaded_idle), (1024, busy(10))]);

        // With a minimum clamp the idle CPU does not take the best slot
        // outright and the busy CPU is still compared.
        let clamped = task(2, 100, 100);
        let sel = Cass::default().best_cpu(&sys, &wakeup(&clamped), false);
        assert_eq!(sel.cpu, 1);
        assert_eq!(sel.decided_by, Some(DecidedBy::Criterion(Criterion::Util)));
        assert_eq!(sel.nr_skipped, 0);
        assert_eq!(sel.nr_visited, 2);

        // Without the clamp the idle CPU wins and the busy one is skipped.
        let unclamped = task(2, 100, 0);
        let sel = Cass::default().best_cpu(&sys, &wakeup(&unclamped), false);
        assert_eq!(sel.cpu, 0);
        assert_eq!(sel.nr_skipped, 1);
    }

    #[test]
    fn test_later_idle_compared() {
        let sys = system(vec![(1024, idle(100)), (1024, idle(10))]);
        let mut task = task(2, 100, 0);
        task.cpu = 5;
        let wakeup = Wakeup {
            prev_cpu: 5,
            ..wakeup(&task)
        };
        let sel = Cass::default().best_cpu(&sys, &wakeup, false);
        assert_eq!(sel.cpu, 1);
        assert_eq!(
            sel.decided_by,
            Some(DecidedBy::Criterion(Criterion::ExitLatency))
        );
    }

    #[test]
    fn test_clamp_prunes_small_cpus() {
        let sys = system(vec![
            (1024, busy(900)),
            (512, idle(0)),
            (1024, busy(100)),
            (1024, busy(950)),
        ]);
        let task = task(4, 100, 600);
        let sel = Cass::default().best_cpu(&sys, &wakeup(&task), false);
        assert_eq!(sel.nr_pruned, 1);
        assert_eq!(sel.cpu, 2);
        assert_eq!(sel.decided_by, Some(DecidedBy::Criterion(Criterion::Util)));
    }

    #[test]
    fn test_sole_and_empty() {
        let sys = system(vec![(1024, busy(900)), (1024, idle(0))]);
        let mut task = task(2, 100, 0);
        task.cpus_allowed = Cpumask::from_cpulist("0", 2).unwrap();
        let sel = Cass::default().best_cpu(&sys, &wakeup(&task), false);
        assert_eq!(sel.cpu, 0);
        assert_eq!(sel.kind, SelectKind::SoleCpu);

        task.cpus_allowed = Cpumask::new(2);
        task.cpu = 1;
        let sel = Cass::default().best_cpu(&sys, &wakeup(&task), true);
        assert_eq!(sel.cpu, 1);
        assert_eq!(sel.kind, SelectKind::NoCandidate);

        let ctx = WakeCtx::new(&wakeup(&task), false, None);
        let sel = Cass::default().best_cpu_in(&sys, std::iter::empty::<usize>(), &ctx);
        assert_eq!(sel.kind, SelectKind::NoCandidate);
        assert_eq!(sel.nr_visited, 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let cfg = CassConfig {
            capacity_margin: 1,
            ..Default::default()
        };
        assert!(Cass::new(cfg).is_err());
        assert_eq!(Cass::new(CassConfig::default()).unwrap().config().capacity_margin, 1280);
    }
}
