// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Candidate comparison
//!
//! Two candidates are compared through a fixed hierarchy of criteria. Each
//! criterion yields an Ordering from the challenger's point of view and the
//! first one that is not Equal decides:
//!
//!  1. Efficiency: lower `eff_util / cap_max` (integer quotient).
//!  2. Overload: lower `eff_util * 1024 / cap_max`, only when both are
//!     overloaded.
//!  3. Fit: the task's utilization fits in `cap_max` with headroom.
//!  4. Prime: the prime CPU is kept free for bursty single-thread work.
//!  5. Utilization: lower capacity-relative `util`.
//!  6. Busy: a busy CPU has no idle exit latency to pay.
//!  7. Sync: on sync wakeups the waker's CPU wins.
//!  8. Capacity: higher `cap`.
//!  9. Exit latency: shallower idle state.
//! 10. Previous CPU: avoid a migration.
//! 11. Cache affinity: share a cache with the previous CPU.
//!
//! A full tie keeps the incumbent.

use std::cmp::Ordering;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::cand::CpuCand;
use crate::task::WakeCtx;
use crate::CassConfig;
use crate::SchedState;
use crate::SCHED_CAPACITY_SCALE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    Efficiency,
    Overload,
    Fit,
    Prime,
    Util,
    Busy,
    SyncWaker,
    Capacity,
    ExitLatency,
    PrevCpu,
    CacheAffinity,
}

impl Criterion {
    /// Evaluation order.
    pub const ALL: [Criterion; 11] = [
        Criterion::Efficiency,
        Criterion::Overload,
        Criterion::Fit,
        Criterion::Prime,
        Criterion::Util,
        Criterion::Busy,
        Criterion::SyncWaker,
        Criterion::Capacity,
        Criterion::ExitLatency,
        Criterion::PrevCpu,
        Criterion::CacheAffinity,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Criterion::Efficiency => "efficiency",
            Criterion::Overload => "overload",
            Criterion::Fit => "fit",
            Criterion::Prime => "prime",
            Criterion::Util => "util",
            Criterion::Busy => "busy",
            Criterion::SyncWaker => "sync_waker",
            Criterion::Capacity => "capacity",
            Criterion::ExitLatency => "exit_latency",
            Criterion::PrevCpu => "prev_cpu",
            Criterion::CacheAffinity => "cache_affinity",
        }
    }

    /// Greater when `a` is the better CPU under this criterion alone.
    fn eval<S: SchedState>(
        self,
        state: &S,
        a: &CpuCand,
        b: &CpuCand,
        ctx: &WakeCtx,
        cfg: &CassConfig,
    ) -> Ordering {
        match self {
            Criterion::Efficiency => (b.eff_util / b.cap_max).cmp(&(a.eff_util / a.cap_max)),
            Criterion::Overload => {
                if a.overloaded() && b.overloaded() {
                    overload_ratio(b).cmp(&overload_ratio(a))
                } else {
                    Ordering::Equal
                }
            }
            Criterion::Fit => {
                let fits = |c: &CpuCand| fits_capacity(ctx.p_util, c.cap_max, cfg.capacity_margin);
                fits(a).cmp(&fits(b))
            }
            Criterion::Prime => ctx.is_prime(b.cpu).cmp(&ctx.is_prime(a.cpu)),
            Criterion::Util => b.util.cmp(&a.util),
            Criterion::Busy => b.is_idle().cmp(&a.is_idle()),
            Criterion::SyncWaker => {
                if ctx.sync {
                    prefer_cpu(a, b, ctx.waker.cpu)
                } else {
                    Ordering::Equal
                }
            }
            Criterion::Capacity => a.cap.cmp(&b.cap),
            Criterion::ExitLatency => b.exit_lat.cmp(&a.exit_lat),
            Criterion::PrevCpu => prefer_cpu(a, b, ctx.prev_cpu),
            Criterion::CacheAffinity => state
                .shares_cache(a.cpu, ctx.prev_cpu)
                .cmp(&state.shares_cache(b.cpu, ctx.prev_cpu)),
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of comparing a challenger against the incumbent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Better(Criterion),
    Worse(Criterion),
    Tie,
}

/// Whether `util` fits in `capacity` while leaving the margin's headroom.
pub fn fits_capacity(util: u64, capacity: u64, margin: u64) -> bool {
    util.saturating_mul(margin) < capacity.saturating_mul(SCHED_CAPACITY_SCALE)
}

fn overload_ratio(c: &CpuCand) -> u64 {
    c.eff_util.saturating_mul(SCHED_CAPACITY_SCALE) / c.cap_max
}

fn prefer_cpu(a: &CpuCand, b: &CpuCand, cpu: usize) -> Ordering {
    if a.cpu == cpu {
        Ordering::Greater
    } else if b.cpu == cpu {
        Ordering::Less
    } else {
        Ordering::Equal
    }
}

/// Compare challenger `a` against incumbent `b`.
pub fn compare<S: SchedState>(
    state: &S,
    a: &CpuCand,
    b: &CpuCand,
    ctx: &WakeCtx,
    cfg: &CassConfig,
) -> Verdict {
    for crit in Criterion::ALL {
        match crit.eval(state, a, b, ctx, cfg) {
            Ordering::Greater => return Verdict::Better(crit),
            Ordering::Less => return Verdict::Worse(crit),
            Ordering::Equal => {}
        }
    }

    Verdict::Tie
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Waker;
    use crate::topology::Cpu;
    use crate::SystemSnapshot;
    use crate::Topology;

    fn state() -> SystemSnapshot {
        SystemSnapshot::new(
            Topology::from_cpus(vec![
                Cpu::new(0, 1024, 0),
                Cpu::new(1, 1024, 0),
                Cpu::new(2, 1024, 1),
                Cpu::new(3, 1024, 1),
            ])
            .unwrap(),
        )
    }

    fn ctx() -> WakeCtx {
        WakeCtx {
            p_util: 100,
            uclamp_min: 0,
            task_cpu: 9,
            prev_cpu: 9,
            sync: false,
            waker: Waker::default(),
            prime_cpu: None,
        }
    }

    fn cand(cpu: usize) -> CpuCand {
        CpuCand {
            cpu,
            exit_lat: 0,
            cap: 1024,
            cap_max: 1024,
            cap_no_therm: 1024,
            cap_orig: 1024,
            eff_util: 300,
            hard_util: 0,
            util: 300,
        }
    }

    fn check(a: &CpuCand, b: &CpuCand, ctx: &WakeCtx, expected: Verdict) {
        let cfg = CassConfig::default();
        assert_eq!(compare(&state(), a, b, ctx, &cfg), expected);
    }

    #[test]
    fn test_fits_capacity() {
        assert!(fits_capacity(800, 1024, 1280));
        assert!(!fits_capacity(820, 1024, 1280));
        assert!(!fits_capacity(0, 0, 1280));
        assert!(fits_capacity(0, 1, 1280));
        assert!(!fits_capacity(u64::MAX, u64::MAX, 1280));
    }

    #[test]
    fn test_tie_keeps_incumbent() {
        check(&cand(0), &cand(1), &ctx(), Verdict::Tie);
    }

    #[test]
    fn test_efficiency_is_integer_ratio() {
        let mut a = cand(0);
        let mut b = cand(1);
        a.eff_util = 1024;
        a.util = 100;
        b.eff_util = 1023;
        b.util = 900;
        // 1024 / 1024 = 1 loses to 1023 / 1024 = 0.
        check(&a, &b, &ctx(), Verdict::Worse(Criterion::Efficiency));
        check(&b, &a, &ctx(), Verdict::Better(Criterion::Efficiency));

        // Both below capacity: the quotient ties and utilization decides.
        a.eff_util = 200;
        check(&a, &b, &ctx(), Verdict::Better(Criterion::Util));
    }

    #[test]
    fn test_overload_ratio_among_saturated() {
        let mut a = cand(0);
        let mut b = cand(1);
        a.eff_util = 1100;
        b.eff_util = 1500;
        check(&a, &b, &ctx(), Verdict::Better(Criterion::Overload));

        // Exactly at capacity is not overloaded.
        a.eff_util = 1024;
        b.eff_util = 1100;
        a.util = 900;
        b.util = 100;
        check(&a, &b, &ctx(), Verdict::Worse(Criterion::Util));
    }

    #[test]
    fn test_fit_before_prime_and_util() {
        let mut a = cand(0);
        let mut b = cand(3);
        a.cap_max = 512;
        a.util = 10;
        b.util = 900;
        let ctx = WakeCtx {
            p_util: 500,
            prime_cpu: Some(3),
            ..ctx()
        };
        // 500 does not fit in 512 with headroom, it does in 1024.
        check(&a, &b, &ctx, Verdict::Worse(Criterion::Fit));
    }

    #[test]
    fn test_prime_deprioritized() {
        let mut a = cand(0);
        let mut b = cand(3);
        a.util = 900;
        b.util = 10;
        let ctx = WakeCtx {
            prime_cpu: Some(3),
            ..ctx()
        };
        check(&a, &b, &ctx, Verdict::Better(Criterion::Prime));
        check(&b, &a, &ctx, Verdict::Worse(Criterion::Prime));
    }

    #[test]
    fn test_busy_beats_idle_on_tie() {
        let a = cand(0);
        let mut b = cand(1);
        b.exit_lat = 1;
        b.cap = 2048;
        check(&a, &b, &ctx(), Verdict::Better(Criterion::Busy));
        check(&b, &a, &ctx(), Verdict::Worse(Criterion::Busy));
    }

    #[test]
    fn test_sync_prefers_waker() {
        let mut a = cand(0);
        let b = cand(1);
        a.cap = 10;
        let sync = WakeCtx {
            sync: true,
            waker: Waker {
                cpu: 0,
                util: 0,
                rt: false,
            },
            ..ctx()
        };
        check(&a, &b, &sync, Verdict::Better(Criterion::SyncWaker));
        check(&b, &a, &sync, Verdict::Worse(Criterion::SyncWaker));

        // Without sync the higher capacity decides.
        let no_sync = WakeCtx {
            sync: false,
            ..sync
        };
        check(&a, &b, &no_sync, Verdict::Worse(Criterion::Capacity));

        // Neither is the waker: fall through.
        let elsewhere = WakeCtx {
            waker: Waker {
                cpu: 2,
                ..sync.waker
            },
            ..sync
        };
        check(&a, &b, &elsewhere, Verdict::Worse(Criterion::Capacity));
    }

    #[test]
    fn test_exit_latency() {
        let mut a = cand(0);
        let mut b = cand(1);
        a.exit_lat = 2;
        b.exit_lat = 101;
        check(&a, &b, &ctx(), Verdict::Better(Criterion::ExitLatency));
    }

    #[test]
    fn test_prev_cpu_then_cache() {
        let a = cand(2);
        let b = cand(3);
        let ctx = WakeCtx {
            prev_cpu: 3,
            ..ctx()
        };
        check(&a, &b, &ctx, Verdict::Worse(Criterion::PrevCpu));
        check(&b, &a, &ctx, Verdict::Better(Criterion::PrevCpu));

        // Neither is prev: CPU 0 shares CPU 1's cache, CPU 2 does not.
        let ctx = WakeCtx {
            prev_cpu: 1,
            ..ctx
        };
        check(&cand(0), &cand(2), &ctx, Verdict::Better(Criterion::CacheAffinity));
        check(&cand(2), &cand(0), &ctx, Verdict::Worse(Criterion::CacheAffinity));
        check(&cand(2), &cand(3), &ctx, Verdict::Tie);
    }

    #[test]
    fn test_order_is_fixed() {
        assert_eq!(Criterion::ALL[0], Criterion::Efficiency);
        assert_eq!(Criterion::ALL[10], Criterion::CacheAffinity);
        let names: Vec<_> = Criterion::ALL.iter().map(|c| c.to_string()).collect();
        assert_eq!(names[6], "sync_waker");
        assert_eq!(serde_json::to_string(&Criterion::PrevCpu).unwrap(), "\"prev_cpu\"");
    }
}
