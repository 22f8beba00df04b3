// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.
use std::io::Write;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use log::debug;
use log::info;
use scx_cass::Cass;
use scx_cass::SchedState;
use scx_cass::Scenario;
use scx_cass::SelectStats;
use scx_cass::Topology;

/// scx_cass: replay wakeups through the Capacity Aware Superset Scheduler
/// CPU selector.
///
/// A scenario freezes a system (CPU capacities, cache domains, per-CPU
/// utilization, thermal and idle state) and lists the wakeups to place on it.
/// Each wakeup is run through the selector and the decision is logged along
/// with the comparator criterion that settled it. Aggregated statistics are
/// printed at the end.
///
/// The scenario is JSON, either inline or read from a file with the "file:"
/// or "f:" prefix.
#[derive(Debug, Parser)]
struct Opts {
    /// Scenario to replay, inline JSON or "file:<path>".
    scenario: String,

    /// Take CPU capacities and cache domains from the host's sysfs instead
    /// of the scenario topology.
    #[clap(short = 'H', long, action = clap::ArgAction::SetTrue)]
    host_topology: bool,

    /// Disable preferring the estimated utilization over the running
    /// average when it is larger.
    #[clap(short = 'e', long, action = clap::ArgAction::SetTrue)]
    no_util_est: bool,

    /// Headroom margin of the capacity fit test. A utilization fits when
    /// util * margin < capacity * 1024. Overrides the scenario.
    #[clap(short = 'm', long)]
    capacity_margin: Option<u64>,

    /// Print the statistics as JSON.
    #[clap(short = 'j', long, action = clap::ArgAction::SetTrue)]
    stats_json: bool,

    /// Enable verbose output. Specify multiple times to increase verbosity.
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    let llv = match opts.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        llv,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    let scenario = Scenario::parse(&opts.scenario)?;

    let mut cfg = scenario.config.clone();
    if opts.no_util_est {
        cfg.util_est = false;
    }
    if let Some(margin) = opts.capacity_margin {
        cfg.capacity_margin = margin;
    }
    let cass = Cass::new(cfg).context("Invalid selector configuration")?;
    debug!("{:?}", cass.config());

    let sys = if opts.host_topology {
        let topo = Topology::new().context("Failed to read host topology")?;
        info!(
            "Host topology: {} CPUs, prime CPU {:?}",
            topo.span().weight(),
            topo.prime_cpu()
        );
        scenario.system_on(topo)?
    } else {
        scenario.system()?
    };
    info!(
        "CPUs {} active, {} wakeups",
        sys.active_cpus().to_cpulist(),
        scenario.wakeups.len()
    );

    let mut stats = SelectStats::default();
    for (idx, spec) in scenario.wakeups.iter().enumerate() {
        let task = spec
            .task(sys.nr_cpu_ids())
            .with_context(|| format!("Invalid wakeup {}", idx))?;
        let wakeup = spec.wakeup(&task);
        let sel = cass.best_cpu(&sys, &wakeup, spec.rt);

        info!(
            "[{}] {} {} prev={} -> CPU {} ({:?}, {:?}) visited={} pruned={} skipped={}",
            idx,
            if spec.name.is_empty() { "-" } else { spec.name.as_str() },
            if spec.rt { "rt" } else { "fair" },
            wakeup.prev_cpu,
            sel.cpu,
            sel.kind,
            sel.decided_by,
            sel.nr_visited,
            sel.nr_pruned,
            sel.nr_skipped,
        );
        stats.record(&sel);
    }

    let mut out = std::io::stdout().lock();
    if opts.stats_json {
        writeln!(out, "{}", stats.to_json()?)?;
    } else {
        stats.format(&mut out)?;
    }

    Ok(())
}
