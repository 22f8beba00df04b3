// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.
use std::collections::BTreeMap;
use std::io::Write;

use anyhow::Result;
use serde::Serialize;

use crate::select::DecidedBy;
use crate::select::SelectKind;
use crate::Criterion;
use crate::Selection;

fn pct(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

/// Aggregate of many selections.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SelectStats {
    pub total: u64,
    pub no_candidate: u64,
    pub sole_cpu: u64,
    pub first: u64,
    pub idle: u64,
    /// Wins per deciding comparator criterion, keyed by criterion name.
    pub criteria: BTreeMap<String, u64>,
    pub visited: u64,
    pub pruned: u64,
    pub skipped: u64,
    /// Selections per chosen CPU.
    pub cpus: BTreeMap<usize, u64>,
}

impl SelectStats {
    pub fn record(&mut self, sel: &Selection) {
        self.total += 1;
        self.visited += sel.nr_visited as u64;
        self.pruned += sel.nr_pruned as u64;
        self.skipped += sel.nr_skipped as u64;

        match sel.kind {
            SelectKind::NoCandidate => {
                self.no_candidate += 1;
                return;
            }
            SelectKind::SoleCpu => self.sole_cpu += 1,
            SelectKind::Compared => match sel.decided_by {
                Some(DecidedBy::First) => self.first += 1,
                Some(DecidedBy::Idle) => self.idle += 1,
                Some(DecidedBy::Criterion(crit)) => {
                    *self.criteria.entry(crit.name().to_string()).or_insert(0) += 1
                }
                None => {}
            },
        }
        *self.cpus.entry(sel.cpu).or_insert(0) += 1;
    }

    pub fn criterion(&self, crit: Criterion) -> u64 {
        self.criteria.get(crit.name()).copied().unwrap_or(0)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn format<W: Write>(&self, w: &mut W) -> Result<()> {
        writeln!(
            w,
            "tot={:7} none={:5.2} sole={:5.2} first={:5.2} idle={:5.2}",
            self.total,
            pct(self.no_candidate, self.total),
            pct(self.sole_cpu, self.total),
            pct(self.first, self.total),
            pct(self.idle, self.total),
        )?;
        writeln!(
            w,
            "visited={} pruned={} skipped={}",
            self.visited, self.pruned, self.skipped
        )?;

        for crit in Criterion::ALL {
            let nr = self.criterion(crit);
            if nr > 0 {
                writeln!(w, "  {:<14} {:5.2}", crit.name(), pct(nr, self.total))?;
            }
        }

        for (cpu, nr) in self.cpus.iter() {
            writeln!(w, "  CPU[{:03}] {:7}", cpu, nr)?;
        }
        Ok(())
    }
}
