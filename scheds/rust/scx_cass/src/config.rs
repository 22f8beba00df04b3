// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.
use anyhow::bail;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;

use crate::SCHED_CAPACITY_SCALE;

/// Headroom margin of the fits-capacity test: a utilization fits a capacity
/// when `util * margin < capacity * SCHED_CAPACITY_SCALE` (~20% headroom).
pub const DFL_CAPACITY_MARGIN: u64 = 1280;

fn default_util_est() -> bool {
    true
}

fn default_capacity_margin() -> u64 {
    DFL_CAPACITY_MARGIN
}

/// Tunables of the CPU selector.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CassConfig {
    /// Prefer the enqueued utilization estimate over the running average
    /// when it is larger.
    #[serde(default = "default_util_est")]
    pub util_est: bool,
    #[serde(default = "default_capacity_margin")]
    pub capacity_margin: u64,
}

impl Default for CassConfig {
    fn default() -> Self {
        CassConfig {
            util_est: default_util_est(),
            capacity_margin: default_capacity_margin(),
        }
    }
}

impl CassConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capacity_margin < SCHED_CAPACITY_SCALE {
            bail!(
                "capacity_margin {} must be at least {}",
                self.capacity_margin,
                SCHED_CAPACITY_SCALE
            );
        }
        Ok(())
    }
}
