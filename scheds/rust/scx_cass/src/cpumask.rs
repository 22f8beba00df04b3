// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # CASS Cpumask
//!
//! A fixed-width set of CPU IDs.
//!
//! A Cpumask is a BitVec of u64's sized to the number of possible CPU IDs it
//! was created for. Unlike a host-global mask, the width is carried by the
//! mask itself, so masks describing a modeled system can be built on any
//! machine:
//!
//!```
//!     use scx_cass::Cpumask;
//!     let mut mask = Cpumask::from_cpulist("0-3,6", 8).unwrap();
//!     assert!(mask.test_cpu(6));
//!     mask.clear_cpu(6).unwrap();
//!     assert_eq!(mask.weight(), 4);
//!     assert_eq!(mask.to_cpulist(), "0-3");
//!```
//!
//! Hexadecimal strings, as well as the special values "none" and "all", are
//! accepted by `Cpumask::from_str()`.

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use bitvec::prelude::*;
use sscanf::sscanf;
use std::fmt;

#[derive(Debug, Eq, Clone, Hash, PartialEq)]
pub struct Cpumask {
    mask: BitVec<u64, Lsb0>,
}

impl Cpumask {
    fn check_cpu(&self, cpu: usize) -> Result<()> {
        if cpu >= self.len() {
            bail!("Invalid CPU {} passed, max {}", cpu, self.len());
        }

        Ok(())
    }

    /// Build a new empty Cpumask able to hold CPUs [0, nr_cpus).
    pub fn new(nr_cpus: usize) -> Cpumask {
        Cpumask {
            mask: bitvec![u64, Lsb0; 0; nr_cpus],
        }
    }

    /// Build a Cpumask with all of CPUs [0, nr_cpus) set.
    pub fn full(nr_cpus: usize) -> Cpumask {
        Cpumask {
            mask: bitvec![u64, Lsb0; 1; nr_cpus],
        }
    }

    /// Build a Cpumask object from a hexadecimal string.
    pub fn from_str(cpumask: &str, nr_cpus: usize) -> Result<Cpumask> {
        match cpumask {
            "none" => return Ok(Self::new(nr_cpus)),
            "all" => return Ok(Self::full(nr_cpus)),
            _ => {}
        }
        let hex_str = {
            let mut tmp_str = cpumask
                .strip_prefix("0x")
                .unwrap_or(cpumask)
                .replace('_', "");
            if tmp_str.len() % 2 != 0 {
                tmp_str = "0".to_string() + &tmp_str;
            }
            tmp_str
        };
        let byte_vec =
            hex::decode(&hex_str).with_context(|| format!("Failed to parse cpumask: {cpumask}"))?;

        let mut mask = Self::new(nr_cpus);
        for (index, &val) in byte_vec.iter().rev().enumerate() {
            let mut v = val;
            while v != 0 {
                let lsb = v.trailing_zeros() as usize;
                v &= !(1 << lsb);
                let cpu = index * 8 + lsb;
                if cpu >= nr_cpus {
                    bail!(
                        "Found cpu ({}) in cpumask ({}) which is larger than the number of cpus ({})",
                        cpu,
                        cpumask,
                        nr_cpus
                    );
                }
                mask.mask.set(cpu, true);
            }
        }

        Ok(mask)
    }

    /// Build a Cpumask from a kernel cpulist string such as "0-3,8,10-11".
    pub fn from_cpulist(cpulist: &str, nr_cpus: usize) -> Result<Cpumask> {
        let mut mask = Cpumask::new(nr_cpus);
        for cpu in read_cpulist(cpulist)? {
            mask.set_cpu(cpu)
                .with_context(|| format!("Invalid cpulist \"{}\"", cpulist.trim()))?;
        }

        Ok(mask)
    }

    /// Build a Cpumask from an iterator of CPU IDs.
    pub fn from_cpus(cpus: impl IntoIterator<Item = usize>, nr_cpus: usize) -> Result<Cpumask> {
        let mut mask = Cpumask::new(nr_cpus);
        for cpu in cpus {
            mask.set_cpu(cpu)?;
        }
        Ok(mask)
    }

    /// Return a slice of u64's whose bits reflect the Cpumask.
    pub fn as_raw_slice(&self) -> &[u64] {
        self.mask.as_raw_slice()
    }

    /// Set a bit in the Cpumask. Returns an error if the specified CPU exceeds
    /// the size of the Cpumask.
    pub fn set_cpu(&mut self, cpu: usize) -> Result<()> {
        self.check_cpu(cpu)?;
        self.mask.set(cpu, true);
        Ok(())
    }

    /// Clear a bit from the Cpumask. Returns an error if the specified CPU
    /// exceeds the size of the Cpumask.
    pub fn clear_cpu(&mut self, cpu: usize) -> Result<()> {
        self.check_cpu(cpu)?;
        self.mask.set(cpu, false);
        Ok(())
    }

    /// Test whether the specified CPU bit is set in the Cpumask. CPUs beyond
    /// the width of the mask are never set.
    pub fn test_cpu(&self, cpu: usize) -> bool {
        match self.mask.get(cpu) {
            Some(bit) => *bit,
            None => false,
        }
    }

    /// Count the number of bits set in the Cpumask.
    pub fn weight(&self) -> usize {
        self.mask.count_ones()
    }

    /// Return true if the Cpumask has no bit set, false otherwise.
    pub fn is_empty(&self) -> bool {
        self.mask.not_any()
    }

    /// The total size of the cpumask.
    pub fn len(&self) -> usize {
        self.mask.len()
    }

    /// Lowest CPU set in the mask.
    pub fn first(&self) -> Option<usize> {
        self.mask.first_one()
    }

    /// Create a Cpumask that is the AND of the current Cpumask and another.
    /// The result has the width of `self`.
    pub fn and(&self, other: &Cpumask) -> Cpumask {
        let mut new = Self::new(self.len());
        for cpu in self.iter().filter(|&cpu| other.test_cpu(cpu)) {
            new.mask.set(cpu, true);
        }
        new
    }

    /// Create a Cpumask that is the OR of the current Cpumask and another.
    /// The result is wide enough to hold both.
    pub fn or(&self, other: &Cpumask) -> Cpumask {
        let mut new = Self::new(self.len().max(other.len()));
        for cpu in self.iter().chain(other.iter()) {
            new.mask.set(cpu, true);
        }
        new
    }

    /// Iterate over the CPUs set in the mask in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.mask.iter_ones()
    }

    /// Format the mask as a kernel cpulist, e.g. "0-3,6".
    pub fn to_cpulist(&self) -> String {
        let mut groups: Vec<String> = Vec::new();
        let mut range: Option<(usize, usize)> = None;

        for cpu in self.iter() {
            range = match range {
                Some((start, end)) if end + 1 == cpu => Some((start, cpu)),
                Some((start, end)) => {
                    groups.push(fmt_range(start, end));
                    Some((cpu, cpu))
                }
                None => Some((cpu, cpu)),
            };
        }
        if let Some((start, end)) = range {
            groups.push(fmt_range(start, end));
        }

        groups.join(",")
    }
}

fn fmt_range(start: usize, end: usize) -> String {
    if start == end {
        format!("{start}")
    } else {
        format!("{start}-{end}")
    }
}

/// Parse a kernel cpulist string into the list of CPU IDs it names.
pub fn read_cpulist(cpulist: &str) -> Result<Vec<usize>> {
    let cpulist = cpulist.trim().trim_end_matches('\0');
    let mut cpu_ids = vec![];
    if cpulist.is_empty() {
        return Ok(cpu_ids);
    }

    for group in cpulist.split(',') {
        let (min, max) = match sscanf!(group.trim(), "{usize}-{usize}") {
            Ok((x, y)) => (x, y),
            Err(_) => match sscanf!(group.trim(), "{usize}") {
                Ok(x) => (x, x),
                Err(_) => {
                    bail!("Failed to parse cpulist {}", group.trim());
                }
            },
        };
        if min > max {
            bail!("Inverted range in cpulist {}", group.trim());
        }
        cpu_ids.extend(min..=max);
    }

    Ok(cpu_ids)
}

impl fmt::Display for Cpumask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(self, f)
    }
}

impl fmt::LowerHex for Cpumask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut masks: Vec<u32> = self
            .as_raw_slice()
            .iter()
            .flat_map(|x| [*x as u32, (x >> 32) as u32])
            .collect();

        // Throw out possible stray from u64 -> u32.
        masks.truncate(self.len().div_ceil(32));

        // Print the highest 32bit. Trim digits beyond the mask width.
        let width = match self.len().div_ceil(4) % 8 {
            0 => 8,
            v => v,
        };
        match masks.pop() {
            Some(top) => write!(f, "{:0width$x}", top, width = width)?,
            None => return write!(f, "0"),
        }

        // The rest in descending order.
        for submask in masks.iter().rev() {
            write!(f, ",{submask:08x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpulist_roundtrip_shapes() {
        let mask = Cpumask::from_cpulist("0-3,6,8-9", 16).unwrap();
        assert_eq!(mask.weight(), 7);
        assert!(mask.test_cpu(6));
        assert!(!mask.test_cpu(7));
        assert_eq!(mask.to_cpulist(), "0-3,6,8-9");
    }

    #[test]
    fn test_cpulist_out_of_range() {
        assert!(Cpumask::from_cpulist("0-8", 8).is_err());
        assert!(Cpumask::from_cpulist("3-1", 8).is_err());
        assert!(Cpumask::from_cpulist("x", 8).is_err());
    }

    #[test]
    fn test_empty_cpulist() {
        let mask = Cpumask::from_cpulist("", 4).unwrap();
        assert!(mask.is_empty());
        assert_eq!(mask.first(), None);
        assert_eq!(mask.to_cpulist(), "");
    }

    #[test]
    fn test_from_str_hex() {
        let mask = Cpumask::from_str("0xf0", 8).unwrap();
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![4, 5, 6, 7]);
        assert_eq!(format!("{mask}"), "f0");

        assert!(Cpumask::from_str("0x100", 8).is_err());
        assert!(Cpumask::from_str("none", 8).unwrap().is_empty());
        assert_eq!(Cpumask::from_str("all", 8).unwrap().weight(), 8);
    }

    #[test]
    fn test_set_clear_test() {
        let mut mask = Cpumask::new(4);
        assert!(mask.set_cpu(4).is_err());
        mask.set_cpu(2).unwrap();
        assert!(mask.test_cpu(2));
        assert!(!mask.test_cpu(100));
        mask.clear_cpu(2).unwrap();
        assert!(mask.is_empty());
    }

    #[test]
    fn test_and_or() {
        let a = Cpumask::from_cpulist("0-3", 8).unwrap();
        let b = Cpumask::from_cpulist("2-5", 8).unwrap();
        assert_eq!(a.and(&b).to_cpulist(), "2-3");
        assert_eq!(a.or(&b).to_cpulist(), "0-5");

        let narrow = Cpumask::from_cpulist("1", 2).unwrap();
        assert_eq!(a.and(&narrow).len(), 8);
        assert_eq!(a.and(&narrow).to_cpulist(), "1");
    }

    #[test]
    fn test_hex_multiword() {
        let mask = Cpumask::from_cpulist("0,40", 48).unwrap();
        assert_eq!(format!("{mask:x}"), "0100,00000001");
    }
}
