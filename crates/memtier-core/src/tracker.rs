//! Access trackers and their counters
//!
//! A [`Tracker`] watches the memory of a set of processes and reports
//! per-range access statistics as [`TrackerCounters`]. Counters reduce to
//! a run-length encoded heat profile with [`TrackerCounters::range_heat`].

use crate::addr_range::{AddrRange, AddrRanges};
use crate::error::TrackerError;
use crate::Pid;
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Deref, DerefMut};

/// A memory access tracking backend.
///
/// Lifecycle calls come from a single controlling thread while the backend
/// may sample in the background. `counters` returns a snapshot that later
/// sampling does not touch, and `stop` returns only after sampling has
/// ceased.
pub trait Tracker: Send {
    /// Apply JSON configuration text.
    fn set_config_json(&mut self, config: &str) -> Result<(), TrackerError>;

    /// Currently effective configuration as JSON text.
    fn config_json(&self) -> String;

    /// Add pids to be tracked, from the next sampling cycle on.
    fn add_pids(&mut self, pids: &[Pid]);

    /// Remove pids from tracking. `None` removes every pid.
    fn remove_pids(&mut self, pids: Option<&[Pid]>);

    /// Start tracking.
    fn start(&mut self) -> Result<(), TrackerError>;

    /// Stop tracking and wait for background sampling to finish.
    fn stop(&mut self);

    /// Zero all accumulated counters.
    fn reset_counters(&mut self);

    /// Snapshot of the current counters.
    fn counters(&self) -> TrackerCounters;
}

/// Access statistics of one address range set
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrackerCounter {
    pub accesses: u64,
    pub reads: u64,
    pub writes: u64,
    pub ar: AddrRanges,
}

impl TrackerCounter {
    pub fn new(ar: AddrRanges) -> Self {
        Self {
            ar,
            ..Self::default()
        }
    }

    /// Sum of accesses, reads and writes
    pub fn heat(&self) -> u64 {
        self.accesses
            .saturating_add(self.reads)
            .saturating_add(self.writes)
    }

    fn first_range(&self) -> Option<&AddrRange> {
        self.ar.ranges().first()
    }

    fn first_addr(&self) -> Option<u64> {
        self.first_range().map(|r| r.addr())
    }
}

/// Per-range heat: the summed counters of a span of memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeHeat {
    pub range: AddrRange,
    pub heat: u64,
}

impl fmt::Display for RangeHeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} heat={}", self.range, self.heat)
    }
}

/// Counters from one sampling snapshot
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrackerCounters(Vec<TrackerCounter>);

impl TrackerCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_inner(self) -> Vec<TrackerCounter> {
        self.0
    }

    /// Order by accesses, then writes.
    ///
    /// The comparator checks writes twice and never consults reads; the
    /// address clause can only apply when writes already decided the order,
    /// so counters equal in accesses and writes keep their relative order.
    pub fn sort_by_accesses(&mut self) {
        fn less(a: &TrackerCounter, b: &TrackerCounter) -> bool {
            a.accesses < b.accesses
                || (a.accesses == b.accesses && a.writes < b.writes)
                || (a.accesses == b.accesses
                    && a.writes < b.writes
                    && a.first_addr() < b.first_addr())
        }

        self.0.sort_by(|a, b| {
            if less(a, b) {
                Ordering::Less
            } else if less(b, a) {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        });
    }

    /// Order by address of the first range, then its length.
    pub fn sort_by_addr(&mut self) {
        self.0
            .sort_by_key(|tc| tc.first_range().map(|r| (r.addr(), r.length())));
    }

    /// Reduce counters to heat per range, merging adjacent ranges of equal heat.
    ///
    /// Sorts the counters by address first. Works only for counters covering
    /// exactly one range each: returns `None` if any counter covers zero or
    /// several ranges.
    pub fn range_heat(&mut self) -> Option<Vec<RangeHeat>> {
        self.sort_by_addr();

        let mut rhs: Vec<RangeHeat> = Vec::with_capacity(self.0.len());
        for tc in &self.0 {
            let [r] = tc.ar.ranges() else {
                return None;
            };
            let heat = tc.heat();
            if let Some(prev) = rhs.last_mut() {
                if prev.range.end_addr() == r.addr() && prev.heat == heat {
                    let length = prev.range.length().saturating_add(r.length());
                    prev.range = AddrRange::from_pages(prev.range.addr(), length);
                    continue;
                }
            }
            rhs.push(RangeHeat { range: *r, heat });
        }
        Some(rhs)
    }
}

impl Deref for TrackerCounters {
    type Target = Vec<TrackerCounter>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for TrackerCounters {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Vec<TrackerCounter>> for TrackerCounters {
    fn from(counters: Vec<TrackerCounter>) -> Self {
        Self(counters)
    }
}

impl FromIterator<TrackerCounter> for TrackerCounters {
    fn from_iter<I: IntoIterator<Item = TrackerCounter>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for TrackerCounters {
    type Item = TrackerCounter;
    type IntoIter = std::vec::IntoIter<TrackerCounter>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a TrackerCounters {
    type Item = &'a TrackerCounter;
    type IntoIter = std::slice::Iter<'a, TrackerCounter>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for TrackerCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines: Vec<String> = self
            .0
            .iter()
            .map(|tc| format!("a={} r={} w={} {}", tc.accesses, tc.reads, tc.writes, tc.ar))
            .collect();
        f.write_str(&lines.join("\n"))
    }
}
