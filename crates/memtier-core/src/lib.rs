//! memtier core
//!
//! Building blocks of a memory tiering controller:
//! - Page-granular address ranges and their algebra
//! - Page-map queries for a process's ranges
//! - The `Tracker` contract for access tracking backends, a registry to
//!   pick backends by name, and a polling tracker skeleton
//! - Tracker counters and their reduction to per-range heat

mod addr_range;
mod config;
mod error;
mod lifecycle;
mod pagemap;
mod polling;
mod registry;
mod sampler;
mod tracker;

/// Process identifier
pub type Pid = u32;

pub use addr_range::{AddrRange, AddrRanges, PAGE_SIZE};
pub use config::{parse_config, render_config, PollingConfig, TrackerConfig, DEFAULT_INTERVAL_MS};
pub use error::{PageMapError, TrackerError};
pub use lifecycle::{Lifecycle, TrackerState};
pub use pagemap::{
    Page, PageMap, Pages, ProcPageMap, PM_EXCLUSIVE, PM_FILE, PM_PFN_MASK, PM_PRESENT,
    PM_SOFT_DIRTY, PM_SWAPPED,
};
pub use polling::{PollingTracker, SampleSource};
pub use registry::{new_tracker, register_tracker, tracker_names, TrackerFactory, TrackerRegistry};
pub use sampler::{CounterStore, PidSet, Sampler};
pub use tracker::{RangeHeat, Tracker, TrackerCounter, TrackerCounters};
