//! Background sampling building blocks
//!
//! Shared state between a tracker's controlling thread and its sampler:
//! - [`CounterStore`]: accumulated counters, read as atomic snapshots
//! - [`PidSet`]: pids to sample, read once per cycle
//! - [`Sampler`]: the background thread; `stop` joins it

use crate::addr_range::AddrRanges;
use crate::tracker::{TrackerCounter, TrackerCounters};
use crate::Pid;
use std::collections::{BTreeSet, HashMap};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct StoreInner {
    counters: TrackerCounters,
    /// Position of each range set in `counters`
    index: HashMap<AddrRanges, usize>,
}

/// Counters accumulated across sampling cycles
#[derive(Debug, Clone, Default)]
pub struct CounterStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl CounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add one cycle's counters.
    ///
    /// Counters for range sets already in the store are summed; new range
    /// sets are appended in arrival order. The whole batch lands under one
    /// lock, so snapshots never see half a cycle.
    pub fn accumulate(&self, batch: TrackerCounters) {
        let mut inner = self.lock();
        for tc in batch {
            match inner.index.get(&tc.ar).copied() {
                Some(pos) => {
                    let existing: &mut TrackerCounter = &mut inner.counters[pos];
                    existing.accesses = existing.accesses.saturating_add(tc.accesses);
                    existing.reads = existing.reads.saturating_add(tc.reads);
                    existing.writes = existing.writes.saturating_add(tc.writes);
                }
                None => {
                    let pos = inner.counters.len();
                    inner.index.insert(tc.ar.clone(), pos);
                    inner.counters.push(tc);
                }
            }
        }
    }

    /// Copy of the current counters
    pub fn snapshot(&self) -> TrackerCounters {
        self.lock().counters.clone()
    }

    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.counters.clear();
        inner.index.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pids selected for sampling
#[derive(Debug, Clone, Default)]
pub struct PidSet {
    inner: Arc<Mutex<BTreeSet<Pid>>>,
}

impl PidSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<Pid>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, pids: &[Pid]) {
        self.lock().extend(pids.iter().copied());
    }

    /// Remove `pids`, or every pid when `None`.
    pub fn remove(&self, pids: Option<&[Pid]>) {
        let mut set = self.lock();
        match pids {
            Some(pids) => {
                for pid in pids {
                    set.remove(pid);
                }
            }
            None => set.clear(),
        }
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.lock().contains(&pid)
    }

    /// Sorted copy of the pids
    pub fn snapshot(&self) -> Vec<Pid> {
        self.lock().iter().copied().collect()
    }
}

/// A background thread running a sampling cycle at a fixed interval
#[derive(Debug)]
pub struct Sampler {
    name: String,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Sampler {
    /// Spawn a thread that runs `cycle` immediately and then every `interval`.
    pub fn spawn<F>(name: &str, interval: Duration, mut cycle: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let thread_name = name.to_string();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                info!(sampler = %thread_name, "Sampler started");

                while flag.load(Ordering::Acquire) {
                    cycle();

                    // Sleep until the next cycle, waking early on stop
                    let deadline = Instant::now() + interval;
                    while flag.load(Ordering::Acquire) {
                        let now = Instant::now();
                        if now >= deadline {
                            break;
                        }
                        thread::park_timeout(deadline - now);
                    }
                }

                info!(sampler = %thread_name, "Sampler stopped");
            })?;

        Ok(Self {
            name: name.to_string(),
            running,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stop the thread and wait until it has exited.
    ///
    /// A cycle in progress runs to completion first.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                warn!(sampler = %self.name, "Sampler thread panicked");
            } else {
                debug!(sampler = %self.name, "Sampler joined");
            }
        }
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.stop();
    }
}
