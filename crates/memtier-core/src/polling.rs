//! Polling tracker
//!
//! [`PollingTracker`] implements [`Tracker`] for any backend that can take
//! a sample on demand. The backend supplies a [`SampleSource`]; the tracker
//! handles configuration, the lifecycle, the pid set, counter accumulation
//! and the background sampler thread.

use crate::config::{parse_config, render_config, PollingConfig, TrackerConfig};
use crate::error::TrackerError;
use crate::lifecycle::{Lifecycle, TrackerState};
use crate::sampler::{CounterStore, PidSet, Sampler};
use crate::tracker::{Tracker, TrackerCounters};
use crate::Pid;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// A backend that produces counters one sampling cycle at a time
pub trait SampleSource: Send + 'static {
    /// Backend-specific configuration
    type Config: TrackerConfig;

    /// Short backend name, used for logging and the sampler thread name
    fn name(&self) -> &str;

    /// Check prerequisites before sampling starts.
    ///
    /// Return [`TrackerError::Start`] when instrumentation is unavailable.
    fn prepare(&mut self, _config: &Self::Config) -> Result<(), TrackerError> {
        Ok(())
    }

    /// Sample `pids` once and return this cycle's counters.
    fn sample(&mut self, config: &Self::Config, pids: &[Pid]) -> TrackerCounters;
}

/// A [`Tracker`] that samples a [`SampleSource`] at a fixed interval
pub struct PollingTracker<S: SampleSource> {
    source: Arc<Mutex<S>>,
    config: PollingConfig<S::Config>,
    lifecycle: Lifecycle,
    pids: PidSet,
    counters: CounterStore,
    sampler: Option<Sampler>,
}

impl<S: SampleSource> PollingTracker<S> {
    pub fn new(source: S) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            config: PollingConfig::default(),
            lifecycle: Lifecycle::new(),
            pids: PidSet::new(),
            counters: CounterStore::new(),
            sampler: None,
        }
    }

    pub fn state(&self) -> TrackerState {
        self.lifecycle.state()
    }

    pub fn config(&self) -> &PollingConfig<S::Config> {
        &self.config
    }

    /// Pids currently selected for sampling
    pub fn pids(&self) -> Vec<Pid> {
        self.pids.snapshot()
    }

    fn source_name(&self) -> String {
        self.source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .name()
            .to_string()
    }
}

impl<S: SampleSource> Tracker for PollingTracker<S> {
    fn set_config_json(&mut self, config: &str) -> Result<(), TrackerError> {
        self.lifecycle.check_configure()?;
        self.config = parse_config(config)?;
        self.lifecycle.configure()?;
        debug!(tracker = %self.source_name(), config = config, "Tracker configured");
        Ok(())
    }

    fn config_json(&self) -> String {
        render_config(&self.config)
    }

    fn add_pids(&mut self, pids: &[Pid]) {
        self.pids.add(pids);
    }

    fn remove_pids(&mut self, pids: Option<&[Pid]>) {
        self.pids.remove(pids);
    }

    fn start(&mut self) -> Result<(), TrackerError> {
        self.lifecycle.check_start()?;

        let name = {
            let mut source = self.source.lock().unwrap_or_else(PoisonError::into_inner);
            source.prepare(&self.config.backend)?;
            source.name().to_string()
        };

        let source = self.source.clone();
        let pids = self.pids.clone();
        let counters = self.counters.clone();
        let backend = self.config.backend.clone();
        let sampler = Sampler::spawn(&format!("{}-sampler", name), self.config.interval(), move || {
            let pids = pids.snapshot();
            if pids.is_empty() {
                return;
            }
            let batch = source
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .sample(&backend, &pids);
            debug!(pids = pids.len(), counters = batch.len(), "Sampled");
            counters.accumulate(batch);
        })?;

        self.sampler = Some(sampler);
        self.lifecycle.start()?;
        info!(
            tracker = %name,
            interval_ms = self.config.interval_ms,
            "Tracker started"
        );
        Ok(())
    }

    fn stop(&mut self) {
        if let Err(e) = self.lifecycle.stop() {
            debug!("Ignoring stop: {}", e);
            return;
        }
        if let Some(mut sampler) = self.sampler.take() {
            sampler.stop();
        } else {
            warn!("Running tracker had no sampler");
        }
        info!(tracker = %self.source_name(), "Tracker stopped");
    }

    fn reset_counters(&mut self) {
        self.counters.reset();
    }

    fn counters(&self) -> TrackerCounters {
        self.counters.snapshot()
    }
}

impl<S: SampleSource> Drop for PollingTracker<S> {
    fn drop(&mut self) {
        if self.lifecycle.is_running() {
            self.stop();
        }
    }
}
