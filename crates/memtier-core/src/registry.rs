//! Tracker registry
//!
//! Maps tracker names to factories so a backend can be chosen by name.
//! Registering a name again replaces the earlier factory. The process-wide
//! registry is safe to use from several threads, including registrations
//! that race with lookups.

use crate::error::TrackerError;
use crate::tracker::Tracker;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

/// Creates a fresh, unconfigured tracker
pub type TrackerFactory = Arc<dyn Fn() -> Result<Box<dyn Tracker>, TrackerError> + Send + Sync>;

static GLOBAL: TrackerRegistry = TrackerRegistry::new();

/// Name -> factory map
pub struct TrackerRegistry {
    factories: RwLock<BTreeMap<String, TrackerFactory>>,
}

impl TrackerRegistry {
    pub const fn new() -> Self {
        Self {
            factories: RwLock::new(BTreeMap::new()),
        }
    }

    /// The process-wide registry
    pub fn global() -> &'static TrackerRegistry {
        &GLOBAL
    }

    /// Register `factory` under `name`, replacing any earlier registration.
    pub fn register<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Box<dyn Tracker>, TrackerError> + Send + Sync + 'static,
    {
        let name = name.into();
        let mut factories = self
            .factories
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if factories.insert(name.clone(), Arc::new(factory)).is_some() {
            warn!(tracker = %name, "Replaced tracker registration");
        } else {
            debug!(tracker = %name, "Registered tracker");
        }
    }

    /// Registered names in sorted order
    pub fn list(&self) -> Vec<String> {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Create a tracker with the factory registered under `name`.
    pub fn create(&self, name: &str) -> Result<Box<dyn Tracker>, TrackerError> {
        // Clone the factory out so it runs without holding the lock
        let factory = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(name.to_string()))?;
        factory()
    }
}

impl Default for TrackerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Register a tracker factory in the process-wide registry.
pub fn register_tracker<F>(name: impl Into<String>, factory: F)
where
    F: Fn() -> Result<Box<dyn Tracker>, TrackerError> + Send + Sync + 'static,
{
    TrackerRegistry::global().register(name, factory);
}

/// Names in the process-wide registry, sorted.
pub fn tracker_names() -> Vec<String> {
    TrackerRegistry::global().list()
}

/// Create a tracker from the process-wide registry.
pub fn new_tracker(name: &str) -> Result<Box<dyn Tracker>, TrackerError> {
    TrackerRegistry::global().create(name)
}
