//! Tracker lifecycle
//!
//! Trackers move through `Created -> Configured -> Running -> Stopped`.
//! Configuring is allowed while the tracker is not running, starting is
//! allowed from any state except `Running`, and only a running tracker can
//! be stopped. Pid updates and counter reads/resets are legal in every state.

use crate::error::TrackerError;
use std::fmt;

/// Lifecycle state of a tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TrackerState {
    /// Created, still on default configuration
    #[default]
    Created,
    /// Configuration applied, not sampling
    Configured,
    /// Sampling in the background
    Running,
    /// Sampling halted
    Stopped,
}

impl TrackerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Configured => "configured",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for TrackerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enforces the tracker transition table
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    state: TrackerState,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == TrackerState::Running
    }

    /// Check that a configuration may be applied now.
    pub fn check_configure(&self) -> Result<(), TrackerError> {
        self.check("configure", self.state != TrackerState::Running)
    }

    /// Record a successfully applied configuration.
    pub fn configure(&mut self) -> Result<(), TrackerError> {
        self.check_configure()?;
        self.state = TrackerState::Configured;
        Ok(())
    }

    /// Check that sampling may start now.
    pub fn check_start(&self) -> Result<(), TrackerError> {
        self.check("start", self.state != TrackerState::Running)
    }

    pub fn start(&mut self) -> Result<(), TrackerError> {
        self.check_start()?;
        self.state = TrackerState::Running;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), TrackerError> {
        self.check("stop", self.state == TrackerState::Running)?;
        self.state = TrackerState::Stopped;
        Ok(())
    }

    fn check(&self, operation: &'static str, allowed: bool) -> Result<(), TrackerError> {
        if allowed {
            Ok(())
        } else {
            Err(TrackerError::InvalidTransition {
                state: self.state,
                operation,
            })
        }
    }
}
