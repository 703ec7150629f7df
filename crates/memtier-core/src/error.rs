//! Error types shared by trackers, the registry and page-map queries.

use crate::lifecycle::TrackerState;
use crate::Pid;
use std::io;
use thiserror::Error;

/// Errors from tracker lookup, configuration and lifecycle
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("invalid tracker name {0:?}")]
    NotFound(String),

    #[error("Invalid tracker configuration: {0}")]
    Config(String),

    #[error("Failed to start tracker: {0}")]
    Start(String),

    #[error("Cannot {operation} a tracker in state {state}")]
    InvalidTransition {
        state: TrackerState,
        operation: &'static str,
    },

    #[error("Failed to spawn sampler thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Errors from the page-map query primitive
#[derive(Debug, Error)]
pub enum PageMapError {
    #[error("Process {0} not found")]
    ProcessNotFound(Pid),

    #[error("Cannot read page map of process {pid}: {source}")]
    Access {
        pid: Pid,
        #[source]
        source: io::Error,
    },

    #[error("Page map of process {pid} ended before address {addr:#x}")]
    Truncated { pid: Pid, addr: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = TrackerError::NotFound("damon".to_string());
        assert_eq!(err.to_string(), "invalid tracker name \"damon\"");
    }

    #[test]
    fn test_transition_message() {
        let err = TrackerError::InvalidTransition {
            state: TrackerState::Running,
            operation: "start",
        };
        assert_eq!(err.to_string(), "Cannot start a tracker in state running");
    }
}
