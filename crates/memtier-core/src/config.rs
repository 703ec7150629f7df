//! Tracker configuration
//!
//! Trackers are configured with JSON text. Each backend defines its own
//! configuration type; this module parses and renders it and turns every
//! failure into [`TrackerError::Config`].

use crate::error::TrackerError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Default sampling period of polling trackers
pub const DEFAULT_INTERVAL_MS: u64 = 5000;

/// A backend configuration type
pub trait TrackerConfig: Serialize + DeserializeOwned + Default + Clone + Send + 'static {
    /// Check fields that parsed but are outside their valid domain.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Parse and validate configuration text.
pub fn parse_config<T: TrackerConfig>(text: &str) -> Result<T, TrackerError> {
    let config: T = serde_json::from_str(text).map_err(|e| TrackerError::Config(e.to_string()))?;
    config.validate().map_err(TrackerError::Config)?;
    Ok(config)
}

/// Render a configuration as JSON text.
pub fn render_config<T: TrackerConfig>(config: &T) -> String {
    serde_json::to_string(config).unwrap_or_else(|e| {
        warn!("Failed to render tracker configuration: {}", e);
        String::new()
    })
}

/// Configuration of a polling tracker: a sampling period plus the
/// backend's own fields at the same level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "C: TrackerConfig")]
pub struct PollingConfig<C> {
    /// Sampling period in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    #[serde(flatten)]
    pub backend: C,
}

fn default_interval_ms() -> u64 {
    DEFAULT_INTERVAL_MS
}

impl<C: TrackerConfig> PollingConfig<C> {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl<C: TrackerConfig> Default for PollingConfig<C> {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            backend: C::default(),
        }
    }
}

impl<C: TrackerConfig> TrackerConfig for PollingConfig<C> {
    fn validate(&self) -> Result<(), String> {
        if self.interval_ms == 0 {
            return Err("interval_ms must be greater than 0".to_string());
        }
        self.backend.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct ScanConfig {
        pages_per_scan: u64,
        scan_writes: bool,
    }

    impl Default for ScanConfig {
        fn default() -> Self {
            Self {
                pages_per_scan: 256,
                scan_writes: false,
            }
        }
    }

    impl TrackerConfig for ScanConfig {
        fn validate(&self) -> Result<(), String> {
            if self.pages_per_scan == 0 {
                return Err("pages_per_scan must be greater than 0".to_string());
            }
            Ok(())
        }
    }

    #[test]
    fn test_parse_config() {
        let config: ScanConfig = parse_config(r#"{"pages_per_scan": 16}"#).unwrap();
        assert_eq!(config.pages_per_scan, 16);
        assert!(!config.scan_writes);
    }

    #[test]
    fn test_parse_config_errors() {
        let malformed = parse_config::<ScanConfig>("{pages_per_scan");
        assert!(matches!(malformed, Err(TrackerError::Config(_))));

        let wrong_type = parse_config::<ScanConfig>(r#"{"pages_per_scan": "many"}"#);
        assert!(matches!(wrong_type, Err(TrackerError::Config(_))));

        let out_of_domain = parse_config::<ScanConfig>(r#"{"pages_per_scan": 0}"#);
        match out_of_domain {
            Err(TrackerError::Config(msg)) => assert!(msg.contains("pages_per_scan")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_polling_config() {
        let config: PollingConfig<ScanConfig> =
            parse_config(r#"{"interval_ms": 250, "scan_writes": true}"#).unwrap();
        assert_eq!(config.interval(), Duration::from_millis(250));
        assert!(config.backend.scan_writes);
        assert_eq!(config.backend.pages_per_scan, 256);

        let defaults: PollingConfig<ScanConfig> = parse_config("{}").unwrap();
        assert_eq!(defaults.interval_ms, DEFAULT_INTERVAL_MS);

        assert!(parse_config::<PollingConfig<ScanConfig>>(r#"{"interval_ms": 0}"#).is_err());
    }

    #[test]
    fn test_render_roundtrip() {
        let config = PollingConfig {
            interval_ms: 100,
            backend: ScanConfig {
                pages_per_scan: 8,
                scan_writes: true,
            },
        };
        let text = render_config(&config);
        let parsed: PollingConfig<ScanConfig> = parse_config(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[derive(Debug, Clone, Default, Deserialize)]
    struct UnrenderableConfig {}

    impl Serialize for UnrenderableConfig {
        fn serialize<S: serde::Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("not renderable"))
        }
    }

    impl TrackerConfig for UnrenderableConfig {}

    #[test]
    fn test_render_failure_is_empty() {
        assert_eq!(render_config(&UnrenderableConfig {}), "");
    }
}
