//! Engine configuration
//!
//! [`MonitorConfig`] is a serde model of everything needed to build a [`MonitorEngine`](crate::MonitorEngine)
//! except the sampler. Missing fields take their defaults, so `{}` is a valid configuration.
//!
//! ```
//! use memwatch::config::{DiagnosticsConfig, MonitorConfig};
//!
//! let config = MonitorConfig::from_json_str(
//!     r#"{ "memory_low_trigger": 0.1, "diagnostics": { "kind": "file", "directory": "/tmp/memwatch" } }"#,
//! )
//! .unwrap();
//! assert_eq!(config.interval_ms, 1000);
//! assert!(matches!(config.diagnostics, DiagnosticsConfig::File { .. }));
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::diagnostics::{file_sink_factory, tracing_sink_factory, SinkFactory};
use crate::error::{Error, Result};
use crate::memory::constants::{DEFAULT_MEMORY_LOW_TRIGGER, DEFAULT_UPDATE_INTERVAL_MS};
use crate::monitor::hysteresis::validate_trigger;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Available-memory ratio below which memory is considered low
    pub memory_low_trigger: f64,
    /// Delay between the end of one sampling cycle and the start of the next
    pub interval_ms: u64,
    pub reclaim_before_sample: bool,
    pub diagnostics: DiagnosticsConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            memory_low_trigger: DEFAULT_MEMORY_LOW_TRIGGER,
            interval_ms: DEFAULT_UPDATE_INTERVAL_MS,
            reclaim_before_sample: false,
            diagnostics: DiagnosticsConfig::default(),
        }
    }
}

impl MonitorConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        validate_trigger(self.memory_low_trigger)?;
        if self.interval_ms == 0 {
            return Err(Error::invalid_argument("Sampling interval must be positive", "0ms"));
        }
        if let DiagnosticsConfig::File { directory } = &self.diagnostics {
            if directory.as_os_str().is_empty() {
                return Err(Error::config("diagnostics directory must not be empty"));
            }
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Where the engine sends diagnostic records
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiagnosticsConfig {
    #[default]
    Tracing,
    File {
        directory: PathBuf,
    },
}

impl DiagnosticsConfig {
    pub fn sink_factory(&self) -> SinkFactory {
        match self {
            Self::Tracing => tracing_sink_factory(),
            Self::File { directory } => file_sink_factory(directory.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MonitorConfig::from_json_str("{}").unwrap();
        assert_eq!(config, MonitorConfig::default());
        assert_eq!(config.memory_low_trigger, 0.20);
        assert_eq!(config.interval(), Duration::from_secs(1));
        assert!(!config.reclaim_before_sample);
        assert_eq!(config.diagnostics, DiagnosticsConfig::Tracing);
    }

    #[test]
    fn test_full_document() {
        let config = MonitorConfig::from_json_str(
            r#"{
                "memory_low_trigger": 0.35,
                "interval_ms": 250,
                "reclaim_before_sample": true,
                "diagnostics": { "kind": "file", "directory": "/var/log/memwatch" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.memory_low_trigger, 0.35);
        assert_eq!(config.interval(), Duration::from_millis(250));
        assert!(config.reclaim_before_sample);
        assert_eq!(config.diagnostics, DiagnosticsConfig::File { directory: PathBuf::from("/var/log/memwatch") });
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            MonitorConfig::from_json_str(r#"{ "memory_low_trigger": 1.5 }"#),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            MonitorConfig::from_json_str(r#"{ "interval_ms": 0 }"#),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            MonitorConfig::from_json_str(r#"{ "diagnostics": { "kind": "file", "directory": "" } }"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            MonitorConfig::from_json_str(r#"{ "diagnostics": { "kind": "syslog" } }"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(MonitorConfig::from_json_str("not json"), Err(Error::Config(_))));
    }

    #[test]
    fn test_from_path() {
        let path = std::env::temp_dir().join(format!("memwatch-config-{}.json", std::process::id()));
        fs::write(&path, r#"{ "interval_ms": 50 }"#).unwrap();
        let config = MonitorConfig::from_path(&path).unwrap();
        assert_eq!(config.interval_ms, 50);
        let _ = fs::remove_file(&path);

        assert!(matches!(MonitorConfig::from_path(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_serializes_tagged_diagnostics() {
        let config = MonitorConfig {
            diagnostics: DiagnosticsConfig::File { directory: PathBuf::from("logs") },
            ..MonitorConfig::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["diagnostics"]["kind"], "file");
        assert_eq!(json["diagnostics"]["directory"], "logs");
    }
}
