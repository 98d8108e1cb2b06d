use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

/// Default location of the daemon configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "collectord.json";

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// This is the top-level configuration structure loaded from
// `collectord.json`.
//
// It defines:
// - Where collector units (and their settings sidecars) live
// - The dispatcher tick period
// - The metrics reporting period
// - Optional debug configuration
//
// Every field has a default, so an empty object (or no file at
// all) is a valid configuration.
//
// Message-bus credentials are NOT part of this file: collectors
// read them from the environment when they publish.
//
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Root directory scanned for collector units
    pub plugins_dir: PathBuf,

    /// Dispatcher tick period in milliseconds
    pub tick_ms: u64,

    /// Period of the metrics summary log line, in seconds (0 disables it)
    pub metrics_interval_secs: u64,

    /// Optional debug configuration
    pub debug: Option<DebugConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            plugins_dir: PathBuf::from("plugins"),
            tick_ms: 1000,
            metrics_interval_secs: 60,
            debug: None,
        }
    }
}

impl Config {
    /// Reads and deserializes the configuration file.
    ///
    /// BEHAVIOR:
    /// - Missing file → `Ok(None)`, the caller falls back to defaults
    /// - Unreadable or malformed file → error
    ///
    /// Nothing is logged here: this runs before the logger exists.
    pub fn read(path: &Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let cfg = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(Some(cfg))
    }

    /// Dispatcher tick period. Never zero.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    /// Whether verbose logging was requested in the file.
    pub fn debug_log(&self) -> bool {
        self.debug
            .as_ref()
            .is_some_and(|d| d.log.unwrap_or(false))
    }
}

// ------------------------------------------------------------
// Debug configuration
// ------------------------------------------------------------
//
// Optional debug flags used during development and testing.
//
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DebugConfig {
    /// Enables debug-level logging
    pub log: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::read(&dir.path().join("absent.json"))
            .unwrap()
            .unwrap_or_default();

        assert_eq!(cfg.plugins_dir, PathBuf::from("plugins"));
        assert_eq!(cfg.tick(), Duration::from_secs(1));
        assert!(!cfg.debug_log());
    }

    #[test]
    fn missing_file_is_reported_to_the_caller() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        assert!(Config::read(&path).unwrap().is_none());

        fs::write(&path, "{}").unwrap();
        assert!(Config::read(&path).unwrap().is_some());
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collectord.json");
        fs::write(&path, r#"{"tick_ms": 250, "debug": {"log": true}}"#).unwrap();

        let cfg = Config::read(&path).unwrap().unwrap();
        assert_eq!(cfg.tick(), Duration::from_millis(250));
        assert_eq!(cfg.metrics_interval_secs, 60);
        assert!(cfg.debug_log());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collectord.json");
        fs::write(&path, "{ not json").unwrap();

        let err = Config::read(&path).unwrap_err();
        assert!(err.to_string().contains("failed to parse config"));
    }

    #[test]
    fn zero_tick_is_clamped() {
        let cfg = Config {
            tick_ms: 0,
            ..Config::default()
        };
        assert_eq!(cfg.tick(), Duration::from_millis(1));
    }
}
