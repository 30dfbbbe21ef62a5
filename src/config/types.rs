//! Configuration types for Windlass
//!
//! Defines:
//! - `Settings` - Global engine settings
//! - Related sub-types and enums

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::engine::{MAX_CHANGED_FILES_TO_PRINT, REFRESH_INTERVAL, WATCH_MAX, WATCH_MIN_REST};

/// Engine settings (.windlass/config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub watcher: WatcherSettings,

    #[serde(default)]
    pub build: BuildSettings,

    #[serde(default)]
    pub display: DisplaySettings,
}

/// File watcher tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatcherSettings {
    /// Quiet period after the last change before a batch is emitted
    #[serde(default = "default_min_rest_ms")]
    pub min_rest_ms: u64,

    /// Maximum age of a batch under a sustained change stream
    #[serde(default = "default_max_batch_ms")]
    pub max_batch_ms: u64,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            min_rest_ms: default_min_rest_ms(),
            max_batch_ms: default_max_batch_ms(),
        }
    }
}

impl WatcherSettings {
    pub fn min_rest(&self) -> Duration {
        Duration::from_millis(self.min_rest_ms)
    }

    pub fn max_batch(&self) -> Duration {
        Duration::from_millis(self.max_batch_ms)
    }
}

fn default_min_rest_ms() -> u64 {
    WATCH_MIN_REST.as_millis() as u64
}

fn default_max_batch_ms() -> u64 {
    WATCH_MAX.as_millis() as u64
}

/// Build/deploy behavior
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BuildSettings {
    /// Whether to open a deployed service in the browser after the first
    /// successful deploy that exposes a load balancer
    #[serde(default)]
    pub browser: BrowserMode,
}

/// Browser-opening policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserMode {
    #[default]
    Auto,
    Off,
}

impl std::fmt::Display for BrowserMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrowserMode::Auto => write!(f, "auto"),
            BrowserMode::Off => write!(f, "off"),
        }
    }
}

/// Display refresh behavior
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DisplaySettings {
    /// Minimum refresh cadence for the view snapshot, even when idle
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,

    /// How many changed paths a rebuild log line prints before eliding
    #[serde(default = "default_max_changed_files_to_print")]
    pub max_changed_files_to_print: usize,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            refresh_interval_ms: default_refresh_interval_ms(),
            max_changed_files_to_print: default_max_changed_files_to_print(),
        }
    }
}

impl DisplaySettings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

fn default_refresh_interval_ms() -> u64 {
    REFRESH_INTERVAL.as_millis() as u64
}

fn default_max_changed_files_to_print() -> usize {
    MAX_CHANGED_FILES_TO_PRINT
}
