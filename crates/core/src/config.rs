//! Configuration for the session orchestrator

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration for the session orchestrator
///
/// Every field has a serde default so a partial TOML file (or an empty one)
/// yields a working configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Target stream frame rate in frames per second (default: 15)
    pub frame_rate: u32,

    /// Fixed viewport width in pixels (default: 1280)
    pub viewport_width: u32,

    /// Fixed viewport height in pixels (default: 720)
    pub viewport_height: u32,

    /// Maximum session age before the janitor reclaims it, in seconds
    /// (default: 3600)
    pub session_timeout_secs: u64,

    /// Maximum session idle time before the janitor reclaims it, in seconds
    /// (default: 1800)
    pub idle_timeout_secs: u64,

    /// Janitor sweep period in seconds (default: 60)
    pub janitor_interval_secs: u64,

    /// Execution bridge call deadline in seconds (default: 30)
    pub bridge_timeout_secs: u64,

    /// Navigation deadline in seconds (default: 30)
    pub navigation_timeout_secs: u64,

    /// Screenshot capture deadline in seconds (default: 5)
    pub screenshot_timeout_secs: u64,

    /// URL opened when a create request omits one
    pub default_url: String,

    /// Directory where screenshot artifacts are persisted
    pub artifacts_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frame_rate: 15,
            viewport_width: 1280,
            viewport_height: 720,
            session_timeout_secs: 3600,
            idle_timeout_secs: 1800,
            janitor_interval_secs: 60,
            bridge_timeout_secs: 30,
            navigation_timeout_secs: 30,
            screenshot_timeout_secs: 5,
            default_url: "https://example.com".to_string(),
            artifacts_dir: ".".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing keys fall back to their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&raw).map_err(|e| Error::ConfigError(e.to_string()))
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.frame_rate == 0 {
            return Err(Error::ConfigError("frame_rate must be non-zero".into()));
        }
        if self.viewport_width == 0 || self.viewport_height == 0 {
            return Err(Error::ConfigError(
                "viewport dimensions must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Frame interval derived from the configured frame rate
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate as f64)
    }

    /// Bridge call deadline
    pub fn bridge_timeout(&self) -> Duration {
        Duration::from_secs(self.bridge_timeout_secs)
    }

    /// Navigation deadline
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    /// Screenshot capture deadline
    pub fn screenshot_timeout(&self) -> Duration {
        Duration::from_secs(self.screenshot_timeout_secs)
    }

    /// Janitor sweep period
    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_secs)
    }
}
