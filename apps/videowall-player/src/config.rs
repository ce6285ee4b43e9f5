//! Player configuration.
//!
//! Supports loading from YAML files with environment variable overrides,
//! mirroring the teacher's `apply_env_overrides` "best effort" style. The
//! bulk of the sync engine's tuning knobs live in `videowall_core::VideowallConfig`
//! and are read directly from the environment by that crate; this file only
//! covers the handful of settings specific to the player binary itself.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Player configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// This device's identifier, as known to the cloud coordinator.
    /// Override: `VIDEOWALL_DEVICE_ID`
    pub device_id: Option<String>,

    /// Root directory for cached/local media files.
    /// Override: `VIDEOWALL_MEDIA_DIR`
    pub media_dir: PathBuf,

    /// Supervisor tick rate in Hz. Must be at least 4 Hz to keep the
    /// polling-cadence table responsive.
    /// Override: `VIDEOWALL_TICK_HZ`
    pub tick_hz: f64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            media_dir: PathBuf::from("/var/lib/videowall/media"),
            tick_hz: 5.0,
        }
    }
}

impl PlayerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("VIDEOWALL_DEVICE_ID") {
            self.device_id = Some(val);
        }

        if let Ok(val) = std::env::var("VIDEOWALL_MEDIA_DIR") {
            self.media_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("VIDEOWALL_TICK_HZ") {
            if let Ok(hz) = val.parse() {
                self.tick_hz = hz;
            }
        }
    }
}
