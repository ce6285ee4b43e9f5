//! Process-wide configuration, parsed once at startup from environment
//! variables into a typed struct (not re-read ad hoc).
//!
//! Every field is optional in the environment and falls back to the
//! documented default; out-of-range values are clamped to the documented
//! minimum rather than rejected, mirroring the teacher's
//! `apply_env_overrides` "best effort, never panics" style.

use serde::{Deserialize, Serialize};

/// LAN beacon service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanConfig {
    pub enabled: bool,
    pub beacon_hz: f64,
    pub beacon_port: u16,
    pub timeout_ms: u64,
    pub fallback_to_cloud: bool,
    pub bind_host: String,
    pub broadcast_addr: String,
}

impl Default for LanConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            beacon_hz: 20.0,
            beacon_port: 39051,
            timeout_ms: 1500,
            fallback_to_cloud: true,
            bind_host: "0.0.0.0".to_string(),
            broadcast_addr: "255.255.255.255".to_string(),
        }
    }
}

/// Full process-wide configuration, assembled once from the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideowallConfig {
    pub command_poll_idle_s: f64,
    pub command_poll_active_s: f64,
    pub command_poll_critical_s: f64,
    pub command_poll_playing_lan_s: f64,
    pub status_interval_critical_s: f64,
    pub status_interval_playing_s: f64,
    pub status_interval_playing_lan_s: f64,
    pub hard_resync_threshold_ms: f64,
    pub lan: LanConfig,
}

impl Default for VideowallConfig {
    fn default() -> Self {
        Self {
            command_poll_idle_s: 10.0,
            command_poll_active_s: 2.0,
            command_poll_critical_s: 1.0,
            command_poll_playing_lan_s: 5.0,
            status_interval_critical_s: 2.0,
            status_interval_playing_s: 5.0,
            status_interval_playing_lan_s: 10.0,
            hard_resync_threshold_ms: 500.0,
            lan: LanConfig::default(),
        }
    }
}

fn env_f64(name: &str, default: f64, min: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .map(|v| v.max(min))
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64, min: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(|v| v.max(min))
        .unwrap_or(default)
}

fn env_u16(name: &str, default: u16, min: u16) -> u16 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .map(|v| v.max(min))
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|v| match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl VideowallConfig {
    /// Loads configuration from environment variables, falling back to
    /// documented defaults for anything unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            command_poll_idle_s: env_f64(
                "SYNC_COMMAND_POLL_IDLE_S",
                defaults.command_poll_idle_s,
                0.2,
            ),
            command_poll_active_s: env_f64(
                "SYNC_COMMAND_POLL_ACTIVE_S",
                defaults.command_poll_active_s,
                0.2,
            ),
            command_poll_critical_s: env_f64(
                "SYNC_COMMAND_POLL_CRITICAL_S",
                defaults.command_poll_critical_s,
                0.2,
            ),
            command_poll_playing_lan_s: env_f64(
                "SYNC_COMMAND_POLL_PLAYING_LAN_S",
                defaults.command_poll_playing_lan_s,
                1.0,
            ),
            status_interval_critical_s: env_f64(
                "SYNC_STATUS_INTERVAL_CRITICAL_S",
                defaults.status_interval_critical_s,
                0.2,
            ),
            status_interval_playing_s: env_f64(
                "SYNC_STATUS_INTERVAL_PLAYING_S",
                defaults.status_interval_playing_s,
                0.2,
            ),
            status_interval_playing_lan_s: env_f64(
                "SYNC_STATUS_INTERVAL_PLAYING_LAN_S",
                defaults.status_interval_playing_lan_s,
                1.0,
            ),
            hard_resync_threshold_ms: env_f64(
                "SYNC_HARD_RESYNC_THRESHOLD_MS",
                defaults.hard_resync_threshold_ms,
                25.0,
            ),
            lan: LanConfig {
                enabled: env_bool("SYNC_LAN_ENABLED", defaults.lan.enabled),
                beacon_hz: env_f64("SYNC_LAN_BEACON_HZ", defaults.lan.beacon_hz, 1.0),
                beacon_port: env_u16("SYNC_LAN_BEACON_PORT", defaults.lan.beacon_port, 1024),
                timeout_ms: env_u64("SYNC_LAN_TIMEOUT_MS", defaults.lan.timeout_ms, 250),
                fallback_to_cloud: env_bool(
                    "SYNC_LAN_FALLBACK_TO_CLOUD",
                    defaults.lan.fallback_to_cloud,
                ),
                bind_host: env_string("SYNC_LAN_BIND_HOST", &defaults.lan.bind_host),
                broadcast_addr: env_string(
                    "SYNC_LAN_BROADCAST_ADDR",
                    &defaults.lan.broadcast_addr,
                ),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_table() {
        let config = VideowallConfig::default();
        assert_eq!(config.command_poll_idle_s, 10.0);
        assert_eq!(config.command_poll_active_s, 2.0);
        assert_eq!(config.command_poll_critical_s, 1.0);
        assert_eq!(config.hard_resync_threshold_ms, 500.0);
        assert!(!config.lan.enabled);
        assert_eq!(config.lan.beacon_hz, 20.0);
        assert_eq!(config.lan.beacon_port, 39051);
        assert_eq!(config.lan.timeout_ms, 1500);
        assert!(config.lan.fallback_to_cloud);
        assert_eq!(config.lan.bind_host, "0.0.0.0");
        assert_eq!(config.lan.broadcast_addr, "255.255.255.255");
    }

    #[test]
    fn env_f64_clamps_below_min_to_min() {
        std::env::set_var("VIDEOWALL_TEST_F64", "0.01");
        assert_eq!(env_f64("VIDEOWALL_TEST_F64", 5.0, 0.2), 0.2);
        std::env::remove_var("VIDEOWALL_TEST_F64");
    }

    #[test]
    fn env_f64_falls_back_on_unset() {
        std::env::remove_var("VIDEOWALL_TEST_UNSET");
        assert_eq!(env_f64("VIDEOWALL_TEST_UNSET", 5.0, 0.2), 5.0);
    }

    #[test]
    fn env_bool_accepts_common_spellings() {
        std::env::set_var("VIDEOWALL_TEST_BOOL", "yes");
        assert!(env_bool("VIDEOWALL_TEST_BOOL", false));
        std::env::set_var("VIDEOWALL_TEST_BOOL", "0");
        assert!(!env_bool("VIDEOWALL_TEST_BOOL", true));
        std::env::remove_var("VIDEOWALL_TEST_BOOL");
    }
}
