//! Clock-health probe: OS time-sync status and thermal throttle flags.
//!
//! The probe logic (regex-based offset extraction, throttle bit parsing,
//! health-score weighting) is owned here; invoking the actual chronograph
//! utility and reading the thermal status word is delegated to
//! [`ClockProbe`] implementations, since this repo — unlike the embedded
//! original it's descended from — is the one that owns the probe rather
//! than treating it as an external collaborator.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Bit in the platform throttle status word indicating the device is
/// *currently* throttled (as opposed to having been throttled historically).
const CURRENTLY_THROTTLED_BIT: u32 = 0x4;

fn offset_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[-+]?\d+(?:\.\d+)?").expect("static regex is valid"))
}

/// Result of a clock-health probe cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClockHealth {
    pub healthy: bool,
    pub critical: bool,
    pub offset_ms: Option<f64>,
    pub throttled: bool,
    pub health_score: f64,
}

impl ClockHealth {
    /// The fallback result used whenever a probe fails outright.
    #[must_use]
    pub fn probe_failure() -> Self {
        Self {
            healthy: false,
            critical: true,
            offset_ms: None,
            throttled: false,
            health_score: 0.0,
        }
    }
}

/// Raw facts gathered from the OS time-sync daemon, prior to scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSyncStatus {
    pub leap_status: String,
    pub offset_ms: f64,
}

/// Source of raw chronograph / thermal facts. Implemented by a concrete
/// OS-specific adapter; the scoring math in this module is the pure part.
pub trait ClockProbe: Send + Sync {
    /// Runs the chronograph utility and returns its raw stdout, or an error
    /// string if the utility could not be invoked.
    fn query_time_sync(&self) -> Result<String, String>;

    /// Returns the platform's raw throttle status word, or an error string.
    fn query_throttle_word(&self) -> Result<u32, String>;
}

/// Extracts `Leap status` and the best-available offset line from
/// chronograph stdout.
///
/// Offset preference order: `last offset` > `RMS offset` > `System time`.
/// The offset is parsed from the leading signed decimal in the matching
/// line and converted from seconds to milliseconds.
pub fn parse_time_sync_output(stdout: &str) -> Option<TimeSyncStatus> {
    let mut leap_status = None;
    let mut last_offset = None;
    let mut rms_offset = None;
    let mut system_time_offset = None;

    for line in stdout.lines() {
        let lower = line.to_ascii_lowercase();
        if lower.starts_with("leap status") {
            leap_status = line.split(':').nth(1).map(|s| s.trim().to_string());
        } else if lower.starts_with("last offset") {
            last_offset = extract_offset_seconds(line);
        } else if lower.starts_with("rms offset") {
            rms_offset = extract_offset_seconds(line);
        } else if lower.starts_with("system time") {
            system_time_offset = extract_offset_seconds(line);
        }
    }

    let leap_status = leap_status?;
    let offset_s = last_offset.or(rms_offset).or(system_time_offset)?;

    Some(TimeSyncStatus {
        leap_status,
        offset_ms: offset_s * 1000.0,
    })
}

fn extract_offset_seconds(line: &str) -> Option<f64> {
    let after_colon = line.split_once(':').map(|(_, rest)| rest).unwrap_or(line);
    offset_regex()
        .find(after_colon)
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// Computes [`ClockHealth`] from raw probe outputs per the weighted scoring
/// rule: starts at 0.2, +0.4 for normal leap status, +0.4 for
/// `|offset| <= max_offset_ms`, +0.2 for `|offset| <= 2*max_offset_ms`,
/// -0.3 if throttled; clamped to `[0, 1]`.
#[must_use]
pub fn score_clock_health(
    sync: Option<&TimeSyncStatus>,
    throttled: bool,
    max_offset_ms: f64,
) -> ClockHealth {
    let Some(sync) = sync else {
        return ClockHealth::probe_failure();
    };

    let mut score = 0.2f64;
    let normal_leap = sync.leap_status.eq_ignore_ascii_case("normal");
    if normal_leap {
        score += 0.4;
    }
    let abs_offset = sync.offset_ms.abs();
    let within_max = abs_offset <= max_offset_ms;
    if within_max {
        score += 0.4;
    } else if abs_offset <= 2.0 * max_offset_ms {
        score += 0.2;
    }
    if throttled {
        score -= 0.3;
    }
    score = score.clamp(0.0, 1.0);

    let healthy = normal_leap && within_max && !throttled;

    ClockHealth {
        healthy,
        critical: !healthy,
        offset_ms: Some(sync.offset_ms),
        throttled,
        health_score: score,
    }
}

/// Runs a full probe cycle: query time-sync + throttle word, parse, score.
/// Any failure at any stage collapses to [`ClockHealth::probe_failure`].
pub fn run_probe(probe: &dyn ClockProbe, max_offset_ms: f64) -> ClockHealth {
    let Ok(stdout) = probe.query_time_sync() else {
        return ClockHealth::probe_failure();
    };
    let Some(sync) = parse_time_sync_output(&stdout) else {
        return ClockHealth::probe_failure();
    };
    let throttled = match probe.query_throttle_word() {
        Ok(word) => word & CURRENTLY_THROTTLED_BIT != 0,
        Err(_) => return ClockHealth::probe_failure(),
    };
    score_clock_health(Some(&sync), throttled, max_offset_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_last_offset_preferred() {
        let stdout = "Leap status     : Normal\nRMS offset      : 0.001000 seconds\nLast offset     : 0.003500 seconds\n";
        let status = parse_time_sync_output(stdout).unwrap();
        assert_eq!(status.leap_status, "Normal");
        assert!((status.offset_ms - 3.5).abs() < 1e-9);
    }

    #[test]
    fn falls_back_to_rms_offset() {
        let stdout = "Leap status     : Normal\nRMS offset      : -0.0021 seconds\n";
        let status = parse_time_sync_output(stdout).unwrap();
        assert!((status.offset_ms - (-2.1)).abs() < 1e-9);
    }

    #[test]
    fn missing_leap_status_is_none() {
        let stdout = "Last offset     : 0.0010 seconds\n";
        assert!(parse_time_sync_output(stdout).is_none());
    }

    #[test]
    fn healthy_when_within_bounds() {
        let sync = TimeSyncStatus {
            leap_status: "Normal".into(),
            offset_ms: 3.5,
        };
        let health = score_clock_health(Some(&sync), false, 50.0);
        assert!(health.healthy);
        assert!(!health.critical);
        assert_eq!(health.health_score, 1.0);
    }

    #[test]
    fn critical_on_probe_failure() {
        let health = score_clock_health(None, false, 50.0);
        assert!(health.critical);
        assert!(!health.healthy);
        assert_eq!(health.health_score, 0.0);
        assert_eq!(health.offset_ms, None);
    }

    #[test]
    fn throttled_forces_unhealthy_even_with_good_offset() {
        let sync = TimeSyncStatus {
            leap_status: "Normal".into(),
            offset_ms: 1.0,
        };
        let health = score_clock_health(Some(&sync), true, 50.0);
        assert!(!health.healthy);
        assert!(health.throttled);
        // 0.2 + 0.4 (leap) + 0.4 (within max) - 0.3 (throttled) = 0.7
        assert!((health.health_score - 0.7).abs() < 1e-9);
    }

    #[test]
    fn large_offset_partial_credit() {
        let sync = TimeSyncStatus {
            leap_status: "Normal".into(),
            offset_ms: 75.0,
        };
        let health = score_clock_health(Some(&sync), false, 50.0);
        assert!(!health.healthy);
        assert!(health.critical);
        // 0.2 + 0.4 (leap) + 0.2 (within 2x max) = 0.8
        assert!((health.health_score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn abnormal_leap_is_unhealthy_regardless_of_offset() {
        let sync = TimeSyncStatus {
            leap_status: "Alarm".into(),
            offset_ms: 0.0,
        };
        let health = score_clock_health(Some(&sync), false, 50.0);
        assert!(!health.healthy);
        assert!(health.critical);
    }

    struct FakeProbe {
        stdout: &'static str,
        throttle_word: u32,
    }

    impl ClockProbe for FakeProbe {
        fn query_time_sync(&self) -> Result<String, String> {
            Ok(self.stdout.to_string())
        }
        fn query_throttle_word(&self) -> Result<u32, String> {
            Ok(self.throttle_word)
        }
    }

    #[test]
    fn run_probe_sets_throttled_from_bit_4() {
        let probe = FakeProbe {
            stdout: "Leap status     : Normal\nLast offset     : 0.0 seconds\n",
            throttle_word: 0x4,
        };
        let health = run_probe(&probe, 50.0);
        assert!(health.throttled);
    }

    #[test]
    fn run_probe_ignores_other_throttle_bits() {
        let probe = FakeProbe {
            stdout: "Leap status     : Normal\nLast offset     : 0.0 seconds\n",
            throttle_word: 0x8,
        };
        let health = run_probe(&probe, 50.0);
        assert!(!health.throttled);
    }
}
