//! Pure drift math: target-phase derivation, wrapped drift, frame rounding,
//! and the correction decision.
//!
//! Every function here is deterministic and side-effect-free — no clock
//! reads, no locks, no I/O. This is the nucleus the rest of the crate
//! builds telemetry and control decisions on top of.

use serde::{Deserialize, Serialize};

/// Nominal video frame duration in milliseconds (60000/3600 at ~60fps-ish
/// signage content; matches the Python original's default).
pub const DEFAULT_FRAME_MS: f64 = 16.6667;

/// Deadband below which no correction is applied, in milliseconds.
pub const DEFAULT_DEADBAND_MS: f64 = 25.0;

/// Minimum drift magnitude that can trigger a soft correction.
pub const DEFAULT_SOFT_MIN_MS: f64 = 25.0;

/// Hard-resync threshold outside of warm-up, in milliseconds.
pub const DEFAULT_HARD_THRESHOLD_MS: f64 = 500.0;

/// Hard-resync threshold ceiling while `in_warmup` is true.
pub const WARMUP_HARD_THRESHOLD_CAP_MS: f64 = 300.0;

/// Maximum permissible speed delta outside of warm-up.
pub const DEFAULT_MAX_SPEED_DELTA_NORMAL: f64 = 0.01;

/// Maximum permissible speed delta during warm-up.
pub const DEFAULT_MAX_SPEED_DELTA_WARMUP: f64 = 0.03;

/// Base proportional gain for soft speed correction.
pub const DEFAULT_K_BASE: f64 = 0.0003;

/// Tunable parameters for [`decide_correction`].
///
/// Grouped so the supervisor can apply per-session overrides (from
/// `sync_config.hard_resync_threshold_ms`) without threading seven
/// positional arguments through call sites.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftTuning {
    pub deadband_ms: f64,
    pub soft_min_ms: f64,
    pub hard_threshold_ms: f64,
    pub max_speed_delta_normal: f64,
    pub max_speed_delta_warmup: f64,
    pub k_base: f64,
    pub frame_ms: f64,
}

impl Default for DriftTuning {
    fn default() -> Self {
        Self {
            deadband_ms: DEFAULT_DEADBAND_MS,
            soft_min_ms: DEFAULT_SOFT_MIN_MS,
            hard_threshold_ms: DEFAULT_HARD_THRESHOLD_MS,
            max_speed_delta_normal: DEFAULT_MAX_SPEED_DELTA_NORMAL,
            max_speed_delta_warmup: DEFAULT_MAX_SPEED_DELTA_WARMUP,
            k_base: DEFAULT_K_BASE,
            frame_ms: DEFAULT_FRAME_MS,
        }
    }
}

/// The supervisor's decision for how to correct playback phase this tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum CorrectionDecision {
    /// No correction needed; drift is within the deadband.
    None,
    /// Closed-loop speed adjustment.
    Soft { target_speed: f64 },
    /// Frame-aligned absolute seek, and reset to normal speed.
    Hard { seek_to_ms: i64, target_speed: f64 },
}

/// Clamps `value` into `[min_value, max_value]`.
#[must_use]
fn clamp(value: f64, min_value: f64, max_value: f64) -> f64 {
    value.max(min_value).min(max_value)
}

/// Rounds a phase to the nearest multiple of `frame_ms`.
///
/// Falls back to plain rounding if `frame_ms <= 0` (guards against a
/// misconfigured frame duration rather than dividing by zero).
#[must_use]
pub fn round_to_frame(phase_ms: f64, frame_ms: f64) -> i64 {
    if frame_ms <= 0.0 {
        return phase_ms.round() as i64;
    }
    ((phase_ms / frame_ms).round() * frame_ms) as i64
}

/// Derives the phase (ms into the loop) the device should be at right now
/// from the wall clock.
///
/// Returns `None` if the session hasn't started yet (`now_ms < start_at_ms`)
/// or the loop duration is non-positive. Otherwise the result is always in
/// `[0, duration_ms)`.
#[must_use]
pub fn compute_target_phase_ms(now_ms: i64, start_at_ms: i64, duration_ms: i64) -> Option<i64> {
    if duration_ms <= 0 || now_ms < start_at_ms {
        return None;
    }
    Some((now_ms - start_at_ms) % duration_ms)
}

/// Computes the signed, minimum-magnitude drift between an actual and target
/// phase over the circular group of order `duration_ms`.
///
/// The result is always in `[-duration_ms/2, +duration_ms/2]`.
#[must_use]
pub fn compute_wrapped_drift_ms(actual_phase_ms: f64, target_phase_ms: f64, duration_ms: i64) -> f64 {
    if duration_ms <= 0 {
        return 0.0;
    }
    let duration = duration_ms as f64;
    let half = duration / 2.0;
    let mut raw = actual_phase_ms - target_phase_ms;
    if raw > half {
        raw -= duration;
    } else if raw < -half {
        raw += duration;
    }
    raw
}

/// Decides between no-op, soft speed correction, or hard seek given the
/// current wrapped drift.
///
/// Evaluated in this fixed order (first match wins):
/// 1. `|drift| >= hard_threshold` (reduced to `min(300, configured)` in
///    warm-up) → [`CorrectionDecision::Hard`], seeking to the frame-rounded
///    target phase.
/// 2. `|drift| < max(deadband, soft_min)` → [`CorrectionDecision::None`].
/// 3. Otherwise → [`CorrectionDecision::Soft`] with a proportional speed
///    adjustment, tiered by drift magnitude.
#[must_use]
pub fn decide_correction(
    drift_ms: f64,
    target_phase_ms: i64,
    in_warmup: bool,
    tuning: &DriftTuning,
) -> CorrectionDecision {
    let abs_drift = drift_ms.abs();

    let hard_threshold = if in_warmup {
        tuning.hard_threshold_ms.min(WARMUP_HARD_THRESHOLD_CAP_MS)
    } else {
        tuning.hard_threshold_ms
    };
    let max_speed_delta = if in_warmup {
        tuning.max_speed_delta_warmup
    } else {
        tuning.max_speed_delta_normal
    };

    if abs_drift >= hard_threshold {
        return CorrectionDecision::Hard {
            seek_to_ms: round_to_frame(target_phase_ms as f64, tuning.frame_ms),
            target_speed: 1.0,
        };
    }

    if abs_drift < tuning.deadband_ms.max(tuning.soft_min_ms) {
        return CorrectionDecision::None;
    }

    let gain = if abs_drift > 200.0 {
        tuning.k_base * 1.5
    } else if abs_drift < 50.0 {
        tuning.k_base * 0.7
    } else {
        tuning.k_base
    };

    let speed_adjustment = clamp(-gain * drift_ms, -max_speed_delta, max_speed_delta);
    CorrectionDecision::Soft {
        target_speed: 1.0 + speed_adjustment,
    }
}
