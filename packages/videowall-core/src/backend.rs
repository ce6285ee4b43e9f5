//! Playback backend: the capability interface to the local media renderer
//! process and its IPC socket.
//!
//! External collaborator by design — the actual renderer and its transport
//! live outside this crate. Modeled as a capability trait so the supervisor
//! and drift controller can be exercised against a fake in tests.

use async_trait::async_trait;

use crate::state::SessionContext;

/// Lower bound of the permissible playback speed range.
pub const MIN_PLAYBACK_SPEED: f64 = 0.97;
/// Upper bound of the permissible playback speed range.
pub const MAX_PLAYBACK_SPEED: f64 = 1.03;

/// Required operations the supervisor consumes from the local media
/// renderer. All methods are synchronous IPC calls from the renderer's
/// point of view, modeled as async here so a real implementation can use
/// non-blocking socket I/O without forcing the trait to assume otherwise.
#[async_trait]
pub trait PlaybackBackend: Send + Sync {
    /// Begins rendering the file at `ctx.local_path`, paused and ready for
    /// seek. Returns `false` on any failure to start the process or pipe.
    async fn start_sync_playback(&self, ctx: &SessionContext) -> bool;

    /// Forcibly terminates rendering.
    async fn stop_playback(&self);

    /// Absolute seek within the loop.
    async fn seek_to_phase_ms(&self, phase_ms: i64) -> bool;

    /// Pauses or resumes playback.
    async fn set_pause(&self, paused: bool) -> bool;

    /// Sets playback speed. Callers are expected to clamp to
    /// `[MIN_PLAYBACK_SPEED, MAX_PLAYBACK_SPEED]` before calling.
    async fn set_playback_speed(&self, speed: f64) -> bool;

    /// Whether the renderer process is still alive.
    async fn is_playback_alive(&self) -> bool;

    /// Current media position, if queryable.
    async fn get_playback_time_ms(&self) -> Option<f64>;

    /// The media's real duration, which may deviate from
    /// `ctx.duration_ms` by up to several hundred milliseconds.
    async fn get_playback_duration_ms(&self) -> Option<f64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_bounds_match_contract() {
        assert!(MIN_PLAYBACK_SPEED < 1.0 && 1.0 < MAX_PLAYBACK_SPEED);
        assert!((MAX_PLAYBACK_SPEED - MIN_PLAYBACK_SPEED - 0.06).abs() < 1e-9);
    }
}
