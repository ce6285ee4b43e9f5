//! Demo / null implementations of the `CloudClient` and `PlaybackBackend`
//! capability traits.
//!
//! Neither the cloud coordinator transport nor the local media-renderer IPC
//! client are in scope for this crate (both are external collaborators) —
//! these implementations exist only so the binary has something concrete to
//! wire the supervisor against. `DemoPlaybackBackend` simulates a looping
//! renderer in memory (wall-clock phase advance at the configured speed)
//! well enough to exercise the drift controller end to end without mpv.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use videowall_core::{
    AckStatus, ClockHealth, CloudClient, Command, PlaybackBackend, SessionContext, SyncRuntime,
};

/// A `CloudClient` that never has commands queued and accepts every ack and
/// status report as a no-op. Useful for running the supervisor loop stand-alone
/// (e.g. local testing of the LAN beacon path between two player instances).
pub struct DemoCloudClient {
    device_id: Option<String>,
    media_dir: PathBuf,
}

impl DemoCloudClient {
    #[must_use]
    pub fn new(device_id: Option<String>, media_dir: PathBuf) -> Self {
        Self { device_id, media_dir }
    }
}

#[async_trait]
impl CloudClient for DemoCloudClient {
    async fn poll_device_commands(&self, _limit: usize) -> Vec<Command> {
        Vec::new()
    }

    async fn ack_device_command(
        &self,
        id: &str,
        status: AckStatus,
        error: Option<String>,
        _sync_runtime: Option<SyncRuntime>,
    ) -> bool {
        log::debug!("demo cloud client: ack {id} status={status:?} error={error:?}");
        true
    }

    async fn report_playback_state(
        &self,
        _playing_playlist_id: Option<String>,
        current_content_name: Option<String>,
        _preview_path: Option<String>,
        sync_runtime: Option<SyncRuntime>,
    ) -> bool {
        log::debug!("demo cloud client: report content={current_content_name:?} runtime={sync_runtime:?}");
        true
    }

    async fn get_clock_sync_health(&self, _max_offset_ms: f64) -> ClockHealth {
        ClockHealth::probe_failure()
    }

    async fn get_current_device_id(&self) -> Option<String> {
        self.device_id.clone()
    }

    fn media_dir(&self) -> PathBuf {
        self.media_dir.clone()
    }

    async fn ensure_sync_media_available(&self, media_id: Option<&str>, local_path: &str) -> Option<PathBuf> {
        log::warn!("demo cloud client cannot fetch media (media_id={media_id:?}, local_path={local_path})");
        None
    }
}

struct PlaybackState {
    alive: bool,
    phase_ms: f64,
    speed: f64,
    paused: bool,
    duration_ms: Option<f64>,
    last_update_ms: i64,
}

/// A `PlaybackBackend` that simulates a looping renderer entirely in memory.
pub struct DemoPlaybackBackend {
    state: Mutex<PlaybackState>,
}

impl DemoPlaybackBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PlaybackState {
                alive: false,
                phase_ms: 0.0,
                speed: 1.0,
                paused: true,
                duration_ms: None,
                last_update_ms: videowall_core::now_millis(),
            }),
        }
    }

    fn advance_locked(state: &mut PlaybackState) {
        let now = videowall_core::now_millis();
        if state.alive && !state.paused {
            let elapsed_ms = (now - state.last_update_ms).max(0) as f64;
            state.phase_ms += elapsed_ms * state.speed;
            if let Some(duration) = state.duration_ms {
                if duration > 0.0 {
                    state.phase_ms = state.phase_ms.rem_euclid(duration);
                }
            }
        }
        state.last_update_ms = now;
    }
}

impl Default for DemoPlaybackBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlaybackBackend for DemoPlaybackBackend {
    async fn start_sync_playback(&self, ctx: &SessionContext) -> bool {
        log::info!("demo backend: starting sync playback for {}", ctx.local_path);
        let mut state = self.state.lock();
        state.alive = true;
        state.paused = true;
        state.phase_ms = 0.0;
        state.speed = 1.0;
        state.duration_ms = Some(ctx.duration_ms as f64);
        state.last_update_ms = videowall_core::now_millis();
        true
    }

    async fn stop_playback(&self) {
        log::info!("demo backend: stopping playback");
        let mut state = self.state.lock();
        state.alive = false;
        state.paused = true;
    }

    async fn seek_to_phase_ms(&self, phase_ms: i64) -> bool {
        let mut state = self.state.lock();
        Self::advance_locked(&mut state);
        state.phase_ms = phase_ms as f64;
        true
    }

    async fn set_pause(&self, paused: bool) -> bool {
        let mut state = self.state.lock();
        Self::advance_locked(&mut state);
        state.paused = paused;
        true
    }

    async fn set_playback_speed(&self, speed: f64) -> bool {
        let mut state = self.state.lock();
        Self::advance_locked(&mut state);
        state.speed = speed;
        true
    }

    async fn is_playback_alive(&self) -> bool {
        self.state.lock().alive
    }

    async fn get_playback_time_ms(&self) -> Option<f64> {
        let mut state = self.state.lock();
        if !state.alive {
            return None;
        }
        Self::advance_locked(&mut state);
        Some(state.phase_ms)
    }

    async fn get_playback_duration_ms(&self) -> Option<f64> {
        self.state.lock().duration_ms
    }
}

/// Convenience constructor bundling both demo implementations behind `Arc`.
#[must_use]
pub fn demo_collaborators(
    device_id: Option<String>,
    media_dir: PathBuf,
) -> (Arc<DemoCloudClient>, Arc<DemoPlaybackBackend>) {
    (
        Arc::new(DemoCloudClient::new(device_id, media_dir)),
        Arc::new(DemoPlaybackBackend::new()),
    )
}
