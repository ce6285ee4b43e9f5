//! Videowall supervisor: the single cooperative loop that polls commands,
//! advances the state machine, samples and corrects drift, recovers from
//! playback crashes, and reports telemetry.
//!
//! Grounded in the original `VideowallController.tick`/`_poll_commands`/
//! `_advance_runtime_state`/`_handle_playback_failure`, generalized to the
//! richer polling-cadence table, LAN integration, and per-window drift
//! stats this supervisor owns that the Python original left to an external
//! `sync_manager`.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::backend::PlaybackBackend;
use crate::clock::{run_probe, ClockHealth, ClockProbe};
use crate::cloud::{AckStatus, CloudClient, Command, CommandKind, SyncRuntime};
use crate::config::VideowallConfig;
use crate::drift::{compute_target_phase_ms, compute_wrapped_drift_ms, decide_correction, round_to_frame, DriftTuning};
use crate::events::{EventEmitter, SyncEvent};
use crate::lan::{LanBeaconService, LanRole, PhaseSource};
use crate::state::{LanConfigOverride, SessionContext, SessionState, StateMachine, SyncConfigOverride};
use crate::utils::now_millis;

const DRIFT_WINDOW_MS: i64 = 20_000;
const RESTART_BACKOFF_SECONDS: [i64; 5] = [2, 4, 8, 16, 30];
const MAX_RESTART_ATTEMPTS: u32 = 5;
const CLOCK_CHECK_INTERVAL_S: f64 = 10.0;
const CLOCK_MAX_OFFSET_MS: f64 = 50.0;
const THERMAL_LOG_INTERVAL_S: f64 = 30.0;
const SOFT_CORRECTION_LOG_INTERVAL_S: f64 = 5.0;
const SOFT_CORRECTION_SPEED_THRESHOLD: f64 = 0.002;

/// Current LAN integration mode, distinct from [`LanRole`]: a supervisor
/// can be LAN-disabled, cloud-fallback (beacon stale or LAN off), or
/// actively acting as master/follower.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanMode {
    Disabled,
    CloudFallback,
    Master,
    Follower,
}

impl std::fmt::Display for LanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disabled => "disabled",
            Self::CloudFallback => "cloud_fallback",
            Self::Master => "master",
            Self::Follower => "follower",
        };
        f.write_str(s)
    }
}

struct Inner {
    last_poll_ts_s: f64,
    last_status_ts_s: f64,
    warmup_until_ms: Option<i64>,
    resync_count: u32,
    restart_attempts: u32,
    next_restart_at_ms: Option<i64>,
    last_thermal_log_ts_s: f64,
    last_soft_correction_log_ts_s: f64,
    last_applied_speed: f64,
    drift_window: VecDeque<(i64, f64)>,
    max_drift_ms: f64,
    last_drift_ms: Option<f64>,
    clock_health: ClockHealth,
    last_clock_check_ts_s: f64,
    lan_mode: LanMode,
    local_device_id: Option<String>,
    session_started_at_ms: Option<i64>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            last_poll_ts_s: 0.0,
            last_status_ts_s: 0.0,
            warmup_until_ms: None,
            resync_count: 0,
            restart_attempts: 0,
            next_restart_at_ms: None,
            last_thermal_log_ts_s: 0.0,
            last_soft_correction_log_ts_s: 0.0,
            last_applied_speed: 1.0,
            drift_window: VecDeque::new(),
            max_drift_ms: 0.0,
            last_drift_ms: None,
            clock_health: ClockHealth::probe_failure(),
            last_clock_check_ts_s: 0.0,
            lan_mode: LanMode::Disabled,
            local_device_id: None,
            session_started_at_ms: None,
        }
    }
}

/// Orchestrates the drift controller, state machine, clock probe, and LAN
/// service against the external cloud client and playback backend.
pub struct VideowallSupervisor<C, B>
where
    C: CloudClient + 'static,
    B: PlaybackBackend + 'static,
{
    state: StateMachine,
    cloud: Arc<C>,
    backend: Arc<B>,
    lan: Arc<LanBeaconService>,
    clock_probe: Arc<dyn ClockProbe>,
    events: Arc<dyn EventEmitter>,
    config: VideowallConfig,
    inner: Mutex<Inner>,
}

impl<C, B> VideowallSupervisor<C, B>
where
    C: CloudClient + 'static,
    B: PlaybackBackend + 'static,
{
    pub fn new(
        cloud: Arc<C>,
        backend: Arc<B>,
        clock_probe: Arc<dyn ClockProbe>,
        events: Arc<dyn EventEmitter>,
        config: VideowallConfig,
    ) -> Self {
        Self {
            state: StateMachine::new(),
            cloud,
            backend,
            lan: Arc::new(LanBeaconService::new()),
            clock_probe,
            events,
            config,
            inner: Mutex::new(Inner::default()),
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.state()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Runs one supervisor tick: polls commands if due, advances runtime
    /// state, reports status if due. Intended to be driven at >= 4 Hz.
    pub async fn tick(self: &Arc<Self>) {
        let now_ms = now_millis();
        let now_s = now_ms as f64 / 1000.0;

        let poll_interval = self.command_poll_interval_s();
        let due_poll = {
            let inner = self.inner.lock();
            now_s - inner.last_poll_ts_s >= poll_interval
        };
        if due_poll {
            self.inner.lock().last_poll_ts_s = now_s;
            self.poll_commands().await;
        }

        self.advance_runtime_state(now_ms).await;

        if self.state.is_active() {
            let status_interval = self.status_interval_s();
            let due_status = {
                let inner = self.inner.lock();
                now_s - inner.last_status_ts_s >= status_interval
            };
            if due_status {
                self.inner.lock().last_status_ts_s = now_s;
                self.report_status().await;
            }
        }
    }

    fn command_poll_interval_s(&self) -> f64 {
        let state = self.state.state();
        let lan_mode = self.inner.lock().lan_mode;
        match state {
            SessionState::Preloading | SessionState::Ready | SessionState::WarmingUp => {
                self.config.command_poll_critical_s
            }
            SessionState::Playing if lan_mode == LanMode::Follower => self
                .config
                .command_poll_active_s
                .max(self.config.command_poll_playing_lan_s),
            SessionState::Playing => self.config.command_poll_active_s,
            _ => {
                if self.state.is_active() {
                    self.config.command_poll_active_s
                } else {
                    self.config.command_poll_idle_s
                }
            }
        }
    }

    fn status_interval_s(&self) -> f64 {
        let state = self.state.state();
        let lan_mode = self.inner.lock().lan_mode;
        match state {
            SessionState::Ready | SessionState::WarmingUp => self.config.status_interval_critical_s,
            SessionState::Playing if lan_mode == LanMode::Follower => {
                self.config.status_interval_playing_lan_s
            }
            _ => self.config.status_interval_playing_s,
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // Command polling
    // ─────────────────────────────────────────────────────────────────

    async fn poll_commands(self: &Arc<Self>) {
        let commands = self.cloud.poll_device_commands(20).await;
        for command in commands {
            let result = self.handle_command(&command).await;
            let sync_runtime = self.build_sync_runtime().await;
            let (status, error) = match result {
                Ok(()) => (AckStatus::Acked, None),
                Err(msg) => (AckStatus::Failed, Some(msg)),
            };
            self.cloud
                .ack_device_command(&command.id, status, error, sync_runtime)
                .await;
        }
    }

    async fn handle_command(self: &Arc<Self>, command: &Command) -> Result<(), String> {
        match command.kind {
            CommandKind::SyncPrepare => self.handle_prepare(&command.payload, command.session_id.as_deref()).await,
            CommandKind::SyncStop => self.handle_stop(&command.payload, command.session_id.as_deref()).await,
        }
    }

    async fn handle_prepare(self: &Arc<Self>, payload: &Value, fallback_session_id: Option<&str>) -> Result<(), String> {
        let session_id = string_field(payload, "session_id", "sessionId")
            .or_else(|| fallback_session_id.map(str::to_string))
            .ok_or("Missing session_id in sync.prepare")?;

        let media = payload.get("media").cloned().unwrap_or(Value::Null);
        let raw_local_path =
            string_field(&media, "local_path", "localPath").ok_or("Missing media.local_path in sync.prepare")?;
        let media_id = string_field(&media, "media_id", "mediaId");

        let start_at_ms = int_field(payload, "start_at_ms", "startAtMs")
            .ok_or("Missing start_at_ms or duration_ms in sync.prepare")?;
        let duration_ms = int_field(payload, "duration_ms", "durationMs")
            .ok_or("Missing start_at_ms or duration_ms in sync.prepare")?;
        let master_device_id = string_field(payload, "master_device_id", "masterDeviceId");
        let sync_config = parse_sync_config_override(payload.get("sync_config").or_else(|| payload.get("syncConfig")));

        let resolved_local_path = self
            .resolve_prepare_local_path(&raw_local_path, media_id.as_deref())
            .await
            .ok_or_else(|| format!("Local media not found: {raw_local_path}"))?
            .to_string_lossy()
            .into_owned();

        let existing = self.state.context();
        if let Some(existing_ctx) = existing.as_ref() {
            if existing_ctx.session_id == session_id {
                self.state.update_context(|ctx| {
                    ctx.start_at_ms = start_at_ms;
                    ctx.duration_ms = duration_ms;
                    ctx.local_path = resolved_local_path.clone();
                    ctx.master_device_id = master_device_id.clone();
                    ctx.sync_config = sync_config.clone();
                });
                let state = self.state.state();
                let live_states = matches!(
                    state,
                    SessionState::Ready | SessionState::WarmingUp | SessionState::Playing
                );
                if live_states && self.backend.is_playback_alive().await {
                    self.configure_lan_role().await;
                    return Ok(());
                }
            } else {
                self.stop_active_session().await;
            }
        }

        let device_id = self.local_device_id().await;
        let ctx = SessionContext {
            session_id: session_id.clone(),
            start_at_ms,
            duration_ms,
            local_path: resolved_local_path,
            master_device_id,
            device_id,
            sync_config,
        };
        self.state.activate(ctx.clone());
        if !self.state.transition(SessionState::Preloading, false) {
            return Err("Invalid transition to PRELOADING".to_string());
        }

        let clock_health = self.refresh_clock_health(true).await;
        if clock_health.critical {
            self.state.transition(SessionState::Errored, true);
            return Err(format!(
                "Clock unsynchronized (offset_ms={:?}, healthy={})",
                clock_health.offset_ms, clock_health.healthy
            ));
        }

        if !self.backend.start_sync_playback(&ctx).await {
            self.state.transition(SessionState::Errored, true);
            return Err("Failed to start playback backend in sync mode".to_string());
        }

        if let Some(real_duration) = self.refine_duration_from_backend().await {
            self.state.update_context(|c| c.duration_ms = real_duration);
        }

        if !self.state.transition(SessionState::Ready, false) {
            self.state.transition(SessionState::Errored, true);
            return Err("Invalid transition to READY".to_string());
        }

        self.configure_lan_role().await;

        {
            let mut inner = self.inner.lock();
            inner.restart_attempts = 0;
            inner.next_restart_at_ms = None;
            inner.resync_count = 0;
            inner.max_drift_ms = 0.0;
            inner.last_drift_ms = None;
            inner.drift_window.clear();
            inner.session_started_at_ms = Some(now_millis());
        }

        self.events.emit(&session_id, SyncEvent::Ready);
        Ok(())
    }

    async fn handle_stop(self: &Arc<Self>, payload: &Value, fallback_session_id: Option<&str>) -> Result<(), String> {
        let session_id = string_field(payload, "session_id", "sessionId").or_else(|| fallback_session_id.map(str::to_string));
        let context = self.state.context();

        if let (Some(ctx), Some(requested)) = (context.as_ref(), session_id.as_ref()) {
            if &ctx.session_id != requested {
                return Ok(());
            }
        }

        self.stop_active_session().await;
        Ok(())
    }

    async fn stop_active_session(self: &Arc<Self>) {
        self.backend.stop_playback().await;
        self.lan.stop();
        if self.state.is_active() {
            self.state.transition(SessionState::Disconnected, true);
        }
        self.state.reset();
        let mut inner = self.inner.lock();
        inner.warmup_until_ms = None;
        inner.restart_attempts = 0;
        inner.next_restart_at_ms = None;
        inner.lan_mode = LanMode::Disabled;
        inner.session_started_at_ms = None;
    }

    async fn resolve_prepare_local_path(self: &Arc<Self>, raw_local_path: &str, media_id: Option<&str>) -> Option<PathBuf> {
        let raw_path = Path::new(raw_local_path);
        if raw_path.is_absolute() && raw_path.exists() {
            return Some(raw_path.to_path_buf());
        }

        let media_dir = self.cloud.media_dir();
        if let Some(basename) = raw_path.file_name() {
            let candidate = media_dir.join(basename);
            if candidate.exists() {
                return Some(candidate);
            }
        }

        if raw_path.exists() {
            return Some(raw_path.to_path_buf());
        }

        self.cloud.ensure_sync_media_available(media_id, raw_local_path).await
    }

    async fn local_device_id(self: &Arc<Self>) -> Option<String> {
        {
            let inner = self.inner.lock();
            if inner.local_device_id.is_some() {
                return inner.local_device_id.clone();
            }
        }
        let id = self.cloud.get_current_device_id().await;
        self.inner.lock().local_device_id = id.clone();
        id
    }

    /// LAN role election on prepare, per the fixed decision order: disabled
    /// config wins outright; then unresolvable local id; then master/
    /// follower/cloud_fallback by comparing `master_device_id`.
    async fn configure_lan_role(self: &Arc<Self>) {
        let Some(ctx) = self.state.context() else {
            return;
        };
        let lan_cfg = self.effective_lan_config(&ctx.sync_config);

        if !lan_cfg.enabled {
            self.lan.stop();
            self.inner.lock().lan_mode = LanMode::Disabled;
            return;
        }

        let Some(local_id) = self.local_device_id().await else {
            self.lan.stop();
            self.inner.lock().lan_mode = LanMode::CloudFallback;
            return;
        };

        let started = if ctx.master_device_id.as_deref() == Some(local_id.as_str()) {
            let source: Arc<dyn PhaseSource> = self.clone();
            self.lan.start_master(
                ctx.session_id.clone(),
                local_id.clone(),
                ctx.duration_ms,
                lan_cfg.beacon_hz,
                lan_cfg.broadcast_addr.clone(),
                lan_cfg.beacon_port,
                source,
            )
        } else if let Some(master_id) = ctx.master_device_id.clone() {
            self.lan.start_follower(
                ctx.session_id.clone(),
                master_id,
                ctx.duration_ms,
                lan_cfg.bind_host.clone(),
                lan_cfg.beacon_port,
                lan_cfg.timeout_ms,
            )
        } else {
            self.lan.stop();
            self.inner.lock().lan_mode = LanMode::CloudFallback;
            return;
        };

        let mode = if !started {
            LanMode::CloudFallback
        } else if ctx.master_device_id.as_deref() == Some(local_id.as_str()) {
            LanMode::Master
        } else {
            LanMode::Follower
        };
        self.inner.lock().lan_mode = mode;
    }

    fn effective_lan_config(&self, overrides: &SyncConfigOverride) -> crate::config::LanConfig {
        let mut lan = self.config.lan.clone();
        apply_lan_override(&mut lan, &overrides.lan);
        lan
    }

    // ─────────────────────────────────────────────────────────────────
    // State advancement
    // ─────────────────────────────────────────────────────────────────

    async fn advance_runtime_state(self: &Arc<Self>, now_ms: i64) {
        let Some(ctx) = self.state.context() else {
            return;
        };
        let state = self.state.state();

        let live = matches!(
            state,
            SessionState::Ready | SessionState::WarmingUp | SessionState::Playing
        );
        if live && !self.backend.is_playback_alive().await {
            self.handle_playback_failure(now_ms, &ctx).await;
            return;
        }

        if state == SessionState::Ready && now_ms >= ctx.start_at_ms {
            if let Some(target_phase) = compute_target_phase_ms(now_ms, ctx.start_at_ms, ctx.duration_ms) {
                let seek_to_ms = round_to_frame(target_phase as f64, crate::drift::DEFAULT_FRAME_MS);
                self.backend.seek_to_phase_ms(seek_to_ms).await;
            }
            self.backend.set_playback_speed(1.0).await;
            self.backend.set_pause(false).await;
            if self.state.transition(SessionState::WarmingUp, false) {
                self.enter_warmup(now_ms, &ctx);
                self.events.emit(&ctx.session_id, SyncEvent::Started);
            }
        }

        if matches!(self.state.state(), SessionState::WarmingUp | SessionState::Playing) {
            self.sample_and_correct_drift(now_ms, &ctx).await;
        }

        if self.state.state() == SessionState::WarmingUp {
            let warmup_elapsed = self
                .inner
                .lock()
                .warmup_until_ms
                .map(|until| now_ms >= until)
                .unwrap_or(false);
            if warmup_elapsed {
                self.state.transition(SessionState::Playing, false);
            }
        }
    }

    fn enter_warmup(&self, now_ms: i64, ctx: &SessionContext) {
        let warmup_ms = (2 * ctx.duration_ms).clamp(2000, 12000);
        self.inner.lock().warmup_until_ms = Some(now_ms + warmup_ms);
    }

    async fn handle_playback_failure(self: &Arc<Self>, now_ms: i64, ctx: &SessionContext) {
        let (restart_attempts, next_restart_at_ms) = {
            let inner = self.inner.lock();
            (inner.restart_attempts, inner.next_restart_at_ms)
        };

        if restart_attempts >= MAX_RESTART_ATTEMPTS {
            self.state.transition(SessionState::Errored, true);
            log::error!(
                "session {} exceeded restart attempts ({MAX_RESTART_ATTEMPTS})",
                ctx.session_id
            );
            return;
        }

        if next_restart_at_ms.is_none() {
            let delay_idx = (restart_attempts as usize).min(RESTART_BACKOFF_SECONDS.len() - 1);
            let delay_s = RESTART_BACKOFF_SECONDS[delay_idx];
            self.inner.lock().next_restart_at_ms = Some(now_ms + delay_s * 1000);
            log::error!(
                "playback crash detected in session {} — restarting in {delay_s}s (attempt {}/{MAX_RESTART_ATTEMPTS})",
                ctx.session_id,
                restart_attempts + 1
            );
            self.events.emit(&ctx.session_id, SyncEvent::MpvCrash { attempt: restart_attempts + 1 });
            return;
        }

        let Some(scheduled_at) = next_restart_at_ms else {
            return;
        };
        if now_ms < scheduled_at {
            return;
        }

        let attempt = restart_attempts + 1;
        self.inner.lock().next_restart_at_ms = None;

        if !self.backend.start_sync_playback(ctx).await {
            self.inner.lock().restart_attempts = attempt;
            if attempt >= MAX_RESTART_ATTEMPTS {
                self.state.transition(SessionState::Errored, true);
                log::error!("playback restart failed permanently for session {}", ctx.session_id);
            }
            return;
        }

        let target_phase = compute_target_phase_ms(now_ms, ctx.start_at_ms, ctx.duration_ms).unwrap_or(0);
        let seek_to_ms = round_to_frame(target_phase as f64, crate::drift::DEFAULT_FRAME_MS);
        self.backend.seek_to_phase_ms(seek_to_ms).await;
        self.backend.set_playback_speed(1.0).await;
        self.backend.set_pause(false).await;
        self.state.transition(SessionState::WarmingUp, true);
        self.enter_warmup(now_ms, ctx);

        {
            let mut inner = self.inner.lock();
            inner.resync_count += 1;
            inner.last_applied_speed = 1.0;
            inner.restart_attempts = 0;
        }

        self.events.emit(
            &ctx.session_id,
            SyncEvent::HardResync { reason: Some("rejoin") },
        );
        self.events.emit(&ctx.session_id, SyncEvent::Rejoin);
    }

    // ─────────────────────────────────────────────────────────────────
    // Drift sampling and correction
    // ─────────────────────────────────────────────────────────────────

    async fn resolve_target_phase_ms(self: &Arc<Self>, now_ms: i64, ctx: &SessionContext) -> Option<i64> {
        let lan_mode = self.inner.lock().lan_mode;
        if matches!(lan_mode, LanMode::Follower | LanMode::CloudFallback) {
            if let Some(phase) = self.lan.follower_target_phase_ms(now_ms) {
                self.inner.lock().lan_mode = LanMode::Follower;
                return Some(phase.round() as i64);
            }
            let lan_cfg = self.effective_lan_config(&ctx.sync_config);
            if lan_cfg.fallback_to_cloud {
                self.inner.lock().lan_mode = LanMode::CloudFallback;
                return compute_target_phase_ms(now_ms, ctx.start_at_ms, ctx.duration_ms);
            }
            return None;
        }
        compute_target_phase_ms(now_ms, ctx.start_at_ms, ctx.duration_ms)
    }

    async fn sample_and_correct_drift(self: &Arc<Self>, now_ms: i64, ctx: &SessionContext) {
        let Some(target_phase) = self.resolve_target_phase_ms(now_ms, ctx).await else {
            return;
        };
        let Some(playback_time) = self.backend.get_playback_time_ms().await else {
            return;
        };
        if ctx.duration_ms <= 0 {
            return;
        }
        let actual_phase = playback_time.rem_euclid(ctx.duration_ms as f64);
        let drift = compute_wrapped_drift_ms(actual_phase, target_phase as f64, ctx.duration_ms);

        {
            let mut inner = self.inner.lock();
            inner.drift_window.push_back((now_ms, drift.abs()));
            while let Some(&(ts, _)) = inner.drift_window.front() {
                if now_ms - ts > DRIFT_WINDOW_MS {
                    inner.drift_window.pop_front();
                } else {
                    break;
                }
            }
            inner.max_drift_ms = inner.max_drift_ms.max(drift.abs());
            inner.last_drift_ms = Some(drift);
        }

        let in_warmup = self.state.state() == SessionState::WarmingUp;
        let mut tuning = DriftTuning::default();
        tuning.hard_threshold_ms = ctx
            .sync_config
            .hard_resync_threshold_ms
            .map(|v| v as f64)
            .unwrap_or(self.config.hard_resync_threshold_ms);

        let decision = decide_correction(drift, target_phase, in_warmup, &tuning);
        self.apply_correction(decision, ctx).await;
    }

    async fn apply_correction(self: &Arc<Self>, decision: crate::drift::CorrectionDecision, ctx: &SessionContext) {
        use crate::drift::CorrectionDecision;
        match decision {
            CorrectionDecision::Hard { seek_to_ms, target_speed } => {
                if self.backend.seek_to_phase_ms(seek_to_ms).await {
                    self.inner.lock().resync_count += 1;
                }
                self.backend.set_playback_speed(target_speed).await;
                self.inner.lock().last_applied_speed = target_speed;
                self.events.emit(&ctx.session_id, SyncEvent::HardResync { reason: None });
            }
            CorrectionDecision::Soft { target_speed } => {
                self.apply_speed_if_changed(target_speed, ctx, true).await;
            }
            CorrectionDecision::None => {
                self.apply_speed_if_changed(1.0, ctx, false).await;
            }
        }
    }

    async fn apply_speed_if_changed(self: &Arc<Self>, target_speed: f64, ctx: &SessionContext, is_soft: bool) {
        let should_apply = {
            let inner = self.inner.lock();
            (target_speed - inner.last_applied_speed).abs() >= SOFT_CORRECTION_SPEED_THRESHOLD
        };
        if !should_apply {
            return;
        }
        self.backend.set_playback_speed(target_speed).await;
        self.inner.lock().last_applied_speed = target_speed;

        if is_soft {
            let now_s = now_millis() as f64 / 1000.0;
            let should_log = {
                let inner = self.inner.lock();
                now_s - inner.last_soft_correction_log_ts_s >= SOFT_CORRECTION_LOG_INTERVAL_S
            };
            if should_log {
                self.inner.lock().last_soft_correction_log_ts_s = now_s;
                self.events
                    .emit(&ctx.session_id, SyncEvent::SoftCorrection { target_speed });
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // Clock health and telemetry
    // ─────────────────────────────────────────────────────────────────

    async fn refresh_clock_health(self: &Arc<Self>, force: bool) -> ClockHealth {
        let now_s = now_millis() as f64 / 1000.0;
        let due = {
            let inner = self.inner.lock();
            force || now_s - inner.last_clock_check_ts_s >= CLOCK_CHECK_INTERVAL_S
        };
        if !due {
            return self.inner.lock().clock_health;
        }
        let health = run_probe(self.clock_probe.as_ref(), CLOCK_MAX_OFFSET_MS);
        let mut inner = self.inner.lock();
        inner.clock_health = health;
        inner.last_clock_check_ts_s = now_s;
        health
    }

    async fn refine_duration_from_backend(self: &Arc<Self>) -> Option<i64> {
        for _ in 0..15 {
            if let Some(duration) = self.backend.get_playback_duration_ms().await {
                return Some(duration.round() as i64);
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        None
    }

    async fn build_sync_runtime(self: &Arc<Self>) -> Option<SyncRuntime> {
        let ctx = self.state.context()?;
        let status = self.state.state();
        let clock_health = self.refresh_clock_health(false).await;
        let now_ms = now_millis();

        let inner = self.inner.lock();
        let avg_drift_ms = if inner.drift_window.is_empty() {
            0.0
        } else {
            inner.drift_window.iter().map(|(_, d)| *d).sum::<f64>() / inner.drift_window.len() as f64
        };
        let elapsed_minutes = inner
            .session_started_at_ms
            .map(|_| ((now_ms - ctx.start_at_ms).max(0) as f64) / 60_000.0)
            .unwrap_or(0.0);
        let resync_rate = if elapsed_minutes > 0.0 {
            inner.resync_count as f64 / elapsed_minutes
        } else {
            0.0
        };
        let lan_mode = inner.lan_mode;

        Some(SyncRuntime {
            session_id: Some(ctx.session_id.clone()),
            status,
            drift_ms: inner.last_drift_ms,
            resync_count: inner.resync_count,
            avg_drift_ms,
            max_drift_ms: inner.max_drift_ms,
            resync_rate,
            clock_offset_ms: clock_health.offset_ms,
            throttled: clock_health.throttled,
            health_score: clock_health.health_score,
            lan_mode: lan_mode.to_string(),
            lan_beacon_age_ms: self.lan.follower_beacon_age_ms(now_ms),
        })
    }

    async fn report_status(self: &Arc<Self>) {
        let Some(runtime) = self.build_sync_runtime().await else {
            return;
        };

        if runtime.throttled {
            let now_s = now_millis() as f64 / 1000.0;
            let should_log = {
                let inner = self.inner.lock();
                now_s - inner.last_thermal_log_ts_s >= THERMAL_LOG_INTERVAL_S
            };
            if should_log {
                self.inner.lock().last_thermal_log_ts_s = now_s;
                if let Some(session_id) = runtime.session_id.as_deref() {
                    self.events.emit(session_id, SyncEvent::ThermalThrottle);
                }
            }
        }

        let content_name = self
            .state
            .context()
            .and_then(|ctx| Path::new(&ctx.local_path).file_name().map(|n| n.to_string_lossy().into_owned()));

        self.cloud
            .report_playback_state(None, content_name, None, Some(runtime))
            .await;
    }
}

#[async_trait]
impl<C, B> PhaseSource for VideowallSupervisor<C, B>
where
    C: CloudClient + 'static,
    B: PlaybackBackend + 'static,
{
    async fn phase_ms(&self) -> Option<f64> {
        self.backend.get_playback_time_ms().await
    }

    async fn playback_speed(&self) -> f64 {
        self.inner.lock().last_applied_speed
    }
}

fn apply_lan_override(lan: &mut crate::config::LanConfig, overrides: &LanConfigOverride) {
    if let Some(v) = overrides.enabled {
        lan.enabled = v;
    }
    if let Some(v) = overrides.beacon_hz {
        lan.beacon_hz = v;
    }
    if let Some(v) = overrides.beacon_port {
        lan.beacon_port = v;
    }
    if let Some(v) = overrides.timeout_ms {
        lan.timeout_ms = v;
    }
    if let Some(v) = overrides.fallback_to_cloud {
        lan.fallback_to_cloud = v;
    }
    if let Some(v) = overrides.bind_host.clone() {
        lan.bind_host = v;
    }
    if let Some(v) = overrides.broadcast_addr.clone() {
        lan.broadcast_addr = v;
    }
}

fn string_field(payload: &Value, snake: &str, camel: &str) -> Option<String> {
    payload
        .get(snake)
        .or_else(|| payload.get(camel))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn int_field(payload: &Value, snake: &str, camel: &str) -> Option<i64> {
    payload.get(snake).or_else(|| payload.get(camel)).and_then(Value::as_i64)
}

fn parse_sync_config_override(value: Option<&Value>) -> SyncConfigOverride {
    let Some(value) = value else {
        return SyncConfigOverride::default();
    };
    serde_json::from_value(value.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockProbe as ClockProbeTrait;
    use crate::events::NoopEventEmitter;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    struct FakeClockProbe {
        offset_ms: f64,
        critical: bool,
    }

    impl ClockProbeTrait for FakeClockProbe {
        fn query_time_sync(&self) -> Result<String, String> {
            if self.critical {
                return Err("unavailable".into());
            }
            Ok(format!("Leap status     : Normal\nLast offset     : {:.6} seconds\n", self.offset_ms / 1000.0))
        }
        fn query_throttle_word(&self) -> Result<u32, String> {
            Ok(0)
        }
    }

    #[derive(Default)]
    struct FakeBackend {
        started: AtomicU32,
        alive: AtomicBool,
        time_ms: AsyncMutex<f64>,
        duration_ms: AsyncMutex<Option<f64>>,
        seeks: AsyncMutex<Vec<i64>>,
        speeds: AsyncMutex<Vec<f64>>,
        pauses: AsyncMutex<Vec<bool>>,
    }

    #[async_trait]
    impl PlaybackBackend for FakeBackend {
        async fn start_sync_playback(&self, ctx: &SessionContext) -> bool {
            self.started.fetch_add(1, Ordering::SeqCst);
            self.alive.store(true, Ordering::SeqCst);
            *self.duration_ms.lock().await = Some(ctx.duration_ms as f64);
            true
        }
        async fn stop_playback(&self) {
            self.alive.store(false, Ordering::SeqCst);
        }
        async fn seek_to_phase_ms(&self, phase_ms: i64) -> bool {
            self.seeks.lock().await.push(phase_ms);
            true
        }
        async fn set_pause(&self, paused: bool) -> bool {
            self.pauses.lock().await.push(paused);
            true
        }
        async fn set_playback_speed(&self, speed: f64) -> bool {
            self.speeds.lock().await.push(speed);
            true
        }
        async fn is_playback_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
        async fn get_playback_time_ms(&self) -> Option<f64> {
            Some(*self.time_ms.lock().await)
        }
        async fn get_playback_duration_ms(&self) -> Option<f64> {
            *self.duration_ms.lock().await
        }
    }

    #[derive(Default)]
    struct FakeCloud {
        acked: AsyncMutex<Vec<(String, bool)>>,
    }

    #[async_trait]
    impl CloudClient for FakeCloud {
        async fn poll_device_commands(&self, _limit: usize) -> Vec<Command> {
            Vec::new()
        }
        async fn ack_device_command(
            &self,
            id: &str,
            status: AckStatus,
            _error: Option<String>,
            _sync_runtime: Option<SyncRuntime>,
        ) -> bool {
            self.acked.lock().await.push((id.to_string(), status == AckStatus::Acked));
            true
        }
        async fn report_playback_state(
            &self,
            _playing_playlist_id: Option<String>,
            _current_content_name: Option<String>,
            _preview_path: Option<String>,
            _sync_runtime: Option<SyncRuntime>,
        ) -> bool {
            true
        }
        async fn get_clock_sync_health(&self, _max_offset_ms: f64) -> ClockHealth {
            ClockHealth::probe_failure()
        }
        async fn get_current_device_id(&self) -> Option<String> {
            Some("device-1".into())
        }
        fn media_dir(&self) -> PathBuf {
            PathBuf::from("/tmp")
        }
        async fn ensure_sync_media_available(&self, _media_id: Option<&str>, _local_path: &str) -> Option<PathBuf> {
            None
        }
    }

    fn make_supervisor(probe_critical: bool) -> Arc<VideowallSupervisor<FakeCloud, FakeBackend>> {
        Arc::new(VideowallSupervisor::new(
            Arc::new(FakeCloud::default()),
            Arc::new(FakeBackend::default()),
            Arc::new(FakeClockProbe { offset_ms: 3.5, critical: probe_critical }),
            Arc::new(NoopEventEmitter),
            VideowallConfig::default(),
        ))
    }

    fn prepare_payload(session_id: &str, start_at_ms: i64, duration_ms: i64, local_path: &str) -> Value {
        serde_json::json!({
            "session_id": session_id,
            "start_at_ms": start_at_ms,
            "duration_ms": duration_ms,
            "media": { "local_path": local_path }
        })
    }

    #[tokio::test]
    async fn healthy_prepare_reaches_ready() {
        let sup = make_supervisor(false);
        let path = std::env::temp_dir().join("videowall_test_a.mp4");
        std::fs::write(&path, b"x").unwrap();
        let payload = prepare_payload("s1", now_millis() + 500, 10_000, path.to_str().unwrap());
        let result = sup.handle_prepare(&payload, None).await;
        assert!(result.is_ok());
        assert_eq!(sup.state(), SessionState::Ready);
        assert!(sup.is_active());
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn clock_critical_prepare_ends_errored() {
        let sup = make_supervisor(true);
        let path = std::env::temp_dir().join("videowall_test_b.mp4");
        std::fs::write(&path, b"x").unwrap();
        let payload = prepare_payload("s1", now_millis() + 500, 10_000, path.to_str().unwrap());
        let result = sup.handle_prepare(&payload, None).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("Clock unsynchronized"));
        assert_eq!(sup.state(), SessionState::Errored);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn sync_stop_deactivates_session() {
        let sup = make_supervisor(false);
        let path = std::env::temp_dir().join("videowall_test_c.mp4");
        std::fs::write(&path, b"x").unwrap();
        let prepare = prepare_payload("s1", now_millis() + 500, 10_000, path.to_str().unwrap());
        sup.handle_prepare(&prepare, None).await.unwrap();
        assert!(sup.is_active());

        let stop_payload = serde_json::json!({ "session_id": "s1" });
        let result = sup.handle_stop(&stop_payload, None).await;
        assert!(result.is_ok());
        assert!(!sup.is_active());
        assert_eq!(sup.lan.role(), LanRole::Idle);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn ready_phase_alignment_seeks_and_advances() {
        let sup = make_supervisor(false);
        let path = std::env::temp_dir().join("videowall_test_d.mp4");
        std::fs::write(&path, b"x").unwrap();
        let start_at_ms = now_millis() - 900;
        let prepare = prepare_payload("s1", start_at_ms, 10_000, path.to_str().unwrap());
        sup.handle_prepare(&prepare, None).await.unwrap();
        assert_eq!(sup.state(), SessionState::Ready);

        sup.advance_runtime_state(now_millis()).await;
        assert_eq!(sup.state(), SessionState::WarmingUp);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn drift_window_drops_samples_older_than_20s() {
        let sup = make_supervisor(false);
        {
            let mut inner = sup.inner.lock();
            inner.drift_window.push_back((10_000, 1000.0));
            inner.drift_window.push_back((35_000, 100.0));
            while let Some(&(ts, _)) = inner.drift_window.front() {
                if 35_000 - ts > DRIFT_WINDOW_MS {
                    inner.drift_window.pop_front();
                } else {
                    break;
                }
            }
        }
        let inner = sup.inner.lock();
        let avg = inner.drift_window.iter().map(|(_, d)| *d).sum::<f64>() / inner.drift_window.len() as f64;
        assert_eq!(avg, 100.0);
    }
}
