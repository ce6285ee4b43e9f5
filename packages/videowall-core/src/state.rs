//! Session state machine: typed states, the allowed-transition table, and
//! session context storage under a single lock.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Assigned,
    Preloading,
    Ready,
    WarmingUp,
    Playing,
    Disconnected,
    Errored,
}

impl SessionState {
    /// Returns whether `to` is a legal transition target from `self`.
    ///
    /// Self-loops are always allowed (idempotent no-ops).
    #[must_use]
    pub fn allows(self, to: SessionState) -> bool {
        if self == to {
            return true;
        }
        use SessionState::*;
        matches!(
            (self, to),
            (Assigned, Preloading)
                | (Assigned, Disconnected)
                | (Assigned, Errored)
                | (Preloading, Ready)
                | (Preloading, Disconnected)
                | (Preloading, Errored)
                | (Ready, WarmingUp)
                | (Ready, Disconnected)
                | (Ready, Errored)
                | (WarmingUp, Playing)
                | (WarmingUp, Disconnected)
                | (WarmingUp, Errored)
                | (Playing, WarmingUp)
                | (Playing, Disconnected)
                | (Playing, Errored)
                | (Disconnected, WarmingUp)
                | (Disconnected, Errored)
                | (Errored, Disconnected)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Assigned => "ASSIGNED",
            Self::Preloading => "PRELOADING",
            Self::Ready => "READY",
            Self::WarmingUp => "WARMING_UP",
            Self::Playing => "PLAYING",
            Self::Disconnected => "DISCONNECTED",
            Self::Errored => "ERRORED",
        };
        f.write_str(s)
    }
}

/// Per-session LAN overrides accepted from `SYNC_PREPARE.payload.sync_config.lan`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct LanConfigOverride {
    pub enabled: Option<bool>,
    pub beacon_hz: Option<f64>,
    pub beacon_port: Option<u16>,
    pub timeout_ms: Option<u64>,
    pub fallback_to_cloud: Option<bool>,
    pub bind_host: Option<String>,
    pub broadcast_addr: Option<String>,
}

/// Per-session overrides accepted from `SYNC_PREPARE.payload.sync_config`.
///
/// Only these two fields are session-overridable; everything else in
/// `VideowallConfig` is process-wide.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct SyncConfigOverride {
    pub hard_resync_threshold_ms: Option<i64>,
    #[serde(default)]
    pub lan: LanConfigOverride,
}

/// State present when and only when a session is active.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionContext {
    pub session_id: String,
    pub start_at_ms: i64,
    pub duration_ms: i64,
    pub local_path: String,
    pub master_device_id: Option<String>,
    pub device_id: Option<String>,
    pub sync_config: SyncConfigOverride,
}

struct Inner {
    state: SessionState,
    context: Option<SessionContext>,
}

/// Owns `(state, context)` under a single lock. All reads return
/// independent copies — no shared interior reference ever escapes.
pub struct StateMachine {
    inner: RwLock<Inner>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                state: SessionState::Disconnected,
                context: None,
            }),
        }
    }

    /// Sets state to `ASSIGNED`, replacing any existing context.
    pub fn activate(&self, ctx: SessionContext) {
        let mut inner = self.inner.write();
        inner.state = SessionState::Assigned;
        inner.context = Some(ctx);
    }

    /// Forces state to `DISCONNECTED` and clears the context.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.state = SessionState::Disconnected;
        inner.context = None;
    }

    /// Attempts a transition to `to`. Returns `false` and makes no change
    /// if the edge is disallowed and `force` is `false`.
    pub fn transition(&self, to: SessionState, force: bool) -> bool {
        let mut inner = self.inner.write();
        if force || inner.state.allows(to) {
            inner.state = to;
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.read().context.is_some()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.read().state
    }

    #[must_use]
    pub fn context(&self) -> Option<SessionContext> {
        self.inner.read().context.clone()
    }

    /// Mutates the stored context in place (used for prepare-refresh of the
    /// same session: duration refinement, LAN override updates).
    pub fn update_context<F: FnOnce(&mut SessionContext)>(&self, f: F) {
        let mut inner = self.inner.write();
        if let Some(ctx) = inner.context.as_mut() {
            f(ctx);
        }
    }

    /// Returns `(state, context)` as an independent snapshot.
    #[must_use]
    pub fn snapshot(&self) -> (SessionState, Option<SessionContext>) {
        let inner = self.inner.read();
        (inner.state, inner.context.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(session_id: &str) -> SessionContext {
        SessionContext {
            session_id: session_id.to_string(),
            start_at_ms: 0,
            duration_ms: 10_000,
            local_path: "/tmp/a.mp4".into(),
            master_device_id: None,
            device_id: None,
            sync_config: SyncConfigOverride::default(),
        }
    }

    #[test]
    fn allowed_transitions_follow_table() {
        use SessionState::*;
        assert!(Assigned.allows(Preloading));
        assert!(Preloading.allows(Ready));
        assert!(Ready.allows(WarmingUp));
        assert!(WarmingUp.allows(Playing));
        assert!(Playing.allows(WarmingUp));
        assert!(Disconnected.allows(WarmingUp));
        assert!(Errored.allows(Disconnected));
        assert!(!Assigned.allows(Ready));
        assert!(!Ready.allows(Playing));
        assert!(!Errored.allows(Playing));
        assert!(!Playing.allows(Assigned));
    }

    #[test]
    fn self_loops_are_always_allowed() {
        for s in [
            SessionState::Assigned,
            SessionState::Preloading,
            SessionState::Ready,
            SessionState::WarmingUp,
            SessionState::Playing,
            SessionState::Disconnected,
            SessionState::Errored,
        ] {
            assert!(s.allows(s));
        }
    }

    #[test]
    fn transition_rejects_disallowed_edge() {
        let sm = StateMachine::new();
        sm.activate(ctx("s1"));
        assert_eq!(sm.state(), SessionState::Assigned);
        assert!(!sm.transition(SessionState::Ready, false));
        assert_eq!(sm.state(), SessionState::Assigned);
    }

    #[test]
    fn transition_force_bypasses_table() {
        let sm = StateMachine::new();
        sm.activate(ctx("s1"));
        assert!(sm.transition(SessionState::Errored, true));
        assert_eq!(sm.state(), SessionState::Errored);
    }

    #[test]
    fn reset_clears_context_and_is_active() {
        let sm = StateMachine::new();
        sm.activate(ctx("s1"));
        assert!(sm.is_active());
        sm.reset();
        assert!(!sm.is_active());
        assert_eq!(sm.state(), SessionState::Disconnected);
    }

    #[test]
    fn is_active_iff_context_present() {
        let sm = StateMachine::new();
        assert!(!sm.is_active());
        sm.activate(ctx("s1"));
        assert!(sm.is_active());
    }

    #[test]
    fn snapshot_is_independent_copy() {
        let sm = StateMachine::new();
        sm.activate(ctx("s1"));
        let (_, snap_ctx) = sm.snapshot();
        sm.update_context(|c| c.duration_ms = 99_999);
        assert_eq!(snap_ctx.unwrap().duration_ms, 10_000);
    }
}
