//! Cloud client: the capability interface to the coordinator's command
//! queue, ack channel, and status-report transport.
//!
//! This is an external collaborator by design (device pairing, token
//! persistence, and the HTTP transport live outside this crate) — modeled
//! as a well-defined `#[async_trait]` capability rather than a duck-typed
//! object, per the redesign guidance this spec carries forward.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::clock::ClockHealth;
use crate::state::SessionState;

/// A command pulled from the coordinator's queue.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Command {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: CommandKind,
    #[serde(default, alias = "sessionId")]
    pub session_id: Option<String>,
    pub payload: serde_json::Value,
}

/// The two command types the supervisor understands. Anything else fails
/// JSON deserialization and is surfaced as an unknown-type ack failure by
/// the caller rather than by this enum (keeps "unknown type" a supervisor
/// concern, not a wire-format concern).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum CommandKind {
    #[serde(rename = "SYNC_PREPARE")]
    SyncPrepare,
    #[serde(rename = "SYNC_STOP")]
    SyncStop,
}

/// Terminal disposition of a processed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AckStatus {
    Acked,
    Failed,
}

/// Runtime telemetry snapshot attached to every ack and status report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncRuntime {
    pub session_id: Option<String>,
    pub status: SessionState,
    pub drift_ms: Option<f64>,
    pub resync_count: u32,
    pub avg_drift_ms: f64,
    pub max_drift_ms: f64,
    pub resync_rate: f64,
    pub clock_offset_ms: Option<f64>,
    pub throttled: bool,
    pub health_score: f64,
    pub lan_mode: String,
    pub lan_beacon_age_ms: Option<i64>,
}

/// Required operations the supervisor consumes from the coordinator's
/// transport layer. Implementations own pairing, auth, and network I/O;
/// every method here either returns a best-effort result or fails soft
/// (transport errors are transient and never surface as state changes).
#[async_trait]
pub trait CloudClient: Send + Sync {
    /// Non-blocking fetch of queued commands. Returns an empty list on any
    /// transport error.
    async fn poll_device_commands(&self, limit: usize) -> Vec<Command>;

    /// Acknowledges a processed command. Returns `false` on transport
    /// failure (treated as transient by the caller).
    async fn ack_device_command(
        &self,
        id: &str,
        status: AckStatus,
        error: Option<String>,
        sync_runtime: Option<SyncRuntime>,
    ) -> bool;

    /// Reports current playback state alongside telemetry.
    async fn report_playback_state(
        &self,
        playing_playlist_id: Option<String>,
        current_content_name: Option<String>,
        preview_path: Option<String>,
        sync_runtime: Option<SyncRuntime>,
    ) -> bool;

    /// Queries (or recomputes) clock-sync health against `max_offset_ms`.
    async fn get_clock_sync_health(&self, max_offset_ms: f64) -> ClockHealth;

    /// Returns this device's identifier, if resolvable.
    async fn get_current_device_id(&self) -> Option<String>;

    /// Root directory for cached media.
    fn media_dir(&self) -> std::path::PathBuf;

    /// Ensures the given media is present locally, downloading it if
    /// necessary. Returns the resolved local path on success.
    async fn ensure_sync_media_available(
        &self,
        media_id: Option<&str>,
        local_path: &str,
    ) -> Option<std::path::PathBuf>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_kind_deserializes_from_wire_tags() {
        let prepare: CommandKind = serde_json::from_str("\"SYNC_PREPARE\"").unwrap();
        let stop: CommandKind = serde_json::from_str("\"SYNC_STOP\"").unwrap();
        assert_eq!(prepare, CommandKind::SyncPrepare);
        assert_eq!(stop, CommandKind::SyncStop);
    }

    #[test]
    fn command_accepts_camel_case_session_id_alias() {
        let raw = serde_json::json!({
            "id": "cmd1",
            "type": "SYNC_STOP",
            "sessionId": "s1",
            "payload": {}
        });
        let cmd: Command = serde_json::from_value(raw).unwrap();
        assert_eq!(cmd.session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn unknown_command_type_fails_deserialization() {
        let raw = serde_json::json!({
            "id": "cmd1",
            "type": "SOMETHING_ELSE",
            "payload": {}
        });
        assert!(serde_json::from_value::<Command>(raw).is_err());
    }
}
