//! Centralized error types for the videowall sync engine.
//!
//! No HTTP surface here — the ack `error` string and `sync_runtime.status`
//! are the user-visible failure channel — but the machine-readable code
//! convention carries over from the teacher's API-facing error type.

use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code, stable across releases.
    fn code(&self) -> &'static str;
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum VideowallError {
    /// A requested state transition is not in the allowed-transition table.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// A command referenced a session that isn't the one currently assigned.
    #[error("session mismatch: expected {expected}, got {actual}")]
    SessionMismatch { expected: String, actual: String },

    /// No session is currently assigned.
    #[error("no session assigned")]
    NoSessionAssigned,

    /// The playback backend failed to prepare, start, seek, or set speed.
    #[error("playback backend error: {0}")]
    Backend(String),

    /// The cloud client failed to poll or acknowledge a command.
    #[error("cloud client error: {0}")]
    Cloud(String),

    /// The clock-health probe failed to parse chronograph output.
    #[error("clock probe error: {0}")]
    ClockProbe(String),

    /// A LAN beacon socket operation failed.
    #[error("LAN beacon error: {0}")]
    Lan(#[from] std::io::Error),

    /// Beacon payload failed to (de)serialize.
    #[error("beacon payload error: {0}")]
    BeaconPayload(#[from] serde_json::Error),

    /// A required environment variable was missing or malformed.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ErrorCode for VideowallError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::SessionMismatch { .. } => "session_mismatch",
            Self::NoSessionAssigned => "no_session_assigned",
            Self::Backend(_) => "backend_error",
            Self::Cloud(_) => "cloud_error",
            Self::ClockProbe(_) => "clock_probe_error",
            Self::Lan(_) => "lan_error",
            Self::BeaconPayload(_) => "beacon_payload_error",
            Self::Configuration(_) => "configuration_error",
        }
    }
}

/// Convenient Result alias for crate-wide operations.
pub type VideowallResult<T> = Result<T, VideowallError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_error_code() {
        let err = VideowallError::InvalidTransition {
            from: "Playing".into(),
            to: "Assigned".into(),
        };
        assert_eq!(err.code(), "invalid_transition");
    }

    #[test]
    fn no_session_assigned_error_code() {
        assert_eq!(VideowallError::NoSessionAssigned.code(), "no_session_assigned");
    }
}
