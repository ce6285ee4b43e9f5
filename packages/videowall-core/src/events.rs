//! Sync-event log taxonomy: the fixed set of structured events the
//! supervisor emits as it drives a session through its lifecycle.
//!
//! Unlike the rest of the crate (which logs prose via `log::`), this module
//! emits structured, queryable records via `tracing`, matching the one place
//! the teacher repo reserves `tracing` for.

use serde::Serialize;

/// The fixed, closed set of sync-event tags. Unknown tags have no
/// representation — they simply cannot be constructed.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncEvent {
    /// Session reached `READY` after a successful prepare.
    Ready,
    /// Playback began warming up from `READY`.
    Started,
    /// A closed-loop speed correction was applied.
    SoftCorrection { target_speed: f64 },
    /// A frame-aligned seek was applied.
    HardResync { reason: Option<&'static str> },
    /// Playback rejoined the session after a crash-recovery restart.
    Rejoin,
    /// The playback backend died unexpectedly.
    MpvCrash { attempt: u32 },
    /// The device is thermally throttled.
    ThermalThrottle,
}

/// Trait for emitting sync events, decoupling the supervisor from the
/// concrete logging transport.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, session_id: &str, event: SyncEvent);
}

/// Emits every event via `tracing::info!` with structured fields.
pub struct TracingEventEmitter;

impl EventEmitter for TracingEventEmitter {
    fn emit(&self, session_id: &str, event: SyncEvent) {
        tracing::info!(session_id, ?event, "sync_event");
    }
}

/// Discards every event. Used in tests that only care about state/backend
/// call counts, not the log stream.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit(&self, _session_id: &str, _event: SyncEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingEmitter {
        events: Mutex<Vec<(String, String)>>,
    }

    impl EventEmitter for RecordingEmitter {
        fn emit(&self, session_id: &str, event: SyncEvent) {
            let tag = serde_json::to_value(&event)
                .ok()
                .and_then(|v| v.get("event").and_then(|e| e.as_str()).map(str::to_string))
                .unwrap_or_default();
            self.events.lock().unwrap().push((session_id.into(), tag));
        }
    }

    #[test]
    fn emits_tagged_events() {
        let emitter = RecordingEmitter::default();
        emitter.emit("s1", SyncEvent::Ready);
        emitter.emit("s1", SyncEvent::HardResync { reason: Some("rejoin") });
        let events = emitter.events.lock().unwrap();
        assert_eq!(events[0], ("s1".to_string(), "READY".to_string()));
        assert_eq!(events[1], ("s1".to_string(), "HARD_RESYNC".to_string()));
    }

    #[test]
    fn noop_emitter_discards_silently() {
        NoopEventEmitter.emit("s1", SyncEvent::Started);
    }
}
