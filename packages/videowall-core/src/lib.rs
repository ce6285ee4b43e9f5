//! Videowall Core - shared library for the on-device videowall playback
//! synchronization engine.
//!
//! This crate provides the core functionality used by the player binary to
//! keep one device's looping playback in phase with its peers: a session
//! state machine, drift-correction math, a clock-health probe, a LAN beacon
//! service for phase-sharing without a network round trip, and the
//! supervisor loop that ties them together against the cloud coordinator
//! and local playback backend.
//!
//! # Architecture
//!
//! - [`drift`]: pure target-phase/drift/correction math
//! - [`state`]: session lifecycle state machine and per-session context
//! - [`clock`]: OS clock-health probing and scoring
//! - [`lan`]: LAN beacon master/follower service
//! - [`cloud`]: capability trait for the cloud coordinator transport
//! - [`backend`]: capability trait for the local playback renderer
//! - [`supervisor`]: the tick-driven orchestration loop
//! - [`config`]: process-wide configuration from the environment
//! - [`events`]: structured sync-event emission
//! - [`error`]: centralized error types
//! - [`runtime`]: task spawning abstraction for async runtime independence

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod clock;
pub mod cloud;
pub mod config;
pub mod drift;
pub mod error;
pub mod events;
pub mod lan;
pub mod runtime;
pub mod state;
pub mod supervisor;
pub mod utils;

pub use backend::{PlaybackBackend, MAX_PLAYBACK_SPEED, MIN_PLAYBACK_SPEED};
pub use clock::{ClockHealth, ClockProbe, TimeSyncStatus};
pub use cloud::{AckStatus, CloudClient, Command, CommandKind, SyncRuntime};
pub use config::{LanConfig, VideowallConfig};
pub use drift::{CorrectionDecision, DriftTuning};
pub use error::{ErrorCode, VideowallError, VideowallResult};
pub use events::{EventEmitter, NoopEventEmitter, SyncEvent, TracingEventEmitter};
pub use lan::{LanBeacon, LanBeaconService, LanRole, PhaseSource};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use state::{LanConfigOverride, SessionContext, SessionState, StateMachine, SyncConfigOverride};
pub use supervisor::{LanMode, VideowallSupervisor};
pub use utils::now_millis;
