//! LAN beacon service: UDP broadcast/receive of phase beacons, master/
//! follower role election.
//!
//! Grounded directly in the original `LanSyncService`: same socket option
//! choices (`SO_BROADCAST` for the master, `SO_REUSEADDR` + 500ms receive
//! timeout for the follower), same wire format, same extrapolation math.
//! The Python thread-per-role + `threading.Event` stop signal becomes a
//! `tokio::task` per role plus an explicit `CancellationToken`.

use std::net::{SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use tokio_util::sync::CancellationToken;

use crate::utils::now_millis;

/// Wire-format beacon payload, compact JSON (no whitespace), UDP datagram
/// guaranteed under 4096 bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanBeacon {
    pub v: u8,
    pub session_id: String,
    pub master_device_id: String,
    pub seq: u64,
    pub sent_at_ms: i64,
    pub phase_ms: f64,
    pub duration_ms: i64,
    pub playback_speed: f64,
}

/// Current role of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanRole {
    Idle,
    Master,
    Follower,
}

impl std::fmt::Display for LanRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Master => "master",
            Self::Follower => "follower",
        };
        f.write_str(s)
    }
}

struct FollowerState {
    session_id: String,
    master_device_id: String,
    duration_ms: i64,
    last_beacon: Option<LanBeacon>,
    last_receive_at_ms: Option<i64>,
}

struct Shared {
    role: LanRole,
    timeout_ms: u64,
    follower: Option<FollowerState>,
}

/// Source of the live phase and playback speed the master beacons out.
/// Implemented by the supervisor; kept as a trait so the service has no
/// dependency on the backend or state-machine types.
#[async_trait]
pub trait PhaseSource: Send + Sync {
    async fn phase_ms(&self) -> Option<f64>;
    async fn playback_speed(&self) -> f64;
}

/// A single LAN beacon service instance: idle, master, or follower at any
/// given time. Switching roles tears down the previous socket and task.
pub struct LanBeaconService {
    shared: Arc<Mutex<Shared>>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl Default for LanBeaconService {
    fn default() -> Self {
        Self::new()
    }
}

impl LanBeaconService {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                role: LanRole::Idle,
                timeout_ms: 1500,
                follower: None,
            })),
            cancel: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn role(&self) -> LanRole {
        self.shared.lock().role
    }

    /// Tears down any active sender/receiver task and socket, returning to
    /// idle. Cancellation is cooperative — the receive loop polls the token
    /// at most every 500ms (its socket read timeout).
    pub fn stop(&self) {
        if let Some(token) = self.cancel.lock().take() {
            token.cancel();
        }
        let mut shared = self.shared.lock();
        shared.role = LanRole::Idle;
        shared.follower = None;
    }

    /// Starts broadcasting this device's phase as master. Returns `false`
    /// if the broadcast socket could not be opened.
    pub fn start_master(
        &self,
        session_id: String,
        master_device_id: String,
        duration_ms: i64,
        beacon_hz: f64,
        broadcast_addr: String,
        beacon_port: u16,
        source: Arc<dyn PhaseSource>,
    ) -> bool {
        self.stop();

        let socket = match make_broadcast_socket() {
            Ok(s) => s,
            Err(err) => {
                log::warn!("failed to initialize LAN master socket: {err}");
                return false;
            }
        };

        let token = CancellationToken::new();
        *self.cancel.lock() = Some(token.clone());
        {
            let mut shared = self.shared.lock();
            shared.role = LanRole::Master;
            shared.follower = None;
        }

        let interval = Duration::from_secs_f64(1.0 / beacon_hz.max(1.0));
        let duration_ms = duration_ms.max(1);
        let target: SocketAddr = match format!("{broadcast_addr}:{beacon_port}").parse() {
            Ok(addr) => addr,
            Err(err) => {
                log::warn!("invalid LAN broadcast address: {err}");
                return false;
            }
        };

        tokio::spawn(async move {
            let mut seq: u64 = 0;
            loop {
                if token.is_cancelled() {
                    break;
                }
                if let Some(phase) = source.phase_ms().await {
                    let payload = LanBeacon {
                        v: 1,
                        session_id: session_id.clone(),
                        master_device_id: master_device_id.clone(),
                        seq,
                        sent_at_ms: now_millis(),
                        phase_ms: phase.rem_euclid(duration_ms as f64),
                        duration_ms,
                        playback_speed: source.playback_speed().await,
                    };
                    seq += 1;
                    if let Ok(raw) = serde_json::to_vec(&payload) {
                        if let Err(err) = socket.send_to(&raw, target) {
                            log::debug!("LAN beacon send dropped: {err}");
                        }
                    }
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {},
                    _ = token.cancelled() => break,
                }
            }
        });

        true
    }

    /// Starts listening for beacons as follower. Returns `false` if the
    /// receive socket could not be bound.
    pub fn start_follower(
        &self,
        session_id: String,
        master_device_id: String,
        duration_ms: i64,
        bind_host: String,
        beacon_port: u16,
        timeout_ms: u64,
    ) -> bool {
        self.stop();

        let socket = match make_follower_socket(&bind_host, beacon_port) {
            Ok(s) => s,
            Err(err) => {
                log::warn!("failed to initialize LAN follower socket: {err}");
                return false;
            }
        };

        let token = CancellationToken::new();
        *self.cancel.lock() = Some(token.clone());
        {
            let mut shared = self.shared.lock();
            shared.role = LanRole::Follower;
            shared.timeout_ms = timeout_ms;
            shared.follower = Some(FollowerState {
                session_id: session_id.clone(),
                master_device_id: master_device_id.clone(),
                duration_ms: duration_ms.max(1),
                last_beacon: None,
                last_receive_at_ms: None,
            });
        }

        let shared = self.shared.clone();
        tokio::task::spawn_blocking(move || follower_recv_loop(socket, shared, token, session_id, master_device_id));

        true
    }

    /// Returns the extrapolated follower target phase, or `None` if this
    /// device isn't a follower, has never received a beacon, or the beacon
    /// is older than the configured timeout.
    #[must_use]
    pub fn follower_target_phase_ms(&self, now_ms: i64) -> Option<f64> {
        let shared = self.shared.lock();
        if shared.role != LanRole::Follower {
            return None;
        }
        let follower = shared.follower.as_ref()?;
        let beacon = follower.last_beacon.as_ref()?;
        let last_receive = follower.last_receive_at_ms?;
        if now_ms - last_receive > shared.timeout_ms as i64 {
            return None;
        }
        let duration_ms = if beacon.duration_ms > 0 {
            beacon.duration_ms
        } else {
            follower.duration_ms
        };
        if duration_ms <= 0 {
            return None;
        }
        let elapsed_ms = (now_ms - beacon.sent_at_ms).max(0) as f64;
        Some((beacon.phase_ms + elapsed_ms * beacon.playback_speed).rem_euclid(duration_ms as f64))
    }

    /// Returns how stale the last-received beacon is, or `None` if not
    /// currently a follower or nothing has been received yet.
    #[must_use]
    pub fn follower_beacon_age_ms(&self, now_ms: i64) -> Option<i64> {
        let shared = self.shared.lock();
        if shared.role != LanRole::Follower {
            return None;
        }
        let last_receive = shared.follower.as_ref()?.last_receive_at_ms?;
        Some((now_ms - last_receive).max(0))
    }
}

fn make_broadcast_socket() -> std::io::Result<StdUdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    let std_socket: StdUdpSocket = socket.into();
    Ok(std_socket)
}

fn make_follower_socket(bind_host: &str, beacon_port: u16) -> std::io::Result<StdUdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    let addr: SocketAddr = format!("{bind_host}:{beacon_port}")
        .parse()
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid bind address"))?;
    socket.bind(&addr.into())?;
    socket.set_read_timeout(Some(Duration::from_millis(500)))?;
    Ok(socket.into())
}

fn follower_recv_loop(
    socket: StdUdpSocket,
    shared: Arc<Mutex<Shared>>,
    token: CancellationToken,
    session_id: String,
    master_device_id: String,
) {
    let mut buf = [0u8; 4096];
    while !token.is_cancelled() {
        match socket.recv_from(&mut buf) {
            Ok((len, _addr)) => {
                let Ok(beacon) = serde_json::from_slice::<LanBeacon>(&buf[..len]) else {
                    continue;
                };
                if beacon.session_id != session_id || beacon.master_device_id != master_device_id {
                    continue;
                }
                let received_at_ms = now_millis();
                let mut shared = shared.lock();
                if let Some(follower) = shared.follower.as_mut() {
                    follower.last_beacon = Some(beacon);
                    follower.last_receive_at_ms = Some(received_at_ms);
                }
            }
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(_) => {
                if token.is_cancelled() {
                    break;
                }
                continue;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_service_starts_idle() {
        let svc = LanBeaconService::new();
        assert_eq!(svc.role(), LanRole::Idle);
        assert_eq!(svc.follower_target_phase_ms(0), None);
        assert_eq!(svc.follower_beacon_age_ms(0), None);
    }

    #[test]
    fn stop_on_idle_service_is_a_noop() {
        let svc = LanBeaconService::new();
        svc.stop();
        assert_eq!(svc.role(), LanRole::Idle);
    }

    #[test]
    fn follower_target_phase_extrapolates() {
        let svc = LanBeaconService::new();
        {
            let mut shared = svc.shared.lock();
            shared.role = LanRole::Follower;
            shared.timeout_ms = 1500;
            shared.follower = Some(FollowerState {
                session_id: "s1".into(),
                master_device_id: "m1".into(),
                duration_ms: 10_000,
                last_beacon: Some(LanBeacon {
                    v: 1,
                    session_id: "s1".into(),
                    master_device_id: "m1".into(),
                    seq: 0,
                    sent_at_ms: 1_000,
                    phase_ms: 500.0,
                    duration_ms: 10_000,
                    playback_speed: 1.0,
                }),
                last_receive_at_ms: Some(1_000),
            });
        }
        let target = svc.follower_target_phase_ms(1_100).unwrap();
        assert!((target - 600.0).abs() < 1e-9);
    }

    #[test]
    fn follower_target_phase_none_when_stale() {
        let svc = LanBeaconService::new();
        {
            let mut shared = svc.shared.lock();
            shared.role = LanRole::Follower;
            shared.timeout_ms = 500;
            shared.follower = Some(FollowerState {
                session_id: "s1".into(),
                master_device_id: "m1".into(),
                duration_ms: 10_000,
                last_beacon: Some(LanBeacon {
                    v: 1,
                    session_id: "s1".into(),
                    master_device_id: "m1".into(),
                    seq: 0,
                    sent_at_ms: 0,
                    phase_ms: 0.0,
                    duration_ms: 10_000,
                    playback_speed: 1.0,
                }),
                last_receive_at_ms: Some(0),
            });
        }
        assert_eq!(svc.follower_target_phase_ms(10_000), None);
    }

    #[test]
    fn follower_target_phase_none_when_not_follower() {
        let svc = LanBeaconService::new();
        assert_eq!(svc.follower_target_phase_ms(1_000), None);
    }
}
