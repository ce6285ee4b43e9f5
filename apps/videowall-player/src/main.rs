//! Videowall Player - headless on-device playback synchronization daemon.
//!
//! Polls the cloud coordinator for sync commands, drives a local playback
//! renderer in lockstep with the rest of the videowall via the drift
//! controller and optional LAN beacon, and reports telemetry back.

mod config;
mod demo;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use videowall_core::{
    NoopEventEmitter, TracingEventEmitter, VideowallConfig, VideowallSupervisor,
};

use crate::config::PlayerConfig;
use crate::demo::demo_collaborators;

/// Videowall Player - headless on-device videowall playback sync daemon.
#[derive(Parser, Debug)]
#[command(name = "videowall-player")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "VIDEOWALL_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// This device's identifier, as known to the cloud coordinator
    /// (overrides config file).
    #[arg(long, env = "VIDEOWALL_DEVICE_ID")]
    device_id: Option<String>,

    /// Root directory for cached/local media files (overrides config file).
    #[arg(long, env = "VIDEOWALL_MEDIA_DIR")]
    media_dir: Option<PathBuf>,

    /// Emit structured sync events via tracing instead of discarding them.
    #[arg(long, env = "VIDEOWALL_TRACE_EVENTS")]
    trace_events: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Videowall Player v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        PlayerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(device_id) = args.device_id {
        config.device_id = Some(device_id);
    }
    if let Some(media_dir) = args.media_dir {
        config.media_dir = media_dir;
    }

    log::info!(
        "Configuration: device_id={:?}, media_dir={}, tick_hz={}",
        config.device_id,
        config.media_dir.display(),
        config.tick_hz
    );

    let sync_config = VideowallConfig::from_env();
    let (cloud, backend) = demo_collaborators(config.device_id.clone(), config.media_dir.clone());
    let clock_probe = Arc::new(SystemClockProbe);
    let events: Arc<dyn videowall_core::EventEmitter> = if args.trace_events {
        Arc::new(TracingEventEmitter)
    } else {
        Arc::new(NoopEventEmitter)
    };

    let supervisor = Arc::new(VideowallSupervisor::new(
        cloud,
        backend,
        clock_probe,
        events,
        sync_config,
    ));

    let tick_hz = config.tick_hz.max(4.0);
    let tick_interval = tokio::time::Duration::from_secs_f64(1.0 / tick_hz);
    let mut ticker = tokio::time::interval(tick_interval);

    log::info!("Supervisor loop starting at {tick_hz} Hz");

    let supervisor_for_loop = supervisor.clone();
    let loop_handle = tokio::spawn(async move {
        loop {
            ticker.tick().await;
            supervisor_for_loop.tick().await;
        }
    });

    shutdown_signal().await;
    log::info!("Shutdown signal received, cleaning up...");

    loop_handle.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Probes the OS time-sync daemon (`chronyc tracking`) and the Raspberry Pi
/// `vcgencmd get_throttled` thermal word. Falls back to a probe failure on
/// any platform where these utilities aren't present.
struct SystemClockProbe;

impl videowall_core::ClockProbe for SystemClockProbe {
    fn query_time_sync(&self) -> Result<String, String> {
        std::process::Command::new("chronyc")
            .arg("tracking")
            .output()
            .map_err(|e| e.to_string())
            .and_then(|out| {
                String::from_utf8(out.stdout).map_err(|e| e.to_string())
            })
    }

    fn query_throttle_word(&self) -> Result<u32, String> {
        let out = std::process::Command::new("vcgencmd")
            .arg("get_throttled")
            .output()
            .map_err(|e| e.to_string())?;
        let stdout = String::from_utf8(out.stdout).map_err(|e| e.to_string())?;
        let hex = stdout.trim().rsplit('=').next().unwrap_or("0x0");
        u32::from_str_radix(hex.trim_start_matches("0x"), 16).map_err(|e| e.to_string())
    }
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
