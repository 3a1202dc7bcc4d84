//! Kiosk Voice - a hands-free voice assistant for self-service kiosks.
//!
//! Listens continuously, cuts the microphone signal into utterances with an
//! energy-based voice activity detector, transcribes them through an HTTP
//! service and routes the text to global commands (navigation, emergency
//! alerts) or to the active page: a guided voice form, a token queue board,
//! QR waypoint directions or a signboard reader.

mod audio;
mod config;
mod dialog;
mod engine;
mod error;
mod kiosk;
mod router;
mod segmenter;
mod stt;
mod timer;
mod tts;
mod vision;

use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::LocalTime;

use audio::Player;
use config::AppConfig;
use engine::{Engine, EngineSettings, Runtime, spawn_scanner_task};
use tts::Synthesizer;

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn wait_for_shutdown() {
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("🛑 Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        warn!("Failed to register SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("🛑 Received SIGTERM, shutting down...");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let config = AppConfig::from_args();

    // Respect RUST_LOG env var, fallback to verbose flag, default to info
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| if config.verbose { EnvFilter::try_new("debug") } else { EnvFilter::try_new("info") })?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(LocalTime::new(time::macros::format_description!("[hour]:[minute]:[second]")))
        .init();

    info!("🎤 Kiosk Voice v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        error!("❌ Configuration error: {:#}", e);
        std::process::exit(1);
    }

    let settings = EngineSettings {
        segmenter: config.segmenter(),
        quiet_period: config.quiet_period(),
        emergency_duration: config.emergency_duration(),
        steps: config.dialog_steps()?,
    };

    // The kiosk keeps working without speakers; utterances are still logged
    let player = match Player::new() {
        Ok(player) => Some(Arc::new(player)),
        Err(e) => {
            warn!("⚠️  No audio output ({:#}), speech will only be logged", e);
            None
        }
    };
    // Nothing to play synthesized audio on without an output device
    let synthesizer = if player.is_some() { Synthesizer::from_config(&config)? } else { None };

    info!("Starting kiosk assistant...");
    config.log_config();

    let mut runtime = Runtime::new(&config, Engine::new(settings), player, synthesizer)?;
    let scanner_handle = spawn_scanner_task(runtime.events());

    runtime.run(wait_for_shutdown()).await;

    // Stdin reads do not observe cancellation; give the scanner a moment, then abort it
    let graceful_timeout = tokio::time::Duration::from_millis(500);
    let abort = scanner_handle.abort_handle();
    tokio::select! {
        _ = scanner_handle => {
            debug!("Scanner task finished gracefully");
        }
        _ = tokio::time::sleep(graceful_timeout) => {
            debug!("Scanner task didn't finish in time, aborting");
            abort.abort();
        }
    }

    info!("✅ Kiosk assistant stopped");
    Ok(())
}
