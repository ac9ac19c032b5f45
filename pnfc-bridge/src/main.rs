//! Plexamp NFC bridge (pnfc-bridge) - Main entry point
//!
//! Reads NFC reader events from a PC/SC reader or a line script, and keeps a
//! remote Plexamp player in step with the cards placed on the readers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use pnfc_bridge::channel::SseConnector;
use pnfc_bridge::player::HttpPlayerController;
use pnfc_bridge::reader::{run_script, ReaderEvent};
use pnfc_bridge::tag::Type2TagDecoder;
use pnfc_bridge::{EngineOptions, ReconciliationEngine};
use pnfc_common::config::{BridgeConfig, ConfigOverrides, ENV_CONFIG, ENV_LOG_LEVEL, ENV_PLAYER_URI, ENV_SETTINGS};
use pnfc_common::JsonSettingsFile;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Reader events buffered between the reader source and the engine
const EVENT_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Line commands from --script or stdin
    Script,
    /// PC/SC readers (needs the `pcsc` feature)
    Pcsc,
}

/// Command-line arguments for pnfc-bridge
#[derive(Parser, Debug)]
#[command(name = "pnfc-bridge")]
#[command(about = "Binds NFC cards to a remote Plexamp player")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = ENV_CONFIG)]
    config: Option<PathBuf>,

    /// Player base URI, e.g. http://192.168.1.20:32500
    #[arg(short, long, env = ENV_PLAYER_URI)]
    player_uri: Option<String>,

    /// settings.json read on every card event
    #[arg(short, long, env = ENV_SETTINGS)]
    settings: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset
    #[arg(long, env = ENV_LOG_LEVEL)]
    log_level: Option<String>,

    /// Reader backend
    #[arg(short, long, value_enum, default_value = "script")]
    backend: Backend,

    /// Script file for the script backend (stdin when omitted)
    #[arg(long)]
    script: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = BridgeConfig::resolve(&ConfigOverrides {
        config_path: args.config.clone(),
        player_uri: args.player_uri.clone(),
        settings_path: args.settings.clone(),
        log_level: args.log_level.clone(),
    })
    .context("Failed to resolve configuration")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting pnfc-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("Player: {}", config.player_uri);
    info!("Settings file: {}", config.settings_path.display());

    let options = EngineOptions::from_config(&config).context("Invalid notification endpoint")?;
    let player = HttpPlayerController::new(
        config.player_uri.clone(),
        config.client_identifier.clone(),
        config.command_timeout,
    )
    .context("Failed to build player client")?;
    let connector = SseConnector::new(config.client_identifier.clone(), config.command_timeout)
        .context("Failed to build state channel client")?;

    let engine = ReconciliationEngine::new(
        Arc::new(Type2TagDecoder),
        Arc::new(player),
        Arc::new(connector),
        Arc::new(JsonSettingsFile::new(config.settings_path.clone())),
        options,
    );

    let (tx, rx) = mpsc::channel::<ReaderEvent>(EVENT_QUEUE_DEPTH);
    let shutdown = CancellationToken::new();
    spawn_reader_source(&args, tx, shutdown.clone()).await?;

    tokio::select! {
        _ = engine.run(rx) => {
            info!("Reader source finished");
        }
        _ = shutdown_signal() => {}
    }

    shutdown.cancel();
    engine.shutdown();
    info!("Shutdown complete");
    Ok(())
}

async fn spawn_reader_source(
    args: &Args,
    tx: mpsc::Sender<ReaderEvent>,
    shutdown: CancellationToken,
) -> Result<()> {
    match args.backend {
        Backend::Script => {
            let input: Box<dyn AsyncBufRead + Send + Unpin> = match &args.script {
                Some(path) => {
                    let file = tokio::fs::File::open(path)
                        .await
                        .with_context(|| format!("Failed to open script {}", path.display()))?;
                    info!("Reading reader script from {}", path.display());
                    Box::new(BufReader::new(file))
                }
                None => {
                    info!("Reading reader script from stdin");
                    Box::new(BufReader::new(tokio::io::stdin()))
                }
            };
            tokio::spawn(async move {
                tokio::select! {
                    result = run_script(input, tx) => {
                        if let Err(e) = result {
                            error!("Reader script failed: {}", e);
                        }
                    }
                    _ = shutdown.cancelled() => {}
                }
            });
            Ok(())
        }
        Backend::Pcsc => spawn_pcsc(tx, shutdown),
    }
}

#[cfg(feature = "pcsc")]
fn spawn_pcsc(tx: mpsc::Sender<ReaderEvent>, shutdown: CancellationToken) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        if let Err(e) = pnfc_bridge::reader::pcsc::run_pcsc_monitor(tx, shutdown) {
            error!("PC/SC monitor failed: {}", e);
        }
    });
    Ok(())
}

#[cfg(not(feature = "pcsc"))]
fn spawn_pcsc(_tx: mpsc::Sender<ReaderEvent>, _shutdown: CancellationToken) -> Result<()> {
    anyhow::bail!("pnfc-bridge was built without the `pcsc` feature")
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
