//! botmand: chat-bot multiplexer daemon.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use botmand::BOT_NAME;
use botmand::backend::BackendQueues;
use botmand::backend::slack::{RtmClient, SlackBackend};
use botmand::conversation::manager::Manager;
use botmand::engine::EngineRegistry;
use botmand::metrics;

#[derive(Debug, Parser)]
#[command(
    name = "botmand",
    version,
    about = "Route chat messages to subprocess handlers"
)]
struct Args {
    /// Directory scanned for handler configs (*.yaml, *.yml)
    #[arg(short = 'c', long, value_name = "DIR")]
    config_directory: Option<PathBuf>,

    /// Slack API token literal
    #[arg(long, value_name = "TOKEN")]
    slack_backend_token: Option<String>,

    /// File to read the Slack token from when --slack-backend-token is unset
    #[arg(short = 't', long, value_name = "FILE")]
    slack_backend_token_file: Option<PathBuf>,

    /// Expose prometheus metrics on /metrics
    #[arg(short = 'm', long)]
    enable_metrics: bool,

    /// TCP port for the metrics endpoint
    #[arg(short = 'p', long, default_value_t = 2112)]
    metrics_port: u16,

    /// Debug logging
    #[arg(short = 'd', long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.debug {
        format!("{BOT_NAME}=debug,info")
    } else {
        "info".to_string()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let home = dirs::home_dir().context("cannot determine home directory")?;
    let config_dir = args
        .config_directory
        .unwrap_or_else(|| home.join(format!("{BOT_NAME}-engines")));

    let token = match args.slack_backend_token {
        Some(token) if !token.is_empty() => token,
        _ => {
            let path = args
                .slack_backend_token_file
                .unwrap_or_else(|| home.join(".slack.token"));
            std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read slack token from {}", path.display()))?
                .trim()
                .to_string()
        }
    };
    if token.is_empty() {
        bail!("empty slack token");
    }

    let cancel = CancellationToken::new();

    let api = Arc::new(RtmClient::new(token));
    let backend = Arc::new(SlackBackend::new(api));
    let manager = Manager::new(
        backend,
        BackendQueues::new(),
        EngineRegistry::builtin(),
        config_dir.clone(),
        cancel.clone(),
    );
    manager
        .load_engines()
        .with_context(|| format!("failed to load handler configs from {}", config_dir.display()))?;

    if args.enable_metrics {
        let metrics_cancel = cancel.clone();
        let port = args.metrics_port;
        tokio::spawn(async move {
            if let Err(error) = metrics::serve(port, metrics_cancel).await {
                warn!(%error, "metrics server failed");
            }
        });
    }

    spawn_signal_handler(manager.clone(), cancel.clone())?;

    info!(config = %config_dir.display(), "starting {BOT_NAME}");
    manager.start().await;
    cancel.cancel();
    manager.shutdown().await;

    if manager.failed() {
        bail!("backend failed");
    }
    info!("clean shutdown");
    Ok(())
}

/// SIGINT/SIGTERM cancel the root token; SIGHUP reloads the trigger table
/// without touching live conversations.
fn spawn_signal_handler(manager: Manager, cancel: CancellationToken) -> anyhow::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sigint.recv() => {
                    info!("caught SIGINT, shutting down");
                    cancel.cancel();
                }
                _ = sigterm.recv() => {
                    info!("caught SIGTERM, shutting down");
                    cancel.cancel();
                }
                _ = sighup.recv() => {
                    info!("caught SIGHUP, reloading handler configs");
                    if let Err(error) = manager.load_engines() {
                        warn!(%error, "config reload failed, keeping previous trigger table");
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    });
    Ok(())
}
