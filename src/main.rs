#![forbid(unsafe_code)]

//! Stdio to TCP language-server bridge binary.
//!
//! Loads configuration, connects to the peer, and relays frames between
//! stdin/stdout and the socket until stdin closes or a shutdown signal
//! arrives. Diagnostics go to stderr; stdout carries protocol frames only.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use lsp_tcp_bridge::relay::connector::TcpConnector;
use lsp_tcp_bridge::relay::{Relay, RelaySettings};
use lsp_tcp_bridge::transform::{FileUriNormalizer, Passthrough, PayloadTransform};
use lsp_tcp_bridge::{AppError, RelayConfig, Result};

const STDIN_RELEASE_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "lsp-tcp-bridge", about = "Relay a stdio language-server session to a TCP peer", version, long_about = None)]
struct Cli {
    /// Path to an optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Peer host; overrides the config file.
    #[arg(long, env = "LSP_TCP_BRIDGE_HOST")]
    host: Option<String>,

    /// Peer port; overrides the config file.
    #[arg(long, env = "LSP_TCP_BRIDGE_PORT")]
    port: Option<u16>,

    /// Log output format (text or json), written to stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("lsp-tcp-bridge bootstrap");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?;
    let result = runtime.block_on(run(args));
    // A blocking stdin read may still be parked; do not wait for it.
    runtime.shutdown_timeout(STDIN_RELEASE_TIMEOUT);
    result
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = match args.config {
        Some(ref path) => RelayConfig::load_from_path(path)?,
        None => RelayConfig::default(),
    }
    .with_overrides(args.host, args.port)?;
    info!(peer = %config.peer_addr(), normalize_uris = config.normalize_uris, "configuration loaded");

    let transform: Box<dyn PayloadTransform> = if config.normalize_uris {
        Box::new(FileUriNormalizer)
    } else {
        Box::new(Passthrough)
    };

    let settings = RelaySettings {
        connect_timeout: config.connect_timeout(),
        retry: config.retry_policy(),
        staging_capacity: config.staging_capacity,
    };
    let relay = Relay::new(
        settings,
        TcpConnector::new(config.peer_addr()),
        transform,
        tokio::io::stdout(),
    );

    // ── Shutdown on signal ──────────────────────────────
    let ct = CancellationToken::new();
    let signal_ct = ct.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_ct.cancel();
    });

    relay.run(tokio::io::stdin(), ct).await?;
    info!("lsp-tcp-bridge shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout is the protocol stream; logs must stay on stderr.
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
