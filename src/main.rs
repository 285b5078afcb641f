#![forbid(unsafe_code)]

//! `takopi` — chat-to-agent bridge binary.
//!
//! Bootstraps configuration and credentials, takes the per-token
//! instance lock, builds the engine registry and transport, and runs the
//! bridge until a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use takopi::bridge::Bridge;
use takopi::engines;
use takopi::lockfile;
use takopi::model::EngineId;
use takopi::router::AutoRouter;
use takopi::runner::ResumeLocks;
use takopi::transport::build_transport;
use takopi::{AppError, Result, TakopiConfig};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "takopi", about = "Telegram bridge for coding agents", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    ///
    /// Defaults to `takopi.toml` in the per-user config directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the transport backend id.
    #[arg(long)]
    transport: Option<String>,

    /// Override the default engine id.
    #[arg(long)]
    engine: Option<String>,

    /// Deliver the final response by editing the progress message
    /// instead of sending a new (audible) message.
    #[arg(long)]
    no_final_notify: bool,

    /// Log engine JSONL, transport requests, and rendered messages.
    #[arg(long)]
    debug: bool,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug, args.log_format)?;
    info!("takopi bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config_path = args.config.unwrap_or_else(TakopiConfig::default_path);
    let mut config = TakopiConfig::load_from_path(&config_path)?;

    if let Some(transport) = args.transport {
        let transport = transport.trim();
        if transport.is_empty() {
            return Err(AppError::Config(
                "invalid --transport; expected a non-empty id".into(),
            ));
        }
        config.transport = transport.to_owned();
    }
    if let Some(engine) = args.engine {
        EngineId::new(&engine)?;
        config.default_engine = engine;
    }
    if args.no_final_notify {
        config.final_notify = false;
    }

    config.load_credentials().await?;
    info!(config = %config_path.display(), "configuration loaded");

    // ── Single-instance lock ────────────────────────────
    let lock = lockfile::acquire(&TakopiConfig::state_dir(), &config.telegram.bot_token)?;
    info!("instance lock acquired");

    // ── Engine registry and router ──────────────────────
    let locks = ResumeLocks::new();
    let entries = engines::build_runners(&config, &locks)?;
    let default_engine = EngineId::new(&config.default_engine)?;
    let router = Arc::new(AutoRouter::new(entries, default_engine)?);
    info!(
        engines = router.entries().len(),
        default = %router.default_engine(),
        "runner registry built"
    );

    // ── Transport and bridge ────────────────────────────
    let transport = build_transport(&config.transport, &config)?;
    let bridge = Bridge::new(transport, router, &config);

    let ct = CancellationToken::new();
    let bridge_handle = tokio::spawn(Arc::clone(&bridge).run(ct.clone()));
    info!(transport = %config.transport, "bridge ready");

    // ── Wait for first shutdown signal ──────────────────
    shutdown_signal().await;
    info!("shutdown signal received — starting graceful shutdown");
    ct.cancel();

    // A second signal force-exits.
    tokio::spawn(async {
        shutdown_signal().await;
        error!("second shutdown signal received — forcing exit");
        std::process::exit(1);
    });

    // ── Graceful shutdown with timeout ───────────────────
    let shutdown = async {
        let _ = bridge_handle.await;
        // Give cancelled runs a moment to deliver their final renders.
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, shutdown).await.is_err() {
        error!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "graceful shutdown timed out — exiting"
        );
    }

    drop(lock);
    info!("takopi shut down");
    Ok(())
}

/// Maximum time to wait for graceful shutdown before giving up.
const SHUTDOWN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

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
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
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

fn init_tracing(debug: bool, log_format: LogFormat) -> Result<()> {
    let default_filter = if debug { "takopi=debug,info" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let subscriber = fmt().with_env_filter(env_filter);

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
