//! `lxc-monitord` entry point.
//!
//! # Usage
//!
//! ```bash
//! # Normally started by lxc-monitor through the launcher
//! lxc-monitord /var/lib/lxc 5
//!
//! # Run by hand for one lxcpath, linger 5 minutes without subscribers
//! LXC_MONITORD_IDLE_TIMEOUT=300 lxc-monitord /var/lib/lxc
//!
//! # Enable debug logging (written to {runtime}/lxc/{lxcpath}/lxc-monitord.log)
//! RUST_LOG=lxcmond=debug lxc-monitord /var/lib/lxc
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown (the FIFO is removed)

use std::fs::OpenOptions;
use std::os::fd::RawFd;
use std::process;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::ready::ReadySignal;
use crate::server::{MonitorServer, ServerConfig, ServerError};

/// lxc-monitord - container lifecycle event fan-out daemon
#[derive(Parser, Debug)]
#[command(name = "lxc-monitord", version, about)]
struct Args {
    /// Container directory (lxcpath) to serve
    lxcpath: String,

    /// Descriptor to signal once the socket is bound
    ready_fd: Option<RawFd>,
}

/// Parses arguments and runs the daemon to completion.
pub fn main() -> Result<()> {
    let args = Args::parse();

    let mut ready = match args.ready_fd {
        Some(fd) => ReadySignal::inherited(fd)?,
        None => ReadySignal::none(),
    };

    let config = ServerConfig::from_env(args.lxcpath.as_str())
        .with_context(|| format!("Failed to configure monitord for '{}'", args.lxcpath))?;
    init_logging(&config);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let result = runtime.block_on(run_daemon(config, &mut ready));
    if let Err(e) = &result {
        error!(error = %e, "Monitor daemon failed");
    }
    result
}

/// Binds, signals readiness and serves until shutdown.
///
/// The ready signal fires on success and when another daemon already owns
/// the group; on any other failure it is dropped unsignalled, which the
/// launcher sees as EOF.
pub async fn run_daemon(config: ServerConfig, ready: &mut ReadySignal) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        lxcpath = %config.group,
        "Monitor daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let server = match MonitorServer::bind(config, cancel_token.clone()) {
        Ok(server) => server,
        Err(ServerError::AlreadyRunning { socket }) => {
            info!(socket = %socket, "Monitor already running, exiting");
            ready.signal();
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    ready.signal();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    server.run().await?;

    info!("Monitor daemon stopped");
    Ok(())
}

/// Logs to the per-lxcpath log file; stdio is /dev/null when spawned.
fn init_logging(config: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file = config.log_path().ok().and_then(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_ansi(false);
    let _ = match file {
        Some(file) => builder.with_writer(Mutex::new(file)).try_init(),
        None => builder.with_writer(std::io::stderr).try_init(),
    };
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    Ok(())
}
