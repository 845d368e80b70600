// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Semantic Dictionary Daemon (sdd)
//!
//! Serves registration confirmations against the credentials and content
//! databases. Exits non-zero when stopped by a fatal store error.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use sd_core::{DrainCause, ShutdownController};
use sd_daemon::{
    lifecycle, notify_ready, notify_stopping, router, serve, setup_logging, Config, DaemonState,
    LifecycleError, StopStatus,
};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "sdd", version, about = "Semantic dictionary registration daemon")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, env = "SD_CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("sdd: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode, LifecycleError> {
    let config = Config::load(&args.config)?;

    let log_guard = setup_logging(&config)?;

    info!("Starting sdd with config {}", args.config.display());

    let daemon = match lifecycle::startup(&config).await {
        Ok(d) => d,
        Err(e) => {
            error!("Failed to start daemon: {}", e);
            drop(log_guard);
            return Err(e);
        }
    };

    // Set up signal handlers
    let sigterm = signal(SignalKind::terminate())?;
    let sigint = signal(SignalKind::interrupt())?;
    let shutdown = daemon.shutdown_controller().clone();
    tokio::spawn(forward_signals(sigterm, sigint, shutdown.clone()));
    shutdown.on_draining(notify_stopping);

    info!("Daemon ready, listening on {}", config.listen);
    notify_ready();

    let DaemonState {
        listener,
        tls,
        service,
        pools,
        ..
    } = daemon;
    // Returns once drained, even with clients still connected
    if let Err(e) = serve(listener, router(service), &config.http, tls, &shutdown).await {
        error!("Listener failed: {}", e);
        shutdown.begin_draining(DrainCause::Fatal(format!("listener: {}", e)));
    }

    shutdown.wait_stopped().await;
    let status = StopStatus::of(&shutdown);
    match shutdown.drain_cause() {
        Some(cause) if status == StopStatus::Fatal => {
            warn!(%cause, "Daemon stopped after a fatal error")
        }
        Some(cause) => info!(%cause, "Daemon stopped"),
        None => info!("Daemon stopped"),
    }

    pools.close().await;
    drop(log_guard);

    Ok(status.exit_code())
}

/// Turn SIGTERM/SIGINT into a requested drain
async fn forward_signals(mut sigterm: Signal, mut sigint: Signal, shutdown: ShutdownController) {
    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    info!("Received {}, shutting down...", name);
    // No-op when a fatal error already started the drain
    shutdown.begin_draining(DrainCause::Requested(name.to_string()));
}
