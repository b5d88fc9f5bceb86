// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Zikzi: multi-user print intake gateway.
//
// Entry point. Initialises logging, loads the configuration, opens the job
// store, and runs the raw and IPP intake servers until Ctrl-C or SIGTERM.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use zikzi_core::config::GatewayConfig;
use zikzi_core::error::{Result, ZikziError};
use zikzi_print::{GatewayContext, IppServer, ProxyListener, ProxySettings, RawServer, SqliteStore};
use zikzi_security::nonce::SWEEP_INTERVAL;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run(std::env::args_os().nth(1).map(PathBuf::from)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "zikzi stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(config_path: Option<PathBuf>) -> Result<()> {
    let config = match &config_path {
        Some(path) => {
            info!(path = %path.display(), "loading configuration");
            GatewayConfig::load(path)?
        }
        None => GatewayConfig::default(),
    };
    info!(
        raw_port = config.raw_port,
        ipp_port = config.ipp_port,
        storage = %config.storage_root.display(),
        "Zikzi starting"
    );

    if let Some(parent) = config.database_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let store = Arc::new(SqliteStore::open(&config.database_path)?);

    let raw_addr = SocketAddr::new(config.bind_address, config.raw_port);
    let ipp_addr = SocketAddr::new(config.bind_address, config.ipp_port);
    let raw_listener = ProxyListener::bind(raw_addr, ProxySettings::from_config(&config.proxy)?).await?;
    let ipp_listener = ProxyListener::bind(ipp_addr, ProxySettings::from_config(&config.proxy)?).await?;

    let ctx = Arc::new(GatewayContext::new(config, store)?);
    ctx.jobs.prepare().await?;

    let shutdown = CancellationToken::new();
    let sweeper = ctx.nonces.spawn_sweeper(SWEEP_INTERVAL, shutdown.clone());
    let mut raw = tokio::spawn(RawServer::new(Arc::clone(&ctx)).run(raw_listener, shutdown.clone()));
    let mut ipp = tokio::spawn(IppServer::new(Arc::clone(&ctx)).run(ipp_listener, shutdown.clone()));

    // A server that exits on its own takes the gateway down with it.
    let mut outcome = Ok(());
    let early = tokio::select! {
        signal = shutdown_signal() => {
            outcome = signal;
            info!("shutdown requested");
            None
        }
        joined = &mut raw => Some(("raw", joined)),
        joined = &mut ipp => Some(("ipp", joined)),
    };
    shutdown.cancel();

    let stopped = early.as_ref().map(|(name, _)| *name);
    if let Some((name, joined)) = early {
        let exit = server_exit(name, joined);
        if exit.is_ok() {
            warn!(server = name, "server stopped unexpectedly");
        }
        record(&mut outcome, exit);
    }
    if stopped != Some("raw") {
        record(&mut outcome, server_exit("raw", raw.await));
    }
    if stopped != Some("ipp") {
        record(&mut outcome, server_exit("ipp", ipp.await));
    }
    if let Err(e) = sweeper.await {
        warn!(error = %e, "nonce sweeper ended abnormally");
    }

    info!("Zikzi stopped");
    outcome
}

fn server_exit(
    name: &str,
    joined: std::result::Result<Result<()>, tokio::task::JoinError>,
) -> Result<()> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(ZikziError::PrintServer(format!("{name} server task: {e}"))),
    }
}

/// Keep the first error.
fn record(outcome: &mut Result<()>, next: Result<()>) {
    if let Err(e) = next {
        if outcome.is_ok() {
            *outcome = Err(e);
        } else {
            error!(error = %e, "additional server error");
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
