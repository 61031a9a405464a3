//! Daemon wiring: RPC server + stale-session sweeper until a shutdown signal.

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio_util::sync::CancellationToken;

use fleetsync_config::{ConfigStore, epoch_version};
use fleetsync_registry::SessionRegistry;
use fleetsync_sync::{SyncHandler, run_sweeper};

use crate::cli::DaemonOpts;
use crate::seed::load_seed;
use crate::server::RpcServer;

pub async fn run_daemon(opts: DaemonOpts, admin_token: String) -> anyhow::Result<()> {
    if admin_token.is_empty() {
        tracing::warn!("no admin token configured, admin methods are disabled");
    }

    let handler = build_handler(&opts, admin_token)?;
    let cancel = CancellationToken::new();

    let server = RpcServer::new(opts.listen, handler.clone(), cancel.clone())
        .with_max_connections(opts.max_connections)
        .with_idle_timeout(Duration::from_secs(opts.idle_timeout_secs.max(1)));
    let (listener, local_addr) = server.bind().await?;
    tracing::info!(addr = %local_addr, version = handler.config_version().await, "daemon ready");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.serve(listener).await {
            tracing::error!("rpc server error: {e}");
        }
    });

    let sweep_handle = tokio::spawn(run_sweeper(
        handler.registry(),
        handler.clock(),
        Duration::from_secs(opts.sweep_interval_secs.max(1)),
        cancel.clone(),
    ));

    // Wait for shutdown signal (ctrl-c or SIGTERM)
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => tokio::select! {
                    _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                },
                Err(e) => {
                    tracing::warn!(error = %e, "cannot register SIGTERM handler");
                    ctrl_c.await.ok();
                    tracing::info!("received ctrl-c, shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            tracing::info!("received ctrl-c, shutting down");
        }
    };

    tokio::select! {
        () = shutdown => {}
        _ = sweep_handle => {
            tracing::warn!("sweeper exited unexpectedly");
        }
        _ = server_handle => {
            tracing::warn!("server exited unexpectedly");
        }
    }

    cancel.cancel();
    tracing::info!("daemon stopped");
    Ok(())
}

fn build_handler(opts: &DaemonOpts, admin_token: String) -> anyhow::Result<SyncHandler> {
    let snapshot = load_seed(opts.seed.as_deref())?;
    let threshold = i64::try_from(opts.stale_threshold_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .ok_or_else(|| anyhow::anyhow!("stale threshold out of range"))?;

    // A restart must not reuse versions a display may still hold.
    let version = opts
        .initial_version
        .unwrap_or_else(|| epoch_version(Utc::now()));

    Ok(SyncHandler::new(
        SessionRegistry::with_stale_threshold(threshold),
        ConfigStore::with_version(snapshot, version),
        admin_token,
    ))
}
