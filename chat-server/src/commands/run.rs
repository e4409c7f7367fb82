use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::*;

use chat_common::constants::SESSION_PRUNE_INTERVAL_SECS;
use chat_core::listener;
use chat_core::state::AppState;
use chat_db::Store;

use crate::config::Cli;

pub(crate) async fn command(cli: &Cli) -> Result<()> {
    let version = env!("CARGO_PKG_VERSION");
    info!(%version, "starting chat-server");

    let store = Store::open(&cli.db)
        .await
        .with_context(|| format!("failed to open database at {}", cli.db.display()))?;
    let state = AppState::new(store.clone());

    let tls = if cli.no_tls {
        warn!("--no-tls set: connections are unencrypted, development use only");
        None
    } else {
        Some(
            listener::load_tls(&cli.cert, &cli.key)
                .with_context(|| "failed to load TLS certificate/key")?,
        )
    };

    let tcp_listener = listener::bind(&cli.host, cli.port)
        .await
        .with_context(|| format!("failed to bind {}:{}", cli.host, cli.port))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(prune_sessions(store));

    if console::user_attended() {
        info!("--------------------------------------------");
        info!("chat-server is now running.");
        info!(
            "Accepting {} connections on {}:{}",
            if tls.is_some() { "TLS" } else { "plaintext" },
            cli.host,
            cli.port
        );
        info!("--------------------------------------------");
    }

    let connections = state.connections.clone();

    tokio::select! {
        _ = listener::run(tcp_listener, tls, state, shutdown_rx) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("shutdown signal received, draining connections");
            let _ = shutdown_tx.send(true);
            wait_for_drain(&connections).await;
        }
    }

    info!("exiting");
    Ok(())
}

/// Polls the live-connection count until every spawned connection task has
/// unwound through its normal cleanup path, or a generous grace period
/// elapses.
async fn wait_for_drain(connections: &chat_core::connections::ConnectionRegistry) {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
    while connections.len().await > 0 {
        if tokio::time::Instant::now() >= deadline {
            warn!("timed out waiting for connections to drain");
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
}

/// Periodically sweeps expired session rows out of storage.
async fn prune_sessions(store: Store) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
        SESSION_PRUNE_INTERVAL_SECS,
    ));
    loop {
        ticker.tick().await;
        match store.prune_expired_sessions().await {
            Ok(count) if count > 0 => debug!(count, "pruned expired sessions"),
            Ok(_) => {}
            Err(error) => error!(%error, "failed to prune expired sessions"),
        }
    }
}
