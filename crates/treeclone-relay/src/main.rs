//! treeclone-relay: message relay for treeclone peers.

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use treeclone_core::config::TreecloneConfig;

mod server;

use server::RelayServer;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = TreecloneConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = TreecloneConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        TreecloneConfig::default()
    });

    let port = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse::<u16>()
            .with_context(|| format!("invalid port: {arg}"))?,
        None => config.relay.port,
    };

    let listener = TcpListener::bind((config.relay.bind.as_str(), port))
        .await
        .with_context(|| format!("failed to bind {}:{port}", config.relay.bind))?;
    tracing::info!(addr = %listener.local_addr()?, "treeclone-relay listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    RelayServer::new(listener, shutdown_rx).run().await
}
