//! treeclone-peer: requester and responder for treeclone.

use std::sync::Arc;

use anyhow::Result;

use treeclone_core::config::TreecloneConfig;
use treeclone_services::{ClientEngine, DirectoryScanner, SnapshotStore};

mod commands;
mod relay_client;

use relay_client::RelayClient;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = TreecloneConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = TreecloneConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        TreecloneConfig::default()
    });

    if let Some(root) = std::env::args().nth(1) {
        config.peer.root_dir = root.into();
    }
    let peer = config.peer;

    let client = RelayClient::connect(&peer.relay_host, peer.relay_port).await?;

    let address = if peer.address.is_empty() {
        client.local_ip().to_string()
    } else {
        peer.address.clone()
    };
    tracing::info!(
        address = %address,
        root = %peer.root_dir.display(),
        "treeclone-peer starting"
    );

    let snapshots = SnapshotStore::new(&peer.snapshot_dir)?;
    tracing::info!(path = %peer.snapshot_dir.display(), "snapshot store ready");

    let scanner = Arc::new(DirectoryScanner::new(&peer.root_dir, address.clone()));
    let engine = Arc::new(
        ClientEngine::new(address, client.clone(), scanner, snapshots)
            .with_chunk_size(peer.chunk_size),
    );
    let reader_task = client.subscribe(engine.clone()).await?;

    tokio::select! {
        result = commands::run(engine, peer.manifest_dir.clone()) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "command loop failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
        _ = reader_task => {
            tracing::warn!("relay connection lost");
        }
    }

    client.stop().await;
    Ok(())
}
