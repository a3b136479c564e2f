//! Relay server: accepts peer connections and forwards frames.
//!
//! Each accepted connection is registered under its remote IP. A writer
//! task drains that connection's queue so frames routed to it keep their
//! order; the reader loop hands each inbound frame to the router.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};

use treeclone_services::{
    read_frame, write_frame, ConnectionHandle, PeerRegistry, RouteError, Router,
};

pub struct RelayServer {
    listener: TcpListener,
    router: Arc<Router>,
    next_id: AtomicU64,
    shutdown: broadcast::Receiver<()>,
}

impl RelayServer {
    pub fn new(listener: TcpListener, shutdown: broadcast::Receiver<()>) -> Self {
        Self {
            listener,
            router: Arc::new(Router::new(PeerRegistry::new())),
            next_id: AtomicU64::new(1),
            shutdown,
        }
    }

    pub fn registry(&self) -> PeerRegistry {
        self.router.registry().clone()
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    let peers = self.router.registry().addresses();
                    tracing::info!(count = peers.len(), peers = ?peers, "relay shutting down");
                    return Ok(());
                }

                accepted = self.listener.accept() => {
                    let (stream, remote) = match accepted {
                        Ok(a) => a,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    tokio::spawn(serve_connection(
                        self.router.clone(),
                        id,
                        stream,
                        remote,
                        self.shutdown.resubscribe(),
                    ));
                }
            }
        }
    }
}

async fn serve_connection(
    router: Arc<Router>,
    id: u64,
    stream: TcpStream,
    remote: SocketAddr,
    mut shutdown: broadcast::Receiver<()>,
) {
    let address = remote.ip().to_string();
    let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
    let handle = ConnectionHandle::new(id, tx);

    if let Err(e) = router.registry().join(address.clone(), handle.clone()) {
        tracing::warn!(peer = %address, connection = id, error = %e, "rejecting connection");
        return;
    }

    let (mut reader, writer) = stream.into_split();
    let writer_task = tokio::spawn(drain_to_socket(id, writer, rx));

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,

            frame = read_frame(&mut reader) => match frame {
                Ok(Some(frame)) => match router.route(&frame) {
                    Ok(_) => {}
                    Err(RouteError::UnknownRecipient(to)) => {
                        tracing::warn!(from = %address, to = %to, "dropping message for unknown peer");
                    }
                    Err(e) => {
                        tracing::warn!(from = %address, error = %e, "dropping message");
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(peer = %address, connection = id, error = %e, "connection read failed");
                    break;
                }
            },
        }
    }

    router.registry().leave(&handle);
    // Registry clones are gone; dropping ours closes the writer queue.
    drop(handle);
    let _ = writer_task.await;
}

async fn drain_to_socket(id: u64, mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Bytes>) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            tracing::warn!(connection = id, error = %e, "connection write failed");
            break;
        }
    }
}
