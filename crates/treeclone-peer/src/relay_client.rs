//! Relay client: the peer's single connection to the relay.
//!
//! Outbound frames go through an unbounded queue drained by one writer
//! task, so everything sent from this process reaches the relay in send
//! order. Inbound frames are fed to the engine one at a time.

use std::net::IpAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

use treeclone_services::{
    read_frame, write_frame, ClientEngine, FrameError, Transport, TransportError, MAX_FRAME_LEN,
};

pub struct RelayClient {
    tx: mpsc::UnboundedSender<Bytes>,
    local_ip: IpAddr,
    reader: Mutex<Option<OwnedReadHalf>>,
    engine: Mutex<Option<Arc<ClientEngine>>>,
    shutdown: broadcast::Sender<()>,
}

impl RelayClient {
    /// Connect and start the writer task. Nothing is read until
    /// [`subscribe`](Self::subscribe).
    pub async fn connect(host: &str, port: u16) -> Result<Arc<Self>> {
        let stream = TcpStream::connect((host, port))
            .await
            .with_context(|| format!("failed to connect to relay {host}:{port}"))?;
        let local_ip = stream.local_addr()?.ip();
        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown, _) = broadcast::channel(1);

        tokio::spawn(drain_to_relay(writer, rx, shutdown.subscribe()));
        tracing::info!(relay = %format!("{host}:{port}"), local = %local_ip, "connected to relay");

        Ok(Arc::new(Self {
            tx,
            local_ip,
            reader: Mutex::new(Some(reader)),
            engine: Mutex::new(None),
            shutdown,
        }))
    }

    /// The address the relay sees for this peer.
    pub fn local_ip(&self) -> IpAddr {
        self.local_ip
    }

    /// Start feeding inbound frames to `engine`. Only one subscriber is
    /// supported per connection.
    pub async fn subscribe(&self, engine: Arc<ClientEngine>) -> Result<JoinHandle<()>> {
        let reader = self
            .reader
            .lock()
            .await
            .take()
            .context("relay connection already has a subscriber")?;
        *self.engine.lock().await = Some(engine.clone());
        Ok(tokio::spawn(read_from_relay(
            reader,
            engine,
            self.shutdown.subscribe(),
        )))
    }

    /// Stop both connection tasks and drop partial reassembly state.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(());
        if let Some(engine) = self.engine.lock().await.take() {
            engine.shutdown().await;
        }
        tracing::info!("relay connection stopped");
    }
}

impl Transport for RelayClient {
    fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        if frame.len() > MAX_FRAME_LEN as usize {
            return Err(TransportError::TooLarge(frame.len()));
        }
        self.tx
            .send(frame)
            .map_err(|_| TransportError::Unavailable("relay connection closed".into()))
    }
}

async fn drain_to_relay(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                match write_frame(&mut writer, &frame).await {
                    Ok(()) => {}
                    Err(FrameError::TooLarge(len)) => {
                        tracing::warn!(len, "skipping oversized frame");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "relay write failed");
                        break;
                    }
                }
            }
        }
    }
}

async fn read_from_relay(
    mut reader: OwnedReadHalf,
    engine: Arc<ClientEngine>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            frame = read_frame(&mut reader) => match frame {
                Ok(Some(frame)) => {
                    // Transfer handles are dropped; each send logs its own outcome.
                    if let Err(e) = engine.on_data_received(&frame).await {
                        tracing::warn!(error = %e, "dropping inbound message");
                    }
                }
                Ok(None) => {
                    tracing::warn!("relay closed the connection");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "relay read failed");
                    break;
                }
            },
        }
    }
}
