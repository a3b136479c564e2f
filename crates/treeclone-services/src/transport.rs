//! Transport seam: how encoded messages leave a process.
//!
//! The engine only ever needs "send these bytes"; connecting, subscribing
//! and stopping belong to the concrete client. The relay uses
//! [`ConnectionHandle`] for the other direction.

use bytes::Bytes;
use tokio::sync::mpsc;

/// Outbound path for encoded messages.
///
/// Implementations must keep frames from a single caller in order: the
/// chunk reassembler on the far side appends blindly.
pub trait Transport: Send + Sync {
    fn send(&self, frame: Bytes) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    #[error("frame of {0} bytes exceeds limit")]
    TooLarge(usize),
}

/// Server-side handle for one accepted connection.
///
/// Frames pushed here are drained by that connection's writer task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: u64,
    tx: mpsc::UnboundedSender<Bytes>,
}

impl ConnectionHandle {
    pub fn new(id: u64, tx: mpsc::UnboundedSender<Bytes>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue a frame for this connection.
    pub fn deliver(&self, frame: Bytes) -> Result<(), TransportError> {
        self.tx
            .send(frame)
            .map_err(|_| TransportError::Unavailable(format!("connection {} closed", self.id)))
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}
