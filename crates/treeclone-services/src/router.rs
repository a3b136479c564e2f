//! Router: broadcast vs unicast delivery of relayed frames.
//!
//! Holds no protocol state. The frame is decoded only to read `To`; the
//! original bytes are what gets forwarded.

use bytes::Bytes;

use treeclone_core::{Message, MessageError, Recipient};

use crate::registry::PeerRegistry;
use crate::transport::TransportError;

/// What a successful route did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Fanned out to every registered connection, sender included.
    Broadcast { delivered: usize },
    /// Forwarded to a single peer.
    Unicast { to: String },
}

pub struct Router {
    registry: PeerRegistry,
}

impl Router {
    pub fn new(registry: PeerRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Deliver one inbound frame.
    pub fn route(&self, frame: &Bytes) -> Result<Delivery, RouteError> {
        let message = Message::from_bytes(frame)?;

        match message.to {
            Recipient::Broadcast => {
                let mut delivered = 0;
                for handle in self.registry.handles() {
                    match handle.deliver(frame.clone()) {
                        Ok(()) => delivered += 1,
                        Err(e) => tracing::warn!(
                            connection = handle.id(),
                            error = %e,
                            "broadcast delivery failed"
                        ),
                    }
                }
                tracing::debug!(
                    subject = %message.subject,
                    from = %message.from,
                    delivered,
                    "broadcast routed"
                );
                Ok(Delivery::Broadcast { delivered })
            }
            Recipient::Peer(to) => {
                let handle = self
                    .registry
                    .get(&to)
                    .ok_or_else(|| RouteError::UnknownRecipient(to.clone()))?;
                handle.deliver(frame.clone())?;
                tracing::debug!(
                    subject = %message.subject,
                    from = %message.from,
                    to = %to,
                    "unicast routed"
                );
                Ok(Delivery::Unicast { to })
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error(transparent)]
    Malformed(#[from] MessageError),
    #[error("no peer registered at {0}")]
    UnknownRecipient(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
