//! Message model: the only entity that travels between peers.
//!
//! A message is built once, serialized once, sent, and dropped. It is
//! encoded as JSON. Phase-specific validation of `body` and `meta_data`
//! happens in the engine, not here.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Reserved `To` value meaning "every currently connected peer".
pub const BROADCAST_MARKER: &str = "BroadCast";

/// Protocol phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subject {
    /// Requester asks every peer for its file listing.
    Request,
    /// Responder answers with its listing snapshot.
    Response,
    /// Requester names the files it wants from one responder.
    Summary,
    /// Responder streams one chunk of one requested file.
    Cloning,
}

impl Subject {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Summary => "summary",
            Self::Cloning => "cloning",
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination of a message.
///
/// On the wire this is a plain string; [`BROADCAST_MARKER`] maps to
/// `Broadcast`, anything else is a peer address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Recipient {
    Broadcast,
    Peer(String),
}

impl Recipient {
    pub fn peer(addr: impl Into<String>) -> Self {
        Self::Peer(addr.into())
    }
}

impl From<String> for Recipient {
    fn from(s: String) -> Self {
        if s == BROADCAST_MARKER {
            Self::Broadcast
        } else {
            Self::Peer(s)
        }
    }
}

impl From<Recipient> for String {
    fn from(r: Recipient) -> Self {
        match r {
            Recipient::Broadcast => BROADCAST_MARKER.to_string(),
            Recipient::Peer(addr) => addr,
        }
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Broadcast => f.write_str(BROADCAST_MARKER),
            Self::Peer(addr) => f.write_str(addr),
        }
    }
}

/// Wire message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Message {
    /// Protocol phase.
    pub subject: Subject,

    /// Requester-scoped epoch. Responders echo back the value they received.
    #[serde(rename = "RequestID")]
    pub request_id: u64,

    /// Sender's logical address. Not authenticated.
    pub from: String,

    /// Destination peer or broadcast.
    pub to: Recipient,

    /// Phase-dependent payload.
    pub body: String,

    /// Destination path on the requester during Cloning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_data: Option<String>,
}

impl Message {
    /// Broadcast request for file listings.
    pub fn request(from: impl Into<String>, epoch: u64) -> Self {
        Self {
            subject: Subject::Request,
            request_id: epoch,
            from: from.into(),
            to: Recipient::Broadcast,
            body: String::new(),
            meta_data: None,
        }
    }

    /// Reply to a request, carrying the responder's listing snapshot.
    pub fn response(
        from: impl Into<String>,
        to: impl Into<String>,
        request_id: u64,
        snapshot: String,
    ) -> Self {
        Self {
            subject: Subject::Response,
            request_id,
            from: from.into(),
            to: Recipient::peer(to),
            body: snapshot,
            meta_data: None,
        }
    }

    /// Selection list sent to a single responder.
    pub fn summary(
        from: impl Into<String>,
        to: impl Into<String>,
        request_id: u64,
        lines: String,
    ) -> Self {
        Self {
            subject: Subject::Summary,
            request_id,
            from: from.into(),
            to: Recipient::peer(to),
            body: lines,
            meta_data: None,
        }
    }

    /// One encoded file chunk bound for `destination` on the requester.
    pub fn cloning(
        from: impl Into<String>,
        to: impl Into<String>,
        request_id: u64,
        chunk_body: String,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            subject: Subject::Cloning,
            request_id,
            from: from.into(),
            to: Recipient::peer(to),
            body: chunk_body,
            meta_data: Some(destination.into()),
        }
    }

    /// Serialize to bytes for transmission.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MessageError> {
        serde_json::to_vec(self).map_err(MessageError::Encode)
    }

    /// Deserialize from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, MessageError> {
        serde_json::from_slice(data).map_err(MessageError::Malformed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("malformed message: {0}")]
    Malformed(serde_json::Error),
    #[error("failed to encode message: {0}")]
    Encode(serde_json::Error),
}
