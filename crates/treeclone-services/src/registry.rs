//! Peer registry: which live connection belongs to which peer address.
//!
//! Shared between the accept loop (join), the per-connection tasks
//! (leave) and the router (lookup / fan-out).

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::transport::ConnectionHandle;

/// Address → connection map. Cheap to clone; all clones share state.
#[derive(Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<DashMap<String, ConnectionHandle>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `address`. An existing mapping wins; callers must leave first
    /// on reconnect.
    pub fn join(
        &self,
        address: impl Into<String>,
        handle: ConnectionHandle,
    ) -> Result<(), RegistryError> {
        match self.peers.entry(address.into()) {
            Entry::Occupied(existing) => Err(RegistryError::DuplicateAddress(existing.key().clone())),
            Entry::Vacant(slot) => {
                tracing::info!(peer = %slot.key(), connection = handle.id(), "peer joined");
                slot.insert(handle);
                Ok(())
            }
        }
    }

    /// Remove the entry owned by `handle`. Returns the address it was under,
    /// or `None` if the handle was never registered.
    pub fn leave(&self, handle: &ConnectionHandle) -> Option<String> {
        let address = self
            .peers
            .iter()
            .find(|entry| entry.value() == handle)
            .map(|entry| entry.key().clone())?;
        let (address, _) = self.peers.remove_if(&address, |_, h| h == handle)?;
        tracing::info!(peer = %address, connection = handle.id(), "peer left");
        Some(address)
    }

    pub fn get(&self, address: &str) -> Option<ConnectionHandle> {
        self.peers.get(address).map(|entry| entry.value().clone())
    }

    /// Point-in-time copy of every registered handle.
    pub fn handles(&self) -> Vec<ConnectionHandle> {
        self.peers.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.peers.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("address {0} is already registered")]
    DuplicateAddress(String),
}
