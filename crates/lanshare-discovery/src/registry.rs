//! Shared peer table.
//!
//! The discovery listener writes and any number of callers read, so every
//! access is one short critical section over an arena of peers plus an index
//! keyed by `device_id`. Readers only ever get owned snapshots; nothing hands
//! out an iterator that a concurrent announcement could invalidate.

use crate::peer::Peer;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Rejected manual peer input
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Device ID was empty
    #[error("device id must not be empty")]
    EmptyDeviceId,

    /// Device name was empty
    #[error("device name must not be empty")]
    EmptyDeviceName,

    /// Address was empty or not an IP address
    #[error("invalid peer address: {0:?}")]
    InvalidAddress(String),

    /// Port 0 cannot be connected to
    #[error("peer port must be non-zero")]
    InvalidPort,
}

#[derive(Debug, Default)]
struct Arena {
    peers: Vec<Peer>,
    index: HashMap<String, usize>,
}

impl Arena {
    fn reindex_from(&mut self, start: usize) {
        for (slot, peer) in self.peers.iter().enumerate().skip(start) {
            self.index.insert(peer.device_id.clone(), slot);
        }
    }
}

/// Insertion-ordered peer table keyed by device ID
#[derive(Debug, Default)]
pub struct PeerRegistry {
    arena: Mutex<Arena>,
}

impl PeerRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Arena> {
        self.arena.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a peer or refresh the entry with the same device ID
    ///
    /// An update keeps the original position in the ordering. A peer that
    /// was added manually stays marked manual when an announcement refreshes
    /// it. Returns `true` if the peer was new.
    pub fn upsert(&self, peer: Peer) -> bool {
        let mut arena = self.lock();

        if let Some(&slot) = arena.index.get(&peer.device_id) {
            let existing = &mut arena.peers[slot];
            existing.device_name = peer.device_name;
            existing.ip_address = peer.ip_address;
            existing.port = peer.port;
            existing.last_seen = peer.last_seen;
            existing.manual |= peer.manual;
            false
        } else {
            let slot = arena.peers.len();
            arena.index.insert(peer.device_id.clone(), slot);
            arena.peers.push(peer);
            true
        }
    }

    /// Validate and insert a peer that was not announced
    ///
    /// # Errors
    ///
    /// Returns a `RegistryError` and leaves the registry untouched if any
    /// field is empty, the address does not parse, or the port is zero.
    pub fn add_manual(
        &self,
        device_id: &str,
        device_name: &str,
        ip_address: &str,
        port: u16,
    ) -> Result<Peer, RegistryError> {
        let device_id = device_id.trim();
        let device_name = device_name.trim();
        let ip_address = ip_address.trim();

        if device_id.is_empty() {
            return Err(RegistryError::EmptyDeviceId);
        }
        if device_name.is_empty() {
            return Err(RegistryError::EmptyDeviceName);
        }
        let ip: IpAddr = ip_address
            .parse()
            .map_err(|_| RegistryError::InvalidAddress(ip_address.to_string()))?;
        if port == 0 {
            return Err(RegistryError::InvalidPort);
        }

        let peer = Peer::new(device_id, device_name, ip, port).manual();
        self.upsert(peer.clone());
        Ok(peer)
    }

    /// Point-in-time copy of all peers in insertion order
    #[must_use]
    pub fn snapshot(&self) -> Vec<Peer> {
        self.lock().peers.clone()
    }

    /// Look up a peer by device ID
    #[must_use]
    pub fn get(&self, device_id: &str) -> Option<Peer> {
        let arena = self.lock();
        arena
            .index
            .get(device_id)
            .map(|&slot| arena.peers[slot].clone())
    }

    /// Remove a peer, returning it if it was present
    pub fn remove(&self, device_id: &str) -> Option<Peer> {
        let mut arena = self.lock();
        let slot = arena.index.remove(device_id)?;
        let peer = arena.peers.remove(slot);
        arena.reindex_from(slot);
        Some(peer)
    }

    /// Drop announced peers not seen within `ttl`
    ///
    /// Manual peers are never pruned. Returns how many peers were removed.
    pub fn prune_stale(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let mut arena = self.lock();
        let before = arena.peers.len();

        arena
            .peers
            .retain(|p| p.manual || now.saturating_duration_since(p.last_seen) <= ttl);

        let removed = before - arena.peers.len();
        if removed > 0 {
            arena.index.clear();
            arena.reindex_from(0);
        }
        removed
    }

    /// Number of known peers
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().peers.len()
    }

    /// Whether no peers are known
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().peers.is_empty()
    }

    /// Forget every peer
    pub fn clear(&self) {
        let mut arena = self.lock();
        arena.peers.clear();
        arena.index.clear();
    }
}
