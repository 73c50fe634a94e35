//! In-memory peer tracking, owned exclusively by one room session.
//!
//! All mutation flows through the session's handlers; no component holds a
//! second, independently-mutable copy.

use std::sync::Mutex;

use crate::domain::peer::{Peer, PeerId};

/// The current peers of a room. Insertion order is preserved for snapshots
/// so peer lists render stably.
pub struct PeerRegistry {
    peers: Mutex<Vec<Peer>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: Mutex::new(Vec::new()),
        }
    }

    /// Insert a new record. Returns false (and leaves the registry
    /// untouched) if the id is already tracked.
    pub fn insert(&self, peer: Peer) -> bool {
        let mut peers = self.peers.lock().unwrap();
        if peers.iter().any(|p| p.peer_id == peer.peer_id) {
            return false;
        }
        peers.push(peer);
        true
    }

    pub fn remove(&self, id: &PeerId) -> Option<Peer> {
        let mut peers = self.peers.lock().unwrap();
        let index = peers.iter().position(|p| &p.peer_id == id)?;
        Some(peers.remove(index))
    }

    pub fn get(&self, id: &PeerId) -> Option<Peer> {
        self.peers
            .lock()
            .unwrap()
            .iter()
            .find(|p| &p.peer_id == id)
            .cloned()
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.lock().unwrap().iter().any(|p| &p.peer_id == id)
    }

    /// Mutate one record in place. Returns the updated record, or `None`
    /// if the peer is not tracked.
    pub fn update(&self, id: &PeerId, f: impl FnOnce(&mut Peer)) -> Option<Peer> {
        let mut peers = self.peers.lock().unwrap();
        let peer = peers.iter_mut().find(|p| &p.peer_id == id)?;
        f(peer);
        Some(peer.clone())
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.peers.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.peers.lock().unwrap().clear();
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
