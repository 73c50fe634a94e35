//! [`SessionEvents`] adapters: a tracing bridge and a recording double.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::application::ports::{ConnectionHealth, SessionEvents};
use crate::domain::chat::TranscriptEntry;
use crate::domain::peer::{Peer, PeerId, StreamKind};

/// Logs every session event; the default bridge when no UI is attached.
pub struct LoggingSessionEvents;

#[async_trait]
impl SessionEvents for LoggingSessionEvents {
    async fn peer_updated(&self, peer: &Peer) {
        debug!(peer_id = %peer.peer_id, verification = ?peer.verification, "Peer updated");
    }

    async fn peer_left(&self, peer_id: &PeerId) {
        debug!(%peer_id, "Peer left");
    }

    async fn transcript_appended(&self, entry: &TranscriptEntry) {
        debug!(id = %entry.id().0, "Transcript entry appended");
    }

    async fn transcript_updated(&self, entry: &TranscriptEntry) {
        debug!(id = %entry.id().0, "Transcript entry updated");
    }

    async fn transcript_replaced(&self, entries: &[TranscriptEntry]) {
        debug!(len = entries.len(), "Transcript replaced by backfill");
    }

    async fn health_changed(&self, health: ConnectionHealth) {
        debug!(?health, "Connection health changed");
    }

    async fn remote_stream_added(&self, peer_id: &PeerId, kind: StreamKind) {
        debug!(%peer_id, ?kind, "Remote stream added");
    }

    async fn remote_stream_removed(&self, peer_id: &PeerId, kind: StreamKind) {
        debug!(%peer_id, ?kind, "Remote stream removed");
    }
}

/// One recorded session event, for assertions.
#[derive(Debug, Clone)]
pub enum RecordedEvent {
    PeerUpdated(Peer),
    PeerLeft(PeerId),
    TranscriptAppended(TranscriptEntry),
    TranscriptUpdated(TranscriptEntry),
    TranscriptReplaced(usize),
    HealthChanged(ConnectionHealth),
    RemoteStreamAdded(PeerId, StreamKind),
    RemoteStreamRemoved(PeerId, StreamKind),
}

/// Captures events in arrival order; the test double for the UI bridge.
pub struct RecordingSessionEvents {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingSessionEvents {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn recorded(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: RecordedEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl Default for RecordingSessionEvents {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionEvents for RecordingSessionEvents {
    async fn peer_updated(&self, peer: &Peer) {
        self.push(RecordedEvent::PeerUpdated(peer.clone()));
    }

    async fn peer_left(&self, peer_id: &PeerId) {
        self.push(RecordedEvent::PeerLeft(peer_id.clone()));
    }

    async fn transcript_appended(&self, entry: &TranscriptEntry) {
        self.push(RecordedEvent::TranscriptAppended(entry.clone()));
    }

    async fn transcript_updated(&self, entry: &TranscriptEntry) {
        self.push(RecordedEvent::TranscriptUpdated(entry.clone()));
    }

    async fn transcript_replaced(&self, entries: &[TranscriptEntry]) {
        self.push(RecordedEvent::TranscriptReplaced(entries.len()));
    }

    async fn health_changed(&self, health: ConnectionHealth) {
        self.push(RecordedEvent::HealthChanged(health));
    }

    async fn remote_stream_added(&self, peer_id: &PeerId, kind: StreamKind) {
        self.push(RecordedEvent::RemoteStreamAdded(peer_id.clone(), kind));
    }

    async fn remote_stream_removed(&self, peer_id: &PeerId, kind: StreamKind) {
        self.push(RecordedEvent::RemoteStreamRemoved(peer_id.clone(), kind));
    }
}
