//! In-process simulated mesh transport.
//!
//! Connects sessions in the same process through per-member event queues,
//! preserving per-sender delivery order. Rooms are bucketed by
//! `(app_id, room_id, password)`, so mismatched shared secrets yield silent
//! non-connectivity — exactly the behavior of the real transport. Backs the
//! integration tests and local development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    CandidateKind, CandidatePair, MediaStream, MeshConfig, MeshEvent, MeshSession, MeshTransport,
    SignalingSocketState, StreamId, Target,
};
use crate::domain::peer::PeerId;

type RoomKey = (String, String, String);

struct Room {
    members: HashMap<PeerId, mpsc::UnboundedSender<MeshEvent>>,
}

/// Transport-level knobs shared by every session of one hub, so tests can
/// shape what the sessions report.
struct Shared {
    rooms: Mutex<HashMap<RoomKey, Room>>,
    candidate_pair: Mutex<Option<CandidatePair>>,
    signaling: Mutex<Vec<SignalingSocketState>>,
}

pub struct SimMeshHub {
    shared: Arc<Shared>,
    next_peer: AtomicU64,
}

impl SimMeshHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(Shared {
                rooms: Mutex::new(HashMap::new()),
                candidate_pair: Mutex::new(Some(CandidatePair {
                    local: CandidateKind::Host,
                    remote: CandidateKind::Host,
                })),
                signaling: Mutex::new(vec![SignalingSocketState::Open]),
            }),
            next_peer: AtomicU64::new(1),
        })
    }

    pub fn set_candidate_pair(&self, pair: Option<CandidatePair>) {
        *self.shared.candidate_pair.lock().unwrap() = pair;
    }

    pub fn set_signaling_states(&self, states: Vec<SignalingSocketState>) {
        *self.shared.signaling.lock().unwrap() = states;
    }
}

#[async_trait]
impl MeshTransport for SimMeshHub {
    async fn join(
        &self,
        config: &MeshConfig,
        room_id: &str,
    ) -> anyhow::Result<Arc<dyn MeshSession>> {
        let key: RoomKey = (
            config.app_id.clone(),
            room_id.to_string(),
            config.password.clone().unwrap_or_default(),
        );
        let peer_id = PeerId(format!("sim-{}", self.next_peer.fetch_add(1, Ordering::Relaxed)));
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut rooms = self.shared.rooms.lock().unwrap();
            let room = rooms.entry(key.clone()).or_insert_with(|| Room {
                members: HashMap::new(),
            });
            for (existing, sender) in &room.members {
                let _ = sender.send(MeshEvent::PeerJoined(peer_id.clone()));
                let _ = tx.send(MeshEvent::PeerJoined(existing.clone()));
            }
            room.members.insert(peer_id.clone(), tx);
        }

        Ok(Arc::new(SimMeshSession {
            shared: self.shared.clone(),
            key,
            peer_id,
            rx: tokio::sync::Mutex::new(rx),
            closed: CancellationToken::new(),
        }))
    }
}

pub struct SimMeshSession {
    shared: Arc<Shared>,
    key: RoomKey,
    peer_id: PeerId,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MeshEvent>>,
    closed: CancellationToken,
}

impl SimMeshSession {
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Deliver an event to every room member the target covers, except
    /// ourselves.
    fn fan_out(&self, to: &Target, event: impl Fn(&PeerId) -> MeshEvent) -> anyhow::Result<()> {
        if self.closed.is_cancelled() {
            anyhow::bail!("Room has been left");
        }
        let rooms = self.shared.rooms.lock().unwrap();
        let Some(room) = rooms.get(&self.key) else {
            anyhow::bail!("Room no longer exists");
        };
        for (member, sender) in &room.members {
            if member == &self.peer_id || !to.includes(member) {
                continue;
            }
            let _ = sender.send(event(member));
        }
        Ok(())
    }
}

#[async_trait]
impl MeshSession for SimMeshSession {
    async fn send_action(&self, namespace: &str, to: Target, payload: Bytes) -> anyhow::Result<()> {
        let namespace = namespace.to_string();
        let from = self.peer_id.clone();
        self.fan_out(&to, |_| MeshEvent::Action {
            namespace: namespace.clone(),
            from: from.clone(),
            payload: payload.clone(),
        })
    }

    async fn next_event(&self) -> Option<MeshEvent> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => None,
            event = rx.recv() => event,
        }
    }

    async fn add_stream(
        &self,
        stream: MediaStream,
        to: Target,
        metadata: Option<Bytes>,
    ) -> anyhow::Result<()> {
        let from = self.peer_id.clone();
        self.fan_out(&to, |_| MeshEvent::Stream {
            from: from.clone(),
            stream: stream.clone(),
            metadata: metadata.clone(),
        })
    }

    async fn remove_stream(&self, _stream: StreamId, _to: Target) -> anyhow::Result<()> {
        // Receivers learn about removals through state-change broadcasts
        // and leave events; the simulated transport has nothing to do.
        if self.closed.is_cancelled() {
            anyhow::bail!("Room has been left");
        }
        Ok(())
    }

    fn peers(&self) -> Vec<PeerId> {
        let rooms = self.shared.rooms.lock().unwrap();
        rooms
            .get(&self.key)
            .map(|room| {
                room.members
                    .keys()
                    .filter(|m| *m != &self.peer_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn connection_stats(&self, _peer: &PeerId) -> Option<CandidatePair> {
        *self.shared.candidate_pair.lock().unwrap()
    }

    fn signaling_states(&self) -> Vec<SignalingSocketState> {
        self.shared.signaling.lock().unwrap().clone()
    }

    async fn leave(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        let mut rooms = self.shared.rooms.lock().unwrap();
        if let Some(room) = rooms.get_mut(&self.key) {
            room.members.remove(&self.peer_id);
            for sender in room.members.values() {
                let _ = sender.send(MeshEvent::PeerLeft(self.peer_id.clone()));
            }
            if room.members.is_empty() {
                rooms.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(password: Option<&str>) -> MeshConfig {
        MeshConfig {
            app_id: "test".into(),
            password: password.map(Into::into),
            relay_urls: Vec::new(),
        }
    }

    #[tokio::test]
    async fn mismatched_passwords_never_connect() {
        let hub = SimMeshHub::new();
        let a = hub.join(&config(Some("alpha")), "room").await.unwrap();
        let b = hub.join(&config(Some("beta")), "room").await.unwrap();

        assert!(a.peers().is_empty());
        assert!(b.peers().is_empty());
    }

    #[tokio::test]
    async fn join_is_visible_to_both_sides() {
        let hub = SimMeshHub::new();
        let a = hub.join(&config(None), "room").await.unwrap();
        let b = hub.join(&config(None), "room").await.unwrap();

        assert_eq!(a.peers().len(), 1);
        assert_eq!(b.peers().len(), 1);

        let Some(MeshEvent::PeerJoined(_)) = a.next_event().await else {
            panic!("existing member should see the newcomer join");
        };
        let Some(MeshEvent::PeerJoined(_)) = b.next_event().await else {
            panic!("newcomer should see the existing member as a join");
        };
    }

    #[tokio::test]
    async fn leave_notifies_the_rest_and_closes_the_session() {
        let hub = SimMeshHub::new();
        let a = hub.join(&config(None), "room").await.unwrap();
        let b = hub.join(&config(None), "room").await.unwrap();
        let _ = a.next_event().await;

        b.leave().await;
        assert!(b.next_event().await.is_none());
        let Some(MeshEvent::PeerLeft(_)) = a.next_event().await else {
            panic!("remaining member should see the departure");
        };
        assert!(a.peers().is_empty());

        let err = b
            .send_action("message", Target::All, Bytes::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("left"));
    }
}
