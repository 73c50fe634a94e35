//! Per-channel-type media stream lifecycle.
//!
//! One coordinator exists per [`StreamKind`] (audio, video, screen). It owns
//! the local stream for its kind, propagates presence to the mesh, and holds
//! inbound streams keyed by peer for playback.
//!
//! Attaches are serialized through a FIFO with a settling delay between
//! additions: the transport ships stream data and sideband metadata over
//! independently-ordered channels, so back-to-back attaches can get their
//! metadata associated with the wrong stream on the receiving side.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::peer::{PeerId, StreamKind};
use crate::domain::wire::{StreamMetadata, StreamStatus};

use super::channel::{encode, ActionChannel};
use super::ports::{MediaCapture, MediaStream, MeshSession, SessionEvents, Target};

/// Minimum spacing between two stream additions.
pub const STREAM_SETTLE_DELAY: Duration = Duration::from_secs(1);

struct AttachOp {
    stream: MediaStream,
    to: Target,
}

pub struct StreamCoordinator {
    kind: StreamKind,
    mesh: Arc<dyn MeshSession>,
    capture: Arc<dyn MediaCapture>,
    events: Arc<dyn SessionEvents>,
    state_channel: ActionChannel<StreamStatus>,
    local: Mutex<Option<MediaStream>>,
    /// Inbound streams held for playback, keyed by sender.
    remote: Mutex<HashMap<PeerId, MediaStream>>,
    attach_tx: mpsc::UnboundedSender<AttachOp>,
}

impl StreamCoordinator {
    /// Build the coordinator and spawn its attach worker. The worker runs
    /// until `shutdown` fires.
    pub fn new(
        kind: StreamKind,
        mesh: Arc<dyn MeshSession>,
        capture: Arc<dyn MediaCapture>,
        events: Arc<dyn SessionEvents>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Arc<Self>> {
        let (attach_tx, attach_rx) = mpsc::unbounded_channel();
        let coordinator = Arc::new(Self {
            kind,
            state_channel: ActionChannel::new(mesh.clone(), kind.state_namespace())?,
            mesh,
            capture,
            events,
            local: Mutex::new(None),
            remote: Mutex::new(HashMap::new()),
            attach_tx,
        });
        coordinator.clone().spawn_worker(attach_rx, shutdown);
        Ok(coordinator)
    }

    /// Acquire a local stream, queue attachment to every current peer, and
    /// broadcast the enabled state.
    pub async fn enable(&self) -> anyhow::Result<()> {
        if self.local.lock().unwrap().is_some() {
            return Ok(());
        }
        let stream = self.capture.acquire(self.kind).await?;
        *self.local.lock().unwrap() = Some(stream.clone());

        self.queue_attach(stream, Target::All);
        self.state_channel.send(&StreamStatus::Enabled, Target::All).await;
        Ok(())
    }

    /// Stop local tracks, detach from all peers, and broadcast the stopped
    /// state.
    pub async fn disable(&self) {
        let stream = self.local.lock().unwrap().take();
        let Some(stream) = stream else { return };

        self.capture.stop(stream.id).await;
        if let Err(e) = self.mesh.remove_stream(stream.id, Target::All).await {
            debug!(kind = ?self.kind, "Detach on disable failed: {e}");
        }
        self.state_channel.send(&StreamStatus::Disabled, Target::All).await;
    }

    /// A peer joined: attach the existing local stream to that peer only,
    /// and tell it our current state.
    pub async fn on_peer_join(&self, peer_id: &PeerId) {
        let stream = self.local.lock().unwrap().clone();
        if let Some(stream) = stream {
            self.queue_attach(stream, Target::One(peer_id.clone()));
            self.state_channel
                .send(&StreamStatus::Enabled, Target::One(peer_id.clone()))
                .await;
        }
    }

    /// A peer left: detach (no-op when nothing was attached) and discard
    /// any stream held for that peer's playback.
    pub async fn on_peer_leave(&self, peer_id: &PeerId) {
        let local = self.local.lock().unwrap().clone();
        if let Some(stream) = local {
            if let Err(e) = self
                .mesh
                .remove_stream(stream.id, Target::One(peer_id.clone()))
                .await
            {
                debug!(kind = ?self.kind, %peer_id, "Detach on leave failed: {e}");
            }
        }
        if self.remote.lock().unwrap().remove(peer_id).is_some() {
            self.events.remote_stream_removed(peer_id, self.kind).await;
        }
    }

    /// Inbound stream routed to this coordinator. A stream with zero tracks
    /// of the relevant kind is ignored.
    pub async fn on_remote_stream(&self, peer_id: &PeerId, stream: MediaStream) {
        if !stream.has_track(self.kind.track_kind()) {
            debug!(kind = ?self.kind, %peer_id, "Ignoring stream without a matching track");
            return;
        }
        self.remote.lock().unwrap().insert(peer_id.clone(), stream);
        self.events.remote_stream_added(peer_id, self.kind).await;
    }

    /// Remote state-change broadcast for this kind. A disabled state drops
    /// the held playback stream.
    pub async fn on_remote_status(&self, peer_id: &PeerId, status: StreamStatus) {
        if status == StreamStatus::Disabled
            && self.remote.lock().unwrap().remove(peer_id).is_some()
        {
            self.events.remote_stream_removed(peer_id, self.kind).await;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.local.lock().unwrap().is_some()
    }

    pub fn remote_stream(&self, peer_id: &PeerId) -> Option<MediaStream> {
        self.remote.lock().unwrap().get(peer_id).cloned()
    }

    /// Teardown: stop local tracks and drop all held state. Detaching is
    /// unnecessary — the session is leaving the room.
    pub async fn shutdown(&self) {
        let stream = self.local.lock().unwrap().take();
        if let Some(stream) = stream {
            self.capture.stop(stream.id).await;
        }
        self.remote.lock().unwrap().clear();
    }

    fn queue_attach(&self, stream: MediaStream, to: Target) {
        let op = AttachOp { stream, to };
        if self.attach_tx.send(op).is_err() {
            warn!(kind = ?self.kind, "Attach queue is closed");
        }
    }

    fn spawn_worker(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<AttachOp>,
        shutdown: CancellationToken,
    ) {
        let coordinator = self;
        tokio::spawn(async move {
            loop {
                let op = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    op = rx.recv() => match op {
                        Some(op) => op,
                        None => break,
                    },
                };

                // Skip stale ops queued before a disable.
                let still_local = coordinator
                    .local
                    .lock()
                    .unwrap()
                    .as_ref()
                    .is_some_and(|s| s.id == op.stream.id);
                if !still_local {
                    continue;
                }

                let metadata = encode(&StreamMetadata {
                    kind: coordinator.kind,
                })
                .ok();
                if let Err(e) = coordinator
                    .mesh
                    .add_stream(op.stream, op.to, metadata)
                    .await
                {
                    warn!(kind = ?coordinator.kind, "Stream attach failed: {e}");
                }

                // Let the metadata settle before the next addition.
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(STREAM_SETTLE_DELAY) => {}
                }
            }
        });
    }
}
