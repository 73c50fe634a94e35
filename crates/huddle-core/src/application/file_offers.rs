//! File offer lifecycle: who currently offers what, and when to rescind.
//!
//! Offer/download wire internals belong to the transfer collaborator; this
//! component only tracks the content-addressed offer each peer currently
//! exposes and rescinds offers on replacement, explicit stop, or departure.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::domain::chat::ContentId;
use crate::domain::peer::PeerId;
use crate::domain::wire::{namespace, FileOfferPayload};

use super::channel::ActionChannel;
use super::peers::PeerRegistry;
use super::ports::{FileTransfer, MeshSession, OfferedFile, SessionEvents, Target};
use super::transcript::TranscriptStore;

struct LocalOffer {
    content_id: ContentId,
    all_inline_renderable: bool,
}

pub struct FileOfferCoordinator {
    transfer: Arc<dyn FileTransfer>,
    peers: Arc<PeerRegistry>,
    events: Arc<dyn SessionEvents>,
    transcript: Arc<TranscriptStore>,
    channel: ActionChannel<FileOfferPayload>,
    local: Mutex<Option<LocalOffer>>,
}

impl FileOfferCoordinator {
    pub fn new(
        mesh: Arc<dyn MeshSession>,
        transfer: Arc<dyn FileTransfer>,
        peers: Arc<PeerRegistry>,
        events: Arc<dyn SessionEvents>,
        transcript: Arc<TranscriptStore>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            transfer,
            peers,
            events,
            transcript,
            channel: ActionChannel::new(mesh, namespace::FILE_OFFER)?,
            local: Mutex::new(None),
        })
    }

    /// Hand files to the transfer capability, broadcast the resulting
    /// content address, and record it as our current offer. Replaces (and
    /// rescinds) any previous offer.
    pub async fn offer(&self, files: Vec<OfferedFile>) -> anyhow::Result<ContentId> {
        let all_inline_renderable = files.iter().all(OfferedFile::is_inline_renderable);
        let content_id = self.transfer.offer(files).await?;

        let previous = self.local.lock().unwrap().replace(LocalOffer {
            content_id: content_id.clone(),
            all_inline_renderable,
        });
        if let Some(previous) = previous {
            if previous.content_id != content_id {
                self.rescind_local(previous).await;
            }
        }

        self.channel
            .send(
                &FileOfferPayload {
                    content_id: Some(content_id.clone()),
                },
                Target::All,
            )
            .await;
        Ok(content_id)
    }

    /// Clear the local offer: broadcast `None`, and rescind the underlying
    /// transfer when it is no longer needed.
    pub async fn stop(&self) {
        let previous = self.local.lock().unwrap().take();
        self.channel
            .send(&FileOfferPayload { content_id: None }, Target::All)
            .await;
        if let Some(previous) = previous {
            self.rescind_local(previous).await;
        }
    }

    /// A peer announced its current offer (or cleared it with `None`).
    pub async fn on_remote_offer(&self, from: &PeerId, payload: &[u8]) {
        let offer = match ActionChannel::<FileOfferPayload>::decode(payload) {
            Ok(p) => p.content_id,
            Err(e) => {
                warn!(%from, "Malformed file offer: {e}");
                return;
            }
        };

        let mut replaced: Option<ContentId> = None;
        let updated = self.peers.update(from, |p| {
            if p.offered_file_id != offer {
                replaced = p.offered_file_id.take();
            }
            p.offered_file_id = offer.clone();
        });
        if updated.is_none() {
            warn!(%from, "File offer from an untracked peer");
            return;
        }

        if let Some(old) = replaced {
            if self.transfer.is_offering(&old) {
                debug!(%from, content_id = %old, "Rescinding replaced peer offer");
                self.transfer.rescind(&old).await;
            }
        }
        if let Some(peer) = updated {
            self.events.peer_updated(&peer).await;
        }
    }

    /// A peer left: rescind whatever it was offering and clear the record.
    pub async fn on_peer_leave(&self, peer_id: &PeerId) {
        let Some(peer) = self.peers.get(peer_id) else {
            return;
        };
        if let Some(content_id) = peer.offered_file_id {
            if self.transfer.is_offering(&content_id) {
                debug!(%peer_id, %content_id, "Rescinding offer of departed peer");
                self.transfer.rescind(&content_id).await;
            }
        }
    }

    /// Join handler: announce our current offer to the newly joined peer
    /// only. The dispatch loop registers the peer before join handlers run,
    /// so this announcement cannot race the receiver's bookkeeping.
    pub async fn announce_to(&self, peer_id: &PeerId) {
        let content_id = self
            .local
            .lock()
            .unwrap()
            .as_ref()
            .map(|o| o.content_id.clone());
        if let Some(content_id) = content_id {
            self.channel
                .send(
                    &FileOfferPayload {
                        content_id: Some(content_id),
                    },
                    Target::One(peer_id.clone()),
                )
                .await;
        }
    }

    pub fn local_offer(&self) -> Option<ContentId> {
        self.local.lock().unwrap().as_ref().map(|o| o.content_id.clone())
    }

    /// Teardown: rescind everything this session still offers.
    pub async fn rescind_all(&self) {
        let local = self.local.lock().unwrap().take();
        if let Some(offer) = local {
            if self.transfer.is_offering(&offer.content_id) {
                self.transfer.rescind(&offer.content_id).await;
            }
        }
        for peer in self.peers.peers() {
            if let Some(content_id) = peer.offered_file_id {
                if self.transfer.is_offering(&content_id) {
                    self.transfer.rescind(&content_id).await;
                }
            }
        }
    }

    /// Rescind a withdrawn local offer unless the transfer must stay alive
    /// for inline playback: the content is embedded in the transcript as
    /// inline media while not all of the offered files were
    /// inline-renderable.
    async fn rescind_local(&self, offer: LocalOffer) {
        let embedded = self
            .transcript
            .snapshot()
            .iter()
            .any(|e| e.content_id() == Some(&offer.content_id));
        if embedded && !offer.all_inline_renderable {
            debug!(content_id = %offer.content_id, "Keeping transfer alive for inline playback");
            return;
        }
        if self.transfer.is_offering(&offer.content_id) {
            self.transfer.rescind(&offer.content_id).await;
        }
    }
}
