//! Room session orchestrator.
//!
//! Composes verification, media coordinators, file offers, the transcript,
//! and the health monitor over a single mesh session handle, and runs the
//! event dispatch loop. The session exclusively owns the peer registry and
//! transcript for the room's lifetime; all mutation goes through its
//! handlers.

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::chat::{ContentId, InlineMedia, Message, MessageId, TranscriptEntry};
use crate::domain::peer::{Peer, PeerId, StreamKind, TypingKind, UserId};
use crate::domain::wire::{namespace, BackfillPayload, PeerMetadata, StreamMetadata, TypingPayload};

use super::channel::ActionChannel;
use super::file_offers::FileOfferCoordinator;
use super::handlers::{HandlerRegistry, HandlerTag};
use super::health::HealthMonitor;
use super::media::StreamCoordinator;
use super::peers::PeerRegistry;
use super::ports::{
    CandidateKind, CandidatePair, ConnectionHealth, ConnectivityProbe, FileTransfer, MediaCapture,
    MediaStream, MeshConfig, MeshEvent, MeshSession, MeshTransport, OfferedFile, PeerCrypto,
    SessionEvents, Target, TrackKind,
};
use super::transcript::{TranscriptStore, TRANSCRIPT_CAP};
use super::typing::TypingIndicator;
use super::verify::PeerVerifier;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub app_id: String,
    pub room_id: String,
    pub user_id: UserId,
    /// Human override for the derived display name; empty means unset.
    pub custom_username: String,
    /// Shared secret gating connectivity. Mismatched secrets yield silent
    /// non-connectivity, not an error.
    pub password: Option<String>,
    pub relay_urls: Vec<String>,
    pub transcript_cap: usize,
}

impl RoomConfig {
    pub fn new(app_id: impl Into<String>, room_id: impl Into<String>, user_id: UserId) -> Self {
        Self {
            app_id: app_id.into(),
            room_id: room_id.into(),
            user_id,
            custom_username: String::new(),
            password: None,
            relay_urls: Vec::new(),
            transcript_cap: TRANSCRIPT_CAP,
        }
    }

    fn mesh_config(&self) -> MeshConfig {
        MeshConfig {
            app_id: self.app_id.clone(),
            password: self.password.clone(),
            relay_urls: self.relay_urls.clone(),
        }
    }

    fn is_private(&self) -> bool {
        self.password.is_some()
    }
}

/// External collaborators, injected by the application context.
#[derive(Clone)]
pub struct SessionDeps {
    pub transport: Arc<dyn MeshTransport>,
    pub crypto: Arc<dyn PeerCrypto>,
    pub transfer: Arc<dyn FileTransfer>,
    pub capture: Arc<dyn MediaCapture>,
    pub probe: Arc<dyn ConnectivityProbe>,
    pub events: Arc<dyn SessionEvents>,
}

/// How a peer connection is routed, per the transport's candidate stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    Direct,
    Relayed,
}

fn classify(pair: CandidatePair) -> ConnectionKind {
    if pair.local == CandidateKind::Relay || pair.remote == CandidateKind::Relay {
        ConnectionKind::Relayed
    } else {
        ConnectionKind::Direct
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn new_message_id() -> MessageId {
    let raw: u128 = rand::thread_rng().gen();
    MessageId(format!("{raw:032x}"))
}

/// Derive the name shown for a user: the custom override when set, else a
/// stable tag from the user id digest.
pub fn display_name(crypto: &dyn PeerCrypto, user_id: &UserId, custom_username: &str) -> String {
    if !custom_username.is_empty() {
        return custom_username.to_string();
    }
    let digest = crypto.digest(user_id.0.as_bytes());
    let tag: String = digest[..4].iter().map(|b| format!("{b:02x}")).collect();
    format!("peer-{tag}")
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct RoomSession {
    config: RoomConfig,
    mesh: Arc<dyn MeshSession>,
    crypto: Arc<dyn PeerCrypto>,
    transfer: Arc<dyn FileTransfer>,
    events: Arc<dyn SessionEvents>,
    peers: Arc<PeerRegistry>,
    transcript: Arc<TranscriptStore>,
    verifier: Arc<PeerVerifier>,
    audio: Arc<StreamCoordinator>,
    video: Arc<StreamCoordinator>,
    screen: Arc<StreamCoordinator>,
    offers: Arc<FileOfferCoordinator>,
    health: Arc<HealthMonitor>,
    typing: Arc<TypingIndicator>,
    join_handlers: Arc<HandlerRegistry<PeerId>>,
    leave_handlers: Arc<HandlerRegistry<PeerId>>,
    message_channel: ActionChannel<TranscriptEntry>,
    backfill_channel: ActionChannel<BackfillPayload>,
    metadata_channel: ActionChannel<PeerMetadata>,
    custom_username: Mutex<String>,
    shutdown: CancellationToken,
}

impl RoomSession {
    /// Join the room and spawn the session's background tasks. The returned
    /// handle is the public surface for the UI layer.
    pub async fn connect(deps: SessionDeps, config: RoomConfig) -> anyhow::Result<Arc<Self>> {
        let mesh = deps.transport.join(&config.mesh_config(), &config.room_id).await?;
        let shutdown = CancellationToken::new();

        // The session is the sole owner of the peer set and transcript.
        let peers = Arc::new(PeerRegistry::new());
        let transcript = Arc::new(TranscriptStore::new(
            config.transcript_cap,
            deps.transfer.clone(),
        ));
        let verifier = Arc::new(PeerVerifier::new(
            mesh.clone(),
            deps.crypto.clone(),
            peers.clone(),
            deps.events.clone(),
            shutdown.clone(),
        )?);
        let audio = StreamCoordinator::new(
            StreamKind::Audio,
            mesh.clone(),
            deps.capture.clone(),
            deps.events.clone(),
            shutdown.clone(),
        )?;
        let video = StreamCoordinator::new(
            StreamKind::Video,
            mesh.clone(),
            deps.capture.clone(),
            deps.events.clone(),
            shutdown.clone(),
        )?;
        let screen = StreamCoordinator::new(
            StreamKind::Screen,
            mesh.clone(),
            deps.capture.clone(),
            deps.events.clone(),
            shutdown.clone(),
        )?;
        let offers = Arc::new(FileOfferCoordinator::new(
            mesh.clone(),
            deps.transfer.clone(),
            peers.clone(),
            deps.events.clone(),
            transcript.clone(),
        )?);
        let health = HealthMonitor::new(deps.probe.clone(), mesh.clone(), deps.events.clone());
        health.clone().spawn(shutdown.clone());
        let typing = TypingIndicator::new(mesh.clone(), shutdown.clone())?;

        let session = Arc::new(Self {
            message_channel: ActionChannel::new(mesh.clone(), namespace::MESSAGE)?,
            backfill_channel: ActionChannel::new(mesh.clone(), namespace::BACKFILL)?,
            metadata_channel: ActionChannel::new(mesh.clone(), namespace::PEER_METADATA)?,
            custom_username: Mutex::new(config.custom_username.clone()),
            config,
            mesh,
            crypto: deps.crypto,
            transfer: deps.transfer,
            events: deps.events,
            peers,
            transcript,
            verifier,
            audio,
            video,
            screen,
            offers,
            health,
            typing,
            join_handlers: Arc::new(HandlerRegistry::new()),
            leave_handlers: Arc::new(HandlerRegistry::new()),
            shutdown,
        });

        session.clone().register_handlers();
        session.clone().spawn_dispatch_loop();
        Ok(session)
    }

    // -- Public surface -----------------------------------------------------

    /// Author a message to the whole room. Appends it unsent, then marks it
    /// sent once the local send completes.
    pub async fn send_message(&self, text: String) -> MessageId {
        self.send_chat_entry(
            TranscriptEntry::Message(Message {
                id: new_message_id(),
                author_id: self.config.user_id.clone(),
                text,
                time_sent: unix_millis(),
                time_received: None,
            }),
            Target::All,
        )
        .await
    }

    /// Author a message to a single peer.
    pub async fn send_direct_message(&self, to: &PeerId, text: String) -> MessageId {
        self.send_chat_entry(
            TranscriptEntry::Message(Message {
                id: new_message_id(),
                author_id: self.config.user_id.clone(),
                text,
                time_sent: unix_millis(),
                time_received: None,
            }),
            Target::One(to.clone()),
        )
        .await
    }

    /// Embed files in the transcript as inline media: hand them to the
    /// transfer capability and broadcast their content address as a chat
    /// entry.
    pub async fn send_inline_media(&self, files: Vec<OfferedFile>) -> anyhow::Result<MessageId> {
        let content_id = self.transfer.offer(files).await?;
        Ok(self
            .send_chat_entry(
                TranscriptEntry::Media(InlineMedia {
                    id: new_message_id(),
                    author_id: self.config.user_id.clone(),
                    content_id,
                    time_sent: unix_millis(),
                    time_received: None,
                }),
                Target::All,
            )
            .await)
    }

    pub async fn offer_files(&self, files: Vec<OfferedFile>) -> anyhow::Result<ContentId> {
        self.offers.offer(files).await
    }

    pub async fn stop_file_offer(&self) {
        self.offers.stop().await;
    }

    pub async fn enable_media(&self, kind: StreamKind) -> anyhow::Result<()> {
        self.coordinator(kind).enable().await
    }

    pub async fn disable_media(&self, kind: StreamKind) {
        self.coordinator(kind).disable().await;
    }

    pub fn is_media_enabled(&self, kind: StreamKind) -> bool {
        self.coordinator(kind).is_enabled()
    }

    /// Stream a peer currently plays back for the given kind, if any.
    pub fn remote_stream(&self, peer_id: &PeerId, kind: StreamKind) -> Option<MediaStream> {
        self.coordinator(kind).remote_stream(peer_id)
    }

    /// Record a local keystroke; the indicator clears itself after the
    /// trailing quiet period.
    pub async fn typing_keystroke(&self, kind: TypingKind) {
        self.typing.clone().keystroke(kind, Target::All).await;
    }

    pub async fn clear_typing(&self, kind: TypingKind) {
        self.typing.clear(kind, Target::All).await;
    }

    pub async fn set_custom_username(&self, name: String) {
        *self.custom_username.lock().unwrap() = name;
        self.announce_metadata(Target::All).await;
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.peers.peers()
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.transcript.snapshot()
    }

    pub fn health(&self) -> ConnectionHealth {
        self.health.snapshot()
    }

    pub fn local_file_offer(&self) -> Option<ContentId> {
        self.offers.local_offer()
    }

    /// Direct vs relayed, per the transport's selected candidate pair.
    pub fn peer_connection_kind(&self, peer_id: &PeerId) -> Option<ConnectionKind> {
        self.mesh.connection_stats(peer_id).map(classify)
    }

    pub fn display_name_of(&self, peer: &Peer) -> String {
        display_name(self.crypto.as_ref(), &peer.user_id, &peer.custom_username)
    }

    /// Tear the session down: flush handlers so late events are no-ops,
    /// stop local tracks, rescind all offers, clear state, and leave the
    /// transport.
    pub async fn leave(&self) {
        info!(room_id = %self.config.room_id, "Leaving room");
        self.shutdown.cancel();
        self.join_handlers.flush();
        self.leave_handlers.flush();
        self.verifier.cancel_all();

        self.audio.shutdown().await;
        self.video.shutdown().await;
        self.screen.shutdown().await;
        self.offers.rescind_all().await;

        self.transcript.clear();
        self.peers.clear();
        self.mesh.leave().await;
    }

    // -- Event dispatch -----------------------------------------------------

    fn register_handlers(self: Arc<Self>) {
        let join = &self.join_handlers;

        let s = self.clone();
        join.register(HandlerTag::Metadata, move |peer_id: PeerId| {
            let s = s.clone();
            async move { s.announce_metadata(Target::One(peer_id)).await }
        });
        for (tag, coordinator) in [
            (HandlerTag::AudioStreams, &self.audio),
            (HandlerTag::VideoStreams, &self.video),
            (HandlerTag::ScreenStreams, &self.screen),
        ] {
            let c = coordinator.clone();
            join.register(tag, move |peer_id: PeerId| {
                let c = c.clone();
                async move { c.on_peer_join(&peer_id).await }
            });
        }
        let offers = self.offers.clone();
        join.register(HandlerTag::FileOffers, move |peer_id: PeerId| {
            let offers = offers.clone();
            async move { offers.announce_to(&peer_id).await }
        });
        let s = self.clone();
        join.register(HandlerTag::Backfill, move |peer_id: PeerId| {
            let s = s.clone();
            async move { s.send_backfill_to(&peer_id).await }
        });

        let leave = &self.leave_handlers;

        let verifier = self.verifier.clone();
        leave.register(HandlerTag::Verification, move |peer_id: PeerId| {
            let verifier = verifier.clone();
            async move { verifier.cancel(&peer_id) }
        });
        for (tag, coordinator) in [
            (HandlerTag::AudioStreams, &self.audio),
            (HandlerTag::VideoStreams, &self.video),
            (HandlerTag::ScreenStreams, &self.screen),
        ] {
            let c = coordinator.clone();
            leave.register(tag, move |peer_id: PeerId| {
                let c = c.clone();
                async move { c.on_peer_leave(&peer_id).await }
            });
        }
        let offers = self.offers.clone();
        leave.register(HandlerTag::FileOffers, move |peer_id: PeerId| {
            let offers = offers.clone();
            async move { offers.on_peer_leave(&peer_id).await }
        });
    }

    fn spawn_dispatch_loop(self: Arc<Self>) {
        let session = self;
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = session.shutdown.cancelled() => break,
                    ev = session.mesh.next_event() => match ev {
                        Some(ev) => ev,
                        None => break,
                    },
                };
                session.handle_event(event).await;
            }
            debug!(room_id = %session.config.room_id, "Dispatch loop finished");
        });
    }

    async fn handle_event(&self, event: MeshEvent) {
        match event {
            MeshEvent::PeerJoined(peer_id) => self.handle_peer_join(peer_id).await,
            MeshEvent::PeerLeft(peer_id) => self.handle_peer_leave(peer_id).await,
            MeshEvent::Action {
                namespace,
                from,
                payload,
            } => self.handle_action(&namespace, &from, &payload).await,
            MeshEvent::Stream {
                from,
                stream,
                metadata,
            } => self.handle_stream(&from, stream, metadata.as_deref()).await,
        }
    }

    async fn handle_peer_join(&self, peer_id: PeerId) {
        // Register the record before any join handler runs, so a handler's
        // announcement can never race the receiver's bookkeeping.
        if !self.peers.insert(Peer::provisional(peer_id.clone())) {
            warn!(%peer_id, "Transport reported a join for an already-tracked peer");
            return;
        }
        info!(%peer_id, "Peer joined");
        self.join_handlers.dispatch(peer_id).await;
    }

    async fn handle_peer_leave(&self, peer_id: PeerId) {
        info!(%peer_id, "Peer left");
        self.leave_handlers.dispatch(peer_id.clone()).await;
        if self.peers.remove(&peer_id).is_some() {
            self.events.peer_left(&peer_id).await;
        }
    }

    async fn handle_action(&self, ns: &str, from: &PeerId, payload: &[u8]) {
        match ns {
            namespace::MESSAGE => self.handle_chat_entry(from, payload).await,
            namespace::BACKFILL => self.handle_backfill(from, payload).await,
            namespace::PEER_METADATA => self.handle_metadata(from, payload).await,
            namespace::AUDIO_STATE => self.handle_stream_status(StreamKind::Audio, from, payload).await,
            namespace::VIDEO_STATE => self.handle_stream_status(StreamKind::Video, from, payload).await,
            namespace::SCREEN_STATE => {
                self.handle_stream_status(StreamKind::Screen, from, payload).await
            }
            namespace::FILE_OFFER => self.offers.on_remote_offer(from, payload).await,
            namespace::TYPING => self.handle_typing(from, payload).await,
            namespace::VERIFY_ENCRYPTED => self.verifier.on_challenge(from, payload).await,
            namespace::VERIFY_RAW => self.verifier.on_response(from, payload).await,
            other => debug!(namespace = other, %from, "Ignoring unknown action namespace"),
        }
    }

    async fn handle_chat_entry(&self, from: &PeerId, payload: &[u8]) {
        let mut entry = match ActionChannel::<TranscriptEntry>::decode(payload) {
            Ok(e) => e,
            Err(e) => {
                warn!(%from, "Malformed chat entry: {e}");
                return;
            }
        };
        if !entry.is_sent() {
            entry.mark_received(unix_millis());
        }
        self.transcript.append(entry.clone()).await;
        self.events.transcript_appended(&entry).await;
    }

    async fn handle_backfill(&self, from: &PeerId, payload: &[u8]) {
        if self.config.is_private() {
            debug!(%from, "Ignoring backfill in a password-protected room");
            return;
        }
        let BackfillPayload { entries } = match ActionChannel::<BackfillPayload>::decode(payload) {
            Ok(p) => p,
            Err(e) => {
                warn!(%from, "Malformed backfill: {e}");
                return;
            }
        };
        // Only already-received entries may enter via backfill.
        let entries: Vec<TranscriptEntry> =
            entries.into_iter().filter(TranscriptEntry::is_sent).collect();
        if self.transcript.set_all(entries).await {
            info!(%from, len = self.transcript.len(), "Applied transcript backfill");
            self.events
                .transcript_replaced(&self.transcript.snapshot())
                .await;
        } else {
            debug!(%from, "Ignoring backfill: transcript already populated");
        }
    }

    async fn handle_metadata(&self, from: &PeerId, payload: &[u8]) {
        let meta = match ActionChannel::<PeerMetadata>::decode(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(%from, "Malformed peer metadata: {e}");
                return;
            }
        };
        let parsed_key = match self.crypto.parse_key(&meta.public_key) {
            Ok(k) => Some(k),
            Err(e) => {
                warn!(%from, "Unparseable public key in metadata: {e}");
                None
            }
        };

        let mut learned_key = None;
        let updated = self.peers.update(from, |p| {
            p.user_id = meta.user_id.clone();
            p.custom_username = meta.custom_username.clone();
            if p.public_key.is_none() {
                p.public_key = parsed_key;
                learned_key = parsed_key;
            }
        });
        if updated.is_none() {
            warn!(%from, "Metadata from an untracked peer");
            return;
        }

        // Verification runs exactly once per join: only a key learned on a
        // fresh record starts a challenge.
        if let Some(key) = learned_key {
            self.verifier.clone().begin(from, key).await;
        }
        if let Some(peer) = self.peers.get(from) {
            self.events.peer_updated(&peer).await;
        }
    }

    async fn handle_stream_status(&self, kind: StreamKind, from: &PeerId, payload: &[u8]) {
        let status = match ActionChannel::<crate::domain::wire::StreamStatus>::decode(payload) {
            Ok(s) => s,
            Err(e) => {
                warn!(%from, "Malformed stream status: {e}");
                return;
            }
        };
        self.coordinator(kind).on_remote_status(from, status).await;
        let updated = self.peers.update(from, |p| {
            p.set_stream_state(kind, status == crate::domain::wire::StreamStatus::Enabled);
        });
        if let Some(peer) = updated {
            self.events.peer_updated(&peer).await;
        }
    }

    async fn handle_typing(&self, from: &PeerId, payload: &[u8]) {
        let TypingPayload { kind, is_typing } =
            match ActionChannel::<TypingPayload>::decode(payload) {
                Ok(p) => p,
                Err(e) => {
                    warn!(%from, "Malformed typing payload: {e}");
                    return;
                }
            };
        let updated = self.peers.update(from, |p| p.set_typing(kind, is_typing));
        if let Some(peer) = updated {
            self.events.peer_updated(&peer).await;
        }
    }

    async fn handle_stream(&self, from: &PeerId, stream: MediaStream, metadata: Option<&[u8]>) {
        let kind = metadata
            .and_then(|m| ActionChannel::<StreamMetadata>::decode(m).ok())
            .map(|m| m.kind)
            .unwrap_or_else(|| {
                // No sideband metadata (or it lost the race): fall back to
                // the track composition.
                if stream.has_track(TrackKind::Audio) && !stream.has_track(TrackKind::Video) {
                    StreamKind::Audio
                } else {
                    StreamKind::Video
                }
            });
        self.coordinator(kind).on_remote_stream(from, stream).await;
    }

    // -- Internals ----------------------------------------------------------

    fn coordinator(&self, kind: StreamKind) -> &Arc<StreamCoordinator> {
        match kind {
            StreamKind::Audio => &self.audio,
            StreamKind::Video => &self.video,
            StreamKind::Screen => &self.screen,
        }
    }

    async fn send_chat_entry(&self, entry: TranscriptEntry, to: Target) -> MessageId {
        let id = entry.id().clone();
        self.transcript.append(entry.clone()).await;
        self.events.transcript_appended(&entry).await;

        self.message_channel.send(&entry, to).await;

        // The send call has completed: the entry transitions to "sent".
        if let Some(updated) = self.transcript.mark_sent(&id, unix_millis()) {
            self.events.transcript_updated(&updated).await;
        }
        id
    }

    async fn announce_metadata(&self, to: Target) {
        let meta = PeerMetadata {
            user_id: self.config.user_id.clone(),
            custom_username: self.custom_username.lock().unwrap().clone(),
            public_key: self.crypto.stringify_key(&self.crypto.public_key()),
        };
        self.metadata_channel.send(&meta, to).await;
    }

    /// Ship the existing transcript to a newly joined peer. Password-
    /// protected rooms never backfill; unsent entries never travel.
    async fn send_backfill_to(&self, peer_id: &PeerId) {
        if self.config.is_private() {
            return;
        }
        let entries = self.transcript.sent_entries();
        if entries.is_empty() {
            return;
        }
        self.backfill_channel
            .send(&BackfillPayload { entries }, Target::One(peer_id.clone()))
            .await;
    }
}
