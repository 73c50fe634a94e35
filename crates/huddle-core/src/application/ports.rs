//! Port traits (interfaces) that the session layer depends on.
//!
//! Adapters implement these traits; the application never references a
//! concrete transport, crypto library, or capture device.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::chat::{ContentId, TranscriptEntry};
use crate::domain::peer::{Peer, PeerId, PublicKey, StreamKind};

// ---------------------------------------------------------------------------
// Mesh transport (peer discovery + typed channels + streams)
// ---------------------------------------------------------------------------

/// Send target for actions and stream operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    All,
    One(PeerId),
    Many(Vec<PeerId>),
}

impl Target {
    pub fn includes(&self, peer: &PeerId) -> bool {
        match self {
            Target::All => true,
            Target::One(p) => p == peer,
            Target::Many(ps) => ps.contains(peer),
        }
    }
}

/// Identifies a media stream across attach/detach calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

impl StreamKind {
    /// The track kind a stream of this channel type must carry to be usable.
    pub fn track_kind(self) -> TrackKind {
        match self {
            StreamKind::Audio => TrackKind::Audio,
            StreamKind::Video | StreamKind::Screen => TrackKind::Video,
        }
    }
}

/// A media stream handle: the session layer only cares about its identity
/// and which track kinds it carries. Capture and playout are external.
#[derive(Debug, Clone)]
pub struct MediaStream {
    pub id: StreamId,
    pub tracks: Vec<TrackKind>,
}

impl MediaStream {
    pub fn has_track(&self, kind: TrackKind) -> bool {
        self.tracks.contains(&kind)
    }
}

/// ICE-style candidate classification reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    Host,
    ServerReflexive,
    Relay,
}

/// The selected candidate pair for one peer connection.
#[derive(Debug, Clone, Copy)]
pub struct CandidatePair {
    pub local: CandidateKind,
    pub remote: CandidateKind,
}

/// State of one signaling (tracker) socket held by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingSocketState {
    Connecting,
    Open,
    Closed,
}

/// Everything the transport can report to the session.
#[derive(Debug, Clone)]
pub enum MeshEvent {
    PeerJoined(PeerId),
    PeerLeft(PeerId),
    /// A payload arrived on a named action channel.
    Action {
        namespace: String,
        from: PeerId,
        payload: Bytes,
    },
    /// An inbound media stream, with optional sideband metadata. The
    /// transport delivers stream data and metadata through
    /// independently-ordered channels.
    Stream {
        from: PeerId,
        stream: MediaStream,
        metadata: Option<Bytes>,
    },
}

/// Connection and discovery parameters handed to the transport on join.
/// A mismatched `password` yields silent non-connectivity, not an error.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    pub app_id: String,
    pub password: Option<String>,
    pub relay_urls: Vec<String>,
}

/// One joined room on the mesh: typed channels, membership events, and
/// stream attach/detach. Owned exclusively by a single room session.
#[async_trait]
pub trait MeshSession: Send + Sync {
    /// Fire-and-forget send on a named channel. Unicast, multicast, or
    /// broadcast per `to`. No acknowledgement, no retry.
    async fn send_action(&self, namespace: &str, to: Target, payload: Bytes) -> anyhow::Result<()>;

    /// Next membership/action/stream event, or `None` once the room is left.
    /// Per-sender arrival order within one namespace is preserved; no order
    /// is guaranteed across namespaces.
    async fn next_event(&self) -> Option<MeshEvent>;

    async fn add_stream(
        &self,
        stream: MediaStream,
        to: Target,
        metadata: Option<Bytes>,
    ) -> anyhow::Result<()>;

    async fn remove_stream(&self, stream: StreamId, to: Target) -> anyhow::Result<()>;

    fn peers(&self) -> Vec<PeerId>;

    /// Selected candidate pair for a peer, used to classify direct vs
    /// relayed connectivity. `None` while unknown.
    fn connection_stats(&self, peer: &PeerId) -> Option<CandidatePair>;

    fn signaling_states(&self) -> Vec<SignalingSocketState>;

    async fn leave(&self);
}

/// Factory for joined rooms.
#[async_trait]
pub trait MeshTransport: Send + Sync {
    async fn join(&self, config: &MeshConfig, room_id: &str)
        -> anyhow::Result<Arc<dyn MeshSession>>;
}

// ---------------------------------------------------------------------------
// Crypto capability (consumed, never implemented here)
// ---------------------------------------------------------------------------

/// Asymmetric encrypt/decrypt + digest, as supplied by the crypto
/// collaborator. The session layer treats keys and ciphertext as opaque.
pub trait PeerCrypto: Send + Sync {
    fn public_key(&self) -> PublicKey;

    /// Encrypt `plaintext` so only the holder of `key`'s private half can
    /// read it.
    fn encrypt_for(&self, key: &PublicKey, plaintext: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// Decrypt a ciphertext addressed to our own key.
    fn decrypt(&self, ciphertext: &[u8]) -> anyhow::Result<Vec<u8>>;

    fn digest(&self, data: &[u8]) -> [u8; 32];

    fn stringify_key(&self, key: &PublicKey) -> String;

    fn parse_key(&self, s: &str) -> anyhow::Result<PublicKey>;
}

// ---------------------------------------------------------------------------
// File transfer capability (offer lifecycle only)
// ---------------------------------------------------------------------------

/// A file handed to the transfer collaborator for offering.
#[derive(Debug, Clone)]
pub struct OfferedFile {
    pub name: String,
    pub mime: String,
    pub data: Bytes,
}

impl OfferedFile {
    /// Whether the file can be rendered inline in the transcript.
    pub fn is_inline_renderable(&self) -> bool {
        ["image/", "audio/", "video/"]
            .iter()
            .any(|p| self.mime.starts_with(p))
    }
}

/// Content-addressed file transfer. Offer/download internals are out of
/// scope; only the offer lifecycle is driven from here.
#[async_trait]
pub trait FileTransfer: Send + Sync {
    async fn offer(&self, files: Vec<OfferedFile>) -> anyhow::Result<ContentId>;

    /// Withdraw an offer. Rescinding an unknown or already-rescinded id is
    /// an idempotent no-op.
    async fn rescind(&self, id: &ContentId);

    fn is_offering(&self, id: &ContentId) -> bool;
}

// ---------------------------------------------------------------------------
// Media capture (external capability)
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MediaCapture: Send + Sync {
    /// Acquire a local stream for the given channel kind.
    async fn acquire(&self, kind: StreamKind) -> anyhow::Result<MediaStream>;

    /// Stop all local tracks of a previously acquired stream.
    async fn stop(&self, stream: StreamId);
}

// ---------------------------------------------------------------------------
// Connectivity probe (health monitor collaborator)
// ---------------------------------------------------------------------------

/// Which candidate classes a throwaway probe connection gathered before
/// `expiry`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProbeReport {
    pub saw_host: bool,
    pub saw_relay: bool,
}

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn probe(&self, expiry: Duration) -> anyhow::Result<ProbeReport>;
}

// ---------------------------------------------------------------------------
// Mount-throttle persistence
// ---------------------------------------------------------------------------

/// The two persisted counters driving the mount throttle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThrottleRecord {
    pub last_mount_ms: Option<u64>,
    pub backoff_ms: u64,
}

/// Tab/session-scoped storage for [`ThrottleRecord`].
pub trait ThrottleStore: Send + Sync {
    fn load(&self) -> ThrottleRecord;
    fn save(&self, record: ThrottleRecord);
}

// ---------------------------------------------------------------------------
// Session events (UI bridge)
// ---------------------------------------------------------------------------

/// Derived connectivity health, surfaced as an indicator rather than an
/// error (spectrum: degraded, never fatal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionHealth {
    pub has_host: bool,
    pub has_relay: bool,
    pub tracker: TrackerState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Searching,
    Connected,
    Failed,
}

/// Emits session happenings toward the UI layer.
#[async_trait]
pub trait SessionEvents: Send + Sync {
    async fn peer_updated(&self, peer: &Peer);
    async fn peer_left(&self, peer_id: &PeerId);
    async fn transcript_appended(&self, entry: &TranscriptEntry);
    /// An existing entry changed in place (unsent → sent transition).
    async fn transcript_updated(&self, entry: &TranscriptEntry);
    async fn transcript_replaced(&self, entries: &[TranscriptEntry]);
    async fn health_changed(&self, health: ConnectionHealth);
    async fn remote_stream_added(&self, peer_id: &PeerId, kind: StreamKind);
    async fn remote_stream_removed(&self, peer_id: &PeerId, kind: StreamKind);
}
