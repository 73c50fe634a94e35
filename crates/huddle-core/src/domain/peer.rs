//! Peer identifiers and per-peer session state.
//!
//! These are **pure data** — no I/O, no framework dependencies.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Transport-assigned peer identifier, unique for the lifetime of the
/// connection. Not stable across reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable self-asserted identifier, used for display-name derivation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

/// An asymmetric public key (32 bytes), opaque to the session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 32]);

// ---------------------------------------------------------------------------
// Per-peer state flags
// ---------------------------------------------------------------------------

/// Outcome of the challenge/response authentication of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationState {
    Verifying,
    Verified,
    Unverified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioState {
    Playing,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoState {
    Playing,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScreenShareState {
    Sharing,
    NotSharing,
}

/// Which media channel a stream belongs to. One coordinator exists per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Audio,
    Video,
    Screen,
}

/// Which transcript a typing indicator refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypingKind {
    Group,
    Direct,
}

// ---------------------------------------------------------------------------
// Peer record
// ---------------------------------------------------------------------------

/// One remote session participant, as tracked by the room session.
///
/// A record is created when the transport reports the join (provisional,
/// `user_id` empty) and filled in on first metadata receipt; it is destroyed
/// only when the peer leaves. Verification failure changes
/// [`VerificationState`], it never removes the record.
#[derive(Debug, Clone)]
pub struct Peer {
    pub peer_id: PeerId,
    pub user_id: UserId,
    /// Human override for the derived display name; empty means unset.
    pub custom_username: String,
    pub public_key: Option<PublicKey>,
    pub verification: VerificationState,
    /// Locally-generated random challenge sent to this peer.
    pub verification_token: Vec<u8>,
    pub audio: AudioState,
    pub video: VideoState,
    pub screen: ScreenShareState,
    /// Content-address of a file offer currently advertised by this peer.
    pub offered_file_id: Option<crate::domain::chat::ContentId>,
    pub is_typing_group: bool,
    pub is_typing_direct: bool,
}

impl Peer {
    /// A provisional record for a peer the transport just reported, before
    /// its metadata has arrived.
    pub fn provisional(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            user_id: UserId(String::new()),
            custom_username: String::new(),
            public_key: None,
            verification: VerificationState::Verifying,
            verification_token: Vec::new(),
            audio: AudioState::Stopped,
            video: VideoState::Stopped,
            screen: ScreenShareState::NotSharing,
            offered_file_id: None,
            is_typing_group: false,
            is_typing_direct: false,
        }
    }

    /// Metadata has been received at least once.
    pub fn has_metadata(&self) -> bool {
        !self.user_id.0.is_empty()
    }

    /// Apply a remote media-state change for the given channel kind.
    pub fn set_stream_state(&mut self, kind: StreamKind, enabled: bool) {
        match kind {
            StreamKind::Audio => {
                self.audio = if enabled { AudioState::Playing } else { AudioState::Stopped };
            }
            StreamKind::Video => {
                self.video = if enabled { VideoState::Playing } else { VideoState::Stopped };
            }
            StreamKind::Screen => {
                self.screen = if enabled {
                    ScreenShareState::Sharing
                } else {
                    ScreenShareState::NotSharing
                };
            }
        }
    }

    pub fn set_typing(&mut self, kind: TypingKind, typing: bool) {
        match kind {
            TypingKind::Group => self.is_typing_group = typing,
            TypingKind::Direct => self.is_typing_direct = typing,
        }
    }
}
