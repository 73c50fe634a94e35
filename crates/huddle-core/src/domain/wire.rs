//! Action-channel payload types and namespace identifiers.
//!
//! These travel over the mesh transport's typed broadcast channels, encoded
//! as CBOR. Pure data — no I/O.

use serde::{Deserialize, Serialize};

use super::chat::{ContentId, TranscriptEntry};
use super::peer::{StreamKind, TypingKind, UserId};

// ---------------------------------------------------------------------------
// Namespaces
// ---------------------------------------------------------------------------

/// The transport enforces a tight bound on channel identifiers.
pub const MAX_NAMESPACE_LEN: usize = 12;

/// Channel namespaces used by the session. All must fit
/// [`MAX_NAMESPACE_LEN`] bytes.
pub mod namespace {
    /// Chat messages and inline media.
    pub const MESSAGE: &str = "message";
    /// Transcript backfill for newly joined peers.
    pub const BACKFILL: &str = "msgBackfill";
    /// Self-asserted peer metadata (user id, username, public key).
    pub const PEER_METADATA: &str = "peerMeta";
    pub const AUDIO_STATE: &str = "audioState";
    pub const VIDEO_STATE: &str = "videoState";
    pub const SCREEN_STATE: &str = "screenState";
    pub const FILE_OFFER: &str = "fileOffer";
    pub const TYPING: &str = "typing";
    /// Verification challenge, encrypted to the target's public key.
    pub const VERIFY_ENCRYPTED: &str = "verifyEnc";
    /// Decrypted verification token echoed back to the challenger.
    pub const VERIFY_RAW: &str = "verifyRaw";

    pub const ALL: &[&str] = &[
        MESSAGE,
        BACKFILL,
        PEER_METADATA,
        AUDIO_STATE,
        VIDEO_STATE,
        SCREEN_STATE,
        FILE_OFFER,
        TYPING,
        VERIFY_ENCRYPTED,
        VERIFY_RAW,
    ];
}

impl StreamKind {
    /// Namespace of the state-change channel for this media kind.
    pub fn state_namespace(self) -> &'static str {
        match self {
            StreamKind::Audio => namespace::AUDIO_STATE,
            StreamKind::Video => namespace::VIDEO_STATE,
            StreamKind::Screen => namespace::SCREEN_STATE,
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Announced by every peer after a join (its own and others'). The public
/// key travels in the crypto collaborator's stringified form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerMetadata {
    pub user_id: UserId,
    pub custom_username: String,
    pub public_key: String,
}

/// State-change broadcast for one media channel kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamStatus {
    Enabled,
    Disabled,
}

/// Sideband metadata attached to a stream handed to the transport, so the
/// receiver can tell a screen share from a webcam stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub kind: StreamKind,
}

/// Current file offer of the sender; `None` clears a previous offer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOfferPayload {
    pub content_id: Option<ContentId>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TypingPayload {
    pub kind: TypingKind,
    pub is_typing: bool,
}

/// Already-received transcript entries shipped to a newly joined peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillPayload {
    pub entries: Vec<TranscriptEntry>,
}

/// Raw token bytes for either verification channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPayload {
    pub token: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaces_fit_transport_bound() {
        for ns in namespace::ALL {
            assert!(
                ns.len() <= MAX_NAMESPACE_LEN,
                "namespace {ns:?} exceeds {MAX_NAMESPACE_LEN} bytes"
            );
        }
    }
}
