//! Transcript entry types: chat messages and inline media.
//!
//! Pure data — no I/O. The bounded transcript container itself lives in the
//! application layer because eviction has a resource-cleanup side effect.

use serde::{Deserialize, Serialize};

use super::peer::UserId;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Unique id of a transcript entry, assigned by its author.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

/// Content-address of a file offer (magnet-style URI). Opaque, derived from
/// file content by the transfer collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentId(pub String);

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// A chat message. `time_received == None` means the message is **unsent**:
/// authored locally but not yet round-tripped through the transport. The
/// same id transitions to "sent" when `time_received` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub author_id: UserId,
    pub text: String,
    /// Milliseconds since the Unix epoch, stamped by the author.
    pub time_sent: u64,
    pub time_received: Option<u64>,
}

/// Media embedded directly in the transcript, fetched by content address.
/// Shares the sent/unsent duality of [`Message`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineMedia {
    pub id: MessageId,
    pub author_id: UserId,
    pub content_id: ContentId,
    pub time_sent: u64,
    pub time_received: Option<u64>,
}

/// One entry of the room transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TranscriptEntry {
    Message(Message),
    Media(InlineMedia),
}

impl TranscriptEntry {
    pub fn id(&self) -> &MessageId {
        match self {
            Self::Message(m) => &m.id,
            Self::Media(m) => &m.id,
        }
    }

    pub fn author_id(&self) -> &UserId {
        match self {
            Self::Message(m) => &m.author_id,
            Self::Media(m) => &m.author_id,
        }
    }

    /// Whether the entry has completed its local send round-trip.
    pub fn is_sent(&self) -> bool {
        match self {
            Self::Message(m) => m.time_received.is_some(),
            Self::Media(m) => m.time_received.is_some(),
        }
    }

    pub fn mark_received(&mut self, time: u64) {
        match self {
            Self::Message(m) => m.time_received = Some(time),
            Self::Media(m) => m.time_received = Some(time),
        }
    }

    /// Content address, for inline media entries only.
    pub fn content_id(&self) -> Option<&ContentId> {
        match self {
            Self::Message(_) => None,
            Self::Media(m) => Some(&m.content_id),
        }
    }
}
