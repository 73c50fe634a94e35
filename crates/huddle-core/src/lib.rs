//! huddle-core — peer room session layer over an ad-hoc mesh transport.
//!
//! # Architecture (Clean Architecture)
//!
//! - **domain**: peers, transcript entries, wire payloads (no I/O).
//! - **application**: the room session orchestrator, verification protocol,
//!   media/file-offer coordinators, health monitor, and the port traits
//!   they depend on.
//! - **adapters**: sealed-box crypto (X25519 + ChaCha20-Poly1305),
//!   in-memory registries, and a simulated in-process mesh.

pub mod adapters;
pub mod application;
pub mod domain;

use tracing_subscriber::EnvFilter;

/// Install the default tracing subscriber (`RUST_LOG`-style filtering,
/// "info" fallback). For host binaries and local debugging.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

pub use application::ports::{
    ConnectionHealth, MeshConfig, MeshEvent, MeshSession, MeshTransport, OfferedFile, Target,
    TrackerState,
};
pub use application::registry::SessionRegistry;
pub use application::room_session::{ConnectionKind, RoomConfig, RoomSession, SessionDeps};
pub use domain::chat::{ContentId, InlineMedia, Message, MessageId, TranscriptEntry};
pub use domain::peer::{Peer, PeerId, StreamKind, TypingKind, UserId, VerificationState};
