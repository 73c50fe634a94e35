//! Challenge/response verification of a peer's claimed public key.
//!
//! Each peer is challenged independently and exactly once per join. The
//! challenger encrypts a random token to the claimed key; only the true key
//! holder can decrypt and echo it. Every failure path is a local state
//! transition to `Unverified` plus a log line — nothing is thrown past this
//! component (degraded trust is a user-visible state, not an error).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::RngCore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain::peer::{PeerId, PublicKey, VerificationState};
use crate::domain::wire::{namespace, TokenPayload};

use super::channel::ActionChannel;
use super::peers::PeerRegistry;
use super::ports::{MeshSession, PeerCrypto, SessionEvents, Target};

/// How long a challenge may stay unanswered before the peer is marked
/// `Unverified`.
pub const VERIFICATION_TIMEOUT: Duration = Duration::from_secs(10);

const TOKEN_LEN: usize = 32;

pub struct PeerVerifier {
    crypto: Arc<dyn PeerCrypto>,
    peers: Arc<PeerRegistry>,
    events: Arc<dyn SessionEvents>,
    encrypted: ActionChannel<TokenPayload>,
    raw: ActionChannel<TokenPayload>,
    /// Per-peer timeout guards. The only component-local timer state in the
    /// session; always cleared on success and on peer removal.
    timers: Mutex<HashMap<PeerId, CancellationToken>>,
    shutdown: CancellationToken,
}

impl PeerVerifier {
    pub fn new(
        mesh: Arc<dyn MeshSession>,
        crypto: Arc<dyn PeerCrypto>,
        peers: Arc<PeerRegistry>,
        events: Arc<dyn SessionEvents>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            crypto,
            peers,
            events,
            encrypted: ActionChannel::new(mesh.clone(), namespace::VERIFY_ENCRYPTED)?,
            raw: ActionChannel::new(mesh, namespace::VERIFY_RAW)?,
            timers: Mutex::new(HashMap::new()),
            shutdown,
        })
    }

    /// Challenge a peer whose public key was just learned. No-op if a
    /// challenge for this peer is already in flight or resolved.
    pub async fn begin(self: Arc<Self>, peer_id: &PeerId, claimed_key: PublicKey) {
        {
            let timers = self.timers.lock().unwrap();
            if timers.contains_key(peer_id) {
                return;
            }
        }

        let mut token = vec![0u8; TOKEN_LEN];
        rand::thread_rng().fill_bytes(&mut token);

        let stored = self.peers.update(peer_id, |p| {
            p.verification = VerificationState::Verifying;
            p.verification_token = token.clone();
        });
        if stored.is_none() {
            warn!(%peer_id, "Cannot verify an untracked peer");
            return;
        }

        let ciphertext = match self.crypto.encrypt_for(&claimed_key, &token) {
            Ok(ct) => ct,
            Err(e) => {
                warn!(%peer_id, "Failed to encrypt verification token: {e}");
                self.resolve(peer_id, VerificationState::Unverified).await;
                return;
            }
        };

        let guard = CancellationToken::new();
        self.timers
            .lock()
            .unwrap()
            .insert(peer_id.clone(), guard.clone());

        self.encrypted
            .send(&TokenPayload { token: ciphertext }, Target::One(peer_id.clone()))
            .await;

        let verifier = self.clone();
        let peer_id = peer_id.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = guard.cancelled() => {}
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(VERIFICATION_TIMEOUT) => {
                    warn!(%peer_id, "Verification timed out");
                    verifier.timers.lock().unwrap().remove(&peer_id);
                    verifier.resolve(&peer_id, VerificationState::Unverified).await;
                }
            }
        });
    }

    /// Remote side of the protocol: decrypt an incoming challenge with our
    /// private key and echo the plaintext back to the challenger. Decrypt
    /// failure is logged and silently dropped — verification is
    /// unidirectional per challenger, so no local state changes here.
    pub async fn on_challenge(&self, from: &PeerId, payload: &[u8]) {
        let TokenPayload { token: ciphertext } = match ActionChannel::<TokenPayload>::decode(payload)
        {
            Ok(p) => p,
            Err(e) => {
                warn!(%from, "Malformed verification challenge: {e}");
                return;
            }
        };
        match self.crypto.decrypt(&ciphertext) {
            Ok(plaintext) => {
                self.raw
                    .send(&TokenPayload { token: plaintext }, Target::One(from.clone()))
                    .await;
            }
            Err(e) => {
                warn!(%from, "Failed to decrypt verification token: {e}");
            }
        }
    }

    /// Challenger side: compare the echoed token byte-for-byte against the
    /// one stored for this peer. Mismatch resolves immediately — it does
    /// not wait for the timeout.
    pub async fn on_response(&self, from: &PeerId, payload: &[u8]) {
        let TokenPayload { token: echoed } = match ActionChannel::<TokenPayload>::decode(payload) {
            Ok(p) => p,
            Err(e) => {
                warn!(%from, "Malformed verification response: {e}");
                return;
            }
        };
        let Some(peer) = self.peers.get(from) else {
            warn!(%from, "Verification response from an untracked peer");
            return;
        };
        if peer.verification != VerificationState::Verifying {
            // Already resolved; a re-verification is not performed unless
            // the peer record is recreated.
            return;
        }

        self.cancel_timer(from);
        if !peer.verification_token.is_empty() && peer.verification_token == echoed {
            info!(%from, "Peer verified");
            self.resolve(from, VerificationState::Verified).await;
        } else {
            error!(%from, "Verification token mismatch");
            self.resolve(from, VerificationState::Unverified).await;
        }
    }

    /// Forget the per-peer timer (peer removal path).
    pub fn cancel(&self, peer_id: &PeerId) {
        self.cancel_timer(peer_id);
    }

    pub fn cancel_all(&self) {
        let mut timers = self.timers.lock().unwrap();
        for (_, guard) in timers.drain() {
            guard.cancel();
        }
    }

    fn cancel_timer(&self, peer_id: &PeerId) {
        if let Some(guard) = self.timers.lock().unwrap().remove(peer_id) {
            guard.cancel();
        }
    }

    async fn resolve(&self, peer_id: &PeerId, state: VerificationState) {
        let updated = self.peers.update(peer_id, |p| {
            p.verification = state;
        });
        if let Some(peer) = updated {
            self.events.peer_updated(&peer).await;
        }
    }
}
