//! End-to-end session tests over the simulated in-process mesh.
//!
//! All tests run under a paused clock: timers (verification timeout,
//! settling delay, typing clear, probe interval) are virtual and advance
//! only through explicit sleeps.

use std::sync::Arc;
use std::time::Duration;

use huddle_core::adapters::capture::StubMediaCapture;
use huddle_core::adapters::crypto::SealedBoxCrypto;
use huddle_core::adapters::events::RecordingSessionEvents;
use huddle_core::adapters::mesh::SimMeshHub;
use huddle_core::adapters::probe::StaticConnectivityProbe;
use huddle_core::adapters::throttle::InMemoryThrottleStore;
use huddle_core::adapters::transfer::InMemoryFileTransfer;
use huddle_core::application::ports::{
    CandidateKind, CandidatePair, FileTransfer, PeerCrypto, SignalingSocketState, TrackerState,
};
use huddle_core::domain::peer::{
    AudioState, PublicKey, VerificationState,
};
use huddle_core::{
    ConnectionKind, OfferedFile, Peer, RoomConfig, RoomSession, SessionDeps, SessionRegistry,
    StreamKind, TypingKind, UserId,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

struct Fixture {
    deps: SessionDeps,
    transfer: Arc<InMemoryFileTransfer>,
    probe: Arc<StaticConnectivityProbe>,
    capture: Arc<StubMediaCapture>,
    #[allow(dead_code)]
    events: Arc<RecordingSessionEvents>,
}

fn fixture_with_crypto(hub: &Arc<SimMeshHub>, crypto: Arc<dyn PeerCrypto>) -> Fixture {
    let transfer = Arc::new(InMemoryFileTransfer::new());
    let probe = Arc::new(StaticConnectivityProbe::default());
    let capture = Arc::new(StubMediaCapture::new());
    let events = Arc::new(RecordingSessionEvents::new());
    let deps = SessionDeps {
        transport: hub.clone(),
        crypto,
        transfer: transfer.clone(),
        capture: capture.clone(),
        probe: probe.clone(),
        events: events.clone(),
    };
    Fixture {
        deps,
        transfer,
        probe,
        capture,
        events,
    }
}

fn fixture(hub: &Arc<SimMeshHub>) -> Fixture {
    fixture_with_crypto(hub, Arc::new(SealedBoxCrypto::generate()))
}

fn room(user: &str) -> RoomConfig {
    RoomConfig::new("app", "lobby", UserId(user.into()))
}

/// Let the dispatch loops drain their queues (auto-advance under the
/// paused clock runs every ready task first).
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn only_peer(session: &RoomSession) -> Peer {
    let peers = session.peers();
    assert_eq!(peers.len(), 1, "expected exactly one peer");
    peers[0].clone()
}

fn text_file() -> OfferedFile {
    OfferedFile {
        name: "notes.txt".into(),
        mime: "text/plain".into(),
        data: b"notes".as_ref().into(),
    }
}

fn image_file() -> OfferedFile {
    OfferedFile {
        name: "pic.png".into(),
        mime: "image/png".into(),
        data: b"png".as_ref().into(),
    }
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn peers_verify_each_other_and_exchange_messages() {
    let hub = SimMeshHub::new();
    let a = RoomSession::connect(fixture(&hub).deps, room("alice"))
        .await
        .unwrap();
    let b = RoomSession::connect(fixture(&hub).deps, room("bob"))
        .await
        .unwrap();
    settle().await;

    let b_seen_by_a = only_peer(&a);
    assert_eq!(b_seen_by_a.user_id, UserId("bob".into()));
    assert_eq!(b_seen_by_a.verification, VerificationState::Verified);
    assert_eq!(only_peer(&b).verification, VerificationState::Verified);

    // The challenge timer was cancelled on success: its original expiry
    // passing changes nothing.
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(only_peer(&a).verification, VerificationState::Verified);

    a.send_message("hi from alice".into()).await;
    settle().await;

    let transcript = b.transcript();
    assert_eq!(transcript.len(), 1);
    assert!(transcript[0].is_sent());
    // The author's own copy transitioned to sent as well.
    assert!(a.transcript()[0].is_sent());
}

/// Delegates to a real keypair but answers every challenge with garbage.
struct LyingCrypto(SealedBoxCrypto);

impl PeerCrypto for LyingCrypto {
    fn public_key(&self) -> PublicKey {
        self.0.public_key()
    }
    fn encrypt_for(&self, key: &PublicKey, plaintext: &[u8]) -> anyhow::Result<Vec<u8>> {
        self.0.encrypt_for(key, plaintext)
    }
    fn decrypt(&self, _ciphertext: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(vec![0u8; 32])
    }
    fn digest(&self, data: &[u8]) -> [u8; 32] {
        self.0.digest(data)
    }
    fn stringify_key(&self, key: &PublicKey) -> String {
        self.0.stringify_key(key)
    }
    fn parse_key(&self, s: &str) -> anyhow::Result<PublicKey> {
        self.0.parse_key(s)
    }
}

#[tokio::test(start_paused = true)]
async fn token_mismatch_is_unverified_immediately() {
    let hub = SimMeshHub::new();
    let a = RoomSession::connect(fixture(&hub).deps, room("alice"))
        .await
        .unwrap();
    let liar = fixture_with_crypto(&hub, Arc::new(LyingCrypto(SealedBoxCrypto::generate())));
    let b = RoomSession::connect(liar.deps, room("mallory")).await.unwrap();
    settle().await;

    // Resolution must not have waited for the 10 s timeout.
    assert_eq!(only_peer(&a).verification, VerificationState::Unverified);
    // The liar still verified us fine; the protocol is one-sided.
    assert_eq!(only_peer(&b).verification, VerificationState::Verified);
}

/// Delegates to a real keypair but cannot decrypt anything addressed to it.
struct DeafCrypto(SealedBoxCrypto);

impl PeerCrypto for DeafCrypto {
    fn public_key(&self) -> PublicKey {
        self.0.public_key()
    }
    fn encrypt_for(&self, key: &PublicKey, plaintext: &[u8]) -> anyhow::Result<Vec<u8>> {
        self.0.encrypt_for(key, plaintext)
    }
    fn decrypt(&self, _ciphertext: &[u8]) -> anyhow::Result<Vec<u8>> {
        anyhow::bail!("Wrong private key")
    }
    fn digest(&self, data: &[u8]) -> [u8; 32] {
        self.0.digest(data)
    }
    fn stringify_key(&self, key: &PublicKey) -> String {
        self.0.stringify_key(key)
    }
    fn parse_key(&self, s: &str) -> anyhow::Result<PublicKey> {
        self.0.parse_key(s)
    }
}

#[tokio::test(start_paused = true)]
async fn unanswered_challenge_times_out_to_unverified() {
    let hub = SimMeshHub::new();
    let a = RoomSession::connect(fixture(&hub).deps, room("alice"))
        .await
        .unwrap();
    let deaf = fixture_with_crypto(&hub, Arc::new(DeafCrypto(SealedBoxCrypto::generate())));
    let _b = RoomSession::connect(deaf.deps, room("eve")).await.unwrap();
    settle().await;

    assert_eq!(only_peer(&a).verification, VerificationState::Verifying);

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(only_peer(&a).verification, VerificationState::Unverified);
}

// ---------------------------------------------------------------------------
// Transcript + backfill
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn late_joiner_receives_backfill_exactly_once() {
    let hub = SimMeshHub::new();
    let a = RoomSession::connect(fixture(&hub).deps, room("alice"))
        .await
        .unwrap();
    a.send_message("one".into()).await;
    a.send_message("two".into()).await;

    let b = RoomSession::connect(fixture(&hub).deps, room("bob"))
        .await
        .unwrap();
    settle().await;
    assert_eq!(b.transcript().len(), 2);

    // A third joiner is backfilled by both existing peers; only the first
    // application wins, so nothing duplicates.
    let c = RoomSession::connect(fixture(&hub).deps, room("carol"))
        .await
        .unwrap();
    settle().await;
    assert_eq!(c.transcript().len(), 2);

    let texts: Vec<_> = c
        .transcript()
        .iter()
        .map(|e| match e {
            huddle_core::TranscriptEntry::Message(m) => m.text.clone(),
            huddle_core::TranscriptEntry::Media(m) => m.content_id.0.clone(),
        })
        .collect();
    assert_eq!(texts, vec!["one", "two"]);
}

#[tokio::test(start_paused = true)]
async fn password_rooms_connect_but_never_backfill() {
    let hub = SimMeshHub::new();

    let mut config = room("alice");
    config.password = Some("sesame".into());
    let a = RoomSession::connect(fixture(&hub).deps, config).await.unwrap();
    a.send_message("secret".into()).await;

    let mut config = room("bob");
    config.password = Some("sesame".into());
    let b = RoomSession::connect(fixture(&hub).deps, config).await.unwrap();
    settle().await;

    assert_eq!(only_peer(&b).user_id, UserId("alice".into()));
    assert!(b.transcript().is_empty());

    // A mismatched secret yields silent non-connectivity, not an error.
    let mut config = room("carol");
    config.password = Some("wrong".into());
    let c = RoomSession::connect(fixture(&hub).deps, config).await.unwrap();
    settle().await;
    assert!(c.peers().is_empty());
}

#[tokio::test(start_paused = true)]
async fn direct_messages_reach_only_their_target() {
    let hub = SimMeshHub::new();
    let a = RoomSession::connect(fixture(&hub).deps, room("alice"))
        .await
        .unwrap();
    let b = RoomSession::connect(fixture(&hub).deps, room("bob"))
        .await
        .unwrap();
    let c = RoomSession::connect(fixture(&hub).deps, room("carol"))
        .await
        .unwrap();
    settle().await;

    let bob = find_peer(&a, "bob");
    a.send_direct_message(&bob.peer_id, "psst".into()).await;
    settle().await;

    assert_eq!(b.transcript().len(), 1);
    // Carol joined before any message was sent, so her transcript stays
    // empty: the direct message never reached her.
    assert!(c.transcript().is_empty());
}

/// The peer with the given user id, as seen from `session`.
fn find_peer(session: &RoomSession, user: &str) -> Peer {
    session
        .peers()
        .into_iter()
        .find(|p| p.user_id == UserId(user.into()))
        .unwrap_or_else(|| panic!("{user} should be visible"))
}

#[tokio::test(start_paused = true)]
async fn evicted_inline_media_rescinds_its_offer() {
    let hub = SimMeshHub::new();
    let f = fixture(&hub);
    let transfer = f.transfer.clone();
    let mut config = room("alice");
    config.transcript_cap = 2;
    let a = RoomSession::connect(f.deps, config).await.unwrap();

    a.send_inline_media(vec![image_file()]).await.unwrap();
    let content_id = a.transcript()[0].content_id().unwrap().clone();
    assert!(transfer.is_offering(&content_id));

    a.send_message("fill".into()).await;
    assert!(transfer.is_offering(&content_id));

    // Third entry pushes the inline media out of the bounded transcript.
    a.send_message("evict".into()).await;
    assert_eq!(a.transcript().len(), 2);
    assert!(!transfer.is_offering(&content_id));
    assert_eq!(transfer.rescind_count(&content_id), 1);
}

// ---------------------------------------------------------------------------
// File offers
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn offer_lifecycle_tracks_and_rescinds() {
    let hub = SimMeshHub::new();
    let fa = fixture(&hub);
    let a_transfer = fa.transfer.clone();
    let a = RoomSession::connect(fa.deps, room("alice")).await.unwrap();
    let b = RoomSession::connect(fixture(&hub).deps, room("bob"))
        .await
        .unwrap();
    settle().await;

    let content_id = a.offer_files(vec![text_file()]).await.unwrap();
    settle().await;
    assert_eq!(only_peer(&b).offered_file_id, Some(content_id.clone()));

    a.stop_file_offer().await;
    settle().await;
    assert_eq!(only_peer(&b).offered_file_id, None);
    assert!(!a_transfer.is_offering(&content_id));
    assert_eq!(a.local_file_offer(), None);
}

#[tokio::test(start_paused = true)]
async fn late_joiner_learns_the_current_offer() {
    let hub = SimMeshHub::new();
    let a = RoomSession::connect(fixture(&hub).deps, room("alice"))
        .await
        .unwrap();
    let content_id = a.offer_files(vec![text_file()]).await.unwrap();

    let b = RoomSession::connect(fixture(&hub).deps, room("bob"))
        .await
        .unwrap();
    settle().await;

    assert_eq!(only_peer(&b).offered_file_id, Some(content_id));
}

// ---------------------------------------------------------------------------
// Media streams
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn media_state_and_streams_propagate() {
    let hub = SimMeshHub::new();
    let fa = fixture(&hub);
    let capture = fa.capture.clone();
    let a = RoomSession::connect(fa.deps, room("alice")).await.unwrap();
    let b = RoomSession::connect(fixture(&hub).deps, room("bob"))
        .await
        .unwrap();
    settle().await;

    a.enable_media(StreamKind::Audio).await.unwrap();
    settle().await;

    let alice = only_peer(&b);
    assert_eq!(alice.audio, AudioState::Playing);
    assert!(b.remote_stream(&alice.peer_id, StreamKind::Audio).is_some());

    a.disable_media(StreamKind::Audio).await;
    settle().await;

    let alice = only_peer(&b);
    assert_eq!(alice.audio, AudioState::Stopped);
    assert!(b.remote_stream(&alice.peer_id, StreamKind::Audio).is_none());
    assert_eq!(capture.stopped().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn attach_to_a_new_peer_waits_for_the_settling_delay() {
    let hub = SimMeshHub::new();
    let a = RoomSession::connect(fixture(&hub).deps, room("alice"))
        .await
        .unwrap();
    let b = RoomSession::connect(fixture(&hub).deps, room("bob"))
        .await
        .unwrap();
    settle().await;

    a.enable_media(StreamKind::Audio).await.unwrap();
    settle().await;
    assert!(b.remote_stream(&only_peer(&b).peer_id, StreamKind::Audio).is_some());

    // Carol joins within the settling window after the first attach: her
    // attach is queued, not sent back-to-back.
    let c = RoomSession::connect(fixture(&hub).deps, room("carol"))
        .await
        .unwrap();
    settle().await;

    let alice_for_c = find_peer(&c, "alice");
    // The state broadcast has already arrived, the stream has not.
    assert_eq!(alice_for_c.audio, AudioState::Playing);
    assert!(c.remote_stream(&alice_for_c.peer_id, StreamKind::Audio).is_none());

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(c.remote_stream(&alice_for_c.peer_id, StreamKind::Audio).is_some());
}

// ---------------------------------------------------------------------------
// Typing indicator
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn typing_indicator_sets_and_clears_after_quiet_period() {
    let hub = SimMeshHub::new();
    let a = RoomSession::connect(fixture(&hub).deps, room("alice"))
        .await
        .unwrap();
    let b = RoomSession::connect(fixture(&hub).deps, room("bob"))
        .await
        .unwrap();
    settle().await;

    a.typing_keystroke(TypingKind::Group).await;
    settle().await;
    assert!(only_peer(&b).is_typing_group);
    assert!(!only_peer(&b).is_typing_direct);

    // Another keystroke restarts the clear timer.
    tokio::time::sleep(Duration::from_millis(1000)).await;
    a.typing_keystroke(TypingKind::Group).await;
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(only_peer(&b).is_typing_group);

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(!only_peer(&b).is_typing_group);
}

// ---------------------------------------------------------------------------
// Health + connection classification
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn health_degrades_when_probe_and_signaling_fail() {
    let hub = SimMeshHub::new();
    let f = fixture(&hub);
    let probe = f.probe.clone();
    let a = RoomSession::connect(f.deps, room("alice")).await.unwrap();
    settle().await;

    let health = a.health();
    assert!(health.has_host && health.has_relay);
    assert_eq!(health.tracker, TrackerState::Connected);

    probe.set_failing(true);
    hub.set_signaling_states(vec![SignalingSocketState::Closed]);
    tokio::time::sleep(Duration::from_secs(21)).await;

    let health = a.health();
    assert!(!health.has_host && !health.has_relay);
    assert_eq!(health.tracker, TrackerState::Failed);
}

#[tokio::test(start_paused = true)]
async fn relay_candidates_classify_the_connection_as_relayed() {
    let hub = SimMeshHub::new();
    let a = RoomSession::connect(fixture(&hub).deps, room("alice"))
        .await
        .unwrap();
    let b = RoomSession::connect(fixture(&hub).deps, room("bob"))
        .await
        .unwrap();
    settle().await;

    let bob = only_peer(&a).peer_id;
    assert_eq!(a.peer_connection_kind(&bob), Some(ConnectionKind::Direct));

    hub.set_candidate_pair(Some(CandidatePair {
        local: CandidateKind::Relay,
        remote: CandidateKind::Host,
    }));
    assert_eq!(a.peer_connection_kind(&bob), Some(ConnectionKind::Relayed));
    drop(b);
}

// ---------------------------------------------------------------------------
// Teardown
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn leaving_clears_state_and_notifies_the_room() {
    let hub = SimMeshHub::new();
    let fa = fixture(&hub);
    let a_transfer = fa.transfer.clone();
    let a = RoomSession::connect(fa.deps, room("alice")).await.unwrap();
    let b = RoomSession::connect(fixture(&hub).deps, room("bob"))
        .await
        .unwrap();
    settle().await;

    a.send_message("bye soon".into()).await;
    let content_id = a.offer_files(vec![text_file()]).await.unwrap();
    settle().await;

    a.leave().await;
    settle().await;

    assert!(a.peers().is_empty());
    assert!(a.transcript().is_empty());
    assert!(!a_transfer.is_offering(&content_id));
    assert!(b.peers().is_empty());
}

// ---------------------------------------------------------------------------
// Registry + mount throttle
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn rapid_remounts_back_off_and_reset_after_quiet() {
    let hub = SimMeshHub::new();
    let registry = SessionRegistry::new(fixture(&hub).deps, Arc::new(InMemoryThrottleStore::new()));

    let start = tokio::time::Instant::now();
    let s1 = registry.acquire(room("alice")).await.unwrap();
    assert_eq!(start.elapsed(), Duration::ZERO);

    // Acquiring a live key reuses the session without remounting.
    let again = registry.acquire(room("alice")).await.unwrap();
    assert!(Arc::ptr_eq(&s1, &again));

    registry.release("app", "lobby").await;
    let start = tokio::time::Instant::now();
    registry.acquire(room("alice")).await.unwrap();
    assert_eq!(start.elapsed(), Duration::from_millis(2000));

    registry.release("app", "lobby").await;
    let start = tokio::time::Instant::now();
    registry.acquire(room("alice")).await.unwrap();
    assert_eq!(start.elapsed(), Duration::from_millis(4000));

    registry.release("app", "lobby").await;
    tokio::time::sleep(Duration::from_millis(5100)).await;
    let start = tokio::time::Instant::now();
    registry.acquire(room("alice")).await.unwrap();
    assert_eq!(start.elapsed(), Duration::ZERO);
}
