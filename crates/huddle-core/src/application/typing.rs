//! Typing indicator: a small two-timer state machine per transcript kind.
//!
//! A keystroke sets the flag and broadcasts immediately; a trailing timer
//! clears it after a fixed quiet period and broadcasts the clear. Every
//! further keystroke restarts the clear timer.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::domain::peer::TypingKind;
use crate::domain::wire::{namespace, TypingPayload};

use super::channel::ActionChannel;
use super::ports::{MeshSession, Target};

/// Quiet period after the last keystroke before the indicator clears.
pub const TYPING_CLEAR_DELAY: Duration = Duration::from_secs(2);

#[derive(Default)]
struct Lane {
    active: bool,
    clear_guard: Option<CancellationToken>,
}

pub struct TypingIndicator {
    channel: ActionChannel<TypingPayload>,
    group: Mutex<Lane>,
    direct: Mutex<Lane>,
    shutdown: CancellationToken,
}

impl TypingIndicator {
    pub fn new(mesh: Arc<dyn MeshSession>, shutdown: CancellationToken) -> anyhow::Result<Arc<Self>> {
        Ok(Arc::new(Self {
            channel: ActionChannel::new(mesh, namespace::TYPING)?,
            group: Mutex::new(Lane::default()),
            direct: Mutex::new(Lane::default()),
            shutdown,
        }))
    }

    /// Record a local keystroke for the given transcript kind.
    pub async fn keystroke(self: Arc<Self>, kind: TypingKind, to: Target) {
        let guard = CancellationToken::new();
        let announce = {
            let mut lane = self.lane(kind).lock().unwrap();
            if let Some(previous) = lane.clear_guard.replace(guard.clone()) {
                previous.cancel();
            }
            let announce = !lane.active;
            lane.active = true;
            announce
        };

        if announce {
            self.channel
                .send(
                    &TypingPayload {
                        kind,
                        is_typing: true,
                    },
                    to.clone(),
                )
                .await;
        }

        let indicator = self.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = guard.cancelled() => {}
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(TYPING_CLEAR_DELAY) => {
                    indicator.clear(kind, to).await;
                }
            }
        });
    }

    /// Clear the indicator immediately (message sent, input emptied).
    pub async fn clear(&self, kind: TypingKind, to: Target) {
        let announce = {
            let mut lane = self.lane(kind).lock().unwrap();
            if let Some(guard) = lane.clear_guard.take() {
                guard.cancel();
            }
            let announce = lane.active;
            lane.active = false;
            announce
        };
        if announce {
            self.channel
                .send(
                    &TypingPayload {
                        kind,
                        is_typing: false,
                    },
                    to,
                )
                .await;
        }
    }

    fn lane(&self, kind: TypingKind) -> &Mutex<Lane> {
        match kind {
            TypingKind::Group => &self.group,
            TypingKind::Direct => &self.direct,
        }
    }
}
