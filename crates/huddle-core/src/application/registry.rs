//! Session registry: one live session per `(app_id, room_id)`.
//!
//! An explicit, injectable object owned by the top-level application
//! context. Acquiring a key that already has a live session returns that
//! session instead of joining the transport a second time; release tears
//! the session down. Mount attempts are gated by the mount throttle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::ports::ThrottleStore;
use super::room_session::{RoomConfig, RoomSession, SessionDeps};
use super::throttle::MountThrottle;

pub struct SessionRegistry {
    deps: SessionDeps,
    throttle: MountThrottle,
    live: Mutex<HashMap<(String, String), Arc<RoomSession>>>,
}

impl SessionRegistry {
    pub fn new(deps: SessionDeps, throttle_store: Arc<dyn ThrottleStore>) -> Self {
        Self {
            deps,
            throttle: MountThrottle::new(throttle_store),
            live: Mutex::new(HashMap::new()),
        }
    }

    /// Return the live session for the config's room, or mount a new one
    /// (waiting out any remount backoff first).
    pub async fn acquire(&self, config: RoomConfig) -> anyhow::Result<Arc<RoomSession>> {
        let key = (config.app_id.clone(), config.room_id.clone());
        if let Some(existing) = self.live.lock().unwrap().get(&key) {
            debug!(room_id = %key.1, "Reusing live session");
            return Ok(existing.clone());
        }

        self.throttle.admit().await;
        let session = RoomSession::connect(self.deps.clone(), config).await?;
        self.live.lock().unwrap().insert(key, session.clone());
        Ok(session)
    }

    /// Tear down and forget the session for a room, if one is live.
    pub async fn release(&self, app_id: &str, room_id: &str) {
        let session = self
            .live
            .lock()
            .unwrap()
            .remove(&(app_id.to_string(), room_id.to_string()));
        if let Some(session) = session {
            session.leave().await;
        }
    }

    pub fn is_live(&self, app_id: &str, room_id: &str) -> bool {
        self.live
            .lock()
            .unwrap()
            .contains_key(&(app_id.to_string(), room_id.to_string()))
    }
}
