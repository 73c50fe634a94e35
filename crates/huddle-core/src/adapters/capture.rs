//! Stub [`MediaCapture`] adapter.
//!
//! Produces track-shaped stream handles without touching real devices.
//! Real deployments plug in the platform capture subsystem.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::application::ports::{MediaCapture, MediaStream, StreamId, TrackKind};
use crate::domain::peer::StreamKind;

pub struct StubMediaCapture {
    next_id: AtomicU64,
    stopped: Mutex<Vec<StreamId>>,
}

impl StubMediaCapture {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            stopped: Mutex::new(Vec::new()),
        }
    }

    /// Streams whose tracks have been stopped, in stop order.
    pub fn stopped(&self) -> Vec<StreamId> {
        self.stopped.lock().unwrap().clone()
    }
}

impl Default for StubMediaCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaCapture for StubMediaCapture {
    async fn acquire(&self, kind: StreamKind) -> anyhow::Result<MediaStream> {
        let id = StreamId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let tracks = match kind {
            StreamKind::Audio => vec![TrackKind::Audio],
            StreamKind::Video => vec![TrackKind::Video, TrackKind::Audio],
            StreamKind::Screen => vec![TrackKind::Video],
        };
        Ok(MediaStream { id, tracks })
    }

    async fn stop(&self, stream: StreamId) {
        self.stopped.lock().unwrap().push(stream);
    }
}
