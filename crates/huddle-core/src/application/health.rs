//! Connection health monitor.
//!
//! Probes local connectivity class on a fixed interval, independent of any
//! specific peer, and derives tracker connectivity from the transport's
//! signaling sockets. Failures never leave the probe loop: a failed probe
//! classifies the cycle as "no connectivity".

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::ports::{
    ConnectionHealth, ConnectivityProbe, MeshSession, SessionEvents, SignalingSocketState,
    TrackerState,
};

/// Interval between probes, for the session's lifetime.
pub const HEALTH_PROBE_INTERVAL: Duration = Duration::from_secs(20);

/// How long a probe waits for candidates before classifying them as absent.
pub const PROBE_EXPIRY: Duration = Duration::from_secs(5);

pub struct HealthMonitor {
    probe: Arc<dyn ConnectivityProbe>,
    mesh: Arc<dyn MeshSession>,
    events: Arc<dyn SessionEvents>,
    state: Mutex<ConnectionHealth>,
}

impl HealthMonitor {
    pub fn new(
        probe: Arc<dyn ConnectivityProbe>,
        mesh: Arc<dyn MeshSession>,
        events: Arc<dyn SessionEvents>,
    ) -> Arc<Self> {
        Arc::new(Self {
            probe,
            mesh,
            events,
            state: Mutex::new(ConnectionHealth {
                has_host: true,
                has_relay: true,
                tracker: TrackerState::Searching,
            }),
        })
    }

    pub fn snapshot(&self) -> ConnectionHealth {
        *self.state.lock().unwrap()
    }

    /// Spawn the repeating probe loop; runs until `shutdown` fires.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) {
        let monitor = self;
        tokio::spawn(async move {
            loop {
                monitor.run_cycle().await;
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(HEALTH_PROBE_INTERVAL) => {}
                }
            }
        });
    }

    async fn run_cycle(&self) {
        let report = match self.probe.probe(PROBE_EXPIRY).await {
            Ok(report) => report,
            Err(e) => {
                warn!("Connectivity probe failed: {e}");
                Default::default()
            }
        };

        let health = ConnectionHealth {
            has_host: report.saw_host,
            has_relay: report.saw_relay,
            tracker: derive_tracker_state(&self.mesh.signaling_states()),
        };

        let changed = {
            let mut state = self.state.lock().unwrap();
            let changed = *state != health;
            *state = health;
            changed
        };
        if changed {
            debug!(?health, "Connection health changed");
            self.events.health_changed(health).await;
        }
    }
}

/// Any open socket means the trackers are reachable; all sockets closed
/// means signaling has failed; anything else is still searching.
fn derive_tracker_state(sockets: &[SignalingSocketState]) -> TrackerState {
    if sockets.iter().any(|s| *s == SignalingSocketState::Open) {
        TrackerState::Connected
    } else if !sockets.is_empty()
        && sockets.iter().all(|s| *s == SignalingSocketState::Closed)
    {
        TrackerState::Failed
    } else {
        TrackerState::Searching
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_state_derivation() {
        use SignalingSocketState::*;
        assert_eq!(derive_tracker_state(&[]), TrackerState::Searching);
        assert_eq!(derive_tracker_state(&[Connecting]), TrackerState::Searching);
        assert_eq!(derive_tracker_state(&[Closed, Open]), TrackerState::Connected);
        assert_eq!(derive_tracker_state(&[Closed, Closed]), TrackerState::Failed);
    }
}
