//! Mount throttle: escalating backoff for rapid session (re)establishment.
//!
//! Tolerates remount churn (navigation loops) without hammering the
//! transport. The decision is a pure function of wall-clock time and two
//! persisted counters; the surrounding type wires it to a store and the
//! runtime clock.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::ports::{ThrottleRecord, ThrottleStore};

/// Quiet time after which the backoff resets to zero.
pub const RESET_PERIOD: Duration = Duration::from_millis(5000);

/// First non-zero backoff.
pub const BASE_BACKOFF: Duration = Duration::from_millis(2000);

/// Escalation factor for successive rapid mounts.
pub const BACKOFF_MULTIPLIER: u64 = 2;

/// Pure throttle step: given the current time and the persisted record,
/// returns the delay the caller must wait and the record to persist.
/// Successive rapid mounts yield 0, 2000, 4000, 8000 ms; a quiet gap of
/// [`RESET_PERIOD`] yields an instant mount again.
pub fn compute(now_ms: u64, record: ThrottleRecord) -> (Duration, ThrottleRecord) {
    let since_last = match record.last_mount_ms {
        Some(last) => now_ms.saturating_sub(last),
        None => u64::MAX,
    };

    let backoff_ms = if since_last < RESET_PERIOD.as_millis() as u64 {
        if record.backoff_ms == 0 {
            BASE_BACKOFF.as_millis() as u64
        } else {
            record.backoff_ms * BACKOFF_MULTIPLIER
        }
    } else {
        0
    };

    (
        Duration::from_millis(backoff_ms),
        ThrottleRecord {
            last_mount_ms: record.last_mount_ms,
            backoff_ms,
        },
    )
}

pub struct MountThrottle {
    store: Arc<dyn ThrottleStore>,
    /// Monotonic reference for the persisted millisecond counters. Uses the
    /// tokio clock so paused-clock tests drive it deterministically.
    epoch: tokio::time::Instant,
}

impl MountThrottle {
    pub fn new(store: Arc<dyn ThrottleStore>) -> Self {
        Self {
            store,
            epoch: tokio::time::Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Gate one mount attempt: wait out the computed backoff, record the
    /// mount, and schedule the post-mount reset.
    pub async fn admit(&self) {
        let (delay, next) = compute(self.now_ms(), self.store.load());
        self.store.save(next);

        if !delay.is_zero() {
            debug!(delay_ms = delay.as_millis() as u64, "Throttling session mount");
            tokio::time::sleep(delay).await;
        }

        let mounted_at = self.now_ms();
        let mut record = self.store.load();
        record.last_mount_ms = Some(mounted_at);
        self.store.save(record);

        // Reset the backoff once a full quiet period has followed this
        // mount. A newer mount moves `last_mount_ms`, which voids this
        // reset.
        let store = self.store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(RESET_PERIOD).await;
            let mut record = store.load();
            if record.last_mount_ms == Some(mounted_at) {
                record.backoff_ms = 0;
                store.save(record);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESET_MS: u64 = 5000;

    #[test]
    fn first_mount_is_immediate() {
        let (delay, record) = compute(123, ThrottleRecord::default());
        assert_eq!(delay, Duration::ZERO);
        assert_eq!(record.backoff_ms, 0);
    }

    #[test]
    fn rapid_remounts_escalate_0_2000_4000() {
        // Mount 1 at t=0.
        let (d1, r1) = compute(
            0,
            ThrottleRecord {
                last_mount_ms: None,
                backoff_ms: 0,
            },
        );
        assert_eq!(d1, Duration::ZERO);
        let r1 = ThrottleRecord {
            last_mount_ms: Some(0),
            ..r1
        };

        // Mount 2 at t=1000: within the reset period.
        let (d2, r2) = compute(1000, r1);
        assert_eq!(d2, Duration::from_millis(2000));
        let r2 = ThrottleRecord {
            last_mount_ms: Some(3000),
            ..r2
        };

        // Mount 3 shortly after mount 2 completed.
        let (d3, _) = compute(3500, r2);
        assert_eq!(d3, Duration::from_millis(4000));
    }

    #[test]
    fn quiet_gap_resets_backoff() {
        let record = ThrottleRecord {
            last_mount_ms: Some(1000),
            backoff_ms: 4000,
        };
        let (delay, next) = compute(1000 + RESET_MS, record);
        assert_eq!(delay, Duration::ZERO);
        assert_eq!(next.backoff_ms, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn admit_waits_and_schedules_reset() {
        use crate::adapters::throttle::InMemoryThrottleStore;

        let store = Arc::new(InMemoryThrottleStore::new());
        let throttle = MountThrottle::new(store.clone());

        let start = tokio::time::Instant::now();
        throttle.admit().await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        // Immediate remount: must wait the base backoff.
        let start = tokio::time::Instant::now();
        throttle.admit().await;
        assert_eq!(start.elapsed(), Duration::from_millis(2000));

        // A quiet period later the stored backoff has been reset.
        tokio::time::sleep(RESET_PERIOD + Duration::from_millis(1)).await;
        tokio::task::yield_now().await;
        assert_eq!(store.load().backoff_ms, 0);

        let start = tokio::time::Instant::now();
        throttle.admit().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
