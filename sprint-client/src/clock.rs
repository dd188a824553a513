//! Wall-clock sources for the session controller.
//!
//! The state machine takes explicit timestamps; the controller asks a
//! [`Clock`] for them. Tests drive a [`ManualClock`], the simulator runs a
//! [`ScaledClock`] so a half-hour session plays out in seconds.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sprintsync_types::Timestamp;
use tokio::time::Instant;

/// Source of "now" for a device.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time.
    fn now(&self) -> Timestamp;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
}

impl ManualClock {
    /// Start at `at`.
    pub fn new(at: Timestamp) -> Self {
        Self {
            millis: Arc::new(AtomicU64::new(at.as_millis())),
        }
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    /// Jump to `at`.
    pub fn set(&self, at: Timestamp) {
        self.millis.store(at.as_millis(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

/// Runs `scale` times faster than real time, starting from `origin`.
#[derive(Debug, Clone)]
pub struct ScaledClock {
    origin: Timestamp,
    started: Instant,
    scale: f64,
}

impl ScaledClock {
    /// Start now, running `scale` times real time.
    pub fn new(scale: f64) -> Self {
        Self::with_origin(Timestamp::now(), scale)
    }

    /// Start at `origin`, running `scale` times real time.
    ///
    /// Non-positive or non-finite scales run at real time.
    pub fn with_origin(origin: Timestamp, scale: f64) -> Self {
        let scale = if scale.is_finite() && scale > 0.0 {
            scale
        } else {
            1.0
        };
        Self {
            origin,
            started: Instant::now(),
            scale,
        }
    }

    /// Speed factor.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Real time that corresponds to `simulated` on this clock. Saturates at
    /// [`Duration::MAX`].
    pub fn real_duration(&self, simulated: Duration) -> Duration {
        Duration::try_from_secs_f64(simulated.as_secs_f64() / self.scale).unwrap_or(Duration::MAX)
    }
}

impl Clock for ScaledClock {
    fn now(&self) -> Timestamp {
        let elapsed = self.started.elapsed().as_secs_f64() * 1000.0 * self.scale;
        self.origin.plus_millis(elapsed as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_only_when_told() {
        let clock = ManualClock::new(Timestamp::from_millis(1_000));
        assert_eq!(clock.now(), Timestamp::from_millis(1_000));

        clock.advance(Duration::from_millis(2_500));
        assert_eq!(clock.now(), Timestamp::from_millis(3_500));

        clock.set(Timestamp::from_millis(10));
        assert_eq!(clock.now(), Timestamp::from_millis(10));
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(Timestamp::from_millis(0));
        let other = clock.clone();
        clock.advance(Duration::from_secs(5));
        assert_eq!(other.now(), Timestamp::from_millis(5_000));
    }

    #[tokio::test(start_paused = true)]
    async fn scaled_clock_runs_faster() {
        let clock = ScaledClock::with_origin(Timestamp::from_millis(0), 60.0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        let now = clock.now().as_millis();
        assert!((120_000..120_100).contains(&now), "now = {}", now);
    }

    #[test]
    fn scaled_clock_rejects_bad_scale() {
        let clock = ScaledClock::with_origin(Timestamp::from_millis(0), -3.0);
        assert_eq!(clock.scale(), 1.0);
        assert_eq!(
            ScaledClock::with_origin(Timestamp::from_millis(0), 10.0)
                .real_duration(Duration::from_secs(60)),
            Duration::from_secs(6)
        );
    }

    #[test]
    fn system_clock_is_after_epoch() {
        assert!(SystemClock.now().as_millis() > 0);
    }
}
