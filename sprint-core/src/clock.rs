//! Phase countdown and rep stopwatch.
//!
//! Neither type reads the system clock. The owner passes the current
//! [`Timestamp`] into every call, so a replica driven by a scaled or manual
//! clock behaves exactly like one driven by wall time.

use sprintsync_types::Timestamp;

use crate::WorkoutError;

/// Countdown for a timed phase.
///
/// Driven cooperatively by an external tick of roughly one hertz. Each tick
/// consumes the whole seconds elapsed since the previous one and carries the
/// sub-second remainder forward, so ticking faster than once per second
/// never double-counts and ticking late never drifts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseClock {
    duration_secs: u32,
    remaining_secs: u32,
    running: bool,
    anchor: Option<Timestamp>,
    carry_ms: u64,
}

impl PhaseClock {
    /// An idle clock with no duration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `duration_secs` and start counting down from `at`.
    pub fn start(&mut self, duration_secs: u32, at: Timestamp) -> Result<(), WorkoutError> {
        self.arm(duration_secs)?;
        self.running = true;
        self.anchor = Some(at);
        Ok(())
    }

    /// Load `duration_secs` without starting.
    pub fn arm(&mut self, duration_secs: u32) -> Result<(), WorkoutError> {
        if duration_secs == 0 {
            return Err(WorkoutError::InvalidDuration);
        }
        self.duration_secs = duration_secs;
        self.remaining_secs = duration_secs;
        self.running = false;
        self.anchor = None;
        self.carry_ms = 0;
        Ok(())
    }

    /// Freeze the countdown. Elapsed time up to `at` is kept, including the
    /// sub-second part.
    pub fn pause(&mut self, at: Timestamp) {
        if !self.running {
            return;
        }
        self.advance(at);
        self.running = false;
        self.anchor = None;
    }

    /// Continue counting down from `at`.
    pub fn resume(&mut self, at: Timestamp) {
        if self.running || self.expired() || self.duration_secs == 0 {
            return;
        }
        self.running = true;
        self.anchor = Some(at);
    }

    /// Consume the time elapsed up to `at` and return the remaining seconds.
    pub fn tick(&mut self, at: Timestamp) -> u32 {
        if self.running {
            self.advance(at);
            if self.remaining_secs == 0 {
                self.running = false;
                self.anchor = None;
                self.carry_ms = 0;
            }
        }
        self.remaining_secs
    }

    fn advance(&mut self, at: Timestamp) {
        let Some(anchor) = self.anchor else {
            return;
        };
        let elapsed = self.carry_ms + at.millis_since(anchor);
        let whole_secs = elapsed / 1000;
        self.carry_ms = elapsed % 1000;
        self.anchor = Some(at);
        let consumed = u32::try_from(whole_secs).unwrap_or(u32::MAX);
        self.remaining_secs = self.remaining_secs.saturating_sub(consumed);
    }

    /// True once a loaded countdown has reached zero. Stays true until the
    /// clock is armed again.
    pub fn expired(&self) -> bool {
        self.duration_secs > 0 && self.remaining_secs == 0
    }

    /// Whole seconds left.
    pub fn remaining(&self) -> u32 {
        self.remaining_secs
    }

    /// Loaded duration, including any added time.
    pub fn duration(&self) -> u32 {
        self.duration_secs
    }

    /// Extend the current countdown. Time already consumed stays consumed.
    pub fn add_time(&mut self, secs: u32) {
        self.duration_secs = self.duration_secs.saturating_add(secs);
        self.remaining_secs = self.remaining_secs.saturating_add(secs);
    }

    /// Whether the countdown is advancing.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Rebuild the clock from a replicated snapshot.
    pub fn restore(&mut self, duration_secs: u32, remaining_secs: u32, running: bool, at: Timestamp) {
        self.duration_secs = duration_secs.max(remaining_secs);
        self.remaining_secs = remaining_secs;
        self.carry_ms = 0;
        self.running = running && remaining_secs > 0;
        self.anchor = self.running.then_some(at);
    }

    /// Return to the idle state.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Running time of the open rep, excluding paused intervals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stopwatch {
    accumulated_ms: u64,
    started_at: Option<Timestamp>,
}

impl Stopwatch {
    /// A stopped stopwatch at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to zero and start from `at`.
    pub fn start(&mut self, at: Timestamp) {
        self.accumulated_ms = 0;
        self.started_at = Some(at);
    }

    /// Stop accumulating.
    pub fn pause(&mut self, at: Timestamp) {
        if let Some(started) = self.started_at.take() {
            self.accumulated_ms += at.millis_since(started);
        }
    }

    /// Start accumulating again; a no-op while running.
    pub fn resume(&mut self, at: Timestamp) {
        if self.started_at.is_none() {
            self.started_at = Some(at);
        }
    }

    /// Time accumulated up to `at`.
    pub fn elapsed_ms(&self, at: Timestamp) -> u64 {
        self.accumulated_ms
            + self
                .started_at
                .map(|started| at.millis_since(started))
                .unwrap_or(0)
    }

    /// Whether time is accumulating.
    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    /// Rebuild from a replicated elapsed time.
    pub fn restore(&mut self, elapsed_ms: u64, running: bool, at: Timestamp) {
        self.accumulated_ms = elapsed_ms;
        self.started_at = running.then_some(at);
    }

    /// Stop and return to zero.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
