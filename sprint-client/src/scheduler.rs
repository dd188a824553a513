//! Delayed and periodic events for the session actor.
//!
//! Timers run as small tokio tasks that post a [`Scheduled`] event into the
//! actor's queue, so the actor stays the only place state changes.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// Events the actor schedules for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduled {
    /// Drive the phase clock.
    Tick,
    /// Retry the peer link.
    Reconnect,
}

/// Posts [`Scheduled`] events after a delay or on a period.
#[derive(Debug, Clone)]
pub struct Scheduler {
    tx: mpsc::UnboundedSender<Scheduled>,
}

impl Scheduler {
    /// A scheduler and the receiving end the actor listens on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Scheduled>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Post `event` once, after `delay`.
    pub fn after(&self, delay: Duration, event: Scheduled) -> ScheduledHandle {
        let tx = self.tx.clone();
        ScheduledHandle(tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = tx.send(event);
        }))
    }

    /// Post `event` every `period`, first after one full period.
    ///
    /// Missed periods are skipped rather than bunched up.
    pub fn every(&self, period: Duration, event: Scheduled) -> ScheduledHandle {
        let tx = self.tx.clone();
        let period = period.max(Duration::from_millis(1));
        ScheduledHandle(tokio::spawn(async move {
            let mut interval = time::interval_at(time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if tx.send(event).is_err() {
                    break;
                }
            }
        }))
    }
}

/// A pending timer. Dropping the handle leaves the timer running.
#[derive(Debug)]
pub struct ScheduledHandle(JoinHandle<()>);

impl ScheduledHandle {
    /// Stop the timer. Events already posted stay in the queue.
    pub fn cancel(&self) {
        self.0.abort();
    }

    /// The timer has fired (one-shot) or was cancelled.
    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}
