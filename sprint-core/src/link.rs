//! Peer link state machine.
//!
//! A pure, side-effect-free state machine for the lifecycle of the link to
//! the other device. It takes events as input and produces a new state plus
//! a list of actions to execute.
//!
//! The actual I/O (connecting, flushing the outbound queue, timers) is
//! performed by sprint-client, not by this module.

use std::time::Duration;

use sprintsync_types::Timestamp;

/// Link state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// No link and no attempt scheduled.
    Offline,
    /// Connection attempt in progress.
    Connecting,
    /// Peer reachable; queued messages can flow.
    Connected {
        /// When the link came up.
        since: Timestamp,
    },
    /// Link lost, waiting to retry.
    Reconnecting {
        /// Number of reconnection attempts so far.
        attempt: u32,
    },
}

impl LinkState {
    /// Create a new state machine in the Offline state.
    pub fn new() -> Self {
        Self::Offline
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function apart from jitter. The caller is responsible
    /// for executing the returned actions.
    pub fn on_event(self, event: Event, backoff: &BackoffPolicy) -> (Self, Vec<Action>) {
        match (self, event) {
            // From Offline
            (Self::Offline, Event::ConnectRequested) => (Self::Connecting, vec![Action::Connect]),

            // From Connecting
            (Self::Connecting, Event::ConnectSucceeded { at }) => (
                Self::Connected { since: at },
                vec![Action::Flush, Action::EmitEvent(LinkNotice::Connected)],
            ),
            (Self::Connecting, Event::ConnectFailed { error }) => (
                Self::Reconnecting { attempt: 1 },
                vec![
                    Action::EmitEvent(LinkNotice::ConnectionFailed { error }),
                    Action::StartReconnectTimer {
                        delay: backoff.delay(1),
                    },
                ],
            ),

            // From Connected
            (Self::Connected { .. }, Event::SendFailed { error }) => (
                Self::Reconnecting { attempt: 1 },
                vec![
                    Action::EmitEvent(LinkNotice::Disconnected { reason: error }),
                    Action::StartReconnectTimer {
                        delay: backoff.delay(1),
                    },
                ],
            ),
            (Self::Connected { .. }, Event::DisconnectRequested) => (
                Self::Offline,
                vec![
                    Action::Disconnect,
                    Action::EmitEvent(LinkNotice::Disconnected {
                        reason: "user requested".into(),
                    }),
                ],
            ),

            // From Reconnecting
            (Self::Reconnecting { attempt }, Event::ReconnectTimer) => {
                (Self::Reconnecting { attempt }, vec![Action::Connect])
            }
            (Self::Reconnecting { .. }, Event::ConnectSucceeded { at }) => (
                Self::Connected { since: at },
                vec![Action::Flush, Action::EmitEvent(LinkNotice::Connected)],
            ),
            (Self::Reconnecting { attempt }, Event::ConnectFailed { error }) => {
                let next_attempt = attempt.saturating_add(1);
                (
                    Self::Reconnecting {
                        attempt: next_attempt,
                    },
                    vec![
                        Action::EmitEvent(LinkNotice::ReconnectFailed {
                            attempt: next_attempt,
                            error,
                        }),
                        Action::StartReconnectTimer {
                            delay: backoff.delay(next_attempt),
                        },
                    ],
                )
            }
            (Self::Reconnecting { .. }, Event::DisconnectRequested) => {
                (Self::Offline, vec![Action::CancelReconnect])
            }

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if the peer is reachable.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Check if currently trying to (re)connect.
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting { .. })
    }
}

impl Default for LinkState {
    fn default() -> Self {
        Self::new()
    }
}

/// Events that can occur in the link lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Bring the link up.
    ConnectRequested,
    /// Transport reports the peer reachable.
    ConnectSucceeded {
        /// When it succeeded.
        at: Timestamp,
    },
    /// Transport could not reach the peer.
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// A send on an established link failed.
    SendFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Take the link down on purpose.
    DisconnectRequested,
    /// Reconnect timer fired.
    ReconnectTimer,
}

/// Actions to be executed by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Attempt to reach the peer.
    Connect,
    /// Close the transport.
    Disconnect,
    /// Drain the outbound queue and ask the peer to resync.
    Flush,
    /// Schedule the next reconnection attempt.
    StartReconnectTimer {
        /// Delay before attempting reconnection.
        delay: Duration,
    },
    /// Cancel any pending reconnect timer.
    CancelReconnect,
    /// Report a link change to the application.
    EmitEvent(LinkNotice),
}

/// Link changes reported to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkNotice {
    /// Peer reachable.
    Connected,
    /// First connection attempt failed.
    ConnectionFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// An established link dropped.
    Disconnected {
        /// Reason for disconnection.
        reason: String,
    },
    /// A reconnection attempt failed.
    ReconnectFailed {
        /// Which reconnection attempt this was.
        attempt: u32,
        /// Error message describing the failure.
        error: String,
    },
}

/// Reconnection delays: capped exponential backoff plus random jitter.
///
/// Formula: `min(cap, base * 2^attempt) + random(0..=max_jitter)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay unit doubled per attempt.
    pub base: Duration,
    /// Upper bound before jitter.
    pub cap: Duration,
    /// Upper bound of the random jitter.
    pub max_jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_jitter: Duration::from_millis(5_000),
        }
    }
}

impl BackoffPolicy {
    /// Same curve without jitter.
    pub fn without_jitter(self) -> Self {
        Self {
            max_jitter: Duration::ZERO,
            ..self
        }
    }

    /// Delay before `attempt`, without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Delay before `attempt`, with jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay(attempt) + self.jitter()
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(random_jitter_ms(max_ms))
    }
}

/// Random jitter in `0..=max_ms` milliseconds.
fn random_jitter_ms(max_ms: u64) -> u64 {
    let mut bytes = [0u8; 8];
    getrandom::getrandom(&mut bytes).expect("getrandom failed");
    let random = u64::from_le_bytes(bytes);
    random % (max_ms + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::default()
    }

    #[test]
    fn starts_offline() {
        let state = LinkState::new();
        assert!(matches!(state, LinkState::Offline));
    }

    #[test]
    fn connect_request_transitions_to_connecting() {
        let (state, actions) = LinkState::Offline.on_event(Event::ConnectRequested, &policy());

        assert!(matches!(state, LinkState::Connecting));
        assert!(actions.iter().any(|a| matches!(a, Action::Connect)));
    }

    #[test]
    fn connect_success_flushes_queue() {
        let at = Timestamp::from_millis(42);
        let (state, actions) =
            LinkState::Connecting.on_event(Event::ConnectSucceeded { at }, &policy());

        assert_eq!(state, LinkState::Connected { since: at });
        assert!(actions.iter().any(|a| matches!(a, Action::Flush)));
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::EmitEvent(LinkNotice::Connected))));
    }

    #[test]
    fn connect_failure_triggers_reconnect() {
        let (state, actions) = LinkState::Connecting.on_event(
            Event::ConnectFailed {
                error: "peer unreachable".into(),
            },
            &policy(),
        );

        assert!(matches!(state, LinkState::Reconnecting { attempt: 1 }));
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::StartReconnectTimer { .. })));
    }

    #[test]
    fn send_failure_drops_link() {
        let state = LinkState::Connected {
            since: Timestamp::default(),
        };
        let (state, actions) = state.on_event(
            Event::SendFailed {
                error: "out of range".into(),
            },
            &policy(),
        );

        assert!(matches!(state, LinkState::Reconnecting { attempt: 1 }));
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::EmitEvent(LinkNotice::Disconnected { reason }) if reason == "out of range"
        )));
    }

    #[test]
    fn reconnect_failure_increments_attempt() {
        let (state, actions) = LinkState::Reconnecting { attempt: 2 }.on_event(
            Event::ConnectFailed {
                error: "timeout".into(),
            },
            &policy(),
        );

        assert!(matches!(state, LinkState::Reconnecting { attempt: 3 }));
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::EmitEvent(LinkNotice::ReconnectFailed { attempt: 3, .. })
        )));
    }

    #[test]
    fn reconnect_timer_attempts_connect() {
        let (state, actions) =
            LinkState::Reconnecting { attempt: 4 }.on_event(Event::ReconnectTimer, &policy());

        assert!(matches!(state, LinkState::Reconnecting { attempt: 4 }));
        assert_eq!(actions, vec![Action::Connect]);
    }

    #[test]
    fn reconnect_succeeds_from_reconnecting() {
        let at = Timestamp::from_millis(7);
        let (state, actions) =
            LinkState::Reconnecting { attempt: 5 }.on_event(Event::ConnectSucceeded { at }, &policy());

        assert!(state.is_connected());
        assert!(actions.contains(&Action::Flush));
    }

    #[test]
    fn disconnect_request_from_reconnecting_cancels() {
        let (state, actions) =
            LinkState::Reconnecting { attempt: 2 }.on_event(Event::DisconnectRequested, &policy());

        assert!(matches!(state, LinkState::Offline));
        assert!(actions.iter().any(|a| matches!(a, Action::CancelReconnect)));
    }

    #[test]
    fn invalid_transition_is_ignored() {
        let (state, actions) = LinkState::Offline.on_event(Event::ReconnectTimer, &policy());
        assert_eq!(state, LinkState::Offline);
        assert!(actions.is_empty());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = policy().without_jitter();
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(8));
        assert_eq!(policy.delay(5), Duration::from_secs(30));
        assert_eq!(policy.delay(40), Duration::from_secs(30));
    }

    #[test]
    fn backoff_base_is_configurable() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(10),
            cap: Duration::from_millis(100),
            max_jitter: Duration::ZERO,
        };
        assert_eq!(policy.delay(2), Duration::from_millis(40));
        assert_eq!(policy.delay(8), Duration::from_millis(100));
    }

    #[test]
    fn reconnect_delay_capped_at_30_seconds_plus_jitter() {
        let delay = policy().delay(10);
        assert!(
            delay <= Duration::from_secs(35),
            "Reconnect delay must be capped at ~35s (30s base + 5s jitter), got {:?}",
            delay
        );
        assert!(delay >= Duration::from_secs(30));
    }

    #[test]
    fn reconnect_jitter_creates_variance() {
        let delays: Vec<Duration> = (0..20).map(|_| policy().delay(3)).collect();
        let min = delays.iter().min().unwrap();
        let max = delays.iter().max().unwrap();

        // 20 samples over 5001 possible jitter values
        assert!(
            max.as_millis() - min.as_millis() >= 100,
            "Expected jitter variance, got min={:?} max={:?}",
            min,
            max
        );
    }

    #[test]
    fn connection_helpers() {
        assert!(!LinkState::Offline.is_connected());
        assert!(LinkState::Connecting.is_connecting());
        assert!(LinkState::Reconnecting { attempt: 1 }.is_connecting());
        assert!(!LinkState::Connected {
            since: Timestamp::default()
        }
        .is_connecting());
    }
}
