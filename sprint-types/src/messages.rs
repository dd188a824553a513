//! Protocol messages for sprint-sync.
//!
//! These are the payloads carried inside an [`Envelope`](crate::Envelope).
//! The set is closed: a peer that receives an unknown `type` tag fails to
//! decode the envelope and drops it.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{SessionConfig, SessionId, Timestamp, Version, WorkoutSnapshot};

/// User commands accepted by the workout state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// Start or resume the current phase.
    Play,
    /// Freeze the phase clock and the rep stopwatch.
    Pause,
    /// Force the current phase's exit condition.
    Skip,
    /// Halt the session; terminal.
    Stop,
    /// Start a fresh session from a terminal phase.
    Reset,
    /// Extend the countdown of the current timed phase.
    #[serde(rename = "add_time")]
    AddTime {
        /// Seconds to add.
        secs: u32,
    },
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Play => f.write_str("play"),
            Command::Pause => f.write_str("pause"),
            Command::Skip => f.write_str("skip"),
            Command::Stop => f.write_str("stop"),
            Command::Reset => f.write_str("reset"),
            Command::AddTime { secs } => write!(f, "add_time(+{secs}s)"),
        }
    }
}

/// All possible protocol messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Full replicated state
    Snapshot(WorkoutSnapshot),
    /// Ask the peer's state machine to run a command
    Command(CommandRequest),
    /// A new session began on the sender
    SessionStart(SessionStart),
    /// Ask the peer to resend its session and snapshot
    SyncRequest(SyncRequest),
}

impl Message {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Snapshot(_) => "snapshot",
            Message::Command(_) => "command",
            Message::SessionStart(_) => "session_start",
            Message::SyncRequest(_) => "sync_request",
        }
    }

    /// Snapshots are superseded by later snapshots and may be coalesced.
    pub fn is_snapshot(&self) -> bool {
        matches!(self, Message::Snapshot(_))
    }
}

/// Remote-control request: run `command` on the receiving replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// The command to run.
    pub command: Command,
    /// When the user issued it, on the sender's clock.
    pub issued_at: Timestamp,
}

/// Announces a session and the config both replicas must run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStart {
    /// The new session.
    pub session: SessionId,
    /// Its immutable configuration.
    pub config: SessionConfig,
    /// When it started, on the sender's clock.
    pub started_at: Timestamp,
}

/// Ask the peer for a full resync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Session the requester currently runs, if any.
    #[serde(default)]
    pub session: Option<SessionId>,
    /// Version the requester currently holds.
    pub known_version: Version,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DeviceRole;

    #[test]
    fn command_serializes_lowercase() {
        let json = serde_json::to_string(&Command::Skip).unwrap();
        assert_eq!(json, "\"skip\"");
        assert_eq!(Command::Stop.to_string(), "stop");
    }

    #[test]
    fn add_time_carries_its_seconds() {
        let command = Command::AddTime { secs: 30 };
        let json = serde_json::to_value(command).unwrap();
        assert_eq!(json["add_time"]["secs"], 30);
        assert_eq!(command.to_string(), "add_time(+30s)");

        let bytes = rmp_serde::to_vec_named(&command).unwrap();
        let decoded: Command = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded, command);
    }

    #[test]
    fn message_is_internally_tagged() {
        let msg = Message::SyncRequest(SyncRequest {
            session: None,
            known_version: Version::new(3),
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "sync_request");
        assert_eq!(json["known_version"], 3);
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let json = r#"{"type":"live_metrics","distance":12.0}"#;
        assert!(serde_json::from_str::<Message>(json).is_err());
    }

    #[test]
    fn only_snapshots_coalesce() {
        let snapshot = Message::Snapshot(WorkoutSnapshot::initial(
            SessionId::new(),
            3,
            300,
            DeviceRole::Host,
            Timestamp::default(),
        ));
        let command = Message::Command(CommandRequest {
            command: Command::Pause,
            issued_at: Timestamp::default(),
        });
        assert!(snapshot.is_snapshot());
        assert!(!command.is_snapshot());
        assert_eq!(command.kind(), "command");
    }
}
