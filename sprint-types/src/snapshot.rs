//! The replicated workout state.

use serde::{Deserialize, Serialize};

use crate::{Command, DeviceRole, Phase, SessionId, Timestamp, Version};

/// One completed (or skipped) rep in the session ledger.
///
/// A replica never edits an entry it wrote. When both devices closed the
/// same rep, the merge keeps exactly one entry and a timed entry wins over
/// an untimed one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepRecord {
    /// Session-global 1-based rep index; the ledger key.
    pub rep_index: u32,
    /// The rep phase this rep belonged to.
    pub kind: Phase,
    /// Rep number within its block.
    pub set_rep: u32,
    /// Running time in seconds; `None` when the rep was skipped or stopped.
    pub time_secs: Option<f64>,
    /// Distance covered in meters.
    pub distance_m: f64,
    /// When the rep was closed.
    pub completed_at: Timestamp,
    /// Device whose state machine closed the rep.
    pub source: DeviceRole,
}

impl RepRecord {
    /// True if the rep was closed without a valid time.
    pub fn is_untimed(&self) -> bool {
        self.time_secs.is_none()
    }
}

/// A device's copy of "where we are in the workout".
///
/// Fields added after the first protocol revision carry `#[serde(default)]`
/// so older peers' snapshots still decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutSnapshot {
    /// The session this state belongs to.
    pub session: SessionId,
    /// Current phase.
    pub phase: Phase,
    /// Session-global 1-based rep index.
    pub rep_index: u32,
    /// Total reps across every planned rep phase.
    pub total_reps: u32,
    /// Rep number within the current block.
    #[serde(default)]
    pub set_rep: u32,
    /// Clock or rep stopwatch is advancing.
    pub is_running: bool,
    /// User paused; never true together with `is_running`.
    pub is_paused: bool,
    /// Countdown of a timed phase; zero in rep phases.
    pub phase_time_remaining_secs: u32,
    /// Distance covered in the open rep, in meters.
    pub distance_traveled_m: f64,
    /// Running time of the open rep when this snapshot was taken.
    #[serde(default)]
    pub rep_elapsed_ms: u64,
    /// Rep ledger ordered by `rep_index`.
    pub completed_reps: Vec<RepRecord>,
    /// Device that produced this version.
    pub last_source: DeviceRole,
    /// User command that produced this version, if any.
    #[serde(default)]
    pub last_command: Option<Command>,
    /// Replica version.
    pub version: Version,
    /// When this version was produced, on its producer's clock.
    pub updated_at: Timestamp,
}

impl WorkoutSnapshot {
    /// The state of a freshly started session.
    pub fn initial(
        session: SessionId,
        total_reps: u32,
        warmup_secs: u32,
        source: DeviceRole,
        at: Timestamp,
    ) -> Self {
        Self {
            session,
            phase: Phase::Warmup,
            rep_index: 1,
            total_reps,
            set_rep: 0,
            is_running: false,
            is_paused: false,
            phase_time_remaining_secs: warmup_secs,
            distance_traveled_m: 0.0,
            rep_elapsed_ms: 0,
            completed_reps: Vec::new(),
            last_source: source,
            last_command: None,
            version: Version::zero(),
            updated_at: at,
        }
    }

    /// True once a `stop` has halted the session.
    pub fn is_stopped(&self) -> bool {
        self.phase == Phase::Aborted
    }

    /// True if this snapshot was produced by a `stop` command.
    pub fn is_stop_originated(&self) -> bool {
        self.last_command == Some(Command::Stop) && self.is_stopped()
    }

    /// Same version produced by the same device at the same instant.
    ///
    /// Two snapshots with the same origin are the same update delivered twice.
    pub fn same_origin(&self, other: &WorkoutSnapshot) -> bool {
        self.session == other.session
            && self.version == other.version
            && self.last_source == other.last_source
            && self.updated_at == other.updated_at
    }

    /// Look up a ledger entry.
    pub fn rep(&self, rep_index: u32) -> Option<&RepRecord> {
        self.completed_reps.iter().find(|r| r.rep_index == rep_index)
    }

    /// Ledger entries of one rep phase.
    pub fn reps_of(&self, kind: Phase) -> impl Iterator<Item = &RepRecord> {
        self.completed_reps.iter().filter(move |r| r.kind == kind)
    }
}
