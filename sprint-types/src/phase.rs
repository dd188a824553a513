//! Workout phases.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A named stage of a sprint session.
///
/// Variants are declared in timeline order; `Ord` follows that order.
/// A session visits a subsequence of these, chosen by its phase plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Light jog to raise the heart rate.
    Warmup,
    /// Dynamic mobility.
    Stretch,
    /// Technique drills, one distance-based rep at a time.
    Drill,
    /// Sub-maximal strides.
    Strides,
    /// Maximum effort sprint reps.
    Sprint,
    /// Recovery between two sprint reps.
    Resting,
    /// Stretch and recover.
    Cooldown,
    /// Session finished normally.
    Completed,
    /// Session halted by `stop`.
    Aborted,
}

impl Phase {
    /// Every phase in timeline order.
    pub const ALL: [Phase; 9] = [
        Phase::Warmup,
        Phase::Stretch,
        Phase::Drill,
        Phase::Strides,
        Phase::Sprint,
        Phase::Resting,
        Phase::Cooldown,
        Phase::Completed,
        Phase::Aborted,
    ];

    /// Phases driven by distance reps rather than a countdown.
    pub fn is_rep_phase(self) -> bool {
        matches!(self, Phase::Drill | Phase::Strides | Phase::Sprint)
    }

    /// Phases driven by a countdown.
    pub fn is_timed(self) -> bool {
        matches!(
            self,
            Phase::Warmup | Phase::Stretch | Phase::Resting | Phase::Cooldown
        )
    }

    /// No commands other than `reset` are accepted once here.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Aborted)
    }

    /// Phases that may appear in a session's phase plan.
    ///
    /// `Resting`, `Completed` and `Aborted` are implied, never planned.
    pub fn is_plannable(self) -> bool {
        !matches!(self, Phase::Resting | Phase::Completed | Phase::Aborted)
    }

    /// Display title shown on both devices.
    pub fn title(self) -> &'static str {
        match self {
            Phase::Warmup => "Warm-Up",
            Phase::Stretch => "Stretch",
            Phase::Drill => "Drills",
            Phase::Strides => "Strides",
            Phase::Sprint => "Sprints",
            Phase::Resting => "Rest",
            Phase::Cooldown => "Cooldown",
            Phase::Completed => "Complete",
            Phase::Aborted => "Stopped",
        }
    }

    /// Stable lowercase name, identical to the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Warmup => "warmup",
            Phase::Stretch => "stretch",
            Phase::Drill => "drill",
            Phase::Strides => "strides",
            Phase::Sprint => "sprint",
            Phase::Resting => "resting",
            Phase::Cooldown => "cooldown",
            Phase::Completed => "completed",
            Phase::Aborted => "aborted",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}
