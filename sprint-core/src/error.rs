//! Errors surfaced to the issuer of a command.
//!
//! None of these are fatal: a failed `apply` leaves the state untouched.

use sprintsync_types::{Command, ConfigError, Phase};
use thiserror::Error;

/// Local usage errors from the workout core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkoutError {
    /// A countdown was started with a zero duration.
    #[error("phase duration must be at least one second")]
    InvalidDuration,

    /// A rep was completed while none was open.
    #[error("no rep is open")]
    RepNotOpen,

    /// The command is not valid in the current phase or run state.
    #[error("cannot {command} while in {phase}")]
    IllegalTransition {
        /// The rejected command.
        command: Command,
        /// Phase at the time of rejection.
        phase: Phase,
    },

    /// The session config failed validation.
    #[error("invalid session config: {0}")]
    Config(#[from] ConfigError),
}
