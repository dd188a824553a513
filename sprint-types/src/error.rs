//! Error types for sprint-sync.

use thiserror::Error;

use crate::Phase;

/// Errors that can occur while encoding or decoding sync traffic.
#[derive(Debug, Error)]
pub enum SyncError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// Peer speaks a protocol revision we cannot read
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Invalid data format
    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// Reasons a [`SessionConfig`](crate::SessionConfig) is rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A rep block asks for zero reps.
    #[error("{phase} block must have at least one rep")]
    ZeroReps {
        /// The offending block.
        phase: Phase,
    },

    /// A rep distance is zero, negative or not a number.
    #[error("{phase} distance must be a positive number of meters, got {distance_m}")]
    InvalidDistance {
        /// The offending block.
        phase: Phase,
        /// The rejected distance.
        distance_m: f64,
    },

    /// A timed phase has a zero duration.
    #[error("{phase} duration must be at least one second")]
    ZeroDuration {
        /// The offending phase.
        phase: Phase,
    },

    /// The planned rep blocks add up to more reps than a rep index can hold.
    #[error("planned rep blocks add up to more than {} reps", u32::MAX)]
    TooManyReps,

    /// The phase plan is not a valid subsequence of the canonical order.
    #[error("invalid phase plan: {0}")]
    InvalidPlan(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SyncError::UnsupportedVersion(9);
        assert_eq!(err.to_string(), "unsupported protocol version: 9");

        let err = ConfigError::ZeroReps {
            phase: Phase::Sprint,
        };
        assert_eq!(err.to_string(), "sprint block must have at least one rep");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SyncError>();
        assert_send_sync::<ConfigError>();
    }
}
