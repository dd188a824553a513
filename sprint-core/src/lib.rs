//! # sprint-core
//!
//! Pure logic for sprint-sync (no I/O, instant tests).
//!
//! This crate implements the workout state machine, its timers, the rep
//! ledger, replica reconciliation and the link/queue bookkeeping without any
//! network or clock access. Every operation takes the current instant as an
//! argument, which keeps behavior deterministic:
//! - Instant unit tests (no mocks, no async)
//! - Same input, same output on both devices
//! - Easy reasoning about state transitions
//!
//! The actual I/O (transport, timers, wall clock) is performed by
//! `sprint-client`, which interprets the actions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod clock;
pub mod error;
pub mod link;
pub mod machine;
pub mod reconcile;
pub mod reps;

pub use buffer::{BufferError, Enqueued, OutboundQueue};
pub use clock::{PhaseClock, Stopwatch};
pub use error::WorkoutError;
pub use link::{Action as LinkAction, BackoffPolicy, Event as LinkEvent, LinkNotice, LinkState};
pub use machine::{Action, DistanceUpdate, Input, Outcome, WorkoutEvent, WorkoutStateMachine};
pub use reconcile::{Decision, Merge, ReconcilerConfig, ReplicaReconciler};
pub use reps::{RepLedger, RepTracker};
