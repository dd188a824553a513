//! # sprint-types
//!
//! Wire format and data types for sprint-sync.
//!
//! This crate provides the foundational types shared by every sprint-sync crate:
//! - [`DeviceId`], [`SessionId`], [`Timestamp`], [`Version`] - Identity and ordering types
//! - [`Phase`], [`SessionConfig`] - The shape of a sprint session
//! - [`WorkoutSnapshot`], [`RepRecord`] - The replicated workout state
//! - [`Envelope`], [`Message`] - What travels between host and companion
//! - [`SyncError`], [`ConfigError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod envelope;
mod error;
mod ids;
mod messages;
mod phase;
mod snapshot;

pub use config::{RepBlock, SessionConfig, SprintBlock};
pub use envelope::{Envelope, PROTOCOL_VERSION};
pub use error::{ConfigError, SyncError};
pub use ids::{DeviceId, DeviceRole, SessionId, Timestamp, Version};
pub use messages::{Command, CommandRequest, Message, SessionStart, SyncRequest};
pub use phase::Phase;
pub use snapshot::{RepRecord, WorkoutSnapshot};
