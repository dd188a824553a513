//! # sprint-client
//!
//! Runtime glue for sprint-sync: runs one device's workout replica and keeps
//! it converged with the peer device.
//!
//! ## Features
//!
//! - **Actor per device**: [`SessionController`] owns the state machine;
//!   [`SessionHandle`] is the cheap, cloneable way in
//! - **Offline first**: commands apply locally at once; messages queue while
//!   the peer is out of range and flush on reconnect
//! - **Transport abstraction**: pluggable link ([`LoopbackTransport`],
//!   [`MockTransport`])
//! - **Injectable time**: [`Clock`] implementations for real, manual and
//!   accelerated time
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sprintsync_client::{ControllerConfig, LoopbackTransport, SessionController, SystemClock};
//! use sprintsync_types::{DeviceRole, SessionConfig};
//!
//! let (phone, watch, _link) = LoopbackTransport::pair();
//! let clock = Arc::new(SystemClock);
//! let config = SessionConfig::sprints(3, 40.0, 60);
//!
//! let host = SessionController::start(
//!     config.clone(),
//!     ControllerConfig::new(DeviceRole::Host),
//!     phone,
//!     clock.clone(),
//! )?;
//! let companion = SessionController::start(
//!     config,
//!     ControllerConfig::new(DeviceRole::Companion),
//!     watch,
//!     clock,
//! )?;
//!
//! host.play().await?;
//! companion.pause().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod clock;
pub mod controller;
pub mod scheduler;
pub mod transport;

pub use channel::{ChannelConfig, ChannelError, Delivery, MessageChannel, SyncStatus};
pub use clock::{Clock, ManualClock, ScaledClock, SystemClock};
pub use controller::{ControllerConfig, ControllerError, SessionController, SessionHandle};
pub use scheduler::{Scheduled, ScheduledHandle, Scheduler};
pub use transport::{LinkControl, LoopbackTransport, MockTransport, Transport, TransportError};
