use std::time::Duration;

use sprintsync_core::{ReconcilerConfig, WorkoutError};
use sprintsync_types::{Command, DeviceId, DeviceRole, WorkoutSnapshot};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::channel::{ChannelConfig, ChannelError, Delivery};

/// Controller errors.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The state machine refused the input.
    #[error(transparent)]
    Workout(#[from] WorkoutError),

    /// The message could not be sent or queued.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// The controller has shut down.
    #[error("session controller stopped")]
    Closed,
}

/// Per-device controller settings.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Host or companion.
    pub role: DeviceRole,
    /// This device's identity on the wire.
    pub device_id: DeviceId,
    /// Real-time period of the phase clock tick.
    pub tick_interval: Duration,
    /// Conflict resolution tuning.
    pub reconciler: ReconcilerConfig,
    /// Link settings.
    pub channel: ChannelConfig,
}

impl ControllerConfig {
    /// Defaults for `role` with a fresh device id.
    pub fn new(role: DeviceRole) -> Self {
        Self {
            role,
            device_id: DeviceId::random(),
            tick_interval: Duration::from_secs(1),
            reconciler: ReconcilerConfig::default(),
            channel: ChannelConfig::default(),
        }
    }

    /// Set the tick period.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the reconciliation tuning.
    pub fn with_reconciler(mut self, reconciler: ReconcilerConfig) -> Self {
        self.reconciler = reconciler;
        self
    }

    /// Set the link settings.
    pub fn with_channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }
}

/// Requests sent to the session actor. Each that needs an answer embeds a
/// oneshot for the reply.
pub(crate) enum ControlCommand {
    Command {
        command: Command,
        reply: oneshot::Sender<Result<WorkoutSnapshot, WorkoutError>>,
    },
    Distance {
        odometer_m: f64,
    },
    RequestPeer {
        command: Command,
        reply: oneshot::Sender<Result<Delivery, ChannelError>>,
    },
    Tick,
    Reconnect,
    PendingCount {
        reply: oneshot::Sender<usize>,
    },
    Shutdown,
}
