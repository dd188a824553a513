use sprintsync_core::WorkoutEvent;
use sprintsync_types::{Command, DeviceId, DeviceRole, WorkoutSnapshot};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use super::commands::*;
use crate::channel::{Delivery, SyncStatus};

/// Cheap, cloneable handle to a session controller.
///
/// Commands return the local optimistic snapshot as soon as this device's
/// state machine has applied them; they never wait for the peer.
#[derive(Clone)]
pub struct SessionHandle {
    role: DeviceRole,
    device_id: DeviceId,
    cmd_tx: mpsc::Sender<ControlCommand>,
    snapshots: watch::Receiver<WorkoutSnapshot>,
    status: watch::Receiver<SyncStatus>,
    events: broadcast::Sender<WorkoutEvent>,
}

impl SessionHandle {
    pub(crate) fn new(
        role: DeviceRole,
        device_id: DeviceId,
        cmd_tx: mpsc::Sender<ControlCommand>,
        snapshots: watch::Receiver<WorkoutSnapshot>,
        status: watch::Receiver<SyncStatus>,
        events: broadcast::Sender<WorkoutEvent>,
    ) -> Self {
        Self {
            role,
            device_id,
            cmd_tx,
            snapshots,
            status,
            events,
        }
    }

    /// Host or companion.
    pub fn role(&self) -> DeviceRole {
        self.role
    }

    /// This device's wire identity.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Run a user command on this device.
    pub async fn command(&self, command: Command) -> Result<WorkoutSnapshot, ControllerError> {
        let (tx, rx) = oneshot::channel();
        self.send(ControlCommand::Command { command, reply: tx })
            .await?;
        Ok(rx.await.map_err(|_| ControllerError::Closed)??)
    }

    /// Shorthand for `command(Command::Play)`.
    pub async fn play(&self) -> Result<WorkoutSnapshot, ControllerError> {
        self.command(Command::Play).await
    }

    /// Shorthand for `command(Command::Pause)`.
    pub async fn pause(&self) -> Result<WorkoutSnapshot, ControllerError> {
        self.command(Command::Pause).await
    }

    /// Shorthand for `command(Command::Skip)`.
    pub async fn skip(&self) -> Result<WorkoutSnapshot, ControllerError> {
        self.command(Command::Skip).await
    }

    /// Shorthand for `command(Command::Stop)`.
    pub async fn stop(&self) -> Result<WorkoutSnapshot, ControllerError> {
        self.command(Command::Stop).await
    }

    /// Shorthand for `command(Command::Reset)`.
    pub async fn reset(&self) -> Result<WorkoutSnapshot, ControllerError> {
        self.command(Command::Reset).await
    }

    /// Shorthand for `command(Command::AddTime { secs })`.
    pub async fn add_time(&self, secs: u32) -> Result<WorkoutSnapshot, ControllerError> {
        self.command(Command::AddTime { secs }).await
    }

    /// Feed the cumulative session odometer, in meters.
    pub async fn distance(&self, odometer_m: f64) -> Result<(), ControllerError> {
        self.send(ControlCommand::Distance { odometer_m }).await
    }

    /// Ask the peer's state machine to run `command` (remote control).
    pub async fn remote_command(&self, command: Command) -> Result<Delivery, ControllerError> {
        let (tx, rx) = oneshot::channel();
        self.send(ControlCommand::RequestPeer { command, reply: tx })
            .await?;
        Ok(rx.await.map_err(|_| ControllerError::Closed)??)
    }

    /// Drive the phase clock now instead of waiting for the next tick.
    pub async fn tick(&self) -> Result<(), ControllerError> {
        self.send(ControlCommand::Tick).await
    }

    /// Retry the peer link now instead of waiting for the backoff timer.
    pub async fn reconnect(&self) -> Result<(), ControllerError> {
        self.send(ControlCommand::Reconnect).await
    }

    /// Messages waiting for the peer.
    pub async fn pending_count(&self) -> Result<usize, ControllerError> {
        let (tx, rx) = oneshot::channel();
        self.send(ControlCommand::PendingCount { reply: tx }).await?;
        rx.await.map_err(|_| ControllerError::Closed)
    }

    /// Latest local snapshot.
    pub fn snapshot(&self) -> WorkoutSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Watch the local snapshot.
    pub fn snapshots(&self) -> watch::Receiver<WorkoutSnapshot> {
        self.snapshots.clone()
    }

    /// Subscribe to workout events from now on.
    pub fn events(&self) -> broadcast::Receiver<WorkoutEvent> {
        self.events.subscribe()
    }

    /// Watch link health.
    pub fn sync_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.clone()
    }

    /// Stop the controller. Other clones stop working too.
    pub async fn shutdown(&self) -> Result<(), ControllerError> {
        self.send(ControlCommand::Shutdown).await
    }

    async fn send(&self, cmd: ControlCommand) -> Result<(), ControllerError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| ControllerError::Closed)
    }
}
