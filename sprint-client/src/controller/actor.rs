use std::sync::Arc;

use sprintsync_core::{
    Action, DistanceUpdate, Input, ReconcilerConfig, WorkoutError, WorkoutEvent,
    WorkoutStateMachine,
};
use sprintsync_types::{
    CommandRequest, DeviceRole, Envelope, Message, SessionStart, SyncRequest, Timestamp, Version,
    WorkoutSnapshot,
};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::Instrument;

use super::commands::*;
use crate::channel::MessageChannel;
use crate::clock::Clock;
use crate::scheduler::{Scheduled, ScheduledHandle};
use crate::transport::Transport;

/// Everything the actor reads from.
pub(crate) struct Inboxes {
    pub cmd_rx: mpsc::Receiver<ControlCommand>,
    pub inbound_rx: mpsc::UnboundedReceiver<Envelope>,
    pub scheduled_rx: mpsc::UnboundedReceiver<Scheduled>,
    pub ticker: ScheduledHandle,
}

/// Owns the device's replica. All mutation happens on this task.
pub(crate) struct SessionActor<T: Transport + 'static> {
    pub machine: WorkoutStateMachine,
    pub reconciler: ReconcilerConfig,
    pub channel: MessageChannel<T>,
    pub clock: Arc<dyn Clock>,
    pub started_at: Timestamp,
    pub snapshots: watch::Sender<WorkoutSnapshot>,
    pub events: broadcast::Sender<WorkoutEvent>,
}

impl<T: Transport + 'static> SessionActor<T> {
    pub(crate) async fn run(self, inboxes: Inboxes) {
        let span = tracing::info_span!(
            "device",
            role = %self.machine.role(),
            session = %self.machine.session()
        );
        self.run_inner(inboxes).instrument(span).await;
    }

    async fn run_inner(mut self, inboxes: Inboxes) {
        let Inboxes {
            mut cmd_rx,
            mut inbound_rx,
            mut scheduled_rx,
            ticker,
        } = inboxes;

        tracing::info!("Session controller started");
        self.reconnect().await;

        loop {
            tokio::select! {
                biased;

                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(ControlCommand::Shutdown) | None => {
                            tracing::info!("Session controller shutting down");
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd).await,
                    }
                }

                Some(envelope) = inbound_rx.recv() => {
                    self.handle_envelope(envelope).await;
                }

                Some(event) = scheduled_rx.recv() => {
                    match event {
                        Scheduled::Tick => self.tick().await,
                        Scheduled::Reconnect => self.reconnect().await,
                    }
                }
            }
        }

        ticker.cancel();
        self.channel.disconnect().await;
        tracing::info!("Session controller exited");
    }

    async fn handle_command(&mut self, cmd: ControlCommand) {
        match cmd {
            ControlCommand::Command { command, reply } => {
                let result = self.apply(Input::Command(command)).await;
                if let Err(e) = &result {
                    tracing::debug!(%command, error = %e, "Command rejected");
                }
                let _ = reply.send(result);
            }
            ControlCommand::Distance { odometer_m } => {
                let at = self.clock.now();
                let update = DistanceUpdate { odometer_m, at };
                if let Err(e) = self.apply(Input::Distance(update)).await {
                    tracing::debug!(odometer_m, error = %e, "Distance reading rejected");
                }
            }
            ControlCommand::RequestPeer { command, reply } => {
                let request = CommandRequest {
                    command,
                    issued_at: self.clock.now(),
                };
                let result = self.channel.send(Message::Command(request)).await;
                let _ = reply.send(result);
            }
            ControlCommand::Tick => self.tick().await,
            ControlCommand::Reconnect => self.reconnect().await,
            ControlCommand::PendingCount { reply } => {
                let _ = reply.send(self.channel.pending_count());
            }
            ControlCommand::Shutdown => {}
        }
    }

    async fn handle_envelope(&mut self, envelope: Envelope) {
        tracing::trace!(
            kind = envelope.message.kind(),
            seq = envelope.seq,
            from = %envelope.role,
            version = %envelope.version,
            "Envelope received"
        );
        let from = envelope.role;
        match envelope.message {
            Message::Snapshot(snapshot) => {
                if let Err(e) = self.apply(Input::Remote(snapshot)).await {
                    tracing::debug!(error = %e, "Peer snapshot rejected");
                }
            }
            Message::Command(request) => match self.apply(Input::Command(request.command)).await {
                Ok(_) => tracing::info!(command = %request.command, %from, "Ran peer command"),
                Err(e) => {
                    tracing::info!(command = %request.command, %from, error = %e, "Peer command rejected")
                }
            },
            Message::SessionStart(start) => self.join(start),
            Message::SyncRequest(request) => self.answer_sync(request).await,
        }
    }

    async fn tick(&mut self) {
        if let Err(e) = self.apply(Input::Tick).await {
            tracing::warn!(error = %e, "Tick failed");
        }
    }

    async fn apply(&mut self, input: Input) -> Result<WorkoutSnapshot, WorkoutError> {
        let at = self.clock.now();
        let actions = self.machine.apply(input, at)?;
        self.execute(actions).await;
        Ok(self.machine.snapshot().clone())
    }

    async fn execute(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Publish(snapshot) | Action::Rebroadcast(snapshot) => {
                    self.channel.set_stamp(snapshot.version, snapshot.updated_at);
                    self.snapshots.send_replace(snapshot.clone());
                    self.send(Message::Snapshot(snapshot)).await;
                }
                Action::Refresh(snapshot) => {
                    self.snapshots.send_replace(snapshot);
                }
                Action::EmitEvent(event) => {
                    tracing::debug!(?event, "Workout event");
                    let _ = self.events.send(event);
                }
            }
        }
    }

    async fn send(&mut self, message: Message) {
        let kind = message.kind();
        if let Err(e) = self.channel.send(message).await {
            tracing::warn!(kind, error = %e, "Message not delivered");
        }
    }

    async fn reconnect(&mut self) {
        if self.channel.reconnect().await {
            self.on_link_up().await;
        }
    }

    /// Announce (host) and ask the peer for its state.
    async fn on_link_up(&mut self) {
        if self.machine.role() == DeviceRole::Host {
            self.announce().await;
        }
        let snapshot = self.machine.snapshot();
        let request = SyncRequest {
            session: Some(snapshot.session),
            known_version: snapshot.version,
        };
        self.send(Message::SyncRequest(request)).await;
    }

    async fn announce(&mut self) {
        let start = SessionStart {
            session: self.machine.session(),
            config: self.machine.config().clone(),
            started_at: self.started_at,
        };
        self.send(Message::SessionStart(start)).await;
    }

    /// Take over the peer's session while this replica is untouched.
    ///
    /// Once either side has changed its replica, sessions are settled by
    /// snapshot versions instead.
    fn join(&mut self, start: SessionStart) {
        if start.session == self.machine.session() {
            return;
        }
        if self.machine.snapshot().version != Version::zero() {
            tracing::debug!(session = %start.session, "Ignoring peer session; local session under way");
            return;
        }
        let role = self.machine.role();
        match WorkoutStateMachine::with_session(start.config, role, start.session, self.clock.now()) {
            Ok(machine) => {
                self.machine = machine.with_reconciler(self.reconciler);
                self.started_at = start.started_at;
                let snapshot = self.machine.snapshot().clone();
                self.channel.set_stamp(snapshot.version, snapshot.updated_at);
                self.snapshots.send_replace(snapshot);
                tracing::info!(session = %start.session, "Joined peer session");
            }
            Err(e) => tracing::warn!(error = %e, "Peer session config rejected"),
        }
    }

    async fn answer_sync(&mut self, request: SyncRequest) {
        if self.machine.role() == DeviceRole::Host {
            self.announce().await;
        }
        let snapshot = self.machine.snapshot().clone();
        if snapshot.version == Version::zero() {
            return;
        }
        tracing::debug!(
            known = %request.known_version,
            local = %snapshot.version,
            "Answering sync request"
        );
        self.send(Message::Snapshot(snapshot)).await;
    }
}
