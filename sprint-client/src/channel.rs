//! MessageChannel - envelopes, queueing and reconnect over a [`Transport`].
//!
//! The channel never blocks a sender on the peer. While the link is down,
//! outgoing messages wait in an [`OutboundQueue`]; the [`LinkState`] machine
//! from sprint-core decides when to retry, and this module performs the I/O
//! it asks for.
//!
//! ```text
//! SessionController → MessageChannel → Transport → peer
//!                          ↓
//!          sprint-core (OutboundQueue, LinkState)
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use sprintsync_core::{
    BackoffPolicy, BufferError, Enqueued, LinkAction, LinkEvent, LinkNotice, LinkState,
    OutboundQueue,
};
use sprintsync_types::{DeviceId, DeviceRole, Envelope, Message, SyncError, Timestamp, Version};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::scheduler::{Scheduled, ScheduledHandle, Scheduler};
use crate::transport::{Transport, TransportError};

/// Channel errors. An unreachable peer is not one of them; it only queues.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] SyncError),

    /// The outbound queue cannot take the message.
    #[error("{0}")]
    QueueFull(#[from] BufferError),
}

/// Link health as seen by the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// Peer reachable, nothing waiting.
    Connected,
    /// Connecting, or connected with messages still going out.
    Syncing,
    /// Peer unreachable; messages are queued.
    Offline,
    /// Something the user should see, such as a full queue.
    Error(String),
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Connected => write!(f, "connected"),
            SyncStatus::Syncing => write!(f, "syncing"),
            SyncStatus::Offline => write!(f, "offline"),
            SyncStatus::Error(reason) => write!(f, "error: {}", reason),
        }
    }
}

/// What `send` did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the transport.
    Sent,
    /// Waiting in the outbound queue.
    Queued,
}

/// Channel settings.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Peer address passed to [`Transport::connect`].
    pub address: String,
    /// Outbound queue bound.
    pub queue_capacity: usize,
    /// Reconnect backoff.
    pub backoff: BackoffPolicy,
    /// Pause between receive attempts while the link is down.
    pub recv_poll: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            address: "peer".to_string(),
            queue_capacity: 64,
            backoff: BackoffPolicy::default(),
            recv_poll: Duration::from_millis(50),
        }
    }
}

impl ChannelConfig {
    /// Set the peer address.
    pub fn with_address(mut self, address: &str) -> Self {
        self.address = address.to_string();
        self
    }

    /// Set the outbound queue bound.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the reconnect backoff.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Sends and receives [`Envelope`]s for one device.
pub struct MessageChannel<T: Transport + 'static> {
    transport: Arc<T>,
    config: ChannelConfig,
    sender: DeviceId,
    role: DeviceRole,
    seq: u64,
    stamp: (Version, Timestamp),
    queue: OutboundQueue,
    link: LinkState,
    scheduler: Scheduler,
    reconnect_timer: Option<ScheduledHandle>,
    clock: Arc<dyn Clock>,
    status: watch::Sender<SyncStatus>,
    reader: Option<JoinHandle<()>>,
}

impl<T: Transport + 'static> MessageChannel<T> {
    /// Create a channel. Nothing is connected until [`reconnect`](Self::reconnect).
    pub fn new(
        transport: T,
        sender: DeviceId,
        role: DeviceRole,
        config: ChannelConfig,
        scheduler: Scheduler,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::Offline);
        Self {
            transport: Arc::new(transport),
            queue: OutboundQueue::new(config.queue_capacity),
            config,
            sender,
            role,
            seq: 0,
            stamp: (Version::zero(), Timestamp::default()),
            link: LinkState::new(),
            scheduler,
            reconnect_timer: None,
            clock,
            status,
            reader: None,
        }
    }

    /// Deliver every decoded inbound envelope to `handler`.
    ///
    /// Runs a reader task until the channel is dropped. Frames that fail to
    /// decode and echoes of our own envelopes are dropped.
    pub fn on_receive<F>(&mut self, mut handler: F)
    where
        F: FnMut(Envelope) + Send + 'static,
    {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        let transport = Arc::clone(&self.transport);
        let own_id = self.sender;
        let poll = self.config.recv_poll;
        self.reader = Some(tokio::spawn(async move {
            loop {
                match transport.recv().await {
                    Ok(bytes) => match Envelope::from_bytes(&bytes) {
                        Ok(envelope) if envelope.sender == own_id => {}
                        Ok(envelope) => handler(envelope),
                        Err(e) => tracing::warn!(error = %e, "Dropping undecodable frame"),
                    },
                    Err(TransportError::NotConnected) | Err(TransportError::ConnectionClosed) => {
                        tokio::time::sleep(poll).await;
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "Receive failed");
                        tokio::time::sleep(poll).await;
                    }
                }
            }
        }));
    }

    /// Version and timestamp stamped on envelopes that carry no snapshot.
    pub fn set_stamp(&mut self, version: Version, updated_at: Timestamp) {
        self.stamp = (version, updated_at);
    }

    /// Send a message, or queue it if the peer is unreachable.
    pub async fn send(&mut self, message: Message) -> Result<Delivery, ChannelError> {
        if self.link.is_connected() && self.queue.is_empty() {
            match self.transmit(&message).await {
                Ok(()) => {
                    self.refresh_status();
                    return Ok(Delivery::Sent);
                }
                Err(ChannelError::Transport(e)) => {
                    tracing::debug!(kind = message.kind(), error = %e, "Send failed, queueing");
                    self.drive(LinkEvent::SendFailed {
                        error: e.to_string(),
                    })
                    .await;
                }
                Err(e) => return Err(e),
            }
        }

        self.enqueue(message)?;
        if self.link.is_connected() {
            self.flush().await?;
            if self.queue.is_empty() {
                return Ok(Delivery::Sent);
            }
        }
        Ok(Delivery::Queued)
    }

    fn enqueue(&mut self, message: Message) -> Result<(), ChannelError> {
        let kind = message.kind();
        match self.queue.enqueue(message) {
            Ok(Enqueued::Queued) => {}
            Ok(Enqueued::Coalesced { dropped }) => {
                tracing::debug!(kind, dropped, "Outbound queue coalesced stale snapshots");
            }
            Err(e) => {
                tracing::warn!(kind, error = %e, "Outbound message refused");
                self.status.send_replace(SyncStatus::Error(e.to_string()));
                return Err(e.into());
            }
        }
        self.refresh_status();
        Ok(())
    }

    /// Send everything queued. Returns how many messages went out.
    ///
    /// Does nothing while the link is down.
    pub async fn flush(&mut self) -> Result<usize, ChannelError> {
        if !self.link.is_connected() {
            return Ok(0);
        }
        match self.drain_queue().await {
            Ok(sent) => {
                self.refresh_status();
                Ok(sent)
            }
            Err(ChannelError::Transport(e)) => {
                self.drive(LinkEvent::SendFailed {
                    error: e.to_string(),
                })
                .await;
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    /// Try to bring the link up. Returns true if it came up during this call.
    ///
    /// Called once at start and again for every `Scheduled::Reconnect`.
    pub async fn reconnect(&mut self) -> bool {
        let event = match self.link {
            LinkState::Offline => LinkEvent::ConnectRequested,
            LinkState::Reconnecting { .. } => LinkEvent::ReconnectTimer,
            LinkState::Connecting | LinkState::Connected { .. } => return false,
        };
        self.drive(event).await
    }

    /// Drop the link and stop retrying. Queued messages are kept.
    pub async fn disconnect(&mut self) {
        self.drive(LinkEvent::DisconnectRequested).await;
    }

    /// Number of messages waiting for the peer.
    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// Current link health.
    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Watch link health.
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// The link is up.
    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Current link state.
    pub fn link(&self) -> &LinkState {
        &self.link
    }

    async fn transmit(&mut self, message: &Message) -> Result<(), ChannelError> {
        let (version, updated_at) = match message {
            Message::Snapshot(snapshot) => (snapshot.version, snapshot.updated_at),
            _ => self.stamp,
        };
        self.seq += 1;
        let mut envelope = Envelope::new(
            self.sender,
            self.role,
            self.seq,
            version,
            updated_at,
            message.clone(),
        );
        envelope.sent_at = self.clock.now();
        let bytes = envelope.to_bytes()?;
        self.transport.send(&bytes).await?;
        tracing::trace!(kind = message.kind(), seq = self.seq, %version, "Envelope sent");
        Ok(())
    }

    async fn drain_queue(&mut self) -> Result<usize, ChannelError> {
        let mut sent = 0;
        while let Some(message) = self.queue.dequeue() {
            match self.transmit(&message).await {
                Ok(()) => sent += 1,
                Err(ChannelError::Transport(e)) => {
                    self.queue.requeue_front(message);
                    return Err(e.into());
                }
                Err(e) => {
                    tracing::warn!(kind = message.kind(), error = %e, "Dropping unencodable message");
                }
            }
        }
        if sent > 0 {
            tracing::debug!(sent, "Flushed outbound queue");
        }
        Ok(sent)
    }

    /// Run the link machine and perform the I/O its actions ask for.
    async fn drive(&mut self, event: LinkEvent) -> bool {
        let mut pending = VecDeque::from([event]);
        let mut came_up = false;

        while let Some(event) = pending.pop_front() {
            let state = std::mem::take(&mut self.link);
            let (next, actions) = state.on_event(event, &self.config.backoff);
            self.link = next;

            for action in actions {
                match action {
                    LinkAction::Connect => {
                        match self.transport.connect(&self.config.address).await {
                            Ok(()) => pending.push_back(LinkEvent::ConnectSucceeded {
                                at: self.clock.now(),
                            }),
                            Err(e) => pending.push_back(LinkEvent::ConnectFailed {
                                error: e.to_string(),
                            }),
                        }
                    }
                    LinkAction::Disconnect => self.transport.close().await,
                    LinkAction::Flush => {
                        came_up = true;
                        self.cancel_reconnect();
                        self.status.send_replace(SyncStatus::Syncing);
                        match self.drain_queue().await {
                            Ok(_) => {}
                            Err(ChannelError::Transport(e)) => {
                                came_up = false;
                                pending.push_back(LinkEvent::SendFailed {
                                    error: e.to_string(),
                                });
                            }
                            Err(e) => tracing::warn!(error = %e, "Flush failed"),
                        }
                    }
                    LinkAction::StartReconnectTimer { delay } => {
                        self.cancel_reconnect();
                        tracing::debug!(?delay, "Reconnect scheduled");
                        self.reconnect_timer =
                            Some(self.scheduler.after(delay, Scheduled::Reconnect));
                    }
                    LinkAction::CancelReconnect => self.cancel_reconnect(),
                    LinkAction::EmitEvent(notice) => log_notice(&notice),
                }
            }
        }

        self.refresh_status();
        came_up
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.cancel();
        }
    }

    fn refresh_status(&mut self) {
        let status = match self.link {
            LinkState::Connected { .. } if self.queue.is_empty() => SyncStatus::Connected,
            LinkState::Connected { .. } | LinkState::Connecting => SyncStatus::Syncing,
            LinkState::Offline | LinkState::Reconnecting { .. } => SyncStatus::Offline,
        };
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

impl<T: Transport + 'static> Drop for MessageChannel<T> {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.cancel_reconnect();
    }
}

fn log_notice(notice: &LinkNotice) {
    match notice {
        LinkNotice::Connected => tracing::info!("Peer link up"),
        LinkNotice::ConnectionFailed { error } => {
            tracing::info!(%error, "Peer unreachable")
        }
        LinkNotice::Disconnected { reason } => tracing::warn!(%reason, "Peer link lost"),
        LinkNotice::ReconnectFailed { attempt, error } => {
            tracing::debug!(attempt, %error, "Reconnect attempt failed")
        }
    }
}
