//! Transport abstraction for the host/companion link.
//!
//! The transport moves opaque byte frames between the two devices. It knows
//! nothing about workouts; framing and encoding live in
//! [`Envelope`](sprintsync_types::Envelope).
//!
//! # Example
//!
//! ```ignore
//! use sprintsync_client::transport::{LoopbackTransport, Transport};
//!
//! let (host, companion, link) = LoopbackTransport::pair();
//! host.connect("companion").await?;
//! companion.connect("host").await?;
//!
//! host.send(b"frame").await?;
//! let frame = companion.recv().await?;
//!
//! // Take the watch out of range
//! link.set_reachable(false);
//! ```

mod loopback;
mod mock;

pub use loopback::{LinkControl, LoopbackTransport};
pub use mock::MockTransport;

use async_trait::async_trait;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Could not reach the peer.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected to the peer.
    #[error("not connected")]
    NotConnected,

    /// The link was closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Failed to send a frame.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Failed to receive a frame.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),
}

/// A bidirectional frame link to the peer device.
///
/// Implementations must be safe to share between the channel (sending) and
/// its reader task (receiving).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the link to the peer at `address`.
    async fn connect(&self, address: &str) -> Result<(), TransportError>;

    /// Send one frame.
    async fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Receive the next frame.
    async fn recv(&self) -> Result<Vec<u8>, TransportError>;

    /// Whether the link is currently usable.
    fn is_connected(&self) -> bool;

    /// Close the link.
    async fn close(&self);
}
