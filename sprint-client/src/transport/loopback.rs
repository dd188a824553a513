//! In-process link between two devices.
//!
//! Used by the simulator and the two-device tests. A shared [`LinkControl`]
//! takes the pair in and out of range.

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Range switch shared by both ends of a loopback pair.
#[derive(Debug, Clone)]
pub struct LinkControl {
    reachable: Arc<AtomicBool>,
}

impl LinkControl {
    /// Put the pair in or out of range.
    ///
    /// Frames already in flight are still delivered.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
        tracing::debug!(reachable, "Loopback link range changed");
    }

    /// Whether the pair is in range.
    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

/// One end of an in-process device pair.
#[derive(Debug)]
pub struct LoopbackTransport {
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    incoming: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    connected: AtomicBool,
    link: LinkControl,
}

impl LoopbackTransport {
    /// Two connected ends and the switch that controls their range.
    pub fn pair() -> (Self, Self, LinkControl) {
        let link = LinkControl {
            reachable: Arc::new(AtomicBool::new(true)),
        };
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let a = Self {
            outgoing: b_tx,
            incoming: Mutex::new(a_rx),
            connected: AtomicBool::new(false),
            link: link.clone(),
        };
        let b = Self {
            outgoing: a_tx,
            incoming: Mutex::new(b_rx),
            connected: AtomicBool::new(false),
            link: link.clone(),
        };
        (a, b, link)
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        if !self.link.is_reachable() {
            return Err(TransportError::ConnectionFailed(format!(
                "{} out of range",
                address
            )));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if !self.link.is_reachable() {
            self.connected.store(false, Ordering::SeqCst);
            return Err(TransportError::SendFailed("peer out of range".into()));
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.outgoing
            .send(data.to_vec())
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        let mut incoming = self.incoming.lock().await;
        incoming.recv().await.ok_or(TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.link.is_reachable()
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}
