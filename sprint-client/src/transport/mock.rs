//! Scripted transport for channel tests.
//!
//! Records every frame sent, hands out queued inbound frames and can be put
//! out of range to exercise queueing and reconnect.

use super::{Transport, TransportError};
use async_trait::async_trait;
use sprintsync_types::{Envelope, Message};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Scripted transport. Clones share state, so a test keeps one clone while
/// the channel owns another.
#[derive(Debug, Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Debug)]
struct MockState {
    reachable: bool,
    connected: bool,
    address: Option<String>,
    connects: usize,
    sent: Vec<Vec<u8>>,
    inbound: VecDeque<Vec<u8>>,
    fail_next_send: Option<String>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            reachable: true,
            connected: false,
            address: None,
            connects: 0,
            sent: Vec::new(),
            inbound: VecDeque::new(),
            fail_next_send: None,
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// A reachable, not yet connected transport.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Put the peer in or out of range. Going out of range drops the link.
    pub fn set_reachable(&self, reachable: bool) {
        let mut state = self.inner.lock().unwrap();
        state.reachable = reachable;
        if !reachable {
            state.connected = false;
        }
    }

    /// Queue an envelope for the next `recv()`.
    pub fn push_inbound(&self, envelope: &Envelope) {
        let bytes = envelope.to_bytes().unwrap();
        self.inner.lock().unwrap().inbound.push_back(bytes);
    }

    /// Queue a raw frame for the next `recv()`.
    pub fn push_raw(&self, frame: Vec<u8>) {
        self.inner.lock().unwrap().inbound.push_back(frame);
    }

    /// Every frame sent so far, decoded.
    pub fn sent_envelopes(&self) -> Vec<Envelope> {
        let state = self.inner.lock().unwrap();
        state
            .sent
            .iter()
            .filter_map(|bytes| Envelope::from_bytes(bytes).ok())
            .collect()
    }

    /// Payloads of every frame sent so far.
    pub fn sent_messages(&self) -> Vec<Message> {
        self.sent_envelopes()
            .into_iter()
            .map(|envelope| envelope.message)
            .collect()
    }

    /// Number of successful `connect()` calls.
    pub fn connect_count(&self) -> usize {
        self.inner.lock().unwrap().connects
    }

    /// Address given to the last successful `connect()`.
    pub fn connected_address(&self) -> Option<String> {
        self.inner.lock().unwrap().address.clone()
    }

    /// Fail the next `send()` while staying in range.
    pub fn fail_next_send(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_send = Some(error.to_string());
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let mut state = self.inner.lock().unwrap();
        if !state.reachable {
            return Err(TransportError::ConnectionFailed(format!(
                "{} out of range",
                address
            )));
        }
        state.connected = true;
        state.connects += 1;
        state.address = Some(address.to_string());
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.inner.lock().unwrap();
        if !state.reachable {
            state.connected = false;
            return Err(TransportError::SendFailed("peer out of range".into()));
        }
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if let Some(error) = state.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }
        state.sent.push(data.to_vec());
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        let mut state = self.inner.lock().unwrap();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state
            .inbound
            .pop_front()
            .ok_or(TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().connected
    }

    async fn close(&self) {
        self.inner.lock().unwrap().connected = false;
    }
}
