//! Envelope - the wire format wrapper for all sync messages.

use serde::{Deserialize, Serialize};

use crate::{DeviceId, DeviceRole, Message, SyncError, Timestamp, Version};

/// Current protocol revision.
///
/// Field additions keep the revision; only incompatible changes bump it.
pub const PROTOCOL_VERSION: u8 = 1;

/// The envelope wraps every protocol message with routing and ordering metadata.
///
/// Encoded as MessagePack with named fields, so a newer peer can add fields
/// without breaking an older one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol revision
    pub protocol: u8,
    /// Sender's device ID
    pub sender: DeviceId,
    /// Sender's role in the pair
    pub role: DeviceRole,
    /// Per-sender sequence number, increasing per envelope
    pub seq: u64,
    /// Sender's replica version when the message was produced
    pub version: Version,
    /// Sender's replica `updated_at` when the message was produced
    pub updated_at: Timestamp,
    /// When the envelope was handed to the channel
    pub sent_at: Timestamp,
    /// The payload
    pub message: Message,
}

impl Envelope {
    /// Create a new envelope for sending.
    pub fn new(
        sender: DeviceId,
        role: DeviceRole,
        seq: u64,
        version: Version,
        updated_at: Timestamp,
        message: Message,
    ) -> Self {
        Self {
            protocol: PROTOCOL_VERSION,
            sender,
            role,
            seq,
            version,
            updated_at,
            sent_at: Timestamp::now(),
            message,
        }
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SyncError> {
        rmp_serde::to_vec_named(self).map_err(SyncError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    ///
    /// Rejects envelopes from a newer, incompatible protocol revision.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SyncError> {
        let envelope: Self = rmp_serde::from_slice(bytes).map_err(SyncError::Deserialization)?;
        if envelope.protocol == 0 || envelope.protocol > PROTOCOL_VERSION {
            return Err(SyncError::UnsupportedVersion(envelope.protocol));
        }
        Ok(envelope)
    }
}
