//! CAN message model
//!
//! A message is an opaque 29-bit identifier plus 0 to 8 payload bytes. The
//! bridge never interprets payloads; device-specific encoding lives in the
//! protocol clients built on top of it.

use crate::error::BridgeError;

/// Largest valid 29-bit CAN identifier
pub const MAX_ID: u32 = (1 << 29) - 1;

/// Maximum CAN payload length in bytes
pub const MAX_PAYLOAD_LEN: usize = 8;

/// One CAN message, immutable once constructed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanMessage {
    id: u32,
    payload: Vec<u8>,
}

impl CanMessage {
    /// Create a message, validating the identifier range and payload length
    pub fn new(id: u32, payload: Vec<u8>) -> Result<Self, BridgeError> {
        if id > MAX_ID {
            return Err(BridgeError::InvalidId(id));
        }
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(BridgeError::PayloadTooLong(payload.len()));
        }
        Ok(Self { id, payload })
    }

    /// The 29-bit CAN identifier
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The message payload (0 to 8 bytes)
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}
