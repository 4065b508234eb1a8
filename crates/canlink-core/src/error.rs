//! Bridge errors

use thiserror::Error;

/// Errors surfaced by the bridge and its transports
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Failed to open transport: {0}")]
    Connection(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("CAN identifier {0:#010x} exceeds 29 bits")]
    InvalidId(u32),

    #[error("Payload of {0} bytes exceeds the 8-byte CAN limit")]
    PayloadTooLong(usize),

    #[error("A token is already pending for identifier {0:#010x}")]
    TokenPending(u32),

    #[error("Wait cancelled: bridge shut down")]
    Cancelled,

    #[error("Bridge is not running")]
    NotRunning,
}

/// Recoverable framing faults.
///
/// These are handled by resetting the receive state machine and waiting for
/// the next frame boundary. They are counted for diagnostics but never
/// returned to callers.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingError {
    #[error("escape marker followed by invalid substitute code {0:#04x}")]
    BadEscape(u8),

    #[error("declared body length {0} outside the valid 4..=12 range")]
    LengthOutOfRange(u8),

    #[error("identifier {0:#010x} has reserved high bits set")]
    ReservedIdBits(u32),
}
