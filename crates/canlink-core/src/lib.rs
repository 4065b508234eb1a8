//! # CanLink Core Library
//!
//! Host-side bridge for controlling motor-controller devices on a CAN
//! network over a byte-oriented serial link.

#![warn(missing_docs)]

//!
//! This library provides:
//! - Byte-stuffed serial framing of CAN messages (29-bit id, 0-8 byte payload)
//! - An incremental, self-resynchronizing receive state machine
//! - Request/reply correlation through one-shot tokens
//! - Per-identifier multicast callback dispatch
//! - A pluggable transport layer (serial port, test loopback)
//!
//! The bridge never interprets payloads, never retries sends, and does not
//! guarantee delivery; it guarantees correct framing, correct
//! demultiplexing, and correct waking of waiters.
//!
//! ## Example
//!
//! ```rust,ignore
//! use canlink_core::prelude::*;
//!
//! let bridge = CanBridge::open(&BridgeConfig {
//!     port_name: "/dev/ttyUSB0".into(),
//!     ..Default::default()
//! })?;
//!
//! // Expect a reply, then send the request
//! let token = bridge.recv(0x0205_5c00, 8)?;
//! bridge.send(0x0205_5800, &[0x01, 0x02])?;
//! token.block()?;
//! println!("reply: {:02x?}", token.payload());
//! ```

pub mod bridge;
pub mod error;
pub mod framing;
pub mod message;
pub mod mock;
pub mod receiver;
pub mod serial;
pub mod table;
pub mod token;
pub mod transport;

pub use bridge::{BridgeConfig, BridgeStats, CanBridge};
pub use error::BridgeError;
pub use message::{CanMessage, MAX_ID, MAX_PAYLOAD_LEN};
pub use table::TokenPolicy;
pub use token::Token;
pub use transport::Transport;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bridge::{BridgeConfig, BridgeStats, CanBridge};
    pub use crate::error::BridgeError;
    pub use crate::message::CanMessage;
    pub use crate::serial::{list_ports, PortInfo};
    pub use crate::table::TokenPolicy;
    pub use crate::token::Token;
    pub use crate::transport::Transport;
}

/// Default baud rate for the serial link
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
