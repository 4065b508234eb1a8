//! Transport abstraction
//!
//! The bridge talks to the wire through [`Transport`]: a byte-oriented link
//! with a thread-safe write path and a polling read path. The production
//! implementation is [`SerialTransport`]; tests use
//! [`crate::mock::MockTransport`]. A vendor CAN adapter can slot in as
//! another implementation without touching the bridge.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use serialport::SerialPort;

use crate::error::BridgeError;

/// Byte-oriented link the bridge writes frames to and reads bytes from
pub trait Transport: Send + Sync {
    /// Write `bytes` to the link. Must be safe for concurrent callers; the
    /// implementation serializes internally if the link itself is not.
    fn write(&self, bytes: &[u8]) -> Result<(), BridgeError>;

    /// Read available bytes into `buf`. `Ok(0)` means nothing arrived before
    /// the poll interval elapsed, not end of stream.
    fn read_some(&self, buf: &mut [u8]) -> Result<usize, BridgeError>;

    /// Unblock any pending read; subsequent reads report `Ok(0)`.
    fn close(&self);
}

/// Serial-port transport with split read and write handles.
///
/// The port handle is cloned so the receive thread can read while client
/// threads write; writes are serialized by a mutex since the serial driver
/// does not guarantee atomicity for interleaved writers.
pub struct SerialTransport {
    writer: Mutex<Box<dyn SerialPort>>,
    reader: Mutex<Box<dyn SerialPort>>,
    closed: AtomicBool,
}

impl SerialTransport {
    /// Wrap an opened serial port
    pub fn new(port: Box<dyn SerialPort>) -> Result<Self, BridgeError> {
        let reader = port
            .try_clone()
            .map_err(|e| BridgeError::Connection(e.to_string()))?;
        Ok(Self {
            writer: Mutex::new(port),
            reader: Mutex::new(reader),
            closed: AtomicBool::new(false),
        })
    }
}

impl Transport for SerialTransport {
    fn write(&self, bytes: &[u8]) -> Result<(), BridgeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BridgeError::NotRunning);
        }
        let mut port = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        port.write_all(bytes)
            .map_err(|e| BridgeError::Transport(e.to_string()))?;
        port.flush()
            .map_err(|e| BridgeError::Transport(e.to_string()))
    }

    fn read_some(&self, buf: &mut [u8]) -> Result<usize, BridgeError> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(0);
        }
        let mut port = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
        match port.read(buf) {
            Ok(n) => Ok(n),
            // The port is opened with a short read timeout so the receive
            // thread can poll its shutdown flag
            Err(ref e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                Ok(0)
            }
            Err(e) => Err(BridgeError::Transport(e.to_string())),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
