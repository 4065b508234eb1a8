//! Bridge orchestration
//!
//! [`CanBridge`] owns the transport and the single background receive thread
//! that turns the inbound byte stream into dispatched [`CanMessage`]s. Client
//! threads call [`CanBridge::send`], [`CanBridge::recv`] and the callback
//! registration methods concurrently; the registries behind them are the only
//! state shared with the receive thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::framing;
use crate::message::CanMessage;
use crate::receiver::Receiver;
use crate::serial;
use crate::table::{Listener, MessageTable, TokenPolicy};
use crate::token::Token;
use crate::transport::{SerialTransport, Transport};
use crate::DEFAULT_BAUD_RATE;

/// Size of the receive thread's read buffer
const RECV_BUFFER_LEN: usize = 4096;

/// Bridge configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Serial port name
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// What `recv` does when a token is already pending for the same id
    pub token_policy: TokenPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            token_policy: TokenPolicy::default(),
        }
    }
}

/// Cumulative traffic counters for one bridge instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeStats {
    /// Frames written to the transport
    pub tx_frames: u64,
    /// Bytes written to the transport (after escaping)
    pub tx_bytes: u64,
    /// Complete messages decoded from the wire
    pub rx_frames: u64,
    /// Framing faults recovered by the receive state machine
    pub framing_errors: u64,
}

#[derive(Default)]
struct Counters {
    tx_frames: AtomicU64,
    tx_bytes: AtomicU64,
    rx_frames: AtomicU64,
    framing_errors: AtomicU64,
}

/// Serial-to-CAN bridge
pub struct CanBridge {
    transport: Arc<dyn Transport>,
    table: Arc<MessageTable>,
    shutdown: Arc<AtomicBool>,
    degraded: Arc<AtomicBool>,
    counters: Arc<Counters>,
    rx_thread: Option<JoinHandle<()>>,
}

impl CanBridge {
    /// Open the serial port named in `config` and start the bridge
    pub fn open(config: &BridgeConfig) -> Result<Self, BridgeError> {
        let mut port = serial::open_port(&config.port_name, Some(config.baud_rate))?;
        serial::configure_port(port.as_mut())?;
        serial::clear_buffers(port.as_mut())?;
        let transport = Arc::new(SerialTransport::new(port)?);
        tracing::debug!(port = %config.port_name, baud = config.baud_rate, "bridge opened");
        Ok(Self::with_transport(transport, config.token_policy))
    }

    /// Start the bridge over an already-constructed transport
    pub fn with_transport(transport: Arc<dyn Transport>, policy: TokenPolicy) -> Self {
        let table = Arc::new(MessageTable::new(policy));
        let shutdown = Arc::new(AtomicBool::new(false));
        let degraded = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());

        let rx_thread = {
            let transport = Arc::clone(&transport);
            let table = Arc::clone(&table);
            let shutdown = Arc::clone(&shutdown);
            let degraded = Arc::clone(&degraded);
            let counters = Arc::clone(&counters);
            std::thread::spawn(move || {
                rx_loop(&*transport, &table, &shutdown, &degraded, &counters);
            })
        };

        Self {
            transport,
            table,
            shutdown,
            degraded,
            counters,
            rx_thread: Some(rx_thread),
        }
    }

    /// Encode and write one message. Validation happens before any bytes
    /// reach the transport; transport failures surface without retry.
    pub fn send(&self, id: u32, payload: &[u8]) -> Result<(), BridgeError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(BridgeError::NotRunning);
        }
        let message = CanMessage::new(id, payload.to_vec())?;
        let frame = framing::encode(&message);
        self.transport.write(&frame)?;
        self.counters.tx_frames.fetch_add(1, Ordering::Relaxed);
        self.counters
            .tx_bytes
            .fetch_add(frame.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Register a one-shot expectation for the next message carrying `id`.
    ///
    /// Returns immediately; the caller decides when and whether to wait on
    /// the token. At most `capacity` payload bytes are kept.
    pub fn recv(&self, id: u32, capacity: usize) -> Result<Token, BridgeError> {
        if id > crate::message::MAX_ID {
            return Err(BridgeError::InvalidId(id));
        }
        if self.shutdown.load(Ordering::Acquire) {
            return Err(BridgeError::NotRunning);
        }
        self.table.register_token(id, capacity)
    }

    /// Register a persistent listener for messages carrying `id`
    pub fn attach_callback(
        &self,
        id: u32,
        listener: impl Fn(&CanMessage) + Send + Sync + 'static,
    ) {
        self.table.register_callback(id, Arc::new(listener) as Listener);
    }

    /// Register a persistent listener for every decoded message
    pub fn subscribe_all(&self, listener: impl Fn(&CanMessage) + Send + Sync + 'static) {
        self.table.register_promiscuous(Arc::new(listener) as Listener);
    }

    /// Whether the receive thread has died on a transport fault. A degraded
    /// bridge no longer delivers messages; it does not reconnect.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Snapshot of the traffic counters
    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            tx_frames: self.counters.tx_frames.load(Ordering::Relaxed),
            tx_bytes: self.counters.tx_bytes.load(Ordering::Relaxed),
            rx_frames: self.counters.rx_frames.load(Ordering::Relaxed),
            framing_errors: self.counters.framing_errors.load(Ordering::Relaxed),
        }
    }

    /// Stop the receive thread, join it, and cancel every pending token so
    /// blocked waiters wake with [`BridgeError::Cancelled`]. Idempotent.
    pub fn close(&mut self) {
        if self.rx_thread.is_none() {
            return;
        }
        self.shutdown.store(true, Ordering::Release);
        self.transport.close();
        if let Some(handle) = self.rx_thread.take() {
            let _ = handle.join();
        }
        self.table.cancel_all();
        tracing::debug!("bridge closed");
    }
}

impl Drop for CanBridge {
    fn drop(&mut self) {
        self.close();
    }
}

fn rx_loop(
    transport: &dyn Transport,
    table: &MessageTable,
    shutdown: &AtomicBool,
    degraded: &AtomicBool,
    counters: &Counters,
) {
    let mut receiver = Receiver::new();
    let mut buf = [0u8; RECV_BUFFER_LEN];
    tracing::debug!("receive thread started");

    while !shutdown.load(Ordering::Acquire) {
        match transport.read_some(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                for &byte in &buf[..n] {
                    if let Some(message) = receiver.feed(byte) {
                        counters.rx_frames.fetch_add(1, Ordering::Relaxed);
                        table.dispatch(&message);
                    }
                }
                counters
                    .framing_errors
                    .store(receiver.framing_errors(), Ordering::Relaxed);
            }
            Err(e) => {
                tracing::warn!("transport read failed, receive thread stopping: {e}");
                degraded.store(true, Ordering::Release);
                break;
            }
        }
    }
    tracing::debug!("receive thread exiting");
}
