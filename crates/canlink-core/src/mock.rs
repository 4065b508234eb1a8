//! Loopback transport for tests and hardware-free development
//!
//! [`MockTransport`] scripts the wire: tests queue inbound bytes with
//! [`MockTransport::push_inbound`] and inspect what the bridge wrote with
//! [`MockTransport::take_outbound`]. Read and write failures can be injected
//! to exercise the degraded paths.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::error::BridgeError;
use crate::transport::Transport;

/// How long a read waits for scripted bytes before reporting `Ok(0)`
const READ_WAIT: Duration = Duration::from_millis(50);

#[derive(Default)]
struct MockState {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    closed: bool,
    fail_writes: bool,
    fail_reads: bool,
}

/// Scripted in-memory [`Transport`]
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
    readable: Condvar,
}

impl MockTransport {
    /// Create an empty transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes for the bridge's receive thread to read
    pub fn push_inbound(&self, bytes: &[u8]) {
        let mut state = self.lock();
        state.inbound.extend(bytes.iter().copied());
        self.readable.notify_all();
    }

    /// Take everything the bridge has written so far
    pub fn take_outbound(&self) -> Vec<u8> {
        std::mem::take(&mut self.lock().outbound)
    }

    /// Make subsequent writes fail with a transport error
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Make subsequent reads fail with a transport error
    pub fn fail_reads(&self, fail: bool) {
        let mut state = self.lock();
        state.fail_reads = fail;
        self.readable.notify_all();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for MockTransport {
    fn write(&self, bytes: &[u8]) -> Result<(), BridgeError> {
        let mut state = self.lock();
        if state.closed {
            return Err(BridgeError::NotRunning);
        }
        if state.fail_writes {
            return Err(BridgeError::Transport("injected write failure".into()));
        }
        state.outbound.extend_from_slice(bytes);
        Ok(())
    }

    fn read_some(&self, buf: &mut [u8]) -> Result<usize, BridgeError> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return Ok(0);
            }
            if state.fail_reads {
                return Err(BridgeError::Transport("injected read failure".into()));
            }
            if !state.inbound.is_empty() {
                let count = buf.len().min(state.inbound.len());
                for slot in buf.iter_mut().take(count) {
                    *slot = state.inbound.pop_front().unwrap_or_default();
                }
                return Ok(count);
            }
            let (guard, result) = self
                .readable
                .wait_timeout(state, READ_WAIT)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
            if result.timed_out() {
                return Ok(0);
            }
        }
    }

    fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.readable.notify_all();
    }
}
