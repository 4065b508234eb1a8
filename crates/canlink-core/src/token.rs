//! One-shot synchronous wait handle
//!
//! A [`Token`] correlates a future CAN message with the thread awaiting it.
//! The registry holds one clone and the caller holds another; satisfaction
//! and cancellation travel through the shared state, so a caller's handle
//! stays valid even after the registry entry is gone.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::BridgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Pending,
    Satisfied,
    Cancelled,
}

#[derive(Debug)]
struct Inner {
    state: State,
    capacity: usize,
    payload: Option<Vec<u8>>,
}

#[derive(Debug)]
struct Shared {
    lock: Mutex<Inner>,
    cond: Condvar,
}

/// Handle for one outstanding synchronous receive expectation
#[derive(Debug, Clone)]
pub struct Token {
    shared: Arc<Shared>,
}

impl Token {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                lock: Mutex::new(Inner {
                    state: State::Pending,
                    capacity,
                    payload: None,
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Copy up to `capacity` payload bytes in and wake every waiter.
    /// Later calls are ignored: a token satisfies at most one message.
    pub(crate) fn satisfy(&self, payload: &[u8]) {
        let mut inner = self
            .shared
            .lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if inner.state != State::Pending {
            return;
        }
        let take = payload.len().min(inner.capacity);
        inner.payload = Some(payload[..take].to_vec());
        inner.state = State::Satisfied;
        self.shared.cond.notify_all();
    }

    /// Mark the token cancelled and wake every waiter. No-op once satisfied.
    pub(crate) fn cancel(&self) {
        let mut inner = self
            .shared
            .lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if inner.state != State::Pending {
            return;
        }
        inner.state = State::Cancelled;
        self.shared.cond.notify_all();
    }

    /// Non-blocking poll of the completion flag
    pub fn ready(&self) -> bool {
        let inner = self
            .shared
            .lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        inner.state == State::Satisfied
    }

    /// Wait with no deadline until the token is satisfied.
    ///
    /// Returns `Err(BridgeError::Cancelled)` if the bridge is torn down (or
    /// this registration is displaced) while the wait is outstanding.
    pub fn block(&self) -> Result<(), BridgeError> {
        let mut inner = self
            .shared
            .lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while inner.state == State::Pending {
            inner = self
                .shared
                .cond
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        match inner.state {
            State::Satisfied => Ok(()),
            _ => Err(BridgeError::Cancelled),
        }
    }

    /// Wait up to `timeout` and report whether the token became satisfied.
    ///
    /// Timing out does not deregister the token: the registry entry is only
    /// removed by dispatch or teardown, so a later matching message can still
    /// satisfy this token and a subsequent wait will observe it.
    pub fn timed_block(&self, timeout: Duration) -> Result<bool, BridgeError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self
            .shared
            .lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            match inner.state {
                State::Satisfied => return Ok(true),
                State::Cancelled => return Err(BridgeError::Cancelled),
                State::Pending => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let (guard, _) = self
                .shared
                .cond
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            inner = guard;
        }
    }

    /// The received payload, truncated to the registered capacity.
    /// `None` until the token is satisfied.
    pub fn payload(&self) -> Option<Vec<u8>> {
        let inner = self
            .shared
            .lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        inner.payload.clone()
    }
}
