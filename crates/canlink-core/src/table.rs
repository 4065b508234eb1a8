//! Message table: request/reply correlation and multicast dispatch
//!
//! Two registries keyed by CAN identifier live under a single lock: one-shot
//! tokens for synchronous waiters and persistent listener lists for
//! asynchronous subscribers. Both are mutated from client threads while the
//! receive thread dispatches into them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::message::CanMessage;
use crate::token::Token;

/// Persistent subscriber invoked for every matching message
pub type Listener = Arc<dyn Fn(&CanMessage) + Send + Sync + 'static>;

/// Governs `recv` when a token is already pending for the same identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TokenPolicy {
    /// The new registration wins; the displaced token is cancelled so its
    /// waiter wakes with an error instead of waiting forever
    #[default]
    ReplaceExisting,
    /// `recv` fails with [`BridgeError::TokenPending`] while one is pending
    RejectPending,
}

#[derive(Default)]
struct Registries {
    tokens: HashMap<u32, Token>,
    callbacks: HashMap<u32, Vec<Listener>>,
    promiscuous: Vec<Listener>,
}

/// Token and callback registries for one bridge instance
pub(crate) struct MessageTable {
    registries: Mutex<Registries>,
    policy: TokenPolicy,
}

impl MessageTable {
    pub fn new(policy: TokenPolicy) -> Self {
        Self {
            registries: Mutex::new(Registries::default()),
            policy,
        }
    }

    /// Insert a token for `id`, applying the configured pending-token policy
    pub fn register_token(&self, id: u32, capacity: usize) -> Result<Token, BridgeError> {
        let mut reg = self.lock();
        if let Some(previous) = reg.tokens.get(&id) {
            match self.policy {
                TokenPolicy::RejectPending => return Err(BridgeError::TokenPending(id)),
                TokenPolicy::ReplaceExisting => previous.cancel(),
            }
        }
        let token = Token::new(capacity);
        reg.tokens.insert(id, token.clone());
        Ok(token)
    }

    /// Append a listener for `id`; listeners fire in registration order
    pub fn register_callback(&self, id: u32, listener: Listener) {
        self.lock().callbacks.entry(id).or_default().push(listener);
    }

    /// Append a listener that observes every decoded message
    pub fn register_promiscuous(&self, listener: Listener) {
        self.lock().promiscuous.push(listener);
    }

    /// Match a decoded message against both registries.
    ///
    /// The token is satisfied and removed under the lock, so a `recv` racing
    /// this call either finds its token already satisfied or is registered in
    /// time for the next matching message. Listeners are snapshotted under
    /// the lock but invoked after it is released, so a listener may call back
    /// into the bridge. Only the single receive thread calls this, which
    /// keeps delivery order per identifier equal to wire order.
    pub fn dispatch(&self, message: &CanMessage) {
        let snapshot: Vec<Listener> = {
            let mut reg = self.lock();
            if let Some(token) = reg.tokens.remove(&message.id()) {
                token.satisfy(message.payload());
            }
            let mut listeners: Vec<Listener> = reg
                .callbacks
                .get(&message.id())
                .map(|l| l.to_vec())
                .unwrap_or_default();
            listeners.extend(reg.promiscuous.iter().cloned());
            listeners
        };
        for listener in snapshot {
            listener(message);
        }
    }

    /// Cancel every pending token and clear the registry (bridge teardown)
    pub fn cancel_all(&self) {
        let mut reg = self.lock();
        for (_, token) in reg.tokens.drain() {
            token.cancel();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registries> {
        self.registries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn msg(id: u32, payload: &[u8]) -> CanMessage {
        CanMessage::new(id, payload.to_vec()).unwrap()
    }

    #[test]
    fn test_token_satisfied_once_then_removed() {
        let table = MessageTable::new(TokenPolicy::default());
        let token = table.register_token(0x10, 8).unwrap();

        table.dispatch(&msg(0x10, &[1]));
        assert!(token.ready());
        assert_eq!(token.payload(), Some(vec![1]));

        // Second message for the same id finds no waiter
        table.dispatch(&msg(0x10, &[2]));
        assert_eq!(token.payload(), Some(vec![1]));
    }

    #[test]
    fn test_token_ignores_other_ids() {
        let table = MessageTable::new(TokenPolicy::default());
        let token = table.register_token(0x10, 8).unwrap();
        table.dispatch(&msg(0x11, &[1]));
        assert!(!token.ready());
    }

    #[test]
    fn test_replace_policy_cancels_displaced_token() {
        let table = MessageTable::new(TokenPolicy::ReplaceExisting);
        let first = table.register_token(0x10, 8).unwrap();
        let second = table.register_token(0x10, 8).unwrap();

        assert!(matches!(first.block(), Err(BridgeError::Cancelled)));

        table.dispatch(&msg(0x10, &[7]));
        assert!(second.ready());
    }

    #[test]
    fn test_reject_policy_refuses_second_registration() {
        let table = MessageTable::new(TokenPolicy::RejectPending);
        let _first = table.register_token(0x10, 8).unwrap();
        let err = table.register_token(0x10, 8).unwrap_err();
        assert!(matches!(err, BridgeError::TokenPending(0x10)));
    }

    #[test]
    fn test_callbacks_fire_in_registration_order() {
        let table = MessageTable::new(TokenPolicy::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let seen = Arc::clone(&seen);
            table.register_callback(
                0x20,
                Arc::new(move |m: &CanMessage| {
                    seen.lock().unwrap().push((i, m.payload().to_vec()));
                }),
            );
        }

        table.dispatch(&msg(0x20, &[0xAB]));
        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                (0, vec![0xAB]),
                (1, vec![0xAB]),
                (2, vec![0xAB]),
            ]
        );
    }

    #[test]
    fn test_callbacks_persist_across_messages() {
        let table = MessageTable::new(TokenPolicy::default());
        let count = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&count);
        table.register_callback(
            0x30,
            Arc::new(move |_| {
                *counter.lock().unwrap() += 1;
            }),
        );

        table.dispatch(&msg(0x30, &[]));
        table.dispatch(&msg(0x30, &[]));
        assert_eq!(*count.lock().unwrap(), 2);
    }

    #[test]
    fn test_promiscuous_sees_every_id() {
        let table = MessageTable::new(TokenPolicy::default());
        let ids = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&ids);
        table.register_promiscuous(Arc::new(move |m: &CanMessage| {
            sink.lock().unwrap().push(m.id());
        }));

        table.dispatch(&msg(0x1, &[]));
        table.dispatch(&msg(0x2, &[]));
        table.dispatch(&msg(0x1, &[]));
        assert_eq!(*ids.lock().unwrap(), vec![0x1, 0x2, 0x1]);
    }

    #[test]
    fn test_listener_may_reenter_table() {
        // A listener registering another listener must not deadlock
        let table = Arc::new(MessageTable::new(TokenPolicy::default()));
        let inner_table = Arc::clone(&table);
        table.register_callback(
            0x40,
            Arc::new(move |_| {
                inner_table.register_callback(0x41, Arc::new(|_| {}));
            }),
        );
        table.dispatch(&msg(0x40, &[]));
    }

    #[test]
    fn test_cancel_all_wakes_every_token() {
        let table = MessageTable::new(TokenPolicy::default());
        let a = table.register_token(0x1, 8).unwrap();
        let b = table.register_token(0x2, 8).unwrap();
        table.cancel_all();
        assert!(matches!(a.block(), Err(BridgeError::Cancelled)));
        assert!(matches!(b.block(), Err(BridgeError::Cancelled)));
    }
}
