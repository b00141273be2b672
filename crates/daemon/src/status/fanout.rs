//! State fanout to registered views and external subscribers.
//!
//! Views register into a fixed table with one slot per [`ObserverRole`]; the
//! last registration for a role wins. Every fanout also emits a
//! [`StateBroadcast`] to external subscribers that presented the capability
//! token for [`ACCESS_STATE_SCOPE`].

use std::sync::{Arc, PoisonError, RwLock, Weak};

use meshtether_protocol::{ServiceState, StateBroadcast, ACCESS_STATE_SCOPE};
use thiserror::Error;
use tokio::sync::broadcast;

use super::observer::{ObserverRole, StatusObserver};

/// Errors returned by the fanout.
#[derive(Debug, Error, PartialEq)]
pub enum FanoutError {
    /// The presented token does not grant the scope.
    #[error("access to {scope} denied")]
    AccessDenied { scope: &'static str },
}

type Slot = Option<Weak<dyn StatusObserver>>;

/// Delivers state to registered views and broadcasts it externally.
pub struct StatusFanout {
    /// One weak slot per observer role.
    slots: RwLock<[Slot; 3]>,
    /// External broadcast channel.
    broadcast_tx: broadcast::Sender<StateBroadcast>,
    /// Token required to subscribe to the broadcast.
    access_token: String,
}

impl StatusFanout {
    /// Creates a fanout whose broadcast is guarded by `access_token`.
    pub fn new(access_token: impl Into<String>, capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            slots: RwLock::new(Default::default()),
            broadcast_tx,
            access_token: access_token.into(),
        }
    }

    /// Registers `observer` for `role`, replacing any previous one.
    ///
    /// Only a weak reference is kept.
    pub fn register<O>(&self, role: ObserverRole, observer: &Arc<O>)
    where
        O: StatusObserver + 'static,
    {
        let weak: Weak<dyn StatusObserver> = Arc::downgrade(observer) as Weak<dyn StatusObserver>;
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if slots[role.index()].is_some() {
            tracing::debug!(%role, "Replacing registered observer");
        }
        slots[role.index()] = Some(weak);
    }

    /// Clears the slot for `role`. Returns whether a live observer was removed.
    pub fn unregister(&self, role: ObserverRole) -> bool {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots[role.index()]
            .take()
            .is_some_and(|weak| weak.strong_count() > 0)
    }

    /// Returns the live observer registered for `role`.
    pub fn observer(&self, role: ObserverRole) -> Option<Arc<dyn StatusObserver>> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots[role.index()].as_ref().and_then(Weak::upgrade)
    }

    /// Whether a live observer is registered for `role`.
    pub fn is_registered(&self, role: ObserverRole) -> bool {
        self.observer(role).is_some()
    }

    /// Delivers `state` to every live observer and broadcasts it.
    ///
    /// Observers are called outside the table lock, so they may register or
    /// unregister from inside `update`. Returns the number of deliveries.
    pub fn notify_all(&self, state: ServiceState) -> usize {
        let snapshot: Vec<(ObserverRole, Arc<dyn StatusObserver>)> = {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            ObserverRole::ALL
                .iter()
                .filter_map(|role| {
                    slots[role.index()]
                        .as_ref()
                        .and_then(Weak::upgrade)
                        .map(|observer| (*role, observer))
                })
                .collect()
        };

        for (role, observer) in &snapshot {
            tracing::trace!(%role, %state, "Updating observer");
            observer.update(state);
        }

        // TODO: broadcast only when the state differs from the last broadcast
        self.broadcast(state);
        snapshot.len()
    }

    /// Delivers `state` to the observer for `role` only.
    pub fn notify_role(&self, role: ObserverRole, state: ServiceState) -> bool {
        match self.observer(role) {
            Some(observer) => {
                observer.update(state);
                true
            }
            None => false,
        }
    }

    /// Emits the external state broadcast without touching observers.
    ///
    /// Returns the number of subscribers reached.
    pub fn broadcast(&self, state: ServiceState) -> usize {
        // No subscribers is not an error.
        self.broadcast_tx.send(StateBroadcast::new(state)).unwrap_or(0)
    }

    /// Subscribes to the external broadcast.
    pub fn subscribe(
        &self,
        token: &str,
    ) -> Result<broadcast::Receiver<StateBroadcast>, FanoutError> {
        if token != self.access_token {
            tracing::warn!("Rejected state subscription with invalid token");
            return Err(FanoutError::AccessDenied {
                scope: ACCESS_STATE_SCOPE,
            });
        }
        Ok(self.broadcast_tx.subscribe())
    }

    /// Number of external subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.broadcast_tx.receiver_count()
    }
}
