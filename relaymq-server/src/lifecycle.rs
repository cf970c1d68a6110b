//! Broker lifecycle state and change listeners.
//!
//! Listeners are registered explicitly and notified synchronously, in
//! registration order, on every state transition. A listener can ask to be
//! removed by returning [`ListenerAction::Remove`].

use crate::error::ServerError;
use parking_lot::Mutex;
use relaymq_core::{EventLogger, LogMessage, LogSubject};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Broker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrokerState {
    Initialising,
    Active,
    Stopping,
    Stopped,
}

impl BrokerState {
    /// Returns whether moving from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: BrokerState) -> bool {
        matches!(
            (self, next),
            (BrokerState::Initialising, BrokerState::Active)
                | (BrokerState::Initialising, BrokerState::Stopping)
                | (BrokerState::Active, BrokerState::Stopping)
                | (BrokerState::Stopping, BrokerState::Stopped)
        )
    }
}

impl fmt::Display for BrokerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BrokerState::Initialising => "INITIALISING",
            BrokerState::Active => "ACTIVE",
            BrokerState::Stopping => "STOPPING",
            BrokerState::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// What a listener wants after being notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerAction {
    Keep,
    Remove,
}

/// Receives broker state transitions.
pub trait StateChangeListener: Send + Sync {
    fn state_changed(&self, old: BrokerState, new: BrokerState) -> ListenerAction;
}

/// Identifies a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Current broker state plus the listeners watching it.
pub struct BrokerLifecycle {
    state: Mutex<BrokerState>,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn StateChangeListener>)>>,
    next_listener_id: AtomicU64,
    event_logger: Arc<dyn EventLogger>,
}

impl BrokerLifecycle {
    pub fn new(event_logger: Arc<dyn EventLogger>) -> Self {
        Self {
            state: Mutex::new(BrokerState::Initialising),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            event_logger,
        }
    }

    pub fn state(&self) -> BrokerState {
        *self.state.lock()
    }

    pub fn add_listener(&self, listener: Arc<dyn StateChangeListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        id
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Moves to `next` and notifies listeners.
    ///
    /// Listeners run without any lifecycle lock held, so they may register
    /// further listeners or read the state.
    pub fn transition(&self, next: BrokerState) -> Result<(), ServerError> {
        let old = {
            let mut state = self.state.lock();
            let old = *state;
            if !old.can_transition_to(next) {
                return Err(ServerError::InvalidStateTransition { from: old, to: next });
            }
            *state = next;
            old
        };

        tracing::info!("Broker state changed from {} to {}", old, next);
        self.event_logger.message(
            &LogSubject::broker(),
            LogMessage::broker_state_changed(&old.to_string(), &next.to_string()),
        );

        let snapshot: Vec<(ListenerId, Arc<dyn StateChangeListener>)> =
            self.listeners.lock().clone();
        let mut removed = Vec::new();
        for (id, listener) in snapshot {
            if listener.state_changed(old, next) == ListenerAction::Remove {
                removed.push(id);
            }
        }
        if !removed.is_empty() {
            self.listeners.lock().retain(|(id, _)| !removed.contains(id));
        }
        Ok(())
    }
}

impl fmt::Debug for BrokerLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerLifecycle")
            .field("state", &self.state())
            .field("listeners", &self.listener_count())
            .finish()
    }
}
