//! Per-connection session state.

use parking_lot::{Mutex, MutexGuard};
use relaymq_core::LocalTransaction;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the peer's protocol header.
    AwaitingHeader,
    /// Header exchanged, frames flow.
    Open,
    /// A close has been sent or received.
    Closing,
}

/// A client session.
#[derive(Debug)]
pub struct Session {
    /// Unique session ID.
    pub id: String,

    /// Broker-assigned connection number, used in event subjects.
    pub connection_id: u64,

    /// Remote address.
    pub remote_addr: SocketAddr,

    state: SessionState,

    /// The connection's transaction, reused after each discharge. Shared so
    /// storage work on it can run on the blocking pool.
    transaction: Arc<Mutex<LocalTransaction>>,

    /// Delivery id of the most recent transfer.
    last_delivery_id: Option<u32>,

    frames_received: u64,
    transfers_received: u64,
    created_at: Instant,
    last_activity: Instant,
}

impl Session {
    /// Creates a new session.
    pub fn new(connection_id: u64, remote_addr: SocketAddr, transaction: LocalTransaction) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4().to_string(),
            connection_id,
            remote_addr,
            state: SessionState::AwaitingHeader,
            transaction: Arc::new(Mutex::new(transaction)),
            last_delivery_id: None,
            frames_received: 0,
            transfers_received: 0,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    pub fn transaction(&self) -> MutexGuard<'_, LocalTransaction> {
        self.transaction.lock()
    }

    /// Returns a handle to the transaction that can move into a blocking task.
    pub fn shared_transaction(&self) -> Arc<Mutex<LocalTransaction>> {
        self.transaction.clone()
    }

    /// Records an incoming frame.
    pub fn record_frame(&mut self) {
        self.frames_received += 1;
        self.last_activity = Instant::now();
    }

    /// Records an incoming transfer.
    pub fn record_transfer(&mut self, delivery_id: u32) {
        self.transfers_received += 1;
        self.last_delivery_id = Some(delivery_id);
    }

    pub fn last_delivery_id(&self) -> Option<u32> {
        self.last_delivery_id
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    pub fn transfers_received(&self) -> u64 {
        self.transfers_received
    }

    /// Marks the connection as active without a frame, e.g. on partial reads.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Returns the time since last activity.
    pub fn idle_duration(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Returns the session age.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Rolls back whatever the transaction still holds. Called when the
    /// connection ends for any reason.
    pub fn end(&mut self) -> usize {
        self.state = SessionState::Closing;
        self.transaction.lock().rollback()
    }
}
