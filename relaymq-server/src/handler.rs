//! Frame handling for one connection.
//!
//! Transfers and commits may write to the message store. That work runs on
//! the blocking pool so a slow disk never stalls the connection tasks
//! sharing a runtime worker.

use crate::broker::Broker;
use crate::error::ServerError;
use crate::session::{Session, SessionState};
use bytes::Bytes;
use relaymq_codec::{
    Close, Discharge, Disposition, ErrorCondition, ErrorInfo, IncomingFrame, Performative, Role,
    Transfer,
};
use relaymq_core::CoreError;
use std::sync::Arc;

/// What the connection loop should do after a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Nothing to send.
    None,
    /// Send a performative on the given channel.
    Send(u16, Performative),
    /// Send a close, optionally carrying an error, then end the connection.
    Close(Option<ErrorInfo>),
}

impl Reply {
    fn close_with(condition: ErrorCondition, description: impl Into<String>) -> Self {
        Reply::Close(Some(ErrorInfo::new(condition, description)))
    }

    fn close_for(error: &ServerError) -> Self {
        Reply::close_with(error.error_condition(), error.to_string())
    }
}

/// Applies incoming performatives to the broker.
pub struct FrameHandler {
    broker: Arc<Broker>,
}

impl FrameHandler {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Handles one decoded frame.
    pub async fn handle(&self, session: &mut Session, frame: IncomingFrame) -> Reply {
        session.record_frame();

        let Some(performative) = frame.performative else {
            tracing::trace!("[{}] Heartbeat", session.remote_addr);
            return Reply::None;
        };
        tracing::debug!(
            "[{}] Received {} on channel {}",
            session.remote_addr,
            performative.name(),
            frame.channel
        );

        match performative {
            Performative::Transfer(transfer) => {
                self.handle_transfer(session, frame.channel, transfer, frame.payload)
                    .await
            }
            Performative::Discharge(discharge) => {
                self.handle_discharge(session, frame.channel, discharge)
                    .await
            }
            Performative::Disposition(disposition) => {
                tracing::debug!(
                    "[{}] Peer disposition for delivery {} (settled={})",
                    session.remote_addr,
                    disposition.first,
                    disposition.settled
                );
                Reply::None
            }
            Performative::Close(close) => self.handle_close(session, close),
        }
    }

    async fn handle_transfer(
        &self,
        session: &mut Session,
        channel: u16,
        transfer: Transfer,
        payload: Bytes,
    ) -> Reply {
        let Some(address) = transfer.address.filter(|a| !a.is_empty()) else {
            return Reply::close_with(
                ErrorCondition::InvalidField,
                format!("transfer {} has no address", transfer.delivery_id),
            );
        };
        session.record_transfer(transfer.delivery_id);

        let queue = self.broker.queues().declare(&address);
        let message = self.broker.store().add_message(payload);
        let transaction = session.shared_transaction();
        match run_storage(move || transaction.lock().enqueue(queue, message)).await {
            Ok(()) => Reply::Send(channel, accepted(transfer.delivery_id)),
            Err(e) => {
                tracing::error!(
                    "[{}] Enqueue of delivery {} to '{}' failed: {}",
                    session.remote_addr,
                    transfer.delivery_id,
                    address,
                    e
                );
                session.set_state(SessionState::Closing);
                Reply::close_for(&e)
            }
        }
    }

    async fn handle_discharge(
        &self,
        session: &mut Session,
        channel: u16,
        discharge: Discharge,
    ) -> Reply {
        let first = session.last_delivery_id().unwrap_or(0);

        if discharge.fail {
            let discarded = session.transaction().rollback();
            tracing::debug!("[{}] Rolled back {} messages", session.remote_addr, discarded);
            return Reply::Send(channel, accepted(first));
        }

        let transaction = session.shared_transaction();
        match run_storage(move || transaction.lock().commit()).await {
            Ok(committed) => {
                tracing::debug!("[{}] Committed {} messages", session.remote_addr, committed.len());
                Reply::Send(channel, accepted(first))
            }
            Err(e) => {
                // An aborted transaction maps to transaction-rollback, storage to internal-error
                tracing::error!("[{}] Commit failed: {}", session.remote_addr, e);
                session.set_state(SessionState::Closing);
                Reply::close_for(&e)
            }
        }
    }

    fn handle_close(&self, session: &mut Session, close: Close) -> Reply {
        if let Some(error) = &close.error {
            tracing::info!(
                "[{}] Peer closed with {}: {}",
                session.remote_addr,
                error.condition,
                error.description.as_deref().unwrap_or("")
            );
        }
        session.set_state(SessionState::Closing);
        Reply::Close(None)
    }
}

/// Runs transaction work that may touch the store on the blocking pool.
async fn run_storage<T, F>(work: F) -> Result<T, ServerError>
where
    F: FnOnce() -> Result<T, CoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ServerError::StorageTask(e.to_string()))?
        .map_err(ServerError::Core)
}

fn accepted(delivery_id: u32) -> Performative {
    Performative::Disposition(Disposition {
        role: Role::Receiver,
        first: delivery_id,
        settled: true,
    })
}
