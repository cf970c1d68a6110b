//! # relaymq-core
//!
//! Broker core for relaymq.
//!
//! This crate provides:
//! - The per-transaction flow-to-disk observer that bounds uncommitted memory
//! - Local transactions over the message store
//! - The exchange type registry and exchange factory
//! - Queues and the queue registry
//! - Operational event logging with stable message ids

pub mod error;
pub mod event;
pub mod exchange;
pub mod flow;
pub mod queue;
pub mod transaction;

pub use error::{CoreError, ExchangeError};
pub use event::{EventLogger, LogMessage, LogSubject, MemoryEventLogger, TracingEventLogger};
pub use exchange::{Exchange, ExchangeKind, ExchangeRegistry, ExchangeType, StandardExchangeType};
pub use flow::FlowToDiskObserver;
pub use queue::{Queue, QueueRegistry};
pub use transaction::{LocalTransaction, TransactionState};
