//! # relaymq-server
//!
//! TCP server for relaymq.
//!
//! This crate provides:
//! - Configuration loading and validation
//! - Broker assembly: message store, queues, exchanges, key stores
//! - Broker lifecycle with state change listeners
//! - Key store certificate expiry checking
//! - TCP connection handling with per-connection transactions

pub mod broker;
pub mod config;
pub mod error;
pub mod handler;
pub mod keystore;
pub mod lifecycle;
pub mod server;
pub mod session;

pub use broker::Broker;
pub use config::{
    CodecConfig, Config, ConfigError, KeyStoreConfig, KeyStoresConfig, NetworkConfig,
    StorageConfig, TransactionsConfig,
};
pub use error::ServerError;
pub use handler::{FrameHandler, Reply};
pub use keystore::{Certificate, KeyStore};
pub use lifecycle::{BrokerLifecycle, BrokerState, ListenerAction, ListenerId, StateChangeListener};
pub use server::{Server, ServerConfig, ServerStats};
pub use session::{Session, SessionState};
