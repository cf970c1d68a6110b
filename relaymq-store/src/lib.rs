//! # relaymq-store
//!
//! Message content log for relaymq.
//!
//! This crate provides:
//! - An append-only log file with per-record checksums
//! - Message handles whose content can be flowed to disk on demand
//! - Commit records marking which messages a transaction made durable
//! - Recovery that tolerates a partially written tail

pub mod error;
pub mod log;
pub mod message;
pub mod record;
pub mod store;

pub use error::StoreError;
pub use log::ContentLog;
pub use message::{MessageHandle, StoredMessage};
pub use record::{CommitEntry, CommitItem, LogRecord, RecordType};
pub use store::{FsyncPolicy, MessageStore, RecoveredMessage, StoreConfig, StoreStats};

/// Log record header size in bytes.
pub const RECORD_HEADER_SIZE: usize = 24;

/// Name of the content log file inside the store directory.
pub const LOG_FILE_NAME: &str = "messages.log";
