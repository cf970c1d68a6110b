//! Flow-to-disk tracking for uncommitted enqueues.
//!
//! A transaction feeds every message it enqueues into a
//! [`FlowToDiskObserver`]. While the cumulative content size stays at or
//! below the ceiling the messages stay in memory. The first enqueue that
//! takes the total strictly above the ceiling flushes everything tracked so
//! far and raises a single breach event; from then on each new message is
//! flushed as it arrives, until [`FlowToDiskObserver::reset`].

use crate::event::{EventLogger, LogMessage, LogSubject};
use relaymq_store::{StoreError, StoredMessage};
use std::sync::Arc;

/// Tracks the in-memory size of a transaction's uncommitted messages.
pub struct FlowToDiskObserver {
    ceiling: u64,
    subject: LogSubject,
    logger: Arc<dyn EventLogger>,
    total: u64,
    tracked: Vec<Arc<dyn StoredMessage>>,
    over_ceiling: bool,
    notified: bool,
}

impl FlowToDiskObserver {
    pub fn new(ceiling: u64, subject: LogSubject, logger: Arc<dyn EventLogger>) -> Self {
        Self {
            ceiling,
            subject,
            logger,
            total: 0,
            tracked: Vec::new(),
            over_ceiling: false,
            notified: false,
        }
    }

    /// Accounts for a newly enqueued message.
    ///
    /// A storage failure while flushing is returned as is; the caller must
    /// treat the transaction as aborted.
    pub fn on_message_enqueue(&mut self, message: Arc<dyn StoredMessage>) -> Result<(), StoreError> {
        self.total = self.total.saturating_add(message.content_size());

        if self.over_ceiling {
            return message.flow_to_disk();
        }

        self.tracked.push(message);
        if self.total <= self.ceiling {
            return Ok(());
        }

        self.over_ceiling = true;
        tracing::debug!(
            "{} uncommitted size {} exceeds ceiling {}, flushing {} messages",
            self.subject,
            self.total,
            self.ceiling,
            self.tracked.len()
        );
        for tracked in std::mem::take(&mut self.tracked) {
            tracked.flow_to_disk()?;
        }

        if !self.notified {
            self.notified = true;
            self.logger.message(
                &self.subject,
                LogMessage::flow_to_disk_active(self.total, self.ceiling),
            );
        }
        Ok(())
    }

    /// Starts a fresh accounting window. Calling this twice is harmless.
    pub fn reset(&mut self) {
        self.total = 0;
        self.tracked.clear();
        self.over_ceiling = false;
        self.notified = false;
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// Cumulative content size seen since the last reset.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn is_over_ceiling(&self) -> bool {
        self.over_ceiling
    }

    /// Number of messages still held in memory awaiting a possible flush.
    pub fn tracked_len(&self) -> usize {
        self.tracked.len()
    }

    pub fn subject(&self) -> &LogSubject {
        &self.subject
    }
}

impl std::fmt::Debug for FlowToDiskObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowToDiskObserver")
            .field("ceiling", &self.ceiling)
            .field("subject", &self.subject)
            .field("total", &self.total)
            .field("tracked", &self.tracked.len())
            .field("over_ceiling", &self.over_ceiling)
            .field("notified", &self.notified)
            .finish()
    }
}
