//! Local transactions over the message store.
//!
//! Enqueues are held back until commit. Each one passes through the
//! transaction's [`FlowToDiskObserver`], so a large transaction moves its
//! content to disk instead of holding it all in memory. Commit writes any
//! remaining content plus one commit record, then delivers to the queues.

use crate::error::CoreError;
use crate::event::{EventLogger, LogSubject};
use crate::flow::FlowToDiskObserver;
use crate::queue::Queue;
use relaymq_store::{CommitItem, MessageHandle, MessageStore, StoredMessage};
use std::sync::Arc;

/// Transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    /// A storage failure occurred; only rollback is allowed.
    Aborted,
}

#[derive(Debug)]
struct PendingEnqueue {
    queue: Arc<Queue>,
    message: Arc<MessageHandle>,
}

/// A transaction scoped to one connection.
#[derive(Debug)]
pub struct LocalTransaction {
    id: u64,
    store: Arc<MessageStore>,
    observer: FlowToDiskObserver,
    pending: Vec<PendingEnqueue>,
    state: TransactionState,
}

impl LocalTransaction {
    pub fn new(
        id: u64,
        store: Arc<MessageStore>,
        ceiling: u64,
        event_logger: Arc<dyn EventLogger>,
    ) -> Self {
        Self::with_subject(id, store, ceiling, LogSubject::new(format!("[txn({})]", id)), event_logger)
    }

    /// Creates a transaction whose events are reported under `subject`.
    pub fn with_subject(
        id: u64,
        store: Arc<MessageStore>,
        ceiling: u64,
        subject: LogSubject,
        event_logger: Arc<dyn EventLogger>,
    ) -> Self {
        Self {
            id,
            store,
            observer: FlowToDiskObserver::new(ceiling, subject, event_logger),
            pending: Vec::new(),
            state: TransactionState::Open,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Number of enqueues waiting for commit.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn observer(&self) -> &FlowToDiskObserver {
        &self.observer
    }

    fn ensure_open(&self) -> Result<(), CoreError> {
        if self.state == TransactionState::Aborted {
            return Err(CoreError::TransactionAborted {
                transaction_id: self.id,
            });
        }
        Ok(())
    }

    /// Records an enqueue to be delivered on commit.
    ///
    /// A storage failure aborts the transaction.
    pub fn enqueue(&mut self, queue: Arc<Queue>, message: Arc<MessageHandle>) -> Result<(), CoreError> {
        self.ensure_open()?;

        let tracked: Arc<dyn StoredMessage> = message.clone();
        if let Err(e) = self.observer.on_message_enqueue(tracked) {
            tracing::warn!("Transaction {} aborted during flow to disk: {}", self.id, e);
            self.state = TransactionState::Aborted;
            return Err(e.into());
        }

        self.pending.push(PendingEnqueue { queue, message });
        Ok(())
    }

    /// Makes every pending message durable and delivers it.
    pub fn commit(&mut self) -> Result<Vec<CommitItem>, CoreError> {
        self.ensure_open()?;

        let committed: Vec<CommitItem> = self
            .pending
            .iter()
            .map(|p| CommitItem::new(p.message.message_id(), p.queue.name()))
            .collect();

        if !committed.is_empty() {
            if let Err(e) = self.write_durably(&committed) {
                tracing::warn!("Transaction {} aborted during commit: {}", self.id, e);
                self.state = TransactionState::Aborted;
                return Err(e);
            }
        }

        for pending in self.pending.drain(..) {
            pending.queue.deliver(pending.message);
        }
        self.observer.reset();

        tracing::debug!("Transaction {} committed {} messages", self.id, committed.len());
        Ok(committed)
    }

    fn write_durably(&self, items: &[CommitItem]) -> Result<(), CoreError> {
        for pending in &self.pending {
            pending.message.flow_to_disk()?;
        }
        self.store.commit(self.id, items)?;
        Ok(())
    }

    /// Discards pending enqueues and returns how many were dropped.
    ///
    /// Content already flowed to disk stays there; it is never committed.
    pub fn rollback(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();
        self.observer.reset();
        self.state = TransactionState::Open;
        if discarded > 0 {
            tracing::debug!("Transaction {} rolled back {} messages", self.id, discarded);
        }
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::MemoryEventLogger;
    use bytes::Bytes;
    use relaymq_store::StoreConfig;
    use tempfile::TempDir;

    const CEILING: u64 = 100;

    struct Fixture {
        _dir: TempDir,
        store: Arc<MessageStore>,
        logger: Arc<MemoryEventLogger>,
        queue: Arc<Queue>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let store = Arc::new(MessageStore::open(StoreConfig::new(dir.path())).unwrap());
            Self {
                _dir: dir,
                store,
                logger: Arc::new(MemoryEventLogger::new()),
                queue: Arc::new(Queue::new("q")),
            }
        }

        fn transaction(&self, id: u64) -> LocalTransaction {
            LocalTransaction::new(id, self.store.clone(), CEILING, self.logger.clone())
        }

        fn message(&self, size: usize) -> Arc<MessageHandle> {
            self.store.add_message(Bytes::from(vec![7u8; size]))
        }
    }

    #[test]
    fn test_commit_below_ceiling() {
        let fx = Fixture::new();
        let mut txn = fx.transaction(1);
        let m1 = fx.message(10);
        let m2 = fx.message(20);

        txn.enqueue(fx.queue.clone(), m1.clone()).unwrap();
        txn.enqueue(fx.queue.clone(), m2.clone()).unwrap();
        assert!(m1.is_in_memory());
        assert_eq!(fx.queue.depth(), 0);

        let committed = txn.commit().unwrap();
        assert_eq!(committed.len(), 2);
        assert_eq!(committed[0].queue, "q");
        assert_eq!(committed[0].message_id, m1.message_id());
        assert_eq!(fx.queue.depth(), 2);
        assert!(!m1.is_in_memory());
        assert_eq!(txn.observer().total(), 0);
        assert!(fx.logger.is_empty());

        let recovered = fx.store.recover().unwrap();
        assert_eq!(recovered.len(), 2);
        assert_eq!(recovered[0].transaction_id, 1);
        assert_eq!(recovered[1].queue, "q");
    }

    #[test]
    fn test_breach_flows_to_disk_before_commit() {
        let fx = Fixture::new();
        let mut txn = fx.transaction(2);
        let m1 = fx.message(CEILING as usize);
        let m2 = fx.message(1);

        txn.enqueue(fx.queue.clone(), m1.clone()).unwrap();
        assert!(m1.is_in_memory());
        txn.enqueue(fx.queue.clone(), m2.clone()).unwrap();
        assert!(!m1.is_in_memory());
        assert!(!m2.is_in_memory());
        assert_eq!(fx.logger.count("TXN-1005"), 1);

        // Commit does not rewrite content already on disk
        let writes = fx.store.stats().content_writes;
        txn.commit().unwrap();
        assert_eq!(fx.store.stats().content_writes, writes);
        assert_eq!(fx.store.stats().commits, 1);
    }

    #[test]
    fn test_rollback_discards_without_unflushing() {
        let fx = Fixture::new();
        let mut txn = fx.transaction(3);
        let big = fx.message(CEILING as usize + 1);

        txn.enqueue(fx.queue.clone(), big.clone()).unwrap();
        assert!(!big.is_in_memory());

        assert_eq!(txn.rollback(), 1);
        assert!(!big.is_in_memory());
        assert_eq!(fx.queue.depth(), 0);
        assert_eq!(txn.observer().total(), 0);
        assert!(fx.store.recover().unwrap().is_empty());
    }

    #[test]
    fn test_transaction_is_reusable() {
        let fx = Fixture::new();
        let mut txn = fx.transaction(4);

        txn.enqueue(fx.queue.clone(), fx.message(90)).unwrap();
        txn.commit().unwrap();

        // Fresh window: 90 more bytes does not breach
        let m = fx.message(90);
        txn.enqueue(fx.queue.clone(), m.clone()).unwrap();
        assert!(m.is_in_memory());
        assert!(!txn.observer().is_over_ceiling());
        txn.rollback();
        assert_eq!(txn.rollback(), 0);
    }

    #[test]
    fn test_empty_commit_writes_nothing() {
        let fx = Fixture::new();
        let mut txn = fx.transaction(5);
        assert!(txn.commit().unwrap().is_empty());
        assert_eq!(fx.store.stats().commits, 0);
    }

    #[test]
    fn test_storage_failure_aborts() {
        let fx = Fixture::new();
        let mut txn = fx.transaction(6);
        txn.enqueue(fx.queue.clone(), fx.message(60)).unwrap();
        fx.store.close().unwrap();

        let err = txn.enqueue(fx.queue.clone(), fx.message(60)).unwrap_err();
        assert!(matches!(err, CoreError::Storage(_)));
        assert_eq!(txn.state(), TransactionState::Aborted);

        assert!(matches!(
            txn.enqueue(fx.queue.clone(), fx.message(1)),
            Err(CoreError::TransactionAborted { transaction_id: 6 })
        ));
        assert!(matches!(
            txn.commit(),
            Err(CoreError::TransactionAborted { .. })
        ));

        assert_eq!(txn.rollback(), 1);
        assert_eq!(txn.state(), TransactionState::Open);
        assert_eq!(fx.queue.depth(), 0);
    }

    #[test]
    fn test_commit_failure_aborts() {
        let fx = Fixture::new();
        let mut txn = fx.transaction(7);
        txn.enqueue(fx.queue.clone(), fx.message(5)).unwrap();
        fx.store.close().unwrap();

        assert!(matches!(txn.commit(), Err(CoreError::Storage(_))));
        assert_eq!(txn.state(), TransactionState::Aborted);
        assert_eq!(fx.queue.depth(), 0);
    }
}
