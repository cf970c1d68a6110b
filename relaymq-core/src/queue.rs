//! Queues holding committed messages.

use dashmap::DashMap;
use parking_lot::Mutex;
use relaymq_store::{MessageHandle, StoredMessage};
use std::collections::VecDeque;
use std::sync::Arc;

/// A named FIFO of committed messages.
#[derive(Debug)]
pub struct Queue {
    name: String,
    messages: Mutex<VecDeque<Arc<MessageHandle>>>,
}

impl Queue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            messages: Mutex::new(VecDeque::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends a committed message.
    pub fn deliver(&self, message: Arc<MessageHandle>) {
        self.messages.lock().push_back(message);
    }

    /// Removes and returns the oldest message.
    pub fn pop(&self) -> Option<Arc<MessageHandle>> {
        self.messages.lock().pop_front()
    }

    pub fn depth(&self) -> usize {
        self.messages.lock().len()
    }

    /// Total content size of queued messages.
    pub fn content_size(&self) -> u64 {
        self.messages.lock().iter().map(|m| m.content_size()).sum()
    }
}

/// All queues known to the broker.
#[derive(Debug, Default)]
pub struct QueueRegistry {
    queues: DashMap<String, Arc<Queue>>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the queue named `name`, creating it if needed.
    pub fn declare(&self, name: &str) -> Arc<Queue> {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::info!("Declared queue '{}'", name);
                Arc::new(Queue::new(name))
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Queue>> {
        self.queues.get(name).map(|q| q.clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.iter().map(|q| q.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use relaymq_store::{MessageStore, StoreConfig};
    use tempfile::TempDir;

    #[test]
    fn test_queue_fifo() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MessageStore::open(StoreConfig::new(dir.path())).unwrap());
        let queue = Queue::new("orders");

        let first = store.add_message(Bytes::from_static(b"first"));
        let second = store.add_message(Bytes::from_static(b"second"));
        queue.deliver(first.clone());
        queue.deliver(second.clone());

        assert_eq!(queue.depth(), 2);
        assert_eq!(queue.content_size(), 11);
        assert_eq!(queue.pop().unwrap().message_id(), first.message_id());
        assert_eq!(queue.pop().unwrap().message_id(), second.message_id());
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_declare_is_idempotent() {
        let registry = QueueRegistry::new();
        let a = registry.declare("orders");
        let b = registry.declare("orders");
        assert!(Arc::ptr_eq(&a, &b));
        registry.declare("audit");

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["audit", "orders"]);
        assert!(registry.get("missing").is_none());
    }
}
