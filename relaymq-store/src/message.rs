//! Message handles and the flow-to-disk boundary.

use crate::error::StoreError;
use crate::store::MessageStore;
use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// A message whose content the store can hold in memory or on disk.
///
/// This is the seam the enqueue tracker works against: it only needs the
/// content size and a way to force the content to durable storage.
pub trait StoredMessage: Send + Sync + fmt::Debug {
    /// Store-assigned message id.
    fn message_id(&self) -> u64;

    /// Size of the message content in bytes.
    fn content_size(&self) -> u64;

    /// Writes the content to disk and releases the in-memory copy.
    ///
    /// Calling this on a message that is already on disk does nothing.
    fn flow_to_disk(&self) -> Result<(), StoreError>;

    /// Returns true while the content is held only in memory.
    fn is_in_memory(&self) -> bool;
}

#[derive(Debug)]
enum Content {
    InMemory(Bytes),
    OnDisk { offset: u64 },
}

/// Handle to one message added to a [`MessageStore`].
pub struct MessageHandle {
    id: u64,
    size: u64,
    store: Arc<MessageStore>,
    content: Mutex<Content>,
}

impl MessageHandle {
    pub(crate) fn new(id: u64, content: Bytes, store: Arc<MessageStore>) -> Self {
        Self {
            id,
            size: content.len() as u64,
            store,
            content: Mutex::new(Content::InMemory(content)),
        }
    }

    pub(crate) fn on_disk(id: u64, size: u64, offset: u64, store: Arc<MessageStore>) -> Self {
        Self {
            id,
            size,
            store,
            content: Mutex::new(Content::OnDisk { offset }),
        }
    }

    /// Returns the message content, reading it back from the log if it has
    /// been flowed to disk.
    pub fn content(&self) -> Result<Bytes, StoreError> {
        let offset = match &*self.content.lock() {
            Content::InMemory(bytes) => return Ok(bytes.clone()),
            Content::OnDisk { offset } => *offset,
        };
        self.store.read_content(self.id, offset)
    }

    /// Returns the log offset of the content record once on disk.
    pub fn disk_offset(&self) -> Option<u64> {
        match &*self.content.lock() {
            Content::InMemory(_) => None,
            Content::OnDisk { offset } => Some(*offset),
        }
    }
}

impl StoredMessage for MessageHandle {
    fn message_id(&self) -> u64 {
        self.id
    }

    fn content_size(&self) -> u64 {
        self.size
    }

    fn flow_to_disk(&self) -> Result<(), StoreError> {
        let mut content = self.content.lock();
        if let Content::InMemory(bytes) = &*content {
            let offset = self.store.write_content(self.id, bytes.clone())?;
            *content = Content::OnDisk { offset };
            tracing::debug!(
                "Message {} flowed to disk at offset {} ({} bytes)",
                self.id,
                offset,
                self.size
            );
        }
        Ok(())
    }

    fn is_in_memory(&self) -> bool {
        matches!(*self.content.lock(), Content::InMemory(_))
    }
}

impl fmt::Debug for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageHandle")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("content", &*self.content.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreConfig;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> Arc<MessageStore> {
        Arc::new(MessageStore::open(StoreConfig::new(dir.path())).unwrap())
    }

    #[test]
    fn test_flow_to_disk_releases_memory() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let handle = store.add_message(Bytes::from_static(b"body"));

        assert!(handle.is_in_memory());
        assert_eq!(handle.disk_offset(), None);
        assert_eq!(handle.content_size(), 4);

        handle.flow_to_disk().unwrap();
        assert!(!handle.is_in_memory());
        assert_eq!(handle.disk_offset(), Some(0));
        assert_eq!(handle.content().unwrap().as_ref(), b"body");
    }

    #[test]
    fn test_flow_to_disk_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let handle = store.add_message(Bytes::from_static(b"once"));

        handle.flow_to_disk().unwrap();
        let size_after_first = store.log_size();
        handle.flow_to_disk().unwrap();
        assert_eq!(store.log_size(), size_after_first);
        assert_eq!(store.stats().content_writes, 1);
    }

    #[test]
    fn test_flow_to_disk_fails_when_closed() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let handle = store.add_message(Bytes::from_static(b"late"));
        store.close().unwrap();

        assert!(matches!(handle.flow_to_disk(), Err(StoreError::Closed)));
        // Content is still held in memory
        assert!(handle.is_in_memory());
        assert_eq!(handle.content().unwrap().as_ref(), b"late");
    }
}
