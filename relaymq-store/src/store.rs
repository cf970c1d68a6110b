//! Message store.

use crate::error::StoreError;
use crate::log::ContentLog;
use crate::message::MessageHandle;
use crate::record::{CommitEntry, CommitItem, LogRecord, RecordType};
use crate::LOG_FILE_NAME;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Fsync policy for log writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsyncPolicy {
    /// Fsync after every commit record (safest, slowest).
    #[default]
    EveryWrite,
    /// Fsync after N commit records.
    EveryN(u32),
    /// Never fsync, rely on the OS (fastest, least safe).
    Never,
}

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the content log.
    pub dir: PathBuf,
    /// Fsync policy.
    pub fsync_policy: FsyncPolicy,
}

impl StoreConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            fsync_policy: FsyncPolicy::default(),
        }
    }

    pub fn with_fsync_policy(mut self, policy: FsyncPolicy) -> Self {
        self.fsync_policy = policy;
        self
    }

    /// Returns the content log path.
    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE_NAME)
    }
}

/// I/O statistics for the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Content records written by flow-to-disk.
    pub content_writes: u64,
    /// Commit records written.
    pub commits: u64,
    /// Content reads served from the log.
    pub content_reads: u64,
    /// Total bytes appended.
    pub bytes_written: u64,
    /// Total fsync operations.
    pub fsyncs: u64,
}

/// A committed message found during recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredMessage {
    pub message_id: u64,
    pub transaction_id: u64,
    /// Queue the message was committed to.
    pub queue: String,
    /// Log offset of the content record.
    pub offset: u64,
    pub content: Bytes,
}

/// Durable message store backed by one append-only content log.
///
/// Content reaches the log only when a message is flowed to disk. A message
/// counts as stored once a commit record naming it has been written.
pub struct MessageStore {
    config: StoreConfig,
    log: Mutex<ContentLog>,
    next_message_id: AtomicU64,
    commits_since_sync: AtomicU64,
    closed: AtomicBool,
    stats_content_writes: AtomicU64,
    stats_commits: AtomicU64,
    stats_content_reads: AtomicU64,
    stats_bytes_written: AtomicU64,
    stats_fsyncs: AtomicU64,
}

impl std::fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStore")
            .field("dir", &self.config.dir)
            .field("fsync_policy", &self.config.fsync_policy)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl MessageStore {
    /// Opens or creates the store in the configured directory.
    ///
    /// A partially written record at the end of the log is cut off so new
    /// records follow the last complete one.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&config.dir)?;
        let mut log = ContentLog::open(config.log_path())?;

        let scan = log.scan()?;
        if scan.tail_len > 0 {
            tracing::warn!(
                "Truncating {} bytes of torn tail from {}",
                scan.tail_len,
                log.path().display()
            );
            log.truncate(scan.valid_len)?;
        }

        let max_message_id = scan
            .records
            .iter()
            .filter(|(_, r)| r.record_type == RecordType::Content)
            .map(|(_, r)| r.id)
            .max()
            .unwrap_or(0);

        tracing::info!(
            "Message store opened: {} records, next_message_id={}",
            scan.records.len(),
            max_message_id + 1
        );

        Ok(Self {
            config,
            log: Mutex::new(log),
            next_message_id: AtomicU64::new(max_message_id + 1),
            commits_since_sync: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            stats_content_writes: AtomicU64::new(0),
            stats_commits: AtomicU64::new(0),
            stats_content_reads: AtomicU64::new(0),
            stats_bytes_written: AtomicU64::new(0),
            stats_fsyncs: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Creates an in-memory message with a fresh id.
    pub fn add_message(self: &Arc<Self>, content: Bytes) -> Arc<MessageHandle> {
        let id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        Arc::new(MessageHandle::new(id, content, Arc::clone(self)))
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    /// Recreates the handle for a recovered message. Its content stays on
    /// disk and is read back on demand.
    pub fn restore(self: &Arc<Self>, recovered: &RecoveredMessage) -> Arc<MessageHandle> {
        Arc::new(MessageHandle::on_disk(
            recovered.message_id,
            recovered.content.len() as u64,
            recovered.offset,
            Arc::clone(self),
        ))
    }

    /// Appends a content record and returns its offset.
    pub(crate) fn write_content(&self, message_id: u64, content: Bytes) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let record = LogRecord::content(message_id, content);
        let offset = self.log.lock().append(&record)?;

        self.stats_content_writes.fetch_add(1, Ordering::Relaxed);
        self.stats_bytes_written
            .fetch_add(record.disk_size() as u64, Ordering::Relaxed);
        Ok(offset)
    }

    /// Reads back content written by [`MessageStore::write_content`].
    pub(crate) fn read_content(&self, message_id: u64, offset: u64) -> Result<Bytes, StoreError> {
        let record = self.log.lock().read_at(offset)?;
        self.stats_content_reads.fetch_add(1, Ordering::Relaxed);
        match record {
            Some(r) if r.record_type == RecordType::Content && r.id == message_id => Ok(r.payload),
            _ => Err(StoreError::ContentMissing { message_id, offset }),
        }
    }

    /// Writes a commit record for messages whose content is already on disk.
    pub fn commit(&self, transaction_id: u64, messages: &[CommitItem]) -> Result<(), StoreError> {
        self.ensure_open()?;
        let record = LogRecord::commit(&CommitEntry {
            transaction_id,
            messages: messages.to_vec(),
        })?;

        let mut log = self.log.lock();
        log.append(&record)?;
        self.stats_commits.fetch_add(1, Ordering::Relaxed);
        self.stats_bytes_written
            .fetch_add(record.disk_size() as u64, Ordering::Relaxed);

        let commits = self.commits_since_sync.fetch_add(1, Ordering::Relaxed) + 1;
        let sync = match self.config.fsync_policy {
            FsyncPolicy::EveryWrite => true,
            FsyncPolicy::EveryN(n) => commits >= u64::from(n),
            FsyncPolicy::Never => false,
        };
        if sync {
            log.sync()?;
            self.stats_fsyncs.fetch_add(1, Ordering::Relaxed);
            self.commits_since_sync.store(0, Ordering::Relaxed);
        }

        tracing::debug!(
            "Committed transaction {} ({} messages)",
            transaction_id,
            messages.len()
        );
        Ok(())
    }

    /// Scans the log and returns every committed message in commit order.
    ///
    /// Content that was flowed to disk but never committed is skipped.
    pub fn recover(&self) -> Result<Vec<RecoveredMessage>, StoreError> {
        let scan = self.log.lock().scan()?;

        let mut contents: HashMap<u64, (u64, Bytes)> = HashMap::new();
        let mut recovered = Vec::new();
        for (offset, record) in scan.records {
            match record.record_type {
                RecordType::Content => {
                    contents.insert(record.id, (offset, record.payload));
                }
                RecordType::Commit => {
                    let entry = record.commit_entry()?;
                    for item in entry.messages {
                        match contents.remove(&item.message_id) {
                            Some((content_offset, content)) => recovered.push(RecoveredMessage {
                                message_id: item.message_id,
                                transaction_id: entry.transaction_id,
                                queue: item.queue,
                                offset: content_offset,
                                content,
                            }),
                            None => tracing::warn!(
                                "Commit at offset {} names message {} with no content",
                                offset,
                                item.message_id
                            ),
                        }
                    }
                }
            }
        }

        tracing::info!(
            "Recovered {} committed messages ({} uncommitted skipped)",
            recovered.len(),
            contents.len()
        );
        Ok(recovered)
    }

    /// Forces a sync to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.log.lock().sync()?;
        self.stats_fsyncs.fetch_add(1, Ordering::Relaxed);
        self.commits_since_sync.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Returns the current log size in bytes.
    pub fn log_size(&self) -> u64 {
        self.log.lock().size()
    }

    /// Returns the current I/O statistics.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            content_writes: self.stats_content_writes.load(Ordering::Relaxed),
            commits: self.stats_commits.load(Ordering::Relaxed),
            content_reads: self.stats_content_reads.load(Ordering::Relaxed),
            bytes_written: self.stats_bytes_written.load(Ordering::Relaxed),
            fsyncs: self.stats_fsyncs.load(Ordering::Relaxed),
        }
    }

    /// Closes the store. Later writes fail with [`StoreError::Closed`].
    pub fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        self.sync()
    }
}
