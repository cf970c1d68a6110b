//! Append-only content log file.

use crate::error::StoreError;
use crate::record::LogRecord;
use crate::RECORD_HEADER_SIZE;
use bytes::BytesMut;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Outcome of scanning the log from the start.
#[derive(Debug, Default)]
pub struct ScanResult {
    /// Valid records with their offsets.
    pub records: Vec<(u64, LogRecord)>,
    /// Offset just past the last valid record.
    pub valid_len: u64,
    /// Bytes after `valid_len`: a torn or corrupted tail.
    pub tail_len: u64,
}

/// The log file.
pub struct ContentLog {
    path: PathBuf,
    file: File,
    size: u64,
    sync_pending: bool,
}

impl ContentLog {
    /// Opens the log at `path`, creating it if missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path,
            file,
            size,
            sync_pending: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current size of the log.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Appends a record and returns its offset.
    pub fn append(&mut self, record: &LogRecord) -> Result<u64, StoreError> {
        let encoded = record.encode()?;
        let offset = self.size;

        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&encoded)?;
        self.size += encoded.len() as u64;
        self.sync_pending = true;

        Ok(offset)
    }

    /// Syncs appended records to disk.
    pub fn sync(&mut self) -> Result<(), StoreError> {
        if self.sync_pending {
            self.file.sync_data()?;
            self.sync_pending = false;
        }
        Ok(())
    }

    /// Reads the single record stored at `offset`.
    pub fn read_at(&mut self, offset: u64) -> Result<Option<LogRecord>, StoreError> {
        if offset + RECORD_HEADER_SIZE as u64 > self.size {
            return Ok(None);
        }
        self.file.seek(SeekFrom::Start(offset))?;

        let mut header = [0u8; RECORD_HEADER_SIZE];
        self.file.read_exact(&mut header)?;
        let payload_len = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as u64;
        if offset + RECORD_HEADER_SIZE as u64 + payload_len > self.size {
            return Ok(None);
        }

        let mut buf = BytesMut::zeroed(RECORD_HEADER_SIZE + payload_len as usize);
        buf[..RECORD_HEADER_SIZE].copy_from_slice(&header);
        self.file.read_exact(&mut buf[RECORD_HEADER_SIZE..])?;
        LogRecord::decode(&mut buf, offset)
    }

    /// Reads every valid record from the start of the log.
    ///
    /// Scanning stops at the first incomplete or corrupted record; everything
    /// after it is reported as the tail.
    pub fn scan(&mut self) -> Result<ScanResult, StoreError> {
        let mut result = ScanResult::default();
        let mut offset = 0u64;

        self.file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&self.file);
        let mut buf = BytesMut::new();
        let mut chunk = vec![0u8; 8192];

        'read: loop {
            let n = reader.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            while buf.len() >= RECORD_HEADER_SIZE {
                match LogRecord::decode(&mut buf, offset) {
                    Ok(Some(record)) => {
                        let size = record.disk_size() as u64;
                        result.records.push((offset, record));
                        offset += size;
                    }
                    Ok(None) => {
                        // Zero padding ends the log; a partial record needs more bytes
                        if buf[..4] == [0, 0, 0, 0] {
                            break 'read;
                        }
                        break;
                    }
                    Err(e) if e.is_corruption() => {
                        tracing::warn!("Content log scan stopped at offset {}: {}", offset, e);
                        break 'read;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        result.valid_len = offset;
        result.tail_len = self.size - offset;
        Ok(result)
    }

    /// Cuts the log back to `len` bytes, dropping a torn tail.
    pub fn truncate(&mut self, len: u64) -> Result<(), StoreError> {
        if len < self.size {
            self.file.set_len(len)?;
            self.file.sync_all()?;
            self.size = len;
        }
        Ok(())
    }
}
