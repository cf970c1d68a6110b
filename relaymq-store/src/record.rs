//! Log record format.
//!
//! Each record has the following on-disk format:
//!
//! ```text
//! +----------+----------+----------+----------+----------+----------+
//! | magic    | type     | flags    | reserved | length   | crc32c   |
//! | 4 bytes  | 1 byte   | 1 byte   | 2 bytes  | 4 bytes  | 4 bytes  |
//! +----------+----------+----------+----------+----------+----------+
//! | id                  | payload                                   |
//! | 8 bytes             | length bytes                              |
//! +---------------------+-------------------------------------------+
//! ```
//!
//! For content records `id` is the message id and the payload is the raw
//! message content. For commit records `id` is the transaction id and the
//! payload is a JSON [`CommitEntry`].

use crate::error::StoreError;
use crate::RECORD_HEADER_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Magic bytes for log records: "RMQL"
pub const LOG_MAGIC: [u8; 4] = *b"RMQL";

/// Maximum record payload size (64 MiB).
pub const MAX_RECORD_SIZE: usize = 64 * 1024 * 1024;

/// Type of log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Message content flowed to disk.
    Content = 1,
    /// Transaction commit listing the messages it made durable.
    Commit = 2,
}

impl TryFrom<u8> for RecordType {
    type Error = StoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(RecordType::Content),
            2 => Ok(RecordType::Commit),
            _ => Err(StoreError::InvalidHeader {
                offset: 0,
                reason: format!("unknown record type: {}", value),
            }),
        }
    }
}

/// A complete log record (header fields + payload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub record_type: RecordType,
    pub id: u64,
    pub crc32c: u32,
    pub payload: Bytes,
}

impl LogRecord {
    pub fn new(record_type: RecordType, id: u64, payload: Bytes) -> Self {
        Self {
            record_type,
            id,
            crc32c: crc32c::crc32c(&payload),
            payload,
        }
    }

    /// Creates a content record for a message.
    pub fn content(message_id: u64, content: Bytes) -> Self {
        Self::new(RecordType::Content, message_id, content)
    }

    /// Creates a commit record.
    pub fn commit(entry: &CommitEntry) -> Result<Self, StoreError> {
        let payload = serde_json::to_vec(entry)?;
        Ok(Self::new(
            RecordType::Commit,
            entry.transaction_id,
            Bytes::from(payload),
        ))
    }

    /// Parses the payload of a commit record.
    pub fn commit_entry(&self) -> Result<CommitEntry, StoreError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Encodes the record into bytes.
    pub fn encode(&self) -> Result<BytesMut, StoreError> {
        if self.payload.len() > MAX_RECORD_SIZE {
            return Err(StoreError::RecordTooLarge {
                size: self.payload.len(),
                max: MAX_RECORD_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(self.disk_size());
        buf.put_slice(&LOG_MAGIC);
        buf.put_u8(self.record_type as u8);
        buf.put_u8(0); // flags
        buf.put_u16(0); // reserved
        buf.put_u32(self.payload.len() as u32);
        buf.put_u32(self.crc32c);
        buf.put_u64(self.id);
        buf.put_slice(&self.payload);
        Ok(buf)
    }

    /// Decodes a record from the front of `buf`.
    ///
    /// Returns `Ok(None)` if the buffer ends before the record does, or if
    /// it starts with zero padding.
    pub fn decode(buf: &mut BytesMut, offset: u64) -> Result<Option<Self>, StoreError> {
        if buf.len() < RECORD_HEADER_SIZE {
            return Ok(None);
        }

        let magic = [buf[0], buf[1], buf[2], buf[3]];
        if magic != LOG_MAGIC {
            if magic == [0, 0, 0, 0] {
                return Ok(None);
            }
            return Err(StoreError::InvalidHeader {
                offset,
                reason: format!("invalid magic: {:?}", magic),
            });
        }

        let record_type = RecordType::try_from(buf[4]).map_err(|_| StoreError::InvalidHeader {
            offset,
            reason: format!("unknown record type: {}", buf[4]),
        })?;
        let payload_len = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]) as usize;
        let crc_expected = u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]);
        let id = u64::from_be_bytes([
            buf[16], buf[17], buf[18], buf[19], buf[20], buf[21], buf[22], buf[23],
        ]);

        if payload_len > MAX_RECORD_SIZE {
            return Err(StoreError::RecordTooLarge {
                size: payload_len,
                max: MAX_RECORD_SIZE,
            });
        }
        if buf.len() < RECORD_HEADER_SIZE + payload_len {
            return Ok(None);
        }

        buf.advance(RECORD_HEADER_SIZE);
        let payload = buf.split_to(payload_len).freeze();

        let crc_actual = crc32c::crc32c(&payload);
        if crc_actual != crc_expected {
            return Err(StoreError::CorruptedRecord {
                offset,
                expected: crc_expected,
                actual: crc_actual,
            });
        }

        Ok(Some(Self {
            record_type,
            id,
            crc32c: crc_expected,
            payload,
        }))
    }

    /// Returns the total size of this record on disk.
    pub fn disk_size(&self) -> usize {
        RECORD_HEADER_SIZE + self.payload.len()
    }
}

/// Payload of a commit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitEntry {
    pub transaction_id: u64,
    pub messages: Vec<CommitItem>,
}

/// One message made durable by a commit, with the queue it was enqueued to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitItem {
    pub message_id: u64,
    pub queue: String,
}

impl CommitItem {
    pub fn new(message_id: u64, queue: impl Into<String>) -> Self {
        Self {
            message_id,
            queue: queue.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_content_record_layout() {
        let record = LogRecord::content(42, Bytes::from_static(b"hello"));
        let encoded = record.encode().unwrap();
        assert_eq!(&encoded[..4], b"RMQL");
        assert_eq!(encoded[4], RecordType::Content as u8);
        assert_eq!(&encoded[8..12], &[0, 0, 0, 5]);
        assert_eq!(&encoded[16..24], &42u64.to_be_bytes());
        assert_eq!(encoded.len(), record.disk_size());

        let mut buf = encoded;
        let decoded = LogRecord::decode(&mut buf, 0).unwrap().unwrap();
        assert_eq!(decoded, record);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_commit_record_payload() {
        let entry = CommitEntry {
            transaction_id: 7,
            messages: vec![CommitItem::new(1, "a"), CommitItem::new(2, "b")],
        };
        let record = LogRecord::commit(&entry).unwrap();
        assert_eq!(record.record_type, RecordType::Commit);
        assert_eq!(record.id, 7);
        assert_eq!(record.commit_entry().unwrap(), entry);
    }

    #[test]
    fn test_corrupted_record_detection() {
        let record = LogRecord::content(1, Bytes::from_static(b"payload"));
        let mut encoded = record.encode().unwrap();
        let len = encoded.len();
        encoded[len - 1] ^= 0xFF;

        let result = LogRecord::decode(&mut encoded, 96);
        assert!(matches!(
            result,
            Err(StoreError::CorruptedRecord { offset: 96, .. })
        ));
    }

    #[test]
    fn test_zero_padding_reads_as_end() {
        let mut buf = BytesMut::from(&[0u8; RECORD_HEADER_SIZE][..]);
        assert!(LogRecord::decode(&mut buf, 0).unwrap().is_none());
    }

    #[test]
    fn test_invalid_magic_and_type() {
        let mut bad = LogRecord::content(1, Bytes::new()).encode().unwrap();
        bad[0] = b'X';
        assert!(matches!(
            LogRecord::decode(&mut bad, 0),
            Err(StoreError::InvalidHeader { .. })
        ));

        let mut bad = LogRecord::content(1, Bytes::new()).encode().unwrap();
        bad[4] = 9;
        assert!(matches!(
            LogRecord::decode(&mut bad, 0),
            Err(StoreError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn test_record_too_large() {
        let record = LogRecord::content(1, Bytes::from(vec![0u8; MAX_RECORD_SIZE + 1]));
        assert!(matches!(
            record.encode(),
            Err(StoreError::RecordTooLarge { .. })
        ));
    }

    proptest! {
        /// A record cut short anywhere is reported as incomplete and leaves
        /// the buffer untouched.
        #[test]
        fn prop_truncated_record_is_incomplete(
            content in proptest::collection::vec(any::<u8>(), 0..256),
            cut in any::<prop::sample::Index>(),
        ) {
            let encoded = LogRecord::content(3, Bytes::from(content)).encode().unwrap();
            let cut = cut.index(encoded.len());
            let mut buf = BytesMut::from(&encoded[..cut]);
            prop_assert!(LogRecord::decode(&mut buf, 0).unwrap().is_none());
            prop_assert_eq!(buf.len(), cut);
        }
    }
}
