//! Data record format.
//!
//! A record is the unit of durability: one PUT or DELETE of one key. It is the
//! payload carried inside a log [`Envelope`](crate::wal::Envelope).
//!
//! ```text
//! [checksum: u32][timestamp: u64][flag: u16][key_len: u32][value_len: u32][key][value]
//! ```
//!
//! All fields are little-endian. The checksum is a CRC32 over every byte that
//! follows it, so it covers the lengths as well as the payload.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};
use crc32fast::Hasher;
use std::time::{SystemTime, UNIX_EPOCH};

/// Size of the fixed record header (4 + 8 + 2 + 4 + 4)
pub const RECORD_HEADER_SIZE: usize = 22;

/// Whether a record stores a value or removes the key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RecordType {
    /// Key-value insertion or overwrite
    Put = 0,
    /// Tombstone: the key is removed
    Delete = 1,
}

impl RecordType {
    /// Convert from the on-disk flag value
    pub fn from_u16(value: u16) -> Result<Self> {
        match value {
            0 => Ok(RecordType::Put),
            1 => Ok(RecordType::Delete),
            _ => Err(Error::corruption(format!("Invalid record flag: {}", value))),
        }
    }
}

/// A single key-value record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// CRC32 of the encoded bytes after this field, as stored
    pub checksum: u32,
    /// Milliseconds since the Unix epoch at creation
    pub timestamp: u64,
    /// PUT or DELETE
    pub record_type: RecordType,
    /// The key
    pub key: Vec<u8>,
    /// The value (empty for DELETE)
    pub value: Vec<u8>,
}

impl Record {
    /// Create a record stamped with the current time
    pub fn new(record_type: RecordType, key: Vec<u8>, value: Vec<u8>) -> Self {
        Self::with_timestamp(record_type, key, value, now_millis())
    }

    /// Create a record with an explicit timestamp
    pub fn with_timestamp(
        record_type: RecordType,
        key: Vec<u8>,
        value: Vec<u8>,
        timestamp: u64,
    ) -> Self {
        let checksum = Self::calculate_checksum(timestamp, record_type, &key, &value);
        Self {
            checksum,
            timestamp,
            record_type,
            key,
            value,
        }
    }

    /// Create a PUT record stamped with the current time
    pub fn put(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self::new(RecordType::Put, key, value)
    }

    /// Create a DELETE record stamped with the current time
    pub fn delete(key: Vec<u8>) -> Self {
        Self::new(RecordType::Delete, key, Vec::new())
    }

    /// Returns true if this record is a tombstone
    pub fn is_delete(&self) -> bool {
        self.record_type == RecordType::Delete
    }

    /// Encode the record into bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_size());

        buf.put_u32_le(self.checksum);
        buf.put_u64_le(self.timestamp);
        buf.put_u16_le(self.record_type as u16);
        buf.put_u32_le(self.key.len() as u32);
        buf.put_u32_le(self.value.len() as u32);
        buf.put_slice(&self.key);
        buf.put_slice(&self.value);

        buf.to_vec()
    }

    /// Decode a record from bytes.
    ///
    /// Only the structure is validated here; call [`Record::verify`] to check
    /// the stored checksum.
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < RECORD_HEADER_SIZE {
            return Err(Error::corruption(format!(
                "Record too short: {} bytes",
                data.len()
            )));
        }

        let checksum = data.get_u32_le();
        let timestamp = data.get_u64_le();
        let record_type = RecordType::from_u16(data.get_u16_le())?;
        let key_len = data.get_u32_le() as usize;
        let value_len = data.get_u32_le() as usize;

        let body_len = key_len
            .checked_add(value_len)
            .ok_or_else(|| Error::corruption("Record lengths overflow"))?;
        if data.len() != body_len {
            return Err(Error::corruption(format!(
                "Record length mismatch: header declares {} bytes, got {}",
                body_len,
                data.len()
            )));
        }

        let key = data[..key_len].to_vec();
        let value = data[key_len..].to_vec();

        Ok(Self {
            checksum,
            timestamp,
            record_type,
            key,
            value,
        })
    }

    /// Recompute the checksum and compare it with the stored one
    pub fn verify(&self) -> Result<()> {
        let actual =
            Self::calculate_checksum(self.timestamp, self.record_type, &self.key, &self.value);
        if actual != self.checksum {
            return Err(Error::ChecksumMismatch {
                expected: self.checksum,
                actual,
            });
        }
        Ok(())
    }

    /// Get the total size of the encoded record
    pub fn encoded_size(&self) -> usize {
        RECORD_HEADER_SIZE + self.key.len() + self.value.len()
    }

    /// Reject keys and values the header cannot describe
    pub fn check_sizes(key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::invalid_argument("key must not be empty"));
        }
        check_lengths(key.len(), value.len())
    }

    /// CRC32 over [timestamp][flag][key_len][value_len][key][value]
    fn calculate_checksum(
        timestamp: u64,
        record_type: RecordType,
        key: &[u8],
        value: &[u8],
    ) -> u32 {
        let mut header = [0u8; RECORD_HEADER_SIZE - 4];
        let mut buf = &mut header[..];
        buf.put_u64_le(timestamp);
        buf.put_u16_le(record_type as u16);
        buf.put_u32_le(key.len() as u32);
        buf.put_u32_le(value.len() as u32);

        let mut hasher = Hasher::new();
        hasher.update(&header);
        hasher.update(key);
        hasher.update(value);
        hasher.finalize()
    }
}

/// Wall-clock milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// The encoded record must fit the envelope's 32-bit length field
fn check_lengths(key_len: usize, value_len: usize) -> Result<()> {
    let total = RECORD_HEADER_SIZE
        .checked_add(key_len)
        .and_then(|n| n.checked_add(value_len));

    match total {
        Some(n) if n <= u32::MAX as usize => Ok(()),
        _ => Err(Error::invalid_argument(format!(
            "record too large: {} byte key, {} byte value",
            key_len, value_len
        ))),
    }
}
