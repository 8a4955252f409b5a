//! Log envelope format.
//!
//! Every payload appended to the log is framed as:
//! - Checksum (4 bytes): CRC32 of the payload
//! - Length (4 bytes): Length of the payload
//! - Payload (variable): the encoded [`Record`](crate::record::Record)
//!
//! Both header fields are big-endian. The envelope lets the log validate the
//! integrity of what it stores without knowing the payload format.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};

/// Size of the envelope header (checksum + length)
pub const ENVELOPE_HEADER_SIZE: usize = 8;

/// A framed log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// CRC32 of the payload, as stored
    pub checksum: u32,
    /// The framed payload
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Wrap a payload, computing its checksum
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            checksum: crc32fast::hash(&payload),
            payload,
        }
    }

    /// Encode the envelope into bytes
    ///
    /// Format: [checksum: u32 BE][length: u32 BE][payload: bytes]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_size());
        buf.put_u32(self.checksum);
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        buf.to_vec()
    }

    /// Decode an envelope from exactly one encoded entry.
    ///
    /// The checksum is not verified; see [`Envelope::verify`].
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < ENVELOPE_HEADER_SIZE {
            return Err(Error::corruption(format!(
                "Envelope too short: {} bytes",
                data.len()
            )));
        }

        let (checksum, length) = Self::decode_header(&data[..ENVELOPE_HEADER_SIZE]);
        let payload = &data[ENVELOPE_HEADER_SIZE..];
        if payload.len() != length as usize {
            return Err(Error::corruption(format!(
                "Incomplete envelope: expected {} bytes, got {}",
                length,
                payload.len()
            )));
        }

        Ok(Self {
            checksum,
            payload: payload.to_vec(),
        })
    }

    /// Split a header into (checksum, payload length)
    pub fn decode_header(mut header: &[u8]) -> (u32, u32) {
        let checksum = header.get_u32();
        let length = header.get_u32();
        (checksum, length)
    }

    /// Check the stored checksum against the payload
    pub fn verify(&self) -> Result<()> {
        let actual = crc32fast::hash(&self.payload);
        if actual != self.checksum {
            return Err(Error::ChecksumMismatch {
                expected: self.checksum,
                actual,
            });
        }
        Ok(())
    }

    /// Verify and unwrap the payload
    pub fn into_payload(self) -> Result<Vec<u8>> {
        self.verify()?;
        Ok(self.payload)
    }

    /// Get the total size of the encoded envelope
    pub fn encoded_size(&self) -> usize {
        ENVELOPE_HEADER_SIZE + self.payload.len()
    }
}
