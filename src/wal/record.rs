//! WAL record format.
//!
//! Each record consists of:
//! - Checksum (4 bytes): CRC32-C of everything that follows
//! - Key length (4 bytes)
//! - Value length (4 bytes)
//! - Type (1 byte): the stored value's meta byte
//! - Key (variable)
//! - Sequence (8 bytes)
//! - Value (variable): the encoded stored value

use crate::codec;
use crate::entry::{ValueStruct, TOMBSTONE};
use crate::error::{Error, Result};
use bytes::BufMut;

/// Size of the record header (checksum + key length + value length + type)
pub const HEADER_SIZE: usize = 13;

/// A decoded WAL record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// User key.
    pub key: Vec<u8>,
    /// Sequence number of the write.
    pub seq: u64,
    /// Encoded stored value (see [`ValueStruct`]).
    pub value: Vec<u8>,
}

impl Record {
    /// Create a new record
    pub fn new(key: Vec<u8>, seq: u64, value: Vec<u8>) -> Self {
        Self { key, seq, value }
    }

    /// Encode the record into bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.put_u32_le(0);
        buf.put_u32_le(self.key.len() as u32);
        buf.put_u32_le(self.value.len() as u32);
        buf.put_u8(self.value.first().copied().unwrap_or(TOMBSTONE));
        buf.put_slice(&self.key);
        buf.put_u64_le(self.seq);
        buf.put_slice(&self.value);

        let checksum = codec::checksum(&buf[4..]);
        buf[0..4].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Total encoded size.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.key.len() + 8 + self.value.len()
    }

    /// Body length announced by a header.
    pub fn body_len(header: &[u8; HEADER_SIZE]) -> usize {
        let key_len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let value_len = u32::from_le_bytes([header[8], header[9], header[10], header[11]]) as usize;
        key_len + 8 + value_len
    }

    /// Decode a record from a header and its body.
    pub fn decode(header: &[u8; HEADER_SIZE], body: &[u8]) -> Result<Self> {
        let expected = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let mut hasher_input = Vec::with_capacity(HEADER_SIZE - 4 + body.len());
        hasher_input.extend_from_slice(&header[4..]);
        hasher_input.extend_from_slice(body);
        codec::verify_checksum(&hasher_input, expected)?;

        let key_len = codec::read_u32(header, 4)? as usize;
        let value_len = codec::read_u32(header, 8)? as usize;
        if body.len() != key_len + 8 + value_len {
            return Err(Error::corruption(format!(
                "WAL record body is {} bytes, header announces {}",
                body.len(),
                key_len + 8 + value_len
            )));
        }

        let key = body[..key_len].to_vec();
        let seq = codec::read_u64(body, key_len)?;
        let value = body[key_len + 8..].to_vec();

        let meta = header[12];
        if ValueStruct::decode(&value)?.meta != meta {
            return Err(Error::corruption("WAL record type does not match its value"));
        }
        Ok(Self { key, seq, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(encoded: &[u8]) -> ([u8; HEADER_SIZE], &[u8]) {
        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&encoded[..HEADER_SIZE]);
        (header, &encoded[HEADER_SIZE..])
    }

    #[test]
    fn test_record_encode_decode() {
        let value = ValueStruct::inline(b"value", 0).encode();
        let record = Record::new(b"key".to_vec(), 77, value);
        let encoded = record.encode();
        assert_eq!(encoded.len(), record.encoded_len());

        let (header, body) = split(&encoded);
        assert_eq!(Record::body_len(&header), body.len());
        assert_eq!(Record::decode(&header, body).unwrap(), record);
    }

    #[test]
    fn test_record_checksum_covers_body() {
        let record = Record::new(b"k".to_vec(), 1, ValueStruct::inline(b"v", 0).encode());
        let mut encoded = record.encode();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xff;
        let (header, body) = split(&encoded);
        assert!(matches!(Record::decode(&header, body), Err(Error::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_record_type_byte() {
        let record = Record::new(b"gone".to_vec(), 3, ValueStruct::tombstone().encode());
        let encoded = record.encode();
        assert_eq!(encoded[12], TOMBSTONE);
    }
}
