//! Logical writes and the stored value encoding.
//!
//! Every value that reaches the memtable or a table is wrapped as
//!
//! ```text
//! [meta: u8][expires_at: uvarint][payload]
//! ```
//!
//! where `meta` says how to read the payload:
//!
//! - `VAL` (0): the payload is the user value itself
//! - `VAL_PTR` (1): the payload is `[file_id: u64][offset: u32]` into a value log
//! - `TOMBSTONE` (2): no payload, the key was deleted

use crate::codec;
use crate::error::{Error, Result};
use std::time::{SystemTime, UNIX_EPOCH};

/// Inline value.
pub const VAL: u8 = 0;
/// Pointer into a value log.
pub const VAL_PTR: u8 = 1;
/// Deletion marker.
pub const TOMBSTONE: u8 = 2;

/// Encoded size of a value pointer payload.
pub const VALUE_POINTER_SIZE: usize = 12;

/// One logical write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// User key.
    pub key: Vec<u8>,
    /// User value (empty for deletions).
    pub value: Vec<u8>,
    /// Sequence number, assigned by the engine.
    pub seq: u64,
    /// Expiry as Unix seconds, 0 means never.
    pub expires_at: u64,
}

impl Entry {
    /// Creates an entry without expiry.
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into(), value: value.into(), seq: 0, expires_at: 0 }
    }

    /// Sets the expiry.
    pub fn with_expires_at(mut self, expires_at: u64) -> Self {
        self.expires_at = expires_at;
        self
    }

    /// Sets the sequence number.
    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }
}

/// Location of a value inside a value log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValuePointer {
    /// Value-log file id.
    pub fid: u64,
    /// Record offset within the file.
    pub offset: u32,
}

impl ValuePointer {
    /// Encodes the pointer payload.
    pub fn encode(&self) -> [u8; VALUE_POINTER_SIZE] {
        let mut buf = [0u8; VALUE_POINTER_SIZE];
        buf[..8].copy_from_slice(&self.fid.to_le_bytes());
        buf[8..].copy_from_slice(&self.offset.to_le_bytes());
        buf
    }

    /// Decodes a pointer payload.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != VALUE_POINTER_SIZE {
            return Err(Error::corruption(format!("value pointer has {} bytes", data.len())));
        }
        Ok(Self { fid: codec::read_u64(data, 0)?, offset: codec::read_u32(data, 8)? })
    }
}

/// A decoded stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueStruct {
    /// One of `VAL`, `VAL_PTR`, `TOMBSTONE`.
    pub meta: u8,
    /// Expiry as Unix seconds, 0 means never.
    pub expires_at: u64,
    /// Inline bytes or an encoded pointer.
    pub payload: Vec<u8>,
}

impl ValueStruct {
    /// An inline value.
    pub fn inline(value: &[u8], expires_at: u64) -> Self {
        Self { meta: VAL, expires_at, payload: value.to_vec() }
    }

    /// A value-log pointer.
    pub fn pointer(ptr: ValuePointer, expires_at: u64) -> Self {
        Self { meta: VAL_PTR, expires_at, payload: ptr.encode().to_vec() }
    }

    /// A deletion marker.
    pub fn tombstone() -> Self {
        Self { meta: TOMBSTONE, expires_at: 0, payload: Vec::new() }
    }

    /// Serializes into the stored form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + codec::uvarint_len(self.expires_at) + self.payload.len());
        buf.push(self.meta);
        codec::put_uvarint(&mut buf, self.expires_at);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parses the stored form.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (&meta, rest) =
            data.split_first().ok_or_else(|| Error::corruption("empty stored value"))?;
        if meta > TOMBSTONE {
            return Err(Error::corruption(format!("unknown value meta {}", meta)));
        }
        let (expires_at, n) = codec::get_uvarint(rest)?;
        Ok(Self { meta, expires_at, payload: rest[n..].to_vec() })
    }

    /// Returns the pointer if this value lives in a value log.
    pub fn value_pointer(&self) -> Result<Option<ValuePointer>> {
        if self.meta == VAL_PTR {
            ValuePointer::decode(&self.payload).map(Some)
        } else {
            Ok(None)
        }
    }

    /// True for deletion markers.
    pub fn is_tombstone(&self) -> bool {
        self.meta == TOMBSTONE
    }

    /// True when the expiry is set and has passed.
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at != 0 && self.expires_at <= now
    }

    /// True when the entry should be treated as absent by readers.
    pub fn is_dead(&self, now: u64) -> bool {
        self.is_tombstone() || self.is_expired(now)
    }
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_value_encoding() {
        let vs = ValueStruct::inline(b"hello", 0);
        let encoded = vs.encode();
        assert_eq!(encoded[0], VAL);
        assert_eq!(ValueStruct::decode(&encoded).unwrap(), vs);
    }

    #[test]
    fn test_pointer_value_encoding() {
        let ptr = ValuePointer { fid: 9, offset: 4096 };
        let vs = ValueStruct::pointer(ptr, 1_700_000_000);
        let decoded = ValueStruct::decode(&vs.encode()).unwrap();
        assert_eq!(decoded.value_pointer().unwrap(), Some(ptr));
        assert_eq!(decoded.expires_at, 1_700_000_000);
    }

    #[test]
    fn test_dead_values() {
        assert!(ValueStruct::tombstone().is_dead(0));
        let vs = ValueStruct::inline(b"v", 100);
        assert!(!vs.is_dead(99));
        assert!(vs.is_dead(100));
        assert!(!ValueStruct::inline(b"v", 0).is_dead(u64::MAX));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(ValueStruct::decode(&[]).is_err());
        assert!(ValueStruct::decode(&[7, 0]).is_err());
        assert!(ValuePointer::decode(&[1, 2, 3]).is_err());
    }
}
