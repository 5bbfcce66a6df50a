//! # Internal Key Format
//!
//! Keys inside the memtable carry the write's sequence number so that several
//! versions of one user key can live side by side.
//!
//! ## Format
//!
//! ```text
//! InternalKey:
//!   [user_key_len: uvarint] [user_key: bytes] [sequence: u64 LE]
//! ```
//!
//! ## Ordering
//!
//! InternalKeys are ordered by:
//! 1. user_key (ascending, by the configured comparator)
//! 2. sequence (descending - newer first)
//!
//! Seeking to `(key, snapshot)` therefore lands on the newest version of
//! `key` whose sequence is at most `snapshot`.

use crate::codec;
use crate::comparator::{Comparator, ComparatorRef};
use crate::error::{Error, Result};
use std::cmp::Ordering;

/// Builds the encoded internal key for `user_key` at `seq`.
pub fn encode(user_key: &[u8], seq: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(codec::uvarint_len(user_key.len() as u64) + user_key.len() + 8);
    codec::put_uvarint(&mut buf, user_key.len() as u64);
    buf.extend_from_slice(user_key);
    buf.extend_from_slice(&seq.to_le_bytes());
    buf
}

/// Splits an encoded internal key into its user key and sequence.
pub fn decode(data: &[u8]) -> Result<(&[u8], u64)> {
    let (len, n) = codec::get_uvarint(data)?;
    let len = len as usize;
    if data.len() != n + len + 8 {
        return Err(Error::corruption(format!(
            "internal key length mismatch: header says {}, have {}",
            len,
            data.len().saturating_sub(n + 8)
        )));
    }
    let seq = codec::read_u64(data, n + len)?;
    Ok((&data[n..n + len], seq))
}

/// Orders encoded internal keys: user key ascending, sequence descending.
#[derive(Debug, Clone)]
pub struct InternalKeyComparator {
    user: ComparatorRef,
}

impl InternalKeyComparator {
    /// Wraps a user-key comparator.
    pub fn new(user: ComparatorRef) -> Self {
        Self { user }
    }

    /// The wrapped user-key comparator.
    pub fn user_comparator(&self) -> &ComparatorRef {
        &self.user
    }
}

impl Comparator for InternalKeyComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match (decode(a), decode(b)) {
            (Ok((ua, sa)), Ok((ub, sb))) => self.user.compare(ua, ub).then_with(|| sb.cmp(&sa)),
            // Malformed keys never reach the list; keep the order total anyway.
            _ => a.cmp(b),
        }
    }

    fn name(&self) -> &'static str {
        "sepkv.InternalKey"
    }
}
