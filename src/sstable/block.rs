//! Block format implementation for SSTable.
//!
//! A block holds a run of sorted entries. Every key is prefix-compressed
//! against the block's base key (its first key), and a trailer lists where
//! each entry starts so lookups can binary search.
//!
//! ```text
//! [Entry 1]
//! ...
//! [Entry N]
//! [Entry Offset 1: u32] ... [Entry Offset N: u32]
//! [Num Entries: u32]
//! [Checksum: u32]          // CRC32-C of everything above
//! [Checksum Len: u32]      // always 4
//! ```
//!
//! Each entry:
//! ```text
//! [overlap: u16]           // bytes shared with the base key
//! [diff: u16]              // length of the key suffix
//! [diff_key: bytes]
//! [seq: u64]
//! [value: bytes]           // runs to the next entry (or the offset table)
//! ```

use crate::codec;
use crate::comparator::Comparator;
use crate::error::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::cmp::Ordering;

/// Entry header size (overlap + diff).
pub const ENTRY_HEADER_SIZE: usize = 4;

/// Fixed trailer bytes besides the offsets (count + checksum + checksum len).
const TRAILER_FIXED: usize = 4 + 4 + 4;

/// Block stores sorted entries with base-key prefix compression.
#[derive(Debug, Clone)]
pub struct Block {
    data: Bytes,
    offsets: Vec<u32>,
    entries_end: usize,
    base_key: Vec<u8>,
}

impl Block {
    /// Parses and checksum-verifies a block.
    pub fn decode(data: Bytes) -> Result<Self> {
        let len = data.len();
        if len < TRAILER_FIXED {
            return Err(Error::corruption("Block too small"));
        }
        let checksum_len = codec::read_u32(&data, len - 4)? as usize;
        if checksum_len != 4 {
            return Err(Error::corruption(format!("Unexpected block checksum length {}", checksum_len)));
        }
        let stored = codec::read_u32(&data, len - 8)?;
        codec::verify_checksum(&data[..len - 8], stored)?;

        let count = codec::read_u32(&data, len - 12)? as usize;
        let offsets_start = (len - TRAILER_FIXED)
            .checked_sub(count * 4)
            .ok_or_else(|| Error::corruption("Block offset table overruns block"))?;
        let offsets = (0..count)
            .map(|i| codec::read_u32(&data, offsets_start + i * 4))
            .collect::<Result<Vec<u32>>>()?;
        if offsets.iter().any(|&o| o as usize >= offsets_start) {
            return Err(Error::corruption("Block entry offset out of range"));
        }

        let mut block = Self { data, offsets, entries_end: offsets_start, base_key: Vec::new() };
        if count > 0 {
            let (key, _, _) = block.entry(0)?;
            block.base_key = key;
        }
        Ok(block)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// True for a block without entries.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// The block's first key.
    pub fn base_key(&self) -> &[u8] {
        &self.base_key
    }

    /// Encoded size in bytes, the cache charge.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Decodes entry `idx` into (key, seq, value).
    pub fn entry(&self, idx: usize) -> Result<(Vec<u8>, u64, Vec<u8>)> {
        let start = self.offsets[idx] as usize;
        let end = self.offsets.get(idx + 1).map_or(self.entries_end, |&o| o as usize);
        if end < start + ENTRY_HEADER_SIZE {
            return Err(Error::corruption("Block entry shorter than its header"));
        }
        let raw = &self.data[start..end];
        let overlap = u16::from_le_bytes([raw[0], raw[1]]) as usize;
        let diff = u16::from_le_bytes([raw[2], raw[3]]) as usize;
        if overlap > self.base_key.len() || ENTRY_HEADER_SIZE + diff + 8 > raw.len() {
            return Err(Error::corruption("Block entry header out of range"));
        }

        let mut key = Vec::with_capacity(overlap + diff);
        key.extend_from_slice(&self.base_key[..overlap]);
        key.extend_from_slice(&raw[ENTRY_HEADER_SIZE..ENTRY_HEADER_SIZE + diff]);
        let seq = codec::read_u64(raw, ENTRY_HEADER_SIZE + diff)?;
        let value = raw[ENTRY_HEADER_SIZE + diff + 8..].to_vec();
        Ok((key, seq, value))
    }

    /// Index of the first entry with key >= `key`, or `len()`.
    pub fn search(&self, key: &[u8], cmp: &dyn Comparator) -> Result<usize> {
        let (mut lo, mut hi) = (0, self.offsets.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let (mid_key, _, _) = self.entry(mid)?;
            if cmp.compare(&mid_key, key) == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// Create an iterator over the block
    pub fn iter(&self) -> BlockIterator {
        BlockIterator::new(self.clone())
    }
}

/// BlockBuilder accumulates entries for one block.
#[derive(Debug, Default)]
pub struct BlockBuilder {
    buffer: BytesMut,
    entry_offsets: Vec<u32>,
    base_key: Vec<u8>,
}

impl BlockBuilder {
    /// Create a new BlockBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Size of the finished block if one more entry were added.
    ///
    /// # Panics
    ///
    /// Panics on `u32` overflow of the block accounting; a block that large
    /// means the builder's size checks were bypassed.
    pub fn estimate_with(&self, key_len: usize, value_len: usize) -> usize {
        let entries = self.entry_offsets.len() as u64 + 1;
        assert!(entries * 4 + TRAILER_FIXED as u64 <= u64::from(u32::MAX), "Integer overflow");
        let kv = (ENTRY_HEADER_SIZE + key_len + 8 + value_len) as u64;
        let estimate = self.buffer.len() as u64 + kv + entries * 4 + TRAILER_FIXED as u64;
        assert!(estimate < u64::from(u32::MAX), "Integer overflow");
        estimate as usize
    }

    /// True when adding this entry would push the block past `block_size`.
    /// An empty block always takes at least one entry.
    pub fn would_exceed(&self, key_len: usize, value_len: usize, block_size: usize) -> bool {
        !self.is_empty() && self.estimate_with(key_len, value_len) > block_size
    }

    /// Add an entry. Keys must arrive in comparator order.
    pub fn add(&mut self, key: &[u8], seq: u64, value: &[u8]) {
        assert!(key.len() <= u16::MAX as usize, "block keys are limited to 64 KiB");
        // The first entry carries its full key; later ones share a prefix with it.
        let overlap = if self.entry_offsets.is_empty() {
            self.base_key = key.to_vec();
            0
        } else {
            self.shared_prefix_len(key)
        };
        let diff = &key[overlap..];

        self.entry_offsets.push(self.buffer.len() as u32);
        self.buffer.put_u16_le(overlap as u16);
        self.buffer.put_u16_le(diff.len() as u16);
        self.buffer.put_slice(diff);
        self.buffer.put_u64_le(seq);
        self.buffer.put_slice(value);
    }

    fn shared_prefix_len(&self, key: &[u8]) -> usize {
        self.base_key.iter().zip(key).take_while(|(a, b)| a == b).count()
    }

    /// Writes the trailer and returns the block bytes.
    pub fn finish(mut self) -> Bytes {
        for offset in &self.entry_offsets {
            self.buffer.put_u32_le(*offset);
        }
        self.buffer.put_u32_le(self.entry_offsets.len() as u32);
        let checksum = codec::checksum(&self.buffer);
        self.buffer.put_u32_le(checksum);
        self.buffer.put_u32_le(4);
        self.buffer.freeze()
    }

    /// The block's first key.
    pub fn base_key(&self) -> &[u8] {
        &self.base_key
    }

    /// Entries added so far.
    pub fn len(&self) -> usize {
        self.entry_offsets.len()
    }

    /// Check if the block is empty
    pub fn is_empty(&self) -> bool {
        self.entry_offsets.is_empty()
    }
}

/// Iterator over entries in a block
#[derive(Debug)]
pub struct BlockIterator {
    block: Block,
    idx: usize,
    key: Vec<u8>,
    seq: u64,
    value: Vec<u8>,
}

impl BlockIterator {
    fn new(block: Block) -> Self {
        let idx = block.len();
        Self { block, idx, key: Vec::new(), seq: 0, value: Vec::new() }
    }

    /// Positions at entry `idx` (past the end invalidates the iterator).
    pub fn seek_to(&mut self, idx: usize) -> Result<()> {
        self.idx = idx;
        if idx < self.block.len() {
            let (key, seq, value) = self.block.entry(idx)?;
            self.key = key;
            self.seq = seq;
            self.value = value;
        }
        Ok(())
    }

    /// Positions at the first entry.
    pub fn seek_to_first(&mut self) -> Result<()> {
        self.seek_to(0)
    }

    /// Positions at the first entry with key >= `key`.
    pub fn seek(&mut self, key: &[u8], cmp: &dyn Comparator) -> Result<()> {
        let idx = self.block.search(key, cmp)?;
        self.seek_to(idx)
    }

    /// Moves to the next entry.
    pub fn advance(&mut self) -> Result<()> {
        self.seek_to(self.idx + 1)
    }

    /// True while positioned on an entry.
    pub fn valid(&self) -> bool {
        self.idx < self.block.len()
    }

    /// Current key.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Current sequence number.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Current value.
    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::BytewiseComparator;

    fn build(entries: &[(&[u8], u64, &[u8])]) -> Block {
        let mut builder = BlockBuilder::new();
        for (k, s, v) in entries {
            builder.add(k, *s, v);
        }
        Block::decode(builder.finish()).unwrap()
    }

    #[test]
    fn test_block_entries_round_trip() {
        let block = build(&[(b"apple", 3, b"red"), (b"apricot", 2, b"orange"), (b"banana", 1, b"")]);
        assert_eq!(block.len(), 3);
        assert_eq!(block.base_key(), b"apple");
        assert_eq!(block.entry(1).unwrap(), (b"apricot".to_vec(), 2, b"orange".to_vec()));
        assert_eq!(block.entry(2).unwrap(), (b"banana".to_vec(), 1, Vec::new()));
    }

    #[test]
    fn test_first_entry_stores_full_key() {
        let mut builder = BlockBuilder::new();
        builder.add(b"a", 1, b"1");
        let raw = builder.finish();
        assert_eq!(&raw[..5], &[0, 0, 1, 0, b'a']);

        let block = Block::decode(raw).unwrap();
        assert_eq!(block.base_key(), b"a");
        assert_eq!(block.entry(0).unwrap(), (b"a".to_vec(), 1, b"1".to_vec()));
    }

    #[test]
    fn test_block_prefix_compression_is_against_base_key() {
        let mut builder = BlockBuilder::new();
        builder.add(b"prefix_0001", 1, b"");
        builder.add(b"prefix_0002", 1, b"");
        let compressed = builder.finish();

        let mut plain = BlockBuilder::new();
        plain.add(b"prefix_0001", 1, b"");
        plain.add(b"zzzzzzzzzzz", 1, b"");
        assert!(compressed.len() < plain.finish().len());
    }

    #[test]
    fn test_block_iterator_seek() {
        let block = build(&[(b"b", 1, b"1"), (b"d", 1, b"2"), (b"f", 1, b"3")]);
        let mut iter = block.iter();
        iter.seek(b"c", &BytewiseComparator).unwrap();
        assert!(iter.valid());
        assert_eq!(iter.key(), b"d");
        iter.advance().unwrap();
        assert_eq!(iter.key(), b"f");
        iter.advance().unwrap();
        assert!(!iter.valid());

        iter.seek(b"g", &BytewiseComparator).unwrap();
        assert!(!iter.valid());
        iter.seek_to_first().unwrap();
        assert_eq!(iter.value(), b"1");
    }

    #[test]
    fn test_block_checksum_detects_corruption() {
        let mut builder = BlockBuilder::new();
        builder.add(b"key", 9, b"value");
        let mut raw = builder.finish().to_vec();
        raw[5] ^= 0x01;
        assert!(matches!(Block::decode(Bytes::from(raw)), Err(Error::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_block_size_estimate() {
        let mut builder = BlockBuilder::new();
        assert!(!builder.would_exceed(10_000, 10_000, 16));
        builder.add(b"k1", 1, &[0u8; 100]);
        assert!(builder.would_exceed(2, 100, 128));
        assert!(!builder.would_exceed(2, 100, 4096));
        let estimate = builder.estimate_with(2, 100);
        let mut clone = BlockBuilder::new();
        clone.add(b"k1", 1, &[0u8; 100]);
        clone.add(b"k2", 1, &[0u8; 100]);
        // Prefix compression only ever shrinks the real entry.
        assert!(clone.finish().len() <= estimate);
    }
}
