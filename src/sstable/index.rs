//! Index block implementation for SSTable.
//!
//! The index sits after the data blocks and is read back-to-front from the
//! fixed trailer at the end of the file:
//!
//! ```text
//! [block_count: u32]
//! ([key_len: u32][base_key][offset: u32][len: u32]) * block_count
//! [filter_len: u32][filter bytes]
//! [max_version: u64]
//! [key_count: u32]
//! --- trailer ---
//! [index_len: u32]
//! [checksum: u32]          // CRC32-C of the index bytes
//! [checksum_len: u32]      // always 4
//! ```

use crate::codec;
use crate::comparator::Comparator;
use crate::error::{Error, Result};
use crate::filter::{BloomFilter, Filter};
use bytes::{BufMut, BytesMut};
use std::cmp::Ordering;

/// Size of the fixed trailer after the index.
pub const TRAILER_SIZE: usize = 12;

/// Location of one data block and its first key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHandle {
    /// First key stored in the block.
    pub base_key: Vec<u8>,
    /// Offset of the block in the file.
    pub offset: u32,
    /// Length of the block including its trailer.
    pub len: u32,
}

/// Parsed table index.
#[derive(Debug, Clone, Default)]
pub struct TableIndex {
    /// Data blocks in key order.
    pub blocks: Vec<BlockHandle>,
    /// Bloom filter over every key, when filters are enabled.
    pub filter: Option<BloomFilter>,
    /// Highest sequence number in the table.
    pub max_version: u64,
    /// Number of entries in the table.
    pub key_count: u32,
}

impl TableIndex {
    /// Serializes the index followed by its trailer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u32_le(self.blocks.len() as u32);
        for handle in &self.blocks {
            buf.put_u32_le(handle.base_key.len() as u32);
            buf.put_slice(&handle.base_key);
            buf.put_u32_le(handle.offset);
            buf.put_u32_le(handle.len);
        }
        let filter = self.filter.as_ref().map(|f| f.encode()).unwrap_or_default();
        buf.put_u32_le(filter.len() as u32);
        buf.put_slice(&filter);
        buf.put_u64_le(self.max_version);
        buf.put_u32_le(self.key_count);

        let index_len = buf.len() as u32;
        let checksum = codec::checksum(&buf);
        buf.put_u32_le(index_len);
        buf.put_u32_le(checksum);
        buf.put_u32_le(4);
        buf.to_vec()
    }

    /// Parses the index from the tail of a table image.
    ///
    /// `tail` must end at the end of the file; it may start anywhere before
    /// the index. Returns the index and its total length including trailer.
    pub fn decode_from_tail(tail: &[u8]) -> Result<(Self, usize)> {
        let len = tail.len();
        if len < TRAILER_SIZE {
            return Err(Error::corruption("Table too small for index trailer"));
        }
        let checksum_len = codec::read_u32(tail, len - 4)?;
        if checksum_len != 4 {
            return Err(Error::corruption(format!("Unexpected index checksum length {}", checksum_len)));
        }
        let checksum = codec::read_u32(tail, len - 8)?;
        let index_len = codec::read_u32(tail, len - 12)? as usize;
        let start = (len - TRAILER_SIZE)
            .checked_sub(index_len)
            .ok_or_else(|| Error::corruption("Index length exceeds table size"))?;
        let data = &tail[start..len - TRAILER_SIZE];
        codec::verify_checksum(data, checksum)?;
        Ok((Self::decode(data)?, index_len + TRAILER_SIZE))
    }

    fn decode(data: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let block_count = codec::read_u32(data, pos)? as usize;
        pos += 4;

        let mut blocks = Vec::with_capacity(block_count.min(data.len() / 12));
        for _ in 0..block_count {
            let key_len = codec::read_u32(data, pos)? as usize;
            pos += 4;
            let base_key = data
                .get(pos..pos + key_len)
                .ok_or_else(|| Error::corruption("Index key runs past index"))?
                .to_vec();
            pos += key_len;
            let offset = codec::read_u32(data, pos)?;
            let len = codec::read_u32(data, pos + 4)?;
            pos += 8;
            blocks.push(BlockHandle { base_key, offset, len });
        }

        let filter_len = codec::read_u32(data, pos)? as usize;
        pos += 4;
        let filter_bytes = data
            .get(pos..pos + filter_len)
            .ok_or_else(|| Error::corruption("Filter runs past index"))?;
        let filter = if filter_len == 0 { None } else { Some(BloomFilter::decode(filter_bytes)?) };
        pos += filter_len;

        let max_version = codec::read_u64(data, pos)?;
        let key_count = codec::read_u32(data, pos + 8)?;
        if pos + 12 != data.len() {
            return Err(Error::corruption("Trailing bytes after index"));
        }
        Ok(Self { blocks, filter, max_version, key_count })
    }

    /// Index of the block that may hold `key`: the last block whose base key
    /// is <= `key`. `None` when `key` sorts before the first block.
    pub fn find_block(&self, key: &[u8], cmp: &dyn Comparator) -> Option<usize> {
        let after = self
            .blocks
            .partition_point(|h| cmp.compare(&h.base_key, key) != Ordering::Greater);
        after.checked_sub(1)
    }

    /// Filter check; tables without a filter always say maybe.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        self.filter.as_ref().map_or(true, |f| f.may_contain(key))
    }
}
