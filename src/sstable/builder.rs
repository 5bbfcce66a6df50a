//! SSTable builder implementation.
//!
//! Builds the full table image in memory (data blocks, index, trailer) and
//! writes it to a new file in one go.

use crate::comparator::ComparatorRef;
use crate::error::{Error, Result};
use crate::filter::{bloom_hash, BloomFilter};
use crate::sstable::block::BlockBuilder;
use crate::sstable::index::{BlockHandle, TableIndex};
use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Settings a builder takes from the engine options.
#[derive(Debug, Clone)]
pub struct TableBuilderOptions {
    /// Target data block size.
    pub block_size: usize,
    /// Bloom filter false positive rate; 0 disables the filter.
    pub bloom_false_positive: f64,
    /// User-key comparator.
    pub comparator: ComparatorRef,
}

/// Summary of a table written by [`TableBuilder::finish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSummary {
    /// File size in bytes.
    pub size: u64,
    /// Smallest key.
    pub smallest: Vec<u8>,
    /// Largest key.
    pub largest: Vec<u8>,
    /// Number of entries.
    pub key_count: u32,
    /// Highest sequence number.
    pub max_version: u64,
}

/// TableBuilder accumulates sorted entries into a table image.
///
/// Usage:
/// ```no_run
/// use sepkv::comparator::bytewise;
/// use sepkv::sstable::{TableBuilder, TableBuilderOptions};
///
/// let opts = TableBuilderOptions { block_size: 4096, bloom_false_positive: 0.01, comparator: bytewise() };
/// let mut builder = TableBuilder::new(opts);
/// builder.add(b"key1", 1, b"value1").unwrap();
/// builder.add(b"key2", 2, b"value2").unwrap();
/// builder.finish("00001.sst").unwrap();
/// ```
pub struct TableBuilder {
    opts: TableBuilderOptions,
    buf: Vec<u8>,
    block: BlockBuilder,
    blocks: Vec<BlockHandle>,
    key_hashes: Vec<u32>,
    last_key: Vec<u8>,
    smallest: Vec<u8>,
    max_version: u64,
    key_count: u32,
}

impl TableBuilder {
    /// Create a new TableBuilder
    pub fn new(opts: TableBuilderOptions) -> Self {
        Self {
            opts,
            buf: Vec::new(),
            block: BlockBuilder::new(),
            blocks: Vec::new(),
            key_hashes: Vec::new(),
            last_key: Vec::new(),
            smallest: Vec::new(),
            max_version: 0,
            key_count: 0,
        }
    }

    /// Add an entry. User keys must be strictly increasing.
    pub fn add(&mut self, key: &[u8], seq: u64, value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        if key.len() > u16::MAX as usize {
            return Err(Error::invalid_argument("Key longer than 64 KiB"));
        }
        if self.key_count > 0 && self.opts.comparator.compare(key, &self.last_key) != Ordering::Greater {
            return Err(Error::invalid_argument("Keys must be added in sorted order"));
        }

        if self.block.would_exceed(key.len(), value.len(), self.opts.block_size) {
            self.finish_block();
        }
        if self.key_count == 0 {
            self.smallest = key.to_vec();
        }
        self.block.add(key, seq, value);
        if self.opts.bloom_false_positive > 0.0 {
            self.key_hashes.push(bloom_hash(key));
        }
        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.max_version = self.max_version.max(seq);
        self.key_count += 1;
        Ok(())
    }

    fn finish_block(&mut self) {
        if self.block.is_empty() {
            return;
        }
        let block = std::mem::take(&mut self.block);
        let base_key = block.base_key().to_vec();
        let data = block.finish();
        let offset = self.buf.len();
        assert!(offset + data.len() <= u32::MAX as usize, "Integer overflow");
        self.buf.extend_from_slice(&data);
        self.blocks.push(BlockHandle { base_key, offset: offset as u32, len: data.len() as u32 });
    }

    /// Bytes the table would take if finished now (index excluded).
    pub fn estimated_size(&self) -> usize {
        let pending = if self.block.is_empty() { 0 } else { self.block.estimate_with(0, 0) };
        self.buf.len() + pending
    }

    /// Number of entries added.
    pub fn key_count(&self) -> u32 {
        self.key_count
    }

    /// True before the first `add`.
    pub fn is_empty(&self) -> bool {
        self.key_count == 0
    }

    /// Writes the table to `path` and fsyncs it.
    ///
    /// The file is removed again if any write fails, so a partial table never
    /// stays on disk.
    pub fn finish<P: AsRef<Path>>(mut self, path: P) -> Result<TableSummary> {
        if self.key_count == 0 {
            return Err(Error::invalid_argument("Cannot build an empty table"));
        }
        self.finish_block();

        let filter = (self.opts.bloom_false_positive > 0.0)
            .then(|| BloomFilter::from_hashes(&self.key_hashes, self.opts.bloom_false_positive));
        let index = TableIndex {
            blocks: std::mem::take(&mut self.blocks),
            filter,
            max_version: self.max_version,
            key_count: self.key_count,
        };
        self.buf.extend_from_slice(&index.encode());

        let path = path.as_ref();
        if let Err(e) = write_file(path, &self.buf) {
            let _ = fs::remove_file(path);
            return Err(e);
        }
        Ok(TableSummary {
            size: self.buf.len() as u64,
            smallest: self.smallest,
            largest: self.last_key,
            key_count: self.key_count,
            max_version: self.max_version,
        })
    }
}

fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::bytewise;
    use tempfile::TempDir;

    fn options() -> TableBuilderOptions {
        TableBuilderOptions { block_size: 256, bloom_false_positive: 0.01, comparator: bytewise() }
    }

    #[test]
    fn test_builder_summary() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("00001.sst");
        let mut builder = TableBuilder::new(options());
        for i in 0..100u64 {
            builder.add(format!("key{:03}", i).as_bytes(), i + 1, b"value").unwrap();
        }
        assert!(builder.estimated_size() > 0);

        let summary = builder.finish(&path).unwrap();
        assert_eq!(summary.smallest, b"key000");
        assert_eq!(summary.largest, b"key099");
        assert_eq!(summary.key_count, 100);
        assert_eq!(summary.max_version, 100);
        assert_eq!(summary.size, fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn test_builder_rejects_unsorted_and_empty_keys() {
        let mut builder = TableBuilder::new(options());
        builder.add(b"b", 1, b"v").unwrap();
        assert!(builder.add(b"a", 2, b"v").is_err());
        assert!(builder.add(b"b", 3, b"v").is_err());
        assert!(matches!(builder.add(b"", 4, b"v"), Err(Error::EmptyKey)));
        assert_eq!(builder.key_count(), 1);
    }

    #[test]
    fn test_builder_empty_table() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("00001.sst");
        assert!(TableBuilder::new(options()).finish(&path).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_builder_splits_blocks() {
        let mut builder = TableBuilder::new(options());
        for i in 0..50u64 {
            builder.add(format!("key{:03}", i).as_bytes(), i, &[0u8; 64]).unwrap();
        }
        builder.finish_block();
        assert!(builder.blocks.len() > 5);
        assert!(builder.blocks.windows(2).all(|w| w[0].base_key < w[1].base_key));
    }
}
