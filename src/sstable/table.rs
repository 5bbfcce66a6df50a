//! Read side of an SSTable.
//!
//! A [`Table`] keeps the parsed index in memory and reads data blocks on
//! demand through the shared block cache. Tables are shared as `Arc<Table>`;
//! versions, iterators and background jobs each hold a handle.
//!
//! Once a table has been removed from the current version it is marked
//! obsolete. The file is deleted, and any release hooks run, when the last
//! handle is dropped, so a live scan never loses its file.

use crate::cache::{BlockCache, CacheKey};
use crate::codec::{self, FileKind};
use crate::comparator::ComparatorRef;
use crate::error::{Error, Result};
use crate::iterator::KvIterator;
use crate::sstable::block::{Block, BlockIterator};
use crate::sstable::index::{TableIndex, TRAILER_SIZE};
use bytes::Bytes;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::fmt;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// An open, immutable table file.
pub struct Table {
    fid: u64,
    path: PathBuf,
    file: Mutex<File>,
    index: TableIndex,
    smallest: Vec<u8>,
    largest: Vec<u8>,
    size: u64,
    cmp: ComparatorRef,
    cache: Option<Arc<BlockCache>>,
    obsolete: AtomicBool,
    release_hooks: Mutex<Vec<ReleaseHook>>,
}

impl Table {
    /// Opens `fid.sst` in `dir` and parses its index.
    pub fn open(dir: &Path, fid: u64, cmp: ComparatorRef, cache: Option<Arc<BlockCache>>) -> Result<Self> {
        let path = codec::file_path(dir, fid, FileKind::Table);
        let mut file = File::open(&path)?;
        let size = file.metadata()?.len();
        if size < TRAILER_SIZE as u64 {
            return Err(Error::corruption(format!("Table {} too small: {} bytes", fid, size)));
        }

        let mut trailer = [0u8; TRAILER_SIZE];
        file.seek(SeekFrom::End(-(TRAILER_SIZE as i64)))?;
        file.read_exact(&mut trailer)?;
        let index_len = u64::from(codec::read_u32(&trailer, 0)?);
        let tail_len = (index_len + TRAILER_SIZE as u64).min(size);
        let mut tail = vec![0u8; tail_len as usize];
        file.seek(SeekFrom::Start(size - tail_len))?;
        file.read_exact(&mut tail)?;
        let (index, _) = TableIndex::decode_from_tail(&tail)?;

        let first = index
            .blocks
            .first()
            .ok_or_else(|| Error::corruption(format!("Table {} has no blocks", fid)))?;
        let smallest = first.base_key.clone();

        let mut table = Self {
            fid,
            path,
            file: Mutex::new(file),
            index,
            smallest,
            largest: Vec::new(),
            size,
            cmp,
            cache,
            obsolete: AtomicBool::new(false),
            release_hooks: Mutex::new(Vec::new()),
        };
        let last = table.block(table.index.blocks.len() - 1)?;
        if last.is_empty() {
            return Err(Error::corruption(format!("Table {} ends with an empty block", fid)));
        }
        table.largest = last.entry(last.len() - 1)?.0;
        Ok(table)
    }

    /// Loads data block `idx`, verifying its checksum on a cache miss.
    pub fn block(&self, idx: usize) -> Result<Block> {
        let handle = &self.index.blocks[idx];
        let key = CacheKey::new(self.fid, handle.offset);
        if let Some(block) = self.cache.as_ref().and_then(|c| c.get(&key)) {
            return Ok(block);
        }

        let mut data = vec![0u8; handle.len as usize];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(u64::from(handle.offset)))?;
            file.read_exact(&mut data)?;
        }
        let block = Block::decode(Bytes::from(data))?;
        if let Some(cache) = &self.cache {
            cache.insert(key, block.clone());
        }
        Ok(block)
    }

    /// Exact lookup. Returns the entry's sequence number and stored value,
    /// or `KeyNotFound`.
    pub fn search(&self, key: &[u8]) -> Result<(u64, Vec<u8>)> {
        if !self.index.may_contain(key) {
            return Err(Error::KeyNotFound);
        }
        let idx = self.index.find_block(key, self.cmp.as_ref()).ok_or(Error::KeyNotFound)?;
        let block = self.block(idx)?;
        let pos = block.search(key, self.cmp.as_ref())?;
        if pos < block.len() {
            let (found, seq, value) = block.entry(pos)?;
            if self.cmp.compare(&found, key) == Ordering::Equal {
                return Ok((seq, value));
            }
        }
        Err(Error::KeyNotFound)
    }

    /// True when `[smallest, largest]` intersects this table's key range.
    pub fn overlaps(&self, smallest: &[u8], largest: &[u8]) -> bool {
        self.cmp.compare(&self.largest, smallest) != Ordering::Less
            && self.cmp.compare(&self.smallest, largest) != Ordering::Greater
    }

    /// Cursor over every entry. Holds a handle on the table.
    pub fn iter(self: &Arc<Self>) -> TableIterator {
        TableIterator { table: Arc::clone(self), block_idx: 0, block_iter: None }
    }

    /// Schedules the file for deletion once the last handle is dropped.
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, AtomicOrdering::Release);
    }

    /// True once the table left the current version.
    pub fn is_obsolete(&self) -> bool {
        self.obsolete.load(AtomicOrdering::Acquire)
    }

    /// Registers a callback run after an obsolete table's file is deleted.
    pub fn on_release(&self, hook: impl FnOnce() + Send + 'static) {
        self.release_hooks.lock().push(Box::new(hook));
    }

    /// File id.
    pub fn fid(&self) -> u64 {
        self.fid
    }

    /// Smallest key.
    pub fn smallest(&self) -> &[u8] {
        &self.smallest
    }

    /// Largest key.
    pub fn largest(&self) -> &[u8] {
        &self.largest
    }

    /// File size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Highest sequence number stored.
    pub fn max_version(&self) -> u64 {
        self.index.max_version
    }

    /// Number of entries.
    pub fn key_count(&self) -> u32 {
        self.index.key_count
    }

    /// Number of data blocks.
    pub fn num_blocks(&self) -> usize {
        self.index.blocks.len()
    }

    /// Path of the table file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("fid", &self.fid)
            .field("size", &self.size)
            .field("key_count", &self.index.key_count)
            .field("obsolete", &self.is_obsolete())
            .finish()
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        if !self.is_obsolete() {
            return;
        }
        if let Some(cache) = &self.cache {
            cache.evict_file(self.fid);
        }
        match fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Deleted obsolete table {:?}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to delete obsolete table {:?}: {}", self.path, e),
        }
        for hook in self.release_hooks.get_mut().drain(..) {
            hook();
        }
    }
}

/// Iterator over a table: block cursor plus block-to-block advance.
pub struct TableIterator {
    table: Arc<Table>,
    block_idx: usize,
    block_iter: Option<BlockIterator>,
}

impl TableIterator {
    fn load_block(&mut self, idx: usize) -> Result<()> {
        self.block_idx = idx;
        self.block_iter = if idx < self.table.num_blocks() { Some(self.table.block(idx)?.iter()) } else { None };
        Ok(())
    }

    /// Moves past exhausted blocks until positioned or out of blocks.
    fn skip_exhausted(&mut self) -> Result<()> {
        while let Some(iter) = &self.block_iter {
            if iter.valid() {
                break;
            }
            self.load_block(self.block_idx + 1)?;
            if let Some(iter) = &mut self.block_iter {
                iter.seek_to_first()?;
            }
        }
        Ok(())
    }

    /// The table this iterator reads.
    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }
}

impl KvIterator for TableIterator {
    fn rewind(&mut self) -> Result<()> {
        self.load_block(0)?;
        if let Some(iter) = &mut self.block_iter {
            iter.seek_to_first()?;
        }
        self.skip_exhausted()
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        let idx = self.table.index.find_block(key, self.table.cmp.as_ref()).unwrap_or(0);
        self.load_block(idx)?;
        if let Some(iter) = &mut self.block_iter {
            iter.seek(key, self.table.cmp.as_ref())?;
        }
        self.skip_exhausted()
    }

    fn next(&mut self) -> Result<()> {
        if let Some(iter) = &mut self.block_iter {
            iter.advance()?;
        }
        self.skip_exhausted()
    }

    fn valid(&self) -> bool {
        self.block_iter.as_ref().is_some_and(|iter| iter.valid())
    }

    fn key(&self) -> &[u8] {
        self.block_iter.as_ref().map_or(&[], |iter| iter.key())
    }

    fn seq(&self) -> u64 {
        self.block_iter.as_ref().map_or(0, |iter| iter.seq())
    }

    fn value(&self) -> &[u8] {
        self.block_iter.as_ref().map_or(&[], |iter| iter.value())
    }
}
