//! # MemTable - In-Memory Sorted Table
//!
//! The MemTable buffers recent writes in an arena-backed skip list and logs
//! each one to its own WAL file first.
//!
//! ## Design
//!
//! - Skip list keys are internal keys (`user_key || seq`), so every version of
//!   a key is kept and a lookup at a snapshot seeks straight to the visible one
//! - Values are the encoded stored form (inline bytes, or a tombstone)
//! - Size is the arena footprint, which drives memtable rotation
//!
//! ## Lifetime
//!
//! A memtable is shared as `Arc<MemTable>`: the engine holds one handle while
//! it is active or waiting to be flushed, and every iterator holds another.
//! After a successful flush the engine calls [`MemTable::retire`]; when the
//! last handle goes away the WAL file is deleted.

mod internal_key;
pub mod skiplist;

pub use internal_key::{decode as decode_internal_key, encode as encode_internal_key, InternalKeyComparator};
pub use skiplist::SkipList;

use crate::codec::{self, FileKind};
use crate::comparator::ComparatorRef;
use crate::entry::{Entry, ValueStruct};
use crate::error::{Error, Result};
use crate::iterator::KvIterator;
use crate::wal::{Record, Wal};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Settings a memtable needs from the engine options.
#[derive(Debug, Clone)]
pub struct MemTableOptions {
    /// Initial arena capacity.
    pub arena_size: usize,
    /// User-key comparator.
    pub comparator: ComparatorRef,
    /// Fsync the WAL after every write.
    pub sync_writes: bool,
}

/// Write buffer paired with one WAL file.
pub struct MemTable {
    id: u64,
    list: Arc<SkipList>,
    wal: Mutex<Wal>,
    user_cmp: ComparatorRef,
    sync_writes: bool,
    retired: AtomicBool,
    wal_path: PathBuf,
}

impl MemTable {
    /// Creates an empty memtable and its WAL file `id.wal`.
    pub fn create(dir: &Path, id: u64, opts: &MemTableOptions) -> Result<Self> {
        let wal = Wal::create(dir, id)?;
        Ok(Self::with_wal(dir, id, wal, Self::new_list(opts), opts))
    }

    /// Rebuilds a memtable from an existing WAL.
    ///
    /// Returns the memtable and the highest sequence number replayed.
    pub fn recover(dir: &Path, id: u64, opts: &MemTableOptions) -> Result<(Self, u64)> {
        let list = Self::new_list(opts);
        let (wal, stats) = Wal::replay(dir, id, |record| {
            list.insert(&encode_internal_key(&record.key, record.seq), &record.value);
            Ok(())
        })?;
        Ok((Self::with_wal(dir, id, wal, list, opts), stats.max_seq))
    }

    fn new_list(opts: &MemTableOptions) -> Arc<SkipList> {
        let cmp: ComparatorRef = Arc::new(InternalKeyComparator::new(Arc::clone(&opts.comparator)));
        Arc::new(SkipList::new(opts.arena_size, cmp))
    }

    fn with_wal(dir: &Path, id: u64, wal: Wal, list: Arc<SkipList>, opts: &MemTableOptions) -> Self {
        Self {
            id,
            list,
            wal: Mutex::new(wal),
            user_cmp: Arc::clone(&opts.comparator),
            sync_writes: opts.sync_writes,
            retired: AtomicBool::new(false),
            wal_path: codec::file_path(dir, id, FileKind::Wal),
        }
    }

    /// Logs and inserts a put. `entry.seq` must already be assigned.
    pub fn set(&self, entry: &Entry) -> Result<()> {
        if entry.key.is_empty() {
            return Err(Error::EmptyKey);
        }
        self.apply(&entry.key, entry.seq, &ValueStruct::inline(&entry.value, entry.expires_at))
    }

    /// Logs and inserts a tombstone.
    pub fn delete(&self, key: &[u8], seq: u64) -> Result<()> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        self.apply(key, seq, &ValueStruct::tombstone())
    }

    fn apply(&self, key: &[u8], seq: u64, value: &ValueStruct) -> Result<()> {
        let encoded = value.encode();
        {
            let mut wal = self.wal.lock();
            wal.write(&Record::new(key.to_vec(), seq, encoded.clone()))?;
            if self.sync_writes {
                wal.sync()?;
            }
        }
        self.list.insert(&encode_internal_key(key, seq), &encoded);
        Ok(())
    }

    /// Newest version of `key` with sequence <= `snapshot`.
    ///
    /// Tombstones and expired values are returned as they are; callers decide
    /// what a dead value means. Returns `KeyNotFound` when no version is visible.
    pub fn get(&self, key: &[u8], snapshot: u64) -> Result<(u64, ValueStruct)> {
        let node = self.list.seek_ge(&encode_internal_key(key, snapshot));
        if node == 0 {
            return Err(Error::KeyNotFound);
        }
        let (ikey, value) = self.list.entry(node);
        let (user_key, seq) = decode_internal_key(&ikey)?;
        if self.user_cmp.compare(user_key, key) != Ordering::Equal {
            return Err(Error::KeyNotFound);
        }
        Ok((seq, ValueStruct::decode(&value)?))
    }

    /// Arena bytes used, the rotation metric.
    pub fn size(&self) -> usize {
        self.list.mem_size()
    }

    /// Number of versions stored.
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// True when nothing was written.
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// File id shared with the WAL (and later the flushed table).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Fsyncs the WAL.
    pub fn sync(&self) -> Result<()> {
        self.wal.lock().sync()
    }

    /// Marks the contents as durably flushed; the WAL is deleted when the
    /// last handle is dropped.
    pub fn retire(&self) {
        self.retired.store(true, AtomicOrdering::Release);
    }

    /// Cursor over every version, newest first within a key.
    pub fn iter(self: &Arc<Self>) -> MemTableIterator {
        MemTableIterator {
            table: Arc::clone(self),
            node: 0,
            key: Vec::new(),
            seq: 0,
            value: Vec::new(),
        }
    }
}

impl Drop for MemTable {
    fn drop(&mut self) {
        if !self.retired.load(AtomicOrdering::Acquire) {
            return;
        }
        match std::fs::remove_file(&self.wal_path) {
            Ok(()) => log::debug!("Removed retired WAL {:?}", self.wal_path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove retired WAL {:?}: {}", self.wal_path, e),
        }
    }
}

/// Cursor over a memtable. Holds a handle so the memtable outlives it.
pub struct MemTableIterator {
    table: Arc<MemTable>,
    node: u32,
    key: Vec<u8>,
    seq: u64,
    value: Vec<u8>,
}

impl MemTableIterator {
    fn load(&mut self) -> Result<()> {
        if self.node == 0 {
            return Ok(());
        }
        let (ikey, value) = self.table.list.entry(self.node);
        let (user_key, seq) = decode_internal_key(&ikey)?;
        self.key = user_key.to_vec();
        self.seq = seq;
        self.value = value;
        Ok(())
    }
}

impl KvIterator for MemTableIterator {
    fn rewind(&mut self) -> Result<()> {
        self.node = self.table.list.first();
        self.load()
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        self.node = self.table.list.seek_ge(&encode_internal_key(key, u64::MAX));
        self.load()
    }

    fn next(&mut self) -> Result<()> {
        if self.node != 0 {
            self.node = self.table.list.next(self.node);
        }
        self.load()
    }

    fn valid(&self) -> bool {
        self.node != 0
    }

    fn key(&self) -> &[u8] {
        &self.key
    }

    fn seq(&self) -> u64 {
        self.seq
    }

    fn value(&self) -> &[u8] {
        &self.value
    }
}
