//! # sepkv - An LSM-Tree Storage Engine with Value Separation
//!
//! sepkv is an embedded, ordered key-value store. Writes go to a write-ahead
//! log and an arena-backed skip list; full memtables are flushed into sorted
//! tables that background compaction merges level by level. Large values are
//! moved out of the tables into value logs on flush, so compaction only
//! rewrites keys and small pointers, and a separate GC pass reclaims the
//! value logs.
//!
//! ## Architecture
//!
//! - **WAL**: one log per memtable, replayed on open
//! - **MemTable**: arena-backed skip list keyed by `(user key, sequence)`
//! - **SSTable**: immutable sorted files with a bloom filter and a block index
//! - **Value Log**: append-only files holding separated values
//! - **Version Set**: the per-level table lists, persisted through the manifest
//! - **Compaction / GC**: background workers merging tables and rewriting value logs
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use sepkv::{Options, DB};
//!
//! # fn main() -> Result<(), sepkv::Error> {
//! let db = DB::open("./data", Options::default())?;
//!
//! db.set(b"key1", b"value1")?;
//! db.set(b"key2", b"value2")?;
//!
//! if let Some(value) = db.get(b"key1")? {
//!     println!("Found: {:?}", value);
//! }
//!
//! db.delete(b"key1")?;
//! db.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod arena;
mod background;
pub mod cache;
pub mod codec;
pub mod compaction;
pub mod comparator;
pub mod config;
pub mod entry;
pub mod error;
pub mod filter;
pub mod iterator;
pub mod memtable;
pub mod sstable;
pub mod version;
pub mod vlog;
pub mod wal;

pub use comparator::{BytewiseComparator, Comparator, ComparatorRef, NumericComparator};
pub use config::Options;
pub use entry::Entry;
pub use error::{Error, Result};
pub use version::FileMetaData;

use background::Workers;
use cache::BlockCache;
use codec::FileKind;
use compaction::MergeIterator;
use crossbeam::channel::{self, Sender};
use entry::{unix_now, ValuePointer, ValueStruct, VAL};
use iterator::KvIterator;
use memtable::MemTable;
use parking_lot::{Condvar, Mutex, MutexGuard};
use sstable::{Table, TableBuilder};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use version::{meta_of, VersionEdit, VersionSet};
use vlog::{VlogFile, VlogGroup};

/// Longest key the table format can hold.
const MAX_KEY_SIZE: usize = u16::MAX as usize;

/// How long a blocked writer waits before re-signalling the flusher.
const FLUSH_WAIT: Duration = Duration::from_millis(100);

/// The active memtable and the ones waiting to be flushed, oldest first.
struct MemState {
    active: Arc<MemTable>,
    immutables: VecDeque<Arc<MemTable>>,
}

/// State shared between the handle and the background workers.
pub(crate) struct DbInner {
    dir: PathBuf,
    opts: Options,
    versions: VersionSet,
    mem: Mutex<MemState>,
    /// Signalled whenever an immutable memtable has been flushed.
    flushed: Condvar,
    seq: AtomicU64,
    flush_lock: Mutex<()>,
    compaction_lock: Mutex<()>,
    gc_lock: Mutex<()>,
    closed: AtomicBool,
    flush_tx: Option<Sender<()>>,
}

/// The main database handle.
///
/// # Thread Safety
///
/// `DB` is `Send + Sync`; share it across threads with `Arc<DB>`. Writers
/// serialize on the memtable lock only while a sequence number is assigned
/// and the write is logged. Reads take no long-held lock.
pub struct DB {
    inner: Arc<DbInner>,
    workers: Mutex<Option<Workers>>,
}

impl DB {
    /// Opens a database at `path`.
    ///
    /// The manifest is replayed, leftover files of interrupted jobs are
    /// removed, and every WAL still on disk is replayed into an immutable
    /// memtable and flushed.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The options are invalid
    /// - The directory is missing and `create_if_missing` is off
    /// - A manifest exists and `error_if_exists` is on
    /// - Recovery hits an I/O error or a corrupted table
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use sepkv::{Options, DB};
    ///
    /// # fn main() -> Result<(), sepkv::Error> {
    /// let db = DB::open("./my_database", Options::default().memtable_size(16 * 1024))?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        options.validate()?;
        let dir = path.as_ref().to_path_buf();
        log::info!("Opening database at {:?}", dir);

        if !dir.exists() {
            if !options.create_if_missing {
                return Err(Error::invalid_argument(format!("Database {:?} does not exist", dir)));
            }
            fs::create_dir_all(&dir)?;
        }
        if options.error_if_exists && dir.join(version::manifest::MANIFEST_FILE).exists() {
            return Err(Error::invalid_argument(format!("Database {:?} already exists", dir)));
        }

        let cache = (options.block_cache_size > 0).then(|| Arc::new(BlockCache::new(options.block_cache_size)));
        let versions = VersionSet::open(&dir, &options, cache)?;
        let orphans = versions.remove_orphans()?;
        if orphans > 0 {
            log::warn!("Removed {} files left by interrupted jobs", orphans);
        }

        let mut wal_ids = Vec::new();
        for dir_entry in fs::read_dir(&dir)? {
            let name = dir_entry?.file_name();
            if let Some((fid, FileKind::Wal)) = name.to_str().and_then(codec::parse_file_name) {
                wal_ids.push(fid);
            }
        }
        wal_ids.sort_unstable();

        let mem_opts = options.memtable_options();
        let mut immutables = VecDeque::with_capacity(wal_ids.len());
        let mut max_seq = versions.current().max_version();
        let flushed_upto = versions.log_number();
        for fid in wal_ids {
            versions.mark_file_number_used(fid);
            if fid <= flushed_upto || versions.current().find_table(fid).is_some() {
                log::warn!("WAL {} was already flushed; removing it", fid);
                fs::remove_file(codec::file_path(&dir, fid, FileKind::Wal))?;
                continue;
            }
            let (mem, seq) = MemTable::recover(&dir, fid, &mem_opts)?;
            log::info!("Replayed WAL {}: {} entries", fid, mem.len());
            max_seq = max_seq.max(seq);
            immutables.push_back(Arc::new(mem));
        }
        let active = Arc::new(MemTable::create(&dir, versions.new_file_number(), &mem_opts)?);

        let (flush_tx, flush_rx) = if options.background_threads {
            let (tx, rx) = channel::bounded(1);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let inner = Arc::new(DbInner {
            dir,
            opts: options,
            versions,
            mem: Mutex::new(MemState { active, immutables }),
            flushed: Condvar::new(),
            seq: AtomicU64::new(max_seq),
            flush_lock: Mutex::new(()),
            compaction_lock: Mutex::new(()),
            gc_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
            flush_tx,
        });
        inner.flush_immutables()?;

        let workers = match flush_rx {
            Some(rx) => Some(Workers::start(&inner, rx)?),
            None => None,
        };
        log::info!("Database opened, last sequence {}", max_seq);
        Ok(Self { inner, workers: Mutex::new(workers) })
    }

    /// Stores `value` under `key` and returns the sequence number assigned.
    ///
    /// # Errors
    ///
    /// Returns `EmptyKey` for an empty key, `InvalidArgument` for a key over
    /// 64 KiB, and `Closed` after [`DB::close`].
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use sepkv::{Options, DB};
    /// # fn main() -> Result<(), sepkv::Error> {
    /// # let db = DB::open("./data", Options::default())?;
    /// db.set(b"name", b"Alice")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<u64> {
        self.inner.write(Entry::new(key, value), false)
    }

    /// Stores `value` under `key` until `ttl` has passed.
    ///
    /// Expiry has whole-second resolution and rounds up.
    pub fn set_with_ttl(&self, key: &[u8], value: &[u8], ttl: Duration) -> Result<u64> {
        let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
        let entry = Entry::new(key, value).with_expires_at(unix_now().saturating_add(secs));
        self.inner.write(entry, false)
    }

    /// Deletes `key` by writing a tombstone.
    pub fn delete(&self, key: &[u8]) -> Result<u64> {
        self.inner.write(Entry::new(key, Vec::new()), true)
    }

    /// Latest visible value of `key`.
    ///
    /// Returns `Ok(None)` when the key was never written, was deleted, or
    /// has expired.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use sepkv::{Options, DB};
    /// # fn main() -> Result<(), sepkv::Error> {
    /// # let db = DB::open("./data", Options::default())?;
    /// match db.get(b"name")? {
    ///     Some(value) => println!("Found: {:?}", value),
    ///     None => println!("Not found"),
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.get(key, u64::MAX)?.map(|e| e.value))
    }

    /// Latest visible version of `key` with its sequence and expiry.
    pub fn get_entry(&self, key: &[u8]) -> Result<Option<Entry>> {
        self.inner.get(key, u64::MAX)
    }

    /// Value of `key` as of sequence `snapshot`.
    ///
    /// Versions newer than `snapshot` are ignored. Snapshots are best effort:
    /// an older version is only found while compaction has not yet merged
    /// it away.
    pub fn get_at(&self, key: &[u8], snapshot: u64) -> Result<Option<Entry>> {
        self.inner.get(key, snapshot)
    }

    /// Sequence number of the most recent write.
    pub fn latest_sequence(&self) -> u64 {
        self.inner.seq.load(Ordering::SeqCst)
    }

    /// Rotates the active memtable (if it holds anything) and flushes every
    /// immutable memtable to a table before returning.
    pub fn flush(&self) -> Result<()> {
        self.inner.check_open()?;
        self.inner.flush_all()
    }

    /// Runs one compaction synchronously. Returns false when nothing needed it.
    pub fn compact_once(&self) -> Result<bool> {
        self.inner.check_open()?;
        self.inner.compact_once()
    }

    /// Runs one value log GC pass synchronously. Returns false when no group
    /// qualified.
    pub fn run_gc_once(&self) -> Result<bool> {
        self.inner.check_open()?;
        self.inner.run_gc_once()
    }

    /// Tables currently at `level`, in level order.
    pub fn level_files(&self, level: usize) -> Vec<FileMetaData> {
        let version = self.inner.versions.current();
        if level >= version.num_levels() {
            return Vec::new();
        }
        version.files(level).iter().map(|t| meta_of(t)).collect()
    }

    /// Number of tables at `level`.
    pub fn num_files_at_level(&self, level: usize) -> usize {
        let version = self.inner.versions.current();
        if level >= version.num_levels() {
            return 0;
        }
        version.num_files(level)
    }

    /// Ids of every live value log.
    pub fn value_log_files(&self) -> Vec<u64> {
        self.inner.versions.groups().all_vlogs().into_iter().collect()
    }

    /// Database directory.
    pub fn path(&self) -> &Path {
        &self.inner.dir
    }

    /// Stops the background workers and flushes everything to tables.
    ///
    /// Later calls are no-ops; any other operation returns `Closed`.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails. The WAL is kept in that
    /// case and replayed on the next open.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(workers) = self.workers.lock().take() {
            workers.stop();
        }
        self.inner.flush_all()?;
        log::info!("Database closed");
        Ok(())
    }
}

impl Drop for DB {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("Error closing database during drop: {}", e);
        }
    }
}

impl DbInner {
    pub(crate) fn options(&self) -> &Options {
        &self.opts
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn write(&self, mut entry: Entry, tombstone: bool) -> Result<u64> {
        self.check_open()?;
        if entry.key.is_empty() {
            return Err(Error::EmptyKey);
        }
        if entry.key.len() > MAX_KEY_SIZE {
            return Err(Error::invalid_argument(format!("Key of {} bytes exceeds 64 KiB", entry.key.len())));
        }

        let mut state = self.mem.lock();
        self.make_room(&mut state)?;
        entry.seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        if tombstone {
            state.active.delete(&entry.key, entry.seq)?;
        } else {
            state.active.set(&entry)?;
        }
        Ok(entry.seq)
    }

    /// Rotates a full memtable. A writer blocks only when the memtable is full
    /// and an earlier one is still waiting to be flushed.
    fn make_room(&self, state: &mut MutexGuard<'_, MemState>) -> Result<()> {
        loop {
            if state.active.size() < self.opts.memtable_size {
                return Ok(());
            }
            if state.immutables.is_empty() {
                self.rotate(state)?;
                if self.flush_tx.is_none() {
                    MutexGuard::unlocked(state, || self.flush_immutables())?;
                }
                return Ok(());
            }
            if self.flush_tx.is_some() {
                self.signal_flush();
                self.flushed.wait_for(state, FLUSH_WAIT);
            } else {
                MutexGuard::unlocked(state, || self.flush_immutables())?;
            }
        }
    }

    fn rotate(&self, state: &mut MemState) -> Result<()> {
        let id = self.versions.new_file_number();
        let fresh = Arc::new(MemTable::create(&self.dir, id, &self.opts.memtable_options())?);
        let old = std::mem::replace(&mut state.active, fresh);
        log::info!("Rotated memtable {} ({} bytes), new memtable {}", old.id(), old.size(), id);
        state.immutables.push_back(old);
        self.signal_flush();
        Ok(())
    }

    fn signal_flush(&self) {
        if let Some(tx) = &self.flush_tx {
            // A full channel already holds a pending signal.
            let _ = tx.try_send(());
        }
    }

    fn flush_all(&self) -> Result<()> {
        {
            let mut state = self.mem.lock();
            if !state.active.is_empty() {
                self.rotate(&mut state)?;
            }
        }
        self.flush_immutables()
    }

    /// Flushes immutable memtables oldest first until none is left.
    pub(crate) fn flush_immutables(&self) -> Result<()> {
        let _guard = self.flush_lock.lock();
        loop {
            let Some(mem) = self.mem.lock().immutables.front().cloned() else {
                return Ok(());
            };
            self.flush_memtable(&mem)?;
            {
                let mut state = self.mem.lock();
                if state.immutables.front().is_some_and(|m| Arc::ptr_eq(m, &mem)) {
                    state.immutables.pop_front();
                }
            }
            mem.retire();
            self.flushed.notify_all();
        }
    }

    /// Writes `mem` as table `mem.id()`, separating large values into value
    /// log `mem.id()`, and commits it at the level placement allows.
    fn flush_memtable(&self, mem: &Arc<MemTable>) -> Result<()> {
        if mem.is_empty() {
            log::debug!("Skipping flush of empty memtable {}", mem.id());
            return Ok(());
        }
        let fid = mem.id();
        let mut vlog = None;
        let table = match self.write_table(mem, &mut vlog) {
            Ok(table) => table,
            Err(e) => {
                self.discard_flush(fid, vlog.as_ref());
                return Err(e);
            }
        };

        let separated = vlog.is_some();
        let mut placed = 0;
        let commit = self.versions.log_and_apply_with(vec![Arc::clone(&table)], |ctx| {
            placed = if ctx.busy {
                0
            } else {
                ctx.version.pick_level_for_memtable_output(table.smallest(), table.largest())
            };
            let mut edit = VersionEdit::new();
            edit.add_file(placed, meta_of(&table));
            edit.set_log_number(fid);
            if separated {
                edit.set_group(fid, VlogGroup { vlogs: vec![fid], tables: vec![fid] });
            }
            Ok(edit)
        });
        if let Err(e) = commit {
            drop(table);
            self.discard_flush(fid, vlog.as_ref());
            return Err(e);
        }

        log::info!(
            "Flushed memtable {} to L{}: {} entries, {} bytes{}",
            fid,
            placed,
            table.key_count(),
            table.size(),
            if separated { ", values separated" } else { "" }
        );
        Ok(())
    }

    fn write_table(&self, mem: &Arc<MemTable>, vlog: &mut Option<Arc<VlogFile>>) -> Result<Arc<Table>> {
        let fid = mem.id();
        let mut builder = TableBuilder::new(self.opts.table_builder_options());
        // One child already collapses versions to the newest per key.
        let children: Vec<Box<dyn KvIterator>> = vec![Box::new(mem.iter())];
        let mut iter = MergeIterator::new(children, self.opts.comparator.clone());
        iter.rewind()?;
        while iter.valid() {
            let stored = ValueStruct::decode(iter.value())?;
            if stored.meta == VAL && stored.payload.len() > self.opts.value_threshold {
                let file = match vlog {
                    Some(file) => Arc::clone(file),
                    None => {
                        let file = self.versions.value_log().create(fid)?;
                        *vlog = Some(Arc::clone(&file));
                        file
                    }
                };
                let offset = file.write(iter.key(), &stored.payload)?;
                let ptr = ValueStruct::pointer(ValuePointer { fid, offset }, stored.expires_at);
                builder.add(iter.key(), iter.seq(), &ptr.encode())?;
            } else {
                builder.add(iter.key(), iter.seq(), iter.value())?;
            }
            iter.next()?;
        }
        if let Some(file) = vlog {
            file.sync()?;
        }
        builder.finish(codec::file_path(&self.dir, fid, FileKind::Table))?;
        self.versions.open_table(fid)
    }

    fn discard_flush(&self, fid: u64, vlog: Option<&Arc<VlogFile>>) {
        if vlog.is_some() {
            if let Err(e) = self.versions.value_log().remove(fid) {
                log::warn!("Failed to remove value log {}: {}", fid, e);
            }
        }
        let path = codec::file_path(&self.dir, fid, FileKind::Table);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Failed to remove {:?}: {}", path, e);
            }
        }
    }

    fn get(&self, key: &[u8], snapshot: u64) -> Result<Option<Entry>> {
        self.check_open()?;
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }

        let mems: Vec<Arc<MemTable>> = {
            let state = self.mem.lock();
            std::iter::once(Arc::clone(&state.active))
                .chain(state.immutables.iter().rev().cloned())
                .collect()
        };
        for mem in &mems {
            match mem.get(key, snapshot) {
                Ok((seq, stored)) => return self.resolve(key, seq, stored),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        // The version keeps its tables, and so their value logs, alive
        // until the pointer is resolved.
        let version = self.versions.current();
        match version.get(key, snapshot) {
            Ok((seq, raw)) => self.resolve(key, seq, ValueStruct::decode(&raw)?),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn resolve(&self, key: &[u8], seq: u64, stored: ValueStruct) -> Result<Option<Entry>> {
        if stored.is_dead(unix_now()) {
            return Ok(None);
        }
        let value = match stored.value_pointer()? {
            Some(ptr) => self.versions.value_log().read(&ptr)?,
            None => stored.payload,
        };
        Ok(Some(Entry { key: key.to_vec(), value, seq, expires_at: stored.expires_at }))
    }

    pub(crate) fn compact_once(&self) -> Result<bool> {
        let _guard = self.compaction_lock.lock();
        compaction::run_compaction(&self.versions)
    }

    pub(crate) fn run_gc_once(&self) -> Result<bool> {
        let _guard = self.gc_lock.lock();
        version::run_gc(&self.versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options() -> Options {
        Options::default().background_threads(false)
    }

    #[test]
    fn test_db_open() {
        let temp_dir = TempDir::new().unwrap();
        let result = DB::open(temp_dir.path(), options());
        assert!(result.is_ok());
    }

    #[test]
    fn test_db_set_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let db = DB::open(temp_dir.path(), options()).unwrap();

        db.set(b"key1", b"value1").unwrap();
        assert_eq!(db.get(b"key1").unwrap(), Some(b"value1".to_vec()));
        assert_eq!(db.get(b"key2").unwrap(), None);
    }

    #[test]
    fn test_db_delete() {
        let temp_dir = TempDir::new().unwrap();
        let db = DB::open(temp_dir.path(), options()).unwrap();

        db.set(b"key1", b"value1").unwrap();
        db.delete(b"key1").unwrap();
        assert_eq!(db.get(b"key1").unwrap(), None);

        db.flush().unwrap();
        assert_eq!(db.get(b"key1").unwrap(), None, "tombstone survives the flush");
    }

    #[test]
    fn test_db_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let db = DB::open(temp_dir.path(), options()).unwrap();

        let first = db.set(b"key1", b"value1").unwrap();
        let second = db.set(b"key1", b"value2").unwrap();
        assert!(second > first);
        assert_eq!(db.get(b"key1").unwrap(), Some(b"value2".to_vec()));
        assert_eq!(db.latest_sequence(), second);
    }

    #[test]
    fn test_empty_and_oversized_keys() {
        let temp_dir = TempDir::new().unwrap();
        let db = DB::open(temp_dir.path(), options()).unwrap();

        assert!(matches!(db.set(b"", b"v"), Err(Error::EmptyKey)));
        assert!(matches!(db.get(b""), Err(Error::EmptyKey)));
        let long = vec![b'k'; MAX_KEY_SIZE + 1];
        assert!(matches!(db.set(&long, b"v"), Err(Error::InvalidArgument(_))));
        assert_eq!(db.latest_sequence(), 0, "rejected writes take no sequence");
    }

    #[test]
    fn test_db_recovery_from_wal() {
        let temp_dir = TempDir::new().unwrap();
        {
            let db = DB::open(temp_dir.path(), options()).unwrap();
            db.set(b"key1", b"value1").unwrap();
            db.set(b"key2", b"value2").unwrap();
            // Skip close so nothing is flushed.
            std::mem::forget(db);
        }

        let db = DB::open(temp_dir.path(), options()).unwrap();
        assert_eq!(db.get(b"key1").unwrap(), Some(b"value1".to_vec()));
        assert_eq!(db.get(b"key2").unwrap(), Some(b"value2".to_vec()));
        assert_eq!(db.latest_sequence(), 2);
        assert_eq!(db.num_files_at_level(0) + db.num_files_at_level(1) + db.num_files_at_level(2), 1);
    }

    #[test]
    fn test_db_error_if_exists() {
        let temp_dir = TempDir::new().unwrap();
        let db = DB::open(temp_dir.path(), options()).unwrap();
        db.close().unwrap();
        drop(db);

        let mut opts = options();
        opts.error_if_exists = true;
        assert!(matches!(DB::open(temp_dir.path(), opts), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_missing_dir_without_create() {
        let temp_dir = TempDir::new().unwrap();
        let opts = options().create_if_missing(false);
        assert!(DB::open(temp_dir.path().join("missing"), opts).is_err());
    }

    #[test]
    fn test_manual_flush() {
        let temp_dir = TempDir::new().unwrap();
        let db = DB::open(temp_dir.path(), options()).unwrap();

        for i in 0..100 {
            db.set(format!("key{:03}", i).as_bytes(), format!("value{}", i).as_bytes()).unwrap();
        }
        db.flush().unwrap();

        for i in 0..100 {
            let value = db.get(format!("key{:03}", i).as_bytes()).unwrap();
            assert_eq!(value, Some(format!("value{}", i).into_bytes()));
        }
        let files: usize = (0..7).map(|l| db.num_files_at_level(l)).sum();
        assert_eq!(files, 1);
        assert!(!codec::file_path(temp_dir.path(), 1, FileKind::Wal).exists(), "flushed WAL is removed");
    }

    #[test]
    fn test_flush_empty_memtable() {
        let temp_dir = TempDir::new().unwrap();
        let db = DB::open(temp_dir.path(), options()).unwrap();
        db.flush().unwrap();
        assert_eq!(db.num_files_at_level(0), 0);
    }

    #[test]
    fn test_flush_places_disjoint_tables_deeper() {
        let temp_dir = TempDir::new().unwrap();
        let db = DB::open(temp_dir.path(), options()).unwrap();

        db.set(b"a", b"1").unwrap();
        db.flush().unwrap();
        assert_eq!(db.num_files_at_level(version::MAX_MEM_COMPACT_LEVEL), 1);

        db.set(b"a", b"2").unwrap();
        db.flush().unwrap();
        assert_eq!(db.num_files_at_level(1), 1, "stops above the overlapping level");

        db.set(b"a", b"3").unwrap();
        db.flush().unwrap();
        assert_eq!(db.num_files_at_level(0), 1);
        assert_eq!(db.get(b"a").unwrap(), Some(b"3".to_vec()));
    }

    #[test]
    fn test_large_values_are_separated() {
        let temp_dir = TempDir::new().unwrap();
        let db = DB::open(temp_dir.path(), options().value_threshold(16)).unwrap();

        let big = vec![7u8; 100];
        db.set(b"big", &big).unwrap();
        db.set(b"small", b"tiny").unwrap();
        db.flush().unwrap();

        assert_eq!(db.value_log_files().len(), 1);
        assert_eq!(db.get(b"big").unwrap(), Some(big));
        assert_eq!(db.get(b"small").unwrap(), Some(b"tiny".to_vec()));
    }

    #[test]
    fn test_get_at_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let db = DB::open(temp_dir.path(), options()).unwrap();

        let s1 = db.set(b"k", b"v1").unwrap();
        let s2 = db.set(b"k", b"v2").unwrap();
        assert_eq!(db.get_at(b"k", s1).unwrap().unwrap().value, b"v1");
        assert_eq!(db.get_at(b"k", s2).unwrap().unwrap().value, b"v2");
        assert!(db.get_at(b"k", s1 - 1).unwrap().is_none());
    }

    #[test]
    fn test_closed_db_rejects_operations() {
        let temp_dir = TempDir::new().unwrap();
        let db = DB::open(temp_dir.path(), options()).unwrap();
        db.set(b"k", b"v").unwrap();
        db.close().unwrap();
        db.close().unwrap();

        assert!(matches!(db.set(b"k", b"v"), Err(Error::Closed)));
        assert!(matches!(db.get(b"k"), Err(Error::Closed)));
        assert!(matches!(db.flush(), Err(Error::Closed)));
    }

    #[test]
    fn test_close_flushes() {
        let temp_dir = TempDir::new().unwrap();
        {
            let db = DB::open(temp_dir.path(), options()).unwrap();
            db.set(b"k", b"v").unwrap();
        }

        let db = DB::open(temp_dir.path(), options()).unwrap();
        let files: usize = (0..7).map(|l| db.num_files_at_level(l)).sum();
        assert_eq!(files, 1, "dropping the handle flushed the memtable");
        assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_rotation_without_workers() {
        let temp_dir = TempDir::new().unwrap();
        let db = DB::open(temp_dir.path(), options().memtable_size(4 * 1024)).unwrap();
        for i in 0..500 {
            db.set(format!("key{:04}", i).as_bytes(), &[1u8; 32]).unwrap();
        }
        let files: usize = (0..7).map(|l| db.num_files_at_level(l)).sum();
        assert!(files > 1);
        for i in 0..500 {
            assert!(db.get(format!("key{:04}", i).as_bytes()).unwrap().is_some());
        }
    }
}
