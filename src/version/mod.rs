//! # Version Set
//!
//! A [`Version`] is an immutable snapshot of the per-level table lists. The
//! [`VersionSet`] owns the current version together with the manifest, the
//! value log groups and the file state maps, and is the only place any of
//! them change.
//!
//! ## Levels
//!
//! - Level 0 holds flushed memtables. Its tables may overlap and are kept
//!   newest first (highest max sequence, then highest file id).
//! - Levels 1+ hold key-range disjoint tables sorted by smallest key.
//!
//! ## Changes
//!
//! Every change is a [`VersionEdit`] that is appended to the manifest before
//! a new `Arc<Version>` is swapped in. Readers that cloned the old `Arc` keep
//! a consistent view, and the tables it references stay on disk until the
//! last such view is dropped.

pub mod edit;
mod gc;
pub mod manifest;
pub mod state;

pub use edit::{FileMetaData, GroupRecord, VersionEdit};
pub use gc::{run_gc, GcTask};
pub use manifest::Manifest;
pub use state::{FileState, FileStates};

use crate::cache::BlockCache;
use crate::codec::{self, FileKind};
use crate::comparator::ComparatorRef;
use crate::compaction::{self, Compaction};
use crate::config::Options;
use crate::error::{Error, Result};
use crate::sstable::Table;
use crate::vlog::{ValueLog, VlogGroups, VlogReaper};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Instant;

/// Highest level a flushed memtable may be placed at directly.
pub const MAX_MEM_COMPACT_LEVEL: usize = 2;

/// One immutable view of the tree.
#[derive(Debug, Clone)]
pub struct Version {
    levels: Vec<Vec<Arc<Table>>>,
    cmp: ComparatorRef,
}

impl Version {
    /// Empty version with `num_levels` levels.
    pub fn new(num_levels: usize, cmp: ComparatorRef) -> Self {
        Self { levels: vec![Vec::new(); num_levels], cmp }
    }

    fn from_levels(mut levels: Vec<Vec<Arc<Table>>>, cmp: ComparatorRef) -> Self {
        for (level, tables) in levels.iter_mut().enumerate() {
            if level == 0 {
                tables.sort_by(|a, b| b.max_version().cmp(&a.max_version()).then(b.fid().cmp(&a.fid())));
            } else {
                tables.sort_by(|a, b| cmp.compare(a.smallest(), b.smallest()));
            }
        }
        Self { levels, cmp }
    }

    /// Number of levels.
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Tables at `level`, in level order.
    pub fn files(&self, level: usize) -> &[Arc<Table>] {
        self.levels.get(level).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of tables at `level`.
    pub fn num_files(&self, level: usize) -> usize {
        self.files(level).len()
    }

    /// Total bytes at `level`.
    pub fn level_size(&self, level: usize) -> u64 {
        self.files(level).iter().map(|t| t.size()).sum()
    }

    /// Every table with its level.
    pub fn tables(&self) -> impl Iterator<Item = (usize, &Arc<Table>)> {
        self.levels.iter().enumerate().flat_map(|(level, tables)| tables.iter().map(move |t| (level, t)))
    }

    /// Finds a table by id.
    pub fn find_table(&self, fid: u64) -> Option<(usize, Arc<Table>)> {
        self.tables().find(|(_, t)| t.fid() == fid).map(|(level, t)| (level, Arc::clone(t)))
    }

    /// Highest sequence number stored in any table.
    pub fn max_version(&self) -> u64 {
        self.tables().map(|(_, t)| t.max_version()).max().unwrap_or(0)
    }

    /// The comparator ordering the levels.
    pub fn comparator(&self) -> &ComparatorRef {
        &self.cmp
    }

    /// Index of the first table at `level` (>= 1) whose largest key is >= `key`.
    pub fn find_file(&self, level: usize, key: &[u8]) -> usize {
        self.files(level).partition_point(|t| self.cmp.compare(t.largest(), key) == Ordering::Less)
    }

    /// True when some table at `level` intersects the closed range
    /// `[smallest, largest]`. An empty level never overlaps.
    pub fn overlap_in_level(&self, level: usize, smallest: &[u8], largest: &[u8]) -> bool {
        let files = self.files(level);
        if level == 0 {
            return files.iter().any(|t| t.overlaps(smallest, largest));
        }
        let idx = self.find_file(level, smallest);
        match files.get(idx) {
            Some(t) => self.cmp.compare(largest, t.smallest()) != Ordering::Less,
            None => false,
        }
    }

    /// Tables at `level` intersecting `[smallest, largest]`, in level order.
    pub fn overlapping_files(&self, level: usize, smallest: &[u8], largest: &[u8]) -> Vec<Arc<Table>> {
        let files = self.files(level);
        if level == 0 {
            return files.iter().filter(|t| t.overlaps(smallest, largest)).cloned().collect();
        }
        files[self.find_file(level, smallest)..]
            .iter()
            .take_while(|t| self.cmp.compare(t.smallest(), largest) != Ordering::Greater)
            .cloned()
            .collect()
    }

    /// Level for a freshly flushed table covering `[smallest, largest]`.
    ///
    /// Stays at level 0 if level 0 overlaps. Otherwise it is pushed down while
    /// the next level is free of overlap, up to [`MAX_MEM_COMPACT_LEVEL`], and
    /// never into the last two levels.
    pub fn pick_level_for_memtable_output(&self, smallest: &[u8], largest: &[u8]) -> usize {
        let mut level = 0;
        if self.overlap_in_level(0, smallest, largest) {
            return level;
        }
        while level < MAX_MEM_COMPACT_LEVEL {
            if self.overlap_in_level(level + 1, smallest, largest) {
                break;
            }
            if level + 2 >= self.num_levels() {
                break;
            }
            level += 1;
        }
        level
    }

    /// Newest stored version of `key` with sequence <= `snapshot`.
    ///
    /// Returns the sequence and the encoded stored value, or `KeyNotFound`.
    pub fn get(&self, key: &[u8], snapshot: u64) -> Result<(u64, Vec<u8>)> {
        for table in self.files(0) {
            if !table.overlaps(key, key) {
                continue;
            }
            if let Some(found) = visible(table.search(key), snapshot)? {
                return Ok(found);
            }
        }
        for level in 1..self.num_levels() {
            let files = self.files(level);
            let Some(table) = files.get(self.find_file(level, key)) else {
                continue;
            };
            if self.cmp.compare(table.smallest(), key) == Ordering::Greater {
                continue;
            }
            if let Some(found) = visible(table.search(key), snapshot)? {
                return Ok(found);
            }
        }
        Err(Error::KeyNotFound)
    }
}

fn visible(found: Result<(u64, Vec<u8>)>, snapshot: u64) -> Result<Option<(u64, Vec<u8>)>> {
    match found {
        Ok((seq, value)) if seq <= snapshot => Ok(Some((seq, value))),
        Ok(_) => Ok(None),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

pub(crate) fn meta_of(table: &Table) -> FileMetaData {
    FileMetaData {
        fid: table.fid(),
        size: table.size(),
        smallest: table.smallest().to_vec(),
        largest: table.largest().to_vec(),
        max_version: table.max_version(),
    }
}

/// What an edit builder sees while the version set lock is held.
pub struct EditContext<'a> {
    /// The current version.
    pub version: &'a Version,
    /// The current value log groups.
    pub groups: &'a VlogGroups,
    /// True while some table is owned by a compaction or GC.
    pub busy: bool,
}

struct Inner {
    current: Arc<Version>,
    manifest: Manifest,
    groups: VlogGroups,
    table_states: FileStates,
    log_number: u64,
    compact_pointers: Vec<Vec<u8>>,
    last_bottom_compaction: Option<Instant>,
}

/// Owner of the current version and everything that changes with it.
pub struct VersionSet {
    dir: PathBuf,
    opts: Options,
    cache: Option<Arc<BlockCache>>,
    vlog: Arc<ValueLog>,
    next_file: AtomicU64,
    inner: Mutex<Inner>,
}

impl VersionSet {
    /// Replays the manifest in `dir` and opens every table and value log it lists.
    pub fn open(dir: &Path, opts: &Options, cache: Option<Arc<BlockCache>>) -> Result<Self> {
        let (manifest, edits) = Manifest::open(dir)?;
        let num_levels = opts.max_levels;

        let mut levels: Vec<BTreeMap<u64, FileMetaData>> = vec![BTreeMap::new(); num_levels];
        let mut groups = VlogGroups::new();
        let mut next_file = 1u64;
        let mut log_number = 0u64;
        for edit in &edits {
            for &(level, fid) in &edit.deletes {
                if let Some(files) = levels.get_mut(level) {
                    files.remove(&fid);
                }
            }
            for (level, meta) in &edit.adds {
                let files = levels.get_mut(*level).ok_or_else(|| {
                    Error::corruption(format!("Manifest places table {} at level {}", meta.fid, level))
                })?;
                files.insert(meta.fid, meta.clone());
            }
            for id in &edit.dropped_groups {
                groups.remove(*id);
            }
            for record in &edit.groups {
                groups.insert(record.id, record.group.clone());
            }
            if let Some(next) = edit.next_file_number {
                next_file = next_file.max(next);
            }
            if let Some(flushed) = edit.log_number {
                log_number = log_number.max(flushed);
            }
        }

        let mut tables = Vec::with_capacity(num_levels);
        for files in &levels {
            let mut level = Vec::with_capacity(files.len());
            for fid in files.keys() {
                let table = Table::open(dir, *fid, opts.comparator.clone(), cache.clone())?;
                next_file = next_file.max(fid + 1);
                level.push(Arc::new(table));
            }
            tables.push(level);
        }

        let vlogs = groups.all_vlogs();
        if let Some(max) = vlogs.iter().next_back() {
            next_file = next_file.max(max + 1);
        }
        let vlog = Arc::new(ValueLog::open(dir, vlogs)?);

        let current = Arc::new(Version::from_levels(tables, opts.comparator.clone()));
        log::info!(
            "Recovered {} tables and {} value log groups from {} manifest edits",
            current.tables().count(),
            groups.len(),
            edits.len()
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            opts: opts.clone(),
            cache,
            vlog,
            next_file: AtomicU64::new(next_file),
            inner: Mutex::new(Inner {
                current,
                manifest,
                groups,
                table_states: FileStates::new(),
                log_number,
                compact_pointers: vec![Vec::new(); num_levels],
                last_bottom_compaction: None,
            }),
        })
    }

    /// Deletes `.sst` and `.vlog` files the current state does not reference.
    /// They are leftovers of jobs interrupted by a crash.
    pub fn remove_orphans(&self) -> Result<usize> {
        let (live_tables, live_vlogs) = {
            let inner = self.inner.lock();
            let tables: HashSet<u64> = inner.current.tables().map(|(_, t)| t.fid()).collect();
            (tables, inner.groups.all_vlogs())
        };

        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some((fid, kind)) = name.to_str().and_then(codec::parse_file_name) else {
                continue;
            };
            let orphan = match kind {
                FileKind::Table => !live_tables.contains(&fid),
                FileKind::Vlog => !live_vlogs.contains(&fid),
                FileKind::Wal => false,
            };
            if orphan {
                log::warn!("Removing orphaned file {:?}", entry.path());
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Allocates a file id.
    pub fn new_file_number(&self) -> u64 {
        self.next_file.fetch_add(1, AtomicOrdering::SeqCst)
    }

    /// Makes sure future ids are above `fid`.
    pub fn mark_file_number_used(&self, fid: u64) {
        self.next_file.fetch_max(fid + 1, AtomicOrdering::SeqCst);
    }

    /// The next id [`new_file_number`](Self::new_file_number) would return.
    pub fn next_file_number(&self) -> u64 {
        self.next_file.load(AtomicOrdering::SeqCst)
    }

    /// Highest WAL id whose memtable is already in a table. WALs up to this
    /// id are leftovers of a crash between a flush and the WAL's removal.
    pub fn log_number(&self) -> u64 {
        self.inner.lock().log_number
    }

    /// The current version.
    pub fn current(&self) -> Arc<Version> {
        Arc::clone(&self.inner.lock().current)
    }

    /// The value log registry.
    pub fn value_log(&self) -> &Arc<ValueLog> {
        &self.vlog
    }

    /// Options the set was opened with.
    pub fn options(&self) -> &Options {
        &self.opts
    }

    /// Database directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy of the current value log groups.
    pub fn groups(&self) -> VlogGroups {
        self.inner.lock().groups.clone()
    }

    /// Opens a table written by a flush or a background job.
    pub fn open_table(&self, fid: u64) -> Result<Arc<Table>> {
        Ok(Arc::new(Table::open(&self.dir, fid, self.opts.comparator.clone(), self.cache.clone())?))
    }

    /// Commits `edit`. `new_tables` are the handles for every added table
    /// that is not already part of the current version.
    pub fn log_and_apply(&self, edit: VersionEdit, new_tables: Vec<Arc<Table>>) -> Result<()> {
        self.log_and_apply_with(new_tables, |_| Ok(edit))
    }

    /// Builds an edit from the current state and commits it, all under the lock.
    pub fn log_and_apply_with<F>(&self, new_tables: Vec<Arc<Table>>, build: F) -> Result<()>
    where
        F: FnOnce(&EditContext<'_>) -> Result<VersionEdit>,
    {
        let mut inner = self.inner.lock();
        let mut edit = {
            let ctx = EditContext {
                version: &inner.current,
                groups: &inner.groups,
                busy: inner.table_states.busy() > 0,
            };
            build(&ctx)?
        };
        let mut fresh: HashMap<u64, Arc<Table>> = new_tables.into_iter().map(|t| (t.fid(), t)).collect();
        self.validate_edit(&inner.current, &edit, &fresh)?;

        edit.set_next_file_number(self.next_file_number());
        inner.manifest.append(&edit)?;

        let mut levels = inner.current.levels.clone();
        let mut removed: HashMap<u64, Arc<Table>> = HashMap::new();
        for &(level, fid) in &edit.deletes {
            if let Some(pos) = levels[level].iter().position(|t| t.fid() == fid) {
                removed.insert(fid, levels[level].remove(pos));
            }
        }
        for (level, meta) in &edit.adds {
            if let Some(table) = fresh.remove(&meta.fid).or_else(|| removed.remove(&meta.fid)) {
                levels[*level].push(table);
            }
        }

        if let Some(flushed) = edit.log_number {
            inner.log_number = inner.log_number.max(flushed);
        }

        let vlogs_before = inner.groups.all_vlogs();
        for id in &edit.dropped_groups {
            inner.groups.remove(*id);
        }
        for record in &edit.groups {
            inner.groups.insert(record.id, record.group.clone());
        }
        let vlogs_after = inner.groups.all_vlogs();
        let orphaned: Vec<u64> = vlogs_before.difference(&vlogs_after).copied().collect();

        for table in removed.values() {
            table.mark_obsolete();
        }
        if !orphaned.is_empty() {
            log::info!("Value logs {:?} are unreferenced; reclaiming after release", orphaned);
            // With no retired tables the reaper drops, and deletes, right here.
            let reaper = VlogReaper::new(Arc::clone(&self.vlog), orphaned);
            for table in removed.values() {
                let reaper = Arc::clone(&reaper);
                table.on_release(move || drop(reaper));
            }
        }

        inner.current = Arc::new(Version::from_levels(levels, self.opts.comparator.clone()));

        if inner.manifest.size() > self.opts.max_manifest_size {
            let snapshot = self.snapshot_edit(&inner);
            if let Err(e) = inner.manifest.rewrite(&snapshot) {
                log::warn!("Manifest rewrite failed, keeping the log: {}", e);
            }
        }
        Ok(())
    }

    fn validate_edit(&self, current: &Version, edit: &VersionEdit, fresh: &HashMap<u64, Arc<Table>>) -> Result<()> {
        let num_levels = current.num_levels();
        for &(level, fid) in &edit.deletes {
            if !current.files(level).iter().any(|t| t.fid() == fid) {
                return Err(Error::invalid_argument(format!("Table {} is not at level {}", fid, level)));
            }
        }
        for (level, meta) in &edit.adds {
            if *level >= num_levels {
                return Err(Error::invalid_argument(format!("Level {} out of range", level)));
            }
            let moved = edit.deletes.iter().any(|&(_, fid)| fid == meta.fid);
            if !fresh.contains_key(&meta.fid) && !moved {
                return Err(Error::invalid_argument(format!("No handle for added table {}", meta.fid)));
            }
            if !moved && current.find_table(meta.fid).is_some() {
                return Err(Error::invalid_argument(format!("Table {} is already live", meta.fid)));
            }
        }
        Ok(())
    }

    fn snapshot_edit(&self, inner: &Inner) -> VersionEdit {
        let mut edit = VersionEdit::new();
        for (level, table) in inner.current.tables() {
            edit.add_file(level, meta_of(table));
        }
        for (id, group) in inner.groups.iter() {
            edit.set_group(id, group.clone());
        }
        edit.set_next_file_number(self.next_file_number());
        if inner.log_number > 0 {
            edit.set_log_number(inner.log_number);
        }
        edit
    }

    /// Picks a compaction and reserves its tables.
    ///
    /// Returns `None` when nothing needs compacting or some candidate table is
    /// already owned by another job.
    pub fn pick_compaction(&self) -> Option<Compaction> {
        let mut inner = self.inner.lock();
        let bottom_due = inner
            .last_bottom_compaction
            .map_or(true, |at| at.elapsed() >= self.opts.bottom_compaction_interval);
        let picked = compaction::pick(&inner.current, &self.opts, &inner.compact_pointers, bottom_due)?;

        let fids = picked.input_fids();
        if !inner.table_states.try_reserve(&fids, FileState::Compacting) {
            log::debug!("Compaction candidates {:?} are busy", fids);
            return None;
        }
        if picked.base_level > 0 {
            if let Some(last) = picked.base.last() {
                inner.compact_pointers[picked.base_level] = last.largest().to_vec();
            }
        }
        if picked.is_bottom_self_compaction(inner.current.num_levels()) {
            inner.last_bottom_compaction = Some(Instant::now());
        }
        Some(picked)
    }

    /// Returns tables reserved by a compaction to `Normal`.
    pub fn release_compaction(&self, compaction: &Compaction) {
        self.inner.lock().table_states.release(&compaction.input_fids());
    }

    /// Picks the value log group to collect and reserves its files.
    pub fn pick_gc(&self) -> Option<GcTask> {
        let mut inner = self.inner.lock();
        let (group_id, group) = inner.groups.gc_candidate(self.opts.gc_min_vlog_files)?;
        let group = group.clone();

        let mut tables = Vec::with_capacity(group.tables.len());
        for &fid in &group.tables {
            match inner.current.find_table(fid) {
                Some(found) => tables.push(found),
                None => {
                    log::warn!("Group {} lists table {} which is not live", group_id, fid);
                    return None;
                }
            }
        }

        if !inner.table_states.try_reserve(&group.tables, FileState::Gc) {
            log::debug!("Tables of group {} are busy", group_id);
            return None;
        }
        Some(GcTask { group_id, group, tables })
    }

    /// Returns the files reserved by a GC to `Normal`.
    pub fn release_gc(&self, task: &GcTask) {
        let mut inner = self.inner.lock();
        inner.table_states.release(&task.group.tables);
    }

    /// State of table `fid`.
    pub fn table_state(&self, fid: u64) -> FileState {
        self.inner.lock().table_states.get(fid)
    }
}

impl std::fmt::Debug for VersionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionSet")
            .field("dir", &self.dir)
            .field("next_file", &self.next_file_number())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::bytewise;
    use crate::sstable::TableBuilder;
    use crate::vlog::VlogGroup;
    use tempfile::TempDir;

    fn build_table(vs: &VersionSet, keys: &[&str], seq: u64) -> Arc<Table> {
        let fid = vs.new_file_number();
        let mut builder = TableBuilder::new(vs.options().table_builder_options());
        for key in keys {
            builder.add(key.as_bytes(), seq, b"\x00\x00value").unwrap();
        }
        builder.finish(codec::file_path(vs.dir(), fid, FileKind::Table)).unwrap();
        vs.open_table(fid).unwrap()
    }

    fn add(vs: &VersionSet, level: usize, table: &Arc<Table>) {
        let mut edit = VersionEdit::new();
        edit.add_file(level, meta_of(table));
        vs.log_and_apply(edit, vec![Arc::clone(table)]).unwrap();
    }

    fn open(dir: &Path) -> VersionSet {
        VersionSet::open(dir, &Options::default(), None).unwrap()
    }

    #[test]
    fn test_overlap_in_level() {
        let temp_dir = TempDir::new().unwrap();
        let vs = open(temp_dir.path());
        assert!(!vs.current().overlap_in_level(0, b"a", b"z"), "empty level never overlaps");

        add(&vs, 0, &build_table(&vs, &["c", "f"], 1));
        add(&vs, 1, &build_table(&vs, &["m", "p"], 2));
        let v = vs.current();

        assert!(v.overlap_in_level(0, b"f", b"g"), "closed interval");
        assert!(!v.overlap_in_level(0, b"g", b"h"));
        assert!(v.overlap_in_level(1, b"a", b"m"));
        assert!(v.overlap_in_level(1, b"o", b"o"));
        assert!(!v.overlap_in_level(1, b"q", b"z"));
        assert!(!v.overlap_in_level(1, b"g", b"l"));
        assert_eq!(v.overlapping_files(1, b"a", b"z").len(), 1);
    }

    #[test]
    fn test_live_table_cannot_be_added_twice() {
        let temp_dir = TempDir::new().unwrap();
        let vs = open(temp_dir.path());
        let table = build_table(&vs, &["a", "b"], 1);
        add(&vs, 2, &table);

        let mut edit = VersionEdit::new();
        edit.add_file(1, meta_of(&table));
        let err = vs.log_and_apply(edit, vec![Arc::clone(&table)]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(vs.current().tables().count(), 1);

        // Moving it is fine.
        let mut edit = VersionEdit::new();
        edit.delete_file(2, table.fid());
        edit.add_file(1, meta_of(&table));
        vs.log_and_apply(edit, Vec::new()).unwrap();
        assert_eq!(vs.current().find_table(table.fid()).map(|(level, _)| level), Some(1));
    }

    #[test]
    fn test_log_number_survives_reopen_and_rewrite() {
        let temp_dir = TempDir::new().unwrap();
        {
            let vs = VersionSet::open(temp_dir.path(), &Options::default().max_manifest_size(256), None).unwrap();
            assert_eq!(vs.log_number(), 0);
            for _ in 0..8 {
                let table = build_table(&vs, &["k"], 1);
                let mut edit = VersionEdit::new();
                edit.add_file(0, meta_of(&table));
                edit.set_log_number(table.fid());
                vs.log_and_apply(edit, vec![table]).unwrap();
            }
            assert_eq!(vs.log_number(), 8);
        }
        assert_eq!(open(temp_dir.path()).log_number(), 8);
    }

    #[test]
    fn test_pick_level_for_memtable_output() {
        let temp_dir = TempDir::new().unwrap();
        let vs = open(temp_dir.path());

        let v = vs.current();
        assert_eq!(v.pick_level_for_memtable_output(b"a", b"b"), MAX_MEM_COMPACT_LEVEL);

        add(&vs, 0, &build_table(&vs, &["c", "f"], 1));
        add(&vs, 2, &build_table(&vs, &["m", "p"], 2));
        let v = vs.current();
        assert_eq!(v.pick_level_for_memtable_output(b"d", b"e"), 0);
        assert_eq!(v.pick_level_for_memtable_output(b"n", b"o"), 1);
        assert_eq!(v.pick_level_for_memtable_output(b"x", b"y"), 2);
    }

    #[test]
    fn test_pick_level_respects_level_count() {
        let temp_dir = TempDir::new().unwrap();
        let mut opts = Options::default();
        opts.max_levels = 2;
        let vs = VersionSet::open(temp_dir.path(), &opts, None).unwrap();
        assert_eq!(vs.current().pick_level_for_memtable_output(b"a", b"b"), 0);
    }

    #[test]
    fn test_get_prefers_newest() {
        let temp_dir = TempDir::new().unwrap();
        let vs = open(temp_dir.path());
        add(&vs, 1, &build_table(&vs, &["a", "k"], 5));
        add(&vs, 0, &build_table(&vs, &["k"], 9));

        let v = vs.current();
        assert_eq!(v.get(b"k", u64::MAX).unwrap().0, 9);
        assert_eq!(v.get(b"k", 6).unwrap().0, 5, "snapshot falls through to older table");
        assert!(v.get(b"k", 4).unwrap_err().is_not_found());
        assert!(v.get(b"zz", u64::MAX).unwrap_err().is_not_found());
        assert_eq!(v.max_version(), 9);
    }

    #[test]
    fn test_level0_sorted_newest_first() {
        let temp_dir = TempDir::new().unwrap();
        let vs = open(temp_dir.path());
        add(&vs, 0, &build_table(&vs, &["a"], 3));
        add(&vs, 0, &build_table(&vs, &["a"], 1));
        add(&vs, 0, &build_table(&vs, &["a"], 7));

        let seqs: Vec<u64> = vs.current().files(0).iter().map(|t| t.max_version()).collect();
        assert_eq!(seqs, vec![7, 3, 1]);
    }

    #[test]
    fn test_recover_from_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let (first, second);
        {
            let vs = open(temp_dir.path());
            let a = build_table(&vs, &["a", "b"], 1);
            let b = build_table(&vs, &["c", "d"], 2);
            first = a.fid();
            second = b.fid();
            add(&vs, 0, &a);
            add(&vs, 1, &b);

            let mut edit = VersionEdit::new();
            edit.delete_file(0, first);
            vs.log_and_apply(edit, vec![]).unwrap();
        }
        let vs = open(temp_dir.path());
        let v = vs.current();
        assert_eq!(v.num_files(0), 0);
        assert_eq!(v.files(1)[0].fid(), second);
        assert!(vs.next_file_number() > second);
        assert!(!codec::file_path(temp_dir.path(), first, FileKind::Table).exists());
    }

    #[test]
    fn test_trivial_move_keeps_file() {
        let temp_dir = TempDir::new().unwrap();
        let vs = open(temp_dir.path());
        let table = build_table(&vs, &["a"], 1);
        add(&vs, 0, &table);

        let mut edit = VersionEdit::new();
        edit.delete_file(0, table.fid());
        edit.add_file(1, meta_of(&table));
        vs.log_and_apply(edit, vec![]).unwrap();
        drop(table);

        let v = vs.current();
        assert_eq!(v.num_files(0), 0);
        assert_eq!(v.num_files(1), 1);
        assert!(v.files(1)[0].path().exists());
    }

    #[test]
    fn test_rejects_inconsistent_edit() {
        let temp_dir = TempDir::new().unwrap();
        let vs = open(temp_dir.path());

        let mut edit = VersionEdit::new();
        edit.delete_file(1, 99);
        assert!(vs.log_and_apply(edit, vec![]).is_err());

        let mut edit = VersionEdit::new();
        edit.add_file(0, FileMetaData { fid: 42, size: 1, smallest: vec![1], largest: vec![1], max_version: 1 });
        assert!(vs.log_and_apply(edit, vec![]).is_err());
    }

    #[test]
    fn test_orphaned_vlogs_reclaimed_on_release() {
        let temp_dir = TempDir::new().unwrap();
        let vs = open(temp_dir.path());
        let table = build_table(&vs, &["a"], 1);
        vs.value_log().create(table.fid()).unwrap();

        let mut edit = VersionEdit::new();
        edit.add_file(0, meta_of(&table));
        edit.set_group(table.fid(), VlogGroup { vlogs: vec![table.fid()], tables: vec![table.fid()] });
        vs.log_and_apply(edit, vec![Arc::clone(&table)]).unwrap();

        let reader = vs.current();
        let mut edit = VersionEdit::new();
        edit.delete_file(0, table.fid());
        edit.drop_group(table.fid());
        vs.log_and_apply(edit, vec![]).unwrap();
        drop(table);

        let vlog_path = codec::file_path(temp_dir.path(), reader.files(0)[0].fid(), FileKind::Vlog);
        assert!(vlog_path.exists(), "old version still pins the table");
        drop(reader);
        assert!(!vlog_path.exists());
        assert!(vs.groups().is_empty());
    }

    #[test]
    fn test_remove_orphans() {
        let temp_dir = TempDir::new().unwrap();
        let vs = open(temp_dir.path());
        let live = build_table(&vs, &["a"], 1);
        add(&vs, 0, &live);
        let stray = build_table(&vs, &["b"], 2);
        let stray_path = stray.path().to_path_buf();
        drop(stray);
        fs::write(codec::file_path(temp_dir.path(), 77, FileKind::Vlog), b"junk").unwrap();
        fs::write(codec::file_path(temp_dir.path(), 78, FileKind::Wal), b"").unwrap();

        assert_eq!(vs.remove_orphans().unwrap(), 2);
        assert!(!stray_path.exists());
        assert!(live.path().exists());
        assert!(codec::file_path(temp_dir.path(), 78, FileKind::Wal).exists());
    }

    #[test]
    fn test_manifest_rewrite_preserves_state() {
        let temp_dir = TempDir::new().unwrap();
        let opts = Options::default().max_manifest_size(256);
        let fids: Vec<u64>;
        {
            let vs = VersionSet::open(temp_dir.path(), &opts, None).unwrap();
            let tables: Vec<_> = (0..8).map(|i| build_table(&vs, &[format!("k{}", i).as_str()], i)).collect();
            for table in &tables {
                add(&vs, 0, table);
            }
            fids = tables.iter().map(|t| t.fid()).collect();
        }
        let size = fs::metadata(temp_dir.path().join(manifest::MANIFEST_FILE)).unwrap().len();
        assert!(size < 2048);

        let vs = VersionSet::open(temp_dir.path(), &opts, None).unwrap();
        let mut live: Vec<u64> = vs.current().files(0).iter().map(|t| t.fid()).collect();
        live.sort_unstable();
        assert_eq!(live, fids);
    }

    #[test]
    fn test_file_numbers() {
        let temp_dir = TempDir::new().unwrap();
        let vs = VersionSet::open(temp_dir.path(), &Options::default().comparator(bytewise()), None).unwrap();
        let first = vs.new_file_number();
        assert_eq!(vs.new_file_number(), first + 1);
        vs.mark_file_number_used(100);
        assert_eq!(vs.new_file_number(), 101);
        vs.mark_file_number_used(5);
        assert_eq!(vs.new_file_number(), 102);
    }
}
