//! Configuration options for the storage engine.

use crate::comparator::{bytewise, ComparatorRef};
use crate::memtable::MemTableOptions;
use crate::sstable::TableBuilderOptions;
use std::time::Duration;

/// Configuration options for opening a database.
#[derive(Debug, Clone)]
pub struct Options {
    /// Create the database if it doesn't exist.
    /// Default: true
    pub create_if_missing: bool,

    /// Error if the database already exists.
    /// Default: false
    pub error_if_exists: bool,

    /// Arena size at which the active MemTable is rotated (in bytes).
    /// Default: 4MB
    pub memtable_size: usize,

    /// Starting arena capacity of a new MemTable.
    /// Default: 64KB
    pub arena_initial_size: usize,

    /// Block size for SSTables (in bytes).
    /// Default: 4KB
    pub block_size: usize,

    /// Compaction outputs are split into tables of roughly this size.
    /// Default: 2MB
    pub sstable_max_size: usize,

    /// Values longer than this are moved to the value log on flush.
    /// Default: 1KB
    pub value_threshold: usize,

    /// Bloom filter false positive rate. 0 disables filters.
    /// Default: 0.01 (1%)
    pub bloom_false_positive: f64,

    /// Maximum number of levels.
    /// Default: 7 (Level 0 through Level 6)
    pub max_levels: usize,

    /// Level 0 file count that scores 1.0.
    /// Default: 4
    pub level0_compaction_trigger: usize,

    /// Level 1 byte budget; every deeper level gets 10x more.
    /// Default: 1MB
    pub base_level_size: u64,

    /// Block cache size (in bytes).
    /// Set to 0 to disable caching.
    /// Default: 8MB
    pub block_cache_size: usize,

    /// Fsync the WAL after every write.
    /// Default: false
    pub sync_writes: bool,

    /// Compaction worker tick.
    /// Default: 1s
    pub compaction_interval: Duration,

    /// Value log GC worker tick.
    /// Default: 5s
    pub gc_interval: Duration,

    /// Upper bound of the random delay before a worker's first tick.
    /// Default: 2s
    pub startup_jitter: Duration,

    /// Smallest number of value logs in a group before GC considers it.
    /// Default: 2
    pub gc_min_vlog_files: usize,

    /// Minimum spacing between self-compactions of the deepest level.
    /// Default: 60s
    pub bottom_compaction_interval: Duration,

    /// The manifest is rewritten as a snapshot beyond this size.
    /// Default: 4MB
    pub max_manifest_size: u64,

    /// Key ordering used everywhere.
    /// Default: bytewise
    pub comparator: ComparatorRef,

    /// Start the compaction and GC workers on open.
    /// Default: true
    pub background_threads: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            memtable_size: 4 * 1024 * 1024, // 4MB
            arena_initial_size: 64 * 1024,
            block_size: 4 * 1024,              // 4KB
            sstable_max_size: 2 * 1024 * 1024, // 2MB
            value_threshold: 1024,
            bloom_false_positive: 0.01,
            max_levels: 7,
            level0_compaction_trigger: 4,
            base_level_size: 1024 * 1024,
            block_cache_size: 8 * 1024 * 1024, // 8MB
            sync_writes: false,
            compaction_interval: Duration::from_secs(1),
            gc_interval: Duration::from_secs(5),
            startup_jitter: Duration::from_secs(2),
            gc_min_vlog_files: 2,
            bottom_compaction_interval: Duration::from_secs(60),
            max_manifest_size: 4 * 1024 * 1024,
            comparator: bytewise(),
            background_threads: true,
        }
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if it doesn't exist.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether opening an existing database is an error.
    pub fn error_if_exists(mut self, value: bool) -> Self {
        self.error_if_exists = value;
        self
    }

    /// Sets the MemTable size threshold.
    pub fn memtable_size(mut self, size: usize) -> Self {
        self.memtable_size = size;
        self
    }

    /// Sets the block size for SSTables.
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Sets the compaction output split size.
    pub fn sstable_max_size(mut self, size: usize) -> Self {
        self.sstable_max_size = size;
        self
    }

    /// Sets the value separation threshold.
    pub fn value_threshold(mut self, size: usize) -> Self {
        self.value_threshold = size;
        self
    }

    /// Sets the block cache size.
    pub fn block_cache_size(mut self, size: usize) -> Self {
        self.block_cache_size = size;
        self
    }

    /// Sets the bloom filter false positive rate.
    pub fn bloom_false_positive(mut self, rate: f64) -> Self {
        self.bloom_false_positive = rate;
        self
    }

    /// Sets the Level 1 byte budget.
    pub fn base_level_size(mut self, size: u64) -> Self {
        self.base_level_size = size;
        self
    }

    /// Sets whether every write is fsynced.
    pub fn sync_writes(mut self, value: bool) -> Self {
        self.sync_writes = value;
        self
    }

    /// Sets the key comparator.
    pub fn comparator(mut self, comparator: ComparatorRef) -> Self {
        self.comparator = comparator;
        self
    }

    /// Enables or disables the background workers.
    pub fn background_threads(mut self, value: bool) -> Self {
        self.background_threads = value;
        self
    }

    /// Sets the smallest value log group GC will pick.
    pub fn gc_min_vlog_files(mut self, count: usize) -> Self {
        self.gc_min_vlog_files = count;
        self
    }

    /// Sets the manifest rewrite threshold.
    pub fn max_manifest_size(mut self, size: u64) -> Self {
        self.max_manifest_size = size;
        self
    }

    /// Sets the worker tick intervals.
    pub fn intervals(mut self, compaction: Duration, gc: Duration) -> Self {
        self.compaction_interval = compaction;
        self.gc_interval = gc;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.memtable_size == 0 {
            return Err(crate::Error::invalid_argument("memtable_size must be > 0"));
        }
        if self.arena_initial_size == 0 {
            return Err(crate::Error::invalid_argument("arena_initial_size must be > 0"));
        }
        if self.block_size == 0 {
            return Err(crate::Error::invalid_argument("block_size must be > 0"));
        }
        if self.sstable_max_size == 0 {
            return Err(crate::Error::invalid_argument("sstable_max_size must be > 0"));
        }
        if self.max_levels < 2 {
            return Err(crate::Error::invalid_argument("max_levels must be >= 2"));
        }
        if self.level0_compaction_trigger == 0 {
            return Err(crate::Error::invalid_argument("level0_compaction_trigger must be > 0"));
        }
        if self.base_level_size == 0 {
            return Err(crate::Error::invalid_argument("base_level_size must be > 0"));
        }
        if !(0.0..1.0).contains(&self.bloom_false_positive) {
            return Err(crate::Error::invalid_argument("bloom_false_positive must be in [0, 1)"));
        }
        if self.compaction_interval.is_zero() || self.gc_interval.is_zero() {
            return Err(crate::Error::invalid_argument("worker intervals must be > 0"));
        }
        Ok(())
    }

    pub(crate) fn memtable_options(&self) -> MemTableOptions {
        MemTableOptions {
            arena_size: self.arena_initial_size,
            comparator: self.comparator.clone(),
            sync_writes: self.sync_writes,
        }
    }

    pub(crate) fn table_builder_options(&self) -> TableBuilderOptions {
        TableBuilderOptions {
            block_size: self.block_size,
            bloom_false_positive: self.bloom_false_positive,
            comparator: self.comparator.clone(),
        }
    }
}
