//! Per-file background state.
//!
//! A file is `Normal` unless a compaction or a value log GC currently owns
//! it. Jobs reserve all of their files at once, so no file is ever picked by
//! two jobs.

use std::collections::HashMap;

/// State of a table or value log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileState {
    /// Available.
    #[default]
    Normal,
    /// Input of a running compaction.
    Compacting,
    /// Part of a running value log GC.
    Gc,
}

/// id → state for one kind of file. Absent ids are `Normal`.
#[derive(Debug, Default)]
pub struct FileStates {
    states: HashMap<u64, FileState>,
}

impl FileStates {
    /// Empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of `fid`.
    pub fn get(&self, fid: u64) -> FileState {
        self.states.get(&fid).copied().unwrap_or_default()
    }

    /// Moves every id to `state` if all of them are `Normal`.
    /// Returns false, changing nothing, otherwise.
    pub fn try_reserve(&mut self, fids: &[u64], state: FileState) -> bool {
        if fids.iter().any(|&fid| self.get(fid) != FileState::Normal) {
            return false;
        }
        for &fid in fids {
            self.states.insert(fid, state);
        }
        true
    }

    /// Returns the ids to `Normal`.
    pub fn release(&mut self, fids: &[u64]) {
        for fid in fids {
            self.states.remove(fid);
        }
    }

    /// Number of files not in `Normal` state.
    pub fn busy(&self) -> usize {
        self.states.len()
    }
}
