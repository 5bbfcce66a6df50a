//! # Value Log - Separated Large Values
//!
//! Values larger than the configured threshold are moved out of the tables
//! when a memtable is flushed. The table keeps a `VAL_PTR` entry pointing at
//! `(file id, offset)` in a value log; the bytes live in the log.
//!
//! [`ValueLog`] is the registry of open value log files. Files are only ever
//! deleted through a [`VlogReaper`], which is attached to the tables that
//! could still reference them and fires once all of those are released.

mod file;
mod group;

pub use file::{encode_record, VlogFile, RECORD_VALUE};
pub use group::{GroupMerge, VlogGroup, VlogGroups};

use crate::entry::ValuePointer;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Registry of open value log files.
#[derive(Debug)]
pub struct ValueLog {
    dir: PathBuf,
    files: RwLock<HashMap<u64, Arc<VlogFile>>>,
}

impl ValueLog {
    /// Opens every listed value log in `dir`.
    pub fn open(dir: &Path, fids: impl IntoIterator<Item = u64>) -> Result<Self> {
        let mut files = HashMap::new();
        for fid in fids {
            files.insert(fid, Arc::new(VlogFile::open(dir, fid)?));
        }
        Ok(Self { dir: dir.to_path_buf(), files: RwLock::new(files) })
    }

    /// Creates a new value log. It is registered right away so reads through
    /// pointers written to it resolve as soon as the table is visible.
    pub fn create(&self, fid: u64) -> Result<Arc<VlogFile>> {
        let file = Arc::new(VlogFile::create(&self.dir, fid)?);
        self.files.write().insert(fid, Arc::clone(&file));
        Ok(file)
    }

    /// Open handle for `fid`.
    pub fn get(&self, fid: u64) -> Option<Arc<VlogFile>> {
        self.files.read().get(&fid).cloned()
    }

    /// Resolves a pointer to the separated value.
    pub fn read(&self, ptr: &ValuePointer) -> Result<Vec<u8>> {
        let file = self
            .get(ptr.fid)
            .ok_or_else(|| Error::corruption(format!("Value log {} is not open", ptr.fid)))?;
        Ok(file.read_at(ptr.offset)?.1)
    }

    /// Unregisters and deletes a value log.
    pub fn remove(&self, fid: u64) -> Result<()> {
        let file = self.files.write().remove(&fid);
        match file {
            Some(file) => file.remove(),
            None => Ok(()),
        }
    }

    /// Ids of the open value logs, ascending.
    pub fn fids(&self) -> Vec<u64> {
        let mut fids: Vec<u64> = self.files.read().keys().copied().collect();
        fids.sort_unstable();
        fids
    }

    /// Directory holding the files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Deletes a set of value logs when dropped.
///
/// One reaper is shared by every table that might still point into the
/// files; each table's release hook drops its clone, so the files go away
/// once the last such table is gone.
#[derive(Debug)]
pub struct VlogReaper {
    vlog: Arc<ValueLog>,
    fids: Vec<u64>,
}

impl VlogReaper {
    /// Reaper for `fids`.
    pub fn new(vlog: Arc<ValueLog>, fids: Vec<u64>) -> Arc<Self> {
        Arc::new(Self { vlog, fids })
    }
}

impl Drop for VlogReaper {
    fn drop(&mut self) {
        for &fid in &self.fids {
            match self.vlog.remove(fid) {
                Ok(()) => log::info!("Removed value log {}", fid),
                Err(e) => log::warn!("Failed to remove value log {}: {}", fid, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{self, FileKind};
    use tempfile::TempDir;

    #[test]
    fn test_value_log_read_pointer() {
        let temp_dir = TempDir::new().unwrap();
        let vlog = ValueLog::open(temp_dir.path(), []).unwrap();
        let file = vlog.create(3).unwrap();
        let offset = file.write(b"key", b"large value").unwrap();

        let ptr = ValuePointer { fid: 3, offset };
        assert_eq!(vlog.read(&ptr).unwrap(), b"large value");
        assert!(vlog.read(&ValuePointer { fid: 4, offset: 0 }).is_err());
        assert_eq!(vlog.fids(), vec![3]);
    }

    #[test]
    fn test_value_log_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let vlog = ValueLog::open(temp_dir.path(), []).unwrap();
            vlog.create(1).unwrap().write(b"k", b"v1").unwrap();
            vlog.create(2).unwrap().write(b"k", b"v2").unwrap();
        }
        let vlog = ValueLog::open(temp_dir.path(), [1, 2]).unwrap();
        assert_eq!(vlog.read(&ValuePointer { fid: 2, offset: 0 }).unwrap(), b"v2");
    }

    #[test]
    fn test_reaper_deletes_when_last_clone_drops() {
        let temp_dir = TempDir::new().unwrap();
        let vlog = Arc::new(ValueLog::open(temp_dir.path(), []).unwrap());
        vlog.create(1).unwrap();
        vlog.create(2).unwrap();

        let reaper = VlogReaper::new(Arc::clone(&vlog), vec![1, 2]);
        let other = Arc::clone(&reaper);
        drop(reaper);
        assert!(codec::file_path(temp_dir.path(), 1, FileKind::Vlog).exists());

        drop(other);
        assert!(!codec::file_path(temp_dir.path(), 1, FileKind::Vlog).exists());
        assert!(!codec::file_path(temp_dir.path(), 2, FileKind::Vlog).exists());
        assert!(vlog.get(1).is_none());
    }
}
