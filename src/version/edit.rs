//! Version edits: the unit of change recorded in the manifest.

use crate::vlog::VlogGroup;
use serde::{Deserialize, Serialize};

/// Metadata for a table file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetaData {
    /// File number identifier
    pub fid: u64,
    /// Size of the file in bytes
    pub size: u64,
    /// Smallest key in the file
    pub smallest: Vec<u8>,
    /// Largest key in the file
    pub largest: Vec<u8>,
    /// Highest sequence number in the file
    pub max_version: u64,
}

/// Full membership of one value log group after an edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    /// Group id
    pub id: u64,
    /// Members
    pub group: VlogGroup,
}

/// A batch of changes applied atomically to the version set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEdit {
    /// Tables added, with their level
    pub adds: Vec<(usize, FileMetaData)>,
    /// Tables removed, as (level, file id)
    pub deletes: Vec<(usize, u64)>,
    /// Groups created or replaced
    pub groups: Vec<GroupRecord>,
    /// Groups removed
    pub dropped_groups: Vec<u64>,
    /// File counter high-water mark
    pub next_file_number: Option<u64>,
    /// Highest WAL id flushed into a table
    pub log_number: Option<u64>,
}

impl VersionEdit {
    /// Create an empty edit
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new table at `level`.
    pub fn add_file(&mut self, level: usize, meta: FileMetaData) {
        self.adds.push((level, meta));
    }

    /// Records the removal of table `fid` from `level`.
    pub fn delete_file(&mut self, level: usize, fid: u64) {
        self.deletes.push((level, fid));
    }

    /// Records the new membership of a group.
    pub fn set_group(&mut self, id: u64, group: VlogGroup) {
        self.groups.push(GroupRecord { id, group });
    }

    /// Records the removal of a group.
    pub fn drop_group(&mut self, id: u64) {
        self.dropped_groups.push(id);
    }

    /// Sets the file counter high-water mark.
    pub fn set_next_file_number(&mut self, next: u64) {
        self.next_file_number = Some(next);
    }

    /// Records that the memtable of WAL `id`, and every older one, is flushed.
    pub fn set_log_number(&mut self, id: u64) {
        self.log_number = Some(id);
    }

    /// True when the edit changes nothing.
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty()
            && self.deletes.is_empty()
            && self.groups.is_empty()
            && self.dropped_groups.is_empty()
            && self.next_file_number.is_none()
            && self.log_number.is_none()
    }

    /// Serialize with bincode.
    pub fn encode(&self) -> crate::Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize with bincode.
    pub fn decode(data: &[u8]) -> crate::Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}
