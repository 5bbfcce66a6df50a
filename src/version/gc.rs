//! Value log garbage collection.
//!
//! GC works on one group at a time. Every table of the group is rewritten at
//! its level under a new id, with the values its pointers still reference
//! copied into one fresh value log. The old tables leave the version in the
//! same edit, and the old value logs are deleted once the last reader of
//! those tables lets go.

use crate::codec::{self, FileKind};
use crate::entry::{ValuePointer, ValueStruct};
use crate::error::Result;
use crate::iterator::KvIterator;
use crate::sstable::{Table, TableBuilder};
use crate::version::{meta_of, VersionEdit, VersionSet};
use crate::vlog::{VlogFile, VlogGroup};
use std::fs;
use std::sync::Arc;

/// A reserved group and its live tables.
#[derive(Debug)]
pub struct GcTask {
    /// Id of the group being collected.
    pub group_id: u64,
    /// Members at pick time.
    pub group: VlogGroup,
    /// Tables of the group with their levels.
    pub tables: Vec<(usize, Arc<Table>)>,
}

/// Runs one GC pass. Returns false when no group qualified.
pub fn run_gc(vs: &VersionSet) -> Result<bool> {
    let Some(task) = vs.pick_gc() else {
        log::debug!("No value log group to collect");
        return Ok(false);
    };
    log::info!(
        "GC of group {}: {} tables, value logs {:?}",
        task.group_id,
        task.tables.len(),
        task.group.vlogs
    );

    let result = rewrite_group(vs, &task);
    vs.release_gc(&task);
    match result {
        Ok(()) => Ok(true),
        Err(e) => {
            log::error!("GC of group {} failed: {}", task.group_id, e);
            Err(e)
        }
    }
}

struct Outputs {
    vlog: Option<Arc<VlogFile>>,
    tables: Vec<(usize, Arc<Table>)>,
    pending: Vec<u64>,
}

impl Outputs {
    /// Deletes everything written so far; nothing of it is in the version.
    fn discard(self, vs: &VersionSet) {
        if let Some(vlog) = &self.vlog {
            if let Err(e) = vs.value_log().remove(vlog.fid()) {
                log::warn!("Failed to remove value log {}: {}", vlog.fid(), e);
            }
        }
        let paths = self.tables.iter().map(|(_, t)| t.path().to_path_buf());
        let pending = self.pending.iter().map(|fid| codec::file_path(vs.dir(), *fid, FileKind::Table));
        for path in paths.chain(pending) {
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("Failed to remove {:?}: {}", path, e);
                }
            }
        }
    }
}

fn rewrite_group(vs: &VersionSet, task: &GcTask) -> Result<()> {
    let vlog_fid = vs.new_file_number();
    let mut outputs = Outputs { vlog: None, tables: Vec::new(), pending: Vec::new() };
    if let Err(e) = write_outputs(vs, task, vlog_fid, &mut outputs) {
        outputs.discard(vs);
        return Err(e);
    }

    let mut edit = VersionEdit::new();
    for (level, table) in &task.tables {
        edit.delete_file(*level, table.fid());
    }
    for (level, table) in &outputs.tables {
        edit.add_file(*level, meta_of(table));
    }
    edit.drop_group(task.group_id);
    let new_tables: Vec<u64> = outputs.tables.iter().map(|(_, t)| t.fid()).collect();
    if let (Some(vlog), Some(&id)) = (&outputs.vlog, new_tables.first()) {
        edit.set_group(id, VlogGroup { vlogs: vec![vlog.fid()], tables: new_tables.clone() });
    }

    let handles = outputs.tables.iter().map(|(_, t)| Arc::clone(t)).collect();
    if let Err(e) = vs.log_and_apply(edit, handles) {
        outputs.discard(vs);
        return Err(e);
    }
    log::info!("GC of group {} done: tables {:?}", task.group_id, new_tables);
    Ok(())
}

fn write_outputs(vs: &VersionSet, task: &GcTask, vlog_fid: u64, outputs: &mut Outputs) -> Result<()> {
    let vlog = vs.value_log().create(vlog_fid)?;
    outputs.vlog = Some(Arc::clone(&vlog));
    let mut copied = 0usize;

    for (level, table) in &task.tables {
        let fid = vs.new_file_number();
        outputs.pending.push(fid);
        let mut builder = TableBuilder::new(vs.options().table_builder_options());
        let mut iter = table.iter();
        iter.rewind()?;
        while iter.valid() {
            let stored = ValueStruct::decode(iter.value())?;
            match stored.value_pointer()? {
                Some(ptr) => {
                    let value = vs.value_log().read(&ptr)?;
                    let offset = vlog.write(iter.key(), &value)?;
                    let moved = ValueStruct::pointer(ValuePointer { fid: vlog_fid, offset }, stored.expires_at);
                    builder.add(iter.key(), iter.seq(), &moved.encode())?;
                    copied += 1;
                }
                None => builder.add(iter.key(), iter.seq(), iter.value())?,
            }
            iter.next()?;
        }
        vlog.sync()?;
        builder.finish(codec::file_path(vs.dir(), fid, FileKind::Table))?;
        let table = vs.open_table(fid)?;
        outputs.pending.pop();
        outputs.tables.push((*level, table));
    }

    if copied == 0 {
        // Every pointer is gone, so the new tables need no value log.
        vs.value_log().remove(vlog_fid)?;
        outputs.vlog = None;
    }
    Ok(())
}
