//! Compaction: merging tables into fewer, non-overlapping ones one level down.
//!
//! ## Process
//!
//! 1. Pick and reserve the inputs (picker.rs, through the version set)
//! 2. Merge them newest-wins with a [`MergeIterator`]
//! 3. Write the survivors into new tables at the target level, split at
//!    `sstable_max_size`
//! 4. Commit one edit that removes the inputs, adds the outputs and folds
//!    the inputs' value log groups together
//! 5. Release the reservations; the retired files are deleted when their
//!    last reader is gone
//!
//! A single base table with nothing to merge against is moved by edit only.

pub mod merge;
pub mod picker;

pub use merge::MergeIterator;
pub use picker::{level_budget, level_scores, pick, Compaction};

use crate::codec::{self, FileKind};
use crate::entry::{unix_now, ValueStruct};
use crate::error::Result;
use crate::iterator::KvIterator;
use crate::sstable::{Table, TableBuilder};
use crate::version::{meta_of, VersionEdit, VersionSet};
use std::fs;
use std::sync::Arc;

/// Runs one compaction. Returns false when nothing needed compacting.
pub fn run_compaction(vs: &VersionSet) -> Result<bool> {
    let Some(compaction) = vs.pick_compaction() else {
        log::debug!("No compaction needed");
        return Ok(false);
    };

    let result = execute(vs, &compaction);
    vs.release_compaction(&compaction);
    match result {
        Ok(()) => Ok(true),
        Err(e) => {
            log::error!(
                "Compaction L{} -> L{} failed: {}",
                compaction.base_level,
                compaction.target_level,
                e
            );
            Err(e)
        }
    }
}

fn execute(vs: &VersionSet, compaction: &Compaction) -> Result<()> {
    if compaction.is_trivial_move() {
        let table = &compaction.base[0];
        let mut edit = VersionEdit::new();
        edit.delete_file(compaction.base_level, table.fid());
        edit.add_file(compaction.target_level, meta_of(table));
        vs.log_and_apply(edit, Vec::new())?;
        log::info!(
            "Moved table {} from L{} to L{}",
            table.fid(),
            compaction.base_level,
            compaction.target_level
        );
        return Ok(());
    }

    let mut outputs = Vec::new();
    let mut pending = None;
    if let Err(e) = write_outputs(vs, compaction, &mut outputs, &mut pending) {
        discard(vs, &outputs, pending);
        return Err(e);
    }

    let inputs = compaction.input_fids();
    let output_fids: Vec<u64> = outputs.iter().map(|t| t.fid()).collect();
    let commit = vs.log_and_apply_with(outputs.clone(), |ctx| {
        let mut edit = VersionEdit::new();
        for (level, table) in compaction.inputs() {
            edit.delete_file(level, table.fid());
        }
        for table in &outputs {
            edit.add_file(compaction.target_level, meta_of(table));
        }
        let merge = ctx.groups.merge_for_compaction(&inputs, &output_fids);
        for id in merge.dropped {
            edit.drop_group(id);
        }
        if let Some((id, group)) = merge.merged {
            edit.set_group(id, group);
        }
        Ok(edit)
    });
    if let Err(e) = commit {
        discard(vs, &outputs, None);
        return Err(e);
    }

    log::info!(
        "Compacted {} tables L{} -> L{} into {:?}",
        inputs.len(),
        compaction.base_level,
        compaction.target_level,
        output_fids
    );
    Ok(())
}

fn write_outputs(
    vs: &VersionSet,
    compaction: &Compaction,
    outputs: &mut Vec<Arc<Table>>,
    pending: &mut Option<u64>,
) -> Result<()> {
    let opts = vs.options();
    let num_levels = vs.current().num_levels();
    let drop_dead = compaction.drops_dead_entries(num_levels);
    let now = unix_now();

    let children: Vec<Box<dyn KvIterator>> =
        compaction.inputs().map(|(_, t)| Box::new(t.iter()) as Box<dyn KvIterator>).collect();
    let mut merge = MergeIterator::new(children, opts.comparator.clone());
    merge.rewind()?;

    let mut builder: Option<(u64, TableBuilder)> = None;
    let mut dropped = 0usize;
    while merge.valid() {
        if drop_dead && ValueStruct::decode(merge.value())?.is_dead(now) {
            dropped += 1;
            merge.next()?;
            continue;
        }

        let (_, current) = builder.get_or_insert_with(|| {
            let fid = vs.new_file_number();
            *pending = Some(fid);
            (fid, TableBuilder::new(opts.table_builder_options()))
        });
        current.add(merge.key(), merge.seq(), merge.value())?;
        if current.estimated_size() >= opts.sstable_max_size {
            if let Some((fid, full)) = builder.take() {
                outputs.push(finish_table(vs, fid, full)?);
                *pending = None;
            }
        }
        merge.next()?;
    }
    if let Some((fid, last)) = builder.take() {
        outputs.push(finish_table(vs, fid, last)?);
        *pending = None;
    }

    if dropped > 0 {
        log::debug!("Dropped {} dead entries at L{}", dropped, compaction.target_level);
    }
    Ok(())
}

fn finish_table(vs: &VersionSet, fid: u64, builder: TableBuilder) -> Result<Arc<Table>> {
    builder.finish(codec::file_path(vs.dir(), fid, FileKind::Table))?;
    vs.open_table(fid)
}

/// Deletes outputs of a compaction that never made it into a version.
fn discard(vs: &VersionSet, outputs: &[Arc<Table>], pending: Option<u64>) {
    let paths = outputs.iter().map(|t| t.path().to_path_buf());
    let pending = pending.map(|fid| codec::file_path(vs.dir(), fid, FileKind::Table));
    for path in paths.chain(pending) {
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Failed to remove {:?}: {}", path, e);
            }
        }
    }
}
