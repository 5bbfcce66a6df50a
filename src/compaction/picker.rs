//! Compaction file picker.
//!
//! Selects which tables should be compacted next, leveled-compaction style.
//!
//! ## Scoring
//!
//! - Level 0: file count / `level0_compaction_trigger`
//! - Level i >= 1: bytes / (`base_level_size` * 10^(i-1))
//!
//! The best level below the deepest one is compacted once its score reaches
//! 1.0. Otherwise a half-full level 0 is drained into level 1, and a deepest
//! level that is at least half full is compacted into itself to purge
//! tombstones and expired entries, at most once per
//! `bottom_compaction_interval`.

use crate::comparator::Comparator;
use crate::config::Options;
use crate::sstable::Table;
use crate::version::Version;
use std::cmp::Ordering;
use std::sync::Arc;

/// Score at which a level is compacted unconditionally.
const COMPACT_SCORE: f64 = 1.0;

/// Deepest-level score that allows a self-compaction.
const BOTTOM_SCORE: f64 = 0.5;

/// A compaction selected by the picker.
#[derive(Debug, Clone)]
pub struct Compaction {
    /// Level the compaction was triggered for.
    pub base_level: usize,
    /// Level the outputs go to.
    pub target_level: usize,
    /// Inputs from the base level.
    pub base: Vec<Arc<Table>>,
    /// Overlapping inputs from the target level.
    pub targets: Vec<Arc<Table>>,
    /// Score of the base level when picked.
    pub score: f64,
}

impl Compaction {
    /// Every input with its level.
    pub fn inputs(&self) -> impl Iterator<Item = (usize, &Arc<Table>)> {
        let base = self.base.iter().map(move |t| (self.base_level, t));
        base.chain(self.targets.iter().map(move |t| (self.target_level, t)))
    }

    /// Ids of every input.
    pub fn input_fids(&self) -> Vec<u64> {
        self.inputs().map(|(_, t)| t.fid()).collect()
    }

    /// A single base table with nothing to merge against moves by edit only.
    pub fn is_trivial_move(&self) -> bool {
        self.base.len() == 1 && self.targets.is_empty() && self.base_level != self.target_level
    }

    /// True for a compaction of the deepest level into itself.
    pub fn is_bottom_self_compaction(&self, num_levels: usize) -> bool {
        self.base_level == self.target_level && self.target_level + 1 == num_levels
    }

    /// Tombstones and expired entries may only be dropped when nothing
    /// older can sit below the outputs.
    pub fn drops_dead_entries(&self, num_levels: usize) -> bool {
        self.target_level + 1 == num_levels
    }
}

/// Byte budget of `level` (>= 1).
pub fn level_budget(opts: &Options, level: usize) -> u64 {
    let exp = u32::try_from(level.saturating_sub(1)).unwrap_or(u32::MAX);
    opts.base_level_size.saturating_mul(10u64.saturating_pow(exp))
}

/// Score of every level.
pub fn level_scores(version: &Version, opts: &Options) -> Vec<f64> {
    (0..version.num_levels())
        .map(|level| {
            if level == 0 {
                version.num_files(0) as f64 / opts.level0_compaction_trigger as f64
            } else {
                version.level_size(level) as f64 / level_budget(opts, level) as f64
            }
        })
        .collect()
}

/// Picks the next compaction, if any.
///
/// `pointers` holds, per level, the largest key of the last table compacted
/// there, so levels >= 1 are walked round-robin. `bottom_due` allows a
/// self-compaction of the deepest level.
pub fn pick(version: &Version, opts: &Options, pointers: &[Vec<u8>], bottom_due: bool) -> Option<Compaction> {
    let num_levels = version.num_levels();
    let bottom = num_levels - 1;
    let scores = level_scores(version, opts);

    let (best, best_score) = scores[..bottom]
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::MIN), |acc, (level, score)| if score > acc.1 { (level, score) } else { acc });

    let (base_level, target_level) = if best_score >= COMPACT_SCORE {
        (best, (best + 1).min(bottom))
    } else if version.num_files(0) > 0 && version.num_files(0) * 2 >= opts.level0_compaction_trigger {
        (0, 1)
    } else if bottom_due && scores[bottom] >= BOTTOM_SCORE {
        (bottom, bottom)
    } else {
        return None;
    };

    let cmp = version.comparator();
    let base: Vec<Arc<Table>> = if base_level == 0 {
        version.files(0).to_vec()
    } else {
        let files = version.files(base_level);
        let pointer = pointers.get(base_level).map(Vec::as_slice).unwrap_or(&[]);
        let next = if pointer.is_empty() {
            files.first()
        } else {
            files
                .iter()
                .find(|t| cmp.compare(t.smallest(), pointer) == Ordering::Greater)
                .or_else(|| files.first())
        };
        next.cloned().into_iter().collect()
    };
    if base.is_empty() {
        return None;
    }

    let targets = if base_level == target_level {
        Vec::new()
    } else {
        let (smallest, largest) = key_range(&base, cmp.as_ref());
        version.overlapping_files(target_level, smallest, largest)
    };

    log::debug!(
        "Picked compaction L{} -> L{} (score {:.2}): {} + {} tables",
        base_level,
        target_level,
        scores[base_level],
        base.len(),
        targets.len()
    );
    Some(Compaction { base_level, target_level, base, targets, score: scores[base_level] })
}

/// Smallest and largest key over `tables`.
fn key_range<'a>(tables: &'a [Arc<Table>], cmp: &dyn Comparator) -> (&'a [u8], &'a [u8]) {
    let mut smallest = tables[0].smallest();
    let mut largest = tables[0].largest();
    for table in &tables[1..] {
        if cmp.compare(table.smallest(), smallest) == Ordering::Less {
            smallest = table.smallest();
        }
        if cmp.compare(table.largest(), largest) == Ordering::Greater {
            largest = table.largest();
        }
    }
    (smallest, largest)
}
