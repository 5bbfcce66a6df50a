//! Value log groups.
//!
//! A group ties a set of value log files to the tables whose pointers may
//! reference them. A memtable flush starts a group named after the flushed
//! table; compaction folds the groups of its inputs into one. GC works on a
//! whole group at a time.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Members of one group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlogGroup {
    /// Value log file ids.
    pub vlogs: Vec<u64>,
    /// Table file ids.
    pub tables: Vec<u64>,
}

/// Group id → members, plus a reverse table → group map.
#[derive(Debug, Clone, Default)]
pub struct VlogGroups {
    groups: BTreeMap<u64, VlogGroup>,
    table_to_group: HashMap<u64, u64>,
}

impl VlogGroups {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets (or replaces) a group.
    pub fn insert(&mut self, id: u64, group: VlogGroup) {
        self.remove(id);
        for &table in &group.tables {
            self.table_to_group.insert(table, id);
        }
        self.groups.insert(id, group);
    }

    /// Removes a group.
    pub fn remove(&mut self, id: u64) -> Option<VlogGroup> {
        let group = self.groups.remove(&id)?;
        for table in &group.tables {
            if self.table_to_group.get(table) == Some(&id) {
                self.table_to_group.remove(table);
            }
        }
        Some(group)
    }

    /// Looks up a group.
    pub fn get(&self, id: u64) -> Option<&VlogGroup> {
        self.groups.get(&id)
    }

    /// Group a table belongs to.
    pub fn group_of(&self, table: u64) -> Option<u64> {
        self.table_to_group.get(&table).copied()
    }

    /// All groups in id order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &VlogGroup)> {
        self.groups.iter().map(|(id, g)| (*id, g))
    }

    /// Every value log id referenced by some group.
    pub fn all_vlogs(&self) -> BTreeSet<u64> {
        self.groups.values().flat_map(|g| g.vlogs.iter().copied()).collect()
    }

    /// Number of groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// True without groups.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Folds the groups touched by a compaction into one.
    ///
    /// `inputs` are the compacted tables, `outputs` the tables replacing them.
    /// Returns the merged group id and members (keyed by the first output),
    /// plus the ids of the groups that were folded in. When nothing remains
    /// to reference the values, the merged group is `None`.
    pub fn merge_for_compaction(&self, inputs: &[u64], outputs: &[u64]) -> GroupMerge {
        let sources: BTreeSet<u64> = inputs.iter().filter_map(|t| self.group_of(*t)).collect();
        if sources.is_empty() {
            return GroupMerge::default();
        }

        let input_set: BTreeSet<u64> = inputs.iter().copied().collect();
        let mut vlogs = BTreeSet::new();
        let mut tables = BTreeSet::new();
        for id in &sources {
            if let Some(group) = self.groups.get(id) {
                vlogs.extend(group.vlogs.iter().copied());
                tables.extend(group.tables.iter().copied().filter(|t| !input_set.contains(t)));
            }
        }
        tables.extend(outputs.iter().copied());

        let vlogs: Vec<u64> = vlogs.into_iter().collect();
        let dropped: Vec<u64> = sources.into_iter().collect();
        if tables.is_empty() {
            return GroupMerge { merged: None, dropped };
        }
        let id = outputs.first().copied().unwrap_or(dropped[0]);
        GroupMerge {
            merged: Some((id, VlogGroup { vlogs, tables: tables.into_iter().collect() })),
            dropped,
        }
    }

    /// Group with the most value logs, if it has at least `min_vlogs`.
    /// Ties go to the lowest group id.
    pub fn gc_candidate(&self, min_vlogs: usize) -> Option<(u64, &VlogGroup)> {
        self.iter()
            .filter(|(_, g)| g.vlogs.len() >= min_vlogs.max(1) && !g.tables.is_empty())
            .fold(None, |best: Option<(u64, &VlogGroup)>, (id, g)| match best {
                Some((_, b)) if b.vlogs.len() >= g.vlogs.len() => best,
                _ => Some((id, g)),
            })
    }
}

/// Outcome of [`VlogGroups::merge_for_compaction`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupMerge {
    /// The group replacing the sources.
    pub merged: Option<(u64, VlogGroup)>,
    /// Source groups to drop. Their value logs go with them when no merged
    /// group takes them over.
    pub dropped: Vec<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(vlogs: &[u64], tables: &[u64]) -> VlogGroup {
        VlogGroup { vlogs: vlogs.to_vec(), tables: tables.to_vec() }
    }

    #[test]
    fn test_groups_insert_and_lookup() {
        let mut groups = VlogGroups::new();
        groups.insert(5, group(&[5], &[5]));
        groups.insert(9, group(&[9], &[9, 10]));
        assert_eq!(groups.group_of(10), Some(9));
        assert_eq!(groups.all_vlogs().into_iter().collect::<Vec<_>>(), vec![5, 9]);

        groups.insert(9, group(&[9], &[11]));
        assert_eq!(groups.group_of(10), None);
        assert_eq!(groups.group_of(11), Some(9));

        assert!(groups.remove(5).is_some());
        assert_eq!(groups.group_of(5), None);
        assert_eq!(groups.len(), 1);
    }

    #[test]
    fn test_merge_for_compaction() {
        let mut groups = VlogGroups::new();
        groups.insert(1, group(&[1], &[1]));
        groups.insert(2, group(&[2], &[2, 3]));
        groups.insert(4, group(&[4], &[4]));

        let merge = groups.merge_for_compaction(&[1, 2], &[7, 8]);
        let (id, merged) = merge.merged.unwrap();
        assert_eq!(id, 7);
        assert_eq!(merged.vlogs, vec![1, 2]);
        assert_eq!(merged.tables, vec![3, 7, 8]);
        assert_eq!(merge.dropped, vec![1, 2]);
    }

    #[test]
    fn test_merge_without_survivors_drops_groups() {
        let mut groups = VlogGroups::new();
        groups.insert(1, group(&[1], &[1]));
        groups.insert(2, group(&[2], &[2]));

        let merge = groups.merge_for_compaction(&[1, 2], &[]);
        assert!(merge.merged.is_none());
        assert_eq!(merge.dropped, vec![1, 2]);
    }

    #[test]
    fn test_merge_without_groups() {
        let groups = VlogGroups::new();
        assert_eq!(groups.merge_for_compaction(&[1], &[2]), GroupMerge::default());
    }

    #[test]
    fn test_gc_candidate() {
        let mut groups = VlogGroups::new();
        groups.insert(1, group(&[1], &[1]));
        assert!(groups.gc_candidate(2).is_none());

        groups.insert(3, group(&[2, 3], &[3]));
        groups.insert(6, group(&[4, 5, 6], &[6]));
        groups.insert(7, group(&[7, 8, 9], &[7]));
        assert_eq!(groups.gc_candidate(2).map(|(id, _)| id), Some(6));
    }
}
