//! Multi-way merge iterator.
//!
//! Merges any number of sorted cursors into one stream holding a single entry
//! per user key: the version with the highest sequence number. Every other
//! version of that key, in any child, is skipped when the merge moves on, so
//! overwritten entries are never resurrected when generations are merged.
//!
//! Children are few (one per compaction input, or one memtable), and keys
//! are ordered by the engine comparator, so the smallest key is found by a
//! linear scan over the children instead of a heap.

use crate::comparator::ComparatorRef;
use crate::error::Result;
use crate::iterator::KvIterator;
use std::cmp::Ordering;

/// Newest-wins merge over sorted cursors.
pub struct MergeIterator {
    children: Vec<Box<dyn KvIterator>>,
    cmp: ComparatorRef,
    current: Option<usize>,
}

impl MergeIterator {
    /// Merges `children`. Call `rewind` or `seek` before reading.
    pub fn new(children: Vec<Box<dyn KvIterator>>, cmp: ComparatorRef) -> Self {
        Self { children, cmp, current: None }
    }

    /// Number of merged cursors.
    pub fn num_children(&self) -> usize {
        self.children.len()
    }

    /// Points `current` at the child with the smallest key, preferring the
    /// highest sequence among equal keys.
    fn select(&mut self) {
        let mut best: Option<usize> = None;
        for (idx, child) in self.children.iter().enumerate() {
            if !child.valid() {
                continue;
            }
            best = match best {
                None => Some(idx),
                Some(b) => {
                    let leader = &self.children[b];
                    match self.cmp.compare(child.key(), leader.key()) {
                        Ordering::Less => Some(idx),
                        Ordering::Equal if child.seq() > leader.seq() => Some(idx),
                        _ => Some(b),
                    }
                }
            };
        }
        self.current = best;
    }
}

impl KvIterator for MergeIterator {
    fn rewind(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.rewind()?;
        }
        self.select();
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        for child in &mut self.children {
            child.seek(key)?;
        }
        self.select();
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        let Some(idx) = self.current else {
            return Ok(());
        };
        let key = self.children[idx].key().to_vec();
        for child in &mut self.children {
            while child.valid() && self.cmp.compare(child.key(), &key) == Ordering::Equal {
                child.next()?;
            }
        }
        self.select();
        Ok(())
    }

    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn key(&self) -> &[u8] {
        match self.current {
            Some(idx) => self.children[idx].key(),
            None => &[],
        }
    }

    fn seq(&self) -> u64 {
        self.current.map_or(0, |idx| self.children[idx].seq())
    }

    fn value(&self) -> &[u8] {
        match self.current {
            Some(idx) => self.children[idx].value(),
            None => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::{bytewise, NumericComparator};
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    /// In-memory cursor over `(key, seq, value)` sorted by key, then seq descending.
    struct VecIterator {
        entries: Vec<(Vec<u8>, u64, Vec<u8>)>,
        pos: usize,
        cmp: ComparatorRef,
    }

    impl VecIterator {
        fn boxed(mut entries: Vec<(Vec<u8>, u64, Vec<u8>)>, cmp: ComparatorRef) -> Box<dyn KvIterator> {
            entries.sort_by(|a, b| cmp.compare(&a.0, &b.0).then(b.1.cmp(&a.1)));
            Box::new(Self { entries, pos: usize::MAX, cmp })
        }
    }

    impl KvIterator for VecIterator {
        fn rewind(&mut self) -> Result<()> {
            self.pos = 0;
            Ok(())
        }

        fn seek(&mut self, key: &[u8]) -> Result<()> {
            self.pos = self.entries.partition_point(|e| self.cmp.compare(&e.0, key) == Ordering::Less);
            Ok(())
        }

        fn next(&mut self) -> Result<()> {
            self.pos += 1;
            Ok(())
        }

        fn valid(&self) -> bool {
            self.pos < self.entries.len()
        }

        fn key(&self) -> &[u8] {
            &self.entries[self.pos].0
        }

        fn seq(&self) -> u64 {
            self.entries[self.pos].1
        }

        fn value(&self) -> &[u8] {
            &self.entries[self.pos].2
        }
    }

    fn entry(key: &str, seq: u64, value: &str) -> (Vec<u8>, u64, Vec<u8>) {
        (key.as_bytes().to_vec(), seq, value.as_bytes().to_vec())
    }

    fn collect(iter: &mut MergeIterator) -> Vec<(Vec<u8>, u64, Vec<u8>)> {
        let mut out = Vec::new();
        while iter.valid() {
            out.push((iter.key().to_vec(), iter.seq(), iter.value().to_vec()));
            iter.next().unwrap();
        }
        out
    }

    #[test]
    fn test_merge_iterator_two_tables() {
        let cmp = bytewise();
        let mut merge = MergeIterator::new(
            vec![
                VecIterator::boxed(vec![entry("a", 1, "1"), entry("c", 3, "3"), entry("e", 5, "5")], cmp.clone()),
                VecIterator::boxed(vec![entry("b", 2, "2"), entry("d", 4, "4"), entry("f", 6, "6")], cmp.clone()),
            ],
            cmp,
        );
        merge.rewind().unwrap();
        let keys: Vec<Vec<u8>> = collect(&mut merge).into_iter().map(|e| e.0).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec(), b"e".to_vec(), b"f".to_vec()]);
    }

    #[test]
    fn test_merge_iterator_newest_wins() {
        let cmp = bytewise();
        let mut merge = MergeIterator::new(
            vec![
                VecIterator::boxed(vec![entry("a", 10, "old_a"), entry("c", 30, "new_c")], cmp.clone()),
                VecIterator::boxed(vec![entry("a", 40, "new_a"), entry("b", 20, "b"), entry("c", 5, "old_c")], cmp.clone()),
            ],
            cmp,
        );
        merge.rewind().unwrap();
        assert_eq!(collect(&mut merge), vec![entry("a", 40, "new_a"), entry("b", 20, "b"), entry("c", 30, "new_c")]);
    }

    #[test]
    fn test_merge_iterator_versions_within_one_child() {
        let cmp = bytewise();
        let mut merge = MergeIterator::new(
            vec![VecIterator::boxed(vec![entry("k", 1, "v1"), entry("k", 3, "v3"), entry("k", 2, "v2")], cmp.clone())],
            cmp,
        );
        merge.rewind().unwrap();
        assert_eq!(collect(&mut merge), vec![entry("k", 3, "v3")]);
    }

    #[test]
    fn test_merge_iterator_empty_and_seek() {
        let cmp = bytewise();
        let mut merge = MergeIterator::new(
            vec![
                VecIterator::boxed(vec![], cmp.clone()),
                VecIterator::boxed(vec![entry("a", 1, "1"), entry("m", 2, "2"), entry("z", 3, "3")], cmp.clone()),
            ],
            cmp,
        );
        assert!(!merge.valid());
        merge.seek(b"b").unwrap();
        assert_eq!(merge.key(), b"m");
        merge.seek(b"zz").unwrap();
        assert!(!merge.valid());
        assert_eq!(merge.num_children(), 2);
    }

    #[test]
    fn test_merge_iterator_uses_comparator() {
        let cmp: ComparatorRef = Arc::new(NumericComparator);
        let mut merge = MergeIterator::new(
            vec![
                VecIterator::boxed(vec![entry("9", 1, "a"), entry("100", 2, "b")], cmp.clone()),
                VecIterator::boxed(vec![entry("10", 3, "c")], cmp.clone()),
            ],
            cmp,
        );
        merge.rewind().unwrap();
        let keys: Vec<Vec<u8>> = collect(&mut merge).into_iter().map(|e| e.0).collect();
        assert_eq!(keys, vec![b"9".to_vec(), b"10".to_vec(), b"100".to_vec()]);
    }

    proptest! {
        #[test]
        fn prop_merge_yields_newest_version(
            writes in prop::collection::vec((0u8..20, 0usize..4), 1..200)
        ) {
            let cmp = bytewise();
            let mut tables: Vec<Vec<(Vec<u8>, u64, Vec<u8>)>> = vec![Vec::new(); 4];
            let mut expected: BTreeMap<Vec<u8>, u64> = BTreeMap::new();
            for (seq, (key, table)) in writes.into_iter().enumerate() {
                let seq = seq as u64 + 1;
                let key = vec![key];
                tables[table].push((key.clone(), seq, seq.to_le_bytes().to_vec()));
                expected.insert(key, seq);
            }

            let children = tables.into_iter().map(|t| VecIterator::boxed(t, cmp.clone())).collect();
            let mut merge = MergeIterator::new(children, cmp);
            merge.rewind().unwrap();
            let merged: Vec<(Vec<u8>, u64)> = collect(&mut merge).into_iter().map(|e| (e.0, e.1)).collect();
            let expected: Vec<(Vec<u8>, u64)> = expected.into_iter().collect();
            prop_assert_eq!(merged, expected);
        }
    }
}
