//! The cursor interface shared by memtables, tables and the merge iterator.
//!
//! A cursor yields `(user key, sequence, stored value)` triples in comparator
//! order. Dropping a cursor releases whatever it pins (a memtable or a table
//! handle), so there is no separate `close`.

use crate::error::Result;

/// Positioned cursor over sorted entries.
pub trait KvIterator {
    /// Positions at the first entry.
    fn rewind(&mut self) -> Result<()>;

    /// Positions at the first entry whose user key is >= `key`.
    fn seek(&mut self, key: &[u8]) -> Result<()>;

    /// Moves to the next entry.
    fn next(&mut self) -> Result<()>;

    /// True while the cursor points at an entry.
    fn valid(&self) -> bool;

    /// User key of the current entry.
    fn key(&self) -> &[u8];

    /// Sequence number of the current entry.
    fn seq(&self) -> u64;

    /// Encoded stored value of the current entry.
    fn value(&self) -> &[u8];
}

impl<I: KvIterator + ?Sized> KvIterator for Box<I> {
    fn rewind(&mut self) -> Result<()> {
        (**self).rewind()
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        (**self).seek(key)
    }

    fn next(&mut self) -> Result<()> {
        (**self).next()
    }

    fn valid(&self) -> bool {
        (**self).valid()
    }

    fn key(&self) -> &[u8] {
        (**self).key()
    }

    fn seq(&self) -> u64 {
        (**self).seq()
    }

    fn value(&self) -> &[u8] {
        (**self).value()
    }
}
