//! Arena-backed skip list.
//!
//! Nodes live inside an [`Arena`] and link to each other by offset. Each node
//! is laid out as fixed-width little-endian fields:
//!
//! ```text
//! [key_offset: u32][key_len: u32][value_offset: u32][value_len: u32][height: u32][next: u32 * height]
//! ```
//!
//! Offset 0 is the null link. Readers share a read lock; an insert takes the
//! write lock, which also serialises arena allocation.

use crate::arena::Arena;
use crate::comparator::ComparatorRef;
use parking_lot::RwLock;
use rand::Rng;
use std::cmp::Ordering;
use std::sync::Arc;

/// Maximum tower height.
pub const MAX_HEIGHT: usize = 12;

const KEY_OFFSET: u32 = 0;
const KEY_LEN: u32 = 4;
const VALUE_OFFSET: u32 = 8;
const VALUE_LEN: u32 = 12;
const HEIGHT: u32 = 16;
const NEXT: u32 = 20;

struct Inner {
    arena: Arena,
    head: u32,
    height: usize,
    len: usize,
}

impl Inner {
    fn alloc_node(&mut self, key_off: u32, key_len: u32, val_off: u32, val_len: u32, height: usize) -> u32 {
        let node = self.arena.allocate(NEXT as usize + height * 4);
        self.arena.put_u32(node + KEY_OFFSET, key_off);
        self.arena.put_u32(node + KEY_LEN, key_len);
        self.arena.put_u32(node + VALUE_OFFSET, val_off);
        self.arena.put_u32(node + VALUE_LEN, val_len);
        self.arena.put_u32(node + HEIGHT, height as u32);
        node
    }

    fn next(&self, node: u32, level: usize) -> u32 {
        self.arena.get_u32(node + NEXT + 4 * level as u32)
    }

    fn set_next(&mut self, node: u32, level: usize, target: u32) {
        self.arena.put_u32(node + NEXT + 4 * level as u32, target);
    }

    fn key(&self, node: u32) -> &[u8] {
        let off = self.arena.get_u32(node + KEY_OFFSET);
        let len = self.arena.get_u32(node + KEY_LEN);
        self.arena.slice(off, len)
    }

    fn value(&self, node: u32) -> &[u8] {
        let off = self.arena.get_u32(node + VALUE_OFFSET);
        let len = self.arena.get_u32(node + VALUE_LEN);
        self.arena.slice(off, len)
    }

    /// First node whose key is >= `key`, filling `prev` with the last node
    /// before it on every level.
    fn find_ge(&self, cmp: &ComparatorRef, key: &[u8], mut prev: Option<&mut [u32; MAX_HEIGHT]>) -> u32 {
        let mut x = self.head;
        let mut level = self.height - 1;
        loop {
            let next = self.next(x, level);
            if next != 0 && cmp.compare(self.key(next), key) == Ordering::Less {
                x = next;
                continue;
            }
            if let Some(p) = prev.as_deref_mut() {
                p[level] = x;
            }
            if level == 0 {
                return next;
            }
            level -= 1;
        }
    }
}

/// Ordered map from byte keys to byte values.
pub struct SkipList {
    inner: RwLock<Inner>,
    cmp: ComparatorRef,
}

impl SkipList {
    /// Creates an empty list whose arena starts with `arena_size` bytes.
    pub fn new(arena_size: usize, cmp: ComparatorRef) -> Self {
        let mut arena = Arena::new(arena_size);
        let head = arena.allocate(NEXT as usize + MAX_HEIGHT * 4);
        arena.put_u32(head + HEIGHT, MAX_HEIGHT as u32);
        Self { inner: RwLock::new(Inner { arena, head, height: 1, len: 0 }), cmp }
    }

    fn random_height() -> usize {
        let mut rng = rand::rng();
        let mut height = 1;
        while height < MAX_HEIGHT && rng.random_bool(0.5) {
            height += 1;
        }
        height
    }

    /// Inserts `key`, replacing the value if an equal key is present.
    pub fn insert(&self, key: &[u8], value: &[u8]) {
        let mut inner = self.inner.write();
        let mut prev = [0u32; MAX_HEIGHT];
        let found = inner.find_ge(&self.cmp, key, Some(&mut prev));

        if found != 0 && self.cmp.compare(inner.key(found), key) == Ordering::Equal {
            let val_off = inner.arena.put_bytes(value);
            inner.arena.put_u32(found + VALUE_OFFSET, val_off);
            inner.arena.put_u32(found + VALUE_LEN, value.len() as u32);
            return;
        }

        let height = Self::random_height();
        if height > inner.height {
            let head = inner.head;
            for slot in prev.iter_mut().take(height).skip(inner.height) {
                *slot = head;
            }
            inner.height = height;
        }

        let key_off = inner.arena.put_bytes(key);
        let val_off = inner.arena.put_bytes(value);
        let node = inner.alloc_node(key_off, key.len() as u32, val_off, value.len() as u32, height);
        for (level, &before) in prev.iter().enumerate().take(height) {
            let after = inner.next(before, level);
            inner.set_next(node, level, after);
            inner.set_next(before, level, node);
        }
        inner.len += 1;
    }

    /// Returns the value stored under exactly `key`.
    pub fn search(&self, key: &[u8]) -> Option<Vec<u8>> {
        let inner = self.inner.read();
        let node = inner.find_ge(&self.cmp, key, None);
        if node != 0 && self.cmp.compare(inner.key(node), key) == Ordering::Equal {
            Some(inner.value(node).to_vec())
        } else {
            None
        }
    }

    /// Offset of the first node with key >= `key`, or 0.
    pub fn seek_ge(&self, key: &[u8]) -> u32 {
        self.inner.read().find_ge(&self.cmp, key, None)
    }

    /// Offset of the first node, or 0 when empty.
    pub fn first(&self) -> u32 {
        let inner = self.inner.read();
        inner.next(inner.head, 0)
    }

    /// Offset of the node after `node`, or 0.
    pub fn next(&self, node: u32) -> u32 {
        self.inner.read().next(node, 0)
    }

    /// Owned copies of the key and value at `node`.
    pub fn entry(&self, node: u32) -> (Vec<u8>, Vec<u8>) {
        let inner = self.inner.read();
        (inner.key(node).to_vec(), inner.value(node).to_vec())
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.inner.read().len
    }

    /// True when nothing has been inserted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Arena bytes in use.
    pub fn mem_size(&self) -> usize {
        self.inner.read().arena.size()
    }

    /// Comparator this list orders by.
    pub fn comparator(&self) -> &ComparatorRef {
        &self.cmp
    }

    /// Forward iterator over owned copies of the entries.
    pub fn iter(self: &Arc<Self>) -> Iter {
        Iter { list: Arc::clone(self), node: None }
    }
}

/// Owning forward iterator returned by [`SkipList::iter`].
pub struct Iter {
    list: Arc<SkipList>,
    node: Option<u32>,
}

impl Iterator for Iter {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        let next = match self.node {
            None => self.list.first(),
            Some(node) => self.list.next(node),
        };
        if next == 0 {
            return None;
        }
        self.node = Some(next);
        Some(self.list.entry(next))
    }
}
