//! Offset-addressed byte arena.
//!
//! The arena is a single growable `Vec<u8>` with a monotonic cursor. Callers
//! get back `u32` offsets instead of references; offset 0 is reserved so it can
//! serve as the null link.
//!
//! Growing the buffer reallocates it, which invalidates any slice borrowed
//! from an earlier state. Accessors therefore either copy data out
//! (`get_bytes`) or read fixed-width fields by value. Allocation needs
//! `&mut self`, so the owner decides when the arena may grow.

use std::fmt;

/// Alignment of every allocation.
const ALIGN: usize = 4;

/// Growable arena addressed by `u32` offsets.
pub struct Arena {
    buf: Vec<u8>,
}

impl Arena {
    /// Creates an arena with `capacity` bytes reserved up front.
    pub fn new(capacity: usize) -> Self {
        let mut buf = Vec::with_capacity(capacity.max(ALIGN));
        // Offset 0 is the null pointer.
        buf.resize(ALIGN, 0);
        Self { buf }
    }

    /// Allocates `size` zeroed bytes and returns their offset.
    ///
    /// # Panics
    ///
    /// Panics if the arena would exceed the `u32` address space.
    pub fn allocate(&mut self, size: usize) -> u32 {
        let offset = self.buf.len();
        let padded = (size + ALIGN - 1) & !(ALIGN - 1);
        let end = offset + padded;
        assert!(end <= u32::MAX as usize, "arena exceeded u32 address space");
        self.buf.resize(end, 0);
        offset as u32
    }

    /// Copies `data` into a fresh allocation.
    pub fn put_bytes(&mut self, data: &[u8]) -> u32 {
        let offset = self.allocate(data.len());
        let start = offset as usize;
        self.buf[start..start + data.len()].copy_from_slice(data);
        offset
    }

    /// Returns an owned copy of `len` bytes at `offset`.
    pub fn get_bytes(&self, offset: u32, len: u32) -> Vec<u8> {
        self.slice(offset, len).to_vec()
    }

    /// Borrows `len` bytes at `offset`.
    ///
    /// The slice is tied to `&self`, so it cannot outlive the next allocation.
    pub fn slice(&self, offset: u32, len: u32) -> &[u8] {
        let start = offset as usize;
        &self.buf[start..start + len as usize]
    }

    /// Writes a little-endian `u32` at `offset`.
    pub fn put_u32(&mut self, offset: u32, value: u32) {
        let start = offset as usize;
        self.buf[start..start + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Reads a little-endian `u32` at `offset`.
    pub fn get_u32(&self, offset: u32) -> u32 {
        let start = offset as usize;
        let b = &self.buf[start..start + 4];
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    /// Bytes handed out so far, including the reserved header.
    pub fn size(&self) -> usize {
        self.buf.len()
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("size", &self.buf.len())
            .field("capacity", &self.buf.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_offset_reserved() {
        let mut arena = Arena::new(16);
        let first = arena.allocate(1);
        assert_ne!(first, 0);
        assert_eq!(arena.size(), 8);
    }

    #[test]
    fn test_put_get_bytes_survive_growth() {
        let mut arena = Arena::new(8);
        let a = arena.put_bytes(b"alpha");
        let copy = arena.get_bytes(a, 5);
        // Force several reallocations.
        for i in 0..1000u32 {
            arena.put_bytes(&i.to_le_bytes());
        }
        assert_eq!(copy, b"alpha");
        assert_eq!(arena.get_bytes(a, 5), b"alpha");
    }

    #[test]
    fn test_u32_fields() {
        let mut arena = Arena::new(64);
        let off = arena.allocate(8);
        arena.put_u32(off, 0xdead_beef);
        arena.put_u32(off + 4, 7);
        assert_eq!(arena.get_u32(off), 0xdead_beef);
        assert_eq!(arena.get_u32(off + 4), 7);
    }

    #[test]
    fn test_allocations_are_aligned() {
        let mut arena = Arena::new(0);
        for size in [1usize, 3, 5, 9] {
            assert_eq!(arena.allocate(size) % ALIGN as u32, 0);
        }
    }
}
