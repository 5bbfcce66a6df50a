//! SSTable (Sorted String Table) implementation.
//!
//! SSTable is an immutable, sorted file format. Every entry carries the
//! sequence number of the write that produced it next to its stored value.
//!
//! ## File Format
//!
//! ```text
//! [Data Block 1]
//! [Data Block 2]
//! ...
//! [Data Block N]
//! [Index]           // block handles, bloom filter, max version, key count
//! [Index Len: u32]
//! [Checksum: u32]
//! [Checksum Len: u32]
//! ```
//!
//! There is no separate footer: the fixed-size trailer is read back-to-front
//! to find the index.

pub mod block;
pub mod builder;
pub mod index;
pub mod table;

pub use block::{Block, BlockBuilder, BlockIterator};
pub use builder::{TableBuilder, TableBuilderOptions, TableSummary};
pub use index::{BlockHandle, TableIndex};
pub use table::{Table, TableIterator};
