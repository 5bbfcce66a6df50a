//! Lookaside cache for table data blocks.
//!
//! Blocks are cached after their checksum has been verified, so a hit can be
//! used directly. A miss falls back to reading the table file.

mod lru;

pub use lru::{BlockCache, CacheKey, CacheStats};
