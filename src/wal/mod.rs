//! Write-Ahead Log (WAL) implementation.
//!
//! Every memtable generation owns exactly one WAL file, `NNNNN.wal`, sharing
//! the memtable's file id. Writes are appended before they are applied to the
//! memtable, so a crash loses nothing that `set` acknowledged (modulo
//! `sync_writes`).
//!
//! ## Architecture
//!
//! - **Record Format**: see [`record`]; one record per write, CRC32-C protected
//! - **Recovery**: replay stops at the first torn or corrupt record and
//!   reports the highest sequence seen
//! - **Retirement**: once the memtable is flushed to a table, the file is deleted
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sepkv::entry::ValueStruct;
//! use sepkv::wal::{Record, Wal};
//!
//! # fn main() -> Result<(), sepkv::Error> {
//! let dir = std::path::Path::new("./data");
//! let mut wal = Wal::create(dir, 1)?;
//! wal.write(&Record::new(b"key1".to_vec(), 1, ValueStruct::inline(b"value1", 0).encode()))?;
//! wal.sync()?;
//!
//! let (_wal, stats) = Wal::replay(dir, 1, |record| {
//!     println!("Recovered: {:?}", record.key);
//!     Ok(())
//! })?;
//! assert_eq!(stats.max_seq, 1);
//! # Ok(())
//! # }
//! ```

pub mod reader;
pub mod record;
pub mod writer;

pub use reader::{ReplayStats, WalReader};
pub use record::Record;
pub use writer::WalWriter;

use crate::codec::{self, FileKind};
use crate::error::Result;
use std::path::{Path, PathBuf};

/// One WAL file.
pub struct Wal {
    fid: u64,
    writer: WalWriter,
}

impl Wal {
    /// Creates a fresh WAL file.
    pub fn create(dir: &Path, fid: u64) -> Result<Self> {
        let writer = WalWriter::open(codec::file_path(dir, fid, FileKind::Wal), 0)?;
        Ok(Self { fid, writer })
    }

    /// Replays an existing WAL through `f`, then reopens it for appending
    /// after its last intact record.
    pub fn replay<F>(dir: &Path, fid: u64, f: F) -> Result<(Self, ReplayStats)>
    where
        F: FnMut(Record) -> Result<()>,
    {
        let path = codec::file_path(dir, fid, FileKind::Wal);
        let stats = WalReader::new(&path)?.replay(f)?;
        log::info!(
            "Replayed WAL {:?}: {} records, max sequence {}",
            path,
            stats.records,
            stats.max_seq
        );
        let writer = WalWriter::open(&path, stats.valid_len)?;
        Ok((Self { fid, writer }, stats))
    }

    /// Appends a record.
    pub fn write(&mut self, record: &Record) -> Result<()> {
        self.writer.append(record)?;
        self.writer.flush()
    }

    /// Fsyncs the file.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.sync()
    }

    /// File id shared with the owning memtable.
    pub fn fid(&self) -> u64 {
        self.fid
    }

    /// Bytes written so far.
    pub fn size(&self) -> u64 {
        self.writer.write_at()
    }

    /// Path of the file.
    pub fn path(&self) -> PathBuf {
        self.writer.path().to_path_buf()
    }
}
