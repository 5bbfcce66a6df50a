//! WAL writer implementation.

use super::record::Record;
use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Appends records to a WAL file.
pub struct WalWriter {
    /// Path to the WAL file
    path: PathBuf,
    /// Buffered writer for efficient I/O
    writer: BufWriter<File>,
    /// Write cursor (bytes appended so far)
    write_at: u64,
}

impl WalWriter {
    /// Opens the WAL file in append mode, creating it if it doesn't exist.
    ///
    /// `valid_len` is the length of the intact prefix found by replay; any torn
    /// tail past it is cut off so new records follow the last good one.
    pub fn open<P: AsRef<Path>>(path: P, valid_len: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        if file.metadata()?.len() > valid_len {
            log::warn!("Truncating torn WAL tail of {:?} at {}", path, valid_len);
            file.set_len(valid_len)?;
        }
        Ok(Self { path, writer: BufWriter::new(file), write_at: valid_len })
    }

    /// Appends one record and returns its offset.
    pub fn append(&mut self, record: &Record) -> Result<u64> {
        let offset = self.write_at;
        let encoded = record.encode();
        self.writer.write_all(&encoded)?;
        self.write_at += encoded.len() as u64;
        Ok(offset)
    }

    /// Flushes buffered records to the OS.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flushes and fsyncs.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Bytes written so far.
    pub fn write_at(&self) -> u64 {
        self.write_at
    }

    /// Path of the file being written.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
