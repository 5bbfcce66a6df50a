//! WAL replay.

use super::record::{Record, HEADER_SIZE};
use crate::error::Result;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

/// Outcome of replaying a WAL file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records applied.
    pub records: usize,
    /// Highest sequence number seen.
    pub max_seq: u64,
    /// Length of the intact prefix.
    pub valid_len: u64,
}

/// Sequential reader used for recovery.
pub struct WalReader {
    /// Buffered reader for efficient I/O
    reader: BufReader<File>,
    /// Current read position
    position: u64,
    /// File length at open
    file_len: u64,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        Ok(Self { reader: BufReader::new(file), position: 0, file_len })
    }

    /// Reads the next well-formed record.
    ///
    /// Returns `None` at end of file and on the first torn or corrupt record;
    /// nothing after that point is trusted.
    pub fn read_next(&mut self) -> Result<Option<Record>> {
        let mut header = [0u8; HEADER_SIZE];
        if !self.read_full(&mut header)? {
            return Ok(None);
        }
        let body_len = Record::body_len(&header);
        if self.position + (HEADER_SIZE + body_len) as u64 > self.file_len {
            log::warn!("WAL ends with a truncated record at offset {}", self.position);
            return Ok(None);
        }
        let mut body = vec![0u8; body_len];
        if !self.read_full(&mut body)? {
            log::warn!("WAL ends with a truncated record at offset {}", self.position);
            return Ok(None);
        }
        match Record::decode(&header, &body) {
            Ok(record) => {
                self.position += (HEADER_SIZE + body.len()) as u64;
                Ok(Some(record))
            }
            Err(e) if e.is_torn_record() => {
                log::warn!("Stopping WAL replay at offset {}: {}", self.position, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Replays every intact record through `f`.
    pub fn replay<F>(&mut self, mut f: F) -> Result<ReplayStats>
    where
        F: FnMut(Record) -> Result<()>,
    {
        let mut stats = ReplayStats::default();
        while let Some(record) = self.read_next()? {
            stats.max_seq = stats.max_seq.max(record.seq);
            stats.records += 1;
            f(record)?;
        }
        stats.valid_len = self.position;
        Ok(stats)
    }

    /// Offset just past the last record returned.
    pub fn position(&self) -> u64 {
        self.position
    }

    fn read_full(&mut self, buf: &mut [u8]) -> Result<bool> {
        match self.reader.read_exact(buf) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
