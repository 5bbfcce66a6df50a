//! One append-only value log file.
//!
//! Record layout:
//!
//! ```text
//! [checksum: u32]      // CRC32-C of everything after it
//! [key_len: uvarint]
//! [value_len: uvarint]
//! [type: u8]
//! [key]
//! [value]
//! ```

use crate::codec::{self, FileKind, MAX_VARINT_LEN32};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Record type for a separated value.
pub const RECORD_VALUE: u8 = 1;

/// Longest possible record header.
const MAX_HEADER_SIZE: usize = 4 + 2 * MAX_VARINT_LEN32 + 1;

struct Inner {
    file: File,
    write_at: u64,
}

/// A value log file. Reads and appends are serialized on one handle.
pub struct VlogFile {
    fid: u64,
    path: PathBuf,
    inner: Mutex<Inner>,
}

/// Encodes one record.
pub fn encode_record(key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_HEADER_SIZE + key.len() + value.len());
    buf.extend_from_slice(&[0u8; 4]);
    codec::put_uvarint(&mut buf, key.len() as u64);
    codec::put_uvarint(&mut buf, value.len() as u64);
    buf.push(RECORD_VALUE);
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
    let checksum = codec::checksum(&buf[4..]);
    buf[..4].copy_from_slice(&checksum.to_le_bytes());
    buf
}

/// Parses the record header at the front of `data`.
///
/// Returns (key_len, value_len, header_len).
fn decode_header(data: &[u8]) -> Result<(usize, usize, usize)> {
    if data.len() < 4 {
        return Err(Error::corruption("Value log record header truncated"));
    }
    let (key_len, n1) = codec::get_uvarint32(&data[4..])?;
    let (value_len, n2) = codec::get_uvarint32(&data[4 + n1..])?;
    let header_len = 4 + n1 + n2 + 1;
    if data.len() < header_len {
        return Err(Error::corruption("Value log record header truncated"));
    }
    Ok((key_len as usize, value_len as usize, header_len))
}

/// Verifies a full record and splits it into key and value.
fn decode_record(record: &[u8], key_len: usize, header_len: usize) -> Result<(Vec<u8>, Vec<u8>)> {
    let stored = codec::read_u32(record, 0)?;
    codec::verify_checksum(&record[4..], stored)?;
    if record[header_len - 1] != RECORD_VALUE {
        return Err(Error::corruption(format!("Unknown value log record type {}", record[header_len - 1])));
    }
    let key = record[header_len..header_len + key_len].to_vec();
    let value = record[header_len + key_len..].to_vec();
    Ok((key, value))
}

impl VlogFile {
    /// Creates an empty `fid.vlog`, replacing any leftover file.
    pub fn create(dir: &Path, fid: u64) -> Result<Self> {
        let path = codec::file_path(dir, fid, FileKind::Vlog);
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(&path)?;
        Ok(Self { fid, path, inner: Mutex::new(Inner { file, write_at: 0 }) })
    }

    /// Opens an existing value log. A torn tail is cut off.
    pub fn open(dir: &Path, fid: u64) -> Result<Self> {
        let path = codec::file_path(dir, fid, FileKind::Vlog);
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let vlog = Self { fid, path, inner: Mutex::new(Inner { file, write_at: 0 }) };
        let valid_len = vlog.iterate(|_, _, _| Ok(()))?;
        let mut inner = vlog.inner.lock();
        if inner.file.metadata()?.len() > valid_len {
            log::warn!("Truncating torn value log tail of {:?} at {}", vlog.path, valid_len);
            inner.file.set_len(valid_len)?;
        }
        inner.write_at = valid_len;
        drop(inner);
        Ok(vlog)
    }

    /// Appends a record and returns its offset.
    pub fn write(&self, key: &[u8], value: &[u8]) -> Result<u32> {
        let record = encode_record(key, value);
        let mut inner = self.inner.lock();
        let offset = inner.write_at;
        if offset + record.len() as u64 > u64::from(u32::MAX) {
            return Err(Error::invalid_argument(format!("Value log {} is full", self.fid)));
        }
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(&record)?;
        inner.write_at += record.len() as u64;
        Ok(offset as u32)
    }

    /// Reads the record at `offset`, returning (key, value).
    pub fn read_at(&self, offset: u32) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut inner = self.inner.lock();
        let offset = u64::from(offset);
        if offset >= inner.write_at {
            return Err(Error::corruption(format!("Value log {} has no record at {}", self.fid, offset)));
        }
        let available = (inner.write_at - offset) as usize;
        let mut header = vec![0u8; MAX_HEADER_SIZE.min(available)];
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.read_exact(&mut header)?;
        let (key_len, value_len, header_len) = decode_header(&header)?;

        let total = header_len + key_len + value_len;
        if total > available {
            return Err(Error::corruption(format!("Value log {} record at {} runs past end", self.fid, offset)));
        }
        let mut record = vec![0u8; total];
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.read_exact(&mut record)?;
        decode_record(&record, key_len, header_len)
    }

    /// Calls `f(key, value, offset)` for every intact record in order.
    ///
    /// Stops at the first truncated or corrupt record and returns the length
    /// of the intact prefix.
    pub fn iterate<F>(&self, mut f: F) -> Result<u64>
    where
        F: FnMut(&[u8], &[u8], u32) -> Result<()>,
    {
        let mut data = Vec::new();
        {
            let mut inner = self.inner.lock();
            inner.file.seek(SeekFrom::Start(0))?;
            inner.file.read_to_end(&mut data)?;
        }

        let mut pos = 0usize;
        while pos < data.len() {
            let rest = &data[pos..];
            let parsed = decode_header(rest).and_then(|(key_len, value_len, header_len)| {
                let total = header_len + key_len + value_len;
                if total > rest.len() {
                    return Err(Error::corruption("Value log record truncated"));
                }
                decode_record(&rest[..total], key_len, header_len).map(|kv| (kv, total))
            });
            match parsed {
                Ok(((key, value), total)) => {
                    f(&key, &value, pos as u32)?;
                    pos += total;
                }
                Err(e) if e.is_torn_record() => {
                    log::warn!("Value log {:?} stops at offset {}: {}", self.path, pos, e);
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(pos as u64)
    }

    /// Fsyncs the file.
    pub fn sync(&self) -> Result<()> {
        self.inner.lock().file.sync_data()?;
        Ok(())
    }

    /// Bytes written.
    pub fn size(&self) -> u64 {
        self.inner.lock().write_at
    }

    /// File id.
    pub fn fid(&self) -> u64 {
        self.fid
    }

    /// Path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes the file.
    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for VlogFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VlogFile").field("fid", &self.fid).field("path", &self.path).finish()
    }
}
