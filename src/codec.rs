//! Low-level encoding helpers shared by every on-disk format.
//!
//! - LEB128 varints (`u32`/`u64`)
//! - CRC32-C checksums
//! - Data-file naming (`NNNNN.sst`, `NNNNN.wal`, `NNNNN.vlog`)

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Maximum encoded length of a `u64` varint.
pub const MAX_VARINT_LEN64: usize = 10;

/// Maximum encoded length of a `u32` varint.
pub const MAX_VARINT_LEN32: usize = 5;

/// Appends `value` as a varint.
pub fn put_uvarint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Decodes a varint from the front of `data`.
///
/// Returns the value and the number of bytes consumed.
pub fn get_uvarint(data: &[u8]) -> Result<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for (i, &b) in data.iter().enumerate() {
        if i == MAX_VARINT_LEN64 {
            break;
        }
        value |= u64::from(b & 0x7f) << shift;
        if b < 0x80 {
            return Ok((value, i + 1));
        }
        shift += 7;
    }
    Err(Error::corruption("truncated or overlong varint"))
}

/// Decodes a varint that must fit in a `u32`.
pub fn get_uvarint32(data: &[u8]) -> Result<(u32, usize)> {
    let (value, n) = get_uvarint(data)?;
    let value = u32::try_from(value).map_err(|_| Error::corruption("varint exceeds u32"))?;
    Ok((value, n))
}

/// Number of bytes `value` occupies as a varint.
pub fn uvarint_len(mut value: u64) -> usize {
    let mut n = 1;
    while value >= 0x80 {
        value >>= 7;
        n += 1;
    }
    n
}

/// CRC32-C of `data`.
pub fn checksum(data: &[u8]) -> u32 {
    crc32c::crc32c(data)
}

/// Verifies `data` against a stored CRC32-C.
pub fn verify_checksum(data: &[u8], expected: u32) -> Result<()> {
    let actual = checksum(data);
    if actual != expected {
        return Err(Error::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

/// Reads a little-endian `u32` at `offset`.
pub fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    let bytes = data
        .get(offset..offset + 4)
        .ok_or_else(|| Error::corruption(format!("u32 read past end at {}", offset)))?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Reads a little-endian `u64` at `offset`.
pub fn read_u64(data: &[u8], offset: usize) -> Result<u64> {
    let bytes = data
        .get(offset..offset + 8)
        .ok_or_else(|| Error::corruption(format!("u64 read past end at {}", offset)))?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(raw))
}

/// Kinds of numbered data files in a database directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Sorted table.
    Table,
    /// Write-ahead log.
    Wal,
    /// Value log.
    Vlog,
}

impl FileKind {
    fn extension(self) -> &'static str {
        match self {
            FileKind::Table => "sst",
            FileKind::Wal => "wal",
            FileKind::Vlog => "vlog",
        }
    }
}

/// Builds the path of a numbered data file, e.g. `00042.sst`.
pub fn file_path(dir: &Path, fid: u64, kind: FileKind) -> PathBuf {
    dir.join(format!("{:05}.{}", fid, kind.extension()))
}

/// Parses a numbered data file name back into its id and kind.
pub fn parse_file_name(name: &str) -> Option<(u64, FileKind)> {
    let (stem, ext) = name.rsplit_once('.')?;
    let kind = match ext {
        "sst" => FileKind::Table,
        "wal" => FileKind::Wal,
        "vlog" => FileKind::Vlog,
        _ => return None,
    };
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok().map(|fid| (fid, kind))
}
