//! The MANIFEST: an append-only log of version edits.
//!
//! Each edit is written as one frame:
//!
//! ```text
//! [BEGIN_MAGIC: u32][payload_len: u32][payload: bincode(VersionEdit)][crc32c(payload): u32][END_MAGIC: u32]
//! ```
//!
//! Only frames bounded by both markers with a matching checksum are applied
//! on replay. The first bad frame ends the log and the file is truncated
//! there, so later appends never follow garbage.

use crate::codec;
use crate::error::{Error, Result};
use crate::version::edit::VersionEdit;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Manifest file name.
pub const MANIFEST_FILE: &str = "MANIFEST";

/// Temporary name used while rewriting the manifest.
pub const REWRITE_FILE: &str = "REWRITEMANIFEST";

/// Frame start marker.
pub const BEGIN_MAGIC: u32 = 0x5345_4b42;

/// Frame end marker.
pub const END_MAGIC: u32 = 0x5345_4b45;

const FRAME_OVERHEAD: usize = 16;

/// Encodes one frame.
pub fn encode_frame(edit: &VersionEdit) -> Result<Vec<u8>> {
    let payload = edit.encode()?;
    let mut frame = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
    frame.extend_from_slice(&BEGIN_MAGIC.to_le_bytes());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&codec::checksum(&payload).to_le_bytes());
    frame.extend_from_slice(&END_MAGIC.to_le_bytes());
    Ok(frame)
}

/// Decodes the frame at the front of `data`, returning the edit and the frame length.
fn decode_frame(data: &[u8]) -> Result<(VersionEdit, usize)> {
    if codec::read_u32(data, 0)? != BEGIN_MAGIC {
        return Err(Error::corruption("Manifest frame missing begin marker"));
    }
    let len = codec::read_u32(data, 4)? as usize;
    let payload = data
        .get(8..8 + len)
        .ok_or_else(|| Error::corruption("Manifest frame truncated"))?;
    let checksum = codec::read_u32(data, 8 + len)?;
    if codec::read_u32(data, 12 + len)? != END_MAGIC {
        return Err(Error::corruption("Manifest frame missing end marker"));
    }
    codec::verify_checksum(payload, checksum)?;
    Ok((VersionEdit::decode(payload)?, len + FRAME_OVERHEAD))
}

/// Writer side of the manifest.
#[derive(Debug)]
pub struct Manifest {
    dir: PathBuf,
    file: File,
    size: u64,
}

impl Manifest {
    /// Opens (or creates) the manifest in `dir` and returns every intact edit.
    pub fn open(dir: &Path) -> Result<(Self, Vec<VersionEdit>)> {
        let path = dir.join(MANIFEST_FILE);
        let mut file = OpenOptions::new().read(true).append(true).create(true).open(&path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let mut edits = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            match decode_frame(&data[pos..]) {
                Ok((edit, len)) => {
                    edits.push(edit);
                    pos += len;
                }
                Err(e) if e.is_torn_record() || matches!(e, Error::Serialization(_)) => {
                    log::warn!("Manifest replay stops at offset {}: {}", pos, e);
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        if pos < data.len() {
            log::warn!("Truncating manifest from {} to {} bytes", data.len(), pos);
            file.set_len(pos as u64)?;
            file.sync_all()?;
        }
        Ok((Self { dir: dir.to_path_buf(), file, size: pos as u64 }, edits))
    }

    /// Appends an edit and fsyncs.
    pub fn append(&mut self, edit: &VersionEdit) -> Result<()> {
        let frame = encode_frame(edit)?;
        self.file.write_all(&frame)?;
        self.file.sync_data()?;
        self.size += frame.len() as u64;
        Ok(())
    }

    /// Replaces the whole log with a single snapshot edit.
    ///
    /// The snapshot is written to `REWRITEMANIFEST`, fsynced and renamed over
    /// `MANIFEST`, so a crash leaves either the old or the new log.
    pub fn rewrite(&mut self, snapshot: &VersionEdit) -> Result<()> {
        let tmp = self.dir.join(REWRITE_FILE);
        let frame = encode_frame(snapshot)?;
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&frame)?;
            file.sync_all()?;
        }
        let path = self.dir.join(MANIFEST_FILE);
        fs::rename(&tmp, &path)?;
        if let Ok(dir) = File::open(&self.dir) {
            // Persist the rename; not every platform can fsync a directory.
            let _ = dir.sync_all();
        }
        self.file = OpenOptions::new().append(true).open(&path)?;
        log::info!("Rewrote manifest: {} -> {} bytes", self.size, frame.len());
        self.size = frame.len() as u64;
        Ok(())
    }

    /// Current size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}
