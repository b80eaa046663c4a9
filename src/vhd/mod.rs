//! Virtual disk container parsing.
//!
//! Reads just enough of the VHD / VHDX on-disk structures to answer one
//! question: is this a differencing disk, and if so, where is its parent?
//! Offsets follow the published container formats; the legacy footer is
//! big-endian, VHDX structures are little-endian.

pub mod chain;
pub mod legacy;
pub mod vhdx;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::Error;

const VHD_SIGNATURE: &[u8; 8] = b"conectix";
const VHDX_SIGNATURE: &[u8; 8] = b"vhdxfile";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskFormat {
    Vhd,
    Vhdx,
}

/// Parsed result of one disk file's header. `parent_path: None` is a
/// valid, non-error result meaning "root disk, not differencing";
/// callers must distinguish it from a parse error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskHeader {
    pub format: DiskFormat,
    pub parent_path: Option<String>,
}

/// Dispatches on the 8-byte signature at offset 0 and extracts the
/// parent locator. Fails atomically: a malformed or truncated header
/// yields an error, never a partially populated header.
pub fn parse_parent<R: Read + Seek>(reader: &mut R, path: &Path) -> Result<DiskHeader, Error> {
    let mut signature = [0u8; 8];
    read_exact_at(reader, 0, &mut signature, path)?;
    match &signature {
        VHD_SIGNATURE => legacy::parse(reader, path),
        VHDX_SIGNATURE => vhdx::parse(reader, path),
        _ => Err(Error::InvalidDiskFormat {
            path: path.to_path_buf(),
        }),
    }
}

/// Opens `path` and parses its header. The hypervisor may hold running
/// disks open; std opens with full sharing on Windows, so this never
/// blocks other readers or writers.
pub fn parse_parent_file(path: &Path) -> Result<DiskHeader, Error> {
    let mut file = open_shared(path)?;
    parse_parent(&mut file, path)
}

pub(crate) fn open_shared(path: &Path) -> Result<File, Error> {
    File::open(path).map_err(|source| Error::DiskIo {
        path: path.to_path_buf(),
        op: "open".to_string(),
        source,
    })
}

pub(crate) fn read_exact_at<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    buf: &mut [u8],
    path: &Path,
) -> Result<(), Error> {
    reader
        .seek(SeekFrom::Start(offset))
        .map_err(|source| Error::DiskIo {
            path: path.to_path_buf(),
            op: format!("seek to offset {}", offset),
            source,
        })?;
    reader.read_exact(buf).map_err(|source| Error::DiskIo {
        path: path.to_path_buf(),
        op: format!("read {} bytes at offset {}", buf.len(), offset),
        source,
    })
}

pub(crate) fn root_disk(format: DiskFormat) -> DiskHeader {
    DiskHeader {
        format,
        parent_path: None,
    }
}

/// Decodes a little-endian UTF-16 byte run, dropping trailing NULs.
pub(crate) fn decode_utf16le(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    let text = String::from_utf16_lossy(&units);
    text.trim_end_matches('\u{0}').to_string()
}

pub(crate) fn invalid_format(path: &Path) -> Error {
    Error::InvalidDiskFormat {
        path: PathBuf::from(path),
    }
}
